//! Modèle de données du control point : [`RootEntry`] et [`DeviceEntry`].
//!
//! Une `RootEntry` regroupe tout ce qui a été annoncé sous un root device :
//! ses devices embarqués (clés = UUID), leurs services, les identifiants de
//! boot/configuration et la date d'expiration de l'annonce.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::SSDP_PORT;
use crate::advertisement::UpnpVersion;
use crate::codec::HttpVersion;

/// Device UPnP (root ou embarqué) vu sous une [`RootEntry`].
///
/// Le type n'est connu qu'après la première annonce `urn:...:device:...`
/// pour cet UUID ; les services ne font que s'accumuler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    uuid: String,
    device_type: Option<String>,
    device_type_version: u32,
    services: HashSet<String>,
    pub(crate) reported: bool,
}

impl DeviceEntry {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            device_type: None,
            device_type_version: 0,
            services: HashSet::new(),
            reported: false,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// `schemas-upnp-org:device:MediaServer`, si déjà annoncé
    pub fn device_type(&self) -> Option<&str> {
        self.device_type.as_deref()
    }

    pub fn device_type_version(&self) -> u32 {
        self.device_type_version
    }

    /// `urn:<type>:<version>`, si le type est connu
    pub fn device_type_version_urn(&self) -> Option<String> {
        self.device_type
            .as_ref()
            .map(|t| format!("urn:{}:{}", t, self.device_type_version))
    }

    pub fn services(&self) -> &HashSet<String> {
        &self.services
    }

    pub fn has_service(&self, service_type_urn: &str) -> bool {
        self.services.contains(service_type_urn)
    }

    pub(crate) fn set_device_type(&mut self, device_type: String, version: u32) {
        self.device_type = Some(device_type);
        self.device_type_version = version;
    }

    /// Retourne `false` si le service était déjà connu
    pub(crate) fn add_service(&mut self, service_type_urn: &str) -> bool {
        if self.services.contains(service_type_urn) {
            return false;
        }
        self.services.insert(service_type_urn.to_string())
    }

    fn absorb(&mut self, other: DeviceEntry) {
        if self.device_type.is_none() {
            self.device_type = other.device_type;
            self.device_type_version = other.device_type_version;
        }
        self.services.extend(other.services);
        self.reported |= other.reported;
    }
}

/// Root device et tout ce qui a été annoncé sous lui
#[derive(Debug, Clone, PartialEq)]
pub struct RootEntry {
    root_device_id: String,
    pub(crate) description_location: String,
    pub(crate) endpoint: Option<IpAddr>,
    pub(crate) upnp_version: UpnpVersion,
    pub(crate) http_version: HttpVersion,
    pub(crate) os_version: String,
    pub(crate) product_version: String,
    pub(crate) expiration_time: DateTime<Utc>,
    pub(crate) search_port: u16,
    pub(crate) boot_id: u32,
    pub(crate) config_id: u32,
    devices: HashMap<String, DeviceEntry>,
    pub(crate) client_properties: HashMap<String, Value>,
    /// Un message `upnp:rootdevice` a été vu pour cette entrée
    pub(crate) root_announced: bool,
}

impl RootEntry {
    pub fn new(root_device_id: impl Into<String>, expiration_time: DateTime<Utc>) -> Self {
        Self {
            root_device_id: root_device_id.into(),
            description_location: String::new(),
            endpoint: None,
            upnp_version: UpnpVersion::default(),
            http_version: HttpVersion::default(),
            os_version: String::new(),
            product_version: String::new(),
            expiration_time,
            search_port: SSDP_PORT,
            boot_id: 0,
            config_id: 0,
            devices: HashMap::new(),
            client_properties: HashMap::new(),
            root_announced: false,
        }
    }

    pub fn root_device_id(&self) -> &str {
        &self.root_device_id
    }

    /// `false` tant que l'entrée est provisoire (aucun `upnp:rootdevice` vu)
    pub fn is_root_announced(&self) -> bool {
        self.root_announced
    }

    /// URL du document de description
    pub fn description_location(&self) -> &str {
        &self.description_location
    }

    /// Adresse locale de l'interface qui a reçu la dernière annonce
    pub fn endpoint(&self) -> Option<IpAddr> {
        self.endpoint
    }

    pub fn upnp_version(&self) -> UpnpVersion {
        self.upnp_version
    }

    pub fn http_version(&self) -> HttpVersion {
        self.http_version
    }

    pub fn os_version(&self) -> &str {
        &self.os_version
    }

    pub fn product_version(&self) -> &str {
        &self.product_version
    }

    pub fn expiration_time(&self) -> DateTime<Utc> {
        self.expiration_time
    }

    pub fn search_port(&self) -> u16 {
        self.search_port
    }

    pub fn boot_id(&self) -> u32 {
        self.boot_id
    }

    pub fn config_id(&self) -> u32 {
        self.config_id
    }

    pub fn devices(&self) -> &HashMap<String, DeviceEntry> {
        &self.devices
    }

    pub fn device(&self, uuid: &str) -> Option<&DeviceEntry> {
        self.devices.get(uuid)
    }

    pub fn contains_device(&self, uuid: &str) -> bool {
        self.devices.contains_key(uuid)
    }

    pub fn client_properties(&self) -> &HashMap<String, Value> {
        &self.client_properties
    }

    pub fn client_property(&self, key: &str) -> Option<&Value> {
        self.client_properties.get(key)
    }

    pub(crate) fn device_mut(&mut self, uuid: &str) -> &mut DeviceEntry {
        self.devices
            .entry(uuid.to_string())
            .or_insert_with(|| DeviceEntry::new(uuid))
    }

    pub(crate) fn set_root_device_id(&mut self, root_device_id: &str) {
        self.root_device_id = root_device_id.to_string();
    }

    /// Fusionne une entrée provisoire (créée avant le message
    /// `upnp:rootdevice`) dans celle-ci.
    ///
    /// Les champs déjà renseignés ici sont conservés, sauf l'expiration et le
    /// BOOTID qui prennent la valeur la plus récente.
    pub(crate) fn merge(&mut self, other: RootEntry) {
        if self.description_location.is_empty() {
            self.description_location = other.description_location;
        }
        if self.endpoint.is_none() {
            self.endpoint = other.endpoint;
        }
        self.expiration_time = self.expiration_time.max(other.expiration_time);
        self.boot_id = self.boot_id.max(other.boot_id);
        for (uuid, device) in other.devices {
            match self.devices.get_mut(&uuid) {
                Some(existing) => existing.absorb(device),
                None => {
                    self.devices.insert(uuid, device);
                }
            }
        }
        for (key, value) in other.client_properties {
            self.client_properties.entry(key).or_insert(value);
        }
        self.root_announced |= other.root_announced;
    }
}
