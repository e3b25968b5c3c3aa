//! Réconciliation des annonces SSDP dans la table des root devices.
//!
//! [`RootTable`] ne connaît ni sockets ni horloge : chaque opération reçoit
//! une annonce déjà validée et retourne un [`Reconciliation`] qui dit si
//! l'annonce a été appliquée et quels événements publier. Le contrôleur
//! appelle ces fonctions sous son verrou, puis publie les événements une
//! fois le verrou relâché.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::advertisement::{Advertisement, AliveNotice, ByeByeNotice, MessageType, UpdateNotice};
use crate::codec::SsdpMessage;
use crate::entries::RootEntry;
use crate::events::DiscoveryEvent;

/// Sort d'un message vis-à-vis de la table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// BOOTID plus ancien que celui connu : rien n'a été modifié
    StaleDropped,
    /// Message invalide au regard du protocole : rien n'a été modifié
    InvalidDropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub outcome: Outcome,
    /// Événements à publier, dans l'ordre
    pub events: Vec<DiscoveryEvent>,
}

impl Reconciliation {
    fn applied(events: Vec<DiscoveryEvent>) -> Self {
        Self {
            outcome: Outcome::Applied,
            events,
        }
    }

    fn dropped(outcome: Outcome) -> Self {
        Self {
            outcome,
            events: Vec::new(),
        }
    }
}

/// Table des [`RootEntry`], indexée par UUID du root device.
///
/// Une entrée créée par un message de device embarqué ou de service est
/// provisoire : elle est indexée par l'UUID du message jusqu'à ce qu'un
/// `upnp:rootdevice` la rattache à son vrai root device.
#[derive(Debug, Clone, Default)]
pub struct RootTable {
    roots: HashMap<String, RootEntry>,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn get(&self, root_device_id: &str) -> Option<&RootEntry> {
        self.roots.get(root_device_id)
    }

    pub(crate) fn get_mut(&mut self, root_device_id: &str) -> Option<&mut RootEntry> {
        self.roots.get_mut(root_device_id)
    }

    /// Toutes les entrées, provisoires comprises
    pub fn roots(&self) -> impl Iterator<Item = &RootEntry> {
        self.roots.values()
    }

    /// Entrées dont le root device s'est annoncé
    pub fn announced_roots(&self) -> impl Iterator<Item = &RootEntry> {
        self.roots.values().filter(|root| root.root_announced)
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    fn key_by_device(&self, device_uuid: &str) -> Option<String> {
        self.roots
            .iter()
            .find(|(_, root)| root.contains_device(device_uuid))
            .map(|(key, _)| key.clone())
    }

    fn key_by_location(&self, location: &str) -> Option<String> {
        if location.is_empty() {
            return None;
        }
        self.roots
            .iter()
            .find(|(_, root)| root.description_location == location)
            .map(|(key, _)| key.clone())
    }

    /// Interprète puis applique un datagramme décodé.
    ///
    /// `endpoint` est l'adresse locale de l'interface de réception, `now`
    /// la date de réception.
    pub fn apply_message(
        &mut self,
        message: &SsdpMessage,
        endpoint: IpAddr,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let advertisement = match message {
            SsdpMessage::Request(request) => Advertisement::from_request(request, now),
            SsdpMessage::Response(response) => Advertisement::from_response(response, now),
        };
        match advertisement {
            Ok(advertisement) => self.apply(&advertisement, endpoint),
            Err(e) => {
                trace!("SSDP message ignored: {}", e);
                Reconciliation::dropped(Outcome::InvalidDropped)
            }
        }
    }

    pub fn apply(&mut self, advertisement: &Advertisement, endpoint: IpAddr) -> Reconciliation {
        match advertisement {
            Advertisement::Alive(alive) => self.apply_alive(alive, endpoint),
            Advertisement::ByeBye(byebye) => self.apply_byebye(byebye),
            Advertisement::Update(update) => self.apply_update(update),
        }
    }

    /// `ssdp:alive` ou réponse à un M-SEARCH.
    ///
    /// Les événements sont produits dans l'ordre : redémarrage (ou à défaut
    /// changement de configuration), root ajouté, device ajouté, service
    /// ajouté.
    pub fn apply_alive(&mut self, notice: &AliveNotice, endpoint: IpAddr) -> Reconciliation {
        let uuid = notice.device_uuid.as_str();
        let location = notice.location.as_deref().unwrap_or_default();

        let existing = self
            .key_by_device(uuid)
            .or_else(|| self.key_by_location(location));

        if let (Some(key), Some(boot_id)) = (&existing, notice.boot_id) {
            if let Some(root) = self.roots.get(key) {
                if root.boot_id > boot_id {
                    debug!(
                        "SSDP: stale alive for {} (BOOTID {} < {})",
                        uuid, boot_id, root.boot_id
                    );
                    return Reconciliation::dropped(Outcome::StaleDropped);
                }
            }
        }

        let newly_added = existing.is_none();
        let mut key = existing.unwrap_or_else(|| uuid.to_string());
        let mut rebooted = false;
        let mut configuration_changed = false;

        {
            let root = self
                .roots
                .entry(key.clone())
                .or_insert_with(|| RootEntry::new(uuid, notice.expiration_time));

            if let Some(boot_id) = notice.boot_id {
                let config_id = notice.config_id.unwrap_or(0);
                if !newly_added {
                    rebooted = root.boot_id < boot_id;
                    configuration_changed = root.config_id != config_id;
                }
                root.boot_id = boot_id;
                root.config_id = config_id;
            }

            root.endpoint = Some(endpoint);
            root.http_version = notice.http_version;
            root.upnp_version = notice.server.upnp_version;
            root.os_version = notice.server.os_version.clone();
            root.product_version = notice.server.product_version.clone();
            root.search_port = notice.search_port;
            root.expiration_time = notice.expiration_time;
            if notice.message_type == MessageType::RootDevice && !location.is_empty() {
                root.description_location = location.to_string();
            } else if root.description_location.is_empty() {
                root.description_location = location.to_string();
            }
        }

        let mut root_added = false;
        if notice.message_type == MessageType::RootDevice {
            let announced = self.roots.get(&key).is_some_and(|root| root.root_announced);
            if !announced {
                let (promoted_key, added) = self.promote(&key, uuid);
                key = promoted_key;
                root_added = added;
            }
        }

        let Some(root) = self.roots.get_mut(&key) else {
            return Reconciliation::dropped(Outcome::InvalidDropped);
        };
        let mut device_added = false;
        let mut service_added = None;
        {
            let device = root.device_mut(uuid);
            match &notice.message_type {
                MessageType::RootDevice => {}
                MessageType::Device {
                    device_type,
                    version,
                } => device.set_device_type(device_type.clone(), *version),
                MessageType::Service { urn } => {
                    if device.add_service(urn) {
                        service_added = Some(urn.clone());
                    }
                }
            }
            if !matches!(notice.message_type, MessageType::Service { .. }) && !device.reported {
                device.reported = true;
                device_added = true;
            }
        }

        let snapshot = root.clone();
        let mut events = Vec::new();
        if rebooted {
            events.push(DiscoveryEvent::DeviceRebooted {
                root: snapshot.clone(),
                configuration_changed,
            });
        } else if configuration_changed {
            events.push(DiscoveryEvent::DeviceConfigurationChanged {
                root: snapshot.clone(),
            });
        }
        if root_added {
            events.push(DiscoveryEvent::RootDeviceAdded {
                root: snapshot.clone(),
            });
        }
        if let Some(device) = snapshot.device(uuid).cloned() {
            if device_added {
                events.push(DiscoveryEvent::DeviceAdded {
                    root: snapshot.clone(),
                    device: device.clone(),
                });
            }
            if let Some(service_type_urn) = service_added {
                events.push(DiscoveryEvent::ServiceAdded {
                    root: snapshot.clone(),
                    device,
                    service_type_urn,
                });
            }
        }
        Reconciliation::applied(events)
    }

    /// Rattache l'entrée `key` au root device `root_uuid`.
    ///
    /// L'entrée est déplacée sous la clé `root_uuid`, ou fusionnée dans
    /// l'entrée existante de ce root. Retourne la clé finale et si le root
    /// doit être signalé comme ajouté.
    fn promote(&mut self, key: &str, root_uuid: &str) -> (String, bool) {
        if key != root_uuid {
            if let Some(mut pending) = self.roots.remove(key) {
                debug!("SSDP: provisional entry {} attached to root {}", key, root_uuid);
                pending.set_root_device_id(root_uuid);
                match self.roots.get_mut(root_uuid) {
                    Some(target) => target.merge(pending),
                    None => {
                        self.roots.insert(root_uuid.to_string(), pending);
                    }
                }
            }
        }
        match self.roots.get_mut(root_uuid) {
            Some(root) => {
                let added = !root.root_announced;
                root.root_announced = true;
                (root_uuid.to_string(), added)
            }
            None => (key.to_string(), false),
        }
    }

    /// `ssdp:byebye` : l'entrée entière qui contient le device disparaît
    pub fn apply_byebye(&mut self, notice: &ByeByeNotice) -> Reconciliation {
        let Some(key) = self.key_by_device(&notice.device_uuid) else {
            trace!("SSDP: byebye for unknown device {}", notice.device_uuid);
            return Reconciliation::applied(Vec::new());
        };
        if let (Some(boot_id), Some(root)) = (notice.boot_id, self.roots.get(&key)) {
            if root.boot_id > boot_id {
                debug!(
                    "SSDP: stale byebye for {} (BOOTID {} < {})",
                    notice.device_uuid, boot_id, root.boot_id
                );
                return Reconciliation::dropped(Outcome::StaleDropped);
            }
        }
        match self.roots.remove(&key) {
            Some(root) if root.root_announced => {
                Reconciliation::applied(vec![DiscoveryEvent::RootDeviceRemoved { root }])
            }
            _ => Reconciliation::applied(Vec::new()),
        }
    }

    /// `UPDATE` : le BOOTID va changer sans nouveau cycle alive.
    ///
    /// Un redémarrage détecté ici n'implique jamais un changement de
    /// configuration.
    pub fn apply_update(&mut self, notice: &UpdateNotice) -> Reconciliation {
        let key = notice
            .location
            .as_deref()
            .and_then(|location| self.key_by_location(location))
            .or_else(|| {
                notice
                    .device_uuid
                    .as_deref()
                    .and_then(|uuid| self.key_by_device(uuid))
            });
        let Some(root) = key.and_then(|key| self.roots.get_mut(&key)) else {
            trace!("SSDP: UPDATE for unknown root ({:?})", notice.location);
            return Reconciliation::applied(Vec::new());
        };
        if root.boot_id > notice.boot_id {
            debug!(
                "SSDP: stale UPDATE for {} (BOOTID {} < {})",
                root.root_device_id(),
                notice.boot_id,
                root.boot_id
            );
            return Reconciliation::dropped(Outcome::StaleDropped);
        }
        let rebooted = root.boot_id < notice.boot_id;
        root.boot_id = notice.next_boot_id;

        let events = if rebooted {
            vec![DiscoveryEvent::DeviceRebooted {
                root: root.clone(),
                configuration_changed: false,
            }]
        } else {
            Vec::new()
        };
        Reconciliation::applied(events)
    }

    /// Retire toutes les entrées expirées avant `now`.
    ///
    /// Retourne un `RootDeviceRemoved` par root annoncé retiré ; une entrée
    /// provisoire disparaît sans événement.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<DiscoveryEvent> {
        let mut expired: Vec<String> = self
            .roots
            .iter()
            .filter(|(_, root)| root.expiration_time < now)
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|key| self.roots.remove(&key))
            .filter_map(|root| {
                if !root.root_announced {
                    trace!("SSDP: provisional entry {} expired", root.root_device_id());
                    return None;
                }
                debug!("SSDP: root {} expired", root.root_device_id());
                Some(DiscoveryEvent::RootDeviceRemoved { root })
            })
            .collect()
    }
}
