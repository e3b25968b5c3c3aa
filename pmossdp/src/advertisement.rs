//! Interprétation des messages SSDP décodés.
//!
//! Transforme une [`SsdpRequest`] / [`SsdpResponse`] en annonce typée
//! ([`Advertisement`]) après validation protocolaire : USN, SERVER,
//! CACHE-CONTROL, version UPnP, BOOTID / CONFIGID / SEARCHPORT.
//! Aucune de ces fonctions ne touche à l'état du contrôleur.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::SSDP_PORT;
use crate::codec::{HttpVersion, SsdpMessage, SsdpMethod, SsdpRequest, SsdpResponse, parse_message};
use crate::errors::{Result, SsdpError};

const UPNP_VERSION_PREFIX: &str = "UPnP/";
const SEARCH_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";
pub const ROOT_DEVICE_TYPE: &str = "upnp:rootdevice";

/// Unique Service Name : `uuid:<device-uuid>::<type>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usn {
    pub device_uuid: String,
    pub message_type: String,
}

impl Usn {
    /// Découpe un USN.
    ///
    /// Retourne `None` pour la forme nue `uuid:<device-uuid>`, qui ne porte
    /// aucun type et n'est pas exploitée.
    pub fn parse(usn: &str) -> Option<Usn> {
        let rest = usn.trim().strip_prefix("uuid:")?;
        let (uuid, message_type) = rest.split_once("::")?;
        if uuid.is_empty() || message_type.is_empty() {
            return None;
        }
        Some(Usn {
            device_uuid: uuid.to_string(),
            message_type: message_type.to_string(),
        })
    }
}

/// Ce qu'annonce un message, tiré du suffixe de l'USN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// `upnp:rootdevice`
    RootDevice,
    /// `urn:<domain>:device:<type>:<version>`
    Device { device_type: String, version: u32 },
    /// `urn:<domain>:service:<type>:<version>`
    Service { urn: String },
}

impl MessageType {
    pub fn parse(message_type: &str) -> Option<MessageType> {
        if message_type == ROOT_DEVICE_TYPE {
            return Some(MessageType::RootDevice);
        }
        if !message_type.starts_with("urn:") {
            return None;
        }
        if message_type.contains(":device:") {
            let (device_type, version) = parse_type_version_urn(message_type)?;
            Some(MessageType::Device {
                device_type,
                version,
            })
        } else if message_type.contains(":service:") {
            Some(MessageType::Service {
                urn: message_type.to_string(),
            })
        } else {
            None
        }
    }
}

/// Découpe `urn:<type>:<version>` en (`<type>`, `<version>`).
///
/// `urn:schemas-upnp-org:device:MediaServer:1` donne
/// `("schemas-upnp-org:device:MediaServer", 1)`.
pub fn parse_type_version_urn(urn: &str) -> Option<(String, u32)> {
    let rest = urn.strip_prefix("urn:")?;
    let (type_part, version) = rest.rsplit_once(':')?;
    if type_part.is_empty() {
        return None;
    }
    let version = version.parse::<u32>().ok()?;
    Some((type_part.to_string(), version))
}

/// Version UPnP annoncée dans l'en-tête SERVER (`UPnP/1.1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpnpVersion {
    pub major: u32,
    pub minor: u32,
}

impl Default for UpnpVersion {
    fn default() -> Self {
        UpnpVersion { major: 1, minor: 0 }
    }
}

impl fmt::Display for UpnpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", UPNP_VERSION_PREFIX, self.major, self.minor)
    }
}

impl FromStr for UpnpVersion {
    type Err = SsdpError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SsdpError::invalid(format!("bad UPnP version token '{}'", s));
        let numbers = s.trim().strip_prefix(UPNP_VERSION_PREFIX).ok_or_else(invalid)?;
        let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
        Ok(UpnpVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Contenu de l'en-tête SERVER : `OS/version UPnP/x.y produit/version`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub os_version: String,
    pub upnp_version: UpnpVersion,
    pub product_version: String,
}

impl ServerInfo {
    /// Analyse l'en-tête SERVER.
    ///
    /// Les jetons sont normalement séparés par des espaces, mais beaucoup de
    /// devices utilisent `", "` :
    ///
    /// - `Linux/2.x.x, UPnP/1.0, pvConnect UPnP SDK/1.0`
    /// - `Windows 2003, UPnP/1.0 DLNADOC/1.50, Serviio/0.5.2`
    /// - `3Com-ADSL-11g/1.0 UPnP/1.0` (deux jetons seulement)
    ///
    /// Seul le jeton `UPnP/` est obligatoire.
    pub fn parse(server: &str) -> Result<ServerInfo> {
        let tokens: Vec<&str> = if server.contains(", ") {
            server.split(", ").filter(|t| !t.is_empty()).collect()
        } else {
            server.split_whitespace().collect()
        };
        let upnp_token = tokens
            .iter()
            .find(|t| t.starts_with(UPNP_VERSION_PREFIX))
            .ok_or_else(|| SsdpError::invalid(format!("no UPnP token in SERVER '{}'", server)))?;
        // 'UPnP/1.0 DLNADOC/1.50' : la version UPnP est toujours le premier mot
        let version_token = upnp_token.split(' ').next().unwrap_or_default();

        Ok(ServerInfo {
            os_version: tokens.first().map(|t| t.to_string()).unwrap_or_default(),
            upnp_version: version_token.parse()?,
            product_version: tokens.get(2).map(|t| t.to_string()).unwrap_or_default(),
        })
    }
}

/// Extrait `max-age` d'un en-tête CACHE-CONTROL (`max-age=1800`, directives
/// séparées par des virgules).
pub fn parse_max_age(cache_control: &str) -> Option<u32> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value.trim().parse::<u32>().ok()
    })
}

/// Date HTTP (`Sun, 06 Nov 1994 08:49:37 GMT`)
fn parse_http_date(date: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_optional_u32(value: Option<&str>, header: &str) -> Result<Option<u32>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| SsdpError::invalid(format!("{} is not an integer: '{}'", header, v)))
        })
        .transpose()
}

/// Annonce de présence : `NOTIFY ssdp:alive` ou réponse à un M-SEARCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveNotice {
    pub device_uuid: String,
    pub message_type: MessageType,
    pub location: Option<String>,
    pub server: ServerInfo,
    pub http_version: HttpVersion,
    pub max_age: u32,
    /// Date du message + `max-age`
    pub expiration_time: DateTime<Utc>,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub search_port: u16,
}

/// `NOTIFY ssdp:byebye`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByeByeNotice {
    pub device_uuid: String,
    pub message_type: String,
    pub boot_id: Option<u32>,
}

/// `UPDATE` : changement de BOOTID annoncé sans nouveau cycle alive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub location: Option<String>,
    /// UUID tiré de l'USN, utilisé quand LOCATION ne désigne aucune entrée
    pub device_uuid: Option<String>,
    pub boot_id: u32,
    pub next_boot_id: u32,
}

/// Message SSDP validé, prêt pour la réconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    Alive(AliveNotice),
    ByeBye(ByeByeNotice),
    Update(UpdateNotice),
}

/// En-têtes communs à NOTIFY et aux réponses
struct NotifyFields<'a> {
    http_version: HttpVersion,
    date: Option<&'a str>,
    cache_control: Option<&'a str>,
    location: Option<&'a str>,
    server: Option<&'a str>,
    nts: &'a str,
    usn: Option<&'a str>,
    boot_id: Option<&'a str>,
    config_id: Option<&'a str>,
    search_port: Option<&'a str>,
}

impl Advertisement {
    /// Décode puis interprète un datagramme brut.
    ///
    /// Un datagramme illisible donne [`SsdpError::Codec`], un message lisible
    /// mais invalide [`SsdpError::InvalidMessage`].
    pub fn from_datagram(datagram: &[u8], now: DateTime<Utc>) -> Result<Advertisement> {
        match parse_message(datagram)? {
            SsdpMessage::Request(request) => Self::from_request(&request, now),
            SsdpMessage::Response(response) => Self::from_response(&response, now),
        }
    }

    /// Interprète une requête reçue sur le socket multicast.
    ///
    /// `now` sert de date de réception : les NOTIFY n'ont pas d'en-tête DATE.
    pub fn from_request(request: &SsdpRequest, now: DateTime<Utc>) -> Result<Advertisement> {
        if request.target != "*" {
            return Err(SsdpError::invalid(format!(
                "request target must be '*', got '{}'",
                request.target
            )));
        }
        match request.method {
            SsdpMethod::Notify => {
                let nts = request
                    .header("NTS")
                    .ok_or_else(|| SsdpError::invalid("NOTIFY without NTS"))?;
                Self::from_notify_fields(
                    NotifyFields {
                        http_version: request.http_version,
                        date: None,
                        cache_control: request.header("CACHE-CONTROL"),
                        location: request.header("LOCATION"),
                        server: request.header("SERVER"),
                        nts,
                        usn: request.header("USN"),
                        boot_id: request.header("BOOTID.UPNP.ORG"),
                        config_id: request.header("CONFIGID.UPNP.ORG"),
                        search_port: request.header("SEARCHPORT.UPNP.ORG"),
                    },
                    now,
                )
            }
            SsdpMethod::Update => Self::from_update(request),
            SsdpMethod::MSearch => Err(SsdpError::invalid(
                "M-SEARCH from another control point, not an advertisement",
            )),
        }
    }

    /// Interprète une réponse unicast à un M-SEARCH ; elle vaut `ssdp:alive`.
    ///
    /// L'expiration part de l'en-tête DATE s'il est lisible, sinon de `now`.
    pub fn from_response(response: &SsdpResponse, now: DateTime<Utc>) -> Result<Advertisement> {
        Self::from_notify_fields(
            NotifyFields {
                http_version: response.http_version,
                date: response.header("DATE"),
                cache_control: response.header("CACHE-CONTROL"),
                location: response.header("LOCATION"),
                server: response.header("SERVER"),
                nts: NTS_ALIVE,
                usn: response.header("USN"),
                boot_id: response.header("BOOTID.UPNP.ORG"),
                config_id: response.header("CONFIGID.UPNP.ORG"),
                search_port: response.header("SEARCHPORT.UPNP.ORG"),
            },
            now,
        )
    }

    fn from_notify_fields(fields: NotifyFields<'_>, now: DateTime<Utc>) -> Result<Advertisement> {
        let boot_id = parse_optional_u32(fields.boot_id, "BOOTID.UPNP.ORG")?;
        let config_id = parse_optional_u32(fields.config_id, "CONFIGID.UPNP.ORG")?;
        let usn_header = fields
            .usn
            .ok_or_else(|| SsdpError::invalid("missing USN header"))?;
        let usn = Usn::parse(usn_header)
            .ok_or_else(|| SsdpError::invalid(format!("unusable USN '{}'", usn_header)))?;

        if fields.nts.eq_ignore_ascii_case(NTS_BYEBYE) {
            return Ok(Advertisement::ByeBye(ByeByeNotice {
                device_uuid: usn.device_uuid,
                message_type: usn.message_type,
                boot_id,
            }));
        }
        if !fields.nts.eq_ignore_ascii_case(NTS_ALIVE) {
            return Err(SsdpError::invalid(format!("unknown NTS '{}'", fields.nts)));
        }

        let server = fields
            .server
            .ok_or_else(|| SsdpError::invalid("alive message without SERVER"))?;
        let max_age = fields
            .cache_control
            .and_then(parse_max_age)
            .ok_or_else(|| SsdpError::invalid("missing or bad CACHE-CONTROL max-age"))?;
        let date = fields.date.and_then(parse_http_date).unwrap_or(now);
        let server = ServerInfo::parse(server)?;

        if server.upnp_version.major != 1 {
            return Err(SsdpError::invalid(format!(
                "incompatible UPnP version {}",
                server.upnp_version
            )));
        }

        let mut search_port = SSDP_PORT;
        if server.upnp_version.minor >= 1 {
            if boot_id.is_none() || config_id.is_none() {
                return Err(SsdpError::invalid(
                    "UPnP 1.1 message without BOOTID.UPNP.ORG / CONFIGID.UPNP.ORG",
                ));
            }
            if let Some(sp) = fields.search_port {
                search_port = sp
                    .trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|port| SEARCH_PORT_RANGE.contains(port))
                    .ok_or_else(|| {
                        SsdpError::invalid(format!("SEARCHPORT.UPNP.ORG out of range: '{}'", sp))
                    })?;
            }
        }

        let message_type = MessageType::parse(&usn.message_type).ok_or_else(|| {
            SsdpError::invalid(format!("unknown message type '{}'", usn.message_type))
        })?;

        Ok(Advertisement::Alive(AliveNotice {
            device_uuid: usn.device_uuid,
            message_type,
            location: fields.location.map(str::to_string),
            server,
            http_version: fields.http_version,
            max_age,
            expiration_time: date + Duration::seconds(i64::from(max_age)),
            boot_id,
            config_id,
            search_port,
        }))
    }

    fn from_update(request: &SsdpRequest) -> Result<Advertisement> {
        let boot_id = parse_optional_u32(request.header("BOOTID.UPNP.ORG"), "BOOTID.UPNP.ORG")?
            .ok_or_else(|| SsdpError::invalid("UPDATE without BOOTID.UPNP.ORG"))?;
        let next_boot_id =
            parse_optional_u32(request.header("NEXTBOOTID.UPNP.ORG"), "NEXTBOOTID.UPNP.ORG")?
                .ok_or_else(|| SsdpError::invalid("UPDATE without NEXTBOOTID.UPNP.ORG"))?;
        let location = request.header("LOCATION").map(str::to_string);
        let device_uuid = request
            .header("USN")
            .and_then(Usn::parse)
            .map(|usn| usn.device_uuid);
        if location.is_none() && device_uuid.is_none() {
            return Err(SsdpError::invalid("UPDATE without LOCATION nor usable USN"));
        }

        Ok(Advertisement::Update(UpdateNotice {
            location,
            device_uuid,
            boot_id,
            next_boot_id,
        }))
    }
}
