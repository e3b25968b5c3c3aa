//! Codec des messages SSDP (HTTP sur UDP).
//!
//! Conversion entre datagrammes bruts et messages structurés : lignes de
//! requête `NOTIFY` / `M-SEARCH` / `UPDATE`, lignes de statut des réponses et
//! en-têtes. La recherche d'en-tête est insensible à la casse.
//!
//! Le décodage ne panique jamais : toute entrée invalide donne un
//! [`CodecError`], que l'appelant traduit en « datagramme ignoré ».

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::errors::CodecError;

/// Méthodes SSDP reconnues par le control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsdpMethod {
    Notify,
    MSearch,
    Update,
}

impl SsdpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SsdpMethod::Notify => "NOTIFY",
            SsdpMethod::MSearch => "M-SEARCH",
            SsdpMethod::Update => "UPDATE",
        }
    }
}

impl fmt::Display for SsdpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SsdpMethod {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTIFY" => Ok(SsdpMethod::Notify),
            "M-SEARCH" => Ok(SsdpMethod::MSearch),
            "UPDATE" => Ok(SsdpMethod::Update),
            other => Err(CodecError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Version HTTP d'une ligne de requête ou de statut (`HTTP/1.1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpVersion {
    pub major: u8,
    pub minor: u8,
}

impl HttpVersion {
    pub const HTTP_1_0: HttpVersion = HttpVersion { major: 1, minor: 0 };
    pub const HTTP_1_1: HttpVersion = HttpVersion { major: 1, minor: 1 };
}

impl Default for HttpVersion {
    fn default() -> Self {
        HttpVersion::HTTP_1_1
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

impl FromStr for HttpVersion {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CodecError::MalformedVersion(s.to_string());
        let s = s.trim();
        let (prefix, numbers) = s.split_at_checked(5).ok_or_else(malformed)?;
        if !prefix.eq_ignore_ascii_case("HTTP/") {
            return Err(malformed());
        }
        let (major, minor) = numbers.split_once('.').ok_or_else(malformed)?;
        Ok(HttpVersion {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

/// En-têtes d'un message SSDP.
///
/// L'ordre d'insertion est conservé pour l'encodage ; la recherche ignore la
/// casse du nom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpHeaders {
    entries: Vec<(String, String)>,
}

impl SsdpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Valeur d'un en-tête (première occurrence), nom insensible à la casse
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remplace la valeur d'un en-tête existant, ou l'ajoute en fin de liste
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Requête SSDP décodée
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpRequest {
    pub method: SsdpMethod,
    /// Cible de la requête, `*` pour tous les messages SSDP valides
    pub target: String,
    pub http_version: HttpVersion,
    pub headers: SsdpHeaders,
}

impl SsdpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Réponse SSDP décodée (réponse unicast à un M-SEARCH)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub http_version: HttpVersion,
    pub status_code: u16,
    pub reason: String,
    pub headers: SsdpHeaders,
}

impl SsdpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Requête ou réponse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    Request(SsdpRequest),
    Response(SsdpResponse),
}

fn split_head(bytes: &[u8]) -> Result<(&str, std::str::Lines<'_>), CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
    let mut lines = text.lines();
    let start_line = lines
        .by_ref()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(CodecError::Empty)?;
    Ok((start_line, lines))
}

fn parse_headers(lines: std::str::Lines<'_>) -> Result<SsdpHeaders, CodecError> {
    let mut headers = SsdpHeaders::new();
    for line in lines {
        let line = line.trim();

        // La ligne vide marque la fin des en-têtes
        if line.is_empty() {
            break;
        }

        // Seul le premier ':' sépare nom et valeur (LOCATION contient des ':')
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim();
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(CodecError::MalformedHeader(line.to_string()));
                }
                headers.entries.push((name.to_string(), value.trim().to_string()));
            }
            None => {
                trace!("Skipping line without colon: '{}'", line);
            }
        }
    }
    Ok(headers)
}

/// Décode une requête `NOTIFY`, `M-SEARCH` ou `UPDATE`
pub fn parse_request(bytes: &[u8]) -> Result<SsdpRequest, CodecError> {
    let (start_line, lines) = split_head(bytes)?;
    let mut tokens = start_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(CodecError::MalformedStartLine(start_line.to_string()));
    };

    Ok(SsdpRequest {
        method: method.parse()?,
        target: target.to_string(),
        http_version: version.parse()?,
        headers: parse_headers(lines)?,
    })
}

/// Décode une réponse HTTP.
///
/// Le code de statut n'est pas contrôlé ici : toute réponse reçue sur le
/// socket unicast vaut preuve de présence.
pub fn parse_response(bytes: &[u8]) -> Result<SsdpResponse, CodecError> {
    let (start_line, lines) = split_head(bytes)?;
    let malformed = || CodecError::MalformedStartLine(start_line.to_string());
    let mut parts = start_line.splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    let status_code = parts
        .next()
        .and_then(|code| code.trim().parse::<u16>().ok())
        .ok_or_else(malformed)?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    Ok(SsdpResponse {
        http_version: version.parse()?,
        status_code,
        reason,
        headers: parse_headers(lines)?,
    })
}

/// Décode un datagramme en requête ou réponse selon sa première ligne
pub fn parse_message(bytes: &[u8]) -> Result<SsdpMessage, CodecError> {
    let (start_line, _) = split_head(bytes)?;
    let is_response = start_line
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/"));
    if is_response {
        parse_response(bytes).map(SsdpMessage::Response)
    } else {
        parse_request(bytes).map(SsdpMessage::Request)
    }
}

/// Encode une requête : ligne de requête HTTP/1.1, en-têtes dans l'ordre
/// fourni, ligne vide finale.
pub fn encode_request(method: SsdpMethod, target: &str, headers: &SsdpHeaders) -> Vec<u8> {
    let mut msg = format!("{} {} {}\r\n", method, target, HttpVersion::HTTP_1_1);
    for (name, value) in headers.iter() {
        msg.push_str(name);
        msg.push_str(": ");
        msg.push_str(value);
        msg.push_str("\r\n");
    }
    msg.push_str("\r\n");
    msg.into_bytes()
}

/// Construit un `M-SEARCH`.
///
/// `mx` n'est présent que pour les recherches multicast ; une recherche
/// unicast n'a pas de délai d'attente aléatoire.
pub fn msearch_request(host: &str, st: &str, mx: Option<u32>, user_agent: &str) -> Vec<u8> {
    let mut headers = SsdpHeaders::new();
    headers.set("HOST", host);
    headers.set("MAN", "\"ssdp:discover\"");
    if let Some(mx) = mx {
        // MX doit être >= 1
        headers.set("MX", mx.max(1).to_string());
    }
    headers.set("ST", st);
    headers.set("USER-AGENT", user_agent);
    encode_request(SsdpMethod::MSearch, "*", &headers)
}
