//! Erreurs du control point SSDP.

use thiserror::Error;

/// Erreurs de décodage d'un datagramme SSDP.
///
/// Elles ne remontent jamais jusqu'à l'appelant du contrôleur : un datagramme
/// qui ne se décode pas est simplement ignoré.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty datagram")]
    Empty,

    #[error("Datagram is not valid UTF-8")]
    NotUtf8,

    #[error("Malformed start line: '{0}'")]
    MalformedStartLine(String),

    #[error("Unsupported method '{0}'")]
    UnsupportedMethod(String),

    #[error("Malformed header line: '{0}'")]
    MalformedHeader(String),

    #[error("Malformed HTTP version: '{0}'")]
    MalformedVersion(String),
}

/// Erreurs du sous-système SSDP.
#[derive(Error, Debug)]
pub enum SsdpError {
    /// `start()` appelé alors que le contrôleur n'est pas arrêté
    #[error("SSDPClientController is already active")]
    AlreadyActive,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Message bien formé mais invalide au regard du protocole
    #[error("Invalid SSDP message: {0}")]
    InvalidMessage(String),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SsdpError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        SsdpError::InvalidMessage(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SsdpError>;
