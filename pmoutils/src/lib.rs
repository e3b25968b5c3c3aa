//! Utilitaires système partagés par les crates PMOMusic.
//!
//! - [`get_os_string`] : jeton `OS/version` utilisé dans les en-têtes
//!   `SERVER` / `USER-AGENT` UPnP
//! - [`list_upnp_addresses`] : adresses locales sur lesquelles ouvrir des
//!   endpoints SSDP
//! - [`order_addresses_by_scope`] / [`link_distance`] : tri des adresses par
//!   portée réseau
mod ip_utils;

pub use ip_utils::{
    LinkDistance, is_ipv6_link_local, is_ipv6_site_local, link_distance, list_upnp_addresses,
    order_addresses_by_scope,
};

/// Retourne une chaîne décrivant le système d'exploitation et sa version.
///
/// Utilise la crate `os_info` pour obtenir de manière portable
/// les informations sur le système d'exploitation courant.
///
/// # Format
/// - macOS: "macOS/15.1" ou "Mac OS/10.15.7"
/// - Linux: "Linux/6.5.0" ou "Ubuntu/22.04"
/// - Windows: "Windows/10.0.19045"
/// - Autre: "{OS}/Unknown"
///
/// Les espaces sont remplacés par des `_` : le jeton est inséré tel quel dans
/// un en-tête dont les champs sont séparés par des espaces.
pub fn get_os_string() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type()).replace(' ', "_");

    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version.to_string().replace(' ', "_"))
    } else {
        format!("{}/Unknown", os_type)
    }
}
