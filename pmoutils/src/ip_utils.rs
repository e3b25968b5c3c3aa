use get_if_addrs::get_if_addrs;
use std::net::{IpAddr, Ipv6Addr};
use tracing::{debug, warn};

/// Distance réseau d'une adresse, de la plus proche à la plus lointaine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkDistance {
    Zero,
    LinkLocal,
    SiteLocal,
    Global,
}

/// `fe80::/10`
pub fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// `fec0::/10` (portée site, dépréciée mais encore rencontrée)
pub fn is_ipv6_site_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfec0
}

/// Calcule la distance réseau d'une adresse.
///
/// Les adresses de loopback sont à distance nulle ; pour IPv4 toutes les
/// autres adresses sont considérées globales.
pub fn link_distance(addr: &IpAddr) -> LinkDistance {
    match addr {
        IpAddr::V4(v4) if v4.is_loopback() => LinkDistance::Zero,
        IpAddr::V4(_) => LinkDistance::Global,
        IpAddr::V6(v6) if v6.is_loopback() => LinkDistance::Zero,
        IpAddr::V6(v6) if is_ipv6_link_local(v6) => LinkDistance::LinkLocal,
        IpAddr::V6(v6) if is_ipv6_site_local(v6) => LinkDistance::SiteLocal,
        IpAddr::V6(_) => LinkDistance::Global,
    }
}

/// Trie les adresses de la portée la plus locale à la plus globale.
///
/// Le tri est stable : l'ordre des interfaces est conservé à distance égale.
pub fn order_addresses_by_scope<I>(addresses: I) -> Vec<IpAddr>
where
    I: IntoIterator<Item = IpAddr>,
{
    let mut result: Vec<IpAddr> = addresses.into_iter().collect();
    result.sort_by_key(link_distance);
    result
}

/// Liste les adresses locales utilisables pour UPnP.
///
/// Parcourt toutes les interfaces réseau et garde les adresses non-loopback
/// de la famille demandée. Si `filters` n'est pas vide, seules les adresses
/// qui y figurent sont retenues.
///
/// # Returns
///
/// Les adresses, sans doublon, triées par [`link_distance`]. En cas d'échec de
/// l'énumération des interfaces, la liste est vide (un réseau sans interface
/// est une situation normale au démarrage).
pub fn list_upnp_addresses(use_ipv4: bool, use_ipv6: bool, filters: &[IpAddr]) -> Vec<IpAddr> {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("❌ Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addresses: Vec<IpAddr> = Vec::new();
    for iface in interfaces {
        let ip = iface.ip();
        if ip.is_loopback() {
            continue;
        }
        let family_enabled = match ip {
            IpAddr::V4(_) => use_ipv4,
            IpAddr::V6(_) => use_ipv6,
        };
        if !family_enabled {
            continue;
        }
        if !filters.is_empty() && !filters.contains(&ip) {
            debug!("Interface {} ({}) filtered out", iface.name, ip);
            continue;
        }
        if !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }

    order_addresses_by_scope(addresses)
}
