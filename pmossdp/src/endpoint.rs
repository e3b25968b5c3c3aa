//! Endpoints SSDP : une interface réseau locale liée pour le trafic SSDP.
//!
//! Chaque endpoint possède deux sockets :
//!
//! * un socket multicast lié au port 1900 (réutilisation d'adresse activée)
//!   qui a rejoint le groupe SSDP de sa famille d'adresses, pour recevoir
//!   les NOTIFY ;
//! * un socket unicast lié à un port éphémère sur l'adresse de l'interface,
//!   qui émet les M-SEARCH et reçoit les réponses.
//!
//! Les sockets sont vus à travers le trait [`SsdpSocket`], ce qui permet au
//! contrôleur de fonctionner sur des sockets fournis par l'appelant.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use pmoutils::{is_ipv6_link_local, is_ipv6_site_local};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::{
    SSDP_MULTICAST_ADDR_V4, SSDP_MULTICAST_ADDR_V6_GLOBAL, SSDP_MULTICAST_ADDR_V6_LINK_LOCAL,
    SSDP_MULTICAST_ADDR_V6_SITE_LOCAL, SSDP_PORT,
};

/// Socket UDP tel que l'utilise le contrôleur
pub trait SsdpSocket: Send + Sync {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Réception bloquante, bornée par [`SsdpSocket::set_read_timeout`]
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl SsdpSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout)
    }
}

/// Groupe multicast SSDP à utiliser pour une adresse locale.
///
/// * IPv4 → 239.255.255.250
/// * IPv6 link-local → FF02::C
/// * IPv6 site-local, ou toute adresse IPv6 si `site_local_operation` → FF05::C
/// * autre IPv6 → FF0E::C
pub fn multicast_group_for(address: IpAddr, site_local_operation: bool) -> IpAddr {
    match address {
        IpAddr::V4(_) => IpAddr::V4(SSDP_MULTICAST_ADDR_V4),
        IpAddr::V6(v6) if is_ipv6_link_local(&v6) => IpAddr::V6(SSDP_MULTICAST_ADDR_V6_LINK_LOCAL),
        IpAddr::V6(v6) if site_local_operation || is_ipv6_site_local(&v6) => {
            IpAddr::V6(SSDP_MULTICAST_ADDR_V6_SITE_LOCAL)
        }
        IpAddr::V6(_) => IpAddr::V6(SSDP_MULTICAST_ADDR_V6_GLOBAL),
    }
}

/// Interface locale liée pour SSDP
#[derive(Clone)]
pub struct Endpoint {
    address: IpAddr,
    multicast_group: IpAddr,
    multicast_socket: Option<Arc<dyn SsdpSocket>>,
    unicast_socket: Arc<dyn SsdpSocket>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("multicast_group", &self.multicast_group)
            .field("multicast", &self.multicast_socket.is_some())
            .field("unicast", &self.unicast_socket.local_addr().ok())
            .finish()
    }
}

impl Endpoint {
    /// Lie les deux sockets SSDP sur l'interface `address`.
    pub fn bind(address: IpAddr, site_local_operation: bool) -> io::Result<Endpoint> {
        let multicast_group = multicast_group_for(address, site_local_operation);
        let multicast_socket = bind_multicast_socket(address)?;
        let unicast_socket = bind_unicast_socket(address)?;

        info!(
            "✅ SSDP endpoint ready on {} (group {}, unicast {})",
            address,
            multicast_group,
            unicast_socket.local_addr()?
        );

        Ok(Endpoint {
            address,
            multicast_group,
            multicast_socket: Some(Arc::new(multicast_socket)),
            unicast_socket: Arc::new(unicast_socket),
        })
    }

    /// Construit un endpoint sur des sockets déjà ouverts.
    ///
    /// Sans socket multicast, l'endpoint ne reçoit que les réponses unicast.
    pub fn from_sockets(
        address: IpAddr,
        multicast_group: IpAddr,
        multicast_socket: Option<Arc<dyn SsdpSocket>>,
        unicast_socket: Arc<dyn SsdpSocket>,
    ) -> Endpoint {
        Endpoint {
            address,
            multicast_group,
            multicast_socket,
            unicast_socket,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub fn multicast_group(&self) -> IpAddr {
        self.multicast_group
    }

    /// `<groupe>:1900`
    pub fn multicast_target(&self) -> SocketAddr {
        SocketAddr::new(self.multicast_group, SSDP_PORT)
    }

    pub fn multicast_socket(&self) -> Option<&Arc<dyn SsdpSocket>> {
        self.multicast_socket.as_ref()
    }

    pub fn unicast_socket(&self) -> &Arc<dyn SsdpSocket> {
        &self.unicast_socket
    }

    /// Envoie depuis le socket unicast
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.unicast_socket.send_to(buf, target)
    }
}

fn bind_multicast_socket(address: IpAddr) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(SocketAddr::new(address, SSDP_PORT));
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "freebsd"
    ))]
    socket.set_reuse_port(true)?;

    match address {
        IpAddr::V4(ipv4) => {
            let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SSDP_PORT);
            socket.bind(&bind_addr.into())?;
            socket.join_multicast_v4(&SSDP_MULTICAST_ADDR_V4, &ipv4)?;
            debug!("SSDP: joined {} on {}", SSDP_MULTICAST_ADDR_V4, ipv4);
        }
        IpAddr::V6(_) => {
            socket.set_only_v6(true)?;
            let bind_addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), SSDP_PORT);
            socket.bind(&bind_addr.into())?;
            for group in [
                SSDP_MULTICAST_ADDR_V6_LINK_LOCAL,
                SSDP_MULTICAST_ADDR_V6_SITE_LOCAL,
                SSDP_MULTICAST_ADDR_V6_GLOBAL,
            ] {
                match socket.join_multicast_v6(&group, 0) {
                    Ok(()) => debug!("SSDP: joined {} for {}", group, address),
                    Err(e) => warn!("SSDP: failed to join {} for {}: {}", group, address, e),
                }
            }
        }
    }

    Ok(socket.into())
}

fn bind_unicast_socket(address: IpAddr) -> io::Result<UdpSocket> {
    let bind_addr = SocketAddr::new(address, 0);
    let socket = Socket::new(
        Domain::for_address(bind_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    match address {
        IpAddr::V4(ipv4) => {
            socket.set_multicast_if_v4(&ipv4)?;
            socket.set_multicast_loop_v4(true)?;
        }
        IpAddr::V6(_) => {
            socket.set_only_v6(true)?;
            socket.set_multicast_loop_v6(true)?;
        }
    }
    socket.bind(&bind_addr.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_group_for() {
        let v4: IpAddr = "192.168.1.10".parse().unwrap();
        assert_eq!(
            multicast_group_for(v4, false),
            IpAddr::V4(SSDP_MULTICAST_ADDR_V4)
        );

        let link_local: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(
            multicast_group_for(link_local, true),
            IpAddr::V6(SSDP_MULTICAST_ADDR_V6_LINK_LOCAL)
        );

        let site_local: IpAddr = "fec0::1".parse().unwrap();
        assert_eq!(
            multicast_group_for(site_local, false),
            IpAddr::V6(SSDP_MULTICAST_ADDR_V6_SITE_LOCAL)
        );

        let global: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(
            multicast_group_for(global, false),
            IpAddr::V6(SSDP_MULTICAST_ADDR_V6_GLOBAL)
        );
        assert_eq!(
            multicast_group_for(global, true),
            IpAddr::V6(SSDP_MULTICAST_ADDR_V6_SITE_LOCAL)
        );
    }

    #[test]
    fn test_from_sockets_sends_on_unicast_socket() {
        let local = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let endpoint = Endpoint::from_sockets(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(SSDP_MULTICAST_ADDR_V4),
            None,
            Arc::new(local),
        );
        assert_eq!(endpoint.multicast_target().port(), 1900);
        assert!(endpoint.multicast_socket().is_none());

        endpoint.send_to(b"ping", peer.local_addr().unwrap()).unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }
}
