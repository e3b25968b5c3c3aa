use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pmoconfig::Config;
use pmossdp::{
    ControllerState, DiscoveryEvent, Endpoint, SSDP_MULTICAST_ADDR_V4, SsdpClientConfig,
    SsdpClientController, SsdpError, SsdpSocket, parse_request,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    controller: SsdpClientController,
    /// Adresse du socket « multicast » du contrôleur
    notify_addr: SocketAddr,
    /// Device simulé
    device: UdpSocket,
}

fn test_config() -> SsdpClientConfig {
    SsdpClientConfig {
        expiration_interval: Duration::from_millis(50),
        receive_poll: Duration::from_millis(20),
        user_agent_product: "PMOMusicTest/0.1".to_string(),
        ..SsdpClientConfig::default()
    }
}

fn start_harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let multicast = UdpSocket::bind("127.0.0.1:0").unwrap();
    let unicast = UdpSocket::bind("127.0.0.1:0").unwrap();
    let notify_addr = multicast.local_addr().unwrap();

    let multicast: Arc<dyn SsdpSocket> = Arc::new(multicast);
    let unicast: Arc<dyn SsdpSocket> = Arc::new(unicast);
    let endpoint = Endpoint::from_sockets(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(SSDP_MULTICAST_ADDR_V4),
        Some(multicast),
        unicast,
    );

    let controller = SsdpClientController::with_config(test_config());
    controller.start_with_endpoints(vec![endpoint]).unwrap();

    let device = UdpSocket::bind("127.0.0.1:0").unwrap();
    device.set_read_timeout(Some(WAIT)).unwrap();

    Harness {
        controller,
        notify_addr,
        device,
    }
}

fn notify_alive(usn: &str, max_age: u32, boot_id: u32) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         LOCATION: http://127.0.0.1:49494/desc.xml\r\n\
         NT: upnp:rootdevice\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: Linux/6.1 UPnP/1.1 TestDevice/1.0\r\n\
         USN: {}\r\n\
         BOOTID.UPNP.ORG: {}\r\n\
         CONFIGID.UPNP.ORG: 1\r\n\r\n",
        max_age, usn, boot_id
    )
}

fn next_event(rx: &crossbeam_channel::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
    rx.recv_timeout(WAIT).expect("no SSDP event received")
}

#[test]
fn start_twice_is_rejected_and_close_is_idempotent() {
    let h = start_harness();
    assert_eq!(h.controller.state(), ControllerState::Running);
    assert_eq!(
        h.controller.endpoint_addresses(),
        vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
    );

    assert!(matches!(
        h.controller.start_with_endpoints(Vec::new()),
        Err(SsdpError::AlreadyActive)
    ));
    assert!(matches!(h.controller.start(), Err(SsdpError::AlreadyActive)));

    h.controller.close();
    assert_eq!(h.controller.state(), ControllerState::Stopped);
    assert!(h.controller.endpoint_addresses().is_empty());
    h.controller.close();
    assert_eq!(h.controller.state(), ControllerState::Stopped);

    h.controller.start_with_endpoints(Vec::new()).unwrap();
    assert_eq!(h.controller.state(), ControllerState::Running);
}

#[test]
fn notify_alive_then_byebye() {
    let h = start_harness();
    let events = h.controller.subscribe();

    h.device
        .send_to(
            notify_alive("uuid:abc::upnp:rootdevice", 1800, 1).as_bytes(),
            h.notify_addr,
        )
        .unwrap();

    match next_event(&events) {
        DiscoveryEvent::RootDeviceAdded { root } => {
            assert_eq!(root.root_device_id(), "abc");
            assert_eq!(root.description_location(), "http://127.0.0.1:49494/desc.xml");
            assert_eq!(root.endpoint(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(next_event(&events), DiscoveryEvent::DeviceAdded { .. }));
    assert!(h.controller.root_entry("abc").is_some());

    let byebye = "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\n\
                  NTS: ssdp:byebye\r\nUSN: uuid:abc::upnp:rootdevice\r\nBOOTID.UPNP.ORG: 1\r\n\r\n";
    h.device.send_to(byebye.as_bytes(), h.notify_addr).unwrap();

    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::RootDeviceRemoved { .. }
    ));
    assert!(h.controller.root_entries().is_empty());
}

#[test]
fn garbage_datagrams_are_ignored() {
    let h = start_harness();
    let events = h.controller.subscribe();

    h.device.send_to(b"\xff\xfe not ssdp", h.notify_addr).unwrap();
    h.device.send_to(b"GET / HTTP/1.1\r\n\r\n", h.notify_addr).unwrap();
    h.device
        .send_to(
            notify_alive("uuid:abc::upnp:rootdevice", 1800, 1).as_bytes(),
            h.notify_addr,
        )
        .unwrap();

    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::RootDeviceAdded { .. }
    ));
    assert_eq!(h.controller.state(), ControllerState::Running);
}

#[test]
fn unicast_search_and_response() {
    let h = start_harness();
    let events = h.controller.subscribe();
    let device_addr = h.device.local_addr().unwrap();

    assert_eq!(h.controller.search_root_devices(Some(device_addr)), 1);

    let mut buf = [0u8; 2048];
    let (n, from) = h.device.recv_from(&mut buf).unwrap();
    let request = parse_request(&buf[..n]).unwrap();
    assert_eq!(request.target, "*");
    assert_eq!(request.header("ST"), Some("upnp:rootdevice"));
    assert_eq!(request.header("MAN"), Some("\"ssdp:discover\""));
    assert_eq!(request.header("HOST"), Some(device_addr.to_string().as_str()));
    assert_eq!(request.header("MX"), None);
    assert!(
        request
            .header("USER-AGENT")
            .is_some_and(|ua| ua.ends_with("UPnP/1.1 PMOMusicTest/0.1"))
    );

    let response = "HTTP/1.1 200 OK\r\n\
                    CACHE-CONTROL: max-age=1800\r\n\
                    EXT:\r\n\
                    LOCATION: http://127.0.0.1:49494/desc.xml\r\n\
                    SERVER: Linux/6.1 UPnP/1.1 TestDevice/1.0\r\n\
                    ST: upnp:rootdevice\r\n\
                    USN: uuid:def::upnp:rootdevice\r\n\
                    BOOTID.UPNP.ORG: 3\r\n\
                    CONFIGID.UPNP.ORG: 7\r\n\r\n";
    h.device.send_to(response.as_bytes(), from).unwrap();

    match next_event(&events) {
        DiscoveryEvent::RootDeviceAdded { root } => {
            assert_eq!(root.root_device_id(), "def");
            assert_eq!(root.boot_id(), 3);
            assert_eq!(root.config_id(), 7);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn unicast_search_without_matching_family_sends_nothing() {
    let h = start_harness();
    let target: SocketAddr = "[::1]:1900".parse().unwrap();
    assert_eq!(h.controller.search_device_by_uuid("abc", Some(target)), 0);
}

#[test]
fn expired_root_is_removed_by_sweep() {
    let h = start_harness();
    let events = h.controller.subscribe();

    h.device
        .send_to(
            notify_alive("uuid:short::upnp:rootdevice", 1, 1).as_bytes(),
            h.notify_addr,
        )
        .unwrap();

    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::RootDeviceAdded { .. }
    ));
    assert!(matches!(next_event(&events), DiscoveryEvent::DeviceAdded { .. }));

    match next_event(&events) {
        DiscoveryEvent::RootDeviceRemoved { root } => assert_eq!(root.root_device_id(), "short"),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.controller.root_entry("short").is_none());
    assert!(events.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn client_properties_live_on_root_entries() {
    let h = start_harness();
    let events = h.controller.subscribe();

    assert!(!h.controller.set_client_property("abc", "friendly_name", json!("Salon")));

    h.device
        .send_to(
            notify_alive("uuid:abc::upnp:rootdevice", 1800, 1).as_bytes(),
            h.notify_addr,
        )
        .unwrap();
    next_event(&events);

    assert!(h.controller.set_client_property("abc", "friendly_name", json!("Salon")));
    assert_eq!(
        h.controller.client_property("abc", "friendly_name"),
        Some(json!("Salon"))
    );
    assert_eq!(h.controller.client_property("abc", "missing"), None);
}

/// Socket qui garde les datagrammes envoyés et ne reçoit jamais rien
#[derive(Default)]
struct RecordingSocket {
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    read_timeout: Mutex<Option<Duration>>,
}

impl RecordingSocket {
    fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent.lock().clone()
    }
}

impl SsdpSocket for RecordingSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.sent.lock().push((buf.to_vec(), target));
        Ok(buf.len())
    }

    fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let timeout = self.read_timeout.lock().unwrap_or(Duration::from_millis(20));
        thread::sleep(timeout);
        Err(io::Error::new(io::ErrorKind::WouldBlock, "nothing to read"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self.read_timeout.lock() = timeout;
        Ok(())
    }
}

#[test]
fn start_sends_multicast_search_for_all() {
    let socket = Arc::new(RecordingSocket::default());
    let unicast: Arc<dyn SsdpSocket> = socket.clone();
    let endpoint = Endpoint::from_sockets(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V4(SSDP_MULTICAST_ADDR_V4),
        None,
        unicast,
    );
    let group = SocketAddr::new(IpAddr::V4(SSDP_MULTICAST_ADDR_V4), 1900);

    let controller = SsdpClientController::with_config(test_config());
    controller.start_with_endpoints(vec![endpoint]).unwrap();

    let sent = socket.sent();
    assert_eq!(sent.len(), 2);
    for (datagram, target) in &sent {
        assert_eq!(*target, group);
        let request = parse_request(datagram).unwrap();
        assert_eq!(request.target, "*");
        assert_eq!(request.header("ST"), Some("ssdp:all"));
        assert_eq!(request.header("MX"), Some("3"));
        assert_eq!(request.header("HOST"), Some("239.255.255.250:1900"));
        assert_eq!(request.header("MAN"), Some("\"ssdp:discover\""));
    }

    assert_eq!(controller.search_device_by_uuid("abc", None), 1);
    let sent = socket.sent();
    assert_eq!(sent.len(), 4);
    let request = parse_request(&sent[3].0).unwrap();
    assert_eq!(request.header("ST"), Some("uuid:abc"));
    assert_eq!(sent[3].1, group);

    controller.close();
    assert_eq!(controller.search_all(None), 0);
    assert_eq!(socket.sent().len(), 4);
}

#[test]
fn provisional_entry_stays_hidden_until_rootdevice() {
    let h = start_harness();
    let events = h.controller.subscribe();

    h.device
        .send_to(
            notify_alive(
                "uuid:media::urn:schemas-upnp-org:service:ContentDirectory:1",
                1800,
                1,
            )
            .as_bytes(),
            h.notify_addr,
        )
        .unwrap();
    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::ServiceAdded { .. }
    ));
    assert!(h.controller.root_entries().is_empty());
    assert!(h.controller.root_entry("media").is_none());

    // même LOCATION : le root rattache l'entrée provisoire
    h.device
        .send_to(
            notify_alive("uuid:box::upnp:rootdevice", 1800, 1).as_bytes(),
            h.notify_addr,
        )
        .unwrap();
    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::RootDeviceAdded { .. }
    ));

    let roots = h.controller.root_entries();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].root_device_id(), "box");
    assert!(roots[0].contains_device("media"));
}

#[test]
fn provisional_entry_expires_without_event() {
    let h = start_harness();
    let events = h.controller.subscribe();

    h.device
        .send_to(
            notify_alive(
                "uuid:orphan::urn:schemas-upnp-org:service:ContentDirectory:1",
                1,
                1,
            )
            .as_bytes(),
            h.notify_addr,
        )
        .unwrap();
    assert!(matches!(
        next_event(&events),
        DiscoveryEvent::ServiceAdded { .. }
    ));
    assert!(events.recv_timeout(Duration::from_millis(1500)).is_err());
}

#[test]
fn invalid_ssdp_section_is_a_config_error() {
    let config = Config::from_yaml_str("ssdp:\n  address_filters: 12\n").unwrap();
    assert!(matches!(
        SsdpClientController::from_config(&config),
        Err(SsdpError::Config(_))
    ));

    let config = Config::from_yaml_str("ssdp:\n  search_mx: 5\n").unwrap();
    let controller = SsdpClientController::from_config(&config).unwrap();
    assert_eq!(controller.config().search_mx, 5);
    assert_eq!(controller.state(), ControllerState::Stopped);
}
