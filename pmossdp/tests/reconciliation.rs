use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Duration, TimeZone, Utc};
use pmossdp::{
    DiscoveryEvent, Outcome, Reconciliation, RootTable, SsdpMethod, msearch_request,
    parse_message, parse_request,
};

const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn alive(usn: &str, boot_id: u32, config_id: u32) -> Vec<u8> {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         LOCATION: http://192.168.1.20:8080/desc.xml\r\n\
         NT: upnp:rootdevice\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: OS/1.0 UPnP/1.0 Prod/1.0\r\n\
         USN: {}\r\n\
         BOOTID.UPNP.ORG: {}\r\n\
         CONFIGID.UPNP.ORG: {}\r\n\r\n",
        usn, boot_id, config_id
    )
    .into_bytes()
}

fn byebye(usn: &str) -> Vec<u8> {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         NT: upnp:rootdevice\r\n\
         NTS: ssdp:byebye\r\n\
         USN: {}\r\n\r\n",
        usn
    )
    .into_bytes()
}

fn apply(table: &mut RootTable, datagram: &[u8], at: DateTime<Utc>) -> Reconciliation {
    let message = parse_message(datagram).unwrap();
    table.apply_message(&message, LOCAL, at)
}

fn kinds(r: &Reconciliation) -> Vec<&'static str> {
    r.events.iter().map(DiscoveryEvent::kind).collect()
}

#[test]
fn rootdevice_alive_creates_root_then_device() {
    let mut table = RootTable::new();
    let r = apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());

    assert_eq!(r.outcome, Outcome::Applied);
    assert_eq!(kinds(&r), vec!["root-device-added", "device-added"]);

    let root = table.get("abc").unwrap();
    assert_eq!(root.boot_id(), 1);
    assert_eq!(root.config_id(), 1);
    assert_eq!(root.description_location(), "http://192.168.1.20:8080/desc.xml");
    assert_eq!(root.os_version(), "OS/1.0");
    assert_eq!(root.product_version(), "Prod/1.0");
    assert_eq!(root.endpoint(), Some(LOCAL));
    assert!(root.contains_device("abc"));
    assert_eq!(root.expiration_time(), t0() + Duration::seconds(1800));
}

#[test]
fn service_alive_only_fires_service_added() {
    let mut table = RootTable::new();
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());

    let service = "uuid:abc::urn:schemas-upnp-org:service:ContentDirectory:1";
    let r = apply(&mut table, &alive(service, 1, 1), t0());
    assert_eq!(kinds(&r), vec!["service-added"]);
    match &r.events[0] {
        DiscoveryEvent::ServiceAdded {
            root,
            device,
            service_type_urn,
        } => {
            assert_eq!(root.root_device_id(), "abc");
            assert_eq!(device.uuid(), "abc");
            assert_eq!(
                service_type_urn,
                "urn:schemas-upnp-org:service:ContentDirectory:1"
            );
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn identical_alive_twice_is_idempotent() {
    let mut table = RootTable::new();
    let service = alive(
        "uuid:abc::urn:schemas-upnp-org:service:ContentDirectory:1",
        1,
        1,
    );
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());
    apply(&mut table, &service, t0());
    let before = table.get("abc").cloned();

    let r = apply(&mut table, &service, t0());
    assert_eq!(r.outcome, Outcome::Applied);
    assert!(r.events.is_empty());
    assert_eq!(table.get("abc").cloned(), before);
}

#[test]
fn higher_boot_id_fires_reboot_first_and_is_applied() {
    let mut table = RootTable::new();
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());

    let device = "uuid:abc::urn:schemas-upnp-org:device:MediaServer:1";
    let later = t0() + Duration::seconds(30);
    let r = apply(&mut table, &alive(device, 2, 1), later);

    assert_eq!(r.outcome, Outcome::Applied);
    assert_eq!(kinds(&r), vec!["device-rebooted"]);
    assert!(matches!(
        r.events[0],
        DiscoveryEvent::DeviceRebooted {
            configuration_changed: false,
            ..
        }
    ));

    let root = table.get("abc").unwrap();
    assert_eq!(root.boot_id(), 2);
    assert_eq!(root.expiration_time(), later + Duration::seconds(1800));
    assert_eq!(
        root.device("abc").unwrap().device_type_version_urn().as_deref(),
        Some("urn:schemas-upnp-org:device:MediaServer:1")
    );
}

#[test]
fn lower_boot_id_changes_nothing() {
    let mut table = RootTable::new();
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 5, 1), t0());
    let before = table.get("abc").cloned();

    let service = "uuid:abc::urn:schemas-upnp-org:service:ContentDirectory:1";
    let r = apply(
        &mut table,
        &alive(service, 4, 9),
        t0() + Duration::seconds(600),
    );

    assert_eq!(r.outcome, Outcome::StaleDropped);
    assert!(r.events.is_empty());
    assert_eq!(table.get("abc").cloned(), before);
}

#[test]
fn byebye_removes_whole_root_and_later_alive_recreates_it() {
    let mut table = RootTable::new();
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());
    apply(
        &mut table,
        &alive("uuid:abc::urn:schemas-upnp-org:service:ContentDirectory:1", 1, 1),
        t0(),
    );

    let r = apply(
        &mut table,
        &byebye("uuid:abc::urn:schemas-upnp-org:service:ContentDirectory:1"),
        t0(),
    );
    assert_eq!(kinds(&r), vec!["root-device-removed"]);
    assert!(table.is_empty());

    let r = apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());
    assert_eq!(kinds(&r), vec!["root-device-added", "device-added"]);
    assert!(table.get("abc").unwrap().device("abc").unwrap().services().is_empty());
}

#[test]
fn expired_root_is_removed_exactly_once() {
    let mut table = RootTable::new();
    apply(&mut table, &alive("uuid:abc::upnp:rootdevice", 1, 1), t0());

    assert!(table.expire(t0() + Duration::seconds(1799)).is_empty());

    let events = table.expire(t0() + Duration::seconds(1801));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "root-device-removed");
    assert!(table.expire(t0() + Duration::seconds(3600)).is_empty());
}

#[test]
fn search_response_is_treated_as_alive() {
    let mut table = RootTable::new();
    let response = b"HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=100\r\n\
        EXT:\r\n\
        LOCATION: http://192.168.1.30/desc.xml\r\n\
        SERVER: Linux/5.10, UPnP/1.0, Renderer/2.1\r\n\
        ST: upnp:rootdevice\r\n\
        USN: uuid:xyz::upnp:rootdevice\r\n\r\n";

    let r = apply(&mut table, response, t0());
    assert_eq!(kinds(&r), vec!["root-device-added", "device-added"]);
    let root = table.get("xyz").unwrap();
    assert_eq!(root.product_version(), "Renderer/2.1");
    assert_eq!(root.expiration_time(), t0() + Duration::seconds(100));
}

#[test]
fn malformed_and_invalid_datagrams_are_dropped() {
    let mut table = RootTable::new();
    assert!(parse_message(b"\x00\x01garbage").is_err());

    let no_server = b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\
        CACHE-CONTROL: max-age=10\r\nUSN: uuid:abc::upnp:rootdevice\r\n\r\n";
    let r = apply(&mut table, no_server, t0());
    assert_eq!(r.outcome, Outcome::InvalidDropped);

    let bare_usn = alive("uuid:abc", 1, 1);
    let r = apply(&mut table, &bare_usn, t0());
    assert_eq!(r.outcome, Outcome::InvalidDropped);
    assert!(table.is_empty());
}

#[test]
fn msearch_round_trip_keeps_search_target() {
    let raw = msearch_request(
        "239.255.255.250:1900",
        "upnp:rootdevice",
        Some(3),
        "Linux/6.1 UPnP/1.1 PMOMusic/0.1.0",
    );
    let request = parse_request(&raw).unwrap();
    assert_eq!(request.method, SsdpMethod::MSearch);
    assert_eq!(request.header("ST"), Some("upnp:rootdevice"));
    assert_eq!(request.header("MX"), Some("3"));
}
