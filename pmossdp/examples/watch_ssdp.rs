use std::thread;
use std::time::Duration;

use pmoconfig::get_config;
use pmossdp::{DiscoveryEvent, SsdpClientController};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), pmossdp::SsdpError> {
    // RUST_LOG prime sur host.logger.min_level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = get_config()
            .get_log_min_level()
            .unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level.to_lowercase())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Starting SSDP control point watcher...");

    let controller = SsdpClientController::new();
    let events = controller.subscribe();
    controller.start()?;

    // Quelques recherches ciblées pour accélérer les réponses.
    for (device_type, version) in [
        ("schemas-upnp-org:device:MediaRenderer", 1),
        ("av-openhome-org:device:MediaRenderer", 1),
        ("schemas-upnp-org:device:MediaServer", 1),
    ] {
        controller.search_device_by_device_type_version(device_type, version, None);
        thread::sleep(Duration::from_millis(200));
    }

    println!(
        "Listening for SSDP events on {:?}. Press Ctrl+C to stop.",
        controller.endpoint_addresses()
    );

    for event in events.iter() {
        match event {
            DiscoveryEvent::RootDeviceAdded { root } => println!(
                "[ROOT+] {} location={} server={} {} {} expires={}",
                root.root_device_id(),
                root.description_location(),
                root.os_version(),
                root.upnp_version(),
                root.product_version(),
                root.expiration_time()
            ),
            DiscoveryEvent::DeviceAdded { root, device } => println!(
                "[DEVICE+] {} in {} type={}",
                device.uuid(),
                root.root_device_id(),
                device.device_type_version_urn().unwrap_or_default()
            ),
            DiscoveryEvent::ServiceAdded {
                root,
                device,
                service_type_urn,
            } => println!(
                "[SERVICE+] {} on {} ({})",
                service_type_urn,
                device.uuid(),
                root.root_device_id()
            ),
            DiscoveryEvent::RootDeviceRemoved { root } => {
                println!("[ROOT-] {}", root.root_device_id())
            }
            DiscoveryEvent::DeviceRebooted {
                root,
                configuration_changed,
            } => println!(
                "[REBOOT] {} bootid={} config_changed={}",
                root.root_device_id(),
                root.boot_id(),
                configuration_changed
            ),
            DiscoveryEvent::DeviceConfigurationChanged { root } => println!(
                "[CONFIG] {} configid={}",
                root.root_device_id(),
                root.config_id()
            ),
        }
    }

    Ok(())
}
