//! Événements de découverte SSDP et bus de diffusion vers les abonnés.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::entries::{DeviceEntry, RootEntry};

/// Changements de topologie publiés par le contrôleur.
///
/// Les entrées transportées sont des instantanés pris sous le verrou du
/// contrôleur, juste après la mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    RootDeviceAdded {
        root: RootEntry,
    },
    DeviceAdded {
        root: RootEntry,
        device: DeviceEntry,
    },
    ServiceAdded {
        root: RootEntry,
        device: DeviceEntry,
        service_type_urn: String,
    },
    RootDeviceRemoved {
        root: RootEntry,
    },
    DeviceRebooted {
        root: RootEntry,
        configuration_changed: bool,
    },
    DeviceConfigurationChanged {
        root: RootEntry,
    },
}

impl DiscoveryEvent {
    pub fn root(&self) -> &RootEntry {
        match self {
            DiscoveryEvent::RootDeviceAdded { root }
            | DiscoveryEvent::DeviceAdded { root, .. }
            | DiscoveryEvent::ServiceAdded { root, .. }
            | DiscoveryEvent::RootDeviceRemoved { root }
            | DiscoveryEvent::DeviceRebooted { root, .. }
            | DiscoveryEvent::DeviceConfigurationChanged { root } => root,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryEvent::RootDeviceAdded { .. } => "root-device-added",
            DiscoveryEvent::DeviceAdded { .. } => "device-added",
            DiscoveryEvent::ServiceAdded { .. } => "service-added",
            DiscoveryEvent::RootDeviceRemoved { .. } => "root-device-removed",
            DiscoveryEvent::DeviceRebooted { .. } => "device-rebooted",
            DiscoveryEvent::DeviceConfigurationChanged { .. } => "device-configuration-changed",
        }
    }
}

/// Diffusion des [`DiscoveryEvent`] vers tous les abonnés.
///
/// Chaque abonné a son propre canal ; un abonné dont le `Receiver` a été
/// lâché est retiré au prochain envoi.
#[derive(Clone, Default)]
pub struct SsdpEventBus {
    subscribers: Arc<Mutex<Vec<Sender<DiscoveryEvent>>>>,
}

impl SsdpEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<DiscoveryEvent> {
        let (tx, rx) = unbounded::<DiscoveryEvent>();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn broadcast(&self, event: DiscoveryEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Diffuse une suite d'événements d'un seul tenant : aucun autre lot ne
    /// peut s'intercaler.
    pub fn broadcast_all(&self, events: Vec<DiscoveryEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn removed(id: &str) -> DiscoveryEvent {
        DiscoveryEvent::RootDeviceRemoved {
            root: RootEntry::new(id, Utc::now()),
        }
    }

    #[test]
    fn test_every_subscriber_gets_every_event_in_order() {
        let bus = SsdpEventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.broadcast_all(vec![removed("a"), removed("b")]);

        for rx in [rx1, rx2] {
            let ids: Vec<String> = rx
                .try_iter()
                .map(|e| e.root().root_device_id().to_string())
                .collect();
            assert_eq!(ids, vec!["a", "b"]);
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = SsdpEventBus::new();
        let rx = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.broadcast(removed("a"));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(rx.try_recv().unwrap().kind(), "root-device-removed");
    }
}
