//! # pmossdp - Control point SSDP pour PMOMusic
//!
//! Cette crate découvre les devices UPnP présents sur le réseau local et
//! tient à jour un annuaire de leurs root devices, devices embarqués et
//! services à partir des annonces SSDP (HTTP sur UDP multicast et unicast).
//!
//! ## Fonctionnalités
//!
//! - Décodage et encodage des messages `NOTIFY`, `M-SEARCH`, `UPDATE` et des
//!   réponses ([`codec`])
//! - Validation protocolaire des annonces ([`advertisement`])
//! - Réconciliation des annonces dans une table de [`RootEntry`], avec
//!   détection des redémarrages (BOOTID) et changements de configuration
//!   (CONFIGID) ([`reconcile`])
//! - Expiration périodique des entrées dont le `max-age` est dépassé
//! - Recherches actives multicast ou unicast
//! - Publication des changements de topologie sur des canaux
//!   `crossbeam-channel` ([`SsdpEventBus`])
//!
//! ## Exemple
//!
//! ```no_run
//! use pmossdp::{DiscoveryEvent, SsdpClientController};
//!
//! let controller = SsdpClientController::new();
//! let events = controller.subscribe();
//! controller.start()?;
//! controller.search_root_devices(None);
//!
//! while let Ok(event) = events.recv() {
//!     println!("{}: {}", event.kind(), event.root().root_device_id());
//! }
//! # Ok::<(), pmossdp::SsdpError>(())
//! ```

use std::net::{Ipv4Addr, Ipv6Addr};

pub mod advertisement;
pub mod codec;
pub mod config_ext;
pub mod controller;
pub mod endpoint;
pub mod entries;
pub mod errors;
pub mod events;
pub mod reconcile;

pub use advertisement::{
    Advertisement, AliveNotice, ByeByeNotice, MessageType, ServerInfo, UpdateNotice, UpnpVersion,
    Usn,
};
pub use codec::{
    HttpVersion, SsdpHeaders, SsdpMessage, SsdpMethod, SsdpRequest, SsdpResponse, encode_request,
    msearch_request, parse_message, parse_request, parse_response,
};
pub use config_ext::{SsdpClientConfig, SsdpConfigExt};
pub use controller::{ControllerState, SsdpClientController};
pub use endpoint::{Endpoint, SsdpSocket, multicast_group_for};
pub use entries::{DeviceEntry, RootEntry};
pub use errors::{CodecError, SsdpError};
pub use events::{DiscoveryEvent, SsdpEventBus};
pub use reconcile::{Outcome, Reconciliation, RootTable};

/// Port SSDP
pub const SSDP_PORT: u16 = 1900;

/// Groupe multicast SSDP IPv4
pub const SSDP_MULTICAST_ADDR_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Groupes multicast SSDP IPv6 (FF0x::C)
pub const SSDP_MULTICAST_ADDR_V6_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
pub const SSDP_MULTICAST_ADDR_V6_SITE_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);
pub const SSDP_MULTICAST_ADDR_V6_GLOBAL: Ipv6Addr = Ipv6Addr::new(0xff0e, 0, 0, 0, 0, 0, 0, 0xc);
