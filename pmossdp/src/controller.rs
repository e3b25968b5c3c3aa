//! Control point SSDP : découverte, suivi et expiration des root devices.
//!
//! Le contrôleur possède les endpoints, la table des [`RootEntry`] et les
//! threads de travail :
//!
//! * un thread de réception par socket lié (multicast et unicast de chaque
//!   endpoint), en lecture bloquante avec délai pour observer l'arrêt ;
//! * un thread de balayage qui retire les entrées expirées.
//!
//! Toute lecture ou écriture de la table se fait sous un verrou unique ; les
//! événements sont publiés après l'avoir relâché, un abonné peut donc
//! rappeler le contrôleur (lancer une recherche par exemple) sans blocage.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use pmoconfig::{Config, get_config};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::advertisement::Advertisement;
use crate::codec::msearch_request;
use crate::config_ext::SsdpClientConfig;
use crate::endpoint::{Endpoint, SsdpSocket};
use crate::entries::RootEntry;
use crate::errors::{Result, SsdpError};
use crate::events::{DiscoveryEvent, SsdpEventBus};
use crate::reconcile::{Outcome, RootTable};

/// Cibles de recherche SSDP
pub const ST_ALL: &str = "ssdp:all";
pub const ST_ROOT_DEVICE: &str = "upnp:rootdevice";

/// États du contrôleur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Données partagées protégées par le verrou du contrôleur
struct ControllerData {
    state: ControllerState,
    endpoints: Vec<Endpoint>,
    roots: RootTable,
}

struct Shared {
    data: Mutex<ControllerData>,
    events: SsdpEventBus,
    config: SsdpClientConfig,
    user_agent: String,
    receiving: AtomicBool,
}

#[derive(Default)]
struct Workers {
    receivers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    stop_sweeper: Option<Sender<()>>,
}

/// Control point SSDP.
///
/// # Exemple
///
/// ```no_run
/// use pmossdp::{DiscoveryEvent, SsdpClientController};
///
/// let controller = SsdpClientController::new();
/// let events = controller.subscribe();
/// controller.start()?;
///
/// for event in events.iter() {
///     if let DiscoveryEvent::RootDeviceAdded { root } = event {
///         println!("{} at {}", root.root_device_id(), root.description_location());
///     }
/// }
/// # Ok::<(), pmossdp::SsdpError>(())
/// ```
pub struct SsdpClientController {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

impl SsdpClientController {
    /// Contrôleur configuré depuis la configuration globale PMOMusic.
    ///
    /// Une section `ssdp` invalide est signalée puis remplacée par les
    /// valeurs par défaut.
    pub fn new() -> Self {
        match Self::from_config(&get_config()) {
            Ok(controller) => controller,
            Err(e) => {
                warn!("❌ {}, using defaults", e);
                Self::with_config(SsdpClientConfig::default())
            }
        }
    }

    /// Contrôleur configuré depuis la section `ssdp` de `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let config = SsdpClientConfig::from_config(config)
            .map_err(|e| SsdpError::Config(format!("invalid SSDP configuration: {:#}", e)))?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: SsdpClientConfig) -> Self {
        let user_agent = config.user_agent();
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(ControllerData {
                    state: ControllerState::Stopped,
                    endpoints: Vec::new(),
                    roots: RootTable::new(),
                }),
                events: SsdpEventBus::new(),
                config,
                user_agent,
                receiving: AtomicBool::new(false),
            }),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn config(&self) -> &SsdpClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ControllerState {
        self.shared.data.lock().state
    }

    pub fn subscribe(&self) -> Receiver<DiscoveryEvent> {
        self.shared.events.subscribe()
    }

    /// Démarre le contrôleur sur toutes les interfaces utilisables.
    ///
    /// Une interface qui ne peut pas être liée est ignorée ; le contrôleur
    /// démarre même sans aucun endpoint.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        self.begin_start()?;

        let config = &self.shared.config;
        let addresses = pmoutils::list_upnp_addresses(
            config.use_ipv4,
            config.use_ipv6,
            &config.address_filters,
        );
        let mut endpoints = Vec::with_capacity(addresses.len());
        for address in addresses {
            match Endpoint::bind(address, config.site_local_operation) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(e) => warn!("❌ Cannot bind SSDP endpoint on {}, skipped: {}", address, e),
            }
        }

        self.finish_start(&mut workers, endpoints)
    }

    /// Démarre le contrôleur sur des endpoints fournis par l'appelant
    pub fn start_with_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let mut workers = self.workers.lock();
        self.begin_start()?;
        self.finish_start(&mut workers, endpoints)
    }

    fn begin_start(&self) -> Result<()> {
        let mut data = self.shared.data.lock();
        if data.state != ControllerState::Stopped {
            return Err(SsdpError::AlreadyActive);
        }
        data.state = ControllerState::Starting;
        Ok(())
    }

    fn finish_start(&self, workers: &mut Workers, endpoints: Vec<Endpoint>) -> Result<()> {
        if let Err(e) = self.spawn_workers(workers, endpoints) {
            error!("❌ Failed to start SSDP control point: {}", e);
            self.shutdown(workers);
            return Err(e.into());
        }

        let count = self.shared.data.lock().endpoints.len();
        info!("✅ SSDP control point started on {} endpoint(s)", count);

        self.search_all(None);
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Workers, endpoints: Vec<Endpoint>) -> io::Result<()> {
        self.shared.receiving.store(true, Ordering::SeqCst);
        {
            let mut data = self.shared.data.lock();
            data.endpoints = endpoints.clone();
            data.state = ControllerState::Running;
        }

        let poll = Some(self.shared.config.receive_poll);
        for endpoint in &endpoints {
            let sockets = endpoint
                .multicast_socket()
                .map(|s| ("multicast", s))
                .into_iter()
                .chain(std::iter::once(("unicast", endpoint.unicast_socket())));
            for (kind, socket) in sockets {
                if let Err(e) = socket.set_read_timeout(poll) {
                    warn!(
                        "❌ Cannot set read timeout on {} socket of {}, not listening: {}",
                        kind,
                        endpoint.address(),
                        e
                    );
                    continue;
                }
                let shared = Arc::clone(&self.shared);
                let socket = Arc::clone(socket);
                let local = endpoint.address();
                let handle = thread::Builder::new()
                    .name(format!("ssdp-{}-{}", kind, local))
                    .spawn(move || receive_loop(shared, socket, local, kind))?;
                workers.receivers.push(handle);
            }
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("ssdp-expiration".to_string())
            .spawn(move || expiration_loop(shared, stop_rx))?;
        workers.sweeper = Some(handle);
        workers.stop_sweeper = Some(stop_tx);
        Ok(())
    }

    /// Arrête le contrôleur ; sans effet s'il est déjà arrêté.
    ///
    /// Les endpoints et la table des root devices sont vidés.
    pub fn close(&self) {
        let mut workers = self.workers.lock();
        {
            let mut data = self.shared.data.lock();
            if data.state == ControllerState::Stopped {
                return;
            }
            data.state = ControllerState::Stopping;
        }
        self.shutdown(&mut workers);
        info!("✅ SSDP control point stopped");
    }

    fn shutdown(&self, workers: &mut Workers) {
        self.shared.receiving.store(false, Ordering::SeqCst);
        workers.stop_sweeper.take();
        if let Some(handle) = workers.sweeper.take() {
            if handle.join().is_err() {
                warn!("❌ SSDP expiration thread panicked");
            }
        }
        for handle in workers.receivers.drain(..) {
            if handle.join().is_err() {
                warn!("❌ SSDP receive thread panicked");
            }
        }

        let mut data = self.shared.data.lock();
        data.endpoints.clear();
        data.roots.clear();
        data.state = ControllerState::Stopped;
    }

    /// Instantanés des root devices annoncés.
    ///
    /// Les entrées provisoires, ouvertes par un device embarqué ou un service
    /// avant tout `upnp:rootdevice`, n'y figurent pas.
    pub fn root_entries(&self) -> Vec<RootEntry> {
        self.shared.data.lock().roots.announced_roots().cloned().collect()
    }

    pub fn root_entry(&self, root_device_id: &str) -> Option<RootEntry> {
        self.shared
            .data
            .lock()
            .roots
            .get(root_device_id)
            .filter(|root| root.is_root_announced())
            .cloned()
    }

    pub fn endpoint_addresses(&self) -> Vec<IpAddr> {
        self.shared
            .data
            .lock()
            .endpoints
            .iter()
            .map(Endpoint::address)
            .collect()
    }

    /// Attache une donnée à une entrée ; retourne `false` si le root est inconnu
    pub fn set_client_property(&self, root_device_id: &str, key: &str, value: Value) -> bool {
        let mut data = self.shared.data.lock();
        match data.roots.get_mut(root_device_id) {
            Some(root) => {
                root.client_properties.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn client_property(&self, root_device_id: &str, key: &str) -> Option<Value> {
        self.shared
            .data
            .lock()
            .roots
            .get(root_device_id)
            .and_then(|root| root.client_property(key).cloned())
    }

    /// `ST: ssdp:all`
    ///
    /// Sans `target`, la recherche part en multicast de chaque endpoint ;
    /// sinon elle est envoyée en unicast à `target`. Retourne le nombre
    /// d'endpoints d'où la requête est partie.
    pub fn search_all(&self, target: Option<SocketAddr>) -> usize {
        self.search(ST_ALL, target)
    }

    /// `ST: upnp:rootdevice`
    pub fn search_root_devices(&self, target: Option<SocketAddr>) -> usize {
        self.search(ST_ROOT_DEVICE, target)
    }

    /// `ST: uuid:<uuid>`
    pub fn search_device_by_uuid(&self, uuid: &str, target: Option<SocketAddr>) -> usize {
        self.search(&format!("uuid:{}", uuid), target)
    }

    /// `ST: urn:<type>:<version>`, par exemple
    /// `schemas-upnp-org:device:MediaServer` et `1`
    pub fn search_device_by_device_type_version(
        &self,
        device_type: &str,
        version: u32,
        target: Option<SocketAddr>,
    ) -> usize {
        self.search(&format!("urn:{}:{}", device_type, version), target)
    }

    fn search(&self, st: &str, target: Option<SocketAddr>) -> usize {
        let endpoints = self.shared.data.lock().endpoints.clone();
        match target {
            None => self.multicast_search(&endpoints, st),
            Some(target) => self.unicast_search(&endpoints, st, target),
        }
    }

    fn multicast_search(&self, endpoints: &[Endpoint], st: &str) -> usize {
        let config = &self.shared.config;
        let mut sent_from = 0;
        for endpoint in endpoints {
            let group = endpoint.multicast_target();
            let request = msearch_request(
                &group.to_string(),
                st,
                Some(config.search_mx),
                &self.shared.user_agent,
            );
            let mut sent = false;
            for _ in 0..config.multicast_repeat {
                match endpoint.send_to(&request, group) {
                    Ok(_) => sent = true,
                    Err(e) => {
                        warn!(
                            "❌ Failed to send M-SEARCH from {}: {}",
                            endpoint.address(),
                            e
                        );
                        break;
                    }
                }
            }
            if sent {
                sent_from += 1;
            }
        }
        info!(
            "📤 M-SEARCH sent (ST={}, MX={}) from {} endpoint(s)",
            st, config.search_mx, sent_from
        );
        sent_from
    }

    fn unicast_search(&self, endpoints: &[Endpoint], st: &str, target: SocketAddr) -> usize {
        let Some(endpoint) = endpoints
            .iter()
            .find(|e| e.is_ipv4() == target.is_ipv4())
        else {
            warn!("❌ No SSDP endpoint can reach {}", target);
            return 0;
        };
        let request = msearch_request(&target.to_string(), st, None, &self.shared.user_agent);
        match endpoint.send_to(&request, target) {
            Ok(_) => {
                info!("📤 M-SEARCH sent (ST={}) to {}", st, target);
                1
            }
            Err(e) => {
                warn!("❌ Failed to send M-SEARCH to {}: {}", target, e);
                0
            }
        }
    }
}

impl Default for SsdpClientController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SsdpClientController {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr, local: IpAddr) {
        let advertisement = match Advertisement::from_datagram(datagram, Utc::now()) {
            Ok(advertisement) => advertisement,
            Err(SsdpError::Codec(e)) => {
                trace!("Malformed SSDP datagram from {}: {}", from, e);
                return;
            }
            Err(e) => {
                trace!("SSDP message from {} ignored: {}", from, e);
                return;
            }
        };

        let reconciliation = {
            let mut data = self.data.lock();
            if data.state != ControllerState::Running {
                return;
            }
            data.roots.apply(&advertisement, local)
        };

        match reconciliation.outcome {
            Outcome::Applied => {
                for event in &reconciliation.events {
                    debug!(
                        "📥 SSDP {} for {} (from {})",
                        event.kind(),
                        event.root().root_device_id(),
                        from
                    );
                }
            }
            Outcome::StaleDropped => debug!("Stale SSDP message from {} dropped", from),
            Outcome::InvalidDropped => trace!("Invalid SSDP message from {} dropped", from),
        }
        self.events.broadcast_all(reconciliation.events);
    }

    fn sweep(&self) {
        let Some(mut data) = self.data.try_lock_for(self.config.lock_timeout) else {
            error!(
                "❌ SSDP expiration sweep skipped: controller lock not acquired within {:?}",
                self.config.lock_timeout
            );
            return;
        };
        let events = data.roots.expire(Utc::now());
        drop(data);

        for event in &events {
            info!("⌛ SSDP root {} expired", event.root().root_device_id());
        }
        self.events.broadcast_all(events);
    }
}

fn receive_loop(shared: Arc<Shared>, socket: Arc<dyn SsdpSocket>, local: IpAddr, kind: &str) {
    let mut buf = vec![0u8; shared.config.receive_buffer_size];
    debug!("SSDP {} receive loop started on {}", kind, local);

    while shared.receiving.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => shared.handle_datagram(&buf[..n], from, local),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                continue;
            }
            Err(e) => {
                if shared.receiving.load(Ordering::SeqCst) {
                    warn!(
                        "❌ SSDP {} receive error on {}, listener stopped: {}",
                        kind, local, e
                    );
                }
                break;
            }
        }
    }

    debug!("SSDP {} receive loop on {} stopped", kind, local);
}

fn expiration_loop(shared: Arc<Shared>, stop: Receiver<()>) {
    let interval = shared.config.expiration_interval;
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => shared.sweep(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("SSDP expiration loop stopped");
}
