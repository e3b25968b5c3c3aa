//! Extension pour intégrer la configuration SSDP dans pmoconfig
//!
//! Ce module fournit le trait `SsdpConfigExt` qui ajoute à
//! `pmoconfig::Config` les réglages du control point (section `ssdp:`), et
//! la structure [`SsdpClientConfig`] qui en regroupe les valeurs pour le
//! contrôleur.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use pmoconfig::Config;
use serde_yaml::Value;
use tracing::warn;

const DEFAULT_EXPIRATION_INTERVAL_MS: u64 = 1000;
const DEFAULT_SEARCH_MX: u32 = 3;
const DEFAULT_MULTICAST_REPEAT: u32 = 2;
const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8192;
const DEFAULT_RECEIVE_POLL_MS: u64 = 250;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Produit annoncé dans l'en-tête USER-AGENT des M-SEARCH
pub fn default_user_agent_product() -> String {
    format!("PMOMusic/{}", env!("CARGO_PKG_VERSION"))
}

fn get_u64(config: &Config, key: &str, default: u64) -> u64 {
    match config.get_value(&["ssdp", key]) {
        Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
        Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn get_bool(config: &Config, key: &str, default: bool) -> bool {
    match config.get_value(&["ssdp", key]) {
        Ok(Value::Bool(b)) => b,
        Ok(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Trait d'extension pour ajouter la configuration SSDP à pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmossdp::SsdpConfigExt;
///
/// let config = get_config();
/// let mx = config.get_ssdp_search_mx()?;
/// config.set_ssdp_use_ipv6(true)?;
/// ```
pub trait SsdpConfigExt {
    /// Période du balayage d'expiration (défaut: 1000 ms)
    fn get_ssdp_expiration_interval(&self) -> Result<Duration>;
    fn set_ssdp_expiration_interval(&self, interval: Duration) -> Result<()>;

    /// Valeur MX des M-SEARCH multicast (défaut: 3, minimum 1)
    fn get_ssdp_search_mx(&self) -> Result<u32>;
    fn set_ssdp_search_mx(&self, mx: u32) -> Result<()>;

    /// Nombre d'envois de chaque M-SEARCH multicast (défaut: 2)
    fn get_ssdp_multicast_repeat(&self) -> Result<u32>;
    fn set_ssdp_multicast_repeat(&self, repeat: u32) -> Result<()>;

    /// Taille du tampon de réception de chaque socket (défaut: 8192)
    fn get_ssdp_receive_buffer_size(&self) -> Result<usize>;

    /// Délai de lecture des sockets, borne la latence d'arrêt (défaut: 250 ms)
    fn get_ssdp_receive_poll(&self) -> Result<Duration>;

    /// Délai d'acquisition du verrou par le balayage (défaut: 5000 ms)
    fn get_ssdp_lock_timeout(&self) -> Result<Duration>;

    fn get_ssdp_use_ipv4(&self) -> Result<bool>;
    fn set_ssdp_use_ipv4(&self, enabled: bool) -> Result<()>;

    fn get_ssdp_use_ipv6(&self) -> Result<bool>;
    fn set_ssdp_use_ipv6(&self, enabled: bool) -> Result<()>;

    /// Utiliser FF05::C au lieu de FF0E::C pour les adresses IPv6 non link-local
    fn get_ssdp_site_local_operation(&self) -> Result<bool>;

    /// Adresses locales autorisées ; vide = toutes
    fn get_ssdp_address_filters(&self) -> Result<Vec<IpAddr>>;
    fn set_ssdp_address_filters(&self, filters: &[IpAddr]) -> Result<()>;

    /// Jeton produit de l'USER-AGENT (défaut: `PMOMusic/<version>`)
    fn get_ssdp_user_agent_product(&self) -> Result<String>;
    fn set_ssdp_user_agent_product(&self, product: String) -> Result<()>;
}

impl SsdpConfigExt for Config {
    fn get_ssdp_expiration_interval(&self) -> Result<Duration> {
        let ms = get_u64(self, "expiration_interval_ms", DEFAULT_EXPIRATION_INTERVAL_MS);
        Ok(Duration::from_millis(ms.max(1)))
    }

    fn set_ssdp_expiration_interval(&self, interval: Duration) -> Result<()> {
        let ms = u64::try_from(interval.as_millis())?;
        self.set_value(
            &["ssdp", "expiration_interval_ms"],
            Value::Number(ms.into()),
        )
    }

    fn get_ssdp_search_mx(&self) -> Result<u32> {
        let mx = get_u64(self, "search_mx", u64::from(DEFAULT_SEARCH_MX));
        Ok(u32::try_from(mx).unwrap_or(DEFAULT_SEARCH_MX).max(1))
    }

    fn set_ssdp_search_mx(&self, mx: u32) -> Result<()> {
        self.set_value(&["ssdp", "search_mx"], Value::Number(mx.into()))
    }

    fn get_ssdp_multicast_repeat(&self) -> Result<u32> {
        let repeat = get_u64(self, "multicast_repeat", u64::from(DEFAULT_MULTICAST_REPEAT));
        Ok(u32::try_from(repeat).unwrap_or(DEFAULT_MULTICAST_REPEAT).max(1))
    }

    fn set_ssdp_multicast_repeat(&self, repeat: u32) -> Result<()> {
        self.set_value(&["ssdp", "multicast_repeat"], Value::Number(repeat.into()))
    }

    fn get_ssdp_receive_buffer_size(&self) -> Result<usize> {
        let size = get_u64(
            self,
            "receive_buffer_size",
            DEFAULT_RECEIVE_BUFFER_SIZE as u64,
        );
        Ok(usize::try_from(size)
            .unwrap_or(DEFAULT_RECEIVE_BUFFER_SIZE)
            .max(512))
    }

    fn get_ssdp_receive_poll(&self) -> Result<Duration> {
        let ms = get_u64(self, "receive_poll_ms", DEFAULT_RECEIVE_POLL_MS);
        Ok(Duration::from_millis(ms.max(1)))
    }

    fn get_ssdp_lock_timeout(&self) -> Result<Duration> {
        let ms = get_u64(self, "lock_timeout_ms", DEFAULT_LOCK_TIMEOUT_MS);
        Ok(Duration::from_millis(ms))
    }

    fn get_ssdp_use_ipv4(&self) -> Result<bool> {
        Ok(get_bool(self, "use_ipv4", true))
    }

    fn set_ssdp_use_ipv4(&self, enabled: bool) -> Result<()> {
        self.set_value(&["ssdp", "use_ipv4"], Value::Bool(enabled))
    }

    fn get_ssdp_use_ipv6(&self) -> Result<bool> {
        Ok(get_bool(self, "use_ipv6", false))
    }

    fn set_ssdp_use_ipv6(&self, enabled: bool) -> Result<()> {
        self.set_value(&["ssdp", "use_ipv6"], Value::Bool(enabled))
    }

    fn get_ssdp_site_local_operation(&self) -> Result<bool> {
        Ok(get_bool(self, "site_local_operation", false))
    }

    fn get_ssdp_address_filters(&self) -> Result<Vec<IpAddr>> {
        let filters = match self.get_value(&["ssdp", "address_filters"]) {
            Ok(Value::Sequence(seq)) => seq,
            Ok(Value::Null) | Err(_) => return Ok(Vec::new()),
            Ok(other) => return Err(anyhow!("ssdp.address_filters is not a list: {:?}", other)),
        };

        let mut addresses = Vec::with_capacity(filters.len());
        for item in filters {
            match item {
                Value::String(s) => match s.trim().parse::<IpAddr>() {
                    Ok(ip) => addresses.push(ip),
                    Err(_) => warn!("Ignoring invalid SSDP address filter '{}'", s),
                },
                other => warn!("Ignoring invalid SSDP address filter {:?}", other),
            }
        }
        Ok(addresses)
    }

    fn set_ssdp_address_filters(&self, filters: &[IpAddr]) -> Result<()> {
        let seq = filters
            .iter()
            .map(|ip| Value::String(ip.to_string()))
            .collect();
        self.set_value(&["ssdp", "address_filters"], Value::Sequence(seq))
    }

    fn get_ssdp_user_agent_product(&self) -> Result<String> {
        match self.get_value(&["ssdp", "user_agent_product"]) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Ok(default_user_agent_product()),
        }
    }

    fn set_ssdp_user_agent_product(&self, product: String) -> Result<()> {
        self.set_value(&["ssdp", "user_agent_product"], Value::String(product))
    }
}

/// Réglages du contrôleur SSDP, figés au démarrage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpClientConfig {
    pub expiration_interval: Duration,
    pub search_mx: u32,
    pub multicast_repeat: u32,
    pub receive_buffer_size: usize,
    pub receive_poll: Duration,
    pub lock_timeout: Duration,
    pub use_ipv4: bool,
    pub use_ipv6: bool,
    pub site_local_operation: bool,
    pub address_filters: Vec<IpAddr>,
    pub user_agent_product: String,
}

impl Default for SsdpClientConfig {
    fn default() -> Self {
        Self {
            expiration_interval: Duration::from_millis(DEFAULT_EXPIRATION_INTERVAL_MS),
            search_mx: DEFAULT_SEARCH_MX,
            multicast_repeat: DEFAULT_MULTICAST_REPEAT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            receive_poll: Duration::from_millis(DEFAULT_RECEIVE_POLL_MS),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            use_ipv4: true,
            use_ipv6: false,
            site_local_operation: false,
            address_filters: Vec::new(),
            user_agent_product: default_user_agent_product(),
        }
    }
}

impl SsdpClientConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            expiration_interval: config.get_ssdp_expiration_interval()?,
            search_mx: config.get_ssdp_search_mx()?,
            multicast_repeat: config.get_ssdp_multicast_repeat()?,
            receive_buffer_size: config.get_ssdp_receive_buffer_size()?,
            receive_poll: config.get_ssdp_receive_poll()?,
            lock_timeout: config.get_ssdp_lock_timeout()?,
            use_ipv4: config.get_ssdp_use_ipv4()?,
            use_ipv6: config.get_ssdp_use_ipv6()?,
            site_local_operation: config.get_ssdp_site_local_operation()?,
            address_filters: config.get_ssdp_address_filters()?,
            user_agent_product: config.get_ssdp_user_agent_product()?,
        })
    }

    /// `USER-AGENT: <os>/<version> UPnP/1.1 <produit>`
    pub fn user_agent(&self) -> String {
        format!(
            "{} UPnP/1.1 {}",
            pmoutils::get_os_string(),
            self.user_agent_product
        )
    }
}
