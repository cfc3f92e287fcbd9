//! # Device Configuration
//!
//! Everything the relay node needs at boot lives in a single TOML file. Every section is
//! optional; anything left out falls back to the values the node originally shipped with,
//! so an empty file is a valid (plaintext, public broker) configuration.
//!
//! ```toml
//! [link]
//! ssid = "workshop"
//! passphrase = "..."
//!
//! [broker]
//! uri = "mqtts://example.s1.eu.hivemq.cloud:8883"
//! username = "relay"
//! secret = "..."
//! trust_anchor = { path = "/etc/openrelay/isrg-root-x1.pem" }
//! ```
//!
//! The file itself is the only persistent storage the node uses. [`ensure_default_config`]
//! creates it on first boot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const CONFIG_DIR: &str = ".config/openrelay";
const DEVICE_CONFIG_FILE: &str = "device.toml";

/// Errors raised while loading or validating the device configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config storage at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A configuration value that must never end up in a log line.
#[derive(Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Root of the device configuration file.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub link: LinkConfig,
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub heartbeat: HeartbeatConfig,
    pub actuator: ActuatorConfig,
    pub boot: BootConfig,
    pub backoff: BackoffConfig,
}

/// Which mechanism drives the wireless station link.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkDriverKind {
    /// NetworkManager through the `nmcli` command line tool
    #[default]
    Nmcli,
    /// The operating system already owns the link; association is a no-op
    Host,
}

/// Wireless station settings.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct LinkConfig {
    pub driver: LinkDriverKind,
    /// Network name (SSID)
    pub ssid: String,
    pub passphrase: Secret,
    /// Wireless interface used for association and state polling
    pub interface: String,
    /// How often the interface state is polled for link loss
    pub watch_interval_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            driver: LinkDriverKind::Nmcli,
            ssid: String::new(),
            passphrase: Secret::default(),
            interface: "wlan0".to_string(),
            watch_interval_secs: 5,
        }
    }
}

impl LinkConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}

/// Server certificate used to verify the broker.
///
/// Either embedded PEM text or a path to a PEM file:
/// `trust_anchor = { pem = "-----BEGIN CERTIFICATE-----..." }` or
/// `trust_anchor = { path = "/etc/ssl/broker-ca.pem" }`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum TrustAnchor {
    Inline { pem: String },
    File { path: PathBuf },
}

impl TrustAnchor {
    /// Returns the PEM bytes of the certificate
    pub fn load(&self) -> Result<Vec<u8>, ConfigError> {
        match self {
            TrustAnchor::Inline { pem } => Ok(pem.as_bytes().to_vec()),
            TrustAnchor::File { path } => {
                std::fs::read(path).map_err(|source| ConfigError::Storage {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

/// Broker endpoint, authentication and session sizing.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BrokerConfig {
    /// `mqtt://host[:port]` for plaintext, `mqtts://host[:port]` for TLS
    pub uri: String,
    pub client_id: String,
    pub username: Option<String>,
    pub secret: Option<Secret>,
    pub trust_anchor: Option<TrustAnchor>,
    pub keep_alive_secs: u64,
    /// Capacity of the outgoing request queue of the session task
    pub capacity: usize,
    /// Largest packet accepted or sent, in bytes
    pub max_packet_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "mqtt://broker.hivemq.com".to_string(),
            client_id: "openrelay".to_string(),
            username: None,
            secret: None,
            trust_anchor: None,
            keep_alive_secs: 5,
            capacity: 10,
            max_packet_size: 8192,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct TopicConfig {
    /// Subscribed for `on` / `off` commands
    pub control: String,
    /// Heartbeat destination
    pub status: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            control: "esp32/relay/control".to_string(),
            status: "esp32/heartbeat".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub period_secs: u64,
    pub payload: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_secs: 10,
            payload: "I'm alive!".to_string(),
        }
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Backend driving the relay line.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorBackend {
    #[default]
    Gpio,
    /// In-memory line for hosts without GPIO
    Simulated,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ActuatorConfig {
    pub backend: ActuatorBackend,
    /// BCM pin number of the relay control line
    pub pin: u8,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            backend: ActuatorBackend::Gpio,
            pin: 2,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BootConfig {
    /// Settle time between link bring-up and session bring-up
    pub startup_delay_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 5,
        }
    }
}

impl BootConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// Reconnect pacing for both the link and the session.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    /// Relative spread applied to every delay, between 0.0 and 1.0
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl DeviceConfig {
    /// `~/.config/openrelay/device.toml`
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(DEVICE_CONFIG_FILE);
        path
    }

    /// Parses and validates configuration text. `origin` is only used for error messages.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Storage {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Self::from_toml(&content, path)?;
        info!("Loaded device configuration from {}", path.display());
        debug!(
            "Broker {} as '{}', control topic '{}', status topic '{}'",
            config.broker.uri, config.broker.client_id, config.topics.control, config.topics.status
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.driver == LinkDriverKind::Nmcli && self.link.ssid.is_empty() {
            return Err(ConfigError::Invalid(
                "link.ssid must be set when link.driver is 'nmcli'".to_string(),
            ));
        }
        if self.link.watch_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "link.watch_interval_secs must be greater than zero".to_string(),
            ));
        }

        let uri = Url::parse(&self.broker.uri)
            .map_err(|e| ConfigError::Invalid(format!("broker.uri '{}': {}", self.broker.uri, e)))?;
        if uri.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "broker.uri '{}' has no host",
                self.broker.uri
            )));
        }
        if self.broker.client_id.is_empty() {
            return Err(ConfigError::Invalid("broker.client_id must not be empty".to_string()));
        }
        match (&self.broker.username, &self.broker.secret) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "broker.username and broker.secret must be given together".to_string(),
                ))
            }
            _ => {}
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "broker.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.broker.capacity == 0 {
            return Err(ConfigError::Invalid("broker.capacity must be greater than zero".to_string()));
        }

        if self.topics.control.is_empty() || self.topics.status.is_empty() {
            return Err(ConfigError::Invalid("topics must not be empty".to_string()));
        }
        if self.heartbeat.period_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.period_secs must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::Invalid(
                "backoff.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.initial_ms > self.backoff.max_ms {
            return Err(ConfigError::Invalid(
                "backoff.initial_ms must be non-zero and not exceed backoff.max_ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Creates the config directory and a default config file on first boot.
///
/// Failing here means the node has no usable storage, which is fatal.
pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| ConfigError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
    if exists {
        debug!("Config file {} present", path.display());
        return Ok(());
    }

    info!("Creating default configuration at {}", path.display());
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ConfigError::Storage {
                path: dir.to_path_buf(),
                source,
            })?;
    }

    let content = toml::to_string_pretty(&DeviceConfig::default())?;
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ConfigError::Storage {
            path: path.to_path_buf(),
            source,
        })?;

    warn!(
        "Default configuration written; set link.ssid in {} before the link can come up",
        path.display()
    );
    Ok(())
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<DeviceConfig, ConfigError> {
        DeviceConfig::from_toml(content, Path::new("test.toml"))
    }

    #[test]
    fn defaults_match_shipped_firmware() {
        let config = parse("[link]\nssid = \"TERA\"\n").unwrap();

        assert_eq!(config.broker.uri, "mqtt://broker.hivemq.com");
        assert_eq!(config.topics.control, "esp32/relay/control");
        assert_eq!(config.topics.status, "esp32/heartbeat");
        assert_eq!(config.heartbeat.payload, "I'm alive!");
        assert_eq!(config.heartbeat.period(), Duration::from_secs(10));
        assert_eq!(config.boot.startup_delay(), Duration::from_secs(5));
        assert_eq!(config.actuator.pin, 2);
        assert!(config.broker.trust_anchor.is_none());
    }

    #[test]
    fn parses_tls_broker_with_inline_anchor() {
        let config = parse(
            r#"
            [link]
            ssid = "office"
            passphrase = "12345678"

            [broker]
            uri = "mqtts://example.s1.eu.hivemq.cloud:8883"
            username = "relay"
            secret = "hunter2"
            trust_anchor = { pem = "-----BEGIN CERTIFICATE-----\nMIIF\n-----END CERTIFICATE-----\n" }

            [heartbeat]
            period_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.link.passphrase.expose(), "12345678");
        assert_eq!(config.broker.username.as_deref(), Some("relay"));
        assert_eq!(config.broker.secret.as_ref().map(Secret::expose), Some("hunter2"));
        let anchor = config.broker.trust_anchor.unwrap().load().unwrap();
        assert!(anchor.starts_with(b"-----BEGIN CERTIFICATE-----"));
        assert_eq!(config.heartbeat.period(), Duration::from_secs(5));
    }

    #[test]
    fn trust_anchor_path_form() {
        let config = parse(
            r#"
            [link]
            driver = "host"

            [broker]
            uri = "mqtts://broker.local"
            trust_anchor = { path = "/definitely/missing/ca.pem" }
            "#,
        )
        .unwrap();

        assert_eq!(config.link.driver, LinkDriverKind::Host);
        let anchor = config.broker.trust_anchor.unwrap();
        assert!(matches!(anchor, TrustAnchor::File { .. }));
        assert!(matches!(anchor.load(), Err(ConfigError::Storage { .. })));
    }

    #[test]
    fn rejects_half_credentials() {
        let err = parse("[link]\ndriver = \"host\"\n[broker]\nusername = \"relay\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_ssid_for_nmcli() {
        assert!(matches!(parse(""), Err(ConfigError::Invalid(_))));
        assert!(parse("[link]\ndriver = \"host\"\n").is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let base = "[link]\ndriver = \"host\"\n";
        for extra in [
            "[heartbeat]\nperiod_secs = 0\n",
            "[backoff]\njitter = 1.5\n",
            "[backoff]\ninitial_ms = 5000\nmax_ms = 100\n",
            "[broker]\nuri = \"not a uri\"\n",
            "[broker]\nkeep_alive_secs = 1\n",
            "[topics]\ncontrol = \"\"\n",
        ] {
            let content = format!("{}{}", base, extra);
            assert!(
                matches!(parse(&content), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                extra
            );
        }
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let config = parse("[link]\nssid = \"office\"\npassphrase = \"topsecret\"\n").unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("topsecret"));
    }

    #[tokio::test]
    async fn ensure_default_config_writes_loadable_file() {
        let dir = std::env::temp_dir().join(format!("openrelay-config-{}", std::process::id()));
        let path = dir.join(DEVICE_CONFIG_FILE);
        let _ = tokio::fs::remove_dir_all(&dir).await;

        ensure_default_config(&path).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let written: DeviceConfig = toml::from_str(&content).unwrap();
        assert_eq!(written.topics.control, "esp32/relay/control");

        // second call leaves the file alone
        tokio::fs::write(&path, "[link]\ndriver = \"host\"\n").await.unwrap();
        ensure_default_config(&path).await.unwrap();
        let config = DeviceConfig::load(&path).await.unwrap();
        assert_eq!(config.link.driver, LinkDriverKind::Host);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
