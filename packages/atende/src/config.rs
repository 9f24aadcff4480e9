use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use atende_realtime::{ChannelConfig, DuplicatePolicy, ReconnectPolicy};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [channel]
//                    host = "wss://chat.example.com"
//
//   env var:         ATENDE_CHANNEL__HOST=wss://chat.example.com
//
//   (single underscore stays within field names: ATENDE_RECONNECT__MAX_DELAY_MS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
}

/// Connection settings (lives under `[channel]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Bearer token for the upgrade request.
    #[serde(default)]
    pub token: Option<String>,
    /// 0 disables client pings.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_true")]
    pub synthesize_disconnect: bool,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            namespace: default_namespace(),
            token: None,
            ping_interval_secs: default_ping_interval_secs(),
            outbound_capacity: default_outbound_capacity(),
            synthesize_disconnect: true,
        }
    }
}

/// Reconnect backoff (lives under `[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Uptime after which a connection no longer counts as a failed attempt.
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: None,
            jitter_factor: default_jitter_factor(),
            stable_after_ms: default_stable_after_ms(),
        }
    }
}

/// Store tunables (lives under `[store]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreFileConfig {
    /// Drop a message whose id is already in its conversation.
    #[serde(default)]
    pub dedupe_messages: bool,
}

fn default_host() -> String {
    "ws://localhost:3001".to_string()
}
fn default_namespace() -> String {
    "whatsapp".to_string()
}
fn default_ping_interval_secs() -> u64 {
    25
}
fn default_outbound_capacity() -> usize {
    64
}
fn default_true() -> bool {
    true
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_factor() -> f64 {
    0.2
}
fn default_stable_after_ms() -> u64 {
    5000
}

/// Build a figment that layers: defaults → config.toml → ATENDE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `ATENDE_CHANNEL__TOKEN=abc`  →  `channel.token = "abc"`
///   `ATENDE_RECONNECT__MAX_RETRIES=5`  →  `reconnect.max_retries = 5`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("ATENDE_").split("__"))
}

// =============================================================================
// Runtime views (derived from FileConfig)
// =============================================================================

impl ReconnectFileConfig {
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.enabled,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            max_retries: self.max_retries,
            jitter_factor: self.jitter_factor.clamp(0.0, 1.0),
            stable_after: Duration::from_millis(self.stable_after_ms),
        }
    }
}

impl FileConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new(self.channel.host.clone())
            .with_namespace(self.channel.namespace.clone())
            .with_reconnect(self.reconnect.to_policy());
        config.ping_interval = match self.channel.ping_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config.outbound_capacity = self.channel.outbound_capacity.max(1);
        config.synthesize_disconnect = self.channel.synthesize_disconnect;
        config
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        if self.store.dedupe_messages {
            DuplicatePolicy::SkipKnownIds
        } else {
            DuplicatePolicy::Append
        }
    }
}

/// Paths the CLI works from.
#[derive(Clone, Debug)]
pub struct AtendeConfig {
    pub data_dir: PathBuf,
}

impl AtendeConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".atende"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn load(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_channel_file_config_defaults() {
        let d = ChannelFileConfig::default();
        assert_eq!(d.host, "ws://localhost:3001");
        assert_eq!(d.namespace, "whatsapp");
        assert!(d.token.is_none());
        assert_eq!(d.ping_interval_secs, 25);
        assert_eq!(d.outbound_capacity, 64);
        assert!(d.synthesize_disconnect);
    }

    #[test]
    fn test_reconnect_file_config_defaults() {
        let d = ReconnectFileConfig::default();
        assert!(d.enabled);
        assert_eq!(d.base_delay_ms, 1000);
        assert_eq!(d.max_delay_ms, 30_000);
        assert!(d.max_retries.is_none());
        assert_eq!(d.jitter_factor, 0.2);
        assert_eq!(d.stable_after_ms, 5000);
    }

    // ── runtime conversion ──────────────────────────────────────────────

    #[test]
    fn test_channel_config_from_defaults() {
        let fc = FileConfig::default();
        let config = fc.channel_config();
        assert_eq!(
            config.endpoint_url().unwrap(),
            "ws://localhost:3001/whatsapp"
        );
        assert_eq!(config.ping_interval, Some(Duration::from_secs(25)));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(fc.duplicate_policy(), DuplicatePolicy::Append);
    }

    #[test]
    fn test_zero_ping_interval_disables_pings() {
        let mut fc = FileConfig::default();
        fc.channel.ping_interval_secs = 0;
        assert!(fc.channel_config().ping_interval.is_none());
    }

    #[test]
    fn test_policy_cap_never_below_base() {
        let rc = ReconnectFileConfig {
            base_delay_ms: 5000,
            max_delay_ms: 100,
            jitter_factor: 3.0,
            ..Default::default()
        };
        let policy = rc.to_policy();
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.jitter_factor, 1.0);
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.channel.host, "ws://localhost:3001");
        assert!(fc.reconnect.enabled);
        assert!(!fc.store.dedupe_messages);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[channel]\nhost = \"wss://chat.example.com\"\ntoken = \"abc\"\n\n\
             [reconnect]\nmax_retries = 3\n\n[store]\ndedupe_messages = true\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.channel.host, "wss://chat.example.com");
        assert_eq!(fc.channel.namespace, "whatsapp");
        assert_eq!(fc.channel.token.as_deref(), Some("abc"));
        assert_eq!(fc.reconnect.max_retries, Some(3));
        assert_eq!(fc.duplicate_policy(), DuplicatePolicy::SkipKnownIds);
    }

    #[test]
    fn test_load_config_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[channel]\nnamespace = \"from-file\"\nping_interval_secs = 10\n",
            )?;
            jail.set_env("ATENDE_CHANNEL__NAMESPACE", "from-env");
            jail.set_env("ATENDE_RECONNECT__ENABLED", "false");

            let fc: FileConfig = load_config(jail.directory()).extract()?;
            assert_eq!(fc.channel.namespace, "from-env");
            assert_eq!(fc.channel.ping_interval_secs, 10);
            assert!(!fc.reconnect.enabled);
            Ok(())
        });
    }

    // ── AtendeConfig ────────────────────────────────────────────────────

    #[test]
    fn test_atende_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let config = AtendeConfig::new(Some(dir.clone())).unwrap();
        assert_eq!(config.data_dir, dir);
        assert!(dir.exists());
        assert_eq!(config.config_toml_path(), dir.join("config.toml"));
        assert_eq!(config.load().unwrap().channel.host, "ws://localhost:3001");
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[channel]\nhost = 12\n").unwrap();
        let config = AtendeConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        assert!(config.load().is_err());
    }
}
