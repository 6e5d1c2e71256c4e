use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Tunable config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [stream]
//                    poll_interval_secs = 2
//
//   env var:         DERIBIT_CLI_STREAM__POLL_INTERVAL_SECS=2   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub stream: StreamFileConfig,
    #[serde(default)]
    pub request: RequestFileConfig,
    #[serde(default)]
    pub deribit: DeribitFileConfig,
    #[serde(default)]
    pub history: HistoryFileConfig,
}

/// Streaming consumer tunables (lives under `[stream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Request/response tunables (lives under `[request]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestFileConfig {
    /// 0 waits for a response indefinitely
    #[serde(default)]
    pub response_timeout_secs: u64,
}

/// Exchange endpoints (lives under `[deribit]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeribitFileConfig {
    #[serde(default = "default_testnet_url")]
    pub testnet_url: String,
}

impl Default for DeribitFileConfig {
    fn default() -> Self {
        Self {
            testnet_url: default_testnet_url(),
        }
    }
}

/// Line editor history (lives under `[history]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryFileConfig {
    #[serde(default = "default_history_entries")]
    pub max_entries: usize,
}

impl Default for HistoryFileConfig {
    fn default() -> Self {
        Self {
            max_entries: default_history_entries(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_testnet_url() -> String {
    "wss://test.deribit.com/ws/api/v2".to_string()
}

fn default_history_entries() -> usize {
    1000
}

/// Build a figment that layers: defaults → config.toml → DERIBIT_CLI_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `DERIBIT_CLI_STREAM__POLL_INTERVAL_SECS=2`  →  `stream.poll_interval_secs = 2`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("DERIBIT_CLI_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used by the dispatcher)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Wait/poll cadence of the streaming consumer
    pub poll_interval: Duration,
    /// Bound on a simple request's wait (None = wait until answered or closed)
    pub response_timeout: Option<Duration>,
    pub testnet_url: String,
    pub history_size: usize,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            // A zero cadence would spin; one second is the floor.
            poll_interval: Duration::from_secs(fc.stream.poll_interval_secs.max(1)),
            response_timeout: if fc.request.response_timeout_secs == 0 {
                None
            } else {
                Some(Duration::from_secs(fc.request.response_timeout_secs))
            },
            testnet_url: fc.deribit.testnet_url.clone(),
            history_size: fc.history.max_entries,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct CliPaths {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl CliPaths {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".deribit-cli"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self { data_dir, logs_dir })
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("deribit.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.stream.poll_interval_secs, 5);
        assert_eq!(fc.request.response_timeout_secs, 0);
        assert_eq!(fc.deribit.testnet_url, "wss://test.deribit.com/ws/api/v2");
        assert_eq!(fc.history.max_entries, 1000);
    }

    // ── ClientConfig::from_file ─────────────────────────────────────────

    #[test]
    fn test_client_config_from_defaults() {
        let cc = ClientConfig::default();
        assert_eq!(cc.poll_interval, Duration::from_secs(5));
        assert!(cc.response_timeout.is_none());
        assert_eq!(cc.history_size, 1000);
    }

    #[test]
    fn test_client_config_custom_values() {
        let fc = FileConfig {
            stream: StreamFileConfig {
                poll_interval_secs: 2,
            },
            request: RequestFileConfig {
                response_timeout_secs: 30,
            },
            ..Default::default()
        };
        let cc = ClientConfig::from_file(&fc);
        assert_eq!(cc.poll_interval, Duration::from_secs(2));
        assert_eq!(cc.response_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_poll_interval_is_floored() {
        let fc = FileConfig {
            stream: StreamFileConfig {
                poll_interval_secs: 0,
            },
            ..Default::default()
        };
        assert_eq!(
            ClientConfig::from_file(&fc).poll_interval,
            Duration::from_secs(1)
        );
    }

    // ── CliPaths ────────────────────────────────────────────────────────

    #[test]
    fn test_paths_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = CliPaths::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(paths.data_dir, tmp.path());
        assert_eq!(paths.logs_dir, tmp.path().join("logs"));
        assert!(tmp.path().join("logs").exists());
        assert_eq!(paths.history_path(), tmp.path().join("history.txt"));
        assert_eq!(paths.log_path(), tmp.path().join("logs/deribit.log"));
        assert_eq!(paths.config_toml_path(), tmp.path().join("config.toml"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.stream.poll_interval_secs, 5);
        assert_eq!(fc.deribit.testnet_url, "wss://test.deribit.com/ws/api/v2");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[stream]\npoll_interval_secs = 1\n\n[deribit]\ntestnet_url = \"ws://127.0.0.1:9000/ws\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.stream.poll_interval_secs, 1);
        assert_eq!(fc.deribit.testnet_url, "ws://127.0.0.1:9000/ws");
        // Untouched sections keep their defaults
        assert_eq!(fc.history.max_entries, 1000);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[stream]\npoll_interval_secs = \"soon\"\n",
        )
        .unwrap();
        assert!(load_config(tmp.path()).extract::<FileConfig>().is_err());
    }
}
