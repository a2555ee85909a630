use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize};

/// Byte string identifying protocol payloads inside an OP_RETURN output.
/// Part of the wire contract, never to be changed.
pub const PREFIX: &[u8] = b"CNTR";

/// Number of base units per whole coin. RPC amounts arrive as decimal BTC
/// and are converted to integer base units with this.
pub const UNIT: u64 = 100_000_000;

/// Version of the ledger database format. Bumped on hard forks of the
/// parsing rules; a mismatching database file on disk is discarded.
pub const DB_VERSION: u64 = 1;

/// Default interval between two polls of the chain tip once caught up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// A balance granted at database initialisation, before any block is
/// parsed. Used to bootstrap the reserved assets on a new deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BootstrapBalance {
    pub address: String,
    pub asset_id: i64,
    pub amount: i64,
}

/// RPC authentication options for talking to the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BitcoindRpcAuth {
    CookieFile { cookie_path: PathBuf },
    UserPass { auth: String },
}

/// Everything we need to know to talk to the node through its RPC
/// interface.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BitcoindConfig {
    /// The IP address and port bitcoind's RPC server listens on.
    pub addr: SocketAddr,
    #[serde(flatten)]
    pub rpc_auth: BitcoindRpcAuth,
}

fn deserialize_loglevel<'de, D>(deserializer: D) -> Result<log::LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let level_str = String::deserialize(deserializer)?;
    log::LevelFilter::from_str(&level_str).map_err(de::Error::custom)
}

fn default_loglevel() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn deserialize_poll_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Static configuration of the daemon, from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Everything about talking to the node.
    pub bitcoind_config: BitcoindConfig,
    /// Directory holding the ledger database. Defaults to
    /// `~/.local/share/tallyd` (or OS equivalent).
    pub data_dir: Option<PathBuf>,
    /// What messages to log.
    #[serde(
        deserialize_with = "deserialize_loglevel",
        default = "default_loglevel"
    )]
    pub log_level: log::LevelFilter,
    /// Earliest block height carrying protocol transactions. Rows below
    /// this are purged at initialisation and tailing starts here on a
    /// fresh database.
    #[serde(default)]
    pub block_first: u64,
    /// Seconds between two polls of the chain tip once caught up.
    #[serde(
        deserialize_with = "deserialize_poll_interval",
        default = "default_poll_interval"
    )]
    pub poll_interval_secs: Duration,
    /// Balances granted at initialisation, before any block is parsed.
    #[serde(default)]
    pub bootstrap_balances: Vec<BootstrapBalance>,
}

#[derive(Debug)]
pub enum ConfigError {
    FileNotFound,
    ReadingFile(String),
    DatadirNotFound,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FileNotFound => write!(f, "Configuration file not found."),
            Self::ReadingFile(e) => write!(f, "Error reading configuration file: {}", e),
            Self::DatadirNotFound => write!(f, "Could not locate a default data directory."),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Get the absolute path to the tallyd configuration folder.
///
/// It's a "tallyd" directory in the XDG standard configuration directory for
/// all OSes but Linux-based ones, for which it's `~/.tallyd`.
pub fn config_folder_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    let configs_dir = dirs::home_dir();
    #[cfg(not(target_os = "linux"))]
    let configs_dir = dirs::config_dir();

    #[cfg(target_os = "linux")]
    let folder_name = ".tallyd";
    #[cfg(not(target_os = "linux"))]
    let folder_name = "Tallyd";

    configs_dir.map(|mut path| {
        path.push(folder_name);
        path
    })
}

fn config_file_path() -> Option<PathBuf> {
    config_folder_path().map(|mut path| {
        path.push("tallyd.toml");
        path
    })
}

impl Config {
    /// Get the configuration from a file, defaulting to the standard
    /// location if no path is given.
    pub fn from_file(path: Option<PathBuf>) -> Result<Config, ConfigError> {
        let config_file = path
            .or_else(config_file_path)
            .ok_or(ConfigError::DatadirNotFound)?;

        let content = std::fs::read(&config_file).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound,
            _ => ConfigError::ReadingFile(format!("Reading '{}': {}", config_file.display(), e)),
        })?;
        let config: Config = toml::from_slice(&content)
            .map_err(|e| ConfigError::ReadingFile(format!("Parsing configuration: {}", e)))?;
        Ok(config)
    }

    /// The data directory to use, either from the configuration or the
    /// platform default.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|mut path| {
                path.push("tallyd");
                path
            })
            .ok_or(ConfigError::DatadirNotFound)
    }
}
