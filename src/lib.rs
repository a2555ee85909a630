//! tallyd
//!
//! Indexer and ledger engine for a meta-protocol embedded in a
//! Bitcoin-like chain. The daemon follows the chain through the node's
//! RPC interface, extracts transactions carrying protocol payloads,
//! decodes them into typed messages and applies them, deterministically,
//! to a SQLite ledger of balances, assets, orders and deals.

pub mod bitcoin;
pub mod config;
pub mod database;
pub mod datadir;
pub mod ledger;
pub mod poller;

use std::{fmt, io};

use crate::{
    bitcoin::d::{BitcoinD, BitcoindError},
    config::{Config, ConfigError},
    database::{SqliteDb, SqliteDbError},
    datadir::{DataDirError, DataDirectory},
    poller::Poller,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    DataDir(DataDirError),
    Io(io::Error),
    Database(SqliteDbError),
    Bitcoind(BitcoindError),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{}", e),
            Self::DataDir(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "{}", e),
            Self::Database(e) => write!(f, "{}", e),
            Self::Bitcoind(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StartupError {}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<DataDirError> for StartupError {
    fn from(e: DataDirError) -> Self {
        Self::DataDir(e)
    }
}

impl From<io::Error> for StartupError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SqliteDbError> for StartupError {
    fn from(e: SqliteDbError) -> Self {
        Self::Database(e)
    }
}

impl From<BitcoindError> for StartupError {
    fn from(e: BitcoindError) -> Self {
        Self::Bitcoind(e)
    }
}

/// Set up everything from the configuration: data directory, database
/// version check, node connection. Returns the follower, ready to run.
pub fn start_poller(config: &Config) -> Result<Poller<BitcoinD>, StartupError> {
    let data_dir = DataDirectory::new(config.data_dir()?);
    if !data_dir.exists() {
        log::info!("Creating data directory at {}.", data_dir.path().display());
        data_dir.init()?;
    }
    data_dir.check_db_version()?;

    let bitcoind = BitcoinD::new(&config.bitcoind_config)?;
    bitcoind.sanity_check()?;

    let db = SqliteDb::new(data_dir.ledger_db_file())?;
    let poller = Poller::new(
        bitcoind,
        &db,
        config.block_first,
        config.poll_interval_secs,
        config.bootstrap_balances.clone(),
    )?;
    Ok(poller)
}
