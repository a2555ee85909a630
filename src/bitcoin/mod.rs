//! Interface to the Bitcoin-like chain.
//!
//! Fetch blocks and raw transactions, validate addresses.

pub mod d;

use serde::Deserialize;

use crate::config::UNIT;

/// A block as returned by the node: header time and ordered txid list.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub time: u64,
    pub tx: Vec<String>,
}

/// One input of a decoded transaction. Either a reference to a previous
/// output or a coinbase.
#[derive(Debug, Clone, Deserialize)]
pub struct TxInput {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    pub coinbase: Option<String>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKey {
    pub asm: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl ScriptPubKey {
    /// The primary address of this script, if the node derived any.
    pub fn first_address(&self) -> Option<&str> {
        self.addresses
            .as_ref()
            .and_then(|addrs| addrs.first())
            .map(|s| s.as_str())
    }
}

/// One output of a decoded transaction. The value arrives as decimal BTC.
#[derive(Debug, Clone, Deserialize)]
pub struct TxOutput {
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pubkey: ScriptPubKey,
}

impl TxOutput {
    /// The output value in integer base units.
    pub fn value_units(&self) -> i64 {
        (self.value * UNIT as f64).round() as i64
    }
}

/// A transaction decoded by the node (`getrawtransaction` verbose).
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

/// Our chain backend.
///
/// All the calls the follower makes against the node, behind a trait so
/// tests can script a chain.
pub trait BitcoinInterface {
    /// Number of blocks in the longest chain.
    fn block_count(&self) -> Result<u64, d::BitcoindError>;

    /// Hash of the block at this height in the best chain.
    fn block_hash(&self, height: u64) -> Result<String, d::BitcoindError>;

    /// Header time and txid list of this block.
    fn block(&self, hash: &str) -> Result<Block, d::BitcoindError>;

    /// Fetch and decode a transaction by txid.
    fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, d::BitcoindError>;

    /// Whether the node considers this address valid.
    fn is_valid_address(&self, address: &str) -> Result<bool, d::BitcoindError>;
}
