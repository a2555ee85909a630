//! The follower. Re-derives the ledger from persisted chain data at
//! startup, then tails the chain: fetch each new block, extract the
//! protocol transactions, parse them. One database transaction per
//! block, so a crash can never leave a block half-applied.

use std::{fmt, thread, time::Duration};

use hex::FromHex;

use crate::{
    bitcoin::{d::BitcoindError, BitcoinInterface, RawTransaction},
    config::BootstrapBalance,
    database::{
        self,
        schema::{DbBlock, DbTransaction},
        SqliteConn, SqliteDb, SqliteDbError,
    },
    ledger,
};

#[derive(Debug)]
pub enum PollerError {
    Bitcoind(BitcoindError),
    Database(SqliteDbError),
}

impl fmt::Display for PollerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bitcoind(e) => write!(f, "Chain backend error: {}", e),
            Self::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for PollerError {}

impl From<BitcoindError> for PollerError {
    fn from(e: BitcoindError) -> Self {
        Self::Bitcoind(e)
    }
}

impl From<SqliteDbError> for PollerError {
    fn from(e: SqliteDbError) -> Self {
        Self::Database(e)
    }
}

impl From<rusqlite::Error> for PollerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(SqliteDbError::Rusqlite(e))
    }
}

/// What we need to know about a chain transaction to decide whether, and
/// how, to index it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub btc_amount: Option<i64>,
    pub fee: i64,
    pub payload: Option<Vec<u8>>,
}

/// Derive source, destination, amounts and payload from a decoded chain
/// transaction. Returns None for coinbase transactions.
pub fn get_tx_info(
    bitcoind: &impl BitcoinInterface,
    tx: &RawTransaction,
) -> Result<Option<TxInfo>, BitcoindError> {
    let mut fee: i64 = 0;

    // Collect the address of every funding output. The funding outputs
    // are assumed not to be multisig; if the node gave us no address for
    // one of them the source can't be determined.
    let mut source_list: Vec<Option<String>> = Vec::with_capacity(tx.vin.len());
    for vin in &tx.vin {
        if vin.is_coinbase() {
            return Ok(None);
        }
        let (txid, vout_index) = match (&vin.txid, vin.vout) {
            (Some(txid), Some(vout_index)) => (txid, vout_index),
            _ => {
                return Err(BitcoindError::InvalidResponse(format!(
                    "Input of transaction {} without txid nor coinbase",
                    tx.txid
                )))
            }
        };
        let funding_tx = bitcoind.raw_transaction(txid)?;
        let funding_out = funding_tx.vout.get(vout_index as usize).ok_or_else(|| {
            BitcoindError::InvalidResponse(format!(
                "Transaction {} has no output {}",
                txid, vout_index
            ))
        })?;
        fee += funding_out.value_units();
        source_list.push(funding_out.script_pubkey.first_address().map(String::from));
    }

    // Require that all possible source addresses be the same.
    let source = match source_list.first() {
        Some(Some(first)) if source_list.iter().all(|addr| addr.as_deref() == Some(first)) => {
            Some(first.clone())
        }
        _ => None,
    };

    // Destination is the first output with a valid address, if any.
    let mut destination = None;
    let mut btc_amount = None;
    for vout in &tx.vout {
        if let Some(address) = vout.script_pubkey.first_address() {
            if bitcoind.is_valid_address(address)? {
                destination = Some(address.to_string());
                btc_amount = Some(vout.value_units());
                break;
            }
        }
    }

    for vout in &tx.vout {
        fee -= vout.value_units();
    }

    // The payload is carried by an OP_RETURN output with a single data
    // push.
    let mut payload = None;
    for vout in &tx.vout {
        let asm: Vec<&str> = vout.script_pubkey.asm.split(' ').collect();
        if asm.len() == 2 && asm[0] == "OP_RETURN" {
            if let Ok(data) = Vec::<u8>::from_hex(asm[1]) {
                payload = Some(data);
                break;
            }
        }
    }

    Ok(Some(TxInfo {
        source,
        destination,
        btc_amount,
        fee,
        payload,
    }))
}

pub struct Poller<B: BitcoinInterface> {
    bitcoind: B,
    conn: SqliteConn,
    block_first: u64,
    poll_interval: Duration,
    bootstrap_balances: Vec<BootstrapBalance>,
}

impl<B: BitcoinInterface> Poller<B> {
    pub fn new(
        bitcoind: B,
        db: &SqliteDb,
        block_first: u64,
        poll_interval: Duration,
        bootstrap_balances: Vec<BootstrapBalance>,
    ) -> Result<Self, SqliteDbError> {
        let conn = db.connection()?;
        Ok(Poller {
            bitcoind,
            conn,
            block_first,
            poll_interval,
            bootstrap_balances,
        })
    }

    pub fn conn(&mut self) -> &mut SqliteConn {
        &mut self.conn
    }

    /// Re-derive all ledger tables from the persisted blocks and
    /// transactions. Always done on startup, so a change of parsing rules
    /// is picked up without a chain re-download.
    pub fn replay(&mut self) -> Result<(), PollerError> {
        self.conn
            .initialise(self.block_first, &self.bootstrap_balances)?;
        let block_indexes = self.conn.block_indexes()?;
        if let Some(last) = block_indexes.last() {
            log::info!("Replaying {} persisted blocks, up to {}.", block_indexes.len(), last);
        }
        for block_index in block_indexes {
            self.conn
                .exec(|db_tx| ledger::parse_block(db_tx, block_index))?;
        }
        Ok(())
    }

    /// Ingest blocks until we caught up with the node's tip. Returns how
    /// many were ingested.
    pub fn catch_up(&mut self) -> Result<u64, PollerError> {
        let mut next_height = match self.conn.last_block_index()? {
            Some(last) => last as u64 + 1,
            None => self.block_first,
        };
        // NOTE: tx_index may be skipping some numbers.
        let mut next_tx_index = self.conn.last_tx_index()?.map(|i| i + 1).unwrap_or(0);

        let mut ingested = 0;
        let mut block_count = self.bitcoind.block_count()?;
        while next_height <= block_count {
            next_tx_index = self.ingest_block(next_height, next_tx_index)?;
            ingested += 1;
            next_height += 1;
            block_count = self.bitcoind.block_count()?;
        }
        Ok(ingested)
    }

    fn ingest_block(&mut self, height: u64, mut next_tx_index: i64) -> Result<i64, PollerError> {
        let block_hash = self.bitcoind.block_hash(height)?;
        let block = self.bitcoind.block(&block_hash)?;
        log::info!("Processing block {} ({}).", height, block_hash);

        let mut new_txs = Vec::new();
        for tx_hash in &block.tx {
            // Skip duplicate transaction entries.
            if self.conn.has_transaction(tx_hash)? {
                next_tx_index += 1;
                continue;
            }
            let raw_tx = self.bitcoind.raw_transaction(tx_hash)?;
            if let Some(info) = get_tx_info(&self.bitcoind, &raw_tx)? {
                // Only transactions with both a payload and an
                // unambiguous source are of interest to the ledger.
                if let (Some(payload), Some(source)) = (info.payload, info.source) {
                    new_txs.push(DbTransaction {
                        tx_index: next_tx_index,
                        tx_hash: tx_hash.clone(),
                        block_index: height as i64,
                        block_time: block.time as i64,
                        source,
                        destination: info.destination,
                        btc_amount: info.btc_amount,
                        fee: info.fee,
                        payload,
                        supported: true,
                    });
                }
            }
            next_tx_index += 1;
        }

        let block_row = DbBlock {
            block_index: height as i64,
            block_hash,
            block_time: block.time as i64,
        };
        self.conn.exec(|db_tx| {
            for tx in &new_txs {
                database::insert_chain_transaction(db_tx, tx)?;
            }
            database::insert_block(db_tx, &block_row)?;
            ledger::parse_block(db_tx, block_row.block_index)
        })?;

        Ok(next_tx_index)
    }

    /// Replay, then follow the chain forever. Chain backend errors are
    /// logged and retried at the next poll; database errors are fatal.
    pub fn run(&mut self) -> Result<(), PollerError> {
        self.replay()?;
        log::info!("Replay done, following the chain.");

        loop {
            match self.catch_up() {
                Ok(0) => {}
                Ok(ingested) => log::debug!("Caught up, {} new blocks.", ingested),
                Err(PollerError::Bitcoind(e)) => {
                    log::error!(
                        "Error polling the chain backend: '{}'. Retrying in {}s.",
                        e,
                        self.poll_interval.as_secs()
                    );
                }
                Err(e) => return Err(e),
            }
            thread::sleep(self.poll_interval);
        }
    }
}
