use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use hex::DisplayHex;

use tallyd::{
    bitcoin::{
        d::BitcoindError, BitcoinInterface, Block, RawTransaction, ScriptPubKey, TxInput, TxOutput,
    },
    database::{SqliteConn, SqliteDb},
    poller::Poller,
};

pub const ADDR_A: &str = "mn6q3dS2EnDUx3bmyWc6D4szJNVGtaR7zc";
pub const ADDR_B: &str = "mnkzHBHRkBWoP9aFtocDe5atxmRfSRHnjR";
pub const ADDR_C: &str = "mvCounterpartyXXXXXXXXXXXXXXW24Hef";

/// A 32-byte transaction hash from a pattern byte.
pub fn hash32(n: u8) -> [u8; 32] {
    [n; 32]
}

/// The hex string the node (and thus the database) uses for that hash.
pub fn txid(n: u8) -> String {
    hash32(n).to_lower_hex_string()
}

/// A scripted chain: blocks at heights 1..=n plus a bag of fetchable
/// transactions.
#[derive(Default)]
pub struct DummyBitcoind {
    blocks: Vec<(String, Block)>,
    txs: HashMap<String, RawTransaction>,
}

impl DummyBitcoind {
    pub fn new() -> Self {
        Default::default()
    }

    fn pay_output(address: &str, value: f64) -> TxOutput {
        TxOutput {
            value,
            script_pubkey: ScriptPubKey {
                asm: "OP_DUP OP_HASH160 OP_EQUALVERIFY OP_CHECKSIG".to_string(),
                addresses: Some(vec![address.to_string()]),
            },
        }
    }

    fn op_return_output(payload: &[u8]) -> TxOutput {
        TxOutput {
            value: 0.0,
            script_pubkey: ScriptPubKey {
                asm: format!("OP_RETURN {}", payload.to_lower_hex_string()),
                addresses: None,
            },
        }
    }

    /// A transaction from `source` carrying `payload` in an OP_RETURN
    /// output, optionally paying `destination`. Its funding transaction
    /// is registered so the extractor can resolve the source address.
    pub fn message_tx(
        &mut self,
        txid: &str,
        source: &str,
        destination: Option<(&str, f64)>,
        payload: &[u8],
    ) -> RawTransaction {
        let funding_txid = format!("fund-{}", txid);
        let funding = RawTransaction {
            txid: funding_txid.clone(),
            vin: Vec::new(),
            vout: vec![Self::pay_output(source, 1.0)],
        };
        self.txs.insert(funding_txid.clone(), funding);

        let mut vout = vec![Self::op_return_output(payload)];
        if let Some((address, value)) = destination {
            vout.push(Self::pay_output(address, value));
        }
        RawTransaction {
            txid: txid.to_string(),
            vin: vec![TxInput {
                txid: Some(funding_txid),
                vout: Some(0),
                coinbase: None,
            }],
            vout,
        }
    }

    /// Append a block containing these transactions. Returns its height.
    pub fn add_block(&mut self, txs: Vec<RawTransaction>) -> u64 {
        let height = self.blocks.len() as u64 + 1;
        let block = Block {
            time: 1_231_006_505 + height,
            tx: txs.iter().map(|tx| tx.txid.clone()).collect(),
        };
        for tx in txs {
            self.txs.insert(tx.txid.clone(), tx);
        }
        self.blocks.push((format!("blockhash{:03}", height), block));
        height
    }

    pub fn add_empty_blocks(&mut self, count: u64) {
        for _ in 0..count {
            self.add_block(Vec::new());
        }
    }
}

/// Local wrapper so `BitcoinInterface` (defined in the `tallyd` crate) can
/// be implemented on a shared handle without running afoul of the orphan
/// rule, which `Arc<Mutex<DummyBitcoind>>` alone would violate.
#[derive(Clone)]
pub struct SharedDummyBitcoind(pub Arc<Mutex<DummyBitcoind>>);

impl SharedDummyBitcoind {
    pub fn new(bitcoind: DummyBitcoind) -> Self {
        SharedDummyBitcoind(Arc::new(Mutex::new(bitcoind)))
    }
}

impl BitcoinInterface for SharedDummyBitcoind {
    fn block_count(&self) -> Result<u64, BitcoindError> {
        Ok(self.0.lock().unwrap().blocks.len() as u64)
    }

    fn block_hash(&self, height: u64) -> Result<String, BitcoindError> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(height as usize - 1)
            .map(|(hash, _)| hash.clone())
            .ok_or_else(|| BitcoindError::InvalidResponse(format!("No block at height {}", height)))
    }

    fn block(&self, hash: &str) -> Result<Block, BitcoindError> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .iter()
            .find(|(block_hash, _)| block_hash == hash)
            .map(|(_, block)| block.clone())
            .ok_or_else(|| BitcoindError::InvalidResponse(format!("No block with hash {}", hash)))
    }

    fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, BitcoindError> {
        self.0
            .lock()
            .unwrap()
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| BitcoindError::InvalidResponse(format!("No transaction {}", txid)))
    }

    fn is_valid_address(&self, _address: &str) -> Result<bool, BitcoindError> {
        Ok(true)
    }
}

pub struct TestLedger {
    pub bitcoind: SharedDummyBitcoind,
    pub db: SqliteDb,
    // Kept alive so the database file outlives the poller.
    _datadir: tempfile::TempDir,
}

impl TestLedger {
    pub fn new(bitcoind: SharedDummyBitcoind) -> anyhow::Result<Self> {
        let datadir = tempfile::tempdir()?;
        let db = SqliteDb::new(datadir.path().join("ledger.1.db"))?;
        Ok(TestLedger {
            bitcoind,
            db,
            _datadir: datadir,
        })
    }

    /// A follower over the dummy chain, starting at height 1.
    pub fn poller(&self) -> anyhow::Result<Poller<SharedDummyBitcoind>> {
        Ok(Poller::new(
            self.bitcoind.clone(),
            &self.db,
            1,
            Duration::from_secs(0),
            Vec::new(),
        )?)
    }

    /// Replay from persisted data and catch up with the dummy chain, as
    /// a fresh daemon startup would.
    pub fn sync(&self) -> anyhow::Result<Poller<SharedDummyBitcoind>> {
        let mut poller = self.poller()?;
        poller.replay()?;
        poller.catch_up()?;
        Ok(poller)
    }
}

/// For every issued asset, the supply must equal what sits in balances
/// plus what is escrowed in open orders and deals pending a BTC payment.
pub fn assert_conservation(conn: &mut SqliteConn) {
    let balances = conn.balances().unwrap();
    let orders = conn.orders().unwrap();
    let deals = conn.deals().unwrap();

    for asset in conn.assets().unwrap() {
        if asset.asset_id <= 1 {
            // BTC moves on the chain itself and the unit of account may
            // be granted at bootstrap: neither has an issued supply to
            // check against.
            continue;
        }
        let in_balances: i64 = balances
            .iter()
            .filter(|b| b.asset_id == asset.asset_id)
            .map(|b| b.amount)
            .sum();
        let in_orders: i64 = orders
            .iter()
            .filter(|o| o.validity == "Valid" && o.give_id == asset.asset_id)
            .map(|o| o.give_remaining)
            .sum();
        let in_deals: i64 = deals
            .iter()
            .filter(|d| d.validity == "Pending")
            .map(|d| {
                let mut escrowed = 0;
                if d.forward_id == asset.asset_id {
                    escrowed += d.forward_amount;
                }
                if d.backward_id == asset.asset_id {
                    escrowed += d.backward_amount;
                }
                escrowed
            })
            .sum();
        assert_eq!(
            asset.amount,
            in_balances + in_orders + in_deals,
            "conservation broken for asset {}",
            asset.asset_id
        );
    }

    for balance in balances {
        assert!(balance.amount >= 0, "negative balance: {:?}", balance);
    }
}
