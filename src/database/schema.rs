use std::convert::TryFrom;

/* Chain data. Append-only: rows are only ever removed when purging below
 * the configured first block, and a transaction is only ever mutated to
 * drop its 'supported' flag. */
pub const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS blocks (
    block_index INTEGER PRIMARY KEY NOT NULL,
    block_hash TEXT UNIQUE NOT NULL,
    block_time INTEGER NOT NULL
);

/* Protocol-carrying transactions only: a row exists iff the transaction
 * had both an OP_RETURN payload and a unique source address. The
 * 'supported' flag is cleared when the payload carries an unknown type
 * tag. */
CREATE TABLE IF NOT EXISTS transactions (
    tx_index INTEGER PRIMARY KEY NOT NULL,
    tx_hash TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    block_time INTEGER NOT NULL,
    source TEXT NOT NULL,
    destination TEXT,
    btc_amount INTEGER,
    fee INTEGER NOT NULL,
    payload BLOB NOT NULL,
    supported BOOLEAN NOT NULL DEFAULT 1 CHECK (supported IN (0,1))
);
";

/* Everything below is derived from the transactions table and rebuilt
 * from scratch at every startup, so a change of parsing rules never
 * requires a chain re-download. */
pub const DERIVED_SCHEMA: &str = "\
DROP TABLE IF EXISTS sends;
CREATE TABLE sends (
    tx_index INTEGER PRIMARY KEY NOT NULL,
    tx_hash TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source TEXT NOT NULL,
    destination TEXT,
    asset_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    validity TEXT NOT NULL
);

DROP TABLE IF EXISTS orders;
CREATE TABLE orders (
    tx_index INTEGER PRIMARY KEY NOT NULL,
    tx_hash TEXT UNIQUE NOT NULL,
    block_index INTEGER NOT NULL,
    source TEXT NOT NULL,
    give_id INTEGER NOT NULL,
    give_amount INTEGER NOT NULL,
    give_remaining INTEGER NOT NULL,
    get_id INTEGER NOT NULL,
    get_amount INTEGER NOT NULL,
    ask_price REAL NOT NULL,
    expiration INTEGER NOT NULL,
    fee_required INTEGER NOT NULL,
    fee_provided INTEGER NOT NULL,
    validity TEXT NOT NULL
);

/* A match between two orders. 'forward' is the asset and amount going to
 * tx0's address, 'backward' what goes to tx1's. 'Pending' until the BTC
 * leg, if any, is paid on-chain. */
DROP TABLE IF EXISTS deals;
CREATE TABLE deals (
    tx0_index INTEGER NOT NULL,
    tx0_hash TEXT NOT NULL,
    tx0_address TEXT NOT NULL,
    tx1_index INTEGER NOT NULL,
    tx1_hash TEXT NOT NULL,
    tx1_address TEXT NOT NULL,
    forward_id INTEGER NOT NULL,
    forward_amount INTEGER NOT NULL,
    backward_id INTEGER NOT NULL,
    backward_amount INTEGER NOT NULL,
    tx0_block_index INTEGER NOT NULL,
    tx1_block_index INTEGER NOT NULL,
    tx0_expiration INTEGER NOT NULL,
    tx1_expiration INTEGER NOT NULL,
    validity TEXT NOT NULL,
    UNIQUE (tx0_hash, tx1_hash)
);

DROP TABLE IF EXISTS assets;
CREATE TABLE assets (
    asset_id INTEGER PRIMARY KEY NOT NULL,
    amount INTEGER NOT NULL,
    divisible BOOLEAN NOT NULL CHECK (divisible IN (0,1)),
    tx_index INTEGER UNIQUE,
    tx_hash TEXT UNIQUE,
    block_index INTEGER,
    issuer TEXT,
    validity TEXT NOT NULL
);

DROP TABLE IF EXISTS balances;
CREATE TABLE balances (
    address TEXT NOT NULL,
    asset_id INTEGER NOT NULL,
    amount INTEGER NOT NULL CHECK (amount >= 0),
    UNIQUE (address, asset_id)
);
";

/// A row in the "blocks" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbBlock {
    pub block_index: i64,
    pub block_hash: String,
    pub block_time: i64,
}

impl TryFrom<&rusqlite::Row<'_>> for DbBlock {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbBlock {
            block_index: row.get(0)?,
            block_hash: row.get(1)?,
            block_time: row.get(2)?,
        })
    }
}

/// A row in the "transactions" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTransaction {
    pub tx_index: i64,
    pub tx_hash: String,
    pub block_index: i64,
    pub block_time: i64,
    pub source: String,
    pub destination: Option<String>,
    pub btc_amount: Option<i64>,
    pub fee: i64,
    pub payload: Vec<u8>,
    pub supported: bool,
}

impl TryFrom<&rusqlite::Row<'_>> for DbTransaction {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbTransaction {
            tx_index: row.get(0)?,
            tx_hash: row.get(1)?,
            block_index: row.get(2)?,
            block_time: row.get(3)?,
            source: row.get(4)?,
            destination: row.get(5)?,
            btc_amount: row.get(6)?,
            fee: row.get(7)?,
            payload: row.get(8)?,
            supported: row.get(9)?,
        })
    }
}

/// A row in the "sends" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSend {
    pub tx_index: i64,
    pub tx_hash: String,
    pub block_index: i64,
    pub source: String,
    pub destination: Option<String>,
    pub asset_id: i64,
    pub amount: i64,
    pub validity: String,
}

impl TryFrom<&rusqlite::Row<'_>> for DbSend {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbSend {
            tx_index: row.get(0)?,
            tx_hash: row.get(1)?,
            block_index: row.get(2)?,
            source: row.get(3)?,
            destination: row.get(4)?,
            asset_id: row.get(5)?,
            amount: row.get(6)?,
            validity: row.get(7)?,
        })
    }
}

/// A row in the "orders" table.
#[derive(Debug, Clone, PartialEq)]
pub struct DbOrder {
    pub tx_index: i64,
    pub tx_hash: String,
    pub block_index: i64,
    pub source: String,
    pub give_id: i64,
    pub give_amount: i64,
    pub give_remaining: i64,
    pub get_id: i64,
    pub get_amount: i64,
    /// Advisory only. Matching decides on integer cross-multiplication.
    pub ask_price: f64,
    pub expiration: i64,
    pub fee_required: i64,
    pub fee_provided: i64,
    pub validity: String,
}

impl TryFrom<&rusqlite::Row<'_>> for DbOrder {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbOrder {
            tx_index: row.get(0)?,
            tx_hash: row.get(1)?,
            block_index: row.get(2)?,
            source: row.get(3)?,
            give_id: row.get(4)?,
            give_amount: row.get(5)?,
            give_remaining: row.get(6)?,
            get_id: row.get(7)?,
            get_amount: row.get(8)?,
            ask_price: row.get(9)?,
            expiration: row.get(10)?,
            fee_required: row.get(11)?,
            fee_provided: row.get(12)?,
            validity: row.get(13)?,
        })
    }
}

/// A row in the "deals" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbDeal {
    pub tx0_index: i64,
    pub tx0_hash: String,
    pub tx0_address: String,
    pub tx1_index: i64,
    pub tx1_hash: String,
    pub tx1_address: String,
    pub forward_id: i64,
    pub forward_amount: i64,
    pub backward_id: i64,
    pub backward_amount: i64,
    pub tx0_block_index: i64,
    pub tx1_block_index: i64,
    pub tx0_expiration: i64,
    pub tx1_expiration: i64,
    pub validity: String,
}

impl TryFrom<&rusqlite::Row<'_>> for DbDeal {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbDeal {
            tx0_index: row.get(0)?,
            tx0_hash: row.get(1)?,
            tx0_address: row.get(2)?,
            tx1_index: row.get(3)?,
            tx1_hash: row.get(4)?,
            tx1_address: row.get(5)?,
            forward_id: row.get(6)?,
            forward_amount: row.get(7)?,
            backward_id: row.get(8)?,
            backward_amount: row.get(9)?,
            tx0_block_index: row.get(10)?,
            tx1_block_index: row.get(11)?,
            tx0_expiration: row.get(12)?,
            tx1_expiration: row.get(13)?,
            validity: row.get(14)?,
        })
    }
}

/// A row in the "assets" table. The origin columns are null for the
/// reserved assets seeded at initialisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbAsset {
    pub asset_id: i64,
    pub amount: i64,
    pub divisible: bool,
    pub tx_index: Option<i64>,
    pub tx_hash: Option<String>,
    pub block_index: Option<i64>,
    pub issuer: Option<String>,
    pub validity: String,
}

impl TryFrom<&rusqlite::Row<'_>> for DbAsset {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbAsset {
            asset_id: row.get(0)?,
            amount: row.get(1)?,
            divisible: row.get(2)?,
            tx_index: row.get(3)?,
            tx_hash: row.get(4)?,
            block_index: row.get(5)?,
            issuer: row.get(6)?,
            validity: row.get(7)?,
        })
    }
}

/// A row in the "balances" table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbBalance {
    pub address: String,
    pub asset_id: i64,
    pub amount: i64,
}

impl TryFrom<&rusqlite::Row<'_>> for DbBalance {
    type Error = rusqlite::Error;

    fn try_from(row: &rusqlite::Row) -> Result<Self, Self::Error> {
        Ok(DbBalance {
            address: row.get(0)?,
            asset_id: row.get(1)?,
            amount: row.get(2)?,
        })
    }
}
