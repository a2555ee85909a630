//! Ledger database.
//!
//! Chain data (blocks, protocol transactions) is persisted append-only;
//! everything derived from it (sends, orders, deals, assets, balances) is
//! rebuilt from scratch at every startup. All effects of a single block
//! are committed in a single database transaction.

pub mod schema;
pub mod utils;

use crate::{
    config::BootstrapBalance,
    database::{
        schema::{
            DbAsset, DbBalance, DbBlock, DbDeal, DbOrder, DbSend, DbTransaction, DERIVED_SCHEMA,
            SCHEMA,
        },
        utils::{create_db_file, db_exec, db_query, db_tx_query},
    },
    ledger::{BTC_ID, XCP_ID},
};

use std::{convert::TryFrom, fmt, io, path};

use rusqlite::{params, OptionalExtension};

#[derive(Debug)]
pub enum SqliteDbError {
    FileCreation(io::Error),
    Rusqlite(rusqlite::Error),
}

impl fmt::Display for SqliteDbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FileCreation(e) => write!(f, "Error when creating database file: '{}'", e),
            Self::Rusqlite(e) => write!(f, "SQLite error: '{}'", e),
        }
    }
}

impl std::error::Error for SqliteDbError {}

impl From<io::Error> for SqliteDbError {
    fn from(e: io::Error) -> Self {
        Self::FileCreation(e)
    }
}

impl From<rusqlite::Error> for SqliteDbError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Rusqlite(e)
    }
}

/// Handle to the ledger database file.
pub struct SqliteDb {
    db_path: path::PathBuf,
}

impl SqliteDb {
    /// Get a handle to the database file, creating it if it doesn't exist
    /// yet.
    pub fn new(db_path: path::PathBuf) -> Result<SqliteDb, SqliteDbError> {
        if !db_path.exists() {
            log::info!("No database at {}, creating a new one.", db_path.display());
            create_db_file(&db_path)?;
        }
        Ok(SqliteDb { db_path })
    }

    pub fn connection(&self) -> Result<SqliteConn, SqliteDbError> {
        let conn = rusqlite::Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(60))?;
        Ok(SqliteConn { conn })
    }
}

pub struct SqliteConn {
    conn: rusqlite::Connection,
}

impl SqliteConn {
    /// Run a closure against the database inside a single transaction.
    pub fn exec<F>(&mut self, modifications: F) -> Result<(), rusqlite::Error>
    where
        F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<()>,
    {
        db_exec(&mut self.conn, modifications)
    }

    /// (Re-)derive the ledger tables.
    ///
    /// Creates the chain tables if they don't exist yet, purges rows from
    /// before `block_first`, then drops and recreates every derived table,
    /// seeds the reserved assets and credits the bootstrap balances.
    /// Running it twice in a row yields the same state.
    pub fn initialise(
        &mut self,
        block_first: u64,
        bootstrap_balances: &[BootstrapBalance],
    ) -> Result<(), SqliteDbError> {
        db_exec(&mut self.conn, |db_tx| {
            db_tx.execute_batch(SCHEMA)?;

            // Purge database of blocks, transactions from before block_first.
            db_tx.execute(
                "DELETE FROM blocks WHERE block_index < ?1",
                params![block_first as i64],
            )?;
            db_tx.execute(
                "DELETE FROM transactions WHERE block_index < ?1",
                params![block_first as i64],
            )?;

            db_tx.execute_batch(DERIVED_SCHEMA)?;

            for asset_id in [BTC_ID, XCP_ID] {
                db_tx.execute(
                    "INSERT INTO assets (asset_id, amount, divisible, tx_index, tx_hash, \
                     block_index, issuer, validity) VALUES (?1, 0, 1, NULL, NULL, NULL, NULL, \
                     'Valid')",
                    params![asset_id],
                )?;
            }

            for grant in bootstrap_balances {
                credit(db_tx, &grant.address, grant.asset_id, grant.amount)?;
            }

            Ok(())
        })?;
        Ok(())
    }

    /// Index of the highest persisted block, if any.
    pub fn last_block_index(&mut self) -> Result<Option<i64>, rusqlite::Error> {
        self.conn
            .query_row("SELECT MAX(block_index) FROM blocks", [], |row| row.get(0))
    }

    /// Highest tx_index handed out so far, if any.
    pub fn last_tx_index(&mut self) -> Result<Option<i64>, rusqlite::Error> {
        self.conn
            .query_row("SELECT MAX(tx_index) FROM transactions", [], |row| {
                row.get(0)
            })
    }

    /// All persisted block indexes, ascending.
    pub fn block_indexes(&mut self) -> Result<Vec<i64>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT block_index FROM blocks ORDER BY block_index",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_transaction(&mut self, tx_hash: &str) -> Result<bool, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT tx_index FROM transactions WHERE tx_hash = ?1",
                params![tx_hash],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|res| res.is_some())
    }

    pub fn transaction_by_hash(
        &mut self,
        tx_hash: &str,
    ) -> Result<Option<DbTransaction>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT * FROM transactions WHERE tx_hash = ?1",
                params![tx_hash],
                |row| DbTransaction::try_from(row),
            )
            .optional()
    }

    pub fn balance(&mut self, address: &str, asset_id: i64) -> Result<i64, rusqlite::Error> {
        Ok(self
            .conn
            .query_row(
                "SELECT amount FROM balances WHERE address = ?1 AND asset_id = ?2",
                params![address, asset_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    pub fn balances(&mut self) -> Result<Vec<DbBalance>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT * FROM balances ORDER BY address, asset_id",
            [],
            |row| DbBalance::try_from(row),
        )
    }

    pub fn asset(&mut self, asset_id: i64) -> Result<Option<DbAsset>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT * FROM assets WHERE asset_id = ?1",
                params![asset_id],
                |row| DbAsset::try_from(row),
            )
            .optional()
    }

    pub fn assets(&mut self) -> Result<Vec<DbAsset>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT * FROM assets ORDER BY asset_id",
            [],
            |row| DbAsset::try_from(row),
        )
    }

    pub fn sends(&mut self) -> Result<Vec<DbSend>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT * FROM sends ORDER BY tx_index",
            [],
            |row| DbSend::try_from(row),
        )
    }

    pub fn orders(&mut self) -> Result<Vec<DbOrder>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT * FROM orders ORDER BY tx_index",
            [],
            |row| DbOrder::try_from(row),
        )
    }

    pub fn deals(&mut self) -> Result<Vec<DbDeal>, rusqlite::Error> {
        db_query(
            &mut self.conn,
            "SELECT * FROM deals ORDER BY tx0_index, tx1_index",
            [],
            |row| DbDeal::try_from(row),
        )
    }
}

/// Add to this address' balance, creating the row if it doesn't exist.
pub fn credit(
    db_tx: &rusqlite::Transaction,
    address: &str,
    asset_id: i64,
    amount: i64,
) -> Result<(), rusqlite::Error> {
    let updated = db_tx.execute(
        "UPDATE balances SET amount = amount + ?1 WHERE address = ?2 AND asset_id = ?3",
        params![amount, address, asset_id],
    )?;
    if updated == 0 {
        db_tx.execute(
            "INSERT INTO balances (address, asset_id, amount) VALUES (?1, ?2, ?3)",
            params![address, asset_id, amount],
        )?;
    }
    Ok(())
}

/// Subtract from this address' balance. Returns false, without touching
/// the row, if the balance doesn't cover the amount.
pub fn debit(
    db_tx: &rusqlite::Transaction,
    address: &str,
    asset_id: i64,
    amount: i64,
) -> Result<bool, rusqlite::Error> {
    let funds: Option<i64> = db_tx
        .query_row(
            "SELECT amount FROM balances WHERE address = ?1 AND asset_id = ?2",
            params![address, asset_id],
            |row| row.get(0),
        )
        .optional()?;
    match funds {
        Some(funds) if funds >= amount => {
            db_tx.execute(
                "UPDATE balances SET amount = amount - ?1 WHERE address = ?2 AND asset_id = ?3",
                params![amount, address, asset_id],
            )?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn db_balance(
    db_tx: &rusqlite::Transaction,
    address: &str,
    asset_id: i64,
) -> Result<i64, rusqlite::Error> {
    Ok(db_tx
        .query_row(
            "SELECT amount FROM balances WHERE address = ?1 AND asset_id = ?2",
            params![address, asset_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

pub fn insert_block(db_tx: &rusqlite::Transaction, block: &DbBlock) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO blocks (block_index, block_hash, block_time) VALUES (?1, ?2, ?3)",
        params![block.block_index, block.block_hash, block.block_time],
    )?;
    Ok(())
}

pub fn insert_chain_transaction(
    db_tx: &rusqlite::Transaction,
    tx: &DbTransaction,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO transactions (tx_index, tx_hash, block_index, block_time, source, \
         destination, btc_amount, fee, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            tx.tx_index,
            tx.tx_hash,
            tx.block_index,
            tx.block_time,
            tx.source,
            tx.destination,
            tx.btc_amount,
            tx.fee,
            tx.payload,
        ],
    )?;
    Ok(())
}

/// All protocol transactions of this block, in the order they are to be
/// parsed.
pub fn transactions_in_block(
    db_tx: &rusqlite::Transaction,
    block_index: i64,
) -> Result<Vec<DbTransaction>, rusqlite::Error> {
    db_tx_query(
        db_tx,
        "SELECT * FROM transactions WHERE block_index = ?1 ORDER BY tx_index",
        params![block_index],
        |row| DbTransaction::try_from(row),
    )
}

/// Mark a transaction as being of unsupported type.
pub fn mark_unsupported(
    db_tx: &rusqlite::Transaction,
    tx_hash: &str,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "UPDATE transactions SET supported = 0 WHERE tx_hash = ?1",
        params![tx_hash],
    )?;
    Ok(())
}

pub fn asset_by_id(
    db_tx: &rusqlite::Transaction,
    asset_id: i64,
) -> Result<Option<DbAsset>, rusqlite::Error> {
    db_tx
        .query_row(
            "SELECT * FROM assets WHERE asset_id = ?1",
            params![asset_id],
            |row| DbAsset::try_from(row),
        )
        .optional()
}

pub fn insert_asset(db_tx: &rusqlite::Transaction, asset: &DbAsset) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO assets (asset_id, amount, divisible, tx_index, tx_hash, block_index, \
         issuer, validity) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            asset.asset_id,
            asset.amount,
            asset.divisible,
            asset.tx_index,
            asset.tx_hash,
            asset.block_index,
            asset.issuer,
            asset.validity,
        ],
    )?;
    Ok(())
}

pub fn add_asset_supply(
    db_tx: &rusqlite::Transaction,
    asset_id: i64,
    amount: i64,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "UPDATE assets SET amount = amount + ?1 WHERE asset_id = ?2",
        params![amount, asset_id],
    )?;
    Ok(())
}

pub fn insert_send(db_tx: &rusqlite::Transaction, send: &DbSend) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO sends (tx_index, tx_hash, block_index, source, destination, asset_id, \
         amount, validity) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            send.tx_index,
            send.tx_hash,
            send.block_index,
            send.source,
            send.destination,
            send.asset_id,
            send.amount,
            send.validity,
        ],
    )?;
    Ok(())
}

pub fn insert_order(db_tx: &rusqlite::Transaction, order: &DbOrder) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO orders (tx_index, tx_hash, block_index, source, give_id, give_amount, \
         give_remaining, get_id, get_amount, ask_price, expiration, fee_required, fee_provided, \
         validity) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            order.tx_index,
            order.tx_hash,
            order.block_index,
            order.source,
            order.give_id,
            order.give_amount,
            order.give_remaining,
            order.get_id,
            order.get_amount,
            order.ask_price,
            order.expiration,
            order.fee_required,
            order.fee_provided,
            order.validity,
        ],
    )?;
    Ok(())
}

pub fn set_order_remaining(
    db_tx: &rusqlite::Transaction,
    tx_index: i64,
    give_remaining: i64,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "UPDATE orders SET give_remaining = ?1 WHERE tx_index = ?2",
        params![give_remaining, tx_index],
    )?;
    Ok(())
}

pub fn set_order_validity(
    db_tx: &rusqlite::Transaction,
    tx_index: i64,
    validity: &str,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "UPDATE orders SET validity = ?1 WHERE tx_index = ?2",
        params![validity, tx_index],
    )?;
    Ok(())
}

/// Orders which could match one giving `get_id` for `give_id`: valid,
/// something left to give, not expired at the current block. Oldest
/// first.
pub fn live_counter_orders(
    db_tx: &rusqlite::Transaction,
    give_id: i64,
    get_id: i64,
    block_index: i64,
) -> Result<Vec<DbOrder>, rusqlite::Error> {
    db_tx_query(
        db_tx,
        "SELECT * FROM orders WHERE give_id = ?1 AND get_id = ?2 AND validity = 'Valid' \
         AND give_remaining > 0 AND block_index + expiration >= ?3 ORDER BY tx_index",
        params![give_id, get_id, block_index],
        |row| DbOrder::try_from(row),
    )
}

/// Valid orders whose expiration block has passed.
pub fn expired_orders(
    db_tx: &rusqlite::Transaction,
    block_index: i64,
) -> Result<Vec<DbOrder>, rusqlite::Error> {
    db_tx_query(
        db_tx,
        "SELECT * FROM orders WHERE validity = 'Valid' AND block_index + expiration < ?1 \
         ORDER BY tx_index",
        params![block_index],
        |row| DbOrder::try_from(row),
    )
}

pub fn insert_deal(db_tx: &rusqlite::Transaction, deal: &DbDeal) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "INSERT INTO deals (tx0_index, tx0_hash, tx0_address, tx1_index, tx1_hash, tx1_address, \
         forward_id, forward_amount, backward_id, backward_amount, tx0_block_index, \
         tx1_block_index, tx0_expiration, tx1_expiration, validity) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            deal.tx0_index,
            deal.tx0_hash,
            deal.tx0_address,
            deal.tx1_index,
            deal.tx1_hash,
            deal.tx1_address,
            deal.forward_id,
            deal.forward_amount,
            deal.backward_id,
            deal.backward_amount,
            deal.tx0_block_index,
            deal.tx1_block_index,
            deal.tx0_expiration,
            deal.tx1_expiration,
            deal.validity,
        ],
    )?;
    Ok(())
}

pub fn pending_deal(
    db_tx: &rusqlite::Transaction,
    tx0_hash: &str,
    tx1_hash: &str,
) -> Result<Option<DbDeal>, rusqlite::Error> {
    db_tx
        .query_row(
            "SELECT * FROM deals WHERE tx0_hash = ?1 AND tx1_hash = ?2 AND validity = 'Pending'",
            params![tx0_hash, tx1_hash],
            |row| DbDeal::try_from(row),
        )
        .optional()
}

pub fn set_deal_validity(
    db_tx: &rusqlite::Transaction,
    tx0_hash: &str,
    tx1_hash: &str,
    validity: &str,
) -> Result<(), rusqlite::Error> {
    db_tx.execute(
        "UPDATE deals SET validity = ?1 WHERE tx0_hash = ?2 AND tx1_hash = ?3",
        params![validity, tx0_hash, tx1_hash],
    )?;
    Ok(())
}

/// Pending deals for which either side's order expiration has passed.
pub fn expired_pending_deals(
    db_tx: &rusqlite::Transaction,
    block_index: i64,
) -> Result<Vec<DbDeal>, rusqlite::Error> {
    db_tx_query(
        db_tx,
        "SELECT * FROM deals WHERE validity = 'Pending' AND \
         (tx0_block_index + tx0_expiration < ?1 OR tx1_block_index + tx1_expiration < ?1) \
         ORDER BY tx0_index, tx1_index",
        params![block_index],
        |row| DbDeal::try_from(row),
    )
}
