mod common;

use std::{fs, time::Duration};

use common::*;
use tallyd::{
    database::{
        schema::{DbAsset, DbBalance, DbDeal, DbOrder, DbSend},
        SqliteConn, SqliteDb,
    },
    ledger::{issuance::Issuance, order::Order, send::Send, Message},
    poller::Poller,
};

/// A chain exercising every message type, an invalid message and an
/// unknown tag, plus enough empty blocks to expire an order.
fn mixed_chain() -> SharedDummyBitcoind {
    let bitcoind = SharedDummyBitcoind::new(DummyBitcoind::new());
    {
        let mut chain = bitcoind.0.lock().unwrap();
        let issue_100 = Message::Issuance(Issuance {
            asset_id: 100,
            amount: 1000,
            divisible: true,
        })
        .encode();
        let issue_201 = Message::Issuance(Issuance {
            asset_id: 201,
            amount: 500,
            divisible: true,
        })
        .encode();
        let tx_a = chain.message_tx(&txid(1), ADDR_A, None, &issue_100);
        let tx_b = chain.message_tx(&txid(2), ADDR_B, None, &issue_201);
        chain.add_block(vec![tx_a, tx_b]);

        let send = Message::Send(Send {
            asset_id: 100,
            amount: 250,
        })
        .encode();
        let order_a = Message::Order(Order {
            give_id: 100,
            give_amount: 100,
            get_id: 201,
            get_amount: 50,
            expiration: 5,
            fee_required: 0,
            fee_provided: 0,
        })
        .encode();
        let tx_send = chain.message_tx(&txid(3), ADDR_A, Some((ADDR_B, 0.0001)), &send);
        let tx_order = chain.message_tx(&txid(4), ADDR_A, None, &order_a);
        chain.add_block(vec![tx_send, tx_order]);

        let order_b = Message::Order(Order {
            give_id: 201,
            give_amount: 50,
            get_id: 100,
            get_amount: 100,
            expiration: 5,
            fee_required: 0,
            fee_provided: 0,
        })
        .encode();
        let tx_order = chain.message_tx(&txid(5), ADDR_B, None, &order_b);
        chain.add_block(vec![tx_order]);

        let mut unknown = b"CNTR".to_vec();
        unknown.extend_from_slice(&99u32.to_be_bytes());
        let tx_unknown = chain.message_tx(&txid(6), ADDR_A, None, &unknown);
        let overdraft = Message::Send(Send {
            asset_id: 201,
            amount: 10_000,
        })
        .encode();
        let tx_overdraft = chain.message_tx(&txid(7), ADDR_B, Some((ADDR_A, 0.0001)), &overdraft);
        chain.add_block(vec![tx_unknown, tx_overdraft]);

        chain.add_empty_blocks(5);
    }
    bitcoind
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    sends: Vec<DbSend>,
    orders: Vec<DbOrder>,
    deals: Vec<DbDeal>,
    assets: Vec<DbAsset>,
    balances: Vec<DbBalance>,
}

fn snapshot(conn: &mut SqliteConn) -> Snapshot {
    Snapshot {
        sends: conn.sends().unwrap(),
        orders: conn.orders().unwrap(),
        deals: conn.deals().unwrap(),
        assets: conn.assets().unwrap(),
        balances: conn.balances().unwrap(),
    }
}

fn new_poller(
    bitcoind: &SharedDummyBitcoind,
    db: &SqliteDb,
) -> Poller<SharedDummyBitcoind> {
    Poller::new(
        bitcoind.clone(),
        db,
        1,
        Duration::from_secs(0),
        Vec::new(),
    )
    .unwrap()
}

#[test]
fn independent_runs_are_identical() -> anyhow::Result<()> {
    let bitcoind = mixed_chain();

    let ledger_one = TestLedger::new(bitcoind.clone())?;
    let mut poller_one = ledger_one.sync()?;
    let ledger_two = TestLedger::new(bitcoind)?;
    let mut poller_two = ledger_two.sync()?;

    let snap_one = snapshot(poller_one.conn());
    assert_eq!(snap_one, snapshot(poller_two.conn()));

    // Sanity check the run did what it should have.
    assert_eq!(snap_one.deals.len(), 1);
    assert_eq!(snap_one.sends.len(), 2);
    assert_conservation(poller_one.conn());
    Ok(())
}

#[test]
fn deleting_the_ledger_and_replaying_is_lossless() -> anyhow::Result<()> {
    let bitcoind = mixed_chain();
    let datadir = tempfile::tempdir()?;
    let db_path = datadir.path().join("ledger.1.db");

    let reference = {
        let db = SqliteDb::new(db_path.clone())?;
        let mut poller = new_poller(&bitcoind, &db);
        poller.replay()?;
        poller.catch_up()?;
        snapshot(poller.conn())
    };

    fs::remove_file(&db_path)?;

    let db = SqliteDb::new(db_path)?;
    let mut poller = new_poller(&bitcoind, &db);
    poller.replay()?;
    poller.catch_up()?;
    assert_eq!(reference, snapshot(poller.conn()));
    Ok(())
}

#[test]
fn restart_replays_persisted_blocks() -> anyhow::Result<()> {
    let bitcoind = mixed_chain();
    let datadir = tempfile::tempdir()?;
    let db_path = datadir.path().join("ledger.1.db");
    let db = SqliteDb::new(db_path)?;

    let reference = {
        let mut poller = new_poller(&bitcoind, &db);
        poller.replay()?;
        poller.catch_up()?;
        snapshot(poller.conn())
    };

    // A restart without new blocks re-derives the same tables from the
    // persisted chain data without refetching anything.
    let mut poller = new_poller(&bitcoind, &db);
    poller.replay()?;
    assert_eq!(reference, snapshot(poller.conn()));
    assert_eq!(poller.catch_up()?, 0);

    // And the follower picks up where it left off.
    {
        let mut chain = bitcoind.0.lock().unwrap();
        let send = Message::Send(Send {
            asset_id: 100,
            amount: 100,
        })
        .encode();
        let tx = chain.message_tx(&txid(8), ADDR_B, Some((ADDR_A, 0.0001)), &send);
        chain.add_block(vec![tx]);
    }
    assert_eq!(poller.catch_up()?, 1);
    assert_eq!(poller.conn().balance(ADDR_B, 100)?, 250);
    assert_eq!(poller.conn().balance(ADDR_A, 100)?, 750);
    assert_conservation(poller.conn());
    Ok(())
}
