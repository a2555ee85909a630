//! Open orders: entry into the book, matching against counter-orders,
//! and expiration with escrow refund.

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    database::{
        self,
        schema::{DbDeal, DbOrder, DbTransaction},
    },
    ledger::{DecodeError, BTC_ID},
};

pub const ID: u32 = 3;

const BODY_LEN: usize = 44;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub give_id: i64,
    pub give_amount: i64,
    pub get_id: i64,
    pub get_amount: i64,
    pub expiration: u32,
    pub fee_required: u32,
    pub fee_provided: u32,
}

impl Order {
    pub fn decode(body: &[u8]) -> Result<Order, DecodeError> {
        if body.len() != BODY_LEN {
            return Err(DecodeError::BadLength(ID, body.len()));
        }
        let give_id = BigEndian::read_u64(&body[0..8]);
        let give_amount = BigEndian::read_u64(&body[8..16]);
        let get_id = BigEndian::read_u64(&body[16..24]);
        let get_amount = BigEndian::read_u64(&body[24..32]);
        Ok(Order {
            give_id: i64::try_from(give_id).map_err(|_| DecodeError::FieldRange(ID))?,
            give_amount: i64::try_from(give_amount).map_err(|_| DecodeError::FieldRange(ID))?,
            get_id: i64::try_from(get_id).map_err(|_| DecodeError::FieldRange(ID))?,
            get_amount: i64::try_from(get_amount).map_err(|_| DecodeError::FieldRange(ID))?,
            expiration: BigEndian::read_u32(&body[32..36]),
            fee_required: BigEndian::read_u32(&body[36..40]),
            fee_provided: BigEndian::read_u32(&body[40..44]),
        })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = vec![0u8; BODY_LEN];
        BigEndian::write_u64(&mut body[0..8], self.give_id as u64);
        BigEndian::write_u64(&mut body[8..16], self.give_amount as u64);
        BigEndian::write_u64(&mut body[16..24], self.get_id as u64);
        BigEndian::write_u64(&mut body[24..32], self.get_amount as u64);
        BigEndian::write_u32(&mut body[32..36], self.expiration);
        BigEndian::write_u32(&mut body[36..40], self.fee_required);
        BigEndian::write_u32(&mut body[40..44], self.fee_provided);
        body
    }
}

/// Whether the price ranges of a new order and a counter-order overlap.
///
/// The counter-order asks counter.get/counter.give of the new order's
/// give asset per unit given; the new order offers at most
/// new.give/new.get. Cross-multiplied so no rounding is involved.
fn prices_overlap(new_order: &DbOrder, counter: &DbOrder) -> bool {
    counter.get_amount as u128 * new_order.get_amount as u128
        <= new_order.give_amount as u128 * counter.give_amount as u128
}

/// Quantities exchanged between a new order with `give_remaining` left
/// and a counter-order, at the counter-order's price: the amount of the
/// new order's give asset going forward, and of the counter-order's give
/// asset coming back.
fn matched_amounts(give_remaining: i64, counter: &DbOrder) -> (i64, i64) {
    let counter_wants = (counter.give_remaining as u128 * counter.get_amount as u128
        / counter.give_amount as u128) as i64;
    let forward_amount = give_remaining.min(counter_wants);
    let backward_amount = (forward_amount as u128 * counter.give_amount as u128
        / counter.get_amount as u128) as i64;
    (forward_amount, backward_amount)
}

/// Validate an order, escrow its give side, record it and run it against
/// the book.
pub fn apply(
    db_tx: &rusqlite::Transaction,
    tx: &DbTransaction,
    order: &Order,
) -> Result<(), rusqlite::Error> {
    let mut validity = "Valid";

    if order.give_amount == 0 || order.get_amount == 0 {
        validity = "Invalid: zero amount";
    } else if order.give_id == order.get_id {
        validity = "Invalid: same asset";
    } else if database::asset_by_id(db_tx, order.give_id)?.is_none()
        || database::asset_by_id(db_tx, order.get_id)?.is_none()
    {
        validity = "Invalid: no such asset";
    } else if order.give_id != BTC_ID
        && !database::debit(db_tx, &tx.source, order.give_id, order.give_amount)?
    {
        // The escrow. Giving BTC happens on the chain itself, so there is
        // nothing to hold back in that case.
        validity = "Invalid: insufficient funds";
    }

    let ask_price = if order.give_amount != 0 {
        order.get_amount as f64 / order.give_amount as f64
    } else {
        0.0
    };
    let db_order = DbOrder {
        tx_index: tx.tx_index,
        tx_hash: tx.tx_hash.clone(),
        block_index: tx.block_index,
        source: tx.source.clone(),
        give_id: order.give_id,
        give_amount: order.give_amount,
        give_remaining: order.give_amount,
        get_id: order.get_id,
        get_amount: order.get_amount,
        ask_price,
        expiration: order.expiration as i64,
        fee_required: order.fee_required as i64,
        fee_provided: order.fee_provided as i64,
        validity: validity.to_string(),
    };
    database::insert_order(db_tx, &db_order)?;

    if validity == "Valid" {
        log::debug!(
            "Order {}: give {} of asset {} for {} of asset {}.",
            tx.tx_hash,
            order.give_amount,
            order.give_id,
            order.get_amount,
            order.get_id
        );
        match_order(db_tx, &db_order)
    } else {
        log::debug!("Order {}: {}.", tx.tx_hash, validity);
        Ok(())
    }
}

/// Run a newly accepted order against the live counter-orders, oldest
/// first, until it is filled or the book side is exhausted. The older
/// order of each pair sets the price.
fn match_order(db_tx: &rusqlite::Transaction, new_order: &DbOrder) -> Result<(), rusqlite::Error> {
    let mut give_remaining = new_order.give_remaining;

    let counter_orders = database::live_counter_orders(
        db_tx,
        new_order.get_id,
        new_order.give_id,
        new_order.block_index,
    )?;
    for counter in counter_orders {
        if give_remaining == 0 {
            break;
        }
        if !prices_overlap(new_order, &counter) {
            continue;
        }

        let (forward_amount, backward_amount) = matched_amounts(give_remaining, &counter);
        if forward_amount == 0 || backward_amount == 0 {
            continue;
        }

        give_remaining -= forward_amount;
        database::set_order_remaining(db_tx, new_order.tx_index, give_remaining)?;
        database::set_order_remaining(
            db_tx,
            counter.tx_index,
            counter.give_remaining - backward_amount,
        )?;

        // A leg in BTC settles on the chain, not in balances: the deal
        // stays pending until the corresponding payment shows up.
        let validity = if new_order.give_id == BTC_ID || counter.give_id == BTC_ID {
            "Pending"
        } else {
            "Valid"
        };
        database::insert_deal(
            db_tx,
            &DbDeal {
                tx0_index: counter.tx_index,
                tx0_hash: counter.tx_hash.clone(),
                tx0_address: counter.source.clone(),
                tx1_index: new_order.tx_index,
                tx1_hash: new_order.tx_hash.clone(),
                tx1_address: new_order.source.clone(),
                forward_id: new_order.give_id,
                forward_amount,
                backward_id: counter.give_id,
                backward_amount,
                tx0_block_index: counter.block_index,
                tx1_block_index: new_order.block_index,
                tx0_expiration: counter.expiration,
                tx1_expiration: new_order.expiration,
                validity: validity.to_string(),
            },
        )?;
        log::debug!(
            "Deal between order {} and order {}: {} of asset {} for {} of asset {} ({}).",
            counter.tx_hash,
            new_order.tx_hash,
            forward_amount,
            new_order.give_id,
            backward_amount,
            counter.give_id,
            validity
        );

        if validity == "Valid" {
            database::credit(db_tx, &counter.source, new_order.give_id, forward_amount)?;
            database::credit(db_tx, &new_order.source, counter.give_id, backward_amount)?;
        }
    }

    Ok(())
}

/// Expire at a new block height: refund what expired orders still had in
/// escrow, and unwind deals still waiting on a BTC payment past either
/// side's expiration.
pub fn expire(db_tx: &rusqlite::Transaction, block_index: i64) -> Result<(), rusqlite::Error> {
    for order in database::expired_orders(db_tx, block_index)? {
        database::set_order_validity(db_tx, order.tx_index, "Expired")?;
        if order.give_id != BTC_ID && order.give_remaining > 0 {
            database::credit(db_tx, &order.source, order.give_id, order.give_remaining)?;
        }
        log::debug!(
            "Order {} expired at block {}, refunding {} of asset {}.",
            order.tx_hash,
            block_index,
            order.give_remaining,
            order.give_id
        );
    }

    for deal in database::expired_pending_deals(db_tx, block_index)? {
        database::set_deal_validity(db_tx, &deal.tx0_hash, &deal.tx1_hash, "Expired")?;
        if deal.forward_id != BTC_ID {
            database::credit(db_tx, &deal.tx1_address, deal.forward_id, deal.forward_amount)?;
        }
        if deal.backward_id != BTC_ID {
            database::credit(db_tx, &deal.tx0_address, deal.backward_id, deal.backward_amount)?;
        }
        log::debug!(
            "Deal between order {} and order {} expired at block {}.",
            deal.tx0_hash,
            deal.tx1_hash,
            block_index
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_order(give_id: i64, give_amount: i64, get_id: i64, get_amount: i64) -> DbOrder {
        DbOrder {
            tx_index: 0,
            tx_hash: "hash".to_string(),
            block_index: 1,
            source: "addr".to_string(),
            give_id,
            give_amount,
            give_remaining: give_amount,
            get_id,
            get_amount,
            ask_price: get_amount as f64 / give_amount as f64,
            expiration: 10,
            fee_required: 0,
            fee_provided: 0,
            validity: "Valid".to_string(),
        }
    }

    #[test]
    fn body_round_trip() {
        let order = Order {
            give_id: 200,
            give_amount: 100,
            get_id: 201,
            get_amount: 150,
            expiration: 10,
            fee_required: 0,
            fee_provided: 10_000,
        };
        let body = order.encode_body();
        assert_eq!(body.len(), BODY_LEN);
        assert_eq!(Order::decode(&body).unwrap(), order);
    }

    #[test]
    fn price_overlap() {
        // Counter sells asset B at 1 A per B; the new order offers 1 B
        // per A. Exact crossing.
        let new_order = book_order(200, 100, 201, 100);
        let counter = book_order(201, 100, 200, 100);
        assert!(prices_overlap(&new_order, &counter));

        // The counter asks more A per B than the new order is willing to
        // give.
        let counter = book_order(201, 100, 200, 101);
        assert!(!prices_overlap(&new_order, &counter));

        // The counter asks less, overlap.
        let counter = book_order(201, 100, 200, 99);
        assert!(prices_overlap(&new_order, &counter));

        // Cross-multiplication must not overflow on large amounts.
        let new_order = book_order(200, i64::MAX, 201, i64::MAX);
        let counter = book_order(201, i64::MAX, 200, i64::MAX);
        assert!(prices_overlap(&new_order, &counter));
    }

    #[test]
    fn matched_amounts_at_counter_price() {
        // The counter order gives 100 B for 50 A: price 0.5 A per B. A
        // new order with 100 A remaining takes all of it for 50 A.
        let counter = book_order(201, 100, 200, 50);
        assert_eq!(matched_amounts(100, &counter), (50, 100));

        // Partial fill of the counter order.
        assert_eq!(matched_amounts(25, &counter), (25, 50));

        // Partially filled counter order wants proportionally less.
        let mut counter = book_order(201, 100, 200, 50);
        counter.give_remaining = 40;
        assert_eq!(matched_amounts(100, &counter), (20, 40));

        // Rounding floors both ways and never exceeds the remainders.
        let mut counter = book_order(201, 3, 200, 7);
        counter.give_remaining = 2;
        let (forward, backward) = matched_amounts(100, &counter);
        assert!(forward <= 100 && backward <= 2);
        assert_eq!((forward, backward), (4, 1));
    }
}
