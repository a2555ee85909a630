//! Settlement of a pending deal by a payment in the chain's native coin.
//!
//! A deal with a BTC leg can't settle in balances: the debtor pays the
//! counterparty on the chain itself and the payment transaction, carrying
//! the deal key, releases the other leg.

use hex::DisplayHex;

use crate::{
    database::{self, schema::DbTransaction},
    ledger::{DecodeError, BTC_ID},
};

pub const ID: u32 = 4;

const BODY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPayment {
    pub tx0_hash: [u8; 32],
    pub tx1_hash: [u8; 32],
}

impl BtcPayment {
    pub fn decode(body: &[u8]) -> Result<BtcPayment, DecodeError> {
        if body.len() != BODY_LEN {
            return Err(DecodeError::BadLength(ID, body.len()));
        }
        let mut tx0_hash = [0u8; 32];
        let mut tx1_hash = [0u8; 32];
        tx0_hash.copy_from_slice(&body[0..32]);
        tx1_hash.copy_from_slice(&body[32..64]);
        Ok(BtcPayment { tx0_hash, tx1_hash })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(BODY_LEN);
        body.extend_from_slice(&self.tx0_hash);
        body.extend_from_slice(&self.tx1_hash);
        body
    }
}

/// Flip the referenced deal to valid and release the non-BTC leg to the
/// debtor, provided the payment actually is from the debtor to the
/// counterparty and covers what is owed.
pub fn apply(
    db_tx: &rusqlite::Transaction,
    tx: &DbTransaction,
    payment: &BtcPayment,
) -> Result<(), rusqlite::Error> {
    let tx0_hash = payment.tx0_hash.to_lower_hex_string();
    let tx1_hash = payment.tx1_hash.to_lower_hex_string();

    let deal = match database::pending_deal(db_tx, &tx0_hash, &tx1_hash)? {
        Some(deal) => deal,
        None => {
            log::debug!(
                "BTC payment {}: no pending deal for key ({}, {}).",
                tx.tx_hash,
                tx0_hash,
                tx1_hash
            );
            return Ok(());
        }
    };

    // Which side of the deal owes BTC. The debtor is the one who gets the
    // other leg once the payment is in.
    let (debtor, counterparty, owed, release_id, release_amount) = if deal.backward_id == BTC_ID {
        (
            deal.tx0_address.as_str(),
            deal.tx1_address.as_str(),
            deal.backward_amount,
            deal.forward_id,
            deal.forward_amount,
        )
    } else if deal.forward_id == BTC_ID {
        (
            deal.tx1_address.as_str(),
            deal.tx0_address.as_str(),
            deal.forward_amount,
            deal.backward_id,
            deal.backward_amount,
        )
    } else {
        log::warn!(
            "BTC payment {}: pending deal ({}, {}) has no BTC leg.",
            tx.tx_hash,
            tx0_hash,
            tx1_hash
        );
        return Ok(());
    };

    if tx.source != debtor {
        log::debug!(
            "BTC payment {}: source {} is not the debtor {}.",
            tx.tx_hash,
            tx.source,
            debtor
        );
        return Ok(());
    }
    if tx.destination.as_deref() != Some(counterparty) {
        log::debug!(
            "BTC payment {}: destination does not match the counterparty {}.",
            tx.tx_hash,
            counterparty
        );
        return Ok(());
    }
    if tx.btc_amount.unwrap_or(0) < owed {
        log::debug!(
            "BTC payment {}: {} paid but {} owed.",
            tx.tx_hash,
            tx.btc_amount.unwrap_or(0),
            owed
        );
        return Ok(());
    }

    database::set_deal_validity(db_tx, &tx0_hash, &tx1_hash, "Valid")?;
    if release_id != BTC_ID {
        database::credit(db_tx, debtor, release_id, release_amount)?;
    }
    log::debug!(
        "BTC payment {}: deal ({}, {}) settled, {} of asset {} released to {}.",
        tx.tx_hash,
        tx0_hash,
        tx1_hash,
        release_amount,
        release_id,
        debtor
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex::FromHex;

    #[test]
    fn body_round_trip() {
        let payment = BtcPayment {
            tx0_hash: [0x11; 32],
            tx1_hash: [0x22; 32],
        };
        let body = payment.encode_body();
        assert_eq!(body.len(), BODY_LEN);
        assert_eq!(BtcPayment::decode(&body).unwrap(), payment);
    }

    #[test]
    fn deal_key_matches_stored_hex() {
        let hash_hex = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let payment = BtcPayment {
            tx0_hash: <[u8; 32]>::from_hex(hash_hex).unwrap(),
            tx1_hash: [0; 32],
        };
        assert_eq!(payment.tx0_hash.to_lower_hex_string(), hash_hex);
    }
}
