//! Creation of a new asset, or augmentation of an existing one's supply
//! by its issuer.

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    database::{
        self,
        schema::{DbAsset, DbTransaction},
    },
    ledger::{DecodeError, BTC_ID, XCP_ID},
};

pub const ID: u32 = 2;

const BODY_LEN: usize = 17;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuance {
    pub asset_id: i64,
    pub amount: i64,
    pub divisible: bool,
}

impl Issuance {
    pub fn decode(body: &[u8]) -> Result<Issuance, DecodeError> {
        if body.len() != BODY_LEN {
            return Err(DecodeError::BadLength(ID, body.len()));
        }
        let asset_id = BigEndian::read_u64(&body[0..8]);
        let amount = BigEndian::read_u64(&body[8..16]);
        Ok(Issuance {
            asset_id: i64::try_from(asset_id).map_err(|_| DecodeError::FieldRange(ID))?,
            amount: i64::try_from(amount).map_err(|_| DecodeError::FieldRange(ID))?,
            divisible: body[16] != 0,
        })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = vec![0u8; BODY_LEN];
        BigEndian::write_u64(&mut body[0..8], self.asset_id as u64);
        BigEndian::write_u64(&mut body[8..16], self.amount as u64);
        body[16] = self.divisible as u8;
        body
    }
}

/// Create the asset or add to its supply, crediting the issued amount to
/// the issuer.
///
/// The asset row doubles as the record of the asset's first issuance, so
/// a rejected issuance leaves no row: a partial row would make the asset
/// id spring into existence for sends and orders.
pub fn apply(
    db_tx: &rusqlite::Transaction,
    tx: &DbTransaction,
    issuance: &Issuance,
) -> Result<(), rusqlite::Error> {
    if issuance.asset_id == BTC_ID || issuance.asset_id == XCP_ID {
        log::debug!("Issuance {}: Invalid: reserved asset.", tx.tx_hash);
        return Ok(());
    }
    if issuance.amount == 0 {
        log::debug!("Issuance {}: Invalid: zero amount.", tx.tx_hash);
        return Ok(());
    }

    match database::asset_by_id(db_tx, issuance.asset_id)? {
        Some(asset) => {
            if asset.issuer.as_deref() != Some(tx.source.as_str()) {
                log::debug!("Issuance {}: Invalid: issued by another address.", tx.tx_hash);
                return Ok(());
            }
            if asset.divisible != issuance.divisible {
                log::debug!("Issuance {}: Invalid: divisibility mismatch.", tx.tx_hash);
                return Ok(());
            }
            database::add_asset_supply(db_tx, issuance.asset_id, issuance.amount)?;
        }
        None => {
            database::insert_asset(
                db_tx,
                &DbAsset {
                    asset_id: issuance.asset_id,
                    amount: issuance.amount,
                    divisible: issuance.divisible,
                    tx_index: Some(tx.tx_index),
                    tx_hash: Some(tx.tx_hash.clone()),
                    block_index: Some(tx.block_index),
                    issuer: Some(tx.source.clone()),
                    validity: "Valid".to_string(),
                },
            )?;
        }
    }

    database::credit(db_tx, &tx.source, issuance.asset_id, issuance.amount)?;
    log::debug!(
        "Issuance {}: {} of asset {} to {}.",
        tx.tx_hash,
        issuance.amount,
        issuance.asset_id,
        tx.source
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_round_trip() {
        for divisible in [true, false] {
            let issuance = Issuance {
                asset_id: 100,
                amount: 1000,
                divisible,
            };
            let body = issuance.encode_body();
            assert_eq!(body.len(), BODY_LEN);
            assert_eq!(Issuance::decode(&body).unwrap(), issuance);
        }
    }

    #[test]
    fn nonzero_divisible_byte_is_true() {
        let mut body = Issuance {
            asset_id: 1,
            amount: 1,
            divisible: false,
        }
        .encode_body();
        body[16] = 42;
        assert!(Issuance::decode(&body).unwrap().divisible);
    }
}
