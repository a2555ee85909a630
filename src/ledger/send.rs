//! Transfer of an asset amount from the transaction's source to its
//! destination.

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    database::{
        self,
        schema::{DbSend, DbTransaction},
    },
    ledger::DecodeError,
};

pub const ID: u32 = 1;

const BODY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Send {
    pub asset_id: i64,
    pub amount: i64,
}

impl Send {
    pub fn decode(body: &[u8]) -> Result<Send, DecodeError> {
        if body.len() != BODY_LEN {
            return Err(DecodeError::BadLength(ID, body.len()));
        }
        let asset_id = BigEndian::read_u64(&body[0..8]);
        let amount = BigEndian::read_u64(&body[8..16]);
        Ok(Send {
            asset_id: i64::try_from(asset_id).map_err(|_| DecodeError::FieldRange(ID))?,
            amount: i64::try_from(amount).map_err(|_| DecodeError::FieldRange(ID))?,
        })
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = vec![0u8; BODY_LEN];
        BigEndian::write_u64(&mut body[0..8], self.asset_id as u64);
        BigEndian::write_u64(&mut body[8..16], self.amount as u64);
        body
    }
}

/// Move the amount from source to destination if everything checks out,
/// and record the send with the outcome either way.
pub fn apply(
    db_tx: &rusqlite::Transaction,
    tx: &DbTransaction,
    send: &Send,
) -> Result<(), rusqlite::Error> {
    let mut validity = "Valid";

    if database::asset_by_id(db_tx, send.asset_id)?.is_none() {
        validity = "Invalid: no such asset";
    } else if send.amount == 0 {
        validity = "Invalid: zero amount";
    } else if tx.destination.is_none() {
        validity = "Invalid: no destination";
    } else if !database::debit(db_tx, &tx.source, send.asset_id, send.amount)? {
        validity = "Invalid: insufficient funds";
    }

    if validity == "Valid" {
        let destination = tx
            .destination
            .as_ref()
            .expect("Checked for a destination above");
        database::credit(db_tx, destination, send.asset_id, send.amount)?;
        log::debug!(
            "Send {}: {} of asset {} from {} to {}.",
            tx.tx_hash,
            send.amount,
            send.asset_id,
            tx.source,
            destination
        );
    } else {
        log::debug!("Send {}: {}.", tx.tx_hash, validity);
    }

    database::insert_send(
        db_tx,
        &DbSend {
            tx_index: tx.tx_index,
            tx_hash: tx.tx_hash.clone(),
            block_index: tx.block_index,
            source: tx.source.clone(),
            destination: tx.destination.clone(),
            asset_id: send.asset_id,
            amount: send.amount,
            validity: validity.to_string(),
        },
    )
}
