//! The ledger protocol.
//!
//! Decode protocol payloads into typed messages and apply them, in
//! transaction order, to the ledger tables. Parsing a block is
//! deterministic: replaying the same chain prefix always yields the same
//! tables.

pub mod btc_payment;
pub mod issuance;
pub mod order;
pub mod send;

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::{config::PREFIX, database};

/// Reserved asset id for the chain's native coin. Never issued; amounts
/// of it move on the chain itself, not in balances.
pub const BTC_ID: i64 = 0;

/// Reserved asset id for the protocol's own unit of account.
pub const XCP_ID: i64 = 1;

/// A decoded protocol message. The set is closed: anything else found
/// behind the prefix is an unsupported transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Send(send::Send),
    Issuance(issuance::Issuance),
    Order(order::Order),
    BtcPayment(btc_payment::BtcPayment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a protocol payload at all.
    MissingPrefix,
    /// Prefix present but no room for a type tag.
    Truncated,
    /// A type tag we don't know of.
    UnknownType(u32),
    /// The body doesn't have the fixed length of this message type.
    BadLength(u32, usize),
    /// A field value the ledger cannot represent.
    FieldRange(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "payload does not carry the protocol prefix"),
            Self::Truncated => write!(f, "payload too short for a type tag"),
            Self::UnknownType(tag) => write!(f, "unknown message type {}", tag),
            Self::BadLength(tag, len) => {
                write!(f, "invalid body length {} for message type {}", len, tag)
            }
            Self::FieldRange(tag) => {
                write!(f, "out of range field value for message type {}", tag)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl Message {
    /// Decode a full payload: prefix, big-endian type tag, fixed-width
    /// body.
    pub fn decode(payload: &[u8]) -> Result<Message, DecodeError> {
        let post_prefix = match payload.strip_prefix(PREFIX) {
            Some(rest) => rest,
            None => return Err(DecodeError::MissingPrefix),
        };
        if post_prefix.len() < 4 {
            return Err(DecodeError::Truncated);
        }
        let type_tag = BigEndian::read_u32(&post_prefix[..4]);
        let body = &post_prefix[4..];

        match type_tag {
            send::ID => send::Send::decode(body).map(Message::Send),
            issuance::ID => issuance::Issuance::decode(body).map(Message::Issuance),
            order::ID => order::Order::decode(body).map(Message::Order),
            btc_payment::ID => btc_payment::BtcPayment::decode(body).map(Message::BtcPayment),
            tag => Err(DecodeError::UnknownType(tag)),
        }
    }

    /// The full payload for this message, prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let (type_tag, body) = match self {
            Message::Send(msg) => (send::ID, msg.encode_body()),
            Message::Issuance(msg) => (issuance::ID, msg.encode_body()),
            Message::Order(msg) => (order::ID, msg.encode_body()),
            Message::BtcPayment(msg) => (btc_payment::ID, msg.encode_body()),
        };
        let mut tag_buf = [0u8; 4];
        BigEndian::write_u32(&mut tag_buf, type_tag);

        let mut payload = Vec::with_capacity(PREFIX.len() + 4 + body.len());
        payload.extend_from_slice(PREFIX);
        payload.extend_from_slice(&tag_buf);
        payload.extend_from_slice(&body);
        payload
    }
}

/// Apply all protocol transactions of a block, in ascending tx_index
/// order, then expire what the new height leaves behind.
///
/// This is separate from the follower so that changing the parsing rules
/// doesn't require a chain re-download: on restart every block is
/// re-parsed from the persisted transactions.
pub fn parse_block(
    db_tx: &rusqlite::Transaction,
    block_index: i64,
) -> Result<(), rusqlite::Error> {
    log::debug!("Parsing block {}.", block_index);

    for tx in database::transactions_in_block(db_tx, block_index)? {
        match Message::decode(&tx.payload) {
            Ok(Message::Send(msg)) => send::apply(db_tx, &tx, &msg)?,
            Ok(Message::Issuance(msg)) => issuance::apply(db_tx, &tx, &msg)?,
            Ok(Message::Order(msg)) => order::apply(db_tx, &tx, &msg)?,
            Ok(Message::BtcPayment(msg)) => btc_payment::apply(db_tx, &tx, &msg)?,
            Err(DecodeError::MissingPrefix) => continue,
            Err(e) => {
                log::warn!(
                    "Transaction {}: {}. Marking it unsupported.",
                    tx.tx_hash,
                    e
                );
                database::mark_unsupported(db_tx, &tx.tx_hash)?;
            }
        }
    }

    order::expire(db_tx, block_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_foreign_payloads() {
        assert_eq!(
            Message::decode(b"XXXX\x00\x00\x00\x01rest"),
            Err(DecodeError::MissingPrefix)
        );
        assert_eq!(Message::decode(b""), Err(DecodeError::MissingPrefix));
        // A prefix alone, or with a partial tag, is truncated.
        assert_eq!(Message::decode(b"CNTR"), Err(DecodeError::Truncated));
        assert_eq!(Message::decode(b"CNTR\x00\x00\x01"), Err(DecodeError::Truncated));
    }

    #[test]
    fn decode_unknown_tag() {
        assert_eq!(
            Message::decode(b"CNTR\x00\x00\x00\x63somebody"),
            Err(DecodeError::UnknownType(99))
        );
        // Tag 0 is deliberately unassigned.
        assert_eq!(
            Message::decode(b"CNTR\x00\x00\x00\x00"),
            Err(DecodeError::UnknownType(0))
        );
    }

    #[test]
    fn decode_bad_length() {
        // A send body must be exactly 16 bytes.
        let mut payload = b"CNTR\x00\x00\x00\x01".to_vec();
        payload.extend_from_slice(&[0u8; 15]);
        assert_eq!(
            Message::decode(&payload),
            Err(DecodeError::BadLength(send::ID, 15))
        );
        payload.extend_from_slice(&[0u8; 2]);
        assert_eq!(
            Message::decode(&payload),
            Err(DecodeError::BadLength(send::ID, 17))
        );
    }

    #[test]
    fn round_trip_all_messages() {
        let messages = [
            Message::Send(send::Send {
                asset_id: 100,
                amount: 1000,
            }),
            Message::Issuance(issuance::Issuance {
                asset_id: 100,
                amount: 1000,
                divisible: true,
            }),
            Message::Order(order::Order {
                give_id: 200,
                give_amount: 100,
                get_id: 201,
                get_amount: 100,
                expiration: 10,
                fee_required: 0,
                fee_provided: 10_000,
            }),
            Message::BtcPayment(btc_payment::BtcPayment {
                tx0_hash: [0xab; 32],
                tx1_hash: [0xcd; 32],
            }),
        ];
        for message in &messages {
            let payload = message.encode();
            assert!(payload.starts_with(PREFIX));
            assert_eq!(&Message::decode(&payload).unwrap(), message);
        }
    }

    #[test]
    fn field_range_guard() {
        // An amount above what the ledger can represent is a malformed
        // body, not a bigger balance.
        let mut payload = b"CNTR\x00\x00\x00\x01".to_vec();
        payload.extend_from_slice(&u64::to_be_bytes(100));
        payload.extend_from_slice(&u64::to_be_bytes(u64::MAX));
        assert_eq!(
            Message::decode(&payload),
            Err(DecodeError::FieldRange(send::ID))
        );
    }
}
