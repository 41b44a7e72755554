//! Bit-packed prediction commitments.
//!
//! One bit per market, most significant bit first within each byte: slot 0 is
//! `0x80` of byte 0, slot 8 is `0x80` of byte 1. A set bit is an UP call; a
//! clear bit is either a DOWN call or no call at all.
use crate::api::{Direction, MarketId, Prediction};
use sha3::digest::consts::U32;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap(Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitmentHash(pub [u8; 32]);

impl Bitmap {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(s)?))
    }
}
impl From<Vec<u8>> for Bitmap {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl CommitmentHash {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}
impl Display for CommitmentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn byte_len(market_count: usize) -> usize {
    (market_count + 7) / 8
}

/// Packs the first `market_count` slots. Absent slots and slots beyond the
/// provided list stay clear.
pub fn encode(predictions: &[Option<Direction>], market_count: usize) -> Bitmap {
    let mut bytes = vec![0u8; byte_len(market_count)];
    for (i, slot) in predictions.iter().take(market_count).enumerate() {
        if let Some(Direction::Up) = slot {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }
    Bitmap(bytes)
}

/// Unpacks `market_count` directions. Bytes missing from a short bitmap read as DOWN.
pub fn decode(bitmap: &Bitmap, market_count: usize) -> Vec<Direction> {
    (0..market_count)
        .map(|i| {
            let byte = bitmap.0.get(i / 8).copied().unwrap_or(0);
            Direction::from_up(byte & (0x80 >> (i % 8)) != 0)
        })
        .collect()
}

/// Keccak-256 of the exact bitmap bytes, as the pool contract computes it.
pub fn hash(bitmap: &Bitmap) -> CommitmentHash {
    hash_with::<Keccak256>(bitmap)
}

pub fn hash_with<D: Digest<OutputSize = U32>>(bitmap: &Bitmap) -> CommitmentHash {
    CommitmentHash(D::digest(&bitmap.0).into())
}

/// Places `predictions` onto the slots of the batch's ordered market list.
/// Predictions for markets outside the list are dropped.
pub fn slots_for_markets(
    markets: &[MarketId],
    predictions: &[Prediction],
) -> Vec<Option<Direction>> {
    let by_market: HashMap<&str, bool> = predictions
        .iter()
        .map(|p| (p.market_id.as_str(), p.predicted_up))
        .collect();
    markets
        .iter()
        .map(|market| by_market.get(market.as_str()).map(|up| Direction::from_up(*up)))
        .collect()
}
