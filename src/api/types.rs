use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub type BatchId = u64;
pub type TickId = u64;
pub type MarketId = String;
pub type Address = String;
pub type TxHash = String;
/// Token amount in the token's smallest unit.
pub type TokenAmount = u128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}
impl Direction {
    pub fn from_up(up: bool) -> Self {
        if up {
            Self::Up
        } else {
            Self::Down
        }
    }
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}
impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        };
        write!(f, "{}", output)
    }
}

/// A participant's call on one market within one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub market_id: MarketId,
    pub predicted_up: bool,
}
impl Prediction {
    pub fn new(market_id: impl Into<MarketId>, predicted_up: bool) -> Self {
        Self {
            market_id: market_id.into(),
            predicted_up,
        }
    }
}

/// The predictions a participant submitted for one `(batch, tick)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBet {
    pub batch_id: BatchId,
    pub tick_id: TickId,
    pub bets: BTreeMap<MarketId, bool>,
    pub submitted_at: DateTime<Utc>,
}
impl StoredBet {
    pub fn from_predictions(
        batch_id: BatchId,
        tick_id: TickId,
        predictions: &[Prediction],
    ) -> Self {
        Self {
            batch_id,
            tick_id,
            bets: predictions
                .iter()
                .map(|p| (p.market_id.clone(), p.predicted_up))
                .collect(),
            submitted_at: Utc::now(),
        }
    }
    pub fn key(&self) -> (BatchId, TickId) {
        (self.batch_id, self.tick_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimProof {
    /// Base-10 integer string, passed through to the contract untouched.
    pub balance: String,
    pub signature: Vec<u8>,
    pub from_tick: TickId,
    pub to_tick: TickId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOutcome {
    pub market_id: MarketId,
    pub went_up: bool,
}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHistoryEntry {
    pub tick_id: TickId,
    pub market_outcomes: Vec<MarketOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitRate {
    pub correct: u32,
    pub total: u32,
    /// Percent, two decimal places.
    pub hit_rate: Decimal,
    pub ticks_analyzed: u32,
}
