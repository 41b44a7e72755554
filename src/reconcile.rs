use crate::api::*;
use crate::store::PredictionStore;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Scores stored predictions against settled outcomes. Ticks missing from
/// `history` are unresolved and skipped; so are single markets without an
/// outcome in an otherwise resolved tick.
pub fn hit_rate(bets: &[StoredBet], history: &[BatchHistoryEntry]) -> HitRate {
    let outcomes: HashMap<TickId, HashMap<&str, bool>> = history
        .iter()
        .map(|entry| {
            let markets = entry
                .market_outcomes
                .iter()
                .map(|o| (o.market_id.as_str(), o.went_up))
                .collect();
            (entry.tick_id, markets)
        })
        .collect();

    let mut result = HitRate::default();
    for bet in bets {
        let Some(tick) = outcomes.get(&bet.tick_id) else {
            continue;
        };
        result.ticks_analyzed += 1;
        for (market, predicted_up) in &bet.bets {
            if let Some(went_up) = tick.get(market.as_str()) {
                result.total += 1;
                if predicted_up == went_up {
                    result.correct += 1;
                }
            }
        }
    }
    if result.total > 0 {
        result.hit_rate =
            (Decimal::from(result.correct) * Decimal::ONE_HUNDRED / Decimal::from(result.total))
                .round_dp(2);
    }
    result
}

/// [`hit_rate`] over everything `address` stored for `batch_id`.
pub async fn hit_rate_for_batch(
    store: &PredictionStore,
    address: &str,
    batch_id: BatchId,
    history: &[BatchHistoryEntry],
) -> HitRate {
    let bets = store.load_for_batch(address, batch_id).await;
    hit_rate(&bets, history)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bet(tick_id: TickId, bets: &[(&str, bool)]) -> StoredBet {
        StoredBet {
            batch_id: 1,
            tick_id,
            bets: bets.iter().map(|(m, up)| (m.to_string(), *up)).collect(),
            submitted_at: Utc::now(),
        }
    }
    fn entry(tick_id: TickId, outcomes: &[(&str, bool)]) -> BatchHistoryEntry {
        BatchHistoryEntry {
            tick_id,
            market_outcomes: outcomes
                .iter()
                .map(|(m, up)| MarketOutcome {
                    market_id: m.to_string(),
                    went_up: *up,
                })
                .collect(),
        }
    }

    #[test]
    fn unresolved_tick_is_not_counted() {
        let result = hit_rate(&[bet(5, &[("m1", true)])], &[entry(4, &[("m1", true)])]);
        assert_eq!(result, HitRate::default());
        assert_eq!(result.ticks_analyzed, 0);
        assert_eq!(result.total, 0);
        assert_eq!(result.hit_rate, Decimal::ZERO);
    }

    #[test]
    fn unresolved_market_is_skipped() {
        let result = hit_rate(
            &[bet(5, &[("m1", true), ("m2", false), ("m3", true)])],
            &[entry(5, &[("m1", true), ("m2", true)])],
        );
        assert_eq!(result.ticks_analyzed, 1);
        assert_eq!(result.total, 2);
        assert_eq!(result.correct, 1);
        assert_eq!(result.hit_rate, dec!(50));
    }

    #[test]
    fn accumulates_across_ticks() {
        let bets = [
            bet(1, &[("m1", true), ("m2", false)]),
            bet(2, &[("m1", false)]),
            bet(3, &[("m1", true)]),
        ];
        let history = [
            entry(1, &[("m1", true), ("m2", false)]),
            entry(2, &[("m1", true)]),
        ];
        let result = hit_rate(&bets, &history);
        assert_eq!(result.ticks_analyzed, 2);
        assert_eq!((result.correct, result.total), (2, 3));
        assert_eq!(result.hit_rate, dec!(66.67));
        // Repeated calls see the same inputs.
        assert_eq!(hit_rate(&bets, &history), result);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(hit_rate(&[], &[]), HitRate::default());
        assert_eq!(hit_rate(&[], &[entry(1, &[("m1", true)])]), HitRate::default());
    }
}
