//! Client side of the P2Pool prediction commit-reveal protocol.
//!
//! [`join::JoinFlow`] commits a bitmap of UP/DOWN calls for a batch and joins
//! it on-chain, [`claim::ClaimFlow`] claims rewards with a balance proof from
//! the first reachable issuer, and [`reconcile::hit_rate`] scores the calls
//! kept in a [`store::PredictionStore`] against settled outcomes.
pub mod api;
pub mod bitmap;
pub mod chain;
pub mod claim;
pub mod client;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod flow;
pub mod join;
pub mod kv;
pub mod reconcile;
pub mod settings;
pub mod store;

pub use api::*;
pub use flow::FlowError;
pub use settings::Settings;

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmap::slots_for_markets;
    use crate::chain::{Chain, TestChain};
    use crate::join::{JoinFlow, JoinRequest, JoinState};
    use crate::kv::MemoryKv;
    use crate::store::{PredictionStore, SaveOutcome};
    use env_logger::Builder;
    use log::LevelFilter;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const ALICE: &str = "0xA11CE00000000000000000000000000000000001";

    #[tokio::test]
    async fn commit_store_and_score() {
        let _ = Builder::default()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
        let settings = Settings::from_toml(
            r#"
            [chain]
            chain_id = 8453
            pool_contract = "0xpool"
            token_contract = "0xtoken"
            "#,
        )
        .unwrap();

        let markets: Vec<MarketId> = vec!["m1".into(), "m2".into(), "m3".into()];
        let predictions = vec![
            Prediction::new("m1", true),
            Prediction::new("m2", false),
            Prediction::new("m3", true),
        ];
        let request = JoinRequest {
            batch_id: 2,
            deposit: 5_000,
            stake_per_tick: 50,
            predictions: slots_for_markets(&markets, &predictions),
            market_count: markets.len(),
        };

        let test_chain = TestChain::new(8453, ALICE);
        let chain: Box<dyn Chain + Send + Sync> = Box::new(test_chain.clone());
        let mut flow = JoinFlow::new(Arc::new(chain), settings.chain.clone(), ALICE.into());
        assert!(matches!(flow.join(&request).await, JoinState::Done { .. }));
        assert_eq!(flow.bitmap().unwrap().as_bytes(), &[0xA0]);
        assert_eq!(test_chain.approvals(), vec![50_000]);

        let store = PredictionStore::new(Box::new(MemoryKv::default()), settings.store.capacity);
        let bet = StoredBet::from_predictions(2, 17, &predictions);
        let outcome = store.save(ALICE, bet.batch_id, bet.tick_id, bet.bets).await;
        assert_eq!(outcome, SaveOutcome::Saved);

        let history = vec![BatchHistoryEntry {
            tick_id: 17,
            market_outcomes: vec![
                MarketOutcome {
                    market_id: "m1".into(),
                    went_up: true,
                },
                MarketOutcome {
                    market_id: "m2".into(),
                    went_up: true,
                },
                MarketOutcome {
                    market_id: "m3".into(),
                    went_up: false,
                },
            ],
        }];
        let result = reconcile::hit_rate_for_batch(&store, ALICE, 2, &history).await;
        assert_eq!(result.correct, 1);
        assert_eq!(result.total, 3);
        assert_eq!(result.ticks_analyzed, 1);
        assert_eq!(result.hit_rate, dec!(33.33));
    }
}
