//! End-to-end tests of the trading loop over mock ports: risk clamping on
//! the way to the exchange, position caps, crash recovery and flip
//! ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::tempdir;

use kestrel::application::{ControllerConfig, ExecutionEngine, LoopController, RetryPolicy};
use kestrel::domain::decision::{Decision, Side};
use kestrel::domain::instrument::{default_basket, Instrument};
use kestrel::domain::position::Position;
use kestrel::domain::risk::{RiskLimits, RiskManager};
use kestrel::domain::state_store::StateStore;
use kestrel::ports::exchange::{ExchangePort, LivePosition};
use kestrel::ports::mocks::{ExchangeCall, MockEligibility, MockExchange, MockMarketData, MockOracle};

fn btc() -> Instrument {
    default_basket().into_iter().find(|i| i.symbol == "BTC").unwrap()
}

fn controller(
    market: MockMarketData,
    oracle: MockOracle,
    exchange: Arc<MockExchange>,
    store: StateStore,
    eligibility: MockEligibility,
) -> Arc<LoopController> {
    Arc::new(LoopController::new(
        Arc::new(market),
        Arc::new(oracle),
        Arc::new(eligibility),
        ExecutionEngine::new(
            exchange,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        ),
        store,
        RiskManager::new(RiskLimits::default()),
        default_basket(),
        ControllerConfig {
            interval: Duration::from_millis(10),
            execute_orders: true,
            summary_every: 100,
        },
    ))
}

fn decision(symbol: &str, side: Side, notional: f64, leverage: u32) -> Decision {
    let (stop_loss, take_profit) = match side {
        Side::Short => (Some(52000.0), Some(45000.0)),
        _ => (Some(48000.0), Some(55000.0)),
    };
    Decision {
        symbol: symbol.to_string(),
        side,
        target_notional: notional,
        leverage,
        stop_loss,
        take_profit,
        confidence: 0.9,
    }
}

#[tokio::test]
async fn oversized_decision_reaches_exchange_clamped() {
    let dir = tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json"), 10000.0).unwrap();

    // The oracle asks for half the account at absurd leverage
    let market = MockMarketData::new().with_price("BTC", 50000.0);
    let oracle = MockOracle::new().with_decisions(vec![decision("BTC", Side::Long, 5000.0, 1000)]);
    let exchange = Arc::new(MockExchange::new().with_fill_price("BTC", 50000.0));

    let ctl = controller(market, oracle, exchange.clone(), store, MockEligibility::allowing_all());
    let outcome = ctl.tick().await.unwrap();
    assert_eq!(outcome.executed, 1);

    // 5% of 10000 = 500 notional at 50000 = 0.01 BTC ceiling
    let order_size = exchange
        .calls()
        .iter()
        .find_map(|c| match c {
            ExchangeCall::Order(_, _, size) => Some(*size),
            _ => None,
        })
        .expect("an order must have been submitted");
    assert!(order_size <= 0.01 + 1e-9, "size {} escaped the clamp", order_size);

    // Leverage was capped at the global ceiling, not the requested 1000
    let leverage = exchange
        .calls()
        .iter()
        .find_map(|c| match c {
            ExchangeCall::SetLeverage(_, lev) => Some(*lev),
            _ => None,
        })
        .unwrap();
    assert_eq!(leverage, 15);
}

#[tokio::test]
async fn seventh_position_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let mut store = StateStore::load(&path, 100000.0).unwrap();
        for symbol in ["ETH", "SOL", "BNB", "DOGE", "XRP", "LTC"] {
            store
                .open_position(
                    Position::new(
                        symbol.to_string(),
                        Side::Long,
                        100.0,
                        1.0,
                        2,
                        Some(90.0),
                        Some(120.0),
                        0.9,
                        Utc::now(),
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        store.save().unwrap();
    }
    let store = StateStore::load(&path, 0.0).unwrap();

    let market = MockMarketData::new().with_price("BTC", 50000.0);
    let oracle = MockOracle::new().with_decisions(vec![decision("BTC", Side::Long, 400.0, 10)]);
    let exchange = Arc::new(MockExchange::new().with_fill_price("BTC", 50000.0));

    let ctl = controller(market, oracle, exchange.clone(), store, MockEligibility::allowing_all());
    let outcome = ctl.tick().await.unwrap();

    assert_eq!(outcome.executed, 0);
    // Nothing may have been sent to the exchange for BTC
    assert!(!exchange
        .calls()
        .iter()
        .any(|c| matches!(c, ExchangeCall::Order(s, _, _) if s == "BTC")));
}

#[tokio::test]
async fn crash_recovery_reconciles_before_trading() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    // Process one: opens a position, then dies without closing it
    {
        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(
                Position::new(
                    "BTC".to_string(),
                    Side::Long,
                    50000.0,
                    0.01,
                    10,
                    Some(48000.0),
                    Some(55000.0),
                    0.9,
                    Utc::now(),
                )
                .unwrap(),
            )
            .unwrap();
        store.save().unwrap();
    }

    // Process two: loads the same file and must still see the position
    let store = StateStore::load(&path, 0.0).unwrap();
    assert!(store.state().account.position("BTC").is_some());

    // The exchange still holds it live; reconciliation keeps it
    let exchange = Arc::new(
        MockExchange::new()
            .with_fill_price("BTC", 50000.0)
            .with_live_position(LivePosition {
                symbol: "BTC".to_string(),
                side: Side::Long,
                size: 0.01,
                entry_price: 50000.0,
                leverage: 10,
                unrealized_pnl: 0.0,
            }),
    );

    let ctl = controller(
        MockMarketData::new().with_price("BTC", 50000.0),
        MockOracle::new(),
        exchange.clone(),
        store,
        MockEligibility::allowing_all(),
    );
    ctl.reconcile_all().await.unwrap();

    assert_eq!(ctl.open_position_count().await, 1);
    // Every basket instrument was queried against the live exchange
    let fetches = exchange
        .calls()
        .iter()
        .filter(|c| matches!(c, ExchangeCall::FetchPosition(_)))
        .count();
    assert_eq!(fetches, default_basket().len());
}

#[tokio::test]
async fn opposite_side_decision_closes_then_opens() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let mut store = StateStore::load(&path, 10000.0).unwrap();
        store
            .open_position(
                Position::new(
                    "BTC".to_string(),
                    Side::Long,
                    50000.0,
                    0.01,
                    10,
                    Some(48000.0),
                    Some(55000.0),
                    0.9,
                    Utc::now(),
                )
                .unwrap(),
            )
            .unwrap();
        store.save().unwrap();
    }
    let store = StateStore::load(&path, 0.0).unwrap();

    let exchange = Arc::new(MockExchange::new().with_fill_price("BTC", 50000.0));
    // Seed the live position so the close leg has something to fill
    exchange
        .place_market_order(&btc(), Side::Long, 0.01)
        .await
        .unwrap();

    let market = MockMarketData::new().with_price("BTC", 50000.0);
    let oracle = MockOracle::new().with_decisions(vec![decision("BTC", Side::Short, 400.0, 5)]);

    let ctl = controller(market, oracle, exchange.clone(), store, MockEligibility::allowing_all());
    let outcome = ctl.tick().await.unwrap();
    assert_eq!(outcome.executed, 1);

    let calls = exchange.calls();
    let close_idx = calls
        .iter()
        .position(|c| matches!(c, ExchangeCall::Close(s) if s == "BTC"))
        .expect("flip must close the long first");
    let open_idx = calls
        .iter()
        .position(|c| matches!(c, ExchangeCall::Order(s, Side::Short, _) if s == "BTC"))
        .expect("flip must open the short after the close");
    assert!(close_idx < open_idx);

    // One round trip recorded, one short now open
    assert_eq!(ctl.open_position_count().await, 1);
}

#[tokio::test]
async fn blacklisted_instrument_never_enters_the_cycle() {
    let dir = tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json"), 10000.0).unwrap();

    let market = MockMarketData::new()
        .with_price("BTC", 50000.0)
        .with_price("DOGE", 0.1);
    let oracle = MockOracle::new();

    let ctl = controller(
        market,
        oracle,
        Arc::new(MockExchange::new()),
        store,
        MockEligibility::excluding(&["DOGE"]),
    );
    let outcome = ctl.tick().await.unwrap();

    // DOGE was filtered before collection; BTC still made it
    assert_eq!(outcome.snapshots, 1);
}

#[tokio::test]
async fn reset_then_load_yields_fresh_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut store = StateStore::load(&path, 10000.0).unwrap();
    store
        .open_position(
            Position::new(
                "BTC".to_string(),
                Side::Long,
                50000.0,
                0.01,
                10,
                Some(48000.0),
                Some(55000.0),
                0.9,
                Utc::now(),
            )
            .unwrap(),
        )
        .unwrap();
    store.close_position("BTC", 51000.0, Utc::now()).unwrap();
    store.reset(25000.0).unwrap();
    drop(store);

    let reloaded = StateStore::load(&path, 0.0).unwrap();
    assert_eq!(reloaded.state().initial_value, 25000.0);
    assert!(reloaded.state().history.is_empty());
    assert_eq!(reloaded.state().account.open_position_count(), 0);
}
