//! End-to-end simulation tests: NPC flow, clearing and settlement invariants

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stock_sim::{
    Database, GameConfig, ManagerConfig, MatchingConfig, MatchingEngine, NpcConfig, NpcManager,
    OrderStatus, Side,
};

fn seeded_db() -> Arc<Database> {
    let db = Database::in_memory().unwrap();
    db.seed_settings(&GameConfig::default()).unwrap();
    Arc::new(db)
}

#[tokio::test(start_paused = true)]
async fn npc_flow_populates_the_book_without_crossing() {
    let db = seeded_db();
    let manager = NpcManager::new(db.clone(), NpcConfig::default(), ManagerConfig::default());
    manager.start_npc("npc-1").unwrap();
    manager.start_npc("npc-2").unwrap();

    let cancel = CancellationToken::new();
    let engine_task = {
        let engine_db = db.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            MatchingEngine::new(engine_db, MatchingConfig::default())
                .run(token)
                .await
        })
    };

    // A few NPC ticks (3s) and matching ticks (5s)
    tokio::time::sleep(Duration::from_secs(16)).await;
    manager.stop_all_and_clear().await;
    cancel.cancel();
    engine_task.await.unwrap();

    let buys = db
        .transaction(|tx| stock_sim::db::load_open_orders(tx, Side::Buy))
        .unwrap();
    let sells = db
        .transaction(|tx| stock_sim::db::load_open_orders(tx, Side::Sell))
        .unwrap();
    assert!(!buys.is_empty() || !sells.is_empty());

    // Every inserted row is fully populated and well-formed
    for order in buys.iter().chain(sells.iter()) {
        assert!(order.price > Decimal::ZERO);
        assert!(order.quantity >= 10_000 && order.quantity <= 50_000);
        assert!(order.remaining() >= 0);
        assert!(order.owner_id.starts_with("npc-"));
    }

    // Spread policy quotes buys below and sells above market: no crossing,
    // so no trade has settled and the market price is still the fallback
    assert_eq!(db.latest_price().unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn engine_settles_resting_crossed_orders() {
    let db = seeded_db();
    db.ensure_account("buyer", dec!(50_000), 0).unwrap();
    db.ensure_account("seller", dec!(0), 500).unwrap();
    db.insert_order("buyer", Side::Buy, dec!(105), 100).unwrap();
    db.insert_order("seller", Side::Sell, dec!(100), 100).unwrap();

    let cancel = CancellationToken::new();
    let engine_task = {
        let engine_db = db.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            MatchingEngine::new(engine_db, MatchingConfig::default())
                .run(token)
                .await
        })
    };

    // One matching interval
    tokio::time::sleep(Duration::from_secs(6)).await;
    cancel.cancel();
    engine_task.await.unwrap();

    assert_eq!(db.latest_price().unwrap(), Some(dec!(105)));
    assert_eq!(db.account("buyer").unwrap().unwrap().shares, 100);
    assert_eq!(db.account("seller").unwrap().unwrap().cash, dec!(10_500));
}

#[test]
fn terminal_orders_stay_terminal_across_ticks() {
    let db = seeded_db();
    db.ensure_account("buyer", dec!(50_000), 0).unwrap();
    db.ensure_account("seller", dec!(0), 500).unwrap();
    let buy = db.insert_order("buyer", Side::Buy, dec!(105), 100).unwrap();
    let sell = db.insert_order("seller", Side::Sell, dec!(100), 100).unwrap();

    let engine = MatchingEngine::new(db.clone(), MatchingConfig::default());
    engine.match_orders().unwrap();
    assert_eq!(db.get_order(&buy).unwrap().unwrap().status, OrderStatus::Filled);

    // Later ticks and a late owner-cancel leave the filled orders untouched
    engine.match_orders().unwrap();
    assert!(!db.cancel_order(&buy, "buyer").unwrap());
    assert_eq!(db.get_order(&buy).unwrap().unwrap().status, OrderStatus::Filled);
    assert_eq!(db.get_order(&sell).unwrap().unwrap().status, OrderStatus::Filled);
}

#[test]
fn price_history_is_append_only_and_ordered() {
    let db = seeded_db();
    db.ensure_account("buyer", dec!(1_000_000), 0).unwrap();
    db.ensure_account("seller", dec!(0), 1_000).unwrap();

    let engine = MatchingEngine::new(db.clone(), MatchingConfig::default());
    for price in [100u32, 110, 90] {
        let p = Decimal::from(price);
        db.insert_order("buyer", Side::Buy, p, 10).unwrap();
        db.insert_order("seller", Side::Sell, p, 10).unwrap();
        engine.match_orders().unwrap();
    }

    let history = db.price_history(10).unwrap();
    assert_eq!(history.len(), 3);
    // Newest first
    assert_eq!(history[0].price, dec!(90));
    for pair in history.windows(2) {
        assert!(pair[0].timestamp >= pair[1].timestamp);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Matching never creates or destroys cash or shares and never drives
    /// any account negative, whatever the book looks like.
    #[test]
    fn matching_conserves_value_and_balances(
        orders in prop::collection::vec(
            (0usize..4, prop::bool::ANY, 1u32..200, 1i64..500),
            1..24,
        ),
        cash_seeds in prop::collection::vec(0u32..50_000, 4),
        share_seeds in prop::collection::vec(0i64..500, 4),
    ) {
        let db = Database::in_memory().unwrap();
        db.seed_settings(&GameConfig::default()).unwrap();

        let owners = ["p0", "p1", "p2", "p3"];
        for (i, owner) in owners.iter().enumerate() {
            db.ensure_account(owner, Decimal::from(cash_seeds[i]), share_seeds[i]).unwrap();
        }
        for (owner_idx, is_buy, price, quantity) in &orders {
            let side = if *is_buy { Side::Buy } else { Side::Sell };
            db.insert_order(owners[*owner_idx], side, Decimal::from(*price), *quantity).unwrap();
        }

        let total_cash_before: Decimal = cash_seeds.iter().map(|c| Decimal::from(*c)).sum();
        let total_shares_before: i64 = share_seeds.iter().sum();

        let db = Arc::new(db);
        let engine = MatchingEngine::new(db.clone(), MatchingConfig::default());
        engine.match_orders().unwrap();
        // A second tick must also hold the invariants on the leftover book
        engine.match_orders().unwrap();

        let accounts = db.all_accounts().unwrap();
        let total_cash: Decimal = accounts.iter().map(|a| a.cash).sum();
        let total_shares: i64 = accounts.iter().map(|a| a.shares).sum();

        prop_assert_eq!(total_cash, total_cash_before);
        prop_assert_eq!(total_shares, total_shares_before);
        for account in &accounts {
            prop_assert!(account.cash >= Decimal::ZERO);
            prop_assert!(account.shares >= 0);
        }
    }
}
