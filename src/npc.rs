//! NPC trader - generates synthetic order flow on a fixed interval

use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::NpcConfig;
use crate::db::{Database, StoreError};
use crate::types::Side;

/// A running NPC. `stop()` is a signal, safe to call any number of times;
/// `join()` waits for the loop to exit (bounded by one tick interval).
pub struct NpcHandle {
    id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NpcHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("NPC {} task join failed: {}", self.id, e);
        }
    }
}

/// One simulated trader
pub struct Npc {
    id: String,
    db: Arc<Database>,
    config: NpcConfig,
}

impl Npc {
    /// Spawn the NPC loop as a background task.
    pub fn spawn(id: impl Into<String>, db: Arc<Database>, config: NpcConfig) -> NpcHandle {
        let id = id.into();
        let cancel = CancellationToken::new();
        let npc = Npc {
            id: id.clone(),
            db,
            config,
        };

        let token = cancel.clone();
        let task = tokio::spawn(async move { npc.run(token).await });

        NpcHandle { id, cancel, task }
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(
            "🤖 NPC {} starting (interval: {}s)",
            self.id, self.config.tick_interval_secs
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs));
        // The first tick fires immediately; wait for a full interval instead
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🤖 NPC {} stopped", self.id);
                    return;
                }
                _ = ticker.tick() => {
                    // A failed tick is logged and skipped, never fatal
                    if let Err(e) = self.generate_order() {
                        warn!("NPC {} failed to generate order: {}", self.id, e);
                    }
                }
            }
        }
    }

    /// One generate-order step: quote around the latest market price and
    /// insert a single ACTIVE order.
    pub fn generate_order(&self) -> Result<(), StoreError> {
        let last_price = match self.db.latest_price()? {
            Some(price) => price,
            None => self.db.initial_price()?,
        };

        let mut rng = rand::thread_rng();
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };

        // Non-crossing market-making flow: sells above market, buys below
        let price = match side {
            Side::Sell => last_price * (Decimal::ONE + self.config.spread),
            Side::Buy => last_price * (Decimal::ONE - self.config.spread),
        };
        if price <= Decimal::ZERO {
            warn!("NPC {} skipped tick: non-positive quote {}", self.id, price);
            return Ok(());
        }

        let quantity = rng.gen_range(self.config.min_quantity..=self.config.max_quantity);

        self.db.insert_order(&self.id, side, price, quantity)?;
        info!(
            "🤖 NPC {} placed {} {} @ {}",
            self.id,
            side.as_str(),
            quantity,
            price
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::db;
    use rust_decimal_macros::dec;

    fn seeded_db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.seed_settings(&GameConfig::default()).unwrap();
        Arc::new(db)
    }

    fn npc(db: Arc<Database>) -> Npc {
        Npc {
            id: "npc-test".to_string(),
            db,
            config: NpcConfig::default(),
        }
    }

    #[test]
    fn test_generate_order_quotes_around_initial_price() {
        let store = seeded_db();
        let npc = npc(store.clone());

        for _ in 0..10 {
            npc.generate_order().unwrap();
        }

        let buys = store
            .transaction(|tx| db::load_open_orders(tx, Side::Buy))
            .unwrap();
        let sells = store
            .transaction(|tx| db::load_open_orders(tx, Side::Sell))
            .unwrap();
        assert_eq!(buys.len() + sells.len(), 10);

        // Initial price 100, spread 5%
        for order in &buys {
            assert_eq!(order.price, dec!(95));
        }
        for order in &sells {
            assert_eq!(order.price, dec!(105.00));
        }
        for order in buys.iter().chain(sells.iter()) {
            assert_eq!(order.owner_id, "npc-test");
            assert!(order.quantity >= 10_000 && order.quantity <= 50_000);
        }
    }

    #[test]
    fn test_generate_order_anchors_to_latest_trade() {
        let store = seeded_db();
        store
            .transaction(|tx| db::insert_price_point(tx, dec!(200), chrono::Utc::now()))
            .unwrap();
        let npc = npc(store.clone());
        npc.generate_order().unwrap();

        let buys = store
            .transaction(|tx| db::load_open_orders(tx, Side::Buy))
            .unwrap();
        let sells = store
            .transaction(|tx| db::load_open_orders(tx, Side::Sell))
            .unwrap();
        let order = buys.first().or(sells.first()).unwrap();
        assert!(order.price == dec!(190.00) || order.price == dec!(210.00));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_join_completes() {
        let store = seeded_db();
        let handle = Npc::spawn("npc-1", store, NpcConfig::default());

        handle.stop();
        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_places_orders_until_cancelled() {
        let store = seeded_db();
        let handle = Npc::spawn("npc-1", store.clone(), NpcConfig::default());

        // Three full tick intervals
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop();
        handle.join().await;

        let buys = store
            .transaction(|tx| db::load_open_orders(tx, Side::Buy))
            .unwrap();
        let sells = store
            .transaction(|tx| db::load_open_orders(tx, Side::Sell))
            .unwrap();
        assert_eq!(buys.len() + sells.len(), 3);
    }
}
