//! Tunable simulation settings

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Game-wide settings persisted to the store at bootstrap
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Fallback market price before any trade has settled
    pub initial_price: Decimal,
    /// Starting cash for a freshly created participant account
    pub initial_cash: Decimal,
    /// Starting share holdings for a freshly created participant account
    pub initial_shares: i64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            initial_price: dec!(100),
            initial_cash: dec!(10_000_000),
            initial_shares: 100_000,
        }
    }
}

/// Per-NPC order generation settings
#[derive(Debug, Clone)]
pub struct NpcConfig {
    /// Seconds between order generation ticks
    pub tick_interval_secs: u64,
    /// Quantity range for generated orders (inclusive)
    pub min_quantity: i64,
    pub max_quantity: i64,
    /// Quote offset from market price: sells quote above, buys below
    pub spread: Decimal,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3,
            min_quantity: 10_000,
            max_quantity: 50_000,
            spread: dec!(0.05),
        }
    }
}

/// NPC manager settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Hard cap on concurrently running NPCs; further starts are rejected
    pub max_npcs: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { max_npcs: 64 }
    }
}

/// Matching engine settings
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Seconds between matching ticks
    pub tick_interval_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
        }
    }
}
