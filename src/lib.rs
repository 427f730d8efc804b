//! Single-stock exchange simulation
//!
//! NPC traders generate synthetic order flow against a shared order book;
//! a periodic matching engine clears the book with price-time priority and
//! settles balances atomically.

pub mod config;
pub mod db;
pub mod manager;
pub mod matching;
pub mod npc;
pub mod types;

pub use config::{GameConfig, ManagerConfig, MatchingConfig, NpcConfig};
pub use db::{Database, StoreError};
pub use manager::{ManagerError, NpcManager};
pub use matching::{MatchingEngine, TickSummary};
pub use npc::{Npc, NpcHandle};
pub use types::{Account, Order, OrderStatus, PricePoint, Side, Trade};
