//! Matching engine - periodic price-time priority clearing
//!
//! One tick loads the open book, crosses it and applies settlement inside a
//! single store transaction. A failed tick rolls back completely and is
//! retried on the next interval; only cancellation ends the loop.

use chrono::Utc;
use rusqlite::Transaction;
use rust_decimal::Decimal;
use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::db::{self, Database, StoreError};
use crate::types::{Order, OrderStatus, Side, Trade};

/// Outcome of one matching tick
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub trades: u32,
    pub volume: i64,
    pub last_price: Option<Decimal>,
    /// Pairings skipped for insufficient cash or shares
    pub skipped: u32,
}

pub struct MatchingEngine {
    db: Arc<Database>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(db: Arc<Database>, config: MatchingConfig) -> Self {
        Self { db, config }
    }

    /// Run the perpetual matching loop until cancelled. Ticks are strictly
    /// sequential: the next tick cannot start before this one returns.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "📈 Matching engine starting (interval: {}s)",
            self.config.tick_interval_secs
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("📈 Matching engine stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.match_orders() {
                        Ok(summary) if summary.trades > 0 => {
                            info!(
                                "📈 Tick settled {} trades, volume {}, last price {}",
                                summary.trades,
                                summary.volume,
                                summary.last_price.unwrap_or_default()
                            );
                        }
                        Ok(_) => {}
                        // Rolled back; the book is untouched, retry next tick
                        Err(e) => warn!("matching tick failed: {}", e),
                    }
                }
            }
        }
    }

    /// One matching tick: all-or-nothing.
    pub fn match_orders(&self) -> Result<TickSummary, StoreError> {
        self.db.transaction(clear_book)
    }
}

/// Cross the open book with price-time priority and settle every match.
fn clear_book(tx: &Transaction) -> Result<TickSummary, StoreError> {
    let mut buys = db::load_open_orders(tx, Side::Buy)?;
    let mut sells = db::load_open_orders(tx, Side::Sell)?;

    let mut summary = TickSummary::default();
    let mut bi = 0;
    let mut si = 0;

    while bi < buys.len() && si < sells.len() {
        if buys[bi].price < sells[si].price {
            // Best bid below best ask: nothing else can cross
            break;
        }

        // The earlier-placed resting order sets the execution price
        let price = if buys[bi].created_at <= sells[si].created_at {
            buys[bi].price
        } else {
            sells[si].price
        };
        let quantity = min(buys[bi].remaining(), sells[si].remaining());
        let cost = price * Decimal::from(quantity);

        // Under-funded orders are skipped for the rest of this tick,
        // never partially executed beyond their balance
        match funds_check(tx, &buys[bi], &sells[si], cost, quantity)? {
            FundsCheck::BuyerShort => {
                warn!(
                    "skipping buy order {} ({}): insufficient cash for {} @ {}",
                    buys[bi].id, buys[bi].owner_id, quantity, price
                );
                summary.skipped += 1;
                bi += 1;
                continue;
            }
            FundsCheck::SellerShort => {
                warn!(
                    "skipping sell order {} ({}): insufficient shares for {}",
                    sells[si].id, sells[si].owner_id, quantity
                );
                summary.skipped += 1;
                si += 1;
                continue;
            }
            FundsCheck::Ok => {}
        }

        settle(tx, &mut buys[bi], &mut sells[si], price, quantity, cost)?;

        summary.trades += 1;
        summary.volume += quantity;
        summary.last_price = Some(price);

        if buys[bi].remaining() == 0 {
            bi += 1;
        }
        if sells[si].remaining() == 0 {
            si += 1;
        }
    }

    Ok(summary)
}

enum FundsCheck {
    Ok,
    BuyerShort,
    SellerShort,
}

/// Balances are read inside the transaction, so earlier settlements in this
/// tick are already reflected.
fn funds_check(
    tx: &Transaction,
    buy: &Order,
    sell: &Order,
    cost: Decimal,
    quantity: i64,
) -> Result<FundsCheck, StoreError> {
    let buyer = db::load_account(tx, &buy.owner_id)?;
    match buyer {
        Some(account) if account.cash >= cost => {}
        _ => return Ok(FundsCheck::BuyerShort),
    }

    let seller = db::load_account(tx, &sell.owner_id)?;
    match seller {
        Some(account) if account.shares >= quantity => {}
        _ => return Ok(FundsCheck::SellerShort),
    }

    Ok(FundsCheck::Ok)
}

/// Apply one matched pairing: move cash and shares, update both orders,
/// record the trade and the new market price.
fn settle(
    tx: &Transaction,
    buy: &mut Order,
    sell: &mut Order,
    price: Decimal,
    quantity: i64,
    cost: Decimal,
) -> Result<(), StoreError> {
    db::adjust_account(tx, &buy.owner_id, -cost, quantity)?;
    db::adjust_account(tx, &sell.owner_id, cost, -quantity)?;

    buy.filled_quantity += quantity;
    buy.status = fill_status(buy);
    db::update_order_fill(tx, &buy.id, buy.filled_quantity, buy.status)?;

    sell.filled_quantity += quantity;
    sell.status = fill_status(sell);
    db::update_order_fill(tx, &sell.id, sell.filled_quantity, sell.status)?;

    let settled_at = Utc::now();
    db::insert_trade(
        tx,
        &Trade {
            id: Uuid::new_v4(),
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            price,
            quantity,
            settled_at,
        },
    )?;
    db::insert_price_point(tx, price, settled_at)?;
    Ok(())
}

fn fill_status(order: &Order) -> OrderStatus {
    if order.remaining() == 0 {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    }
}
