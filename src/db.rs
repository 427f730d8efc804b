//! SQLite persistence layer
//!
//! One connection behind a mutex; the matching tick wraps all of its writes
//! in a single transaction so a failed tick leaves no partial settlement.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::types::{Account, Order, OrderStatus, PricePoint, Side, Trade};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn init_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Game settings (initial price and account seeding)
            CREATE TABLE IF NOT EXISTS game_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                initial_price TEXT NOT NULL,
                initial_cash TEXT NOT NULL,
                initial_shares INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Order book; rows are status-transitioned, never deleted
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                filled_quantity INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Settlement records
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                buy_order_id TEXT NOT NULL,
                sell_order_id TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                settled_at TEXT NOT NULL
            );

            -- Last-traded price time series
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                price TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            -- Per-participant cash and holdings
            CREATE TABLE IF NOT EXISTS accounts (
                owner_id TEXT PRIMARY KEY,
                cash TEXT NOT NULL,
                shares INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_orders_owner ON orders(owner_id);
            CREATE INDEX IF NOT EXISTS idx_price_history_ts ON price_history(timestamp);
        "#,
        )?;

        Ok(())
    }

    /// Run `f` inside one transaction: commit on Ok, roll back on Err.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back
                Err(e)
            }
        }
    }

    // ========== Game Settings ==========

    /// Write the initial settings row once; later calls are no-ops.
    pub fn seed_settings(&self, config: &GameConfig) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM game_settings ORDER BY id DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        if existing.is_none() {
            conn.execute(
                "INSERT INTO game_settings (initial_price, initial_cash, initial_shares, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    config.initial_price.to_string(),
                    config.initial_cash.to_string(),
                    config.initial_shares,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        Ok(())
    }

    /// Configured fallback price, from the latest settings row.
    pub fn initial_price(&self) -> Result<Decimal, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: String = conn.query_row(
            "SELECT initial_price FROM game_settings ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )?;
        parse_decimal(&raw)
    }

    /// Starting cash/shares for newly created participant accounts.
    pub fn account_seed(&self) -> Result<(Decimal, i64), StoreError> {
        let conn = self.conn.lock().unwrap();
        let (cash, shares): (String, i64) = conn.query_row(
            "SELECT initial_cash, initial_shares FROM game_settings ORDER BY id DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((parse_decimal(&cash)?, shares))
    }

    // ========== Price Operations ==========

    /// Most recent traded price, if any trade has settled yet.
    pub fn latest_price(&self) -> Result<Option<Decimal>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT price FROM price_history ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|s| parse_decimal(&s)).transpose()
    }

    /// Recent price points, newest first.
    pub fn price_history(&self, limit: u32) -> Result<Vec<PricePoint>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT price, timestamp FROM price_history ORDER BY id DESC LIMIT ?1",
        )?;

        let mut points = Vec::new();
        let mut rows = stmt.query(params![limit])?;
        while let Some(row) = rows.next()? {
            points.push(PricePoint {
                price: parse_decimal(&row.get::<_, String>(0)?)?,
                timestamp: parse_timestamp(&row.get::<_, String>(1)?)?,
            });
        }
        Ok(points)
    }

    // ========== Order Operations ==========

    /// Insert one ACTIVE order. A single statement, so the row is either
    /// fully populated or absent.
    pub fn insert_order(
        &self,
        owner_id: &str,
        side: Side,
        price: Decimal,
        quantity: i64,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO orders (id, owner_id, side, price, quantity, filled_quantity, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 'ACTIVE', ?6, ?6)",
            params![id.to_string(), owner_id, side.as_str(), price.to_string(), quantity, now],
        )?;
        Ok(id)
    }

    pub fn get_order(&self, id: &Uuid) -> Result<Option<Order>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, side, price, quantity, filled_quantity, status, created_at, updated_at
             FROM orders WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_order(row)?)),
            None => Ok(None),
        }
    }

    /// Owner-cancel. Returns false if the order is absent or already
    /// terminal; terminal orders are never transitioned back.
    pub fn cancel_order(&self, id: &Uuid, owner_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE orders SET status = 'CANCELLED', updated_at = ?1
             WHERE id = ?2 AND owner_id = ?3 AND status IN ('ACTIVE', 'PARTIALLY_FILLED')",
            params![Utc::now().to_rfc3339(), id.to_string(), owner_id],
        )?;
        Ok(changed > 0)
    }

    // ========== Account Operations ==========

    /// Create the account if it does not exist yet.
    pub fn ensure_account(&self, owner_id: &str, cash: Decimal, shares: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO accounts (owner_id, cash, shares) VALUES (?1, ?2, ?3)",
            params![owner_id, cash.to_string(), shares],
        )?;
        Ok(())
    }

    pub fn account(&self, owner_id: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT owner_id, cash, shares FROM accounts WHERE owner_id = ?1")?;
        let mut rows = stmt.query(params![owner_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Account {
                owner_id: row.get(0)?,
                cash: parse_decimal(&row.get::<_, String>(1)?)?,
                shares: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    pub fn all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT owner_id, cash, shares FROM accounts")?;
        let mut accounts = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            accounts.push(Account {
                owner_id: row.get(0)?,
                cash: parse_decimal(&row.get::<_, String>(1)?)?,
                shares: row.get(2)?,
            });
        }
        Ok(accounts)
    }
}

// ========== Transaction-scoped operations ==========
//
// These take an open transaction so the matching tick can read the book and
// apply all settlement writes atomically.

/// Open orders for one side, in matching priority order: best price first
/// (highest for buys, lowest for sells), earliest creation breaking ties.
pub fn load_open_orders(tx: &Transaction, side: Side) -> Result<Vec<Order>, StoreError> {
    // Prices are stored as TEXT; CAST for numeric ordering.
    let sql = match side {
        Side::Buy => {
            "SELECT id, owner_id, side, price, quantity, filled_quantity, status, created_at, updated_at
             FROM orders WHERE side = 'BUY' AND status IN ('ACTIVE', 'PARTIALLY_FILLED')
             ORDER BY CAST(price AS REAL) DESC, created_at ASC"
        }
        Side::Sell => {
            "SELECT id, owner_id, side, price, quantity, filled_quantity, status, created_at, updated_at
             FROM orders WHERE side = 'SELL' AND status IN ('ACTIVE', 'PARTIALLY_FILLED')
             ORDER BY CAST(price AS REAL) ASC, created_at ASC"
        }
    };

    let mut stmt = tx.prepare(sql)?;
    let mut orders = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        orders.push(row_to_order(row)?);
    }
    Ok(orders)
}

pub fn load_account(tx: &Transaction, owner_id: &str) -> Result<Option<Account>, StoreError> {
    let mut stmt = tx.prepare("SELECT owner_id, cash, shares FROM accounts WHERE owner_id = ?1")?;
    let mut rows = stmt.query(params![owner_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(Account {
            owner_id: row.get(0)?,
            cash: parse_decimal(&row.get::<_, String>(1)?)?,
            shares: row.get(2)?,
        })),
        None => Ok(None),
    }
}

pub fn update_order_fill(
    tx: &Transaction,
    order_id: &Uuid,
    filled_quantity: i64,
    status: OrderStatus,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE orders SET filled_quantity = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            filled_quantity,
            status.as_str(),
            Utc::now().to_rfc3339(),
            order_id.to_string()
        ],
    )?;
    Ok(())
}

/// Apply cash and share deltas to one account.
pub fn adjust_account(
    tx: &Transaction,
    owner_id: &str,
    cash_delta: Decimal,
    shares_delta: i64,
) -> Result<(), StoreError> {
    let account = load_account(tx, owner_id)?
        .ok_or_else(|| StoreError::AccountNotFound(owner_id.to_string()))?;
    tx.execute(
        "UPDATE accounts SET cash = ?1, shares = ?2 WHERE owner_id = ?3",
        params![
            (account.cash + cash_delta).to_string(),
            account.shares + shares_delta,
            owner_id
        ],
    )?;
    Ok(())
}

pub fn insert_trade(tx: &Transaction, trade: &Trade) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO trades (id, buy_order_id, sell_order_id, price, quantity, settled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            trade.id.to_string(),
            trade.buy_order_id.to_string(),
            trade.sell_order_id.to_string(),
            trade.price.to_string(),
            trade.quantity,
            trade.settled_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn insert_price_point(
    tx: &Transaction,
    price: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO price_history (price, timestamp) VALUES (?1, ?2)",
        params![price.to_string(), timestamp.to_rfc3339()],
    )?;
    Ok(())
}

// ========== Row helpers ==========

fn row_to_order(row: &rusqlite::Row) -> Result<Order, StoreError> {
    let side_raw: String = row.get(2)?;
    let status_raw: String = row.get(6)?;
    Ok(Order {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner_id: row.get(1)?,
        side: Side::parse(&side_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown side: {side_raw}")))?,
        price: parse_decimal(&row.get::<_, String>(3)?)?,
        quantity: row.get(4)?,
        filled_quantity: row.get(5)?,
        status: OrderStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status: {status_raw}")))?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(8)?)?,
    })
}

fn parse_decimal(s: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|e| StoreError::Corrupt(format!("bad decimal {s:?}: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid {s:?}: {e}")))
}
