//! Carts parked per table and group.
//!
//! A waiter can leave a table mid-order; the cart is kept in `table_orders`
//! until the bill is submitted. The table screen reads these records to mark
//! tables occupied and to list their groups. Failures are logged and read as
//! "no orders" so a damaged row never blocks the floor view.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cart::Cart;
use crate::db::DbState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableOrder {
    pub table_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub cart: Cart,
    /// Milliseconds since the Unix epoch of the last save.
    pub timestamp: i64,
}

fn group_key(group_name: Option<&str>) -> &str {
    group_name.unwrap_or("")
}

fn row_to_order(table_number: String, group: String, cart_json: String, ts: i64) -> Option<TableOrder> {
    match serde_json::from_str::<Cart>(&cart_json) {
        Ok(cart) => Some(TableOrder {
            table_number,
            group_name: (!group.is_empty()).then_some(group),
            cart,
            timestamp: ts,
        }),
        Err(e) => {
            error!(table = %table_number, "stored cart is not valid: {e}");
            None
        }
    }
}

fn query_all(conn: &Connection) -> rusqlite::Result<Vec<TableOrder>> {
    let mut stmt = conn.prepare(
        "SELECT table_number, group_name, cart, updated_at_ms FROM table_orders
         ORDER BY updated_at_ms, rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    let mut orders = Vec::new();
    for row in rows {
        let (table, group, cart, ts) = row?;
        if let Some(order) = row_to_order(table, group, cart, ts) {
            orders.push(order);
        }
    }
    Ok(orders)
}

/// Every parked order, oldest save first.
pub fn all(db: &DbState) -> Vec<TableOrder> {
    let Ok(conn) = db.conn.lock() else {
        error!("table_orders: db lock poisoned");
        return Vec::new();
    };
    query_all(&conn).unwrap_or_else(|e| {
        error!("Error loading orders: {e}");
        Vec::new()
    })
}

pub fn get(db: &DbState, table_number: &str, group_name: Option<&str>) -> Option<TableOrder> {
    let conn = db.conn.lock().ok()?;
    conn.query_row(
        "SELECT table_number, group_name, cart, updated_at_ms FROM table_orders
         WHERE table_number = ?1 AND group_name = ?2",
        params![table_number, group_key(group_name)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        },
    )
    .ok()
    .and_then(|(t, g, c, ts)| row_to_order(t, g, c, ts))
}

/// Insert or replace the cart for (table, group), stamped with now.
pub fn save(db: &DbState, table_number: &str, group_name: Option<&str>, cart: &Cart) {
    let cart_json = match serde_json::to_string(cart) {
        Ok(s) => s,
        Err(e) => {
            error!("Error saving order: {e}");
            return;
        }
    };
    let Ok(conn) = db.conn.lock() else {
        error!("table_orders: db lock poisoned");
        return;
    };
    let result = conn.execute(
        "INSERT INTO table_orders (table_number, group_name, cart, updated_at_ms)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(table_number, group_name) DO UPDATE SET
            cart = excluded.cart,
            updated_at_ms = excluded.updated_at_ms",
        params![
            table_number,
            group_key(group_name),
            cart_json,
            Utc::now().timestamp_millis()
        ],
    );
    match result {
        Ok(_) => debug!(table = table_number, group = ?group_name, "table order saved"),
        Err(e) => error!("Error saving order: {e}"),
    }
}

pub fn clear(db: &DbState, table_number: &str, group_name: Option<&str>) {
    let Ok(conn) = db.conn.lock() else {
        error!("table_orders: db lock poisoned");
        return;
    };
    if let Err(e) = conn.execute(
        "DELETE FROM table_orders WHERE table_number = ?1 AND group_name = ?2",
        params![table_number, group_key(group_name)],
    ) {
        error!("Error clearing order: {e}");
    }
}

pub fn clear_all(db: &DbState) {
    let Ok(conn) = db.conn.lock() else {
        error!("table_orders: db lock poisoned");
        return;
    };
    if let Err(e) = conn.execute("DELETE FROM table_orders", []) {
        error!("Error clearing all orders: {e}");
    }
}
