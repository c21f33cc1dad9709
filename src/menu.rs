//! Menu cache layer.
//!
//! Products and categories are fetched from the backend and mirrored into the
//! SQLite `menu_cache` table so the order screens still open when the API is
//! unreachable. Screens work with [`MenuItem`], the flattened sellable view of
//! a backend product.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, error, warn};

use crate::api::ApiClient;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Category, Product};

const CACHE_PRODUCTS: &str = "products";
const CACHE_CATEGORIES: &str = "categories";

pub const ALL_CATEGORIES: &str = "All";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl From<&Product> for MenuItem {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.name.clone(),
            price: p.selling_price,
            category: p.category_name.clone().unwrap_or_default(),
            available: p.is_available,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuSnapshot {
    pub items: Vec<MenuItem>,
    /// Backend category names, sorted.
    pub categories: Vec<String>,
    pub from_cache: bool,
}

// ---------------------------------------------------------------------------
// Cache readers
// ---------------------------------------------------------------------------

fn read_cache(db: &DbState, cache_key: &str) -> Vec<Value> {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            error!("menu cache lock failed: {e}");
            return vec![];
        }
    };

    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM menu_cache WHERE cache_key = ?1",
            params![cache_key],
            |row| row.get(0),
        )
        .ok();

    match json_str {
        Some(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Array(arr)) => arr,
            Ok(_) => {
                warn!("menu_cache[{cache_key}] is not an array, ignoring");
                vec![]
            }
            Err(e) => {
                error!("menu_cache[{cache_key}] JSON parse error: {e}");
                vec![]
            }
        },
        None => vec![],
    }
}

fn cached_version(db: &DbState, cache_key: &str) -> Option<String> {
    let conn = db.conn.lock().ok()?;
    conn.query_row(
        "SELECT version FROM menu_cache WHERE cache_key = ?1",
        params![cache_key],
        |row| row.get(0),
    )
    .ok()
    .flatten()
}

pub fn cached_products(db: &DbState) -> Vec<Product> {
    read_cache(db, CACHE_PRODUCTS)
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

pub fn cached_categories(db: &DbState) -> Vec<Category> {
    read_cache(db, CACHE_CATEGORIES)
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

fn payload_version<T: Serialize>(section: &[T]) -> String {
    let serialized = serde_json::to_string(section).unwrap_or_else(|_| "[]".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

/// Upsert one cache section. Returns false when the stored copy was current.
fn write_cache<T: Serialize>(db: &DbState, cache_key: &str, section: &[T]) -> PosResult<bool> {
    let version = payload_version(section);
    if cached_version(db, cache_key).as_deref() == Some(version.as_str()) {
        return Ok(false);
    }
    let json_str = serde_json::to_string(section)?;
    let conn = db.conn.lock().map_err(|e| PosError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO menu_cache (cache_key, data, version, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(cache_key) DO UPDATE SET
            data = excluded.data,
            version = excluded.version,
            updated_at = excluded.updated_at",
        params![cache_key, json_str, version],
    )?;
    Ok(true)
}

fn snapshot(products: &[Product], categories: &[Category], from_cache: bool) -> MenuSnapshot {
    let mut names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();
    names.sort();
    MenuSnapshot {
        items: products.iter().map(MenuItem::from).collect(),
        categories: names,
        from_cache,
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Refresh the menu from the API; serve the cached copy when that fails,
/// unless the session itself was rejected.
pub async fn load_menu(api: &ApiClient, db: &DbState) -> PosResult<MenuSnapshot> {
    match tokio::try_join!(api.fetch_products(), api.fetch_categories()) {
        Ok((products, categories)) => {
            let products_changed = write_cache(db, CACHE_PRODUCTS, &products)?;
            let categories_changed = write_cache(db, CACHE_CATEGORIES, &categories)?;
            debug!(
                products = products.len(),
                categories = categories.len(),
                products_changed,
                categories_changed,
                "menu synced"
            );
            Ok(snapshot(&products, &categories, false))
        }
        Err(e) => {
            let products = cached_products(db);
            if products.is_empty() || e.is_auth_failure() {
                return Err(e);
            }
            warn!(error = %e, "menu fetch failed, serving cached menu");
            Ok(snapshot(&products, &cached_categories(db), true))
        }
    }
}

// ---------------------------------------------------------------------------
// Browsing
// ---------------------------------------------------------------------------

/// `"All"` followed by each item category in first-seen order.
pub fn categories(items: &[MenuItem]) -> Vec<String> {
    let mut out = vec![ALL_CATEGORIES.to_string()];
    for item in items {
        if !out.iter().any(|c| c == &item.category) {
            out.push(item.category.clone());
        }
    }
    out
}

/// Category filter (skipped for `"All"` or empty) plus case-insensitive
/// name search on the trimmed query.
pub fn filter<'a>(items: &'a [MenuItem], category: &str, query: &str) -> Vec<&'a MenuItem> {
    let needle = query.trim().to_lowercase();
    items
        .iter()
        .filter(|item| category.is_empty() || category == ALL_CATEGORIES || item.category == category)
        .filter(|item| needle.is_empty() || item.name.to_lowercase().contains(&needle))
        .collect()
}
