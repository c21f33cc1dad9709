//! Floor plan for the waiter screen.
//!
//! The backend only knows floors and how many tables each has. Table cards
//! are numbered `1..=table_count` locally and marked occupied from the carts
//! parked in `table_orders`; every distinct group name on a table becomes a
//! selectable group.

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::auth::CurrentUser;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::Floor;
use crate::storage;
use crate::table_orders::TableOrder;

pub const DEFAULT_GROUP: &str = "Group A";
const FLOOR_PICKER_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Available,
    Occupied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCard {
    pub number: u32,
    pub floor_id: i64,
    pub status: TableStatus,
    pub groups: Vec<TableGroup>,
}

/// Build the table cards of `floor` from the parked orders.
pub fn materialize_tables(floor: &Floor, active_orders: &[TableOrder]) -> Vec<TableCard> {
    let count = u32::try_from(floor.table_count.max(0)).unwrap_or(0);
    (1..=count)
        .map(|number| {
            let key = number.to_string();
            let table_orders: Vec<&TableOrder> = active_orders
                .iter()
                .filter(|o| o.table_number == key)
                .collect();

            let mut groups: Vec<TableGroup> = Vec::new();
            for order in &table_orders {
                let name = order
                    .group_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string());
                if !groups.iter().any(|g| g.name == name) {
                    groups.push(TableGroup {
                        id: format!("local-{number}-{name}"),
                        name,
                    });
                }
            }

            let occupied = !table_orders.is_empty();
            if occupied && groups.is_empty() {
                groups.push(TableGroup {
                    id: format!("default-{number}-A"),
                    name: DEFAULT_GROUP.to_string(),
                });
            }

            TableCard {
                number,
                floor_id: floor.id,
                status: if occupied {
                    TableStatus::Occupied
                } else {
                    TableStatus::Available
                },
                groups,
            }
        })
        .collect()
}

/// What tapping a table card leads to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TableSelection {
    OpenOrder {
        table_number: u32,
        group_name: String,
    },
    ChooseGroup {
        table_number: u32,
        groups: Vec<TableGroup>,
    },
}

pub fn select_table(card: &TableCard) -> TableSelection {
    match card.status {
        TableStatus::Available => TableSelection::OpenOrder {
            table_number: card.number,
            group_name: DEFAULT_GROUP.to_string(),
        },
        TableStatus::Occupied => TableSelection::ChooseGroup {
            table_number: card.number,
            groups: card.groups.clone(),
        },
    }
}

/// Open a new group on an occupied table.
pub fn create_group(table_number: u32, name: &str) -> PosResult<TableSelection> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::validation("Group name is required"));
    }
    Ok(TableSelection::OpenOrder {
        table_number,
        group_name: name.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Floors
// ---------------------------------------------------------------------------

/// Empty search shows the first ten floors; otherwise a name match.
pub fn filter_floors<'a>(floors: &'a [Floor], term: &str) -> Vec<&'a Floor> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return floors.iter().take(FLOOR_PICKER_LIMIT).collect();
    }
    floors
        .iter()
        .filter(|f| f.name.to_lowercase().contains(&needle))
        .collect()
}

pub fn validate_new_floor(name: &str, table_count: i64) -> PosResult<()> {
    if name.trim().is_empty() {
        return Err(PosError::validation("Floor name is required"));
    }
    if table_count < 1 {
        return Err(PosError::validation("Table count must be at least 1"));
    }
    Ok(())
}

/// Create a floor in the signed-in user's branch and select it.
pub async fn create_floor(
    api: &ApiClient,
    db: &DbState,
    user: &CurrentUser,
    name: &str,
    table_count: i64,
) -> PosResult<Floor> {
    validate_new_floor(name, table_count)?;
    let payload = json!({
        "name": name.trim(),
        "table_count": table_count,
        "branch": user.branch_id,
    });
    let floor = api.create_floor(&payload).await?;
    info!(floor_id = floor.id, name = %floor.name, "floor created");
    set_selected_floor(db, Some(floor.id));
    Ok(floor)
}

pub fn selected_floor(db: &DbState) -> Option<i64> {
    storage::get_session_value(db, storage::SESSION_SELECTED_FLOOR)?
        .trim()
        .parse()
        .ok()
}

pub fn set_selected_floor(db: &DbState, floor_id: Option<i64>) {
    let result = match floor_id {
        Some(id) => storage::set_session_value(db, storage::SESSION_SELECTED_FLOOR, &id.to_string()),
        None => storage::remove_session_value(db, storage::SESSION_SELECTED_FLOOR),
    };
    if let Err(e) = result {
        warn!(error = %e, "failed to persist selected floor");
    }
}

/// The stored floor when it still exists, else the first floor.
pub fn resolve_floor<'a>(floors: &'a [Floor], selected: Option<i64>) -> Option<&'a Floor> {
    selected
        .and_then(|id| floors.iter().find(|f| f.id == id))
        .or_else(|| floors.first())
}
