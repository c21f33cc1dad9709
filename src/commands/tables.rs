use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse, signed_in, to_value};
use crate::models::Floor;
use crate::{table_orders, tables, value_i64, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FloorSearchPayload {
    #[serde(default, alias = "query", alias = "term")]
    search: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FloorCreatePayload {
    #[serde(default)]
    name: String,
    #[serde(default, alias = "table_count", alias = "tables")]
    table_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupPayload {
    #[serde(alias = "table_number", alias = "table")]
    table_number: u32,
    #[serde(default, alias = "group_name", alias = "groupName")]
    name: String,
}

/// Floors of the signed-in user's branch, plus the one to show first.
pub async fn floors_list(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let payload: FloorSearchPayload = parse(args)?;
    let floors = state.api.fetch_floors().await?;
    let selected = tables::resolve_floor(&floors, tables::selected_floor(&state.db)).map(|f| f.id);
    Ok(json!({
        "floors": tables::filter_floors(&floors, &payload.search),
        "selectedFloorId": selected,
    }))
}

pub fn floor_select(state: &AppState, args: Value) -> Result<Value, String> {
    let floor_id = value_i64(&args, &["floorId", "floor_id", "id"]);
    tables::set_selected_floor(&state.db, floor_id);
    Ok(json!({ "selectedFloorId": floor_id }))
}

pub async fn floor_create(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let payload: FloorCreatePayload = parse(args)?;
    let floor =
        tables::create_floor(&state.api, &state.db, &user, &payload.name, payload.table_count)
            .await?;
    to_value(floor)
}

async fn load_floor(state: &AppState, args: &Value) -> Result<Option<Floor>, String> {
    signed_in(state)?;
    let floors = state.api.fetch_floors().await?;
    let wanted = value_i64(args, &["floorId", "floor_id"]).or_else(|| tables::selected_floor(&state.db));
    Ok(tables::resolve_floor(&floors, wanted).cloned())
}

/// Table cards of the requested (or remembered) floor.
pub async fn tables_list(state: &AppState, args: Value) -> Result<Value, String> {
    let Some(floor) = load_floor(state, &args).await? else {
        return Ok(json!({ "floor": Value::Null, "tables": [] }));
    };
    let cards = tables::materialize_tables(&floor, &table_orders::all(&state.db));
    Ok(json!({ "floor": floor, "tables": cards }))
}

/// Tap on a table card: open it directly or ask which group.
pub async fn table_select(state: &AppState, args: Value) -> Result<Value, String> {
    let number = value_i64(&args, &["tableNumber", "table_number", "table"])
        .and_then(|n| u32::try_from(n).ok())
        .ok_or("Table number is required")?;
    let floor = load_floor(state, &args).await?.ok_or("No floor selected")?;
    let cards = tables::materialize_tables(&floor, &table_orders::all(&state.db));
    let card = cards
        .iter()
        .find(|c| c.number == number)
        .ok_or_else(|| format!("Table {number} is not on {}", floor.name))?;
    to_value(tables::select_table(card))
}

pub fn table_create_group(args: Value) -> Result<Value, String> {
    let payload: GroupPayload = parse(args)?;
    to_value(tables::create_group(payload.table_number, &payload.name)?)
}

pub fn table_orders_list(state: &AppState) -> Result<Value, String> {
    to_value(table_orders::all(&state.db))
}

pub fn table_orders_clear_all(state: &AppState) -> Result<Value, String> {
    table_orders::clear_all(&state.db);
    Ok(json!({ "success": true }))
}
