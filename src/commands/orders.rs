use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse, required_id, signed_in, to_value};
use crate::kitchen::Bucket;
use crate::{orders, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPayload {
    #[serde(default, alias = "search", alias = "q")]
    query: String,
    #[serde(default)]
    status: Option<String>,
}

pub async fn orders_search(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let payload: SearchPayload = parse(args)?;
    let status = match payload.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(s) => Some(Bucket::parse(s).ok_or_else(|| format!("Unknown status filter: {s}"))?),
    };
    let invoices = state.api.fetch_invoices().await?;
    to_value(orders::search_orders(&invoices, &payload.query, status))
}

/// Waiter "My Orders": `mine` limits the list to the signed-in waiter.
pub async fn orders_waiter_status(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let mine = crate::value_bool(&args, &["mine", "onlyMine"]).unwrap_or(true);
    let invoices = state.api.fetch_invoices().await?;
    let waiter = mine.then_some(user.username.as_str());
    to_value(orders::waiter_status(&invoices, waiter))
}

pub async fn order_get(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["invoiceId", "invoice_id", "id"], "Invoice id")?;
    to_value(state.api.fetch_invoice(id).await?)
}

pub async fn order_delete(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let id = required_id(&args, &["invoiceId", "invoice_id", "id"], "Invoice id")?;
    state.api.delete_invoice(id).await?;
    info!(invoice_id = id, by = %user.username, "invoice deleted");
    Ok(json!({ "success": true }))
}
