use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse, required_id, signed_in, to_value};
use crate::admin::{self, CustomerForm};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct CustomerSavePayload {
    #[serde(default)]
    id: Option<i64>,
    #[serde(flatten)]
    form: CustomerForm,
}

pub async fn customers_list(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    to_value(state.api.fetch_customers().await?)
}

/// Customer picker on the checkout screens.
pub async fn customers_search(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let term = crate::value_str(&args, &["term", "query", "search"]).unwrap_or_default();
    if term.is_empty() {
        return Ok(json!([]));
    }
    let customers = state.api.fetch_customers().await?;
    to_value(admin::search_customers(&customers, &term))
}

pub async fn customer_save(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let payload: CustomerSavePayload = parse(args)?;
    to_value(admin::save_customer(&state.api, &user, payload.id, &payload.form).await?)
}

pub async fn customer_delete(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["customerId", "customer_id", "id"], "Customer id")?;
    state.api.delete_customer(id).await?;
    Ok(json!({ "success": true }))
}
