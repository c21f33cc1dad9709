//! Back-office commands. Branch managers and the superuser share these; the
//! backend decides what each role may change.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse, required_id, signed_in, to_value};
use crate::admin::{self, BranchForm, ProductForm, StockAction, UserForm};
use crate::models::Product;
use crate::{value_bool, value_i64, value_str, AppState};

#[derive(Debug, Deserialize)]
struct ProductSavePayload {
    #[serde(default)]
    id: Option<i64>,
    #[serde(flatten)]
    form: ProductForm,
}

#[derive(Debug, Deserialize)]
struct UserSavePayload {
    #[serde(default)]
    id: Option<i64>,
    #[serde(flatten)]
    form: UserForm,
}

#[derive(Debug, Deserialize)]
struct BranchSavePayload {
    #[serde(default)]
    id: Option<i64>,
    #[serde(flatten)]
    form: BranchForm,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockPayload {
    #[serde(alias = "product_id", alias = "id")]
    product_id: i64,
    action: StockAction,
    change: i64,
    #[serde(default)]
    remarks: String,
}

async fn find_product(state: &AppState, id: i64) -> Result<Product, String> {
    state
        .api
        .fetch_products()
        .await?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| format!("Product {id} not found"))
}

// ---------------------------------------------------------------------------
// Products & stock
// ---------------------------------------------------------------------------

pub async fn products_list(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    to_value(state.api.fetch_products().await?)
}

pub async fn product_save(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let payload: ProductSavePayload = parse(args)?;
    to_value(admin::save_product(&state.api, payload.id, &payload.form).await?)
}

pub async fn product_delete(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["productId", "product_id", "id"], "Product id")?;
    state.api.delete_product(id).await?;
    info!(product_id = id, "product deleted");
    Ok(json!({ "success": true }))
}

pub async fn product_set_availability(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["productId", "product_id", "id"], "Product id")?;
    let available = value_bool(&args, &["available", "isAvailable", "is_available"])
        .ok_or("Availability is required")?;
    let product = find_product(state, id).await?;
    to_value(admin::set_availability(&state.api, &product, available).await?)
}

pub async fn stock_low(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    let products = state.api.fetch_products().await?;
    to_value(admin::low_stock(&products))
}

pub async fn stock_adjust(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let payload: StockPayload = parse(args)?;
    let product = find_product(state, payload.product_id).await?;
    let quantity =
        admin::adjust_stock(&state.api, &product, payload.action, payload.change, &payload.remarks)
            .await?;
    Ok(json!({ "productId": product.id, "quantity": quantity }))
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub async fn categories_list(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    to_value(state.api.fetch_categories().await?)
}

pub async fn category_save(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let id = value_i64(&args, &["id", "categoryId"]);
    let name = value_str(&args, &["name"]).unwrap_or_default();
    let existing = state.api.fetch_categories().await?;
    admin::save_category(&state.api, &user, id, &name, &existing)
        .await
        .map_err(String::from)
}

pub async fn category_delete(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["categoryId", "category_id", "id"], "Category id")?;
    let products = state.api.fetch_products().await?;
    admin::delete_category(&state.api, id, &products).await?;
    Ok(json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Staff
// ---------------------------------------------------------------------------

pub async fn users_list(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let branch = value_i64(&args, &["branchId", "branch_id", "branch"]);
    let users = state.api.fetch_users().await?;
    to_value(admin::users_in_branch(&users, branch))
}

pub async fn user_save(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let mut payload: UserSavePayload = parse(args)?;
    let result = admin::save_user(&state.api, payload.id, &payload.form).await;
    if let Some(p) = payload.form.password.as_mut() {
        zeroize::Zeroize::zeroize(p);
    }
    to_value(result?)
}

pub async fn user_delete(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let id = required_id(&args, &["userId", "user_id", "id"], "User id")?;
    if user.id == id.to_string() {
        return Err("You cannot delete your own account".into());
    }
    state.api.delete_user(id).await?;
    Ok(json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

pub async fn branches_list(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    to_value(state.api.fetch_branches().await?)
}

pub async fn branch_save(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let payload: BranchSavePayload = parse(args)?;
    admin::save_branch(&state.api, payload.id, &payload.form)
        .await
        .map_err(String::from)
}

pub async fn branch_delete(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, &["branchId", "branch_id", "id"], "Branch id")?;
    state.api.delete_branch(id).await?;
    Ok(json!({ "success": true }))
}

/// Superuser branch picker; no id goes back to the network view. Answers
/// with the user as the screens will now see them.
pub async fn branch_switch(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let branch = match value_i64(&args, &["branchId", "branch_id", "id"]) {
        Some(id) => Some(
            state
                .api
                .fetch_branches()
                .await?
                .into_iter()
                .find(|b| b.id == id)
                .ok_or_else(|| format!("Branch {id} not found"))?,
        ),
        None => None,
    };
    admin::switch_branch(&state.db, &user, branch.as_ref())?;
    to_value(signed_in(state)?)
}
