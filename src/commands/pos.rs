//! Waiter order screen: one table (and group) is open at a time. Every cart
//! edit is parked in `table_orders` so the table stays occupied if the
//! waiter walks away.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::print::schedule_bill;
use super::{lock, parse, signed_in, to_value};
use crate::cart::{TaxSetting, MAX_LINE_QUANTITY, TAX_PRESETS};
use crate::checkout::{self, ConfirmOutcome, PaymentMethod, PaymentTiming, WaiterCheckout};
use crate::menu::MenuItem;
use crate::models::Customer;
use crate::receipt::Bill;
use crate::tables::DEFAULT_GROUP;
use crate::{table_orders, value_f64, value_i64, value_str, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenTablePayload {
    #[serde(alias = "table_number", alias = "table", deserialize_with = "de_table")]
    table_number: String,
    #[serde(default, alias = "group_name", alias = "group")]
    group_name: Option<String>,
    #[serde(default, alias = "floor_id", deserialize_with = "de_opt_table")]
    floor_id: Option<String>,
}

fn de_table<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("Table number is required")),
    }
}

fn de_opt_table<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsPayload {
    #[serde(default, alias = "tax_enabled")]
    tax_enabled: Option<bool>,
    #[serde(default, alias = "tax_rate")]
    tax_rate: Option<f64>,
    #[serde(default, alias = "discount_percent", alias = "discount")]
    discount_percent: Option<f64>,
    #[serde(default, alias = "special_instructions", alias = "notes")]
    special_instructions: Option<String>,
    #[serde(default)]
    timing: Option<PaymentTiming>,
    #[serde(default, alias = "payment_method")]
    method: Option<PaymentMethod>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn view(checkout: &WaiterCheckout) -> Value {
    json!({
        "checkout": checkout,
        "description": checkout.description(),
        "totals": checkout.totals(),
        "itemCount": checkout.cart.item_count(),
        "taxPresets": TAX_PRESETS,
    })
}

fn persist(state: &AppState, checkout: &WaiterCheckout) {
    let group = checkout.group_name.as_deref();
    if checkout.cart.is_empty() {
        table_orders::clear(&state.db, &checkout.table_number, group);
    } else {
        table_orders::save(&state.db, &checkout.table_number, group, &checkout.cart);
    }
}

/// Apply `edit` to the open order, park the cart, and return the new view.
fn edit_open<F>(state: &AppState, edit: F) -> Result<Value, String>
where
    F: FnOnce(&mut WaiterCheckout) -> Result<(), String>,
{
    let mut waiter = lock(&state.waiter)?;
    let checkout = waiter.as_mut().ok_or("No table is open")?;
    edit(checkout)?;
    persist(state, checkout);
    Ok(view(checkout))
}

/// Menu item named by `itemId`; unavailable items cannot be sold.
pub(crate) fn menu_item(state: &AppState, args: &Value) -> Result<MenuItem, String> {
    let id = item_id(args)?;
    let menu = lock(&state.menu)?;
    let item = menu
        .iter()
        .find(|m| m.id == id)
        .cloned()
        .ok_or_else(|| format!("Item {id} is not on the menu"))?;
    if !item.available {
        return Err(format!("{} is not available", item.name));
    }
    Ok(item)
}

pub(crate) fn item_id(args: &Value) -> Result<String, String> {
    value_str(args, &["itemId", "item_id", "id"])
        .or_else(|| value_i64(args, &["itemId", "item_id", "id"]).map(|n| n.to_string()))
        .ok_or_else(|| "Item id is required".to_string())
}

fn open_clone(state: &AppState) -> Result<WaiterCheckout, String> {
    lock(&state.waiter)?
        .clone()
        .ok_or_else(|| "No table is open".to_string())
}

// ---------------------------------------------------------------------------
// Table session
// ---------------------------------------------------------------------------

/// Open a table/group, restoring a parked cart when there is one.
pub fn pos_open_table(state: &AppState, args: Value) -> Result<Value, String> {
    let payload: OpenTablePayload = parse(args)?;
    let group = payload
        .group_name
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());
    let cart = table_orders::get(&state.db, &payload.table_number, Some(&group))
        .map(|o| o.cart)
        .unwrap_or_default();
    let checkout = WaiterCheckout::new(
        &payload.table_number,
        Some(&group),
        payload.floor_id.as_deref(),
        cart,
    );
    info!(table = %checkout.table_number, group = %group, "table opened");
    let out = view(&checkout);
    *lock(&state.waiter)? = Some(checkout);
    Ok(out)
}

pub fn pos_get(state: &AppState) -> Result<Value, String> {
    Ok(lock(&state.waiter)?.as_ref().map(view).unwrap_or(Value::Null))
}

/// Leave the table; its cart stays parked.
pub fn pos_close(state: &AppState) -> Result<Value, String> {
    *lock(&state.waiter)? = None;
    Ok(json!({ "closed": true }))
}

// ---------------------------------------------------------------------------
// Cart edits
// ---------------------------------------------------------------------------

pub fn pos_add_item(state: &AppState, args: Value) -> Result<Value, String> {
    let item = menu_item(state, &args)?;
    edit_open(state, |c| {
        c.cart.add_item(item);
        Ok(())
    })
}

pub fn pos_update_quantity(state: &AppState, args: Value) -> Result<Value, String> {
    let id = item_id(&args)?;
    let delta = value_i64(&args, &["delta", "change"]).ok_or("Quantity change is required")?;
    edit_open(state, |c| {
        c.cart.update_quantity(&id, delta);
        Ok(())
    })
}

pub fn pos_set_quantity(state: &AppState, args: Value) -> Result<Value, String> {
    let quantity = value_i64(&args, &["quantity", "qty"])
        .and_then(|q| u32::try_from(q).ok())
        .ok_or("Quantity must be zero or more")?;
    if quantity > MAX_LINE_QUANTITY {
        return Err(format!("Quantity cannot exceed {MAX_LINE_QUANTITY}"));
    }
    if quantity == 0 {
        return pos_remove_item(state, args);
    }
    let item = menu_item(state, &args)?;
    edit_open(state, |c| {
        c.cart.set_quantity(item, quantity);
        Ok(())
    })
}

pub fn pos_remove_item(state: &AppState, args: Value) -> Result<Value, String> {
    let id = item_id(&args)?;
    edit_open(state, |c| {
        c.cart.remove(&id);
        Ok(())
    })
}

pub fn pos_set_note(state: &AppState, args: Value) -> Result<Value, String> {
    let id = item_id(&args)?;
    let note = value_str(&args, &["note", "notes"]).unwrap_or_default();
    edit_open(state, |c| {
        c.cart.set_note(&id, &note);
        Ok(())
    })
}

pub fn pos_clear(state: &AppState) -> Result<Value, String> {
    edit_open(state, |c| {
        c.cart.clear();
        Ok(())
    })
}

pub fn pos_set_customer(state: &AppState, args: Value) -> Result<Value, String> {
    let raw = args.get("customer").cloned().unwrap_or(args);
    let customer: Option<Customer> = if raw.is_null() || raw == json!({}) {
        None
    } else {
        Some(serde_json::from_value(raw).map_err(|e| format!("Invalid customer: {e}"))?)
    };
    edit_open(state, |c| {
        c.customer = customer;
        Ok(())
    })
}

pub fn pos_set_options(state: &AppState, args: Value) -> Result<Value, String> {
    let payload: OptionsPayload = parse(args)?;
    if let Some(d) = payload.discount_percent {
        if !(0.0..=100.0).contains(&d) {
            return Err("Discount must be between 0 and 100".into());
        }
    }
    if let Some(r) = payload.tax_rate {
        if !r.is_finite() || r < 0.0 {
            return Err("Tax rate cannot be negative".into());
        }
    }
    edit_open(state, |c| {
        c.tax = TaxSetting {
            enabled: payload.tax_enabled.unwrap_or(c.tax.enabled),
            rate: payload.tax_rate.unwrap_or(c.tax.rate),
        };
        if let Some(d) = payload.discount_percent {
            c.discount_percent = d;
        }
        if let Some(s) = payload.special_instructions {
            c.special_instructions = s.trim().to_string();
        }
        if let Some(t) = payload.timing {
            c.timing = Some(t);
            if t == PaymentTiming::Later {
                c.method = None;
            }
        }
        if payload.method.is_some() {
            c.method = payload.method;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// Confirm pressed. Pay-later orders are submitted straight away; pay-now
/// orders tell the screen which payment dialog to show.
pub async fn pos_confirm(state: &AppState) -> Result<Value, String> {
    let user = signed_in(state)?;
    let checkout = open_clone(state)?;
    let outcome = checkout::confirm_order(&state.api, &state.db, &checkout, Some(&user)).await?;
    let mut out = to_value(&outcome)?;
    if let ConfirmOutcome::Submitted { invoice } = &outcome {
        let bill = Bill::from_invoice(invoice, None, 0.0, 0.0).with_notes(&checkout.cart);
        out["print"] = schedule_bill(state, &bill);
        *lock(&state.waiter)? = None;
    }
    Ok(out)
}

pub async fn pos_pay_cash(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let received = value_str(&args, &["received", "amount", "cashReceived"])
        .or_else(|| value_f64(&args, &["received", "amount", "cashReceived"]).map(|n| n.to_string()))
        .unwrap_or_default();
    let checkout = open_clone(state)?;
    let receipt = checkout::pay_cash(&state.api, &state.db, &checkout, Some(&user), &received).await?;
    let bill = Bill::from_receipt(&receipt).with_notes(&checkout.cart);
    let print = schedule_bill(state, &bill);
    *lock(&state.waiter)? = None;
    Ok(json!({ "receipt": receipt, "print": print }))
}

pub async fn pos_pay_qr(state: &AppState) -> Result<Value, String> {
    let user = signed_in(state)?;
    let checkout = open_clone(state)?;
    let receipt = checkout::pay_qr(&state.api, &state.db, &checkout, Some(&user)).await?;
    let bill = Bill::from_receipt(&receipt).with_notes(&checkout.cart);
    let print = schedule_bill(state, &bill);
    *lock(&state.waiter)? = None;
    Ok(json!({ "receipt": receipt, "print": print }))
}
