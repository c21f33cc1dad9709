use serde::Deserialize;
use serde_json::{json, Value};

use super::pos::{item_id, menu_item};
use super::print::schedule_bill;
use super::{lock, parse, signed_in};
use crate::checkout::{self, CounterCheckout, PaymentMethod};
use crate::models::Customer;
use crate::receipt::Bill;
use crate::{value_i64, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterCustomerPayload {
    #[serde(default, alias = "customer_name", alias = "name")]
    customer_name: String,
    #[serde(default, alias = "customer_phone", alias = "phone")]
    customer_phone: String,
    #[serde(default)]
    customer: Option<Customer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterPaymentPayload {
    #[serde(default, alias = "payment_method")]
    method: Option<PaymentMethod>,
    #[serde(default, alias = "cash_received", alias = "received")]
    cash_received: Option<Value>,
}

fn view(state: &AppState, counter: &CounterCheckout) -> Value {
    json!({
        "checkout": counter,
        "customerLabel": counter.customer_label(),
        "totals": counter.totals(state.config.counter_tax_rate),
        "itemCount": counter.cart.item_count(),
    })
}

fn edit<F>(state: &AppState, f: F) -> Result<Value, String>
where
    F: FnOnce(&mut CounterCheckout),
{
    let mut counter = lock(&state.counter)?;
    f(&mut counter);
    Ok(view(state, &counter))
}

pub fn counter_get(state: &AppState) -> Result<Value, String> {
    let counter = lock(&state.counter)?;
    Ok(view(state, &counter))
}

pub fn counter_add_item(state: &AppState, args: Value) -> Result<Value, String> {
    let item = menu_item(state, &args)?;
    edit(state, |c| c.cart.add_item(item))
}

pub fn counter_update_quantity(state: &AppState, args: Value) -> Result<Value, String> {
    let id = item_id(&args)?;
    let delta = value_i64(&args, &["delta", "change"]).ok_or("Quantity change is required")?;
    edit(state, |c| c.cart.update_quantity(&id, delta))
}

pub fn counter_remove_item(state: &AppState, args: Value) -> Result<Value, String> {
    let id = item_id(&args)?;
    edit(state, |c| c.cart.remove(&id))
}

pub fn counter_clear(state: &AppState) -> Result<Value, String> {
    edit(state, CounterCheckout::reset)
}

pub fn counter_set_customer(state: &AppState, args: Value) -> Result<Value, String> {
    let payload: CounterCustomerPayload = parse(args)?;
    edit(state, |c| {
        c.customer_name = payload.customer_name.trim().to_string();
        c.customer_phone = payload.customer_phone.trim().to_string();
        c.customer = payload.customer;
    })
}

/// "Checkout" pressed: refuse an empty cart before the payment dialog.
pub fn counter_begin_payment(state: &AppState) -> Result<Value, String> {
    let counter = lock(&state.counter)?;
    counter.begin()?;
    Ok(view(state, &counter))
}

pub fn counter_set_payment(state: &AppState, args: Value) -> Result<Value, String> {
    let payload: CounterPaymentPayload = parse(args)?;
    let received = match payload.cash_received {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let mut counter = lock(&state.counter)?;
    if payload.method.is_some() {
        counter.method = payload.method;
    }
    if let Some(r) = received {
        counter.cash_received = r;
    }
    let mut out = view(state, &counter);
    let total = counter.totals(state.config.counter_tax_rate).total;
    out["change"] = match (counter.method, checkout::parse_received(&counter.cash_received)) {
        (Some(PaymentMethod::Cash), Ok(received)) if received >= total => json!(received - total),
        _ => Value::Null,
    };
    Ok(out)
}

/// Take payment for the counter sale, print the bill, and start over.
pub async fn counter_pay(state: &AppState) -> Result<Value, String> {
    let user = signed_in(state)?;
    let mut working = lock(&state.counter)?.clone();
    let cart = working.cart.clone();
    let receipt = checkout::process_counter_payment(
        &state.api,
        &mut working,
        Some(&user),
        state.config.counter_tax_rate,
    )
    .await?;
    *lock(&state.counter)? = working;
    let bill = Bill::from_receipt(&receipt).with_notes(&cart);
    let print = schedule_bill(state, &bill);
    Ok(json!({ "receipt": receipt, "print": print }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use crate::auth::test_tokens::make_token;
    use crate::menu::MenuItem;
    use crate::test_state::app_state;

    fn stock_menu(state: &AppState) {
        *state.menu.lock().expect("menu") = vec![MenuItem {
            id: "9".into(),
            name: "Donut".into(),
            price: 100.0,
            category: "Pastry".into(),
            available: true,
        }];
    }

    #[test]
    fn empty_cart_cannot_start_payment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        let err = counter_begin_payment(&state).expect_err("empty");
        assert_eq!(err, "Cart is empty");
    }

    #[test]
    fn cash_entry_reports_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        stock_menu(&state);
        counter_add_item(&state, json!({ "itemId": "9" })).expect("add");
        counter_add_item(&state, json!({ "itemId": "9" })).expect("add");
        counter_begin_payment(&state).expect("begin");

        // 200 + 5% counter tax
        let out = counter_set_payment(&state, json!({ "method": "cash", "cashReceived": "250" }))
            .expect("payment");
        assert_eq!(out["totals"]["total"], 210.0);
        assert_eq!(out["change"], 40.0);

        let out = counter_set_payment(&state, json!({ "cashReceived": 100 })).expect("payment");
        assert_eq!(out["change"], Value::Null);
    }

    #[tokio::test]
    async fn paid_sale_resets_the_counter() {
        let invoice = json!({
            "id": 5,
            "invoice_number": "INV-0005",
            "description": "Counter - Ram",
            "total_amount": "105.00",
            "paid_amount": "105.00",
            "items": [{ "product": 9, "product_name": "Donut", "quantity": 1, "unit_price": "100.00" }]
        });
        let (base, server) = serve(vec![(201, "application/json", invoice.to_string())]).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(&base, dir.path().to_path_buf());
        stock_menu(&state);
        let exp = chrono::Utc::now().timestamp() + 3600;
        state.api.set_token(Some(make_token(&json!({
            "user_id": 2, "username": "sita", "user_type": "COUNTER", "branch_id": 1, "exp": exp
        }))));

        counter_add_item(&state, json!({ "itemId": "9" })).expect("add");
        counter_set_customer(&state, json!({ "customerName": "Ram", "customerPhone": "9800000000" }))
            .expect("customer");
        counter_set_payment(&state, json!({ "method": "qr" })).expect("payment");

        let paid = counter_pay(&state).await.expect("paid");
        assert_eq!(paid["receipt"]["method"], "qr");
        assert_eq!(counter_get(&state).expect("get")["itemCount"], 0);

        let requests = server.await.expect("server");
        assert!(requests[0].contains("\"description\":\"Counter - Ram\""));
        assert!(requests[0].contains("\"notes\":\"Phone: 9800000000\""));
    }

    #[tokio::test]
    async fn failed_sale_keeps_the_cart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        stock_menu(&state);
        let exp = chrono::Utc::now().timestamp() + 3600;
        state.api.set_token(Some(make_token(&json!({
            "user_id": 2, "username": "sita", "user_type": "COUNTER", "branch_id": 1, "exp": exp
        }))));
        counter_add_item(&state, json!({ "itemId": "9" })).expect("add");
        counter_set_payment(&state, json!({ "method": "cash", "cashReceived": "50" })).expect("set");

        let err = counter_pay(&state).await.expect_err("short");
        assert_eq!(err, "Insufficient cash received");
        assert_eq!(counter_get(&state).expect("get")["itemCount"], 1);
    }
}
