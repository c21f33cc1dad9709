//! Checkout flows: the waiter's table bill, the counter POS sale, and
//! collecting payment on an invoice that was billed "pay later".
//!
//! Payment branching for the waiter bill:
//!
//! | timing | method | next step                                  |
//! |--------|--------|--------------------------------------------|
//! | later  | -      | submit unpaid                              |
//! | now    | cash   | ask for cash received, then submit paid    |
//! | now    | qr     | ask for QR confirmation, then submit paid  |

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::ApiClient;
use crate::auth::CurrentUser;
use crate::cart::{format_rs, Cart, TaxSetting, Totals};
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Customer, Invoice, InvoiceDraft, InvoiceDraftItem};
use crate::table_orders;

pub const WALK_IN: &str = "Walk-in";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentTiming {
    Now,
    Later,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[serde(alias = "cod")]
    Cash,
    #[serde(alias = "online")]
    Qr,
}

impl PaymentMethod {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Qr => "QR",
        }
    }
}

/// Parse the "amount received" field.
pub fn parse_received(raw: &str) -> PosResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PosError::validation("Please enter amount received"))
}

/// Change owed for `received` against `due`, or the shortfall error.
pub fn cash_change(received: f64, due: f64) -> PosResult<f64> {
    if received < due {
        return Err(PosError::validation(format!(
            "Insufficient amount. Need {} more",
            format_rs(due - received)
        )));
    }
    Ok(received - due)
}

fn draft_items(cart: &Cart) -> PosResult<Vec<InvoiceDraftItem>> {
    cart.lines()
        .iter()
        .map(|line| {
            let product = line.item.id.trim().parse::<i64>().map_err(|_| {
                PosError::validation(format!("Invalid product id: {}", line.item.id))
            })?;
            Ok(InvoiceDraftItem {
                item_type: "PRODUCT",
                product,
                quantity: line.quantity,
                unit_price: line.item.price,
                discount_amount: 0.0,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub invoice: Invoice,
    pub method: Option<PaymentMethod>,
    pub paid: f64,
    pub change: f64,
}

// ---------------------------------------------------------------------------
// Waiter checkout
// ---------------------------------------------------------------------------

/// What the confirm button leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStep {
    SubmitUnpaid,
    CollectCash,
    ConfirmQr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterCheckout {
    pub table_number: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub floor_id: Option<String>,
    pub cart: Cart,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub special_instructions: String,
    #[serde(default)]
    pub discount_percent: f64,
    #[serde(default)]
    pub tax: TaxSetting,
    #[serde(default)]
    pub timing: Option<PaymentTiming>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

impl WaiterCheckout {
    pub fn new(
        table_number: &str,
        group_name: Option<&str>,
        floor_id: Option<&str>,
        cart: Cart,
    ) -> Self {
        Self {
            table_number: table_number.to_string(),
            group_name: group_name.map(str::to_string),
            floor_id: floor_id.map(str::to_string),
            cart,
            customer: None,
            special_instructions: String::new(),
            discount_percent: 0.0,
            tax: TaxSetting::default(),
            timing: None,
            method: None,
        }
    }

    pub fn totals(&self) -> Totals {
        Totals::compute(self.cart.subtotal(), self.tax, self.discount_percent)
    }

    pub fn description(&self) -> String {
        format!(
            "Table {} - {}",
            self.table_number,
            self.group_name.as_deref().unwrap_or(WALK_IN)
        )
    }

    pub fn confirm(&self) -> PosResult<ConfirmStep> {
        match (self.timing, self.method) {
            (None, _) => Err(PosError::validation("Please select payment option")),
            (Some(PaymentTiming::Later), _) => Ok(ConfirmStep::SubmitUnpaid),
            (Some(PaymentTiming::Now), None) => {
                Err(PosError::validation("Please select payment method"))
            }
            (Some(PaymentTiming::Now), Some(PaymentMethod::Cash)) => Ok(ConfirmStep::CollectCash),
            (Some(PaymentTiming::Now), Some(PaymentMethod::Qr)) => Ok(ConfirmStep::ConfirmQr),
        }
    }

    pub fn draft(
        &self,
        user: Option<&CurrentUser>,
        paid_amount: f64,
        method: Option<PaymentMethod>,
    ) -> PosResult<InvoiceDraft> {
        if self.cart.is_empty() {
            return Err(PosError::validation("Cart is empty"));
        }
        let totals = self.totals();
        Ok(InvoiceDraft {
            branch: user.and_then(|u| u.branch_id),
            customer: self.customer.as_ref().map(|c| c.id),
            invoice_type: "SALE",
            notes: self.special_instructions.clone(),
            description: self.description(),
            floor: self
                .floor_id
                .as_deref()
                .and_then(|f| f.trim().parse::<i64>().ok()),
            tax_amount: totals.tax,
            discount: totals.discount,
            paid_amount,
            payment_method: method.map(|m| m.wire_name().to_string()),
            items: draft_items(&self.cart)?,
        })
    }
}

async fn submit_waiter(
    api: &ApiClient,
    db: &DbState,
    checkout: &WaiterCheckout,
    user: Option<&CurrentUser>,
    paid_amount: f64,
    method: Option<PaymentMethod>,
) -> PosResult<Invoice> {
    let draft = checkout.draft(user, paid_amount, method)?;
    let invoice = api.create_invoice(&draft).await?;
    table_orders::clear(db, &checkout.table_number, checkout.group_name.as_deref());
    info!(
        invoice_id = invoice.id,
        table = %checkout.table_number,
        paid = paid_amount,
        "table order submitted"
    );
    Ok(invoice)
}

/// Result of pressing confirm: either the order went through unpaid, or the
/// screen must collect payment first.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Submitted { invoice: Invoice },
    CollectCash { total: f64 },
    ConfirmQr { total: f64 },
}

pub async fn confirm_order(
    api: &ApiClient,
    db: &DbState,
    checkout: &WaiterCheckout,
    user: Option<&CurrentUser>,
) -> PosResult<ConfirmOutcome> {
    let total = checkout.totals().total;
    match checkout.confirm()? {
        ConfirmStep::SubmitUnpaid => {
            let invoice = submit_waiter(api, db, checkout, user, 0.0, None).await?;
            Ok(ConfirmOutcome::Submitted { invoice })
        }
        ConfirmStep::CollectCash => Ok(ConfirmOutcome::CollectCash { total }),
        ConfirmStep::ConfirmQr => Ok(ConfirmOutcome::ConfirmQr { total }),
    }
}

pub async fn pay_cash(
    api: &ApiClient,
    db: &DbState,
    checkout: &WaiterCheckout,
    user: Option<&CurrentUser>,
    received: &str,
) -> PosResult<PaymentReceipt> {
    let received = parse_received(received)?;
    let total = checkout.totals().total;
    let change = cash_change(received, total)?;
    let invoice =
        submit_waiter(api, db, checkout, user, total, Some(PaymentMethod::Cash)).await?;
    Ok(PaymentReceipt {
        invoice,
        method: Some(PaymentMethod::Cash),
        paid: total,
        change,
    })
}

pub async fn pay_qr(
    api: &ApiClient,
    db: &DbState,
    checkout: &WaiterCheckout,
    user: Option<&CurrentUser>,
) -> PosResult<PaymentReceipt> {
    let total = checkout.totals().total;
    let invoice = submit_waiter(api, db, checkout, user, total, Some(PaymentMethod::Qr)).await?;
    Ok(PaymentReceipt {
        invoice,
        method: Some(PaymentMethod::Qr),
        paid: total,
        change: 0.0,
    })
}

// ---------------------------------------------------------------------------
// Counter POS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterCheckout {
    pub cart: Cart,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub cash_received: String,
}

impl CounterCheckout {
    pub fn totals(&self, tax_rate: f64) -> Totals {
        Totals::compute(
            self.cart.subtotal(),
            TaxSetting {
                enabled: true,
                rate: tax_rate,
            },
            0.0,
        )
    }

    pub fn customer_label(&self) -> String {
        let name = self.customer_name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
        self.customer
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| WALK_IN.to_string())
    }

    /// Gate for opening the payment dialog.
    pub fn begin(&self) -> PosResult<()> {
        if self.cart.is_empty() {
            return Err(PosError::validation("Cart is empty"));
        }
        Ok(())
    }

    /// Validate the payment step and return the change due.
    pub fn validate_payment(&self, tax_rate: f64) -> PosResult<(PaymentMethod, f64)> {
        self.begin()?;
        let method = self
            .method
            .ok_or_else(|| PosError::validation("Please select payment method"))?;
        let total = self.totals(tax_rate).total;
        let change = match method {
            PaymentMethod::Cash => {
                let received = parse_received(&self.cash_received)
                    .map_err(|_| PosError::validation("Insufficient cash received"))?;
                if received < total {
                    return Err(PosError::validation("Insufficient cash received"));
                }
                received - total
            }
            PaymentMethod::Qr => 0.0,
        };
        Ok((method, change))
    }

    pub fn draft(&self, user: Option<&CurrentUser>, tax_rate: f64) -> PosResult<InvoiceDraft> {
        let totals = self.totals(tax_rate);
        let phone = self.customer_phone.trim();
        Ok(InvoiceDraft {
            branch: user.and_then(|u| u.branch_id),
            customer: self.customer.as_ref().map(|c| c.id),
            invoice_type: "SALE",
            notes: if phone.is_empty() {
                String::new()
            } else {
                format!("Phone: {phone}")
            },
            description: format!("Counter - {}", self.customer_label()),
            floor: None,
            tax_amount: totals.tax,
            discount: 0.0,
            paid_amount: totals.total,
            payment_method: self.method.map(|m| m.wire_name().to_string()),
            items: draft_items(&self.cart)?,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Take payment for the counter sale. The checkout is reset on success.
pub async fn process_counter_payment(
    api: &ApiClient,
    checkout: &mut CounterCheckout,
    user: Option<&CurrentUser>,
    tax_rate: f64,
) -> PosResult<PaymentReceipt> {
    let (method, change) = checkout.validate_payment(tax_rate)?;
    let draft = checkout.draft(user, tax_rate)?;
    let invoice = api.create_invoice(&draft).await?;
    info!(invoice_id = invoice.id, method = method.wire_name(), "counter sale completed");
    let receipt = PaymentReceipt {
        invoice,
        method: Some(method),
        paid: draft.paid_amount,
        change,
    };
    checkout.reset();
    Ok(receipt)
}

// ---------------------------------------------------------------------------
// Payment collection
// ---------------------------------------------------------------------------

pub fn validate_collection(amount: f64, due: f64) -> PosResult<()> {
    if amount.is_nan() || amount <= 0.0 {
        return Err(PosError::validation("Payment amount must be greater than zero"));
    }
    if amount > due + 1e-9 {
        return Err(PosError::validation(format!(
            "Payment exceeds amount due ({})",
            format_rs(due)
        )));
    }
    Ok(())
}

/// Pay `amount` (the whole balance when `None`) towards `invoice`. Cash
/// needs the amount received; the change is reported back.
pub async fn collect_payment(
    api: &ApiClient,
    invoice: &Invoice,
    method: PaymentMethod,
    amount: Option<f64>,
    received: Option<&str>,
) -> PosResult<PaymentReceipt> {
    let due = invoice.due_amount;
    if due <= 0.0 {
        return Err(PosError::validation("Nothing is due on this invoice"));
    }
    let amount = amount.unwrap_or(due);
    validate_collection(amount, due)?;
    let change = match method {
        PaymentMethod::Cash => {
            let received = parse_received(received.unwrap_or_default())?;
            cash_change(received, amount)?
        }
        PaymentMethod::Qr => 0.0,
    };

    api.record_payment(invoice.id, amount, method.wire_name(), "").await?;
    let updated = api.fetch_invoice(invoice.id).await?;
    info!(invoice_id = invoice.id, amount, due, method = method.wire_name(), "payment collected");
    Ok(PaymentReceipt {
        invoice: updated,
        method: Some(method),
        paid: amount,
        change,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use crate::db;
    use crate::menu::MenuItem;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn cart() -> Cart {
        let mut cart = Cart::default();
        for (id, price) in [("3", 130.0), ("3", 130.0), ("9", 45.0)] {
            cart.add_item(MenuItem {
                id: id.into(),
                name: format!("Item {id}"),
                price,
                category: "Bakery".into(),
                available: true,
            });
        }
        cart
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: "12".into(),
            username: "rahul".into(),
            role: "WAITER".into(),
            is_superuser: false,
            is_staff: true,
            branch_id: Some(2),
            branch_name: Some("Lakeside".into()),
            is_branch_scoped: false,
        }
    }

    fn request_body(raw: &str) -> Value {
        serde_json::from_str(raw.split("\r\n\r\n").nth(1).unwrap_or_default()).expect("json body")
    }

    #[test]
    fn confirm_branches_on_timing_and_method() {
        let mut checkout = WaiterCheckout::new("4", Some("Group A"), Some("3"), cart());
        assert_eq!(
            checkout.confirm().expect_err("no timing").to_string(),
            "Please select payment option"
        );
        checkout.timing = Some(PaymentTiming::Now);
        assert_eq!(
            checkout.confirm().expect_err("no method").to_string(),
            "Please select payment method"
        );
        checkout.method = Some(PaymentMethod::Cash);
        assert_eq!(checkout.confirm().expect("cash"), ConfirmStep::CollectCash);
        checkout.method = Some(PaymentMethod::Qr);
        assert_eq!(checkout.confirm().expect("qr"), ConfirmStep::ConfirmQr);
        checkout.timing = Some(PaymentTiming::Later);
        assert_eq!(checkout.confirm().expect("later"), ConfirmStep::SubmitUnpaid);
    }

    #[test]
    fn waiter_draft_maps_cart_and_totals() {
        let mut checkout = WaiterCheckout::new("4", None, Some("3"), cart());
        checkout.tax = TaxSetting { enabled: true, rate: 10.0 };
        checkout.discount_percent = 10.0;
        let draft = checkout
            .draft(Some(&user()), 0.0, None)
            .expect("draft");
        assert_eq!(draft.description, "Table 4 - Walk-in");
        assert_eq!(draft.branch, Some(2));
        assert_eq!(draft.floor, Some(3));
        assert!((draft.tax_amount - 30.5).abs() < 1e-9);
        assert!((draft.discount - 30.5).abs() < 1e-9);
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.items[0].product, 3);
        assert_eq!(draft.items[0].quantity, 2);
        assert_eq!(draft.payment_method, None);
    }

    #[test]
    fn cash_validation_messages() {
        assert_eq!(
            parse_received("  ").expect_err("empty").to_string(),
            "Please enter amount received"
        );
        assert!(parse_received("abc").is_err());
        assert_eq!(
            cash_change(200.0, 236.25).expect_err("short").to_string(),
            "Insufficient amount. Need Rs.36.25 more"
        );
        assert!((cash_change(300.0, 236.25).expect("change") - 63.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pay_cash_submits_paid_invoice_and_clears_table() {
        let db = db::open_in_memory().expect("db");
        let checkout = WaiterCheckout::new("4", Some("Group A"), None, cart());
        table_orders::save(&db, "4", Some("Group A"), &checkout.cart);

        let (base, server) = serve(vec![(
            201,
            "application/json",
            r#"{"success":true,"data":{"id":88,"total_amount":"305.00"}}"#.to_string(),
        )])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");

        let receipt = pay_cash(&api, &db, &checkout, Some(&user()), "500")
            .await
            .expect("pay");
        assert_eq!(receipt.invoice.id, 88);
        assert!((receipt.change - 195.0).abs() < 1e-9);
        assert!(table_orders::get(&db, "4", Some("Group A")).is_none());

        let requests = server.await.expect("server");
        let body = request_body(&requests[0]);
        assert_eq!(body["payment_method"], "CASH");
        assert_eq!(body["paid_amount"], 305.0);
        assert_eq!(body["description"], "Table 4 - Group A");
    }

    #[tokio::test]
    async fn failed_submit_keeps_parked_order() {
        let db = db::open_in_memory().expect("db");
        let mut checkout = WaiterCheckout::new("6", None, None, cart());
        checkout.timing = Some(PaymentTiming::Later);
        table_orders::save(&db, "6", None, &checkout.cart);

        let (base, _server) = serve(vec![(
            400,
            "application/json",
            r#"{"success":false,"errors":{"items":["required"]}}"#.to_string(),
        )])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let err = confirm_order(&api, &db, &checkout, None).await.expect_err("rejected");
        assert!(err.to_string().contains("items"));
        assert!(table_orders::get(&db, "6", None).is_some());
    }

    #[test]
    fn counter_checkout_rules() {
        let mut counter = CounterCheckout::default();
        assert_eq!(counter.begin().expect_err("empty").to_string(), "Cart is empty");

        counter.cart = cart();
        assert_eq!(
            counter.validate_payment(5.0).expect_err("method").to_string(),
            "Please select payment method"
        );
        counter.method = Some(PaymentMethod::Cash);
        counter.cash_received = "300".into();
        assert!(counter.validate_payment(5.0).is_err());
        counter.cash_received = "400".into();
        let (_, change) = counter.validate_payment(5.0).expect("cash ok");
        assert!((change - (400.0 - 320.25)).abs() < 1e-9);

        let draft = counter.draft(None, 5.0).expect("draft");
        assert_eq!(draft.description, "Counter - Walk-in");
        assert!((draft.paid_amount - 320.25).abs() < 1e-9);

        counter.customer_name = "Sita".into();
        assert_eq!(counter.draft(None, 5.0).expect("draft").description, "Counter - Sita");

        counter.reset();
        assert!(counter.cart.is_empty());
        assert!(counter.method.is_none());
        assert!(counter.cash_received.is_empty());
    }

    #[tokio::test]
    async fn collect_payment_posts_due_amount() {
        let invoice: Invoice = serde_json::from_value(json!({
            "id": 41, "total_amount": "236.25", "due_amount": "236.25", "payment_status": "PENDING"
        }))
        .expect("invoice");
        let (base, server) = serve(vec![
            (201, "application/json", r#"{"success":true}"#.to_string()),
            (
                200,
                "application/json",
                r#"{"success":true,"data":{"id":41,"due_amount":"0.00","payment_status":"PAID"}}"#
                    .to_string(),
            ),
        ])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");

        let receipt = collect_payment(&api, &invoice, PaymentMethod::Cash, None, Some("250"))
            .await
            .expect("collect");
        assert!((receipt.change - 13.75).abs() < 1e-9);
        assert_eq!(receipt.invoice.payment_status.as_deref(), Some("PAID"));

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("POST /api/invoice/41/payments/ HTTP/1.1"));
        let body = request_body(&requests[0]);
        assert_eq!(body["amount"], 236.25);
        assert_eq!(body["payment_method"], "CASH");
    }

    #[tokio::test]
    async fn partial_collection_posts_the_chosen_amount() {
        let invoice: Invoice = serde_json::from_value(json!({
            "id": 42, "total_amount": "500.00", "due_amount": "500.00", "payment_status": "PENDING"
        }))
        .expect("invoice");
        let (base, server) = serve(vec![
            (201, "application/json", r#"{"success":true}"#.to_string()),
            (
                200,
                "application/json",
                r#"{"id":42,"due_amount":"300.00","payment_status":"PARTIAL"}"#.to_string(),
            ),
        ])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");

        let err = collect_payment(&api, &invoice, PaymentMethod::Qr, Some(600.0), None)
            .await
            .expect_err("over due");
        assert_eq!(err.to_string(), "Payment exceeds amount due (Rs.500.00)");

        let receipt = collect_payment(&api, &invoice, PaymentMethod::Cash, Some(200.0), Some("250"))
            .await
            .expect("partial");
        assert_eq!(receipt.paid, 200.0);
        assert!((receipt.change - 50.0).abs() < 1e-9);

        let requests = server.await.expect("server");
        assert_eq!(request_body(&requests[0])["amount"], 200.0);
    }

    #[test]
    fn collection_amount_bounds() {
        assert!(validate_collection(0.0, 10.0).is_err());
        assert!(validate_collection(10.5, 10.0).is_err());
        assert!(validate_collection(10.0, 10.0).is_ok());
    }
}
