use serde::Deserialize;
use serde_json::{json, Value};

use super::print::schedule_bill;
use super::{parse, required_id, signed_in, to_value};
use crate::checkout::{self, PaymentMethod};
use crate::orders;
use crate::receipt::Bill;
use crate::{value_f64, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectPayload {
    #[serde(alias = "payment_method")]
    method: PaymentMethod,
    #[serde(default, alias = "cashReceived", alias = "cash_received")]
    received: Option<Value>,
}

/// Bills still owing money.
pub async fn payments_pending(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    let invoices = state.api.fetch_invoices().await?;
    to_value(orders::pending_payments(&invoices))
}

/// Take payment on a pay-later bill (the whole balance unless `amount` is
/// given) and print the receipt.
pub async fn payment_collect(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let invoice_id = required_id(&args, &["invoiceId", "invoice_id", "id"], "Invoice id")?;
    let amount = value_f64(&args, &["amount"]);
    let payload: CollectPayload = parse(args)?;
    let received = match payload.received {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let invoice = state.api.fetch_invoice(invoice_id).await?;
    let receipt =
        checkout::collect_payment(&state.api, &invoice, payload.method, amount, received.as_deref())
            .await?;
    let print = schedule_bill(state, &Bill::from_receipt(&receipt));
    Ok(json!({ "receipt": receipt, "print": print }))
}
