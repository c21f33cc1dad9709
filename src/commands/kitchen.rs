use serde_json::Value;

use super::{required_id, signed_in, to_value};
use crate::{kitchen, AppState};

const INVOICE_ID_KEYS: &[&str] = &["invoiceId", "invoice_id", "id"];

pub async fn kitchen_board(state: &AppState) -> Result<Value, String> {
    signed_in(state)?;
    let invoices = state.api.fetch_invoices().await?;
    to_value(kitchen::board(&invoices))
}

/// Move a ticket to the next column and return the refreshed board.
pub async fn kitchen_advance(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, INVOICE_ID_KEYS, "Invoice id")?;
    let invoice = state.api.fetch_invoice(id).await?;
    kitchen::advance(&state.api, &invoice).await?;
    kitchen_board(state).await
}

pub async fn kitchen_undo(state: &AppState, args: Value) -> Result<Value, String> {
    signed_in(state)?;
    let id = required_id(&args, INVOICE_ID_KEYS, "Invoice id")?;
    let invoice = state.api.fetch_invoice(id).await?;
    kitchen::undo_completion(&state.api, &invoice).await?;
    kitchen_board(state).await
}
