use serde_json::{json, Value};

use super::{required_id, signed_in};
use crate::escpos::PaperWidth;
use crate::receipt::{self, Bill};
use crate::{value_i64, AppState};

/// Queue `bill` on the auto-printer and describe the pending job.
pub(crate) fn schedule_bill(state: &AppState, bill: &Bill) -> Value {
    let job = state.printer.schedule(bill);
    json!({
        "jobId": job.id.to_string(),
        "delayMs": state.printer.delay().as_millis() as u64,
    })
}

async fn invoice_bill(state: &AppState, args: &Value) -> Result<Bill, String> {
    signed_in(state)?;
    let id = required_id(args, &["invoiceId", "invoice_id", "id"], "Invoice id")?;
    let invoice = state.api.fetch_invoice(id).await?;
    Ok(Bill::from_invoice(&invoice, None, invoice.paid_amount, 0.0))
}

pub async fn print_preview(state: &AppState, args: Value) -> Result<Value, String> {
    let bill = invoice_bill(state, &args).await?;
    let paper = value_i64(&args, &["paper", "paperMm"])
        .and_then(|mm| i32::try_from(mm).ok())
        .map(PaperWidth::from_mm)
        .unwrap_or(state.config.paper);
    Ok(json!({ "bill": bill, "text": receipt::render_text(&bill, paper) }))
}

/// Reprint a bill now, skipping the auto-print delay.
pub async fn print_bill(state: &AppState, args: Value) -> Result<Value, String> {
    let bill = invoice_bill(state, &args).await?;
    let path = state.printer.print_now(&bill).await?;
    Ok(json!({ "printed": true, "path": path.display().to_string() }))
}

pub fn print_cancel(state: &AppState) -> Result<Value, String> {
    Ok(json!({ "cancelled": state.printer.cancel() }))
}

pub fn receipts_list(state: &AppState) -> Result<Value, String> {
    let files: Vec<String> = receipt::spooled_receipts(&state.config.receipt_spool_dir())
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    Ok(json!({ "receipts": files }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use crate::auth::test_tokens::make_token;
    use crate::test_state::app_state;

    #[tokio::test]
    async fn reprint_spools_the_fetched_invoice() {
        let invoice = json!({
            "id": 12,
            "invoice_number": "INV-0012",
            "total_amount": "240.00",
            "paid_amount": "240.00",
            "items": [{ "product": 1, "product_name": "Baguette", "quantity": 2, "unit_price": "120.00" }]
        })
        .to_string();
        let (base, _server) = serve(vec![
            (200, "application/json", invoice.clone()),
            (200, "application/json", invoice),
        ])
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(&base, dir.path().to_path_buf());
        let exp = chrono::Utc::now().timestamp() + 3600;
        state.api.set_token(Some(make_token(&json!({
            "user_id": 1, "username": "sita", "user_type": "COUNTER", "branch_id": 1, "exp": exp
        }))));

        let preview = print_preview(&state, json!({ "invoiceId": 12, "paper": 58 }))
            .await
            .expect("preview");
        let text = preview["text"].as_str().unwrap_or_default();
        assert!(text.contains("INV-0012"));
        assert!(text.contains("Baguette"));

        let printed = print_bill(&state, json!({ "invoiceId": 12 })).await.expect("print");
        assert_eq!(printed["printed"], true);
        let listed = receipts_list(&state).expect("list");
        assert_eq!(listed["receipts"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn cancel_without_pending_job_is_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        assert_eq!(print_cancel(&state).expect("cancel")["cancelled"], false);
    }
}
