//! Kitchen display: invoices sorted into New / Ready / Completed columns.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::api::ApiClient;
use crate::error::{PosError, PosResult};
use crate::models::Invoice;

pub const STATUS_READY: &str = "READY";
pub const STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    New,
    Ready,
    Completed,
}

impl Bucket {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "ready" => Some(Self::Ready),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Backend status the "advance" button moves to.
    pub fn next_status(self) -> Option<&'static str> {
        match self {
            Self::New => Some(STATUS_READY),
            Self::Ready => Some(STATUS_COMPLETED),
            Self::Completed => None,
        }
    }
}

/// Column for a backend `invoice_status`; `None` hides the invoice.
pub fn bucket_for(invoice_status: Option<&str>) -> Option<Bucket> {
    let status = invoice_status.unwrap_or_default().trim().to_ascii_uppercase();
    match status.as_str() {
        "" | "PENDING" | "NEW" | "IN_PROGRESS" | "PREPARING" => Some(Bucket::New),
        "READY" => Some(Bucket::Ready),
        "COMPLETED" | "SERVED" | "DELIVERED" => Some(Bucket::Completed),
        _ => None,
    }
}

/// Table number from a description such as `"Table 4 - Group A"`.
pub fn table_from_description(description: &str) -> Option<u32> {
    let rest = &description[description.find("Table ")? + "Table ".len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Group name after the `" - "` of a table description.
pub fn group_from_description(description: &str) -> Option<String> {
    table_from_description(description)?;
    description
        .split_once(" - ")
        .map(|(_, group)| group.trim().to_string())
        .filter(|g| !g.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketItem {
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KitchenTicket {
    pub id: i64,
    pub number: String,
    pub bucket: Bucket,
    pub table_number: Option<u32>,
    pub group_name: Option<String>,
    pub description: String,
    pub notes: String,
    pub waiter: Option<String>,
    pub created_at: Option<String>,
    pub items: Vec<TicketItem>,
}

impl KitchenTicket {
    pub fn from_invoice(invoice: &Invoice, bucket: Bucket) -> Self {
        let description = invoice.description.clone().unwrap_or_default();
        Self {
            id: invoice.id,
            number: invoice.display_number(),
            bucket,
            table_number: table_from_description(&description),
            group_name: group_from_description(&description),
            notes: invoice.notes.clone().unwrap_or_default(),
            waiter: invoice.created_by_name.clone(),
            created_at: invoice.created_at.clone(),
            items: invoice
                .items
                .iter()
                .map(|i| TicketItem {
                    name: i
                        .product_name
                        .clone()
                        .unwrap_or_else(|| format!("Item {}", i.product.unwrap_or_default())),
                    quantity: i.quantity,
                })
                .collect(),
            description,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KitchenBoard {
    pub new: Vec<KitchenTicket>,
    pub ready: Vec<KitchenTicket>,
    /// Newest first, for the history sheet.
    pub completed: Vec<KitchenTicket>,
    pub new_count: usize,
    pub ready_count: usize,
    pub completed_count: usize,
}

/// Split active invoices into columns; open columns oldest first.
pub fn board(invoices: &[Invoice]) -> KitchenBoard {
    let mut sorted: Vec<&Invoice> = invoices.iter().filter(|i| i.is_active).collect();
    sorted.sort_by_key(|i| (i.created_at_parsed(), i.id));

    let mut out = KitchenBoard::default();
    for invoice in sorted {
        let Some(bucket) = bucket_for(invoice.invoice_status.as_deref()) else {
            continue;
        };
        let ticket = KitchenTicket::from_invoice(invoice, bucket);
        match bucket {
            Bucket::New => out.new.push(ticket),
            Bucket::Ready => out.ready.push(ticket),
            Bucket::Completed => out.completed.push(ticket),
        }
    }
    out.completed.reverse();
    out.new_count = out.new.len();
    out.ready_count = out.ready.len();
    out.completed_count = out.completed.len();
    out
}

async fn set_status(api: &ApiClient, invoice_id: i64, status: &str) -> PosResult<Invoice> {
    let updated = api
        .patch_invoice(invoice_id, &json!({ "invoice_status": status }))
        .await?;
    info!(invoice_id, status, "kitchen status changed");
    Ok(updated)
}

/// Move an invoice one column to the right.
pub async fn advance(api: &ApiClient, invoice: &Invoice) -> PosResult<Invoice> {
    let bucket = bucket_for(invoice.invoice_status.as_deref())
        .ok_or_else(|| PosError::validation("Order is cancelled"))?;
    let next = bucket
        .next_status()
        .ok_or_else(|| PosError::validation("Order already completed"))?;
    set_status(api, invoice.id, next).await
}

/// Put a completed order back in the Ready column.
pub async fn undo_completion(api: &ApiClient, invoice: &Invoice) -> PosResult<Invoice> {
    if bucket_for(invoice.invoice_status.as_deref()) != Some(Bucket::Completed) {
        return Err(PosError::validation("Only completed orders can be reopened"));
    }
    set_status(api, invoice.id, STATUS_READY).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use serde_json::Value;
    use std::time::Duration;

    fn invoice(id: i64, status: Option<&str>, created_at: &str, description: &str) -> Invoice {
        serde_json::from_value(json!({
            "id": id,
            "invoice_status": status,
            "created_at": created_at,
            "description": description,
            "items": [{ "product": 1, "product_name": "Latte", "quantity": 2, "unit_price": "130" }]
        }))
        .expect("invoice")
    }

    #[test]
    fn statuses_map_to_buckets() {
        assert_eq!(bucket_for(None), Some(Bucket::New));
        assert_eq!(bucket_for(Some("pending")), Some(Bucket::New));
        assert_eq!(bucket_for(Some("PREPARING")), Some(Bucket::New));
        assert_eq!(bucket_for(Some("READY")), Some(Bucket::Ready));
        assert_eq!(bucket_for(Some("SERVED")), Some(Bucket::Completed));
        assert_eq!(bucket_for(Some("CANCELLED")), None);
    }

    #[test]
    fn table_is_recovered_from_description() {
        assert_eq!(table_from_description("Table 12 - Group A"), Some(12));
        assert_eq!(table_from_description("Table 3"), Some(3));
        assert_eq!(table_from_description("Counter - Walk-in"), None);
        assert_eq!(table_from_description("Table  - x"), None);
        assert_eq!(group_from_description("Table 4 - Family"), Some("Family".into()));
        assert_eq!(group_from_description("Counter - Walk-in"), None);
    }

    #[test]
    fn board_orders_columns() {
        let invoices = vec![
            invoice(3, Some("PENDING"), "2026-10-19 09:30:00", "Table 2 - Group A"),
            invoice(1, Some("PENDING"), "2026-10-19 09:00:00", "Table 5 - Group B"),
            invoice(2, Some("READY"), "2026-10-19 09:10:00", "Counter - Walk-in"),
            invoice(4, Some("COMPLETED"), "2026-10-19 08:00:00", "Table 1 - Group A"),
            invoice(5, Some("COMPLETED"), "2026-10-19 08:30:00", "Table 1 - Group A"),
            invoice(6, Some("CANCELLED"), "2026-10-19 08:30:00", "Table 1 - Group A"),
        ];
        let b = board(&invoices);
        assert_eq!(b.new.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(b.new[0].table_number, Some(5));
        assert_eq!(b.ready_count, 1);
        assert_eq!(b.ready[0].table_number, None);
        assert_eq!(b.completed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![5, 4]);
        assert_eq!(b.new[0].items[0].quantity, 2);
    }

    #[tokio::test]
    async fn advance_patches_next_status() {
        let (base, server) = serve(vec![(
            200,
            "application/json",
            r#"{"success":true,"data":{"id":7,"invoice_status":"READY"}}"#.to_string(),
        )])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let updated = advance(&api, &invoice(7, Some("PENDING"), "", "Table 1 - Group A"))
            .await
            .expect("advance");
        assert_eq!(updated.invoice_status.as_deref(), Some("READY"));

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("PATCH /api/invoice/7/ HTTP/1.1"));
        let body = requests[0].split("\r\n\r\n").nth(1).unwrap_or_default();
        let sent: Value = serde_json::from_str(body).expect("json body");
        assert_eq!(sent, json!({ "invoice_status": "READY" }));
    }

    #[tokio::test]
    async fn completed_orders_do_not_advance() {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
        let err = advance(&api, &invoice(1, Some("COMPLETED"), "", ""))
            .await
            .expect_err("no next status");
        assert_eq!(err.to_string(), "Order already completed");
        let err = undo_completion(&api, &invoice(1, Some("READY"), "", ""))
            .await
            .expect_err("not completed");
        assert!(matches!(err, PosError::Validation(_)));
    }
}
