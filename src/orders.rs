//! Order history views: the counter/admin order list, the waiter's
//! "My Orders" screen, and the unpaid-bill list used for payment collection.

use serde::Serialize;

use crate::kitchen::{bucket_for, group_from_description, table_from_description, Bucket};
use crate::models::Invoice;

pub const PAYMENT_PAID: &str = "PAID";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub id: i64,
    pub number: String,
    pub table_number: Option<u32>,
    pub group_name: Option<String>,
    pub customer: Option<String>,
    pub waiter: Option<String>,
    pub status: Option<Bucket>,
    pub payment_status: String,
    pub total: f64,
    pub paid: f64,
    pub due: f64,
    pub item_count: i64,
    pub created_at: Option<String>,
}

impl From<&Invoice> for OrderRow {
    fn from(invoice: &Invoice) -> Self {
        let description = invoice.description.as_deref().unwrap_or_default();
        Self {
            id: invoice.id,
            number: invoice.display_number(),
            table_number: table_from_description(description),
            group_name: group_from_description(description),
            customer: invoice.customer_name.clone(),
            waiter: invoice.created_by_name.clone(),
            status: bucket_for(invoice.invoice_status.as_deref()),
            payment_status: invoice
                .payment_status
                .clone()
                .unwrap_or_else(|| "PENDING".to_string()),
            total: invoice.total_amount,
            paid: invoice.paid_amount,
            due: invoice.due_amount,
            item_count: invoice.items.iter().map(|i| i.quantity).sum(),
            created_at: invoice.created_at.clone(),
        }
    }
}

fn newest_first(invoices: &[Invoice]) -> Vec<&Invoice> {
    let mut sorted: Vec<&Invoice> = invoices.iter().collect();
    sorted.sort_by(|a, b| {
        (b.created_at_parsed(), b.id).cmp(&(a.created_at_parsed(), a.id))
    });
    sorted
}

/// Search by order number/id, table number, or staff/customer name, with an
/// optional status column filter. Newest first.
pub fn search_orders(invoices: &[Invoice], query: &str, status: Option<Bucket>) -> Vec<OrderRow> {
    let needle = query.trim().to_lowercase();
    newest_first(invoices)
        .into_iter()
        .map(OrderRow::from)
        .filter(|row| status.is_none() || row.status == status)
        .filter(|row| {
            if needle.is_empty() {
                return true;
            }
            let text_match = |s: &Option<String>| {
                s.as_deref()
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
            };
            row.number.to_lowercase().contains(&needle)
                || row.id.to_string().contains(&needle)
                || row
                    .table_number
                    .is_some_and(|t| t.to_string().contains(&needle))
                || text_match(&row.waiter)
                || text_match(&row.customer)
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WaiterOrders {
    pub ready: Vec<OrderRow>,
    pub pending: Vec<OrderRow>,
    pub ready_count: usize,
}

/// Open orders for the waiter screen, optionally only those `waiter` created.
pub fn waiter_status(invoices: &[Invoice], waiter: Option<&str>) -> WaiterOrders {
    let mut out = WaiterOrders::default();
    for invoice in newest_first(invoices) {
        if !invoice.is_active {
            continue;
        }
        if let Some(name) = waiter {
            let mine = invoice
                .created_by_name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name));
            if !mine {
                continue;
            }
        }
        let row = OrderRow::from(invoice);
        match row.status {
            Some(Bucket::New) => out.pending.push(row),
            Some(Bucket::Ready) => out.ready.push(row),
            Some(Bucket::Completed) | None => {}
        }
    }
    out.ready_count = out.ready.len();
    out
}

/// Active invoices with money still owed, oldest first.
pub fn pending_payments(invoices: &[Invoice]) -> Vec<OrderRow> {
    let mut rows: Vec<OrderRow> = newest_first(invoices)
        .into_iter()
        .filter(|i| i.is_active)
        .filter(|i| {
            let paid = i
                .payment_status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(PAYMENT_PAID));
            !paid && i.due_amount > 0.0
        })
        .map(OrderRow::from)
        .collect();
    rows.reverse();
    rows
}
