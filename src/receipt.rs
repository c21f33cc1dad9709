//! Customer bills and the delayed auto-print.
//!
//! A bill is laid out once as a list of rows and then rendered either as
//! plain text (preview, spool file) or as ESC/POS bytes for the thermal
//! printer. After checkout the shell schedules the bill with
//! [`AutoPrinter::schedule`]; a later checkout inside the delay replaces the
//! pending print instead of printing both.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cart::{format_rs, Cart};
use crate::checkout::{PaymentMethod, PaymentReceipt};
use crate::config::Config;
use crate::error::{PosError, PosResult};
use crate::escpos::{pad_pair, EscPosBuilder, PaperWidth};
use crate::models::Invoice;

pub const SHOP_NAME: &str = "AMA BAKERY";
const FOOTER: &str = "Thank you! Visit again.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillLine {
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bill {
    pub shop_name: String,
    pub branch_name: Option<String>,
    pub invoice_number: String,
    pub created_at: Option<String>,
    pub description: Option<String>,
    pub customer: Option<String>,
    pub served_by: Option<String>,
    pub lines: Vec<BillLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub discount: f64,
    pub total: f64,
    pub paid: f64,
    pub payment_label: String,
    pub change: f64,
}

impl Bill {
    pub fn from_invoice(invoice: &Invoice, method: Option<PaymentMethod>, paid: f64, change: f64) -> Self {
        let lines: Vec<BillLine> = invoice
            .items
            .iter()
            .map(|item| BillLine {
                name: item
                    .product_name
                    .clone()
                    .unwrap_or_else(|| format!("Item {}", item.product.unwrap_or_default())),
                quantity: item.quantity,
                unit_price: item.unit_price,
                total: item.line_total(),
                notes: None,
            })
            .collect();

        let subtotal = if invoice.subtotal > 0.0 {
            invoice.subtotal
        } else {
            lines.iter().map(|l| l.total).sum()
        };
        let total = if invoice.total_amount > 0.0 {
            invoice.total_amount
        } else {
            subtotal + invoice.tax_amount - invoice.discount
        };
        let payment_label = match method {
            Some(m) if paid > 0.0 => format!("Paid ({})", m.wire_name()),
            _ if paid >= total && total > 0.0 => "Paid".to_string(),
            _ => "Due Later".to_string(),
        };

        Self {
            shop_name: SHOP_NAME.to_string(),
            branch_name: invoice.branch_name.clone(),
            invoice_number: invoice.display_number(),
            created_at: invoice.created_at.clone(),
            description: invoice.description.clone().filter(|d| !d.trim().is_empty()),
            customer: invoice.customer_name.clone().filter(|c| !c.trim().is_empty()),
            served_by: invoice.created_by_name.clone(),
            lines,
            subtotal,
            tax: invoice.tax_amount,
            discount: invoice.discount,
            total,
            paid,
            payment_label,
            change,
        }
    }

    pub fn from_receipt(receipt: &PaymentReceipt) -> Self {
        Self::from_invoice(&receipt.invoice, receipt.method, receipt.paid, receipt.change)
    }

    /// Carry the per-item kitchen notes of `cart` onto matching lines; the
    /// backend does not store them.
    pub fn with_notes(mut self, cart: &Cart) -> Self {
        for line in &mut self.lines {
            let note = cart
                .lines()
                .iter()
                .find(|c| c.item.name == line.name)
                .and_then(|c| c.notes.as_deref())
                .map(str::trim)
                .filter(|n| !n.is_empty());
            line.notes = note.map(str::to_string);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Row {
    Title(String),
    Center(String),
    Text(String),
    Pair(String, String),
    Strong(String, String),
    Separator,
}

fn layout(bill: &Bill) -> Vec<Row> {
    let mut rows = vec![Row::Title(bill.shop_name.clone())];
    if let Some(branch) = &bill.branch_name {
        rows.push(Row::Center(branch.clone()));
    }
    rows.push(Row::Separator);
    rows.push(Row::Pair("Bill No:".into(), bill.invoice_number.clone()));
    if let Some(at) = &bill.created_at {
        rows.push(Row::Pair("Date:".into(), at.clone()));
    }
    if let Some(description) = &bill.description {
        rows.push(Row::Text(description.clone()));
    }
    if let Some(customer) = &bill.customer {
        rows.push(Row::Pair("Customer:".into(), customer.clone()));
    }
    if let Some(staff) = &bill.served_by {
        rows.push(Row::Pair("Served by:".into(), staff.clone()));
    }
    rows.push(Row::Separator);

    for line in &bill.lines {
        rows.push(Row::Text(line.name.clone()));
        rows.push(Row::Pair(
            format!("  {} x {}", line.quantity, format_rs(line.unit_price)),
            format_rs(line.total),
        ));
        if let Some(notes) = &line.notes {
            rows.push(Row::Text(format!("  * {notes}")));
        }
    }

    rows.push(Row::Separator);
    rows.push(Row::Pair("Subtotal".into(), format_rs(bill.subtotal)));
    if bill.tax > 0.0 {
        rows.push(Row::Pair("Tax".into(), format_rs(bill.tax)));
    }
    if bill.discount > 0.0 {
        rows.push(Row::Pair("Discount".into(), format!("-{}", format_rs(bill.discount))));
    }
    rows.push(Row::Strong("TOTAL".into(), format_rs(bill.total)));
    rows.push(Row::Pair(bill.payment_label.clone(), format_rs(bill.paid)));
    if bill.change > 0.0 {
        rows.push(Row::Pair("Change".into(), format_rs(bill.change)));
    }
    rows.push(Row::Separator);
    rows.push(Row::Center(FOOTER.into()));
    rows
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }
    format!("{}{}", " ".repeat((width - len) / 2), text)
}

/// Plain-text bill, one printer line per text line.
pub fn render_text(bill: &Bill, paper: PaperWidth) -> String {
    let width = paper.chars();
    let mut out = String::new();
    for row in layout(bill) {
        let line = match row {
            Row::Title(t) | Row::Center(t) => center(&t, width),
            Row::Text(t) => t.chars().take(width).collect(),
            Row::Pair(l, v) | Row::Strong(l, v) => pad_pair(&l, &v, width),
            Row::Separator => "-".repeat(width),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn render_escpos(bill: &Bill, paper: PaperWidth) -> Vec<u8> {
    let mut b = EscPosBuilder::new(paper);
    b.init();
    for row in layout(bill) {
        match row {
            Row::Title(t) => {
                b.center().bold(true).text_size(2, 2).line(&t).normal_size().bold(false).left();
            }
            Row::Center(t) => {
                b.center().line(&t).left();
            }
            Row::Text(t) => {
                b.line(&t);
            }
            Row::Pair(l, v) => {
                b.line_pair(&l, &v);
            }
            Row::Strong(l, v) => {
                b.bold(true).line_pair(&l, &v).bold(false);
            }
            Row::Separator => {
                b.separator();
            }
        }
    }
    b.feed(3).cut();
    b.build()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Where bills go: a printer device (or any file) is appended to; a spool
/// directory gets one file per bill.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintTarget {
    Device(PathBuf),
    Spool(PathBuf),
}

impl PrintTarget {
    pub fn from_config(config: &Config) -> Self {
        match &config.printer_path {
            Some(path) => Self::Device(path.clone()),
            None => Self::Spool(config.receipt_spool_dir()),
        }
    }
}

async fn write_job(target: &PrintTarget, job_id: Uuid, bytes: &[u8]) -> PosResult<PathBuf> {
    match target {
        PrintTarget::Device(path) => {
            let mut device = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| PosError::Storage(format!("open printer {}: {e}", path.display())))?;
            device
                .write_all(bytes)
                .await
                .map_err(|e| PosError::Storage(format!("write printer {}: {e}", path.display())))?;
            device.flush().await.ok();
            Ok(path.clone())
        }
        PrintTarget::Spool(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PosError::Storage(format!("create receipts dir: {e}")))?;
            let path = dir.join(format!("{job_id}.prn"));
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| PosError::Storage(format!("write receipt: {e}")))?;
            Ok(path)
        }
    }
}

/// A scheduled print; dropping it leaves the print running.
pub struct PrintJob {
    pub id: Uuid,
    handle: JoinHandle<Option<PathBuf>>,
}

impl PrintJob {
    /// Where the bill went, or `None` when it was cancelled or failed.
    pub async fn wait(self) -> Option<PathBuf> {
        self.handle.await.ok().flatten()
    }
}

pub struct AutoPrinter {
    target: PrintTarget,
    paper: PaperWidth,
    delay: Duration,
    /// Job id and cancel handle of the print still waiting out its delay.
    pending: Arc<Mutex<Option<(Uuid, CancellationToken)>>>,
}

impl AutoPrinter {
    pub fn new(target: PrintTarget, paper: PaperWidth, delay: Duration) -> Self {
        Self {
            target,
            paper,
            delay,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(PrintTarget::from_config(config), config.paper, config.auto_print_delay)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Print `bill` after the configured delay, replacing any print still
    /// waiting. Must be called inside a tokio runtime.
    pub fn schedule(&self, bill: &Bill) -> PrintJob {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        if let Ok(mut pending) = self.pending.lock() {
            if let Some((_, previous)) = pending.replace((id, token.clone())) {
                previous.cancel();
            }
        }

        let slot = Arc::clone(&self.pending);
        let bytes = render_escpos(bill, self.paper);
        let target = self.target.clone();
        let delay = self.delay;
        let invoice = bill.invoice_number.clone();
        debug!(job = %id, invoice = %invoice, delay_ms = delay.as_millis() as u64, "auto-print scheduled");

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(job = %id, "auto-print cancelled");
                    None
                }
                _ = tokio::time::sleep(delay) => {
                    // Past the delay the job can no longer be cancelled.
                    if let Ok(mut pending) = slot.lock() {
                        if pending.as_ref().is_some_and(|(pending_id, _)| *pending_id == id) {
                            *pending = None;
                        }
                    }
                    match write_job(&target, id, &bytes).await {
                        Ok(path) => {
                            info!(job = %id, invoice = %invoice, path = %path.display(), "bill printed");
                            Some(path)
                        }
                        Err(e) => {
                            error!(job = %id, invoice = %invoice, "bill print failed: {e}");
                            None
                        }
                    }
                }
            }
        });
        PrintJob { id, handle }
    }

    /// Drop the pending print, if any. True when one was waiting.
    pub fn cancel(&self) -> bool {
        match self.pending.lock() {
            Ok(mut pending) => pending.take().map(|(_, t)| t.cancel()).is_some(),
            Err(_) => false,
        }
    }

    /// Print right away, bypassing the delay.
    pub async fn print_now(&self, bill: &Bill) -> PosResult<PathBuf> {
        let bytes = render_escpos(bill, self.paper);
        write_job(&self.target, Uuid::new_v4(), &bytes).await
    }
}

/// Spooled bills in `dir`, oldest first.
pub fn spooled_receipts(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|x| x == "prn"))
        .filter_map(|e| Some((e.metadata().ok()?.modified().ok()?, e.path())))
        .collect();
    files.sort();
    files.into_iter().map(|(_, p)| p).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::MenuItem;
    use serde_json::json;

    fn invoice(paid: &str) -> Invoice {
        serde_json::from_value(json!({
            "id": 41,
            "invoice_number": "INV-0041",
            "created_at": "2026-10-19 10:15:00",
            "description": "Table 4 - Group A",
            "customer_name": "Sita",
            "created_by_name": "rahul",
            "tax_amount": "15.25",
            "total_amount": "320.25",
            "paid_amount": paid,
            "items": [
                { "product": 3, "product_name": "Latte", "quantity": 2, "unit_price": "130.00" },
                { "product": 9, "product_name": "Croissant", "quantity": 1, "unit_price": "45.00" }
            ]
        }))
        .expect("invoice")
    }

    fn bill() -> Bill {
        Bill::from_invoice(&invoice("320.25"), Some(PaymentMethod::Cash), 320.25, 179.75)
    }

    #[test]
    fn bill_derives_subtotal_and_label() {
        let b = bill();
        assert_eq!(b.subtotal, 305.0);
        assert_eq!(b.total, 320.25);
        assert_eq!(b.payment_label, "Paid (CASH)");
        assert_eq!(b.lines[0].total, 260.0);

        let later = Bill::from_invoice(&invoice("0"), None, 0.0, 0.0);
        assert_eq!(later.payment_label, "Due Later");
    }

    #[test]
    fn notes_come_from_the_cart() {
        let mut cart = Cart::default();
        cart.add_item(MenuItem {
            id: "3".into(),
            name: "Latte".into(),
            price: 130.0,
            category: "Beverages".into(),
            available: true,
        });
        cart.set_note("3", "less sugar");
        let b = bill().with_notes(&cart);
        assert_eq!(b.lines[0].notes.as_deref(), Some("less sugar"));
        assert_eq!(b.lines[1].notes, None);
        assert!(render_text(&b, PaperWidth::Mm58).contains("  * less sugar\n"));
    }

    #[test]
    fn text_fits_the_paper() {
        let text = render_text(&bill(), PaperWidth::Mm58);
        assert!(text.lines().all(|l| l.chars().count() <= 32));
        assert!(text.starts_with("           AMA BAKERY\n"));
        assert!(text.contains("Table 4 - Group A"));
        assert!(text.contains(&pad_pair("TOTAL", "Rs.320.25", 32)));
        assert!(text.contains(&pad_pair("Change", "Rs.179.75", 32)));
        assert!(!text.contains("Discount"));
    }

    #[test]
    fn escpos_starts_with_init_and_ends_with_cut() {
        let bytes = render_escpos(&bill(), PaperWidth::Mm80);
        assert_eq!(&bytes[..2], &[0x1B, 0x40]);
        assert_eq!(&bytes[bytes.len() - 4..], &[0x1D, 0x56, 0x41, 0x10]);
    }

    #[tokio::test]
    async fn rescheduling_cancels_the_pending_print() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = AutoPrinter::new(
            PrintTarget::Spool(dir.path().to_path_buf()),
            PaperWidth::Mm80,
            Duration::from_millis(50),
        );
        let first = printer.schedule(&bill());
        let second = printer.schedule(&bill());
        assert_eq!(first.wait().await, None);
        let printed = second.wait().await.expect("second printed");
        assert_eq!(printed.parent(), Some(dir.path()));
        assert_eq!(spooled_receipts(dir.path()), vec![printed]);
    }

    #[tokio::test]
    async fn cancel_drops_the_pending_print() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = AutoPrinter::new(
            PrintTarget::Spool(dir.path().to_path_buf()),
            PaperWidth::Mm58,
            Duration::from_millis(50),
        );
        let job = printer.schedule(&bill());
        assert!(printer.cancel());
        assert!(!printer.cancel());
        assert_eq!(job.wait().await, None);
        assert!(spooled_receipts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn printed_job_can_no_longer_be_cancelled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let printer = AutoPrinter::new(
            PrintTarget::Spool(dir.path().to_path_buf()),
            PaperWidth::Mm80,
            Duration::from_millis(5),
        );
        let first = printer.schedule(&bill());
        let second = printer.schedule(&bill());
        assert_eq!(first.wait().await, None);
        assert!(second.wait().await.is_some());
        assert!(!printer.cancel());
    }

    #[tokio::test]
    async fn device_target_is_appended_to() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = dir.path().join("lp0");
        let printer = AutoPrinter::new(PrintTarget::Device(device.clone()), PaperWidth::Mm80, Duration::ZERO);
        printer.print_now(&bill()).await.expect("first");
        let one = std::fs::metadata(&device).expect("device").len();
        printer.print_now(&bill()).await.expect("second");
        assert_eq!(std::fs::metadata(&device).expect("device").len(), one * 2);
    }
}
