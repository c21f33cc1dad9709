//! Cart lines and bill totals shared by the waiter and counter screens.

use serde::{Deserialize, Serialize};

use crate::menu::MenuItem;

/// Tax rates offered by the waiter checkout.
pub const TAX_PRESETS: [f64; 3] = [5.0, 10.0, 15.0];
pub const DEFAULT_TAX_RATE: f64 = 5.0;
/// Largest quantity a single line can hold.
pub const MAX_LINE_QUANTITY: u32 = 9_999;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLine {
    pub item: MenuItem,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.item.price * f64::from(self.quantity)
    }
}

/// Ordered list of lines, one per product. A line never holds quantity 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        Self {
            lines: lines
                .into_iter()
                .filter(|l| l.quantity > 0)
                .map(|mut l| {
                    l.quantity = l.quantity.min(MAX_LINE_QUANTITY);
                    l
                })
                .collect(),
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Existing line gains one; otherwise a new line with quantity 1.
    pub fn add_item(&mut self, item: MenuItem) {
        match self.lines.iter_mut().find(|l| l.item.id == item.id) {
            Some(line) => line.quantity = line.quantity.saturating_add(1).min(MAX_LINE_QUANTITY),
            None => self.lines.push(CartLine {
                item,
                quantity: 1,
                notes: None,
            }),
        }
    }

    /// Apply `delta`, clamped to `0..=MAX_LINE_QUANTITY`. Lines that reach zero are removed.
    pub fn update_quantity(&mut self, item_id: &str, delta: i64) {
        for line in self.lines.iter_mut().filter(|l| l.item.id == item_id) {
            let next = i64::from(line.quantity)
                .saturating_add(delta)
                .clamp(0, i64::from(MAX_LINE_QUANTITY));
            line.quantity = u32::try_from(next).unwrap_or(MAX_LINE_QUANTITY);
        }
        self.lines.retain(|l| l.quantity > 0);
    }

    /// Set an absolute quantity, adding the item when it is not in the cart.
    pub fn set_quantity(&mut self, item: MenuItem, quantity: u32) {
        if quantity == 0 {
            self.remove(&item.id);
            return;
        }
        let quantity = quantity.min(MAX_LINE_QUANTITY);
        match self.lines.iter_mut().find(|l| l.item.id == item.id) {
            Some(line) => line.quantity = quantity,
            None => self.lines.push(CartLine {
                item,
                quantity,
                notes: None,
            }),
        }
    }

    pub fn remove(&mut self, item_id: &str) {
        self.lines.retain(|l| l.item.id != item_id);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn set_note(&mut self, item_id: &str, note: &str) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.item.id == item_id) {
            let trimmed = note.trim();
            line.notes = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
    }

    pub fn quantity_of(&self, item_id: &str) -> u32 {
        self.lines
            .iter()
            .find(|l| l.item.id == item_id)
            .map(|l| l.quantity)
            .unwrap_or(0)
    }

    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    pub fn subtotal(&self) -> f64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

/// Tax toggle and rate of a bill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxSetting {
    pub enabled: bool,
    pub rate: f64,
}

impl Default for TaxSetting {
    fn default() -> Self {
        Self {
            enabled: false,
            rate: DEFAULT_TAX_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax: f64,
    pub discount_percent: f64,
    pub discount: f64,
    pub total: f64,
}

impl Totals {
    pub fn compute(subtotal: f64, tax: TaxSetting, discount_percent: f64) -> Self {
        let tax_amount = if tax.enabled {
            subtotal * tax.rate / 100.0
        } else {
            0.0
        };
        let discount = subtotal * discount_percent / 100.0;
        Self {
            subtotal,
            tax_rate: if tax.enabled { tax.rate } else { 0.0 },
            tax: tax_amount,
            discount_percent,
            discount,
            total: subtotal + tax_amount - discount,
        }
    }
}

/// Format an amount the way bills show it.
pub fn format_rs(amount: f64) -> String {
    format!("Rs.{amount:.2}")
}
