//! Wire types for the bakery REST API.
//!
//! The backend serializes decimal columns as strings ("45.00") and foreign
//! keys as nullable integers; the helpers at the bottom accept both spellings
//! so one flaky serializer change does not take a screen down.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "de_money")]
    pub cost_price: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub selling_price: f64,
    #[serde(default, deserialize_with = "de_count")]
    pub product_quantity: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub low_stock_bar: i64,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub category: Option<i64>,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: String,
}

impl Branch {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Branch {}", self.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Floor {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "de_count")]
    pub table_count: i64,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceItem {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub product: Option<i64>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "de_count")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "de_money")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub discount_amount: f64,
}

impl InvoiceItem {
    pub fn line_total(&self) -> f64 {
        self.quantity as f64 * self.unit_price - self.discount_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: i64,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_type: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub customer: Option<i64>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub floor: Option<i64>,
    #[serde(default)]
    pub floor_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub branch: Option<i64>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    /// "%Y-%m-%d %H:%M:%S" in the backend's local time.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "de_money")]
    pub subtotal: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub tax_amount: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub discount: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub total_amount: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub paid_amount: f64,
    #[serde(default, deserialize_with = "de_money")]
    pub due_amount: f64,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub invoice_status: Option<String>,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub payment_methods: Vec<String>,
}

impl Invoice {
    /// Invoice number when assigned, otherwise the numeric id.
    pub fn display_number(&self) -> String {
        self.invoice_number
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("#{}", self.id))
    }

    pub fn created_at_parsed(&self) -> Option<chrono::NaiveDateTime> {
        let raw = self.created_at.as_deref()?.trim();
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| {
                chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.naive_local())
            })
            .ok()
    }
}

/// Line of an invoice create request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvoiceDraftItem {
    pub item_type: &'static str,
    pub product: i64,
    pub quantity: u32,
    pub unit_price: f64,
    pub discount_amount: f64,
}

/// Body of `POST /api/invoice/`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvoiceDraft {
    pub branch: Option<i64>,
    pub customer: Option<i64>,
    pub invoice_type: &'static str,
    pub notes: String,
    pub description: String,
    pub floor: Option<i64>,
    pub tax_amount: f64,
    pub discount: f64,
    pub paid_amount: f64,
    pub payment_method: Option<String>,
    pub items: Vec<InvoiceDraftItem>,
}

/// Access/refresh pair returned by `POST /api/token/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Parse a JSON money value: number, numeric string, or null (→ 0).
pub fn money_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

pub(crate) fn de_money<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    money_from_value(&value)
        .filter(|v| v.is_finite())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {value}")))
}

fn de_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid count: {value}"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(|_| serde::de::Error::custom(format!("invalid count: {value}"))),
        Value::Null => Ok(0),
        _ => Err(serde::de::Error::custom(format!("invalid count: {value}"))),
    }
}

pub(crate) fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(id_from_value(&value))
}

/// Integer id from a number or numeric string.
pub fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn product_accepts_decimal_strings() {
        let product: Product = serde_json::from_value(json!({
            "id": 7,
            "name": "Croissant",
            "cost_price": "20.00",
            "selling_price": "45.00",
            "product_quantity": 12,
            "low_stock_bar": 5,
            "category": 2,
            "category_name": "Bakery",
            "branch_id": 1,
            "branch_name": "Lakeside",
            "is_available": true
        }))
        .expect("product");
        assert!((product.selling_price - 45.0).abs() < f64::EPSILON);
        assert_eq!(product.category_name.as_deref(), Some("Bakery"));
    }

    #[test]
    fn invoice_tolerates_missing_and_null_fields() {
        let invoice: Invoice = serde_json::from_value(json!({
            "id": 41,
            "invoice_number": "01-2026-10-19-03",
            "customer": null,
            "floor": null,
            "total_amount": "236.25",
            "paid_amount": 0,
            "due_amount": null,
            "description": "Table 4 - Group A",
            "invoice_status": "PENDING",
            "created_at": "2026-10-19 09:15:00",
            "items": [
                { "product": 3, "product_name": "Latte", "quantity": 2,
                  "unit_price": "130.00", "discount_amount": "0.00" }
            ]
        }))
        .expect("invoice");
        assert_eq!(invoice.customer, None);
        assert!((invoice.total_amount - 236.25).abs() < 1e-9);
        assert_eq!(invoice.due_amount, 0.0);
        assert!(invoice.is_active);
        assert!((invoice.items[0].line_total() - 260.0).abs() < 1e-9);
        assert_eq!(invoice.display_number(), "01-2026-10-19-03");
        let created = invoice.created_at_parsed().expect("timestamp");
        assert_eq!(created.format("%H:%M").to_string(), "09:15");
    }

    #[test]
    fn invalid_money_is_rejected() {
        let result: Result<InvoiceItem, _> = serde_json::from_value(json!({
            "product": 1, "quantity": 1, "unit_price": "abc"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn invoice_draft_serializes_backend_field_names() {
        let draft = InvoiceDraft {
            branch: Some(1),
            customer: None,
            invoice_type: "SALE",
            notes: String::new(),
            description: "Table 2 - Group A".into(),
            floor: Some(3),
            tax_amount: 0.0,
            discount: 0.0,
            paid_amount: 0.0,
            payment_method: None,
            items: vec![InvoiceDraftItem {
                item_type: "PRODUCT",
                product: 9,
                quantity: 2,
                unit_price: 45.0,
                discount_amount: 0.0,
            }],
        };
        let value = serde_json::to_value(&draft).expect("serialize");
        assert_eq!(value["invoice_type"], "SALE");
        assert_eq!(value["payment_method"], Value::Null);
        assert_eq!(value["items"][0]["item_type"], "PRODUCT");
        assert_eq!(value["items"][0]["product"], 9);
    }

    #[test]
    fn branch_display_name_falls_back_to_id() {
        let branch = Branch {
            id: 3,
            name: None,
            location: "Pokhara".into(),
        };
        assert_eq!(branch.display_name(), "Branch 3");
    }
}
