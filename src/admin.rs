//! Back-office screens: menu items, stock, categories, staff, customers and
//! branches, plus the superuser's branch switcher.
//!
//! Forms are validated here before anything is sent so the shell can show
//! the message next to the field; the backend still has the final word.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::auth::CurrentUser;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Branch, Category, Customer, Product, StaffUser};
use crate::storage;

pub const STAFF_ROLES: [&str; 5] = ["ADMIN", "BRANCH_MANAGER", "WAITER", "COUNTER", "KITCHEN"];
const CUSTOMER_PICKER_LIMIT: usize = 10;

fn required(value: &str, message: &str) -> PosResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PosError::validation(message));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProductForm {
    pub name: String,
    pub cost_price: f64,
    pub selling_price: f64,
    pub product_quantity: i64,
    pub low_stock_bar: i64,
    pub category: Option<i64>,
    pub is_available: Option<bool>,
}

impl ProductForm {
    pub fn from_product(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            cost_price: product.cost_price,
            selling_price: product.selling_price,
            product_quantity: product.product_quantity,
            low_stock_bar: product.low_stock_bar,
            category: product.category,
            is_available: Some(product.is_available),
        }
    }

    pub fn payload(&self) -> PosResult<Value> {
        let name = required(&self.name, "Product name is required")?;
        for (label, price) in [("Cost price", self.cost_price), ("Selling price", self.selling_price)] {
            if !price.is_finite() || price < 0.0 {
                return Err(PosError::validation(format!("{label} cannot be negative")));
            }
        }
        if self.product_quantity < 0 || self.low_stock_bar < 0 {
            return Err(PosError::validation("Stock values cannot be negative"));
        }
        let category = self
            .category
            .ok_or_else(|| PosError::validation("Please select a category"))?;
        Ok(json!({
            "name": name,
            "cost_price": format!("{:.2}", self.cost_price),
            "selling_price": format!("{:.2}", self.selling_price),
            "product_quantity": self.product_quantity,
            "low_stock_bar": self.low_stock_bar,
            "category": category,
            "is_available": self.is_available.unwrap_or(true),
        }))
    }
}

/// Create when `id` is `None`, otherwise replace the product.
pub async fn save_product(api: &ApiClient, id: Option<i64>, form: &ProductForm) -> PosResult<Product> {
    let payload = form.payload()?;
    let product = match id {
        Some(id) => api.update_product(id, &payload).await?,
        None => api.create_product(&payload).await?,
    };
    info!(product_id = product.id, updated = id.is_some(), "product saved");
    Ok(product)
}

pub async fn set_availability(api: &ApiClient, product: &Product, available: bool) -> PosResult<Product> {
    let mut form = ProductForm::from_product(product);
    form.is_available = Some(available);
    save_product(api, Some(product.id), &form).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowStockRow {
    pub id: i64,
    pub name: String,
    pub quantity: i64,
    pub threshold: i64,
    pub category: Option<String>,
}

/// Products at or under their reorder threshold, emptiest first.
pub fn low_stock(products: &[Product]) -> Vec<LowStockRow> {
    let mut rows: Vec<LowStockRow> = products
        .iter()
        .filter(|p| p.product_quantity <= p.low_stock_bar)
        .map(|p| LowStockRow {
            id: p.id,
            name: p.name.clone(),
            quantity: p.product_quantity,
            threshold: p.low_stock_bar,
            category: p.category_name.clone(),
        })
        .collect();
    rows.sort_by_key(|r| (r.quantity, r.id));
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockAction {
    Add,
    Reduce,
}

impl StockAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Reduce => "reduce",
        }
    }
}

pub fn validate_stock_change(product: &Product, action: StockAction, change: i64) -> PosResult<i64> {
    if change <= 0 {
        return Err(PosError::validation("Quantity must be greater than zero"));
    }
    let next = match action {
        StockAction::Add => product.product_quantity + change,
        StockAction::Reduce => product.product_quantity - change,
    };
    if next < 0 {
        return Err(PosError::validation(format!(
            "Only {} {} in stock",
            product.product_quantity, product.name
        )));
    }
    Ok(next)
}

/// Record a stock movement; returns the expected new quantity.
pub async fn adjust_stock(
    api: &ApiClient,
    product: &Product,
    action: StockAction,
    change: i64,
    remarks: &str,
) -> PosResult<i64> {
    let next = validate_stock_change(product, action, change)?;
    api.adjust_stock(product.id, action.as_str(), change, remarks.trim())
        .await?;
    info!(product_id = product.id, action = action.as_str(), change, next, "stock adjusted");
    Ok(next)
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn validate_category(name: &str, existing: &[Category], editing: Option<i64>) -> PosResult<String> {
    let name = required(name, "Category name is required")?;
    let taken = existing
        .iter()
        .any(|c| Some(c.id) != editing && c.name.trim().eq_ignore_ascii_case(&name));
    if taken {
        return Err(PosError::validation("Category already exists"));
    }
    Ok(name)
}

pub async fn save_category(
    api: &ApiClient,
    user: &CurrentUser,
    id: Option<i64>,
    name: &str,
    existing: &[Category],
) -> PosResult<Value> {
    let name = validate_category(name, existing, id)?;
    match id {
        Some(id) => api.update_category(id, &json!({ "name": name })).await,
        None => {
            api.create_category(&json!({ "name": name, "branch": user.branch_id }))
                .await
        }
    }
}

/// Refuse to delete a category that still has products.
pub async fn delete_category(api: &ApiClient, id: i64, products: &[Product]) -> PosResult<Value> {
    if products.iter().any(|p| p.category == Some(id)) {
        return Err(PosError::validation(
            "Cannot delete category attached to existing items",
        ));
    }
    api.delete_category(id).await
}

// ---------------------------------------------------------------------------
// Staff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserForm {
    pub username: String,
    pub email: String,
    pub phone: String,
    pub full_name: String,
    pub user_type: String,
    pub branch: Option<i64>,
    pub password: Option<String>,
}

impl UserForm {
    /// Password is only sent on create; changing it has its own endpoint.
    pub fn payload(&self, creating: bool) -> PosResult<Value> {
        let username = required(&self.username, "Username is required")?;
        let email = required(&self.email, "Email is required")?;
        if !email.contains('@') {
            return Err(PosError::validation("Enter a valid email address"));
        }
        let role = self.user_type.trim().to_ascii_uppercase();
        let role = if role.is_empty() { "WAITER".to_string() } else { role };
        if !STAFF_ROLES.contains(&role.as_str()) {
            return Err(PosError::validation(format!("Unknown role {role}")));
        }
        if role != "ADMIN" && self.branch.is_none() {
            return Err(PosError::validation("Please select a branch"));
        }
        let mut payload = json!({
            "username": username,
            "email": email,
            "phone": self.phone.trim(),
            "full_name": self.full_name.trim(),
            "user_type": role,
            "branch": self.branch,
        });
        if creating {
            if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
                if password.chars().count() < 8 {
                    return Err(PosError::validation("Password must be at least 8 characters"));
                }
                payload["password"] = json!(password);
            }
        }
        Ok(payload)
    }
}

pub async fn save_user(api: &ApiClient, id: Option<i64>, form: &UserForm) -> PosResult<StaffUser> {
    let payload = form.payload(id.is_none())?;
    let user = match id {
        Some(id) => api.update_user(id, &payload).await?,
        None => api.create_user(&payload).await?,
    };
    info!(user_id = user.id, role = %user.user_type, "staff user saved");
    Ok(user)
}

/// Staff of one branch; `None` lists everyone.
pub fn users_in_branch(users: &[StaffUser], branch: Option<i64>) -> Vec<&StaffUser> {
    users
        .iter()
        .filter(|u| branch.is_none() || u.branch == branch)
        .collect()
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CustomerForm {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub branch: Option<i64>,
}

impl CustomerForm {
    /// Customers belong to the user's branch; head-office users must pick one.
    pub fn payload(&self, user: &CurrentUser) -> PosResult<Value> {
        let name = self.name.trim();
        let phone = self.phone.trim();
        if name.is_empty() || phone.is_empty() {
            return Err(PosError::validation("Name and Phone are required"));
        }
        let branch = user
            .branch_id
            .or(self.branch)
            .ok_or_else(|| PosError::validation("Please select a branch"))?;
        Ok(json!({
            "name": name,
            "phone": phone,
            "email": self.email.trim(),
            "address": self.address.trim(),
            "branch": branch,
        }))
    }
}

pub async fn save_customer(
    api: &ApiClient,
    user: &CurrentUser,
    id: Option<i64>,
    form: &CustomerForm,
) -> PosResult<Customer> {
    let payload = form.payload(user)?;
    let customer = match id {
        Some(id) => api.update_customer(id, &payload).await?,
        None => api.create_customer(&payload).await?,
    };
    info!(customer_id = customer.id, "customer saved");
    Ok(customer)
}

/// Picker search: nothing until something is typed, then up to ten matches
/// on name or phone digits.
pub fn search_customers<'a>(customers: &'a [Customer], term: &str) -> Vec<&'a Customer> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let digits: String = needle.chars().filter(char::is_ascii_digit).collect();
    customers
        .iter()
        .filter(|c| {
            if c.name.to_lowercase().contains(&needle) {
                return true;
            }
            if digits.is_empty() {
                return false;
            }
            let phone: String = c.phone.chars().filter(char::is_ascii_digit).collect();
            phone.contains(&digits)
        })
        .take(CUSTOMER_PICKER_LIMIT)
        .collect()
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BranchForm {
    pub name: String,
    pub location: String,
}

impl BranchForm {
    pub fn payload(&self) -> PosResult<Value> {
        let name = self.name.trim();
        let location = self.location.trim();
        if name.is_empty() || location.is_empty() {
            return Err(PosError::validation("Please fill all fields"));
        }
        Ok(json!({ "name": name, "location": location }))
    }
}

pub async fn save_branch(api: &ApiClient, id: Option<i64>, form: &BranchForm) -> PosResult<Value> {
    let payload = form.payload()?;
    match id {
        Some(id) => api.update_branch(id, &payload).await,
        None => api.create_branch(&payload).await,
    }
}

/// Point a superuser's session at `branch`, or back at the whole network.
pub fn switch_branch(db: &DbState, user: &CurrentUser, branch: Option<&Branch>) -> PosResult<()> {
    if !user.is_superuser {
        return Err(PosError::validation("Only a superuser can switch branches"));
    }
    let result = match branch {
        Some(b) => {
            let selection = json!({ "id": b.id, "name": b.display_name() });
            storage::set_session_value(db, storage::SESSION_SELECTED_BRANCH, &selection.to_string())
        }
        None => storage::remove_session_value(db, storage::SESSION_SELECTED_BRANCH),
    };
    result.map_err(|e| {
        warn!(error = %e, "failed to store branch selection");
        PosError::Storage(e)
    })?;
    info!(branch = ?branch.map(|b| b.id), "branch selection changed");
    Ok(())
}
