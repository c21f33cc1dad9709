//! Admin dashboards.
//!
//! The backend answers three shapes: a network-wide summary (superuser with
//! no branch chosen), a per-branch "today" dashboard, and a monthly report.
//! Aggregates arrive as decimal strings or numbers and the weekday series as
//! a `{monday: .., sunday: ..}` map; this module turns them into ordered
//! series the charts can draw directly.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::api::{envelope_data, ApiClient};
use crate::auth::CurrentUser;
use crate::error::{PosError, PosResult};
use crate::models::money_from_value;

pub const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Opening hours covered by the hourly chart, inclusive.
pub const FIRST_HOUR: u32 = 8;
pub const LAST_HOUR: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    pub fn from_percent(percent: f64) -> Self {
        if percent > 0.0 {
            Self::Up
        } else if percent < 0.0 {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub value: f64,
    pub change_percent: f64,
    pub trend: Trend,
}

impl Metric {
    fn new(value: f64, change_percent: f64) -> Self {
        Self {
            value,
            change_percent,
            trend: Trend::from_percent(change_percent),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayPoint {
    pub day: String,
    pub sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourPoint {
    pub hour: String,
    pub sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub name: String,
    pub sales: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopItem {
    pub name: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchPerformance {
    pub name: String,
    pub sales: f64,
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn money(data: &Value, key: &str) -> f64 {
    data.get(key)
        .and_then(money_from_value)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn count(data: &Value, key: &str) -> i64 {
    money(data, key).round() as i64
}

fn text(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn list<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// First key present, for the endpoints that spell the same field two ways.
fn first_of<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| data.get(*k).filter(|v| !v.is_null()))
}

fn capitalize(day: &str) -> String {
    let mut chars = day.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `8 AM` .. `8 PM`, with noon as `12 PM`.
pub fn hour_label(hour: u32) -> String {
    match hour {
        0 => "12 AM".to_string(),
        1..=11 => format!("{hour} AM"),
        12 => "12 PM".to_string(),
        h => format!("{} PM", h - 12),
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Monday to Sunday; missing days are zero.
pub fn weekly_series(days: Option<&Value>) -> Vec<DayPoint> {
    WEEKDAYS
        .iter()
        .map(|day| DayPoint {
            day: capitalize(day),
            sales: days.map(|d| money(d, day)).unwrap_or(0.0),
        })
        .collect()
}

/// One point per opening hour; hours the backend left out are zero.
pub fn hourly_series(rows: &[Value]) -> Vec<HourPoint> {
    (FIRST_HOUR..=LAST_HOUR)
        .map(|h| {
            let label = hour_label(h);
            let sales = rows
                .iter()
                .find(|r| r.get("hour").and_then(Value::as_str) == Some(label.as_str()))
                .map(|r| money(r, "sales"))
                .unwrap_or(0.0);
            HourPoint { hour: label, sales }
        })
        .collect()
}

/// Category totals with each one's share of their sum, largest first.
pub fn category_shares(rows: &[Value], amount_key: &str) -> Vec<CategoryShare> {
    let mut shares: Vec<CategoryShare> = rows
        .iter()
        .map(|r| CategoryShare {
            name: text(r, "product__category__name").unwrap_or_else(|| "Uncategorized".into()),
            sales: money(r, amount_key),
            percent: 0.0,
        })
        .collect();
    let total: f64 = shares.iter().map(|s| s.sales).sum();
    if total > 0.0 {
        for share in &mut shares {
            share.percent = (share.sales / total * 1000.0).round() / 10.0;
        }
    }
    shares.sort_by(|a, b| b.sales.total_cmp(&a.sales));
    shares
}

fn top_items(rows: &[Value], quantity_key: &str) -> Vec<TopItem> {
    rows.iter()
        .map(|r| TopItem {
            name: text(r, "product__name").unwrap_or_else(|| "Unknown".into()),
            quantity: count(r, quantity_key),
            sales: r
                .get("total_sales")
                .and_then(money_from_value)
                .filter(|v| v.is_finite()),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// View-models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchDashboard {
    pub today_sales: Metric,
    pub orders: Metric,
    pub average_order: Metric,
    pub peak_hours: Vec<String>,
    pub categories: Vec<CategoryShare>,
    pub top_items: Vec<TopItem>,
    pub weekly: Vec<DayPoint>,
    pub hourly: Vec<HourPoint>,
}

impl BranchDashboard {
    pub fn from_value(data: &Value) -> Self {
        Self {
            today_sales: Metric::new(money(data, "today_sales"), money(data, "sales_percent")),
            orders: Metric::new(money(data, "total_orders"), money(data, "order_percent")),
            average_order: Metric::new(money(data, "avg_orders"), money(data, "avg_order_percent")),
            peak_hours: list(data, "peak_hours")
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            categories: category_shares(list(data, "total_sales_per_category"), "category_total_sales"),
            top_items: top_items(list(data, "top_selling_items"), "total_orders"),
            weekly: weekly_series(first_of(data, &["Weekely_Sales", "Weekly_sales"])),
            hourly: hourly_series(list(data, "Hourly_sales")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkDashboard {
    pub total_sales: f64,
    pub branch_count: i64,
    pub user_count: i64,
    pub order_count: i64,
    pub average_order_value: f64,
    pub categories: Vec<CategoryShare>,
    pub weekly: Vec<DayPoint>,
    pub top_branches: Vec<BranchPerformance>,
    pub top_items: Vec<TopItem>,
}

impl NetworkDashboard {
    pub fn from_value(data: &Value) -> Self {
        Self {
            total_sales: money(data, "total_sales"),
            branch_count: count(data, "total_branch"),
            user_count: count(data, "total_user"),
            order_count: count(data, "total_count_order"),
            average_order_value: money(data, "average_order_value"),
            categories: category_shares(list(data, "sales_per_category"), "total_category_sum"),
            weekly: weekly_series(first_of(data, &["Weekely_Sales", "Weekly_sales"])),
            top_branches: list(data, "top_perfomance_branch")
                .iter()
                .map(|r| BranchPerformance {
                    name: text(r, "name").unwrap_or_else(|| "Unnamed branch".into()),
                    sales: money(r, "total_sales_per_branch"),
                })
                .collect(),
            top_items: top_items(list(data, "top_selling_items"), "total_sold_units"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    pub month_sales: Metric,
    pub month_orders: i64,
    pub average_order: f64,
    pub weekly: Vec<DayPoint>,
    pub hourly: Vec<HourPoint>,
    pub top_items: Vec<TopItem>,
}

impl MonthlyReport {
    pub fn from_value(data: &Value) -> Self {
        Self {
            month_sales: Metric::new(money(data, "total_month_sales"), money(data, "growth_percent")),
            month_orders: count(data, "total_month_orders"),
            average_order: money(data, "avg_order_month"),
            weekly: weekly_series(first_of(data, &["Weekly_sales", "Weekely_Sales"])),
            hourly: hourly_series(list(data, "Hourly_sales")),
            top_items: top_items(list(data, "top_selling_items_count"), "total_orders"),
        }
    }
}

/// Which dashboard a user gets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Dashboard {
    Network(NetworkDashboard),
    Branch {
        branch_id: Option<i64>,
        branch_name: Option<String>,
        #[serde(flatten)]
        data: BranchDashboard,
    },
}

/// The superuser sees the network summary until a branch is picked; everyone
/// else sees their own branch.
pub fn dashboard_branch(user: &CurrentUser) -> Option<i64> {
    if user.is_superuser && !user.is_branch_scoped {
        None
    } else {
        user.branch_id
    }
}

pub async fn load_dashboard(api: &ApiClient, user: &CurrentUser) -> PosResult<Dashboard> {
    let branch = dashboard_branch(user);
    let data = envelope_data(api.fetch_dashboard(branch).await?);
    debug!(branch = ?branch, "dashboard loaded");
    Ok(match branch {
        None if user.is_superuser => Dashboard::Network(NetworkDashboard::from_value(&data)),
        _ => Dashboard::Branch {
            branch_id: branch,
            branch_name: user.branch_name.clone(),
            data: BranchDashboard::from_value(&data),
        },
    })
}

/// Monthly report for the user's branch (or `branch_override` for a
/// superuser browsing a specific branch).
pub async fn load_report(
    api: &ApiClient,
    user: &CurrentUser,
    branch_override: Option<i64>,
) -> PosResult<MonthlyReport> {
    let branch = if user.is_superuser {
        branch_override.or_else(|| dashboard_branch(user))
    } else {
        user.branch_id
    };
    if branch.is_none() && user.is_superuser {
        return Err(PosError::validation("Select a branch to view its report"));
    }
    let data = envelope_data(api.fetch_report(branch).await?);
    Ok(MonthlyReport::from_value(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use serde_json::json;
    use std::time::Duration;

    fn user(is_superuser: bool, branch_id: Option<i64>, scoped: bool) -> CurrentUser {
        CurrentUser {
            id: "1".into(),
            username: "owner".into(),
            role: if is_superuser { "SUPER_ADMIN".into() } else { "BRANCH_MANAGER".into() },
            is_superuser,
            is_staff: true,
            branch_id,
            branch_name: branch_id.map(|id| format!("Branch {id}")),
            is_branch_scoped: scoped,
        }
    }

    fn branch_payload() -> Value {
        json!({
            "success": true,
            "today_sales": "1250.50",
            "sales_percent": -12.5,
            "total_orders": 9,
            "order_percent": 0,
            "avg_orders": "138.94",
            "avg_order_percent": 4.2,
            "peak_hours": ["09:00 AM"],
            "total_sales_per_category": [
                { "product__category__name": "Beverages", "category_total_sales": "300.00" },
                { "product__category__name": "Cakes", "category_total_sales": "900.00" }
            ],
            "top_selling_items": [{ "product__name": "Latte", "total_orders": 14 }],
            "Weekely_Sales": { "monday": "100.00", "wednesday": 50, "sunday": null },
            "Hourly_sales": [{ "hour": "9 AM", "sales": 200.0 }, { "hour": "12 PM", "sales": 75 }]
        })
    }

    #[test]
    fn hour_labels_cover_opening_hours() {
        let series = hourly_series(&[]);
        assert_eq!(series.len(), 13);
        assert_eq!(series[0].hour, "8 AM");
        assert_eq!(series[4].hour, "12 PM");
        assert_eq!(series[12].hour, "8 PM");
    }

    #[test]
    fn branch_dashboard_view_model() {
        let d = BranchDashboard::from_value(&branch_payload());
        assert_eq!(d.today_sales.value, 1250.5);
        assert_eq!(d.today_sales.trend, Trend::Down);
        assert_eq!(d.orders.trend, Trend::Flat);
        assert_eq!(d.average_order.trend, Trend::Up);

        assert_eq!(d.weekly.len(), 7);
        assert_eq!(d.weekly[0], DayPoint { day: "Monday".into(), sales: 100.0 });
        assert_eq!(d.weekly[2].sales, 50.0);
        assert_eq!(d.weekly[6].day, "Sunday");
        assert_eq!(d.weekly[6].sales, 0.0);

        assert_eq!(d.categories[0].name, "Cakes");
        assert_eq!(d.categories[0].percent, 75.0);
        assert_eq!(d.categories[1].percent, 25.0);

        assert_eq!(d.hourly[1].sales, 200.0);
        assert_eq!(d.hourly[4].sales, 75.0);
        assert_eq!(d.top_items[0].quantity, 14);
        assert_eq!(d.top_items[0].sales, None);
    }

    #[test]
    fn network_dashboard_view_model() {
        let d = NetworkDashboard::from_value(&json!({
            "total_sales": "52000.00",
            "total_branch": 3,
            "total_user": 11,
            "total_count_order": 400,
            "average_order_value": "130.00",
            "sales_per_category": [],
            "Weekely_Sales": { "friday": 800 },
            "top_perfomance_branch": [{ "name": "Thamel", "total_sales_per_branch": "30000.00" }],
            "top_selling_items": [{ "product__name": "Croissant", "total_sold_units": 220 }]
        }));
        assert_eq!(d.branch_count, 3);
        assert!(d.categories.is_empty());
        assert_eq!(d.weekly[4].sales, 800.0);
        assert_eq!(d.top_branches[0].sales, 30000.0);
        assert_eq!(d.top_items[0].quantity, 220);
    }

    #[test]
    fn report_reads_growth_and_item_sales() {
        let r = MonthlyReport::from_value(&json!({
            "total_month_sales": "9000",
            "total_month_orders": 60,
            "avg_order_month": "150.00",
            "growth_percent": 20,
            "Weekly_sales": { "tuesday": 10 },
            "Hourly_sales": [],
            "top_selling_items_count": [
                { "product__name": "Latte", "total_orders": 30, "total_sales": "3900.00" }
            ]
        }));
        assert_eq!(r.month_sales.trend, Trend::Up);
        assert_eq!(r.weekly[1].sales, 10.0);
        assert_eq!(r.top_items[0].sales, Some(3900.0));
    }

    #[test]
    fn superuser_without_branch_gets_network_scope() {
        assert_eq!(dashboard_branch(&user(true, Some(4), false)), None);
        assert_eq!(dashboard_branch(&user(true, Some(4), true)), Some(4));
        assert_eq!(dashboard_branch(&user(false, Some(2), false)), Some(2));
    }

    #[tokio::test]
    async fn branch_dashboard_is_fetched_for_branch_users() {
        let (base, server) = serve(vec![(200, "application/json", branch_payload().to_string())]).await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let dashboard = load_dashboard(&api, &user(false, Some(2), false))
            .await
            .expect("dashboard");
        match dashboard {
            Dashboard::Branch { branch_id, data, .. } => {
                assert_eq!(branch_id, Some(2));
                assert_eq!(data.orders.value, 9.0);
            }
            other => panic!("unexpected dashboard: {other:?}"),
        }
        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("GET /api/calculate/dashboard-details/2/ "));
    }

    #[tokio::test]
    async fn superuser_report_needs_a_branch() {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
        let err = load_report(&api, &user(true, None, false), None)
            .await
            .expect_err("branch required");
        assert!(matches!(err, PosError::Validation(_)));
    }
}
