//! Command handlers behind the JSON-lines bridge.
//!
//! Every handler takes the shared [`AppState`] and the request's `args`
//! value and returns the JSON the shell renders, or the message it shows in
//! a toast. Handlers are grouped by screen.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::auth::CurrentUser;
use crate::AppState;

pub mod admin;
pub mod auth;
pub mod counter;
pub mod customers;
pub mod dashboard;
pub mod diagnostics;
pub mod kitchen;
pub mod menu;
pub mod orders;
pub mod payments;
pub mod pos;
pub mod print;
pub mod tables;

pub(crate) fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode response: {e}"))
}

pub(crate) fn parse<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| format!("Invalid payload: {e}"))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, String> {
    mutex.lock().map_err(|_| "Internal state is unavailable".to_string())
}

pub(crate) fn signed_in(state: &AppState) -> Result<CurrentUser, String> {
    crate::auth::require_user(&state.api, &state.db).map_err(String::from)
}

pub(crate) fn required_id(args: &Value, keys: &[&str], what: &str) -> Result<i64, String> {
    crate::value_i64(args, keys).ok_or_else(|| format!("{what} is required"))
}

/// Route one command by name.
pub async fn dispatch(state: &AppState, name: &str, args: Value) -> Result<Value, String> {
    let result = match name {
        // -- Session ----------------------------------------------------------
        "auth_login" => auth::auth_login(state, args).await,
        "auth_logout" => auth::auth_logout(state).await,
        "auth_session" => auth::auth_session(state),
        "auth_refresh" => auth::auth_refresh(state).await,
        "auth_change_password" => auth::auth_change_password(state, args).await,
        "pin_set" => auth::pin_set(state, args),
        "pin_verify" => auth::pin_verify(state, args),
        "pin_press" => auth::pin_press(state, args),
        "pin_backspace" => auth::pin_backspace(state),
        "pin_clear" => auth::pin_clear(state),

        // -- Menu -------------------------------------------------------------
        "menu_load" => menu::menu_load(state).await,
        "menu_filter" => menu::menu_filter(state, args),
        "menu_categories" => menu::menu_categories(state),

        // -- Floors and tables ------------------------------------------------
        "floors_list" => tables::floors_list(state, args).await,
        "floor_select" => tables::floor_select(state, args),
        "floor_create" => tables::floor_create(state, args).await,
        "tables_list" => tables::tables_list(state, args).await,
        "table_select" => tables::table_select(state, args).await,
        "table_create_group" => tables::table_create_group(args),
        "table_orders_list" => tables::table_orders_list(state),
        "table_orders_clear_all" => tables::table_orders_clear_all(state),

        // -- Waiter order -----------------------------------------------------
        "pos_open_table" => pos::pos_open_table(state, args),
        "pos_get" => pos::pos_get(state),
        "pos_add_item" => pos::pos_add_item(state, args),
        "pos_update_quantity" => pos::pos_update_quantity(state, args),
        "pos_set_quantity" => pos::pos_set_quantity(state, args),
        "pos_remove_item" => pos::pos_remove_item(state, args),
        "pos_set_note" => pos::pos_set_note(state, args),
        "pos_clear" => pos::pos_clear(state),
        "pos_set_customer" => pos::pos_set_customer(state, args),
        "pos_set_options" => pos::pos_set_options(state, args),
        "pos_confirm" => pos::pos_confirm(state).await,
        "pos_pay_cash" => pos::pos_pay_cash(state, args).await,
        "pos_pay_qr" => pos::pos_pay_qr(state).await,
        "pos_close" => pos::pos_close(state),

        // -- Counter ----------------------------------------------------------
        "counter_get" => counter::counter_get(state),
        "counter_add_item" => counter::counter_add_item(state, args),
        "counter_update_quantity" => counter::counter_update_quantity(state, args),
        "counter_remove_item" => counter::counter_remove_item(state, args),
        "counter_clear" => counter::counter_clear(state),
        "counter_set_customer" => counter::counter_set_customer(state, args),
        "counter_begin_payment" => counter::counter_begin_payment(state),
        "counter_set_payment" => counter::counter_set_payment(state, args),
        "counter_pay" => counter::counter_pay(state).await,

        // -- Payments ---------------------------------------------------------
        "payments_pending" => payments::payments_pending(state).await,
        "payment_collect" => payments::payment_collect(state, args).await,

        // -- Kitchen ----------------------------------------------------------
        "kitchen_board" => kitchen::kitchen_board(state).await,
        "kitchen_advance" => kitchen::kitchen_advance(state, args).await,
        "kitchen_undo" => kitchen::kitchen_undo(state, args).await,

        // -- Orders -----------------------------------------------------------
        "orders_search" => orders::orders_search(state, args).await,
        "orders_waiter_status" => orders::orders_waiter_status(state, args).await,
        "order_get" => orders::order_get(state, args).await,
        "order_delete" => orders::order_delete(state, args).await,

        // -- Dashboards -------------------------------------------------------
        "dashboard_load" => dashboard::dashboard_load(state).await,
        "report_load" => dashboard::report_load(state, args).await,

        // -- Admin ------------------------------------------------------------
        "products_list" => admin::products_list(state).await,
        "product_save" => admin::product_save(state, args).await,
        "product_delete" => admin::product_delete(state, args).await,
        "product_set_availability" => admin::product_set_availability(state, args).await,
        "stock_low" => admin::stock_low(state).await,
        "stock_adjust" => admin::stock_adjust(state, args).await,
        "categories_list" => admin::categories_list(state).await,
        "category_save" => admin::category_save(state, args).await,
        "category_delete" => admin::category_delete(state, args).await,
        "users_list" => admin::users_list(state, args).await,
        "user_save" => admin::user_save(state, args).await,
        "user_delete" => admin::user_delete(state, args).await,
        "branches_list" => admin::branches_list(state).await,
        "branch_save" => admin::branch_save(state, args).await,
        "branch_delete" => admin::branch_delete(state, args).await,
        "branch_switch" => admin::branch_switch(state, args).await,
        "customers_list" => customers::customers_list(state).await,
        "customers_search" => customers::customers_search(state, args).await,
        "customer_save" => customers::customer_save(state, args).await,
        "customer_delete" => customers::customer_delete(state, args).await,

        // -- Printing ---------------------------------------------------------
        "print_preview" => print::print_preview(state, args).await,
        "print_bill" => print::print_bill(state, args).await,
        "print_cancel" => print::print_cancel(state),
        "receipts_list" => print::receipts_list(state),

        // -- App --------------------------------------------------------------
        "app_about" => diagnostics::app_about(state),

        other => return Err(format!("Unknown command: {other}")),
    };
    if let Err(e) = &result {
        warn!(cmd = name, error = %e, "command failed");
    }
    result
}
