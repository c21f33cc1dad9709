use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use zeroize::Zeroize;

use super::{lock, parse, to_value};
use crate::auth::{self, PinPadEvent};
use crate::{value_str, AppState};

const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Deserialize)]
struct LoginPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct ChangePasswordPayload {
    #[serde(default, alias = "oldPassword")]
    old_password: String,
    #[serde(default, alias = "newPassword")]
    new_password: String,
}

#[derive(Deserialize)]
struct PinPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    pin: String,
}

pub async fn auth_login(state: &AppState, args: Value) -> Result<Value, String> {
    let mut payload: LoginPayload = parse(args)?;
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        payload.password.zeroize();
        return Err("Please enter username and password".into());
    }
    let result = auth::login(&state.api, &state.db, &payload.username, &payload.password).await;
    payload.password.zeroize();
    to_value(result?)
}

/// Sign out and drop any half-finished order held in memory.
pub async fn auth_logout(state: &AppState) -> Result<Value, String> {
    auth::logout(&state.api, &state.db).await?;
    *lock(&state.waiter)? = None;
    lock(&state.counter)?.reset();
    lock(&state.pin_pad)?.clear();
    state.printer.cancel();
    Ok(json!({ "route": auth::landing_route("") }))
}

pub fn auth_session(state: &AppState) -> Result<Value, String> {
    let token = state.api.token();
    let logged_in = auth::is_logged_in(token.as_deref(), Utc::now().timestamp_millis());
    let user = auth::current_user(&state.api, &state.db);
    let route = match (&user, logged_in) {
        (Some(u), true) => auth::landing_route(&u.role),
        _ => auth::landing_route(""),
    };
    Ok(json!({ "loggedIn": logged_in, "user": user, "route": route }))
}

pub async fn auth_refresh(state: &AppState) -> Result<Value, String> {
    auth::refresh_session(&state.api).await?;
    auth_session(state)
}

pub async fn auth_change_password(state: &AppState, args: Value) -> Result<Value, String> {
    let mut payload: ChangePasswordPayload = parse(args)?;
    let check = if payload.old_password.is_empty() {
        Err("Please enter your current password".to_string())
    } else if payload.new_password.chars().count() < MIN_PASSWORD_CHARS {
        Err(format!("New password must be at least {MIN_PASSWORD_CHARS} characters"))
    } else {
        Ok(())
    };
    let result = match check {
        Ok(()) => state
            .api
            .change_password(&payload.old_password, &payload.new_password)
            .await
            .map_err(String::from),
        Err(e) => Err(e),
    };
    payload.old_password.zeroize();
    payload.new_password.zeroize();
    result
}

pub fn pin_set(state: &AppState, args: Value) -> Result<Value, String> {
    let mut payload: PinPayload = parse(args)?;
    let result = auth::set_terminal_pin(&state.db, &payload.username, &payload.pin);
    payload.pin.zeroize();
    result?;
    Ok(json!({ "success": true }))
}

pub fn pin_verify(state: &AppState, args: Value) -> Result<Value, String> {
    let mut payload: PinPayload = parse(args)?;
    let result = auth::verify_terminal_pin(&state.db, &payload.username, &payload.pin);
    payload.pin.zeroize();
    result?;
    Ok(json!({ "status": "unlocked" }))
}

/// Feed one keypad key; the fourth digit checks the PIN for `username`.
pub fn pin_press(state: &AppState, args: Value) -> Result<Value, String> {
    let key = value_str(&args, &["key", "digit"])
        .and_then(|k| k.chars().next())
        .ok_or("Key is required")?;
    let event = lock(&state.pin_pad)?.press(key);
    match event {
        PinPadEvent::Pending(digits) => Ok(json!({ "status": "pending", "digits": digits })),
        PinPadEvent::Complete(mut pin) => {
            let username = value_str(&args, &["username"]).unwrap_or_default();
            let result = auth::verify_terminal_pin(&state.db, &username, &pin);
            pin.zeroize();
            result?;
            Ok(json!({ "status": "unlocked" }))
        }
    }
}

pub fn pin_backspace(state: &AppState) -> Result<Value, String> {
    let mut pad = lock(&state.pin_pad)?;
    pad.backspace();
    Ok(json!({ "status": "pending", "digits": pad.len() }))
}

pub fn pin_clear(state: &AppState) -> Result<Value, String> {
    lock(&state.pin_pad)?.clear();
    Ok(json!({ "status": "pending", "digits": 0 }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve;
    use crate::auth::test_tokens::make_token;
    use crate::cart::Cart;
    use crate::checkout::WaiterCheckout;
    use crate::escpos::PaperWidth;
    use crate::models::Invoice;
    use crate::receipt::{self, AutoPrinter, Bill, PrintTarget};
    use crate::storage;
    use crate::test_state::app_state;
    use std::time::Duration;

    #[tokio::test]
    async fn session_reflects_the_bearer_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());

        let out = auth_session(&state).expect("session");
        assert_eq!(out["loggedIn"], false);
        assert_eq!(out["route"], "/login");

        let exp = Utc::now().timestamp() + 3600;
        state.api.set_token(Some(make_token(&json!({
            "user_id": 5,
            "username": "maya",
            "user_type": "KITCHEN",
            "branch_id": 2,
            "exp": exp,
        }))));
        let out = auth_session(&state).expect("session");
        assert_eq!(out["loggedIn"], true);
        assert_eq!(out["user"]["username"], "maya");
        assert_eq!(out["route"], "/kitchen/display");
    }

    #[tokio::test]
    async fn logout_clears_local_state_even_when_the_server_fails() {
        let (base, server) =
            serve(vec![(500, "application/json", r#"{"detail":"Server error"}"#.to_string())]).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = app_state(&base, dir.path().to_path_buf());
        let spool = dir.path().join("receipts");
        state.printer = AutoPrinter::new(
            PrintTarget::Spool(spool.clone()),
            PaperWidth::Mm80,
            Duration::from_secs(60),
        );

        let exp = Utc::now().timestamp() + 3600;
        state.api.set_token(Some(make_token(&json!({
            "user_id": 1, "username": "owner", "user_type": "ADMIN", "is_superuser": true, "exp": exp
        }))));
        state.api.set_refresh_token(Some("refresh-1".into()));
        for (key, value) in [
            (storage::SESSION_CURRENT_USER, r#"{"id":1,"username":"owner","role":"ADMIN"}"#),
            (storage::SESSION_SELECTED_BRANCH, r#"{"id":2,"name":"Lakeside"}"#),
            (storage::SESSION_SELECTED_FLOOR, "3"),
        ] {
            storage::set_session_value(&state.db, key, value).expect("session");
        }
        *state.waiter.lock().expect("waiter") =
            Some(WaiterCheckout::new("3", None, None, Cart::default()));
        let invoice: Invoice = serde_json::from_value(json!({
            "id": 1, "invoice_number": "INV-0001", "total_amount": "10.00", "paid_amount": "10.00", "items": []
        }))
        .expect("invoice");
        let job = state.printer.schedule(&Bill::from_invoice(&invoice, None, 10.0, 0.0));

        let out = auth_logout(&state).await.expect("logout");
        assert_eq!(out["route"], "/login");

        for key in [
            storage::SESSION_CURRENT_USER,
            storage::SESSION_SELECTED_BRANCH,
            storage::SESSION_SELECTED_FLOOR,
        ] {
            assert!(storage::get_session_value(&state.db, key).is_none(), "{key} kept");
        }
        assert!(state.waiter.lock().expect("waiter").is_none());
        assert_eq!(state.api.token(), None);
        assert_eq!(state.api.refresh_token(), None);
        assert_eq!(job.wait().await, None);
        assert!(receipt::spooled_receipts(&spool).is_empty());

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("POST /api/logout/"));
        assert!(requests[0].contains("refresh-1"));
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        let err = auth_login(&state, json!({ "username": "maya" }))
            .await
            .expect_err("missing password");
        assert_eq!(err, "Please enter username and password");
    }

    #[test]
    fn keypad_unlocks_on_fourth_digit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        pin_set(&state, json!({ "username": "Maya", "pin": "2468" })).expect("set");

        for (i, key) in ["2", "4", "6"].iter().enumerate() {
            let out = pin_press(&state, json!({ "key": key, "username": "maya" })).expect("press");
            assert_eq!(out["digits"], i + 1);
        }
        assert_eq!(pin_backspace(&state).expect("back")["digits"], 2);
        pin_press(&state, json!({ "key": "6", "username": "maya" })).expect("press");
        let out = pin_press(&state, json!({ "key": "8", "username": "maya" })).expect("unlock");
        assert_eq!(out["status"], "unlocked");

        for key in ["1", "1", "1"] {
            pin_press(&state, json!({ "key": key, "username": "maya" })).expect("press");
        }
        let err = pin_press(&state, json!({ "key": "1", "username": "maya" })).expect_err("wrong");
        assert_eq!(err, "Invalid PIN. Please try again.");
    }
}
