//! REST client for the bakery backend.
//!
//! Every call goes through [`ApiClient::send`], which attaches the bearer
//! token, parses the body defensively (some error pages are HTML), and turns
//! non-2xx answers into [`PosError::Http`] carrying the server's own message.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::normalize_base_url;
use crate::error::{PosError, PosResult};
use crate::models::{
    Branch, Category, Customer, Floor, Invoice, InvoiceDraft, Product, StaffUser, TokenPair,
};

/// Characters of a non-JSON body kept in the error preview.
const PREVIEW_CHARS: usize = 300;

// ---------------------------------------------------------------------------
// Body parsing and error mapping
// ---------------------------------------------------------------------------

fn safe_preview(text: &str) -> String {
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    head.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a response body. A body declared as JSON must parse; an undeclared
/// one is given a chance anyway because some endpoints forget the header.
pub(crate) fn safe_json(status: u16, content_type: &str, text: &str) -> PosResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    if content_type.contains("application/json") {
        return serde_json::from_str(text).map_err(PosError::from);
    }
    serde_json::from_str(text).map_err(|_| PosError::NotJson {
        status,
        content_type: content_type.to_string(),
        preview: safe_preview(text),
    })
}

/// Pull the most specific message out of an error body.
pub(crate) fn error_message(data: &Value, fallback: &str) -> String {
    for key in ["detail", "message", "error"] {
        if let Some(msg) = data.get(key).and_then(Value::as_str) {
            let trimmed = msg.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(errors) = data.get("errors").filter(|v| !v.is_null()) {
        return errors.to_string();
    }
    fallback.to_string()
}

fn friendly_error(url: &str, err: &reqwest::Error) -> PosError {
    let message = if err.is_connect() {
        format!("Cannot reach the POS server at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid POS server URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    PosError::Network(message)
}

fn status_fallback(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session expired, please sign in again".to_string(),
        403 => "Permission denied".to_string(),
        404 => "Not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// Unwrap the `{success, data}` envelope; bare payloads pass through.
pub(crate) fn envelope_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> PosResult<T> {
    serde_json::from_value(value).map_err(|e| PosError::Decode(format!("{what}: {e}")))
}

fn decode_list<T: DeserializeOwned>(value: Value, what: &str) -> PosResult<Vec<T>> {
    match value {
        Value::Null => Ok(Vec::new()),
        other => decode(other, what),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    http: Client,
    base_url: String,
    bearer: RwLock<Option<String>>,
    refresh: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> PosResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PosError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
            bearer: RwLock::new(None),
            refresh: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.bearer.write() {
            *guard = token;
        }
    }

    /// Refresh token of the current session. Held here as well as in the
    /// keyring so refresh keeps working when no credential store is available.
    pub fn set_refresh_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.refresh.write() {
            if let Some(old) = guard.as_mut() {
                old.zeroize();
            }
            *guard = token;
        }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.refresh.read().ok().and_then(|g| g.clone())
    }

    pub fn has_token(&self) -> bool {
        self.bearer.read().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn token(&self) -> Option<String> {
        self.bearer.read().ok().and_then(|g| g.clone())
    }

    /// Perform one request and return the parsed JSON body (`Null` for 204).
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        fallback_error: &str,
    ) -> PosResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");
        if let Some(token) = self.token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = resp.text().await.unwrap_or_default();
        debug!(method = %method, path, status = status.as_u16(), "api response");

        let data = safe_json(status.as_u16(), &content_type, &text)?;
        if !status.is_success() {
            let fallback = if fallback_error.is_empty() {
                status_fallback(status)
            } else {
                fallback_error.to_string()
            };
            let message = error_message(&data, &fallback);
            warn!(path, status = status.as_u16(), error = %message, "api request failed");
            return Err(PosError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(data)
    }

    async fn get(&self, path: &str, fallback: &str) -> PosResult<Value> {
        self.send(Method::GET, path, None, fallback).await
    }

    async fn post(&self, path: &str, body: &Value, fallback: &str) -> PosResult<Value> {
        self.send(Method::POST, path, Some(body), fallback).await
    }

    async fn put(&self, path: &str, body: &Value, fallback: &str) -> PosResult<Value> {
        self.send(Method::PUT, path, Some(body), fallback).await
    }

    async fn patch(&self, path: &str, body: &Value, fallback: &str) -> PosResult<Value> {
        self.send(Method::PATCH, path, Some(body), fallback).await
    }

    async fn delete(&self, path: &str, fallback: &str) -> PosResult<Value> {
        self.send(Method::DELETE, path, None, fallback).await
    }

    // -- Auth -----------------------------------------------------------------

    /// `POST /api/token/`. Both tokens must be present in the answer.
    pub async fn login(&self, username: &str, password: &str) -> PosResult<(String, String)> {
        let body = json!({ "username": username, "password": password });
        let data = self
            .post("/api/token/", &body, "Invalid username or password")
            .await?;
        let pair: TokenPair = decode(data, "token response")?;
        match (pair.access, pair.refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                info!(username, "login accepted by server");
                Ok((access, refresh))
            }
            _ => Err(PosError::validation(
                "Login response missing tokens. Check backend response format.",
            )),
        }
    }

    /// `POST /api/token/refresh/` and return the new access token.
    pub async fn refresh(&self, refresh_token: &str) -> PosResult<String> {
        let body = json!({ "refresh": refresh_token });
        let data = self
            .post("/api/token/refresh/", &body, "Session expired, please sign in again")
            .await?;
        data.get("access")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PosError::validation("Refresh response missing access token"))
    }

    pub async fn logout(&self, refresh_token: Option<&str>) -> PosResult<()> {
        let body = json!({ "refresh": refresh_token });
        self.post("/api/logout/", &body, "Logout failed").await?;
        Ok(())
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> PosResult<Value> {
        let body = json!({ "old_password": old_password, "new_password": new_password });
        self.post("/api/change-password/", &body, "Failed to change password")
            .await
    }

    // -- Users ----------------------------------------------------------------

    pub async fn fetch_users(&self) -> PosResult<Vec<StaffUser>> {
        let data = self.get("/api/users/", "Failed to fetch users").await?;
        decode_list(data.get("users").cloned().unwrap_or(Value::Null), "users")
    }

    pub async fn create_user(&self, payload: &Value) -> PosResult<StaffUser> {
        let data = self.post("/api/users/", payload, "Failed to create user").await?;
        decode(data.get("user").cloned().unwrap_or(data), "user")
    }

    pub async fn update_user(&self, id: i64, payload: &Value) -> PosResult<StaffUser> {
        let data = self
            .put(&format!("/api/users/{id}/"), payload, "Failed to update user")
            .await?;
        decode(data.get("user").cloned().unwrap_or(data), "user")
    }

    pub async fn delete_user(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/users/{id}/"), "Failed to delete user")
            .await
    }

    // -- Products & categories ------------------------------------------------

    pub async fn fetch_products(&self) -> PosResult<Vec<Product>> {
        let data = self.get("/api/products/", "Failed to fetch products").await?;
        decode_list(envelope_data(data), "products")
    }

    pub async fn create_product(&self, payload: &Value) -> PosResult<Product> {
        let data = self
            .post("/api/products/", payload, "Failed to create product")
            .await?;
        decode(envelope_data(data), "product")
    }

    pub async fn update_product(&self, id: i64, payload: &Value) -> PosResult<Product> {
        let data = self
            .put(&format!("/api/products/{id}/"), payload, "Failed to update product")
            .await?;
        decode(envelope_data(data), "product")
    }

    pub async fn delete_product(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/products/{id}/"), "Failed to delete product")
            .await
    }

    pub async fn fetch_categories(&self) -> PosResult<Vec<Category>> {
        let data = self
            .get("/api/category/", "Failed to fetch categories")
            .await?;
        decode_list(envelope_data(data), "categories")
    }

    pub async fn create_category(&self, payload: &Value) -> PosResult<Value> {
        self.post("/api/category/", payload, "Failed to create category")
            .await
    }

    pub async fn update_category(&self, id: i64, payload: &Value) -> PosResult<Value> {
        self.patch(&format!("/api/category/{id}/"), payload, "Failed to update category")
            .await
    }

    pub async fn delete_category(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/category/{id}/"), "Failed to delete category")
            .await
    }

    /// `POST /api/itemactivity/{product}/{add|reduce}/`.
    pub async fn adjust_stock(
        &self,
        product_id: i64,
        action: &str,
        change: i64,
        remarks: &str,
    ) -> PosResult<Value> {
        let body = json!({ "change": change.to_string(), "remarks": remarks });
        self.post(
            &format!("/api/itemactivity/{product_id}/{action}/"),
            &body,
            "Failed to update stock",
        )
        .await
    }

    // -- Branches & customers -------------------------------------------------

    pub async fn fetch_branches(&self) -> PosResult<Vec<Branch>> {
        let data = self.get("/api/branch/", "Failed to fetch branches").await?;
        decode_list(envelope_data(data), "branches")
    }

    pub async fn create_branch(&self, payload: &Value) -> PosResult<Value> {
        self.post("/api/branch/", payload, "Failed to create branch")
            .await
    }

    pub async fn update_branch(&self, id: i64, payload: &Value) -> PosResult<Value> {
        self.patch(&format!("/api/branch/{id}/"), payload, "Failed to update branch")
            .await
    }

    pub async fn delete_branch(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/branch/{id}/"), "Failed to delete branch")
            .await
    }

    pub async fn fetch_customers(&self) -> PosResult<Vec<Customer>> {
        let data = self
            .get("/api/customer/", "Failed to fetch customers")
            .await?;
        decode_list(envelope_data(data), "customers")
    }

    pub async fn create_customer(&self, payload: &Value) -> PosResult<Customer> {
        let data = self
            .post("/api/customer/", payload, "Failed to create customer")
            .await?;
        decode(envelope_data(data), "customer")
    }

    pub async fn update_customer(&self, id: i64, payload: &Value) -> PosResult<Customer> {
        let data = self
            .patch(&format!("/api/customer/{id}/"), payload, "Failed to update customer")
            .await?;
        decode(envelope_data(data), "customer")
    }

    pub async fn delete_customer(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/customer/{id}/"), "Failed to delete customer")
            .await
    }

    // -- Invoices & payments --------------------------------------------------

    pub async fn fetch_invoices(&self) -> PosResult<Vec<Invoice>> {
        let data = self.get("/api/invoice/", "Failed to fetch invoices").await?;
        decode_list(envelope_data(data), "invoices")
    }

    pub async fn fetch_invoice(&self, id: i64) -> PosResult<Invoice> {
        let data = self
            .get(&format!("/api/invoice/{id}/"), "Invoice not found")
            .await?;
        decode(envelope_data(data), "invoice")
    }

    pub async fn create_invoice(&self, draft: &InvoiceDraft) -> PosResult<Invoice> {
        let body = serde_json::to_value(draft)?;
        let data = self
            .post("/api/invoice/", &body, "Failed to create invoice")
            .await?;
        decode(envelope_data(data), "invoice")
    }

    /// PATCH the fields the backend allows staff to change
    /// (`notes`, `description`, `is_active`, `invoice_status`).
    pub async fn patch_invoice(&self, id: i64, fields: &Value) -> PosResult<Invoice> {
        let data = self
            .patch(&format!("/api/invoice/{id}/"), fields, "Failed to update invoice")
            .await?;
        decode(envelope_data(data), "invoice")
    }

    pub async fn delete_invoice(&self, id: i64) -> PosResult<Value> {
        self.delete(&format!("/api/invoice/{id}/"), "Failed to delete invoice")
            .await
    }

    pub async fn record_payment(
        &self,
        invoice_id: i64,
        amount: f64,
        method: &str,
        notes: &str,
    ) -> PosResult<Value> {
        let body = json!({ "amount": amount, "payment_method": method, "notes": notes });
        self.post(
            &format!("/api/invoice/{invoice_id}/payments/"),
            &body,
            "Failed to record payment",
        )
        .await
    }

    // -- Floors ---------------------------------------------------------------

    pub async fn fetch_floors(&self) -> PosResult<Vec<Floor>> {
        let data = self.get("/api/floor/", "Failed to load floors").await?;
        decode_list(envelope_data(data), "floors")
    }

    pub async fn create_floor(&self, payload: &Value) -> PosResult<Floor> {
        let data = self
            .post("/api/floor/", payload, "Failed to create floor")
            .await?;
        decode(envelope_data(data), "floor")
    }

    // -- Dashboards -----------------------------------------------------------

    pub async fn fetch_dashboard(&self, branch_id: Option<i64>) -> PosResult<Value> {
        let path = match branch_id {
            Some(id) => format!("/api/calculate/dashboard-details/{id}/"),
            None => "/api/calculate/dashboard-details/".to_string(),
        };
        self.get(&path, "Failed to load dashboard").await
    }

    pub async fn fetch_report(&self, branch_id: Option<i64>) -> PosResult<Value> {
        let path = match branch_id {
            Some(id) => format!("/api/calculate/report-dashboard/{id}/"),
            None => "/api/calculate/report-dashboard/".to_string(),
        };
        self.get(&path, "Failed to load report").await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! One-shot loopback HTTP server for exercising the client end to end.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve `responses` in order, one per connection, and return the raw
    /// requests received.
    pub async fn serve(
        responses: Vec<(u16, &'static str, String)>,
    ) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, content_type, body) in responses {
                let (mut socket, _) = listener.accept().await.expect("accept");
                let request = read_request(&mut socket).await;
                seen.push(request);
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.expect("write");
                socket.shutdown().await.ok();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    /// Serve one connection per route, answering each request with the JSON
    /// body of the first route whose path appears in its request line.
    pub async fn serve_routes(
        routes: Vec<(&'static str, u16, String)>,
    ) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..routes.len() {
                let (mut socket, _) = listener.accept().await.expect("accept");
                let request = read_request(&mut socket).await;
                let request_line = request.lines().next().unwrap_or_default().to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(path, _, _)| request_line.contains(&format!(" {path} ")))
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, r#"{"detail":"Not found."}"#.to_string()));
                seen.push(request);
                let reply = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.expect("write");
                socket.shutdown().await.ok();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::serve;
    use super::*;

    #[test]
    fn safe_json_reports_html_bodies_with_preview() {
        let html = "<html>\n  <body>   Bad   Gateway </body></html>";
        let err = safe_json(502, "text/html", html).expect_err("html is not json");
        match err {
            PosError::NotJson {
                status,
                content_type,
                preview,
            } => {
                assert_eq!(status, 502);
                assert_eq!(content_type, "text/html");
                assert_eq!(preview, "<html> <body> Bad Gateway </body></html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn safe_json_accepts_json_without_header_and_empty_bodies() {
        assert_eq!(safe_json(200, "", r#"{"a":1}"#).expect("json"), json!({"a": 1}));
        assert_eq!(safe_json(204, "application/json", "").expect("empty"), Value::Null);
    }

    #[test]
    fn error_message_prefers_detail_then_message_then_errors() {
        assert_eq!(
            error_message(&json!({"detail": "No active account", "message": "x"}), "fb"),
            "No active account"
        );
        assert_eq!(error_message(&json!({"message": "Nope"}), "fb"), "Nope");
        assert_eq!(
            error_message(&json!({"success": false, "error": "Invoice not found"}), "fb"),
            "Invoice not found"
        );
        assert_eq!(
            error_message(&json!({"errors": {"name": ["required"]}}), "fb"),
            r#"{"name":["required"]}"#
        );
        assert_eq!(error_message(&Value::Null, "fallback"), "fallback");
    }

    #[test]
    fn envelope_is_unwrapped_when_present() {
        assert_eq!(envelope_data(json!({"success": true, "data": [1]})), json!([1]));
        assert_eq!(envelope_data(json!([2])), json!([2]));
    }

    #[tokio::test]
    async fn login_returns_token_pair_and_sends_credentials() {
        let (base, server) = serve(vec![(
            200,
            "application/json",
            r#"{"access":"a.b.c","refresh":"r.s.t"}"#.to_string(),
        )])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");

        let (access, refresh) = api.login("rahul", "secret").await.expect("login");
        assert_eq!(access, "a.b.c");
        assert_eq!(refresh, "r.s.t");

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("POST /api/token/ HTTP/1.1"));
        assert!(requests[0].contains(r#""username":"rahul""#));
    }

    #[tokio::test]
    async fn login_without_tokens_is_rejected() {
        let (base, _server) =
            serve(vec![(200, "application/json", r#"{"access":"only"}"#.to_string())]).await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let err = api.login("rahul", "secret").await.expect_err("missing refresh");
        assert!(err.to_string().starts_with("Login response missing tokens"));
    }

    #[tokio::test]
    async fn failed_request_surfaces_server_detail_and_bearer_is_sent() {
        let (base, server) = serve(vec![(
            403,
            "application/json",
            r#"{"success":false,"error":"Permission denied"}"#.to_string(),
        )])
        .await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        api.set_token(Some("tok123".into()));

        let err = api.delete_invoice(5).await.expect_err("forbidden");
        match err {
            PosError::Http { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Permission denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("DELETE /api/invoice/5/ HTTP/1.1"));
        assert!(requests[0]
            .to_ascii_lowercase()
            .contains("authorization: bearer tok123"));
    }

    #[tokio::test]
    async fn products_are_unwrapped_from_envelope() {
        let body = r#"{"success":true,"data":[{"id":1,"name":"Croissant","selling_price":"45.00","category_name":"Bakery"}]}"#;
        let (base, _server) = serve(vec![(200, "application/json", body.to_string())]).await;
        let api = ApiClient::new(&base, Duration::from_secs(5)).expect("client");
        let products = api.fetch_products().await.expect("products");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Croissant");
        assert!(products[0].is_available);
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_network_error() {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).expect("client");
        let err = api.fetch_floors().await.expect_err("nothing listens on port 9");
        assert!(matches!(err, PosError::Network(_)));
    }
}
