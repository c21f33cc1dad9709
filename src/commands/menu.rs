use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{lock, parse, to_value};
use crate::{menu, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuFilterPayload {
    #[serde(default)]
    category: String,
    #[serde(default, alias = "search", alias = "q")]
    query: String,
}

/// Fetch (or fall back to the cached) menu and keep it for cart commands.
pub async fn menu_load(state: &AppState) -> Result<Value, String> {
    let snapshot = menu::load_menu(&state.api, &state.db).await?;
    info!(
        items = snapshot.items.len(),
        from_cache = snapshot.from_cache,
        "menu loaded"
    );
    *lock(&state.menu)? = snapshot.items.clone();
    let mut out = to_value(&snapshot)?;
    out["tabs"] = json!(menu::categories(&snapshot.items));
    Ok(out)
}

pub fn menu_filter(state: &AppState, args: Value) -> Result<Value, String> {
    let payload: MenuFilterPayload = parse(args)?;
    let items = lock(&state.menu)?;
    to_value(menu::filter(&items, &payload.category, &payload.query))
}

pub fn menu_categories(state: &AppState) -> Result<Value, String> {
    let items = lock(&state.menu)?;
    to_value(menu::categories(&items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve_routes;
    use crate::test_state::app_state;

    #[tokio::test]
    async fn loaded_menu_feeds_filters() {
        let products = json!([
            { "id": 1, "name": "Croissant", "selling_price": "120.00", "category": 1,
              "category_name": "Pastry", "is_available": true },
            { "id": 2, "name": "Black Forest", "selling_price": "900.00", "category": 2,
              "category_name": "Cakes", "is_available": true },
            { "id": 3, "name": "Almond Croissant", "selling_price": "160.00", "category": 1,
              "category_name": "Pastry", "is_available": false }
        ]);
        let categories = json!([{ "id": 1, "name": "Pastry" }, { "id": 2, "name": "Cakes" }]);
        let (base, _server) = serve_routes(vec![
            ("/api/products/", 200, products.to_string()),
            ("/api/category/", 200, categories.to_string()),
        ])
        .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state(&base, dir.path().to_path_buf());

        let loaded = menu_load(&state).await.expect("menu");
        assert_eq!(loaded["from_cache"], false);
        assert_eq!(loaded["tabs"], json!(["All", "Pastry", "Cakes"]));

        let hits = menu_filter(&state, json!({ "category": "Pastry", "query": " croiss " }))
            .expect("filter");
        assert_eq!(hits.as_array().map(Vec::len), Some(2));

        let tabs = menu_categories(&state).expect("tabs");
        assert_eq!(tabs[0], "All");
    }

    #[test]
    fn filter_before_load_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = app_state("http://127.0.0.1:9", dir.path().to_path_buf());
        let hits = menu_filter(&state, Value::Null).expect("filter");
        assert_eq!(hits, json!([]));
    }
}
