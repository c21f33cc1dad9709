use serde_json::Value;

use crate::{diagnostics, AppState};

pub fn app_about(state: &AppState) -> Result<Value, String> {
    Ok(diagnostics::get_about_info(&state.config, &state.db))
}
