use serde_json::Value;

use super::{signed_in, to_value};
use crate::{dashboard, value_i64, AppState};

/// Network summary for an unscoped superuser, otherwise the branch board.
pub async fn dashboard_load(state: &AppState) -> Result<Value, String> {
    let user = signed_in(state)?;
    to_value(dashboard::load_dashboard(&state.api, &user).await?)
}

pub async fn report_load(state: &AppState, args: Value) -> Result<Value, String> {
    let user = signed_in(state)?;
    let branch = value_i64(&args, &["branchId", "branch_id", "branch"]);
    to_value(dashboard::load_report(&state.api, &user, branch).await?)
}
