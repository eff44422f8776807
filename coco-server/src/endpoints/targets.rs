use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::service::ServiceState;

/// Dumps the accounting maps of all targets and the filter.
pub async fn handle(state: State<ServiceState>) -> impl IntoResponse {
    Json(state.accounting().snapshot())
}
