//! Endpoints of the introspection API.

use axum::Router;
use axum::routing::get;

use crate::service::ServiceState;

mod lookup;
mod targets;
mod vars;

/// Returns all routes of the introspection API.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/lookup", get(lookup::handle))
        .route("/targets", get(targets::handle))
        .route("/debug/vars", get(vars::handle))
}
