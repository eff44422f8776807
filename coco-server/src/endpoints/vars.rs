use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use coco_telemetry::Snapshot;
use serde::Serialize;

use crate::service::ServiceState;

#[derive(Debug, Serialize)]
struct Vars {
    coco: Snapshot,
}

/// Dumps all counters, grouped by subsystem.
///
/// The per-tier ratio summaries are recomputed first.
pub async fn handle(state: State<ServiceState>) -> impl IntoResponse {
    state.tiers().refresh_ratios(state.registry());

    Json(Vars {
        coco: state.registry().snapshot(),
    })
}
