//! Resolves the target of a host name in every tier.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coco_telemetry::Subsystem;
use serde::Deserialize;

use crate::counters::ErrorCounters;
use crate::service::ServiceState;

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    name: Option<String>,
}

pub async fn handle(state: State<ServiceState>, query: Query<LookupQuery>) -> Response {
    let Some(name) = query.0.name.filter(|name| !name.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing name parameter").into_response();
    };

    let registry = state.registry();
    let mut targets = BTreeMap::new();

    for tier in state.tiers().iter() {
        match tier.lookup(&name) {
            Ok(target) => {
                registry.add(Subsystem::Lookup, tier.name(), 1);
                targets.insert(tier.name(), target.addr());
            }
            Err(error) => {
                coco_log::error!(
                    tier = tier.name(),
                    error = &error as &dyn std::error::Error,
                    "failed to look up {name}"
                );
                registry.count(ErrorCounters::LookupHashGet, 1);
            }
        }
    }

    Json(targets).into_response()
}
