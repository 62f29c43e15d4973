//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use stripefs_services::{CacheStats, NodeStats};

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub role: String,
    pub uptime_secs: u64,
    pub stripe_size: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        role: state.role.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        stripe_size: state.stripe_size,
        nodes: state.nodes.as_ref().map(|n| n.stats()).unwrap_or_default(),
        cache: state.cache.as_ref().map(|c| c.stats()),
    })
}
