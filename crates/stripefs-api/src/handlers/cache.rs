//! /cache and /cache/clear handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct CacheResponse {
    pub entries: usize,
    pub file_generation: u64,
    pub dir_generation: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

fn not_cache(state: &ApiState) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("this daemon runs the {} role", state.role),
    )
}

pub async fn handle_cache(
    State(state): State<ApiState>,
) -> Result<Json<CacheResponse>, (StatusCode, String)> {
    let service = state.cache.as_ref().ok_or_else(|| not_cache(&state))?;
    let stats = service.stats();
    Ok(Json(CacheResponse {
        entries: stats.entries,
        file_generation: stats.file_generation,
        dir_generation: stats.dir_generation,
        hits: stats.hits,
        misses: stats.misses,
    }))
}

/// Empties the fast cache. Records on disk are untouched and repopulate it
/// on the next lookup.
pub async fn handle_cache_clear(
    State(state): State<ApiState>,
) -> Result<Json<ClearResponse>, (StatusCode, String)> {
    let service = state.cache.as_ref().ok_or_else(|| not_cache(&state))?;
    let cleared = service.cache().len();
    service.cache().clear();
    tracing::info!(cleared, "fast cache cleared via API");
    Ok(Json(ClearResponse { cleared }))
}
