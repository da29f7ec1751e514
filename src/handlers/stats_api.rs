//! Subsystem catalogue and statistics handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use super::ApiState;
use crate::auth::AuthInfo;
use crate::error::AppError;
use crate::manager::keys::Permission;

/// GET /subsystems
pub async fn list_subsystems(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;
    Ok(Json(json!({
        "subsystems": state.manager.subsystem_names(),
    })))
}

/// GET /subsystems/:name/stats
pub async fn subsystem_stats(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;

    let logger = state
        .manager
        .logger(&name)
        .ok_or_else(|| AppError::NotFound(format!("subsystem {}", name)))?;

    Ok(Json(serde_json::to_value(logger.stats())?))
}

/// GET /stats — aggregate across the registry
pub async fn stats(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;
    let stats = state.manager.get_stats().await;
    Ok(Json(serde_json::to_value(&stats)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubsystemPerformance {
    requests_per_second: f64,
    buffer_size: usize,
    open_file_handles: usize,
}

/// GET /stats/performance — runtime health snapshot
pub async fn performance(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;

    let stats = state.manager.get_stats().await;
    let subsystems: HashMap<String, SubsystemPerformance> = stats
        .subsystems
        .iter()
        .map(|(name, s)| {
            (
                name.clone(),
                SubsystemPerformance {
                    requests_per_second: s.requests_per_second,
                    buffer_size: s.buffer_size,
                    open_file_handles: s.open_file_handles,
                },
            )
        })
        .collect();

    Ok(Json(json!({
        "uptimeSecs": stats.uptime_secs,
        "activeStreamConnections": state.stream.connection_count(),
        "totalIndexedEntries": stats.total_indexed_entries,
        "subsystems": subsystems,
    })))
}
