//! Log search, listing, clearing, and download handlers.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use super::ApiState;
use crate::auth::AuthInfo;
use crate::error::AppError;
use crate::manager::keys::Permission;
use crate::manager::search::{ClearCriteria, SearchQuery};

/// Confirmation token required by the master reset
const RESET_CONFIRMATION: &str = "DELETE_ALL_LOGS";

/// POST /logs/search
///
/// Read-only semantically, so the search path is special-cased to the
/// read permission despite being a write-style call.
pub async fn search(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Json(mut query): Json<SearchQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;

    let max = state.config.load().api.max_search_results;
    query.limit = query.limit.min(max).max(1);

    let results = state.manager.search_logs(&query).await;
    Ok(Json(serde_json::to_value(&results)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /logs/:subsystem
pub async fn list(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Path(subsystem): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;

    if state.manager.logger(&subsystem).is_none() {
        return Err(AppError::NotFound(format!("subsystem {}", subsystem)));
    }

    let max = state.config.load().api.max_search_results;
    let mut query = SearchQuery::for_subsystem(&subsystem);
    query.text = params.text;
    query.limit = params.limit.unwrap_or(100).min(max).max(1);
    query.offset = params.offset.unwrap_or(0);

    let results = state.manager.search_logs(&query).await;
    Ok(Json(serde_json::to_value(&results)?))
}

/// DELETE /logs/:subsystem
///
/// Clears matching entries from the in-memory index only; durable
/// files are left untouched.
pub async fn clear(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Path(subsystem): Path<String>,
    criteria: Option<Json<ClearCriteria>>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Delete)?;

    let criteria = criteria.map(|Json(c)| c).unwrap_or_default();
    let dropped = state
        .manager
        .clear_subsystem_logs(&subsystem, &criteria)
        .await?;

    Ok(Json(json!({
        "subsystem": subsystem,
        "cleared": dropped,
    })))
}

/// DELETE /logs?confirm=DELETE_ALL_LOGS
pub async fn master_reset(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Delete)?;

    if params.get("confirm").map(String::as_str) != Some(RESET_CONFIRMATION) {
        return Err(AppError::Validation(format!(
            "master reset requires confirm={}",
            RESET_CONFIRMATION
        )));
    }

    let dropped = state.manager.master_reset().await;
    Ok(Json(json!({ "cleared": dropped })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default = "default_format")]
    pub format: DownloadFormat,
    #[serde(default)]
    pub query: SearchQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Json,
    Csv,
    Txt,
}

fn default_format() -> DownloadFormat {
    DownloadFormat::Json
}

/// POST /logs/download
///
/// Serializes matched entries in the requested format. The serialized
/// size is estimated before transmission; estimates over the
/// configured cap are rejected.
pub async fn download(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<DownloadRequest>,
) -> Result<Response, AppError> {
    auth.require(Permission::Write)?;

    let results = state.manager.search_logs(&request.query).await;
    let body = render_download(&results.results, request.format)?;

    let cap = state.config.load().api.max_download_bytes;
    if body.len() > cap {
        return Err(AppError::Capacity(format!(
            "download of {} bytes exceeds the {} byte cap",
            body.len(),
            cap
        )));
    }

    let (content_type, extension) = match request.format {
        DownloadFormat::Json => ("application/json", "json"),
        DownloadFormat::Csv => ("text/csv", "csv"),
        DownloadFormat::Txt => ("text/plain", "txt"),
    };

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"logs.{}\"", extension),
        ),
    ];

    Ok((headers, body).into_response())
}

fn render_download(
    entries: &[std::sync::Arc<crate::logger::LogEntry>],
    format: DownloadFormat,
) -> Result<String, AppError> {
    match format {
        DownloadFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        DownloadFormat::Csv => {
            let mut out = String::from(
                "id,timestamp,subsystem,method,url,path,clientIp,statusCode,responseSize,executionTimeMs,cacheStatus,error\n",
            );
            for entry in entries {
                // Embedded delimiters are not escaped
                out.push_str(&format!(
                    "{},{},{},{},{},{},{},{},{},{},{},{}\n",
                    entry.id,
                    entry.timestamp.to_rfc3339(),
                    entry.subsystem,
                    entry.method,
                    entry.url,
                    entry.path,
                    entry.client_ip,
                    entry.status_code,
                    entry.response_size,
                    entry.execution_time_ms,
                    entry.cache_status.as_deref().unwrap_or(""),
                    entry
                        .error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or(""),
                ));
            }
            Ok(out)
        }
        DownloadFormat::Txt => {
            let mut out = String::new();
            for entry in entries {
                out.push_str(&format!(
                    "{} [{}] {} {} {} {}ms\n",
                    entry.timestamp.to_rfc3339(),
                    entry.subsystem,
                    entry.method,
                    entry.url,
                    entry.status_code,
                    entry.execution_time_ms,
                ));
            }
            Ok(out)
        }
    }
}
