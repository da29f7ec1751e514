//! API key lifecycle handlers.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

use super::ApiState;
use crate::auth::AuthInfo;
use crate::error::AppError;
use crate::manager::keys::Permission;

/// GET /keys — exposes only a short prefix of each key
pub async fn list(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Read)?;
    let keys = state.manager.list_api_keys().await;
    Ok(Json(json!({ "keys": keys })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

/// POST /keys — the full key value is returned exactly once
pub async fn create(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Write)?;

    if request.name.trim().is_empty() {
        return Err(AppError::Validation("key name must not be empty".to_string()));
    }
    if request.permissions.is_empty() {
        return Err(AppError::Validation(
            "at least one permission is required".to_string(),
        ));
    }

    let key = state
        .manager
        .create_api_key(request.name.trim(), request.permissions)
        .await;
    Ok(Json(serde_json::to_value(&key)?))
}

/// DELETE /keys/:prefix — the prefix is resolved to a full key by
/// first match
pub async fn revoke(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Path(prefix): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require(Permission::Delete)?;

    let full_key = state
        .manager
        .resolve_key_prefix(&prefix)
        .await
        .ok_or_else(|| AppError::NotFound(format!("API key with prefix {}", prefix)))?;

    let revoked = state.manager.revoke_api_key(&full_key).await?;
    Ok(Json(json!({
        "revoked": revoked.name,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_parsing() {
        let request: CreateKeyRequest =
            serde_json::from_str(r#"{"name":"dashboard","permissions":["read","write"]}"#).unwrap();
        assert_eq!(request.name, "dashboard");
        assert!(request.permissions.contains(&Permission::Read));
        assert!(request.permissions.contains(&Permission::Write));
        assert!(!request.permissions.contains(&Permission::Delete));
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let result =
            serde_json::from_str::<CreateKeyRequest>(r#"{"name":"x","permissions":["admin"]}"#);
        assert!(result.is_err());
    }
}
