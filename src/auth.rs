use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AppError, AuthError};
use crate::manager::keys::Permission;
use crate::manager::LogManager;

/// Authentication information attached to each authenticated request
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

impl AuthInfo {
    /// Check the per-operation permission mapping.
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermission(permission).into())
        }
    }
}

/// Authentication middleware for the management API.
///
/// Validates the presented key against the manager's key store and
/// attaches `AuthInfo` to the request; per-operation permission checks
/// happen in the handlers.
pub async fn auth_middleware(
    State(manager): State<Arc<LogManager>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = extract_api_key(req.headers())?;
    let ctx = manager.validate_key(&key).await?;

    req.extensions_mut().insert(AuthInfo {
        name: ctx.name,
        permissions: ctx.permissions,
    });

    Ok(next.run(req).await)
}

/// Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>`
fn extract_api_key(headers: &HeaderMap) -> Result<String, AppError> {
    const BEARER_PREFIX: &str = "Bearer ";

    if let Some(auth_header) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
        let token = auth_header
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthError::InvalidKey)?;
        if token.is_empty() {
            return Err(AuthError::InvalidKey.into());
        }
        return Ok(token.to_string());
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    Err(AuthError::InvalidKey.into())
}
