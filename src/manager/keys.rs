//! API key store: generation, authentication, lifecycle.
//!
//! Keys are registry-scoped to the running process; nothing is
//! persisted across restarts.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::RwLock;

use crate::error::AuthError;

/// Independent permission flags, not a hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
    pub created_at: DateTime<Utc>,
}

/// Listing form: never exposes the full key value
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySummary {
    pub key_prefix: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
    pub created_at: DateTime<Utc>,
}

/// Successful authentication result
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub name: String,
    pub permissions: HashSet<Permission>,
}

impl AuthContext {
    pub fn require(&self, permission: Permission) -> Result<(), AuthError> {
        if self.permissions.contains(&permission) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermission(permission))
        }
    }
}

/// Exposed length of a key in listings and revocation prefixes
pub const KEY_PREFIX_LEN: usize = 8;

pub struct KeyStore {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Mint the default admin key when the store is empty at startup.
    /// Returns the minted key so the caller can surface it once.
    pub async fn ensure_default(&self) -> Option<ApiKey> {
        let mut keys = self.keys.write().await;
        if !keys.is_empty() {
            return None;
        }

        let key = build_key(
            "default-admin",
            [Permission::Read, Permission::Write, Permission::Delete]
                .into_iter()
                .collect(),
        );
        keys.insert(key.key.clone(), key.clone());
        Some(key)
    }

    pub async fn create(&self, name: &str, permissions: HashSet<Permission>) -> ApiKey {
        let key = build_key(name, permissions);
        self.keys
            .write()
            .await
            .insert(key.key.clone(), key.clone());
        key
    }

    pub async fn revoke(&self, key: &str) -> Option<ApiKey> {
        self.keys.write().await.remove(key)
    }

    /// Resolve a short prefix to a full key. First match wins; a
    /// prefix collision resolves arbitrarily.
    pub async fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            return None;
        }
        self.keys
            .read()
            .await
            .keys()
            .find(|k| k.starts_with(prefix))
            .cloned()
    }

    /// Validate a key without requiring a specific permission.
    pub async fn validate(&self, key: &str) -> Result<AuthContext, AuthError> {
        self.keys
            .read()
            .await
            .get(key)
            .map(|k| AuthContext {
                name: k.name.clone(),
                permissions: k.permissions.clone(),
            })
            .ok_or(AuthError::InvalidKey)
    }

    /// Validate a key and check that it carries the required flag.
    pub async fn authenticate(
        &self,
        key: &str,
        required: Permission,
    ) -> Result<AuthContext, AuthError> {
        let ctx = self.validate(key).await?;
        ctx.require(required)?;
        Ok(ctx)
    }

    pub async fn list(&self) -> Vec<ApiKeySummary> {
        let mut summaries: Vec<ApiKeySummary> = self
            .keys
            .read()
            .await
            .values()
            .map(|k| ApiKeySummary {
                key_prefix: k.key.chars().take(KEY_PREFIX_LEN).collect(),
                name: k.name.clone(),
                permissions: k.permissions.clone(),
                created_at: k.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    pub async fn count(&self) -> usize {
        self.keys.read().await.len()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_key(name: &str, permissions: HashSet<Permission>) -> ApiKey {
    ApiKey {
        key: generate_key(),
        name: name.to_string(),
        permissions,
        created_at: Utc::now(),
    }
}

/// Cryptographically strong random key, hex-encoded.
/// Uniqueness is assumed, not verified.
fn generate_key() -> String {
    let mut bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("elg_{}", hex::encode(bytes))
}
