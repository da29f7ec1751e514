//! Central registry: subsystem loggers, API keys, dual-tier search,
//! audit trail, and the entry-event fan-out the push server consumes.

pub mod keys;
pub mod search;

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::error::{AppError, AuthError};
use crate::logger::{LogEntry, LoggerEvent, RequestData, SubsystemConfig, SubsystemLogger, SubsystemStats};
use keys::{ApiKey, ApiKeySummary, AuthContext, KeyStore, Permission};
use search::{ClearCriteria, SearchIndex, SearchQuery, SearchResults};

/// Name of the dedicated subsystem recording management operations
pub const AUDIT_SUBSYSTEM: &str = "audit";

/// Aggregate statistics across the registry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub subsystems: HashMap<String, SubsystemStats>,
    pub total_subsystems: usize,
    pub total_api_keys: usize,
    pub total_indexed_entries: usize,
    pub uptime_secs: u64,
}

pub struct LogManager {
    log_root: PathBuf,
    defaults: SubsystemConfig,
    max_index_entries: usize,
    loggers: DashMap<String, Arc<SubsystemLogger>>,
    indexes: DashMap<String, Arc<SearchIndex>>,
    keys: KeyStore,
    entry_tx: broadcast::Sender<Arc<LogEntry>>,
    started: Instant,
}

impl LogManager {
    pub fn new(log_root: PathBuf, defaults: SubsystemConfig, max_index_entries: usize) -> Arc<Self> {
        let (entry_tx, _) = broadcast::channel(4096);
        Arc::new(Self {
            log_root,
            defaults,
            max_index_entries: max_index_entries.max(1),
            loggers: DashMap::new(),
            indexes: DashMap::new(),
            keys: KeyStore::new(),
            entry_tx,
            started: Instant::now(),
        })
    }

    /// Mint the default admin key when the store is empty and register
    /// the audit subsystem. Returns the minted key, if any, so the
    /// caller can surface it exactly once.
    pub async fn init(&self) -> Result<Option<ApiKey>, AppError> {
        self.register_subsystem(AUDIT_SUBSYSTEM, None)?;
        Ok(self.keys.ensure_default().await)
    }

    /// Construct and wire a subsystem logger. Re-registering a name
    /// replaces the registry entry; the prior logger's in-flight
    /// buffer is not flushed first. The existing search index is kept.
    pub fn register_subsystem(
        &self,
        name: &str,
        config: Option<SubsystemConfig>,
    ) -> Result<Arc<SubsystemLogger>, AppError> {
        let config = config.unwrap_or_else(|| self.defaults.clone());
        let logger = SubsystemLogger::new(name, &self.log_root, config)?;

        let index = self
            .indexes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SearchIndex::new(self.max_index_entries)))
            .clone();

        let mut events = logger.subscribe();
        let entry_tx = self.entry_tx.clone();
        let subsystem = name.to_string();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LoggerEvent::Entry(entry)) => {
                        index.insert(entry.clone());
                        let _ = entry_tx.send(entry);
                    }
                    Ok(LoggerEvent::FlushError { dropped, message, .. }) => {
                        tracing::warn!(
                            subsystem = %subsystem,
                            dropped = dropped,
                            error = %message,
                            "Subsystem dropped a log batch"
                        );
                    }
                    Ok(LoggerEvent::Rotated { date, .. }) => {
                        tracing::debug!(subsystem = %subsystem, date = %date, "Subsystem rotated");
                    }
                    Ok(LoggerEvent::Shutdown { .. }) | Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            subsystem = %subsystem,
                            skipped = skipped,
                            "Entry event stream lagged"
                        );
                    }
                }
            }
        });

        self.loggers.insert(name.to_string(), logger.clone());
        tracing::info!(subsystem = %name, "Registered subsystem");

        if name != AUDIT_SUBSYSTEM {
            self.audit("register_subsystem", serde_json::json!({ "subsystem": name }));
        }

        Ok(logger)
    }

    pub fn logger(&self, name: &str) -> Option<Arc<SubsystemLogger>> {
        self.loggers.get(name).map(|l| l.clone())
    }

    pub fn subsystem_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loggers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Every new entry across all realtime-enabled subsystems
    pub fn subscribe_entries(&self) -> broadcast::Receiver<Arc<LogEntry>> {
        self.entry_tx.subscribe()
    }

    pub async fn authenticate_request(
        &self,
        key: &str,
        required: Permission,
    ) -> Result<AuthContext, AuthError> {
        self.keys.authenticate(key, required).await
    }

    /// Validate a key without a specific permission requirement
    pub async fn validate_key(&self, key: &str) -> Result<AuthContext, AuthError> {
        self.keys.validate(key).await
    }

    pub async fn create_api_key(
        &self,
        name: &str,
        permissions: HashSet<Permission>,
    ) -> ApiKey {
        let key = self.keys.create(name, permissions.clone()).await;
        self.audit(
            "create_api_key",
            serde_json::json!({
                "name": name,
                "permissions": permissions,
            }),
        );
        key
    }

    pub async fn revoke_api_key(&self, key: &str) -> Result<ApiKey, AppError> {
        match self.keys.revoke(key).await {
            Some(revoked) => {
                self.audit(
                    "revoke_api_key",
                    serde_json::json!({ "name": revoked.name }),
                );
                Ok(revoked)
            }
            None => Err(AppError::NotFound("API key".to_string())),
        }
    }

    pub async fn resolve_key_prefix(&self, prefix: &str) -> Option<String> {
        self.keys.resolve_prefix(prefix).await
    }

    pub async fn list_api_keys(&self) -> Vec<ApiKeySummary> {
        self.keys.list().await
    }

    /// Two-tier search: the in-memory index always, plus on-disk
    /// per-day files when a date range was supplied.
    pub async fn search_logs(&self, query: &SearchQuery) -> SearchResults {
        let subsystems = if query.subsystems.is_empty() {
            self.subsystem_names()
        } else {
            query.subsystems.clone()
        };

        let mut matched: Vec<Arc<LogEntry>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for name in &subsystems {
            if let Some(index) = self.indexes.get(name) {
                for entry in index.scan(query) {
                    seen.insert(entry.id.clone());
                    matched.push(entry);
                }
            }
        }

        if query.start_date.is_some() || query.end_date.is_some() {
            let end = query.end_date.unwrap_or_else(chrono::Utc::now);
            let start = query.start_date.unwrap_or(end);
            for name in &subsystems {
                let dir = self.log_root.join(name);
                for entry in search::scan_files(&dir, start, end, query).await {
                    if seen.insert(entry.id.clone()) {
                        matched.push(entry);
                    }
                }
            }
        }

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len();
        let results: Vec<Arc<LogEntry>> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        SearchResults {
            results,
            total,
            limit: query.limit,
            offset: query.offset,
            has_more: total > query.offset.saturating_add(query.limit),
        }
    }

    /// Remove matching entries from the in-memory index only; durable
    /// files are not touched by this call regardless of criteria.
    pub async fn clear_subsystem_logs(
        &self,
        subsystem: &str,
        criteria: &ClearCriteria,
    ) -> Result<usize, AppError> {
        let index = self
            .indexes
            .get(subsystem)
            .map(|i| i.clone())
            .ok_or_else(|| AppError::NotFound(format!("subsystem {}", subsystem)))?;

        let dropped = index.clear_matching(criteria);
        self.audit(
            "clear_subsystem_logs",
            serde_json::json!({
                "subsystem": subsystem,
                "force": criteria.force,
                "dropped": dropped,
            }),
        );
        Ok(dropped)
    }

    /// Forced clear of every registered subsystem's index
    pub async fn master_reset(&self) -> usize {
        let force = ClearCriteria {
            force: true,
            ..Default::default()
        };

        let mut dropped = 0;
        for index in self.indexes.iter() {
            dropped += index.clear_matching(&force);
        }

        self.audit(
            "master_reset",
            serde_json::json!({
                "subsystems": self.loggers.len(),
                "dropped": dropped,
            }),
        );
        dropped
    }

    pub async fn get_stats(&self) -> ManagerStats {
        let mut subsystems = HashMap::new();
        for entry in self.loggers.iter() {
            subsystems.insert(entry.key().clone(), entry.value().stats());
        }

        let total_indexed_entries = self.indexes.iter().map(|i| i.len()).sum();

        ManagerStats {
            total_subsystems: subsystems.len(),
            subsystems,
            total_api_keys: self.keys.count().await,
            total_indexed_entries,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn indexed_entries(&self, subsystem: &str) -> usize {
        self.indexes.get(subsystem).map(|i| i.len()).unwrap_or(0)
    }

    /// Best-effort flush-and-close of every registered logger
    pub async fn shutdown(&self) {
        for entry in self.loggers.iter() {
            entry.value().shutdown().await;
        }
        tracing::info!("All subsystem loggers shut down");
    }

    /// Append one management-operation record to the audit trail
    fn audit(&self, action: &str, details: serde_json::Value) {
        if let Some(audit) = self.loggers.get(AUDIT_SUBSYSTEM) {
            audit.log_request(RequestData {
                method: "AUDIT".to_string(),
                url: format!("audit://{}", action),
                path: action.to_string(),
                client_ip: "internal".to_string(),
                user_agent: concat!("edgelog/", env!("CARGO_PKG_VERSION")).to_string(),
                status_code: 200,
                subsystem_data: Some(details),
                ..Default::default()
            });
        }
    }
}
