//! Dual-tier log search: a bounded in-memory index per subsystem with
//! a per-day file fallback for date-ranged queries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::logger::subsystem::LogClass;
use crate::logger::LogEntry;

fn default_limit() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Empty means every registered subsystem
    pub subsystems: Vec<String>,
    /// Case-insensitive free-text substring
    pub text: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status_codes: Option<Vec<u16>>,
    pub methods: Option<Vec<String>>,
    pub client_ips: Option<Vec<String>>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            subsystems: Vec::new(),
            text: None,
            start_date: None,
            end_date: None,
            status_codes: None,
            methods: None,
            client_ips: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn for_subsystem(name: &str) -> Self {
        Self {
            subsystems: vec![name.to_string()],
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<Arc<LogEntry>>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// A candidate matches iff every supplied criterion holds.
pub fn entry_matches(entry: &LogEntry, searchable: &str, query: &SearchQuery) -> bool {
    if let Some(ref text) = query.text {
        if !text.is_empty() && !searchable.contains(&text.to_lowercase()) {
            return false;
        }
    }
    if let Some(start) = query.start_date {
        if entry.timestamp < start {
            return false;
        }
    }
    if let Some(end) = query.end_date {
        if entry.timestamp > end {
            return false;
        }
    }
    if let Some(ref codes) = query.status_codes {
        if !codes.contains(&entry.status_code) {
            return false;
        }
    }
    if let Some(ref methods) = query.methods {
        if !methods.iter().any(|m| m.eq_ignore_ascii_case(&entry.method)) {
            return false;
        }
    }
    if let Some(ref ips) = query.client_ips {
        if !ips.contains(&entry.client_ip) {
            return false;
        }
    }
    true
}

/// Criteria for selective in-memory clearing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClearCriteria {
    /// Clear the whole index unconditionally
    pub force: bool,
    pub status_codes: Option<Vec<u16>>,
    pub before: Option<DateTime<Utc>>,
    pub text: Option<String>,
}

struct IndexedEntry {
    searchable: String,
    entry: Arc<LogEntry>,
}

/// Bounded recent-entries search structure. Oldest evicted first.
pub struct SearchIndex {
    max_entries: usize,
    entries: Mutex<VecDeque<IndexedEntry>>,
}

impl SearchIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn insert(&self, entry: Arc<LogEntry>) {
        let indexed = IndexedEntry {
            searchable: entry.searchable_text(),
            entry,
        };
        let mut entries = self.entries.lock().expect("search index poisoned");
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(indexed);
    }

    pub fn scan(&self, query: &SearchQuery) -> Vec<Arc<LogEntry>> {
        let entries = self.entries.lock().expect("search index poisoned");
        entries
            .iter()
            .filter(|ie| entry_matches(&ie.entry, &ie.searchable, query))
            .map(|ie| ie.entry.clone())
            .collect()
    }

    /// Remove matching entries, returning how many were dropped.
    pub fn clear_matching(&self, criteria: &ClearCriteria) -> usize {
        let mut entries = self.entries.lock().expect("search index poisoned");
        if criteria.force {
            let dropped = entries.len();
            entries.clear();
            return dropped;
        }

        let before = entries.len();
        let text = criteria.text.as_ref().map(|t| t.to_lowercase());
        entries.retain(|ie| {
            let mut matched = true;
            if let Some(ref codes) = criteria.status_codes {
                matched &= codes.contains(&ie.entry.status_code);
            }
            if let Some(cutoff) = criteria.before {
                matched &= ie.entry.timestamp < cutoff;
            }
            if let Some(ref text) = text {
                matched &= ie.searchable.contains(text.as_str());
            }
            !matched
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("search index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scan on-disk per-day combined files whose date falls inside the
/// query's range. Malformed lines are skipped, not fatal.
pub async fn scan_files(
    dir: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    query: &SearchQuery,
) -> Vec<Arc<LogEntry>> {
    let mut results = Vec::new();
    let mut date = start.date_naive();
    let last = end.date_naive();

    while date <= last {
        let path = dir.join(LogClass::Combined.file_name(date));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    let entry: LogEntry = match serde_json::from_str(line) {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::debug!(file = ?path, error = %e, "Skipping malformed log line");
                            continue;
                        }
                    };
                    let searchable = entry.searchable_text();
                    if entry_matches(&entry, &searchable, query) {
                        results.push(Arc::new(entry));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(file = ?path, error = %e, "Failed to read log file for search");
            }
        }

        date = match next_day(date) {
            Some(d) => d,
            None => break,
        };
    }

    results
}

fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.succ_opt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RequestData;

    fn entry(status: u16, method: &str, ip: &str, url: &str) -> Arc<LogEntry> {
        Arc::new(LogEntry::from_request(
            "cache",
            RequestData {
                method: method.to_string(),
                url: url.to_string(),
                path: url.to_string(),
                client_ip: ip.to_string(),
                user_agent: "test".to_string(),
                status_code: status,
                ..Default::default()
            },
        ))
    }

    #[test]
    fn test_free_text_is_case_insensitive() {
        let index = SearchIndex::new(100);
        index.insert(entry(200, "GET", "10.0.0.1", "/Assets/App.JS"));

        let mut query = SearchQuery::for_subsystem("cache");
        query.text = Some("assets/app".to_string());
        assert_eq!(index.scan(&query).len(), 1);

        query.text = Some("missing".to_string());
        assert_eq!(index.scan(&query).len(), 0);
    }

    #[test]
    fn test_allowlist_criteria() {
        let index = SearchIndex::new(100);
        index.insert(entry(200, "GET", "10.0.0.1", "/a"));
        index.insert(entry(500, "POST", "10.0.0.2", "/b"));

        let mut query = SearchQuery::for_subsystem("cache");
        query.status_codes = Some(vec![500]);
        assert_eq!(index.scan(&query).len(), 1);

        query.status_codes = None;
        query.methods = Some(vec!["post".to_string()]);
        assert_eq!(index.scan(&query).len(), 1);

        query.methods = None;
        query.client_ips = Some(vec!["10.0.0.1".to_string()]);
        assert_eq!(index.scan(&query).len(), 1);
    }

    #[test]
    fn test_bounded_eviction_oldest_first() {
        let index = SearchIndex::new(2);
        let first = entry(200, "GET", "10.0.0.1", "/first");
        index.insert(first.clone());
        index.insert(entry(200, "GET", "10.0.0.1", "/second"));
        index.insert(entry(200, "GET", "10.0.0.1", "/third"));

        assert_eq!(index.len(), 2);
        let query = SearchQuery::for_subsystem("cache");
        let ids: Vec<String> = index.scan(&query).iter().map(|e| e.id.clone()).collect();
        assert!(!ids.contains(&first.id));
    }

    #[test]
    fn test_clear_matching_by_status() {
        let index = SearchIndex::new(100);
        index.insert(entry(200, "GET", "10.0.0.1", "/a"));
        index.insert(entry(500, "GET", "10.0.0.1", "/b"));
        index.insert(entry(200, "GET", "10.0.0.1", "/c"));

        let dropped = index.clear_matching(&ClearCriteria {
            status_codes: Some(vec![500]),
            ..Default::default()
        });
        assert_eq!(dropped, 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_clear_force_empties_index() {
        let index = SearchIndex::new(100);
        index.insert(entry(200, "GET", "10.0.0.1", "/a"));
        index.insert(entry(500, "GET", "10.0.0.1", "/b"));

        let dropped = index.clear_matching(&ClearCriteria {
            force: true,
            // Criteria are ignored under force
            status_codes: Some(vec![404]),
            ..Default::default()
        });
        assert_eq!(dropped, 2);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_scan_files_skips_malformed_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let date = Utc::now().date_naive();
        let good = entry(200, "GET", "10.0.0.1", "/ok");
        let line = serde_json::to_string(good.as_ref()).unwrap();
        let contents = format!("{}\nnot json at all\n{}\n", line, line);
        tokio::fs::write(
            tmp.path().join(LogClass::Combined.file_name(date)),
            contents,
        )
        .await
        .unwrap();

        let mut query = SearchQuery::for_subsystem("cache");
        query.start_date = Some(Utc::now() - chrono::Duration::hours(1));
        query.end_date = Some(Utc::now() + chrono::Duration::hours(1));

        let results = scan_files(
            tmp.path(),
            query.start_date.unwrap(),
            query.end_date.unwrap(),
            &query,
        )
        .await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_files_missing_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let query = SearchQuery::for_subsystem("cache");
        let now = Utc::now();
        let results = scan_files(tmp.path(), now, now, &query).await;
        assert!(results.is_empty());
    }
}
