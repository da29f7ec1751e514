//! Per-connection state: authentication, subscriptions, filters,
//! rate-limit window, and heartbeat bookkeeping.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::protocol::StreamFilters;
use crate::logger::LogEntry;
use crate::manager::keys::Permission;

/// Fixed rate-limit window
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct ConnectionState {
    pub id: Uuid,
    pub authenticated: bool,
    pub key_name: Option<String>,
    pub permissions: HashSet<Permission>,
    pub subscriptions: HashSet<String>,
    pub filters: StreamFilters,
    pub last_pong: Instant,
    msg_count: u32,
    window_start: Instant,
}

impl ConnectionState {
    pub fn new(id: Uuid) -> Self {
        let now = Instant::now();
        Self {
            id,
            authenticated: false,
            key_name: None,
            permissions: HashSet::new(),
            subscriptions: HashSet::new(),
            filters: StreamFilters::default(),
            last_pong: now,
            msg_count: 0,
            window_start: now,
        }
    }

    /// Count one inbound message against the current window. Returns
    /// false once the per-second cap is exceeded; the window resets
    /// after one second.
    pub fn allow_message(&mut self, cap: u32) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = now;
            self.msg_count = 0;
        }
        self.msg_count += 1;
        self.msg_count <= cap
    }

    /// A connection that has not acknowledged within twice the
    /// heartbeat interval is considered half-open.
    pub fn is_stale(&self, heartbeat_interval: Duration) -> bool {
        self.last_pong.elapsed() > heartbeat_interval * 2
    }

    /// Delivery predicate: authenticated, subscribed to the entry's
    /// subsystem, and passing the active filter.
    pub fn wants(&self, entry: &LogEntry) -> bool {
        self.authenticated
            && self.subscriptions.contains(&entry.subsystem)
            && filters_match(&self.filters, entry)
    }

    pub fn sorted_subscriptions(&self) -> Vec<String> {
        let mut subs: Vec<String> = self.subscriptions.iter().cloned().collect();
        subs.sort();
        subs
    }
}

/// Allowlist membership on status/method/client IP plus substring
/// match on the entry's synthesized searchable string. `min_level` is
/// not consulted.
pub fn filters_match(filters: &StreamFilters, entry: &LogEntry) -> bool {
    if let Some(ref codes) = filters.status_codes {
        if !codes.contains(&entry.status_code) {
            return false;
        }
    }
    if let Some(ref methods) = filters.methods {
        if !methods.iter().any(|m| m.eq_ignore_ascii_case(&entry.method)) {
            return false;
        }
    }
    if let Some(ref ips) = filters.client_ips {
        if !ips.contains(&entry.client_ip) {
            return false;
        }
    }
    if let Some(ref text) = filters.text {
        if !text.is_empty() && !entry.searchable_text().contains(&text.to_lowercase()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RequestData;

    fn entry(subsystem: &str, status: u16) -> LogEntry {
        LogEntry::from_request(
            subsystem,
            RequestData {
                method: "GET".to_string(),
                url: "/asset.js".to_string(),
                path: "/asset.js".to_string(),
                client_ip: "203.0.113.9".to_string(),
                user_agent: "test".to_string(),
                status_code: status,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_rate_limit_allows_cap_then_rejects() {
        let mut state = ConnectionState::new(Uuid::new_v4());
        let cap = 5;

        for _ in 0..cap {
            assert!(state.allow_message(cap));
        }
        // The (cap+1)th message within the window is rejected
        assert!(!state.allow_message(cap));
    }

    #[test]
    fn test_stale_detection() {
        let mut state = ConnectionState::new(Uuid::new_v4());
        let heartbeat = Duration::from_millis(10);

        assert!(!state.is_stale(heartbeat));
        state.last_pong = Instant::now() - Duration::from_millis(50);
        assert!(state.is_stale(heartbeat));

        state.last_pong = Instant::now();
        assert!(!state.is_stale(heartbeat));
    }

    #[test]
    fn test_wants_requires_auth_and_subscription() {
        let mut state = ConnectionState::new(Uuid::new_v4());
        let cache_entry = entry("cache", 200);

        assert!(!state.wants(&cache_entry));

        state.authenticated = true;
        assert!(!state.wants(&cache_entry));

        state.subscriptions.insert("cache".to_string());
        assert!(state.wants(&cache_entry));
        assert!(!state.wants(&entry("proxy", 200)));
    }

    #[test]
    fn test_filters_status_allowlist() {
        let filters = StreamFilters {
            status_codes: Some(vec![500, 502]),
            ..Default::default()
        };
        assert!(filters_match(&filters, &entry("cache", 500)));
        assert!(!filters_match(&filters, &entry("cache", 200)));
    }

    #[test]
    fn test_filters_text_substring() {
        let filters = StreamFilters {
            text: Some("ASSET.JS".to_string()),
            ..Default::default()
        };
        assert!(filters_match(&filters, &entry("cache", 200)));

        let filters = StreamFilters {
            text: Some("missing".to_string()),
            ..Default::default()
        };
        assert!(!filters_match(&filters, &entry("cache", 200)));
    }

    #[test]
    fn test_min_level_is_not_enforced() {
        let filters = StreamFilters {
            min_level: Some("error".to_string()),
            ..Default::default()
        };
        // A 200 entry still passes; the field is stored but unused
        assert!(filters_match(&filters, &entry("cache", 200)));
    }
}
