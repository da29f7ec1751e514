//! Analytics handlers: fixed-window bucketing of matched entries.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::ApiState;
use crate::auth::AuthInfo;
use crate::error::AppError;
use crate::logger::LogEntry;
use crate::manager::keys::Permission;
use crate::manager::search::SearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl Period {
    fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(AppError::Validation(format!(
                "unknown period '{}', expected hour|day|week|month",
                other
            ))),
        }
    }

    fn span(&self) -> Duration {
        match self {
            Period::Hour => Duration::hours(1),
            Period::Day => Duration::days(1),
            Period::Week => Duration::days(7),
            Period::Month => Duration::days(30),
        }
    }

    /// hour -> 5-minute buckets, day -> 1-hour, week/month -> 1-day
    fn bucket(&self) -> Duration {
        match self {
            Period::Hour => Duration::minutes(5),
            Period::Day => Duration::hours(1),
            Period::Week | Period::Month => Duration::days(1),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsParams {
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    pub start: DateTime<Utc>,
    pub requests: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub subsystem: String,
    pub period: &'static str,
    pub total_requests: usize,
    pub total_errors: usize,
    pub error_rate: f64,
    pub avg_execution_time_ms: f64,
    pub status_distribution: BTreeMap<String, usize>,
    pub method_distribution: BTreeMap<String, usize>,
    pub timeline: Vec<TimelineBucket>,
}

/// GET /analytics/:subsystem?period=
pub async fn subsystem(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Path(name): Path<String>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsReport>, AppError> {
    auth.require(Permission::Read)?;

    if state.manager.logger(&name).is_none() {
        return Err(AppError::NotFound(format!("subsystem {}", name)));
    }

    let period = Period::parse(params.period.as_deref().unwrap_or("day"))?;
    let now = Utc::now();

    let mut query = SearchQuery::for_subsystem(&name);
    query.start_date = Some(now - period.span());
    query.end_date = Some(now);
    query.limit = usize::MAX;

    let results = state.manager.search_logs(&query).await;
    Ok(Json(build_report(&name, &results.results, period, now)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewSubsystem {
    pub requests: usize,
    pub errors: usize,
    pub error_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub period: &'static str,
    pub total_requests: usize,
    pub total_errors: usize,
    pub error_rate: f64,
    pub avg_execution_time_ms: f64,
    pub subsystems: BTreeMap<String, OverviewSubsystem>,
}

/// GET /analytics/overview?period=
pub async fn overview(
    State(state): State<ApiState>,
    Extension(auth): Extension<AuthInfo>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<Overview>, AppError> {
    auth.require(Permission::Read)?;

    let period = Period::parse(params.period.as_deref().unwrap_or("day"))?;
    let now = Utc::now();

    let mut total_requests = 0;
    let mut total_errors = 0;
    let mut total_time = 0u64;
    let mut subsystems = BTreeMap::new();

    for name in state.manager.subsystem_names() {
        let mut query = SearchQuery::for_subsystem(&name);
        query.start_date = Some(now - period.span());
        query.end_date = Some(now);
        query.limit = usize::MAX;

        let results = state.manager.search_logs(&query).await;
        let requests = results.results.len();
        let errors = results.results.iter().filter(|e| e.is_error()).count();
        total_time += results
            .results
            .iter()
            .map(|e| e.execution_time_ms)
            .sum::<u64>();

        total_requests += requests;
        total_errors += errors;
        subsystems.insert(
            name,
            OverviewSubsystem {
                requests,
                errors,
                error_rate: ratio(errors, requests),
            },
        );
    }

    Ok(Json(Overview {
        period: period.as_str(),
        total_requests,
        total_errors,
        error_rate: ratio(total_errors, total_requests),
        avg_execution_time_ms: if total_requests == 0 {
            0.0
        } else {
            total_time as f64 / total_requests as f64
        },
        subsystems,
    }))
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Bucket matched entries into fixed windows ending at `now`.
fn build_report(
    subsystem: &str,
    entries: &[Arc<LogEntry>],
    period: Period,
    now: DateTime<Utc>,
) -> AnalyticsReport {
    let span = period.span();
    let bucket = period.bucket();
    let window_start = now - span;
    let bucket_count = (span.num_seconds() / bucket.num_seconds()).max(1) as usize;

    let mut timeline: Vec<TimelineBucket> = (0..bucket_count)
        .map(|i| TimelineBucket {
            start: window_start + bucket * i as i32,
            requests: 0,
            errors: 0,
        })
        .collect();

    let mut status_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut method_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_errors = 0;
    let mut total_time = 0u64;

    for entry in entries {
        if entry.timestamp < window_start || entry.timestamp > now {
            continue;
        }

        let offset = (entry.timestamp - window_start).num_seconds();
        let idx = ((offset / bucket.num_seconds()) as usize).min(bucket_count - 1);
        timeline[idx].requests += 1;

        let is_error = entry.is_error();
        if is_error {
            timeline[idx].errors += 1;
            total_errors += 1;
        }
        total_time += entry.execution_time_ms;

        *status_distribution
            .entry(entry.status_code.to_string())
            .or_insert(0) += 1;
        *method_distribution
            .entry(entry.method.clone())
            .or_insert(0) += 1;
    }

    let total_requests: usize = timeline.iter().map(|b| b.requests).sum();

    AnalyticsReport {
        subsystem: subsystem.to_string(),
        period: period.as_str(),
        total_requests,
        total_errors,
        error_rate: ratio(total_errors, total_requests),
        avg_execution_time_ms: if total_requests == 0 {
            0.0
        } else {
            total_time as f64 / total_requests as f64
        },
        status_distribution,
        method_distribution,
        timeline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RequestData;

    fn entry_at(now: DateTime<Utc>, minutes_ago: i64, status: u16, method: &str) -> Arc<LogEntry> {
        let mut entry = LogEntry::from_request(
            "cache",
            RequestData {
                method: method.to_string(),
                url: "/x".to_string(),
                status_code: status,
                execution_time_ms: 10,
                ..Default::default()
            },
        );
        entry.timestamp = now - Duration::minutes(minutes_ago);
        Arc::new(entry)
    }

    #[test]
    fn test_period_bucket_sizes() {
        assert_eq!(Period::Hour.bucket(), Duration::minutes(5));
        assert_eq!(Period::Day.bucket(), Duration::hours(1));
        assert_eq!(Period::Week.bucket(), Duration::days(1));
        assert_eq!(Period::Month.bucket(), Duration::days(1));
    }

    #[test]
    fn test_period_parse_rejects_unknown() {
        assert!(Period::parse("hour").is_ok());
        assert!(Period::parse("fortnight").is_err());
    }

    #[test]
    fn test_hour_report_buckets() {
        let now = Utc::now();
        let entries = vec![
            entry_at(now, 2, 200, "GET"),
            entry_at(now, 3, 500, "GET"),
            entry_at(now, 32, 200, "POST"),
        ];

        let report = build_report("cache", &entries, Period::Hour, now);
        assert_eq!(report.timeline.len(), 12);
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.total_errors, 1);
        assert!((report.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.avg_execution_time_ms - 10.0).abs() < 1e-9);

        // The two recent entries share the final bucket
        let last = report.timeline.last().unwrap();
        assert_eq!(last.requests, 2);
        assert_eq!(last.errors, 1);

        assert_eq!(report.status_distribution["200"], 2);
        assert_eq!(report.status_distribution["500"], 1);
        assert_eq!(report.method_distribution["GET"], 2);
        assert_eq!(report.method_distribution["POST"], 1);
    }

    #[test]
    fn test_entries_outside_window_excluded() {
        let now = Utc::now();
        let entries = vec![entry_at(now, 120, 200, "GET")];
        let report = build_report("cache", &entries, Period::Hour, now);
        assert_eq!(report.total_requests, 0);
    }

    #[test]
    fn test_empty_report() {
        let report = build_report("cache", &[], Period::Day, Utc::now());
        assert_eq!(report.timeline.len(), 24);
        assert_eq!(report.error_rate, 0.0);
        assert_eq!(report.avg_execution_time_ms, 0.0);
    }
}
