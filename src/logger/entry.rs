//! Log entry model: construction, user-agent classification, and
//! response-body sanitization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Only responses under this size are eligible for body capture
const BODY_CAPTURE_CEILING: u64 = 64 * 1024;

/// Captured body snippets are truncated to this many characters
const BODY_SNIPPET_LIMIT: usize = 2048;

/// One structured activity record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub subsystem: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub client_ip: String,
    pub user_agent: UserAgentInfo,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,
    pub status_code: u16,
    pub response_size: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsystem_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

/// Raw user-agent plus derived classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentInfo {
    pub raw: String,
    pub browser: String,
    pub os: String,
    pub mobile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Payload collaborators pass to `SubsystemLogger::log_request`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub response_size: u64,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub cache_status: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub subsystem_data: Option<Value>,
    #[serde(default)]
    pub response_payload: Option<String>,
    #[serde(default)]
    pub include_stack: bool,
}

impl LogEntry {
    /// Construct an immutable entry from collaborator-supplied data.
    pub fn from_request(subsystem: &str, data: RequestData) -> Self {
        let response_body = data
            .response_payload
            .as_deref()
            .and_then(|payload| sanitize_body(payload, data.response_size, &data.response_headers));

        let mut error = data.error;
        if let Some(ref mut err) = error {
            if !data.include_stack {
                err.stack = None;
            }
        }

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            subsystem: subsystem.to_string(),
            method: data.method,
            url: data.url,
            path: data.path,
            client_ip: data.client_ip,
            user_agent: classify_user_agent(&data.user_agent),
            request_headers: data.request_headers,
            status_code: data.status_code,
            response_size: data.response_size,
            response_headers: data.response_headers,
            execution_time_ms: data.execution_time_ms,
            cache_status: data.cache_status,
            caller: data.caller,
            error,
            subsystem_data: data.subsystem_data,
            response_body,
        }
    }

    /// An entry lands in the errors file when it carries an error or a
    /// status of 400 and above.
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status_code >= 400
    }

    /// Lowercase blob used for free-text matching, both in the search
    /// index and for stream filter predicates.
    pub fn searchable_text(&self) -> String {
        let mut blob = String::with_capacity(128);
        blob.push_str(&self.method);
        blob.push(' ');
        blob.push_str(&self.url);
        blob.push(' ');
        blob.push_str(&self.path);
        blob.push(' ');
        blob.push_str(&self.user_agent.raw);
        blob.push(' ');
        blob.push_str(&self.client_ip);
        blob.push(' ');
        blob.push_str(&self.status_code.to_string());
        if let Some(ref err) = self.error {
            blob.push(' ');
            blob.push_str(&err.message);
        }
        if let Some(ref data) = self.subsystem_data {
            blob.push(' ');
            blob.push_str(&data.to_string());
        }
        blob.to_lowercase()
    }
}

/// Derive browser/OS/mobile classification from a raw user-agent string
pub fn classify_user_agent(raw: &str) -> UserAgentInfo {
    let lower = raw.to_lowercase();

    let browser = if lower.contains("edg/") || lower.contains("edge") {
        "Edge"
    } else if lower.contains("opr/") || lower.contains("opera") {
        "Opera"
    } else if lower.contains("chrome") {
        "Chrome"
    } else if lower.contains("safari") {
        "Safari"
    } else if lower.contains("firefox") {
        "Firefox"
    } else if lower.contains("curl") {
        "curl"
    } else {
        "Other"
    };

    let os = if lower.contains("windows") {
        "Windows"
    } else if lower.contains("android") {
        "Android"
    } else if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
        "iOS"
    } else if lower.contains("mac os") || lower.contains("macintosh") {
        "macOS"
    } else if lower.contains("linux") {
        "Linux"
    } else {
        "Other"
    };

    let mobile = lower.contains("mobile")
        || lower.contains("android")
        || lower.contains("iphone")
        || lower.contains("ipad");

    UserAgentInfo {
        raw: raw.to_string(),
        browser: browser.to_string(),
        os: os.to_string(),
        mobile,
    }
}

fn json_credential_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"(?i)"([^"]*(?:password|token|secret|authorization|api[_-]?key|key)[^"]*)"\s*:\s*"[^"]*""#,
        )
        .expect("valid redaction regex")
    })
}

fn form_credential_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\b(password|token|secret|api[_-]?key|key)=[^&\s]+")
            .expect("valid redaction regex")
    })
}

/// Capture a sanitized response-body snippet.
///
/// Returns `None` unless the content type is textual and the response
/// is under the size ceiling. Captured text is truncated and
/// credential-like fields are redacted in place.
pub fn sanitize_body(
    payload: &str,
    response_size: u64,
    response_headers: &HashMap<String, String>,
) -> Option<String> {
    let content_type = response_headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_lowercase())
        .unwrap_or_default();

    let textual = content_type.contains("json")
        || content_type.contains("text")
        || content_type.contains("xml")
        || content_type.contains("javascript")
        || content_type.contains("x-www-form-urlencoded");

    if !textual || response_size > BODY_CAPTURE_CEILING {
        return None;
    }

    let truncated: String = if payload.chars().count() > BODY_SNIPPET_LIMIT {
        payload.chars().take(BODY_SNIPPET_LIMIT).collect()
    } else {
        payload.to_string()
    };

    let redacted = json_credential_pattern().replace_all(&truncated, "\"$1\":\"[REDACTED]\"");
    let redacted = form_credential_pattern().replace_all(&redacted, "$1=[REDACTED]");

    Some(redacted.into_owned())
}
