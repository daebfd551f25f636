use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("render timed out: {0}")]
    RenderTimeout(String),
    #[error("submit failed: {0}")]
    Submit(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One accepted solve request. Immutable once accepted; lives for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub email: String,
    pub secret: String,
    pub url: String,
}

/// A tentative computed answer. At most one is retained per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Answer {
    Number(f64),
    Bool(bool),
}

impl Answer {
    /// Adopt an answer from a JSON value (embedded-payload `answer` fields).
    ///
    /// Numbers and booleans are taken as-is; numeric strings are coerced so
    /// that `{"answer": "42"}` still counts. Everything else (null, objects,
    /// arrays, free text) is not an answer.
    pub fn from_json(v: &serde_json::Value) -> Option<Answer> {
        match v {
            serde_json::Value::Number(n) => n.as_f64().map(Answer::Number),
            serde_json::Value::Bool(b) => Some(Answer::Bool(*b)),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(Answer::Number),
            _ => None,
        }
    }
}

impl Serialize for Answer {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            // Integral sums go out as JSON integers so a grader comparing
            // `42` to `42.0` textually is not surprised.
            Answer::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                ser.serialize_i64(n as i64)
            }
            Answer::Number(n) => ser.serialize_f64(n),
            Answer::Bool(b) => ser.serialize_bool(b),
        }
    }
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Submitted,
    NoAnswer,
    NoSubmitUrl,
    NoAction,
    SubmitFailed,
    PlaywrightTimeout,
    Error,
}

/// Ordered diagnostic trace accumulated across a run.
///
/// `steps` records which heuristics were attempted, in order; `details` holds
/// keyed artifacts (decoded snippets, inferred column/page, answer source).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTrace {
    pub steps: Vec<String>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl RunTrace {
    pub fn step(&mut self, name: &str) {
        self.steps.push(name.to_string());
    }

    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s == name)
    }
}

/// Never mutated after construction; logged and discarded.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_code: Option<u16>,
    pub trace: RunTrace,
}

impl RunResult {
    pub fn terminal(status: RunStatus, trace: RunTrace) -> Self {
        Self {
            status,
            submit_code: None,
            trace,
        }
    }
}

/// Downloadable-asset kind, inferred from the URL suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Csv,
    Pdf,
    Other,
}

impl AssetKind {
    pub fn from_url(url: &str) -> AssetKind {
        // Prefer the parsed path so query strings don't defeat the suffix
        // check; fall back to the raw string for data:/relative references.
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        let p = path.to_ascii_lowercase();
        if p.ends_with(".csv") {
            AssetKind::Csv
        } else if p.ends_with(".pdf") {
            AssetKind::Pdf
        } else {
            AssetKind::Other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the whole operation (network + body read).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: None,
            max_bytes: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Best-effort filename from Content-Disposition, else the URL path tail.
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    /// Per-operation navigation timeout.
    pub timeout_ms: u64,
}

/// Rendered page content, captured once right after navigation settles.
/// Read-only for the remainder of the run.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub final_url: String,
    pub status: Option<u16>,
    pub html: String,
    /// Visible text of the body.
    pub text: String,
    pub elapsed_ms: u64,
}

#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, req: &RenderRequest) -> Result<PageSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_from_url_ignores_query_and_case() {
        assert_eq!(AssetKind::from_url("https://x.test/a/report.CSV"), AssetKind::Csv);
        assert_eq!(
            AssetKind::from_url("https://x.test/r.pdf?download=1"),
            AssetKind::Pdf
        );
        assert_eq!(AssetKind::from_url("https://x.test/page.html"), AssetKind::Other);
        assert_eq!(AssetKind::from_url("data:text/csv;base64,QQ=="), AssetKind::Other);
    }

    #[test]
    fn answer_serializes_integral_numbers_as_integers() {
        let n = serde_json::to_string(&Answer::Number(25.0)).unwrap();
        assert_eq!(n, "25");
        let f = serde_json::to_string(&Answer::Number(2.5)).unwrap();
        assert_eq!(f, "2.5");
        let b = serde_json::to_string(&Answer::Bool(true)).unwrap();
        assert_eq!(b, "true");
    }

    #[test]
    fn answer_from_json_coerces_numeric_strings_only() {
        assert_eq!(
            Answer::from_json(&serde_json::json!("42")),
            Some(Answer::Number(42.0))
        );
        assert_eq!(Answer::from_json(&serde_json::json!("not a number")), None);
        assert_eq!(Answer::from_json(&serde_json::Value::Null), None);
        assert_eq!(
            Answer::from_json(&serde_json::json!(false)),
            Some(Answer::Bool(false))
        );
    }

    #[test]
    fn run_status_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::PlaywrightTimeout).unwrap(),
            "\"playwright_timeout\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::NoSubmitUrl).unwrap(),
            "\"no_submit_url\""
        );
    }
}
