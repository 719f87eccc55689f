// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::core::error::Result;

// --- Framework Models ---

/// Lifecycle of a single module inside one orchestration run.
///
/// Transitions are monotonic: `Idle -> Running -> {Success, Error}`; the two
/// terminal states never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScannerStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl ScannerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScannerStatus::Success | ScannerStatus::Error)
    }
}

/// What a module's execution function hands back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerResult {
    pub data: Value,
    pub summary: Option<String>,
    /// `None` lets the engine fall back to the module's `derive_issues` hook.
    pub issues: Option<Vec<String>>,
}

impl ScannerResult {
    pub fn new(data: Value) -> Self {
        Self { data, summary: None, issues: None }
    }

    /// Serializes a module-specific data struct into the opaque `data` slot.
    pub fn from_data<T: Serialize>(data: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(data)?))
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues = Some(issues);
        self
    }
}

/// The engine-owned wrapper around a module run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedScannerResult {
    pub id: String,
    pub label: String,
    pub status: ScannerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub data: Option<Value>,
    pub summary: Option<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub error: Option<String>,
}

impl ExecutedScannerResult {
    pub fn idle(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            status: ScannerStatus::Idle,
            started_at: None,
            finished_at: None,
            data: None,
            summary: None,
            issues: Vec::new(),
            error: None,
        }
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) {
        if self.status == ScannerStatus::Idle {
            self.status = ScannerStatus::Running;
            self.started_at = Some(at);
        }
    }

    /// A successful module always carries a summary; the label stands in when
    /// the module did not provide one.
    pub fn mark_success(&mut self, result: ScannerResult, issues: Vec<String>, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScannerStatus::Success;
        self.finished_at = Some(at);
        self.summary = Some(result.summary.unwrap_or_else(|| format!("{} completed", self.label)));
        self.data = Some(result.data);
        self.issues = issues;
        self.error = None;
    }

    pub fn mark_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ScannerStatus::Error;
        self.finished_at = Some(at);
        self.data = None;
        self.summary = None;
        self.issues = Vec::new();
        self.error = Some(message.into());
    }

    /// Reads a field out of the opaque `data` payload.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

/// The unit persisted and exported by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScanAggregate {
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub scanners: Vec<ExecutedScannerResult>,
    pub issues: Vec<String>,
}

impl DomainScanAggregate {
    /// Builds the aggregate, flattening module issues in execution order.
    pub fn new(
        domain: String,
        timestamp: DateTime<Utc>,
        scanners: Vec<ExecutedScannerResult>,
    ) -> Self {
        let issues = scanners.iter().flat_map(|s| s.issues.iter().cloned()).collect();
        Self { domain, timestamp, scanners, issues }
    }

    pub fn scanner(&self, id: &str) -> Option<&ExecutedScannerResult> {
        self.scanners.iter().find(|s| s.id == id)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

// --- Interpretation Models ---

/// Severity tier shown to the operator for a whole module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Critical,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerInterpretation {
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
}

impl ScannerInterpretation {
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            recommendation: recommendation.into(),
        }
    }
}

// --- DNS Scanner Models ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub priority: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsData {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub mx: Vec<MxRecord>,
    pub txt: Vec<String>,
    pub cname: Vec<String>,
}

// --- Email Authentication Models ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpfData {
    pub record: String,
    /// The qualifier on the `all` mechanism (`+`, `-`, `~`, `?`), if present.
    pub all_qualifier: Option<String>,
    pub include_count: usize,
    /// Every DNS-querying term, `include` among them.
    pub lookup_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmarcData {
    pub record: String,
    pub policy: Option<String>,
    pub subdomain_policy: Option<String>,
    pub pct: Option<u8>,
    pub rua: Option<String>,
    pub ruf: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkimRecord {
    pub selector: String,
    pub record: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmailAuthStatus {
    FullyConfigured,
    Partial,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAuthData {
    pub spf: Option<SpfData>,
    pub spf_records_found: usize,
    pub dmarc: Option<DmarcData>,
    pub dkim: Vec<DkimRecord>,
    pub status: EmailAuthStatus,
}

// --- Certificate Transparency Models ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub common_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    pub total_found: usize,
    pub unique: usize,
    pub active: usize,
    pub expired: usize,
    pub wildcards: usize,
    pub issuers: Vec<String>,
    pub certificates: Vec<CertificateInfo>,
}

// --- RDAP Models ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdapData {
    pub found: bool,
    pub rdap_server: Option<String>,
    pub ldh_name: Option<String>,
    pub registrar: Option<String>,
    pub statuses: Vec<String>,
    pub nameservers: Vec<String>,
    pub dnssec: Option<bool>,
    pub registered: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub last_changed: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
    pub error: Option<String>,
}

// --- TLS Models ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsEndpoint {
    pub ip_address: String,
    pub grade: Option<String>,
    pub protocols: Vec<String>,
    pub forward_secrecy: Option<i64>,
    pub hsts_status: Option<String>,
    pub hsts_max_age: Option<i64>,
    pub vulnerabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsData {
    pub host: String,
    /// The worst grade across all endpoints.
    pub grade: Option<String>,
    pub endpoints: Vec<TlsEndpoint>,
}

// --- HTTP Header Models ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersData {
    pub reachable: bool,
    pub grade: Option<String>,
    pub score: Option<u8>,
    pub missing_headers: Vec<String>,
    pub report_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut r = ExecutedScannerResult::idle("dns", "DNS Records");
        r.mark_running(at("2026-01-01T00:00:00Z"));
        r.mark_error("boom", at("2026-01-01T00:00:01Z"));
        r.mark_success(ScannerResult::new(json!({})), vec![], at("2026-01-01T00:00:02Z"));
        r.mark_running(at("2026-01-01T00:00:03Z"));

        assert_eq!(r.status, ScannerStatus::Error);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.data.is_none());
        assert_eq!(r.finished_at, Some(at("2026-01-01T00:00:01Z")));
    }

    #[test]
    fn success_always_has_summary() {
        let mut r = ExecutedScannerResult::idle("custom", "Custom Check");
        r.mark_running(at("2026-01-01T00:00:00Z"));
        r.mark_success(ScannerResult::new(json!({"ok": true})), vec![], at("2026-01-01T00:00:01Z"));
        assert_eq!(r.summary.as_deref(), Some("Custom Check completed"));
        assert!(r.data.is_some());
    }

    #[test]
    fn aggregate_export_uses_stable_field_names() {
        let mut r = ExecutedScannerResult::idle("dns", "DNS Records");
        r.mark_running(at("2026-01-01T00:00:00Z"));
        r.mark_success(
            ScannerResult::new(json!({})).with_summary("ok"),
            vec!["No MX records found".to_string()],
            at("2026-01-01T00:00:01Z"),
        );
        let aggregate =
            DomainScanAggregate::new("example.com".into(), at("2026-01-01T00:00:00Z"), vec![r]);
        let value: Value = serde_json::from_str(&aggregate.to_json_pretty().unwrap()).unwrap();

        for key in ["domain", "timestamp", "scanners", "issues"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let scanner = &value["scanners"][0];
        let fields = [
            "id", "label", "status", "startedAt", "finishedAt", "data", "summary", "issues",
            "error",
        ];
        for key in fields {
            assert!(scanner.get(key).is_some(), "missing scanners[].{key}");
        }
        assert_eq!(scanner["status"], "success");

        let back = DomainScanAggregate::from_json(&aggregate.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, aggregate);
    }
}
