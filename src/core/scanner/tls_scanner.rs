// src/core/scanner/tls_scanner.rs

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::error::{Result, ScanError};
use crate::core::http::{HttpFetcher, build_url};
use crate::core::models::{ScannerResult, TlsData, TlsEndpoint};
use crate::core::registry::DomainScanner;

pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLLS: u32 = 30;

/// 180 days.
const HSTS_MIN_MAX_AGE: i64 = 15_552_000;

/// Best first. Grades outside this list are reported but never ranked.
const GRADE_RANKING: &[&str] = &["A+", "A", "A-", "B", "C", "D", "E", "F", "T", "M"];

/// Grades the domain's HTTPS endpoints through an SSL Labs style assessment
/// API: one submission, then polling until the assessment settles.
pub struct TlsScanner {
    fetcher: Arc<dyn HttpFetcher>,
    endpoint: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl TlsScanner {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            fetcher,
            endpoint: endpoint.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_polls = max_polls;
        self
    }

    async fn assess(&self, host: &str) -> Result<Value> {
        let submit_url = build_url(
            &self.endpoint,
            &[("host", host), ("startNew", "on"), ("all", "done")],
        )?;
        let poll_url = build_url(&self.endpoint, &[("host", host), ("all", "done")])?;

        info!(host, "Submitting TLS assessment.");
        let mut report = self.fetcher.get_json(&submit_url).await?;

        for poll in 1..=self.max_polls {
            let status = report.get("status").and_then(Value::as_str).unwrap_or_default();
            match status {
                "READY" => return Ok(report),
                "ERROR" => {
                    let message = report
                        .get("statusMessage")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    warn!(host, message, "TLS assessment reported an error.");
                    return Err(ScanError::Analysis(format!("TLS assessment failed: {message}")));
                }
                _ => {
                    debug!(host, status, poll, "TLS assessment still running.");
                    tokio::time::sleep(self.poll_interval).await;
                    report = self.fetcher.get_json(&poll_url).await?;
                }
            }
        }

        match report.get("status").and_then(Value::as_str) {
            Some("READY") => Ok(report),
            _ => Err(ScanError::Analysis(format!(
                "TLS assessment did not complete after {} polls",
                self.max_polls
            ))),
        }
    }
}

#[async_trait]
impl DomainScanner for TlsScanner {
    fn id(&self) -> &'static str {
        "tls"
    }

    fn label(&self) -> &'static str {
        "TLS Configuration"
    }

    fn description(&self) -> &'static str {
        "Grades HTTPS endpoints for protocols, forward secrecy, HSTS and known TLS vulnerabilities."
    }

    fn timeout(&self) -> Option<Duration> {
        Some(DEFAULT_TLS_TIMEOUT)
    }

    fn order(&self) -> Option<u32> {
        Some(50)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        info!(target = %domain, "Starting TLS scan.");
        let report = self.assess(domain).await?;

        let endpoints: Vec<TlsEndpoint> = report
            .get("endpoints")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(parse_endpoint)
            .collect();
        let data = TlsData {
            host: domain.to_string(),
            grade: worst_grade(&endpoints),
            endpoints,
        };

        let issues = analyze_tls(&data);
        info!(findings = issues.len(), grade = ?data.grade, "TLS scan finished.");

        let summary = match &data.grade {
            _ if data.endpoints.is_empty() => "No HTTPS endpoints found".to_string(),
            Some(grade) => format!("Grade {} across {} endpoint(s)", grade, data.endpoints.len()),
            None => format!("{} endpoint(s) assessed, no grade assigned", data.endpoints.len()),
        };
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}

fn parse_endpoint(endpoint: &Value) -> TlsEndpoint {
    let details = endpoint.get("details").unwrap_or(&Value::Null);
    let flag = |key: &str| details.get(key).and_then(Value::as_bool).unwrap_or(false);

    let protocols = details
        .get("protocols")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| {
            let name = p.get("name").and_then(Value::as_str)?;
            let version = p.get("version").and_then(Value::as_str).unwrap_or_default();
            Some(format!("{name} {version}").trim().to_string())
        })
        .collect();

    let mut vulnerabilities = Vec::new();
    for (present, name) in [
        (flag("heartbleed"), "Heartbleed"),
        (flag("poodle"), "POODLE (SSLv3)"),
        (details.get("poodleTls").and_then(Value::as_i64) == Some(2), "POODLE (TLS)"),
        (flag("vulnBeast"), "BEAST"),
        (flag("freak"), "FREAK"),
        (flag("logjam"), "Logjam"),
        (flag("drownVulnerable"), "DROWN"),
    ] {
        if present {
            vulnerabilities.push(name.to_string());
        }
    }

    let hsts = details.get("hstsPolicy");
    TlsEndpoint {
        ip_address: endpoint
            .get("ipAddress")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        grade: endpoint.get("grade").and_then(Value::as_str).map(str::to_string),
        protocols,
        forward_secrecy: details.get("forwardSecrecy").and_then(Value::as_i64),
        hsts_status: hsts
            .and_then(|h| h.get("status"))
            .and_then(Value::as_str)
            .map(str::to_lowercase),
        hsts_max_age: hsts.and_then(|h| h.get("maxAge")).and_then(Value::as_i64),
        vulnerabilities,
    }
}

fn grade_rank(grade: &str) -> Option<usize> {
    GRADE_RANKING.iter().position(|g| g.eq_ignore_ascii_case(grade))
}

pub fn worst_grade(endpoints: &[TlsEndpoint]) -> Option<String> {
    endpoints
        .iter()
        .filter_map(|e| e.grade.as_deref())
        .filter_map(|g| grade_rank(g).map(|rank| (rank, g)))
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, g)| g.to_string())
}

fn is_deprecated_protocol(protocol: &str) -> bool {
    let lower = protocol.to_lowercase();
    lower.starts_with("ssl") || lower == "tls 1.0" || lower == "tls 1.1"
}

/// One issue per weakness per endpoint, each prefixed with the endpoint IP.
fn analyze_tls(data: &TlsData) -> Vec<String> {
    if data.endpoints.is_empty() {
        return vec!["No HTTPS endpoints found".to_string()];
    }

    let mut issues = Vec::new();
    for endpoint in &data.endpoints {
        let ip = &endpoint.ip_address;

        let deprecated: Vec<&str> = endpoint
            .protocols
            .iter()
            .map(String::as_str)
            .filter(|p| is_deprecated_protocol(p))
            .collect();
        if !deprecated.is_empty() {
            issues.push(format!("{ip}: deprecated protocol(s) enabled: {}", deprecated.join(", ")));
        }

        if endpoint.forward_secrecy == Some(0) {
            issues.push(format!("{ip}: forward secrecy is not supported"));
        }

        for vulnerability in &endpoint.vulnerabilities {
            issues.push(format!("{ip}: vulnerable to {vulnerability}"));
        }

        match endpoint.hsts_status.as_deref() {
            Some("present") => {
                if let Some(max_age) = endpoint.hsts_max_age.filter(|age| *age < HSTS_MIN_MAX_AGE) {
                    issues.push(format!(
                        "{ip}: HSTS max-age ({max_age}s) is below the recommended 180 days"
                    ));
                }
            }
            Some(_) => issues.push(format!("{ip}: HSTS is not enabled")),
            None => {}
        }
    }
    issues
}
