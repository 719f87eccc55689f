// tests/end_to_end.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use domain_posture::config::ScanConfig;
use domain_posture::core::clock::{Clock, ManualClock};
use domain_posture::core::engine::ScanEngine;
use domain_posture::core::interpretation::interpret;
use domain_posture::core::models::{DomainScanAggregate, ScannerStatus, Severity};
use domain_posture::core::scanner::build_engine_with;
use domain_posture::core::testing::{StaticFetcher, StaticResolver};

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z").unwrap().with_timezone(&Utc)
}

fn offline_config() -> ScanConfig {
    ScanConfig {
        tls_poll_interval_secs: 0,
        tls_max_polls: 2,
        ..ScanConfig::default()
    }
}

/// Every external service answers with "nothing to report", and DNS knows
/// nothing about the domain.
fn quiet_fetcher() -> StaticFetcher {
    StaticFetcher::new()
        .route("crt.sh", "[]")
        .route("ssllabs.com", json!({"status": "READY", "endpoints": []}).to_string())
}

fn engine_with(fetcher: Arc<StaticFetcher>, resolver: StaticResolver) -> ScanEngine {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start()));
    build_engine_with(&offline_config(), fetcher, Arc::new(resolver), clock)
}

#[tokio::test]
async fn unconfigured_domain_reports_missing_email_authentication() {
    let engine = engine_with(Arc::new(quiet_fetcher()), StaticResolver::new());
    let aggregate = engine.run_all("https://Example.com/").await;

    assert_eq!(aggregate.domain, "example.com");
    assert_eq!(aggregate.timestamp, start());
    assert_eq!(aggregate.scanners.len(), 6);
    assert!(aggregate.scanners.iter().all(|s| s.status == ScannerStatus::Success));

    assert!(aggregate.issues.contains(&"Missing SPF record".to_string()));
    assert!(aggregate.issues.contains(&"Missing DMARC record".to_string()));
    assert!(aggregate.issues.iter().any(|i| i.starts_with("No DKIM record found")));

    let email = aggregate.scanner("email-auth").unwrap();
    assert_eq!(interpret(email).severity, Severity::Critical);

    let rdap = aggregate.scanner("rdap").unwrap();
    assert_eq!(rdap.summary.as_deref(), Some("RDAP lookup failed"));
    assert_eq!(interpret(rdap).severity, Severity::Info);

    let headers = aggregate.scanner("headers").unwrap();
    assert_eq!(headers.data_field("reachable"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn aggregate_issues_follow_execution_order() {
    let engine = engine_with(Arc::new(quiet_fetcher()), StaticResolver::new());
    let aggregate = engine.run_all("example.com").await;

    let flattened: Vec<String> = aggregate.scanners.iter().flat_map(|s| s.issues.clone()).collect();
    assert_eq!(aggregate.issues, flattened);
    assert!(aggregate.issues[0].contains("not reachable"));
}

#[tokio::test]
async fn export_round_trips_with_stable_field_names() {
    let engine = engine_with(Arc::new(quiet_fetcher()), StaticResolver::new());
    let aggregate = engine.run_all("example.com").await;

    let exported = aggregate.to_json_pretty().unwrap();
    let value: Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(value["domain"], "example.com");
    assert_eq!(value["scanners"][0]["id"], "dns");
    assert!(value["scanners"][0]["startedAt"].is_string());
    assert!(value["scanners"][0]["finishedAt"].is_string());

    assert_eq!(DomainScanAggregate::from_json(&exported).unwrap(), aggregate);
}

#[tokio::test]
async fn repeat_scans_are_served_from_cache() {
    let fetcher = Arc::new(quiet_fetcher());
    let engine = engine_with(fetcher.clone(), StaticResolver::new());

    engine.run_all("example.com").await;
    let requests_after_first = fetcher.requests().len();
    let second = engine.run_all("example.com").await;

    assert_eq!(fetcher.requests().len(), requests_after_first);
    assert!(second.issues.contains(&"Missing DMARC record".to_string()));
}

#[tokio::test]
async fn run_one_is_repeatable_with_fixed_fakes() {
    let engine = engine_with(Arc::new(quiet_fetcher()), StaticResolver::new());

    let first = engine.run_one("example.com", "email-auth").await.unwrap();
    let second = engine.run_one("example.com", "email-auth").await.unwrap();

    assert_eq!(first.status, ScannerStatus::Success);
    assert_eq!(first.data, second.data);
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.issues, second.issues);

    let err = engine.run_one("example.com", "whois").await.unwrap_err();
    assert_eq!(err.to_string(), "Scanner not found: whois");
}
