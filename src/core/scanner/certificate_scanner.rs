// src/core/scanner/certificate_scanner.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::clock::Clock;
use crate::core::error::Result;
use crate::core::http::{HttpFetcher, build_url};
use crate::core::models::{CertificateData, CertificateInfo, ScannerResult};
use crate::core::registry::DomainScanner;

const CRITICAL_EXPIRY_DAYS: i64 = 7;
const WARNING_EXPIRY_DAYS: i64 = 30;
const RECENTLY_EXPIRED_DAYS: i64 = 7;
const MAX_REASONABLE_ACTIVE: usize = 10;
const MAX_REASONABLE_ISSUERS: usize = 3;

/// One row of the CT log search, with the SAN list split out.
#[derive(Debug, Clone)]
struct CtEntry {
    common_name: String,
    names: Vec<String>,
    issuer_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl CtEntry {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }

    fn covers(&self, name: &str) -> bool {
        self.common_name.eq_ignore_ascii_case(name)
            || self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Searches Certificate Transparency logs for certificates issued to the domain.
pub struct CertificateScanner {
    fetcher: Arc<dyn HttpFetcher>,
    clock: Arc<dyn Clock>,
    endpoint: String,
}

impl CertificateScanner {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        clock: Arc<dyn Clock>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            clock,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DomainScanner for CertificateScanner {
    fn id(&self) -> &'static str {
        "certificates"
    }

    fn label(&self) -> &'static str {
        "Certificate Transparency"
    }

    fn description(&self) -> &'static str {
        "Reviews certificates logged for the domain for expiry, self-signing and unusual issuance."
    }

    fn order(&self) -> Option<u32> {
        Some(30)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        info!(target = %domain, "Starting certificate transparency scan.");
        let url = build_url(&self.endpoint, &[("q", domain), ("output", "json")])?;
        let body = self.fetcher.get_json(&url).await?;

        let rows = body.as_array().map(Vec::as_slice).unwrap_or_default();
        let entries: Vec<CtEntry> = rows.iter().filter_map(parse_entry).collect();
        debug!(rows = rows.len(), parsed = entries.len(), "CT log rows parsed.");

        let now = self.clock.now();
        let (data, issues) = analyze_certificates(rows.len(), &entries, now);
        info!(
            findings = issues.len(),
            unique = data.unique,
            "Certificate transparency scan finished."
        );

        let summary = if data.unique == 0 {
            "No certificates found in CT logs".to_string()
        } else if data.wildcards > 0 {
            // Wildcards are informational: summary only, never an issue.
            format!(
                "{} unique certificate(s): {} active, {} expired, {} wildcard",
                data.unique, data.active, data.expired, data.wildcards
            )
        } else {
            format!(
                "{} unique certificate(s): {} active, {} expired",
                data.unique, data.active, data.expired
            )
        };
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}

/// Rows without a readable validity window are dropped.
fn parse_entry(row: &Value) -> Option<CtEntry> {
    let text = |key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let common_name = text("common_name").to_lowercase();
    let names: Vec<String> = text("name_value")
        .lines()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    let common_name = if common_name.is_empty() {
        names.first().cloned()?
    } else {
        common_name
    };

    Some(CtEntry {
        common_name,
        names,
        issuer_name: text("issuer_name"),
        not_before: parse_ct_date(&text("not_before"))?,
        not_after: parse_ct_date(&text("not_after"))?,
    })
}

/// CT logs report naive UTC timestamps; RFC 3339 and bare dates are accepted too.
pub fn parse_ct_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// The `CN=` component of a distinguished name, or the whole name.
fn issuer_common_name(issuer: &str) -> &str {
    issuer
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("CN="))
        .unwrap_or(issuer)
}

/// Deduplicates the log rows and collects findings.
///
/// # Arguments
/// * `total_found` - Raw row count from the log, before parsing.
/// * `entries` - Parsed rows, any order.
/// * `now` - Reference time for the active and expired split.
///
/// # Returns
/// The module data and the issue list, in the order the checks run.
fn analyze_certificates(
    total_found: usize,
    entries: &[CtEntry],
    now: DateTime<Utc>,
) -> (CertificateData, Vec<String>) {
    // Most recently issued certificate per common name.
    let mut latest: HashMap<&str, &CtEntry> = HashMap::new();
    for entry in entries {
        latest
            .entry(entry.common_name.as_str())
            .and_modify(|current| {
                if entry.not_before > current.not_before {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }
    let mut unique: Vec<&CtEntry> = latest.into_values().collect();
    unique.sort_by(|a, b| a.common_name.cmp(&b.common_name));

    let mut issues = Vec::new();
    let mut certificates = Vec::with_capacity(unique.len());
    let issuers: BTreeSet<String> = unique
        .iter()
        .map(|e| e.issuer_name.clone())
        .filter(|i| !i.is_empty())
        .collect();

    for entry in &unique {
        let active = entry.is_active(now);
        let days_until_expiry = (entry.not_after - now).num_days();

        if active && days_until_expiry <= CRITICAL_EXPIRY_DAYS {
            issues.push(format!(
                "Certificate for {} expires in {} day(s) - renew immediately",
                entry.common_name, days_until_expiry
            ));
        } else if active && days_until_expiry <= WARNING_EXPIRY_DAYS {
            issues.push(format!(
                "Certificate for {} expires in {} days - plan renewal soon",
                entry.common_name, days_until_expiry
            ));
        }

        if issuer_common_name(&entry.issuer_name).eq_ignore_ascii_case(&entry.common_name) {
            issues.push(format!(
                "Certificate for {} is self-signed, not trusted by browsers",
                entry.common_name
            ));
        }

        let expired_days = (now - entry.not_after).num_days();
        if entry.not_after <= now
            && expired_days <= RECENTLY_EXPIRED_DAYS
            && !entries.iter().any(|e| e.is_active(now) && e.covers(&entry.common_name))
        {
            issues.push(format!(
                "Certificate for {} expired recently without replacement ({} day(s) ago)",
                entry.common_name, expired_days
            ));
        }

        certificates.push(CertificateInfo {
            common_name: entry.common_name.clone(),
            issuer_name: entry.issuer_name.clone(),
            not_before: entry.not_before,
            not_after: entry.not_after,
            days_until_expiry,
            active,
        });
    }

    let active = certificates.iter().filter(|c| c.active).count();
    let expired = certificates.iter().filter(|c| c.not_after <= now).count();
    let wildcards = certificates.iter().filter(|c| c.common_name.starts_with("*.")).count();

    if active > MAX_REASONABLE_ACTIVE {
        issues.push(format!(
            "High number of active certificates ({active}), review for unauthorized issuance"
        ));
    }
    if issuers.len() > MAX_REASONABLE_ISSUERS {
        issues.push(format!(
            "Certificates issued by {} different issuers, verify every CA is authorized",
            issuers.len()
        ));
    }

    let data = CertificateData {
        total_found,
        unique: certificates.len(),
        active,
        expired,
        wildcards,
        issuers: issuers.into_iter().collect(),
        certificates,
    };
    (data, issues)
}
