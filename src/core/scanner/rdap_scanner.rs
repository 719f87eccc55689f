// src/core/scanner/rdap_scanner.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::engine::root_domain;
use crate::core::error::{Result, ScanError};
use crate::core::http::HttpFetcher;
use crate::core::models::{RdapData, ScannerResult};
use crate::core::registry::DomainScanner;

const RENEWAL_WARNING_DAYS: i64 = 30;

/// Statuses that mean the domain is, or is about to be, out of service.
/// Compared after lower-casing and removing spaces.
const PROBLEMATIC_STATUSES: &[&str] = &[
    "clienthold",
    "serverhold",
    "redemptionperiod",
    "pendingdelete",
    "pendingrestore",
];

/// Looks the domain up with its registry's RDAP server, found through the
/// IANA bootstrap file.
pub struct RdapScanner {
    fetcher: Arc<dyn HttpFetcher>,
    clock: Arc<dyn Clock>,
    bootstrap_url: String,
}

impl RdapScanner {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        clock: Arc<dyn Clock>,
        bootstrap_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            clock,
            bootstrap_url: bootstrap_url.into(),
        }
    }

    async fn lookup(&self, domain: &str) -> Result<(String, Value)> {
        let tld = domain.rsplit('.').next().unwrap_or(domain);
        debug!(tld, url = %self.bootstrap_url, "Fetching RDAP bootstrap.");
        let bootstrap = self.fetcher.get_json(&self.bootstrap_url).await?;

        // Resolve the registry's RDAP base URL.
        let base = find_rdap_server(&bootstrap, tld).ok_or_else(|| {
            ScanError::Analysis(format!("no RDAP server is registered for .{tld}"))
        })?;
        let url = format!("{}domain/{}", base, domain);
        debug!(url = %url, "Querying RDAP server.");
        let response = self.fetcher.get_json(&url).await?;
        Ok((base, response))
    }
}

#[async_trait]
impl DomainScanner for RdapScanner {
    fn id(&self) -> &'static str {
        "rdap"
    }

    fn label(&self) -> &'static str {
        "Domain Registration"
    }

    fn description(&self) -> &'static str {
        "Reads registration data over RDAP: expiry, registrar, nameservers, DNSSEC, status codes."
    }

    fn order(&self) -> Option<u32> {
        Some(40)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        info!(target = %domain, "Starting RDAP scan.");

        // Registries hold the registrable name, not the www host.
        let domain = root_domain(domain);
        let (server, response) = match self.lookup(domain).await {
            Ok(found) => found,
            Err(e) => {
                // Registration data is optional for many TLDs; the module still succeeds.
                warn!(target = %domain, error = %e, "RDAP lookup failed.");
                let reason = match &e {
                    ScanError::Status { status: 404, .. } => {
                        "the domain is not registered with its RDAP server".to_string()
                    }
                    other => other.to_string(),
                };
                let data = RdapData {
                    error: Some(reason.clone()),
                    ..RdapData::default()
                };
                return Ok(ScannerResult::from_data(&data)?
                    .with_summary("RDAP lookup failed")
                    .with_issues(vec![format!("RDAP lookup failed: {reason}")]));
            }
        };

        let data = parse_rdap_response(&response, server, self.clock.now());
        let issues = analyze_rdap(&data);
        info!(findings = issues.len(), registrar = ?data.registrar, "RDAP scan finished.");

        let summary = summarize(&data);
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}

/// `services` is a list of `[[tlds...], [urls...]]` pairs. HTTPS URLs are
/// preferred; the returned base always ends in `/`.
pub fn find_rdap_server(bootstrap: &Value, tld: &str) -> Option<String> {
    let services = bootstrap.get("services")?.as_array()?;
    services.iter().find_map(|service| {
        let tlds = service.get(0)?.as_array()?;
        if !tlds.iter().filter_map(Value::as_str).any(|t| t.eq_ignore_ascii_case(tld)) {
            return None;
        }
        let urls: Vec<&str> =
            service.get(1)?.as_array()?.iter().filter_map(Value::as_str).collect();
        let url = urls.iter().find(|u| u.starts_with("https://")).or(urls.first())?;
        Some(if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        })
    })
}

fn parse_rdap_response(response: &Value, server: String, now: DateTime<Utc>) -> RdapData {
    let event = |action: &str| {
        response
            .get("events")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|e| {
                e.get("eventAction")
                    .and_then(Value::as_str)
                    .is_some_and(|a| a.eq_ignore_ascii_case(action))
            })
            .and_then(|e| e.get("eventDate").and_then(Value::as_str))
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc))
    };

    let statuses = response
        .get("status")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    let nameservers = response
        .get("nameservers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|ns| ns.get("ldhName").and_then(Value::as_str))
        .map(|ns| ns.trim_end_matches('.').to_lowercase())
        .collect();

    let expires = event("expiration");
    RdapData {
        found: true,
        rdap_server: Some(server),
        ldh_name: response.get("ldhName").and_then(Value::as_str).map(str::to_lowercase),
        registrar: registrar_name(response),
        statuses,
        nameservers,
        dnssec: response
            .get("secureDNS")
            .and_then(|s| s.get("delegationSigned"))
            .and_then(Value::as_bool),
        registered: event("registration"),
        expires,
        last_changed: event("last changed"),
        days_until_expiry: expires.map(|e| days_until(e, now)),
        error: None,
    }
}

/// Whole days until `expires`. A date already in the past counts as at
/// least one day ago, so a lapse of a few hours is never reported as 0.
fn days_until(expires: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    if expires < now {
        -(now - expires).num_days().max(1)
    } else {
        (expires - now).num_days()
    }
}

/// The `fn` property of the vCard on the entity with the `registrar` role.
fn registrar_name(response: &Value) -> Option<String> {
    let entities = response.get("entities")?.as_array()?;
    let registrar = entities.iter().find(|entity| {
        entity
            .get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some("registrar")))
    })?;

    registrar
        .get("vcardArray")?
        .get(1)?
        .as_array()?
        .iter()
        .find(|property| property.get(0).and_then(Value::as_str) == Some("fn"))
        .and_then(|property| property.get(3))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Analyzes the registration data and generates findings.
///
/// # Arguments
/// * `data` - Registration data from a successful lookup.
///
/// # Returns
/// Expiry, DNSSEC, nameserver and status findings, in that order.
fn analyze_rdap(data: &RdapData) -> Vec<String> {
    let mut issues = Vec::new();

    // Analyze expiry.
    match data.days_until_expiry {
        Some(days) if days < 0 => issues.push(format!("Domain expired {} days ago", -days)),
        Some(days) if days <= RENEWAL_WARNING_DAYS => {
            issues.push(format!("Domain expires in {days} days, renew soon"))
        }
        _ => {}
    }

    if data.dnssec == Some(false) {
        issues.push("DNSSEC is not enabled, the delegation is not signed".to_string());
    }

    match data.nameservers.len() {
        0 => issues.push("No nameservers found".to_string()),
        1 => issues.push("Only one nameserver, add redundancy".to_string()),
        _ => {}
    }

    let problematic: Vec<&str> = data
        .statuses
        .iter()
        .filter(|s| PROBLEMATIC_STATUSES.contains(&s.to_lowercase().replace(' ', "").as_str()))
        .map(String::as_str)
        .collect();
    if !problematic.is_empty() {
        issues.push(format!("Domain has problematic status: {}", problematic.join(", ")));
    }

    issues
}

fn summarize(data: &RdapData) -> String {
    let registrar = data.registrar.as_deref().unwrap_or("unknown registrar");
    let expiry = match data.days_until_expiry {
        Some(days) if days < 0 => "expired".to_string(),
        Some(days) => format!("expires in {days} days"),
        None => "expiry date unknown".to_string(),
    };
    format!("{registrar}, {expiry}, {} nameserver(s)", data.nameservers.len())
}
