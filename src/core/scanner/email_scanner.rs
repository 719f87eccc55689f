// src/core/scanner/email_scanner.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::dns::{DnsRecordType, DnsResolver};
use crate::core::engine::root_domain;
use crate::core::error::Result;
use crate::core::models::{
    DkimRecord, DmarcData, EmailAuthData, EmailAuthStatus, ScannerResult, SpfData,
};
use crate::core::registry::DomainScanner;

/// Selectors tried when the domain's real selector is unknown.
pub const DEFAULT_DKIM_SELECTORS: &[&str] = &["default", "selector1", "selector2"];

/// RFC 7208 caps SPF evaluation at 10 DNS-querying terms.
const SPF_INCLUDE_LIMIT: usize = 10;
const SPF_INCLUDE_NEAR_LIMIT: usize = 9;

pub struct EmailAuthScanner {
    resolver: Arc<dyn DnsResolver>,
    dkim_selectors: Vec<String>,
}

impl EmailAuthScanner {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        let selectors = DEFAULT_DKIM_SELECTORS.iter().map(|s| s.to_string()).collect();
        Self::with_selectors(resolver, selectors)
    }

    pub fn with_selectors(resolver: Arc<dyn DnsResolver>, dkim_selectors: Vec<String>) -> Self {
        Self { resolver, dkim_selectors }
    }

    /// SPF records live in the root TXT set and start with `v=spf1`.
    async fn lookup_spf(&self, target: &str) -> Result<Vec<String>> {
        debug!(target, "Looking up SPF record.");
        let records = self.resolver.resolve(target, DnsRecordType::Txt).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.to_lowercase().starts_with("v=spf1"))
            .collect())
    }

    async fn lookup_dmarc(&self, target: &str) -> Result<Option<String>> {
        let dmarc_target = format!("_dmarc.{}", target);
        debug!(target = %dmarc_target, "Looking up DMARC record.");
        let records = self.resolver.resolve(&dmarc_target, DnsRecordType::Txt).await?;
        Ok(records.into_iter().find(|r| r.to_lowercase().starts_with("v=dmarc1")))
    }

    /// A selector that fails to resolve is skipped rather than failing the module.
    async fn lookup_dkim(&self, target: &str) -> Vec<DkimRecord> {
        let mut found_records = Vec::new();
        for selector in &self.dkim_selectors {
            let dkim_target = format!("{selector}._domainkey.{target}");
            match self.resolver.resolve(&dkim_target, DnsRecordType::Txt).await {
                Ok(records) => {
                    if let Some(record) = records.into_iter().find(|r| is_dkim_key(r)) {
                        debug!(selector = %selector, "Found DKIM record.");
                        found_records.push(DkimRecord { selector: selector.clone(), record });
                    }
                }
                Err(e) => {
                    warn!(
                        selector = %selector,
                        target = %dkim_target,
                        error = %e,
                        "DKIM lookup for this selector failed."
                    );
                }
            }
        }
        found_records
    }
}

#[async_trait]
impl DomainScanner for EmailAuthScanner {
    fn id(&self) -> &'static str {
        "email-auth"
    }

    fn label(&self) -> &'static str {
        "Email Authentication"
    }

    fn description(&self) -> &'static str {
        "Checks SPF, DMARC and DKIM records that protect the domain against email spoofing."
    }

    fn order(&self) -> Option<u32> {
        Some(20)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        // Mail records belong to the registrable name, not the www host.
        let root_target = root_domain(domain);
        info!(target = %root_target, "Starting email authentication scan.");

        let (spf_records, dmarc_record, dkim) = tokio::join!(
            self.lookup_spf(root_target),
            self.lookup_dmarc(root_target),
            self.lookup_dkim(root_target),
        );
        let spf_records = spf_records?;
        let dmarc_record = dmarc_record?;

        let configured = [!spf_records.is_empty(), dmarc_record.is_some(), !dkim.is_empty()];
        let status = match configured.iter().filter(|c| **c).count() {
            3 => EmailAuthStatus::FullyConfigured,
            0 => EmailAuthStatus::None,
            _ => EmailAuthStatus::Partial,
        };

        let data = EmailAuthData {
            spf: spf_records.first().map(|r| parse_spf(r)),
            spf_records_found: spf_records.len(),
            dmarc: dmarc_record.as_deref().map(parse_dmarc),
            dkim,
            status,
        };

        let issues = analyze_email_auth(&data, &self.dkim_selectors);
        info!(
            findings = issues.len(),
            status = ?data.status,
            "Email authentication scan finished."
        );
        let summary = summarize(&data);
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}

fn is_dkim_key(record: &str) -> bool {
    let lower = record.to_lowercase();
    lower.contains("v=dkim1") || lower.contains("p=")
}

/// Extracts the `all` qualifier and counts `include:` terms, plus every
/// term that costs a DNS lookup.
///
/// # Returns
/// `include_count` drives the lookup-limit findings. `lookup_count` is the
/// full RFC 7208 tally and is reported as data only.
pub fn parse_spf(record: &str) -> SpfData {
    let mut all_qualifier = None;
    let mut include_count = 0;
    let mut lookup_count = 0;

    for term in record.split_whitespace().skip(1) {
        let term = term.to_lowercase();
        let (qualifier, mechanism) = match term.chars().next() {
            Some(q @ ('+' | '-' | '~' | '?')) => (q, &term[1..]),
            _ => ('+', term.as_str()),
        };

        if mechanism == "all" {
            all_qualifier = Some(qualifier.to_string());
            continue;
        }

        let name = mechanism.split([':', '/', '=']).next().unwrap_or_default();
        if name == "include" && mechanism.len() > "include:".len() {
            include_count += 1;
        }
        if matches!(name, "include" | "a" | "mx" | "ptr" | "exists" | "redirect") {
            lookup_count += 1;
        }
    }

    SpfData {
        record: record.to_string(),
        all_qualifier,
        include_count,
        lookup_count,
    }
}

/// Splits `v=DMARC1; p=reject; ...` into lowercase tag names and raw values.
pub fn parse_dmarc(record: &str) -> DmarcData {
    let tags: HashMap<String, String> = record
        .split(';')
        .filter_map(|tag| {
            let (key, value) = tag.split_once('=')?;
            Some((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect();

    let non_empty = |key: &str| tags.get(key).filter(|v| !v.is_empty()).cloned();
    DmarcData {
        record: record.to_string(),
        policy: non_empty("p").map(|p| p.to_lowercase()),
        subdomain_policy: non_empty("sp").map(|p| p.to_lowercase()),
        pct: tags.get("pct").and_then(|p| p.parse().ok()),
        rua: non_empty("rua"),
        ruf: non_empty("ruf"),
    }
}

/// Turns the collected SPF, DMARC and DKIM data into findings.
///
/// # Arguments
/// * `data` - The parsed records for the root domain.
/// * `selectors` - DKIM selectors that were tried, cited when none matched.
///
/// # Returns
/// Issues in a fixed order: SPF, then DMARC, then DKIM.
fn analyze_email_auth(data: &EmailAuthData, selectors: &[String]) -> Vec<String> {
    let mut issues = Vec::new();

    // Analyze SPF record.
    match &data.spf {
        None => issues.push("Missing SPF record".to_string()),
        Some(spf) => {
            if data.spf_records_found > 1 {
                issues.push(format!(
                    "Multiple SPF records found ({}), receivers treat this as a permanent error",
                    data.spf_records_found
                ));
            }
            match spf.all_qualifier.as_deref() {
                Some("+") => issues.push(
                    "SPF record uses +all, which allows all senders to send as this domain"
                        .to_string(),
                ),
                Some("~") => issues.push(
                    "SPF record uses ~all (soft fail), consider -all for strict enforcement"
                        .to_string(),
                ),
                Some("?") => issues.push(
                    "SPF record uses ?all (neutral), which gives receivers no guidance".to_string(),
                ),
                Some(_) => {}
                None if !spf.record.to_lowercase().contains("redirect=") => {
                    issues.push("SPF record has no 'all' mechanism".to_string())
                }
                None => {}
            }
            // Check the include: budget.
            if spf.include_count > SPF_INCLUDE_LIMIT {
                issues.push(format!(
                    "SPF record has {} include: mechanisms, exceeding the DNS lookup limit of {}",
                    spf.include_count, SPF_INCLUDE_LIMIT
                ));
            } else if spf.include_count >= SPF_INCLUDE_NEAR_LIMIT {
                issues.push(format!(
                    "SPF record has {} include: mechanisms, close to the DNS lookup limit of {}",
                    spf.include_count, SPF_INCLUDE_LIMIT
                ));
            }
        }
    }

    // Analyze DMARC record.
    match &data.dmarc {
        None => issues.push("Missing DMARC record".to_string()),
        Some(dmarc) => {
            match dmarc.policy.as_deref() {
                Some("reject") => {}
                Some("quarantine") => issues.push(
                    "DMARC policy is p=quarantine, consider p=reject for full enforcement"
                        .to_string(),
                ),
                Some("none") => issues.push(
                    "DMARC policy is p=none (monitoring only), spoofed mail is not blocked"
                        .to_string(),
                ),
                _ => issues.push("DMARC record has no valid policy (p=)".to_string()),
            }
            if dmarc.subdomain_policy.is_none() {
                issues.push("DMARC record has no subdomain policy (sp=)".to_string());
            }
            if dmarc.rua.is_none() && dmarc.ruf.is_none() {
                issues.push("DMARC record has no reporting configured (rua=/ruf=)".to_string());
            }
            if let Some(pct) = dmarc.pct.filter(|p| *p < 100) {
                issues.push(format!(
                    "DMARC pct={pct} applies the policy to only {pct}% of messages"
                ));
            }
        }
    }

    // Check for DKIM records.
    if data.dkim.is_empty() {
        issues.push(format!(
            "No DKIM record found for common selectors ({})",
            selectors.join(", ")
        ));
    }

    issues
}

fn summarize(data: &EmailAuthData) -> String {
    let parts = [
        ("SPF", data.spf.is_some()),
        ("DMARC", data.dmarc.is_some()),
        ("DKIM", !data.dkim.is_empty()),
    ];
    let pick = |want: bool| {
        parts
            .iter()
            .filter(|(_, present)| *present == want)
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    };

    match data.status {
        EmailAuthStatus::FullyConfigured => {
            "Email authentication fully configured (SPF, DMARC, DKIM)".to_string()
        }
        EmailAuthStatus::Partial => format!(
            "Partial email authentication: {} configured, {} missing",
            pick(true),
            pick(false)
        ),
        EmailAuthStatus::None => {
            "No email authentication configured (SPF, DMARC and DKIM missing)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dns::DnsRecordType::Txt;
    use crate::core::testing::StaticResolver;
    use rstest::rstest;

    async fn scan(resolver: StaticResolver) -> ScannerResult {
        EmailAuthScanner::new(Arc::new(resolver)).run("example.com").await.unwrap()
    }

    fn issues(result: &ScannerResult) -> Vec<String> {
        result.issues.clone().unwrap_or_default()
    }

    fn fully_configured() -> StaticResolver {
        StaticResolver::new()
            .with("example.com", Txt, &["v=spf1 include:_spf.example.net -all"])
            .with(
                "_dmarc.example.com",
                Txt,
                &["v=DMARC1; p=reject; sp=reject; rua=mailto:d@example.com"],
            )
            .with("selector1._domainkey.example.com", Txt, &["v=DKIM1; k=rsa; p=MIGfMA0"])
    }

    #[tokio::test]
    async fn nothing_configured() {
        let result = scan(StaticResolver::new()).await;
        let issues = issues(&result);
        assert!(issues.contains(&"Missing SPF record".to_string()));
        assert!(issues.contains(&"Missing DMARC record".to_string()));
        assert!(issues.iter().any(|i| i.starts_with("No DKIM record found")));
        assert_eq!(result.data["status"], "none");
        assert_eq!(
            result.summary.as_deref(),
            Some("No email authentication configured (SPF, DMARC and DKIM missing)")
        );
    }

    #[tokio::test]
    async fn fully_configured_domain_is_clean() {
        let result = scan(fully_configured()).await;
        assert!(issues(&result).is_empty(), "{:?}", issues(&result));
        assert_eq!(result.data["status"], "fullyConfigured");
        assert_eq!(result.data["dkim"][0]["selector"], "selector1");
    }

    #[tokio::test]
    async fn missing_dmarc_is_reported_even_when_spf_exists() {
        let result = scan(StaticResolver::new().with("example.com", Txt, &["v=spf1 -all"])).await;
        assert!(issues(&result).contains(&"Missing DMARC record".to_string()));
        assert_eq!(
            result.summary.as_deref(),
            Some("Partial email authentication: SPF configured, DMARC, DKIM missing")
        );
    }

    #[tokio::test]
    async fn plus_all_allows_all_senders() {
        let resolver =
            StaticResolver::new().with("example.com", Txt, &["v=spf1 ip4:192.0.2.0/24 +all"]);
        let result = scan(resolver).await;
        assert!(issues(&result).iter().any(|i| i.contains("allows all senders")));
    }

    #[rstest]
    #[case("v=spf1 mx ~all", "soft fail")]
    #[case("v=spf1 mx ?all", "neutral")]
    #[case("v=spf1 mx", "no 'all' mechanism")]
    #[case("v=spf1 all", "allows all senders")]
    #[tokio::test]
    async fn spf_qualifiers(#[case] record: &str, #[case] expected: &str) {
        let result = scan(StaticResolver::new().with("example.com", Txt, &[record])).await;
        assert!(issues(&result).iter().any(|i| i.contains(expected)), "{:?}", issues(&result));
    }

    #[rstest]
    #[case(8, None)]
    #[case(9, Some("close to the limit"))]
    #[case(11, Some("exceeding the limit"))]
    fn spf_lookup_limits(#[case] includes: usize, #[case] expected: Option<&str>) {
        let terms: Vec<String> =
            (0..includes).map(|n| format!("include:_spf{n}.example.net")).collect();
        let record = format!("v=spf1 {} -all", terms.join(" "));
        let data = EmailAuthData {
            spf: Some(parse_spf(&record)),
            spf_records_found: 1,
            dmarc: Some(parse_dmarc("v=DMARC1; p=reject; sp=reject; rua=mailto:a@example.com")),
            dkim: vec![DkimRecord { selector: "default".into(), record: "p=abc".into() }],
            status: EmailAuthStatus::FullyConfigured,
        };
        let issues = analyze_email_auth(&data, &[]);
        match expected {
            None => assert!(issues.is_empty(), "{issues:?}"),
            Some(text) => assert!(issues.iter().any(|i| i.contains(text)), "{issues:?}"),
        }
    }

    #[test]
    fn spf_counts_includes_apart_from_other_lookups() {
        let spf = parse_spf(
            "v=spf1 a mx:mail.example.com ptr exists:%{i}.x.example \
             include:a.example ip4:192.0.2.1 redirect=b.example",
        );
        assert_eq!(spf.include_count, 1);
        assert_eq!(spf.lookup_count, 6);
        assert_eq!(spf.all_qualifier, None);
    }

    #[test]
    fn other_lookup_mechanisms_do_not_count_toward_the_include_limit() {
        let includes: Vec<String> =
            (0..8).map(|n| format!("include:_spf{n}.example.net")).collect();
        let record = format!("v=spf1 a mx {} -all", includes.join(" "));
        let spf = parse_spf(&record);
        assert_eq!(spf.include_count, 8);
        assert_eq!(spf.lookup_count, 10);

        let data = EmailAuthData {
            spf: Some(spf),
            spf_records_found: 1,
            dmarc: Some(parse_dmarc("v=DMARC1; p=reject; sp=reject; rua=mailto:a@example.com")),
            dkim: vec![DkimRecord { selector: "default".into(), record: "p=abc".into() }],
            status: EmailAuthStatus::FullyConfigured,
        };
        assert!(analyze_email_auth(&data, &[]).is_empty());
    }

    #[rstest]
    #[case("v=DMARC1; p=none; sp=none; rua=mailto:a@example.com", "p=none")]
    #[case("v=DMARC1; p=quarantine; sp=reject; rua=mailto:a@example.com", "p=quarantine")]
    #[case("v=DMARC1; p=reject; rua=mailto:a@example.com", "no subdomain policy")]
    #[case("v=DMARC1; p=reject; sp=reject", "no reporting")]
    #[case(
        "v=DMARC1; p=reject; sp=reject; ruf=mailto:a@example.com; pct=25",
        "pct=25 applies the policy to only 25%"
    )]
    #[case("v=DMARC1; rua=mailto:a@example.com; sp=reject", "no valid policy")]
    #[tokio::test]
    async fn dmarc_findings(#[case] record: &str, #[case] expected: &str) {
        let result = scan(StaticResolver::new().with("_dmarc.example.com", Txt, &[record])).await;
        assert!(issues(&result).iter().any(|i| i.contains(expected)), "{:?}", issues(&result));
    }

    #[tokio::test]
    async fn reject_policy_has_no_enforcement_warning() {
        let result = scan(fully_configured()).await;
        assert!(!issues(&result).iter().any(|i| i.contains("policy")));
    }

    #[test]
    fn dmarc_tags_are_case_insensitive() {
        let dmarc = parse_dmarc("V=DMARC1; P=Reject; SP=quarantine; PCT=100");
        assert_eq!(dmarc.policy.as_deref(), Some("reject"));
        assert_eq!(dmarc.subdomain_policy.as_deref(), Some("quarantine"));
        assert_eq!(dmarc.pct, Some(100));
    }

    #[tokio::test]
    async fn failing_dkim_selector_is_skipped() {
        let resolver = fully_configured().failing("default._domainkey.example.com");
        let result = scan(resolver).await;
        assert_eq!(result.data["dkim"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn www_prefix_is_stripped() {
        let scanner = EmailAuthScanner::new(Arc::new(fully_configured()));
        let result = scanner.run("www.example.com").await.unwrap();
        assert_eq!(result.data["status"], "fullyConfigured");
    }
}
