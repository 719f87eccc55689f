// src/core/scanner/dns_scanner.rs

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::dns::{DnsRecordType, DnsResolver};
use crate::core::error::Result;
use crate::core::models::{DnsData, MxRecord, ScannerResult};
use crate::core::registry::DomainScanner;

const MAX_REASONABLE_A_RECORDS: usize = 10;
const MAX_TXT_LENGTH: usize = 255;

/// Resolves the domain's basic records and flags reachability and
/// configuration problems.
pub struct DnsScanner {
    resolver: Arc<dyn DnsResolver>,
}

impl DnsScanner {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl DomainScanner for DnsScanner {
    fn id(&self) -> &'static str {
        "dns"
    }

    fn label(&self) -> &'static str {
        "DNS Records"
    }

    fn description(&self) -> &'static str {
        "Resolves A, AAAA, MX, TXT and CNAME records, checking reachability and misconfiguration."
    }

    fn order(&self) -> Option<u32> {
        Some(10)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        info!(target = %domain, "Starting DNS scan.");

        // Execute all DNS lookups concurrently for better performance.
        let (a, aaaa, mx, txt, cname) = tokio::join!(
            self.resolver.resolve(domain, DnsRecordType::A),
            self.resolver.resolve(domain, DnsRecordType::Aaaa),
            self.resolver.resolve(domain, DnsRecordType::Mx),
            self.resolver.resolve(domain, DnsRecordType::Txt),
            self.resolver.resolve(domain, DnsRecordType::Cname),
        );

        let data = DnsData {
            a: a?,
            aaaa: aaaa?,
            mx: mx?.iter().map(|r| parse_mx(r)).collect(),
            txt: txt?,
            cname: cname?,
        };
        debug!("All DNS lookups completed, starting analysis.");

        let issues = analyze_dns_results(&data);
        info!(findings = issues.len(), "DNS scan finished.");

        let summary = format!(
            "{} A, {} AAAA, {} MX, {} TXT, {} CNAME record(s)",
            data.a.len(),
            data.aaaa.len(),
            data.mx.len(),
            data.txt.len(),
            data.cname.len()
        );
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}

/// Parses `"10 mail.example.com."`; a record without a numeric preference
/// keeps the whole string as the exchange.
fn parse_mx(raw: &str) -> MxRecord {
    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(priority), Some(exchange)) if priority.parse::<u16>().is_ok() => MxRecord {
            priority: priority.parse().unwrap_or_default(),
            exchange: exchange.trim_end_matches('.').to_lowercase(),
        },
        _ => MxRecord {
            priority: 0,
            exchange: raw.trim().trim_end_matches('.').to_lowercase(),
        },
    }
}

/// Analyzes the resolved records and generates findings.
///
/// # Arguments
/// * `data` - The record sets returned by the resolver.
///
/// # Returns
/// A vector of human-readable issues, empty when the zone looks healthy.
fn analyze_dns_results(data: &DnsData) -> Vec<String> {
    let mut issues = Vec::new();

    // Check reachability.
    if data.a.is_empty() && data.aaaa.is_empty() && data.cname.is_empty() {
        debug!("No A, AAAA or CNAME records.");
        issues.push("No A, AAAA or CNAME records found, the domain is not reachable".to_string());
    }

    // Flag addresses that should never appear in a public zone.
    for (record_type, addresses) in [("A", &data.a), ("AAAA", &data.aaaa)] {
        for address in addresses {
            if address.parse::<IpAddr>().is_ok_and(|ip| is_non_public(&ip)) {
                issues.push(format!(
                    "{} record resolves to a private or reserved address: {}",
                    record_type, address
                ));
            }
        }
    }

    if !data.cname.is_empty() && (!data.a.is_empty() || !data.mx.is_empty()) {
        issues.push(
            "CNAME conflict: a CNAME record coexists with A or MX records for the same name"
                .to_string(),
        );
    }

    if data.cname.len() > 1 {
        issues.push(format!(
            "Multiple CNAME records ({}) found for the same name",
            data.cname.len()
        ));
    }

    if data.a.len() > MAX_REASONABLE_A_RECORDS {
        issues.push(format!("Unusually high number of A records ({})", data.a.len()));
    }

    if data.mx.is_empty() {
        issues.push("No MX records found, email delivery will fail".to_string());
    }

    for mx in &data.mx {
        if mx.exchange.parse::<IpAddr>().is_ok() {
            issues.push(format!(
                "MX record points to a bare IP address ({}) instead of a hostname",
                mx.exchange
            ));
        }
    }

    let long_txt = data.txt.iter().filter(|t| t.len() > MAX_TXT_LENGTH).count();
    if long_txt > 0 {
        issues.push(format!(
            "{} TXT record(s) longer than {} characters may cause resolver compatibility issues",
            long_txt, MAX_TXT_LENGTH
        ));
    }

    issues
}

fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_non_public_v4(v4),
        IpAddr::V6(v6) => is_non_public_v6(v6),
    }
}

fn is_non_public_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_non_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_non_public_v4(&mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local
        || (first & 0xffc0) == 0xfe80 // link-local
}
