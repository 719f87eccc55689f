// src/core/interpretation.rs

//! Turns a finished module result into one severity, one sentence and one
//! piece of advice for the operator.
//!
//! The table below is the single place that knows what each module's data
//! means. Modules without an entry fall back to counting issues.

use serde_json::Value;

use crate::core::models::{ExecutedScannerResult, ScannerInterpretation, ScannerStatus, Severity};

type Interpreter = fn(&ExecutedScannerResult) -> ScannerInterpretation;

/// Per-module interpreters, keyed by scanner id.
static INTERPRETERS: &[(&str, Interpreter)] = &[
    ("dns", interpret_dns),
    ("email-auth", interpret_email_auth),
    ("certificates", interpret_certificates),
    ("rdap", interpret_rdap),
    ("tls", interpret_tls),
    ("headers", interpret_headers),
];

/// Maps a module result to an operator-facing verdict. Pure: the same result
/// always gives the same interpretation.
pub fn interpret(result: &ExecutedScannerResult) -> ScannerInterpretation {
    match result.status {
        ScannerStatus::Error => {
            return ScannerInterpretation::new(
                Severity::Error,
                format!(
                    "{} could not complete: {}",
                    result.label,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                "Re-run this check; if it keeps failing the upstream service may be unavailable.",
            );
        }
        ScannerStatus::Idle | ScannerStatus::Running => {
            return ScannerInterpretation::new(
                Severity::Info,
                format!("{}: scan in progress", result.label),
                "Wait for the check to finish.",
            );
        }
        ScannerStatus::Success => {}
    }

    INTERPRETERS
        .iter()
        .find(|(id, _)| *id == result.id)
        .map(|(_, interpreter)| interpreter(result))
        .unwrap_or_else(|| interpret_generic(result))
}

/// The most severe verdict across a set of results, `Success` when empty.
pub fn overall_severity<'a>(
    results: impl IntoIterator<Item = &'a ExecutedScannerResult>,
) -> Severity {
    results
        .into_iter()
        .map(|r| interpret(r).severity)
        .max()
        .unwrap_or(Severity::Success)
}

fn interpret_generic(result: &ExecutedScannerResult) -> ScannerInterpretation {
    if result.issues.is_empty() {
        ScannerInterpretation::new(
            Severity::Success,
            format!("{}: no issues found", result.label),
            "No action needed.",
        )
    } else {
        ScannerInterpretation::new(
            Severity::Warning,
            format!("{}: {} issue(s) found", result.label, result.issues.len()),
            "Review the reported issues.",
        )
    }
}

// --- Helpers ---

fn any_issue(result: &ExecutedScannerResult, needle: &str) -> bool {
    result.issues.iter().any(|i| i.contains(needle))
}

fn array_len(result: &ExecutedScannerResult, key: &str) -> usize {
    result.data_field(key).and_then(Value::as_array).map_or(0, Vec::len)
}

fn str_field<'a>(result: &'a ExecutedScannerResult, key: &str) -> Option<&'a str> {
    result.data_field(key).and_then(Value::as_str)
}

// --- Module Interpreters ---

fn interpret_dns(result: &ExecutedScannerResult) -> ScannerInterpretation {
    let resolvable =
        array_len(result, "a") + array_len(result, "aaaa") + array_len(result, "cname") > 0;
    if !resolvable {
        return ScannerInterpretation::new(
            Severity::Critical,
            "The domain does not resolve to any address",
            "Publish A and/or AAAA records (or a CNAME) so clients can reach the domain.",
        );
    }
    if any_issue(result, "private or reserved") || any_issue(result, "CNAME conflict") {
        return ScannerInterpretation::new(
            Severity::Warning,
            "DNS records contain conflicting or non-public entries",
            "Remove private addresses from public zones and keep CNAMEs free of other records.",
        );
    }
    if !result.issues.is_empty() {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("{} DNS configuration issue(s) found", result.issues.len()),
            "Review the listed records with your DNS provider.",
        );
    }
    ScannerInterpretation::new(Severity::Success, "DNS records look healthy", "No action needed.")
}

fn interpret_email_auth(result: &ExecutedScannerResult) -> ScannerInterpretation {
    let spf_missing = any_issue(result, "Missing SPF record");
    let dmarc_missing = any_issue(result, "Missing DMARC record");

    if spf_missing && dmarc_missing {
        return ScannerInterpretation::new(
            Severity::Critical,
            "Neither SPF nor DMARC is published; anyone can send mail as this domain",
            "Publish SPF listing your senders, then DMARC at p=none, moving to p=reject.",
        );
    }
    if any_issue(result, "allows all senders") {
        return ScannerInterpretation::new(
            Severity::Critical,
            "The SPF record authorizes every sender on the internet",
            "Replace +all with -all (or ~all while testing).",
        );
    }
    if spf_missing || dmarc_missing {
        return ScannerInterpretation::new(
            Severity::Warning,
            "Email authentication is only partially configured",
            "Publish the missing SPF or DMARC record to protect against spoofing.",
        );
    }
    if !result.issues.is_empty() {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("Email authentication has {} weakness(es)", result.issues.len()),
            "Tighten SPF qualifiers and move DMARC towards p=reject with reporting enabled.",
        );
    }
    ScannerInterpretation::new(
        Severity::Success,
        "SPF, DMARC and DKIM are configured and enforced",
        "No action needed.",
    )
}

fn interpret_certificates(result: &ExecutedScannerResult) -> ScannerInterpretation {
    let unique = result.data_field("unique").and_then(Value::as_u64).unwrap_or(0);
    let active = result.data_field("active").and_then(Value::as_u64).unwrap_or(0);

    if unique == 0 {
        return ScannerInterpretation::new(
            Severity::Info,
            "No certificates were found in Certificate Transparency logs",
            "If the domain serves HTTPS, confirm the certificate was issued by a public CA.",
        );
    }
    if active == 0 {
        return ScannerInterpretation::new(
            Severity::Critical,
            "Every logged certificate has expired",
            "Issue a new certificate for the domain.",
        );
    }
    if any_issue(result, "renew immediately") || any_issue(result, "without replacement") {
        return ScannerInterpretation::new(
            Severity::Critical,
            "A certificate is about to expire or expired without a replacement",
            "Renew the affected certificates now and automate renewal.",
        );
    }
    if !result.issues.is_empty() {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("{} certificate finding(s) need attention", result.issues.len()),
            "Plan renewals and confirm every issuing CA is expected.",
        );
    }
    ScannerInterpretation::new(
        Severity::Success,
        format!("{active} active certificate(s), none close to expiry"),
        "No action needed.",
    )
}

fn interpret_rdap(result: &ExecutedScannerResult) -> ScannerInterpretation {
    if result.data_field("found").and_then(Value::as_bool) != Some(true) {
        return ScannerInterpretation::new(
            Severity::Info,
            "Registration data is not available over RDAP for this domain",
            "Check the registration with your registrar directly.",
        );
    }
    if any_issue(result, "Domain expired")
        || any_issue(result, "No nameservers found")
        || any_issue(result, "problematic status")
    {
        return ScannerInterpretation::new(
            Severity::Critical,
            "The domain registration is expired, suspended or has no delegation",
            "Contact your registrar to renew the domain or lift the hold.",
        );
    }
    if !result.issues.is_empty() {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("{} registration issue(s) found", result.issues.len()),
            "Enable auto-renew, sign the zone with DNSSEC and use at least two nameservers.",
        );
    }
    let registrar = str_field(result, "registrar").unwrap_or("the registrar");
    ScannerInterpretation::new(
        Severity::Success,
        format!("Registration with {registrar} is in good standing"),
        "No action needed.",
    )
}

fn interpret_tls(result: &ExecutedScannerResult) -> ScannerInterpretation {
    if array_len(result, "endpoints") == 0 {
        return ScannerInterpretation::new(
            Severity::Info,
            "No HTTPS endpoints were assessed",
            "If the domain should serve HTTPS, confirm it listens on port 443.",
        );
    }
    let grade = str_field(result, "grade").unwrap_or("unknown");
    let failing_grade = matches!(grade, "F" | "T" | "M");
    if failing_grade || any_issue(result, "vulnerable to") {
        return ScannerInterpretation::new(
            Severity::Critical,
            format!("TLS configuration is weak (grade {grade})"),
            "Patch the listed vulnerabilities and disable legacy protocols.",
        );
    }
    if !grade.starts_with('A') || !result.issues.is_empty() {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("TLS configuration could be stronger (grade {grade})"),
            "Disable TLS 1.0/1.1, enable forward secrecy and a long-lived HSTS policy.",
        );
    }
    ScannerInterpretation::new(
        Severity::Success,
        format!("TLS configuration is strong (grade {grade})"),
        "No action needed.",
    )
}

fn interpret_headers(result: &ExecutedScannerResult) -> ScannerInterpretation {
    if result.data_field("reachable").and_then(Value::as_bool) != Some(true) {
        let url = str_field(result, "reportUrl").unwrap_or("the header report site");
        return ScannerInterpretation::new(
            Severity::Info,
            "The header report could not be retrieved",
            format!("Review the report manually at {url}."),
        );
    }
    let grade = str_field(result, "grade").unwrap_or("unknown");
    if matches!(grade, "F" | "R") {
        return ScannerInterpretation::new(
            Severity::Critical,
            format!("Most security headers are missing (grade {grade})"),
            "Start with Content-Security-Policy and Strict-Transport-Security.",
        );
    }
    if !result.issues.is_empty() || !grade.starts_with('A') {
        return ScannerInterpretation::new(
            Severity::Warning,
            format!("{} security header(s) missing (grade {grade})", result.issues.len()),
            "Add the missing headers in your web server or CDN configuration.",
        );
    }
    ScannerInterpretation::new(
        Severity::Success,
        format!("Security headers are well configured (grade {grade})"),
        "No action needed.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ScannerResult;
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;

    fn finished(id: &str, data: Value, issues: &[&str]) -> ExecutedScannerResult {
        let mut result = ExecutedScannerResult::idle(id, id);
        result.mark_running(Utc::now());
        result.mark_success(
            ScannerResult::new(data),
            issues.iter().map(|i| i.to_string()).collect(),
            Utc::now(),
        );
        result
    }

    #[test]
    fn errors_and_unfinished_results() {
        let mut failed = ExecutedScannerResult::idle("tls", "TLS Configuration");
        failed.mark_running(Utc::now());
        failed.mark_error("TLS Configuration timed out after 300000ms", Utc::now());
        let verdict = interpret(&failed);
        assert_eq!(verdict.severity, Severity::Error);
        assert!(verdict.message.contains("timed out"));

        let running = {
            let mut r = ExecutedScannerResult::idle("dns", "DNS Records");
            r.mark_running(Utc::now());
            r
        };
        assert_eq!(interpret(&running).severity, Severity::Info);
        let idle = ExecutedScannerResult::idle("dns", "DNS Records");
        assert_eq!(interpret(&idle).message, "DNS Records: scan in progress");
    }

    #[test]
    fn missing_spf_and_dmarc_is_critical() {
        let result = finished(
            "email-auth",
            json!({"status": "none"}),
            &[
                "Missing SPF record",
                "Missing DMARC record",
                "No DKIM record found for common selectors (default)",
            ],
        );
        assert_eq!(interpret(&result).severity, Severity::Critical);
    }

    #[test]
    fn plus_all_is_critical() {
        let result = finished(
            "email-auth",
            json!({}),
            &["SPF record uses +all, which allows all senders to send as this domain"],
        );
        assert_eq!(interpret(&result).severity, Severity::Critical);
    }

    #[rstest]
    #[case::cert_renew_now(
        "certificates",
        json!({"unique": 2, "active": 2}),
        &["Certificate for example.com expires in 5 day(s) - renew immediately"][..],
        Severity::Critical
    )]
    #[case::cert_renew_soon(
        "certificates",
        json!({"unique": 2, "active": 2}),
        &["Certificate for example.com expires in 20 days - plan renewal soon"][..],
        Severity::Warning
    )]
    #[case::cert_none("certificates", json!({"unique": 0, "active": 0}), &[][..], Severity::Info)]
    #[case::cert_wildcard_only(
        "certificates",
        json!({"unique": 2, "active": 2, "wildcards": 1}),
        &[][..],
        Severity::Success
    )]
    #[case::rdap_no_ns(
        "rdap",
        json!({"found": true, "nameservers": []}),
        &["No nameservers found"][..],
        Severity::Critical
    )]
    #[case::rdap_expired(
        "rdap",
        json!({"found": true, "daysUntilExpiry": -1}),
        &["Domain expired 1 days ago"][..],
        Severity::Critical
    )]
    #[case::rdap_one_ns(
        "rdap",
        json!({"found": true}),
        &["Only one nameserver, add redundancy"][..],
        Severity::Warning
    )]
    #[case::rdap_failed(
        "rdap",
        json!({"found": false}),
        &["RDAP lookup failed: timeout"][..],
        Severity::Info
    )]
    #[case::tls_a_plus(
        "tls",
        json!({"grade": "A+", "endpoints": [{}]}),
        &[][..],
        Severity::Success
    )]
    #[case::tls_b("tls", json!({"grade": "B", "endpoints": [{}]}), &[][..], Severity::Warning)]
    #[case::tls_vulnerable(
        "tls",
        json!({"grade": "A", "endpoints": [{}]}),
        &["192.0.2.1: vulnerable to Heartbleed"][..],
        Severity::Critical
    )]
    #[case::tls_no_endpoints(
        "tls",
        json!({"endpoints": []}),
        &["No HTTPS endpoints found"][..],
        Severity::Info
    )]
    #[case::headers_unreachable(
        "headers",
        json!({"reachable": false, "reportUrl": "https://securityheaders.com/?q=x"}),
        &[][..],
        Severity::Info
    )]
    #[case::headers_f(
        "headers",
        json!({"reachable": true, "grade": "F"}),
        &["Missing security header: X-Frame-Options"][..],
        Severity::Critical
    )]
    #[case::headers_a(
        "headers",
        json!({"reachable": true, "grade": "A"}),
        &[][..],
        Severity::Success
    )]
    #[case::dns_unreachable(
        "dns",
        json!({"a": [], "aaaa": [], "cname": []}),
        &["No A, AAAA or CNAME records found, the domain is not reachable"][..],
        Severity::Critical
    )]
    #[case::dns_ok("dns", json!({"a": ["93.184.216.34"]}), &[][..], Severity::Success)]
    fn module_verdicts(
        #[case] id: &str,
        #[case] data: Value,
        #[case] issues: &[&str],
        #[case] expected: Severity,
    ) {
        assert_eq!(interpret(&finished(id, data, issues)).severity, expected);
    }

    #[test]
    fn unknown_modules_fall_back_to_issue_count() {
        assert_eq!(interpret(&finished("custom", json!(null), &[])).severity, Severity::Success);
        let with_issue = finished("custom", json!(null), &["something"]);
        assert_eq!(interpret(&with_issue).severity, Severity::Warning);
    }

    #[test]
    fn overall_severity_is_the_worst() {
        let results = [
            finished("custom", json!(null), &[]),
            finished("rdap", json!({"found": true}), &["No nameservers found"]),
        ];
        assert_eq!(overall_severity(&results), Severity::Critical);
        assert_eq!(overall_severity(std::iter::empty()), Severity::Success);
    }
}
