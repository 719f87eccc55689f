// src/core/scanner/headers_scanner.rs

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::core::http::{HttpFetcher, build_url};
use crate::core::models::{HeadersData, ScannerResult};
use crate::core::registry::DomainScanner;

// Selectors and patterns for the header-grading report markup.
static SEL_GRADE: Lazy<Selector> = Lazy::new(|| Selector::parse(".score span").unwrap());
static SEL_SCORE_ATTR: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-score]").unwrap());
static SEL_SECTION: Lazy<Selector> = Lazy::new(|| Selector::parse(".reportSection").unwrap());
static SEL_SECTION_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".reportTitle").unwrap());
static SEL_TABLE_LABEL: Lazy<Selector> = Lazy::new(|| Selector::parse("th.tableLabel").unwrap());
static RE_SCORE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})\s*/\s*100").unwrap());

/// What a header-grading report says about the site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderReport {
    pub grade: Option<String>,
    pub score: Option<u8>,
    pub missing_headers: Vec<String>,
}

/// Turns the report page into a `HeaderReport`. Markup it does not recognise
/// yields an empty report rather than an error.
pub trait HeaderReportParser: Send + Sync {
    fn parse(&self, html: &str) -> HeaderReport;
}

/// Parser for the securityheaders.com report layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlReportParser;

impl HeaderReportParser for HtmlReportParser {
    fn parse(&self, html: &str) -> HeaderReport {
        let document = Html::parse_document(html);

        let grade = document
            .select(&SEL_GRADE)
            .next()
            .map(|e| text_of(&e))
            .filter(|g| !g.is_empty());

        let score = document
            .select(&SEL_SCORE_ATTR)
            .find_map(|e| e.value().attr("data-score").and_then(|s| s.trim().parse::<u8>().ok()))
            .or_else(|| {
                document
                    .select(&SEL_GRADE)
                    .next()
                    .and_then(|e| e.parent().and_then(ElementRef::wrap))
                    .and_then(|score| {
                        let text = text_of(&score);
                        RE_SCORE_TEXT.captures(&text).and_then(|c| c[1].parse().ok())
                    })
            })
            .filter(|s| *s <= 100)
            .or_else(|| grade.as_deref().and_then(score_for_grade));

        let mut missing_headers: Vec<String> = Vec::new();
        for section in document.select(&SEL_SECTION) {
            let is_missing_section = section
                .select(&SEL_SECTION_TITLE)
                .next()
                .is_some_and(|t| text_of(&t).eq_ignore_ascii_case("missing headers"));
            if !is_missing_section {
                continue;
            }
            for label in section.select(&SEL_TABLE_LABEL) {
                let header = text_of(&label);
                let seen = missing_headers.iter().any(|h| h.eq_ignore_ascii_case(&header));
                if !header.is_empty() && !seen {
                    missing_headers.push(header);
                }
            }
        }

        HeaderReport { grade, score, missing_headers }
    }
}

fn text_of(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Approximate score for a letter grade when the report shows no number.
pub fn score_for_grade(grade: &str) -> Option<u8> {
    let score = match grade.trim().to_uppercase().as_str() {
        "A+" => 100,
        "A" => 90,
        "B" => 75,
        "C" => 60,
        "D" => 45,
        "E" => 30,
        "F" => 15,
        "R" => 0,
        _ => return None,
    };
    Some(score)
}

pub struct HeadersScanner {
    fetcher: Arc<dyn HttpFetcher>,
    parser: Arc<dyn HeaderReportParser>,
    endpoint: String,
}

impl HeadersScanner {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self::with_parser(fetcher, Arc::new(HtmlReportParser), endpoint)
    }

    pub fn with_parser(
        fetcher: Arc<dyn HttpFetcher>,
        parser: Arc<dyn HeaderReportParser>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DomainScanner for HeadersScanner {
    fn id(&self) -> &'static str {
        "headers"
    }

    fn label(&self) -> &'static str {
        "HTTP Security Headers"
    }

    fn description(&self) -> &'static str {
        "Grades the site's HTTP security headers with an external report, listing missing ones."
    }

    fn order(&self) -> Option<u32> {
        Some(60)
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult> {
        info!(target = %domain, "Starting headers scan.");
        let report_url = build_url(
            &self.endpoint,
            &[("q", domain), ("followRedirects", "on"), ("hide", "on")],
        )?;

        let html = match self.fetcher.get_text(&report_url).await {
            Ok(html) => html,
            Err(e) => {
                // The report site is optional; point the operator at it instead.
                warn!(url = %report_url, error = %e, "Header report unavailable.");
                let summary = format!("Header report unavailable, view it at {report_url}");
                let data = HeadersData {
                    reachable: false,
                    report_url,
                    ..HeadersData::default()
                };
                return Ok(ScannerResult::from_data(&data)?
                    .with_summary(summary)
                    .with_issues(Vec::new()));
            }
        };

        let report = self.parser.parse(&html);
        debug!(
            grade = ?report.grade,
            score = ?report.score,
            missing = report.missing_headers.len(),
            "Header report parsed."
        );

        let issues: Vec<String> = report
            .missing_headers
            .iter()
            .map(|h| format!("Missing security header: {h}"))
            .collect();
        let missing = report.missing_headers.len();
        let summary = match (&report.grade, report.score) {
            (Some(grade), Some(score)) => {
                format!("Grade {grade} ({score}/100), {missing} missing header(s)")
            }
            (Some(grade), None) => format!("Grade {grade}, {missing} missing header(s)"),
            (None, _) => format!("No grade found in report, {missing} missing header(s)"),
        };
        info!(findings = issues.len(), "Headers scan finished.");

        let data = HeadersData {
            reachable: true,
            grade: report.grade,
            score: report.score,
            missing_headers: report.missing_headers,
            report_url,
        };
        Ok(ScannerResult::from_data(&data)?.with_summary(summary).with_issues(issues))
    }
}
