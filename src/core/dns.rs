// src/core/dns.rs

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use serde_json::Value;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, warn};

use crate::core::error::{Result, ScanError};
use crate::core::http::{HttpFetcher, build_url};

/// The record types the analysis modules ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Aaaa,
    Mx,
    Txt,
    Cname,
}

impl DnsRecordType {
    /// IANA type code, as carried in the `type` field of DoH JSON answers.
    pub fn code(self) -> u64 {
        match self {
            DnsRecordType::A => 1,
            DnsRecordType::Cname => 5,
            DnsRecordType::Mx => 15,
            DnsRecordType::Txt => 16,
            DnsRecordType::Aaaa => 28,
        }
    }

    fn to_hickory(self) -> RecordType {
        match self {
            DnsRecordType::A => RecordType::A,
            DnsRecordType::Aaaa => RecordType::AAAA,
            DnsRecordType::Mx => RecordType::MX,
            DnsRecordType::Txt => RecordType::TXT,
            DnsRecordType::Cname => RecordType::CNAME,
        }
    }
}

/// Resolves a name to the textual `data` of each matching answer.
///
/// "No such name" and "no records" are both an empty list, never an error.
/// TXT answers come back with quotes removed and segments joined.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, name: &str, record_type: DnsRecordType) -> Result<Vec<String>>;
}

/// DNS-over-HTTPS using the JSON API (`?name=&type=`).
pub struct DohResolver {
    fetcher: Arc<dyn HttpFetcher>,
    endpoint: String,
}

impl DohResolver {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self { fetcher, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl DnsResolver for DohResolver {
    async fn resolve(&self, name: &str, record_type: DnsRecordType) -> Result<Vec<String>> {
        let type_name = record_type.to_string();
        let url = build_url(&self.endpoint, &[("name", name), ("type", &type_name)])?;
        debug!(name, record_type = %type_name, "DoH query.");

        let body = self.fetcher.get_json(&url).await.map_err(|e| ScanError::Lookup {
            name: name.to_string(),
            record_type: type_name.clone(),
            message: e.to_string(),
        })?;

        let records = parse_doh_answers(&body, name, record_type);
        debug!(name, record_type = %type_name, count = records.len(), "DoH answers parsed.");
        Ok(records)
    }
}

/// Extracts the `data` strings from a DoH JSON body.
///
/// Only answers owned by `name` with the requested type are kept, so the
/// records of a CNAME target never count as the queried name's own. Answers
/// missing `name` or `type` are kept.
pub fn parse_doh_answers(body: &Value, name: &str, record_type: DnsRecordType) -> Vec<String> {
    let Some(answers) = body.get("Answer").and_then(Value::as_array) else {
        return Vec::new();
    };
    let owner = name.trim_end_matches('.').to_lowercase();
    answers
        .iter()
        .filter(|answer| match answer.get("type").and_then(Value::as_u64) {
            Some(code) => code == record_type.code(),
            None => true,
        })
        .filter(|answer| match answer.get("name").and_then(Value::as_str) {
            Some(n) => n.trim_end_matches('.').eq_ignore_ascii_case(&owner),
            None => true,
        })
        .filter_map(|answer| answer.get("data").and_then(Value::as_str))
        .map(|data| normalize_record(data, record_type))
        .collect()
}

fn normalize_record(data: &str, record_type: DnsRecordType) -> String {
    match record_type {
        DnsRecordType::Txt => unquote_txt(data),
        _ => data.trim().to_string(),
    }
}

/// `"v=spf1 include:a" " -all"` becomes `v=spf1 include:a -all`.
pub fn unquote_txt(data: &str) -> String {
    let trimmed = data.trim();
    if !trimmed.starts_with('"') {
        return trimmed.to_string();
    }
    let mut joined = String::with_capacity(trimmed.len());
    let mut in_quotes = false;
    let mut escaped = false;
    for c in trimmed.chars() {
        match c {
            _ if escaped => {
                joined.push(c);
                escaped = false;
            }
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => joined.push(c),
            _ => {}
        }
    }
    joined
}

/// The operating system's resolver configuration through `hickory-resolver`.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, name: &str, record_type: DnsRecordType) -> Result<Vec<String>> {
        let wanted = record_type.to_hickory();
        let owner = name.trim_end_matches('.');
        match self.resolver.lookup(name, wanted).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter(|record| record.record_type() == wanted)
                .filter(|record| {
                    let name = record.name().to_string();
                    name.trim_end_matches('.').eq_ignore_ascii_case(owner)
                })
                .filter_map(|record| record.data().map(|d| d.to_string()))
                .map(|data| normalize_record(&data, record_type))
                .collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    debug!(name, record_type = %record_type, "No records found.");
                    Ok(Vec::new())
                }
                _ => {
                    warn!(
                        name,
                        record_type = %record_type,
                        error = %e,
                        "System DNS lookup failed."
                    );
                    Err(ScanError::Lookup {
                        name: name.to_string(),
                        record_type: record_type.to_string(),
                        message: e.to_string(),
                    })
                }
            },
        }
    }
}
