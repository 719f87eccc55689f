// src/core/testing.rs

//! In-memory stand-ins for the network seams, for tests and offline harnesses.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::core::dns::{DnsRecordType, DnsResolver};
use crate::core::error::{Result, ScanError};
use crate::core::http::HttpFetcher;

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Body(String),
    Status(u16),
    Unreachable(String),
}

struct Route {
    pattern: String,
    responses: Vec<FakeResponse>,
    hits: usize,
}

/// Answers requests whose URL contains a registered pattern.
///
/// Routes are tried in registration order. A route with several responses
/// returns them in turn and then keeps repeating the last one. Unmatched URLs
/// fail as unreachable.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, pattern: &str, body: impl Into<String>) -> Self {
        self.route_sequence(pattern, vec![FakeResponse::Body(body.into())])
    }

    pub fn route_status(self, pattern: &str, status: u16) -> Self {
        self.route_sequence(pattern, vec![FakeResponse::Status(status)])
    }

    pub fn route_sequence(self, pattern: &str, responses: Vec<FakeResponse>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Route { pattern: pattern.to_string(), responses, hits: 0 });
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl HttpFetcher for StaticFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        let response = {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes.iter_mut().find(|r| url.contains(&r.pattern)).and_then(|route| {
                let index = route.hits.min(route.responses.len().saturating_sub(1));
                route.hits += 1;
                route.responses.get(index).cloned()
            })
        };

        match response {
            Some(FakeResponse::Body(body)) => Ok(body),
            Some(FakeResponse::Status(status)) => Err(ScanError::Status {
                url: url.to_string(),
                status,
            }),
            Some(FakeResponse::Unreachable(message)) => Err(ScanError::Http {
                url: url.to_string(),
                message,
            }),
            None => Err(ScanError::Http {
                url: url.to_string(),
                message: "no route".to_string(),
            }),
        }
    }
}

/// A resolver backed by a fixed zone; names not present resolve to nothing.
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<(String, DnsRecordType), Vec<String>>,
    failing: Vec<String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, record_type: DnsRecordType, data: &[&str]) -> Self {
        self.records
            .entry((name.to_lowercase(), record_type))
            .or_default()
            .extend(data.iter().map(|d| d.to_string()));
        self
    }

    /// Every query for `name` fails with a lookup error.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.push(name.to_lowercase());
        self
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, name: &str, record_type: DnsRecordType) -> Result<Vec<String>> {
        let name = name.to_lowercase();
        if self.failing.contains(&name) {
            return Err(ScanError::Lookup {
                name,
                record_type: record_type.to_string(),
                message: "SERVFAIL".to_string(),
            });
        }
        Ok(self.records.get(&(name, record_type)).cloned().unwrap_or_default())
    }
}
