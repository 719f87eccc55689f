// src/core/engine.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::cache::ResultCache;
use crate::core::clock::Clock;
use crate::core::error::{Result, ScanError};
use crate::core::models::{DomainScanAggregate, ExecutedScannerResult, ScannerResult};
use crate::core::rate_limiter::{GLOBAL_IDENTIFIER, RateLimitDecision, RateLimiter};
use crate::core::registry::{DomainScanner, ScannerRegistry};

pub const DEFAULT_SCANNER_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the registered modules against a domain, one at a time.
///
/// Modules run sequentially in registry order, so progress callbacks arrive
/// in a fixed order. Each orchestration call is counted once against the
/// caller's rate-limit window before any cache lookup. Every module is raced
/// against its timeout and the losing future is dropped, aborting whatever
/// request it still had in flight. A failing or stuck module never stops the
/// rest of the scan.
pub struct ScanEngine {
    registry: ScannerRegistry,
    cache: Arc<ResultCache<ScannerResult>>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    default_timeout: Duration,
    timeout_overrides: HashMap<String, Duration>,
}

impl ScanEngine {
    pub fn new(
        registry: ScannerRegistry,
        cache: Arc<ResultCache<ScannerResult>>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            cache,
            rate_limiter,
            clock,
            default_timeout: DEFAULT_SCANNER_TIMEOUT,
            timeout_overrides: HashMap::new(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Takes precedence over both the module's own timeout and the default.
    pub fn with_timeout_override(mut self, scanner_id: &str, timeout: Duration) -> Self {
        self.timeout_overrides.insert(scanner_id.to_string(), timeout);
        self
    }

    fn timeout_for(&self, scanner: &dyn DomainScanner) -> Duration {
        self.timeout_overrides
            .get(scanner.id())
            .copied()
            .or_else(|| scanner.timeout())
            .unwrap_or(self.default_timeout)
    }

    pub fn registry(&self) -> &ScannerRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache<ScannerResult> {
        &self.cache
    }

    pub async fn run_all(&self, domain: &str) -> DomainScanAggregate {
        self.run_all_for(GLOBAL_IDENTIFIER, domain, |_| {}).await
    }

    /// Like [`run_all`](Self::run_all), calling `on_progress` with the whole
    /// result list before and after each module.
    pub async fn run_all_with_progress<F>(
        &self,
        domain: &str,
        on_progress: F,
    ) -> DomainScanAggregate
    where
        F: FnMut(&[ExecutedScannerResult]) + Send,
    {
        self.run_all_for(GLOBAL_IDENTIFIER, domain, on_progress).await
    }

    /// Full scan on behalf of `identifier`.
    ///
    /// # Arguments
    /// * `identifier` - Rate-limit key of the caller. One request is counted
    ///   per call, before the cache is consulted.
    /// * `domain` - Domain or URL, normalized before use.
    /// * `on_progress` - Receives the result list before and after each module.
    ///
    /// # Returns
    /// The aggregate. A denied call still yields one entry per module, each
    /// marked `error` with the retry delay.
    pub async fn run_all_for<F>(
        &self,
        identifier: &str,
        domain: &str,
        mut on_progress: F,
    ) -> DomainScanAggregate
    where
        F: FnMut(&[ExecutedScannerResult]) + Send,
    {
        let domain = normalize_domain(domain);
        let timestamp = self.clock.now();
        let scanners = self.registry.all();
        info!(domain = %domain, identifier, modules = scanners.len(), "Starting domain scan.");

        let decision = self.rate_limiter.check(identifier);

        let mut results: Vec<ExecutedScannerResult> = Vec::with_capacity(scanners.len());
        for scanner in scanners {
            let mut entry = ExecutedScannerResult::idle(scanner.id(), scanner.label());
            entry.mark_running(self.clock.now());
            results.push(entry);
            on_progress(&results);

            let index = results.len() - 1;
            match denial(scanner.as_ref(), decision) {
                Some(message) => results[index].mark_error(message, self.clock.now()),
                None => self.execute(scanner.as_ref(), &domain, &mut results[index], true).await,
            }
            on_progress(&results);
        }

        let aggregate = DomainScanAggregate::new(domain, timestamp, results);
        info!(domain = %aggregate.domain, issues = aggregate.issues.len(), "Domain scan finished.");
        aggregate
    }

    pub async fn run_one(&self, domain: &str, scanner_id: &str) -> Result<ExecutedScannerResult> {
        self.run_one_for(GLOBAL_IDENTIFIER, domain, scanner_id).await
    }

    /// Re-executes one module, bypassing (and then refreshing) the cache.
    /// Counts one request against `identifier`.
    pub async fn run_one_for(
        &self,
        identifier: &str,
        domain: &str,
        scanner_id: &str,
    ) -> Result<ExecutedScannerResult> {
        let scanner = self
            .registry
            .get(scanner_id)
            .ok_or_else(|| ScanError::ScannerNotFound(scanner_id.to_string()))?;
        let domain = normalize_domain(domain);
        info!(domain = %domain, identifier, scanner = scanner_id, "Re-running single scanner.");

        let mut entry = ExecutedScannerResult::idle(scanner.id(), scanner.label());
        entry.mark_running(self.clock.now());

        match denial(scanner.as_ref(), self.rate_limiter.check(identifier)) {
            Some(message) => entry.mark_error(message, self.clock.now()),
            None => self.execute(scanner.as_ref(), &domain, &mut entry, false).await,
        }
        Ok(entry)
    }

    async fn execute(
        &self,
        scanner: &dyn DomainScanner,
        domain: &str,
        entry: &mut ExecutedScannerResult,
        use_cache: bool,
    ) {
        let cache_key = format!("{}:{}", scanner.id(), domain);

        if use_cache {
            if let Some(cached) = self.cache.get(&cache_key) {
                debug!(scanner = scanner.id(), "Serving scanner result from cache.");
                let issues = resolve_issues(scanner, &cached, domain);
                entry.mark_success(cached, issues, self.clock.now());
                return;
            }
        }

        let timeout = self.timeout_for(scanner);
        debug!(scanner = scanner.id(), timeout_ms = timeout.as_millis() as u64, "Running scanner.");

        match tokio::time::timeout(timeout, scanner.run(domain)).await {
            Ok(Ok(result)) => {
                let issues = resolve_issues(scanner, &result, domain);
                info!(scanner = scanner.id(), issues = issues.len(), "Scanner succeeded.");
                self.cache.set(&cache_key, result.clone());
                entry.mark_success(result, issues, self.clock.now());
            }
            Ok(Err(e)) => {
                warn!(scanner = scanner.id(), error = %e, "Scanner failed.");
                entry.mark_error(e.to_string(), self.clock.now());
            }
            Err(_) => {
                let err = ScanError::Timeout {
                    label: scanner.label().to_string(),
                    elapsed: timeout,
                };
                warn!(scanner = scanner.id(), error = %err, "Scanner timed out.");
                entry.mark_error(err.to_string(), self.clock.now());
            }
        }
    }
}

/// The error message for `scanner` when the caller's request was denied.
fn denial(scanner: &dyn DomainScanner, decision: RateLimitDecision) -> Option<String> {
    if decision.allowed {
        return None;
    }
    let err = ScanError::RateLimited {
        label: scanner.label().to_string(),
        retry_after: decision.retry_after.unwrap_or(1),
    };
    Some(err.to_string())
}

fn resolve_issues(
    scanner: &dyn DomainScanner,
    result: &ScannerResult,
    domain: &str,
) -> Vec<String> {
    result
        .issues
        .clone()
        .or_else(|| scanner.derive_issues(result, domain))
        .unwrap_or_default()
}

/// Trims and lower-cases a domain, also accepting a pasted URL
/// (`https://Example.com:8443/path` becomes `example.com`).
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let host = Url::parse(&with_scheme)
        .ok()
        .and_then(|url| url.host_str().map(String::from))
        .unwrap_or_else(|| trimmed.to_string());

    host.trim_end_matches('.').to_lowercase()
}

/// Drops a leading `www.` label. Mail and registration records live on
/// the registrable name.
pub fn root_domain(domain: &str) -> &str {
    domain.strip_prefix("www.").unwrap_or(domain)
}
