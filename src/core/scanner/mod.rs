// src/core/scanner/mod.rs

// Every analysis module the scanner ships with, plus the wiring that turns a
// `ScanConfig` into a ready-to-run engine.
pub mod certificate_scanner;
pub mod dns_scanner;
pub mod email_scanner;
pub mod headers_scanner;
pub mod rdap_scanner;
pub mod tls_scanner;

use std::sync::Arc;
use tracing::info;

use crate::config::{DnsBackend, ScanConfig};
use crate::core::cache::ResultCache;
use crate::core::clock::Clock;
use crate::core::dns::{DnsResolver, DohResolver, SystemResolver};
use crate::core::engine::ScanEngine;
use crate::core::error::Result;
use crate::core::http::{HttpFetcher, ReqwestFetcher};
use crate::core::rate_limiter::RateLimiter;
use crate::core::registry::ScannerRegistry;

use self::certificate_scanner::CertificateScanner;
use self::dns_scanner::DnsScanner;
use self::email_scanner::EmailAuthScanner;
use self::headers_scanner::HeadersScanner;
use self::rdap_scanner::RdapScanner;
use self::tls_scanner::TlsScanner;

/// Registers the six built-in modules against the given seams.
pub fn default_registry(
    config: &ScanConfig,
    fetcher: Arc<dyn HttpFetcher>,
    resolver: Arc<dyn DnsResolver>,
    clock: Arc<dyn Clock>,
) -> ScannerRegistry {
    let endpoints = &config.endpoints;
    let mut registry = ScannerRegistry::new();
    registry
        .register(Arc::new(DnsScanner::new(resolver.clone())))
        .register(Arc::new(EmailAuthScanner::with_selectors(
            resolver,
            config.dkim_selectors.clone(),
        )))
        .register(Arc::new(CertificateScanner::new(
            fetcher.clone(),
            clock.clone(),
            endpoints.certificate_transparency.as_str(),
        )))
        .register(Arc::new(RdapScanner::new(
            fetcher.clone(),
            clock,
            endpoints.rdap_bootstrap.as_str(),
        )))
        .register(Arc::new(
            TlsScanner::new(fetcher.clone(), endpoints.tls_assessment.as_str())
                .with_polling(config.tls_poll_interval(), config.tls_max_polls),
        ))
        .register(Arc::new(HeadersScanner::new(fetcher, endpoints.header_report.as_str())));
    registry
}

/// The resolver selected by `dnsBackend`.
pub fn resolver_for(config: &ScanConfig, fetcher: Arc<dyn HttpFetcher>) -> Arc<dyn DnsResolver> {
    match config.dns_backend {
        DnsBackend::Doh => Arc::new(DohResolver::new(fetcher, config.endpoints.doh.as_str())),
        DnsBackend::System => Arc::new(SystemResolver::new()),
    }
}

/// Builds an engine over explicit seams, applying the config's timeouts,
/// cache TTL and rate limits.
pub fn build_engine_with(
    config: &ScanConfig,
    fetcher: Arc<dyn HttpFetcher>,
    resolver: Arc<dyn DnsResolver>,
    clock: Arc<dyn Clock>,
) -> ScanEngine {
    let registry = default_registry(config, fetcher, resolver, clock.clone());
    let cache = Arc::new(ResultCache::with_ttl(clock.clone(), config.cache_ttl()));
    let rate_limiter = Arc::new(RateLimiter::with_config(clock.clone(), config.rate_limiter()));

    let mut engine = ScanEngine::new(registry, cache, rate_limiter, clock)
        .with_default_timeout(config.default_timeout());
    for id in config.scanner_timeouts_ms.keys() {
        if let Some(timeout) = config.scanner_timeout(id) {
            engine = engine.with_timeout_override(id, timeout);
        }
    }
    engine
}

/// Builds the production engine: `reqwest` for HTTP and the configured DNS backend.
pub fn build_engine(config: &ScanConfig, clock: Arc<dyn Clock>) -> Result<ScanEngine> {
    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(&config.user_agent, config.default_timeout())?);
    let resolver = resolver_for(config, fetcher.clone());
    info!(dns_backend = ?config.dns_backend, "Scan engine configured.");
    Ok(build_engine_with(config, fetcher, resolver, clock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::testing::{StaticFetcher, StaticResolver};

    #[test]
    fn default_registry_orders_the_six_modules() {
        let registry = default_registry(
            &ScanConfig::default(),
            Arc::new(StaticFetcher::new()),
            Arc::new(StaticResolver::new()),
            Arc::new(SystemClock),
        );
        let ids: Vec<_> = registry.all().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["dns", "email-auth", "certificates", "rdap", "tls", "headers"]);

        let labels: Vec<_> = registry.all().iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec![
                "DNS Records",
                "Email Authentication",
                "Certificate Transparency",
                "Domain Registration",
                "TLS Configuration",
                "HTTP Security Headers"
            ]
        );
    }
}
