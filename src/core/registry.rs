// src/core/registry.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::Result;
use crate::core::models::ScannerResult;

/// One pluggable analysis module.
///
/// Identity (`id`, `label`, `description`) is fixed for the lifetime of the
/// process. `run` receives an already-normalized domain.
#[async_trait]
pub trait DomainScanner: Send + Sync {
    fn id(&self) -> &'static str;

    fn label(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Overrides the engine's default timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Lower runs first; `None` runs after every weighted module.
    fn order(&self) -> Option<u32> {
        None
    }

    async fn run(&self, domain: &str) -> Result<ScannerResult>;

    /// Consulted only when `run` returned no issue list.
    fn derive_issues(&self, _result: &ScannerResult, _domain: &str) -> Option<Vec<String>> {
        None
    }
}

/// Append-only collection of modules, built once at start-up.
#[derive(Default, Clone)]
pub struct ScannerRegistry {
    scanners: Vec<Arc<dyn DomainScanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. An id that is already registered is ignored so that an
    /// existing module's identity never changes.
    pub fn register(&mut self, scanner: Arc<dyn DomainScanner>) -> &mut Self {
        if self.get(scanner.id()).is_none() {
            self.scanners.push(scanner);
        } else {
            tracing::warn!(id = scanner.id(), "Scanner already registered, ignoring duplicate.");
        }
        self
    }

    /// Modules in execution order: ascending weight, unweighted last, ties in
    /// registration order.
    pub fn all(&self) -> Vec<Arc<dyn DomainScanner>> {
        let mut ordered = self.scanners.clone();
        ordered.sort_by_key(|s| s.order().unwrap_or(u32::MAX));
        ordered
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DomainScanner>> {
        self.scanners.iter().find(|s| s.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str, Option<u32>);

    #[async_trait]
    impl DomainScanner for Named {
        fn id(&self) -> &'static str {
            self.0
        }
        fn label(&self) -> &'static str {
            self.0
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn order(&self) -> Option<u32> {
            self.1
        }
        async fn run(&self, _domain: &str) -> Result<ScannerResult> {
            Ok(ScannerResult::new(json!(null)))
        }
    }

    #[test]
    fn all_sorts_by_weight_with_unweighted_last() {
        let mut registry = ScannerRegistry::new();
        registry
            .register(Arc::new(Named("late", None)))
            .register(Arc::new(Named("second", Some(20))))
            .register(Arc::new(Named("first", Some(10))))
            .register(Arc::new(Named("later", None)));

        let ids: Vec<_> = registry.all().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["first", "second", "late", "later"]);
    }

    #[test]
    fn duplicate_ids_keep_the_original() {
        let mut registry = ScannerRegistry::new();
        registry.register(Arc::new(Named("dns", Some(1))));
        registry.register(Arc::new(Named("dns", Some(99))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dns").unwrap().order(), Some(1));
    }
}
