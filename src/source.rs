//! Data source port and registry.
//!
//! Every data source (government GIS, EPA/HIFLD datasets, municipal tables,
//! cooperative/ZIP tables, crawlers) plugs in through the [`DataSource`]
//! trait. Sources are pure, independent functions of the request: they never
//! mutate it and never observe each other's answers. The orchestrator holds
//! a [`SourceRegistry`] and never branches on a concrete source type.

use crate::error::Result;
use crate::model::{LookupRequest, SourceAnswer, UtilityCategory};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Capability contract every data source plugin satisfies.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name used in scoring tables and logs.
    fn identity(&self) -> &str;

    /// Whether this source can answer for the given category. The
    /// orchestrator only dispatches to sources that return true.
    fn supports(&self, category: &UtilityCategory) -> bool;

    /// Intrinsic trust score (0-100), set by configuration, not computed at
    /// runtime.
    fn base_confidence(&self) -> u8;

    /// Maximum wall-clock time the orchestrator waits for this source.
    /// `None` means use the pipeline's default budget.
    fn timeout_budget(&self) -> Option<Duration> {
        None
    }

    /// Query for a provider. Sources should catch their own errors where
    /// feasible; an `Err` that escapes is recorded by the orchestrator as an
    /// error-tagged answer, never a fatal failure of the run.
    async fn query(&self, request: Arc<LookupRequest>) -> Result<SourceAnswer>;
}

/// Plugin registry. Registration order is preserved so the set of sources
/// consulted for a run is deterministic.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        self.sources.push(source);
    }

    /// Sources applicable to a category, in registration order.
    pub fn applicable(&self, category: &UtilityCategory) -> Vec<Arc<dyn DataSource>> {
        self.sources
            .iter()
            .filter(|s| s.supports(category))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchPrecision;

    struct FixedSource {
        name: &'static str,
        categories: Vec<UtilityCategory>,
    }

    #[async_trait]
    impl DataSource for FixedSource {
        fn identity(&self) -> &str {
            self.name
        }

        fn supports(&self, category: &UtilityCategory) -> bool {
            self.categories.contains(category)
        }

        fn base_confidence(&self) -> u8 {
            80
        }

        async fn query(&self, _request: Arc<LookupRequest>) -> Result<SourceAnswer> {
            Ok(SourceAnswer::answer(
                self.name,
                "Test Provider",
                80,
                MatchPrecision::Postal,
            ))
        }
    }

    #[test]
    fn test_applicable_filters_by_category_in_registration_order() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(FixedSource {
            name: "electric_only",
            categories: vec![UtilityCategory::Electricity],
        }));
        registry.register(Arc::new(FixedSource {
            name: "water_only",
            categories: vec![UtilityCategory::Water],
        }));
        registry.register(Arc::new(FixedSource {
            name: "both",
            categories: vec![UtilityCategory::Electricity, UtilityCategory::Water],
        }));

        let electric = registry.applicable(&UtilityCategory::Electricity);
        let names: Vec<&str> = electric.iter().map(|s| s.identity()).collect();
        assert_eq!(names, vec!["electric_only", "both"]);

        assert!(registry.applicable(&UtilityCategory::Sewer).is_empty());
    }
}
