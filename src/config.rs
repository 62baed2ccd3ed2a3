//! Pipeline configuration.
//!
//! Every empirically tuned constant in the pipeline (short-circuit
//! threshold, agreement bonuses, escalation margin, source priorities, the
//! alias table) lives here so deployments can retune without touching core
//! logic.

use crate::error::{LookupError, Result};
use crate::model::MatchPrecision;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Tunable knobs for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// A single answer at or above this base confidence cancels the
    /// remaining in-flight sources.
    pub short_circuit_confidence: u8,

    /// Whole-run deadline; the pipeline emits a verdict from whatever has
    /// arrived by then.
    #[serde(with = "duration_secs")]
    pub overall_deadline: Duration,

    /// Per-source budget used when a source does not advertise its own.
    #[serde(with = "duration_secs")]
    pub default_source_timeout: Duration,

    /// Minimum normalized-name length before the substring merge rule may
    /// fire. Guards against accidental matches on short strings.
    pub min_substring_len: usize,

    /// Jaro-Winkler similarity at or above which two normalized names merge.
    pub jaro_winkler_threshold: f64,

    /// Agreement adjustments applied to winning-group members.
    pub full_agreement_bonus: i16,
    pub majority_agreement_bonus: i16,
    pub split_agreement_penalty: i16,

    /// Members below this base confidence never receive the agreement
    /// bonus, so low-trust sources cannot gang up on one high-trust source.
    pub agreement_quality_floor: u8,

    /// Multiplier applied to `source_priority` ranks in the scored
    /// tie-break. Priority is a tie-break weight, never the sole
    /// determinant.
    pub priority_weight: i32,

    /// Score gap (winner minus runner-up) below which a split decision is
    /// escalated to the arbiter, when one is configured.
    pub escalation_margin: i32,

    /// Static ranking of source identity to priority rank; authoritative
    /// sources outrank crawled or inferred ones. Unlisted sources rank 0.
    pub source_priority: HashMap<String, i32>,

    /// Canonical provider name to known variant spellings.
    pub aliases: HashMap<String, Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            short_circuit_confidence: 95,
            overall_deadline: Duration::from_secs(3),
            default_source_timeout: Duration::from_secs(2),
            min_substring_len: 5,
            jaro_winkler_threshold: 0.90,
            full_agreement_bonus: 20,
            majority_agreement_bonus: 10,
            split_agreement_penalty: -10,
            agreement_quality_floor: 40,
            priority_weight: 2,
            escalation_margin: 15,
            source_priority: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Load the alias table from a JSON object file mapping canonical names
    /// to arrays of variant spellings.
    pub fn with_aliases_json(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let aliases: HashMap<String, Vec<String>> = serde_json::from_str(&raw)
            .map_err(|e| LookupError::Config(format!("Invalid alias table: {}", e)))?;
        self.aliases = aliases;
        Ok(self)
    }

    pub fn with_source_priority(mut self, source: impl Into<String>, rank: i32) -> Self {
        self.source_priority.insert(source.into(), rank);
        self
    }

    pub fn with_alias(
        mut self,
        canonical: impl Into<String>,
        variants: Vec<String>,
    ) -> Self {
        self.aliases.insert(canonical.into(), variants);
        self
    }

    pub fn priority_of(&self, source: &str) -> i32 {
        self.source_priority.get(source).copied().unwrap_or(0)
    }

    /// Fixed bonus for geographic match precision. Point-in-polygon is the
    /// strongest signal, region the weakest.
    pub fn precision_bonus(&self, precision: MatchPrecision) -> i16 {
        match precision {
            MatchPrecision::PointInPolygon => 15,
            MatchPrecision::ExactAddress => 12,
            MatchPrecision::Postal => 6,
            MatchPrecision::County => 2,
            MatchPrecision::City => 2,
            MatchPrecision::Region => 0,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.short_circuit_confidence, 95);
        assert_eq!(cfg.overall_deadline, Duration::from_secs(3));
        assert_eq!(cfg.default_source_timeout, Duration::from_secs(2));
        assert_eq!(cfg.full_agreement_bonus, 20);
        assert_eq!(cfg.split_agreement_penalty, -10);
    }

    #[test]
    fn test_precision_bonus_ordering() {
        let cfg = PipelineConfig::default();
        assert!(cfg.precision_bonus(MatchPrecision::PointInPolygon)
            > cfg.precision_bonus(MatchPrecision::ExactAddress));
        assert!(cfg.precision_bonus(MatchPrecision::ExactAddress)
            > cfg.precision_bonus(MatchPrecision::Postal));
        assert!(cfg.precision_bonus(MatchPrecision::Postal)
            > cfg.precision_bonus(MatchPrecision::Region));
    }

    #[test]
    fn test_unlisted_source_priority_defaults_to_zero() {
        let cfg = PipelineConfig::default().with_source_priority("gov_gis", 3);
        assert_eq!(cfg.priority_of("gov_gis"), 3);
        assert_eq!(cfg.priority_of("unknown"), 0);
    }

    #[test]
    fn test_alias_table_from_json() {
        let dir = std::env::temp_dir().join("utility_lookup_alias_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("aliases.json");
        std::fs::write(
            &path,
            r#"{"austin energy": ["coa utilities", "city of austin electric"]}"#,
        )
        .unwrap();

        let cfg = PipelineConfig::default().with_aliases_json(&path).unwrap();
        assert_eq!(cfg.aliases["austin energy"].len(), 2);
    }
}
