//! Shared data model for the lookup pipeline.
//!
//! One `LookupRequest` flows in, each data source produces one
//! `SourceAnswer`, and the pipeline emits exactly one `Verdict`. Nothing in
//! here outlives a single pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The kind of utility being resolved. Open-ended so callers can add
/// categories without touching the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilityCategory {
    Electricity,
    NaturalGas,
    Water,
    Sewer,
    Internet,
    Trash,
    Other(String),
}

impl UtilityCategory {
    pub fn as_str(&self) -> &str {
        match self {
            UtilityCategory::Electricity => "electricity",
            UtilityCategory::NaturalGas => "natural_gas",
            UtilityCategory::Water => "water",
            UtilityCategory::Sewer => "sewer",
            UtilityCategory::Internet => "internet",
            UtilityCategory::Trash => "trash",
            UtilityCategory::Other(name) => name,
        }
    }
}

impl fmt::Display for UtilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One lookup call. Immutable for the lifetime of a pipeline run; workers
/// share it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRequest {
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
    city: Option<String>,
    county: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    category: UtilityCategory,
}

impl LookupRequest {
    pub fn new(category: UtilityCategory) -> Self {
        Self {
            latitude: None,
            longitude: None,
            address: None,
            city: None,
            county: None,
            state: None,
            postal_code: None,
            category,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_county(mut self, county: impl Into<String>) -> Self {
        self.county = Some(county.into());
        self
    }

    /// State is stored as an uppercase two-letter code. Anything that is
    /// not already two alphabetic characters is dropped rather than
    /// guessed at; address parsing lives outside this crate.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        let s: String = state.into();
        let trimmed = s.trim();
        self.state = if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(trimmed.to_uppercase())
        } else {
            None
        };
        self
    }

    /// Postal code is stored as its primary 5-digit form (ZIP+4 truncated).
    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        let z: String = postal_code.into();
        let digits: String = z.chars().filter(|c| c.is_ascii_digit()).take(5).collect();
        self.postal_code = if digits.is_empty() { None } else { Some(digits) };
        self
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn county(&self) -> Option<&str> {
        self.county.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code.as_deref()
    }

    pub fn category(&self) -> &UtilityCategory {
        &self.category
    }

    /// One-line location summary for logs and arbiter context.
    pub fn location_summary(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(a) = self.address.as_deref() {
            parts.push(a);
        }
        if let Some(c) = self.city.as_deref() {
            parts.push(c);
        }
        if let Some(c) = self.county.as_deref() {
            parts.push(c);
        }
        if let Some(s) = self.state.as_deref() {
            parts.push(s);
        }
        if let Some(z) = self.postal_code.as_deref() {
            parts.push(z);
        }
        parts.join(", ")
    }

    pub fn shared(self) -> Arc<LookupRequest> {
        Arc::new(self)
    }
}

/// How precisely a source matched the request geography. Ordered from most
/// precise to least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPrecision {
    PointInPolygon,
    ExactAddress,
    Postal,
    County,
    City,
    Region,
}

/// Why a source produced no usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFailure {
    Timeout,
    Error(String),
    NotApplicable,
}

/// One data source's proposed provider plus its self-reported evidence.
///
/// An answer with no provider name never contributes a vote in
/// cross-validation, even when it carries other metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAnswer {
    /// Stable source identifier, from `DataSource::identity()`.
    pub source: String,

    /// Candidate provider name; `None` means "no opinion".
    pub provider_name: Option<String>,

    /// Source-intrinsic trust score (0-100), set by configuration.
    pub base_confidence: u8,

    /// Geographic precision of the match.
    pub precision: MatchPrecision,

    /// Optional contact details for the candidate.
    pub phone: Option<String>,
    pub url: Option<String>,

    /// Opaque per-source evidence, passed through for audit.
    pub evidence: serde_json::Map<String, serde_json::Value>,

    /// Wall-clock time the query took.
    pub elapsed: Duration,

    /// Set when the source failed instead of answering.
    pub failure: Option<AnswerFailure>,
}

impl SourceAnswer {
    /// A positive answer naming a provider.
    pub fn answer(
        source: impl Into<String>,
        provider_name: impl Into<String>,
        base_confidence: u8,
        precision: MatchPrecision,
    ) -> Self {
        Self {
            source: source.into(),
            provider_name: Some(provider_name.into()),
            base_confidence: base_confidence.min(100),
            precision,
            phone: None,
            url: None,
            evidence: serde_json::Map::new(),
            elapsed: Duration::ZERO,
            failure: None,
        }
    }

    /// A "no opinion" answer from a source that ran cleanly but found nothing.
    pub fn no_opinion(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            provider_name: None,
            base_confidence: 0,
            precision: MatchPrecision::Region,
            phone: None,
            url: None,
            evidence: serde_json::Map::new(),
            elapsed: Duration::ZERO,
            failure: None,
        }
    }

    /// A failed query, recorded for audit but never counted as a vote.
    pub fn failed(source: impl Into<String>, failure: AnswerFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::no_opinion(source)
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// A valid answer names a provider and carries no failure tag.
    pub fn is_valid(&self) -> bool {
        self.provider_name.is_some() && self.failure.is_none()
    }
}

/// Named confidence band for a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Verified,
    High,
    Medium,
    Low,
    None,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::Verified => "verified",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// The pipeline's final decision. Created once per run, immutable after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Correlates all log lines for one pipeline run.
    pub run_id: Uuid,

    pub category: UtilityCategory,

    /// Chosen provider; `None` when no source could answer.
    pub provider_name: Option<String>,

    /// Final confidence score, 0-100.
    pub confidence: u8,

    pub level: ConfidenceLevel,

    pub agreement: crate::cross_validator::AgreementLevel,

    /// Sources whose answers landed in the winning group.
    pub agreeing_sources: Vec<String>,

    /// Valid sources that named a different provider.
    pub dissenting_sources: Vec<String>,

    /// Human-readable explanation of which selection rule fired.
    pub rationale: String,

    pub phone: Option<String>,
    pub url: Option<String>,

    /// True when an external arbiter chose the winner.
    pub escalated: bool,

    /// True when a post-hoc verifier confirmed the winner.
    pub verified: bool,

    /// Every answer collected this run, failures included, for audit.
    pub answers: Vec<SourceAnswer>,

    pub decided_at: DateTime<Utc>,
}

impl Verdict {
    /// The "we could not determine an answer" verdict. Transient source
    /// failures surface as this, never as a hard error.
    pub fn none(category: UtilityCategory, rationale: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            category,
            provider_name: None,
            confidence: 0,
            level: ConfidenceLevel::None,
            agreement: crate::cross_validator::AgreementLevel::None,
            agreeing_sources: Vec::new(),
            dissenting_sources: Vec::new(),
            rationale: rationale.into(),
            phone: None,
            url: None,
            escalated: false,
            verified: false,
            answers: Vec::new(),
            decided_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_normalized_to_two_letter_uppercase() {
        let req = LookupRequest::new(UtilityCategory::Electricity).with_state("tx");
        assert_eq!(req.state(), Some("TX"));

        let req = LookupRequest::new(UtilityCategory::Electricity).with_state(" ca ");
        assert_eq!(req.state(), Some("CA"));
    }

    #[test]
    fn test_non_code_state_input_is_dropped() {
        // A spelled-out state must not masquerade as a code.
        let req = LookupRequest::new(UtilityCategory::Electricity).with_state("Texas");
        assert_eq!(req.state(), None);

        let req = LookupRequest::new(UtilityCategory::Electricity).with_state("T1");
        assert_eq!(req.state(), None);

        let req = LookupRequest::new(UtilityCategory::Electricity).with_state("");
        assert_eq!(req.state(), None);
    }

    #[test]
    fn test_postal_code_truncated_to_primary_five_digits() {
        let req = LookupRequest::new(UtilityCategory::Water).with_postal_code("78701-1234");
        assert_eq!(req.postal_code(), Some("78701"));

        let req = LookupRequest::new(UtilityCategory::Water).with_postal_code("78701");
        assert_eq!(req.postal_code(), Some("78701"));
    }

    #[test]
    fn test_base_confidence_clamped_at_construction() {
        let a = SourceAnswer::answer("gov_gis", "City Power", 150, MatchPrecision::Postal);
        assert_eq!(a.base_confidence, 100);
    }

    #[test]
    fn test_validity() {
        let a = SourceAnswer::answer("gov_gis", "City Power", 90, MatchPrecision::Postal);
        assert!(a.is_valid());

        let b = SourceAnswer::no_opinion("epa");
        assert!(!b.is_valid());

        let c = SourceAnswer::failed("muni", AnswerFailure::Timeout);
        assert!(!c.is_valid());
    }

    #[test]
    fn test_category_open_enumeration_roundtrip() {
        let cat = UtilityCategory::Other("district_heating".to_string());
        let json = serde_json::to_string(&cat).unwrap();
        let back: UtilityCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(cat, back);
        assert_eq!(cat.as_str(), "district_heating");
    }
}
