//! Utility provider lookup aggregation core.
//!
//! Answers "which provider serves utility X at this address?" by fanning out
//! to a set of independent data-source plugins, reconciling their partial and
//! conflicting answers, and emitting a single Verdict with a confidence level
//! and rationale. The surrounding HTTP/CLI surface, geocoding, and concrete
//! data-source implementations live outside this crate and plug in through
//! the traits in [`source`] and [`arbiter`].

pub mod arbiter;
pub mod config;
pub mod cross_validator;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scorer;
pub mod selector;
pub mod source;

pub use arbiter::{Arbiter, ArbiterCandidate, ArbiterDecision, Verifier, VerifierOutcome};
pub use config::PipelineConfig;
pub use cross_validator::{AgreementLevel, CrossValidation, CrossValidator, EquivalenceGroup};
pub use error::{LookupError, Result};
pub use model::{
    AnswerFailure, ConfidenceLevel, LookupRequest, MatchPrecision, SourceAnswer, UtilityCategory,
    Verdict,
};
pub use pipeline::Pipeline;
pub use scorer::ConfidenceScorer;
pub use selector::Selector;
pub use source::{DataSource, SourceRegistry};
