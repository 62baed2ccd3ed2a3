//! External collaborator contracts: the tie-breaking arbiter and the
//! post-hoc verifier.
//!
//! Both are untrusted oracles hosted outside this crate (an LLM, a web
//! search, a human queue). The core validates everything they return
//! against its own candidate set and falls back to deterministic scoring
//! when they misbehave. Consulting either one is the only place
//! nondeterminism may enter a run, and both consultations are logged.

use crate::error::Result;
use crate::model::{LookupRequest, UtilityCategory};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One candidate handed to the arbiter: the group's display name plus the
/// sources that voted for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterCandidate {
    pub name: String,
    pub sources: Vec<String>,
    pub group_score: i32,
}

/// The arbiter's choice. `chosen_name` must correspond to one of the
/// supplied candidates or the selector discards the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterDecision {
    pub chosen_name: String,
    pub source_hint: Option<String>,
    pub confidence: f64,
    pub rationale: String,
}

/// Breaks genuine, close disagreements between candidate groups.
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn arbitrate(
        &self,
        request: &LookupRequest,
        candidates: &[ArbiterCandidate],
    ) -> Result<ArbiterDecision>;
}

/// Post-hoc confirmation of a chosen provider.
///
/// `agrees: Some(true)` confirms the expected name; `Some(false)` with a
/// `matched_name` contradicts it in favor of that name; `None` means the
/// check was inconclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierOutcome {
    pub matched_name: Option<String>,
    pub agrees: Option<bool>,
}

/// Confirms or contradicts a low-margin selection after the fact.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        request: &LookupRequest,
        category: &UtilityCategory,
        expected_name: &str,
    ) -> Result<VerifierOutcome>;
}
