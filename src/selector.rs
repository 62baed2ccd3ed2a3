//! Winner selection.
//!
//! Chooses the winning equivalence group from a cross-validation result
//! using source priority, group score, and agreement signals, escalating to
//! the external arbiter only on genuine, close disagreement.

use crate::arbiter::{Arbiter, ArbiterCandidate};
use crate::config::PipelineConfig;
use crate::cross_validator::{AgreementLevel, CrossValidation, CrossValidator, EquivalenceGroup};
use crate::model::LookupRequest;
use tracing::{info, warn};

/// Outcome of selection: the chosen group (if any), which rule fired, and
/// whether the decision was close enough to warrant post-hoc verification.
#[derive(Debug, Clone)]
pub struct Selection {
    pub group: Option<EquivalenceGroup>,
    pub agreement: AgreementLevel,
    pub rationale: String,
    pub escalated: bool,
    /// True when the winner beat the runner-up by less than the configured
    /// escalation margin. Gates the optional post-hoc verifier.
    pub low_margin: bool,
}

pub struct Selector {
    config: PipelineConfig,
}

impl Selector {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub async fn select(
        &self,
        request: &LookupRequest,
        validation: &CrossValidation,
        validator: &CrossValidator,
        arbiter: Option<&dyn Arbiter>,
    ) -> Selection {
        match validation.agreement {
            AgreementLevel::None => Selection {
                group: None,
                agreement: AgreementLevel::None,
                rationale: "no source returned a valid answer".to_string(),
                escalated: false,
                low_margin: false,
            },
            AgreementLevel::Single => {
                let group = validation.winning_group().cloned();
                let source = group
                    .as_ref()
                    .map(|g| g.best_member().source.clone())
                    .unwrap_or_default();
                Selection {
                    group,
                    agreement: AgreementLevel::Single,
                    rationale: format!("single source: only {} answered", source),
                    escalated: false,
                    low_margin: false,
                }
            }
            AgreementLevel::Full => {
                let group = validation.winning_group().cloned();
                let count = validation.valid_count;
                Selection {
                    group,
                    agreement: AgreementLevel::Full,
                    rationale: format!("full agreement among {} sources", count),
                    escalated: false,
                    low_margin: false,
                }
            }
            AgreementLevel::Majority | AgreementLevel::Split => {
                self.select_scored(request, validation, validator, arbiter)
                    .await
            }
        }
    }

    /// Genuine disagreement: score every group, escalate when the field is
    /// close and an arbiter is available, otherwise take the top score.
    async fn select_scored(
        &self,
        request: &LookupRequest,
        validation: &CrossValidation,
        validator: &CrossValidator,
        arbiter: Option<&dyn Arbiter>,
    ) -> Selection {
        let mut scored: Vec<(i32, &EquivalenceGroup)> = validation
            .groups
            .iter()
            .map(|g| (self.group_score(g), g))
            .collect();
        // Groups arrive in stable order from the validator; a stable sort
        // keeps equal scores deterministic.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let (winner_score, winner) = scored[0];
        let runner_up_score = scored.get(1).map(|(s, _)| *s).unwrap_or(i32::MIN);
        let margin = winner_score.saturating_sub(runner_up_score);
        let low_margin = scored.len() > 1 && margin < self.config.escalation_margin;

        if low_margin {
            if let Some(arbiter) = arbiter {
                // The one nondeterministic step in the core.
                info!(
                    margin,
                    candidates = scored.len(),
                    "Disagreement too close to call, escalating to external arbiter (nondeterministic)"
                );
                if let Some(selection) =
                    self.escalate(request, &scored, validation, validator, arbiter).await
                {
                    return selection;
                }
            }
        }

        let rationale = if validation.agreement == AgreementLevel::Majority {
            format!(
                "majority agreement: {} of {} sources named {}",
                winner.size(),
                validation.valid_count,
                winner.canonical_name
            )
        } else {
            format!(
                "scored tie-break: '{}' scored {} vs {} on base confidence + source priority + match precision",
                winner.canonical_name, winner_score, runner_up_score
            )
        };

        Selection {
            group: Some(winner.clone()),
            agreement: validation.agreement,
            rationale,
            escalated: false,
            low_margin,
        }
    }

    /// Consult the arbiter and validate its choice against the candidate
    /// set. Returns `None` when the arbiter fails or picks an out-of-set
    /// name, in which case selection falls back to the scored outcome.
    async fn escalate(
        &self,
        request: &LookupRequest,
        scored: &[(i32, &EquivalenceGroup)],
        validation: &CrossValidation,
        validator: &CrossValidator,
        arbiter: &dyn Arbiter,
    ) -> Option<Selection> {
        let candidates: Vec<ArbiterCandidate> = scored
            .iter()
            .map(|(score, g)| ArbiterCandidate {
                name: g.canonical_name.clone(),
                sources: g.source_ids(),
                group_score: *score,
            })
            .collect();

        let decision = match arbiter.arbitrate(request, &candidates).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Arbiter call failed, falling back to scored outcome: {}", e);
                return None;
            }
        };

        let chosen = scored
            .iter()
            .find(|(_, g)| validator.names_match(&g.canonical_name, &decision.chosen_name));

        match chosen {
            Some((_, group)) => {
                info!(
                    chosen = %group.canonical_name,
                    arbiter_confidence = decision.confidence,
                    "Arbiter resolved disagreement"
                );
                Some(Selection {
                    group: Some((*group).clone()),
                    agreement: validation.agreement,
                    rationale: format!("escalated: arbiter chose '{}' ({})", group.canonical_name, decision.rationale),
                    escalated: true,
                    low_margin: true,
                })
            }
            None => {
                // The arbiter and the candidate set diverged; treat as an
                // arbiter failure and keep the deterministic outcome.
                warn!(
                    chosen = %decision.chosen_name,
                    "Arbiter returned a name outside the candidate set, discarding its decision"
                );
                None
            }
        }
    }

    /// Group score for disagreement resolution: each member contributes its
    /// base confidence, its source's priority rank (weighted), and its
    /// precision bonus. Priority is a tie-break weight, never the sole
    /// determinant.
    fn group_score(&self, group: &EquivalenceGroup) -> i32 {
        group
            .members
            .iter()
            .map(|m| {
                m.base_confidence as i32
                    + self.config.priority_of(&m.source) * self.config.priority_weight
                    + self.config.precision_bonus(m.precision) as i32
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::ArbiterDecision;
    use crate::error::{LookupError, Result};
    use crate::model::{MatchPrecision, SourceAnswer, UtilityCategory};
    use async_trait::async_trait;

    fn answer(source: &str, name: &str, confidence: u8) -> SourceAnswer {
        SourceAnswer::answer(source, name, confidence, MatchPrecision::Postal)
    }

    fn request() -> LookupRequest {
        LookupRequest::new(UtilityCategory::Electricity)
            .with_city("Austin")
            .with_state("TX")
    }

    struct FixedArbiter {
        choose: String,
    }

    #[async_trait]
    impl Arbiter for FixedArbiter {
        async fn arbitrate(
            &self,
            _request: &LookupRequest,
            _candidates: &[ArbiterCandidate],
        ) -> Result<ArbiterDecision> {
            Ok(ArbiterDecision {
                chosen_name: self.choose.clone(),
                source_hint: None,
                confidence: 0.9,
                rationale: "external evidence".to_string(),
            })
        }
    }

    struct FailingArbiter;

    #[async_trait]
    impl Arbiter for FailingArbiter {
        async fn arbitrate(
            &self,
            _request: &LookupRequest,
            _candidates: &[ArbiterCandidate],
        ) -> Result<ArbiterDecision> {
            Err(LookupError::Arbiter("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_full_agreement_picks_strongest_member() {
        let cfg = PipelineConfig::default();
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        let answers = vec![
            answer("a", "City Power Co", 70),
            answer("b", "CITY POWER", 85),
        ];
        let validation = validator.validate(&answers);
        let selection = selector.select(&request(), &validation, &validator, None).await;

        let group = selection.group.unwrap();
        assert_eq!(group.best_member().source, "b");
        assert!(selection.rationale.contains("full agreement"));
        assert!(!selection.escalated);
    }

    #[tokio::test]
    async fn test_split_tie_break_uses_source_priority() {
        // Equal confidence and precision; priority decides.
        let cfg = PipelineConfig::default()
            .with_source_priority("gov_gis", 5)
            .with_source_priority("crawler", 1);
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        let answers = vec![
            answer("gov_gis", "Oncor Electric Delivery", 70),
            answer("crawler", "CenterPoint Energy", 70),
        ];
        let validation = validator.validate(&answers);
        let selection = selector.select(&request(), &validation, &validator, None).await;

        let group = selection.group.unwrap();
        assert_eq!(group.canonical_name, "Oncor Electric Delivery");
        assert!(selection.rationale.contains("tie-break"));
        assert!(selection.low_margin);
    }

    #[tokio::test]
    async fn test_arbiter_choice_accepted_when_in_candidate_set() {
        let cfg = PipelineConfig::default();
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        let answers = vec![
            answer("a", "Oncor Electric Delivery", 70),
            answer("b", "CenterPoint Energy", 70),
        ];
        let validation = validator.validate(&answers);
        let arbiter = FixedArbiter {
            choose: "CenterPoint Energy".to_string(),
        };
        let selection = selector
            .select(&request(), &validation, &validator, Some(&arbiter))
            .await;

        let group = selection.group.unwrap();
        assert_eq!(group.canonical_name, "CenterPoint Energy");
        assert!(selection.escalated);
        assert!(selection.rationale.contains("escalated"));
    }

    #[tokio::test]
    async fn test_out_of_set_arbiter_choice_discarded() {
        let cfg = PipelineConfig::default().with_source_priority("a", 3);
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        let answers = vec![
            answer("a", "Oncor Electric Delivery", 70),
            answer("b", "CenterPoint Energy", 70),
        ];
        let validation = validator.validate(&answers);
        let arbiter = FixedArbiter {
            choose: "Reliant Power Holdings".to_string(),
        };
        let selection = selector
            .select(&request(), &validation, &validator, Some(&arbiter))
            .await;

        // Falls back to the scored outcome: priority favors source "a".
        let group = selection.group.unwrap();
        assert_eq!(group.canonical_name, "Oncor Electric Delivery");
        assert!(!selection.escalated);
        assert!(selection.rationale.contains("tie-break"));
    }

    #[tokio::test]
    async fn test_arbiter_error_falls_back_to_scored_outcome() {
        let cfg = PipelineConfig::default().with_source_priority("a", 3);
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        let answers = vec![
            answer("a", "Oncor Electric Delivery", 70),
            answer("b", "CenterPoint Energy", 70),
        ];
        let validation = validator.validate(&answers);
        let selection = selector
            .select(&request(), &validation, &validator, Some(&FailingArbiter))
            .await;

        assert!(selection.group.is_some());
        assert!(!selection.escalated);
    }

    #[tokio::test]
    async fn test_wide_margin_never_escalates() {
        let cfg = PipelineConfig::default();
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);
        // Majority with a dominant group; arbiter must not be consulted, so
        // even an out-of-set arbiter is harmless.
        let answers = vec![
            answer("a", "Oncor Electric Delivery", 90),
            answer("b", "Oncor", 85),
            answer("c", "CenterPoint Energy", 40),
        ];
        let validation = validator.validate(&answers);
        let arbiter = FixedArbiter {
            choose: "CenterPoint Energy".to_string(),
        };
        let selection = selector
            .select(&request(), &validation, &validator, Some(&arbiter))
            .await;

        let group = selection.group.unwrap();
        assert_eq!(group.canonical_name, "Oncor Electric Delivery");
        assert!(!selection.escalated);
        assert!(!selection.low_margin);
        assert!(selection.rationale.contains("majority"));
    }

    #[tokio::test]
    async fn test_none_and_single_paths() {
        let cfg = PipelineConfig::default();
        let validator = CrossValidator::new(&cfg);
        let selector = Selector::new(cfg);

        let validation = validator.validate(&[]);
        let selection = selector.select(&request(), &validation, &validator, None).await;
        assert!(selection.group.is_none());
        assert_eq!(selection.agreement, AgreementLevel::None);

        let validation = validator.validate(&[answer("solo", "City Power", 80)]);
        let selection = selector.select(&request(), &validation, &validator, None).await;
        assert_eq!(selection.agreement, AgreementLevel::Single);
        assert!(selection.rationale.contains("solo"));
    }
}
