//! Confidence scoring.
//!
//! Turns a source answer, its geographic match precision, and the run's
//! agreement verdict into a clamped 0-100 score and a named level.

use crate::config::PipelineConfig;
use crate::cross_validator::AgreementLevel;
use crate::model::{ConfidenceLevel, SourceAnswer};

pub struct ConfidenceScorer {
    config: PipelineConfig,
}

impl ConfidenceScorer {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Final score for one answer:
    /// `clamp(0, 100, base + precision bonus + agreement adjustment)`.
    ///
    /// The agreement adjustment applies only to members of the winning group
    /// whose base confidence clears the quality floor, so a pile of
    /// low-trust sources cannot out-vote a single high-trust one.
    pub fn score(
        &self,
        answer: &SourceAnswer,
        agreement: AgreementLevel,
        in_winning_group: bool,
    ) -> u8 {
        let mut score = answer.base_confidence as i32;
        score += self.config.precision_bonus(answer.precision) as i32;

        if in_winning_group && answer.base_confidence >= self.config.agreement_quality_floor {
            score += self.agreement_adjustment(agreement) as i32;
        }

        score.clamp(0, 100) as u8
    }

    fn agreement_adjustment(&self, agreement: AgreementLevel) -> i16 {
        match agreement {
            AgreementLevel::Full => self.config.full_agreement_bonus,
            AgreementLevel::Majority => self.config.majority_agreement_bonus,
            AgreementLevel::Split => self.config.split_agreement_penalty,
            AgreementLevel::Single | AgreementLevel::None => 0,
        }
    }

    /// Named band for a final score. `None` is reserved for runs with no
    /// valid answers at all.
    pub fn level(&self, score: u8, has_valid_answers: bool) -> ConfidenceLevel {
        if !has_valid_answers {
            return ConfidenceLevel::None;
        }
        match score {
            85..=100 => ConfidenceLevel::Verified,
            70..=84 => ConfidenceLevel::High,
            50..=69 => ConfidenceLevel::Medium,
            _ => ConfidenceLevel::Low,
        }
    }
}
