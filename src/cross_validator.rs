//! Cross-validation of source answers.
//!
//! Groups answers into equivalence classes despite naming variance
//! ("City Power Co" vs "CITY POWER" vs a configured alias) and produces an
//! agreement verdict over the classes. Grouping is order-independent:
//! answers are processed in a stable order before merging, so permuting
//! arrival order never changes the outcome.

use crate::config::PipelineConfig;
use crate::model::SourceAnswer;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strsim::jaro_winkler;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Legal-entity and domain suffix tokens stripped from the end of a
/// normalized name. Stripping repeats ("Power & Light Co Inc") but never
/// removes the final remaining token.
const SUFFIX_TOKENS: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "co",
    "corp",
    "corporation",
    "company",
    "cooperative",
    "coop",
    "association",
    "assn",
    "utility",
    "utilities",
    "energy",
    "electric",
    "power",
    "gas",
    "water",
    "light",
    "services",
    "service",
    "authority",
    "district",
    "department",
    "dept",
];

/// How strongly the valid answers agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    /// No valid answers at all.
    None,
    /// Exactly one valid answer.
    Single,
    /// One group holds every valid answer.
    Full,
    /// Largest group holds more than half of the valid answers.
    Majority,
    /// Largest group holds half or fewer.
    Split,
}

/// A cluster of answers judged to name the same real-world provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceGroup {
    /// Normalized name of the founding member.
    pub key: String,

    /// Display name taken from the highest-base-confidence member.
    pub canonical_name: String,

    pub members: Vec<SourceAnswer>,
}

impl EquivalenceGroup {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn max_base_confidence(&self) -> u8 {
        self.members
            .iter()
            .map(|m| m.base_confidence)
            .max()
            .unwrap_or(0)
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.source.clone()).collect()
    }

    /// Member with the highest base confidence. Groups are never empty.
    pub fn best_member(&self) -> &SourceAnswer {
        self.members
            .iter()
            .max_by_key(|m| m.base_confidence)
            .expect("equivalence group is never empty")
    }
}

/// Result of cross-validating one run's answers. Groups are sorted largest
/// first; equal sizes break toward the higher-base-confidence group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    pub agreement: AgreementLevel,
    pub groups: Vec<EquivalenceGroup>,
    pub valid_count: usize,
}

impl CrossValidation {
    pub fn winning_group(&self) -> Option<&EquivalenceGroup> {
        self.groups.first()
    }
}

/// Groups source answers by approximate name equivalence.
pub struct CrossValidator {
    min_substring_len: usize,
    jaro_winkler_threshold: f64,
    /// Normalized variant spelling to normalized canonical name.
    alias_index: HashMap<String, String>,
}

impl CrossValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        let mut alias_index = HashMap::new();
        for (canonical, variants) in &config.aliases {
            let canonical_norm = normalize_name(canonical);
            alias_index.insert(canonical_norm.clone(), canonical_norm.clone());
            for variant in variants {
                alias_index.insert(normalize_name(variant), canonical_norm.clone());
            }
        }
        Self {
            min_substring_len: config.min_substring_len,
            jaro_winkler_threshold: config.jaro_winkler_threshold,
            alias_index,
        }
    }

    /// Partition the valid answers into equivalence groups and compute the
    /// agreement level. Invalid answers (no name, or failure-tagged) never
    /// contribute.
    pub fn validate(&self, answers: &[SourceAnswer]) -> CrossValidation {
        // Stable processing order makes grouping independent of arrival
        // order: confidence desc, then source id.
        let mut valid: Vec<&SourceAnswer> = answers.iter().filter(|a| a.is_valid()).collect();
        valid.sort_by(|a, b| {
            b.base_confidence
                .cmp(&a.base_confidence)
                .then_with(|| a.source.cmp(&b.source))
        });

        let mut groups: Vec<EquivalenceGroup> = Vec::new();
        for answer in &valid {
            let name = answer
                .provider_name
                .as_deref()
                .expect("valid answer has a name");
            let normalized = normalize_name(name);

            let existing = groups.iter_mut().find(|g| {
                g.members.iter().any(|m| {
                    let member_norm =
                        normalize_name(m.provider_name.as_deref().unwrap_or_default());
                    self.names_equivalent(&normalized, &member_norm)
                })
            });

            match existing {
                Some(group) => group.members.push((*answer).clone()),
                None => groups.push(EquivalenceGroup {
                    key: normalized,
                    canonical_name: name.to_string(),
                    members: vec![(*answer).clone()],
                }),
            }
        }

        // Largest first; equal sizes prefer the group with the stronger
        // member; key as the final stable tie-break.
        groups.sort_by(|a, b| {
            b.size()
                .cmp(&a.size())
                .then_with(|| b.max_base_confidence().cmp(&a.max_base_confidence()))
                .then_with(|| a.key.cmp(&b.key))
        });

        let valid_count = valid.len();
        let agreement = match (valid_count, groups.first()) {
            (0, _) => AgreementLevel::None,
            (1, _) => AgreementLevel::Single,
            (_, Some(top)) if top.size() == valid_count => AgreementLevel::Full,
            (_, Some(top)) if top.size() * 2 > valid_count => AgreementLevel::Majority,
            _ => AgreementLevel::Split,
        };

        CrossValidation {
            agreement,
            groups,
            valid_count,
        }
    }

    /// Whether two raw provider names refer to the same entity. Used by the
    /// selector to validate arbiter output against the candidate set.
    pub fn names_match(&self, a: &str, b: &str) -> bool {
        self.names_equivalent(&normalize_name(a), &normalize_name(b))
    }

    fn names_equivalent(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        // Substring containment, guarded against short accidental matches.
        if a.len() >= self.min_substring_len
            && b.len() >= self.min_substring_len
            && (a.contains(b) || b.contains(a))
        {
            return true;
        }
        // Configured alias sets.
        if let (Some(ca), Some(cb)) = (self.alias_index.get(a), self.alias_index.get(b)) {
            if ca == cb {
                return true;
            }
        }
        // Jaro-Winkler handles typos and near-variants.
        jaro_winkler(a, b) >= self.jaro_winkler_threshold
    }
}

/// Normalize a provider name for comparison: lowercase, strip punctuation,
/// collapse whitespace, then strip trailing legal/domain suffix tokens.
pub fn normalize_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ").to_string();

    let mut tokens: Vec<&str> = collapsed.split(' ').filter(|t| !t.is_empty()).collect();
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        if SUFFIX_TOKENS.contains(&last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}
