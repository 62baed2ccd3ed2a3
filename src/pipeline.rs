//! Lookup pipeline orchestration.
//!
//! Owns one run end to end: fans out to every applicable data source
//! concurrently, enforces per-source and whole-run time budgets,
//! short-circuits on an early high-confidence hit, then runs
//! cross-validation, selection, scoring, and optional post-hoc verification.
//! Every failure mode degrades to a (possibly `none`) Verdict; the run never
//! hangs and never surfaces a hard error for transient source failures.

use crate::arbiter::{Arbiter, Verifier};
use crate::config::PipelineConfig;
use crate::cross_validator::{AgreementLevel, CrossValidator, EquivalenceGroup};
use crate::model::{
    AnswerFailure, ConfidenceLevel, LookupRequest, SourceAnswer, UtilityCategory, Verdict,
};
use crate::scorer::ConfidenceScorer;
use crate::selector::{Selection, Selector};
use crate::source::SourceRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The lookup aggregation pipeline. Holds no per-request state; one
/// instance serves any number of concurrent `lookup` calls.
pub struct Pipeline {
    registry: SourceRegistry,
    config: PipelineConfig,
    validator: CrossValidator,
    selector: Selector,
    scorer: ConfidenceScorer,
    arbiter: Option<Arc<dyn Arbiter>>,
    verifier: Option<Arc<dyn Verifier>>,
}

impl Pipeline {
    pub fn new(registry: SourceRegistry, config: PipelineConfig) -> Self {
        let validator = CrossValidator::new(&config);
        let selector = Selector::new(config.clone());
        let scorer = ConfidenceScorer::new(config.clone());
        Self {
            registry,
            config,
            validator,
            selector,
            scorer,
            arbiter: None,
            verifier: None,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Arc<dyn Arbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Run one lookup to completion. The only await point callers block on
    /// is the fan-in over source queries, bounded by the whole-run deadline.
    pub async fn lookup(&self, request: LookupRequest) -> Verdict {
        let run_id = Uuid::new_v4();
        let category = request.category().clone();
        let request = request.shared();

        let sources = self.registry.applicable(&category);
        if sources.is_empty() {
            info!(%run_id, %category, "No applicable sources for category");
            let mut verdict = Verdict::none(category, "no data sources cover this category");
            verdict.run_id = run_id;
            return verdict;
        }

        info!(
            %run_id,
            %category,
            sources = sources.len(),
            location = %request.location_summary(),
            "Dispatching lookup"
        );

        let (answers, short_circuited) = self.collect(run_id, &request, sources).await;
        if short_circuited {
            debug!(%run_id, "Phase: short-circuited");
        } else {
            debug!(%run_id, "Phase: collection complete");
        }

        let validation = self.validator.validate(&answers);
        debug!(
            %run_id,
            agreement = ?validation.agreement,
            groups = validation.groups.len(),
            valid = validation.valid_count,
            "Phase: validated"
        );

        let selection = self
            .selector
            .select(
                &request,
                &validation,
                &self.validator,
                self.arbiter.as_deref(),
            )
            .await;
        debug!(%run_id, rationale = %selection.rationale, "Phase: selected");

        let mut verdict = self.build_verdict(run_id, category, &validation.agreement, &selection, answers);
        debug!(%run_id, confidence = verdict.confidence, level = %verdict.level, "Phase: scored");

        if selection.low_margin {
            if let Some(verifier) = &self.verifier {
                self.verify(&request, &validation.groups, &selection, verifier.as_ref(), &mut verdict)
                    .await;
            }
        }

        info!(
            %run_id,
            provider = verdict.provider_name.as_deref().unwrap_or("<none>"),
            confidence = verdict.confidence,
            level = %verdict.level,
            "Verdict"
        );
        verdict
    }

    /// Fan out to all sources and gather answers until every source
    /// finishes, the whole-run deadline expires, or a single answer clears
    /// the short-circuit threshold. Timeouts and errors become tagged
    /// no-opinion answers, never dropped silently.
    async fn collect(
        &self,
        run_id: Uuid,
        request: &Arc<LookupRequest>,
        sources: Vec<Arc<dyn crate::source::DataSource>>,
    ) -> (Vec<SourceAnswer>, bool) {
        let deadline = Instant::now() + self.config.overall_deadline;
        let mut join_set: JoinSet<SourceAnswer> = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, String> = HashMap::new();

        for source in sources {
            let identity = source.identity().to_string();
            let budget = source
                .timeout_budget()
                .unwrap_or(self.config.default_source_timeout);
            let request = Arc::clone(request);
            let task_identity = identity.clone();
            let handle = join_set.spawn(async move {
                let started = Instant::now();
                let outcome = timeout(budget, source.query(request)).await;
                let elapsed = started.elapsed();
                match outcome {
                    Ok(Ok(mut answer)) => {
                        answer.elapsed = elapsed;
                        answer
                    }
                    Ok(Err(e)) => {
                        warn!(source = %task_identity, error = %e, "Source query failed");
                        SourceAnswer::failed(
                            task_identity.as_str(),
                            AnswerFailure::Error(e.to_string()),
                        )
                        .with_elapsed(elapsed)
                    }
                    Err(_) => {
                        warn!(source = %task_identity, ?budget, "Source query timed out");
                        SourceAnswer::failed(task_identity.as_str(), AnswerFailure::Timeout)
                            .with_elapsed(elapsed)
                    }
                }
            });
            pending.insert(handle.id(), identity);
        }

        let mut answers: Vec<SourceAnswer> = Vec::new();
        let mut short_circuited = false;

        while !join_set.is_empty() {
            match timeout_at(deadline, join_set.join_next_with_id()).await {
                Ok(Some(Ok((task_id, answer)))) => {
                    pending.remove(&task_id);
                    debug!(
                        %run_id,
                        source = %answer.source,
                        valid = answer.is_valid(),
                        elapsed_ms = answer.elapsed.as_millis() as u64,
                        "Source completed"
                    );
                    let hit = answer.is_valid()
                        && answer.base_confidence >= self.config.short_circuit_confidence;
                    answers.push(answer);
                    if hit {
                        info!(
                            %run_id,
                            threshold = self.config.short_circuit_confidence,
                            outstanding = pending.len(),
                            "High-confidence answer arrived, cancelling remaining sources"
                        );
                        join_set.abort_all();
                        short_circuited = true;
                        break;
                    }
                }
                Ok(Some(Err(join_err))) => {
                    // A task panicked or was aborted; attribute it if we can.
                    let source = pending.remove(&join_err.id());
                    if join_err.is_panic() {
                        let name = source.unwrap_or_else(|| "<unknown>".to_string());
                        warn!(%run_id, source = %name, "Source task panicked");
                        answers.push(SourceAnswer::failed(
                            name,
                            AnswerFailure::Error("source task panicked".to_string()),
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Whole-run deadline: proceed with whatever has arrived,
                    // recording the stragglers as timeouts.
                    warn!(
                        %run_id,
                        outstanding = pending.len(),
                        "Run deadline reached before all sources finished"
                    );
                    join_set.abort_all();
                    for identity in pending.values() {
                        answers.push(SourceAnswer::failed(
                            identity.as_str(),
                            AnswerFailure::Timeout,
                        ));
                    }
                    break;
                }
            }
        }

        (answers, short_circuited)
    }

    fn build_verdict(
        &self,
        run_id: Uuid,
        category: UtilityCategory,
        agreement: &AgreementLevel,
        selection: &Selection,
        answers: Vec<SourceAnswer>,
    ) -> Verdict {
        let group = match &selection.group {
            Some(group) => group,
            None => {
                let mut verdict = Verdict::none(category, selection.rationale.clone());
                verdict.run_id = run_id;
                verdict.answers = answers;
                return verdict;
            }
        };

        let best = group.best_member();
        let confidence = self.scorer.score(best, *agreement, true);
        let level = self.scorer.level(confidence, true);

        let agreeing = group.source_ids();
        let dissenting: Vec<String> = answers
            .iter()
            .filter(|a| a.is_valid() && !agreeing.contains(&a.source))
            .map(|a| a.source.clone())
            .collect();

        let phone = group.members.iter().find_map(|m| m.phone.clone());
        let url = group.members.iter().find_map(|m| m.url.clone());

        Verdict {
            run_id,
            category,
            provider_name: Some(group.canonical_name.clone()),
            confidence,
            level,
            agreement: *agreement,
            agreeing_sources: agreeing,
            dissenting_sources: dissenting,
            rationale: selection.rationale.clone(),
            phone,
            url,
            escalated: selection.escalated,
            verified: false,
            answers,
            decided_at: Utc::now(),
        }
    }

    /// Post-hoc verification, consulted only on low-margin disagreement.
    /// Confirmation boosts the verdict to verified; a contradiction naming a
    /// losing candidate switches the verdict to it; anything else leaves the
    /// selection untouched but records the disagreement for audit.
    async fn verify(
        &self,
        request: &LookupRequest,
        groups: &[EquivalenceGroup],
        selection: &Selection,
        verifier: &dyn Verifier,
        verdict: &mut Verdict,
    ) {
        let expected = match verdict.provider_name.as_deref() {
            Some(name) => name.to_string(),
            None => return,
        };

        let outcome = match verifier
            .verify(request, &verdict.category, &expected)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(run_id = %verdict.run_id, error = %e, "Post-hoc verifier failed, keeping selection");
                return;
            }
        };

        match outcome.agrees {
            Some(true) => {
                info!(run_id = %verdict.run_id, provider = %expected, "Post-hoc verification confirmed the selection");
                verdict.verified = true;
                verdict.confidence = verdict.confidence.max(85);
                verdict.level = ConfidenceLevel::Verified;
                verdict.rationale = format!("{}; confirmed by post-hoc verification", verdict.rationale);
            }
            Some(false) => {
                let contradicting = outcome.matched_name.as_deref().and_then(|name| {
                    groups.iter().find(|g| {
                        !self.validator.names_match(&g.canonical_name, &expected)
                            && self.validator.names_match(&g.canonical_name, name)
                    })
                });
                match contradicting {
                    Some(group) => {
                        warn!(
                            run_id = %verdict.run_id,
                            from = %expected,
                            to = %group.canonical_name,
                            "Post-hoc verification contradicted the selection, switching verdict"
                        );
                        let best = group.best_member();
                        let confidence = self.scorer.score(best, selection.agreement, false);
                        verdict.provider_name = Some(group.canonical_name.clone());
                        verdict.agreeing_sources = group.source_ids();
                        verdict.dissenting_sources = verdict
                            .answers
                            .iter()
                            .filter(|a| a.is_valid() && !verdict.agreeing_sources.contains(&a.source))
                            .map(|a| a.source.clone())
                            .collect();
                        verdict.phone = group.members.iter().find_map(|m| m.phone.clone());
                        verdict.url = group.members.iter().find_map(|m| m.url.clone());
                        verdict.verified = true;
                        verdict.confidence = confidence.max(85);
                        verdict.level = ConfidenceLevel::Verified;
                        verdict.rationale = format!(
                            "{}; overturned by post-hoc verification in favor of '{}'",
                            verdict.rationale, group.canonical_name
                        );
                    }
                    None => {
                        warn!(
                            run_id = %verdict.run_id,
                            matched = outcome.matched_name.as_deref().unwrap_or("<none>"),
                            "Post-hoc verification disagreed but matched no candidate, keeping selection"
                        );
                    }
                }
            }
            None => {
                debug!(run_id = %verdict.run_id, "Post-hoc verification inconclusive, keeping selection");
            }
        }
    }
}
