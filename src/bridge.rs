//! The bridge facade: the single externally-consumed surface.
//!
//! Composes the intent graph, versioning, governor, triumvirate, phi
//! scorer, stigmergy field, flocking checks, and signal bus, and
//! degrades gracefully when a subsystem is disabled: with voting off,
//! enrichment and the graph still work.
//!
//! The bridge is the only component that sees all others; flocking
//! consumes a read-only marker view and never calls back in.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, SignalBackendKind};
use crate::economics::EconomicsPolicy;
use crate::error::ConvergentError;
use crate::events::{CoordinationEvent, EventCursor, Timeline};
use crate::flocking::FlockingCoordinator;
use crate::gates::{ConstraintEvaluator, GateRegistry};
use crate::governor::{Governor, GovernorOutcome, GovernorReport};
use crate::graph::{ConflictClassifier, IntentGraph};
use crate::health::{HealthInputs, HealthReport};
use crate::matching::{Matcher, SemanticMatcher};
use crate::phi::{OutcomeRecord, PhiScorer};
use crate::signals::{FilesystemSignalBus, InMemorySignalBus, SignalBus, SignalRouter};
use crate::stability::StabilityScorer;
use crate::store::{
    AppendOutcome, CoordinationStore, InMemoryCoordinationStore, InMemoryIntentStore,
    InMemoryStigmergyStore, IntentStore, StigmergyStore,
};
use crate::stigmergy::StigmergyField;
use crate::sweep::SweepTask;
use crate::triumvirate::{Evaluation, Triumvirate, VoteReception};
use crate::types::consensus::{ConsensusRequest, Decision, QuorumLevel, RequestId, Vote};
use crate::types::intent::{AgentId, Intent, IntentId};
use crate::types::marker::MarkerType;
use crate::versioning::{MergeLog, MergeResult, Snapshot, SnapshotId, VersionedGraph};

/// Stability below the speculative bracket floor marks an intent stale.
const STALE_STABILITY_FLOOR: f64 = 0.10;

/// Result of submitting a proposed merge through the governor.
#[derive(Debug)]
pub struct MergeSubmission {
    /// The governor's full report.
    pub report: GovernorReport,
    /// The sealed snapshot, when the merge went through.
    pub snapshot: Option<Snapshot>,
    /// The consensus request opened for an escalation, when voting is
    /// configured.
    pub consensus_request: Option<ConsensusRequest>,
}

/// Builder for a [`ConvergentBridge`].
pub struct BridgeBuilder {
    config: EngineConfig,
    semantic: Option<Box<dyn SemanticMatcher>>,
    gates: GateRegistry,
    voting: bool,
}

impl BridgeBuilder {
    /// Start a builder from a configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            semantic: None,
            gates: GateRegistry::new(),
            voting: true,
        }
    }

    /// Inject a semantic matcher implementation.
    pub fn semantic_matcher(mut self, matcher: Box<dyn SemanticMatcher>) -> Self {
        self.semantic = Some(matcher);
        self
    }

    /// Inject the gate registry the constraints layer consults.
    pub fn gates(mut self, gates: GateRegistry) -> Self {
        self.gates = gates;
        self
    }

    /// Disable consensus voting; enrichment and the graph keep working.
    pub fn without_voting(mut self) -> Self {
        self.voting = false;
        self
    }

    /// Build a bridge over in-memory stores.
    pub fn build_in_memory(self) -> Result<InMemoryBridge, ConvergentError> {
        let bus = build_signal_bus(&self.config)?;
        self.assemble(
            Arc::new(InMemoryIntentStore::new()),
            Arc::new(InMemoryCoordinationStore::new()),
            Arc::new(InMemoryStigmergyStore::new()),
            bus,
        )
    }

    /// Build a bridge over the persistent single-file stores rooted at
    /// the configured `db_path`.
    #[cfg(feature = "sqlite")]
    pub fn build_persistent(self) -> Result<PersistentBridge, ConvergentError> {
        use crate::store::{SqliteCoordinationStore, SqliteIntentStore, SqliteStigmergyStore};

        let db_path = self.config.db_path.clone().ok_or_else(|| {
            ConvergentError::validation("persistent bridge requires db_path in the configuration")
        })?;
        let coordination_path = self
            .config
            .coordination_db_path()
            .expect("db_path present");
        let stigmergy_path = self.config.stigmergy_db_path().expect("db_path present");

        let bus = build_signal_bus(&self.config)?;
        self.assemble(
            Arc::new(SqliteIntentStore::open(db_path)?),
            Arc::new(SqliteCoordinationStore::open(coordination_path)?),
            Arc::new(SqliteStigmergyStore::open(stigmergy_path)?),
            bus,
        )
    }

    fn assemble<S, C, T>(
        self,
        intent_store: Arc<S>,
        coordination: Arc<C>,
        stigmergy_store: Arc<T>,
        bus: Arc<dyn SignalBus>,
    ) -> Result<ConvergentBridge<S, C, T>, ConvergentError>
    where
        S: IntentStore,
        C: CoordinationStore,
        T: StigmergyStore,
    {
        let config = self.config;

        let mut matcher = Matcher::structural(config.structural_match_threshold);
        if let Some(semantic) = self.semantic {
            matcher = matcher.with_semantic(semantic);
        }
        let scorer = StabilityScorer::new(
            config.stability_decay_rate,
            config.evidence_weights.clone(),
        );
        let classifier = Arc::new(ConflictClassifier::new(
            matcher,
            scorer,
            config.ambiguity_epsilon,
        ));

        let graph = IntentGraph::new(Arc::clone(&intent_store), Arc::clone(&classifier));
        let versioned = VersionedGraph::new(
            intent_store,
            Arc::clone(&classifier),
            config.params_hash(),
        );
        let governor = Governor::new(
            ConstraintEvaluator::new(self.gates),
            Arc::clone(&classifier),
            EconomicsPolicy::new(
                config.budget,
                config.escalation_cost,
                config.error_cost,
                config.escalation_ev_threshold,
            ),
        );

        let phi = Arc::new(PhiScorer::new(
            Arc::clone(&coordination),
            config.phi_decay_rate,
            config.phi_min,
            config.phi_max,
        ));
        let triumvirate = if self.voting {
            Some(Triumvirate::new(
                Arc::clone(&coordination),
                Arc::clone(&phi),
                config.default_quorum,
                config.vote_timeout_seconds,
            ))
        } else {
            None
        };

        let stigmergy = StigmergyField::new(
            stigmergy_store,
            config.stigmergy_evaporation_rate,
            config.stigmergy_min_strength,
        );
        let flocking = FlockingCoordinator::new(
            config.cohesion_threshold,
            config.separation_window_days,
        );

        Ok(ConvergentBridge {
            config,
            graph,
            versioned,
            governor,
            coordination,
            phi,
            triumvirate,
            stigmergy,
            flocking,
            signals: SignalRouter::new(bus),
            sweeps: Mutex::new(Vec::new()),
        })
    }
}

/// Select and construct the configured signal bus backend.
fn build_signal_bus(config: &EngineConfig) -> Result<Arc<dyn SignalBus>, ConvergentError> {
    match config.signal_backend {
        SignalBackendKind::Memory => Ok(Arc::new(InMemorySignalBus::new())),
        SignalBackendKind::Filesystem => {
            let dir = config
                .signal_db_path()
                .unwrap_or_else(|| std::path::PathBuf::from("convergent-signals"));
            Ok(Arc::new(FilesystemSignalBus::open(dir)?))
        }
        SignalBackendKind::Persistent => {
            #[cfg(feature = "sqlite")]
            {
                match config.signal_db_path() {
                    Some(path) => Ok(Arc::new(crate::signals::PersistentSignalBus::open(path)?)),
                    None => {
                        tracing::warn!(
                            "persistent signal backend requested without db_path; using memory"
                        );
                        Ok(Arc::new(InMemorySignalBus::new()))
                    }
                }
            }
            #[cfg(not(feature = "sqlite"))]
            {
                tracing::warn!(
                    "persistent signal backend requires the sqlite feature; using memory"
                );
                Ok(Arc::new(InMemorySignalBus::new()))
            }
        }
    }
}

/// Bridge over in-memory stores.
pub type InMemoryBridge =
    ConvergentBridge<InMemoryIntentStore, InMemoryCoordinationStore, InMemoryStigmergyStore>;

/// Bridge over the persistent single-file stores.
#[cfg(feature = "sqlite")]
pub type PersistentBridge = ConvergentBridge<
    crate::store::SqliteIntentStore,
    crate::store::SqliteCoordinationStore,
    crate::store::SqliteStigmergyStore,
>;

/// The coordination engine's single externally-consumed surface.
pub struct ConvergentBridge<S: IntentStore, C: CoordinationStore, T: StigmergyStore> {
    config: EngineConfig,
    graph: IntentGraph<S>,
    versioned: VersionedGraph<S>,
    governor: Governor,
    coordination: Arc<C>,
    phi: Arc<PhiScorer<C>>,
    triumvirate: Option<Triumvirate<C>>,
    stigmergy: StigmergyField<T>,
    flocking: FlockingCoordinator,
    signals: SignalRouter,
    sweeps: Mutex<Vec<SweepTask>>,
}

impl<S, C, T> ConvergentBridge<S, C, T>
where
    S: IntentStore,
    C: CoordinationStore,
    T: StigmergyStore + 'static,
{
    /// The configuration the bridge was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The intent graph.
    pub fn graph(&self) -> &IntentGraph<S> {
        &self.graph
    }

    /// The versioned snapshot DAG.
    pub fn versioned(&self) -> &VersionedGraph<S> {
        &self.versioned
    }

    /// The stigmergy field.
    pub fn stigmergy(&self) -> &StigmergyField<T> {
        &self.stigmergy
    }

    /// The phi scorer.
    pub fn phi(&self) -> &Arc<PhiScorer<C>> {
        &self.phi
    }

    /// The signal router.
    pub fn signals(&self) -> &SignalRouter {
        &self.signals
    }

    // ─────────────────────────────────────────────────────────────────
    // Intents
    // ─────────────────────────────────────────────────────────────────

    /// Publish an intent, recording a coordination event.
    pub fn publish_intent(&self, intent: &Intent) -> Result<AppendOutcome, ConvergentError> {
        let outcome = self.graph.publish(intent)?;
        if let AppendOutcome::Appended(_) = outcome {
            self.record_event(
                CoordinationEvent::new(
                    "intent_published",
                    intent.description.clone(),
                    intent.created_at,
                )
                .with_agent(intent.agent_id.clone())
                .with_subject(intent.intent_id.as_str())
                .with_correlation(intent.intent_id.as_str()),
            );
        }
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────
    // Enrichment
    // ─────────────────────────────────────────────────────────────────

    /// Assemble the coordination context for an agent's upcoming task:
    /// stigmergy traces, flocking constraints, and published intents
    /// touching the same files.
    pub fn enrich_prompt(
        &self,
        agent: &AgentId,
        task_description: &str,
        files: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, ConvergentError> {
        let mut sections: Vec<String> = Vec::new();

        let context = self.stigmergy.context_for(files, now)?;
        if !context.is_empty() {
            sections.push(context.trim_end().to_string());
        }

        let markers = self.stigmergy.markers_for(files, now)?;
        let constraints =
            self.flocking
                .compose(&markers, task_description, None, files, agent, now);
        if !constraints.is_empty() {
            let mut block = String::from("Coordination constraints:\n");
            for constraint in &constraints {
                block.push_str(&format!("- {constraint}\n"));
            }
            sections.push(block.trim_end().to_string());
        }

        let related = self.intents_touching(files, agent)?;
        if !related.is_empty() {
            let mut block = String::from("Published intents touching your files:\n");
            for intent in &related {
                block.push_str(&format!(
                    "- {} ({}): {}\n",
                    intent.intent_id, intent.agent_id, intent.description
                ));
            }
            sections.push(block.trim_end().to_string());
        }

        Ok(sections.join("\n\n"))
    }

    /// Other agents' intents whose affected files intersect `files`.
    fn intents_touching(
        &self,
        files: &[String],
        agent: &AgentId,
    ) -> Result<Vec<Intent>, ConvergentError> {
        Ok(self
            .graph
            .all_ordered()?
            .into_iter()
            .filter(|i| &i.agent_id != agent)
            .filter(|i| i.files_affected.iter().any(|f| files.contains(f)))
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────
    // Merging
    // ─────────────────────────────────────────────────────────────────

    /// Run a proposed merge through the governor and apply its verdict.
    ///
    /// `merge` and `auto_resolve` seal a snapshot; `escalate` opens a
    /// consensus request when voting is configured; `reject` leaves the
    /// graph untouched and returns the report for inspection. `block`
    /// is resource exhaustion, not a classification: it is recorded on
    /// the timeline and raised as `BudgetExceeded`.
    pub fn submit_merge(
        &self,
        base: &SnapshotId,
        incoming: &SnapshotId,
        now: DateTime<Utc>,
    ) -> Result<MergeSubmission, ConvergentError> {
        let correlation = format!("merge:{incoming}");

        let (base_intents, incoming_only) = self.merge_sides(base, incoming)?;
        let report = self.governor.evaluate_merge(&base_intents, &incoming_only, now);

        self.record_event(
            CoordinationEvent::new("governor_verdict", report.rationale.clone(), now)
                .with_subject(incoming.as_str())
                .with_correlation(correlation.clone()),
        );

        let mut snapshot = None;
        let mut consensus_request = None;

        match &report.outcome {
            GovernorOutcome::Merge => {
                let result = self.versioned.merge(base, incoming, now)?;
                snapshot = result.snapshot;
            }
            GovernorOutcome::AutoResolve { .. } => {
                // The contested ground is resolved; seal the union with
                // both parents so replay sees the same shape as a clean
                // merge.
                let base_snapshot = self
                    .versioned
                    .get_snapshot(base)?
                    .ok_or_else(|| ConvergentError::validation(format!("unknown snapshot {base}")))?;
                let mut ids = base_snapshot.intent_ids.clone();
                ids.extend(incoming_only.iter().map(|i| i.intent_id.clone()));
                snapshot = Some(self.versioned.seal(
                    vec![base.clone(), incoming.clone()],
                    ids,
                    now,
                )?);
            }
            GovernorOutcome::Escalate { conflicts } => {
                if let Some(triumvirate) = &self.triumvirate {
                    let contested: Vec<String> = conflicts
                        .iter()
                        .map(|c| format!("{} vs {}", c.left, c.right))
                        .collect();
                    let request = triumvirate.request_consensus(
                        correlation.clone(),
                        format!(
                            "Merge of snapshot {incoming} into {base}: resolve {}",
                            contested.join("; ")
                        ),
                        serde_json::json!({}),
                        None,
                        None,
                        vec![base.as_str().to_string(), incoming.as_str().to_string()],
                        now,
                    )?;
                    self.record_event(
                        CoordinationEvent::new(
                            "consensus_requested",
                            request.question.clone(),
                            now,
                        )
                        .with_subject(request.request_id.as_str())
                        .with_correlation(correlation.clone()),
                    );
                    consensus_request = Some(request);
                }
            }
            GovernorOutcome::Reject => {
                self.record_event(
                    CoordinationEvent::new("merge_rejected", report.rationale.clone(), now)
                        .with_subject(incoming.as_str())
                        .with_correlation(correlation.clone()),
                );
            }
            GovernorOutcome::Block { spent, budget } => {
                let (spent, budget) = (*spent, *budget);
                self.record_event(
                    CoordinationEvent::new(
                        "merge_blocked",
                        format!("budget exhausted: {spent:.2} of {budget:.2} spent"),
                        now,
                    )
                    .with_subject(incoming.as_str())
                    .with_correlation(correlation),
                );
                return Err(ConvergentError::BudgetExceeded { spent, budget });
            }
        }

        if let Some(sealed) = &snapshot {
            self.record_event(
                CoordinationEvent::new("merge_sealed", format!("snapshot {}", sealed.snapshot_id), now)
                    .with_subject(sealed.snapshot_id.as_str())
                    .with_correlation(correlation),
            );
        }

        Ok(MergeSubmission {
            report,
            snapshot,
            consensus_request,
        })
    }

    /// Plain versioned merge without the governor (used by replay-style
    /// callers that already hold a verdict).
    pub fn merge(
        &self,
        log: &mut MergeLog,
        base: &SnapshotId,
        incoming: &SnapshotId,
        now: DateTime<Utc>,
    ) -> Result<MergeResult, ConvergentError> {
        self.versioned.merge_recorded(log, base, incoming, now)
    }

    fn merge_sides(
        &self,
        base: &SnapshotId,
        incoming: &SnapshotId,
    ) -> Result<(Vec<Intent>, Vec<Intent>), ConvergentError> {
        let base_snapshot = self
            .versioned
            .get_snapshot(base)?
            .ok_or_else(|| ConvergentError::validation(format!("unknown snapshot {base}")))?;
        let incoming_snapshot = self
            .versioned
            .get_snapshot(incoming)?
            .ok_or_else(|| ConvergentError::validation(format!("unknown snapshot {incoming}")))?;

        let load = |ids: &[IntentId]| -> Result<Vec<Intent>, ConvergentError> {
            ids.iter()
                .map(|id| {
                    self.graph.get(id)?.ok_or_else(|| {
                        ConvergentError::backend(format!("snapshot references missing intent {id}"))
                    })
                })
                .collect()
        };

        let base_intents = load(&base_snapshot.intent_ids)?;
        let incoming_only_ids: Vec<IntentId> = incoming_snapshot
            .intent_ids
            .iter()
            .filter(|id| !base_snapshot.intent_ids.contains(id))
            .cloned()
            .collect();
        let incoming_only = load(&incoming_only_ids)?;
        Ok((base_intents, incoming_only))
    }

    // ─────────────────────────────────────────────────────────────────
    // Consensus
    // ─────────────────────────────────────────────────────────────────

    fn voting(&self) -> Result<&Triumvirate<C>, ConvergentError> {
        self.triumvirate
            .as_ref()
            .ok_or_else(|| ConvergentError::validation("consensus voting is not configured"))
    }

    /// Open a consensus request.
    #[allow(clippy::too_many_arguments)]
    pub fn request_consensus(
        &self,
        task_id: impl Into<String>,
        question: impl Into<String>,
        context: serde_json::Value,
        quorum: Option<QuorumLevel>,
        timeout_seconds: Option<u64>,
        artifacts: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<ConsensusRequest, ConvergentError> {
        self.voting()?
            .request_consensus(task_id, question, context, quorum, timeout_seconds, artifacts, now)
    }

    /// Submit an agent's vote.
    pub fn submit_agent_vote(&self, vote: Vote) -> Result<VoteReception, ConvergentError> {
        self.voting()?.submit_vote(vote)
    }

    /// Record a human confirmation for a `unanimous_human` request.
    pub fn confirm_human(&self, id: &RequestId) -> Result<(), ConvergentError> {
        self.voting()?.confirm_human(id)
    }

    /// Evaluate a request at `now`.
    pub fn evaluate(&self, id: &RequestId, now: DateTime<Utc>) -> Result<Evaluation, ConvergentError> {
        let evaluation = self.voting()?.evaluate(id, now)?;
        if let Evaluation::Decided(decision) = &evaluation {
            self.record_event(
                CoordinationEvent::new("decision_sealed", decision.outcome.to_string(), now)
                    .with_subject(id.as_str())
                    .with_correlation(decision.request.task_id.clone()),
            );
        }
        Ok(evaluation)
    }

    /// All sealed decisions, oldest first.
    pub fn decision_history(&self) -> Result<Vec<Decision>, ConvergentError> {
        self.coordination.decisions()
    }

    /// The persisted votes for a request.
    pub fn vote_history(&self, id: &RequestId) -> Result<Vec<Vote>, ConvergentError> {
        self.coordination.votes_for(id)
    }

    // ─────────────────────────────────────────────────────────────────
    // Outcomes & stigmergy
    // ─────────────────────────────────────────────────────────────────

    /// Record a finished task: phi trust update plus `file_modified`
    /// markers on every touched file.
    pub fn record_task_outcome(
        &self,
        agent: &AgentId,
        domain: &str,
        approved: bool,
        files: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), ConvergentError> {
        self.phi
            .record_outcome(&OutcomeRecord::new(agent.clone(), domain, approved, now))?;

        for file in files {
            self.stigmergy.deposit(
                agent.clone(),
                MarkerType::FileModified,
                file.clone(),
                format!("task in domain {domain}"),
                1.0,
                now,
            )?;
        }

        self.record_event(
            CoordinationEvent::new(
                "task_outcome_recorded",
                format!("domain {domain}, approved {approved}"),
                now,
            )
            .with_agent(agent.clone()),
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Events & health
    // ─────────────────────────────────────────────────────────────────

    /// A restartable cursor over the coordination event log.
    pub fn events(&self, batch_size: usize) -> EventCursor<C> {
        EventCursor::new(Arc::clone(&self.coordination), batch_size)
    }

    /// Assemble the timeline for one correlation id.
    pub fn timeline(&self, correlation_id: &str) -> Result<Timeline, ConvergentError> {
        let mut cursor = EventCursor::new(Arc::clone(&self.coordination), 256);
        let mut events = Vec::new();
        loop {
            let batch = cursor.next_batch()?;
            if batch.is_empty() {
                break;
            }
            events.extend(batch);
        }
        Ok(Timeline::assemble(&events, correlation_id))
    }

    /// Compute the engine health report.
    pub fn health_report(&self, now: DateTime<Utc>) -> Result<HealthReport, ConvergentError> {
        let intents = self.graph.all_ordered()?;
        let scorer = self.graph.classifier().scorer();

        let stale_intents = intents
            .iter()
            .filter(|i| scorer.intent_score_at(i, now) < STALE_STABILITY_FLOOR)
            .count();

        let mut unresolved_conflicts = 0;
        for (idx, later) in intents.iter().enumerate() {
            for earlier in &intents[..idx] {
                if earlier.agent_id == later.agent_id {
                    continue;
                }
                let conflict = self.graph.classifier().classify(earlier, later, now);
                if !conflict.kind.is_mergeable() {
                    unresolved_conflicts += 1;
                }
            }
        }

        let deadlocked_decisions = self
            .coordination
            .decisions()?
            .iter()
            .filter(|d| d.outcome == crate::types::ConsensusOutcome::Deadlock)
            .count();

        let unswept_markers = self
            .stigmergy
            .all_markers()?
            .iter()
            .filter(|m| m.is_expired(now))
            .count();

        Ok(HealthReport::compute(HealthInputs {
            intent_count: intents.len() as u64,
            dependency_cycles: self.graph.dependency_cycles()?.len(),
            unresolved_conflicts,
            deadlocked_decisions,
            stale_intents,
            unswept_markers,
        }))
    }

    // ─────────────────────────────────────────────────────────────────
    // Sweeps
    // ─────────────────────────────────────────────────────────────────

    /// Start the background sweeps (marker evaporation and expired
    /// signal cleanup) on dedicated worker threads.
    pub fn start_sweeps(&self, interval: Duration) {
        let mut sweeps = self.sweeps.lock();
        if !sweeps.is_empty() {
            return;
        }

        let field = self.stigmergy.clone();
        sweeps.push(SweepTask::spawn("stigmergy", interval, move || {
            if let Err(e) = field.evaporate(Utc::now()) {
                tracing::warn!(error = %e, "marker evaporation failed");
            }
        }));

        let bus = Arc::clone(self.signals.bus());
        sweeps.push(SweepTask::spawn("signals", interval, move || {
            if let Err(e) = bus.sweep_expired(Utc::now()) {
                tracing::warn!(error = %e, "signal sweep failed");
            }
        }));
    }

    /// Stop and join all background sweeps.
    pub fn stop_sweeps(&self) {
        for task in self.sweeps.lock().drain(..) {
            task.stop();
        }
    }

    /// Deterministic test-mode sweep: run both sweeps once at `now`.
    pub fn tick_sweeps(&self, now: DateTime<Utc>) -> Result<(), ConvergentError> {
        self.stigmergy.evaporate(now)?;
        self.signals.bus().sweep_expired(now)?;
        Ok(())
    }

    fn record_event(&self, event: CoordinationEvent) {
        if let Err(e) = self.coordination.append_event(&event) {
            tracing::warn!(error = %e, event_type = %event.event_type, "failed to append event");
        }
    }
}

impl<S, C, T> Drop for ConvergentBridge<S, C, T>
where
    S: IntentStore,
    C: CoordinationStore,
    T: StigmergyStore,
{
    fn drop(&mut self) {
        for task in self.sweeps.lock().drain(..) {
            task.stop();
        }
    }
}
