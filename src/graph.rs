//! The intent graph: ordered, queryable, append-only store of intents
//! plus overlap and conflict queries over the interface index.
//!
//! ## Contract
//!
//! - `publish` is idempotent on `intent_id`: re-publish with identical
//!   content is a no-op; re-publish with differing content fails with
//!   `DuplicateIntent`.
//! - All reads observe a consistent snapshot of the log.
//! - Intent publications are totally ordered by arrival.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ConvergentError;
use crate::matching::Matcher;
use crate::stability::StabilityScorer;
use crate::store::{AppendOutcome, IntentStore};
use crate::types::conflict::{Conflict, ConflictKind, Overlap};
use crate::types::intent::{AgentId, Evidence, Intent, IntentId, Severity};

/// Pure conflict classification over pairs of intents.
///
/// Classification is a function of the two intents and the scorer state
/// at `now`; it touches no store.
pub struct ConflictClassifier {
    matcher: Matcher,
    scorer: StabilityScorer,
    /// Stability gap at or below which a same-ground claim is ambiguous.
    epsilon: f64,
}

impl ConflictClassifier {
    /// Create a classifier.
    pub fn new(matcher: Matcher, scorer: StabilityScorer, epsilon: f64) -> Self {
        Self {
            matcher,
            scorer,
            epsilon,
        }
    }

    /// The matcher in use.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// The stability scorer in use.
    pub fn scorer(&self) -> &StabilityScorer {
        &self.scorer
    }

    /// Classify the conflict between an earlier and a later intent.
    ///
    /// Precedence: hard-constraint clash, then signature disagreement,
    /// then semantic contradiction, then the stability gap (ambiguous at
    /// or under epsilon, soft above it). Non-overlapping pairs are
    /// `none`.
    pub fn classify(&self, earlier: &Intent, later: &Intent, now: DateTime<Utc>) -> Conflict {
        let left_stability = self.scorer.intent_score_at(earlier, now);
        let right_stability = self.scorer.intent_score_at(later, now);

        let conflict = |kind: ConflictKind, interface: Option<String>, detail: String| Conflict {
            left: earlier.intent_id.clone(),
            right: later.intent_id.clone(),
            kind,
            interface,
            left_stability,
            right_stability,
            detail,
        };

        if let Some(detail) = hard_constraint_clash(earlier, later) {
            return conflict(ConflictKind::HardConstraint, None, detail);
        }

        let Some((interface, pair)) = self
            .matcher
            .best_match(&earlier.interfaces, &later.interfaces)
        else {
            return conflict(
                ConflictKind::None,
                None,
                "no overlapping interface ground".to_string(),
            );
        };

        if pair.signatures_disagree {
            return conflict(
                ConflictKind::Structural,
                Some(interface.clone()),
                format!("signatures disagree on `{interface}`"),
            );
        }

        if pair.semantically_unrelated {
            return conflict(
                ConflictKind::Semantic,
                Some(interface.clone()),
                format!("semantic matcher rules `{interface}` claims unrelated despite structural overlap"),
            );
        }

        let gap = (left_stability - right_stability).abs();
        if gap <= self.epsilon {
            conflict(
                ConflictKind::Ambiguous,
                Some(interface.clone()),
                format!(
                    "both claim `{interface}` with stability gap {gap:.3} <= epsilon {:.3}",
                    self.epsilon
                ),
            )
        } else {
            let yielding = if left_stability < right_stability {
                &earlier.intent_id
            } else {
                &later.intent_id
            };
            conflict(
                ConflictKind::Soft,
                Some(interface.clone()),
                format!("lower-stability side {yielding} yields on `{interface}`"),
            )
        }
    }
}

/// Detect a clash between hard constraints of two intents from distinct
/// agents: same subject, differing predicate, at least one side hard.
fn hard_constraint_clash(a: &Intent, b: &Intent) -> Option<String> {
    if a.agent_id == b.agent_id {
        return None;
    }
    for ca in &a.constraints {
        for cb in &b.constraints {
            let one_hard = ca.severity == Severity::Hard || cb.severity == Severity::Hard;
            if one_hard && ca.subject == cb.subject && ca.predicate != cb.predicate {
                return Some(format!(
                    "constraint clash on `{}`: `{}` vs `{}`",
                    ca.subject, ca.predicate, cb.predicate
                ));
            }
        }
    }
    None
}

/// Execution plan from Kahn ordering over provides/requires edges.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Intents in dependency-safe execution order.
    pub order: Vec<IntentId>,
    /// Intents stuck inside dependency cycles, excluded from the order.
    pub blocked: Vec<IntentId>,
}

/// The append-only intent graph.
pub struct IntentGraph<S: IntentStore> {
    store: Arc<S>,
    classifier: Arc<ConflictClassifier>,
}

impl<S: IntentStore> IntentGraph<S> {
    /// Create a graph over a store.
    pub fn new(store: Arc<S>, classifier: Arc<ConflictClassifier>) -> Self {
        Self { store, classifier }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The classifier in use.
    pub fn classifier(&self) -> &Arc<ConflictClassifier> {
        &self.classifier
    }

    /// Publish an intent into the graph.
    pub fn publish(&self, intent: &Intent) -> Result<AppendOutcome, ConvergentError> {
        intent.validate()?;
        let outcome = self.store.append(intent)?;
        match outcome {
            AppendOutcome::Appended(seq) => {
                tracing::info!(
                    intent_id = %intent.intent_id,
                    agent_id = %intent.agent_id,
                    sequence = seq,
                    "intent published"
                );
            }
            AppendOutcome::Unchanged(seq) => {
                tracing::debug!(
                    intent_id = %intent.intent_id,
                    sequence = seq,
                    "identical re-publish ignored"
                );
            }
        }
        Ok(outcome)
    }

    /// Fetch an intent by id.
    pub fn get(&self, id: &IntentId) -> Result<Option<Intent>, ConvergentError> {
        self.store.get(id)
    }

    /// All intents published by an agent, in arrival order.
    pub fn list_by_agent(&self, agent: &AgentId) -> Result<Vec<Intent>, ConvergentError> {
        self.store.list_by_agent(agent)
    }

    /// Every intent in arrival order.
    pub fn all_ordered(&self) -> Result<Vec<Intent>, ConvergentError> {
        self.store.all_ordered()
    }

    /// Append evidence to a published intent.
    pub fn add_evidence(&self, id: &IntentId, evidence: &Evidence) -> Result<(), ConvergentError> {
        if evidence.weight < 0.0 {
            return Err(ConvergentError::validation("evidence weight must be >= 0"));
        }
        self.store.add_evidence(id, evidence)
    }

    /// Intents whose interface ground overlaps the given intent's,
    /// sorted by score descending; earlier intents win ties.
    pub fn find_overlapping(&self, intent: &Intent) -> Result<Vec<Overlap>, ConvergentError> {
        let matcher = self.classifier.matcher();
        let mut overlaps = Vec::new();

        for (position, other) in self.store.all_ordered()?.into_iter().enumerate() {
            if other.intent_id == intent.intent_id {
                continue;
            }
            if let Some((interface, pair)) = matcher.best_match(&other.interfaces, &intent.interfaces)
            {
                overlaps.push((
                    position,
                    Overlap {
                        intent_id: intent.intent_id.clone(),
                        other_id: other.intent_id.clone(),
                        interface,
                        score: pair.score,
                        reasons: pair.reasons,
                    },
                ));
            }
        }

        // Highest score first; earlier publication breaks ties.
        overlaps.sort_by(|(pa, a), (pb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pa.cmp(pb))
        });
        Ok(overlaps.into_iter().map(|(_, o)| o).collect())
    }

    /// Classified conflicts between the given intent and stored intents
    /// of other agents, excluding compatible (`none`) pairs.
    pub fn find_conflicting(
        &self,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Conflict>, ConvergentError> {
        let mut conflicts = Vec::new();
        for other in self.store.all_ordered()? {
            if other.intent_id == intent.intent_id || other.agent_id == intent.agent_id {
                continue;
            }
            let conflict = self.classifier.classify(&other, intent, now);
            if conflict.kind != ConflictKind::None {
                conflicts.push(conflict);
            }
        }
        Ok(conflicts)
    }

    /// Denormalized interface index: every (intent, interface) pair in
    /// log order.
    pub fn interface_index(
        &self,
    ) -> Result<Vec<(IntentId, crate::types::intent::InterfaceSpec)>, ConvergentError> {
        Ok(self
            .store
            .all_ordered()?
            .into_iter()
            .flat_map(|i| {
                let id = i.intent_id.clone();
                i.interfaces
                    .into_iter()
                    .map(move |spec| (id.clone(), spec))
            })
            .collect())
    }

    /// Cycles in the provides/requires dependency graph (DFS).
    ///
    /// Each cycle is reported once as the list of intent ids along it.
    pub fn dependency_cycles(&self) -> Result<Vec<Vec<IntentId>>, ConvergentError> {
        let (nodes, edges) = self.dependency_edges()?;

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        fn visit(
            node: usize,
            edges: &[Vec<usize>],
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
            cycles: &mut Vec<Vec<usize>>,
        ) {
            marks[node] = Mark::Gray;
            stack.push(node);
            for &next in &edges[node] {
                match marks[next] {
                    Mark::White => visit(next, edges, marks, stack, cycles),
                    Mark::Gray => {
                        // Back edge; the cycle is the stack tail from `next`.
                        if let Some(start) = stack.iter().position(|&n| n == next) {
                            cycles.push(stack[start..].to_vec());
                        }
                    }
                    Mark::Black => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Black;
        }

        let mut marks = vec![Mark::White; nodes.len()];
        let mut stack = Vec::new();
        let mut cycles = Vec::new();
        for node in 0..nodes.len() {
            if marks[node] == Mark::White {
                visit(node, &edges, &mut marks, &mut stack, &mut cycles);
            }
        }

        Ok(cycles
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|n| nodes[n].clone()).collect())
            .collect())
    }

    /// Dependency-safe execution order (Kahn). Intents inside cycles are
    /// reported as blocked instead of ordered.
    pub fn execution_order(&self) -> Result<ExecutionPlan, ConvergentError> {
        let (nodes, edges) = self.dependency_edges()?;

        let mut in_degree = vec![0usize; nodes.len()];
        for targets in &edges {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        // Ready nodes kept in arrival order for a deterministic plan.
        let mut ready: Vec<usize> = (0..nodes.len()).filter(|&n| in_degree[n] == 0).collect();
        let mut order = Vec::new();

        while !ready.is_empty() {
            let node = ready.remove(0);
            order.push(node);
            for &next in &edges[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    let insert_at = ready.partition_point(|&r| r < next);
                    ready.insert(insert_at, next);
                }
            }
        }

        let ordered: BTreeSet<usize> = order.iter().copied().collect();
        let blocked = (0..nodes.len())
            .filter(|n| !ordered.contains(n))
            .map(|n| nodes[n].clone())
            .collect();

        Ok(ExecutionPlan {
            order: order.into_iter().map(|n| nodes[n].clone()).collect(),
            blocked,
        })
    }

    /// Build provider -> requirer adjacency from provides/requires names.
    fn dependency_edges(&self) -> Result<(Vec<IntentId>, Vec<Vec<usize>>), ConvergentError> {
        let intents = self.store.all_ordered()?;
        let nodes: Vec<IntentId> = intents.iter().map(|i| i.intent_id.clone()).collect();

        let mut providers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, intent) in intents.iter().enumerate() {
            for name in &intent.provides {
                providers.entry(name.as_str()).or_default().push(idx);
            }
        }

        let mut edges = vec![Vec::new(); nodes.len()];
        for (idx, intent) in intents.iter().enumerate() {
            for name in &intent.requires {
                for &provider in providers.get(name.as_str()).into_iter().flatten() {
                    if provider != idx {
                        edges[provider].push(idx);
                    }
                }
            }
        }
        Ok((nodes, edges))
    }
}
