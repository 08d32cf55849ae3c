//! Flocking: three local checks that shape an agent's prompt.
//!
//! - **Alignment**: style constraints propagated from `pattern_found`
//!   markers on related files.
//! - **Cohesion**: keyword Jaccard between the original task description
//!   and the agent's current working summary; low overlap flags drift.
//! - **Separation**: write-contention from recent `file_modified`
//!   markers by other agents on the planned file set.
//!
//! Each check is a pure function of a read-only marker slice and task
//! metadata; this component never calls back into the bridge and never
//! modifies the agent. Outputs are text constraints composable into a
//! prompt.

use chrono::{DateTime, Duration, Utc};
use regex_lite::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::types::intent::AgentId;
use crate::types::marker::{MarkerType, StigmergyMarker};

/// Words carrying no task signal, excluded from the cohesion check.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "with",
];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("valid regex"))
}

/// Lowercase-alphanumeric keyword set with stopwords and single-letter
/// tokens removed.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Result of the cohesion check.
#[derive(Debug, Clone, PartialEq)]
pub struct CohesionCheck {
    /// Keyword Jaccard between task and summary.
    pub jaccard: f64,
    /// Whether the agent appears to have drifted off its task.
    pub drifting: bool,
}

/// One contended file and who is touching it.
#[derive(Debug, Clone, PartialEq)]
pub struct Contention {
    /// The contended file.
    pub file: String,
    /// Other agents that recently modified it.
    pub agents: Vec<AgentId>,
}

/// The flocking rule checker.
#[derive(Debug, Clone)]
pub struct FlockingCoordinator {
    /// Jaccard below which cohesion flags drift.
    cohesion_threshold: f64,
    /// Recency window for separation, in days.
    separation_window_days: f64,
}

impl FlockingCoordinator {
    /// Create a coordinator.
    pub fn new(cohesion_threshold: f64, separation_window_days: f64) -> Self {
        Self {
            cohesion_threshold,
            separation_window_days,
        }
    }

    /// Alignment: style constraints from `pattern_found` markers,
    /// strongest first.
    pub fn alignment(&self, markers: &[StigmergyMarker]) -> Vec<String> {
        let mut patterns: Vec<&StigmergyMarker> = markers
            .iter()
            .filter(|m| m.marker_type == MarkerType::PatternFound)
            .collect();
        patterns.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.marker_id.cmp(&b.marker_id))
        });
        patterns
            .iter()
            .map(|m| format!("Follow the established pattern in {}: {}", m.target, m.content))
            .collect()
    }

    /// Cohesion: keyword overlap between the task description and the
    /// agent's working summary.
    pub fn cohesion(&self, task_description: &str, working_summary: &str) -> CohesionCheck {
        let task = tokenize(task_description);
        let summary = tokenize(working_summary);
        let jaccard = if task.is_empty() && summary.is_empty() {
            // Nothing to compare; treat as cohesive.
            1.0
        } else {
            let shared = task.intersection(&summary).count();
            let union = task.len() + summary.len() - shared;
            if union == 0 {
                1.0
            } else {
                shared as f64 / union as f64
            }
        };
        CohesionCheck {
            jaccard,
            drifting: jaccard < self.cohesion_threshold,
        }
    }

    /// Separation: write-contention on the planned files from recent
    /// `file_modified` markers by other agents.
    pub fn separation(
        &self,
        markers: &[StigmergyMarker],
        planned_files: &[String],
        agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Vec<Contention> {
        let cutoff = now - Duration::milliseconds((self.separation_window_days * 86_400_000.0) as i64);
        let planned: BTreeSet<&str> = planned_files.iter().map(String::as_str).collect();

        let mut by_file: BTreeMap<&str, BTreeSet<&AgentId>> = BTreeMap::new();
        for marker in markers {
            if marker.marker_type != MarkerType::FileModified {
                continue;
            }
            if &marker.agent_id == agent {
                continue;
            }
            if marker.last_reinforced_at < cutoff {
                continue;
            }
            if planned.contains(marker.target.as_str()) {
                by_file
                    .entry(marker.target.as_str())
                    .or_default()
                    .insert(&marker.agent_id);
            }
        }

        by_file
            .into_iter()
            .map(|(file, agents)| Contention {
                file: file.to_string(),
                agents: agents.into_iter().cloned().collect(),
            })
            .collect()
    }

    /// Compose all three checks into prompt-ready constraint lines.
    pub fn compose(
        &self,
        markers: &[StigmergyMarker],
        task_description: &str,
        working_summary: Option<&str>,
        planned_files: &[String],
        agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut constraints = self.alignment(markers);

        if let Some(summary) = working_summary {
            let check = self.cohesion(task_description, summary);
            if check.drifting {
                constraints.push(format!(
                    "Drift warning: your working summary shares only {:.0}% of its keywords with the original task; re-read the task before continuing",
                    check.jaccard * 100.0
                ));
            }
        }

        for contention in self.separation(markers, planned_files, agent, now) {
            let agents: Vec<&str> = contention.agents.iter().map(|a| a.as_str()).collect();
            constraints.push(format!(
                "Write contention on {}: recently modified by {}; coordinate before editing",
                contention.file,
                agents.join(", ")
            ));
        }

        constraints
    }
}
