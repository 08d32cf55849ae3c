//! Health grading over quantified issue counts.
//!
//! The engine exposes the data an operator-facing health command
//! renders: a letter grade A-F derived from weighted issue counts
//! across subsystems.

use serde::Serialize;

use crate::canonical::canonical_hash_hex;

/// One quantified issue bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    /// Subsystem the issues belong to, e.g. `"graph"` or `"triumvirate"`.
    pub subsystem: String,
    /// What the issues are.
    pub detail: String,
    /// How many.
    pub count: usize,
    /// Score penalty per issue.
    pub penalty: u32,
}

impl HealthIssue {
    fn total_penalty(&self) -> u32 {
        self.penalty.saturating_mul(self.count as u32)
    }
}

/// Raw counts the report is computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    /// Intents in the graph.
    pub intent_count: u64,
    /// Cycles in the provides/requires graph.
    pub dependency_cycles: usize,
    /// Conflicts the governor could not resolve without escalation.
    pub unresolved_conflicts: usize,
    /// Consensus requests that ended in deadlock.
    pub deadlocked_decisions: usize,
    /// Intents whose stability has decayed below the speculative floor.
    pub stale_intents: usize,
    /// Markers past expiry that a sweep has not yet purged.
    pub unswept_markers: usize,
}

/// The health report for one engine instance.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Letter grade A-F.
    pub grade: char,
    /// Numeric score in [0, 100].
    pub score: u32,
    /// Non-empty issue buckets, largest penalty first.
    pub issues: Vec<HealthIssue>,
    /// Intents in the graph when the report was computed.
    pub intent_count: u64,
    /// Content hash of the issue list.
    pub report_hash: String,
}

impl HealthReport {
    /// Compute a report from raw counts.
    pub fn compute(inputs: HealthInputs) -> Self {
        let buckets = [
            ("graph", "dependency cycles in provides/requires edges", inputs.dependency_cycles, 15u32),
            ("governor", "conflicts unresolved without escalation", inputs.unresolved_conflicts, 10),
            ("triumvirate", "deadlocked consensus decisions", inputs.deadlocked_decisions, 8),
            ("stability", "intents decayed below the speculative floor", inputs.stale_intents, 2),
            ("stigmergy", "expired markers awaiting sweep", inputs.unswept_markers, 1),
        ];

        let mut issues: Vec<HealthIssue> = buckets
            .into_iter()
            .filter(|(_, _, count, _)| *count > 0)
            .map(|(subsystem, detail, count, penalty)| HealthIssue {
                subsystem: subsystem.to_string(),
                detail: detail.to_string(),
                count,
                penalty,
            })
            .collect();
        issues.sort_by(|a, b| {
            b.total_penalty()
                .cmp(&a.total_penalty())
                .then_with(|| a.subsystem.cmp(&b.subsystem))
        });

        let penalty: u32 = issues.iter().map(HealthIssue::total_penalty).sum();
        let score = 100u32.saturating_sub(penalty);
        let grade = match score {
            90..=100 => 'A',
            80..=89 => 'B',
            70..=79 => 'C',
            60..=69 => 'D',
            _ => 'F',
        };

        let report_hash = canonical_hash_hex(&issues);
        Self {
            grade,
            score,
            issues,
            intent_count: inputs.intent_count,
            report_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_engine_grades_a() {
        let report = HealthReport::compute(HealthInputs {
            intent_count: 12,
            ..Default::default()
        });
        assert_eq!(report.grade, 'A');
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_cycles_dominate_the_grade() {
        let report = HealthReport::compute(HealthInputs {
            intent_count: 12,
            dependency_cycles: 3,
            ..Default::default()
        });
        assert_eq!(report.score, 55);
        assert_eq!(report.grade, 'F');
        assert_eq!(report.issues[0].subsystem, "graph");
    }

    #[test]
    fn test_minor_issues_degrade_gently() {
        let report = HealthReport::compute(HealthInputs {
            intent_count: 12,
            stale_intents: 4,
            unswept_markers: 3,
            ..Default::default()
        });
        assert_eq!(report.score, 89);
        assert_eq!(report.grade, 'B');
    }

    #[test]
    fn test_issue_ordering_by_total_penalty() {
        let report = HealthReport::compute(HealthInputs {
            intent_count: 1,
            unresolved_conflicts: 1, // 10
            deadlocked_decisions: 2, // 16
            ..Default::default()
        });
        assert_eq!(report.issues[0].subsystem, "triumvirate");
        assert_eq!(report.issues[1].subsystem, "governor");
    }
}
