//! Stigmergy: decaying, reinforceable markers agents leave for each
//! other.
//!
//! Markers decay as `strength · e^(-κ · age_days)` measured from the
//! last reinforcement; sweeps compose, so two sweeps decay exactly as
//! much as one covering the same span. Markers strictly below the
//! minimum-strength floor are purged; a marker exactly at the floor
//! survives.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::ConvergentError;
use crate::store::StigmergyStore;
use crate::types::intent::AgentId;
use crate::types::marker::{MarkerId, MarkerType, StigmergyMarker};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Counts from one evaporation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Markers whose strength was recomputed.
    pub decayed: usize,
    /// Markers purged (below the floor or past hard expiry).
    pub purged: usize,
}

/// The marker field over a store.
pub struct StigmergyField<T: StigmergyStore> {
    store: Arc<T>,
    /// Kappa, per day.
    evaporation_rate: f64,
    /// Purge floor.
    min_strength: f64,
}

impl<T: StigmergyStore> Clone for StigmergyField<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            evaporation_rate: self.evaporation_rate,
            min_strength: self.min_strength,
        }
    }
}

impl<T: StigmergyStore> StigmergyField<T> {
    /// Create a field.
    pub fn new(store: Arc<T>, evaporation_rate: f64, min_strength: f64) -> Self {
        Self {
            store,
            evaporation_rate: evaporation_rate.max(0.0),
            min_strength: min_strength.max(0.0),
        }
    }

    /// Deposit a marker.
    pub fn deposit(
        &self,
        agent: AgentId,
        marker_type: MarkerType,
        target: impl Into<String>,
        content: impl Into<String>,
        strength: f64,
        now: DateTime<Utc>,
    ) -> Result<MarkerId, ConvergentError> {
        let marker = StigmergyMarker::new(agent, marker_type, target, content, strength, now);
        let id = marker.marker_id.clone();
        self.store.put_marker(&marker)?;
        tracing::debug!(
            marker_id = %id,
            marker_type = %marker.marker_type,
            target = %marker.target,
            "marker deposited"
        );
        Ok(id)
    }

    /// Fetch a marker.
    pub fn get(&self, id: &MarkerId) -> Result<Option<StigmergyMarker>, ConvergentError> {
        self.store.get_marker(id)
    }

    /// Add `delta` to a marker's strength. A zero delta is a no-op.
    ///
    /// The pending decay up to `now` is applied first, then the delta,
    /// and the decay anchor moves to `now`.
    pub fn reinforce(
        &self,
        id: &MarkerId,
        delta: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ConvergentError> {
        if delta == 0.0 {
            return Ok(());
        }
        if delta < 0.0 {
            return Err(ConvergentError::validation(
                "reinforcement delta must be >= 0",
            ));
        }
        let mut marker = self.store.get_marker(id)?.ok_or_else(|| {
            ConvergentError::validation(format!("cannot reinforce unknown marker {id}"))
        })?;
        marker.strength = self.decayed_strength(&marker, now) + delta;
        marker.last_reinforced_at = now;
        self.store.update_marker(&marker)
    }

    /// A marker's strength as of `now`, without writing anything.
    pub fn decayed_strength(&self, marker: &StigmergyMarker, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - marker.last_reinforced_at).num_milliseconds() as f64
            / 1000.0
            / SECONDS_PER_DAY)
            .max(0.0);
        marker.strength * (-self.evaporation_rate * age_days).exp()
    }

    /// Time-based sweep: recompute every marker's strength and purge
    /// those strictly below the floor or past their hard expiry.
    pub fn evaporate(&self, now: DateTime<Utc>) -> Result<SweepStats, ConvergentError> {
        let mut stats = SweepStats::default();
        for marker in self.store.all_markers()? {
            let strength = self.decayed_strength(&marker, now);
            if strength < self.min_strength || marker.is_expired(now) {
                self.store.remove_marker(&marker.marker_id)?;
                stats.purged += 1;
                continue;
            }
            let mut updated = marker;
            updated.strength = strength;
            updated.last_reinforced_at = now;
            self.store.update_marker(&updated)?;
            stats.decayed += 1;
        }
        if stats.purged > 0 {
            tracing::debug!(purged = stats.purged, decayed = stats.decayed, "markers evaporated");
        }
        Ok(stats)
    }

    /// Every marker currently in the store, raw (no decay applied).
    pub fn all_markers(&self) -> Result<Vec<StigmergyMarker>, ConvergentError> {
        self.store.all_markers()
    }

    /// Surviving markers whose target intersects any of `paths`, at
    /// their decayed strength, strongest first.
    pub fn markers_for(
        &self,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<StigmergyMarker>, ConvergentError> {
        let mut matching = Vec::new();
        for marker in self.store.all_markers()? {
            if marker.is_expired(now) {
                continue;
            }
            if !paths.iter().any(|p| targets_intersect(&marker.target, p)) {
                continue;
            }
            let strength = self.decayed_strength(&marker, now);
            if strength < self.min_strength {
                continue;
            }
            let mut current = marker;
            current.strength = strength;
            matching.push(current);
        }
        matching.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.marker_id.cmp(&b.marker_id))
        });
        Ok(matching)
    }

    /// Assemble the surviving markers intersecting `paths` into a text
    /// blob for an agent's upcoming task.
    pub fn context_for(
        &self,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, ConvergentError> {
        let markers = self.markers_for(paths, now)?;
        if markers.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::from("Traces left by other agents on these files:\n");
        for marker in &markers {
            out.push_str(&format!(
                "- [{:.2}] {} on {} ({}): {}\n",
                marker.strength, marker.marker_type, marker.target, marker.agent_id, marker.content
            ));
        }
        Ok(out)
    }
}

/// Whether a marker target and a query path refer to intersecting file
/// ground: equal, or one is a directory prefix of the other.
fn targets_intersect(target: &str, path: &str) -> bool {
    if target == path {
        return true;
    }
    let target_dir = target.trim_end_matches('/');
    let path_dir = path.trim_end_matches('/');
    path_dir.starts_with(&format!("{target_dir}/")) || target_dir.starts_with(&format!("{path_dir}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStigmergyStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn field() -> StigmergyField<InMemoryStigmergyStore> {
        StigmergyField::new(Arc::new(InMemoryStigmergyStore::new()), 0.1, 0.05)
    }

    #[test]
    fn test_decay_matches_formula() {
        let f = field();
        let id = f
            .deposit(AgentId::new("a"), MarkerType::PatternFound, "src/lib.rs", "builder pattern", 1.0, t0())
            .unwrap();

        f.evaporate(t0() + Duration::days(10)).unwrap();
        let marker = f.get(&id).unwrap().unwrap();
        // 1.0 * e^-1 ~= 0.368
        assert!((marker.strength - (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_sweeps_compose() {
        let f1 = field();
        let f2 = field();
        let deposit = |f: &StigmergyField<InMemoryStigmergyStore>| {
            f.deposit(AgentId::new("a"), MarkerType::KnownIssue, "x", "", 1.0, t0())
                .unwrap()
        };
        let id1 = deposit(&f1);
        let id2 = deposit(&f2);

        // One sweep at day 10 vs sweeps at days 4 and 10.
        f1.evaporate(t0() + Duration::days(10)).unwrap();
        f2.evaporate(t0() + Duration::days(4)).unwrap();
        f2.evaporate(t0() + Duration::days(10)).unwrap();

        let s1 = f1.get(&id1).unwrap().unwrap().strength;
        let s2 = f2.get(&id2).unwrap().unwrap().strength;
        assert!((s1 - s2).abs() < 1e-9);
    }

    #[test]
    fn test_purge_below_floor_only() {
        let f = field();
        // After 35 days at kappa 0.1: 1.0 * e^-3.5 ~= 0.030 < 0.05.
        let purged_id = f
            .deposit(AgentId::new("a"), MarkerType::KnownIssue, "a.rs", "", 1.0, t0())
            .unwrap();
        // Exactly at the floor: stays.
        let floor_id = f
            .deposit(AgentId::new("a"), MarkerType::KnownIssue, "b.rs", "", 0.05, t0())
            .unwrap();

        let stats = f.evaporate(t0() + Duration::days(35)).unwrap();
        assert_eq!(stats.purged, 1);
        assert!(f.get(&purged_id).unwrap().is_none());

        // The floor marker was deposited at exactly 0.05 and decays below
        // it over 35 days, so re-run the boundary case at zero elapsed.
        let f = field();
        let floor_id2 = f
            .deposit(AgentId::new("a"), MarkerType::KnownIssue, "b.rs", "", 0.05, t0())
            .unwrap();
        f.evaporate(t0()).unwrap();
        assert!(f.get(&floor_id2).unwrap().is_some());
        let _ = floor_id;
    }

    #[test]
    fn test_reinforce_zero_is_noop() {
        let f = field();
        let id = f
            .deposit(AgentId::new("a"), MarkerType::Dependency, "x", "", 0.7, t0())
            .unwrap();
        f.reinforce(&id, 0.0, t0() + Duration::days(5)).unwrap();
        let marker = f.get(&id).unwrap().unwrap();
        assert_eq!(marker.strength, 0.7);
        assert_eq!(marker.last_reinforced_at, t0());
    }

    #[test]
    fn test_reinforce_resets_decay_anchor() {
        let f = field();
        let id = f
            .deposit(AgentId::new("a"), MarkerType::Dependency, "x", "", 1.0, t0())
            .unwrap();
        f.reinforce(&id, 0.5, t0() + Duration::days(10)).unwrap();
        let marker = f.get(&id).unwrap().unwrap();
        assert!((marker.strength - ((-1.0_f64).exp() + 0.5)).abs() < 1e-9);
        assert_eq!(marker.last_reinforced_at, t0() + Duration::days(10));
    }

    #[test]
    fn test_context_assembly_strongest_first() {
        let f = field();
        f.deposit(AgentId::new("a"), MarkerType::KnownIssue, "src/auth.rs", "session bug", 0.3, t0())
            .unwrap();
        f.deposit(AgentId::new("b"), MarkerType::PatternFound, "src/auth.rs", "use the token builder", 0.9, t0())
            .unwrap();
        f.deposit(AgentId::new("c"), MarkerType::KnownIssue, "src/other.rs", "unrelated", 0.9, t0())
            .unwrap();

        let context = f.context_for(&["src/auth.rs".to_string()], t0()).unwrap();
        let pattern_pos = context.find("token builder").unwrap();
        let issue_pos = context.find("session bug").unwrap();
        assert!(pattern_pos < issue_pos, "stronger marker listed first");
        assert!(!context.contains("unrelated"));
    }

    #[test]
    fn test_directory_targets_intersect_files() {
        assert!(targets_intersect("src/", "src/auth.rs"));
        assert!(targets_intersect("src/auth.rs", "src/"));
        assert!(!targets_intersect("src/auth.rs", "src/authx.rs"));
        assert!(!targets_intersect("tests/", "src/auth.rs"));
    }
}
