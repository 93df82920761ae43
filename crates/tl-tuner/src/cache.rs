//! Process-local projection of the remote experiment state.
//!
//! The cache holds one immutable [`CacheSnapshot`] behind an `Arc`. A rebuild
//! swaps the whole snapshot; single-job commits clone-on-write, so a reader
//! holding an older snapshot never sees a half-applied change.

use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tl_types::{
    assignments_match, Assignment, ExperimentId, Job, Outcome, ParamType, ParameterSpec, ResultId,
    SettingId,
};

/// Everything the client currently believes about one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub experiment_id: ExperimentId,
    pub parameters: Vec<ParameterSpec>,
    pub outcome_name: String,
    /// Result id → parameter values. Ordered, so value lookups are
    /// deterministic: the lowest matching id wins.
    pub assignments: BTreeMap<ResultId, Assignment>,
    pub outcomes: BTreeMap<ResultId, Outcome>,
    /// Setting name → setting id, for parameters and the outcome.
    pub setting_ids: BTreeMap<String, SettingId>,
}

impl CacheSnapshot {
    pub fn param_kind(&self, name: &str) -> Option<ParamType> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.kind)
    }

    pub fn outcome_of(&self, id: ResultId) -> Outcome {
        self.outcomes.get(&id).copied().unwrap_or_default()
    }

    /// First job (by ascending id) whose values match `assignment`.
    ///
    /// Two active jobs with identical values are indistinguishable here;
    /// the lower id is always returned.
    pub fn find(&self, assignment: &Assignment) -> Option<ResultId> {
        self.assignments
            .iter()
            .find(|(_, candidate)| assignments_match(candidate, assignment))
            .map(|(id, _)| *id)
    }

    pub fn pending(&self) -> Vec<Assignment> {
        self.assignments
            .iter()
            .filter(|(id, _)| self.outcome_of(**id).is_unreported())
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Job with the highest reported value; ties go to the lower id.
    /// Sentinel outcomes rank below every value and are never returned.
    pub fn best(&self) -> Option<(ResultId, f64)> {
        let mut best: Option<(ResultId, Outcome)> = None;
        for id in self.assignments.keys() {
            let outcome = self.outcome_of(*id);
            if best.map_or(true, |(_, current)| outcome.rank(&current) == Ordering::Greater) {
                best = Some((*id, outcome));
            }
        }
        best.and_then(|(id, outcome)| outcome.value().map(|v| (id, v)))
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.assignments
            .iter()
            .map(|(id, a)| Job::new(*id, a.clone(), self.outcome_of(*id)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub rebuilds: u64,
    pub commits: u64,
    pub removals: u64,
}

/// Swappable cache of the current [`CacheSnapshot`].
#[derive(Debug, Default)]
pub struct LocalCache {
    current: RwLock<Arc<CacheSnapshot>>,
    stats: RwLock<CacheStats>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replace the whole snapshot at once.
    pub(crate) fn rebuild(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Arc::clone(&snapshot);
        self.stats.write().rebuilds += 1;
        snapshot
    }

    pub(crate) fn record(&self, id: ResultId, assignment: Assignment, outcome: Outcome) {
        {
            let mut guard = self.current.write();
            let snapshot = Arc::make_mut(&mut guard);
            snapshot.assignments.insert(id, assignment);
            snapshot.outcomes.insert(id, outcome);
        }
        self.stats.write().commits += 1;
    }

    pub(crate) fn record_outcome(&self, id: ResultId, outcome: Outcome) {
        {
            let mut guard = self.current.write();
            Arc::make_mut(&mut guard).outcomes.insert(id, outcome);
        }
        self.stats.write().commits += 1;
    }

    /// Drop a job from both maps. Returns whether it was present.
    pub(crate) fn forget(&self, id: ResultId) -> bool {
        let removed = {
            let mut guard = self.current.write();
            let snapshot = Arc::make_mut(&mut guard);
            let had_values = snapshot.assignments.remove(&id).is_some();
            let had_outcome = snapshot.outcomes.remove(&id).is_some();
            had_values || had_outcome
        };
        if removed {
            self.stats.write().removals += 1;
        }
        removed
    }

    pub(crate) fn clear(&self) {
        *self.current.write() = Arc::new(CacheSnapshot::default());
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
