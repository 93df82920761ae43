//! Job lifecycle, outcome values and the typed view of job variables.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::values::{Assignment, ParamValue};

/// Remote identifier of a job (a "result" on the server).
pub type ResultId = i64;

/// Remote identifier of the task results and suggestions are filed under.
pub type TaskId = i64;

/// Reported value of the experiment's outcome for one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The job is pending; nothing has been reported yet.
    Unreported,
    /// The caller reported the configuration as infeasible.
    Violation,
    Value(f64),
}

impl Default for Outcome {
    fn default() -> Self {
        Self::Unreported
    }
}

impl Outcome {
    /// Interpret a caller-supplied number: finite values are kept, anything
    /// else (NaN or an infinity) marks a constraint violation.
    pub fn reported(value: f64) -> Self {
        if value.is_finite() {
            Self::Value(value)
        } else {
            Self::Violation
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unreported(&self) -> bool {
        matches!(self, Self::Unreported)
    }

    /// Total order used to rank jobs: `Unreported < Violation < Value(_)`,
    /// values compared numerically.
    pub fn rank(&self, other: &Outcome) -> Ordering {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            _ => self.tier().cmp(&other.tier()),
        }
    }

    fn tier(&self) -> u8 {
        match self {
            Self::Unreported => 0,
            Self::Violation => 1,
            Self::Value(_) => 2,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreported => f.write_str("unreported"),
            Self::Violation => f.write_str("violation"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// One variable of a job, resolved once at the network boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    Param { name: String, value: ParamValue },
    Outcome(Outcome),
}

/// Split decoded variables into the parameter assignment and the outcome.
/// A missing outcome variable reads as [`Outcome::Unreported`].
pub fn split_variables(variables: impl IntoIterator<Item = Variable>) -> (Assignment, Outcome) {
    let mut assignment = Assignment::new();
    let mut outcome = Outcome::Unreported;
    for variable in variables {
        match variable {
            Variable::Param { name, value } => {
                assignment.insert(name, value);
            }
            Variable::Outcome(o) => outcome = o,
        }
    }
    (assignment, outcome)
}

/// Lifecycle state of a tracked job. Cancelled jobs are deleted remotely
/// and dropped from the cache, so they have no state of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Created remotely; the optimizer has not filled in values yet.
    SuggestedUnfilled,
    /// Values known, no outcome reported.
    Pending,
    Completed,
}

impl JobState {
    /// State implied by what the store currently reports for a job.
    pub fn infer(has_values: bool, outcome: &Outcome) -> Self {
        match (has_values, outcome) {
            (false, _) => Self::SuggestedUnfilled,
            (true, Outcome::Unreported) => Self::Pending,
            (true, _) => Self::Completed,
        }
    }
}

/// A single job: one parameter assignment plus its (possibly missing) outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: ResultId,
    pub assignment: Assignment,
    pub outcome: Outcome,
    pub state: JobState,
}

impl Job {
    pub fn new(id: ResultId, assignment: Assignment, outcome: Outcome) -> Self {
        let state = JobState::infer(!assignment.is_empty(), &outcome);
        Self {
            id,
            assignment,
            outcome,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_values_map_non_finite_to_violation() {
        assert_eq!(Outcome::reported(1.5), Outcome::Value(1.5));
        assert_eq!(Outcome::reported(f64::NEG_INFINITY), Outcome::Violation);
        assert_eq!(Outcome::reported(f64::INFINITY), Outcome::Violation);
        assert_eq!(Outcome::reported(f64::NAN), Outcome::Violation);
    }

    #[test]
    fn test_sentinels_rank_below_values() {
        let low = Outcome::Value(-1e300);
        assert_eq!(Outcome::Violation.rank(&low), Ordering::Less);
        assert_eq!(Outcome::Unreported.rank(&Outcome::Violation), Ordering::Less);
        assert_eq!(Outcome::Value(12.0).rank(&Outcome::Value(6.7)), Ordering::Greater);
    }

    #[test]
    fn test_split_strips_outcome() {
        let (assignment, outcome) = split_variables(vec![
            Variable::Param {
                name: "Lambda".into(),
                value: ParamValue::Float(0.2),
            },
            Variable::Outcome(Outcome::Value(4.0)),
            Variable::Param {
                name: "Alpha".into(),
                value: ParamValue::Float(0.9),
            },
        ]);
        assert_eq!(assignment.len(), 2);
        assert!(!assignment.contains_key("Negative deviance"));
        assert_eq!(outcome, Outcome::Value(4.0));
    }

    #[test]
    fn test_job_state_follows_store_contents() {
        let mut assignment = Assignment::new();
        assignment.insert("x".into(), ParamValue::Float(0.5));

        let unfilled = Job::new(1, Assignment::new(), Outcome::Unreported);
        assert_eq!(unfilled.state, JobState::SuggestedUnfilled);

        let pending = Job::new(2, assignment.clone(), Outcome::Unreported);
        assert_eq!(pending.state, JobState::Pending);

        let failed = Job::new(3, assignment.clone(), Outcome::Violation);
        assert_eq!(failed.state, JobState::Completed);

        let done = Job::new(4, assignment, Outcome::Value(0.8));
        assert_eq!(done.state, JobState::Completed);
    }
}
