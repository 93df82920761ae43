//! Job lifecycle over one remote experiment.
//!
//! [`Tuner`] is generic over the [`RemoteStore`] so the same code runs
//! against the hosted service or the in-process store. Every public
//! operation takes the operation lock, runs a full sync pass, applies its
//! transition and commits it remotely before returning.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tl_remote::{
    encode_outcome, encode_variable, RemoteStore, ResultSubmission, WireSetting, WireVariable,
};
use tl_types::{
    Assignment, ExperimentId, ExperimentSpec, Outcome, ResultId, TlError, TlResult, Variable,
};

use crate::cache::CacheSnapshot;
use crate::poll::{await_suggestion, PollPolicy};
use crate::sync::{decode_result, SyncOptions, Synchronizer};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerOptions {
    pub poll: PollPolicy,
    pub sync: SyncOptions,
}

#[derive(Debug)]
struct TunerState {
    sync: Synchronizer,
    /// Suggestions handed out by this client and not yet reported.
    pending_ids: Vec<ResultId>,
}

/// Client-side controller for one experiment.
pub struct Tuner<S: RemoteStore> {
    store: S,
    options: TunerOptions,
    state: Mutex<TunerState>,
}

impl<S: RemoteStore> Tuner<S> {
    fn assemble(store: S, sync: Synchronizer, options: TunerOptions) -> Self {
        Self {
            store,
            options,
            state: Mutex::new(TunerState {
                sync,
                pending_ids: Vec::new(),
            }),
        }
    }

    /// Validate `spec` and create it remotely. Nothing is sent if the
    /// schema is invalid.
    pub async fn create(store: S, spec: ExperimentSpec, options: TunerOptions) -> TlResult<Self> {
        spec.validate()?;

        let settings: Vec<WireSetting> = spec
            .parameters
            .iter()
            .map(WireSetting::from_parameter)
            .chain(std::iter::once(WireSetting::from_outcome(&spec.outcome)))
            .collect();
        let id = store
            .create_experiment(&spec.name, &spec.description, &settings)
            .await?;
        info!(experiment_id = id, name = %spec.name, store = store.name(), "created experiment");

        let sync = Synchronizer::resolved(spec.name, id, options.sync.clone());
        Ok(Self::assemble(store, sync, options))
    }

    /// Resume an existing experiment by name.
    pub async fn open(store: S, name: impl Into<String>, options: TunerOptions) -> TlResult<Self> {
        let mut sync = Synchronizer::new(name, options.sync.clone());
        sync.resolve_and_sync(&store).await?;
        Ok(Self::assemble(store, sync, options))
    }

    /// Resume the experiment named by `spec`, creating it if the store has
    /// no experiment of that name.
    pub async fn open_or_create(
        store: S,
        spec: ExperimentSpec,
        options: TunerOptions,
    ) -> TlResult<Self> {
        spec.validate()?;
        let mut sync = Synchronizer::new(spec.name.clone(), options.sync.clone());
        match sync.resolve_and_sync(&store).await {
            Ok(_) => Ok(Self::assemble(store, sync, options)),
            Err(e) if e.is_not_found() => Self::create(store, spec, options).await,
            Err(e) => Err(e),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &TunerOptions {
        &self.options
    }

    pub async fn experiment_id(&self) -> Option<ExperimentId> {
        self.state.lock().await.sync.experiment_id()
    }

    pub async fn pending_ids(&self) -> Vec<ResultId> {
        self.state.lock().await.pending_ids.clone()
    }

    /// Ask the optimizer for a new assignment and wait until it is filled.
    pub async fn suggest(&self) -> TlResult<Assignment> {
        self.suggest_with(&CancellationToken::new()).await
    }

    pub async fn suggest_with(&self, cancel: &CancellationToken) -> TlResult<Assignment> {
        let mut state = self.state.lock().await;
        let snapshot = state.sync.resolve_and_sync(&self.store).await?;

        let created = self.store.create_suggestion(snapshot.experiment_id).await?;
        state.pending_ids.push(created.id);

        let job = if created.is_filled() {
            created
        } else {
            await_suggestion(&self.store, created.id, &self.options.poll, cancel).await?
        };

        let (assignment, _) = decode_result(&snapshot, &job)?;
        state.sync.commit_job(job.id, assignment.clone(), Outcome::Unreported);
        info!(result_id = job.id, experiment_id = snapshot.experiment_id, "suggested job");
        Ok(assignment)
    }

    /// Report `outcome` for the job with these values. Non-finite outcomes
    /// are stored as constraint violations.
    pub async fn update(&self, values: &Assignment, outcome: f64) -> TlResult<ResultId> {
        self.report(values, Outcome::reported(outcome)).await
    }

    /// Mark the job with these values as infeasible.
    pub async fn update_as_failed(&self, values: &Assignment) -> TlResult<ResultId> {
        self.report(values, Outcome::Violation).await
    }

    /// Record `outcome` against the job matching `values`, creating a
    /// user-proposed job if none matches.
    pub async fn report(&self, values: &Assignment, outcome: Outcome) -> TlResult<ResultId> {
        let mut state = self.state.lock().await;
        let snapshot = state.sync.resolve_and_sync(&self.store).await?;
        let values = known_parameters(&snapshot, values)?;
        let task = snapshot.experiment_id;

        let id = match snapshot.find(&values) {
            Some(id) => {
                let current = self.store.get_job(id).await?;
                let variables = with_outcome(&snapshot, current.variables.clone(), outcome);
                self.store
                    .replace_result(id, &ResultSubmission::replacing(&current, task, variables))
                    .await?;
                state.pending_ids.retain(|pending| *pending != id);
                id
            }
            None => {
                let variables = full_variables(&snapshot, &values, outcome)?;
                let id = self
                    .store
                    .add_result(&ResultSubmission::new(task, variables))
                    .await?;
                state.sync.commit_job(id, values, outcome);
                id
            }
        };

        state.sync.commit_outcome(id, outcome);
        info!(result_id = id, outcome = %outcome, "reported outcome");
        Ok(id)
    }

    /// Delete the jobs matching each of `jobs`. Values that match nothing
    /// are skipped with a warning. Returns the ids actually deleted.
    pub async fn cancel(&self, jobs: &[Assignment]) -> TlResult<Vec<ResultId>> {
        let mut state = self.state.lock().await;
        state.sync.resolve_and_sync(&self.store).await?;

        let mut cancelled = Vec::new();
        for values in jobs {
            let Some(id) = state.sync.snapshot().find(values) else {
                warn!(?values, "cancel: no job with these values");
                continue;
            };
            self.store.delete_job(id).await?;
            state.sync.forget_job(id);
            state.pending_ids.retain(|pending| *pending != id);
            info!(result_id = id, "cancelled job");
            cancelled.push(id);
        }
        Ok(cancelled)
    }

    /// Assignments still waiting for an outcome.
    pub async fn pending(&self) -> TlResult<Vec<Assignment>> {
        let mut state = self.state.lock().await;
        let snapshot = state.sync.resolve_and_sync(&self.store).await?;
        Ok(snapshot.pending())
    }

    /// Assignment of the job with the highest reported outcome.
    pub async fn best(&self) -> TlResult<Assignment> {
        let mut state = self.state.lock().await;
        let snapshot = state.sync.resolve_and_sync(&self.store).await?;
        let (id, value) = snapshot.best().ok_or(TlError::NoCompletedJobs)?;

        let job = self.store.get_job(id).await?;
        let (assignment, _) = decode_result(&snapshot, &job)?;
        info!(result_id = id, value, "best job");
        Ok(assignment)
    }

    /// Id of the first job (lowest id) matching `values`.
    pub async fn get_id(&self, values: &Assignment) -> TlResult<Option<ResultId>> {
        let mut state = self.state.lock().await;
        let snapshot = state.sync.resolve_and_sync(&self.store).await?;
        Ok(snapshot.find(values))
    }

    /// Freshly synced view of the experiment.
    pub async fn snapshot(&self) -> TlResult<Arc<CacheSnapshot>> {
        let mut state = self.state.lock().await;
        state.sync.resolve_and_sync(&self.store).await
    }

    /// Delete the experiment remotely and forget everything about it.
    pub async fn delete_experiment(&self) -> TlResult<()> {
        let mut state = self.state.lock().await;
        let id = state.sync.resolve(&self.store).await?;
        self.store.delete_experiment(id).await?;
        state.sync.detach();
        state.pending_ids.clear();
        info!(experiment_id = id, name = %state.sync.experiment_name(), "deleted experiment");
        Ok(())
    }
}

/// Keep only parameter entries. An outcome-named key is dropped; any other
/// unknown name is an error.
fn known_parameters(snapshot: &CacheSnapshot, values: &Assignment) -> TlResult<Assignment> {
    let mut kept = Assignment::new();
    for (name, value) in values {
        if *name == snapshot.outcome_name {
            warn!(name = %name, "ignoring outcome value passed among parameters");
            continue;
        }
        if snapshot.param_kind(name).is_none() {
            return Err(TlError::InvalidJob {
                message: format!("unknown parameter '{name}'"),
            });
        }
        kept.insert(name.clone(), value.clone());
    }
    Ok(kept)
}

/// Variable set for a new result: every parameter plus the outcome.
fn full_variables(
    snapshot: &CacheSnapshot,
    values: &Assignment,
    outcome: Outcome,
) -> TlResult<Vec<WireVariable>> {
    let mut variables = Vec::with_capacity(snapshot.parameters.len() + 1);
    for param in &snapshot.parameters {
        let value = values.get(&param.name).ok_or_else(|| TlError::InvalidJob {
            message: format!("missing value for parameter '{}'", param.name),
        })?;
        let variable = Variable::Param {
            name: param.name.clone(),
            value: value.clone(),
        };
        variables.push(encode_variable(
            &variable,
            &snapshot.outcome_name,
            snapshot.setting_ids.get(&param.name).copied(),
        ));
    }
    variables.push(encode_variable(
        &Variable::Outcome(outcome),
        &snapshot.outcome_name,
        snapshot.setting_ids.get(&snapshot.outcome_name).copied(),
    ));
    Ok(variables)
}

/// Overwrite (or append) the outcome variable of an existing job.
fn with_outcome(
    snapshot: &CacheSnapshot,
    mut variables: Vec<WireVariable>,
    outcome: Outcome,
) -> Vec<WireVariable> {
    let mut found = false;
    for variable in variables.iter_mut().filter(|v| v.name == snapshot.outcome_name) {
        variable.value = encode_outcome(outcome);
        found = true;
    }
    if !found {
        variables.push(encode_variable(
            &Variable::Outcome(outcome),
            &snapshot.outcome_name,
            snapshot.setting_ids.get(&snapshot.outcome_name).copied(),
        ));
    }
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tl_remote::{MemoryStore, MemoryStoreConfig, VIOLATION_TOKEN};
    use tl_types::{assignments_match, ParamValue, RemoteError};

    const OUTCOME: &str = "Negative deviance";

    fn glmnet() -> ExperimentSpec {
        ExperimentSpec::new("glmnet", OUTCOME)
            .with_description("elastic net regularization path")
            .add_float("Lambda", 1e-4, 0.75)
            .add_float("Alpha", 1e-4, 1.0)
    }

    fn memory_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(MemoryStoreConfig {
            seed: Some(42),
            ..Default::default()
        }))
    }

    async fn tuner() -> (Tuner<Arc<MemoryStore>>, Arc<MemoryStore>) {
        let store = memory_store();
        let tuner = Tuner::create(Arc::clone(&store), glmnet(), TunerOptions::default())
            .await
            .unwrap();
        (tuner, store)
    }

    fn values(lambda: f64, alpha: f64) -> Assignment {
        let mut a = Assignment::new();
        a.insert("Lambda".into(), ParamValue::Float(lambda));
        a.insert("Alpha".into(), ParamValue::Float(alpha));
        a
    }

    fn number(a: &Assignment, name: &str) -> f64 {
        a.get(name).and_then(ParamValue::as_f64).unwrap()
    }

    fn stored_outcome(store: &MemoryStore, task: ExperimentId, id: ResultId) -> serde_json::Value {
        store
            .results_for(task)
            .into_iter()
            .find(|r| r.id == id)
            .and_then(|r| r.variables.into_iter().find(|v| v.name == OUTCOME))
            .map(|v| v.value)
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_schema_never_reaches_store() {
        let store = memory_store();
        let inverted = glmnet().add_float("Beta", 1.0, 0.5);
        let err = Tuner::create(Arc::clone(&store), inverted, TunerOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TlError::Validation(_)));

        let unbounded = glmnet().add_float("Beta", 0.0, f64::INFINITY);
        let err = Tuner::create(Arc::clone(&store), unbounded, TunerOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TlError::Validation(_)));
        assert_eq!(store.experiment_count(), 0);
    }

    #[tokio::test]
    async fn test_open_and_open_or_create() {
        let store = memory_store();
        let err = Tuner::open(Arc::clone(&store), "glmnet", TunerOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TlError::ExperimentNotFound { ref name } if name == "glmnet"));

        let first = Tuner::open_or_create(Arc::clone(&store), glmnet(), TunerOptions::default())
            .await
            .unwrap();
        let second = Tuner::open_or_create(Arc::clone(&store), glmnet(), TunerOptions::default())
            .await
            .unwrap();
        assert_eq!(first.experiment_id().await, second.experiment_id().await);
        assert_eq!(store.experiment_count(), 1);

        let err = Tuner::create(Arc::clone(&store), glmnet(), TunerOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TlError::Remote(RemoteError::Conflict { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggest_then_get_id() {
        let (tuner, _store) = tuner().await;
        let first = tuner.suggest().await.unwrap();
        let second = tuner.suggest().await.unwrap();

        assert_eq!(first.len(), 2);
        assert!(!first.contains_key(OUTCOME));
        assert!(!assignments_match(&first, &second));

        let id = tuner.get_id(&first).await.unwrap();
        assert!(id.is_some());
        assert_eq!(tuner.pending_ids().await.len(), 2);
        assert_eq!(tuner.pending().await.unwrap().len(), 2);

        let lambda = number(&first, "Lambda");
        assert!((1e-4..=0.75).contains(&lambda));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_is_idempotent() {
        let (tuner, store) = tuner().await;
        let task = tuner.experiment_id().await.unwrap();
        let job = tuner.suggest().await.unwrap();

        let first = tuner.update(&job, 5.0).await.unwrap();
        let second = tuner.update(&job, 5.0).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.results_for(task).len(), 1);
        assert_eq!(stored_outcome(&store, task, first), json!(5.0));
        assert!(tuner.pending().await.unwrap().is_empty());
        assert!(tuner.pending_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_proposed_jobs_round_trip() {
        let (tuner, store) = tuner().await;
        let proposed = values(0.123456789, 0.5);
        let id = tuner.update(&proposed, 1.0).await.unwrap();

        let reopened = Tuner::open(Arc::clone(&store), "glmnet", TunerOptions::default())
            .await
            .unwrap();
        assert_eq!(reopened.get_id(&proposed).await.unwrap(), Some(id));

        let snapshot = reopened.snapshot().await.unwrap();
        assert!(assignments_match(&snapshot.assignments[&id], &proposed));
        assert_eq!(snapshot.outcome_of(id), Outcome::Value(1.0));
    }

    #[tokio::test]
    async fn test_update_rejects_bad_values() {
        let (tuner, store) = tuner().await;
        let task = tuner.experiment_id().await.unwrap();

        let mut partial = Assignment::new();
        partial.insert("Lambda".into(), ParamValue::Float(0.1));
        let err = tuner.update(&partial, 1.0).await.unwrap_err();
        assert!(matches!(err, TlError::InvalidJob { .. }));

        let mut unknown = values(0.1, 0.2);
        unknown.insert("Gamma".into(), ParamValue::Float(0.3));
        let err = tuner.update(&unknown, 1.0).await.unwrap_err();
        assert!(matches!(err, TlError::InvalidJob { .. }));
        assert!(store.results_for(task).is_empty());

        let mut with_outcome_key = values(0.1, 0.2);
        with_outcome_key.insert(OUTCOME.into(), ParamValue::Float(99.0));
        let id = tuner.update(&with_outcome_key, 3.0).await.unwrap();
        assert_eq!(stored_outcome(&store, task, id), json!(3.0));
    }

    #[tokio::test]
    async fn test_best_picks_maximum() {
        let (tuner, _store) = tuner().await;
        tuner.update(&values(0.1, 0.1), 12.0).await.unwrap();
        tuner.update(&values(0.2, 0.2), 6.7).await.unwrap();
        tuner.update(&values(0.3, 0.3), -3.0).await.unwrap();
        tuner.update_as_failed(&values(0.4, 0.4)).await.unwrap();

        let best = tuner.best().await.unwrap();
        assert!(assignments_match(&best, &values(0.1, 0.1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_without_values() {
        let (tuner, store) = tuner().await;
        assert!(matches!(tuner.best().await, Err(TlError::NoCompletedJobs)));

        let task = tuner.experiment_id().await.unwrap();
        let job = tuner.suggest().await.unwrap();
        assert!(matches!(tuner.best().await, Err(TlError::NoCompletedJobs)));

        let id = tuner.update_as_failed(&job).await.unwrap();
        assert!(matches!(tuner.best().await, Err(TlError::NoCompletedJobs)));
        assert_eq!(stored_outcome(&store, task, id), json!(VIOLATION_TOKEN));
        assert!(tuner.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_outcome_is_violation() {
        let (tuner, store) = tuner().await;
        let task = tuner.experiment_id().await.unwrap();
        let id = tuner.update(&values(0.1, 0.1), f64::NAN).await.unwrap();
        assert_eq!(stored_outcome(&store, task, id), json!(VIOLATION_TOKEN));
        assert_eq!(tuner.snapshot().await.unwrap().outcome_of(id), Outcome::Violation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_job_for_good() {
        let (tuner, store) = tuner().await;
        let task = tuner.experiment_id().await.unwrap();
        let keep = tuner.suggest().await.unwrap();
        let drop = tuner.suggest().await.unwrap();
        let drop_id = tuner.get_id(&drop).await.unwrap().unwrap();

        let cancelled = tuner
            .cancel(&[drop.clone(), values(0.7, 0.7)])
            .await
            .unwrap();
        assert_eq!(cancelled, vec![drop_id]);

        assert_eq!(tuner.get_id(&drop).await.unwrap(), None);
        let pending = tuner.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(assignments_match(&pending[0], &keep));
        assert!(!tuner.pending_ids().await.contains(&drop_id));
        assert_eq!(store.results_for(task).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_suggestions_are_distinct() {
        let (tuner, _store) = tuner().await;
        let tuner = Arc::new(tuner);

        let (a, b) = tokio::join!(tuner.suggest(), tuner.suggest());
        let (a, b) = (a.unwrap(), b.unwrap());
        let id_a = tuner.get_id(&a).await.unwrap().unwrap();
        let id_b = tuner.get_id(&b).await.unwrap().unwrap();
        assert_ne!(id_a, id_b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_suggestion_wait() {
        let store = Arc::new(MemoryStore::new(MemoryStoreConfig {
            fill_after_polls: u32::MAX,
            ..Default::default()
        }));
        let tuner = Tuner::create(Arc::clone(&store), glmnet(), TunerOptions::default())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tuner.suggest_with(&cancel).await.unwrap_err();
        assert!(matches!(err, TlError::SuggestionCancelled { .. }));
        assert_eq!(tuner.pending_ids().await.len(), 1);
        assert!(tuner.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let (tuner, store) = tuner().await;
        store.fail_next_request("connection reset");
        let err = tuner.pending().await.unwrap_err();
        assert!(matches!(err, TlError::Remote(RemoteError::Http { .. })));
        assert!(tuner.pending().await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_experiment() {
        let (tuner, store) = tuner().await;
        tuner.update(&values(0.1, 0.1), 1.0).await.unwrap();
        tuner.delete_experiment().await.unwrap();

        assert_eq!(store.experiment_count(), 0);
        assert_eq!(tuner.experiment_id().await, None);
        assert!(tuner.get_id(&values(0.1, 0.1)).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_glmnet_tuning_session() {
        let (tuner, store) = tuner().await;
        let task = tuner.experiment_id().await.unwrap();

        for _ in 0..9 {
            let job = tuner.suggest().await.unwrap();
            let lambda = number(&job, "Lambda");
            let alpha = number(&job, "Alpha");
            assert!((1e-4..=0.75).contains(&lambda));
            assert!((1e-4..=1.0).contains(&alpha));

            let deviance = -((lambda - 0.3).powi(2) + (alpha - 0.5).powi(2));
            tuner.update(&job, deviance).await.unwrap();
        }

        assert_eq!(store.results_for(task).len(), 9);
        assert!(tuner.pending().await.unwrap().is_empty());

        let snapshot = tuner.snapshot().await.unwrap();
        let (best_id, best_value) = snapshot.best().unwrap();
        assert!(snapshot
            .outcomes
            .values()
            .filter_map(Outcome::value)
            .all(|v| v <= best_value));

        let best = tuner.best().await.unwrap();
        assert!(assignments_match(&best, &snapshot.assignments[&best_id]));
    }
}
