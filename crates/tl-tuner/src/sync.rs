//! Reconciles the [`LocalCache`] with the remote store.
//!
//! A sync pass resolves the experiment name once, then reloads settings and
//! results and swaps in a fresh snapshot. Nothing else overwrites the cache
//! wholesale; single-job changes go through the `commit_*` methods.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tl_remote::{decode_variable, RemoteStore, WireResult, WireSetting};
use tl_types::{split_variables, Assignment, ExperimentId, Outcome, ResultId, TlError, TlResult};

use crate::cache::{CacheSnapshot, LocalCache};

/// Page size used when a listing should come back in one request.
pub const UNBOUNDED_PAGE_SIZE: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub settings_page_size: usize,
    pub results_page_size: usize,
    /// Stop paging the experiment listing after this many pages.
    pub max_experiment_pages: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            settings_page_size: UNBOUNDED_PAGE_SIZE,
            results_page_size: UNBOUNDED_PAGE_SIZE,
            max_experiment_pages: 10_000,
        }
    }
}

#[derive(Debug)]
pub struct Synchronizer {
    experiment_name: String,
    experiment_id: Option<ExperimentId>,
    options: SyncOptions,
    cache: LocalCache,
}

impl Synchronizer {
    pub fn new(experiment_name: impl Into<String>, options: SyncOptions) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            experiment_id: None,
            options,
            cache: LocalCache::new(),
        }
    }

    /// A synchronizer for an experiment whose identifier is already known,
    /// e.g. one this client just created.
    pub fn resolved(
        experiment_name: impl Into<String>,
        experiment_id: ExperimentId,
        options: SyncOptions,
    ) -> Self {
        let mut sync = Self::new(experiment_name, options);
        sync.experiment_id = Some(experiment_id);
        sync
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn experiment_id(&self) -> Option<ExperimentId> {
        self.experiment_id
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.cache.snapshot()
    }

    /// Look the experiment up by name, paging through the listing. The
    /// identifier is remembered and never looked up again.
    pub async fn resolve<S: RemoteStore + ?Sized>(&mut self, store: &S) -> TlResult<ExperimentId> {
        if let Some(id) = self.experiment_id {
            return Ok(id);
        }

        let mut page = 1;
        loop {
            let listing = store.list_experiments(page).await?;
            // Duplicate names: the first listed one wins.
            if let Some(found) = listing.results.iter().find(|e| e.name == self.experiment_name) {
                info!(
                    experiment_id = found.id,
                    name = %self.experiment_name,
                    "resolved experiment"
                );
                self.experiment_id = Some(found.id);
                return Ok(found.id);
            }
            if !listing.has_next() || page >= self.options.max_experiment_pages {
                break;
            }
            page += 1;
        }

        Err(TlError::ExperimentNotFound {
            name: self.experiment_name.clone(),
        })
    }

    /// Full pass: resolve, reload settings and results, swap the cache.
    pub async fn resolve_and_sync<S: RemoteStore + ?Sized>(
        &mut self,
        store: &S,
    ) -> TlResult<Arc<CacheSnapshot>> {
        let experiment_id = self.resolve(store).await?;
        if experiment_id < 0 {
            return Err(TlError::Sync {
                message: format!("experiment identifier {experiment_id} is negative"),
            });
        }

        let mut snapshot = CacheSnapshot {
            experiment_id,
            ..Default::default()
        };

        let settings = store
            .list_settings(experiment_id, self.options.settings_page_size)
            .await?;
        for setting in &settings.results {
            if setting.experiment.map_or(false, |owner| owner != experiment_id) {
                debug!(
                    setting = %setting.name,
                    owner = ?setting.experiment,
                    "skipping foreign setting"
                );
                continue;
            }
            absorb_setting(&mut snapshot, setting)?;
        }
        if snapshot.outcome_name.is_empty() {
            return Err(TlError::Sync {
                message: format!("experiment '{}' has no outcome setting", self.experiment_name),
            });
        }

        let results = store
            .list_results(experiment_id, self.options.results_page_size)
            .await?;
        if results.has_next() {
            warn!(experiment_id, "result listing was truncated; raise results_page_size");
        }

        let mut unfilled = 0usize;
        for result in &results.results {
            let (assignment, outcome) = decode_result(&snapshot, result)?;
            if assignment.is_empty() {
                unfilled += 1;
                continue;
            }
            snapshot.assignments.insert(result.id, assignment);
            snapshot.outcomes.insert(result.id, outcome);
        }

        debug!(
            experiment_id,
            parameters = snapshot.parameters.len(),
            jobs = snapshot.assignments.len(),
            unfilled,
            "sync pass complete"
        );
        Ok(self.cache.rebuild(snapshot))
    }

    pub fn commit_job(&self, id: ResultId, assignment: Assignment, outcome: Outcome) {
        self.cache.record(id, assignment, outcome);
    }

    pub fn commit_outcome(&self, id: ResultId, outcome: Outcome) {
        self.cache.record_outcome(id, outcome);
    }

    pub fn forget_job(&self, id: ResultId) -> bool {
        self.cache.forget(id)
    }

    /// Drop the resolved identifier and everything cached for it.
    pub fn detach(&mut self) {
        self.experiment_id = None;
        self.cache.clear();
    }
}

fn absorb_setting(snapshot: &mut CacheSnapshot, setting: &WireSetting) -> TlResult<()> {
    let id = setting.id.ok_or_else(|| TlError::Sync {
        message: format!("setting '{}' has no identifier", setting.name),
    })?;

    if setting.is_output {
        if !snapshot.outcome_name.is_empty() && snapshot.outcome_name != setting.name {
            warn!(
                kept = %snapshot.outcome_name,
                ignored = %setting.name,
                "experiment has more than one output setting"
            );
            return Ok(());
        }
        snapshot.outcome_name = setting.to_outcome()?.name;
    } else {
        snapshot.parameters.push(setting.to_parameter()?);
    }
    snapshot.setting_ids.insert(setting.name.clone(), id);
    Ok(())
}

/// Decode a stored result into its parameter values and outcome, using the
/// declared parameter types from `snapshot`.
pub fn decode_result(
    snapshot: &CacheSnapshot,
    result: &WireResult,
) -> TlResult<(Assignment, Outcome)> {
    let variables = result
        .variables
        .iter()
        .map(|v| decode_variable(v, &snapshot.outcome_name, snapshot.param_kind(&v.name)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(split_variables(variables))
}
