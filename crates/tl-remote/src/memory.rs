//! In-process experiment store.
//!
//! Keeps experiments, settings and results in memory and plays the role of
//! the remote optimizer: a suggestion stays unfilled for a configurable
//! number of polls, then gets random values inside the declared bounds.
//! Useful for tests and for running the client offline.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use tl_types::{
    ExperimentId, RemoteError, RemoteResult, ResultId, SettingId, TaskId, TlResult, Variable,
};

use crate::sampler::RandomSampler;
use crate::store::RemoteStore;
use crate::wire::{
    encode_variable, ExperimentRecord, Page, ResultSubmission, WireResult, WireSetting,
    WireVariable,
};

/// Configuration for the in-process store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// How many `get_job` calls see an empty suggestion before it is filled.
    pub fill_after_polls: u32,
    /// Page size of the experiment listing.
    pub experiment_page_size: usize,
    /// Seed for the simulated optimizer; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            fill_after_polls: 1,
            experiment_page_size: 10,
            seed: None,
        }
    }
}

/// Serializable contents of a [`MemoryStore`], used to persist offline
/// sessions between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDump {
    pub next_id: i64,
    pub experiments: Vec<ExperimentRecord>,
    pub settings: Vec<WireSetting>,
    pub results: Vec<WireResult>,
    /// Unfilled suggestion id → polls left.
    #[serde(default)]
    pub unfilled: BTreeMap<ResultId, u32>,
}

#[derive(Debug)]
struct MemoryState {
    next_id: i64,
    experiments: BTreeMap<ExperimentId, ExperimentRecord>,
    settings: BTreeMap<SettingId, WireSetting>,
    results: BTreeMap<ResultId, WireResult>,
    /// Suggestions not yet filled, with the polls left before they are.
    unfilled: HashMap<ResultId, u32>,
    sampler: RandomSampler,
    injected_failure: Option<String>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_failure(&mut self) -> RemoteResult<()> {
        match self.injected_failure.take() {
            Some(message) => Err(RemoteError::Http { message }),
            None => Ok(()),
        }
    }

    fn require_task(&self, task: TaskId) -> RemoteResult<()> {
        if self.experiments.contains_key(&task) {
            Ok(())
        } else {
            Err(RemoteError::NotFound {
                resource: format!("task {task}"),
            })
        }
    }

    fn settings_of(&self, experiment: ExperimentId) -> Vec<WireSetting> {
        self.settings
            .values()
            .filter(|s| s.experiment == Some(experiment))
            .cloned()
            .collect()
    }

    /// Let the simulated optimizer choose values for a pending suggestion.
    fn fill(&mut self, id: ResultId) -> RemoteResult<()> {
        let task = self
            .results
            .get(&id)
            .and_then(|r| r.task)
            .ok_or_else(|| RemoteError::NotFound {
                resource: format!("result {id}"),
            })?;

        let mut variables = Vec::new();
        for setting in self.settings_of(task) {
            let variable = if setting.is_output {
                Variable::Outcome(tl_types::Outcome::Unreported)
            } else {
                let spec = setting.to_parameter()?;
                Variable::Param {
                    name: setting.name.clone(),
                    value: self.sampler.sample(&spec),
                }
            };
            let mut wire = encode_variable(&variable, &setting.name, setting.id);
            wire.id = Some(self.allocate_id());
            variables.push(wire);
        }

        if let Some(result) = self.results.get_mut(&id) {
            result.variables = variables;
            result.run_date = Some(Utc::now());
        }
        self.unfilled.remove(&id);
        debug!(result_id = id, "memory store: suggestion filled");
        Ok(())
    }

    fn number_variables(&mut self, submission: &ResultSubmission) -> Vec<WireVariable> {
        submission
            .variables
            .iter()
            .cloned()
            .map(|mut v| {
                if v.id.is_none() {
                    v.id = Some(self.allocate_id());
                }
                v
            })
            .collect()
    }
}

/// A fully in-process store that simulates the remote optimizer.
#[derive(Debug)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self::restore(config, MemoryDump::default())
    }

    /// Rebuild a store from a previous [`MemoryStore::dump`].
    pub fn restore(config: MemoryStoreConfig, dump: MemoryDump) -> Self {
        let sampler = match config.seed {
            Some(seed) => RandomSampler::seeded(seed),
            None => RandomSampler::new(),
        };
        Self {
            config,
            state: Mutex::new(MemoryState {
                next_id: dump.next_id,
                experiments: dump.experiments.into_iter().map(|e| (e.id, e)).collect(),
                settings: dump
                    .settings
                    .into_iter()
                    .filter_map(|s| s.id.map(|id| (id, s)))
                    .collect(),
                results: dump.results.into_iter().map(|r| (r.id, r)).collect(),
                unfilled: dump.unfilled.into_iter().collect(),
                sampler,
                injected_failure: None,
            }),
        }
    }

    pub fn dump(&self) -> MemoryDump {
        let state = self.state.lock();
        MemoryDump {
            next_id: state.next_id,
            experiments: state.experiments.values().cloned().collect(),
            settings: state.settings.values().cloned().collect(),
            results: state.results.values().cloned().collect(),
            unfilled: state.unfilled.iter().map(|(id, left)| (*id, *left)).collect(),
        }
    }

    /// Load a store saved with [`MemoryStore::save`]; a missing file gives
    /// an empty store.
    pub fn load(config: MemoryStoreConfig, path: &Path) -> TlResult<Self> {
        if !path.exists() {
            return Ok(Self::new(config));
        }
        let contents = std::fs::read_to_string(path)?;
        let dump: MemoryDump = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), experiments = dump.experiments.len(), "loaded memory store");
        Ok(Self::restore(config, dump))
    }

    pub fn save(&self, path: &Path) -> TlResult<()> {
        let contents = serde_json::to_string_pretty(&self.dump())?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Create a memory store with default settings.
    pub fn with_defaults() -> Self {
        Self::new(MemoryStoreConfig::default())
    }

    /// Make the next request fail with a transport error.
    pub fn fail_next_request(&self, message: impl Into<String>) {
        self.state.lock().injected_failure = Some(message.into());
    }

    /// All results filed under a task, unfilled suggestions included.
    pub fn results_for(&self, task: TaskId) -> Vec<WireResult> {
        self.state
            .lock()
            .results
            .values()
            .filter(|r| r.task == Some(task))
            .cloned()
            .collect()
    }

    /// Every setting of every experiment, regardless of owner.
    pub fn all_settings(&self) -> Vec<WireSetting> {
        self.state.lock().settings.values().cloned().collect()
    }

    pub fn experiment_count(&self) -> usize {
        self.state.lock().experiments.len()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        settings: &[WireSetting],
    ) -> RemoteResult<ExperimentId> {
        let mut state = self.state.lock();
        state.take_failure()?;

        if state.experiments.values().any(|e| e.name == name) {
            return Err(RemoteError::Conflict {
                message: format!("an experiment named '{name}' already exists"),
            });
        }

        let id = state.allocate_id();
        state.experiments.insert(
            id,
            ExperimentRecord {
                id,
                name: name.to_string(),
                description: description.to_string(),
            },
        );
        for setting in settings {
            let setting_id = state.allocate_id();
            let mut setting = setting.clone();
            setting.id = Some(setting_id);
            setting.experiment = Some(id);
            state.settings.insert(setting_id, setting);
        }

        info!(experiment_id = id, name, "memory store: experiment created");
        Ok(id)
    }

    async fn list_experiments(&self, page: u32) -> RemoteResult<Page<ExperimentRecord>> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let size = self.config.experiment_page_size.max(1);
        let skip = (page.max(1) as usize - 1) * size;
        let results: Vec<ExperimentRecord> =
            state.experiments.values().skip(skip).take(size).cloned().collect();
        let next = (state.experiments.len() > skip + size).then(|| format!("?page={}", page + 1));
        Ok(Page { results, next })
    }

    async fn list_settings(
        &self,
        experiment: ExperimentId,
        page_size: usize,
    ) -> RemoteResult<Page<WireSetting>> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.require_task(experiment)?;

        let mut settings = state.settings_of(experiment);
        settings.truncate(page_size);
        Ok(Page::single(settings))
    }

    async fn list_results(&self, task: TaskId, page_size: usize) -> RemoteResult<Page<WireResult>> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.require_task(task)?;

        let results = state
            .results
            .values()
            .filter(|r| r.task == Some(task))
            .take(page_size)
            .cloned()
            .collect();
        Ok(Page::single(results))
    }

    async fn create_suggestion(&self, task: TaskId) -> RemoteResult<WireResult> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.require_task(task)?;

        let id = state.allocate_id();
        let result = WireResult {
            id,
            task: Some(task),
            variables: Vec::new(),
            user_proposed: false,
            description: String::new(),
            run_date: None,
        };
        state.results.insert(id, result.clone());
        state.unfilled.insert(id, self.config.fill_after_polls);
        Ok(result)
    }

    async fn get_job(&self, id: ResultId) -> RemoteResult<WireResult> {
        let mut state = self.state.lock();
        state.take_failure()?;

        match state.unfilled.get(&id).copied() {
            Some(0) => state.fill(id)?,
            Some(remaining) => {
                state.unfilled.insert(id, remaining - 1);
            }
            None => {}
        }

        state.results.get(&id).cloned().ok_or_else(|| RemoteError::NotFound {
            resource: format!("result {id}"),
        })
    }

    async fn add_result(&self, submission: &ResultSubmission) -> RemoteResult<ResultId> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.require_task(submission.task)?;

        let id = state.allocate_id();
        let variables = state.number_variables(submission);
        state.results.insert(
            id,
            WireResult {
                id,
                task: Some(submission.task),
                variables,
                user_proposed: submission.user_proposed,
                description: submission.description.clone(),
                run_date: Some(submission.run_date),
            },
        );
        Ok(id)
    }

    async fn replace_result(
        &self,
        id: ResultId,
        submission: &ResultSubmission,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.take_failure()?;

        if !state.results.contains_key(&id) {
            return Err(RemoteError::NotFound {
                resource: format!("result {id}"),
            });
        }
        let variables = state.number_variables(submission);
        state.unfilled.remove(&id);
        if let Some(result) = state.results.get_mut(&id) {
            result.task = Some(submission.task);
            result.variables = variables;
            result.user_proposed = submission.user_proposed;
            result.description = submission.description.clone();
            result.run_date = Some(submission.run_date);
        }
        Ok(())
    }

    async fn delete_job(&self, id: ResultId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.take_failure()?;

        state.unfilled.remove(&id);
        state
            .results
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound {
                resource: format!("result {id}"),
            })
    }

    async fn delete_experiment(&self, id: ExperimentId) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.take_failure()?;

        state.experiments.remove(&id).ok_or_else(|| RemoteError::NotFound {
            resource: format!("experiment {id}"),
        })?;
        state.settings.retain(|_, s| s.experiment != Some(id));
        let removed: Vec<ResultId> = state
            .results
            .values()
            .filter(|r| r.task == Some(id))
            .map(|r| r.id)
            .collect();
        for result_id in removed {
            state.results.remove(&result_id);
            state.unfilled.remove(&result_id);
        }
        info!(experiment_id = id, "memory store: experiment deleted");
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
