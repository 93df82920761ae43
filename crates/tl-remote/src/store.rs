//! Contract of the authoritative remote experiment store.

use async_trait::async_trait;
use std::sync::Arc;

use tl_types::{ExperimentId, RemoteResult, ResultId, TaskId};

use crate::wire::{ExperimentRecord, Page, ResultSubmission, WireResult, WireSetting};

/// Core store interface.
///
/// Implementations may talk to the hosted service (see
/// [`crate::http::HttpStore`]) or keep everything in-process
/// (see [`crate::memory::MemoryStore`]). Every method is a single
/// request/response; retries are the caller's business.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create an experiment with its full settings list. Fails with
    /// `Conflict` when the caller already owns an experiment of that name.
    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        settings: &[WireSetting],
    ) -> RemoteResult<ExperimentId>;

    /// One page (1-based) of the caller's experiments.
    async fn list_experiments(&self, page: u32) -> RemoteResult<Page<ExperimentRecord>>;

    async fn list_settings(
        &self,
        experiment: ExperimentId,
        page_size: usize,
    ) -> RemoteResult<Page<WireSetting>>;

    async fn list_results(&self, task: TaskId, page_size: usize) -> RemoteResult<Page<WireResult>>;

    /// Ask the optimizer for a new job. Variables may come back empty.
    async fn create_suggestion(&self, task: TaskId) -> RemoteResult<WireResult>;

    async fn get_job(&self, id: ResultId) -> RemoteResult<WireResult>;

    async fn add_result(&self, submission: &ResultSubmission) -> RemoteResult<ResultId>;

    /// Full-record replace of an existing result.
    async fn replace_result(&self, id: ResultId, submission: &ResultSubmission) -> RemoteResult<()>;

    async fn delete_job(&self, id: ResultId) -> RemoteResult<()>;

    async fn delete_experiment(&self, id: ExperimentId) -> RemoteResult<()>;

    /// Human-readable store name used in logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        settings: &[WireSetting],
    ) -> RemoteResult<ExperimentId> {
        (**self).create_experiment(name, description, settings).await
    }

    async fn list_experiments(&self, page: u32) -> RemoteResult<Page<ExperimentRecord>> {
        (**self).list_experiments(page).await
    }

    async fn list_settings(
        &self,
        experiment: ExperimentId,
        page_size: usize,
    ) -> RemoteResult<Page<WireSetting>> {
        (**self).list_settings(experiment, page_size).await
    }

    async fn list_results(&self, task: TaskId, page_size: usize) -> RemoteResult<Page<WireResult>> {
        (**self).list_results(task, page_size).await
    }

    async fn create_suggestion(&self, task: TaskId) -> RemoteResult<WireResult> {
        (**self).create_suggestion(task).await
    }

    async fn get_job(&self, id: ResultId) -> RemoteResult<WireResult> {
        (**self).get_job(id).await
    }

    async fn add_result(&self, submission: &ResultSubmission) -> RemoteResult<ResultId> {
        (**self).add_result(submission).await
    }

    async fn replace_result(
        &self,
        id: ResultId,
        submission: &ResultSubmission,
    ) -> RemoteResult<()> {
        (**self).replace_result(id, submission).await
    }

    async fn delete_job(&self, id: ResultId) -> RemoteResult<()> {
        (**self).delete_job(id).await
    }

    async fn delete_experiment(&self, id: ExperimentId) -> RemoteResult<()> {
        (**self).delete_experiment(id).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Box<S> {
    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        settings: &[WireSetting],
    ) -> RemoteResult<ExperimentId> {
        (**self).create_experiment(name, description, settings).await
    }

    async fn list_experiments(&self, page: u32) -> RemoteResult<Page<ExperimentRecord>> {
        (**self).list_experiments(page).await
    }

    async fn list_settings(
        &self,
        experiment: ExperimentId,
        page_size: usize,
    ) -> RemoteResult<Page<WireSetting>> {
        (**self).list_settings(experiment, page_size).await
    }

    async fn list_results(&self, task: TaskId, page_size: usize) -> RemoteResult<Page<WireResult>> {
        (**self).list_results(task, page_size).await
    }

    async fn create_suggestion(&self, task: TaskId) -> RemoteResult<WireResult> {
        (**self).create_suggestion(task).await
    }

    async fn get_job(&self, id: ResultId) -> RemoteResult<WireResult> {
        (**self).get_job(id).await
    }

    async fn add_result(&self, submission: &ResultSubmission) -> RemoteResult<ResultId> {
        (**self).add_result(submission).await
    }

    async fn replace_result(
        &self,
        id: ResultId,
        submission: &ResultSubmission,
    ) -> RemoteResult<()> {
        (**self).replace_result(id, submission).await
    }

    async fn delete_job(&self, id: ResultId) -> RemoteResult<()> {
        (**self).delete_job(id).await
    }

    async fn delete_experiment(&self, id: ExperimentId) -> RemoteResult<()> {
        (**self).delete_experiment(id).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
