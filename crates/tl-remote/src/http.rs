use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use tl_types::{config_error, ExperimentId, RemoteError, RemoteResult, ResultId, TaskId, TlResult};

use crate::config::ClientConfig;
use crate::store::RemoteStore;
use crate::wire::{ExperimentRecord, Page, ResultSubmission, WireResult, WireSetting};

/// Store backed by the hosted REST service.
#[derive(Debug, Clone)]
pub struct HttpStore {
    pub name: String,
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i64,
}

impl HttpStore {
    pub fn new(config: &ClientConfig) -> TlResult<Self> {
        let access_token = config.require_token()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| config_error!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            name: "Tunelab HTTP".to_string(),
            base_url: normalize_base(&config.api_url),
            access_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.access_token)
    }

    async fn execute(&self, request: RequestBuilder, resource: &str) -> RemoteResult<Response> {
        let response = request.send().await.map_err(|e| RemoteError::Http {
            message: format!("HTTP request failed: {}", e),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), resource, "remote request rejected");
        Err(map_status(status, body, resource, retry_after))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> RemoteResult<T> {
        let response = self.execute(request, resource).await?;
        let body = response.text().await.map_err(|e| RemoteError::Http {
            message: format!("failed to read response body: {}", e),
        })?;
        serde_json::from_str(&body).map_err(|e| RemoteError::InvalidResponse {
            message: format!("failed to parse {} response: {}, body: {}", resource, e, body),
        })
    }

    async fn send_empty(&self, request: RequestBuilder, resource: &str) -> RemoteResult<()> {
        self.execute(request, resource).await.map(|_| ())
    }
}

fn normalize_base(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn map_status(
    status: StatusCode,
    body: String,
    resource: &str,
    retry_after_secs: Option<u64>,
) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthenticationFailed {
            message: body,
        },
        StatusCode::NOT_FOUND => RemoteError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::CONFLICT => RemoteError::Conflict { message: body },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            retry_after_ms: retry_after_secs.unwrap_or(1) * 1000,
        },
        other => RemoteError::Status {
            status: other.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        settings: &[WireSetting],
    ) -> RemoteResult<ExperimentId> {
        tracing::info!("Creating experiment '{}' with {} settings", name, settings.len());
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "settings": settings,
        });
        let created: Created = self
            .send_json(self.request(Method::POST, "experiments/").json(&body), "experiment")
            .await?;
        Ok(created.id)
    }

    async fn list_experiments(&self, page: u32) -> RemoteResult<Page<ExperimentRecord>> {
        let request = self
            .request(Method::GET, "experiments/")
            .query(&[("page", page.to_string())]);
        self.send_json(request, "experiments").await
    }

    async fn list_settings(
        &self,
        experiment: ExperimentId,
        page_size: usize,
    ) -> RemoteResult<Page<WireSetting>> {
        let request = self.request(Method::GET, "settings/").query(&[
            ("experiment", experiment.to_string()),
            ("page_size", page_size.to_string()),
        ]);
        self.send_json(request, "settings").await
    }

    async fn list_results(&self, task: TaskId, page_size: usize) -> RemoteResult<Page<WireResult>> {
        let request = self.request(Method::GET, "results/").query(&[
            ("task", task.to_string()),
            ("page_size", page_size.to_string()),
        ]);
        self.send_json(request, "results").await
    }

    async fn create_suggestion(&self, task: TaskId) -> RemoteResult<WireResult> {
        let path = format!("tasks/{task}/suggest/");
        self.send_json(self.request(Method::POST, &path), "suggestion").await
    }

    async fn get_job(&self, id: ResultId) -> RemoteResult<WireResult> {
        let path = format!("results/{id}/");
        self.send_json(self.request(Method::GET, &path), &format!("result {id}"))
            .await
    }

    async fn add_result(&self, submission: &ResultSubmission) -> RemoteResult<ResultId> {
        let created: Created = self
            .send_json(self.request(Method::POST, "results/").json(submission), "result")
            .await?;
        Ok(created.id)
    }

    async fn replace_result(
        &self,
        id: ResultId,
        submission: &ResultSubmission,
    ) -> RemoteResult<()> {
        let path = format!("results/{id}/");
        self.send_empty(
            self.request(Method::PUT, &path).json(submission),
            &format!("result {id}"),
        )
        .await
    }

    async fn delete_job(&self, id: ResultId) -> RemoteResult<()> {
        let path = format!("results/{id}/");
        self.send_empty(self.request(Method::DELETE, &path), &format!("result {id}"))
            .await
    }

    async fn delete_experiment(&self, id: ExperimentId) -> RemoteResult<()> {
        let path = format!("experiments/{id}/");
        self.send_empty(self.request(Method::DELETE, &path), &format!("experiment {id}"))
            .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpStore {
        let config = ClientConfig::default()
            .with_api_url("https://tune.example/api")
            .with_access_token("secret");
        HttpStore::new(&config).unwrap()
    }

    #[test]
    fn test_requires_access_token() {
        assert!(HttpStore::new(&ClientConfig::default()).is_err());
    }

    #[test]
    fn test_joins_paths_onto_base() {
        let store = store();
        assert_eq!(store.url("results/4/"), "https://tune.example/api/results/4/");
        assert_eq!(store.url("/experiments/"), "https://tune.example/api/experiments/");
    }

    #[test]
    fn test_status_codes_map_to_remote_errors() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, String::new(), "x", None),
            RemoteError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, String::new(), "result 3", None),
            RemoteError::NotFound { resource } if resource == "result 3"
        ));
        assert!(matches!(
            map_status(StatusCode::CONFLICT, "exists".into(), "experiment", None),
            RemoteError::Conflict { .. }
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, String::new(), "x", Some(3)),
            RemoteError::RateLimited { retry_after_ms: 3000 }
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "upstream".into(), "x", None),
            RemoteError::Status { status: 502, .. }
        ));
    }
}
