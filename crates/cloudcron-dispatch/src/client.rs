use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudcron_core::config::CloudControlConfig;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{DispatchError, Result};
use crate::retry::RetryPolicy;
use crate::types::{AuthToken, TokenResponse, WorkerHandle};

/// Worker management operations the scheduler needs from a PaaS.
#[async_trait]
pub trait WorkerDispatch: Send + Sync {
    /// Create a fresh session token from the configured account credentials.
    async fn authenticate(&self) -> Result<AuthToken>;

    /// Start a worker running `command` with `parameters`.
    async fn add_worker(&self, command: &str, parameters: &str) -> Result<WorkerHandle>;

    /// Stop a worker. A worker that no longer exists counts as removed.
    async fn remove_worker(&self, worker_id: &str) -> Result<()>;

    async fn list_workers(&self) -> Result<Vec<WorkerHandle>>;

    async fn worker_details(&self, worker_id: &str) -> Result<WorkerHandle>;

    /// Ids of running workers with exactly `command` whose parameters begin
    /// with the whole arguments of `params_prefix` (see [`params_match`]).
    async fn running_workers(&self, command: &str, params_prefix: &str) -> Result<Vec<String>> {
        let workers = self.list_workers().await?;
        Ok(workers
            .into_iter()
            .filter(|w| w.command == command && params_match(&w.parameters, params_prefix))
            .map(|w| w.worker_id)
            .collect())
    }
}

/// Whether `parameters` starts with `prefix` on an argument boundary.
///
/// `--application=backend` matches `--application=backend --x` but never
/// `--application=backend2`.
pub fn params_match(parameters: &str, prefix: &str) -> bool {
    parameters
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

#[async_trait]
impl<T: WorkerDispatch + ?Sized> WorkerDispatch for Arc<T> {
    async fn authenticate(&self) -> Result<AuthToken> {
        (**self).authenticate().await
    }
    async fn add_worker(&self, command: &str, parameters: &str) -> Result<WorkerHandle> {
        (**self).add_worker(command, parameters).await
    }
    async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        (**self).remove_worker(worker_id).await
    }
    async fn list_workers(&self) -> Result<Vec<WorkerHandle>> {
        (**self).list_workers().await
    }
    async fn worker_details(&self, worker_id: &str) -> Result<WorkerHandle> {
        (**self).worker_details(worker_id).await
    }
    async fn running_workers(&self, command: &str, params_prefix: &str) -> Result<Vec<String>> {
        (**self).running_workers(command, params_prefix).await
    }
}

/// reqwest client for the cloudControl REST API, scoped to one application deployment.
///
/// The session token is held behind a `RwLock` so one client can be shared
/// (via `Arc`) between the scheduler loop and its marker helpers.
pub struct CloudControlClient {
    client: reqwest::Client,
    base_url: String,
    application: String,
    deployment: String,
    email: String,
    password: String,
    token: RwLock<Option<AuthToken>>,
    retry: RetryPolicy,
}

impl CloudControlClient {
    /// Build a client from validated configuration. No request is made yet.
    pub fn new(config: &CloudControlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("cloudcron/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            application: config.application.clone(),
            deployment: config.deployment.clone(),
            email: config.email.clone(),
            password: config.password.clone(),
            token: RwLock::new(None),
            retry: RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reuse a token obtained elsewhere instead of authenticating.
    pub async fn set_token(&self, token: AuthToken) {
        *self.token.write().await = Some(token);
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn workers_url(&self) -> String {
        format!(
            "{}/app/{}/deployment/{}/worker/",
            self.base_url, self.application, self.deployment
        )
    }

    fn worker_url(&self, worker_id: &str) -> String {
        format!("{}{}/", self.workers_url(), worker_id)
    }

    async fn auth_header(&self) -> Result<String> {
        self.token
            .read()
            .await
            .as_ref()
            .map(AuthToken::header_value)
            .ok_or(DispatchError::TokenRequired)
    }

    /// Send the request built by `build`, retrying unreachable-host failures,
    /// and turn error statuses into typed errors.
    async fn send<F>(&self, label: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = self
            .retry
            .run(label, || build().send())
            .await
            .map_err(|e| DispatchError::Connection {
                attempts: e.attempts,
                source: e.last,
            })?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        debug!(%label, status, body = %text, "cloudControl API error");
        Err(DispatchError::from_status(status, text))
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| DispatchError::Parse(format!("{e}: {text}")))
}

#[async_trait]
impl WorkerDispatch for CloudControlClient {
    #[instrument(skip(self))]
    async fn authenticate(&self) -> Result<AuthToken> {
        let url = format!("{}/token/", self.base_url);
        let resp = self
            .send("authenticate", || {
                self.client
                    .post(&url)
                    .basic_auth(&self.email, Some(&self.password))
                    .form(&[] as &[(&str, &str)])
            })
            .await?;

        let body: TokenResponse = decode(resp).await?;
        if body.token.trim().is_empty() {
            return Err(DispatchError::Parse("empty token in response".to_string()));
        }
        let token = AuthToken::new(body.token);
        *self.token.write().await = Some(token.clone());
        info!(application = %self.application, "authenticated against cloudControl API");
        Ok(token)
    }

    #[instrument(skip(self))]
    async fn add_worker(&self, command: &str, parameters: &str) -> Result<WorkerHandle> {
        let auth = self.auth_header().await?;
        let url = self.workers_url();
        let mut form = vec![("command", command)];
        if !parameters.is_empty() {
            form.push(("params", parameters));
        }

        let resp = self
            .send("add_worker", || {
                self.client
                    .post(&url)
                    .header("Authorization", &auth)
                    .form(&form)
            })
            .await?;

        let worker: WorkerHandle = decode(resp).await?;
        debug!(worker_id = %worker.worker_id, "worker added");
        Ok(worker)
    }

    #[instrument(skip(self))]
    async fn remove_worker(&self, worker_id: &str) -> Result<()> {
        let auth = self.auth_header().await?;
        let url = self.worker_url(worker_id);

        match self
            .send("remove_worker", || {
                self.client.delete(&url).header("Authorization", &auth)
            })
            .await
        {
            Ok(_) => Ok(()),
            // the worker may have exited on its own; removal is idempotent
            Err(e) if e.is_gone() => {
                warn!(%worker_id, code = e.code(), "worker already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerHandle>> {
        let auth = self.auth_header().await?;
        let url = self.workers_url();
        let resp = self
            .send("list_workers", || {
                self.client.get(&url).header("Authorization", &auth)
            })
            .await?;
        decode(resp).await
    }

    async fn worker_details(&self, worker_id: &str) -> Result<WorkerHandle> {
        let auth = self.auth_header().await?;
        let url = self.worker_url(worker_id);
        let resp = self
            .send("worker_details", || {
                self.client.get(&url).header("Authorization", &auth)
            })
            .await?;
        decode(resp).await
    }
}
