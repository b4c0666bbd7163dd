//! HTTP-backed task and vault stores.
//!
//! Thin reqwest clients for the worker APIs:
//! - Tasks: `GET /` lists, `POST /` creates (echoing the normalized
//!   record), `PUT /{id}` replaces, `DELETE /{id}` removes
//! - Vault: `GET /` returns the encrypted envelope (or `{}` when none has
//!   been stored), `POST /` replaces it
//!
//! Both APIs identify the account with an `X-User-Email` header. Records
//! travel as camelCase JSON with epoch-millisecond timestamps; the serde
//! attributes on the model types handle that, so there are no separate wire
//! structs here.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::{HavenError, HavenResult};
use crate::models::Task;
use crate::store::{StoreError, TaskStore, VaultStore};
use crate::vault::EncryptedEnvelope;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> HavenResult<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| HavenError::Network(e.to_string()))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        code: status.as_u16(),
        message,
    })
}

/// Task store backed by the worker's task API
pub struct HttpTaskStore {
    client: Client,
    base_url: String,
    user_email: String,
}

impl HttpTaskStore {
    pub fn new(base_url: impl Into<String>, user_email: impl Into<String>) -> HavenResult<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_email: user_email.into(),
        })
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }
}

impl TaskStore for HttpTaskStore {
    async fn list_records(&self) -> Result<Vec<Task>, StoreError> {
        tracing::debug!(url = %self.base_url, "fetching task list");
        let response = self
            .client
            .get(&self.base_url)
            .header("X-User-Email", &self.user_email)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        check_status(response)
            .await?
            .json::<Vec<Task>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn create_record(&self, task: &Task) -> Result<Task, StoreError> {
        tracing::debug!(id = %task.id, "creating task record");
        let response = self
            .client
            .post(&self.base_url)
            .header("X-User-Email", &self.user_email)
            .json(task)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        // The server normalizes the record (may assign id, createdAt,
        // defaults) and echoes it back
        check_status(response)
            .await?
            .json::<Task>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn update_record(&self, id: &str, task: &Task) -> Result<Task, StoreError> {
        tracing::debug!(id = %id, "updating task record");
        let response = self
            .client
            .put(self.record_url(id))
            .header("X-User-Email", &self.user_email)
            .json(task)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        check_status(response)
            .await?
            .json::<Task>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        tracing::debug!(id = %id, "deleting task record");
        let response = self
            .client
            .delete(self.record_url(id))
            .header("X-User-Email", &self.user_email)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }
}

/// Vault store backed by the worker's vault API
pub struct HttpVaultStore {
    client: Client,
    base_url: String,
    user_email: String,
}

impl HttpVaultStore {
    pub fn new(base_url: impl Into<String>, user_email: impl Into<String>) -> HavenResult<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_email: user_email.into(),
        })
    }
}

impl VaultStore for HttpVaultStore {
    async fn get_envelope(&self) -> Result<Option<EncryptedEnvelope>, StoreError> {
        tracing::debug!(url = %self.base_url, "fetching vault envelope");
        let response = self
            .client
            .get(&self.base_url)
            .header("X-User-Email", &self.user_email)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        // An account with no stored vault gets an empty object
        if body.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(None);
        }
        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn put_envelope(&self, envelope: &EncryptedEnvelope) -> Result<(), StoreError> {
        tracing::debug!(url = %self.base_url, "storing vault envelope");
        let response = self
            .client
            .post(&self.base_url)
            .header("X-User-Email", &self.user_email)
            .json(envelope)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }
}
