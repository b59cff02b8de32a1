//! Non-streaming `POST /execute` fallback.

use agent_console_core::ExecutionError;
use serde::Serialize;

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
}

/// Submits code over plain HTTP.
///
/// The endpoint only acknowledges the request; results, if any, still
/// arrive over the persistent connection.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExecutor {
    /// Create an executor for the backend at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/execute", base_url.trim_end_matches('/')),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submit `code`.
    ///
    /// # Errors
    /// Returns [`ExecutionError::Http`] if the request fails or the status is
    /// not 2xx. Details are logged, not surfaced.
    pub async fn execute(&self, code: &str) -> Result<(), ExecutionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExecuteRequest { code })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Execute request to {} failed: {e}", self.endpoint);
                failed()
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Execute request accepted ({status})");
            Ok(())
        } else {
            tracing::warn!("Execute request rejected with {status}");
            Err(failed())
        }
    }
}

fn failed() -> ExecutionError {
    ExecutionError::Http("Failed to execute code".into())
}
