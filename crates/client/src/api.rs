//! HTTP client for the onboarding REST endpoints.

use std::time::Duration;

use onboard_core::fields::{CheckContext, FieldKind};
use onboard_core::plan::{EntityKind, SubStep};
use reqwest::StatusCode;
use serde_json::Value;

use crate::types::{FieldCheckResponse, PlanInfo, PlansPayload, ProgressResponse, SaveResponse};

/// HTTP client for the onboarding backend.
pub struct OnboardingApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Errors from the onboarding REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// No response within the configured request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Credentials were missing, expired or rejected.
    #[error("Not authorized ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// The backend returned another non-2xx status code.
    #[error("Onboarding API error ({status}): {body}")]
    Api { status: u16, body: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

impl ClientError {
    /// Connectivity problems, timeouts and server-side failures. These are
    /// worth retrying and never mean the user's data was wrong.
    pub fn is_network(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized { .. } => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// A human-readable message for the user. Uses the `message` or
    /// `error` field of a JSON error body when there is one.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { body, .. } | Self::Unauthorized { body, .. } => {
                serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("message")
                            .or_else(|| v.get("error"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| body.clone())
            }
            other => other.to_string(),
        }
    }
}

impl OnboardingApi {
    /// Create a client for the backend at `base_url`
    /// (e.g. `http://host:3000/api/v1`).
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check a candidate value's syntax and availability.
    ///
    /// Sends `GET /validation/{field-kind}?value=...` with the context ids
    /// as extra query parameters.
    pub async fn check_field(
        &self,
        kind: FieldKind,
        value: &str,
        context: &CheckContext,
    ) -> Result<FieldCheckResponse, ClientError> {
        let request = self
            .get(&format!("validation/{}", kind.as_str()))
            .query(&[("value", value)])
            .query(context);

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// Persist one section of an entity.
    ///
    /// Sends `POST /onboarding/{entity}/{section}`. A 4xx answer carrying a
    /// `{ "success": false }` body is returned as a normal response so the
    /// caller can surface the backend's message.
    pub async fn save_section(
        &self,
        entity: EntityKind,
        section: SubStep,
        payload: &Value,
    ) -> Result<SaveResponse, ClientError> {
        let response = self
            .post(&format!("onboarding/{}/{}", entity.as_str(), section.as_str()))
            .json(payload)
            .send()
            .await?;

        Self::parse_save_response(response).await
    }

    /// Finalize an entity's setup with `POST /onboarding/{entity}/complete`.
    pub async fn complete_entity(&self, entity: EntityKind) -> Result<SaveResponse, ClientError> {
        let response = self
            .post(&format!("onboarding/{}/complete", entity.as_str()))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        Self::parse_save_response(response).await
    }

    /// Fetch resume information with `GET /onboarding/progress`.
    pub async fn progress(&self) -> Result<ProgressResponse, ClientError> {
        let response = self.get("onboarding/progress").send().await?;
        Self::parse_response(response).await
    }

    /// List subscription plans with `GET /subscriptions/plans`.
    pub async fn plans(&self) -> Result<Vec<PlanInfo>, ClientError> {
        let response = self.get("subscriptions/plans").send().await?;
        let payload: PlansPayload = Self::parse_response(response).await?;
        Ok(payload.into_plans())
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or the status and body text as an
    /// error.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(Self::status_error(status, body))
    }

    fn status_error(status: StatusCode, body: String) -> ClientError {
        let status = status.as_u16();
        if status == 401 || status == 403 {
            ClientError::Unauthorized { status, body }
        } else {
            ClientError::Api { status, body }
        }
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn parse_save_response(response: reqwest::Response) -> Result<SaveResponse, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<SaveResponse>().await?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        if status.is_client_error() && status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            if let Ok(rejection) = serde_json::from_str::<SaveResponse>(&body) {
                if !rejection.success {
                    return Ok(rejection);
                }
            }
        }
        Err(Self::status_error(status, body))
    }
}
