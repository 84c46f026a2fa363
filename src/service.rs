//! HTTP client for the remote conversion service.
//!
//! The service mirrors the local pipeline over four endpoints: `POST
//! /process` (multipart file upload), `POST /unpack` (reference expansion),
//! `GET /health`, and `GET /formats`. Authenticated requests carry a bearer
//! token.

use crate::artifact::Artifact;
use crate::config::Config;
use crate::dsl::Options;
use crate::source::SourceRecord;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Method, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Errors surfaced by service calls.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request did not complete within the configured timeout.
    #[error("service request timed out after {0:?}")]
    Timeout(Duration),
    /// Transport-level failure (connect, TLS, protocol).
    #[error("service transport error: {0}")]
    Http(#[from] reqwest::Error),
    /// The API key was rejected.
    #[error("service rejected the API key (HTTP 401)")]
    Unauthorized,
    /// The account has no remaining quota.
    #[error("service quota exhausted (HTTP 402)")]
    QuotaExhausted,
    /// The upload exceeded the service's size limit.
    #[error("upload too large for the service (HTTP 413)")]
    TooLarge,
    /// Any other non-success status.
    #[error("service returned HTTP {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code returned.
        status: StatusCode,
        /// Response body, possibly truncated or empty.
        body: String,
    },
    /// The response body was not the expected shape.
    #[error("malformed service response: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct UnpackRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct UnpackResponse {
    files: Vec<UnpackedFile>,
}

#[derive(Deserialize)]
struct UnpackedFile {
    filename: String,
    data_b64: String,
}

/// Service health report returned by `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealth {
    /// Overall status label, normally `"ok"`.
    pub status: String,
    /// Service version string, if reported.
    #[serde(default)]
    pub version: Option<String>,
}

/// Client for the remote conversion service.
pub struct ServiceClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ServiceClient {
    /// Build a client from configuration. Returns `None` when no API key is
    /// configured, so callers can treat the service as simply absent.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.service_configured() {
            return None;
        }
        Some(Self::new(
            &config.service_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
            &config.user_agent,
        ))
    }

    /// Build a client against an explicit endpoint.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Self {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    /// Convert one file remotely.
    pub async fn process(
        &self,
        filename: &str,
        data: &[u8],
        options: &Options,
    ) -> Result<Artifact, ServiceError> {
        let mut form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(data.to_vec()).file_name(filename.to_string()),
        );
        for (key, value) in options {
            form = form.text(key.clone(), value.to_string());
        }

        debug!(filename, bytes = data.len(), "uploading file to service");
        let response = self
            .request(Method::POST, "/process")
            .multipart(form)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let response = self.ensure_success(response).await?;
        response
            .json::<Artifact>()
            .await
            .map_err(|err| ServiceError::Malformed(err.to_string()))
    }

    /// Expand a reference (URL, repository, archive) into raw files remotely.
    pub async fn unpack(&self, reference: &str) -> Result<Vec<SourceRecord>, ServiceError> {
        debug!(reference, "requesting remote unpack");
        let response = self
            .request(Method::POST, "/unpack")
            .json(&UnpackRequest { url: reference })
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let response = self.ensure_success(response).await?;
        let parsed: UnpackResponse = response
            .json()
            .await
            .map_err(|err| ServiceError::Malformed(err.to_string()))?;

        let mut records = Vec::with_capacity(parsed.files.len());
        for file in parsed.files {
            let bytes = STANDARD
                .decode(&file.data_b64)
                .map_err(|err| ServiceError::Malformed(format!("bad base64 payload: {err}")))?;
            records.push(SourceRecord::new(file.filename, bytes));
        }
        Ok(records)
    }

    /// Probe service liveness. Unauthenticated.
    pub async fn health(&self) -> Result<ServiceHealth, ServiceError> {
        let response = self
            .request(Method::GET, "/health")
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let response = self.ensure_success(response).await?;
        response
            .json::<ServiceHealth>()
            .await
            .map_err(|err| ServiceError::Malformed(err.to_string()))
    }

    /// List formats the service can convert. Unauthenticated.
    pub async fn formats(&self) -> Result<Vec<String>, ServiceError> {
        let response = self
            .request(Method::GET, "/formats")
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;
        let response = self.ensure_success(response).await?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|err| ServiceError::Malformed(err.to_string()))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.bearer_auth(api_key);
        }
        req
    }

    fn map_transport(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.timeout)
        } else {
            ServiceError::Http(err)
        }
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error = match status {
            StatusCode::UNAUTHORIZED => ServiceError::Unauthorized,
            StatusCode::PAYMENT_REQUIRED => ServiceError::QuotaExhausted,
            StatusCode::PAYLOAD_TOO_LARGE => ServiceError::TooLarge,
            status => {
                let body = response.text().await.unwrap_or_default();
                ServiceError::UnexpectedStatus { status, body }
            }
        };
        error!(error = %error, "service request failed");
        Err(error)
    }
}
