//! HTTP adapter for the remote computation service (blocking `reqwest`).
//!
//! Endpoints, relative to the configured base URL:
//! - `POST computations`: submit a job definition, answers `{ "id" }`
//! - `GET computations/{id}`: `{ "status", "error", "results" }`
//! - `GET results/{id}`: artifact descriptor
//! - `POST results/{id}/release`: `{ "publicKey" }` in, `{ "type", "value" }` out
//! - `GET results/{id}/raw`: plaintext payload bytes
//!
//! Binary fields travel as standard base64.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ClientConfig;
use crate::domain::{
    ArtifactDescriptor, ContentType, JobDefinition, JobHandle, JobStatus, PublicKey,
    ReleasedArtifact, ResultReference, StatusReport,
};
use crate::ports::{ComputationService, ServiceError};
use crate::{CipherflowError, Result};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<ResultReference>,
}

impl StatusResponse {
    fn into_report(self) -> std::result::Result<StatusReport, ServiceError> {
        let status = parse_status(&self.status).ok_or_else(|| {
            ServiceError::InvalidResponse(format!("unknown job status '{}'", self.status))
        })?;
        Ok(StatusReport {
            status,
            error: self.error,
            results: self.results,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseRequest {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(rename = "type")]
    content_type: ContentType,
    value: String,
}

impl ReleaseResponse {
    fn into_artifact(self) -> std::result::Result<ReleasedArtifact, ServiceError> {
        let ciphertext = BASE64
            .decode(self.value.trim())
            .map_err(|e| ServiceError::InvalidResponse(format!("release value is not base64: {e}")))?;
        Ok(ReleasedArtifact::new(self.content_type, ciphertext))
    }
}

fn parse_status(raw: &str) -> Option<JobStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "requested" => Some(JobStatus::Requested),
        "running" => Some(JobStatus::Running),
        "success" => Some(JobStatus::Success),
        "error" => Some(JobStatus::Error),
        _ => None,
    }
}

/// Map a non-success HTTP status to the service error taxonomy.
fn status_error(status: StatusCode, body: String, resource: &str) -> ServiceError {
    if status == StatusCode::NOT_FOUND {
        ServiceError::NotFound(resource.to_string())
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ServiceError::Transport(format!("{status} on {resource}: {body}"))
    } else {
        ServiceError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

fn transport_error(e: &reqwest::Error) -> ServiceError {
    if e.is_decode() {
        ServiceError::InvalidResponse(e.to_string())
    } else {
        ServiceError::Transport(e.to_string())
    }
}

/// `ComputationService` over the service's REST API.
pub struct HttpComputationService {
    client: Client,
    base: Url,
    api_token: Option<String>,
}

impl HttpComputationService {
    /// Build a client from `config`.
    ///
    /// # Errors
    /// Returns `Configuration` if the base URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            CipherflowError::Configuration(format!("invalid service URL '{}': {e}", config.base_url))
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(CipherflowError::Configuration(format!(
                "service URL '{}' must be an http(s) URL",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| CipherflowError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> std::result::Result<Url, ServiceError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ServiceError::Transport("service URL cannot hold a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, resource: &str) -> std::result::Result<Response, ServiceError> {
        let response = self
            .authorized(request)
            .send()
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(status_error(status, body, resource))
    }

    fn json<T: DeserializeOwned>(response: Response, resource: &str) -> std::result::Result<T, ServiceError> {
        response
            .json()
            .map_err(|e| ServiceError::InvalidResponse(format!("{resource}: {e}")))
    }
}

impl ComputationService for HttpComputationService {
    fn submit(&self, definition: &JobDefinition) -> std::result::Result<JobHandle, ServiceError> {
        let url = self.endpoint(&["computations"])?;
        let response = self.send(self.client.post(url).json(definition), "computations")?;
        let body: SubmitResponse = Self::json(response, "computations")?;
        Ok(JobHandle::new(body.id))
    }

    fn get_status(&self, handle: &JobHandle) -> std::result::Result<StatusReport, ServiceError> {
        let resource = format!("computation {}", handle.id);
        let url = self.endpoint(&["computations", handle.id.as_str()])?;
        let response = self.send(self.client.get(url), &resource)?;
        Self::json::<StatusResponse>(response, &resource)?.into_report()
    }

    fn fetch_artifact_descriptor(
        &self,
        reference: &ResultReference,
    ) -> std::result::Result<ArtifactDescriptor, ServiceError> {
        let resource = format!("result {reference}");
        let url = self.endpoint(&["results", reference.as_str()])?;
        let response = self.send(self.client.get(url), &resource)?;
        Self::json(response, &resource)
    }

    fn release(
        &self,
        reference: &ResultReference,
        public_key: &PublicKey,
    ) -> std::result::Result<ReleasedArtifact, ServiceError> {
        let resource = format!("release of result {reference}");
        let url = self.endpoint(&["results", reference.as_str(), "release"])?;
        let request = ReleaseRequest {
            public_key: BASE64.encode(public_key.as_bytes()),
        };
        let response = self.send(self.client.post(url).json(&request), &resource)?;
        Self::json::<ReleaseResponse>(response, &resource)?.into_artifact()
    }

    fn fetch_raw_bytes(&self, reference: &ResultReference) -> std::result::Result<Vec<u8>, ServiceError> {
        let resource = format!("payload of result {reference}");
        let url = self.endpoint(&["results", reference.as_str(), "raw"])?;
        let response = self.send(self.client.get(url), &resource)?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| transport_error(&e))
    }
}
