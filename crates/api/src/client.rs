use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Read-only client for the safety endpoints of the placement backend.
#[derive(Clone)]
pub struct SafetyApiClient {
    http: Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl SafetyApiClient {
    /// Creates a new client rooted at `base_url` (e.g. `https://host/api/`).
    pub fn new(base_url: Url, http: Client, bearer_token: Option<String>) -> Self {
        Self {
            http,
            base_url,
            bearer_token,
        }
    }

    /// Fetches the family-facing status of a worker, including location and history.
    pub async fn family_status(
        &self,
        subject_id: &str,
    ) -> Result<FamilyStatusResponse, SafetyApiError> {
        let mut url = self.endpoint(&["safety", "family", subject_id, "status"])?;
        url.query_pairs_mut()
            .append_pair("includeLocation", "true")
            .append_pair("includeHistory", "true");

        let response = self.get(url).await?;
        parse_json(response).await
    }

    /// Fetches the current location and `days` of history for the map view.
    pub async fn worker_location(
        &self,
        subject_id: &str,
        days: u32,
    ) -> Result<WorkerLocationResponse, SafetyApiError> {
        let mut url = self.endpoint(&["safety", "worker", subject_id, "location"])?;
        url.query_pairs_mut()
            .append_pair("includeHistory", "true")
            .append_pair("days", &days.to_string());

        let response = self.get(url).await?;
        parse_json(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SafetyApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SafetyApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Response, SafetyApiError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }
}

/// Response of `GET /safety/family/{id}/status`.
///
/// Record-level fields stay raw so that a bad record is rejected on its own
/// instead of failing the whole response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FamilyStatusResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<ReportedStatus>,
    #[serde(default)]
    pub last_check_in: Option<Value>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default, deserialize_with = "records")]
    pub location_history: Vec<Value>,
}

/// Status as computed by the backend. Informational; the service derives its own.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedStatus {
    pub current: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_since_check_in: Option<f64>,
}

/// Response of `GET /safety/worker/{id}/location`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLocationResponse {
    #[serde(default)]
    pub current_location: Option<Value>,
    #[serde(default, deserialize_with = "records")]
    pub location_history: Vec<Value>,
    #[serde(default)]
    pub geo_fence_status: Option<Value>,
    #[serde(default)]
    pub stats: Option<Value>,
}

/// Accepts `null` or a non-array as an empty record list.
fn records<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

/// Decodes an informational block, yielding `None` when it does not match `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// Errors produced by the safety API client.
#[derive(Debug, Error)]
pub enum SafetyApiError {
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subject not found")]
    NotFound,
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl SafetyApiError {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "config",
            Self::Http(_) => "transport",
            Self::NotFound => "not_found",
            Self::Status { .. } => "status",
        }
    }
}

async fn parse_json<T>(response: Response) -> Result<T, SafetyApiError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(SafetyApiError::NotFound);
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(SafetyApiError::Status { status, body });
    }

    Ok(response.json().await?)
}
