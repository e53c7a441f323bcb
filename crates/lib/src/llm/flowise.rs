//! Prediction API client (Flowise-style `POST /api/v1/prediction/<flow-id>`).
//!
//! Both calls post `{question, streaming}` with a bearer token. The streaming call hands back
//! the raw response so the caller can read its body chunk by chunk.

use serde::Serialize;

/// Question sent by the connectivity probe.
pub const PROBE_QUESTION: &str = "Hello, this is a test message";

/// Client for the prediction endpoint.
#[derive(Clone)]
pub struct PredictionClient {
    url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("prediction request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("prediction api error: {status} {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("prediction api url is not configured")]
    MissingUrl,
}

/// Body of a non-streaming (probe) response: the raw text and its JSON form when it parses.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReply {
    pub text: String,
    pub json: Option<serde_json::Value>,
}

impl ProbeReply {
    fn from_text(text: String) -> Self {
        let json = serde_json::from_str(&text).ok();
        if json.is_none() {
            log::debug!("probe response is not JSON, keeping raw text");
        }
        Self { text, json }
    }

    /// Any text at all counts as a live endpoint.
    pub fn has_text(&self) -> bool {
        let json_text = self
            .json
            .as_ref()
            .and_then(|v| v.get("text"))
            .and_then(|t| t.as_str())
            .is_some_and(|t| !t.is_empty());
        json_text || !self.text.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    question: &'a str,
    streaming: bool,
}

impl PredictionClient {
    pub fn new(url: Option<String>, api_key: Option<String>) -> Self {
        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Self {
            url,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn post(&self, question: &str, streaming: bool) -> Result<reqwest::Response, ApiError> {
        let url = self.url.as_deref().ok_or(ApiError::MissingUrl)?;
        let body = PredictionRequest {
            question,
            streaming,
        };
        let mut req = self.client.post(url).json(&body);
        match &self.api_key {
            Some(key) => req = req.bearer_auth(key),
            None => log::warn!("no api key configured, sending unauthenticated request"),
        }
        let res = req.send().await?;
        log::debug!("prediction response status {}", res.status());
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(res)
    }

    /// Non-streaming probe request.
    pub async fn probe(&self) -> Result<ProbeReply, ApiError> {
        let res = self.post(PROBE_QUESTION, false).await?;
        let text = res.text().await?;
        Ok(ProbeReply::from_text(text))
    }

    /// Streaming request. The returned response has a 2xx status; read it with `bytes_stream()`.
    pub async fn open_stream(&self, question: &str) -> Result<reqwest::Response, ApiError> {
        self.post(question, true).await
    }
}
