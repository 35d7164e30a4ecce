//! Gemini generateContent client

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::result::{Error, Result};
use crate::ports::LlmClient;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Blocking client for the Gemini REST API
pub struct GeminiClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::config(
                "Gemini API key not set (llm.apiKey or GEMINI_API_KEY)",
            ));
        }
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::config(format!("Invalid llm.baseUrl '{}': {}", base_url, e)))?;
        if !matches!(base.scheme(), "https" | "http") {
            return Err(Error::config("llm.baseUrl must be an http(s) URL"));
        }
        let endpoint = base
            .join(&format!("/v1beta/models/{}:generateContent", model))
            .map_err(|e| Error::config(format!("Invalid model name '{}': {}", model, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_request_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Classification(format!("Gemini request timed out after {}s", self.timeout_secs))
        } else if error.is_connect() {
            Error::Classification(format!(
                "Unable to connect to {}",
                self.endpoint.host_str().unwrap_or("Gemini")
            ))
        } else {
            Error::Classification(format!("Gemini request failed: {}", error))
        }
    }
}

impl LlmClient for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Classification(format!(
                "Gemini API error: HTTP {}: {}",
                status.as_u16(),
                body.chars().take(500).collect::<String>()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| Error::Classification(format!("Unreadable Gemini response: {}", e)))?;

        response_text(parsed)
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

fn response_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        Err(Error::Classification("Gemini returned no text".to_string()))
    } else {
        Ok(text)
    }
}
