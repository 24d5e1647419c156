use crate::error::Result;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub text: String,
    pub json: Option<Value>,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        let by_header = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html"));
        let head = self.text.trim_start().get(..15).unwrap_or("").to_ascii_lowercase();
        by_header || head.starts_with("<!doctype html") || head.starts_with("<html")
    }

    pub fn excerpt(&self) -> String {
        excerpt(&self.text)
    }
}

pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Thin HTTP client for probing one service.
#[derive(Debug, Clone)]
pub struct Prober {
    http: Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub async fn send(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<ProbeResponse> {
        let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        let json = serde_json::from_str(&text).ok();
        debug!(%method, url, status, "probe");
        Ok(ProbeResponse {
            status,
            content_type,
            text,
            json,
        })
    }
}
