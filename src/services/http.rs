// src/services/http.rs

//! Reference HTTP adapters for the fetch and classify boundaries.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{AppError, FetchError, Result};
use crate::models::{Classification, ClassifierConfig, FetcherConfig, ProxyConfig, Record};
use crate::services::{Classifier, RecordFetcher, RotationToken};

/// Turns a fetched page into a [`Record`].
///
/// Site-specific field extraction lives behind this trait.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, id: &str, body: &str) -> std::result::Result<Record, FetchError>;
}

/// Extractor for upstreams that already answer with a record as JSON.
///
/// A missing `id` is filled in from the requested id.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl PageExtractor for JsonExtractor {
    fn extract(&self, id: &str, body: &str) -> std::result::Result<Record, FetchError> {
        let mut value: Value = serde_json::from_str(body)
            .map_err(|e| FetchError::transient(format!("unparseable body: {e}")))?;
        let Some(object) = value.as_object_mut() else {
            return Err(FetchError::transient("body is not a JSON object"));
        };
        object
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));

        serde_json::from_value(value)
            .map_err(|e| FetchError::transient(format!("invalid record: {e}")))
    }
}

/// [`RecordFetcher`] over `reqwest`.
///
/// Response classification:
/// - 403 / 429, a body shorter than `min_body_bytes`, or a block marker
///   in the body: blocked
/// - 5xx and network errors: transient
/// - other 4xx: permanent
pub struct HttpFetcher<E> {
    url_template: String,
    user_agent: String,
    headers: HeaderMap,
    timeout: Duration,
    min_body_bytes: usize,
    block_pattern: Option<Regex>,
    proxy: Option<ProxyConfig>,
    /// Shared client used when no rotating proxy is configured
    client: Client,
    extractor: E,
}

impl<E: PageExtractor> HttpFetcher<E> {
    pub fn new(config: &FetcherConfig, extractor: E) -> Result<Self> {
        // Fail early on a template that cannot form a URL
        url::Url::parse(&config.url_template.replace("{id}", "0"))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::config(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::config(format!("header value for '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let block_pattern = build_block_pattern(&config.block_markers)?;
        let client = client_builder(&config.user_agent, &headers, config.timeout()).build()?;

        Ok(Self {
            url_template: config.url_template.clone(),
            user_agent: config.user_agent.clone(),
            headers,
            timeout: config.timeout(),
            min_body_bytes: config.min_body_bytes,
            block_pattern,
            proxy: config.proxy.clone(),
            client,
            extractor,
        })
    }

    /// URL for one record.
    pub fn url_for(&self, id: &str) -> String {
        self.url_template.replace("{id}", id)
    }

    /// Client whose proxy session is bound to `token`.
    fn rotating_client(&self, proxy: &ProxyConfig, token: &RotationToken) -> Result<Client> {
        let mut rotating = reqwest::Proxy::all(&proxy.url)?;
        if let Some(username) = &proxy.username {
            let session = proxy.session_suffix.replace("{token}", token.as_str());
            rotating = rotating.basic_auth(
                &format!("{username}{session}"),
                proxy.password.as_deref().unwrap_or_default(),
            );
        }
        Ok(client_builder(&self.user_agent, &self.headers, self.timeout)
            .proxy(rotating)
            .build()?)
    }

    /// Classify a received page before extraction.
    fn check_page(&self, status: StatusCode, body: &str) -> std::result::Result<(), FetchError> {
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::blocked(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(FetchError::transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(FetchError::permanent(format!("HTTP {status}")));
        }
        if body.len() < self.min_body_bytes {
            return Err(FetchError::blocked(format!(
                "response too small ({} bytes)",
                body.len()
            )));
        }
        if let Some(found) = self.block_pattern.as_ref().and_then(|re| re.find(body)) {
            return Err(FetchError::blocked(format!(
                "block marker '{}' in page",
                found.as_str()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: PageExtractor> RecordFetcher for HttpFetcher<E> {
    async fn fetch(&self, id: &str, token: &RotationToken) -> std::result::Result<Record, FetchError> {
        let client = match &self.proxy {
            Some(proxy) => self
                .rotating_client(proxy, token)
                .map_err(|e| FetchError::transient(format!("client setup: {e}")))?,
            None => self.client.clone(),
        };

        let url = self.url_for(id);
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(FetchError::transient)?;
        let status = response.status();
        let body = response.text().await.map_err(FetchError::transient)?;

        self.check_page(status, &body)?;
        self.extractor.extract(id, &body)
    }
}

fn client_builder(user_agent: &str, headers: &HeaderMap, timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers.clone())
        .timeout(timeout)
}

/// One case-insensitive alternation over the literal markers.
fn build_block_pattern(markers: &[String]) -> Result<Option<Regex>> {
    let escaped: Vec<String> = markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return Ok(None);
    }
    Ok(Some(Regex::new(&format!("(?i){}", escaped.join("|")))?))
}

/// [`Classifier`] that posts text to an HTTP endpoint.
///
/// The endpoint receives `{"text": ...}` and answers with
/// `{"label": ..., "metadata": {...}}`.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    endpoint: String,
    client: Client,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig, timeout: Duration) -> Result<Self> {
        url::Url::parse(&config.endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> std::result::Result<Classification, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(FetchError::transient)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::transient(format!("classifier HTTP {status}")));
        }
        response
            .json::<Classification>()
            .await
            .map_err(FetchError::transient)
    }
}
