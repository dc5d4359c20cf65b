use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Recognised options for outbound HTTP requests
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    /// Extra attempts after a transport failure or 5xx response, GET only
    pub retries: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            headers: vec![],
            retries: 2,
        }
    }
}

/// JSON-over-HTTP client bound to one base URL
#[derive(Clone)]
pub struct JsonClient {
    client: Client,
    base_url: String,
    retries: u32,
}

impl JsonClient {
    pub fn new(base_url: &str, options: &RequestOptions) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Config(format!("invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Config(format!("invalid header value for {}: {}", name, e)))?;
            headers.insert(header, value);
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retries: options.retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = self.url(path);
        self.send(&url, self.retries, || self.client.get(&url).query(query)).await
    }

    /// Sent exactly once: a POST may have reached the server even when the
    /// response is lost
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        self.send(&url, 0, || self.client.post(&url).json(body)).await
    }

    async fn send<T, F>(&self, url: &str, retries: u32, build: F) -> AppResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            debug!(url, attempt, "querying");
            let result = build().send().await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if retryable && attempt < retries {
                attempt += 1;
                warn!(url, attempt, "⚠️ Request failed, retrying");
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                continue;
            }

            let response = result?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::ExternalError(format!(
                    "{} returned {}: {}",
                    url, status, body
                )));
            }
            return Ok(response.json::<T>().await?);
        }
    }
}
