use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::TransposeError;

/// Reads the raw bytes behind a source URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, TransposeError>> + Send;
}

impl<T: Fetcher> Fetcher for Arc<T> {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, TransposeError>> + Send {
        (**self).fetch(url)
    }
}

pub async fn fetch_json<F: Fetcher>(
    fetcher: &F,
    dataset: &str,
    url: &str,
) -> Result<Value, TransposeError> {
    let bytes = fetcher.fetch(url).await?;
    serde_json::from_slice(&bytes).map_err(|err| TransposeError::MalformedSource {
        dataset: dataset.to_string(),
        message: format!("{url}: {err}"),
    })
}

pub fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Fetches `http(s)` URLs over the network and anything else from disk.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, TransposeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ensemble-transposer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TransposeError::FetchHttp {
                    url: String::new(),
                    message: err.to_string(),
                })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| TransposeError::FetchHttp {
                url: String::new(),
                message: err.to_string(),
            })?;

        Ok(Self { client })
    }

    async fn handle_status(url: &str, response: Response) -> Result<Response, TransposeError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "request failed".to_string());
        Err(TransposeError::FetchStatus {
            url: url.to_string(),
            status,
            message,
        })
    }

    async fn send_with_retries(&self, url: &str) -> Result<Response, TransposeError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(url, status, attempt, "retrying request");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        warn!(url, error = %err, attempt, "retrying request");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(TransposeError::FetchHttp {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, TransposeError> {
        let response = self.send_with_retries(url).await?;
        let response = Self::handle_status(url, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| TransposeError::FetchHttp {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransposeError> {
        let started = Instant::now();
        let bytes = if is_remote(url) {
            self.fetch_remote(url).await?
        } else {
            debug!(path = url, "reading local source");
            tokio::fs::read(url)
                .await
                .map_err(|err| TransposeError::FetchFile {
                    path: url.to_string(),
                    message: err.to_string(),
                })?
        };
        info!(
            url,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched source"
        );
        Ok(bytes)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
