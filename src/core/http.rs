// src/core/http.rs

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::core::error::{Result, ScanError};

/// The single seam through which every module talks to the outside world.
///
/// Transport failures and non-2xx responses come back as errors; modules decide
/// whether that fails the module or degrades to a fallback.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;

    async fn get_json(&self, url: &str) -> Result<Value> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| ScanError::Json {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// `reqwest`-backed fetcher used outside of tests.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                error!(error = %e, "Failed to build HTTP client");
                ScanError::Http {
                    url: String::new(),
                    message: format!("Failed to build HTTP client: {}", e),
                }
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url, "Sending GET request.");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url, error = %e, "HTTP request failed");
            ScanError::Http {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = %status, "Non-success HTTP status.");
            return Err(ScanError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ScanError::Http {
            url: url.to_string(),
            message: format!("Failed to read response body: {}", e),
        })?;
        debug!(url, bytes = body.len(), "Received response body.");
        Ok(body)
    }
}

/// Appends query parameters to `base`, percent-encoding them.
pub fn build_url(base: &str, params: &[(&str, &str)]) -> Result<String> {
    Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| ScanError::Http {
            url: base.to_string(),
            message: format!("Invalid URL: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_encodes_params() {
        let params = [("name", "_dmarc.example.com"), ("type", "TXT")];
        let url = build_url("https://dns.google/resolve", &params).unwrap();
        assert_eq!(url, "https://dns.google/resolve?name=_dmarc.example.com&type=TXT");
    }

    #[test]
    fn build_url_rejects_garbage_base() {
        assert!(build_url("not a url", &[]).is_err());
    }
}
