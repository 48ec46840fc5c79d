use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{KnowledgeIndex, Passage};
use crate::Result;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Passage>,
}

/// Knowledge index reached over HTTP: `POST {query, top_k}` answered with
/// `{results: [{text, score}]}`.
#[derive(Clone, Debug)]
pub struct HttpKnowledgeIndex {
    client: Client,
    url: Url,
    auth_header: Option<HeaderValue>,
}

impl HttpKnowledgeIndex {
    /// # Errors
    /// Returns an error if the URL is invalid, the API key makes an invalid
    /// header, or the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)?;
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .build()?;
        let auth_header = api_key
            .filter(|key| !key.is_empty())
            .map(|key| HeaderValue::from_str(&format!("Bearer {key}")))
            .transpose()?;

        Ok(Self {
            client,
            url,
            auth_header,
        })
    }
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndex {
    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let mut request = self
            .client
            .post(self.url.clone())
            .json(&SearchRequest { query, top_k });
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let res = request.send().await?.error_for_status()?;
        let body: SearchResponse = res.json().await?;
        tracing::debug!(hits = body.results.len(), "Knowledge index answered");
        Ok(body.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_api_key_sends_no_auth() {
        let index = HttpKnowledgeIndex::new("http://127.0.0.1:9/search", Some(""), DEFAULT_TIMEOUT).unwrap();
        assert!(index.auth_header.is_none());
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(HttpKnowledgeIndex::new("not a url", None, DEFAULT_TIMEOUT).is_err());
    }

    #[test]
    fn response_without_results_is_empty() {
        let body: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(body.results.is_empty());
    }
}
