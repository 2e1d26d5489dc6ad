use async_trait::async_trait;
use cce_core::SearchCandidate;
use cce_storage::{HttpFetcher, ResponseArchive};
use chrono::Utc;
use reqwest::Url;
use tracing::{debug, warn};

use crate::{classify_fetch_error, parse_detail_body, parse_search_body, DetailTree, ProviderError, SearchProvider};

const PROVIDER_ID: &str = "serpapi-home-depot";

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub search_engine: String,
    pub detail_engine: String,
}

/// Search/detail client for a SerpApi-style JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpSearchProvider {
    config: HttpProviderConfig,
    fetcher: HttpFetcher,
    archive: Option<ResponseArchive>,
}

impl HttpSearchProvider {
    pub fn new(config: HttpProviderConfig, fetcher: HttpFetcher) -> Self {
        Self {
            config,
            fetcher,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: ResponseArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    fn request_url(&self, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ProviderError::Malformed(format!("provider base url: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().copied())
            .append_pair("api_key", &self.config.api_key);
        Ok(url)
    }

    async fn call(&self, call_kind: &str, url: Url) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .fetcher
            .fetch_bytes(PROVIDER_ID, url)
            .await
            .map_err(classify_fetch_error)?;

        if let Some(archive) = &self.archive {
            match archive
                .store_response(Utc::now(), PROVIDER_ID, call_kind, &response.body)
                .await
            {
                Ok(stored) => debug!(
                    call_kind,
                    path = %stored.relative_path.display(),
                    deduplicated = stored.deduplicated,
                    "archived provider response"
                ),
                Err(err) => warn!(call_kind, error = %err, "failed to archive provider response"),
            }
        }
        Ok(response.body)
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn search(&self, term: &str, region: &str) -> Result<Vec<SearchCandidate>, ProviderError> {
        let url = self.request_url(&[
            ("engine", self.config.search_engine.as_str()),
            ("q", term),
            ("delivery_zip", region),
        ])?;
        let body = self.call("search", url).await?;
        parse_search_body(&body)
    }

    async fn detail(&self, numeric_id: u64, region: &str) -> Result<DetailTree, ProviderError> {
        let product_id = numeric_id.to_string();
        let url = self.request_url(&[
            ("engine", self.config.detail_engine.as_str()),
            ("product_id", product_id.as_str()),
            ("delivery_zip", region),
        ])?;
        let body = self.call("detail", url).await?;
        parse_detail_body(&body)
    }
}
