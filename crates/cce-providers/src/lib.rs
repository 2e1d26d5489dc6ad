//! Product-search provider contracts, the HTTP provider client, and a fixture-backed provider.

pub mod candidate;
pub mod detail;
pub mod fixture;
pub mod http;

use async_trait::async_trait;
use cce_core::SearchCandidate;
use cce_storage::FetchError;
use thiserror::Error;

pub use candidate::{DetailResponse, SearchItem, SearchResponse};
pub use detail::{extract_barcode, normalize_barcode, DetailTree, Scalar};
pub use fixture::{FixtureProvider, ProviderCall, ProviderScript};
pub use http::{HttpProviderConfig, HttpSearchProvider};

pub const CRATE_NAME: &str = "cce-providers";

/// Error-text vocabulary that marks billing/quota exhaustion.
const QUOTA_VOCABULARY: &[&str] = &["exceeded", "quota", "credit", "limit", "payment", "plan"];
/// Provider error text meaning "searched fine, found nothing".
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("provider error: {0}")]
    Transient(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ProviderError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, ProviderError::QuotaExhausted(_))
    }
}

pub fn looks_like_quota_exhaustion(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_VOCABULARY.iter().any(|w| lower.contains(w))
}

/// Classify a provider-reported error message.
pub fn classify_error_message(message: &str) -> ProviderError {
    if looks_like_quota_exhaustion(message) {
        ProviderError::QuotaExhausted(message.to_string())
    } else {
        ProviderError::Transient(message.to_string())
    }
}

fn is_no_results(message: &str) -> bool {
    message.to_lowercase().contains(NO_RESULTS_MARKER)
}

/// Decode a search response body into candidates, in provider ranking order.
pub fn parse_search_body(body: &[u8]) -> Result<Vec<SearchCandidate>, ProviderError> {
    let response: SearchResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if let Some(error) = response.error {
        if is_no_results(&error) {
            return Ok(Vec::new());
        }
        return Err(classify_error_message(&error));
    }
    Ok(response
        .products
        .unwrap_or_default()
        .into_iter()
        .map(SearchItem::into_candidate)
        .collect())
}

/// Decode a detail response body. A missing `product_results` is an empty tree, not an error.
pub fn parse_detail_body(body: &[u8]) -> Result<DetailTree, ProviderError> {
    let response: DetailResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if let Some(error) = response.error {
        if is_no_results(&error) {
            return Ok(DetailTree::default());
        }
        return Err(classify_error_message(&error));
    }
    Ok(response.product_results.map(DetailTree::from).unwrap_or_default())
}

/// Quota errors are often delivered with a 4xx status; read the error text out of the body.
pub(crate) fn classify_fetch_error(err: FetchError) -> ProviderError {
    let reported = err
        .body()
        .and_then(|body| serde_json::from_str::<SearchResponse>(body).ok())
        .and_then(|r| r.error);
    match reported {
        Some(message) => classify_error_message(&message),
        None => ProviderError::Fetch(err),
    }
}

/// A billed external product-search provider. Every call costs one credit.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn search(&self, term: &str, region: &str) -> Result<Vec<SearchCandidate>, ProviderError>;

    async fn detail(&self, numeric_id: u64, region: &str) -> Result<DetailTree, ProviderError>;
}
