//! Fixture-backed provider: replays recorded response bodies and logs every billed call.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cce_core::SearchCandidate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::{parse_detail_body, parse_search_body, DetailTree, ProviderError, SearchProvider};

const EMPTY_SEARCH: &str = r#"{"products": []}"#;

/// Recorded provider bodies keyed by search term / numeric id.
///
/// A body that is a JSON string is replayed verbatim as raw bytes, which lets a
/// fixture simulate a non-JSON (malformed) response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderScript {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub searches: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub details: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Search { term: String, region: String },
    Detail { numeric_id: u64, region: String },
}

#[derive(Debug, Default)]
pub struct FixtureProvider {
    script: ProviderScript,
    calls: Mutex<Vec<ProviderCall>>,
}

impl FixtureProvider {
    pub fn new(script: ProviderScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let script: ProviderScript =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(script))
    }

    pub fn with_search(mut self, term: impl Into<String>, body: JsonValue) -> Self {
        self.script.searches.insert(term.into(), body);
        self
    }

    pub fn with_detail(mut self, numeric_id: u64, body: JsonValue) -> Self {
        self.script.details.insert(numeric_id.to_string(), body);
        self
    }

    pub fn scenario(&self) -> &str {
        &self.script.scenario
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    fn body_bytes(body: &JsonValue) -> Vec<u8> {
        match body {
            JsonValue::String(raw) => raw.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }
}

#[async_trait]
impl SearchProvider for FixtureProvider {
    fn provider_id(&self) -> &str {
        "fixture"
    }

    async fn search(&self, term: &str, region: &str) -> Result<Vec<SearchCandidate>, ProviderError> {
        self.calls.lock().await.push(ProviderCall::Search {
            term: term.to_string(),
            region: region.to_string(),
        });
        match self.script.searches.get(term) {
            Some(body) => parse_search_body(&Self::body_bytes(body)),
            None => parse_search_body(EMPTY_SEARCH.as_bytes()),
        }
    }

    async fn detail(&self, numeric_id: u64, region: &str) -> Result<DetailTree, ProviderError> {
        self.calls.lock().await.push(ProviderCall::Detail {
            numeric_id,
            region: region.to_string(),
        });
        match self.script.details.get(&numeric_id.to_string()) {
            Some(body) => parse_detail_body(&Self::body_bytes(body)),
            None => Ok(DetailTree::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_scripted_bodies_and_logs_calls() {
        let provider = FixtureProvider::default()
            .with_search("204518", json!({"products": [{"title": "Everbilt Satin Nickel Door Hinge"}]}))
            .with_search("broken", json!("<html>gateway timeout</html>"))
            .with_detail(7, json!({"product_results": {"upc": "012345678905"}}));

        let results = provider.search("204518", "30303").await.unwrap();
        assert_eq!(results[0].title.as_deref(), Some("Everbilt Satin Nickel Door Hinge"));
        assert!(provider.search("unknown", "30303").await.unwrap().is_empty());
        assert!(matches!(
            provider.search("broken", "30303").await,
            Err(ProviderError::Malformed(_))
        ));
        assert!(!provider.detail(7, "30303").await.unwrap().is_empty());

        let calls = provider.calls().await;
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[3],
            ProviderCall::Detail {
                numeric_id: 7,
                region: "30303".into()
            }
        );
    }
}
