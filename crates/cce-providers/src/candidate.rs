//! Search-result payloads and their conversion into [`SearchCandidate`]s.

use cce_core::SearchCandidate;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value as JsonValue;

const RETAILER_IMAGE_HOSTS: &[&str] = &["homedepot.com", "thdstatic.com"];
const API_LINK_HOST: &str = "apionline.homedepot.com";
const PUBLIC_LINK_HOST: &str = "www.homedepot.com";
const PREFERRED_THUMBNAIL_INDEX: usize = 4;

/// One `products[]` entry of a search response. Every field is optional and loosely typed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchItem {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub model_number: Option<String>,
    pub product_id: Option<JsonValue>,
    pub link: Option<String>,
    pub thumbnails: Option<Vec<Vec<String>>>,
    pub price: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub error: Option<String>,
    pub products: Option<Vec<SearchItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailResponse {
    pub error: Option<String>,
    pub product_results: Option<JsonValue>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_retailer_image_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    RETAILER_IMAGE_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
}

/// Upgrade retailer-hosted thumbnails (`.../145.jpg`) to the 1000px rendition.
pub fn upgrade_image_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    if !parsed.host_str().is_some_and(is_retailer_image_host) {
        return raw.to_string();
    }
    let path = parsed.path();
    let Some((dir, file)) = path.rsplit_once('/') else {
        return raw.to_string();
    };
    let Some(stem) = file.strip_suffix(".jpg") else {
        return raw.to_string();
    };
    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }
    let mut upgraded = parsed.clone();
    upgraded.set_path(&format!("{dir}/1000.jpg"));
    upgraded.set_query(None);
    upgraded.to_string()
}

/// Ordered image candidates from the first thumbnail row: index 4, else last, else first.
pub fn image_candidates(thumbnails: Option<&[Vec<String>]>) -> Vec<String> {
    let Some(row) = thumbnails.and_then(|rows| rows.first()) else {
        return Vec::new();
    };
    let picks = [row.get(PREFERRED_THUMBNAIL_INDEX), row.last(), row.first()];
    let mut out: Vec<String> = Vec::new();
    for pick in picks.into_iter().flatten() {
        let trimmed = pick.trim();
        if trimmed.is_empty() {
            continue;
        }
        let upgraded = upgrade_image_url(trimmed);
        if !out.contains(&upgraded) {
            out.push(upgraded);
        }
    }
    out
}

pub fn normalize_product_link(raw: Option<&str>) -> Option<String> {
    non_empty(raw).map(|link| link.replace(API_LINK_HOST, PUBLIC_LINK_HOST))
}

/// Price from a JSON number or a string such as `"$1,299.00"`; must be finite and positive.
pub fn parse_price(value: Option<&JsonValue>) -> Option<f64> {
    let parsed = match value? {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}

pub fn parse_numeric_id(value: Option<&JsonValue>) -> Option<u64> {
    match value? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}

impl SearchItem {
    pub fn into_candidate(self) -> SearchCandidate {
        SearchCandidate {
            title: non_empty(self.title.as_deref()),
            brand: non_empty(self.brand.as_deref()),
            model_number: non_empty(self.model_number.as_deref()),
            numeric_id: parse_numeric_id(self.product_id.as_ref()),
            image_candidates: image_candidates(self.thumbnails.as_deref()),
            price: parse_price(self.price.as_ref()),
            link: normalize_product_link(self.link.as_deref()),
            barcode: None,
        }
    }
}
