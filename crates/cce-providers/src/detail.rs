//! Provider detail payloads as a generic tree, and the barcode extractor over it.

use serde_json::Value as JsonValue;

/// Keys checked directly on every object node, in priority order.
const DIRECT_BARCODE_KEYS: &[&str] = &["upc", "gtin12", "gtin13", "gtin14", "gtin", "barcode"];
/// Child keys whose subtree is searched before any other child.
const HINT_KEY_FRAGMENTS: &[&str] = &["upc", "gtin", "barcode"];

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    fn as_candidate_text(&self) -> Option<String> {
        match self {
            Scalar::Number(n) => Some(n.to_string()),
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Null | Scalar::Bool(_) => None,
        }
    }
}

/// Arbitrary nested provider payload. Object entries keep their source order.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailTree {
    Object(Vec<(String, DetailTree)>),
    Array(Vec<DetailTree>),
    Scalar(Scalar),
}

impl Default for DetailTree {
    fn default() -> Self {
        DetailTree::Scalar(Scalar::Null)
    }
}

impl From<JsonValue> for DetailTree {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => {
                DetailTree::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            JsonValue::Array(items) => DetailTree::Array(items.into_iter().map(Into::into).collect()),
            JsonValue::String(s) => DetailTree::Scalar(Scalar::Text(s)),
            JsonValue::Number(n) => DetailTree::Scalar(Scalar::Number(n)),
            JsonValue::Bool(b) => DetailTree::Scalar(Scalar::Bool(b)),
            JsonValue::Null => DetailTree::Scalar(Scalar::Null),
        }
    }
}

impl DetailTree {
    pub fn is_empty(&self) -> bool {
        match self {
            DetailTree::Object(entries) => entries.is_empty(),
            DetailTree::Array(items) => items.is_empty(),
            DetailTree::Scalar(s) => *s == Scalar::Null,
        }
    }

    fn get_ignore_case(&self, key: &str) -> Option<&DetailTree> {
        match self {
            DetailTree::Object(entries) => entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Digits-only form of `raw`, accepted only at a valid UPC-A / EAN-13 / GTIN-14 length.
pub fn normalize_barcode(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    matches!(digits.len(), 12..=14).then_some(digits)
}

fn is_hint_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    HINT_KEY_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// First valid barcode found in `tree`, or `None`. Never fails on odd shapes.
pub fn extract_barcode(tree: &DetailTree) -> Option<String> {
    match tree {
        DetailTree::Scalar(_) => None,
        DetailTree::Array(items) => items.iter().find_map(extract_barcode),
        DetailTree::Object(entries) => {
            for key in DIRECT_BARCODE_KEYS {
                if let Some(DetailTree::Scalar(scalar)) = tree.get_ignore_case(key) {
                    if let Some(hit) = scalar.as_candidate_text().as_deref().and_then(normalize_barcode) {
                        return Some(hit);
                    }
                }
            }

            let (hinted, rest): (Vec<_>, Vec<_>) = entries.iter().partition(|(k, _)| is_hint_key(k));
            hinted
                .iter()
                .find_map(|(_, child)| match child {
                    DetailTree::Scalar(scalar) => {
                        scalar.as_candidate_text().as_deref().and_then(normalize_barcode)
                    }
                    nested => extract_barcode(nested),
                })
                .or_else(|| rest.iter().find_map(|(_, child)| extract_barcode(child)))
        }
    }
}
