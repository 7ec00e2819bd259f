//! Listing records: raw extraction output and the validated form

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// One concrete target awaiting fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    /// Numeric catalog identifier from an identifier-range unit
    Identifier(u64),
    /// Listing reference (URL) discovered through a search page
    Listing(String),
}

impl Candidate {
    /// Stable key used in the processed-candidate set and checkpoints
    pub fn key(&self) -> String {
        match self {
            Self::Identifier(id) => format!("id:{id}"),
            Self::Listing(reference) => format!("ref:{}", canonical_key(reference)),
        }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identifier(id) => write!(f, "#{id}"),
            Self::Listing(reference) => f.write_str(reference),
        }
    }
}

/// Attributes as extracted from one page; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Canonical URL or catalog id of the listing
    pub source_ref: String,
    pub title: Option<String>,
    /// Primary value (asking price)
    pub price: Option<f64>,
    /// Secondary magnitude (surface area)
    pub area: Option<f64>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub rooms: Option<u32>,
    /// Attributes the core does not interpret
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl RawRecord {
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            fetched_at: chrono::Utc::now(),
            ..Default::default()
        }
    }
}

/// A record that passed validation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub source_ref: String,
    /// Normalized reference; primary uniqueness key
    pub canonical_key: String,
    /// blake3 of the canonical key
    pub fingerprint: String,
    /// Near-duplicate signature over stable attributes
    pub signature: String,
    pub title: Option<String>,
    pub price: f64,
    pub area: f64,
    pub price_per_area: f64,
    pub category: String,
    pub location: Option<String>,
    pub rooms: Option<u32>,
    pub extra: BTreeMap<String, String>,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl ValidatedRecord {
    /// Back to the raw form (for re-validation)
    pub fn to_raw(&self) -> RawRecord {
        RawRecord {
            source_ref: self.source_ref.clone(),
            title: self.title.clone(),
            price: Some(self.price),
            area: Some(self.area),
            category: Some(self.category.clone()),
            location: self.location.clone(),
            rooms: self.rooms,
            extra: self.extra.clone(),
            fetched_at: self.fetched_at,
        }
    }

    /// Trailing numeric identifier of the reference, if any
    pub fn numeric_id(&self) -> Option<u64> {
        trailing_number(&self.canonical_key)
    }
}

/// Normalize a listing reference.
///
/// URLs go through [`Url`]: scheme and host lowercased, default port and
/// dot segments removed. Query string, fragment and a trailing slash are
/// dropped. Anything that is not a URL with a host is only trimmed.
pub fn canonical_key(reference: &str) -> String {
    let trimmed = reference.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url,
        _ => return trimmed.to_string(),
    };
    url.set_query(None);
    url.set_fragment(None);
    let normalized = String::from(url);
    match normalized.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => normalized,
    }
}

/// Parse the digits at the end of a reference ("…/listing/12345" → 12345)
pub fn trailing_number(reference: &str) -> Option<u64> {
    let digits: String = reference
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_lowercases_scheme_and_host() {
        assert_eq!(
            canonical_key("HTTPS://Catalog.Example.COM/Listing/42"),
            "https://catalog.example.com/Listing/42"
        );
    }

    #[test]
    fn canonical_key_drops_query_fragment_and_slash() {
        assert_eq!(
            canonical_key("https://c.example/listing/42/?utm=x#photos"),
            "https://c.example/listing/42"
        );
    }

    #[test]
    fn canonical_key_equivalent_urls_collapse() {
        let expected = "https://catalog.example/listing/1";
        for reference in [
            "https://catalog.example:443/listing/1",
            "https://catalog.example/a/../listing/1",
            "https://CATALOG.example/./listing/1/",
            "https://catalog.example/listing/1?page=2#map",
        ] {
            assert_eq!(canonical_key(reference), expected, "{reference}");
        }
        assert_eq!(
            canonical_key("http://catalog.example:8080/listing/1"),
            "http://catalog.example:8080/listing/1"
        );
    }

    #[test]
    fn canonical_key_plain_id() {
        assert_eq!(canonical_key("  12345 "), "12345");
        assert_eq!(canonical_key("id:7"), "id:7");
    }

    #[test]
    fn candidate_keys() {
        assert_eq!(Candidate::Identifier(7).key(), "id:7");
        assert_eq!(
            Candidate::Listing("https://C.example/a/?x=1".to_string()).key(),
            "ref:https://c.example/a"
        );
    }

    #[test]
    fn trailing_number_parses() {
        assert_eq!(trailing_number("https://c.example/listing/12345"), Some(12345));
        assert_eq!(trailing_number("https://c.example/listing/abc"), None);
        assert_eq!(trailing_number("987"), Some(987));
    }
}
