//! Session-wide uniqueness gate shared by all workers
//!
//! One mutex guards three sets: canonical keys, near-duplicate signatures
//! and processed candidate keys. Key and signature are checked and inserted
//! under the same lock, so of two workers racing on the same listing exactly
//! one wins.

use std::sync::Mutex;

use listharvest_core::hash;
use rustc_hash::FxHashSet;
use serde::Deserialize;

/// How the near-duplicate signature is built
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignaturePolicy {
    /// Disabled = exact canonical-key dedup only
    pub enabled: bool,
    /// Price rounding step
    pub price_bucket: f64,
    /// Area rounding step
    pub area_bucket: f64,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            price_bucket: 1_000.0,
            area_bucket: 1.0,
        }
    }
}

impl SignaturePolicy {
    /// blake3 over category, location, rooms and bucketed area/price.
    ///
    /// Returns an empty string when the policy is disabled.
    pub fn signature(
        &self,
        category: &str,
        location: Option<&str>,
        area: f64,
        price: f64,
        rooms: Option<u32>,
    ) -> String {
        if !self.enabled {
            return String::new();
        }
        let category = category.trim().to_lowercase();
        let location = location.unwrap_or_default().trim().to_lowercase();
        let rooms = rooms.map(|r| r.to_string()).unwrap_or_default();
        let area = bucket(area, self.area_bucket).to_string();
        let price = bucket(price, self.price_bucket).to_string();
        hash::hash_parts([
            category.as_str(),
            location.as_str(),
            rooms.as_str(),
            area.as_str(),
            price.as_str(),
        ])
        .to_hex()
        .to_string()
    }
}

fn bucket(value: f64, step: f64) -> i64 {
    if step > 0.0 {
        (value / step).round() as i64
    } else {
        value.round() as i64
    }
}

/// Result of [`Deduplicator::check_insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateKey,
    NearDuplicate,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        self == Self::Inserted
    }
}

#[derive(Default)]
struct Seen {
    keys: FxHashSet<String>,
    signatures: FxHashSet<String>,
    processed: FxHashSet<String>,
}

/// Thread-safe dedup state
#[derive(Default)]
pub struct Deduplicator {
    inner: Mutex<Seen>,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seen = self.lock();
        f.debug_struct("Deduplicator")
            .field("keys", &seen.keys.len())
            .field("signatures", &seen.signatures.len())
            .field("processed", &seen.processed.len())
            .finish()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if neither the key nor the signature was seen before
    pub fn try_insert(&self, canonical_key: &str, signature: &str) -> bool {
        self.check_insert(canonical_key, signature).is_inserted()
    }

    /// Compare-and-set on both sets. An empty signature is never compared.
    pub fn check_insert(&self, canonical_key: &str, signature: &str) -> InsertOutcome {
        let mut seen = self.lock();
        if seen.keys.contains(canonical_key) {
            return InsertOutcome::DuplicateKey;
        }
        if !signature.is_empty() && seen.signatures.contains(signature) {
            return InsertOutcome::NearDuplicate;
        }
        seen.keys.insert(canonical_key.to_string());
        if !signature.is_empty() {
            seen.signatures.insert(signature.to_string());
        }
        InsertOutcome::Inserted
    }

    /// Number of accepted records
    pub fn accepted(&self) -> usize {
        self.lock().keys.len()
    }

    /// Record that a candidate was fully handled (valid, rejected or skipped)
    pub fn mark_processed(&self, candidate_key: &str) {
        self.lock().processed.insert(candidate_key.to_string());
    }

    pub fn was_processed(&self, candidate_key: &str) -> bool {
        self.lock().processed.contains(candidate_key)
    }

    /// Seed the processed set from restored checkpoints
    pub fn preload_processed<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = self.lock();
        seen.processed.extend(keys.into_iter().map(Into::into));
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Seen> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
