//! Schema and range validation: the single RawRecord → ValidatedRecord boundary

use listharvest_core::hash;
use serde::Deserialize;

use crate::dedup::SignaturePolicy;
use crate::record::{RawRecord, ValidatedRecord, canonical_key};

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Validation ranges and allowed category sets
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub price: Bounds,
    pub area: Bounds,
    pub price_per_area: Bounds,
    /// Allowed categories (case-insensitive); empty = any
    pub categories: Vec<String>,
    /// Strict location filter (case-insensitive); unset = any
    pub locations: Option<Vec<String>>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            price: Bounds::new(1_000.0, 50_000_000.0),
            area: Bounds::new(5.0, 10_000.0),
            price_per_area: Bounds::new(50.0, 100_000.0),
            categories: Vec::new(),
            locations: None,
        }
    }
}

impl ValidationConfig {
    pub fn check_bounds(&self) -> anyhow::Result<()> {
        for (name, b) in [
            ("price", self.price),
            ("area", self.area),
            ("price_per_area", self.price_per_area),
        ] {
            anyhow::ensure!(
                b.min.is_finite() && b.max.is_finite() && b.min <= b.max,
                "validation.{name}: min must not exceed max"
            );
        }
        anyhow::ensure!(self.area.min > 0.0, "validation.area.min must be positive");
        Ok(())
    }
}

/// Why a record was rejected. Expected business outcome, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    MissingField(&'static str),
    OutOfRange { field: &'static str, value: f64 },
    CategoryNotAllowed(String),
    LocationFiltered(Option<String>),
}

impl RejectionReason {
    /// Short label for statistics
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::OutOfRange { .. } => "out_of_range",
            Self::CategoryNotAllowed(_) => "category",
            Self::LocationFiltered(_) => "location",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::OutOfRange { field, value } => write!(f, "{field} out of range: {value}"),
            Self::CategoryNotAllowed(c) => write!(f, "category not allowed: {c}"),
            Self::LocationFiltered(Some(l)) => write!(f, "location filtered: {l}"),
            Self::LocationFiltered(None) => f.write_str("location required by filter"),
        }
    }
}

impl std::error::Error for RejectionReason {}

/// Pure, idempotent validator shared by all workers
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    signature: SignaturePolicy,
    categories: Vec<String>,
    locations: Option<Vec<String>>,
}

impl Validator {
    pub fn new(config: ValidationConfig, signature: SignaturePolicy) -> Self {
        let categories = config.categories.iter().map(|c| normalize(c)).collect();
        let locations = config
            .locations
            .as_ref()
            .map(|ls| ls.iter().map(|l| normalize(l)).collect());
        Self {
            config,
            signature,
            categories,
            locations,
        }
    }

    /// Run all checks in order, stopping at the first failure
    pub fn validate(&self, raw: &RawRecord) -> Result<ValidatedRecord, RejectionReason> {
        let source_ref = raw.source_ref.trim();
        if source_ref.is_empty() {
            return Err(RejectionReason::MissingField("source_ref"));
        }
        let price = raw.price.ok_or(RejectionReason::MissingField("price"))?;
        let area = raw.area.ok_or(RejectionReason::MissingField("area"))?;
        let category = raw
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(RejectionReason::MissingField("category"))?;

        check_range("price", price, self.config.price)?;
        check_range("area", area, self.config.area)?;
        let price_per_area = price / area;
        check_range("price_per_area", price_per_area, self.config.price_per_area)?;

        if !self.categories.is_empty() && !self.categories.contains(&normalize(category)) {
            return Err(RejectionReason::CategoryNotAllowed(category.to_string()));
        }

        let location = raw
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        if let Some(allowed) = &self.locations {
            match location {
                Some(l) if allowed.contains(&normalize(l)) => {}
                other => return Err(RejectionReason::LocationFiltered(other.map(String::from))),
            }
        }

        let canonical = canonical_key(source_ref);
        let fingerprint = hash::hash_bytes(canonical.as_bytes()).to_hex().to_string();
        let location = location.map(String::from);
        let signature = self
            .signature
            .signature(category, location.as_deref(), area, price, raw.rooms);

        Ok(ValidatedRecord {
            source_ref: source_ref.to_string(),
            canonical_key: canonical,
            fingerprint,
            signature,
            title: raw.title.clone(),
            price,
            area,
            price_per_area,
            category: category.to_string(),
            location,
            rooms: raw.rooms,
            extra: raw.extra.clone(),
            fetched_at: raw.fetched_at,
        })
    }
}

fn check_range(field: &'static str, value: f64, bounds: Bounds) -> Result<(), RejectionReason> {
    if bounds.contains(value) {
        Ok(())
    } else {
        Err(RejectionReason::OutOfRange { field, value })
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}
