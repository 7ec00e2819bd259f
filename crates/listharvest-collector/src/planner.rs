//! Strategy planning: historical successes → prioritized work units
//!
//! Three tiers, in queue order:
//! 1. Dense identifier ranges (numeric-prefix clusters of past successes)
//! 2. Search queries over the configured value buckets × sorts × categories
//! 3. Exploration ranges just past the highest observed range

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::state::{QueryDescriptor, SortOrder, TargetSpec, ValueBucket, WorkUnit};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Leading digits kept when clustering identifiers
    pub prefix_digits: u32,
    /// Minimum successes for a range to count as dense
    pub min_successes: usize,
    pub exploration_ranges: usize,
    /// Dense width ≥ target × factor skips exploration
    pub coverage_factor: f64,
    /// Optional file of past successful identifiers
    pub history_file: Option<std::path::PathBuf>,
    pub query: QuerySpace,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            prefix_digits: 4,
            min_successes: 2,
            exploration_ranges: 2,
            coverage_factor: 3.0,
            history_file: None,
            query: QuerySpace::default(),
        }
    }
}

/// Search combinations for the query fallback tier
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySpace {
    pub buckets: Vec<ValueBucket>,
    pub sorts: Vec<SortOrder>,
    /// Empty = one unfiltered query per bucket and sort
    pub categories: Vec<String>,
    pub max_pages: u32,
}

impl Default for QuerySpace {
    fn default() -> Self {
        Self {
            buckets: vec![
                ValueBucket {
                    min: 0,
                    max: Some(150_000),
                },
                ValueBucket {
                    min: 150_000,
                    max: Some(400_000),
                },
                ValueBucket {
                    min: 400_000,
                    max: None,
                },
            ],
            sorts: vec![SortOrder::Newest],
            categories: Vec::new(),
            max_pages: 5,
        }
    }
}

/// Identifiers that produced a valid record in past sessions
#[derive(Debug, Clone, Default)]
pub struct SuccessHistory {
    ids: BTreeSet<u64>,
}

impl SuccessHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// One identifier per line; blank lines and `#` comments are ignored
    pub fn parse(content: &str) -> Self {
        let mut ids = BTreeSet::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<u64>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => log::warn!("history line {}: not an identifier: {line}", lineno + 1),
            }
        }
        Self { ids }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file: {}", path.display()))?;
        let history = Self::parse(&content);
        log::info!(
            "Loaded {} historical identifiers from {}",
            history.len(),
            path.display()
        );
        Ok(history)
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = u64>) {
        self.ids.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}

/// Identifier range sharing one numeric prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRange {
    pub start: u64,
    pub width: u64,
    pub successes: usize,
}

impl PrefixRange {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.width)
    }

    /// Denser first; ties prefer narrower, then lower start
    fn rank(&self, other: &Self) -> Ordering {
        let lhs = self.successes as u128 * other.width as u128;
        let rhs = other.successes as u128 * self.width as u128;
        rhs.cmp(&lhs)
            .then(self.width.cmp(&other.width))
            .then(self.start.cmp(&other.start))
    }
}

fn digit_count(id: u64) -> u32 {
    id.checked_ilog10().map_or(1, |l| l + 1)
}

/// Map an identifier to `(start, width)` of its prefix range
pub fn prefix_range(id: u64, prefix_digits: u32) -> (u64, u64) {
    let digits = digit_count(id);
    if digits <= prefix_digits {
        return (id, 1);
    }
    let width = 10u64.pow(digits - prefix_digits);
    (id / width * width, width)
}

/// Cluster identifiers by prefix, ranked by density
pub fn cluster(history: &SuccessHistory, prefix_digits: u32) -> Vec<PrefixRange> {
    let mut counts: BTreeMap<(u64, u64), usize> = BTreeMap::new();
    for id in history.ids() {
        *counts.entry(prefix_range(id, prefix_digits)).or_default() += 1;
    }
    let mut ranges: Vec<PrefixRange> = counts
        .into_iter()
        .map(|((start, width), successes)| PrefixRange {
            start,
            width,
            successes,
        })
        .collect();
    ranges.sort_by(PrefixRange::rank);
    ranges
}

/// Build the prioritized unit queue
pub fn generate(
    history: &SuccessHistory,
    config: &PlannerConfig,
    target_count: usize,
    max_units: usize,
) -> Vec<WorkUnit> {
    let ranges = cluster(history, config.prefix_digits.max(1));
    let dense: Vec<&PrefixRange> = ranges
        .iter()
        .filter(|r| r.successes >= config.min_successes.max(1))
        .collect();

    let mut targets: Vec<TargetSpec> = dense
        .iter()
        .map(|r| TargetSpec::IdRange {
            start: r.start,
            end: r.end(),
        })
        .collect();
    let dense_count = targets.len();

    targets.extend(query_targets(&config.query));
    let query_count = targets.len() - dense_count;

    let dense_width: u128 = dense.iter().map(|r| r.width as u128).sum();
    let wanted = (target_count as f64 * config.coverage_factor).ceil();
    let covered = dense_width as f64 >= wanted && !dense.is_empty();
    let mut exploration_count = 0;
    if covered {
        log::debug!("Dense ranges cover {dense_width} ids (≥ {wanted}); skipping exploration");
    } else if let Some(widest) = ranges.iter().map(|r| r.width).max() {
        let mut start = ranges.iter().map(PrefixRange::end).max().unwrap_or(0);
        for _ in 0..config.exploration_ranges {
            let end = start.saturating_add(widest);
            if end == start {
                break;
            }
            targets.push(TargetSpec::IdRange { start, end });
            exploration_count += 1;
            start = end;
        }
    }

    if targets.len() > max_units {
        log::debug!(
            "Discarding {} planned units beyond max_units={max_units}",
            targets.len() - max_units
        );
        targets.truncate(max_units);
    }

    let total = targets.len();
    let units: Vec<WorkUnit> = targets
        .into_iter()
        .enumerate()
        .map(|(id, target)| WorkUnit::new(id, target, (total - id) as u32))
        .collect();

    log::info!(
        "Planned {} units ({} dense, {} query, {} exploration) from {} historical ids",
        units.len(),
        dense_count.min(units.len()),
        query_count.min(units.len().saturating_sub(dense_count)),
        exploration_count.min(units.len().saturating_sub(dense_count + query_count)),
        history.len()
    );
    units
}

fn query_targets(space: &QuerySpace) -> Vec<TargetSpec> {
    let categories: Vec<String> = if space.categories.is_empty() {
        vec![String::new()]
    } else {
        space.categories.clone()
    };
    let mut out = Vec::new();
    if space.max_pages == 0 {
        return out;
    }
    for bucket in &space.buckets {
        for &sort in &space.sorts {
            for category in &categories {
                out.push(TargetSpec::Query(QueryDescriptor {
                    bucket: *bucket,
                    category: category.clone(),
                    sort,
                    max_pages: space.max_pages,
                }));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_queries() -> PlannerConfig {
        PlannerConfig {
            query: QuerySpace {
                buckets: Vec::new(),
                ..QuerySpace::default()
            },
            ..PlannerConfig::default()
        }
    }

    fn id_range(unit: &WorkUnit) -> (u64, u64) {
        match unit.target {
            TargetSpec::IdRange { start, end } => (start, end),
            TargetSpec::Query(_) => panic!("expected id range, got {unit}"),
        }
    }

    #[test]
    fn prefix_range_widths() {
        assert_eq!(prefix_range(12_345_678, 4), (12_340_000, 10_000));
        assert_eq!(prefix_range(123_456, 4), (123_400, 100));
        assert_eq!(prefix_range(1_234, 4), (1_234, 1));
        assert_eq!(prefix_range(7, 4), (7, 1));
    }

    #[test]
    fn denser_ranges_first() {
        // 3 successes in [12340000, +10000), 5 in [56780000, +10000)
        let mut ids = vec![12_340_001, 12_340_002, 12_340_003];
        ids.extend((0..5).map(|i| 56_780_000 + i));
        let ranges = cluster(&SuccessHistory::from_ids(ids), 4);
        assert_eq!(ranges[0].start, 56_780_000);
        assert_eq!(ranges[0].successes, 5);
        assert_eq!(ranges[1].start, 12_340_000);
    }

    #[test]
    fn density_ties_prefer_narrow_then_low() {
        // 2/100 vs 200/10000 have equal density; narrower wins
        let mut ids: Vec<u64> = vec![123_401, 123_402];
        ids.extend((0..200).map(|i| 98_760_000 + i));
        ids.extend([223_401, 223_402]);
        let ranges = cluster(&SuccessHistory::from_ids(ids), 4);
        assert_eq!(ranges[0].start, 123_400);
        assert_eq!(ranges[1].start, 223_400);
        assert_eq!(ranges[2].start, 98_760_000);
    }

    #[test]
    fn sparse_ranges_are_not_dense() {
        let history = SuccessHistory::from_ids([12_340_001, 12_340_002, 55_550_000]);
        let config = PlannerConfig {
            exploration_ranges: 0,
            ..no_queries()
        };
        let units = generate(&history, &config, 10, 100);
        assert_eq!(units.len(), 1);
        assert_eq!(id_range(&units[0]), (12_340_000, 12_350_000));
    }

    #[test]
    fn exploration_beyond_highest_range() {
        let history = SuccessHistory::from_ids([12_340_001, 12_340_002]);
        let config = PlannerConfig {
            exploration_ranges: 2,
            coverage_factor: 10.0,
            ..no_queries()
        };
        let units = generate(&history, &config, 10_000, 100);
        assert_eq!(units.len(), 3);
        assert_eq!(id_range(&units[1]), (12_350_000, 12_360_000));
        assert_eq!(id_range(&units[2]), (12_360_000, 12_370_000));
    }

    #[test]
    fn covered_target_skips_exploration() {
        let history = SuccessHistory::from_ids([12_340_001, 12_340_002]);
        let config = PlannerConfig {
            coverage_factor: 2.0,
            ..no_queries()
        };
        // 10000 ids of dense width ≥ 100 × 2
        let units = generate(&history, &config, 100, 100);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn query_fallback_combinations() {
        let config = PlannerConfig {
            query: QuerySpace {
                buckets: vec![
                    ValueBucket {
                        min: 0,
                        max: Some(10),
                    },
                    ValueBucket { min: 10, max: None },
                ],
                sorts: vec![SortOrder::Newest, SortOrder::PriceAsc],
                categories: vec!["flat".to_string(), "house".to_string()],
                max_pages: 3,
            },
            ..PlannerConfig::default()
        };
        let units = generate(&SuccessHistory::new(), &config, 10, 100);
        assert_eq!(units.len(), 8);
        assert!(units.iter().all(|u| matches!(
            &u.target,
            TargetSpec::Query(q) if q.max_pages == 3
        )));
    }

    #[test]
    fn capped_with_strictly_decreasing_priorities() {
        let ids = (0..50u64).flat_map(|p| [p * 10_000 + 10_000_000, p * 10_000 + 10_000_001]);
        let history = SuccessHistory::from_ids(ids);
        let units = generate(&history, &PlannerConfig::default(), 1_000_000, 20);
        assert_eq!(units.len(), 20);
        for (i, pair) in units.windows(2).enumerate() {
            assert!(pair[0].priority > pair[1].priority);
            assert_eq!(pair[0].id, i);
        }
        assert!(units.iter().all(|u| matches!(u.target, TargetSpec::IdRange { .. })));
    }

    #[test]
    fn empty_history_yields_queries_only() {
        let units = generate(&SuccessHistory::new(), &PlannerConfig::default(), 100, 100);
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|u| matches!(u.target, TargetSpec::Query(_))));
    }

    #[test]
    fn history_parse_skips_comments_and_garbage() {
        let history = SuccessHistory::parse("# seed\n123\n\n  456 \nabc\n123\n");
        assert_eq!(history.ids().collect::<Vec<_>>(), vec![123, 456]);
    }
}
