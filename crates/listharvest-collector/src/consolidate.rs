//! Merge restored records and worker shards into the final dataset

use std::collections::BTreeMap;

use listharvest_core::SlotStatus;
use rustc_hash::FxHashSet;

use crate::record::ValidatedRecord;
use crate::session::CollectionSession;
use crate::state::{WorkerCounts, WorkerStatus};
use crate::stats::{NumericSummary, SessionStatistics};

const UNKNOWN_LOCATION: &str = "(unknown)";

/// Restored records first, then shards in worker order. A fingerprint seen
/// twice keeps its first record.
pub fn consolidate(session: &CollectionSession) -> (Vec<ValidatedRecord>, SessionStatistics) {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut records = Vec::new();
    let mut repeated = 0usize;

    let sources = std::iter::once(&session.restored).chain(session.shards.iter());
    for record in sources.flatten() {
        if seen.insert(record.fingerprint.as_str()) {
            records.push(record.clone());
        } else {
            repeated += 1;
            log::warn!(
                "Dropping repeated fingerprint {} ({})",
                record.fingerprint.get(..8).unwrap_or(record.fingerprint.as_str()),
                record.canonical_key
            );
        }
    }

    let mut totals = WorkerCounts::default();
    for w in &session.workers {
        totals.add(&w.counts);
    }

    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut locations: BTreeMap<String, usize> = BTreeMap::new();
    for r in &records {
        *categories.entry(r.category.to_lowercase()).or_default() += 1;
        let location = r
            .location
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
        *locations.entry(location).or_default() += 1;
    }

    let stats = SessionStatistics {
        session_id: session.session_id.clone(),
        stop_reason: session.stop_reason.to_string(),
        target_count: session.target_count,
        collected: records.len(),
        restored: session.restored.len(),
        rejected: totals.rejected,
        rejections: session.rejections.clone(),
        units_total: session.units.len(),
        units_done: session
            .units
            .iter()
            .filter(|u| u.status == SlotStatus::Done)
            .count(),
        units_abandoned: session.abandoned_units,
        workers_total: session.workers.len(),
        workers_failed: session
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Failed)
            .count(),
        totals,
        repeated_fingerprints: repeated,
        elapsed_secs: session.elapsed().as_secs_f64(),
        price: NumericSummary::from_values(records.iter().map(|r| r.price)),
        area: NumericSummary::from_values(records.iter().map(|r| r.area)),
        price_per_area: NumericSummary::from_values(records.iter().map(|r| r.price_per_area)),
        rooms: NumericSummary::from_values(records.iter().filter_map(|r| r.rooms.map(f64::from))),
        categories,
        locations,
    };
    (records, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{Deduplicator, SignaturePolicy};
    use crate::record::RawRecord;
    use crate::session::StopReason;
    use crate::state::{TargetSpec, WorkUnit, WorkerState};
    use crate::validator::{ValidationConfig, Validator};

    fn record(n: u64, location: Option<&str>, rooms: Option<u32>) -> ValidatedRecord {
        let v = Validator::new(ValidationConfig::default(), SignaturePolicy::default());
        v.validate(&RawRecord {
            price: Some(100_000.0 * n as f64),
            area: Some(50.0 * n as f64),
            category: Some(if n % 2 == 0 { "House" } else { "flat" }.into()),
            location: location.map(String::from),
            rooms,
            ..RawRecord::new(format!("https://c.example/l/{n}"))
        })
        .unwrap()
    }

    fn session(restored: Vec<ValidatedRecord>, shards: Vec<Vec<ValidatedRecord>>) -> CollectionSession {
        let now = chrono::Utc::now();
        let mut w0 = WorkerState::new(0);
        w0.counts.valid = shards.first().map_or(0, Vec::len);
        w0.counts.rejected = 3;
        w0.status = WorkerStatus::Done;
        let mut w1 = WorkerState::new(1);
        w1.counts.valid = shards.get(1).map_or(0, Vec::len);
        w1.status = WorkerStatus::Failed;
        let mut done = WorkUnit::new(0, TargetSpec::IdRange { start: 0, end: 5 }, 2);
        done.status = SlotStatus::Done;
        let mut lost = WorkUnit::new(1, TargetSpec::IdRange { start: 5, end: 9 }, 1);
        lost.status = SlotStatus::Abandoned;
        CollectionSession {
            session_id: "session-test".into(),
            started_at: now - chrono::Duration::seconds(4),
            finished_at: now,
            target_count: 10,
            units: vec![done, lost],
            dedup: Deduplicator::new(),
            shards,
            restored,
            workers: vec![w0, w1],
            rejections: BTreeMap::from([("out_of_range".to_string(), 3)]),
            failures: Vec::new(),
            abandoned_units: 1,
            stop_reason: StopReason::UnitsExhausted,
        }
    }

    #[test]
    fn merges_restored_first_and_drops_repeats() {
        let s = session(
            vec![record(1, Some("Lisbon"), Some(2))],
            vec![
                vec![record(2, Some("lisbon"), Some(3)), record(1, Some("Lisbon"), Some(2))],
                vec![record(3, None, None)],
            ],
        );
        let (records, stats) = consolidate(&s);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].canonical_key, "https://c.example/l/1");
        assert_eq!(stats.repeated_fingerprints, 1);
        assert_eq!(stats.collected, 3);
        assert_eq!(stats.restored, 1);
    }

    #[test]
    fn statistics_headlines_and_distributions() {
        let s = session(
            Vec::new(),
            vec![
                vec![record(1, Some("Lisbon"), Some(2)), record(2, Some("lisbon"), Some(4))],
                vec![record(3, None, None)],
            ],
        );
        let (_, stats) = consolidate(&s);
        assert_eq!(stats.stop_reason, "units_exhausted");
        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.units_done, 1);
        assert_eq!(stats.units_abandoned, 1);
        assert_eq!(stats.workers_failed, 1);
        assert_eq!(stats.categories.get("flat"), Some(&2));
        assert_eq!(stats.categories.get("house"), Some(&1));
        assert_eq!(stats.locations.get("lisbon"), Some(&2));
        assert_eq!(stats.locations.get(UNKNOWN_LOCATION), Some(&1));

        let price = stats.price.unwrap();
        assert_eq!(price.min, 100_000.0);
        assert_eq!(price.max, 300_000.0);
        assert!((price.mean - 200_000.0).abs() < 1e-6);
        let rooms = stats.rooms.unwrap();
        assert_eq!(rooms.count, 2);
        assert_eq!(rooms.mean, 3.0);
        assert!((stats.elapsed_secs - 4.0).abs() < 0.01);
    }

    #[test]
    fn edited_fingerprint_repeat_is_dropped() {
        let mut a = record(1, None, None);
        a.fingerprint = "€€€".into();
        let mut b = record(2, None, None);
        b.fingerprint = a.fingerprint.clone();
        let s = session(vec![a], vec![vec![b]]);
        let (records, stats) = consolidate(&s);
        assert_eq!(records.len(), 1);
        assert_eq!(stats.repeated_fingerprints, 1);
    }

    #[test]
    fn count_is_accepted_minus_cross_worker_duplicates() {
        let s = session(
            Vec::new(),
            vec![
                vec![record(1, None, None), record(2, None, None)],
                vec![record(2, None, None), record(3, None, None)],
            ],
        );
        let (records, stats) = consolidate(&s);
        let accepted: usize = s.shards.iter().map(Vec::len).sum();
        assert_eq!(records.len(), accepted - stats.repeated_fingerprints);
        assert_eq!(records.len(), 3);
    }
}
