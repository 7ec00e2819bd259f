use listharvest_collector::{Deduplicator, RawRecord, SignaturePolicy, ValidationConfig, Validator};

fn raw_records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| RawRecord {
            price: Some(80_000.0 + (i % 5_000) as f64 * 250.0),
            area: Some(30.0 + (i % 120) as f64),
            category: Some(if i % 3 == 0 { "house" } else { "flat" }.to_string()),
            location: Some(format!("district-{}", i % 40)),
            rooms: Some((i % 5) as u32 + 1),
            ..RawRecord::new(format!("https://catalog.example/listing/{}", i % (n / 2 + 1)))
        })
        .collect()
}

/// Validate + dedup, the per-candidate hot path after extraction
#[divan::bench(args = [1_000, 50_000])]
fn validate_and_insert(bencher: divan::Bencher, n: usize) {
    let records = raw_records(n);
    let validator = Validator::new(ValidationConfig::default(), SignaturePolicy::default());
    bencher.bench(|| {
        let dedup = Deduplicator::new();
        for raw in &records {
            if let Ok(v) = validator.validate(raw) {
                dedup.try_insert(&v.canonical_key, &v.signature);
            }
        }
        dedup.accepted()
    });
}

#[divan::bench(args = [1_000, 50_000])]
fn processed_lookup(bencher: divan::Bencher, n: usize) {
    let dedup = Deduplicator::new();
    dedup.preload_processed((0..n).map(|i| format!("id:{i}")));
    let lookups: Vec<String> = (0..n).map(|i| format!("id:{}", i * 2)).collect();
    bencher.bench(|| lookups.iter().filter(|k| dedup.was_processed(k)).count());
}

fn main() {
    divan::main();
}
