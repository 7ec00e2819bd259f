use listharvest_core::{Outcome, RateLimitConfig, RateLimiter, WorkQueue};

#[divan::bench(args = [100, 10_000])]
fn limiter_mixed_outcomes(bencher: divan::Bencher, n: usize) {
    bencher.bench(|| {
        let mut rl = RateLimiter::new(RateLimitConfig::default(), 7);
        let mut total = std::time::Duration::ZERO;
        for i in 0..n {
            let outcome = if i % 5 == 0 {
                Outcome::Failure
            } else {
                Outcome::Success
            };
            total += rl.next_delay(outcome);
        }
        total
    });
}

#[divan::bench(args = [1_000, 100_000])]
fn queue_drain(bencher: divan::Bencher, n: usize) {
    bencher.bench(|| {
        let q = WorkQueue::new((0..n).collect::<Vec<_>>());
        let mut claimed = 0usize;
        while let Some((slot, _)) = q.claim(0) {
            q.complete(slot);
            claimed += 1;
        }
        claimed
    });
}

fn main() {
    divan::main();
}
