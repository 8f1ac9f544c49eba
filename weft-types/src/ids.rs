use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);
// per-process suffix so IDs from restarted processes cannot collide
static SUFFIX: Lazy<String> = Lazy::new(|| {
    let r: u32 = rand::thread_rng().gen();
    format!("{:08x}", r)
});

/// Mint an opaque correlation ID, unique for the process lifetime.
pub fn fresh_correlation_id() -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("corr-{}-{}", n, &*SUFFIX)
}
