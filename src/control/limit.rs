use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Buckets untouched for this long are dropped by the sweeper.
pub const IDLE_AFTER: Duration = Duration::from_secs(120);

/// Token bucket state for one client address.
struct ClientBucket {
    limiter: DefaultDirectRateLimiter,
    last_seen: Mutex<Instant>,
}

/// Per-address admission control.
pub struct RateLimiter {
    clients: RwLock<HashMap<String, Arc<ClientBucket>>>,
    quota: Quota,
}

impl RateLimiter {
    /// `burst` requests up front, then one more every `refill`.
    pub fn new(burst: NonZeroU32, refill: Duration) -> Self {
        let quota = Quota::with_period(refill.max(Duration::from_millis(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self {
            clients: RwLock::new(HashMap::new()),
            quota,
        }
    }

    /// Consume one token for `addr`, creating its bucket on first sight.
    pub fn check_client(&self, addr: &str) -> bool {
        self.bucket(addr).limiter.check().is_ok()
    }

    fn bucket(&self, addr: &str) -> Arc<ClientBucket> {
        if let Some(bucket) = self.clients.read().get(addr) {
            *bucket.last_seen.lock() = Instant::now();
            return Arc::clone(bucket);
        }

        let mut clients = self.clients.write();
        let bucket = clients.entry(addr.to_string()).or_insert_with(|| {
            Arc::new(ClientBucket {
                limiter: Governor::direct(self.quota),
                last_seen: Mutex::new(Instant::now()),
            })
        });
        *bucket.last_seen.lock() = Instant::now();
        Arc::clone(bucket)
    }

    /// Drop every bucket idle for at least `idle_after`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, idle_after: Duration) -> usize {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, bucket| bucket.last_seen.lock().elapsed() < idle_after);
        before - clients.len()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.clients.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Start the background sweeper with the default cadence.
    pub fn start_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.start_cleanup_with(SWEEP_INTERVAL, IDLE_AFTER)
    }

    pub fn start_cleanup_with(
        self: &Arc<Self>,
        every: Duration,
        idle_after: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.evict_idle(idle_after);
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = limiter.len(), "Swept idle clients");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32, refill: Duration) -> RateLimiter {
        RateLimiter::new(NonZeroU32::new(burst).unwrap(), refill)
    }

    #[test]
    fn test_burst_then_deny() {
        let rl = limiter(3, Duration::from_secs(1));
        let admitted = (0..4).filter(|_| rl.check_client("10.0.0.1")).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_refill_admits_again() {
        let rl = limiter(3, Duration::from_secs(1));
        for _ in 0..4 {
            rl.check_client("10.0.0.1");
        }
        assert!(!rl.check_client("10.0.0.1"));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(rl.check_client("10.0.0.1"));
        assert!(!rl.check_client("10.0.0.1"));
    }

    #[test]
    fn test_clients_are_independent() {
        let rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check_client("10.0.0.1"));
        assert!(!rl.check_client("10.0.0.1"));
        assert!(rl.check_client("10.0.0.2"));
        assert_eq!(rl.len(), 2);
    }

    #[test]
    fn test_evict_idle_keeps_recent() {
        let rl = limiter(3, Duration::from_secs(1));
        rl.check_client("old");
        std::thread::sleep(Duration::from_millis(60));
        rl.check_client("new");

        assert_eq!(rl.evict_idle(Duration::from_millis(50)), 1);
        assert!(!rl.contains("old"));
        assert!(rl.contains("new"));
    }

    #[test]
    fn test_concurrent_first_requests_share_bucket() {
        let rl = Arc::new(limiter(5, Duration::from_secs(60)));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || rl.check_client("10.0.0.9"))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(rl.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_clients() {
        let rl = Arc::new(limiter(3, Duration::from_secs(1)));
        rl.check_client("10.0.0.1");
        let sweeper = rl.start_cleanup_with(Duration::from_millis(20), Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!rl.contains("10.0.0.1"));
        sweeper.abort();
    }
}
