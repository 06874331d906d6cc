//! Visitor registries for the two limiter tiers.
//!
//! Each registry maps a key to a visitor (bucket + last-seen timestamp)
//! behind a single mutex, so get-or-create is one critical section and a
//! racing first request can never mint two buckets for the same key —
//! duplicate buckets would silently hand out a second burst budget.
//!
//! The bucket itself is independently synchronized; callers evaluate it
//! after the registry lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::bucket::TokenBucket;

#[derive(Debug)]
struct Visitor {
    bucket: Arc<TokenBucket>,
    last_seen: Instant,
}

impl Visitor {
    fn new(rate_per_minute: f64, burst: u32) -> Self {
        Self {
            bucket: Arc::new(TokenBucket::new(rate_per_minute, burst)),
            last_seen: Instant::now(),
        }
    }

    fn stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Global tier: one visitor per client identity.
#[derive(Debug)]
pub struct ClientRegistry {
    rate_per_minute: f64,
    burst: u32,
    visitors: Mutex<HashMap<String, Visitor>>,
}

impl ClientRegistry {
    /// Registry whose new buckets grant `rate_per_minute`/`burst`.
    pub fn new(rate_per_minute: f64, burst: u32) -> Self {
        Self { rate_per_minute, burst, visitors: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        self.visitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get-or-create the bucket for `client`, refreshing its last-seen
    /// timestamp. Single critical section.
    pub fn bucket_for(&self, client: &str) -> Arc<TokenBucket> {
        let mut visitors = self.lock();
        if let Some(visitor) = visitors.get_mut(client) {
            visitor.last_seen = Instant::now();
            return Arc::clone(&visitor.bucket);
        }
        let visitor = Visitor::new(self.rate_per_minute, self.burst);
        let bucket = Arc::clone(&visitor.bucket);
        visitors.insert(client.to_owned(), visitor);
        bucket
    }

    /// Evict every visitor idle for longer than `timeout`. Returns the
    /// number of entries removed. Holds the registry lock for the scan.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut visitors = self.lock();
        let before = visitors.len();
        visitors.retain(|_, v| !v.stale(now, timeout));
        let evicted = before - visitors.len();
        if evicted > 0 {
            debug!(target: "turnstile::registry", evicted, "evicted idle clients");
        }
        evicted
    }

    /// Number of live visitors.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no visitor is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `client` currently has a visitor.
    pub fn contains(&self, client: &str) -> bool {
        self.lock().contains_key(client)
    }

    /// Drop every visitor. Test isolation hook.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Last-seen timestamp for `client`, if registered.
    pub fn last_seen(&self, client: &str) -> Option<Instant> {
        self.lock().get(client).map(|v| v.last_seen)
    }

    /// Overwrite `client`'s last-seen timestamp. Returns `false` when the
    /// client is unknown. Eviction-testing hook.
    pub fn set_last_seen(&self, client: &str, when: Instant) -> bool {
        match self.lock().get_mut(client) {
            Some(visitor) => {
                visitor.last_seen = when;
                true
            }
            None => false,
        }
    }
}

/// Param tier: one visitor per (client identity, parameter value) pair,
/// stored client → param → visitor so a client's entries can be pruned
/// together.
#[derive(Debug)]
pub struct ParamRegistry {
    rate_per_minute: f64,
    burst: u32,
    visitors: Mutex<HashMap<String, HashMap<String, Visitor>>>,
}

impl ParamRegistry {
    /// Registry whose new buckets grant `rate_per_minute`/`burst`.
    pub fn new(rate_per_minute: f64, burst: u32) -> Self {
        Self { rate_per_minute, burst, visitors: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Visitor>>> {
        self.visitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get-or-create the bucket for `(client, param)`, refreshing its
    /// last-seen timestamp. Single critical section.
    pub fn bucket_for(&self, client: &str, param: &str) -> Arc<TokenBucket> {
        let mut visitors = self.lock();
        let params = visitors.entry(client.to_owned()).or_default();
        if let Some(visitor) = params.get_mut(param) {
            visitor.last_seen = Instant::now();
            return Arc::clone(&visitor.bucket);
        }
        let visitor = Visitor::new(self.rate_per_minute, self.burst);
        let bucket = Arc::clone(&visitor.bucket);
        params.insert(param.to_owned(), visitor);
        bucket
    }

    /// Evict every pair idle for longer than `timeout`, pruning clients
    /// whose inner map becomes empty so memory stays bounded as parameter
    /// values churn. Returns the number of pairs removed.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let mut visitors = self.lock();
        let mut evicted = 0;
        visitors.retain(|_, params| {
            params.retain(|_, v| {
                let stale = v.stale(now, timeout);
                if stale {
                    evicted += 1;
                }
                !stale
            });
            !params.is_empty()
        });
        if evicted > 0 {
            debug!(target: "turnstile::registry", evicted, "evicted idle client/param pairs");
        }
        evicted
    }

    /// Number of live (client, param) pairs.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    /// True when no pair is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of clients with at least one live pair.
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `(client, param)` currently has a visitor.
    pub fn contains(&self, client: &str, param: &str) -> bool {
        self.lock().get(client).is_some_and(|params| params.contains_key(param))
    }

    /// Drop every visitor. Test isolation hook.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Last-seen timestamp for `(client, param)`, if registered.
    pub fn last_seen(&self, client: &str, param: &str) -> Option<Instant> {
        self.lock().get(client).and_then(|params| params.get(param)).map(|v| v.last_seen)
    }

    /// Overwrite a pair's last-seen timestamp. Returns `false` when the
    /// pair is unknown. Eviction-testing hook.
    pub fn set_last_seen(&self, client: &str, param: &str, when: Instant) -> bool {
        match self.lock().get_mut(client).and_then(|params| params.get_mut(param)) {
            Some(visitor) => {
                visitor.last_seen = when;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_bucket() {
        let registry = ClientRegistry::new(10.0, 10);
        let first = registry.bucket_for("1.2.3.4");
        let second = registry.bucket_for("1.2.3.4");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn revisit_refreshes_last_seen() {
        let registry = ClientRegistry::new(10.0, 10);
        registry.bucket_for("1.2.3.4");
        let old = Instant::now() - Duration::from_secs(600);
        assert!(registry.set_last_seen("1.2.3.4", old));
        registry.bucket_for("1.2.3.4");
        let seen = registry.last_seen("1.2.3.4").unwrap();
        assert!(seen > old + Duration::from_secs(1));
    }

    #[test]
    fn concurrent_first_access_creates_one_bucket() {
        let registry = Arc::new(ClientRegistry::new(0.0001, 4));
        let mut handles = vec![];
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                let bucket = registry.bucket_for("9.9.9.9");
                bucket.allow()
            }));
        }
        let granted =
            handles.into_iter().map(|h| h.join().unwrap()).filter(|&granted| granted).count();

        // Were a race to mint a second bucket, up to 8 grants could leak.
        assert_eq!(granted, 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn client_sweep_evicts_only_stale_entries() {
        let registry = ClientRegistry::new(10.0, 10);
        registry.bucket_for("stale");
        registry.bucket_for("fresh");
        registry.set_last_seen("stale", Instant::now() - Duration::from_secs(600));

        let evicted = registry.sweep(Duration::from_secs(180));
        assert_eq!(evicted, 1);
        assert!(!registry.contains("stale"));
        assert!(registry.contains("fresh"));
    }

    #[test]
    fn param_sweep_prunes_empty_clients() {
        let registry = ParamRegistry::new(2.0, 2);
        registry.bucket_for("1.2.3.4", "London");
        registry.bucket_for("1.2.3.4", "Paris");
        registry.bucket_for("5.6.7.8", "London");
        let old = Instant::now() - Duration::from_secs(600);
        registry.set_last_seen("1.2.3.4", "London", old);
        registry.set_last_seen("1.2.3.4", "Paris", old);

        let evicted = registry.sweep(Duration::from_secs(180));
        assert_eq!(evicted, 2);
        assert_eq!(registry.client_count(), 1);
        assert!(registry.contains("5.6.7.8", "London"));
        assert!(!registry.contains("1.2.3.4", "London"));
    }

    #[test]
    fn clear_drops_everything() {
        let registry = ParamRegistry::new(2.0, 2);
        registry.bucket_for("a", "x");
        registry.bucket_for("b", "y");
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn pairs_are_isolated_per_client() {
        let registry = ParamRegistry::new(2.0, 2);
        let a = registry.bucket_for("a", "London");
        let b = registry.bucket_for("b", "London");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.client_count(), 2);
    }
}
