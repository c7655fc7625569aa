//! Cumulative-to-delta conversion for `Sum` metrics (spec.md §4.4, testable
//! property 4). Grounded on `metric-exporter.go`'s `getCacheKey` and its
//! missed-interval reseed logic, but relocated out of the original's
//! module-level globals (`metricCache`/`metricCacheUpdates`/
//! `metricCacheMutex`) into an explicit component owned by the exporter
//! instance (Design Notes §9).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(90);

struct CacheEntry {
    value: f64,
    seen_at: Instant,
}

/// Tracks the last-seen cumulative value per series so repeated scrapes of
/// a running total can be converted into a per-interval delta the way a
/// `Gauge` is reported directly.
pub struct CumulativeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for CumulativeCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CumulativeCache {
    pub fn new(ttl: Duration) -> Self {
        CumulativeCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Combines a metric name with its attribute set into the cache key the
    /// original derives from a sorted label set — same sort-then-join shape,
    /// generalized to whatever attributes a rule happened to bind.
    pub fn cache_key(metric_name: &str, attributes: &std::collections::BTreeMap<String, String>) -> String {
        let mut key = metric_name.to_string();
        for (k, v) in attributes {
            key.push('\x01');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }

    /// Converts a freshly scraped cumulative `value` into a delta against
    /// the last value seen for `key`.
    ///
    /// Returns `None` the first time a series is seen, or when the gap
    /// since the last observation exceeds the TTL — in both cases there is
    /// no prior baseline to subtract, so the series is reseeded instead of
    /// reporting a delta. Otherwise always reports `new - previous`,
    /// unconditionally, including a negative value across a counter reset.
    pub fn delta(&self, key: &str, value: f64) -> Option<f64> {
        self.delta_at(key, value, Instant::now())
    }

    fn delta_at(&self, key: &str, value: f64, now: Instant) -> Option<f64> {
        let mut entries = self.entries.lock().expect("cumulative cache mutex poisoned");
        let prior = entries.insert(key.to_string(), CacheEntry { value, seen_at: now });
        match prior {
            None => None,
            Some(prior) if now.duration_since(prior.seen_at) > self.ttl => None,
            Some(prior) => Some(value - prior.value),
        }
    }

    pub fn purge_older_than(&self, max_age: Duration) {
        let cutoff = Instant::now();
        let mut entries = self.entries.lock().expect("cumulative cache mutex poisoned");
        entries.retain(|_, entry| cutoff.duration_since(entry.seen_at) <= max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_has_no_delta() {
        let cache = CumulativeCache::new(Duration::from_secs(90));
        assert_eq!(cache.delta("k", 100.0), None);
    }

    #[test]
    fn second_observation_reports_difference() {
        let cache = CumulativeCache::new(Duration::from_secs(90));
        cache.delta("k", 100.0);
        assert_eq!(cache.delta("k", 140.0), Some(40.0));
    }

    #[test]
    fn counter_reset_reports_negative_difference() {
        let cache = CumulativeCache::new(Duration::from_secs(90));
        cache.delta("k", 100.0);
        assert_eq!(cache.delta("k", 5.0), Some(-95.0));
    }

    #[test]
    fn stale_baseline_past_ttl_reseeds_without_a_delta() {
        let cache = CumulativeCache::new(Duration::from_millis(10));
        let t0 = Instant::now();
        cache.delta_at("k", 100.0, t0);
        let later = t0 + Duration::from_millis(50);
        assert_eq!(cache.delta_at("k", 999.0, later), None);
    }

    #[test]
    fn cache_key_combines_name_and_sorted_attributes() {
        let mut attrs = std::collections::BTreeMap::new();
        attrs.insert("tenant".to_string(), "mgmt".to_string());
        let key = CumulativeCache::cache_key("health", &attrs);
        assert_eq!(key, "health\u{1}tenant=mgmt");
    }
}
