//! Coordinate-to-label resolution with a TTL cache and an offline fallback.
//!
//! [`AddressResolver::resolve`] never fails. Lookups go through three tiers:
//!
//! | Tier | Source | When |
//! |------|--------|------|
//! | 1 | [`AddressCache`] | A non-expired entry exists for the rounded coordinate |
//! | 2 | [`Geocoder`] | Bounded by the configured wait (default 5 s) |
//! | 3 | Region table | The geocoder failed, timed out, or found nothing |
//!
//! Whatever label is produced is cached under the same TTL, so a coordinate
//! that fell back to the heuristic is not retried until the entry expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use drivelog_types::{Coordinate, Placemark};

use crate::config::AddressConfig;
use crate::traits::Geocoder;

/// Label used when the geocoder answers with no usable component.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Cache key for a coordinate: both components rounded to 4 decimals.
///
/// ```
/// use drivelog_core::address::cache_key;
/// use drivelog_types::Coordinate;
///
/// let coord = Coordinate::new(39.904_21, 116.407_39).unwrap();
/// assert_eq!(cache_key(&coord), "39.9042,116.4074");
/// ```
pub fn cache_key(coordinate: &Coordinate) -> String {
    format!("{:.4},{:.4}", coordinate.latitude, coordinate.longitude)
}

// ==================== Cache ====================

/// A cached label.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressCacheEntry {
    /// Resolved label.
    pub label: String,
    /// When the label was stored.
    pub cached_at: Instant,
}

/// Label cache keyed by rounded coordinate.
///
/// Entries older than the TTL are ignored on lookup and dropped by
/// [`sweep`](Self::sweep), which runs automatically after an insert pushes
/// the cache past its entry bound.
#[derive(Debug)]
pub struct AddressCache {
    entries: HashMap<String, AddressCacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl AddressCache {
    /// Create an empty cache.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// The label for `key`, if present and not expired at `now`.
    pub fn get(&self, key: &str, now: Instant) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.label.as_str())
    }

    /// Store a label cached at `now`, sweeping if the bound is exceeded.
    pub fn insert(&mut self, key: String, label: String, now: Instant) {
        self.insert_at(key, label, now);
        if self.entries.len() > self.max_entries {
            let removed = self.sweep(now);
            debug!(
                "Address cache exceeded {} entries, swept {} expired",
                self.max_entries, removed
            );
        }
    }

    /// Store a label with an explicit timestamp, without sweeping.
    pub fn insert_at(&mut self, key: String, label: String, cached_at: Instant) {
        self.entries
            .insert(key, AddressCacheEntry { label, cached_at });
    }

    /// Drop every entry expired at `now`. Returns how many were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.cached_at) <= ttl);
        before - self.entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn is_expired(&self, entry: &AddressCacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.cached_at) > self.ttl
    }
}

// ==================== Offline heuristic ====================

/// A named bounding box: (name, min lat, max lat, min lon, max lon).
type Region = (&'static str, f64, f64, f64, f64);

/// Metropolitan areas recognized offline. Earlier entries win where boxes overlap.
const REGIONS: &[Region] = &[
    ("Hong Kong", 22.15, 22.50, 113.83, 114.44),
    ("Shenzhen", 22.45, 22.86, 113.75, 114.63),
    ("Guangzhou", 22.56, 23.93, 112.95, 114.05),
    ("Shanghai", 30.68, 31.88, 120.85, 122.12),
    ("Beijing", 39.44, 41.06, 115.42, 117.51),
    ("Hangzhou", 29.19, 30.57, 118.34, 120.72),
    ("Chengdu", 30.09, 31.44, 102.99, 104.89),
    ("Tokyo", 35.50, 35.90, 139.56, 139.92),
    ("Singapore", 1.16, 1.47, 103.60, 104.09),
    ("London", 51.28, 51.69, -0.51, 0.33),
    ("Paris", 48.81, 48.91, 2.22, 2.47),
    ("New York", 40.48, 40.92, -74.26, -73.70),
    ("San Francisco", 37.70, 37.83, -122.52, -122.35),
    ("Los Angeles", 33.70, 34.34, -118.67, -118.15),
];

/// The metropolitan region containing `coordinate`, if any.
pub fn region_for(coordinate: &Coordinate) -> Option<&'static str> {
    REGIONS
        .iter()
        .find(|(_, min_lat, max_lat, min_lon, max_lon)| {
            (*min_lat..=*max_lat).contains(&coordinate.latitude)
                && (*min_lon..=*max_lon).contains(&coordinate.longitude)
        })
        .map(|(name, ..)| *name)
}

/// Offline label: `"<region> (<lat>,<lon>)"` or `"Location (<lat>,<lon>)"`.
///
/// ```
/// use drivelog_core::address::heuristic_label;
/// use drivelog_types::Coordinate;
///
/// let bund = Coordinate::new(31.2400, 121.4900).unwrap();
/// assert_eq!(heuristic_label(&bund), "Shanghai (31.2400,121.4900)");
///
/// let ocean = Coordinate::new(0.0, -30.0).unwrap();
/// assert_eq!(heuristic_label(&ocean), "Location (0.0000,-30.0000)");
/// ```
pub fn heuristic_label(coordinate: &Coordinate) -> String {
    let region = region_for(coordinate).unwrap_or("Location");
    format!(
        "{} ({:.4},{:.4})",
        region, coordinate.latitude, coordinate.longitude
    )
}

/// Build a short label from a placemark.
///
/// Takes the first `max_components` present, non-blank, distinct components
/// in priority order (name, sub-locality, locality, sub-administrative area).
pub fn format_placemark(placemark: &Placemark, separator: &str, max_components: usize) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(max_components);
    for component in placemark.label_components().into_iter().flatten() {
        let component = component.trim();
        if component.is_empty() || parts.contains(&component) {
            continue;
        }
        parts.push(component);
        if parts.len() == max_components {
            break;
        }
    }

    if parts.is_empty() {
        UNKNOWN_LOCATION.to_string()
    } else {
        parts.join(separator)
    }
}

// ==================== Resolver ====================

/// Resolver counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went past the cache.
    pub misses: u64,
    /// Geocoder errors and timeouts.
    pub geocoder_failures: u64,
    /// Labels produced by the offline heuristic.
    pub fallbacks: u64,
    /// Entries currently cached.
    pub cached_entries: usize,
}

/// Resolves coordinates to short human-readable labels.
pub struct AddressResolver {
    geocoder: Arc<dyn Geocoder>,
    config: AddressConfig,
    cache: Mutex<AddressCache>,
    hits: AtomicU64,
    misses: AtomicU64,
    geocoder_failures: AtomicU64,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressResolver")
            .field("config", &self.config)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl AddressResolver {
    /// Create a resolver over `geocoder`.
    pub fn new(geocoder: Arc<dyn Geocoder>, config: AddressConfig) -> Self {
        let cache = AddressCache::new(config.cache_ttl(), config.cache_max_entries);
        Self {
            geocoder,
            config,
            cache: Mutex::new(cache),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            geocoder_failures: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Resolve `coordinate` to a label. Never fails.
    pub async fn resolve(&self, coordinate: Coordinate) -> String {
        let key = cache_key(&coordinate);
        if let Some(label) = self.cache.lock().await.get(&key, Instant::now()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return label.to_string();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let label = match self.geocode(coordinate).await {
            Some(label) => label,
            None => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                heuristic_label(&coordinate)
            }
        };

        self.cache
            .lock()
            .await
            .insert(key, label.clone(), Instant::now());
        label
    }

    async fn geocode(&self, coordinate: Coordinate) -> Option<String> {
        let wait = self.config.resolve_timeout();
        match tokio::time::timeout(wait, self.geocoder.reverse_geocode(coordinate)).await {
            Ok(Ok(placemarks)) => match placemarks.first() {
                Some(placemark) => Some(format_placemark(
                    placemark,
                    &self.config.separator,
                    self.config.max_components,
                )),
                None => {
                    debug!("Geocoder found nothing at {}", coordinate);
                    None
                }
            },
            Ok(Err(e)) => {
                self.geocoder_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Reverse geocoding failed at {}: {}", coordinate, e);
                None
            }
            Err(_) => {
                self.geocoder_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Reverse geocoding at {} timed out after {:?}", coordinate, wait);
                None
            }
        }
    }

    /// Number of cached labels, expired or not.
    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Forget every cached label.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            geocoder_failures: self.geocoder_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            cached_entries: self.cached_len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGeocoder;
    use proptest::prelude::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn resolver(geocoder: Arc<MockGeocoder>) -> AddressResolver {
        AddressResolver::new(geocoder, AddressConfig::default())
    }

    #[test]
    fn test_format_placemark_priority_and_limit() {
        let placemark = Placemark {
            name: Some("People's Square".to_string()),
            sub_locality: Some("Huangpu".to_string()),
            locality: Some("Shanghai".to_string()),
            sub_administrative_area: Some("Shanghai Municipality".to_string()),
            administrative_area: Some("Shanghai".to_string()),
            country: Some("China".to_string()),
        };
        assert_eq!(
            format_placemark(&placemark, ", ", 3),
            "People's Square, Huangpu, Shanghai"
        );
    }

    #[test]
    fn test_format_placemark_skips_blanks_and_repeats() {
        let placemark = Placemark {
            name: Some("Shanghai".to_string()),
            sub_locality: Some("  ".to_string()),
            locality: Some("Shanghai".to_string()),
            sub_administrative_area: Some("Pudong".to_string()),
            ..Default::default()
        };
        assert_eq!(format_placemark(&placemark, " · ", 3), "Shanghai · Pudong");
    }

    #[test]
    fn test_format_placemark_without_components() {
        let placemark = Placemark {
            country: Some("China".to_string()),
            ..Default::default()
        };
        assert_eq!(format_placemark(&placemark, ", ", 3), UNKNOWN_LOCATION);
    }

    #[test]
    fn test_region_lookup() {
        assert_eq!(region_for(&coord(39.9042, 116.4074)), Some("Beijing"));
        assert_eq!(region_for(&coord(22.2793, 114.1628)), Some("Hong Kong"));
        assert_eq!(region_for(&coord(22.5431, 114.0579)), Some("Shenzhen"));
        assert_eq!(region_for(&coord(-33.8688, 151.2093)), None);
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let geocoder = Arc::new(MockGeocoder::with_place("Tiananmen", "Beijing"));
        let resolver = resolver(geocoder.clone());
        let point = coord(39.9055, 116.3976);

        let first = resolver.resolve(point).await;
        let second = resolver.resolve(point).await;
        assert_eq!(first, "Tiananmen, Beijing");
        assert_eq!(second, first);
        assert_eq!(geocoder.call_count(), 1);

        let stats = resolver.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.cached_entries, 1);
    }

    #[tokio::test]
    async fn test_nearby_points_share_a_key() {
        let geocoder = Arc::new(MockGeocoder::with_place("Bund", "Shanghai"));
        let resolver = resolver(geocoder.clone());
        resolver.resolve(coord(31.240_01, 121.490_01)).await;
        resolver.resolve(coord(31.240_04, 121.490_02)).await;
        assert_eq!(geocoder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_back_and_is_cached() {
        let geocoder = Arc::new(MockGeocoder::with_place("Bund", "Shanghai"));
        geocoder.set_should_fail(true);
        let resolver = resolver(geocoder.clone());
        let point = coord(31.2400, 121.4900);

        assert_eq!(resolver.resolve(point).await, "Shanghai (31.2400,121.4900)");
        geocoder.set_should_fail(false);
        assert_eq!(resolver.resolve(point).await, "Shanghai (31.2400,121.4900)");
        assert_eq!(geocoder.call_count(), 1);

        let stats = resolver.stats().await;
        assert_eq!(stats.geocoder_failures, 1);
        assert_eq!(stats.fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_geocoder_times_out_to_heuristic() {
        let geocoder = Arc::new(MockGeocoder::with_place("Somewhere", "Nowhere"));
        geocoder.set_latency(Duration::from_secs(30));
        let resolver = resolver(geocoder);

        let label = resolver.resolve(coord(10.0, 10.0)).await;
        assert_eq!(label, "Location (10.0000,10.0000)");
    }

    #[tokio::test]
    async fn test_empty_answer_uses_heuristic() {
        let geocoder = Arc::new(MockGeocoder::new(Vec::new()));
        let resolver = resolver(geocoder);
        assert_eq!(
            resolver.resolve(coord(51.5007, -0.1246)).await,
            "London (51.5007,-0.1246)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let geocoder = Arc::new(MockGeocoder::with_place("Eiffel Tower", "Paris"));
        let resolver = resolver(geocoder.clone());
        let point = coord(48.8584, 2.2945);

        resolver.resolve(point).await;
        tokio::time::advance(Duration::from_secs(3601)).await;
        resolver.resolve(point).await;
        assert_eq!(geocoder.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired_entries() {
        let mut cache = AddressCache::new(Duration::from_secs(3600), 200);
        let start = Instant::now();
        for i in 0..60 {
            cache.insert_at(format!("old-{}", i), "old".to_string(), start);
        }

        tokio::time::advance(Duration::from_secs(3601)).await;
        let now = Instant::now();
        for i in 0..189 {
            cache.insert_at(format!("new-{}", i), "new".to_string(), now);
        }
        assert_eq!(cache.len(), 249);

        cache.insert("new-189".to_string(), "new".to_string(), now);
        assert_eq!(cache.len(), 190);
        assert!(cache.get("old-0", now).is_none());
        assert_eq!(cache.get("new-0", now), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sweep_within_bound() {
        let mut cache = AddressCache::new(Duration::from_secs(10), 5);
        let start = Instant::now();
        cache.insert("a".to_string(), "A".to_string(), start);
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("b".to_string(), "B".to_string(), Instant::now());

        // Expired entries linger until the bound is exceeded, but are never served.
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", Instant::now()).is_none());
    }

    proptest! {
        #[test]
        fn prop_cache_key_has_four_decimals(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            let key = cache_key(&coord(lat, lon));
            let (lat_part, lon_part) = key.split_once(',').unwrap();
            prop_assert_eq!(lat_part.split_once('.').unwrap().1.len(), 4);
            prop_assert_eq!(lon_part.split_once('.').unwrap().1.len(), 4);
        }
    }
}
