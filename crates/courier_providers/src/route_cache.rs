use fxhash::FxHashMap;
use jiff::{SignedDuration, Timestamp};
use tracing::debug;

use courier_core::geometry::RouteGeometry;
use courier_core::geopoint::GeoPoint;

/// Four decimal places (~11 m). Geometrically-close requests intentionally
/// collapse onto the same key.
const KEY_SCALE: f64 = 1e4;

/// Destination displacement beyond which every cached route is meaningless
/// (~100 m straight-line on raw degrees).
const DESTINATION_SHIFT_DEGREES: f64 = 0.001;

pub const DEFAULT_MAX_AGE: SignedDuration = SignedDuration::from_secs(300);
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct QuantizedKey {
    origin: (i64, i64),
    destination: (i64, i64),
}

impl QuantizedKey {
    fn new(origin: &GeoPoint, destination: &GeoPoint) -> Self {
        QuantizedKey {
            origin: quantize(origin),
            destination: quantize(destination),
        }
    }
}

fn quantize(point: &GeoPoint) -> (i64, i64) {
    (
        (point.lat * KEY_SCALE).round() as i64,
        (point.lng * KEY_SCALE).round() as i64,
    )
}

struct CacheEntry {
    geometry: RouteGeometry,
    created_at: Timestamp,
    expires_at: Timestamp,
    // Insertion order, breaks created_at ties during eviction.
    seq: u64,
}

pub struct RouteCacheParams {
    pub max_age: SignedDuration,
    pub capacity: usize,
}

impl Default for RouteCacheParams {
    fn default() -> Self {
        RouteCacheParams {
            max_age: DEFAULT_MAX_AGE,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// In-memory route store keyed by quantized (origin, destination) pairs.
/// Entries expire after `max_age` and are purged lazily on access; under
/// capacity pressure the oldest entry by creation time is evicted first.
pub struct RouteCache {
    params: RouteCacheParams,
    entries: FxHashMap<QuantizedKey, CacheEntry>,
    last_destination: Option<GeoPoint>,
    next_seq: u64,
}

impl Default for RouteCache {
    fn default() -> Self {
        RouteCache::new(RouteCacheParams::default())
    }
}

impl RouteCache {
    pub fn new(params: RouteCacheParams) -> Self {
        RouteCache {
            params,
            entries: FxHashMap::default(),
            last_destination: None,
            next_seq: 0,
        }
    }

    pub fn get(&mut self, origin: &GeoPoint, destination: &GeoPoint) -> Option<&RouteGeometry> {
        let key = QuantizedKey::new(origin, destination);
        let now = Timestamp::now();

        if let Some(entry) = self.entries.get(&key) {
            if now >= entry.expires_at {
                debug!("RouteCache: entry expired, purging");
                self.entries.remove(&key);
                return None;
            }
        }

        self.entries.get(&key).map(|entry| &entry.geometry)
    }

    pub fn put(&mut self, origin: &GeoPoint, destination: &GeoPoint, geometry: RouteGeometry) {
        let key = QuantizedKey::new(origin, destination);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.params.capacity {
            self.evict_oldest();
        }

        let created_at = Timestamp::now();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            key,
            CacheEntry {
                geometry,
                created_at,
                expires_at: created_at + self.params.max_age,
                seq,
            },
        );
    }

    /// Drops everything when the destination has moved far enough that the
    /// previous trip's routes no longer apply.
    pub fn invalidate_if_destination_changed(&mut self, new_destination: &GeoPoint) {
        if let Some(last) = &self.last_destination {
            if last.degree_displacement(new_destination) > DESTINATION_SHIFT_DEGREES {
                debug!(
                    "RouteCache: destination moved, dropping {} cached route(s)",
                    self.entries.len()
                );
                self.entries.clear();
            }
        }

        self.last_destination = Some(*new_destination);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_destination = None;
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.created_at, entry.seq))
            .map(|(key, _)| *key);

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(lng: f64) -> RouteGeometry {
        RouteGeometry::new(
            vec![GeoPoint::new(50.0, lng), GeoPoint::new(50.1, lng)],
            1000.0,
            60_000,
        )
    }

    #[test]
    fn test_nearby_coordinates_share_an_entry() {
        let mut cache = RouteCache::default();

        let origin = GeoPoint::new(50.12341, 4.56781);
        let destination = GeoPoint::new(50.2, 4.6);
        cache.put(&origin, &destination, geometry(4.0));

        // Differs by well under 0.0001 degrees, same 4-decimal key.
        let close_origin = GeoPoint::new(50.12343, 4.56779);
        assert!(cache.get(&close_origin, &destination).is_some());

        let far_origin = GeoPoint::new(50.1250, 4.56781);
        assert!(cache.get(&far_origin, &destination).is_none());
    }

    #[test]
    fn test_duplicate_key_overwrites() {
        let mut cache = RouteCache::default();

        let origin = GeoPoint::new(50.0, 4.0);
        let destination = GeoPoint::new(50.2, 4.2);

        cache.put(&origin, &destination, geometry(4.0));
        cache.put(&origin, &destination, geometry(5.0));

        assert_eq!(cache.len(), 1);
        let cached = cache.get(&origin, &destination).unwrap();
        assert_eq!(cached.points()[0].lng, 5.0);
    }

    #[test]
    fn test_zero_max_age_expires_immediately() {
        let mut cache = RouteCache::new(RouteCacheParams {
            max_age: SignedDuration::ZERO,
            capacity: DEFAULT_CAPACITY,
        });

        let origin = GeoPoint::new(50.0, 4.0);
        let destination = GeoPoint::new(50.2, 4.2);
        cache.put(&origin, &destination, geometry(4.0));

        assert!(cache.get(&origin, &destination).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut cache = RouteCache::new(RouteCacheParams {
            max_age: DEFAULT_MAX_AGE,
            capacity: 2,
        });

        let destination = GeoPoint::new(51.0, 5.0);
        let first = GeoPoint::new(50.0, 4.0);
        let second = GeoPoint::new(50.1, 4.0);
        let third = GeoPoint::new(50.2, 4.0);

        cache.put(&first, &destination, geometry(4.0));
        cache.put(&second, &destination, geometry(4.1));
        cache.put(&third, &destination, geometry(4.2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&first, &destination).is_none());
        assert!(cache.get(&second, &destination).is_some());
        assert!(cache.get(&third, &destination).is_some());
    }

    #[test]
    fn test_destination_shift_drops_everything() {
        let mut cache = RouteCache::default();

        let origin = GeoPoint::new(50.0, 4.0);
        let destination = GeoPoint::new(50.2, 4.2);

        cache.invalidate_if_destination_changed(&destination);
        cache.put(&origin, &destination, geometry(4.0));

        // Small drift, same trip.
        cache.invalidate_if_destination_changed(&GeoPoint::new(50.2001, 4.2));
        assert_eq!(cache.len(), 1);

        // New trip.
        cache.invalidate_if_destination_changed(&GeoPoint::new(50.25, 4.2));
        assert!(cache.is_empty());
    }
}
