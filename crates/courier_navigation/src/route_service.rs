use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use courier_core::geometry::RouteGeometry;
use courier_core::geopoint::GeoPoint;
use courier_providers::graphhopper_api::RoutingClient;
use courier_providers::route_cache::RouteCache;

pub const DEFAULT_FETCH_DEBOUNCE: Duration = Duration::from_millis(400);

/// Single active subscriber, replaced on resubscribe.
pub trait RouteListener: Send + Sync {
    fn on_route_update(&self, _route: Option<&RouteGeometry>) {}
    fn on_route_error(&self, _message: &str) {}
}

pub struct RouteServiceParams {
    pub debounce: Duration,
}

impl Default for RouteServiceParams {
    fn default() -> Self {
        RouteServiceParams {
            debounce: DEFAULT_FETCH_DEBOUNCE,
        }
    }
}

/// Cache-aware, debounced route acquisition. At most one fetch is in flight;
/// a newer request supersedes and cancels the pending one. Provider failures
/// degrade to a straight-line route instead of blocking the workflow; the
/// degraded route is never cached.
pub struct RouteService {
    params: RouteServiceParams,
    cache: Arc<Mutex<RouteCache>>,
    client: Arc<RoutingClient>,
    listener: Arc<Mutex<Option<Arc<dyn RouteListener>>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RouteService {
    pub fn new(
        params: RouteServiceParams,
        cache: Arc<Mutex<RouteCache>>,
        client: Arc<RoutingClient>,
    ) -> Self {
        RouteService {
            params,
            cache,
            client,
            listener: Arc::new(Mutex::new(None)),
            pending: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn RouteListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.lock() = None;
    }

    /// Requests a route, serving from the cache when possible. A cache miss
    /// schedules a debounced provider fetch; any fetch already pending is
    /// cancelled first so two fetches never race against the same state.
    pub fn request_route(&self, origin: GeoPoint, destination: GeoPoint) {
        self.cancel_pending();

        {
            let mut cache = self.cache.lock();
            cache.invalidate_if_destination_changed(&destination);

            if let Some(geometry) = cache.get(&origin, &destination) {
                debug!("RouteService: cache hit");
                let geometry = geometry.clone();
                drop(cache);

                self.notify(Some(&geometry));
                return;
            }
        }

        let cache = Arc::clone(&self.cache);
        let client = Arc::clone(&self.client);
        let listener = Arc::clone(&self.listener);
        let debounce = self.params.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let geometry = match client.fetch_route(origin, destination).await {
                Ok(geometry) => {
                    cache.lock().put(&origin, &destination, geometry.clone());
                    geometry
                }
                Err(error) => {
                    warn!("RouteService: provider fetch failed, degrading: {}", error);

                    let subscriber = listener.lock().clone();
                    if let Some(subscriber) = subscriber {
                        subscriber.on_route_error(&error.to_string());
                    }

                    RouteGeometry::straight_line(origin, destination)
                }
            };

            let subscriber = listener.lock().clone();
            if let Some(subscriber) = subscriber {
                subscriber.on_route_update(Some(&geometry));
            }
        });

        *self.pending.lock() = Some(handle);
    }

    /// Drops any in-flight fetch and tells the subscriber the route is gone.
    /// Used on teardown and when the driver leaves the workflow.
    pub fn clear(&self) {
        self.cancel_pending();
        self.notify(None);
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    fn notify(&self, route: Option<&RouteGeometry>) {
        let subscriber = self.listener.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber.on_route_update(route);
        }
    }
}

impl Drop for RouteService {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_providers::graphhopper_api::RoutingClientParams;
    use courier_providers::route_cache::RouteCacheParams;

    struct RecordingListener {
        updates: Mutex<Vec<Option<RouteGeometry>>>,
    }

    impl RouteListener for RecordingListener {
        fn on_route_update(&self, route: Option<&RouteGeometry>) {
            self.updates.lock().push(route.cloned());
        }
    }

    fn service() -> (RouteService, Arc<Mutex<RouteCache>>, Arc<RecordingListener>) {
        let cache = Arc::new(Mutex::new(RouteCache::new(RouteCacheParams::default())));
        let client = Arc::new(RoutingClient::new(RoutingClientParams::default()));
        let service = RouteService::new(RouteServiceParams::default(), Arc::clone(&cache), client);

        let listener = Arc::new(RecordingListener {
            updates: Mutex::new(Vec::new()),
        });
        service.set_listener(listener.clone());

        (service, cache, listener)
    }

    #[tokio::test]
    async fn test_cache_hit_notifies_synchronously() {
        let (service, cache, listener) = service();

        let origin = GeoPoint::new(50.0, 4.0);
        let destination = GeoPoint::new(50.2, 4.2);
        let geometry = RouteGeometry::straight_line(origin, destination);

        cache
            .lock()
            .put(&origin, &destination, geometry.clone());

        service.request_route(origin, destination);

        let updates = listener.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].as_ref(), Some(&geometry));
    }

    #[tokio::test]
    async fn test_clear_notifies_null_route() {
        let (service, _, listener) = service();

        service.clear();

        let updates = listener.updates.lock();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_none());
    }

    #[tokio::test]
    async fn test_new_request_supersedes_pending_fetch() {
        let (service, _, _) = service();

        let origin = GeoPoint::new(50.0, 4.0);
        service.request_route(origin, GeoPoint::new(50.2, 4.2));
        let first = service.pending.lock().as_ref().map(|h| h.id());

        service.request_route(origin, GeoPoint::new(50.2, 4.2));
        let second = service.pending.lock().as_ref().map(|h| h.id());

        assert!(first.is_some());
        assert!(second.is_some());
        assert_ne!(first, second);
    }
}
