use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use courier_core::geopoint::GeoPoint;
use courier_providers::package_api::{Package, PackageApiError, PackageBackend, PackageStatus};

pub fn create_package(id: &str, priority: u32, status: PackageStatus) -> Package {
    Package {
        id: id.to_string(),
        recipient: format!("Recipient {priority}"),
        address: format!("{priority} Rue Neuve, Brussels"),
        location: GeoPoint::new(50.85 + priority as f64 * 0.01, 4.35),
        estimated_travel_time_seconds: Some(600),
        status,
        stop_priority: priority,
    }
}

pub fn create_pending_packages(count: usize) -> Vec<Package> {
    (0..count)
        .map(|index| {
            create_package(
                &format!("pkg-{}", index + 1),
                index as u32 + 1,
                PackageStatus::Pending,
            )
        })
        .collect()
}

/// In-memory backend double. Status updates mutate the stored packages so a
/// refetch observes them, exactly like the real backend.
#[derive(Default)]
pub struct MockBackend {
    pub packages: Mutex<Vec<Package>>,
    pub fail_status_updates: AtomicBool,
    pub fetch_count: AtomicU32,
}

impl MockBackend {
    pub fn with_packages(packages: Vec<Package>) -> Arc<Self> {
        let backend = MockBackend::default();
        *backend.packages.lock() = packages;
        Arc::new(backend)
    }

    pub fn fetches(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl PackageBackend for MockBackend {
    async fn fetch_route_packages(&self, _route_id: &str) -> Result<Vec<Package>, PackageApiError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.packages.lock().clone())
    }

    async fn update_status(
        &self,
        package_id: &str,
        status: PackageStatus,
    ) -> Result<(), PackageApiError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(PackageApiError::Api {
                status: 500,
                message: "backend rejected the update".to_string(),
            });
        }

        let mut packages = self.packages.lock();
        if let Some(package) = packages.iter_mut().find(|package| package.id == package_id) {
            package.status = status;
        }

        Ok(())
    }
}
