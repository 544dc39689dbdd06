use std::str::FromStr;
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use courier_core::geopoint::GeoPoint;

#[derive(Debug, Error)]
pub enum PackageApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("unknown package status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    PickedUp,
    Delivered,
}

impl FromStr for PackageStatus {
    type Err = PackageApiError;

    // The backend is not consistent about casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(PackageStatus::Pending),
            "picked_up" => Ok(PackageStatus::PickedUp),
            "delivered" => Ok(PackageStatus::Delivered),
            other => Err(PackageApiError::UnknownStatus(other.to_string())),
        }
    }
}

impl PackageStatus {
    pub fn as_wire(&self) -> &'static str {
        match self {
            PackageStatus::Pending => "PENDING",
            PackageStatus::PickedUp => "PICKED_UP",
            PackageStatus::Delivered => "DELIVERED",
        }
    }
}

/// One delivery stop, ordered within its route by `stop_priority`.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    pub id: String,
    pub recipient: String,
    pub address: String,
    pub location: GeoPoint,
    pub estimated_travel_time_seconds: Option<u32>,
    pub status: PackageStatus,
    pub stop_priority: u32,
}

#[derive(Debug, Deserialize)]
struct ApiPackage {
    id: String,
    recipient: String,
    address: String,
    latitude: f64,
    longitude: f64,
    estimated_travel_time_seconds: Option<u32>,
    status: String,
    stop_priority: u32,
}

impl TryFrom<ApiPackage> for Package {
    type Error = PackageApiError;

    fn try_from(api: ApiPackage) -> Result<Self, Self::Error> {
        Ok(Package {
            status: api.status.parse()?,
            id: api.id,
            recipient: api.recipient,
            address: api.address,
            location: GeoPoint::new(api.latitude, api.longitude),
            estimated_travel_time_seconds: api.estimated_travel_time_seconds,
            stop_priority: api.stop_priority,
        })
    }
}

/// The backend the workflow talks to. Implemented over HTTP in production
/// and by in-memory fakes in tests.
pub trait PackageBackend {
    fn fetch_route_packages(
        &self,
        route_id: &str,
    ) -> impl Future<Output = Result<Vec<Package>, PackageApiError>> + Send;

    fn update_status(
        &self,
        package_id: &str,
        status: PackageStatus,
    ) -> impl Future<Output = Result<(), PackageApiError>> + Send;
}

impl<T: PackageBackend + Send + Sync + ?Sized> PackageBackend for Arc<T> {
    fn fetch_route_packages(
        &self,
        route_id: &str,
    ) -> impl Future<Output = Result<Vec<Package>, PackageApiError>> + Send {
        (**self).fetch_route_packages(route_id)
    }

    fn update_status(
        &self,
        package_id: &str,
        status: PackageStatus,
    ) -> impl Future<Output = Result<(), PackageApiError>> + Send {
        (**self).update_status(package_id, status)
    }
}

pub struct HttpPackageBackendParams {
    pub base_url: String,
    pub auth_token: String,
}

pub struct HttpPackageBackend {
    params: HttpPackageBackendParams,
    client: reqwest::Client,
}

impl HttpPackageBackend {
    pub fn new(params: HttpPackageBackendParams) -> Self {
        Self {
            params,
            client: reqwest::Client::new(),
        }
    }
}

impl PackageBackend for HttpPackageBackend {
    async fn fetch_route_packages(&self, route_id: &str) -> Result<Vec<Package>, PackageApiError> {
        let url = format!("{}/routes/{}/packages", self.params.base_url, route_id);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.params.auth_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(PackageApiError::Api { status, message });
        }

        let api_packages: Vec<ApiPackage> = response.json().await?;

        let mut packages = api_packages
            .into_iter()
            .map(Package::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // The backend claims to order by stop priority; do not rely on it.
        packages.sort_by_key(|package| package.stop_priority);

        Ok(packages)
    }

    async fn update_status(
        &self,
        package_id: &str,
        status: PackageStatus,
    ) -> Result<(), PackageApiError> {
        let url = format!("{}/packages/{}/status", self.params.base_url, package_id);

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.params.auth_token)
            .json(&serde_json::json!({ "status": status.as_wire() }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(PackageApiError::Api {
                status: status_code,
                message,
            });
        }

        Ok(())
    }
}

/// Backend access with a per-route snapshot cache. Confirming a delivery
/// through this service invalidates the route's snapshot so the next fetch
/// reflects the new status.
pub struct PackageService<B: PackageBackend> {
    backend: B,
    snapshots: Mutex<FxHashMap<String, Vec<Package>>>,
}

impl<B: PackageBackend> PackageService<B> {
    pub fn new(backend: B) -> Self {
        PackageService {
            backend,
            snapshots: Mutex::new(FxHashMap::default()),
        }
    }

    pub async fn route_packages(&self, route_id: &str) -> Result<Vec<Package>, PackageApiError> {
        if let Some(snapshot) = self.snapshots.lock().get(route_id) {
            debug!("PackageService: snapshot hit for route {}", route_id);
            return Ok(snapshot.clone());
        }

        let packages = self.backend.fetch_route_packages(route_id).await?;

        self.snapshots
            .lock()
            .insert(route_id.to_string(), packages.clone());

        Ok(packages)
    }

    pub async fn mark_delivered(
        &self,
        route_id: &str,
        package_id: &str,
    ) -> Result<(), PackageApiError> {
        self.backend
            .update_status(package_id, PackageStatus::Delivered)
            .await?;

        // A stale snapshot here would resurrect the package on the next fetch.
        self.invalidate(route_id);

        Ok(())
    }

    pub fn invalidate(&self, route_id: &str) {
        self.snapshots.lock().remove(route_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(
            "PENDING".parse::<PackageStatus>().unwrap(),
            PackageStatus::Pending
        );
        assert_eq!(
            "Delivered".parse::<PackageStatus>().unwrap(),
            PackageStatus::Delivered
        );
        assert_eq!(
            "picked_up".parse::<PackageStatus>().unwrap(),
            PackageStatus::PickedUp
        );
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(matches!(
            "teleported".parse::<PackageStatus>(),
            Err(PackageApiError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_api_package_conversion() {
        let api = ApiPackage {
            id: "pkg-1".to_string(),
            recipient: "A. Dupont".to_string(),
            address: "12 Rue de la Loi, Brussels".to_string(),
            latitude: 50.8466,
            longitude: 4.3528,
            estimated_travel_time_seconds: Some(600),
            status: "DELIVERED".to_string(),
            stop_priority: 3,
        };

        let package = Package::try_from(api).unwrap();
        assert_eq!(package.status, PackageStatus::Delivered);
        assert_eq!(package.stop_priority, 3);
    }
}
