use std::fmt::Display;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use courier_core::geometry::RouteGeometry;
use courier_core::geopoint::{CoordinateError, GeoPoint};
use courier_core::polyline::{self, PolylineError};

#[derive(Deserialize, Serialize, JsonSchema, Copy, Clone, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleProfile {
    Car,
    Bike,
    Foot,
    SmallTruck,
    Truck,
}

impl Display for VehicleProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                VehicleProfile::Car => "car",
                VehicleProfile::Bike => "bike",
                VehicleProfile::Foot => "foot",
                VehicleProfile::SmallTruck => "small_truck",
                VehicleProfile::Truck => "truck",
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("no route found between the requested points")]
    NoRouteFound,

    #[error("invalid coordinate rejected before request: {0}")]
    Coordinate(#[from] CoordinateError),

    #[error("route geometry could not be decoded: {0}")]
    Polyline(#[from] PolylineError),

    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// The provider returns either an encoded polyline or an already-decoded
/// GeoJSON-style line string, depending on `points_encoded`. Both occur and
/// both must be handled.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathPoints {
    Encoded(String),
    Decoded { coordinates: Vec<[f64; 2]> },
}

#[derive(Debug, Deserialize)]
struct RoutePath {
    /// Meters
    distance: f64,

    /// Milliseconds
    time: u64,

    points: PathPoints,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    #[serde(default)]
    paths: Vec<RoutePath>,
}

pub struct RoutingClientParams {
    pub api_key: String,
    pub base_url: String,
    pub profile: VehicleProfile,
}

pub const GRAPHOPPER_ROUTE_API_URL: &str = "https://graphhopper.com/api/1/route";

impl Default for RoutingClientParams {
    fn default() -> Self {
        RoutingClientParams {
            api_key: String::new(),
            base_url: GRAPHOPPER_ROUTE_API_URL.to_string(),
            profile: VehicleProfile::Car,
        }
    }
}

pub struct RoutingClient {
    params: RoutingClientParams,
    client: reqwest::Client,
}

impl RoutingClient {
    pub fn new(params: RoutingClientParams) -> Self {
        Self {
            params,
            client: reqwest::Client::new(),
        }
    }

    pub async fn fetch_route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteGeometry, RoutingError> {
        // Coordinate validation never reaches the network layer.
        origin.validate()?;
        destination.validate()?;

        let response = self
            .client
            .get(&self.params.base_url)
            .query(&[
                ("point", format!("{},{}", origin.lat, origin.lng)),
                ("point", format!("{},{}", destination.lat, destination.lng)),
                ("profile", self.params.profile.to_string()),
                ("points_encoded", "true".to_string()),
                ("key", self.params.api_key.clone()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(RoutingError::Api { status, message });
        }

        let route_response: RouteResponse = response.json().await?;

        debug!(
            "RoutingClient: received {} path(s) from provider",
            route_response.paths.len()
        );

        Self::geometry_from_response(route_response)
    }

    fn geometry_from_response(response: RouteResponse) -> Result<RouteGeometry, RoutingError> {
        let path = response
            .paths
            .into_iter()
            .next()
            .ok_or(RoutingError::NoRouteFound)?;

        let points = match path.points {
            PathPoints::Encoded(encoded) => polyline::decode(&encoded)?,
            PathPoints::Decoded { coordinates } => coordinates
                .iter()
                .map(|&[lng, lat]| GeoPoint::new(lat, lng))
                .collect(),
        };

        Ok(RouteGeometry::new(points, path.distance, path.time))
    }
}
