use reqwest::Url;

use crate::package_api::Package;

pub const DEFAULT_MAPS_HOST: &str = "www.google.com/maps";

/// Builds the deep link handed to the external navigation surface:
/// `https://<mapsHost>/dir/?api=1&destination=<lat,lng | address>`.
///
/// The coordinate form is preferred; the street address is the fallback for
/// stops the backend never geocoded.
pub fn navigation_deep_link(maps_host: &str, package: &Package) -> String {
    let destination = if package.location.validate().is_ok() {
        format!("{},{}", package.location.lat, package.location.lng)
    } else {
        package.address.clone()
    };

    match Url::parse(&format!("https://{maps_host}/dir/")) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("api", "1")
                .append_pair("destination", &destination);
            url.into()
        }
        // A malformed host still yields a usable-looking link.
        Err(_) => format!("https://{maps_host}/dir/?api=1&destination={destination}"),
    }
}
