//! Reverse geocoding backends.
//!
//! [`OfflineGeocoder`] never resolves anything, which leaves labelling to the
//! resolver's regional fallback. With the `http-geocoder` feature,
//! [`NominatimGeocoder`] queries an OpenStreetMap Nominatim server.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "http-geocoder")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use drivelog_core::geocoder::NominatimGeocoder;
//! use drivelog_core::Geocoder;
//! use drivelog_types::Coordinate;
//!
//! let geocoder = NominatimGeocoder::new("https://nominatim.openstreetmap.org")?;
//! let placemarks = geocoder
//!     .reverse_geocode(Coordinate::new(51.5007, -0.1246)?)
//!     .await?;
//! println!("{:?}", placemarks.first());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use drivelog_types::{Coordinate, Placemark};

use crate::error::{Error, Result};
use crate::traits::Geocoder;

/// A geocoder for hosts without a geocoding service.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGeocoder;

#[async_trait]
impl Geocoder for OfflineGeocoder {
    async fn reverse_geocode(&self, _coordinate: Coordinate) -> Result<Vec<Placemark>> {
        Err(Error::ResolutionUnavailable(
            "no geocoder configured".to_string(),
        ))
    }
}

#[cfg(feature = "http-geocoder")]
pub use nominatim::NominatimGeocoder;

#[cfg(feature = "http-geocoder")]
mod nominatim {
    use std::time::Duration;

    use reqwest::Client;
    use serde::Deserialize;
    use tracing::debug;

    use super::*;

    const USER_AGENT: &str = concat!("drivelog/", env!("CARGO_PKG_VERSION"));

    /// Reverse geocoding against a Nominatim server.
    #[derive(Debug, Clone)]
    pub struct NominatimGeocoder {
        client: Client,
        base_url: String,
    }

    #[derive(Debug, Deserialize)]
    struct ReverseResponse {
        name: Option<String>,
        #[serde(default)]
        address: NominatimAddress,
    }

    #[derive(Debug, Default, Deserialize)]
    struct NominatimAddress {
        road: Option<String>,
        suburb: Option<String>,
        neighbourhood: Option<String>,
        city: Option<String>,
        town: Option<String>,
        village: Option<String>,
        county: Option<String>,
        state: Option<String>,
        country: Option<String>,
    }

    impl From<ReverseResponse> for Placemark {
        fn from(response: ReverseResponse) -> Self {
            let address = response.address;
            Placemark {
                name: response.name.filter(|n| !n.is_empty()).or(address.road),
                sub_locality: address.suburb.or(address.neighbourhood),
                locality: address.city.or(address.town).or(address.village),
                sub_administrative_area: address.county,
                administrative_area: address.state,
                country: address.country,
            }
        }
    }

    impl NominatimGeocoder {
        /// Create a geocoder for the server at `base_url`.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(Error::invalid_config(format!(
                    "geocoder URL must start with http:// or https://: {}",
                    base_url
                )));
            }

            let client = Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| Error::invalid_config(format!("HTTP client: {}", e)))?;

            Ok(Self { client, base_url })
        }

        /// The server URL.
        pub fn base_url(&self) -> &str {
            &self.base_url
        }
    }

    #[async_trait]
    impl Geocoder for NominatimGeocoder {
        async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Vec<Placemark>> {
            let url = format!("{}/reverse", self.base_url);
            debug!("Reverse geocoding {} via {}", coordinate, url);

            let response = self
                .client
                .get(&url)
                .query(&[
                    ("format", "jsonv2".to_string()),
                    ("lat", coordinate.latitude.to_string()),
                    ("lon", coordinate.longitude.to_string()),
                ])
                .send()
                .await
                .map_err(|e| Error::unavailable(format!("geocoder request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(Error::ResolutionUnavailable(format!(
                    "geocoder returned {}",
                    response.status()
                )));
            }

            let body: ReverseResponse = response
                .json()
                .await
                .map_err(|e| Error::ResolutionUnavailable(e.to_string()))?;
            Ok(vec![body.into()])
        }
    }

}
