//! OpenStreetMap Nominatim reverse-geocoding client.
//!
//! One HTTP GET per position, requesting address details, extra tags,
//! and name details at a fixed zoom. The public instance enforces strict
//! rate limits; this client issues one request at a time.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{AddressCandidate, GeocodeError, ReverseGeocode, http, normalize};

/// Default Nominatim endpoint.
pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

/// Zoom level for reverse lookups (building-level detail).
const ZOOM: &str = "18";

/// Nominatim reverse-geocoding client.
pub struct OsmClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl OsmClient {
    /// Creates a client against the given base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            max_retries,
        }
    }
}

#[async_trait]
impl ReverseGeocode for OsmClient {
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<AddressCandidate>, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let lat = format!("{latitude:.6}");
        let lon = format!("{longitude:.6}");

        let body = match http::get_json(
            || {
                self.client.get(&url).query(&[
                    ("lat", lat.as_str()),
                    ("lon", lon.as_str()),
                    ("format", "jsonv2"),
                    ("addressdetails", "1"),
                    ("extratags", "1"),
                    ("namedetails", "1"),
                    ("zoom", ZOOM),
                ])
            },
            self.max_retries,
        )
        .await
        {
            Ok(body) => body,
            Err(e) => {
                log::error!("reverse lookup failed for {lat},{lon}: {e}");
                return Ok(None);
            }
        };

        parse_place(&body)
    }
}

/// Parses a Nominatim reverse-geocode payload into a candidate.
///
/// Returns `Ok(None)` for payloads without a usable feature (Nominatim
/// answers `{"error": ...}` for unmappable points) or with garbled
/// required fields.
///
/// # Errors
///
/// Returns [`GeocodeError::Shape`] if an address field is present but
/// not a string.
pub fn parse_place(body: &Value) -> Result<Option<AddressCandidate>, GeocodeError> {
    let Some(provider_id) = body["osm_id"].as_i64() else {
        if let Some(error) = body["error"].as_str() {
            log::warn!("provider could not resolve the point: {error}");
        } else {
            log::warn!("reverse lookup payload has no feature id, skipping");
        }
        return Ok(None);
    };

    let Some(display_name) = body["display_name"].as_str() else {
        log::warn!("feature {provider_id} has no display name, skipping");
        return Ok(None);
    };

    // Coordinates arrive as strings in the jsonv2 format.
    let latitude = body["lat"].as_str().and_then(|s| s.parse::<f64>().ok());
    let longitude = body["lon"].as_str().and_then(|s| s.parse::<f64>().ok());
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        log::warn!("feature {provider_id} has unparsable coordinates, skipping");
        return Ok(None);
    };

    let empty = Map::new();
    let address = body["address"].as_object().unwrap_or(&empty);

    Ok(Some(AddressCandidate {
        provider_id,
        provider_kind: body["osm_type"].as_str().unwrap_or_default().to_string(),
        display_name: display_name.to_string(),
        latitude,
        longitude,
        name: normalize::place_name(body),
        house_number: normalize::field(address, normalize::HOUSE_NUMBER_ALIASES)?,
        road: normalize::field(address, normalize::ROAD_ALIASES)?,
        neighbourhood: normalize::field(address, normalize::NEIGHBOURHOOD_ALIASES)?,
        city: normalize::field(address, normalize::CITY_ALIASES)?,
        county: normalize::field(address, normalize::COUNTY_ALIASES)?,
        postcode: normalize::field(address, normalize::POSTCODE_ALIASES)?,
        state: normalize::field(address, normalize::STATE_ALIASES)?,
        state_district: normalize::field(address, normalize::STATE_DISTRICT_ALIASES)?,
        country: normalize::field(address, normalize::COUNTRY_ALIASES)?,
        raw: body.clone(),
    }))
}
