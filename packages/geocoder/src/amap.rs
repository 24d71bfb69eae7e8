//! Amap (高德) reverse-geocoding client.
//!
//! Two-step lookup: GPS coordinates are first converted into Amap's
//! native coordinate system (`assistant/coordinate/convert`), then the
//! converted point is reverse-geocoded (`geocode/regeo`) requesting all
//! POI types and extended fields. Both steps require an API key and
//! report success through a top-level `status` field where `"1"` means
//! success.
//!
//! Amap encodes "no value" as an empty list, so field extraction walks a
//! key/index path and tolerates missing keys, out-of-range indexes, and
//! present-but-empty containers — anything else non-string is a fatal
//! shape error.

use async_trait::async_trait;
use serde_json::Value;

use crate::{GeocodeError, RefreshGeocode, RefreshResolution, http};

/// Default Amap REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://restapi.amap.com/v3";

/// The four direct-controlled municipalities, whose `city` field comes
/// back empty; `city` is computed as province + district instead.
const MUNICIPALITIES: &[&str] = &["北京市", "天津市", "上海市", "重庆市"];

/// One step of a field-extraction path.
#[derive(Debug, Clone, Copy)]
enum Seg<'a> {
    /// Descend into an object key.
    Key(&'a str),
    /// Descend into an array index.
    Idx(usize),
}

use Seg::{Idx, Key};

/// Amap two-step reverse-geocoding client.
pub struct AmapClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
    max_retries: u32,
}

impl AmapClient {
    /// Creates a client against the given base URL with the given API key.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        key: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            key: key.into(),
            max_retries,
        }
    }

    /// Fetches one Amap endpoint and validates the provider status code.
    ///
    /// Returns `Ok(None)` on transport failure, non-success HTTP status,
    /// malformed JSON, or a provider status other than `"1"`.
    async fn request(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, GeocodeError> {
        let body = match http::get_json(
            || self.client.get(url).query(query),
            self.max_retries,
        )
        .await
        {
            Ok(body) => body,
            Err(e) => {
                log::error!("amap request failed: {url}: {e}");
                return Ok(None);
            }
        };

        if !status_ok(&body) {
            log::error!("amap request rejected: {url}: {body}");
            return Ok(None);
        }

        Ok(Some(body))
    }

    /// Converts a GPS coordinate pair into Amap's coordinate system.
    ///
    /// Returns `(longitude, latitude)` rounded to 6 decimal digits, or
    /// `None` when the conversion call misses.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] only for fatal payload shapes.
    async fn convert(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<(f64, f64)>, GeocodeError> {
        let url = format!("{}/assistant/coordinate/convert", self.base_url);
        let locations = format!("{longitude},{latitude}");

        let Some(body) = self
            .request(
                &url,
                &[
                    ("key", self.key.as_str()),
                    ("coordsys", "gps"),
                    ("output", "json"),
                    ("locations", locations.as_str()),
                ],
            )
            .await?
        else {
            return Ok(None);
        };

        let Some(converted) = body["locations"].as_str().and_then(parse_locations) else {
            log::error!("amap conversion returned unparsable locations: {body}");
            return Ok(None);
        };

        Ok(Some(converted))
    }
}

#[async_trait]
impl RefreshGeocode for AmapClient {
    async fn refresh(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<RefreshResolution>, GeocodeError> {
        let Some((lon, lat)) = self.convert(latitude, longitude).await? else {
            return Ok(None);
        };

        let url = format!("{}/geocode/regeo", self.base_url);
        let location = format!("{lon},{lat}");

        let Some(body) = self
            .request(
                &url,
                &[
                    ("key", self.key.as_str()),
                    ("output", "json"),
                    ("location", location.as_str()),
                    ("poitype", "all"),
                    ("extensions", "all"),
                ],
            )
            .await?
        else {
            return Ok(None);
        };

        parse_regeo(&body).map(Some)
    }
}

/// Amap reports success through a top-level `status` of `"1"`.
fn status_ok(body: &Value) -> bool {
    body["status"].as_str() == Some("1")
}

/// Parses a `"lon,lat"` string pair, rounding each to 6 decimal digits.
fn parse_locations(locations: &str) -> Option<(f64, f64)> {
    let (lon, lat) = locations.split_once(',')?;
    Some((round6(lon.parse().ok()?), round6(lat.parse().ok()?)))
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Walks a key/index path into the payload.
///
/// A missing key, an out-of-range index, or a present-but-empty
/// list/object terminal yields an empty string.
///
/// # Errors
///
/// Returns [`GeocodeError::Shape`] for any other non-string terminal.
fn field(root: &Value, path: &[Seg<'_>]) -> Result<String, GeocodeError> {
    let mut item = root;
    for seg in path {
        let next = match *seg {
            Key(key) => item.get(key),
            Idx(index) => item.get(index),
        };
        match next {
            Some(value) => item = value,
            None => return Ok(String::new()),
        }
    }

    match item {
        Value::String(s) => Ok(s.clone()),
        Value::Array(a) if a.is_empty() => Ok(String::new()),
        Value::Object(o) if o.is_empty() => Ok(String::new()),
        other => Err(GeocodeError::Shape {
            message: format!("amap field is not a string: {other}"),
        }),
    }
}

/// Parses a `regeo` payload into a [`RefreshResolution`].
///
/// # Errors
///
/// Returns [`GeocodeError::Shape`] if a field terminal is present but
/// not a string (beyond the documented empty-container cases).
pub fn parse_regeo(body: &Value) -> Result<RefreshResolution, GeocodeError> {
    let country = field(body, &[Key("regeocode"), Key("addressComponent"), Key("country")])?;
    let province = field(body, &[Key("regeocode"), Key("addressComponent"), Key("province")])?;

    let city = if MUNICIPALITIES.contains(&province.as_str()) {
        let district = field(
            body,
            &[Key("regeocode"), Key("addressComponent"), Key("district")],
        )?;
        format!("{province}{district}")
    } else {
        field(body, &[Key("regeocode"), Key("addressComponent"), Key("city")])?
    };

    let township = field(
        body,
        &[Key("regeocode"), Key("addressComponent"), Key("township")],
    )?;
    let display_name = field(body, &[Key("regeocode"), Key("formatted_address")])?;
    let neighbourhood = field(
        body,
        &[
            Key("regeocode"),
            Key("addressComponent"),
            Key("neighborhood"),
            Key("name"),
        ],
    )?;
    let house_number = field(
        body,
        &[
            Key("regeocode"),
            Key("addressComponent"),
            Key("streetNumber"),
            Key("number"),
        ],
    )?;
    let road = field(body, &[Key("regeocode"), Key("roads"), Idx(0), Key("name")])?;

    // POI name chain: an AOI cluster name, then a single POI, then the
    // nearest road.
    let mut name = field(body, &[Key("regeocode"), Key("aois"), Idx(0), Key("name")])?;
    if name.is_empty() {
        name = field(body, &[Key("regeocode"), Key("pois"), Idx(0), Key("name")])?;
    }
    if name.is_empty() {
        name = road.clone();
    }

    Ok(RefreshResolution {
        display_name,
        country,
        state: province,
        county: township,
        city,
        house_number,
        road,
        name,
        neighbourhood,
    })
}
