#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse-geocoding provider clients for telemetry address enrichment.
//!
//! Two providers, both resolving "geographic point → structured address":
//!
//! 1. **OpenStreetMap Nominatim** ([`osm`]) — single-step reverse lookup,
//!    no API key. Its free-form attribute vocabulary is reconciled into
//!    the canonical field set by [`normalize`].
//! 2. **Amap** ([`amap`]) — two-step: GPS coordinates are first converted
//!    into Amap's native coordinate system, then reverse-geocoded.
//!    Requires an API key.
//!
//! Lookup failures that stem from the network or from provider-side
//! errors are *misses*, not errors: the clients log and return
//! `Ok(None)` so callers can skip the candidate and retry on a later
//! run. Only a structurally malformed payload (a field that should be a
//! string but is not) surfaces as [`GeocodeError::Shape`], which callers
//! treat as fatal.

pub mod amap;
pub mod http;
pub mod normalize;
pub mod osm;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed (transport error or timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status code.
    #[error("HTTP status {status}")]
    BadStatus {
        /// The status code returned by the server.
        status: reqwest::StatusCode,
    },

    /// Response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field that must be a string carried another JSON type.
    ///
    /// Indicates a provider schema change this client cannot reason
    /// about; callers must treat this as fatal.
    #[error("Unexpected response shape: {message}")]
    Shape {
        /// Description of the offending field.
        message: String,
    },
}

/// A normalized address produced by the primary provider, ready for
/// reconciliation against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressCandidate {
    /// Provider-native feature id — the canonical dedup key.
    pub provider_id: i64,
    /// Provider-native feature kind (e.g. `node`, `way`, `relation`).
    pub provider_kind: String,
    /// Full display name as returned by the provider.
    pub display_name: String,
    /// Latitude of the matched feature.
    pub latitude: f64,
    /// Longitude of the matched feature.
    pub longitude: f64,
    /// Short name resolved via the name fallback chain.
    pub name: String,
    /// House number, if any alias matched.
    pub house_number: Option<String>,
    /// Road, if any alias matched.
    pub road: Option<String>,
    /// Neighbourhood, if any alias matched.
    pub neighbourhood: Option<String>,
    /// City (including village/municipality vocabulary).
    pub city: Option<String>,
    /// County, if any alias matched.
    pub county: Option<String>,
    /// Postcode, if present.
    pub postcode: Option<String>,
    /// State or province.
    pub state: Option<String>,
    /// State district, if present.
    pub state_district: Option<String>,
    /// Country.
    pub country: Option<String>,
    /// The raw provider payload, persisted verbatim.
    pub raw: serde_json::Value,
}

/// An address re-resolution produced by the alternate provider.
///
/// Empty strings mean "not resolved"; the refresh driver decides which
/// fields overwrite the stored record and which merge non-destructively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshResolution {
    /// Formatted address (always present in the provider schema).
    pub display_name: String,
    /// Country (always present).
    pub country: String,
    /// Province, stored as `state` (always present).
    pub state: String,
    /// Township, stored as `county` (always present).
    pub county: String,
    /// City, with the direct-controlled-municipality override applied.
    pub city: String,
    /// Street number (always present).
    pub house_number: String,
    /// First road name; merged only when non-empty.
    pub road: String,
    /// POI-derived name; merged only when non-empty.
    pub name: String,
    /// Neighbourhood name; merged only when non-empty.
    pub neighbourhood: String,
}

/// Primary-provider capability: resolve a GPS point into a canonical
/// address candidate.
#[async_trait]
pub trait ReverseGeocode: Send + Sync {
    /// Reverse-geocodes a position.
    ///
    /// Returns `Ok(None)` on any skippable miss (transport failure,
    /// non-success status, malformed JSON, unmappable point).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Shape`] if the payload is structurally
    /// malformed beyond the documented miss cases.
    async fn reverse(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<AddressCandidate>, GeocodeError>;
}

/// Alternate-provider capability: re-resolve a GPS point through the
/// coordinate-conversion + reverse-geocode pipeline.
#[async_trait]
pub trait RefreshGeocode: Send + Sync {
    /// Re-resolves a position through the alternate provider.
    ///
    /// Returns `Ok(None)` when either step misses (transport failure,
    /// non-success HTTP status, or a provider status other than `"1"`).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Shape`] if the payload is structurally
    /// malformed beyond the documented empty-list/missing-key cases.
    async fn refresh(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<RefreshResolution>, GeocodeError>;
}
