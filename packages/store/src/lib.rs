#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Access to the telemetry store for address enrichment.
//!
//! The telemetry collector owns the schema and writes positions, drives,
//! and charging sessions concurrently with this system's reads; this
//! crate only reads pending entities, inserts/updates address records,
//! and fills previously-null address links.
//!
//! The [`Store`] trait is the seam between the batch drivers and
//! Postgres so driver semantics (batch atomicity, cursor handling,
//! dedup) are testable against an in-memory implementation. [`pg`]
//! provides the real one.

pub mod pg;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query or connection error.
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

/// A recorded GPS position. Read-only input; never created or mutated
/// by this system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Row id, referenced by drives and charging sessions.
    pub id: i64,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

/// A drive with both endpoints recorded but at least one address link
/// missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDrive {
    /// Drive row id.
    pub id: i64,
    /// Start position id (non-null in the candidate set).
    pub start_position_id: i64,
    /// End position id (non-null in the candidate set).
    pub end_position_id: i64,
}

/// A charging session with a recorded position but no address link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCharge {
    /// Charging session row id.
    pub id: i64,
    /// Position id (non-null in the candidate set).
    pub position_id: i64,
}

/// The id and display name of a stored address record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSummary {
    /// Address row id.
    pub id: i64,
    /// Display name, used for logging.
    pub display_name: String,
}

/// A fully normalized address ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAddress {
    /// Provider-native feature id (unique key).
    pub provider_id: i64,
    /// Provider-native feature kind.
    pub provider_kind: String,
    /// Full display name.
    pub display_name: String,
    /// Latitude of the matched feature.
    pub latitude: f64,
    /// Longitude of the matched feature.
    pub longitude: f64,
    /// Short name.
    pub name: String,
    /// House number, if resolved.
    pub house_number: Option<String>,
    /// Road, if resolved.
    pub road: Option<String>,
    /// Neighbourhood, if resolved.
    pub neighbourhood: Option<String>,
    /// City, if resolved.
    pub city: Option<String>,
    /// County, if resolved.
    pub county: Option<String>,
    /// Postcode, if resolved.
    pub postcode: Option<String>,
    /// State, if resolved.
    pub state: Option<String>,
    /// State district, if resolved.
    pub state_district: Option<String>,
    /// Country, if resolved.
    pub country: Option<String>,
    /// Raw provider payload.
    pub raw: serde_json::Value,
}

/// An address record eligible for re-resolution by the refresh driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshableAddress {
    /// Address row id — the refresh cursor orders by this.
    pub id: i64,
    /// Stored latitude.
    pub latitude: f64,
    /// Stored longitude.
    pub longitude: f64,
    /// Current display name, used for logging the change.
    pub display_name: String,
}

/// Field updates produced by a refresh re-resolution.
///
/// Plain `String` fields always overwrite (the alternate provider's
/// schema treats them as always-present); `Option` fields are merged
/// non-destructively — `None` means "leave the stored value alone".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressPatch {
    /// New display name.
    pub display_name: String,
    /// New country.
    pub country: String,
    /// New state (province).
    pub state: String,
    /// New county (township).
    pub county: String,
    /// New city.
    pub city: String,
    /// New house number.
    pub house_number: String,
    /// New road, only when resolved.
    pub road: Option<String>,
    /// New name, only when resolved.
    pub name: Option<String>,
    /// New neighbourhood, only when resolved.
    pub neighbourhood: Option<String>,
}

/// Store operations used by the batch drivers.
///
/// `begin`/`commit` bracket one batch; everything between them must land
/// atomically or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a batch transaction.
    async fn begin(&self) -> Result<(), StoreError>;

    /// Commits the current batch transaction.
    async fn commit(&self) -> Result<(), StoreError>;

    /// Rolls back the current batch transaction.
    async fn rollback(&self) -> Result<(), StoreError>;

    /// Counts drives with recorded positions but a missing address link.
    async fn unlinked_drive_count(&self) -> Result<u64, StoreError>;

    /// Counts charging sessions with a recorded position but no address
    /// link.
    async fn unlinked_charge_count(&self) -> Result<u64, StoreError>;

    /// Fetches up to `limit` drives missing an address link.
    async fn unlinked_drives(&self, limit: i64) -> Result<Vec<PendingDrive>, StoreError>;

    /// Fetches up to `limit` charging sessions missing an address link.
    async fn unlinked_charges(&self, limit: i64) -> Result<Vec<PendingCharge>, StoreError>;

    /// Looks up a position by id. `None` indicates a dangling foreign
    /// key, which callers treat as store corruption.
    async fn position(&self, id: i64) -> Result<Option<Position>, StoreError>;

    /// Looks up an address record by provider-native id.
    async fn address_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<AddressSummary>, StoreError>;

    /// Inserts a new address record, keyed by provider-native id.
    ///
    /// Returns `None` when a concurrent writer inserted the same
    /// provider id first (the insert is conflict-tolerant); callers
    /// re-select in that case.
    async fn insert_address(
        &self,
        address: &NewAddress,
    ) -> Result<Option<AddressSummary>, StoreError>;

    /// Fills a drive's address links. Links that are already set are
    /// left untouched.
    async fn link_drive(
        &self,
        drive_id: i64,
        start_address_id: i64,
        end_address_id: i64,
    ) -> Result<(), StoreError>;

    /// Fills a charging session's address link if it is still null.
    async fn link_charge(&self, charge_id: i64, address_id: i64) -> Result<(), StoreError>;

    /// Counts address records eligible for refresh: updated at or after
    /// `since` with an id above `cursor`.
    async fn refreshable_count(
        &self,
        since: NaiveDateTime,
        cursor: i64,
    ) -> Result<u64, StoreError>;

    /// Fetches up to `limit` refresh candidates ordered by id.
    async fn refreshable_addresses(
        &self,
        since: NaiveDateTime,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<RefreshableAddress>, StoreError>;

    /// Applies a refresh patch to an address record and bumps its
    /// `updated_at`.
    async fn apply_refresh(&self, id: i64, patch: &AddressPatch) -> Result<(), StoreError>;
}
