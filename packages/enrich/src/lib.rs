#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch address enrichment for telemetry drives and charging sessions.
//!
//! Two independent drivers share one shape — count, fetch a bounded
//! batch, process one entity at a time, commit, repeat:
//!
//! - [`gap_fill`] resolves missing address links through the primary
//!   provider.
//! - [`refresh`] re-resolves existing address records through the
//!   alternate provider to improve field quality, driven by an explicit
//!   id cursor.
//!
//! [`run`] orchestrates them sequentially according to the configured
//! mode, optionally re-running after an idle interval. Lookup misses are
//! skipped and retried on a later run; only store corruption and
//! structurally malformed provider payloads abort the run.

pub mod gap_fill;
pub mod reconcile;
pub mod refresh;

use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;
use tripgeo_geocoder::{GeocodeError, RefreshGeocode, ReverseGeocode};
use tripgeo_store::{Store, StoreError};

/// Errors that abort an enrichment run.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Store query or transaction failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fatal provider payload shape error.
    #[error("Geocode error: {0}")]
    Geocode(#[from] GeocodeError),

    /// A drive or charging session references a position row that does
    /// not exist. Positions are foreign keys, so this indicates store
    /// corruption the system cannot safely reason about.
    #[error("Position {position_id} is not in the store")]
    MissingPosition {
        /// The dangling position id.
        position_id: i64,
    },
}

/// Which driver(s) a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Only fill missing address links.
    GapFill,
    /// Only re-resolve existing addresses.
    Refresh,
    /// Gap-fill first, then refresh.
    Both,
}

impl RunMode {
    const fn includes_gap_fill(self) -> bool {
        matches!(self, Self::GapFill | Self::Both)
    }

    const fn includes_refresh(self) -> bool {
        matches!(self, Self::Refresh | Self::Both)
    }
}

/// Immutable run configuration, resolved once before any core logic
/// runs.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Rows per batch (and per transaction).
    pub batch_size: i64,
    /// Run mode.
    pub mode: RunMode,
    /// Refresh floor: only addresses updated at or after this instant
    /// are re-resolved.
    pub since: NaiveDateTime,
    /// Alternate-provider API key; empty means the refresh driver is a
    /// no-op.
    pub refresh_key: String,
    /// Idle delay between orchestration rounds; zero means run once.
    pub poll_interval: Duration,
}

/// Runs the selected drivers until no work remains, re-triggering after
/// the poll interval if one is configured.
///
/// # Errors
///
/// Returns [`EnrichError`] on store failures, dangling position
/// references, or fatal provider payload shapes. The caller converts
/// these into a non-zero exit.
pub async fn run(
    store: &dyn Store,
    primary: &dyn ReverseGeocode,
    alternate: &dyn RefreshGeocode,
    config: &EnrichConfig,
) -> Result<(), EnrichError> {
    // The refresh cursor lives for the whole process, not one pass:
    // refreshing bumps `updated_at`, so a pass-local cursor would make
    // interval mode re-resolve every address on every pass.
    let mut refresh_cursor = 0i64;

    loop {
        if config.mode.includes_gap_fill() {
            let filled = gap_fill::run(store, primary, config.batch_size).await?;
            log::info!("gap-fill pass done, {filled} records linked");
        }
        if config.mode.includes_refresh() {
            let (refreshed, cursor) =
                refresh::run(store, alternate, config, refresh_cursor).await?;
            refresh_cursor = cursor;
            log::info!("refresh pass done, {refreshed} addresses updated");
        }

        if config.poll_interval.is_zero() {
            return Ok(());
        }
        log::info!("sleeping {:?} until the next pass", config.poll_interval);
        tokio::time::sleep(config.poll_interval).await;
    }
}
