//! Refresh driver: re-resolves stored addresses via the alternate
//! provider.
//!
//! Candidates are address records updated at or after the configured
//! floor, visited in id order through an explicit cursor threaded
//! through the batch loop. The cursor advances past every *attempted*
//! row: a row whose lookup misses is skipped until the cursor resets.
//! The caller owns the cursor and keeps it across poll-interval passes,
//! so a refreshed row (whose `updated_at` bump would make it eligible
//! again) is not re-resolved until the process restarts. Each pass
//! therefore visits each candidate at most once and terminates even
//! when misses and successes interleave.

use tripgeo_geocoder::{RefreshGeocode, RefreshResolution};
use tripgeo_store::{AddressPatch, Store};

use crate::{EnrichConfig, EnrichError};

/// Outcome of one refresh batch.
struct BatchOutcome {
    /// Rows returned by the candidate fetch.
    fetched: usize,
    /// Rows successfully re-resolved and updated.
    processed: u64,
    /// Highest attempted row id.
    cursor: i64,
}

/// Runs the refresh driver to completion, starting past `cursor`.
///
/// Returns the number of addresses updated and the advanced cursor; the
/// caller passes the cursor back in on the next pass so already-visited
/// ids are not re-resolved within the same process.
///
/// Requires the alternate-provider API key; without it the whole run is
/// a no-op that reports zero processed.
///
/// # Errors
///
/// Returns [`EnrichError`] on store failures or fatal provider payload
/// shapes. The open batch is rolled back before the error propagates.
pub async fn run(
    store: &dyn Store,
    geocoder: &dyn RefreshGeocode,
    config: &EnrichConfig,
    cursor: i64,
) -> Result<(u64, i64), EnrichError> {
    if config.refresh_key.is_empty() {
        log::error!("refresh requires an API key, skipping the refresh pass");
        return Ok((0, cursor));
    }

    let mut cursor = cursor;
    let mut total = 0u64;

    loop {
        log::info!("checking addresses to refresh...");
        let remaining = store.refreshable_count(config.since, cursor).await?;

        store.begin().await?;
        let outcome =
            match refresh_batch(store, geocoder, config, cursor, remaining).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    store.rollback().await?;
                    return Err(e);
                }
            };

        if outcome.fetched == 0 {
            store.rollback().await?;
            return Ok((total, cursor));
        }

        if outcome.processed == 0 {
            // The batch only skipped misses; nothing to commit, but the
            // cursor still moves past the attempted rows.
            store.rollback().await?;
        } else {
            log::info!("saving...");
            store.commit().await?;
        }

        cursor = outcome.cursor;
        total += outcome.processed;
    }
}

async fn refresh_batch(
    store: &dyn Store,
    geocoder: &dyn RefreshGeocode,
    config: &EnrichConfig,
    cursor: i64,
    remaining: u64,
) -> Result<BatchOutcome, EnrichError> {
    let rows = store
        .refreshable_addresses(config.since, cursor, config.batch_size)
        .await?;

    let mut next_cursor = cursor;
    let mut processed = 0u64;

    for row in &rows {
        log::info!(
            "refreshing address ({} left)",
            remaining.saturating_sub(processed)
        );
        next_cursor = row.id;

        let Some(resolution) = geocoder.refresh(row.latitude, row.longitude).await? else {
            continue;
        };

        let patch = merge_patch(&resolution);
        log::info!(
            "updating address from {} to {}",
            row.display_name,
            patch.display_name
        );
        store.apply_refresh(row.id, &patch).await?;
        processed += 1;
    }

    Ok(BatchOutcome {
        fetched: rows.len(),
        processed,
        cursor: next_cursor,
    })
}

/// Converts a re-resolution into a store patch.
///
/// The alternate provider's schema treats display name, country,
/// province, township, city, and street number as always-present, so
/// they overwrite unconditionally. Road, name, and neighbourhood merge
/// non-destructively: an unresolved value must not erase a field the
/// primary provider filled.
#[must_use]
pub fn merge_patch(resolution: &RefreshResolution) -> AddressPatch {
    AddressPatch {
        display_name: resolution.display_name.clone(),
        country: resolution.country.clone(),
        state: resolution.state.clone(),
        county: resolution.county.clone(),
        city: resolution.city.clone(),
        house_number: resolution.house_number.clone(),
        road: non_empty(&resolution.road),
        name: non_empty(&resolution.name),
        neighbourhood: non_empty(&resolution.neighbourhood),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
