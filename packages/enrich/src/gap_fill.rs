//! Gap-fill driver: links drives and charging sessions to addresses.
//!
//! Candidate set: drives with both positions recorded but at least one
//! address link missing, topped up with unlinked charging sessions to
//! the batch-size budget. Each batch is one transaction; the run ends
//! after a batch that makes no progress, which covers both the empty
//! store and a residue of candidates the provider cannot resolve.

use tripgeo_geocoder::ReverseGeocode;
use tripgeo_store::{Position, Store};

use crate::{EnrichError, reconcile};

/// Runs the gap-fill driver to completion.
///
/// Returns the number of entities linked.
///
/// # Errors
///
/// Returns [`EnrichError`] on store failures, dangling position
/// references, or fatal provider payload shapes. The open batch is
/// rolled back before the error propagates.
pub async fn run(
    store: &dyn Store,
    geocoder: &dyn ReverseGeocode,
    batch_size: i64,
) -> Result<u64, EnrichError> {
    let mut total = 0u64;

    loop {
        log::info!("checking unlinked records...");
        let pending =
            store.unlinked_drive_count().await? + store.unlinked_charge_count().await?;

        store.begin().await?;
        let processed = match fill_batch(store, geocoder, batch_size, pending).await {
            Ok(processed) => processed,
            Err(e) => {
                store.rollback().await?;
                return Err(e);
            }
        };

        if processed == 0 {
            store.rollback().await?;
            return Ok(total);
        }

        log::info!("saving...");
        store.commit().await?;
        total += processed;
    }
}

/// Processes one batch: drives first, then charging sessions up to the
/// remaining budget.
async fn fill_batch(
    store: &dyn Store,
    geocoder: &dyn ReverseGeocode,
    batch_size: i64,
    pending: u64,
) -> Result<u64, EnrichError> {
    let mut processed = 0u64;

    let drives = store.unlinked_drives(batch_size).await?;
    let budget_left = batch_size - i64::try_from(drives.len()).unwrap_or(batch_size);
    let charges = if budget_left > 0 {
        store.unlinked_charges(budget_left).await?
    } else {
        Vec::new()
    };

    for drive in &drives {
        log::info!(
            "processing drive address ({} left)",
            pending.saturating_sub(processed)
        );

        let start = position(store, drive.start_position_id).await?;
        let end = position(store, drive.end_position_id).await?;

        let start_address = reconcile::resolve_address(store, geocoder, &start).await?;
        let end_address = reconcile::resolve_address(store, geocoder, &end).await?;

        // Both endpoints must resolve before either link is written;
        // a half-linked drive would never be revisited.
        let (Some(start_address), Some(end_address)) = (start_address, end_address) else {
            continue;
        };

        store
            .link_drive(drive.id, start_address.id, end_address.id)
            .await?;
        log::info!(
            "drive {} linked: {} -> {}",
            drive.id,
            start_address.display_name,
            end_address.display_name
        );
        processed += 1;
    }

    for charge in &charges {
        log::info!(
            "processing charging address ({} left)",
            pending.saturating_sub(processed)
        );

        let at = position(store, charge.position_id).await?;
        let Some(address) = reconcile::resolve_address(store, geocoder, &at).await? else {
            continue;
        };

        store.link_charge(charge.id, address.id).await?;
        log::info!(
            "charging session {} linked: {}",
            charge.id,
            address.display_name
        );
        processed += 1;
    }

    Ok(processed)
}

async fn position(store: &dyn Store, id: i64) -> Result<Position, EnrichError> {
    store
        .position(id)
        .await?
        .ok_or(EnrichError::MissingPosition { position_id: id })
}
