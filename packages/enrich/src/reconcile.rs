//! Address reconciliation: dedup-by-provider-id upsert.
//!
//! Two positions frequently geocode to the same feature (a parking lot,
//! a charger site), so resolution first checks the store by
//! provider-native id and only inserts a never-seen feature. The insert
//! is conflict-tolerant; when a concurrent writer wins the race, the
//! re-select converges on its row.

use tripgeo_geocoder::{AddressCandidate, ReverseGeocode};
use tripgeo_store::{AddressSummary, NewAddress, Position, Store};

use crate::EnrichError;

/// Resolves a position to a stored address record, inserting it on
/// first sight.
///
/// Returns `Ok(None)` when the provider lookup misses; the caller skips
/// the entity this round and retries on a later run.
///
/// # Errors
///
/// Returns [`EnrichError`] on store failures or fatal provider payload
/// shapes.
pub async fn resolve_address(
    store: &dyn Store,
    geocoder: &dyn ReverseGeocode,
    position: &Position,
) -> Result<Option<AddressSummary>, EnrichError> {
    let Some(candidate) = geocoder.reverse(position.latitude, position.longitude).await? else {
        return Ok(None);
    };

    if let Some(existing) = store.address_by_provider_id(candidate.provider_id).await? {
        log::info!(
            "address already exists: {}, {}",
            candidate.provider_id,
            existing.display_name
        );
        return Ok(Some(existing));
    }

    let address = new_address(candidate);
    if let Some(inserted) = store.insert_address(&address).await? {
        log::info!("address added: {}", inserted.display_name);
        return Ok(Some(inserted));
    }

    // A concurrent run inserted this provider id between the lookup and
    // the insert; the unique key makes the re-select authoritative.
    Ok(store.address_by_provider_id(address.provider_id).await?)
}

fn new_address(candidate: AddressCandidate) -> NewAddress {
    NewAddress {
        provider_id: candidate.provider_id,
        provider_kind: candidate.provider_kind,
        display_name: candidate.display_name,
        latitude: candidate.latitude,
        longitude: candidate.longitude,
        name: candidate.name,
        house_number: candidate.house_number,
        road: candidate.road,
        neighbourhood: candidate.neighbourhood,
        city: candidate.city,
        county: candidate.county,
        postcode: candidate.postcode,
        state: candidate.state,
        state_district: candidate.state_district,
        country: candidate.country,
        raw: candidate.raw,
    }
}
