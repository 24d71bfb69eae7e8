//! Driver-level tests against an in-memory store and stub providers.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tripgeo_enrich::{gap_fill, refresh, EnrichConfig, EnrichError, RunMode};
use tripgeo_geocoder::{
    AddressCandidate, GeocodeError, RefreshGeocode, RefreshResolution, ReverseGeocode,
};
use tripgeo_store::{
    AddressPatch, AddressSummary, NewAddress, PendingCharge, PendingDrive, Position,
    RefreshableAddress, Store, StoreError,
};

#[derive(Debug, Clone)]
struct DriveRow {
    id: i64,
    start_position_id: i64,
    end_position_id: i64,
    start_address_id: Option<i64>,
    end_address_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ChargeRow {
    id: i64,
    position_id: i64,
    address_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct AddressRow {
    id: i64,
    provider_id: i64,
    display_name: String,
    latitude: f64,
    longitude: f64,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Default)]
struct State {
    drives: Vec<DriveRow>,
    charges: Vec<ChargeRow>,
    positions: Vec<Position>,
    addresses: Vec<AddressRow>,
    patches: Vec<(i64, AddressPatch)>,
    next_address_id: i64,
    begins: u32,
    commits: u32,
    rollbacks: u32,
    /// When set, the next insert lands but reports a conflict, as if a
    /// concurrent writer inserted the same provider id first.
    conflict_next_insert: bool,
}

#[derive(Debug, Default)]
struct MockStore {
    state: Mutex<State>,
}

impl MockStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_address_id: 1,
                ..State::default()
            }),
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.state.lock().unwrap());
    }

    fn snapshot<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn begin(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().begins += 1;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }

    async fn unlinked_drive_count(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .drives
            .iter()
            .filter(|d| d.start_address_id.is_none() || d.end_address_id.is_none())
            .count() as u64)
    }

    async fn unlinked_charge_count(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .charges
            .iter()
            .filter(|c| c.address_id.is_none())
            .count() as u64)
    }

    async fn unlinked_drives(&self, limit: i64) -> Result<Vec<PendingDrive>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .drives
            .iter()
            .filter(|d| d.start_address_id.is_none() || d.end_address_id.is_none())
            .take(usize::try_from(limit).unwrap())
            .map(|d| PendingDrive {
                id: d.id,
                start_position_id: d.start_position_id,
                end_position_id: d.end_position_id,
            })
            .collect())
    }

    async fn unlinked_charges(&self, limit: i64) -> Result<Vec<PendingCharge>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .charges
            .iter()
            .filter(|c| c.address_id.is_none())
            .take(usize::try_from(limit).unwrap())
            .map(|c| PendingCharge {
                id: c.id,
                position_id: c.position_id,
            })
            .collect())
    }

    async fn position(&self, id: i64) -> Result<Option<Position>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.positions.iter().find(|p| p.id == id).copied())
    }

    async fn address_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<AddressSummary>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.provider_id == provider_id)
            .map(|a| AddressSummary {
                id: a.id,
                display_name: a.display_name.clone(),
            }))
    }

    async fn insert_address(
        &self,
        address: &NewAddress,
    ) -> Result<Option<AddressSummary>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state
            .addresses
            .iter()
            .any(|a| a.provider_id == address.provider_id)
        {
            return Ok(None);
        }
        let id = state.next_address_id;
        state.next_address_id += 1;
        state.addresses.push(AddressRow {
            id,
            provider_id: address.provider_id,
            display_name: address.display_name.clone(),
            latitude: address.latitude,
            longitude: address.longitude,
            updated_at: day(15),
        });
        if state.conflict_next_insert {
            state.conflict_next_insert = false;
            return Ok(None);
        }
        Ok(Some(AddressSummary {
            id,
            display_name: address.display_name.clone(),
        }))
    }

    async fn link_drive(
        &self,
        drive_id: i64,
        start_address_id: i64,
        end_address_id: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let drive = state
            .drives
            .iter_mut()
            .find(|d| d.id == drive_id)
            .expect("drive exists");
        drive.start_address_id = drive.start_address_id.or(Some(start_address_id));
        drive.end_address_id = drive.end_address_id.or(Some(end_address_id));
        Ok(())
    }

    async fn link_charge(&self, charge_id: i64, address_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let charge = state
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id)
            .expect("charge exists");
        charge.address_id = charge.address_id.or(Some(address_id));
        Ok(())
    }

    async fn refreshable_count(
        &self,
        since: NaiveDateTime,
        cursor: i64,
    ) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .filter(|a| a.updated_at >= since && a.id > cursor)
            .count() as u64)
    }

    async fn refreshable_addresses(
        &self,
        since: NaiveDateTime,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<RefreshableAddress>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<_> = state
            .addresses
            .iter()
            .filter(|a| a.updated_at >= since && a.id > cursor)
            .map(|a| RefreshableAddress {
                id: a.id,
                latitude: a.latitude,
                longitude: a.longitude,
                display_name: a.display_name.clone(),
            })
            .collect();
        rows.sort_by_key(|a| a.id);
        rows.truncate(usize::try_from(limit).unwrap());
        Ok(rows)
    }

    async fn apply_refresh(&self, id: i64, patch: &AddressPatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let address = state
            .addresses
            .iter_mut()
            .find(|a| a.id == id)
            .expect("address exists");
        address.display_name = patch.display_name.clone();
        state.patches.push((id, patch.clone()));
        Ok(())
    }
}

/// Stub primary provider: answers per position, keyed by rounded
/// latitude.
#[derive(Debug, Default)]
struct StubReverse {
    answers: BTreeMap<i64, AddressCandidate>,
    calls: Mutex<u32>,
}

impl StubReverse {
    fn answer(mut self, latitude: f64, candidate: AddressCandidate) -> Self {
        self.answers.insert(latitude as i64, candidate);
        self
    }
}

#[async_trait]
impl ReverseGeocode for StubReverse {
    async fn reverse(
        &self,
        latitude: f64,
        _longitude: f64,
    ) -> Result<Option<AddressCandidate>, GeocodeError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.answers.get(&(latitude as i64)).cloned())
    }
}

/// Stub alternate provider: answers per position, keyed by rounded
/// latitude.
#[derive(Debug, Default)]
struct StubRefresh {
    answers: BTreeMap<i64, RefreshResolution>,
}

impl StubRefresh {
    fn answer(mut self, latitude: f64, resolution: RefreshResolution) -> Self {
        self.answers.insert(latitude as i64, resolution);
        self
    }
}

#[async_trait]
impl RefreshGeocode for StubRefresh {
    async fn refresh(
        &self,
        latitude: f64,
        _longitude: f64,
    ) -> Result<Option<RefreshResolution>, GeocodeError> {
        Ok(self.answers.get(&(latitude as i64)).cloned())
    }
}

fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn candidate(provider_id: i64, display_name: &str) -> AddressCandidate {
    AddressCandidate {
        provider_id,
        provider_kind: "way".to_string(),
        display_name: display_name.to_string(),
        latitude: 52.0,
        longitude: 13.0,
        name: String::new(),
        house_number: None,
        road: None,
        neighbourhood: None,
        city: None,
        county: None,
        postcode: None,
        state: None,
        state_district: None,
        country: None,
        raw: serde_json::json!({}),
    }
}

fn resolution(display_name: &str) -> RefreshResolution {
    RefreshResolution {
        display_name: display_name.to_string(),
        country: "中国".to_string(),
        state: "北京市".to_string(),
        county: "某街道".to_string(),
        city: "北京市某区".to_string(),
        house_number: "1号".to_string(),
        ..RefreshResolution::default()
    }
}

fn config(mode: RunMode, batch_size: i64, refresh_key: &str) -> EnrichConfig {
    EnrichConfig {
        batch_size,
        mode,
        since: day(1),
        refresh_key: refresh_key.to_string(),
        poll_interval: std::time::Duration::ZERO,
    }
}

fn seed_position(store: &MockStore, id: i64, latitude: f64) {
    store.with_state(|state| {
        state.positions.push(Position {
            id,
            latitude,
            longitude: latitude / 2.0,
        });
    });
}

fn seed_drive(store: &MockStore, id: i64, start_position_id: i64, end_position_id: i64) {
    store.with_state(|state| {
        state.drives.push(DriveRow {
            id,
            start_position_id,
            end_position_id,
            start_address_id: None,
            end_address_id: None,
        });
    });
}

fn seed_charge(store: &MockStore, id: i64, position_id: i64) {
    store.with_state(|state| {
        state.charges.push(ChargeRow {
            id,
            position_id,
            address_id: None,
        });
    });
}

fn seed_address(store: &MockStore, id: i64, latitude: f64, updated_at: NaiveDateTime) {
    store.with_state(|state| {
        state.addresses.push(AddressRow {
            id,
            provider_id: 1000 + id,
            display_name: format!("old {id}"),
            latitude,
            longitude: latitude / 2.0,
            updated_at,
        });
        state.next_address_id = state.next_address_id.max(id + 1);
    });
}

#[tokio::test]
async fn gap_fill_links_drive_and_charge() {
    let store = MockStore::new();
    seed_position(&store, 1, 10.0);
    seed_position(&store, 2, 20.0);
    seed_position(&store, 3, 30.0);
    seed_drive(&store, 100, 1, 2);
    seed_charge(&store, 200, 3);

    let geocoder = StubReverse::default()
        .answer(10.0, candidate(111, "Start Street"))
        .answer(20.0, candidate(222, "End Street"))
        .answer(30.0, candidate(333, "Charger Lot"));

    let linked = gap_fill::run(&store, &geocoder, 10).await.unwrap();
    assert_eq!(linked, 2);

    store.snapshot(|state| {
        let drive = &state.drives[0];
        assert!(drive.start_address_id.is_some());
        assert!(drive.end_address_id.is_some());
        assert_ne!(drive.start_address_id, drive.end_address_id);
        assert!(state.charges[0].address_id.is_some());
        assert_eq!(state.addresses.len(), 3);
        // One productive batch committed, then the empty batch rolled
        // back and ended the run.
        assert_eq!(state.commits, 1);
        assert_eq!(state.rollbacks, 1);
    });
}

#[tokio::test]
async fn gap_fill_reuses_address_for_shared_feature() {
    let store = MockStore::new();
    seed_position(&store, 1, 10.0);
    seed_position(&store, 2, 20.0);
    seed_drive(&store, 100, 1, 2);

    // Both endpoints resolve to the same provider feature.
    let geocoder = StubReverse::default()
        .answer(10.0, candidate(777, "Parking Lot"))
        .answer(20.0, candidate(777, "Parking Lot"));

    let linked = gap_fill::run(&store, &geocoder, 10).await.unwrap();
    assert_eq!(linked, 1);

    // Both endpoints were looked up, but only one record landed.
    assert_eq!(*geocoder.calls.lock().unwrap(), 2);
    store.snapshot(|state| {
        assert_eq!(state.addresses.len(), 1);
        let drive = &state.drives[0];
        assert_eq!(drive.start_address_id, drive.end_address_id);
    });
}

#[tokio::test]
async fn gap_fill_skips_drive_when_one_endpoint_misses() {
    let store = MockStore::new();
    seed_position(&store, 1, 10.0);
    seed_position(&store, 2, 20.0);
    seed_drive(&store, 100, 1, 2);

    // Only the end position resolves.
    let geocoder = StubReverse::default().answer(20.0, candidate(222, "End Street"));

    let linked = gap_fill::run(&store, &geocoder, 10).await.unwrap();
    assert_eq!(linked, 0);

    store.snapshot(|state| {
        let drive = &state.drives[0];
        assert_eq!(drive.start_address_id, None);
        assert_eq!(drive.end_address_id, None);
        // Zero progress: nothing committed.
        assert_eq!(state.commits, 0);
        assert_eq!(state.rollbacks, 1);
    });
}

#[tokio::test]
async fn gap_fill_terminates_on_empty_store() {
    let store = MockStore::new();
    let geocoder = StubReverse::default();

    let linked = gap_fill::run(&store, &geocoder, 10).await.unwrap();
    assert_eq!(linked, 0);

    store.snapshot(|state| {
        assert_eq!(state.commits, 0);
        assert_eq!(state.rollbacks, 1);
    });
}

#[tokio::test]
async fn gap_fill_fails_on_dangling_position_reference() {
    let store = MockStore::new();
    seed_drive(&store, 100, 42, 43);
    let geocoder = StubReverse::default();

    let err = gap_fill::run(&store, &geocoder, 10).await.unwrap_err();
    assert!(matches!(
        err,
        EnrichError::MissingPosition { position_id: 42 }
    ));

    store.snapshot(|state| {
        assert_eq!(state.commits, 0);
        assert_eq!(state.rollbacks, 1);
    });
}

#[tokio::test]
async fn gap_fill_drains_across_batches() {
    let store = MockStore::new();
    for i in 1..=4 {
        let latitude = f64::from(i) * 10.0;
        seed_position(&store, i64::from(i), latitude);
        seed_charge(&store, i64::from(100 + i), i64::from(i));
    }

    let mut geocoder = StubReverse::default();
    for i in 1..=4 {
        let latitude = f64::from(i) * 10.0;
        geocoder = geocoder.answer(latitude, candidate(i64::from(500 + i), "Site"));
    }

    // Batch size 2: two productive batches, then the terminating one.
    let linked = gap_fill::run(&store, &geocoder, 2).await.unwrap();
    assert_eq!(linked, 4);

    store.snapshot(|state| {
        assert!(state.charges.iter().all(|c| c.address_id.is_some()));
        assert_eq!(state.commits, 2);
        assert_eq!(state.rollbacks, 1);
    });
}

#[tokio::test]
async fn gap_fill_reselects_after_losing_the_insert_race() {
    let store = MockStore::new();
    seed_position(&store, 1, 10.0);
    seed_charge(&store, 200, 1);
    store.with_state(|state| state.conflict_next_insert = true);

    let geocoder = StubReverse::default().answer(10.0, candidate(111, "Charger Lot"));

    let linked = gap_fill::run(&store, &geocoder, 10).await.unwrap();
    assert_eq!(linked, 1);

    store.snapshot(|state| {
        assert_eq!(state.addresses.len(), 1);
        assert!(state.charges[0].address_id.is_some());
    });
}

#[tokio::test]
async fn refresh_is_a_noop_without_api_key() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    let geocoder = StubRefresh::default().answer(10.0, resolution("new 1"));

    let (updated, cursor) = refresh::run(&store, &geocoder, &config(RunMode::Refresh, 10, ""), 0)
        .await
        .unwrap();
    assert_eq!(updated, 0);
    assert_eq!(cursor, 0);

    store.snapshot(|state| {
        assert_eq!(state.begins, 0);
        assert!(state.patches.is_empty());
    });
}

#[tokio::test]
async fn refresh_updates_eligible_addresses() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    seed_address(&store, 2, 20.0, day(11));

    let geocoder = StubRefresh::default()
        .answer(10.0, resolution("new 1"))
        .answer(20.0, resolution("new 2"));

    let (updated, cursor) = refresh::run(&store, &geocoder, &config(RunMode::Refresh, 10, "key"), 0)
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(cursor, 2);

    store.snapshot(|state| {
        assert_eq!(state.patches.len(), 2);
        assert_eq!(state.addresses[0].display_name, "new 1");
        assert_eq!(state.addresses[1].display_name, "new 2");
    });
}

#[tokio::test]
async fn refresh_cursor_advances_past_misses() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    seed_address(&store, 2, 20.0, day(10));
    seed_address(&store, 3, 30.0, day(10));

    // Address 2 never resolves.
    let geocoder = StubRefresh::default()
        .answer(10.0, resolution("new 1"))
        .answer(30.0, resolution("new 3"));

    let (updated, cursor) = refresh::run(&store, &geocoder, &config(RunMode::Refresh, 2, "key"), 0)
        .await
        .unwrap();
    assert_eq!(updated, 2);
    assert_eq!(cursor, 3);

    store.snapshot(|state| {
        let patched: Vec<i64> = state.patches.iter().map(|(id, _)| *id).collect();
        assert_eq!(patched, vec![1, 3]);
        assert_eq!(state.addresses[1].display_name, "old 2");
    });
}

#[tokio::test]
async fn refresh_terminates_when_nothing_resolves() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    seed_address(&store, 2, 20.0, day(10));
    seed_address(&store, 3, 30.0, day(10));

    let geocoder = StubRefresh::default();

    let (updated, _) = refresh::run(&store, &geocoder, &config(RunMode::Refresh, 2, "key"), 0)
        .await
        .unwrap();
    assert_eq!(updated, 0);

    store.snapshot(|state| {
        assert_eq!(state.commits, 0);
        // Two all-miss batches plus the terminating empty fetch.
        assert_eq!(state.rollbacks, 3);
    });
}

#[tokio::test]
async fn refresh_honors_the_updated_at_floor() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    seed_address(&store, 2, 20.0, day(2));

    let geocoder = StubRefresh::default()
        .answer(10.0, resolution("new 1"))
        .answer(20.0, resolution("new 2"));

    let mut cfg = config(RunMode::Refresh, 10, "key");
    cfg.since = day(5);
    let (updated, _) = refresh::run(&store, &geocoder, &cfg, 0).await.unwrap();
    assert_eq!(updated, 1);

    store.snapshot(|state| {
        let patched: Vec<i64> = state.patches.iter().map(|(id, _)| *id).collect();
        assert_eq!(patched, vec![1]);
    });
}

#[tokio::test]
async fn refresh_resumes_from_the_returned_cursor() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));
    let geocoder = StubRefresh::default().answer(10.0, resolution("new 1"));
    let cfg = config(RunMode::Refresh, 10, "key");

    let (updated, cursor) = refresh::run(&store, &geocoder, &cfg, 0).await.unwrap();
    assert_eq!(updated, 1);
    assert_eq!(cursor, 1);

    // The refresh bumped `updated_at`, so a fresh cursor would see the
    // row again; the returned cursor skips it.
    let (updated, cursor) = refresh::run(&store, &geocoder, &cfg, cursor).await.unwrap();
    assert_eq!(updated, 0);
    assert_eq!(cursor, 1);

    store.snapshot(|state| assert_eq!(state.patches.len(), 1));
}

#[tokio::test]
async fn interval_passes_do_not_re_refresh_addresses() {
    let store = MockStore::new();
    seed_address(&store, 1, 10.0, day(10));

    let primary = StubReverse::default();
    let alternate = StubRefresh::default().answer(10.0, resolution("new 1"));

    let mut cfg = config(RunMode::Refresh, 10, "key");
    cfg.poll_interval = std::time::Duration::from_millis(10);

    // The orchestrator loops until cancelled; a handful of passes is
    // enough to show the cursor survives between them.
    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        tripgeo_enrich::run(&store, &primary, &alternate, &cfg),
    )
    .await;
    assert!(outcome.is_err());

    store.snapshot(|state| assert_eq!(state.patches.len(), 1));
}

#[tokio::test]
async fn both_mode_runs_gap_fill_then_refresh() {
    let store = MockStore::new();
    seed_position(&store, 1, 10.0);
    seed_charge(&store, 200, 1);

    let primary = StubReverse::default().answer(10.0, candidate(111, "Charger Lot"));
    // The newly inserted address stores the feature's coordinates
    // (52.0), so the refresh stub answers there.
    let alternate = StubRefresh::default().answer(52.0, resolution("refined"));

    tripgeo_enrich::run(&store, &primary, &alternate, &config(RunMode::Both, 10, "key"))
        .await
        .unwrap();

    store.snapshot(|state| {
        assert!(state.charges[0].address_id.is_some());
        assert_eq!(state.addresses[0].display_name, "refined");
    });
}
