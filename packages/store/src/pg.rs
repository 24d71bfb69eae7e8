//! Postgres implementation of the [`Store`] trait.
//!
//! Raw SQL over a single `tokio-postgres` connection. Batch boundaries
//! use explicit `BEGIN`/`COMMIT` so one batch of enrichment work is one
//! transaction. Latitude/longitude columns are `numeric` in the
//! telemetry schema, so reads cast to `float8` and writes cast the
//! parameter the other way.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio_postgres::NoTls;

use crate::{
    AddressPatch, AddressSummary, NewAddress, PendingCharge, PendingDrive, Position,
    RefreshableAddress, Store, StoreError,
};

/// Candidate predicate for drives missing an address link.
const DRIVE_PENDING: &str = "(start_address_id IS NULL OR end_address_id IS NULL) \
     AND start_position_id IS NOT NULL AND end_position_id IS NOT NULL";

/// Candidate predicate for charging sessions missing an address link.
const CHARGE_PENDING: &str = "address_id IS NULL AND position_id IS NOT NULL";

/// A [`Store`] backed by a live Postgres connection.
pub struct PgStore {
    client: tokio_postgres::Client,
}

impl PgStore {
    /// Connects to the telemetry database.
    ///
    /// The connection task is spawned onto the current runtime; a
    /// connection-level failure is logged and surfaces as an error on
    /// the next query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("postgres connection error: {e}");
            }
        });

        Ok(Self { client })
    }

    async fn count(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<u64, StoreError> {
        let row = self.client.query_one(sql, params).await?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<(), StoreError> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn unlinked_drive_count(&self) -> Result<u64, StoreError> {
        self.count(
            &format!("SELECT COUNT(*) FROM drives WHERE {DRIVE_PENDING}"),
            &[],
        )
        .await
    }

    async fn unlinked_charge_count(&self) -> Result<u64, StoreError> {
        self.count(
            &format!("SELECT COUNT(*) FROM charging_processes WHERE {CHARGE_PENDING}"),
            &[],
        )
        .await
    }

    async fn unlinked_drives(&self, limit: i64) -> Result<Vec<PendingDrive>, StoreError> {
        let sql = format!(
            "SELECT id, start_position_id, end_position_id \
             FROM drives WHERE {DRIVE_PENDING} ORDER BY id LIMIT $1"
        );
        let rows = self.client.query(&sql, &[&limit]).await?;
        Ok(rows
            .iter()
            .map(|row| PendingDrive {
                id: row.get(0),
                start_position_id: row.get(1),
                end_position_id: row.get(2),
            })
            .collect())
    }

    async fn unlinked_charges(&self, limit: i64) -> Result<Vec<PendingCharge>, StoreError> {
        let sql = format!(
            "SELECT id, position_id \
             FROM charging_processes WHERE {CHARGE_PENDING} ORDER BY id LIMIT $1"
        );
        let rows = self.client.query(&sql, &[&limit]).await?;
        Ok(rows
            .iter()
            .map(|row| PendingCharge {
                id: row.get(0),
                position_id: row.get(1),
            })
            .collect())
    }

    async fn position(&self, id: i64) -> Result<Option<Position>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, latitude::float8, longitude::float8 FROM positions WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.map(|row| Position {
            id: row.get(0),
            latitude: row.get(1),
            longitude: row.get(2),
        }))
    }

    async fn address_by_provider_id(
        &self,
        provider_id: i64,
    ) -> Result<Option<AddressSummary>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, display_name FROM addresses WHERE osm_id = $1",
                &[&provider_id],
            )
            .await?;
        Ok(row.map(|row| AddressSummary {
            id: row.get(0),
            display_name: row.get(1),
        }))
    }

    async fn insert_address(
        &self,
        address: &NewAddress,
    ) -> Result<Option<AddressSummary>, StoreError> {
        let now = Utc::now().naive_utc();
        let row = self
            .client
            .query_opt(
                "INSERT INTO addresses \
                 (osm_id, osm_type, display_name, latitude, longitude, name, \
                  house_number, road, neighbourhood, city, county, postcode, \
                  state, state_district, country, raw, inserted_at, updated_at) \
                 VALUES ($1, $2, $3, $4::float8, $5::float8, $6, $7, $8, $9, \
                         $10, $11, $12, $13, $14, $15, $16, $17, $18) \
                 ON CONFLICT (osm_id) DO NOTHING \
                 RETURNING id, display_name",
                &[
                    &address.provider_id,
                    &address.provider_kind,
                    &address.display_name,
                    &address.latitude,
                    &address.longitude,
                    &address.name,
                    &address.house_number,
                    &address.road,
                    &address.neighbourhood,
                    &address.city,
                    &address.county,
                    &address.postcode,
                    &address.state,
                    &address.state_district,
                    &address.country,
                    &address.raw,
                    &now,
                    &now,
                ],
            )
            .await?;
        Ok(row.map(|row| AddressSummary {
            id: row.get(0),
            display_name: row.get(1),
        }))
    }

    async fn link_drive(
        &self,
        drive_id: i64,
        start_address_id: i64,
        end_address_id: i64,
    ) -> Result<(), StoreError> {
        self.client
            .execute(
                "UPDATE drives \
                 SET start_address_id = COALESCE(start_address_id, $2), \
                     end_address_id = COALESCE(end_address_id, $3) \
                 WHERE id = $1",
                &[&drive_id, &start_address_id, &end_address_id],
            )
            .await?;
        Ok(())
    }

    async fn link_charge(&self, charge_id: i64, address_id: i64) -> Result<(), StoreError> {
        self.client
            .execute(
                "UPDATE charging_processes \
                 SET address_id = COALESCE(address_id, $2) \
                 WHERE id = $1",
                &[&charge_id, &address_id],
            )
            .await?;
        Ok(())
    }

    async fn refreshable_count(
        &self,
        since: NaiveDateTime,
        cursor: i64,
    ) -> Result<u64, StoreError> {
        self.count(
            "SELECT COUNT(*) FROM addresses WHERE updated_at >= $1 AND id > $2",
            &[&since, &cursor],
        )
        .await
    }

    async fn refreshable_addresses(
        &self,
        since: NaiveDateTime,
        cursor: i64,
        limit: i64,
    ) -> Result<Vec<RefreshableAddress>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT id, latitude::float8, longitude::float8, display_name \
                 FROM addresses WHERE updated_at >= $1 AND id > $2 \
                 ORDER BY id LIMIT $3",
                &[&since, &cursor, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| RefreshableAddress {
                id: row.get(0),
                latitude: row.get(1),
                longitude: row.get(2),
                display_name: row.get(3),
            })
            .collect())
    }

    async fn apply_refresh(&self, id: i64, patch: &AddressPatch) -> Result<(), StoreError> {
        let now = Utc::now().naive_utc();
        self.client
            .execute(
                "UPDATE addresses \
                 SET display_name = $2, country = $3, state = $4, county = $5, \
                     city = $6, house_number = $7, updated_at = $8, \
                     road = COALESCE($9, road), \
                     name = COALESCE($10, name), \
                     neighbourhood = COALESCE($11, neighbourhood) \
                 WHERE id = $1",
                &[
                    &id,
                    &patch.display_name,
                    &patch.country,
                    &patch.state,
                    &patch.county,
                    &patch.city,
                    &patch.house_number,
                    &now,
                    &patch.road,
                    &patch.name,
                    &patch.neighbourhood,
                ],
            )
            .await?;
        Ok(())
    }
}
