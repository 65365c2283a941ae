//! Durable SQLite mirror of the Workload Registry.
//!
//! Persists `workloads` and `registries` so a restarted agent can rebuild its
//! in-memory [`crate::workload_registry::WorkloadRegistry`] before the first
//! controller snapshot arrives, rather than starting from a cold, empty view
//! of the world. Follows the same functional-core/imperative-shell split as
//! [`crate::database`]: pure SQL generation and row mapping in private
//! submodules, I/O against the pool on the storage struct.
//!
//! ## Performance
//!
//! Workload/registry upserts and lookups: < 1ms, matching the rest of this
//! crate's on-node persistence.

use crate::database::{DatabaseConnection, DatabaseResult, StorageError};
use crate::domain::{ContainerId, ImageId, ImageRef, Registry, RegistryId, Workload, WorkloadId};
use sqlx::Row;

mod sql {
    pub(super) fn create_workloads_table() -> &'static str {
        "CREATE TABLE IF NOT EXISTS workloads (
            uuid TEXT PRIMARY KEY,
            image TEXT NOT NULL,
            registry_id INTEGER NOT NULL,
            rebuild INTEGER NOT NULL,
            container_id TEXT,
            image_id TEXT,
            ip_address TEXT,
            updating INTEGER NOT NULL DEFAULT 0
        )"
    }

    pub(super) fn upsert_workload() -> &'static str {
        "INSERT INTO workloads (uuid, image, registry_id, rebuild, container_id, image_id, ip_address, updating)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(uuid) DO UPDATE SET
            image = excluded.image,
            registry_id = excluded.registry_id,
            rebuild = excluded.rebuild,
            container_id = excluded.container_id,
            image_id = excluded.image_id,
            ip_address = excluded.ip_address,
            updating = excluded.updating"
    }

    pub(super) fn select_workload_by_uuid() -> &'static str {
        "SELECT uuid, image, registry_id, rebuild, container_id, image_id, ip_address, updating
         FROM workloads WHERE uuid = ?"
    }

    pub(super) fn select_all_workloads() -> &'static str {
        "SELECT uuid, image, registry_id, rebuild, container_id, image_id, ip_address, updating FROM workloads"
    }

    pub(super) fn delete_workload_by_uuid() -> &'static str {
        "DELETE FROM workloads WHERE uuid = ?"
    }

    pub(super) fn create_registries_table() -> &'static str {
        "CREATE TABLE IF NOT EXISTS registries (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL,
            credentials TEXT,
            tls_cert TEXT,
            dev_mode_enabled INTEGER NOT NULL
        )"
    }

    pub(super) fn upsert_registry() -> &'static str {
        "INSERT INTO registries (id, url, credentials, tls_cert, dev_mode_enabled)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            url = excluded.url,
            credentials = excluded.credentials,
            tls_cert = excluded.tls_cert,
            dev_mode_enabled = excluded.dev_mode_enabled"
    }

    pub(super) fn select_all_registries() -> &'static str {
        "SELECT id, url, credentials, tls_cert, dev_mode_enabled FROM registries"
    }
}

mod mapping {
    use super::{
        ContainerId, ImageId, ImageRef, Registry, RegistryId, StorageError, Workload, WorkloadId,
    };
    use uuid::Uuid;

    pub(super) fn workload_uuid_to_string(uuid: WorkloadId) -> String {
        uuid.to_string()
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn parse_workload_row(
        uuid_str: &str,
        image_str: &str,
        registry_id: i64,
        rebuild: i64,
        container_id: Option<String>,
        image_id: Option<String>,
        ip_address: Option<String>,
        updating: i64,
    ) -> Result<Workload, StorageError> {
        let uuid = Uuid::parse_str(uuid_str)
            .map_err(|e| StorageError::Database {
                message: format!("invalid workload uuid: {e}"),
            })?
            .into();
        let image = ImageRef::try_new(image_str.to_string()).map_err(|e| StorageError::Database {
            message: format!("invalid image reference: {e}"),
        })?;
        let container_id = container_id
            .map(ContainerId::try_new)
            .transpose()
            .map_err(|e| StorageError::Database {
                message: format!("invalid container id: {e}"),
            })?;
        let image_id = image_id
            .map(ImageId::try_new)
            .transpose()
            .map_err(|e| StorageError::Database {
                message: format!("invalid image id: {e}"),
            })?;

        Ok(Workload {
            uuid,
            image,
            registry_id: RegistryId(u64::try_from(registry_id).unwrap_or(0)),
            rebuild: rebuild != 0,
            container_id,
            image_id,
            ip_address,
            updating: updating != 0,
        })
    }

    pub(super) fn parse_registry_row(
        id: i64,
        url: String,
        credentials: Option<String>,
        tls_cert: Option<String>,
        dev_mode_enabled: i64,
    ) -> Registry {
        Registry {
            id: RegistryId(u64::try_from(id).unwrap_or(0)),
            url,
            credentials,
            tls_cert,
            dev_mode_enabled: dev_mode_enabled != 0,
        }
    }
}

/// Durable mirror of the Workload Registry's `workloads` and `registries`
/// tables. Written by whatever records the registry's desired/current state
/// on disk; read back on agent start-up to seed the in-memory registry.
pub struct WorkloadRegistryStore {
    connection: DatabaseConnection,
}

impl WorkloadRegistryStore {
    /// Wrap an initialized [`DatabaseConnection`].
    #[must_use]
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Insert or update a workload's persisted row.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created or the write fails.
    pub async fn save_workload(&self, workload: &Workload) -> DatabaseResult<()> {
        self.ensure_workloads_table().await?;

        let container_id = workload.container_id.as_ref().map(ToString::to_string);
        let image_id = workload.image_id.as_ref().map(ToString::to_string);
        sqlx::query(sql::upsert_workload())
            .bind(mapping::workload_uuid_to_string(workload.uuid))
            .bind(workload.image.to_string())
            .bind(i64::try_from(workload.registry_id.0).unwrap_or(i64::MAX))
            .bind(i64::from(workload.rebuild))
            .bind(container_id)
            .bind(image_id)
            .bind(workload.ip_address.clone())
            .bind(i64::from(workload.updating))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Look up a workload's persisted row by uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row does not exist.
    pub async fn get_workload(&self, uuid: WorkloadId) -> DatabaseResult<Workload> {
        let row = sqlx::query(sql::select_workload_by_uuid())
            .bind(mapping::workload_uuid_to_string(uuid))
            .fetch_one(self.connection.pool())
            .await?;
        Self::row_to_workload(&row)
    }

    /// Every persisted workload, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row fails to parse.
    pub async fn all_workloads(&self) -> DatabaseResult<Vec<Workload>> {
        let rows = sqlx::query(sql::select_all_workloads())
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter().map(Self::row_to_workload).collect()
    }

    /// Remove a workload's persisted row, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn delete_workload(&self, uuid: WorkloadId) -> DatabaseResult<()> {
        sqlx::query(sql::delete_workload_by_uuid())
            .bind(mapping::workload_uuid_to_string(uuid))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    fn row_to_workload(row: &sqlx::sqlite::SqliteRow) -> DatabaseResult<Workload> {
        let uuid_str: String = row.get("uuid");
        let image_str: String = row.get("image");
        let registry_id: i64 = row.get("registry_id");
        let rebuild: i64 = row.get("rebuild");
        let container_id: Option<String> = row.get("container_id");
        let image_id: Option<String> = row.get("image_id");
        let ip_address: Option<String> = row.get("ip_address");
        let updating: i64 = row.get("updating");

        mapping::parse_workload_row(
            &uuid_str,
            &image_str,
            registry_id,
            rebuild,
            container_id,
            image_id,
            ip_address,
            updating,
        )
        .map_err(Into::into)
    }

    async fn ensure_workloads_table(&self) -> DatabaseResult<()> {
        sqlx::query(sql::create_workloads_table())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Insert or update a registry's persisted row.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created or the write fails.
    pub async fn save_registry(&self, registry: &Registry) -> DatabaseResult<()> {
        self.ensure_registries_table().await?;

        sqlx::query(sql::upsert_registry())
            .bind(i64::try_from(registry.id.0).unwrap_or(i64::MAX))
            .bind(registry.url.clone())
            .bind(registry.credentials.clone())
            .bind(registry.tls_cert.clone())
            .bind(i64::from(registry.dev_mode_enabled))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    /// Every persisted registry, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all_registries(&self) -> DatabaseResult<Vec<Registry>> {
        self.ensure_registries_table().await?;
        let rows = sqlx::query(sql::select_all_registries())
            .fetch_all(self.connection.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let url: String = row.get("url");
                let credentials: Option<String> = row.get("credentials");
                let tls_cert: Option<String> = row.get("tls_cert");
                let dev_mode_enabled: i64 = row.get("dev_mode_enabled");
                mapping::parse_registry_row(id, url, credentials, tls_cert, dev_mode_enabled)
            })
            .collect())
    }

    async fn ensure_registries_table(&self) -> DatabaseResult<()> {
        sqlx::query(sql::create_registries_table())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}
