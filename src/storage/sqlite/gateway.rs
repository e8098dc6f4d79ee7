//! `SQLite`-backed [`PersistenceGateway`].

use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use super::connection::{open_file, open_in_memory};
use super::sql::prefix_pattern;
use crate::models::{
    Entity, EntityKind, EntitySelector, NaturalKey, RecordId, StoredRecord, TenantScope,
};
use crate::observability::record_gateway_operation;
use crate::storage::gateway::{
    GatewayTransaction, PendingWrite, PersistenceGateway, UpsertAction, UpsertOutcome,
};
use crate::storage::lock::acquire_lock;
use crate::{Error, Result, current_timestamp};

const BACKEND: &str = "sqlite";

/// `SQLite` gateway.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>`. A transaction holds the guard from `BEGIN
/// IMMEDIATE` until commit or rollback, so lookups from other sessions wait
/// for it; different tenants therefore share one writer at a time.
///
/// # Schema
///
/// One `records` table keyed by `(tenant, kind, natural_key)`; the entity is
/// stored as a JSON payload.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteGateway {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_file(&db_path)?;
        let gateway = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        gateway.initialize()?;
        Ok(gateway)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let gateway = Self {
            conn: Mutex::new(open_in_memory()?),
            db_path: None,
        };
        gateway.initialize()?;
        Ok(gateway)
    }

    /// Database path (`None` for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                kind TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (tenant, kind, natural_key)
            );",
        )
        .map_err(|e| Error::persistence("create_schema", e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        acquire_lock(&self.conn, "sqlite_gateway")
    }
}

fn decode_row(
    tenant: &TenantScope,
    id: &str,
    payload: &str,
    updated_at: i64,
) -> Result<StoredRecord> {
    let id = Uuid::parse_str(id).map_err(|e| Error::persistence("decode_record", e))?;
    let entity: Entity =
        serde_json::from_str(payload).map_err(|e| Error::persistence("decode_record", e))?;
    Ok(StoredRecord {
        id: RecordId::from_uuid(id),
        tenant: tenant.clone(),
        entity,
        updated_at: u64::try_from(updated_at).unwrap_or_default(),
    })
}

impl PersistenceGateway for SqliteGateway {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self), fields(tenant = %tenant, kind = %kind, key = %key))]
    fn find_by_natural_key(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredRecord>> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();
            let row: Option<(String, String, i64)> = conn
                .query_row(
                    "SELECT id, payload, updated_at FROM records
                     WHERE tenant = ?1 AND kind = ?2 AND natural_key = ?3",
                    params![tenant.storage_key(), kind.as_str(), key.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| Error::persistence("find_by_natural_key", e))?;
            drop(conn);
            row.map(|(id, payload, updated_at)| decode_row(tenant, &id, &payload, updated_at))
                .transpose()
        })();
        let status = if result.is_ok() { "success" } else { "error" };
        record_gateway_operation(BACKEND, "find", start, status);
        result
    }

    fn begin_transaction(&self) -> Result<Box<dyn GatewayTransaction + '_>> {
        let start = Instant::now();
        let conn = self.lock();
        if let Err(e) = conn.execute_batch("BEGIN IMMEDIATE") {
            record_gateway_operation(BACKEND, "begin", start, "error");
            return Err(Error::persistence("begin_transaction", e));
        }
        record_gateway_operation(BACKEND, "begin", start, "success");
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    #[instrument(skip(self, selector), fields(tenant = %tenant, kind = %kind))]
    fn query(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        selector: &EntitySelector,
    ) -> Result<Vec<StoredRecord>> {
        let start = Instant::now();
        let result = (|| {
            let conn = self.lock();
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, payload, updated_at FROM records
                     WHERE tenant = ?1 AND kind = ?2 AND natural_key LIKE ?3 ESCAPE '\\'
                     ORDER BY natural_key",
                )
                .map_err(|e| Error::persistence("query", e))?;
            let rows = stmt
                .query_map(
                    params![
                        tenant.storage_key(),
                        kind.as_str(),
                        prefix_pattern(selector.key_prefix.as_deref())
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .map_err(|e| Error::persistence("query", e))?;

            let mut records = Vec::new();
            for row in rows {
                let (id, payload, updated_at) = row.map_err(|e| Error::persistence("query", e))?;
                let record = decode_row(tenant, &id, &payload, updated_at)?;
                if selector.matches_key(&record.entity) {
                    records.push(record);
                }
            }
            Ok(records)
        })();
        let status = if result.is_ok() { "success" } else { "error" };
        record_gateway_operation(BACKEND, "query", start, status);
        result
    }
}

/// Open `SQLite` transaction; holds the connection until it finishes.
struct SqliteTransaction<'g> {
    conn: MutexGuard<'g, Connection>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    /// Runs `COMMIT` or `ROLLBACK`.
    ///
    /// A failed statement can leave the transaction open (a deferred
    /// constraint failing at `COMMIT`, for one), so the transaction is rolled
    /// back before the connection guard is released. It only counts as
    /// finished once the connection is in autocommit mode again.
    fn finish(&mut self, statement: &str, operation: &'static str) -> Result<()> {
        let start = Instant::now();
        let result = self
            .conn
            .execute_batch(statement)
            .map_err(|e| Error::persistence(operation, e));
        if result.is_err() && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, operation, "Rollback failed after unfinished transaction");
            }
        }
        self.finished = self.conn.is_autocommit();
        let status = if result.is_ok() { "success" } else { "error" };
        record_gateway_operation(BACKEND, operation, start, status);
        result
    }
}

impl GatewayTransaction for SqliteTransaction<'_> {
    fn upsert_batch(&mut self, writes: &[PendingWrite]) -> Result<Vec<UpsertOutcome>> {
        let start = Instant::now();
        let result = (|| {
            let mut stmt = self
                .conn
                .prepare_cached(
                    "INSERT INTO records (id, tenant, kind, natural_key, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (tenant, kind, natural_key)
                     DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
                     RETURNING id",
                )
                .map_err(|e| Error::persistence("upsert_batch", e))?;

            let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
            let mut outcomes = Vec::with_capacity(writes.len());
            for write in writes {
                let payload = serde_json::to_string(&write.entity)
                    .map_err(|e| Error::persistence("encode_record", e))?;
                let candidate = write.existing.unwrap_or_else(RecordId::generate);
                let id: String = stmt
                    .query_row(
                        params![
                            candidate.to_string(),
                            write.tenant.storage_key(),
                            write.kind.as_str(),
                            write.key.as_str(),
                            payload,
                            now
                        ],
                        |row| row.get(0),
                    )
                    .map_err(|e| {
                        Error::persistence("upsert_batch", format!("{} {}: {e}", write.kind, write.key))
                    })?;
                let id = Uuid::parse_str(&id).map_err(|e| Error::persistence("upsert_batch", e))?;
                outcomes.push(UpsertOutcome {
                    kind: write.kind,
                    key: write.key.clone(),
                    id: RecordId::from_uuid(id),
                    action: if write.existing.is_some() {
                        UpsertAction::Updated
                    } else {
                        UpsertAction::Inserted
                    },
                });
            }
            Ok(outcomes)
        })();
        let status = if result.is_ok() { "success" } else { "error" };
        record_gateway_operation(BACKEND, "upsert_batch", start, status);
        result
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT", "commit")
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK", "rollback")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}
