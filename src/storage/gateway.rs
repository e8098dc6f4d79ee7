//! Persistence gateway traits.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{
    Entity, EntityKind, EntitySelector, NaturalKey, RecordId, StoredRecord, TenantScope,
};

/// A write planned by conflict resolution and applied on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Owning tenant.
    pub tenant: TenantScope,
    /// Entity kind.
    pub kind: EntityKind,
    /// Natural key.
    pub key: NaturalKey,
    /// Stored record being updated, or `None` for an insert.
    pub existing: Option<RecordId>,
    /// Resolved entity to persist.
    pub entity: Entity,
}

impl PendingWrite {
    /// Creates a write, deriving kind and key from the entity.
    #[must_use]
    pub fn new(tenant: TenantScope, existing: Option<RecordId>, entity: Entity) -> Self {
        Self {
            tenant,
            kind: entity.kind(),
            key: entity.natural_key(),
            existing,
            entity,
        }
    }
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    /// A new row was created.
    Inserted,
    /// An existing row was replaced.
    Updated,
}

/// Result of one upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Entity kind.
    pub kind: EntityKind,
    /// Natural key.
    pub key: NaturalKey,
    /// Id of the stored row.
    pub id: RecordId,
    /// Insert or update.
    pub action: UpsertAction,
}

/// Storage the engine reads from and commits to.
///
/// Every call is scoped by tenant; implementations must never return a record
/// belonging to another tenant.
pub trait PersistenceGateway: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Looks up a record by natural key.
    fn find_by_natural_key(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredRecord>>;

    /// Starts a transaction. Writes become visible only on commit.
    fn begin_transaction(&self) -> Result<Box<dyn GatewayTransaction + '_>>;

    /// Returns every record of `kind` matching the selector, ordered by natural key.
    fn query(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        selector: &EntitySelector,
    ) -> Result<Vec<StoredRecord>>;
}

/// An open gateway transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it back.
pub trait GatewayTransaction {
    /// Applies a batch of writes inside the transaction.
    fn upsert_batch(&mut self, writes: &[PendingWrite]) -> Result<Vec<UpsertOutcome>>;

    /// Makes every write visible.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write.
    fn rollback(self: Box<Self>) -> Result<()>;
}
