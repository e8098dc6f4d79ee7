//! In-memory persistence gateway.
//!
//! Reference backend for tests and embedding. Writes are staged per
//! transaction and applied under one lock on commit. Faults can be injected to
//! exercise rollback paths.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use super::gateway::{
    GatewayTransaction, PendingWrite, PersistenceGateway, UpsertAction, UpsertOutcome,
};
use super::lock::acquire_lock;
use crate::models::{
    Entity, EntityKind, EntitySelector, NaturalKey, RecordId, StoredRecord, TenantScope,
};
use crate::observability::record_gateway_operation;
use crate::{Error, Result, current_timestamp};

type StoreKey = (TenantScope, EntityKind, NaturalKey);

const BACKEND: &str = "memory";

#[derive(Debug, Default, Clone)]
struct Faults {
    /// 1-based write ordinal (within one transaction) that fails.
    upsert_at: Option<usize>,
    query_kind: Option<EntityKind>,
    commit: bool,
}

/// In-memory gateway.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    records: Mutex<BTreeMap<StoreKey, StoredRecord>>,
    faults: Mutex<Faults>,
    lookups: AtomicUsize,
    transactions: AtomicUsize,
}

impl MemoryGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing transactions.
    pub fn seed(&self, tenant: &TenantScope, entity: Entity) -> RecordId {
        let id = RecordId::generate();
        let key = (tenant.clone(), entity.kind(), entity.natural_key());
        acquire_lock(&self.records, "memory_gateway").insert(
            key,
            StoredRecord {
                id,
                tenant: tenant.clone(),
                entity,
                updated_at: current_timestamp(),
            },
        );
        id
    }

    /// Every stored record of a tenant, ordered by kind then key.
    #[must_use]
    pub fn records_for(&self, tenant: &TenantScope) -> Vec<StoredRecord> {
        acquire_lock(&self.records, "memory_gateway")
            .iter()
            .filter(|((t, _, _), _)| t == tenant)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Number of stored records across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.records, "memory_gateway").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of natural-key lookups served.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of transactions begun.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Makes the `n`th write (1-based) of every transaction fail.
    pub fn fail_upsert_at(&self, n: usize) {
        acquire_lock(&self.faults, "memory_faults").upsert_at = Some(n);
    }

    /// Makes queries for `kind` fail.
    pub fn fail_query_for(&self, kind: EntityKind) {
        acquire_lock(&self.faults, "memory_faults").query_kind = Some(kind);
    }

    /// Makes every commit fail.
    pub fn fail_commit(&self) {
        acquire_lock(&self.faults, "memory_faults").commit = true;
    }

    /// Clears injected faults.
    pub fn clear_faults(&self) {
        *acquire_lock(&self.faults, "memory_faults") = Faults::default();
    }

    fn faults(&self) -> Faults {
        acquire_lock(&self.faults, "memory_faults").clone()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn find_by_natural_key(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> Result<Option<StoredRecord>> {
        let start = Instant::now();
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let found = acquire_lock(&self.records, "memory_gateway")
            .get(&(tenant.clone(), kind, key.clone()))
            .cloned();
        record_gateway_operation(BACKEND, "find", start, "success");
        Ok(found)
    }

    fn begin_transaction(&self) -> Result<Box<dyn GatewayTransaction + '_>> {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryTransaction {
            gateway: self,
            faults: self.faults(),
            staged: Vec::new(),
            written: 0,
        }))
    }

    fn query(
        &self,
        tenant: &TenantScope,
        kind: EntityKind,
        selector: &EntitySelector,
    ) -> Result<Vec<StoredRecord>> {
        let start = Instant::now();
        if self.faults().query_kind == Some(kind) {
            record_gateway_operation(BACKEND, "query", start, "error");
            return Err(Error::persistence(
                "query",
                format!("injected failure for {kind}"),
            ));
        }
        let records = acquire_lock(&self.records, "memory_gateway")
            .iter()
            .filter(|((t, k, _), record)| t == tenant && *k == kind && selector.matches_key(&record.entity))
            .map(|(_, record)| record.clone())
            .collect();
        record_gateway_operation(BACKEND, "query", start, "success");
        Ok(records)
    }
}

struct MemoryTransaction<'g> {
    gateway: &'g MemoryGateway,
    faults: Faults,
    staged: Vec<StoredRecord>,
    written: usize,
}

impl GatewayTransaction for MemoryTransaction<'_> {
    fn upsert_batch(&mut self, writes: &[PendingWrite]) -> Result<Vec<UpsertOutcome>> {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(writes.len());
        for write in writes {
            self.written += 1;
            if self.faults.upsert_at == Some(self.written) {
                record_gateway_operation(BACKEND, "upsert_batch", start, "error");
                return Err(Error::persistence(
                    "upsert_batch",
                    format!("injected failure at write {} ({} {})", self.written, write.kind, write.key),
                ));
            }

            let id = write.existing.unwrap_or_else(RecordId::generate);
            self.staged.push(StoredRecord {
                id,
                tenant: write.tenant.clone(),
                entity: write.entity.clone(),
                updated_at: current_timestamp(),
            });
            outcomes.push(UpsertOutcome {
                kind: write.kind,
                key: write.key.clone(),
                id,
                action: if write.existing.is_some() {
                    UpsertAction::Updated
                } else {
                    UpsertAction::Inserted
                },
            });
        }
        record_gateway_operation(BACKEND, "upsert_batch", start, "success");
        Ok(outcomes)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let start = Instant::now();
        if self.faults.commit {
            record_gateway_operation(BACKEND, "commit", start, "error");
            return Err(Error::persistence("commit", "injected commit failure"));
        }
        let mut records = acquire_lock(&self.gateway.records, "memory_gateway");
        for record in self.staged {
            let key = (record.tenant.clone(), record.entity.kind(), record.natural_key());
            records.insert(key, record);
        }
        drop(records);
        record_gateway_operation(BACKEND, "commit", start, "success");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        record_gateway_operation(BACKEND, "rollback", Instant::now(), "success");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Instructor;

    fn instructor(id: &str) -> Entity {
        Entity::Instructor(Instructor {
            employee_id: id.to_string(),
            full_name: None,
            email: None,
            department: None,
        })
    }

    fn write(tenant: &TenantScope, id: &str) -> PendingWrite {
        PendingWrite::new(tenant.clone(), None, instructor(id))
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let gateway = MemoryGateway::new();
        let tenant = TenantScope::institution("acme");
        let mut tx = gateway.begin_transaction().unwrap();
        let outcomes = tx.upsert_batch(&[write(&tenant, "e1"), write(&tenant, "e2")]).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(gateway.is_empty());
        tx.commit().unwrap();
        assert_eq!(gateway.len(), 2);
    }

    #[test]
    fn test_dropped_transaction_discards_writes() {
        let gateway = MemoryGateway::new();
        let tenant = TenantScope::institution("acme");
        {
            let mut tx = gateway.begin_transaction().unwrap();
            tx.upsert_batch(&[write(&tenant, "e1")]).unwrap();
        }
        assert!(gateway.is_empty());
    }

    #[test]
    fn test_injected_upsert_failure() {
        let gateway = MemoryGateway::new();
        gateway.fail_upsert_at(2);
        let tenant = TenantScope::institution("acme");
        let mut tx = gateway.begin_transaction().unwrap();
        let err = tx
            .upsert_batch(&[write(&tenant, "e1"), write(&tenant, "e2")])
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        tx.rollback().unwrap();
        assert!(gateway.is_empty());
    }

    #[test]
    fn test_tenant_scoped_lookup_and_query() {
        let gateway = MemoryGateway::new();
        let a = TenantScope::institution("a");
        let b = TenantScope::institution("b");
        gateway.seed(&a, instructor("e1"));

        let key = NaturalKey::parse("e1");
        assert!(gateway.find_by_natural_key(&a, EntityKind::Instructor, &key).unwrap().is_some());
        assert!(gateway.find_by_natural_key(&b, EntityKind::Instructor, &key).unwrap().is_none());
        assert!(
            gateway
                .query(&b, EntityKind::Instructor, &EntitySelector::all())
                .unwrap()
                .is_empty()
        );
    }
}
