//! Per-tenant session serialization.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::models::TenantScope;
use crate::storage::acquire_lock;
use crate::{Error, Result};

/// Table of tenants with a running import session.
///
/// Sessions for the same tenant queue on the condition variable; sessions for
/// different tenants never block each other.
#[derive(Debug, Default)]
pub struct TenantLocks {
    busy: Mutex<HashSet<TenantScope>>,
    released: Condvar,
}

impl TenantLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive use of `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the tenant stays busy.
    pub fn acquire(&self, tenant: &TenantScope, timeout: Duration) -> Result<TenantLease<'_>> {
        let start = Instant::now();
        let mut busy = acquire_lock(&self.busy, "tenant_locks");
        while busy.contains(tenant) {
            let waited = start.elapsed();
            let Some(remaining) = timeout.checked_sub(waited).filter(|r| !r.is_zero()) else {
                tracing::warn!(tenant = %tenant, waited_ms = waited.as_millis(), "Tenant lease timed out");
                metrics::counter!("tenant_lock_timeouts_total").increment(1);
                return Err(Error::LockTimeout {
                    tenant: tenant.to_string(),
                    waited,
                });
            };
            busy = match self.released.wait_timeout(busy, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        busy.insert(tenant.clone());
        drop(busy);

        tracing::debug!(tenant = %tenant, waited_ms = start.elapsed().as_millis(), "Tenant lease acquired");
        Ok(TenantLease {
            locks: self,
            tenant: tenant.clone(),
        })
    }

    /// Whether a session currently holds `tenant`.
    #[must_use]
    pub fn is_held(&self, tenant: &TenantScope) -> bool {
        acquire_lock(&self.busy, "tenant_locks").contains(tenant)
    }
}

/// Exclusive use of one tenant; released on drop.
#[derive(Debug)]
pub struct TenantLease<'a> {
    locks: &'a TenantLocks,
    tenant: TenantScope,
}

impl TenantLease<'_> {
    /// The leased tenant.
    #[must_use]
    pub const fn tenant(&self) -> &TenantScope {
        &self.tenant
    }
}

impl Drop for TenantLease<'_> {
    fn drop(&mut self) {
        acquire_lock(&self.locks.busy, "tenant_locks").remove(&self.tenant);
        self.locks.released.notify_all();
        tracing::debug!(tenant = %self.tenant, "Tenant lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_same_tenant_times_out() {
        let locks = TenantLocks::new();
        let tenant = TenantScope::institution("acme");
        let _lease = locks.acquire(&tenant, Duration::from_millis(10)).unwrap();
        let err = locks
            .acquire(&tenant, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }

    #[test]
    fn test_other_tenant_proceeds() {
        let locks = TenantLocks::new();
        let _a = locks
            .acquire(&TenantScope::institution("a"), Duration::from_millis(10))
            .unwrap();
        assert!(
            locks
                .acquire(&TenantScope::institution("b"), Duration::from_millis(10))
                .is_ok()
        );
    }

    #[test]
    fn test_release_wakes_waiter() {
        let locks = Arc::new(TenantLocks::new());
        let tenant = TenantScope::institution("acme");
        let lease = locks.acquire(&tenant, Duration::from_millis(10)).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let tenant = tenant.clone();
            thread::spawn(move || locks.acquire(&tenant, Duration::from_secs(5)).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        drop(lease);
        assert!(waiter.join().unwrap());
        assert!(!locks.is_held(&tenant));
    }
}
