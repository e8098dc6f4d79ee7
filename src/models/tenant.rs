//! Tenant scoping.
//!
//! Every record and every session is partitioned by a [`TenantScope`]. The scope
//! is always handed to orchestrators explicitly through a [`TenantContext`];
//! nothing in the engine looks it up ambiently.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// An isolated institution (optionally narrowed to one program).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantScope {
    /// Institution identifier.
    pub institution_id: String,
    /// Optional program within the institution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

impl TenantScope {
    /// Creates an institution-wide scope.
    #[must_use]
    pub fn institution(institution_id: impl Into<String>) -> Self {
        Self {
            institution_id: institution_id.into(),
            program_id: None,
        }
    }

    /// Narrows the scope to a program.
    #[must_use]
    pub fn with_program(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }

    /// Validates that the identifiers are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the institution id is blank or any id
    /// contains the `/` separator used by [`Self::storage_key`].
    pub fn validate(&self) -> Result<()> {
        if self.institution_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "tenant scope requires an institution id".to_string(),
            ));
        }
        let ids = std::iter::once(&self.institution_id).chain(self.program_id.as_ref());
        for id in ids {
            if id.contains('/') {
                return Err(Error::InvalidInput(format!(
                    "tenant identifier '{id}' must not contain '/'"
                )));
            }
        }
        Ok(())
    }

    /// Flat key used by storage backends to partition rows.
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.program_id {
            Some(program) => write!(f, "{}/{program}", self.institution_id),
            None => write!(f, "{}", self.institution_id),
        }
    }
}

/// Supplies the active tenant scope for a call.
pub trait TenantContext: Send + Sync {
    /// Returns the scope the current caller is acting in.
    ///
    /// # Errors
    ///
    /// Returns an error if no scope can be determined.
    fn current_tenant_scope(&self) -> Result<TenantScope>;
}

/// A [`TenantContext`] that always returns the same scope.
#[derive(Debug, Clone)]
pub struct StaticTenantContext {
    scope: TenantScope,
}

impl StaticTenantContext {
    /// Wraps an existing scope.
    #[must_use]
    pub const fn new(scope: TenantScope) -> Self {
        Self { scope }
    }

    /// Shorthand for an institution-wide context.
    #[must_use]
    pub fn institution(institution_id: impl Into<String>) -> Self {
        Self::new(TenantScope::institution(institution_id))
    }
}

impl TenantContext for StaticTenantContext {
    fn current_tenant_scope(&self) -> Result<TenantScope> {
        self.scope.validate()?;
        Ok(self.scope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(TenantScope::institution("state-u").to_string(), "state-u");
        assert_eq!(
            TenantScope::institution("state-u")
                .with_program("nursing")
                .to_string(),
            "state-u/nursing"
        );
    }

    #[test]
    fn test_scope_validation() {
        assert!(TenantScope::institution("a").validate().is_ok());
        assert!(TenantScope::institution("  ").validate().is_err());
        assert!(TenantScope::institution("a/b").validate().is_err());
        assert!(
            TenantScope::institution("a")
                .with_program("x/y")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_static_context_rejects_blank() {
        let ctx = StaticTenantContext::institution("");
        assert!(ctx.current_tenant_scope().is_err());
    }
}
