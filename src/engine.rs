//! Caller-facing engine.
//!
//! [`Engine`] owns the shared parts of every session: the adapter registry,
//! the persistence gateway, the tenant lock table and the configuration. It is
//! `Send + Sync`; sessions for different tenants can run from different
//! threads against one engine.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::io::{
    AdapterRegistry, CancellationToken, ExportSession, ImportSession, SourceDocument, TenantLocks,
};
use crate::models::{
    EntitySelector, ExportManifest, ImportReport, ResolutionStrategy, TenantContext,
};
use crate::storage::PersistenceGateway;
use crate::Result;

/// Per-call import options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportFlags {
    /// Simulate without writing.
    pub dry_run: bool,
    /// Abort at the first error-severity issue.
    pub strict: bool,
    /// Strategy override; `None` uses the configured default.
    pub strategy: Option<ResolutionStrategy>,
}

impl ImportFlags {
    /// A dry run.
    #[must_use]
    pub const fn dry_run() -> Self {
        Self {
            dry_run: true,
            strict: false,
            strategy: None,
        }
    }

    /// A real run.
    #[must_use]
    pub const fn real() -> Self {
        Self {
            dry_run: false,
            strict: false,
            strategy: None,
        }
    }

    /// Sets strict mode.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the strategy override.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Import/export engine.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<AdapterRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    locks: Arc<TenantLocks>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("gateway", &self.gateway.backend_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine from its parts.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        registry: AdapterRegistry,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            gateway,
            locks: Arc::new(TenantLocks::new()),
            config: Arc::new(config),
        }
    }

    /// Creates an engine with the built-in adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in adapter fails registration.
    pub fn with_default_adapters(
        config: EngineConfig,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self> {
        Ok(Self::new(config, AdapterRegistry::with_defaults()?, gateway))
    }

    /// The adapter registry.
    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The persistence gateway.
    #[must_use]
    pub fn gateway(&self) -> &dyn PersistenceGateway {
        self.gateway.as_ref()
    }

    /// Imports a source document for the caller's tenant.
    ///
    /// # Errors
    ///
    /// See [`ImportSession::run`]. Also fails if the context yields no tenant.
    pub fn submit_import(
        &self,
        source: &SourceDocument,
        format: &str,
        flags: ImportFlags,
        tenant: &dyn TenantContext,
    ) -> Result<ImportReport> {
        self.submit_import_cancellable(source, format, flags, tenant, CancellationToken::new())
    }

    /// Like [`Self::submit_import`], stoppable through `token`.
    ///
    /// # Errors
    ///
    /// See [`ImportSession::run`].
    pub fn submit_import_cancellable(
        &self,
        source: &SourceDocument,
        format: &str,
        flags: ImportFlags,
        tenant: &dyn TenantContext,
        token: CancellationToken,
    ) -> Result<ImportReport> {
        let scope = tenant.current_tenant_scope()?;
        let strategy = flags.strategy.unwrap_or(self.config.default_strategy);
        ImportSession::new(&self.registry, self.gateway.as_ref(), &self.locks, &self.config)
            .with_strategy(strategy)
            .with_cancellation(token)
            .run(source, format, &scope, flags.dry_run, flags.strict)
    }

    /// Exports the caller's tenant records matching `selector`.
    ///
    /// # Errors
    ///
    /// See [`ExportSession::run`].
    pub fn submit_export(
        &self,
        selector: &EntitySelector,
        format: &str,
        tenant: &dyn TenantContext,
    ) -> Result<(Vec<u8>, ExportManifest)> {
        let scope = tenant.current_tenant_scope()?;
        ExportSession::new(&self.registry, self.gateway.as_ref()).run(selector, format, &scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StaticTenantContext, TenantScope};
    use crate::storage::MemoryGateway;

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_import_then_export_for_tenant() {
        let gateway = Arc::new(MemoryGateway::new());
        let engine = Engine::with_default_adapters(EngineConfig::default(), gateway.clone()).unwrap();
        let tenant = StaticTenantContext::institution("state-u");
        let source = SourceDocument::from_bytes(
            "courses.csv",
            "kind,course_number,title\ncourse,BIO101,Biology\n",
        );

        let report = engine
            .submit_import(&source, "csv", ImportFlags::real(), &tenant)
            .unwrap();
        assert_eq!(report.totals().new, 1);

        let (_, manifest) = engine
            .submit_export(&EntitySelector::all(), "json", &tenant)
            .unwrap();
        assert_eq!(manifest.record_count, 1);
        assert_eq!(manifest.tenant, TenantScope::institution("state-u"));
    }

    #[test]
    fn test_blank_tenant_rejected() {
        let engine =
            Engine::with_default_adapters(EngineConfig::default(), Arc::new(MemoryGateway::new()))
                .unwrap();
        let err = engine
            .submit_export(&EntitySelector::all(), "csv", &StaticTenantContext::institution(" "))
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
    }

    #[test]
    fn test_flag_strategy_overrides_config() {
        let engine =
            Engine::with_default_adapters(EngineConfig::default(), Arc::new(MemoryGateway::new()))
                .unwrap();
        let source = SourceDocument::from_bytes("c.csv", "kind,course_number\ncourse,BIO101\n");
        let report = engine
            .submit_import(
                &source,
                "csv",
                ImportFlags::dry_run().with_strategy(ResolutionStrategy::SkipAndReport),
                &StaticTenantContext::institution("state-u"),
            )
            .unwrap();
        assert_eq!(report.strategy, ResolutionStrategy::SkipAndReport);
        assert!(report.dry_run);
    }
}
