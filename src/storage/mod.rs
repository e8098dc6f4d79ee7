//! Storage layer abstraction.
//!
//! Sessions never talk to a database directly; they go through a
//! [`PersistenceGateway`]:
//! - **Lookup**: natural-key matching during resolution
//! - **Transaction**: one all-or-nothing batch of upserts per commit
//! - **Query**: selector-driven reads for export
//!
//! Two backends are provided: [`MemoryGateway`] and [`SqliteGateway`].

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

mod gateway;
mod lock;
pub mod memory;
pub mod sqlite;

pub use gateway::{GatewayTransaction, PendingWrite, PersistenceGateway, UpsertAction, UpsertOutcome};
pub(crate) use lock::acquire_lock;
pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;
