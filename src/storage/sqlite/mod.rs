//! `SQLite` persistence gateway.
//!
//! - [`connection`]: opening and configuring connections
//! - [`sql`]: LIKE escaping for key-prefix queries
//! - [`gateway`]: the [`SqliteGateway`] itself

mod connection;
mod gateway;
mod sql;

pub use connection::{configure_connection, open_file, open_in_memory};
pub use gateway::SqliteGateway;
pub use sql::{escape_like_wildcards, prefix_pattern};
