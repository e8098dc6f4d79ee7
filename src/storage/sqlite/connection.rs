//! Connection setup for the `SQLite` gateway.

use rusqlite::Connection;
use std::path::Path;

use crate::{Error, Result};

/// Configures a `SQLite` connection for concurrent use.
///
/// - **WAL mode**: concurrent readers alongside one writer
/// - **NORMAL synchronous**: durable at checkpoints without an fsync per commit
/// - **`busy_timeout`**: waits up to 5 seconds for a competing writer
///
/// Pragma failures are ignored; an in-memory database, for example, reports
/// `memory` for `journal_mode`.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    Ok(())
}

/// Opens (creating parent directories as needed) and configures a database file.
pub fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_db_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }
    let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
        operation: "open_sqlite".to_string(),
        cause: format!("{}: {e}", path.display()),
    })?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Opens a configured in-memory database.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
        operation: "open_sqlite_in_memory".to_string(),
        cause: e.to_string(),
    })?;
    configure_connection(&conn)?;
    Ok(conn)
}
