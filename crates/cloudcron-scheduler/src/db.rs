use rusqlite::Connection;

use crate::error::StoreError;

/// Stored timestamp format, second precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Initialise the crontab schema in `conn`.
///
/// Creates the `crontab` table (idempotent). Rows are read back in insertion
/// order, which is the order the scheduler dispatches them in.
pub fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS crontab (
            id           TEXT    NOT NULL PRIMARY KEY,
            name         TEXT    NOT NULL,
            command      TEXT    NOT NULL,
            parameters   TEXT    NOT NULL DEFAULT '',
            schedule     TEXT    NOT NULL,   -- five-field cron expression
            last_run_at  TEXT,               -- TIMESTAMP_FORMAT or NULL
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
