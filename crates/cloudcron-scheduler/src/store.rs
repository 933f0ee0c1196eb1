use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::{
    cron::CronExpression,
    db::{init_db, TIMESTAMP_FORMAT},
    error::StoreError,
    types::ScheduleEntry,
};

/// Persistent source of crontab entries.
///
/// `persist_last_run` and `reload` are what the scheduler loop calls. When the
/// underlying connection has gone stale they reconnect once and retry once.
pub trait ScheduleStore: Send {
    /// Every entry, in stored order.
    fn load_all(&mut self) -> Result<Vec<ScheduleEntry>, StoreError>;

    /// Set `last_run_at` of one entry. `EntryNotFound` if it no longer exists.
    fn write_last_run(&mut self, id: &str, at: NaiveDateTime) -> Result<(), StoreError>;

    fn reconnect(&mut self) -> Result<(), StoreError>;

    fn close(&mut self);

    fn persist_last_run(&mut self, id: &str, at: NaiveDateTime) -> Result<(), StoreError> {
        match self.write_last_run(id, at) {
            Err(e) if e.is_connection() => {
                warn!(entry_id = %id, err = %e, "store connection lost, reconnecting");
                self.reconnect()?;
                self.write_last_run(id, at)
            }
            other => other,
        }
    }

    fn reload(&mut self) -> Result<Vec<ScheduleEntry>, StoreError> {
        match self.load_all() {
            Err(e) if e.is_connection() => {
                warn!(err = %e, "store connection lost, reconnecting");
                self.reconnect()?;
                self.load_all()
            }
            other => other,
        }
    }
}

const COLUMNS: &str =
    "id, name, command, parameters, schedule, last_run_at, created_at, updated_at";

/// SQLite-backed crontab.
///
/// Owns its connection explicitly so it can be closed and reopened; any use
/// while closed fails with [`StoreError::Disconnected`].
pub struct SqliteScheduleStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteScheduleStore {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = connect(&path)?;
        info!(path = %path.display(), "schedule store opened");
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or(StoreError::Disconnected)
    }

    /// Persist a new entry.
    pub fn insert(&mut self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO crontab
             (id, name, command, parameters, schedule, last_run_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                entry.id,
                entry.name,
                entry.command,
                entry.parameters,
                entry.expression.to_string(),
                entry.last_run_at.map(format_timestamp),
                format_timestamp(entry.created_at),
                format_timestamp(entry.updated_at),
            ],
        )?;
        info!(entry_id = %entry.id, name = %entry.name, schedule = %entry.expression, "crontab entry added");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<ScheduleEntry, StoreError> {
        let raw = self
            .conn()?
            .query_row(
                &format!("SELECT {COLUMNS} FROM crontab WHERE id = ?1"),
                [id],
                RawEntry::from_row,
            )
            .optional()?;
        match raw {
            Some(raw) => raw.into_entry(),
            None => Err(StoreError::EntryNotFound { id: id.to_string() }),
        }
    }

    /// Remove an entry, returning it flagged as deleted.
    pub fn delete(&mut self, id: &str) -> Result<ScheduleEntry, StoreError> {
        let mut entry = self.get(id)?;
        let n = self.conn()?.execute("DELETE FROM crontab WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::EntryNotFound { id: id.to_string() });
        }
        entry.is_deleted = true;
        info!(entry_id = %id, "crontab entry removed");
        Ok(entry)
    }

    /// Change an entry's schedule. Returns the entry before and after the change.
    ///
    /// An invalid schedule is rejected before anything is written.
    pub fn update_schedule(
        &mut self,
        id: &str,
        schedule: &str,
        now: NaiveDateTime,
    ) -> Result<(ScheduleEntry, ScheduleEntry), StoreError> {
        let previous = self.get(id)?;
        let mut updated = previous.clone();
        updated.set_schedule(schedule)?;
        updated.updated_at = now;

        let n = self.conn()?.execute(
            "UPDATE crontab SET schedule = ?1, updated_at = ?2 WHERE id = ?3",
            params![updated.expression.to_string(), format_timestamp(now), id],
        )?;
        if n == 0 {
            return Err(StoreError::EntryNotFound { id: id.to_string() });
        }
        info!(entry_id = %id, schedule = %updated.expression, "crontab schedule changed");
        Ok((previous, updated))
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn load_all(&mut self) -> Result<Vec<ScheduleEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM crontab ORDER BY rowid"
        ))?;
        let raw: Vec<RawEntry> = stmt
            .query_map([], RawEntry::from_row)?
            .collect::<rusqlite::Result<_>>()?;

        let entries = raw
            .into_iter()
            .filter_map(|r| {
                let id = r.id.clone();
                match r.into_entry() {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(entry_id = %id, err = %e, "skipping unreadable crontab entry");
                        None
                    }
                }
            })
            .collect();
        Ok(entries)
    }

    fn write_last_run(&mut self, id: &str, at: NaiveDateTime) -> Result<(), StoreError> {
        // optimistic: the row may have been deleted since the snapshot was taken
        let n = self.conn()?.execute(
            "UPDATE crontab SET last_run_at = ?1 WHERE id = ?2",
            params![format_timestamp(at), id],
        )?;
        if n == 0 {
            return Err(StoreError::EntryNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), StoreError> {
        self.conn = None;
        self.conn = Some(connect(&self.path)?);
        info!(path = %self.path.display(), "schedule store reconnected");
        Ok(())
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!(path = %self.path.display(), "schedule store closed");
        }
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=3000;")?;
    init_db(&conn)?;
    Ok(conn)
}

struct RawEntry {
    id: String,
    name: String,
    command: String,
    parameters: String,
    schedule: String,
    last_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            command: row.get(2)?,
            parameters: row.get(3)?,
            schedule: row.get(4)?,
            last_run_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<ScheduleEntry, StoreError> {
        Ok(ScheduleEntry {
            expression: CronExpression::parse(&self.schedule)?,
            last_run_at: self.last_run_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            name: self.name,
            command: self.command,
            parameters: self.parameters,
            is_new: false,
            is_deleted: false,
        })
    }
}

fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| StoreError::InvalidTimestamp {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn entry(name: &str, schedule: &str) -> ScheduleEntry {
        ScheduleEntry::new(name, "symfony", &format!("app:{name}"), schedule, dt("2011-01-01 00:00:00"))
            .unwrap()
    }

    fn open_temp() -> (tempfile::TempDir, SqliteScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteScheduleStore::open(dir.path().join("cron.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn load_all_returns_entries_in_insertion_order() {
        let (_dir, mut store) = open_temp();
        for name in ["zeta", "alpha", "mid"] {
            store.insert(&entry(name, "*/5 * * * *")).unwrap();
        }
        let names: Vec<String> = store.load_all().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn loaded_entries_round_trip_fields() {
        let (_dir, mut store) = open_temp();
        let original = entry("report", "0 3 * * 1");
        store.insert(&original).unwrap();

        let loaded = store.get(&original.id).unwrap();
        assert_eq!(loaded.expression.to_string(), "0 3 * * 1");
        assert_eq!(loaded.parameters, "app:report");
        assert!(loaded.last_run_at.is_none());
        assert!(!loaded.is_new);
    }

    #[test]
    fn write_last_run_updates_row() {
        let (_dir, mut store) = open_temp();
        let e = entry("report", "* * * * *");
        store.insert(&e).unwrap();
        store.write_last_run(&e.id, dt("2011-02-03 04:05:06")).unwrap();
        assert_eq!(
            store.get(&e.id).unwrap().last_run_at,
            Some(dt("2011-02-03 04:05:06"))
        );
    }

    #[test]
    fn write_last_run_on_deleted_entry_is_not_found() {
        let (_dir, mut store) = open_temp();
        let e = entry("report", "* * * * *");
        store.insert(&e).unwrap();
        let removed = store.delete(&e.id).unwrap();
        assert!(removed.is_deleted);

        let err = store.write_last_run(&e.id, dt("2011-02-03 04:05:06")).unwrap_err();
        assert!(matches!(err, StoreError::EntryNotFound { .. }));
        assert!(!err.is_connection());
    }

    #[test]
    fn closed_store_reports_disconnected() {
        let (_dir, mut store) = open_temp();
        store.close();
        assert!(!store.is_connected());
        assert!(matches!(store.load_all(), Err(StoreError::Disconnected)));
    }

    #[test]
    fn persist_last_run_reconnects_once() {
        let (_dir, mut store) = open_temp();
        let e = entry("report", "* * * * *");
        store.insert(&e).unwrap();
        store.close();

        store.persist_last_run(&e.id, dt("2011-02-03 04:05:00")).unwrap();
        assert!(store.is_connected());
        assert_eq!(
            store.get(&e.id).unwrap().last_run_at,
            Some(dt("2011-02-03 04:05:00"))
        );
    }

    #[test]
    fn reload_reconnects_once() {
        let (_dir, mut store) = open_temp();
        store.insert(&entry("report", "* * * * *")).unwrap();
        store.close();
        assert_eq!(store.reload().unwrap().len(), 1);
    }

    #[test]
    fn update_schedule_rejects_invalid_expression() {
        let (_dir, mut store) = open_temp();
        let e = entry("report", "*/5 * * * *");
        store.insert(&e).unwrap();

        let err = store
            .update_schedule(&e.id, "* * *", dt("2011-05-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSchedule(_)));
        assert_eq!(store.get(&e.id).unwrap().expression.to_string(), "*/5 * * * *");

        let (before, after) = store
            .update_schedule(&e.id, "0 * * * *", dt("2011-05-01 00:00:00"))
            .unwrap();
        assert!(after.affects_schedule(Some(&before)));
        assert_eq!(store.get(&e.id).unwrap().expression.to_string(), "0 * * * *");
    }

    #[test]
    fn unreadable_rows_are_skipped_on_load() {
        let (_dir, mut store) = open_temp();
        store.insert(&entry("good", "* * * * *")).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO crontab (id, name, command, parameters, schedule, created_at, updated_at)
                 VALUES ('bad', 'bad', 'symfony', '', 'not a cron', '2011-01-01 00:00:00', '2011-01-01 00:00:00')",
                [],
            )
            .unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "good");
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.get("nope"), Err(StoreError::EntryNotFound { .. })));
    }
}
