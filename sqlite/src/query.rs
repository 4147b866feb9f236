//! Record insertion and retrieval.
//!
//! Provides [`RecordStore`] over a borrowed connection. Bulk inserts run in
//! one transaction and follow an explicit [`ConflictPolicy`] for rows that
//! collide with the `(log_capture_time, nickname)` uniqueness index.
//!
//! # Example
//!
//! ```no_run
//! use bugreport_battery_core::ConflictPolicy;
//! use bugreport_battery_sqlite::{Migration, RecordStore, open_database};
//!
//! let mut migration = Migration::new(open_database("instance/database.db").unwrap());
//! migration.ensure_table().unwrap();
//! let conn = migration.into_connection();
//!
//! let store = RecordStore::new(&conn).unwrap();
//! let summary = store.insert_many(&[], ConflictPolicy::Skip).unwrap();
//! assert_eq!(summary.inserted, 0);
//!
//! for record in store.get_all().unwrap() {
//!     println!("{} {}", record.capture_time_string(), record.nickname);
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use bugreport_battery_core::{BatteryRecord, CAPTURE_TIME_FORMAT, ConflictPolicy, parse_capture_time};
use chrono::NaiveDateTime;
use rusqlite::{Connection, ErrorCode, Row, params, params_from_iter};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::schema::{COLUMNS, TABLE_NAME};

/// How long a writer waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if necessary) the database file and its parent directory.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Outcome of [`RecordStore::insert_many`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    /// Rows skipped as duplicates under [`ConflictPolicy::Skip`].
    pub skipped: usize,
}

/// Query interface for reading and writing battery records.
pub struct RecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> RecordStore<'a> {
    /// Wraps a connection whose table has already been created (see
    /// [`Migration`](crate::Migration)).
    pub fn new(conn: &'a Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Inserts records within a single transaction.
    ///
    /// Under [`ConflictPolicy::Abort`] the first row colliding with the
    /// uniqueness index rolls back the whole batch. Under
    /// [`ConflictPolicy::Skip`] colliding rows, including repeats within
    /// `records` itself, are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] on a collision under `Abort`, or
    /// [`StorageError::DatabaseError`] on any other SQLite failure.
    pub fn insert_many(
        &self,
        records: &[BatteryRecord],
        policy: ConflictPolicy,
    ) -> Result<InsertSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let summary = insert_rows(&tx, records, policy)?;
        tx.commit()?;
        Ok(summary)
    }

    /// Loads every record, newest capture time first.
    pub fn get_all(&self) -> Result<Vec<BatteryRecord>> {
        self.select("", Vec::new())
    }

    /// Loads records whose capture time lies within the optional inclusive
    /// bounds, newest first. `None` leaves that side open.
    pub fn get_by_time_range(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<BatteryRecord>> {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(start) = start {
            values.push(start.format(CAPTURE_TIME_FORMAT).to_string());
            conditions.push(format!("log_capture_time >= ?{}", values.len()));
        }
        if let Some(end) = end {
            values.push(end.format(CAPTURE_TIME_FORMAT).to_string());
            conditions.push(format!("log_capture_time <= ?{}", values.len()));
        }

        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        self.select(&filter, values)
    }

    /// Loads one device's records, newest first.
    pub fn get_by_nickname(&self, nickname: &str) -> Result<Vec<BatteryRecord>> {
        self.select(" WHERE nickname = ?1", vec![nickname.to_string()])
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    fn select(&self, filter: &str, values: Vec<String>) -> Result<Vec<BatteryRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {TABLE_NAME}{filter} ORDER BY log_capture_time DESC, id DESC"
        ))?;

        let rows: Vec<RawRow> = stmt
            .query_map(params_from_iter(values), RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRow::into_record).collect()
    }
}

/// Inserts `records` on `conn` without opening or committing a
/// transaction; the caller owns the enclosing one.
pub(crate) fn insert_rows(
    conn: &Connection,
    records: &[BatteryRecord],
    policy: ConflictPolicy,
) -> Result<InsertSummary> {
    let conflict_clause = match policy {
        ConflictPolicy::Abort => "",
        ConflictPolicy::Skip => " ON CONFLICT (log_capture_time, nickname) DO NOTHING",
    };
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {TABLE_NAME} ({COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11){conflict_clause}"
    ))?;

    let mut summary = InsertSummary::default();
    for record in records {
        let capture_time = record.capture_time_string();
        let result = stmt.execute(params![
            capture_time,
            record.phone_brand,
            record.nickname,
            record.system_version,
            record.estimated_battery_capacity,
            record.last_learned_battery_capacity,
            record.min_learned_battery_capacity,
            record.max_learned_battery_capacity,
            record.cycle_count,
            record.hardware_capacity,
            record.design_capacity,
        ]);

        match result {
            Ok(0) => {
                debug!(
                    log_capture_time = %capture_time,
                    nickname = %record.nickname,
                    "Skipped duplicate record"
                );
                summary.skipped += 1;
            }
            Ok(_) => summary.inserted += 1,
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    log_capture_time = %capture_time,
                    nickname = %record.nickname,
                    "Duplicate record; rolling back batch"
                );
                return Err(StorageError::Duplicate {
                    log_capture_time: capture_time,
                    nickname: record.nickname.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(summary)
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Row as stored, before the capture time is parsed back.
struct RawRow {
    log_capture_time: String,
    phone_brand: String,
    nickname: String,
    system_version: String,
    numbers: [i64; 7],
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            log_capture_time: row.get(0)?,
            phone_brand: row.get(1)?,
            nickname: row.get(2)?,
            system_version: row.get(3)?,
            numbers: [
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ],
        })
    }

    fn into_record(self) -> Result<BatteryRecord> {
        let log_capture_time = parse_capture_time(&self.log_capture_time).ok_or_else(|| {
            StorageError::ConversionError(format!(
                "stored capture time '{}' is not YYYY-MM-DD HH:MM:SS",
                self.log_capture_time
            ))
        })?;
        let [estimated, last, min, max, cycles, hardware, design] = self.numbers;

        Ok(BatteryRecord {
            log_capture_time,
            phone_brand: self.phone_brand,
            nickname: self.nickname,
            system_version: self.system_version,
            estimated_battery_capacity: estimated,
            last_learned_battery_capacity: last,
            min_learned_battery_capacity: min,
            max_learned_battery_capacity: max,
            cycle_count: cycles,
            hardware_capacity: hardware,
            design_capacity: design,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Migration;

    fn record(time: &str, nickname: &str) -> BatteryRecord {
        BatteryRecord {
            log_capture_time: parse_capture_time(time).unwrap(),
            phone_brand: "Xiaomi".into(),
            nickname: nickname.into(),
            system_version: "OS1.0.5.0.UNCCNXM".into(),
            estimated_battery_capacity: 4500,
            last_learned_battery_capacity: 4480,
            min_learned_battery_capacity: 4400,
            max_learned_battery_capacity: 4600,
            cycle_count: 120,
            hardware_capacity: 4470,
            design_capacity: 4610,
        }
    }

    fn setup() -> Connection {
        let mut migration = Migration::new(Connection::open_in_memory().unwrap());
        migration.init_table().unwrap();
        migration.into_connection()
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = setup();
        let store = RecordStore::new(&conn).unwrap();
        let original = record("2024-01-01 12:30:45", "houji");
        let summary = store
            .insert_many(std::slice::from_ref(&original), ConflictPolicy::Abort)
            .unwrap();
        assert_eq!(summary, InsertSummary { inserted: 1, skipped: 0 });
        assert_eq!(store.get_all().unwrap(), vec![original]);
    }

    #[test]
    fn test_unique_violation_detected() {
        let conn = setup();
        let store = RecordStore::new(&conn).unwrap();
        let r = record("2024-01-01 00:00:00", "houji");
        let err = store
            .insert_many(&[r.clone(), r], ConflictPolicy::Abort)
            .unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { ref nickname, .. } if nickname == "houji"));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_open_database_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("database.db");
        let conn = open_database(&path).unwrap();
        conn.execute_batch("SELECT 1").unwrap();
        assert!(path.exists());
    }
}
