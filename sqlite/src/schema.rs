//! SQL generation for the `analysis_results` table.
//!
//! One row per [`BatteryRecord`](bugreport_battery_core::BatteryRecord),
//! with an autoincrement primary key, a uniqueness index on
//! `(log_capture_time, nickname)` and a lookup index on `log_capture_time`.
//! `log_capture_time` is stored in its canonical `YYYY-MM-DD HH:MM:SS`
//! text form, so lexical order is chronological order.
//!
//! The record schema version is stamped into `PRAGMA user_version` when the
//! table is created.

use bugreport_battery_core::RECORD_SCHEMA_VERSION;

/// Name of the single results table.
pub const TABLE_NAME: &str = "analysis_results";

/// Name of the uniqueness index on `(log_capture_time, nickname)`.
pub const UNIQUE_INDEX_NAME: &str = "idx_uni_log";

/// Name of the lookup index on `log_capture_time`.
pub const TIME_INDEX_NAME: &str = "idx_log_capture_time";

/// Column list in insert order, matching
/// [`REQUIRED_FIELDS`](bugreport_battery_core::REQUIRED_FIELDS).
pub(crate) const COLUMNS: &str = "log_capture_time, phone_brand, nickname, system_version, \
    estimated_battery_capacity, last_learned_battery_capacity, \
    min_learned_battery_capacity, max_learned_battery_capacity, \
    cycle_count, hardware_capacity, design_capacity";

/// Generates the `CREATE TABLE`/`CREATE INDEX` script.
///
/// Uses `IF NOT EXISTS` so it is safe on an existing database.
pub fn generate_schema_sql() -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
    id                            INTEGER PRIMARY KEY AUTOINCREMENT,
    log_capture_time              TEXT    NOT NULL,
    phone_brand                   TEXT    NOT NULL COLLATE BINARY,
    nickname                      TEXT    NOT NULL COLLATE BINARY,
    system_version                TEXT    NOT NULL COLLATE BINARY,
    estimated_battery_capacity    INTEGER NOT NULL,
    last_learned_battery_capacity INTEGER NOT NULL,
    min_learned_battery_capacity  INTEGER NOT NULL,
    max_learned_battery_capacity  INTEGER NOT NULL,
    cycle_count                   INTEGER NOT NULL,
    hardware_capacity             INTEGER NOT NULL,
    design_capacity               INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS {TIME_INDEX_NAME} ON {TABLE_NAME} (log_capture_time);
CREATE UNIQUE INDEX IF NOT EXISTS {UNIQUE_INDEX_NAME} ON {TABLE_NAME} (log_capture_time, nickname);

PRAGMA user_version = {RECORD_SCHEMA_VERSION};
"#
    )
}

/// Generates SQL dropping the table (and with it, its indexes).
pub fn generate_drop_sql() -> String {
    format!("DROP TABLE IF EXISTS {TABLE_NAME};\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_sql_contains_table_and_indexes() {
        let sql = generate_schema_sql();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS analysis_results"));
        assert!(sql.contains("id                            INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("CREATE UNIQUE INDEX IF NOT EXISTS idx_uni_log"));
        assert!(sql.contains("(log_capture_time, nickname)"));
        assert!(sql.contains("CREATE INDEX IF NOT EXISTS idx_log_capture_time"));
        assert!(sql.contains("PRAGMA user_version = 2"));
    }

    #[test]
    fn test_columns_match_required_fields() {
        let columns: Vec<&str> = COLUMNS.split(',').map(str::trim).collect();
        assert_eq!(columns, bugreport_battery_core::REQUIRED_FIELDS);
    }

    #[test]
    fn test_schema_sql_executes_and_enforces_pair_uniqueness() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&generate_schema_sql()).unwrap();

        let insert = format!(
            "INSERT INTO {TABLE_NAME} ({COLUMNS}) VALUES (?1, 'Xiaomi', ?2, 'OS1', 1, 1, 1, 1, 1, 1, 1)"
        );
        conn.execute(&insert, ["2024-01-01 00:00:00", "houji"]).unwrap();
        conn.execute(&insert, ["2024-01-01 00:00:00", "aurora"]).unwrap();
        conn.execute(&insert, ["2024-01-02 00:00:00", "houji"]).unwrap();
        assert!(conn.execute(&insert, ["2024-01-01 00:00:00", "houji"]).is_err());

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, RECORD_SCHEMA_VERSION);
    }

    #[test]
    fn test_drop_sql_removes_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&generate_schema_sql()).unwrap();
        conn.execute_batch(&generate_drop_sql()).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'analysis_results'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
