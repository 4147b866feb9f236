//! Table lifecycle for the results store.
//!
//! Provides [`Migration`] for rebuilding the table (init mode, optionally
//! together with its new rows), creating it on demand (append mode), and
//! reporting its status. All mutation
//! operations run inside a transaction.
//!
//! # Example
//!
//! ```no_run
//! use bugreport_battery_sqlite::Migration;
//! use rusqlite::Connection;
//!
//! let conn = Connection::open("instance/database.db").unwrap();
//! let mut migration = Migration::new(conn);
//!
//! // Destructive full reload
//! migration.init_table().unwrap();
//!
//! let status = migration.status().unwrap();
//! assert!(status.table_exists);
//! assert_eq!(status.row_count, 0);
//! ```

use bugreport_battery_core::{BatteryRecord, ConflictPolicy, RECORD_SCHEMA_VERSION};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::query::{InsertSummary, insert_rows};
use crate::schema::{TABLE_NAME, generate_drop_sql, generate_schema_sql};

/// Manages the lifecycle of the `analysis_results` table.
pub struct Migration {
    conn: Connection,
}

impl Migration {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Drops and recreates the table with both indexes.
    ///
    /// Every row from previous runs is discarded. Drop and create happen in
    /// one transaction, so a failure leaves the previous table intact.
    pub fn init_table(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&generate_drop_sql())?;
        tx.execute_batch(&generate_schema_sql())?;
        tx.commit()?;
        info!(table = TABLE_NAME, version = RECORD_SCHEMA_VERSION, "Initialized results table");
        Ok(())
    }

    /// Rebuilds the table and fills it with `records` in one transaction.
    ///
    /// Nothing is committed unless the insert succeeds, so a reload that
    /// fails (a duplicate under [`ConflictPolicy::Abort`], a disk error)
    /// leaves the previous table and its rows as they were.
    pub fn reload(
        &mut self,
        records: &[BatteryRecord],
        policy: ConflictPolicy,
    ) -> Result<InsertSummary> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&generate_drop_sql())?;
        tx.execute_batch(&generate_schema_sql())?;
        let summary = insert_rows(&tx, records, policy)?;
        tx.commit()?;
        info!(
            table = TABLE_NAME,
            version = RECORD_SCHEMA_VERSION,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Reloaded results table"
        );
        Ok(summary)
    }

    /// Creates the table if it does not exist yet and checks its version.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SchemaMismatch`] when an existing table was
    /// stamped with a different record schema version.
    pub fn ensure_table(&mut self) -> Result<()> {
        if !self.table_exists()? {
            debug!(table = TABLE_NAME, "Results table missing; creating it");
            let tx = self.conn.transaction()?;
            tx.execute_batch(&generate_schema_sql())?;
            tx.commit()?;
            return Ok(());
        }

        let found = self.schema_version()?;
        if found != RECORD_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                found,
                expected: RECORD_SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    /// Returns whether the table exists, its row count, and its version.
    pub fn status(&self) -> Result<MigrationStatus> {
        let table_exists = self.table_exists()?;
        let schema_version = self.schema_version()?;
        let row_count = if table_exists {
            let count: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"), [], |row| {
                        row.get(0)
                    })?;
            count as usize
        } else {
            0
        };

        Ok(MigrationStatus {
            table_exists,
            row_count,
            schema_version,
        })
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the migration and returns the underlying connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn table_exists(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [TABLE_NAME],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn schema_version(&self) -> Result<u32> {
        let version: u32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }
}

/// Snapshot of the table state returned by [`Migration::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub table_exists: bool,
    pub row_count: usize,
    /// Value of `PRAGMA user_version`; `0` on a database never initialized.
    pub schema_version: u32,
}
