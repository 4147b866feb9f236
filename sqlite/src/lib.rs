//! SQLite storage for battery records.
//!
//! This crate persists [`BatteryRecord`](bugreport_battery_core::BatteryRecord)s
//! into a single `analysis_results` table keyed uniquely on
//! `(log_capture_time, nickname)`.
//!
//! # Architecture
//!
//! - **`schema`**: SQL generation for the table and its indexes
//! - **`migration`**: table lifecycle (init/ensure/status)
//! - **`query`**: bulk insert and retrieval
//!
//! The pipeline opens a fresh connection per operation rather than holding
//! one across a batch; concurrent writers are serialized by SQLite's own
//! locking, with a busy timeout.
//!
//! # Quick start
//!
//! ```no_run
//! use bugreport_battery_core::ConflictPolicy;
//! use bugreport_battery_sqlite::{Migration, RecordStore, open_database};
//!
//! let mut migration = Migration::new(open_database("instance/database.db").unwrap());
//! migration.init_table().unwrap();
//! let conn = migration.into_connection();
//!
//! let store = RecordStore::new(&conn).unwrap();
//! let summary = store.insert_many(&[], ConflictPolicy::Abort).unwrap();
//! println!("inserted {}", summary.inserted);
//! println!("{} rows", store.count().unwrap());
//! ```
//!
//! # Conflict policy
//!
//! Under [`ConflictPolicy::Abort`](bugreport_battery_core::ConflictPolicy::Abort)
//! a batch is all-or-nothing: one duplicate rolls back every row and
//! surfaces [`StorageError::Duplicate`]. Under
//! [`ConflictPolicy::Skip`](bugreport_battery_core::ConflictPolicy::Skip)
//! duplicates are skipped and counted in [`InsertSummary::skipped`].

mod error;
mod migration;
mod query;
mod schema;

pub use error::{Result, StorageError};
pub use migration::{Migration, MigrationStatus};
pub use query::{InsertSummary, RecordStore, open_database};
pub use schema::{TABLE_NAME, TIME_INDEX_NAME, UNIQUE_INDEX_NAME, generate_drop_sql, generate_schema_sql};
