//! Import engine for legacy construction-estimation tables.
//!
//! Reads the legacy dBase dictionaries (units, materials, works) and the
//! composition table, reconciles their inconsistent keys into canonical
//! target ids, and upserts the result into the SQLite workspace database.

pub mod batch;
pub mod composition;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod import;
pub mod ledger;
pub mod legacy;
pub mod mapping;
pub mod reconcile;
pub mod record;

pub use batch::{BatchUpserter, ImportResult, RecordFailure};
pub use config::ImportConfig;
pub use context::RunContext;
pub use error::{ImportError, Result};
pub use import::{ImportOptions, ImportReport, Importer, KindSummary};
pub use record::{EntityKind, RawRecord, RawValue, TransformedRecord, Value};
