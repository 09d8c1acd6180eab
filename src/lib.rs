//! notion-sync library
//!
//! Imports a Notion database into a PostgreSQL table: reads the database's
//! schema and rows through the Notion API, infers a matching relational
//! schema, creates (or replaces, or versions) the destination table, and
//! loads every row, resolving relation and rollup references into other
//! Notion databases along the way.
//!
//! # Design
//!
//! - One-shot batch job: pages are fetched sequentially and loaded inside a
//!   single transaction; there is no incremental mode.
//! - The column plan is inferred from schema metadata alone, in a
//!   deterministic order, so repeated imports of the same schema always
//!   produce the same table shape.
//! - A single unsupported property or malformed cell never aborts an import:
//!   properties are dropped with a warning, cells degrade to NULL.
//!
//! # CLI Usage
//!
//! ```bash
//! # Import into a fresh table
//! notion-sync <database_id> <table_name>
//!
//! # Replace the table on every run
//! notion-sync <database_id> <table_name> --drop-existing
//!
//! # Keep history: load into <table_name>_<timestamp>, repoint a view
//! notion-sync <database_id> <table_name> --versioned
//! ```

pub mod notion;
pub mod postgres;
pub mod resolver;
pub mod schema;
pub mod sync;
pub mod testing;
pub mod transform;

pub use notion::{NotionClient, PageSource};
pub use postgres::{PostgresWriter, TableWriter};
pub use schema::{infer_schema, ColumnPlan, ColumnSpec, ColumnType, ExtractionRule};
pub use sync::{run_import, DdlAction, ImportPlan, ImportReport, SyncOpts};
pub use transform::{transform_row, RowTuple, SqlValue};
