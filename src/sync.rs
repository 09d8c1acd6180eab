//! Import reconciliation and orchestration.
//!
//! Decides what DDL the import performs based on the destination table's
//! presence and the `--drop-existing` / `--versioned` flags, then drives
//! schema inference, pagination, row transformation, and loading. The whole
//! load runs in one sink transaction, so a failed import leaves no partial
//! table behind.

use crate::notion::PageSource;
use crate::postgres::TableWriter;
use crate::schema;
use crate::transform;
use chrono::{DateTime, Utc};

/// Versioned-table suffix, derived from the import start time (UTC).
const VERSION_SUFFIX_FORMAT: &str = "_%Y%m%dT%H%M%S";

/// PostgreSQL truncates identifiers at 63 bytes; a versioned table name must
/// leave room for the 16-byte timestamp suffix.
const TABLE_NAME_MAX: usize = 63;
const VERSION_SUFFIX_LEN: usize = 16;

/// Import options from the CLI.
#[derive(Debug, Clone, Default)]
pub struct SyncOpts {
    /// Drop the destination table if it exists.
    pub drop_existing: bool,
    /// Import into a timestamped table and point a view at it.
    pub versioned: bool,
}

/// DDL policy for one import. A closed set so reconciliation stays
/// exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlAction {
    /// Table absent, no flags: create it.
    CreateFresh,
    /// `--drop-existing`: drop whatever is there, then create.
    DropRecreate,
    /// `--versioned`: create `<name><suffix>`, then swap a view named
    /// `<name>` over it.
    CreateVersioned { suffix: String },
}

/// The resolved plan for one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPlan {
    /// Name given on the command line; the view name in versioned mode.
    pub base_name: String,
    pub action: DdlAction,
}

impl ImportPlan {
    /// The physical table the rows are loaded into.
    pub fn physical_table(&self) -> String {
        match &self.action {
            DdlAction::CreateVersioned { suffix } => format!("{}{}", self.base_name, suffix),
            _ => self.base_name.clone(),
        }
    }
}

/// Outcome of a completed import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Physical table that was loaded.
    pub table: String,
    pub rows: u64,
}

/// Combine destination-table presence with the CLI flags.
///
/// Refuses to overwrite an existing table unless a flag explicitly allows
/// it; this is the one fatal reconciliation error.
pub fn plan_import(
    table_name: &str,
    exists: bool,
    opts: &SyncOpts,
    started_at: DateTime<Utc>,
) -> anyhow::Result<ImportPlan> {
    let action = if opts.versioned {
        DdlAction::CreateVersioned {
            suffix: started_at.format(VERSION_SUFFIX_FORMAT).to_string(),
        }
    } else if opts.drop_existing {
        DdlAction::DropRecreate
    } else if exists {
        return Err(anyhow::anyhow!(
            "table {table_name} already exists; pass --drop-existing to replace it \
             or --versioned to import alongside it"
        ));
    } else {
        DdlAction::CreateFresh
    };
    Ok(ImportPlan {
        base_name: table_name.to_string(),
        action,
    })
}

/// Check a Notion database id: 32 lowercase hex digits, hyphens tolerated.
/// Returns the bare form.
pub fn validate_database_id(database_id: &str) -> anyhow::Result<String> {
    let bare: String = database_id.chars().filter(|c| *c != '-').collect();
    if bare.len() == 32 && bare.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        Ok(bare)
    } else {
        Err(anyhow::anyhow!(
            "invalid Notion database ID: {database_id}; must be 32 hex digits"
        ))
    }
}

/// Check a destination table name against PostgreSQL identifier rules.
pub fn validate_table_name(table_name: &str, versioned: bool) -> anyhow::Result<()> {
    let mut chars = table_name.chars();
    let valid_head = matches!(chars.next(), Some('a'..='z' | '_'));
    let valid_tail = chars.all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'));
    if !(valid_head && valid_tail) {
        return Err(anyhow::anyhow!(
            "invalid PostgreSQL table name: {table_name}; must match [a-z_][a-z0-9_]*"
        ));
    }
    let max = if versioned {
        TABLE_NAME_MAX - VERSION_SUFFIX_LEN
    } else {
        TABLE_NAME_MAX
    };
    if table_name.len() > max {
        return Err(anyhow::anyhow!(
            "invalid PostgreSQL table name: {table_name}; \
             must contain no more than {max} characters"
        ));
    }
    Ok(())
}

/// Import a Notion database into PostgreSQL.
pub async fn run_import(
    source: &dyn PageSource,
    sink: &mut dyn TableWriter,
    database_id: &str,
    table_name: &str,
    opts: &SyncOpts,
) -> anyhow::Result<ImportReport> {
    run_import_at(source, sink, database_id, table_name, opts, Utc::now()).await
}

/// [`run_import`] with an explicit start time; the versioned suffix is
/// derived from it.
pub async fn run_import_at(
    source: &dyn PageSource,
    sink: &mut dyn TableWriter,
    database_id: &str,
    table_name: &str,
    opts: &SyncOpts,
    started_at: DateTime<Utc>,
) -> anyhow::Result<ImportReport> {
    let database_id = validate_database_id(database_id)?;
    validate_table_name(table_name, opts.versioned)?;

    let plan = schema::infer_schema(source, &database_id).await?;
    tracing::info!(
        "Inferred {} columns for table {table_name}",
        plan.columns.len()
    );

    let exists = sink.table_exists(table_name).await?;
    let import = plan_import(table_name, exists, opts, started_at)?;
    let table = import.physical_table();

    sink.begin().await?;
    if import.action == DdlAction::DropRecreate {
        sink.drop_table(&table).await?;
    }
    sink.create_table(&table, &plan).await?;

    let mut rows: u64 = 0;
    let mut cursor = None;
    loop {
        let batch = source.fetch_page_batch(&database_id, cursor).await?;
        let tuples: Vec<_> = batch
            .rows
            .iter()
            .map(|row| transform::transform_row(row, &plan))
            .collect();
        rows += tuples.len() as u64;
        sink.bulk_insert(&table, &plan, &tuples).await?;
        match batch.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    tracing::info!("Wrote {rows} rows to PostgreSQL table {table}");

    if let DdlAction::CreateVersioned { .. } = import.action {
        sink.create_view(&import.base_name, &table).await?;
    }
    sink.commit().await?;

    Ok(ImportReport { table, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn existing_table_without_flags_is_fatal() {
        let err = plan_import("foo", true, &SyncOpts::default(), at()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn absent_table_without_flags_creates_fresh() {
        let plan = plan_import("foo", false, &SyncOpts::default(), at()).unwrap();
        assert_eq!(plan.action, DdlAction::CreateFresh);
        assert_eq!(plan.physical_table(), "foo");
    }

    #[test]
    fn drop_existing_recreates() {
        let opts = SyncOpts {
            drop_existing: true,
            versioned: false,
        };
        let plan = plan_import("foo", true, &opts, at()).unwrap();
        assert_eq!(plan.action, DdlAction::DropRecreate);
    }

    #[test]
    fn versioned_always_versions() {
        let opts = SyncOpts {
            drop_existing: false,
            versioned: true,
        };
        for exists in [false, true] {
            let plan = plan_import("foo", exists, &opts, at()).unwrap();
            assert_eq!(plan.physical_table(), "foo_20240101T000000");
        }
    }

    #[test]
    fn database_id_accepts_hyphenated_form() {
        let bare = "0123456789abcdef0123456789abcdef";
        assert_eq!(validate_database_id(bare).unwrap(), bare);
        assert_eq!(
            validate_database_id("01234567-89ab-cdef-0123-456789abcdef").unwrap(),
            bare
        );
        assert!(validate_database_id("not-an-id").is_err());
    }

    #[test]
    fn table_name_rules() {
        assert!(validate_table_name("foo_bar", false).is_ok());
        assert!(validate_table_name("Foo", false).is_err());
        assert!(validate_table_name("1foo", false).is_err());
        // 48 characters fit unversioned but not with the timestamp suffix
        let long = "a".repeat(48);
        assert!(validate_table_name(&long, false).is_ok());
        assert!(validate_table_name(&long, true).is_err());
    }
}
