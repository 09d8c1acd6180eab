//! Command-line interface for notion-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Import a Notion database into a fresh table
//! NOTION_TOKEN=secret POSTGRESQL_DSN="host=localhost user=postgres" \
//!   notion-sync 0123456789abcdef0123456789abcdef tasks
//!
//! # Replace the table on every run
//! notion-sync 0123456789abcdef0123456789abcdef tasks --drop-existing
//!
//! # Keep history: load into tasks_<timestamp> and repoint the tasks view
//! notion-sync 0123456789abcdef0123456789abcdef tasks --versioned
//! ```

use clap::Parser;
use notion_sync::notion::{NotionClient, DEFAULT_PAGE_SIZE};
use notion_sync::postgres::PostgresWriter;
use notion_sync::sync::{self, SyncOpts};

#[derive(Parser)]
#[command(name = "notion-sync")]
#[command(about = "Import a Notion database to a PostgreSQL table")]
struct Cli {
    /// Notion database ID
    database_id: String,

    /// PostgreSQL table name
    table_name: String,

    /// Drop the table if it exists
    #[arg(long)]
    drop_existing: bool,

    /// Import into a timestamped table and point a view at it
    #[arg(long)]
    versioned: bool,

    /// Rows fetched per Notion query page. Lower this if imports time out
    /// on databases with heavy properties.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    batch_size: usize,

    /// Notion integration token. The integration needs access to the
    /// imported database and to every database referenced by a relation or
    /// a rollup.
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    token: String,

    /// PostgreSQL connection string
    #[arg(long, env = "POSTGRESQL_DSN", hide_env_values = true)]
    postgres_dsn: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let source = NotionClient::new(cli.token, cli.batch_size)?;
    let mut sink = PostgresWriter::connect(&cli.postgres_dsn).await?;

    let opts = SyncOpts {
        drop_existing: cli.drop_existing,
        versioned: cli.versioned,
    };
    let report = sync::run_import(
        &source,
        &mut sink,
        &cli.database_id,
        &cli.table_name,
        &opts,
    )
    .await?;

    tracing::info!(
        "Import finished: {} rows in table {}",
        report.rows,
        report.table
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_defaults_and_overrides() {
        let base = [
            "notion-sync",
            "0123456789abcdef0123456789abcdef",
            "tasks",
            "--token",
            "t",
            "--postgres-dsn",
            "host=localhost",
        ];

        let cli = Cli::try_parse_from(base).unwrap();
        assert_eq!(cli.batch_size, 64);

        let mut with_override = base.to_vec();
        with_override.extend(["--batch-size", "16"]);
        let cli = Cli::try_parse_from(with_override).unwrap();
        assert_eq!(cli.batch_size, 16);
    }
}
