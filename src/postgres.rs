//! PostgreSQL table writer.
//!
//! Identifiers interpolated into SQL here are trusted: table names are
//! validated against a strict pattern before the import starts, and column
//! names come out of the sanitizer.

use crate::schema::ColumnPlan;
use crate::transform::RowTuple;
use anyhow::Result;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

/// Abstract relational sink for the reconciler.
///
/// [`PostgresWriter`] is the production implementation; tests use
/// [`crate::testing::MemoryTableWriter`].
#[async_trait::async_trait]
pub trait TableWriter: Send {
    async fn table_exists(&mut self, name: &str) -> Result<bool>;
    async fn create_table(&mut self, name: &str, plan: &ColumnPlan) -> Result<()>;
    async fn drop_table(&mut self, name: &str) -> Result<()>;
    /// Create or replace a view selecting everything from `target`.
    async fn create_view(&mut self, name: &str, target: &str) -> Result<()>;
    async fn bulk_insert(&mut self, name: &str, plan: &ColumnPlan, rows: &[RowTuple]) -> Result<()>;

    /// Open the load transaction. No-op by default so in-memory writers do
    /// not have to care.
    async fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Commit the load transaction.
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct PostgresWriter {
    client: Client,
}

impl PostgresWriter {
    pub fn new(client: Client) -> Self {
        PostgresWriter { client }
    }

    /// Connect and spawn the connection driver task.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(dsn, tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {e}");
            }
        });
        Ok(PostgresWriter { client })
    }
}

#[async_trait::async_trait]
impl TableWriter for PostgresWriter {
    async fn table_exists(&mut self, name: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_tables \
                 WHERE schemaname = current_schema() AND tablename = $1)",
                &[&name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create_table(&mut self, name: &str, plan: &ColumnPlan) -> Result<()> {
        let columns = plan
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        self.client
            .execute(&format!("CREATE TABLE {name} ({columns})"), &[])
            .await?;
        tracing::info!("Created PostgreSQL table {name}");
        Ok(())
    }

    async fn drop_table(&mut self, name: &str) -> Result<()> {
        self.client
            .execute(&format!("DROP TABLE IF EXISTS {name}"), &[])
            .await?;
        tracing::info!("Dropped PostgreSQL table {name}");
        Ok(())
    }

    async fn create_view(&mut self, name: &str, target: &str) -> Result<()> {
        self.client
            .execute(
                &format!("CREATE OR REPLACE VIEW {name} AS SELECT * FROM {target}"),
                &[],
            )
            .await?;
        tracing::info!("Created PostgreSQL view {name}");
        Ok(())
    }

    async fn bulk_insert(&mut self, name: &str, plan: &ColumnPlan, rows: &[RowTuple]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let column_names = plan
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let width = plan.columns.len();

        // One multi-row INSERT per page batch; 64 rows per batch keeps the
        // parameter count well under the protocol limit.
        let mut groups = Vec::with_capacity(rows.len());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(rows.len() * width);
        for (r, row) in rows.iter().enumerate() {
            let group = (0..width)
                .map(|c| format!("${}", r * width + c + 1))
                .collect::<Vec<_>>()
                .join(", ");
            groups.push(format!("({group})"));
            for value in row {
                params.push(value);
            }
        }
        let statement = format!(
            "INSERT INTO {name} ({column_names}) VALUES {}",
            groups.join(", ")
        );
        self.client.execute(&statement, &params).await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }
}
