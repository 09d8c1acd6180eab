//! In-memory page source and table writer used by unit and integration
//! tests.

use crate::notion::{PageBatch, PageSource, PropertyDescriptor, RemoteRow};
use crate::postgres::TableWriter;
use crate::schema::ColumnPlan;
use crate::transform::RowTuple;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Build a descriptor the way the client would, from schema-entry JSON.
pub fn descriptor(name: &str, kind_tag: &str, config: serde_json::Value) -> PropertyDescriptor {
    PropertyDescriptor::from_schema_entry(
        name,
        &serde_json::json!({"type": kind_tag, kind_tag: config}),
    )
}

/// Build a page from raw property JSON.
pub fn page(id: &str, properties: serde_json::Value) -> RemoteRow {
    serde_json::from_value(serde_json::json!({"id": id, "properties": properties})).unwrap()
}

/// Page source backed by canned schemas and row batches.
#[derive(Default)]
pub struct MockPageSource {
    schemas: HashMap<String, Vec<PropertyDescriptor>>,
    batches: HashMap<String, Vec<Vec<RemoteRow>>>,
    denied: HashSet<String>,
    schema_calls: Mutex<Vec<String>>,
}

impl MockPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, database_id: &str, properties: Vec<PropertyDescriptor>) -> Self {
        self.schemas.insert(database_id.to_string(), properties);
        self
    }

    /// Rows for a database, pre-split into fetch batches.
    pub fn with_rows(mut self, database_id: &str, batches: Vec<Vec<RemoteRow>>) -> Self {
        self.batches.insert(database_id.to_string(), batches);
        self
    }

    /// Simulate an integration that has no access to `database_id`.
    pub fn deny(mut self, database_id: &str) -> Self {
        self.denied.insert(database_id.to_string());
        self
    }

    /// Database ids whose schema was fetched, in call order.
    pub fn schema_calls(&self) -> Vec<String> {
        self.schema_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PageSource for MockPageSource {
    async fn get_database_schema(&self, database_id: &str) -> Result<Vec<PropertyDescriptor>> {
        self.schema_calls
            .lock()
            .unwrap()
            .push(database_id.to_string());
        if self.denied.contains(database_id) {
            return Err(anyhow::anyhow!(
                "Notion API error: HTTP 404: integration has no access to {database_id}"
            ));
        }
        self.schemas
            .get(database_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown database {database_id}"))
    }

    async fn fetch_page_batch(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> Result<PageBatch> {
        let batches = self.batches.get(database_id).cloned().unwrap_or_default();
        let index: usize = cursor.map(|c| c.parse()).transpose()?.unwrap_or(0);
        let rows = batches.get(index).cloned().unwrap_or_default();
        let next_cursor = if index + 1 < batches.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(PageBatch { rows, next_cursor })
    }
}

/// Records every sink call; stands in for PostgreSQL in tests.
#[derive(Default)]
pub struct MemoryTableWriter {
    pub existing: HashSet<String>,
    pub created: Vec<(String, ColumnPlan)>,
    pub dropped: Vec<String>,
    /// (view name, target table) pairs in creation order.
    pub views: Vec<(String, String)>,
    pub inserted: HashMap<String, Vec<RowTuple>>,
    pub commits: usize,
}

impl MemoryTableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(mut self, name: &str) -> Self {
        self.existing.insert(name.to_string());
        self
    }
}

#[async_trait::async_trait]
impl TableWriter for MemoryTableWriter {
    async fn table_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.existing.contains(name))
    }

    async fn create_table(&mut self, name: &str, plan: &ColumnPlan) -> Result<()> {
        self.created.push((name.to_string(), plan.clone()));
        self.existing.insert(name.to_string());
        Ok(())
    }

    async fn drop_table(&mut self, name: &str) -> Result<()> {
        self.dropped.push(name.to_string());
        self.existing.remove(name);
        Ok(())
    }

    async fn create_view(&mut self, name: &str, target: &str) -> Result<()> {
        self.views.push((name.to_string(), target.to_string()));
        Ok(())
    }

    async fn bulk_insert(&mut self, name: &str, _plan: &ColumnPlan, rows: &[RowTuple]) -> Result<()> {
        self.inserted
            .entry(name.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}
