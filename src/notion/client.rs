//! HTTP client for the Notion API.
//!
//! Wraps the two endpoints the importer needs: database schema retrieval and
//! paginated row queries. Row queries are retried with exponential backoff
//! because the Notion API routinely returns transient errors under load.

use crate::notion::types::{PageBatch, PropertyDescriptor, RemoteRow};
use anyhow::Context;
use std::time::Duration;

const NOTION_VERSION: &str = "2022-06-28";

/// Default rows per query page. Lower than the API maximum of 100 to
/// prevent timeouts on pages with heavy properties.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Initial delay before retrying a failed query, in seconds.
const DELAY_SECS: u64 = 1;

/// Maximum attempts per query. Combined with the backoff factor this gives
/// Notion several minutes to recover from transient issues.
const RETRIES: u32 = 10;

/// Backoff multiplier between retries.
const BACKOFF: u64 = 2;

/// Request timeout. The Notion API is not fast on large databases.
const TIMEOUT_SECS: u64 = 120;

/// Abstract paginated read API over a Notion-like backend.
///
/// [`NotionClient`] is the production implementation; tests drive the
/// importer through [`crate::testing::MockPageSource`].
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the full property set of a database. A single metadata call,
    /// not paginated.
    async fn get_database_schema(
        &self,
        database_id: &str,
    ) -> anyhow::Result<Vec<PropertyDescriptor>>;

    /// Fetch one batch of rows. Pass the previous batch's `next_cursor` to
    /// continue; `None` starts from the beginning. The sequence is finite
    /// and not restartable mid-run.
    async fn fetch_page_batch(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> anyhow::Result<PageBatch>;
}

pub struct NotionClient {
    http: reqwest::Client,
    token: String,
    page_size: usize,
}

impl NotionClient {
    pub fn new(token: String, page_size: usize) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        Ok(NotionClient {
            http,
            token,
            page_size,
        })
    }

    async fn query_once(
        &self,
        database_id: &str,
        query: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let url = format!("https://api.notion.com/v1/databases/{database_id}/query");
        let body: serde_json::Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(query)
            .send()
            .await?
            .json()
            .await?;
        check_api_error(&body)?;
        Ok(body)
    }
}

/// Body for one query request.
fn build_query(page_size: usize, cursor: Option<String>) -> serde_json::Value {
    let mut query = serde_json::json!({
        "sorts": [{"timestamp": "created_time", "direction": "descending"}],
        "page_size": page_size,
    });
    if let Some(cursor) = cursor {
        query["start_cursor"] = serde_json::Value::String(cursor);
    }
    query
}

/// Notion reports failures in-band as `{"object": "error", ...}` bodies.
fn check_api_error(body: &serde_json::Value) -> anyhow::Result<()> {
    if body.get("object").and_then(|o| o.as_str()) == Some("error") {
        let status = body.get("status").and_then(|s| s.as_u64()).unwrap_or(0);
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(anyhow::anyhow!("Notion API error: HTTP {status}: {message}"));
    }
    Ok(())
}

#[async_trait::async_trait]
impl PageSource for NotionClient {
    async fn get_database_schema(
        &self,
        database_id: &str,
    ) -> anyhow::Result<Vec<PropertyDescriptor>> {
        let t0 = std::time::Instant::now();
        let url = format!("https://api.notion.com/v1/databases/{database_id}");
        let body: serde_json::Value = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .with_context(|| format!("failed to fetch Notion database {database_id}"))?
            .json()
            .await
            .with_context(|| format!("failed to parse Notion database {database_id}"))?;
        check_api_error(&body)?;

        let properties = body
            .get("properties")
            .and_then(|p| p.as_object())
            .ok_or_else(|| {
                anyhow::anyhow!("Notion database {database_id} has no properties object")
            })?;

        tracing::info!(
            "Fetched Notion database {} in {:.1} seconds",
            database_id,
            t0.elapsed().as_secs_f64()
        );
        Ok(properties
            .iter()
            .map(|(name, prop)| PropertyDescriptor::from_schema_entry(name, prop))
            .collect())
    }

    async fn fetch_page_batch(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> anyhow::Result<PageBatch> {
        let query = build_query(self.page_size, cursor);

        let t0 = std::time::Instant::now();
        let mut delay = DELAY_SECS;
        let mut attempt = 0;
        let body = loop {
            attempt += 1;
            match self.query_once(database_id, &query).await {
                Ok(body) => break body,
                Err(e) if attempt < RETRIES => {
                    tracing::warn!(
                        "Failed to fetch the next pages (attempt {attempt}/{RETRIES}): {e}"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    delay *= BACKOFF;
                }
                Err(e) => return Err(e),
            }
        };

        let results = body
            .get("results")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        let rows: Vec<RemoteRow> =
            serde_json::from_value(results).context("failed to parse Notion query results")?;
        let next_cursor = if body.get("has_more").and_then(|h| h.as_bool()).unwrap_or(false) {
            body.get("next_cursor")
                .and_then(|c| c.as_str())
                .map(str::to_owned)
        } else {
            None
        };

        tracing::info!(
            "Fetched {} Notion pages in {:.1} seconds",
            rows.len(),
            t0.elapsed().as_secs_f64()
        );
        Ok(PageBatch { rows, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_body_is_detected() {
        let body = serde_json::json!({
            "object": "error",
            "status": 403,
            "message": "insufficient permissions",
        });
        let err = check_api_error(&body).unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("insufficient permissions"));
    }

    #[test]
    fn list_body_is_not_an_error() {
        let body = serde_json::json!({"object": "list", "results": []});
        assert!(check_api_error(&body).is_ok());
    }

    #[test]
    fn query_carries_the_configured_page_size() {
        let query = build_query(16, None);
        assert_eq!(query["page_size"], 16);
        assert!(query.get("start_cursor").is_none());

        let query = build_query(DEFAULT_PAGE_SIZE, Some("abc".to_string()));
        assert_eq!(query["page_size"], 64);
        assert_eq!(query["start_cursor"], "abc");
    }
}
