//! Row transformation: Notion property values to PostgreSQL cell values.
//!
//! Transformation never fails for a single row: a property missing from a
//! page (added to the schema after the page was created, a normal Notion
//! occurrence) or a malformed payload degrades to NULL.

use crate::notion::RemoteRow;
use crate::schema::{ColumnPlan, ExtractionRule};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

/// One relational cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Numeric(Decimal),
    Integer(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    TextArray(Vec<String>),
}

/// One row, aligned with the column plan.
pub type RowTuple = Vec<SqlValue>;

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Numeric(v) => v.to_sql(ty, out),
            SqlValue::Integer(v) => v.to_sql(ty, out),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::TextArray(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Cell variants are chosen by the column plan, which also generated
        // the DDL; the two always agree.
        true
    }

    to_sql_checked!();
}

/// Convert one Notion page into a row tuple aligned with the plan.
pub fn transform_row(row: &RemoteRow, plan: &ColumnPlan) -> RowTuple {
    plan.columns
        .iter()
        .map(|column| {
            let value = match &column.property {
                None => Uuid::parse_str(&row.id).ok().map(SqlValue::Uuid),
                Some(property) => row
                    .properties
                    .get(property)
                    .and_then(|raw| extract(raw, column.rule)),
            };
            value.unwrap_or(SqlValue::Null)
        })
        .collect()
}

/// Apply one extraction rule to a raw property value object. `None` means
/// the cell is NULL.
fn extract(raw: &serde_json::Value, rule: ExtractionRule) -> Option<SqlValue> {
    match rule {
        // handled by the caller from the page envelope
        ExtractionRule::PageId => None,
        ExtractionRule::RichText => {
            let fragments = typed_payload(raw)?.as_array()?;
            let text: String = fragments
                .iter()
                .filter_map(|f| f.get("plain_text").and_then(|t| t.as_str()))
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(SqlValue::Text(text))
            }
        }
        ExtractionRule::Number => decimal_value(raw.get("number")?),
        ExtractionRule::SelectLabel => {
            let name = typed_payload(raw)?.get("name")?.as_str()?;
            Some(SqlValue::Text(name.to_string()))
        }
        ExtractionRule::MultiSelectLabels => {
            let options = raw.get("multi_select")?.as_array()?;
            Some(SqlValue::TextArray(
                options
                    .iter()
                    .filter_map(|o| o.get("name").and_then(|n| n.as_str()).map(str::to_owned))
                    .collect(),
            ))
        }
        ExtractionRule::DateStart => timestamp_value(raw.get("date")?.get("start")?),
        ExtractionRule::DateEnd => timestamp_value(raw.get("date")?.get("end")?),
        ExtractionRule::PersonId => {
            let people = raw.get("people")?.as_array()?;
            let id = people.first()?.get("id")?.as_str()?;
            Some(SqlValue::Text(id.to_string()))
        }
        ExtractionRule::FileUrls => {
            let files = raw.get("files")?.as_array()?;
            Some(SqlValue::TextArray(files.iter().filter_map(file_url).collect()))
        }
        ExtractionRule::Checkbox => raw.get("checkbox")?.as_bool().map(SqlValue::Bool),
        ExtractionRule::PlainString => {
            let text = typed_payload(raw)?.as_str()?;
            Some(SqlValue::Text(text.to_string()))
        }
        ExtractionRule::UniqueId => {
            let unique = raw.get("unique_id")?;
            let number = unique.get("number")?.as_i64()?;
            let rendered = match unique.get("prefix").and_then(|p| p.as_str()) {
                Some(prefix) => format!("{prefix}-{number}"),
                None => number.to_string(),
            };
            Some(SqlValue::Text(rendered))
        }
        ExtractionRule::FormulaString => {
            let text = raw.get("formula")?.get("string")?.as_str()?;
            Some(SqlValue::Text(text.to_string()))
        }
        ExtractionRule::FormulaNumber => decimal_value(raw.get("formula")?.get("number")?),
        ExtractionRule::FormulaBoolean => {
            raw.get("formula")?.get("boolean")?.as_bool().map(SqlValue::Bool)
        }
        ExtractionRule::FormulaDate => timestamp_value(raw.get("formula")?.get("date")?.get("start")?),
        ExtractionRule::RelationIds => {
            let related = raw.get("relation")?.as_array()?;
            Some(SqlValue::TextArray(
                related
                    .iter()
                    .filter_map(|r| r.get("id").and_then(|i| i.as_str()).map(str::to_owned))
                    .collect(),
            ))
        }
        ExtractionRule::RollupCount => raw.get("rollup")?.get("number")?.as_i64().map(SqlValue::Integer),
        ExtractionRule::RollupNumber => decimal_value(raw.get("rollup")?.get("number")?),
        ExtractionRule::RollupDateStart => timestamp_value(raw.get("rollup")?.get("date")?.get("start")?),
        ExtractionRule::RollupDateEnd => timestamp_value(raw.get("rollup")?.get("date")?.get("end")?),
        ExtractionRule::CreatedTime => timestamp_value(raw.get("created_time")?),
        ExtractionRule::LastEditedTime => timestamp_value(raw.get("last_edited_time")?),
        ExtractionRule::CreatedById => {
            let id = raw.get("created_by")?.get("id")?.as_str()?;
            Some(SqlValue::Text(id.to_string()))
        }
        ExtractionRule::LastEditedById => {
            let id = raw.get("last_edited_by")?.get("id")?.as_str()?;
            Some(SqlValue::Text(id.to_string()))
        }
    }
}

/// The payload of a property value lives under a key equal to its type tag.
fn typed_payload(raw: &serde_json::Value) -> Option<&serde_json::Value> {
    let tag = raw.get("type")?.as_str()?;
    raw.get(tag)
}

/// Parse a Notion number through its literal text so integer values are not
/// rounded through f64.
fn decimal_value(raw: &serde_json::Value) -> Option<SqlValue> {
    let number = raw.as_number()?;
    Decimal::from_str(&number.to_string())
        .ok()
        .map(SqlValue::Numeric)
}

/// Notion emits either bare dates or RFC 3339 datetimes; bare dates load as
/// midnight UTC.
fn timestamp_value(raw: &serde_json::Value) -> Option<SqlValue> {
    let text = raw.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(SqlValue::Timestamp(dt.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(SqlValue::Timestamp(DateTime::from_naive_utc_and_offset(
        midnight, Utc,
    )))
}

/// File URL, with the short-lived auth query stripped from files hosted on
/// Notion's own storage; it expires too fast to be worth keeping.
fn file_url(file: &serde_json::Value) -> Option<String> {
    let url = file
        .get("file")
        .and_then(|f| f.get("url"))
        .or_else(|| file.get("external").and_then(|e| e.get("url")))?
        .as_str()?;
    if url.contains("/secure.notion-static.com/") {
        Some(url.split('?').next().unwrap_or(url).to_string())
    } else {
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ColumnType};
    use chrono::TimeZone;

    fn plan(columns: Vec<(&str, &str, ColumnType, ExtractionRule)>) -> ColumnPlan {
        ColumnPlan {
            columns: columns
                .into_iter()
                .map(|(name, property, column_type, rule)| ColumnSpec {
                    name: name.to_string(),
                    property: Some(property.to_string()),
                    column_type,
                    rule,
                })
                .collect(),
        }
    }

    fn page(id: &str, properties: serde_json::Value) -> RemoteRow {
        serde_json::from_value(serde_json::json!({"id": id, "properties": properties})).unwrap()
    }

    #[test]
    fn absent_property_becomes_null() {
        let plan = plan(vec![("name", "Name", ColumnType::Text, ExtractionRule::RichText)]);
        let row = page("11111111-2222-3333-4444-555555555555", serde_json::json!({}));
        assert_eq!(transform_row(&row, &plan), vec![SqlValue::Null]);
    }

    #[test]
    fn malformed_value_becomes_null() {
        let plan = plan(vec![("n", "N", ColumnType::Numeric, ExtractionRule::Number)]);
        let row = page(
            "x",
            serde_json::json!({"N": {"type": "number", "number": "not a number"}}),
        );
        assert_eq!(transform_row(&row, &plan), vec![SqlValue::Null]);
    }

    #[test]
    fn title_fragments_concatenate() {
        let raw = serde_json::json!({
            "type": "title",
            "title": [{"plain_text": "Hello, "}, {"plain_text": "world"}],
        });
        assert_eq!(
            extract(&raw, ExtractionRule::RichText),
            Some(SqlValue::Text("Hello, world".to_string()))
        );
    }

    #[test]
    fn empty_rich_text_is_null() {
        let raw = serde_json::json!({"type": "rich_text", "rich_text": []});
        assert_eq!(extract(&raw, ExtractionRule::RichText), None);
    }

    #[test]
    fn multi_select_preserves_order() {
        let raw = serde_json::json!({
            "type": "multi_select",
            "multi_select": [{"name": "A"}, {"name": "B"}],
        });
        assert_eq!(
            extract(&raw, ExtractionRule::MultiSelectLabels),
            Some(SqlValue::TextArray(vec!["A".to_string(), "B".to_string()]))
        );
    }

    #[test]
    fn large_integers_keep_precision() {
        // 2^53 + 1 is not representable as f64.
        let raw = serde_json::json!({"type": "number", "number": 9007199254740993i64});
        let value = extract(&raw, ExtractionRule::Number).unwrap();
        assert_eq!(
            value,
            SqlValue::Numeric(Decimal::from_str("9007199254740993").unwrap())
        );
    }

    #[test]
    fn bare_date_parses_as_midnight_utc() {
        let raw = serde_json::json!({
            "type": "date",
            "date": {"start": "2024-01-01", "end": null, "time_zone": null},
        });
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            extract(&raw, ExtractionRule::DateStart),
            Some(SqlValue::Timestamp(expected))
        );
        assert_eq!(extract(&raw, ExtractionRule::DateEnd), None);
    }

    #[test]
    fn unique_id_renders_with_prefix() {
        let raw = serde_json::json!({
            "type": "unique_id",
            "unique_id": {"prefix": "TASK", "number": 42},
        });
        assert_eq!(
            extract(&raw, ExtractionRule::UniqueId),
            Some(SqlValue::Text("TASK-42".to_string()))
        );
    }

    #[test]
    fn notion_hosted_file_urls_lose_auth_query() {
        let raw = serde_json::json!({
            "type": "files",
            "files": [
                {"file": {"url": "https://s3.example/secure.notion-static.com/a.png?X-Amz-Signature=abc"}},
                {"external": {"url": "https://example.com/b.png?keep=1"}},
            ],
        });
        assert_eq!(
            extract(&raw, ExtractionRule::FileUrls),
            Some(SqlValue::TextArray(vec![
                "https://s3.example/secure.notion-static.com/a.png".to_string(),
                "https://example.com/b.png?keep=1".to_string(),
            ]))
        );
    }

    #[test]
    fn page_id_column_parses_uuid() {
        let plan = ColumnPlan {
            columns: vec![ColumnSpec {
                name: "id".to_string(),
                property: None,
                column_type: ColumnType::Uuid,
                rule: ExtractionRule::PageId,
            }],
        };
        let row = page("11111111-2222-3333-4444-555555555555", serde_json::json!({}));
        match &transform_row(&row, &plan)[0] {
            SqlValue::Uuid(u) => {
                assert_eq!(u.to_string(), "11111111-2222-3333-4444-555555555555")
            }
            other => panic!("expected uuid, got {other:?}"),
        }
    }
}
