//! Relation and rollup reference resolution.
//!
//! A rollup aggregates a property of a related database, so typing it means
//! following the relation to that database's schema. Referenced schemas are
//! fetched once per run and cached. A property whose target database cannot
//! be read (typically because the integration was never shared with it) is
//! dropped with a warning instead of failing the import.

use crate::notion::{PageSource, PropertyDescriptor, PropertyKind};
use crate::schema::{self, ColumnType, ExtractionRule, Mapping};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Referenced-database schemas already fetched during this run.
#[derive(Debug, Default)]
pub struct RelationCache {
    schemas: HashMap<String, Vec<PropertyDescriptor>>,
}

/// Recursion bound for rollup targets. The API does not support rollups of
/// rollups today, but two databases can reference each other; without a
/// bound that would resolve forever.
pub const MAX_DEPTH: usize = 4;

/// Type a relation property.
///
/// Relation values flatten to an array of referenced page ids, which needs
/// no schema information, but the referenced database must be readable for
/// the import to mean anything; an inaccessible target drops the property.
pub async fn resolve_relation(
    source: &dyn PageSource,
    config: &serde_json::Value,
    cache: &mut RelationCache,
) -> Mapping {
    let Some(database_id) = config.get("database_id").and_then(|d| d.as_str()) else {
        tracing::warn!("Skipping relation without a target database id");
        return Mapping::Skip;
    };
    match fetch_schema(source, database_id, cache).await {
        Some(_) => Mapping::single(ColumnType::TextArray, ExtractionRule::RelationIds),
        None => Mapping::Skip,
    }
}

/// Type a rollup property by resolving its target through the relation it
/// rolls up.
///
/// Boxed because a rollup target can itself be a rollup, making this
/// recursive.
pub fn resolve_rollup<'a>(
    source: &'a dyn PageSource,
    own_properties: &'a [PropertyDescriptor],
    config: &'a serde_json::Value,
    cache: &'a mut RelationCache,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Mapping> + Send + 'a>> {
    Box::pin(async move {
        let function = config.get("function").and_then(|f| f.as_str()).unwrap_or("");

        // Array-producing rollups are not representable as a single column.
        if matches!(function, "show_original" | "show_unique" | "show_unique_values") {
            tracing::warn!("Skipping rollup with unsupported function {function:?}");
            return Mapping::Skip;
        }

        if depth == 0 {
            tracing::warn!("Skipping rollup: reference chain exceeds depth limit");
            return Mapping::Skip;
        }

        let Some(relation_name) = config
            .get("relation_property_name")
            .and_then(|n| n.as_str())
        else {
            tracing::warn!("Skipping rollup without a relation property name");
            return Mapping::Skip;
        };
        let Some(relation) = own_properties.iter().find(|p| p.name == relation_name) else {
            tracing::warn!("Skipping rollup: relation property {relation_name:?} not found");
            return Mapping::Skip;
        };
        let Some(database_id) = relation.config.get("database_id").and_then(|d| d.as_str())
        else {
            tracing::warn!(
                "Skipping rollup: relation {relation_name:?} has no target database id"
            );
            return Mapping::Skip;
        };
        let Some(target_schema) = fetch_schema(source, database_id, cache).await else {
            return Mapping::Skip;
        };
        let Some(rolled_name) = config.get("rollup_property_name").and_then(|n| n.as_str())
        else {
            tracing::warn!("Skipping rollup without a rollup property name");
            return Mapping::Skip;
        };
        let Some(rolled) = target_schema.iter().find(|p| p.name == rolled_name) else {
            tracing::warn!(
                "Skipping rollup: related database {database_id} has no property {rolled_name:?}"
            );
            return Mapping::Skip;
        };

        let target = match rolled.kind {
            PropertyKind::Rollup => {
                resolve_rollup(source, &target_schema, &rolled.config, cache, depth - 1).await
            }
            kind => schema::map_property(kind, &rolled.config),
        };

        match function {
            // any -> number: integer count regardless of target type
            "count" | "count_all" | "count_values" | "unique" | "count_unique_values"
            | "empty" | "count_empty" | "not_empty" | "count_not_empty" => {
                Mapping::single(ColumnType::Integer, ExtractionRule::RollupCount)
            }
            // any -> number: fractional
            "percent_empty" | "percent_not_empty" => {
                Mapping::single(ColumnType::Numeric, ExtractionRule::RollupNumber)
            }
            // number -> number
            "sum" | "average" | "median" | "min" | "max" | "range" => {
                if numeric_target(&target) {
                    Mapping::single(ColumnType::Numeric, ExtractionRule::RollupNumber)
                } else {
                    tracing::warn!(
                        "Skipping rollup {function:?} over non-numeric property {rolled_name:?}"
                    );
                    Mapping::Skip
                }
            }
            // date -> date
            "earliest_date" | "latest_date" | "date_range" => {
                Mapping::date_pair(ExtractionRule::RollupDateStart, ExtractionRule::RollupDateEnd)
            }
            other => {
                tracing::warn!("Skipping rollup with unknown function {other:?}");
                Mapping::Skip
            }
        }
    })
}

fn numeric_target(mapping: &Mapping) -> bool {
    matches!(
        mapping,
        Mapping::Columns(columns) if columns.len() == 1
            && matches!(columns[0].1, ColumnType::Numeric | ColumnType::Integer)
    )
}

/// Get a referenced database's schema, fetching and caching it on first use.
/// Returns `None` (after warning) when the database cannot be read.
async fn fetch_schema(
    source: &dyn PageSource,
    database_id: &str,
    cache: &mut RelationCache,
) -> Option<Vec<PropertyDescriptor>> {
    if let Some(schema) = cache.schemas.get(database_id) {
        return Some(schema.clone());
    }
    match source.get_database_schema(database_id).await {
        Ok(schema) => {
            cache.schemas.insert(database_id.to_string(), schema.clone());
            Some(schema)
        }
        Err(e) => {
            tracing::warn!(
                "Cannot read related database {database_id}: {e}; skipping dependent property"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, MockPageSource};

    fn rollup_config(function: &str) -> serde_json::Value {
        serde_json::json!({
            "relation_property_name": "Project",
            "rollup_property_name": "Cost",
            "function": function,
        })
    }

    fn own_properties() -> Vec<PropertyDescriptor> {
        vec![descriptor(
            "Project",
            "relation",
            serde_json::json!({"database_id": "db2"}),
        )]
    }

    fn target_source() -> MockPageSource {
        MockPageSource::new().with_schema(
            "db2",
            vec![descriptor("Cost", "number", serde_json::json!({}))],
        )
    }

    #[tokio::test]
    async fn sum_over_number_is_numeric() {
        let source = target_source();
        let own = own_properties();
        let mut cache = RelationCache::default();
        let mapping =
            resolve_rollup(&source, &own, &rollup_config("sum"), &mut cache, MAX_DEPTH).await;
        assert_eq!(
            mapping,
            Mapping::single(ColumnType::Numeric, ExtractionRule::RollupNumber)
        );
    }

    #[tokio::test]
    async fn count_is_integer_over_any_target() {
        let source = MockPageSource::new().with_schema(
            "db2",
            vec![descriptor("Cost", "rich_text", serde_json::json!({}))],
        );
        let own = own_properties();
        let mut cache = RelationCache::default();
        let mapping =
            resolve_rollup(&source, &own, &rollup_config("count"), &mut cache, MAX_DEPTH).await;
        assert_eq!(
            mapping,
            Mapping::single(ColumnType::Integer, ExtractionRule::RollupCount)
        );
    }

    #[tokio::test]
    async fn show_original_is_skipped() {
        let source = target_source();
        let own = own_properties();
        let mut cache = RelationCache::default();
        let mapping = resolve_rollup(
            &source,
            &own,
            &rollup_config("show_original"),
            &mut cache,
            MAX_DEPTH,
        )
        .await;
        assert_eq!(mapping, Mapping::Skip);
    }

    #[tokio::test]
    async fn inaccessible_target_is_skipped() {
        let source = MockPageSource::new().deny("db2");
        let own = own_properties();
        let mut cache = RelationCache::default();
        let mapping =
            resolve_rollup(&source, &own, &rollup_config("sum"), &mut cache, MAX_DEPTH).await;
        assert_eq!(mapping, Mapping::Skip);
    }

    #[tokio::test]
    async fn referenced_schema_is_fetched_once() {
        let source = target_source();
        let own = own_properties();
        let mut cache = RelationCache::default();
        resolve_rollup(&source, &own, &rollup_config("sum"), &mut cache, MAX_DEPTH).await;
        resolve_rollup(&source, &own, &rollup_config("max"), &mut cache, MAX_DEPTH).await;
        assert_eq!(source.schema_calls(), vec!["db2".to_string()]);
    }

    #[tokio::test]
    async fn mutual_references_hit_the_depth_limit() {
        // db2's "Cost" is itself a rollup pointing back through db2, so
        // resolution recurses until the depth bound stops it.
        let source = MockPageSource::new().with_schema(
            "db2",
            vec![
                descriptor("Project", "relation", serde_json::json!({"database_id": "db2"})),
                descriptor("Cost", "rollup", rollup_config("sum")),
            ],
        );
        let own = own_properties();
        let mut cache = RelationCache::default();
        let mapping =
            resolve_rollup(&source, &own, &rollup_config("sum"), &mut cache, MAX_DEPTH).await;
        assert_eq!(mapping, Mapping::Skip);
    }
}
