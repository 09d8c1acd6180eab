//! Schema inference for Notion databases.
//!
//! Maps each Notion property type to a PostgreSQL column type plus an
//! extraction rule, and assembles the full column plan for a database.
//! Notion orders properties by an opaque internal id and does not expose the
//! user-visible order, so the plan sorts properties lexicographically by
//! name; the same input schema always yields the same plan.

use crate::notion::{PageSource, PropertyKind};
use crate::resolver::{self, RelationCache};
use std::collections::HashSet;

/// PostgreSQL column types emitted by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    /// Arbitrary-precision numeric. Notion numbers are loaded through
    /// `rust_decimal` so integer values are not rounded through floats.
    Numeric,
    /// 64-bit integer, used for count-style rollup aggregations.
    Integer,
    Boolean,
    TimestampTz,
    Uuid,
    TextArray,
}

impl ColumnType {
    /// Type name used in generated DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Numeric => "numeric",
            ColumnType::Integer => "bigint",
            ColumnType::Boolean => "boolean",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Uuid => "uuid",
            ColumnType::TextArray => "text[]",
        }
    }
}

/// How a cell is pulled out of a raw Notion property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionRule {
    /// The page id itself; not tied to any property.
    PageId,
    /// Concatenated `plain_text` fragments (title and rich_text).
    RichText,
    Number,
    /// `name` of the selected option (select and status).
    SelectLabel,
    MultiSelectLabels,
    DateStart,
    DateEnd,
    /// Opaque id of the first assigned person.
    PersonId,
    FileUrls,
    Checkbox,
    /// Verbatim string payload (url, email, phone_number).
    PlainString,
    UniqueId,
    FormulaString,
    FormulaNumber,
    FormulaBoolean,
    FormulaDate,
    RelationIds,
    /// Count-style rollup result, an integer.
    RollupCount,
    RollupNumber,
    RollupDateStart,
    RollupDateEnd,
    CreatedTime,
    LastEditedTime,
    CreatedById,
    LastEditedById,
}

/// One column of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Sanitized PostgreSQL column name.
    pub name: String,
    /// Source property name; `None` for the synthetic `id` column.
    pub property: Option<String>,
    pub column_type: ColumnType,
    pub rule: ExtractionRule,
}

/// Ordered column plan for one import, consumed by both DDL generation and
/// row transformation.
///
/// Invariant: DDL column order equals the per-row extraction order, so a row
/// tuple's positions always align with the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnPlan {
    pub columns: Vec<ColumnSpec>,
}

/// Outcome of mapping one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    /// Zero or more columns; the optional suffix is appended to the
    /// sanitized property name (date ranges split into `_start`/`_end`).
    Columns(Vec<(Option<&'static str>, ColumnType, ExtractionRule)>),
    /// Property does not map to a column (unsupported or explicitly
    /// ignored).
    Skip,
    /// Relation; the referenced database must be readable.
    NeedsRelation,
    /// Rollup; typing requires the reference resolver.
    NeedsRollup,
}

impl Mapping {
    pub fn single(column_type: ColumnType, rule: ExtractionRule) -> Self {
        Mapping::Columns(vec![(None, column_type, rule)])
    }

    pub fn date_pair(start: ExtractionRule, end: ExtractionRule) -> Self {
        Mapping::Columns(vec![
            (Some("start"), ColumnType::TimestampTz, start),
            (Some("end"), ColumnType::TimestampTz, end),
        ])
    }
}

/// Map one property type to its column type and extraction rule.
pub fn map_property(kind: PropertyKind, config: &serde_json::Value) -> Mapping {
    match kind {
        PropertyKind::Title | PropertyKind::RichText => {
            Mapping::single(ColumnType::Text, ExtractionRule::RichText)
        }
        PropertyKind::Number => Mapping::single(ColumnType::Numeric, ExtractionRule::Number),
        PropertyKind::Select | PropertyKind::Status => {
            Mapping::single(ColumnType::Text, ExtractionRule::SelectLabel)
        }
        PropertyKind::MultiSelect => {
            Mapping::single(ColumnType::TextArray, ExtractionRule::MultiSelectLabels)
        }
        // The plan is built from metadata alone, so every date property gets
        // a start and an end column; _end stays NULL for non-range values.
        PropertyKind::Date => Mapping::date_pair(ExtractionRule::DateStart, ExtractionRule::DateEnd),
        PropertyKind::People => Mapping::single(ColumnType::Text, ExtractionRule::PersonId),
        PropertyKind::Files => Mapping::single(ColumnType::TextArray, ExtractionRule::FileUrls),
        PropertyKind::Checkbox => Mapping::single(ColumnType::Boolean, ExtractionRule::Checkbox),
        PropertyKind::Url | PropertyKind::Email | PropertyKind::PhoneNumber => {
            Mapping::single(ColumnType::Text, ExtractionRule::PlainString)
        }
        PropertyKind::Formula => map_formula(config),
        PropertyKind::Relation => Mapping::NeedsRelation,
        PropertyKind::Rollup => Mapping::NeedsRollup,
        PropertyKind::CreatedTime => {
            Mapping::single(ColumnType::TimestampTz, ExtractionRule::CreatedTime)
        }
        PropertyKind::LastEditedTime => {
            Mapping::single(ColumnType::TimestampTz, ExtractionRule::LastEditedTime)
        }
        PropertyKind::CreatedBy => Mapping::single(ColumnType::Text, ExtractionRule::CreatedById),
        PropertyKind::LastEditedBy => {
            Mapping::single(ColumnType::Text, ExtractionRule::LastEditedById)
        }
        PropertyKind::UniqueId => Mapping::single(ColumnType::Text, ExtractionRule::UniqueId),
        PropertyKind::Unknown => Mapping::Skip,
    }
}

/// Formulas have four result kinds: string, number, boolean, and date.
fn map_formula(config: &serde_json::Value) -> Mapping {
    match config.get("result_type").and_then(|t| t.as_str()) {
        Some("number") => Mapping::single(ColumnType::Numeric, ExtractionRule::FormulaNumber),
        Some("boolean") => Mapping::single(ColumnType::Boolean, ExtractionRule::FormulaBoolean),
        // Formula dates are never ranges, unlike date properties.
        Some("date") => Mapping::single(ColumnType::TimestampTz, ExtractionRule::FormulaDate),
        // "string", undeclared, and anything unrecognized fall back to text.
        _ => Mapping::single(ColumnType::Text, ExtractionRule::FormulaString),
    }
}

/// Derive a PostgreSQL column name from a Notion property name.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            out.push('_');
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
        }
        // anything else (punctuation, non-ASCII) is dropped
    }
    if out.is_empty() {
        out.push_str("column");
    }
    if out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Infer the column plan for a database.
///
/// The synthetic `id` column (the page id) always comes first; property
/// columns follow in lexicographic name order. Name collisions are resolved
/// by deterministic numeric suffixes in plan order.
pub async fn infer_schema(
    source: &dyn PageSource,
    database_id: &str,
) -> anyhow::Result<ColumnPlan> {
    let mut descriptors = source.get_database_schema(database_id).await?;
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));

    let mut cache = RelationCache::default();
    let mut plan = ColumnPlan::default();
    let mut taken = HashSet::new();

    push_column(
        &mut plan,
        &mut taken,
        "id".to_string(),
        None,
        ColumnType::Uuid,
        ExtractionRule::PageId,
    );

    for descriptor in &descriptors {
        let mapping = match map_property(descriptor.kind, &descriptor.config) {
            Mapping::NeedsRelation => {
                resolver::resolve_relation(source, &descriptor.config, &mut cache).await
            }
            Mapping::NeedsRollup => {
                resolver::resolve_rollup(
                    source,
                    &descriptors,
                    &descriptor.config,
                    &mut cache,
                    resolver::MAX_DEPTH,
                )
                .await
            }
            other => other,
        };

        match mapping {
            Mapping::Columns(columns) => {
                let base = sanitize_name(&descriptor.name);
                for (suffix, column_type, rule) in columns {
                    let name = match suffix {
                        Some(suffix) => format!("{base}_{suffix}"),
                        None => base.clone(),
                    };
                    push_column(
                        &mut plan,
                        &mut taken,
                        name,
                        Some(descriptor.name.clone()),
                        column_type,
                        rule,
                    );
                }
            }
            Mapping::Skip => {
                // The resolver already logs a precise reason when it drops a
                // relation or rollup; only unrecognized kinds warn here.
                if descriptor.kind == PropertyKind::Unknown {
                    tracing::warn!("Skipping unsupported property {:?}", descriptor.name);
                }
            }
            Mapping::NeedsRelation | Mapping::NeedsRollup => {
                unreachable!("resolver returns concrete mappings")
            }
        }
    }

    Ok(plan)
}

/// Append a column, disambiguating name collisions with `_2`, `_3`, ...
fn push_column(
    plan: &mut ColumnPlan,
    taken: &mut HashSet<String>,
    name: String,
    property: Option<String>,
    column_type: ColumnType,
    rule: ExtractionRule,
) {
    let mut unique = name.clone();
    let mut n = 2;
    while !taken.insert(unique.clone()) {
        unique = format!("{name}_{n}");
        n += 1;
    }
    plan.columns.push(ColumnSpec {
        name: unique,
        property,
        column_type,
        rule,
    });
}
