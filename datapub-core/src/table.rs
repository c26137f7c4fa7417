//! Table references, column and constraint definitions, and the
//! normalizer that turns loosely-specified input into the canonical
//! form the platform expects.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DatapubError, DatapubResult};

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-z0-9_]+").expect("valid regex"));

/// Normalize a table or column name to the platform's `[a-z0-9_]+`
/// convention: lowercase, every run of other characters collapsed into a
/// single underscore. Idempotent. Logs a warning when the name changes.
pub fn normalize_name(name: &str) -> String {
    let normalized = INVALID_NAME_CHARS
        .replace_all(&name.to_lowercase(), "_")
        .into_owned();
    if normalized != name {
        tracing::warn!(original = %name, normalized = %normalized, "name normalized");
    }
    normalized
}

/// Identifies one remote table. Construction normalizes both parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableReference {
    pub schema: String,
    pub table: String,
}

impl TableReference {
    pub fn new(schema: &str, table: &str) -> Self {
        TableReference {
            schema: normalize_name(schema),
            table: normalize_name(table),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

// ============================================================================
// DEFINITION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintType {
    #[serde(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[serde(rename = "FOREIGN KEY")]
    ForeignKey,
    #[serde(rename = "UNIQUE")]
    Unique,
}

/// Target of a foreign key, one column in another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyReference {
    pub schema: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_is_nullable")]
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<Vec<ForeignKeyReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_maximum_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

fn default_is_nullable() -> bool {
    true
}

/// Table-level constraint. `constraint_parameter` carries a single column
/// name (platform create syntax), `columns` a list (UNIQUE over several).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConstraint {
    pub constraint_type: ConstraintType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_parameter: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

/// Canonical table definition: columns in ordinal order plus table-level
/// constraints. At most one single-column PRIMARY KEY is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<TableConstraint>,
}

impl TableDefinition {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.primary_key == Some(true))
            .map(|c| c.name.as_str())
    }

    /// Parse the platform's table-inspection response into an ordered
    /// definition. The response keys columns by name and describes
    /// constraints with SQL definition strings, both of which are
    /// translated back here.
    pub fn from_response(raw: &Value) -> DatapubResult<TableDefinition> {
        let object = raw.as_object().ok_or_else(|| {
            DatapubError::ClientSide("table response is not a JSON object".to_string())
        })?;
        let raw_columns = object
            .get("columns")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                DatapubError::ClientSide("table response has no 'columns' object".to_string())
            })?;

        let mut primary_key_column = None;
        let mut foreign_keys: HashMap<String, Vec<ForeignKeyReference>> = HashMap::new();
        let mut constraints = Vec::new();
        if let Some(raw_constraints) = object.get("constraints").and_then(Value::as_object) {
            for constraint in raw_constraints.values() {
                parse_constraint(
                    constraint,
                    &mut primary_key_column,
                    &mut foreign_keys,
                    &mut constraints,
                )?;
            }
        }

        let mut ordered = Vec::with_capacity(raw_columns.len());
        for (name, column) in raw_columns {
            let column = column.as_object().ok_or_else(|| {
                DatapubError::ClientSide(format!("column '{name}' is not a JSON object"))
            })?;
            let position = column
                .get("ordinal_position")
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    DatapubError::ClientSide(format!("column '{name}' has no ordinal position"))
                })?;
            ordered.push((position, name, column));
        }
        ordered.sort_by_key(|(position, _, _)| *position);

        let mut columns = Vec::with_capacity(ordered.len());
        for (_, name, column) in ordered {
            columns.push(ColumnDefinition {
                name: name.clone(),
                data_type: display_data_type(name, column)?,
                is_nullable: parse_is_nullable(column),
                primary_key: (primary_key_column.as_deref() == Some(name.as_str()))
                    .then_some(true),
                foreign_key: foreign_keys.remove(name.as_str()),
                character_maximum_length: None,
                description: None,
                unit: None,
            });
        }

        Ok(TableDefinition {
            columns,
            constraints,
        })
    }
}

// ============================================================================
// NORMALIZATION OF LOOSE INPUT
// ============================================================================

/// Convert a loosely-specified definition into the canonical form.
///
/// Accepts `fields` as a synonym for `columns` and, per column, `type` as
/// a synonym for `data_type` (the canonical key wins when both appear).
/// The input value is never mutated. Fails if neither `columns` nor
/// `fields` is present, or if the definition declares a composite
/// primary key.
pub fn normalize_table_definition(raw: &Value) -> DatapubResult<TableDefinition> {
    let object = raw.as_object().ok_or_else(|| {
        DatapubError::ClientSide("table definition must be a JSON object".to_string())
    })?;

    let raw_columns = object
        .get("columns")
        .or_else(|| object.get("fields"))
        .ok_or_else(|| {
            DatapubError::ClientSide(
                "table definition has neither 'columns' nor 'fields'".to_string(),
            )
        })?
        .as_array()
        .ok_or_else(|| {
            DatapubError::ClientSide("column definitions must be an array".to_string())
        })?;

    let mut columns = Vec::with_capacity(raw_columns.len());
    for raw_column in raw_columns {
        columns.push(normalize_column_definition(raw_column)?);
    }

    let constraints = match object.get("constraints") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| DatapubError::ClientSide(format!("invalid constraint definition: {e}")))?,
        None => Vec::new(),
    };

    let definition = TableDefinition {
        columns,
        constraints,
    };
    validate_primary_key(&definition)?;
    Ok(definition)
}

fn normalize_column_definition(raw: &Value) -> DatapubResult<ColumnDefinition> {
    let object = raw.as_object().ok_or_else(|| {
        DatapubError::ClientSide("column definition must be a JSON object".to_string())
    })?;

    let mut canonical = object.clone();
    canonical.remove("type");
    if !canonical.contains_key("data_type") {
        let synonym = object.get("type").cloned().ok_or_else(|| {
            let name = object.get("name").and_then(Value::as_str).unwrap_or("?");
            DatapubError::ClientSide(format!(
                "column '{name}' has neither 'data_type' nor 'type'"
            ))
        })?;
        canonical.insert("data_type".to_string(), synonym);
    }

    serde_json::from_value(Value::Object(canonical))
        .map_err(|e| DatapubError::ClientSide(format!("invalid column definition: {e}")))
}

fn validate_primary_key(definition: &TableDefinition) -> DatapubResult<()> {
    let flagged: Vec<&str> = definition
        .columns
        .iter()
        .filter(|c| c.primary_key == Some(true))
        .map(|c| c.name.as_str())
        .collect();
    let mut declarations = flagged.len();

    for constraint in &definition.constraints {
        if constraint.constraint_type != ConstraintType::PrimaryKey {
            continue;
        }
        declarations += 1;
        if constraint.columns.len() > 1 {
            return Err(DatapubError::ClientSide(format!(
                "composite primary keys are not supported: {}",
                constraint.columns.join(", ")
            )));
        }
    }

    if declarations > 1 {
        return Err(DatapubError::ClientSide(format!(
            "table definition declares more than one primary key ({} declarations)",
            declarations
        )));
    }
    Ok(())
}

// ============================================================================
// PLATFORM RESPONSE PARSING
// ============================================================================

static PRIMARY_KEY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PRIMARY KEY \((?P<field>[^)]+)\)$").expect("valid regex"));

static FOREIGN_KEY_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^FOREIGN KEY \((?P<field>[^)]+)\) REFERENCES (?P<ref_schema>[^.]+)\.(?P<ref_table>[^()]+)\((?P<ref_field>[^)]+)\)$",
    )
    .expect("valid regex")
});

static UNIQUE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UNIQUE \((?P<fields>[^)]+)\)$").expect("valid regex"));

/// Translate one constraint entry from the platform's SQL definition
/// string. PRIMARY KEY and FOREIGN KEY become per-column flags, UNIQUE
/// becomes a table-level constraint, anything else is skipped.
fn parse_constraint(
    constraint: &Value,
    primary_key_column: &mut Option<String>,
    foreign_keys: &mut HashMap<String, Vec<ForeignKeyReference>>,
    constraints: &mut Vec<TableConstraint>,
) -> DatapubResult<()> {
    let constraint_type = constraint
        .get("constraint_type")
        .and_then(Value::as_str)
        .unwrap_or("");
    let definition = constraint
        .get("definition")
        .and_then(Value::as_str)
        .unwrap_or("");

    match constraint_type {
        "PRIMARY KEY" => {
            let captures = PRIMARY_KEY_DEF.captures(definition).ok_or_else(|| {
                DatapubError::ClientSide(format!(
                    "unsupported primary key definition: {definition}"
                ))
            })?;
            *primary_key_column = Some(captures["field"].to_string());
        }
        "FOREIGN KEY" => {
            let captures = FOREIGN_KEY_DEF.captures(definition).ok_or_else(|| {
                DatapubError::ClientSide(format!(
                    "unsupported foreign key definition: {definition}"
                ))
            })?;
            foreign_keys.insert(
                captures["field"].to_string(),
                vec![ForeignKeyReference {
                    schema: captures["ref_schema"].to_string(),
                    table: captures["ref_table"].to_string(),
                    column: captures["ref_field"].to_string(),
                }],
            );
        }
        "UNIQUE" => {
            let captures = UNIQUE_DEF.captures(definition).ok_or_else(|| {
                DatapubError::ClientSide(format!("unsupported unique definition: {definition}"))
            })?;
            let columns = captures["fields"]
                .split(',')
                .map(|f| f.trim().to_string())
                .collect();
            constraints.push(TableConstraint {
                constraint_type: ConstraintType::Unique,
                constraint_parameter: None,
                columns,
            });
        }
        _ => {}
    }
    Ok(())
}

/// Map the platform's column metadata to the display type reported back
/// to callers. Length-parameterized character types fold the length into
/// the type string, and a `nextval` default marks the serial types.
fn display_data_type(name: &str, column: &Map<String, Value>) -> DatapubResult<String> {
    let raw = column
        .get("data_type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DatapubError::ClientSide(format!("column '{name}' has no data type"))
        })?;
    let mut data_type = raw.to_uppercase();

    if data_type == "CHARACTER" || data_type == "CHARACTER VARYING" {
        let length = column
            .get("character_maximum_length")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                DatapubError::ClientSide(format!(
                    "character column '{name}' has no maximum length"
                ))
            })?;
        data_type = if data_type == "CHARACTER" {
            format!("CHAR({length})")
        } else {
            format!("VARCHAR({length})")
        };
    } else if data_type == "DOUBLE PRECISION" {
        data_type = "FLOAT".to_string();
    }

    let default = column
        .get("column_default")
        .and_then(Value::as_str)
        .unwrap_or("");
    if default.starts_with("nextval") {
        data_type = serial_data_type(name, &data_type)?;
    }

    Ok(data_type)
}

fn serial_data_type(name: &str, data_type: &str) -> DatapubResult<String> {
    let serial = match data_type {
        "BIGINT" => "BIGSERIAL",
        "INTEGER" | "INT" => "SERIAL",
        "SMALLINT" => "SMALLSERIAL",
        _ => {
            return Err(DatapubError::ClientSide(format!(
                "column '{name}' has an auto-increment default on non-integer type {data_type}"
            )))
        }
    };
    Ok(serial.to_string())
}

fn parse_is_nullable(column: &Map<String, Value>) -> bool {
    match column.get("is_nullable") {
        Some(Value::Bool(nullable)) => *nullable,
        Some(Value::String(text)) => !text.eq_ignore_ascii_case("no"),
        _ => true,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_name_lowercases_and_replaces() {
        assert_eq!(normalize_name("Wind Parks (DE)"), "wind_parks_de_");
        assert_eq!(normalize_name("Temp-2024"), "temp_2024");
    }

    #[test]
    fn test_normalize_name_keeps_valid_names() {
        assert_eq!(normalize_name("wind_parks_2024"), "wind_parks_2024");
    }

    #[test]
    fn test_table_reference_normalizes_parts() {
        let table = TableReference::new("Model Draft", "My Table");
        assert_eq!(table.schema, "model_draft");
        assert_eq!(table.table, "my_table");
        assert_eq!(table.to_string(), "model_draft.my_table");
    }

    #[test]
    fn test_normalize_definition_canonical_input() {
        let raw = json!({
            "columns": [
                {"name": "id", "data_type": "bigint", "is_nullable": false, "primary_key": true},
                {"name": "field1", "data_type": "varchar(128)", "is_nullable": false},
                {"name": "field2", "data_type": "integer"}
            ]
        });
        let definition = normalize_table_definition(&raw).unwrap();
        assert_eq!(definition.column_names(), vec!["id", "field1", "field2"]);
        assert_eq!(definition.primary_key_column(), Some("id"));
        assert!(definition.columns[2].is_nullable);
    }

    #[test]
    fn test_normalize_definition_accepts_synonyms() {
        let raw = json!({
            "fields": [
                {"name": "field1", "type": "string"},
                {"name": "field2", "type": "integer", "unit": "MW"}
            ]
        });
        let definition = normalize_table_definition(&raw).unwrap();
        assert_eq!(definition.columns[0].data_type, "string");
        assert_eq!(definition.columns[1].unit.as_deref(), Some("MW"));
    }

    #[test]
    fn test_normalize_definition_prefers_canonical_key() {
        let raw = json!({
            "columns": [{"name": "id", "data_type": "bigint", "type": "text"}]
        });
        let definition = normalize_table_definition(&raw).unwrap();
        assert_eq!(definition.columns[0].data_type, "bigint");
    }

    #[test]
    fn test_normalize_definition_requires_columns() {
        let raw = json!({"primaryKey": ["id"]});
        let err = normalize_table_definition(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_normalize_definition_requires_a_data_type() {
        let raw = json!({"columns": [{"name": "id"}]});
        let err = normalize_table_definition(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_normalize_definition_does_not_mutate_input() {
        let raw = json!({"fields": [{"name": "id", "type": "bigint"}]});
        let before = raw.clone();
        normalize_table_definition(&raw).unwrap();
        assert_eq!(raw, before);
    }

    #[test]
    fn test_normalize_definition_rejects_two_primary_keys() {
        let raw = json!({
            "columns": [
                {"name": "a", "data_type": "bigint", "primary_key": true},
                {"name": "b", "data_type": "bigint", "primary_key": true}
            ]
        });
        let err = normalize_table_definition(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_normalize_definition_rejects_composite_primary_key_constraint() {
        let raw = json!({
            "columns": [
                {"name": "a", "data_type": "bigint"},
                {"name": "b", "data_type": "bigint"}
            ],
            "constraints": [
                {"constraint_type": "PRIMARY KEY", "columns": ["a", "b"]}
            ]
        });
        let err = normalize_table_definition(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_normalize_definition_accepts_constraint_parameter() {
        let raw = json!({
            "columns": [{"name": "id", "data_type": "bigint"}],
            "constraints": [
                {"constraint_type": "PRIMARY KEY", "constraint_parameter": "id"}
            ]
        });
        let definition = normalize_table_definition(&raw).unwrap();
        assert_eq!(definition.constraints.len(), 1);
        assert_eq!(
            definition.constraints[0].constraint_parameter.as_deref(),
            Some("id")
        );
    }

    fn inspection_response() -> Value {
        json!({
            "columns": {
                "field1": {
                    "ordinal_position": 2,
                    "data_type": "character varying",
                    "character_maximum_length": 128,
                    "is_nullable": false,
                    "column_default": null
                },
                "id": {
                    "ordinal_position": 1,
                    "data_type": "bigint",
                    "is_nullable": false,
                    "column_default": "nextval('test_id_seq'::regclass)"
                },
                "field2": {
                    "ordinal_position": 3,
                    "data_type": "double precision",
                    "is_nullable": true,
                    "column_default": null
                }
            },
            "constraints": {
                "test_pkey": {
                    "constraint_type": "PRIMARY KEY",
                    "definition": "PRIMARY KEY (id)"
                },
                "test_fkey": {
                    "constraint_type": "FOREIGN KEY",
                    "definition": "FOREIGN KEY (field2) REFERENCES model_draft.other(id)"
                },
                "test_unique": {
                    "constraint_type": "UNIQUE",
                    "definition": "UNIQUE (field1, field2)"
                },
                "test_check": {
                    "constraint_type": "CHECK",
                    "definition": "CHECK (field2 > 0)"
                }
            }
        })
    }

    #[test]
    fn test_from_response_orders_columns_by_ordinal_position() {
        let definition = TableDefinition::from_response(&inspection_response()).unwrap();
        assert_eq!(definition.column_names(), vec!["id", "field1", "field2"]);
    }

    #[test]
    fn test_from_response_maps_display_types() {
        let definition = TableDefinition::from_response(&inspection_response()).unwrap();
        assert_eq!(definition.columns[0].data_type, "BIGSERIAL");
        assert_eq!(definition.columns[1].data_type, "VARCHAR(128)");
        assert_eq!(definition.columns[2].data_type, "FLOAT");
    }

    #[test]
    fn test_from_response_attaches_keys() {
        let definition = TableDefinition::from_response(&inspection_response()).unwrap();
        assert_eq!(definition.primary_key_column(), Some("id"));
        let field2 = &definition.columns[2];
        let foreign_key = field2.foreign_key.as_ref().unwrap();
        assert_eq!(foreign_key[0].schema, "model_draft");
        assert_eq!(foreign_key[0].table, "other");
        assert_eq!(foreign_key[0].column, "id");
    }

    #[test]
    fn test_from_response_collects_unique_and_skips_unknown_constraints() {
        let definition = TableDefinition::from_response(&inspection_response()).unwrap();
        assert_eq!(definition.constraints.len(), 1);
        assert_eq!(
            definition.constraints[0].constraint_type,
            ConstraintType::Unique
        );
        assert_eq!(definition.constraints[0].columns, vec!["field1", "field2"]);
    }

    #[test]
    fn test_from_response_requires_ordinal_position() {
        let raw = json!({
            "columns": {"id": {"data_type": "bigint", "is_nullable": false}}
        });
        let err = TableDefinition::from_response(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_from_response_rejects_serial_on_non_integer() {
        let raw = json!({
            "columns": {
                "id": {
                    "ordinal_position": 1,
                    "data_type": "text",
                    "is_nullable": false,
                    "column_default": "nextval('test_id_seq'::regclass)"
                }
            }
        });
        let err = TableDefinition::from_response(&raw).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_from_response_accepts_yes_no_nullable() {
        let raw = json!({
            "columns": {
                "a": {"ordinal_position": 1, "data_type": "text", "is_nullable": "NO"},
                "b": {"ordinal_position": 2, "data_type": "text", "is_nullable": "YES"}
            }
        });
        let definition = TableDefinition::from_response(&raw).unwrap();
        assert!(!definition.columns[0].is_nullable);
        assert!(definition.columns[1].is_nullable);
    }

    #[test]
    fn test_definition_serializes_without_empty_options() {
        let definition = TableDefinition {
            columns: vec![ColumnDefinition {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
                is_nullable: false,
                primary_key: Some(true),
                foreign_key: None,
                character_maximum_length: None,
                description: None,
                unit: None,
            }],
            constraints: vec![],
        };
        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(
            value,
            json!({
                "columns": [
                    {"name": "id", "data_type": "bigint", "is_nullable": false, "primary_key": true}
                ]
            })
        );
    }
}
