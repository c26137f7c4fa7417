//! File handling for the command line: records as JSON or CSV, metadata
//! documents as JSON, and the table definition embedded in a metadata
//! document.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};

use datapub_core::{normalize_name, records_from_value, DatapubError, DatapubResult, Record};

pub fn read_json(path: &Path) -> DatapubResult<Value> {
    let file = File::open(path)
        .map_err(|e| DatapubError::ClientSide(format!("cannot open {}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| DatapubError::ClientSide(format!("invalid JSON in {}: {e}", path.display())))
}

pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> DatapubResult<()> {
    let file = File::create(path)
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))?;
    writer
        .flush()
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))
}

pub fn print_json<T: Serialize>(value: &T) -> DatapubResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DatapubError::ClientSide(format!("cannot serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

/// Read records from a file, dispatching on the extension. Column names
/// are normalized to the platform's `[a-z0-9_]+` alphabet either way.
pub fn read_records(path: &Path, delimiter: char) -> DatapubResult<Vec<Record>> {
    match extension(path).as_deref() {
        Some("json") => {
            let records = records_from_value(read_json(path)?)?;
            Ok(records.into_iter().map(normalize_record_keys).collect())
        }
        Some("csv") => read_csv_records(path, delimiter),
        _ => Err(unsupported_file_type(path)),
    }
}

/// Write records to a file, dispatching on the extension.
pub fn write_records(records: &[Record], path: &Path, delimiter: char) -> DatapubResult<()> {
    match extension(path).as_deref() {
        Some("json") => write_json(records, path),
        Some("csv") => write_csv_records(records, path, delimiter),
        _ => Err(unsupported_file_type(path)),
    }
}

/// Extract and repair the table definition embedded in the metadata's
/// first resource: column names normalized, metadata vocabulary types
/// mapped to SQL types, yes/no nullability turned into booleans, and a
/// `bigserial` id column plus primary key added when none is declared.
pub fn definition_from_metadata(metadata: &Value) -> DatapubResult<Value> {
    let schema = metadata
        .get("resources")
        .and_then(Value::as_array)
        .and_then(|resources| resources.first())
        .and_then(|resource| resource.get("schema"))
        .ok_or_else(|| {
            DatapubError::ClientSide("metadata document has no resource schema".to_string())
        })?;

    let raw_columns = schema
        .get("columns")
        .or_else(|| schema.get("fields"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            DatapubError::ClientSide("resource schema declares no fields".to_string())
        })?;

    let mut columns = Vec::with_capacity(raw_columns.len() + 1);
    let mut has_id = false;
    let mut has_primary_key = false;
    for raw in raw_columns {
        let column = fix_metadata_column(raw)?;
        has_id |= column["name"] == json!("id");
        has_primary_key |= column.get("primary_key") == Some(&Value::Bool(true));
        columns.push(column);
    }
    if !has_id {
        columns.insert(
            0,
            json!({"name": "id", "data_type": "bigserial", "is_nullable": false}),
        );
    }

    let mut constraints: Vec<Value> = schema
        .get("constraints")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    has_primary_key |= constraints
        .iter()
        .any(|c| c.get("constraint_type") == Some(&json!("PRIMARY KEY")));
    if !has_primary_key {
        constraints.push(json!({"constraint_type": "PRIMARY KEY", "constraint_parameter": "id"}));
    }

    Ok(json!({"columns": columns, "constraints": constraints}))
}

fn fix_metadata_column(raw: &Value) -> DatapubResult<Value> {
    let source = raw.as_object().ok_or_else(|| {
        DatapubError::ClientSide("metadata column is not a JSON object".to_string())
    })?;
    let name = source
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DatapubError::ClientSide("metadata column has no name".to_string()))?;
    let data_type = source
        .get("data_type")
        .or_else(|| source.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DatapubError::ClientSide(format!("metadata column '{name}' has no type"))
        })?;

    let mut column = source.clone();
    column.remove("type");
    column.insert("name".to_string(), Value::String(normalize_name(name)));
    column.insert(
        "data_type".to_string(),
        Value::String(fix_metadata_type(data_type)),
    );
    if let Some(nullable) = source.get("is_nullable") {
        column.insert(
            "is_nullable".to_string(),
            Value::Bool(parse_nullable(nullable)),
        );
    }
    if let Some(Value::String(text)) = source.get("character_maximum_length") {
        if let Ok(length) = text.parse::<u64>() {
            column.insert(
                "character_maximum_length".to_string(),
                Value::Number(length.into()),
            );
        }
    }
    Ok(Value::Object(column))
}

/// Metadata vocabularies use a few type names the platform rejects.
fn fix_metadata_type(data_type: &str) -> String {
    match data_type.to_lowercase().as_str() {
        "double precision" => "float".to_string(),
        "serial" => "integer".to_string(),
        "string" => "varchar".to_string(),
        lowered => lowered.to_string(),
    }
}

fn parse_nullable(value: &Value) -> bool {
    match value {
        Value::Bool(nullable) => *nullable,
        Value::String(text) => !text.eq_ignore_ascii_case("no"),
        _ => true,
    }
}

fn normalize_record_keys(record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| (normalize_name(&key), value))
        .collect()
}

fn read_csv_records(path: &Path, delimiter: char) -> DatapubResult<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(csv_delimiter(delimiter)?)
        .from_path(path)
        .map_err(|e| DatapubError::ClientSide(format!("cannot open {}: {e}", path.display())))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| {
            DatapubError::ClientSide(format!("invalid CSV header in {}: {e}", path.display()))
        })?
        .iter()
        .map(normalize_name)
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            DatapubError::ClientSide(format!("invalid CSV row in {}: {e}", path.display()))
        })?;
        let record: Record = headers
            .iter()
            .cloned()
            .zip(row.iter().map(csv_value))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn write_csv_records(records: &[Record], path: &Path, delimiter: char) -> DatapubResult<()> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(csv_delimiter(delimiter)?)
        .from_path(path)
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))?;
    writer
        .write_record(&columns)
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| cell_text(record.get(*column)))
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| DatapubError::ClientSide(format!("cannot write {}: {e}", path.display())))
}

/// Infer a JSON value from one CSV cell: empty means null, then
/// integer, float, and boolean literals, and plain text otherwise.
fn csv_value(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    if let Ok(integer) = text.parse::<i64>() {
        return Value::Number(integer.into());
    }
    if let Ok(float) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match text {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_delimiter(delimiter: char) -> DatapubResult<u8> {
    u8::try_from(delimiter).map_err(|_| {
        DatapubError::ClientSide(format!("delimiter must be a single-byte character: {delimiter}"))
    })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn unsupported_file_type(path: &Path) -> DatapubError {
    DatapubError::ClientSide(format!(
        "unsupported file type: {} (expected .json or .csv)",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_csv_cells_infer_json_types() {
        let file = temp_csv("id,name,value,flag,missing\n1,alpha,1.5,true,\n");
        let records = read_records(file.path(), ',').unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(records[0]["name"], json!("alpha"));
        assert_eq!(records[0]["value"], json!(1.5));
        assert_eq!(records[0]["flag"], json!(true));
        assert_eq!(records[0]["missing"], Value::Null);
    }

    #[test]
    fn test_csv_headers_are_normalized() {
        let file = temp_csv("ID,Wind Speed\n1,12.5\n");
        let records = read_records(file.path(), ',').unwrap();
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(records[0]["wind_speed"], json!(12.5));
    }

    #[test]
    fn test_csv_respects_delimiter() {
        let file = temp_csv("id;name\n1;alpha\n");
        let records = read_records(file.path(), ';').unwrap();
        assert_eq!(records[0]["name"], json!("alpha"));
    }

    #[test]
    fn test_csv_write_and_read_back() {
        let records = records_from_value(json!([
            {"id": 1, "name": "alpha", "value": 1.5},
            {"id": 2, "name": "beta", "value": null}
        ]))
        .unwrap();
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();

        write_records(&records, file.path(), ',').unwrap();
        let read_back = read_records(file.path(), ',').unwrap();

        assert_eq!(read_back, records);
    }

    #[test]
    fn test_json_records_normalize_keys() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"[{"Wind Speed": 3.2}]"#).unwrap();
        let records = read_records(file.path(), ',').unwrap();
        assert_eq!(records[0]["wind_speed"], json!(3.2));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = read_records(Path::new("records.xlsx"), ',').unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }

    #[test]
    fn test_definition_from_metadata_fixes_fields() {
        let metadata = json!({
            "resources": [{
                "schema": {
                    "fields": [
                        {"name": "Wind Speed", "type": "double precision", "is_nullable": "NO"},
                        {"name": "region", "type": "string", "description": "federal state"}
                    ]
                }
            }]
        });

        let definition = definition_from_metadata(&metadata).unwrap();

        let columns = definition["columns"].as_array().unwrap();
        assert_eq!(columns[0]["name"], json!("id"));
        assert_eq!(columns[0]["data_type"], json!("bigserial"));
        assert_eq!(columns[1]["name"], json!("wind_speed"));
        assert_eq!(columns[1]["data_type"], json!("float"));
        assert_eq!(columns[1]["is_nullable"], json!(false));
        assert_eq!(columns[2]["data_type"], json!("varchar"));
        assert_eq!(
            definition["constraints"][0]["constraint_parameter"],
            json!("id")
        );

        // the repaired definition passes full normalization
        let parsed = datapub_core::normalize_table_definition(&definition).unwrap();
        assert_eq!(parsed.columns.len(), 3);
    }

    #[test]
    fn test_definition_from_metadata_keeps_declared_primary_key() {
        let metadata = json!({
            "resources": [{
                "schema": {
                    "fields": [
                        {"name": "code", "type": "varchar", "primary_key": true}
                    ]
                }
            }]
        });

        let definition = definition_from_metadata(&metadata).unwrap();

        // an id column is still added, but no second primary key
        let columns = definition["columns"].as_array().unwrap();
        assert_eq!(columns[0]["name"], json!("id"));
        assert!(definition["constraints"].as_array().unwrap().is_empty());
        let parsed = datapub_core::normalize_table_definition(&definition).unwrap();
        assert_eq!(parsed.primary_key_column(), Some("code"));
    }

    #[test]
    fn test_definition_from_metadata_without_resources_fails() {
        let err = definition_from_metadata(&json!({"title": "no resources"})).unwrap_err();
        assert!(matches!(err, DatapubError::ClientSide(_)));
    }
}
