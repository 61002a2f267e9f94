use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorInfo, FrsError};

fn serde_error(code: &str, err: impl ToString) -> FrsError {
    FrsError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, FrsError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer_pretty(&mut bytes, &canonical)
        .map_err(|err| serde_error("json_write", err))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FrsError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FrsError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml_deserialize", err))
}

/// Writes `value` as canonical JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), FrsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| crate::errors::io_error("json_parent_dir", parent, err))?;
    }
    let bytes = to_canonical_json_bytes(value)?;
    std::fs::write(path, bytes).map_err(|err| crate::errors::io_error("json_write", path, err))
}

/// Reads and decodes a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &std::path::Path) -> Result<T, FrsError> {
    let bytes =
        std::fs::read(path).map_err(|err| crate::errors::io_error("json_read", path, err))?;
    from_json_slice(&bytes).map_err(|err| match err {
        FrsError::Serde(info) => {
            FrsError::Serde(info.with_context("path", path.display().to_string()))
        }
        other => other,
    })
}
