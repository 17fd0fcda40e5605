use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::errors;
use crate::{MqlError, Value};

pub type Metadata = JsonMap<String, JsonValue>;

/// One file of the catalog as seen by a query.
///
/// `parents`/`children` are `None` unless provenance was requested, and
/// `metadata` is empty unless metadata was requested.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub id: String,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
}

impl Record {
    pub fn new(id: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            name: name.into(),
            size: None,
            metadata: Metadata::new(),
            parents: None,
            children: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn did(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    pub(crate) fn from_row(row: Vec<Value>, context: &str) -> Result<Self, MqlError> {
        if row.len() < 6 {
            return Err(errors::invalid_row_error(
                context,
                &format!("expected 6 columns, got {}", row.len()),
            ));
        }
        let mut columns = row.into_iter();
        let mut next = || columns.next().unwrap_or(Value::Null);
        let id = required_text(next(), "id", context)?;
        let namespace = required_text(next(), "namespace", context)?;
        let name = required_text(next(), "name", context)?;
        let metadata = match json_column(next(), "metadata", context)? {
            None => Metadata::new(),
            Some(JsonValue::Object(map)) => map,
            Some(other) => {
                return Err(errors::invalid_row_error(
                    context,
                    &format!("metadata of `{id}` is not an object: {other}"),
                ))
            }
        };
        let parents = id_list_column(next(), "parents", context)?;
        let children = id_list_column(next(), "children", context)?;
        Ok(Self {
            id,
            namespace,
            name,
            size: None,
            metadata,
            parents,
            children,
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DatasetRecord {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DatasetRecord {
    pub(crate) fn from_row(row: Vec<Value>, context: &str) -> Result<Self, MqlError> {
        if row.len() < 3 {
            return Err(errors::invalid_row_error(
                context,
                &format!("expected 3 columns, got {}", row.len()),
            ));
        }
        let mut columns = row.into_iter();
        let mut next = || columns.next().unwrap_or(Value::Null);
        let namespace = required_text(next(), "namespace", context)?;
        let name = required_text(next(), "name", context)?;
        let metadata = match json_column(next(), "metadata", context)? {
            Some(JsonValue::Object(map)) => map,
            _ => Metadata::new(),
        };
        Ok(Self {
            namespace,
            name,
            metadata,
        })
    }
}

fn required_text(value: Value, column: &str, context: &str) -> Result<String, MqlError> {
    match value {
        Value::Text(text) => Ok(text),
        Value::Integer(number) => Ok(number.to_string()),
        other => Err(errors::invalid_row_error(
            context,
            &format!("column `{column}` must be text, got {other:?}"),
        )),
    }
}

fn json_column(value: Value, column: &str, context: &str) -> Result<Option<JsonValue>, MqlError> {
    match value {
        Value::Null => Ok(None),
        Value::Text(text) => serde_json::from_str(&text).map(Some).map_err(|err| {
            errors::invalid_row_error(context, &format!("column `{column}` is not JSON: {err}"))
        }),
        Value::Blob(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            errors::invalid_row_error(context, &format!("column `{column}` is not JSON: {err}"))
        }),
        other => Err(errors::invalid_row_error(
            context,
            &format!("column `{column}` must be JSON text, got {other:?}"),
        )),
    }
}

fn id_list_column(
    value: Value,
    column: &str,
    context: &str,
) -> Result<Option<Vec<String>>, MqlError> {
    let Some(json) = json_column(value, column, context)? else {
        return Ok(None);
    };
    let JsonValue::Array(items) = json else {
        return Err(errors::invalid_row_error(
            context,
            &format!("column `{column}` must be a JSON array"),
        ));
    };
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item {
            JsonValue::String(id) => ids.push(id),
            JsonValue::Null => {}
            other => ids.push(other.to_string()),
        }
    }
    ids.sort();
    ids.dedup();
    Ok(Some(ids))
}
