use crate::{MqlError, QueryResult, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Vec<Value>, MqlError>> + 'a>;

/// Relational store holding the file and dataset catalog.
///
/// Calls block until the store answers. Rows returned for compiled file
/// queries follow the column contract `(id, namespace, name, metadata,
/// parents, children)`, JSON columns as JSON text.
pub trait MetaStore: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, MqlError>;

    /// Row-at-a-time access. Dropping the stream releases whatever cursor
    /// backs it; the default buffers the full result of `execute`.
    fn stream<'a>(&'a self, sql: &str, params: &[Value]) -> Result<RowStream<'a>, MqlError> {
        let result = self.execute(sql, params)?;
        Ok(Box::new(result.rows.into_iter().map(Ok)))
    }
}
