use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use mql_engine::{MetaStore, MqlError, QueryResult, SqlDialect, Value};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Blocking catalog store over one SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn in_memory() -> Result<Self, MqlError> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        Self::from_connection(conn)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, MqlError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite catalog");
        let conn = Connection::open(path).map_err(store_error)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, MqlError> {
        register_regexp(&conn).map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs a `;`-separated script, e.g. fixture DDL. Returns no rows.
    pub fn execute_batch(&self, sql: &str) -> Result<(), MqlError> {
        self.lock()?.execute_batch(sql).map_err(store_error)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MqlError> {
        self.conn
            .lock()
            .map_err(|_| MqlError::store("sqlite mutex poisoned"))
    }
}

impl MetaStore for SqliteStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    /// Runs exactly one statement. Multi-statement text is rejected by
    /// `prepare`; use [`SqliteStore::execute_batch`] for scripts.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, MqlError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(store_error)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(bind_value)))
            .map_err(store_error)?;
        let mut result_rows = Vec::new();
        while let Some(row) = rows.next().map_err(store_error)? {
            result_rows.push(read_row(row, columns.len())?);
        }
        Ok(QueryResult {
            rows: result_rows,
            columns,
        })
    }
}

/// `x regexp p` calls `regexp(p, x)`. Non-text subjects never match.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |value| -> Result<_, BoxError> {
                Ok(Regex::new(value.as_str()?)?)
            })?;
            Ok(ctx
                .get_raw(1)
                .as_str()
                .map(|text| pattern.is_match(text))
                .unwrap_or(false))
        },
    )
}

fn store_error(err: rusqlite::Error) -> MqlError {
    MqlError::store(err.to_string())
}

/// Catalog text columns hold names and JSON documents; anything that is not
/// UTF-8 is corrupt rather than something to patch over.
fn read_row(row: &Row<'_>, width: usize) -> Result<Vec<Value>, MqlError> {
    (0..width)
        .map(|idx| -> Result<Value, MqlError> {
            Ok(match row.get_ref(idx).map_err(store_error)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(number) => Value::Integer(number),
                ValueRef::Real(number) => Value::Real(number),
                ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                    .map(|text| Value::Text(text.to_string()))
                    .map_err(|err| {
                        MqlError::store(format!("column {idx} is not valid UTF-8: {err}"))
                    })?,
                ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
            })
        })
        .collect()
}

/// Binds by reference; parameters are never copied into the statement.
fn bind_value(value: &Value) -> ToSqlOutput<'_> {
    ToSqlOutput::Borrowed(match value {
        Value::Null => ValueRef::Null,
        Value::Integer(number) => ValueRef::Integer(*number),
        Value::Real(number) => ValueRef::Real(*number),
        Value::Text(text) => ValueRef::Text(text.as_bytes()),
        Value::Blob(bytes) => ValueRef::Blob(bytes.as_slice()),
    })
}
