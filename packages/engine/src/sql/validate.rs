use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tracing::warn;

use crate::backend::SqlDialect;

/// Debug-mode sanity check: the fragment should parse as one SELECT under the
/// store's dialect. A failure is only reported; the store has the final say.
pub(crate) fn check_fragment(dialect: SqlDialect, node_kind: &str, sql: &str) {
    if let Some(problem) = fragment_problem(dialect, sql) {
        warn!(node = node_kind, %problem, sql, "compiled fragment failed validation");
    }
}

fn fragment_problem(dialect: SqlDialect, sql: &str) -> Option<String> {
    let parser_dialect: Box<dyn Dialect> = match dialect {
        SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
    };
    match Parser::parse_sql(parser_dialect.as_ref(), sql) {
        Ok(statements) if statements.len() == 1 && matches!(statements[0], Statement::Query(_)) => {
            None
        }
        Ok(statements) => Some(format!(
            "expected one query, found {} statements",
            statements.len()
        )),
        Err(error) => Some(error.to_string()),
    }
}
