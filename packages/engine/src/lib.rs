mod backend;
mod compiler;
mod engine;
mod error;
mod errors;
mod file_set;
pub mod filter;
pub mod meta;
mod named_query;
mod record;
mod schema;
mod sql;
mod tree;
mod types;

pub use backend::{MetaStore, RowStream, SqlDialect};
pub use compiler::{Compiled, Compiler};
pub use engine::{
    open_engine, Engine, EngineConfig, QueryOptions, QueryOutput, Summary, SummaryOutput,
};
pub use error::{ErrorKind, MqlError};
pub use errors::ErrorCode;
pub use file_set::{Chunks, FileSet, RecordStream};
pub use filter::{FileFilter, FilterParams, FilterRegistry};
pub use named_query::{NamedQueryInfo, NamedQueryRegistry};
pub use record::{DatasetRecord, Metadata, Record};
pub use schema::{init_schema, schema_statements};
pub use sql::{ColumnSet, SqlFragment};
pub use tree::{DatasetSelector, FileList, FilterInvocation, Node, QueryType};
pub use types::{QueryResult, Value};
