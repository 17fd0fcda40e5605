mod backend;

use std::path::PathBuf;

use mql_engine::{init_schema, open_engine, EngineConfig};

pub use backend::SqliteStore;
pub use mql_engine::{
    Engine, FilterRegistry, MetaStore, MqlError, NamedQueryRegistry, QueryOptions, QueryResult,
    Value,
};

/// Where the catalog lives and what the engine is configured with.
pub struct OpenCatalogConfig {
    /// `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    pub filters: FilterRegistry,
    pub named_queries: NamedQueryRegistry,
}

impl Default for OpenCatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            filters: FilterRegistry::with_builtins(),
            named_queries: NamedQueryRegistry::new(),
        }
    }
}

/// Opens a SQLite catalog, creates the schema if it is missing and returns
/// an engine over it.
pub fn open_catalog(config: OpenCatalogConfig) -> Result<Engine, MqlError> {
    let store = match &config.path {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::in_memory()?,
    };
    init_schema(&store)?;
    open_engine(EngineConfig {
        store: Box::new(store),
        filters: config.filters,
        named_queries: config.named_queries,
    })
}
