use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::backend::MetaStore;
use crate::compiler::{Compiled, Compiler};
use crate::errors;
use crate::file_set::FileSet;
use crate::filter::FilterRegistry;
use crate::named_query::{NamedQueryInfo, NamedQueryRegistry};
use crate::record::DatasetRecord;
use crate::sql::ColumnSet;
use crate::tree::{Node, QueryType};
use crate::MqlError;

/// Per-query switches. Deserialises from a partial JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub with_meta: bool,
    pub with_provenance: bool,
    pub include_retired_files: bool,
    /// Log every fragment, check that it parses and attach it to store errors.
    pub debug: bool,
    pub default_namespace: Option<String>,
}

impl QueryOptions {
    fn columns(&self) -> ColumnSet {
        ColumnSet::new(self.with_meta, self.with_provenance)
    }
}

pub struct EngineConfig {
    pub store: Box<dyn MetaStore>,
    pub filters: FilterRegistry,
    pub named_queries: NamedQueryRegistry,
}

impl EngineConfig {
    pub fn new(store: Box<dyn MetaStore>) -> Self {
        Self {
            store,
            filters: FilterRegistry::with_builtins(),
            named_queries: NamedQueryRegistry::new(),
        }
    }
}

pub struct Engine {
    store: Box<dyn MetaStore>,
    filters: FilterRegistry,
    named_queries: NamedQueryRegistry,
}

pub fn open_engine(config: EngineConfig) -> Result<Engine, MqlError> {
    debug!(
        dialect = ?config.store.dialect(),
        filters = config.filters.names().len(),
        named_queries = config.named_queries.len(),
        "opening query engine"
    );
    Ok(Engine {
        store: config.store,
        filters: config.filters,
        named_queries: config.named_queries,
    })
}

/// What a query evaluates to, by the query type of its root.
#[derive(Debug)]
pub enum QueryOutput<'e> {
    Files(FileSet<'e>),
    Datasets(Vec<DatasetRecord>),
    NamedQueries(Vec<NamedQueryInfo>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    Count,
    Keys,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutput {
    Count { count: u64, total_size: u64 },
    Keys(BTreeSet<String>),
}

impl Engine {
    pub fn store(&self) -> &dyn MetaStore {
        self.store.as_ref()
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn named_queries(&self) -> &NamedQueryRegistry {
        &self.named_queries
    }

    fn compiler(&self, options: &QueryOptions) -> Compiler<'_> {
        Compiler::new(
            self.store.as_ref(),
            &self.filters,
            &self.named_queries,
            options.clone(),
        )
    }

    /// Compiles a file query without executing anything.
    pub fn compile(&self, node: &Node, options: &QueryOptions) -> Result<Compiled<'_>, MqlError> {
        self.compiler(options).compile_files(node, options.columns())
    }

    /// Lazy file records for a file query. Columns not asked for in
    /// `options` come back empty whichever path produced them.
    pub fn files(&self, node: &Node, options: &QueryOptions) -> Result<FileSet<'_>, MqlError> {
        let mut compiler = self.compiler(options);
        let compiled = compiler.compile_files(node, options.columns())?;
        Ok(match compiled {
            Compiled::Sql(fragment) => {
                FileSet::from_sql(self.store.as_ref(), fragment, node.kind(), options.debug)
            }
            Compiled::Records(records) => strip_columns(records, options.columns()),
        })
    }

    #[instrument(name = "engine::query", level = "debug", skip(self, node, options), fields(kind = node.kind()))]
    pub fn query(&self, node: &Node, options: &QueryOptions) -> Result<QueryOutput<'_>, MqlError> {
        match node.query_type() {
            QueryType::File => Ok(QueryOutput::Files(self.files(node, options)?)),
            QueryType::Dataset => Ok(QueryOutput::Datasets(self.datasets(node, options)?)),
            QueryType::Queries => match node {
                Node::NamedQueries { namespace, pattern } => Ok(QueryOutput::NamedQueries(
                    self.named_queries
                        .search(namespace.as_deref(), pattern.as_deref())?,
                )),
                other => Err(errors::query_type_mismatch_error(
                    QueryType::Queries.as_str(),
                    other.kind(),
                )),
            },
        }
    }

    pub fn datasets(
        &self,
        node: &Node,
        options: &QueryOptions,
    ) -> Result<Vec<DatasetRecord>, MqlError> {
        let sql = self.compiler(options).compile_datasets(node)?;
        debug!(node = node.kind(), sql = %sql, "executing fragment");
        let result = self.store.execute(&sql, &[]).map_err(|err| {
            errors::store_failure_error(node.kind(), options.debug.then_some(sql.as_str()), &err)
        })?;
        result
            .rows
            .into_iter()
            .map(|row| DatasetRecord::from_row(row, node.kind()))
            .collect()
    }

    /// `count` or `keys` over a file query. Forces the columns each summary
    /// needs regardless of `options`.
    #[instrument(name = "engine::summary", level = "debug", skip(self, node, options), fields(kind = node.kind()))]
    pub fn summary(
        &self,
        node: &Node,
        summary: Summary,
        options: &QueryOptions,
    ) -> Result<SummaryOutput, MqlError> {
        if node.query_type() != QueryType::File {
            return Err(errors::query_type_mismatch_error(
                QueryType::File.as_str(),
                node.kind(),
            ));
        }
        let mut options = options.clone();
        options.with_provenance = false;
        options.with_meta = summary == Summary::Keys;
        let files = self.files(node, &options)?;
        match summary {
            Summary::Count => {
                let (count, total_size) = files.counts()?;
                Ok(SummaryOutput::Count { count, total_size })
            }
            Summary::Keys => Ok(SummaryOutput::Keys(files.metadata_keys()?)),
        }
    }
}

fn strip_columns(records: FileSet<'_>, columns: ColumnSet) -> FileSet<'_> {
    let store = records.store();
    FileSet::from_stream(
        store,
        Box::new(records.into_stream().map(move |item| {
            item.map(|mut record| {
                if !columns.meta {
                    record.metadata.clear();
                }
                if !columns.provenance {
                    record.parents = None;
                    record.children = None;
                }
                record
            })
        })),
    )
}
