//! Bottom-up fold from an expression tree to either one SQL fragment or an
//! in-memory record pipeline.
//!
//! Every operator keeps SQL when all of its operands are SQL. As soon as one
//! operand is a record stream, the SQL operands are turned into streams and
//! the in-memory algorithm takes over. Nothing is executed while compiling.

use std::sync::Arc;

use tracing::debug;

use crate::backend::MetaStore;
use crate::engine::QueryOptions;
use crate::errors;
use crate::file_set::{FileSet, RecordStream};
use crate::filter::{FileFilter, FilterParams, FilterRegistry};
use crate::meta::{normalize, MetaExpr};
use crate::named_query::NamedQueryRegistry;
use crate::sql::{self, ColumnSet, Provenance, SetOperation, SqlFragment};
use crate::tree::{FileList, FilterInvocation, Node, QueryType};
use crate::MqlError;

/// Result of compiling one file-query node.
pub enum Compiled<'s> {
    Sql(SqlFragment),
    Records(FileSet<'s>),
}

impl Compiled<'_> {
    pub fn is_sql(&self) -> bool {
        matches!(self, Self::Sql(_))
    }

    pub fn backing(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::Records(_) => "records",
        }
    }
}

pub struct Compiler<'s> {
    store: &'s dyn MetaStore,
    filters: &'s FilterRegistry,
    queries: &'s NamedQueryRegistry,
    options: QueryOptions,
    expanding: Vec<String>,
}

impl<'s> Compiler<'s> {
    pub fn new(
        store: &'s dyn MetaStore,
        filters: &'s FilterRegistry,
        queries: &'s NamedQueryRegistry,
        options: QueryOptions,
    ) -> Self {
        Self {
            store,
            filters,
            queries,
            options,
            expanding: Vec::new(),
        }
    }

    /// Compiles a file query producing at least the columns in `needs`.
    pub fn compile_files(&mut self, node: &Node, needs: ColumnSet) -> Result<Compiled<'s>, MqlError> {
        let compiled = self.compile_file_node(node, needs)?;
        debug!(node = node.kind(), backing = compiled.backing(), "compiled node");
        if let Compiled::Sql(fragment) = &compiled {
            if self.options.debug {
                debug!(node = node.kind(), sql = %fragment.text, "fragment");
                sql::check_fragment(self.store.dialect(), node.kind(), &fragment.text);
            }
        }
        Ok(compiled)
    }

    /// Turns a compiled result into a record sequence without executing it.
    pub fn into_file_set(&self, compiled: Compiled<'s>, context: &'static str) -> FileSet<'s> {
        match compiled {
            Compiled::Sql(fragment) => {
                FileSet::from_sql(self.store, fragment, context, self.options.debug)
            }
            Compiled::Records(records) => records,
        }
    }

    fn compile_file_node(&mut self, node: &Node, needs: ColumnSet) -> Result<Compiled<'s>, MqlError> {
        let dialect = self.store.dialect();
        match node {
            Node::BasicFiles { datasets } => {
                let datasets = datasets
                    .as_deref()
                    .map(|datasets| self.compile_datasets(datasets))
                    .transpose()?;
                Ok(Compiled::Sql(sql::basic_files_sql(
                    dialect,
                    datasets.as_deref(),
                    self.options.include_retired_files,
                    needs,
                )))
            }
            Node::NamedQuery { namespace, name } => {
                let namespace = self.namespace(namespace.as_deref(), "named query reference")?;
                self.expand_named(&namespace, name, needs)
            }
            Node::FileList(list) => self.compile_file_list(list, needs),
            Node::Union(operands) => {
                let operands = self.compile_operands(node, operands, needs, needs)?;
                Ok(self.combine(SetOperation::Union, operands, needs))
            }
            Node::Join(operands) => {
                let operands = self.compile_operands(node, operands, needs, ColumnSet::IDS)?;
                Ok(self.combine(SetOperation::Intersect, operands, needs))
            }
            Node::Minus { left, right } => {
                let left = self.compile_files(left, needs)?;
                let right = self.compile_files(right, ColumnSet::IDS)?;
                Ok(self.combine(SetOperation::Except, vec![left, right], needs))
            }
            Node::ParentsOf(query) => self.compile_provenance(query, Provenance::Parents, needs),
            Node::ChildrenOf(query) => self.compile_provenance(query, Provenance::Children, needs),
            Node::Limit { query, limit } => {
                match self.compile_files(query, needs)? {
                    Compiled::Sql(inner) => Ok(Compiled::Sql(sql::limit_sql(
                        dialect,
                        &inner,
                        Some(*limit),
                        0,
                        needs,
                    ))),
                    Compiled::Records(records) => Ok(Compiled::Records(records.limit(*limit))),
                }
            }
            Node::Skip { query, skip } => match self.compile_files(query, needs)? {
                Compiled::Sql(inner) => Ok(Compiled::Sql(sql::limit_sql(
                    dialect, &inner, None, *skip, needs,
                ))),
                Compiled::Records(records) => Ok(Compiled::Records(records.skip(*skip))),
            },
            Node::MetaFilter { query, expr } => self.compile_meta_filter(query, expr, needs),
            Node::Filter(invocation) => self.compile_filter(invocation, needs),
            Node::DatasetRef(_)
            | Node::DatasetHaving { .. }
            | Node::DatasetUnion(_)
            | Node::NamedQueries { .. } => Err(errors::query_type_mismatch_error(
                QueryType::File.as_str(),
                node.kind(),
            )),
        }
    }

    fn compile_file_list(&self, list: &FileList, needs: ColumnSet) -> Result<Compiled<'s>, MqlError> {
        match list {
            FileList::Ids(ids) => {
                if ids.is_empty() {
                    return Err(errors::invalid_operand_error("fids", "id list is empty"));
                }
                Ok(Compiled::Sql(sql::ids_sql(ids, needs)))
            }
            FileList::Dids(dids) => {
                if dids.is_empty() {
                    return Err(errors::invalid_operand_error("dids", "did list is empty"));
                }
                let pairs = dids
                    .iter()
                    .map(|did| match did.split_once(':') {
                        Some((namespace, name)) => Ok((namespace.to_string(), name.to_string())),
                        None => Ok((self.namespace(None, "did")?, did.clone())),
                    })
                    .collect::<Result<Vec<_>, MqlError>>()?;
                Ok(Compiled::Sql(sql::dids_sql(&pairs, needs)))
            }
            FileList::Names { namespace, names } => {
                if names.is_empty() {
                    return Err(errors::invalid_operand_error("names", "name list is empty"));
                }
                let namespace = self.namespace(namespace.as_deref(), "name list")?;
                let pairs: Vec<(String, String)> = names
                    .iter()
                    .map(|name| (namespace.clone(), name.clone()))
                    .collect();
                Ok(Compiled::Sql(sql::dids_sql(&pairs, needs)))
            }
        }
    }

    /// First operand with `first`, the rest with `rest`.
    fn compile_operands(
        &mut self,
        node: &Node,
        operands: &[Node],
        first: ColumnSet,
        rest: ColumnSet,
    ) -> Result<Vec<Compiled<'s>>, MqlError> {
        if operands.is_empty() {
            return Err(errors::invalid_operand_error(node.kind(), "needs at least one operand"));
        }
        operands
            .iter()
            .enumerate()
            .map(|(index, operand)| {
                self.compile_files(operand, if index == 0 { first } else { rest })
            })
            .collect()
    }

    fn combine(
        &self,
        operation: SetOperation,
        mut operands: Vec<Compiled<'s>>,
        needs: ColumnSet,
    ) -> Compiled<'s> {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        if operands.iter().all(Compiled::is_sql) {
            let fragments: Vec<SqlFragment> = operands
                .into_iter()
                .filter_map(|operand| match operand {
                    Compiled::Sql(fragment) => Some(fragment),
                    Compiled::Records(_) => None,
                })
                .collect();
            return Compiled::Sql(sql::set_operation_sql(operation, &fragments, needs));
        }
        let context = match operation {
            SetOperation::Union => "union",
            SetOperation::Intersect => "join",
            SetOperation::Except => "minus",
        };
        let mut sets = operands.into_iter().map(|operand| {
            if operand.is_sql() {
                debug!(node = context, "materializing sql operand");
            }
            self.into_file_set(operand, context)
        });
        let Some(first) = sets.next() else {
            return Compiled::Records(FileSet::from_records(self.store, Vec::new()));
        };
        let rest: Vec<FileSet<'s>> = sets.collect();
        let combined = match operation {
            SetOperation::Union => first.union(rest),
            SetOperation::Intersect => first.intersect(rest),
            SetOperation::Except => rest
                .into_iter()
                .fold(first, |left, right| left.difference(right)),
        };
        Compiled::Records(combined)
    }

    fn compile_provenance(
        &mut self,
        query: &Node,
        direction: Provenance,
        needs: ColumnSet,
    ) -> Result<Compiled<'s>, MqlError> {
        match self.compile_files(query, ColumnSet::IDS)? {
            Compiled::Sql(inner) => Ok(Compiled::Sql(sql::provenance_sql(direction, &inner, needs))),
            Compiled::Records(records) => Ok(Compiled::Records(match direction {
                Provenance::Parents => records.parents(needs),
                Provenance::Children => records.children(needs),
            })),
        }
    }

    fn compile_meta_filter(
        &mut self,
        query: &Node,
        expr: &MetaExpr,
        needs: ColumnSet,
    ) -> Result<Compiled<'s>, MqlError> {
        let dnf = normalize(expr)?;
        if dnf.is_always_true() {
            return self.compile_files(query, needs);
        }
        match self.compile_files(query, needs.with_meta())? {
            Compiled::Sql(inner) => {
                let predicate = sql::dnf_predicate_sql(self.store.dialect(), &dnf, "t.metadata")?;
                Ok(Compiled::Sql(sql::meta_filter_sql(&inner, &predicate, needs)))
            }
            Compiled::Records(records) => Ok(Compiled::Records(records.filter_metadata(expr)?)),
        }
    }

    fn compile_filter(
        &mut self,
        invocation: &FilterInvocation,
        needs: ColumnSet,
    ) -> Result<Compiled<'s>, MqlError> {
        let filter = self
            .filters
            .get(&invocation.name)
            .ok_or_else(|| errors::unknown_filter_error(&invocation.name))?;
        let mut inputs = Vec::with_capacity(invocation.queries.len());
        for query in &invocation.queries {
            let compiled = self.compile_files(query, needs.with_meta())?;
            inputs.push(self.into_file_set(compiled, "filter"));
        }
        let params = FilterParams::new(invocation.positional.clone(), invocation.keyword.clone());
        let name = invocation.name.clone();
        Ok(Compiled::Records(FileSet::deferred(
            self.store,
            self.options.debug,
            move || run_filter(filter, name, inputs, params),
        )))
    }

    fn expand_named(
        &mut self,
        namespace: &str,
        name: &str,
        needs: ColumnSet,
    ) -> Result<Compiled<'s>, MqlError> {
        let key = format!("{namespace}:{name}");
        if self.expanding.contains(&key) {
            let mut chain = self.expanding.clone();
            chain.push(key);
            return Err(errors::named_query_cycle_error(&chain));
        }
        let tree = self.queries.resolve(namespace, name)?;
        if tree.query_type() != QueryType::File {
            return Err(errors::query_type_mismatch_error(
                QueryType::File.as_str(),
                tree.kind(),
            ));
        }
        self.expanding.push(key);
        let compiled = self.compile_files(&tree, needs);
        self.expanding.pop();
        compiled
    }

    /// Dataset queries always compile to SQL returning
    /// `(namespace, name, metadata)`.
    pub fn compile_datasets(&mut self, node: &Node) -> Result<String, MqlError> {
        let sql = match node {
            Node::DatasetRef(selector) => {
                let namespace = self.namespace(selector.namespace.as_deref(), "dataset reference")?;
                sql::dataset_ref_sql(self.store.dialect(), &namespace, selector)
            }
            Node::DatasetHaving { query, expr } => {
                let inner = self.compile_datasets(query)?;
                let dnf = normalize(expr)?;
                if dnf.is_always_true() {
                    inner
                } else {
                    let predicate =
                        sql::dnf_predicate_sql(self.store.dialect(), &dnf, "d.metadata")?;
                    sql::dataset_having_sql(&inner, &predicate)
                }
            }
            Node::DatasetUnion(parts) => {
                if parts.is_empty() {
                    return Err(errors::invalid_operand_error(
                        node.kind(),
                        "needs at least one dataset",
                    ));
                }
                let mut parts = parts
                    .iter()
                    .map(|part| self.compile_datasets(part))
                    .collect::<Result<Vec<_>, _>>()?;
                if parts.len() == 1 {
                    parts.swap_remove(0)
                } else {
                    sql::dataset_union_sql(&parts)
                }
            }
            other => {
                return Err(errors::query_type_mismatch_error(
                    QueryType::Dataset.as_str(),
                    other.kind(),
                ))
            }
        };
        debug!(node = node.kind(), backing = "sql", "compiled node");
        if self.options.debug {
            debug!(node = node.kind(), sql = %sql, "fragment");
            sql::check_fragment(self.store.dialect(), node.kind(), &sql);
        }
        Ok(sql)
    }

    fn namespace(&self, explicit: Option<&str>, what: &str) -> Result<String, MqlError> {
        explicit
            .or(self.options.default_namespace.as_deref())
            .map(str::to_string)
            .ok_or_else(|| errors::missing_namespace_error(what))
    }
}

fn run_filter<'s>(
    filter: Arc<dyn FileFilter>,
    name: String,
    inputs: Vec<FileSet<'s>>,
    params: FilterParams,
) -> Result<RecordStream<'s>, MqlError> {
    debug!(filter = %name, inputs = inputs.len(), "invoking filter");
    let stream = filter
        .apply(inputs, &params)
        .map_err(|err| errors::filter_failure_error(&name, &err))?;
    Ok(Box::new(stream.map(move |item| {
        item.map_err(|err| {
            if errors::is_catalogued(&err) {
                err
            } else {
                errors::filter_failure_error(&name, &err)
            }
        })
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::{Compiled, Compiler};
    use crate::backend::{MetaStore, SqlDialect};
    use crate::engine::QueryOptions;
    use crate::error::ErrorKind;
    use crate::filter::FilterRegistry;
    use crate::meta::{CmpOp, MetaExpr, Scalar};
    use crate::named_query::NamedQueryRegistry;
    use crate::sql::ColumnSet;
    use crate::tree::Node;
    use crate::{MqlError, QueryResult, Value};

    struct RecordingStore {
        dialect: SqlDialect,
        executed: Mutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new(dialect: SqlDialect) -> Self {
            Self {
                dialect,
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetaStore for RecordingStore {
        fn dialect(&self) -> SqlDialect {
            self.dialect
        }

        fn execute(&self, sql: &str, _params: &[Value]) -> Result<QueryResult, MqlError> {
            self.executed.lock().expect("lock").push(sql.to_string());
            Ok(QueryResult::default())
        }
    }

    fn compile_sql(node: &Node, queries: &NamedQueryRegistry) -> Result<String, MqlError> {
        let store = RecordingStore::new(SqlDialect::Sqlite);
        let filters = FilterRegistry::with_builtins();
        let mut compiler = Compiler::new(&store, &filters, queries, QueryOptions::default());
        let result = match compiler.compile_files(node, ColumnSet::new(true, false))? {
            Compiled::Sql(fragment) => Ok(fragment.text),
            Compiled::Records(_) => panic!("expected sql"),
        };
        result
    }

    #[test]
    fn dataset_selection_with_filter_wraps_once() {
        let base = Node::files_from(Node::dataset("test", "ds1"));
        let base_sql = compile_sql(&base, &NamedQueryRegistry::new()).expect("compiles");
        let filtered = base.with_meta(MetaExpr::compare(Scalar::field("run.number"), CmpOp::Gt, 100));
        let filtered_sql = compile_sql(&filtered, &NamedQueryRegistry::new()).expect("compiles");
        assert!(base_sql.contains("d.namespace = 'test' and d.name = 'ds1'"));
        assert_eq!(
            filtered_sql,
            format!(
                "select t.id, t.namespace, t.name, t.metadata, null as parents, null as children \
                 from ({base_sql}) t where ((json_type(t.metadata, '$.\"run.number\"') in ('integer', 'real') \
                 and json_extract(t.metadata, '$.\"run.number\"') > 100))"
            )
        );
    }

    #[test]
    fn vacuous_filter_returns_operand_unchanged() {
        let base = Node::fids(["a"]);
        let filtered = base.clone().with_meta(MetaExpr::and(Vec::new()));
        let queries = NamedQueryRegistry::new();
        assert_eq!(
            compile_sql(&base, &queries).expect("compiles"),
            compile_sql(&filtered, &queries).expect("compiles")
        );
    }

    #[test]
    fn named_query_cycles_are_rejected() {
        let mut queries = NamedQueryRegistry::new();
        queries
            .insert_node("test", "a", &Node::Union(vec![Node::fids(["x"]), Node::named("test", "b")]))
            .expect("stores");
        queries
            .insert_node("test", "b", &Node::named("test", "a"))
            .expect("stores");
        let err = compile_sql(&Node::named("test", "a"), &queries).err().expect("cycle");
        assert_eq!(err.kind, ErrorKind::Compilation);
        assert!(err.description.contains("named query cycle: test:a -> test:b -> test:a"));
    }

    #[test]
    fn named_query_splices_in_place() {
        let mut queries = NamedQueryRegistry::new();
        queries
            .insert_node("test", "raw", &Node::fids(["a", "b"]))
            .expect("stores");
        let spliced = compile_sql(&Node::named("test", "raw").limit(1), &queries).expect("compiles");
        assert!(spliced.contains("where f.id in ('a', 'b')"));
        assert!(spliced.ends_with("order by t.id limit 1"));
    }

    #[test]
    fn dataset_operators_do_not_fit_file_queries() {
        let err = compile_sql(&Node::dataset("test", "ds1").limit(3), &NamedQueryRegistry::new())
            .err()
            .expect("mismatch");
        assert_eq!(err.kind, ErrorKind::SyntaxCompatibility);
        assert!(err.description.contains("dataset_ref"));
    }

    #[test]
    fn unknown_filter_fails_before_any_io() {
        let store = RecordingStore::new(SqlDialect::Sqlite);
        let filters = FilterRegistry::new();
        let queries = NamedQueryRegistry::new();
        let mut compiler = Compiler::new(&store, &filters, &queries, QueryOptions::default());
        let node = Node::Union(vec![
            Node::fids(["a"]),
            Node::filter("myfilter", vec![Node::files_from(Node::dataset("test", "ds2"))]),
        ]);
        let err = compiler
            .compile_files(&node, ColumnSet::IDS)
            .err()
            .expect("unknown filter");
        assert_eq!(err.description, "unknown filter myfilter");
        assert!(store.executed.lock().expect("lock").is_empty());
    }

    #[test]
    fn mixed_union_is_lazy() {
        let store = RecordingStore::new(SqlDialect::Sqlite);
        let filters = FilterRegistry::with_builtins();
        let queries = NamedQueryRegistry::new();
        let mut compiler = Compiler::new(&store, &filters, &queries, QueryOptions::default());
        let node = Node::Union(vec![
            Node::fids(["a", "b"]),
            Node::filter("every_nth", vec![Node::files()]),
        ]);
        let compiled = compiler.compile_files(&node, ColumnSet::IDS).expect("compiles");
        assert!(!compiled.is_sql());
        assert!(store.executed.lock().expect("lock").is_empty());
    }

    #[test]
    fn unqualified_names_need_a_default_namespace() {
        let node = Node::FileList(crate::tree::FileList::Dids(vec!["a.root".to_string()]));
        let err = compile_sql(&node, &NamedQueryRegistry::new()).err().expect("no namespace");
        assert_eq!(err.code, "MQL_ERROR_MISSING_NAMESPACE");
    }
}
