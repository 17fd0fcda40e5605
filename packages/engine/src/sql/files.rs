use super::{literal_list, quote_literal, ColumnSet, SqlFragment};
use crate::backend::SqlDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SetOperation {
    Union,
    Intersect,
    Except,
}

impl SetOperation {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Union => "union",
            Self::Intersect => "intersect",
            Self::Except => "except",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Provenance {
    Parents,
    Children,
}

/// Leaf selection from the file table, optionally restricted to the files of
/// a dataset fragment `(namespace, name, metadata)`.
pub(crate) fn basic_files_sql(
    dialect: SqlDialect,
    datasets: Option<&str>,
    include_retired: bool,
    columns: ColumnSet,
) -> SqlFragment {
    let mut conditions = Vec::new();
    if let Some(datasets) = datasets {
        conditions.push(format!(
            "exists (select 1 from files_datasets fd \
             join ({datasets}) d on d.namespace = fd.dataset_namespace and d.name = fd.dataset_name \
             where fd.file_id = f.id)"
        ));
    }
    if !include_retired {
        conditions.push(
            match dialect {
                SqlDialect::Sqlite => "f.retired = 0",
                SqlDialect::Postgres => "not f.retired",
            }
            .to_string(),
        );
    }
    let filter = if conditions.is_empty() {
        String::new()
    } else {
        format!(" where {}", conditions.join(" and "))
    };
    SqlFragment::new(
        format!(
            "select {} from {} f{filter} order by f.id",
            columns.projection("f"),
            columns.table()
        ),
        columns,
    )
}

pub(crate) fn ids_sql(ids: &[String], columns: ColumnSet) -> SqlFragment {
    SqlFragment::new(
        format!(
            "select {} from {} f where f.id in ({}) order by f.id",
            columns.projection("f"),
            columns.table(),
            literal_list(ids)
        ),
        columns,
    )
}

pub(crate) fn dids_sql(dids: &[(String, String)], columns: ColumnSet) -> SqlFragment {
    let matches = dids
        .iter()
        .map(|(namespace, name)| {
            format!(
                "(f.namespace = {} and f.name = {})",
                quote_literal(namespace),
                quote_literal(name)
            )
        })
        .collect::<Vec<_>>()
        .join(" or ");
    SqlFragment::new(
        format!(
            "select {} from {} f where {matches} order by f.id",
            columns.projection("f"),
            columns.table()
        ),
        columns,
    )
}

/// Combines operand ids with a set operator and re-reads the rows, so the
/// operator compares ids rather than whole rows.
pub(crate) fn set_operation_sql(
    operation: SetOperation,
    operands: &[SqlFragment],
    columns: ColumnSet,
) -> SqlFragment {
    let ids = operands
        .iter()
        .enumerate()
        .map(|(index, operand)| format!("select u{index}.id from ({}) u{index}", operand.text))
        .collect::<Vec<_>>()
        .join(&format!(" {} ", operation.keyword()));
    SqlFragment::new(
        format!(
            "select {} from {} f where f.id in ({ids}) order by f.id",
            columns.projection("f"),
            columns.table()
        ),
        columns,
    )
}

/// One hop along `parent_child` from the ids of `inner`.
pub(crate) fn provenance_sql(
    direction: Provenance,
    inner: &SqlFragment,
    columns: ColumnSet,
) -> SqlFragment {
    let (wanted, known) = match direction {
        Provenance::Parents => ("parent_id", "child_id"),
        Provenance::Children => ("child_id", "parent_id"),
    };
    SqlFragment::new(
        format!(
            "select {} from {} f where f.id in (select pc.{wanted} from parent_child pc \
             where pc.{known} in (select c.id from ({}) c)) order by f.id",
            columns.projection("f"),
            columns.table(),
            inner.text
        ),
        columns,
    )
}

pub(crate) fn limit_sql(
    dialect: SqlDialect,
    inner: &SqlFragment,
    limit: Option<u64>,
    offset: u64,
    columns: ColumnSet,
) -> SqlFragment {
    let window = match (limit, dialect) {
        (Some(limit), _) if offset == 0 => format!("limit {limit}"),
        (Some(limit), _) => format!("limit {limit} offset {offset}"),
        (None, SqlDialect::Sqlite) => format!("limit -1 offset {offset}"),
        (None, SqlDialect::Postgres) => format!("offset {offset}"),
    };
    SqlFragment::new(
        format!(
            "select {} from ({}) t order by t.id {window}",
            columns.projection("t"),
            inner.text
        ),
        columns,
    )
}

/// `predicate` is a boolean expression over `t.metadata`.
pub(crate) fn meta_filter_sql(
    inner: &SqlFragment,
    predicate: &str,
    columns: ColumnSet,
) -> SqlFragment {
    SqlFragment::new(
        format!(
            "select {} from ({}) t where {predicate}",
            columns.projection("t"),
            inner.text
        ),
        columns,
    )
}

/// `(count, total_size)` of the files selected by `inner`.
pub(crate) fn counts_sql(inner: &SqlFragment) -> String {
    format!(
        "select count(*), coalesce(sum(f.size), 0) from files f \
         where f.id in (select q.id from ({}) q)",
        inner.text
    )
}

/// Distinct top-level metadata keys; `inner` must carry metadata.
pub(crate) fn metadata_keys_sql(dialect: SqlDialect, inner: &SqlFragment) -> String {
    match dialect {
        SqlDialect::Sqlite => format!(
            "select distinct k.key from ({}) q, json_each(q.metadata) k order by 1",
            inner.text
        ),
        SqlDialect::Postgres => format!(
            "select distinct jsonb_object_keys(q.metadata) as key from ({}) q order by 1",
            inner.text
        ),
    }
}
