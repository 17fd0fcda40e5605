//! SQL text generation. Every builder here returns a complete, independently
//! executable SELECT that follows the fixed column contract
//! `(id, namespace, name, metadata, parents, children)`.

mod datasets;
mod files;
mod predicate;
mod validate;

pub(crate) use datasets::{dataset_having_sql, dataset_ref_sql, dataset_union_sql};
pub(crate) use files::{
    basic_files_sql, counts_sql, dids_sql, ids_sql, limit_sql, metadata_keys_sql,
    meta_filter_sql, provenance_sql, set_operation_sql, Provenance, SetOperation,
};
pub(crate) use predicate::dnf_predicate_sql;
pub(crate) use validate::check_fragment;

/// Optional columns a fragment has to carry for its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnSet {
    pub meta: bool,
    pub provenance: bool,
}

impl ColumnSet {
    pub const IDS: Self = Self {
        meta: false,
        provenance: false,
    };

    pub const fn new(meta: bool, provenance: bool) -> Self {
        Self { meta, provenance }
    }

    pub const fn with_meta(self) -> Self {
        Self {
            meta: true,
            provenance: self.provenance,
        }
    }

    /// Base relation to read from: the provenance view only when needed.
    pub(crate) const fn table(self) -> &'static str {
        if self.provenance {
            "files_with_provenance"
        } else {
            "files"
        }
    }

    /// Projection of the contract columns from a relation aliased `alias`.
    pub(crate) fn projection(self, alias: &str) -> String {
        let metadata = if self.meta {
            format!("{alias}.metadata")
        } else {
            "null as metadata".to_string()
        };
        let (parents, children) = if self.provenance {
            (format!("{alias}.parents"), format!("{alias}.children"))
        } else {
            ("null as parents".to_string(), "null as children".to_string())
        };
        format!("{alias}.id, {alias}.namespace, {alias}.name, {metadata}, {parents}, {children}")
    }
}

/// SQL text plus the optional columns it actually fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFragment {
    pub text: String,
    pub columns: ColumnSet,
}

impl SqlFragment {
    pub(crate) fn new(text: String, columns: ColumnSet) -> Self {
        Self { text, columns }
    }
}

pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_sql_string(value))
}

pub(crate) fn literal_list<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(|value| quote_literal(value))
        .collect::<Vec<_>>()
        .join(", ")
}
