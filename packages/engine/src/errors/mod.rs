use crate::error::ErrorKind;
use crate::MqlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    QueryTypeMismatch,
    UnknownNamedQuery,
    NamedQueryCycle,
    InvalidNamedQuerySource,
    UnknownFilter,
    MalformedPredicate,
    PredicateTooComplex,
    InvalidOperand,
    MissingNamespace,
    StoreFailure,
    FilterFailure,
    InvalidRow,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueryTypeMismatch => "MQL_ERROR_QUERY_TYPE_MISMATCH",
            Self::UnknownNamedQuery => "MQL_ERROR_UNKNOWN_NAMED_QUERY",
            Self::NamedQueryCycle => "MQL_ERROR_NAMED_QUERY_CYCLE",
            Self::InvalidNamedQuerySource => "MQL_ERROR_INVALID_NAMED_QUERY_SOURCE",
            Self::UnknownFilter => "MQL_ERROR_UNKNOWN_FILTER",
            Self::MalformedPredicate => "MQL_ERROR_MALFORMED_PREDICATE",
            Self::PredicateTooComplex => "MQL_ERROR_PREDICATE_TOO_COMPLEX",
            Self::InvalidOperand => "MQL_ERROR_INVALID_OPERAND",
            Self::MissingNamespace => "MQL_ERROR_MISSING_NAMESPACE",
            Self::StoreFailure => "MQL_ERROR_STORE_FAILURE",
            Self::FilterFailure => "MQL_ERROR_FILTER_FAILURE",
            Self::InvalidRow => "MQL_ERROR_INVALID_ROW",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::QueryTypeMismatch => ErrorKind::SyntaxCompatibility,
            Self::UnknownNamedQuery
            | Self::NamedQueryCycle
            | Self::InvalidNamedQuerySource
            | Self::UnknownFilter
            | Self::MalformedPredicate
            | Self::PredicateTooComplex
            | Self::InvalidOperand
            | Self::MissingNamespace => ErrorKind::Compilation,
            Self::StoreFailure | Self::FilterFailure | Self::InvalidRow => ErrorKind::Execution,
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::QueryTypeMismatch,
            Self::UnknownNamedQuery,
            Self::NamedQueryCycle,
            Self::InvalidNamedQuerySource,
            Self::UnknownFilter,
            Self::MalformedPredicate,
            Self::PredicateTooComplex,
            Self::InvalidOperand,
            Self::MissingNamespace,
            Self::StoreFailure,
            Self::FilterFailure,
            Self::InvalidRow,
        ]
    }
}

/// Whether `error` already carries a code from this catalogue.
pub(crate) fn is_catalogued(error: &MqlError) -> bool {
    ErrorCode::all()
        .iter()
        .any(|code| code.as_str() == error.code)
}

fn build_error(code: ErrorCode, title: &str, description: &str) -> MqlError {
    MqlError::new(code.kind(), code.as_str(), title, description)
}

pub(crate) fn query_type_mismatch_error(expected: &str, node_kind: &str) -> MqlError {
    build_error(
        ErrorCode::QueryTypeMismatch,
        "Operator does not fit the query type",
        &format!("`{node_kind}` cannot appear where a {expected} query is expected"),
    )
}

pub(crate) fn unknown_named_query_error(namespace: &str, name: &str) -> MqlError {
    build_error(
        ErrorCode::UnknownNamedQuery,
        "Unknown named query",
        &format!("named query `{namespace}:{name}` is not registered"),
    )
}

pub(crate) fn named_query_cycle_error(chain: &[String]) -> MqlError {
    build_error(
        ErrorCode::NamedQueryCycle,
        "Named query cycle",
        &format!("named query cycle: {}", chain.join(" -> ")),
    )
}

pub(crate) fn invalid_named_query_source_error(
    namespace: &str,
    name: &str,
    reason: &str,
) -> MqlError {
    build_error(
        ErrorCode::InvalidNamedQuerySource,
        "Stored query cannot be decoded",
        &format!("named query `{namespace}:{name}`: {reason}"),
    )
}

pub(crate) fn unknown_filter_error(name: &str) -> MqlError {
    build_error(
        ErrorCode::UnknownFilter,
        "Unknown filter",
        &format!("unknown filter {name}"),
    )
}

pub(crate) fn malformed_predicate_error(atom: &str, reason: &str) -> MqlError {
    build_error(
        ErrorCode::MalformedPredicate,
        "Malformed metadata predicate",
        &format!("`{atom}`: {reason}"),
    )
}

pub(crate) fn predicate_too_complex_error(limit: usize) -> MqlError {
    build_error(
        ErrorCode::PredicateTooComplex,
        "Metadata predicate too complex",
        &format!("normal form would exceed {limit} conjunctions"),
    )
}

pub(crate) fn invalid_operand_error(node_kind: &str, reason: &str) -> MqlError {
    build_error(
        ErrorCode::InvalidOperand,
        "Invalid operand",
        &format!("`{node_kind}`: {reason}"),
    )
}

pub(crate) fn missing_namespace_error(what: &str) -> MqlError {
    build_error(
        ErrorCode::MissingNamespace,
        "Namespace required",
        &format!("{what} has no namespace and no default namespace is configured"),
    )
}

pub(crate) fn store_failure_error(context: &str, sql: Option<&str>, cause: &MqlError) -> MqlError {
    let description = match sql {
        Some(sql) => format!("{context}: {}\n-- fragment --\n{sql}", cause.description),
        None => format!("{context}: {}", cause.description),
    };
    build_error(ErrorCode::StoreFailure, "Store call failed", &description)
}

pub(crate) fn filter_failure_error(name: &str, cause: &MqlError) -> MqlError {
    build_error(
        ErrorCode::FilterFailure,
        "Filter failed",
        &format!("filter {name}: {}", cause.description),
    )
}

pub(crate) fn invalid_row_error(context: &str, reason: &str) -> MqlError {
    build_error(
        ErrorCode::InvalidRow,
        "Row does not match the column contract",
        &format!("{context}: {reason}"),
    )
}
