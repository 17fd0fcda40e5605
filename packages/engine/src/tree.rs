use std::collections::BTreeMap;

use crate::meta::{Constant, MetaExpr};

/// What a query returns, decided by the kind of its root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    File,
    Dataset,
    Queries,
}

impl QueryType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dataset => "dataset",
            Self::Queries => "query",
        }
    }
}

/// Parsed, unevaluated query. The compiler only ever folds over it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// `files [from <datasets>]`; without datasets selects the whole catalog.
    BasicFiles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datasets: Option<Box<Node>>,
    },
    /// `query [ns:]name`
    NamedQuery {
        #[serde(default)]
        namespace: Option<String>,
        name: String,
    },
    FileList(FileList),
    Union(Vec<Node>),
    Join(Vec<Node>),
    Minus {
        left: Box<Node>,
        right: Box<Node>,
    },
    ParentsOf(Box<Node>),
    ChildrenOf(Box<Node>),
    Limit {
        query: Box<Node>,
        limit: u64,
    },
    Skip {
        query: Box<Node>,
        skip: u64,
    },
    MetaFilter {
        query: Box<Node>,
        expr: MetaExpr,
    },
    Filter(FilterInvocation),
    DatasetRef(DatasetSelector),
    /// `<datasets> having <meta-expr>`
    DatasetHaving {
        query: Box<Node>,
        expr: MetaExpr,
    },
    DatasetUnion(Vec<Node>),
    /// Lists stored named queries.
    NamedQueries {
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileList {
    Ids(Vec<String>),
    /// `namespace:name` strings; unqualified entries use the default namespace.
    Dids(Vec<String>),
    Names {
        #[serde(default)]
        namespace: Option<String>,
        names: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterInvocation {
    pub name: String,
    #[serde(default)]
    pub positional: Vec<Constant>,
    #[serde(default)]
    pub keyword: BTreeMap<String, Constant>,
    #[serde(default)]
    pub queries: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatasetSelector {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    /// Treat `name` as a glob (`*`, `?`).
    #[serde(default)]
    pub pattern: bool,
    #[serde(default)]
    pub with_children: bool,
    #[serde(default)]
    pub recursively: bool,
}

impl Node {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BasicFiles { .. } => "basic_files",
            Self::NamedQuery { .. } => "named_query",
            Self::FileList(_) => "file_list",
            Self::Union(_) => "union",
            Self::Join(_) => "join",
            Self::Minus { .. } => "minus",
            Self::ParentsOf(_) => "parents_of",
            Self::ChildrenOf(_) => "children_of",
            Self::Limit { .. } => "limit",
            Self::Skip { .. } => "skip",
            Self::MetaFilter { .. } => "meta_filter",
            Self::Filter(_) => "filter",
            Self::DatasetRef(_) => "dataset_ref",
            Self::DatasetHaving { .. } => "dataset_having",
            Self::DatasetUnion(_) => "dataset_union",
            Self::NamedQueries { .. } => "named_queries",
        }
    }

    pub const fn query_type(&self) -> QueryType {
        match self {
            Self::DatasetRef(_) | Self::DatasetHaving { .. } | Self::DatasetUnion(_) => {
                QueryType::Dataset
            }
            Self::NamedQueries { .. } => QueryType::Queries,
            _ => QueryType::File,
        }
    }

    pub fn files() -> Self {
        Self::BasicFiles { datasets: None }
    }

    pub fn files_from(datasets: Node) -> Self {
        Self::BasicFiles {
            datasets: Some(Box::new(datasets)),
        }
    }

    pub fn dataset(namespace: &str, name: &str) -> Self {
        Self::DatasetRef(DatasetSelector {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
            pattern: false,
            with_children: false,
            recursively: false,
        })
    }

    pub fn fids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::FileList(FileList::Ids(ids.into_iter().map(Into::into).collect()))
    }

    pub fn named(namespace: &str, name: &str) -> Self {
        Self::NamedQuery {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn minus(left: Node, right: Node) -> Self {
        Self::Minus {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn parents(self) -> Self {
        Self::ParentsOf(Box::new(self))
    }

    pub fn children(self) -> Self {
        Self::ChildrenOf(Box::new(self))
    }

    pub fn limit(self, limit: u64) -> Self {
        Self::Limit {
            query: Box::new(self),
            limit,
        }
    }

    pub fn skip(self, skip: u64) -> Self {
        Self::Skip {
            query: Box::new(self),
            skip,
        }
    }

    pub fn with_meta(self, expr: MetaExpr) -> Self {
        Self::MetaFilter {
            query: Box::new(self),
            expr,
        }
    }

    pub fn filter(name: &str, queries: Vec<Node>) -> Self {
        Self::Filter(FilterInvocation {
            name: name.to_string(),
            positional: Vec::new(),
            keyword: BTreeMap::new(),
            queries,
        })
    }
}
