//! Named filters: external callables that turn input file sets into a new
//! record stream.

mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub use builtin::{EveryNth, RunHistoryAnnotator, Sample};

use crate::file_set::{FileSet, RecordStream};
use crate::meta::Constant;
use crate::MqlError;

pub trait FileFilter: Send + Sync {
    /// Called once per invocation, when the first output record is pulled.
    /// The output is treated as an opaque sequence: order and cardinality
    /// are up to the filter.
    fn apply<'s>(
        &self,
        inputs: Vec<FileSet<'s>>,
        params: &FilterParams,
    ) -> Result<RecordStream<'s>, MqlError>;
}

/// Arguments written in `filter name(<params>)(<queries>)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    pub positional: Vec<Constant>,
    pub keyword: BTreeMap<String, Constant>,
}

impl FilterParams {
    pub fn new(positional: Vec<Constant>, keyword: BTreeMap<String, Constant>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// Keyword `name` if given, else the positional argument at `index`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Constant> {
        self.keyword
            .get(name)
            .or_else(|| self.positional.get(index))
    }

    pub fn int(&self, index: usize, name: &str) -> Option<i64> {
        match self.get(index, name)? {
            Constant::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn float(&self, index: usize, name: &str) -> Option<f64> {
        match self.get(index, name)? {
            Constant::Int(value) => Some(*value as f64),
            Constant::Float(value) => Some(*value),
            _ => None,
        }
    }
}

/// Name to filter mapping, filled at startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn FileFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `every_nth` and `sample`.
    pub fn with_builtins() -> Self {
        Self::new()
            .with("every_nth", Arc::new(EveryNth))
            .with("sample", Arc::new(Sample))
    }

    pub fn with(mut self, name: &str, filter: Arc<dyn FileFilter>) -> Self {
        self.register(name, filter);
        self
    }

    pub fn register(&mut self, name: &str, filter: Arc<dyn FileFilter>) {
        self.filters.insert(name.to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FileFilter>> {
        self.filters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}
