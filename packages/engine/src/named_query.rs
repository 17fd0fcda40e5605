use std::collections::BTreeMap;

use globset::Glob;

use crate::errors;
use crate::tree::Node;
use crate::MqlError;

/// One stored query as listed by a named-query search.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NamedQueryInfo {
    pub namespace: String,
    pub name: String,
    pub source: String,
}

/// `(namespace, name)` to stored query source. Sources are JSON-encoded
/// trees, decoded every time they are resolved.
#[derive(Debug, Clone, Default)]
pub struct NamedQueryRegistry {
    queries: BTreeMap<(String, String), String>,
}

impl NamedQueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: &str, name: &str, source: impl Into<String>) {
        self.queries
            .insert((namespace.to_string(), name.to_string()), source.into());
    }

    pub fn insert_node(&mut self, namespace: &str, name: &str, node: &Node) -> Result<(), MqlError> {
        let source = serde_json::to_string(node).map_err(|err| {
            errors::invalid_named_query_source_error(namespace, name, &err.to_string())
        })?;
        self.insert(namespace, name, source);
        Ok(())
    }

    pub fn with(mut self, namespace: &str, name: &str, source: impl Into<String>) -> Self {
        self.insert(namespace, name, source);
        self
    }

    pub fn resolve(&self, namespace: &str, name: &str) -> Result<Node, MqlError> {
        let source = self
            .queries
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| errors::unknown_named_query_error(namespace, name))?;
        serde_json::from_str(source).map_err(|err| {
            errors::invalid_named_query_source_error(namespace, name, &err.to_string())
        })
    }

    /// Stored queries, optionally limited to one namespace and to names
    /// matching a glob, ordered by namespace then name.
    pub fn search(
        &self,
        namespace: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<Vec<NamedQueryInfo>, MqlError> {
        let matcher = match pattern {
            Some(pattern) => Some(
                Glob::new(pattern)
                    .map_err(|err| errors::invalid_operand_error("named_queries", &err.to_string()))?
                    .compile_matcher(),
            ),
            None => None,
        };
        Ok(self
            .queries
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| wanted == ns))
            .filter(|((_, name), _)| matcher.as_ref().map_or(true, |glob| glob.is_match(name)))
            .map(|((namespace, name), source)| NamedQueryInfo {
                namespace: namespace.clone(),
                name: name.clone(),
                source: source.clone(),
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
