use super::{to_nnf, MetaExpr, Nnf};
use crate::record::Metadata;
use crate::MqlError;

/// In-memory predicate over record metadata. Validates and negation-normalizes
/// the expression once, then evaluates it directly for each record.
#[derive(Debug, Clone)]
pub struct MetaEvaluator {
    nnf: Nnf,
}

impl MetaEvaluator {
    pub fn new(expr: &MetaExpr) -> Result<Self, MqlError> {
        Ok(Self { nnf: to_nnf(expr)? })
    }

    pub fn evaluate(&self, metadata: &Metadata) -> bool {
        self.nnf.matches(metadata)
    }
}

pub fn evaluate(metadata: &Metadata, expr: &MetaExpr) -> Result<bool, MqlError> {
    Ok(MetaEvaluator::new(expr)?.evaluate(metadata))
}
