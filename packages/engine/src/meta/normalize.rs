use super::{Atom, MetaExpr};
use crate::errors;
use crate::record::Metadata;
use crate::MqlError;

/// Upper bound on the number of conjunctions a distributed expression may
/// produce before compilation gives up.
pub const MAX_DNF_CONJUNCTIONS: usize = 4096;

/// Negation normal form: `not` only survives inside atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum Nnf {
    Atom(Atom),
    /// Empty means true.
    And(Vec<Nnf>),
    /// Empty means false. Only produced by negating an empty `and`.
    Or(Vec<Nnf>),
}

impl Nnf {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Atom(atom) => atom.matches(metadata),
            Self::And(args) => args.iter().all(|arg| arg.matches(metadata)),
            Self::Or(args) => args.iter().any(|arg| arg.matches(metadata)),
        }
    }
}

pub fn to_nnf(expr: &MetaExpr) -> Result<Nnf, MqlError> {
    push_negation(expr, false)
}

fn push_negation(expr: &MetaExpr, negated: bool) -> Result<Nnf, MqlError> {
    match expr {
        MetaExpr::Not(inner) => push_negation(inner, !negated),
        MetaExpr::And(args) => {
            let args = args
                .iter()
                .map(|arg| push_negation(arg, negated))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if negated { Nnf::Or(args) } else { Nnf::And(args) })
        }
        MetaExpr::Or(args) => {
            if args.is_empty() {
                return Err(errors::malformed_predicate_error(
                    "or()",
                    "disjunction needs at least one operand",
                ));
            }
            let args = args
                .iter()
                .map(|arg| push_negation(arg, negated))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if negated { Nnf::And(args) } else { Nnf::Or(args) })
        }
        leaf => {
            let atom = Atom::from_leaf(leaf)?;
            Ok(Nnf::Atom(if negated { atom.negate() } else { atom }))
        }
    }
}

/// OR of ANDs of atoms.
///
/// No conjunctions at all means "always true"; `never` marks the one
/// expression shape that can never match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dnf {
    pub conjunctions: Vec<Vec<Atom>>,
    never: bool,
}

impl Dnf {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn never() -> Self {
        Self {
            conjunctions: Vec::new(),
            never: true,
        }
    }

    pub fn is_always_true(&self) -> bool {
        !self.never && self.conjunctions.is_empty()
    }

    pub fn is_never(&self) -> bool {
        self.never
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        if self.never {
            return false;
        }
        self.conjunctions.is_empty()
            || self
                .conjunctions
                .iter()
                .any(|conjunction| conjunction.iter().all(|atom| atom.matches(metadata)))
    }
}

pub fn normalize(expr: &MetaExpr) -> Result<Dnf, MqlError> {
    let nnf = to_nnf(expr)?;
    let terms = distribute(&nnf)?;
    if terms.is_empty() {
        return Ok(Dnf::never());
    }
    if terms.iter().any(Vec::is_empty) {
        return Ok(Dnf::always());
    }
    Ok(Dnf {
        conjunctions: terms,
        never: false,
    })
}

// `[]` is false and `[[]]` is true while distributing.
fn distribute(nnf: &Nnf) -> Result<Vec<Vec<Atom>>, MqlError> {
    match nnf {
        Nnf::Atom(atom) => Ok(vec![vec![atom.clone()]]),
        Nnf::Or(args) => {
            let mut terms = Vec::new();
            for arg in args {
                for term in distribute(arg)? {
                    if !terms.contains(&term) {
                        terms.push(term);
                    }
                }
                if terms.len() > MAX_DNF_CONJUNCTIONS {
                    return Err(errors::predicate_too_complex_error(MAX_DNF_CONJUNCTIONS));
                }
            }
            Ok(terms)
        }
        Nnf::And(args) => {
            let mut terms: Vec<Vec<Atom>> = vec![Vec::new()];
            for arg in args {
                let right = distribute(arg)?;
                if right.is_empty() {
                    return Ok(Vec::new());
                }
                if terms.len().saturating_mul(right.len()) > MAX_DNF_CONJUNCTIONS {
                    return Err(errors::predicate_too_complex_error(MAX_DNF_CONJUNCTIONS));
                }
                let mut product = Vec::with_capacity(terms.len() * right.len());
                for left in &terms {
                    for extra in &right {
                        let mut conjunction = left.clone();
                        for atom in extra {
                            if !conjunction.contains(atom) {
                                conjunction.push(atom.clone());
                            }
                        }
                        product.push(conjunction);
                    }
                }
                terms = product;
            }
            Ok(terms)
        }
    }
}
