mod atom;
mod evaluator;
mod normalize;

use std::fmt;

pub use atom::{Atom, AtomOp, Pattern};
pub use evaluator::{evaluate, MetaEvaluator};
pub use normalize::{normalize, to_nnf, Dnf, Nnf, MAX_DNF_CONJUNCTIONS};

/// Parsed metadata boolean expression, as delivered by the parser.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaExpr {
    And(Vec<MetaExpr>),
    Or(Vec<MetaExpr>),
    Not(Box<MetaExpr>),
    Compare {
        scalar: Scalar,
        op: CmpOp,
        value: Constant,
    },
    InRange {
        scalar: Scalar,
        low: Constant,
        high: Constant,
    },
    NotInRange {
        scalar: Scalar,
        low: Constant,
        high: Constant,
    },
    InSet {
        scalar: Scalar,
        values: Vec<Constant>,
    },
    NotInSet {
        scalar: Scalar,
        values: Vec<Constant>,
    },
    Present {
        name: String,
    },
    NotPresent {
        name: String,
    },
    ArrayContains {
        name: String,
        value: Constant,
    },
    ArrayNotContains {
        name: String,
        value: Constant,
    },
}

impl MetaExpr {
    pub fn and(args: Vec<MetaExpr>) -> Self {
        Self::And(args)
    }

    pub fn or(args: Vec<MetaExpr>) -> Self {
        Self::Or(args)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: MetaExpr) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn compare(scalar: Scalar, op: CmpOp, value: impl Into<Constant>) -> Self {
        Self::Compare {
            scalar,
            op,
            value: value.into(),
        }
    }

    pub fn eq(name: &str, value: impl Into<Constant>) -> Self {
        Self::compare(Scalar::field(name), CmpOp::Eq, value)
    }

    pub fn eq_scalar(scalar: Scalar, value: impl Into<Constant>) -> Self {
        Self::compare(scalar, CmpOp::Eq, value)
    }

    pub fn present(name: &str) -> Self {
        Self::Present {
            name: name.to_string(),
        }
    }
}

/// Left-hand side of a comparison: a metadata field plus how to look at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Scalar {
    pub name: String,
    #[serde(default)]
    pub accessor: Accessor,
}

impl Scalar {
    pub fn field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            accessor: Accessor::Value,
        }
    }

    pub fn with(name: &str, accessor: Accessor) -> Self {
        Self {
            name: name.to_string(),
            accessor,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessor {
    #[default]
    Value,
    Any,
    All,
    Index(i64),
    Key(String),
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    MatchCi,
    NotMatchCi,
}

impl CmpOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Match => "~",
            Self::NotMatch => "!~",
            Self::MatchCi => "~*",
            Self::NotMatchCi => "!~*",
        }
    }

    pub const fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Match => Self::NotMatch,
            Self::NotMatch => Self::Match,
            Self::MatchCi => Self::NotMatchCi,
            Self::NotMatchCi => Self::MatchCi,
        }
    }

    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Match | Self::NotMatch | Self::MatchCi | Self::NotMatchCi
        )
    }
}

/// Literal operand. Types are kept exactly as written; nothing is coerced.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Constant {
    pub(crate) const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    pub(crate) const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.accessor {
            Accessor::Value => write!(f, "{}", self.name),
            Accessor::Any => write!(f, "{}[any]", self.name),
            Accessor::All => write!(f, "{}[all]", self.name),
            Accessor::Index(index) => write!(f, "{}[{index}]", self.name),
            Accessor::Key(key) => write!(f, "{}[{key:?}]", self.name),
            Accessor::Length => write!(f, "len({})", self.name),
        }
    }
}
