use std::cmp::Ordering;
use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;

use super::{Accessor, CmpOp, Constant, MetaExpr, Scalar};
use crate::errors;
use crate::record::Metadata;
use crate::MqlError;

/// Compiled regular expression that remembers the text it came from.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            source: source.to_string(),
            case_insensitive,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AtomOp {
    Compare(CmpOp, Constant),
    Match { pattern: Pattern, negated: bool },
    InRange(Constant, Constant),
    NotInRange(Constant, Constant),
    InSet(Vec<Constant>),
    NotInSet(Vec<Constant>),
    Present,
    NotPresent,
    Contains(Constant),
    NotContains(Constant),
}

/// Single comparison with no boolean structure left in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub field: String,
    pub accessor: Accessor,
    pub op: AtomOp,
}

impl Atom {
    /// Builds an atom from a leaf of the expression tree, rejecting operand
    /// combinations that have no meaning.
    pub(crate) fn from_leaf(expr: &MetaExpr) -> Result<Self, MqlError> {
        let atom = match expr {
            MetaExpr::Compare { scalar, op, value } => {
                let op = if op.is_pattern() {
                    let Constant::Str(source) = value else {
                        return Err(malformed(expr, "pattern operand must be a string"));
                    };
                    let case_insensitive = matches!(op, CmpOp::MatchCi | CmpOp::NotMatchCi);
                    let pattern = Pattern::compile(source, case_insensitive)
                        .map_err(|err| malformed(expr, &format!("invalid pattern: {err}")))?;
                    AtomOp::Match {
                        pattern,
                        negated: matches!(op, CmpOp::NotMatch | CmpOp::NotMatchCi),
                    }
                } else {
                    check_constant(expr, value)?;
                    if matches!(value, Constant::Bool(_)) && !matches!(op, CmpOp::Eq | CmpOp::Ne)
                    {
                        return Err(malformed(expr, "booleans only support = and !="));
                    }
                    AtomOp::Compare(*op, value.clone())
                };
                Self::scalar(expr, scalar, op)?
            }
            MetaExpr::InRange { scalar, low, high } | MetaExpr::NotInRange { scalar, low, high } => {
                check_constant(expr, low)?;
                check_constant(expr, high)?;
                let compatible = (low.is_numeric() && high.is_numeric())
                    || matches!((low, high), (Constant::Str(_), Constant::Str(_)));
                if !compatible {
                    return Err(malformed(
                        expr,
                        &format!(
                            "range bounds must both be numbers or both be strings, got {} and {}",
                            low.type_name(),
                            high.type_name()
                        ),
                    ));
                }
                let op = if matches!(expr, MetaExpr::InRange { .. }) {
                    AtomOp::InRange(low.clone(), high.clone())
                } else {
                    AtomOp::NotInRange(low.clone(), high.clone())
                };
                Self::scalar(expr, scalar, op)?
            }
            MetaExpr::InSet { scalar, values } | MetaExpr::NotInSet { scalar, values } => {
                if values.is_empty() {
                    return Err(malformed(expr, "set must not be empty"));
                }
                for value in values {
                    check_constant(expr, value)?;
                }
                let op = if matches!(expr, MetaExpr::InSet { .. }) {
                    AtomOp::InSet(values.clone())
                } else {
                    AtomOp::NotInSet(values.clone())
                };
                Self::scalar(expr, scalar, op)?
            }
            MetaExpr::Present { name } => Self::plain(expr, name, AtomOp::Present)?,
            MetaExpr::NotPresent { name } => Self::plain(expr, name, AtomOp::NotPresent)?,
            MetaExpr::ArrayContains { name, value } => {
                check_constant(expr, value)?;
                Self::plain(expr, name, AtomOp::Contains(value.clone()))?
            }
            MetaExpr::ArrayNotContains { name, value } => {
                check_constant(expr, value)?;
                Self::plain(expr, name, AtomOp::NotContains(value.clone()))?
            }
            MetaExpr::And(_) | MetaExpr::Or(_) | MetaExpr::Not(_) => {
                return Err(malformed(expr, "boolean operator is not an atom"))
            }
        };
        Ok(atom)
    }

    fn scalar(expr: &MetaExpr, scalar: &Scalar, op: AtomOp) -> Result<Self, MqlError> {
        check_field(expr, &scalar.name)?;
        if scalar.accessor == Accessor::Length {
            let integral = match &op {
                AtomOp::Compare(_, value) => matches!(value, Constant::Int(_)),
                AtomOp::InRange(low, high) | AtomOp::NotInRange(low, high) => {
                    matches!((low, high), (Constant::Int(_), Constant::Int(_)))
                }
                AtomOp::InSet(values) | AtomOp::NotInSet(values) => {
                    values.iter().all(|value| matches!(value, Constant::Int(_)))
                }
                _ => false,
            };
            if !integral {
                return Err(malformed(expr, "len() can only be compared with integers"));
            }
        }
        Ok(Self {
            field: scalar.name.clone(),
            accessor: scalar.accessor.clone(),
            op,
        })
    }

    fn plain(expr: &MetaExpr, name: &str, op: AtomOp) -> Result<Self, MqlError> {
        check_field(expr, name)?;
        Ok(Self {
            field: name.to_string(),
            accessor: Accessor::Value,
            op,
        })
    }

    /// Logical negation expressed as another atom; `[any]` and `[all]` swap.
    pub fn negate(&self) -> Self {
        let op = match &self.op {
            AtomOp::Compare(op, value) => AtomOp::Compare(op.negate(), value.clone()),
            AtomOp::Match { pattern, negated } => AtomOp::Match {
                pattern: pattern.clone(),
                negated: !negated,
            },
            AtomOp::InRange(low, high) => AtomOp::NotInRange(low.clone(), high.clone()),
            AtomOp::NotInRange(low, high) => AtomOp::InRange(low.clone(), high.clone()),
            AtomOp::InSet(values) => AtomOp::NotInSet(values.clone()),
            AtomOp::NotInSet(values) => AtomOp::InSet(values.clone()),
            AtomOp::Present => AtomOp::NotPresent,
            AtomOp::NotPresent => AtomOp::Present,
            AtomOp::Contains(value) => AtomOp::NotContains(value.clone()),
            AtomOp::NotContains(value) => AtomOp::Contains(value.clone()),
        };
        let accessor = match &self.accessor {
            Accessor::Any => Accessor::All,
            Accessor::All => Accessor::Any,
            other => other.clone(),
        };
        Self {
            field: self.field.clone(),
            accessor,
            op,
        }
    }

    /// Evaluates the atom against in-memory metadata. Absent fields never
    /// match, except for `not present`.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let value = metadata.get(&self.field);
        match &self.op {
            AtomOp::Present => return value.is_some(),
            AtomOp::NotPresent => return value.is_none(),
            AtomOp::Contains(constant) => {
                return matches!(value, Some(JsonValue::Array(items))
                    if items.iter().any(|item| equals(item, constant)))
            }
            AtomOp::NotContains(constant) => {
                return matches!(value, Some(JsonValue::Array(items))
                    if !items.iter().any(|item| equals(item, constant)))
            }
            _ => {}
        }
        let Some(value) = value else {
            return false;
        };
        match &self.accessor {
            Accessor::Value => self.test(value),
            Accessor::Index(index) => match value {
                JsonValue::Array(items) => {
                    element_at(items, *index).is_some_and(|item| self.test(item))
                }
                _ => false,
            },
            Accessor::Key(key) => match value {
                JsonValue::Object(map) => map.get(key).is_some_and(|item| self.test(item)),
                _ => false,
            },
            Accessor::Any => match value {
                JsonValue::Array(items) => items.iter().any(|item| self.test(item)),
                _ => false,
            },
            Accessor::All => match value {
                JsonValue::Array(items) => items.iter().all(|item| self.test(item)),
                _ => false,
            },
            Accessor::Length => match value {
                JsonValue::Array(items) => self.test(&JsonValue::from(items.len() as u64)),
                _ => false,
            },
        }
    }

    fn test(&self, value: &JsonValue) -> bool {
        match &self.op {
            AtomOp::Compare(op, constant) => {
                let Some(ordering) = compare(value, constant) else {
                    return false;
                };
                match op {
                    CmpOp::Eq => ordering == Ordering::Equal,
                    CmpOp::Ne => ordering != Ordering::Equal,
                    CmpOp::Lt => ordering == Ordering::Less,
                    CmpOp::Le => ordering != Ordering::Greater,
                    CmpOp::Gt => ordering == Ordering::Greater,
                    CmpOp::Ge => ordering != Ordering::Less,
                    CmpOp::Match | CmpOp::NotMatch | CmpOp::MatchCi | CmpOp::NotMatchCi => false,
                }
            }
            AtomOp::Match { pattern, negated } => match value {
                JsonValue::String(text) => pattern.is_match(text) != *negated,
                _ => false,
            },
            AtomOp::InRange(low, high) => {
                matches!(
                    (compare(value, low), compare(value, high)),
                    (Some(Ordering::Greater | Ordering::Equal), Some(Ordering::Less | Ordering::Equal))
                )
            }
            AtomOp::NotInRange(low, high) => {
                match (compare(value, low), compare(value, high)) {
                    (Some(below), Some(above)) => {
                        below == Ordering::Less || above == Ordering::Greater
                    }
                    _ => false,
                }
            }
            AtomOp::InSet(values) => values.iter().any(|constant| equals(value, constant)),
            AtomOp::NotInSet(values) => !values.iter().any(|constant| equals(value, constant)),
            AtomOp::Present | AtomOp::NotPresent | AtomOp::Contains(_) | AtomOp::NotContains(_) => {
                false
            }
        }
    }
}

fn element_at(items: &[JsonValue], index: i64) -> Option<&JsonValue> {
    if index >= 0 {
        items.get(usize::try_from(index).ok()?)
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        items.len().checked_sub(back).and_then(|at| items.get(at))
    }
}

/// Orders a JSON value against a constant of the same type family.
/// Values of a different type are incomparable.
pub(crate) fn compare(value: &JsonValue, constant: &Constant) -> Option<Ordering> {
    match (value, constant) {
        (JsonValue::Number(number), Constant::Int(expected)) => match number.as_i64() {
            Some(actual) => Some(actual.cmp(expected)),
            None => number.as_f64()?.partial_cmp(&(*expected as f64)),
        },
        (JsonValue::Number(number), Constant::Float(expected)) => {
            number.as_f64()?.partial_cmp(expected)
        }
        (JsonValue::String(actual), Constant::Str(expected)) => {
            Some(actual.as_str().cmp(expected.as_str()))
        }
        (JsonValue::Bool(actual), Constant::Bool(expected)) => Some(actual.cmp(expected)),
        _ => None,
    }
}

fn equals(value: &JsonValue, constant: &Constant) -> bool {
    compare(value, constant) == Some(Ordering::Equal)
}

fn check_field(expr: &MetaExpr, name: &str) -> Result<(), MqlError> {
    if name.is_empty() {
        return Err(malformed(expr, "field name is empty"));
    }
    Ok(())
}

fn check_constant(expr: &MetaExpr, value: &Constant) -> Result<(), MqlError> {
    if let Constant::Float(number) = value {
        if !number.is_finite() {
            return Err(malformed(expr, "floating point operand must be finite"));
        }
    }
    Ok(())
}

fn malformed(expr: &MetaExpr, reason: &str) -> MqlError {
    errors::malformed_predicate_error(&describe(expr), reason)
}

fn describe(expr: &MetaExpr) -> String {
    match expr {
        MetaExpr::Compare { scalar, op, value } => format!("{scalar} {} {value}", op.symbol()),
        MetaExpr::InRange { scalar, low, high } => format!("{scalar} in {low}:{high}"),
        MetaExpr::NotInRange { scalar, low, high } => format!("{scalar} not in {low}:{high}"),
        MetaExpr::InSet { scalar, values } => format!("{scalar} in ({})", join(values)),
        MetaExpr::NotInSet { scalar, values } => format!("{scalar} not in ({})", join(values)),
        MetaExpr::Present { name } => format!("{name} present"),
        MetaExpr::NotPresent { name } => format!("{name} not present"),
        MetaExpr::ArrayContains { name, value } => format!("{value} in {name}"),
        MetaExpr::ArrayNotContains { name, value } => format!("{value} not in {name}"),
        MetaExpr::And(_) => "and(...)".to_string(),
        MetaExpr::Or(_) => "or(...)".to_string(),
        MetaExpr::Not(_) => "!(...)".to_string(),
    }
}

fn join(values: &[Constant]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalar = Scalar {
            name: self.field.clone(),
            accessor: self.accessor.clone(),
        };
        match &self.op {
            AtomOp::Compare(op, value) => write!(f, "{scalar} {} {value}", op.symbol()),
            AtomOp::Match { pattern, negated } => {
                let symbol = match (negated, pattern.case_insensitive()) {
                    (false, false) => "~",
                    (false, true) => "~*",
                    (true, false) => "!~",
                    (true, true) => "!~*",
                };
                write!(f, "{scalar} {symbol} {:?}", pattern.source())
            }
            AtomOp::InRange(low, high) => write!(f, "{scalar} in {low}:{high}"),
            AtomOp::NotInRange(low, high) => write!(f, "{scalar} not in {low}:{high}"),
            AtomOp::InSet(values) => write!(f, "{scalar} in ({})", join(values)),
            AtomOp::NotInSet(values) => write!(f, "{scalar} not in ({})", join(values)),
            AtomOp::Present => write!(f, "{} present", self.field),
            AtomOp::NotPresent => write!(f, "{} not present", self.field),
            AtomOp::Contains(value) => write!(f, "{value} in {}", self.field),
            AtomOp::NotContains(value) => write!(f, "{value} not in {}", self.field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Atom;
    use crate::meta::{Accessor, CmpOp, Constant, MetaExpr, Scalar};
    use crate::record::Metadata;
    use serde_json::json;

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().expect("object")
    }

    fn atom(expr: MetaExpr) -> Atom {
        Atom::from_leaf(&expr).expect("valid atom")
    }

    #[test]
    fn comparisons_do_not_coerce_types() {
        let meta = metadata(json!({"run.number": 120, "run.type": "physics", "run.flag": true}));
        assert!(atom(MetaExpr::compare(Scalar::field("run.number"), CmpOp::Gt, 100)).matches(&meta));
        assert!(!atom(MetaExpr::compare(Scalar::field("run.number"), CmpOp::Gt, "100")).matches(&meta));
        assert!(atom(MetaExpr::compare(Scalar::field("run.number"), CmpOp::Eq, 120.0)).matches(&meta));
        assert!(atom(MetaExpr::eq("run.flag", true)).matches(&meta));
        assert!(!atom(MetaExpr::eq("run.flag", 1)).matches(&meta));
        assert!(!atom(MetaExpr::compare(Scalar::field("run.type"), CmpOp::Ne, 5)).matches(&meta));
    }

    #[test]
    fn missing_fields_only_satisfy_not_present() {
        let meta = Metadata::new();
        let leaves = vec![
            MetaExpr::eq("core.x", 1),
            MetaExpr::compare(Scalar::field("core.x"), CmpOp::Ne, 1),
            MetaExpr::NotInSet {
                scalar: Scalar::field("core.x"),
                values: vec![Constant::Int(1)],
            },
            MetaExpr::ArrayNotContains {
                name: "core.x".to_string(),
                value: Constant::Int(1),
            },
            MetaExpr::present("core.x"),
        ];
        for leaf in leaves {
            assert!(!atom(leaf.clone()).matches(&meta), "{leaf:?} matched missing");
        }
        assert!(atom(MetaExpr::NotPresent {
            name: "core.x".to_string()
        })
        .matches(&meta));
    }

    #[test]
    fn array_accessors() {
        let meta = metadata(json!({"core.runs": [7, 8, 9], "core.tags": {"a": "x"}}));
        let any = atom(MetaExpr::compare(Scalar::with("core.runs", Accessor::Any), CmpOp::Ge, 9));
        let all = atom(MetaExpr::compare(Scalar::with("core.runs", Accessor::All), CmpOp::Ge, 8));
        let last = atom(MetaExpr::eq_scalar(Scalar::with("core.runs", Accessor::Index(-1)), 9));
        let first = atom(MetaExpr::eq_scalar(Scalar::with("core.runs", Accessor::Index(0)), 7));
        let out_of_range = atom(MetaExpr::eq_scalar(Scalar::with("core.runs", Accessor::Index(5)), 7));
        let key = atom(MetaExpr::eq_scalar(
            Scalar::with("core.tags", Accessor::Key("a".to_string())),
            "x",
        ));
        let length = atom(MetaExpr::eq_scalar(Scalar::with("core.runs", Accessor::Length), 3));
        assert!(any.matches(&meta));
        assert!(!all.matches(&meta));
        assert!(last.matches(&meta));
        assert!(first.matches(&meta));
        assert!(!out_of_range.matches(&meta));
        assert!(key.matches(&meta));
        assert!(length.matches(&meta));
    }

    #[test]
    fn negation_swaps_quantifiers() {
        let leaf = atom(MetaExpr::compare(Scalar::with("core.runs", Accessor::Any), CmpOp::Lt, 5));
        let negated = leaf.negate();
        assert_eq!(negated.accessor, Accessor::All);
        assert_eq!(negated.to_string(), "core.runs[all] >= 5");
        assert_eq!(negated.negate(), leaf);
    }

    #[test]
    fn patterns_are_unanchored_and_may_ignore_case() {
        let meta = metadata(json!({"core.data_tier": "Full-Reconstructed"}));
        let exact = atom(MetaExpr::compare(Scalar::field("core.data_tier"), CmpOp::Match, "recon"));
        let folded = atom(MetaExpr::compare(Scalar::field("core.data_tier"), CmpOp::MatchCi, "recon"));
        assert!(!exact.matches(&meta));
        assert!(folded.matches(&meta));
        assert!(!folded.negate().matches(&meta));
    }

    #[test]
    fn rejects_malformed_operands() {
        let cases = vec![
            MetaExpr::compare(Scalar::field("x"), CmpOp::Lt, true),
            MetaExpr::compare(Scalar::field("x"), CmpOp::Match, 5),
            MetaExpr::compare(Scalar::field("x"), CmpOp::Match, "("),
            MetaExpr::compare(Scalar::with("x", Accessor::Length), CmpOp::Gt, "a"),
            MetaExpr::compare(Scalar::field("x"), CmpOp::Eq, f64::NAN),
            MetaExpr::InRange {
                scalar: Scalar::field("x"),
                low: Constant::Int(1),
                high: Constant::Str("z".to_string()),
            },
            MetaExpr::InSet {
                scalar: Scalar::field("x"),
                values: Vec::new(),
            },
            MetaExpr::eq("", 1),
        ];
        for case in cases {
            let err = Atom::from_leaf(&case).expect_err("should be rejected");
            assert_eq!(err.code, "MQL_ERROR_MALFORMED_PREDICATE", "{case:?}");
        }
    }
}
