use super::quote_literal;
use crate::backend::SqlDialect;
use crate::errors;
use crate::meta::{Accessor, Atom, AtomOp, CmpOp, Constant, Dnf, Pattern};
use crate::MqlError;

/// Renders a DNF as `(a and b) or (c)` over the JSON document in `column`.
/// Type guards make every atom false on missing fields and on values of a
/// different JSON type, matching the in-memory evaluator.
pub(crate) fn dnf_predicate_sql(
    dialect: SqlDialect,
    dnf: &Dnf,
    column: &str,
) -> Result<String, MqlError> {
    if dnf.is_never() {
        return Ok(bool_literal(dialect, false).to_string());
    }
    if dnf.is_always_true() {
        return Ok(bool_literal(dialect, true).to_string());
    }
    let mut disjuncts = Vec::with_capacity(dnf.conjunctions.len());
    for conjunction in &dnf.conjunctions {
        let atoms = conjunction
            .iter()
            .map(|atom| atom_sql(dialect, atom, column))
            .collect::<Result<Vec<_>, _>>()?;
        disjuncts.push(format!("({})", atoms.join(" and ")));
    }
    Ok(disjuncts.join(" or "))
}

const fn bool_literal(dialect: SqlDialect, value: bool) -> &'static str {
    match (dialect, value) {
        (SqlDialect::Sqlite, true) => "1",
        (SqlDialect::Sqlite, false) => "0",
        (SqlDialect::Postgres, true) => "true",
        (SqlDialect::Postgres, false) => "false",
    }
}

/// Where a JSON value lives, as SQL.
enum Location {
    /// SQLite document column plus a JSON path.
    Path { doc: String, path: String },
    /// Postgres jsonb expression.
    Jsonb(String),
}

impl Location {
    fn field(dialect: SqlDialect, column: &str, atom: &Atom) -> Result<Self, MqlError> {
        match dialect {
            SqlDialect::Sqlite => Ok(Self::Path {
                doc: column.to_string(),
                path: format!("$.{}", path_key(atom, &atom.field)?),
            }),
            SqlDialect::Postgres => Ok(Self::Jsonb(format!(
                "({column} -> {})",
                quote_literal(&atom.field)
            ))),
        }
    }

    fn index(self, index: i64) -> Self {
        match self {
            Self::Path { doc, path } if index < 0 => Self::Path {
                doc,
                path: format!("{path}[#{index}]"),
            },
            Self::Path { doc, path } => Self::Path {
                doc,
                path: format!("{path}[{index}]"),
            },
            Self::Jsonb(expr) => Self::Jsonb(format!("({expr} -> {index})")),
        }
    }

    fn key(self, atom: &Atom, key: &str) -> Result<Self, MqlError> {
        match self {
            Self::Path { doc, path } => Ok(Self::Path {
                doc,
                path: format!("{path}.{}", path_key(atom, key)?),
            }),
            Self::Jsonb(expr) => Ok(Self::Jsonb(format!("({expr} -> {})", quote_literal(key)))),
        }
    }

    fn kind(&self) -> String {
        match self {
            Self::Path { doc, path } => format!("json_type({doc}, {})", quote_literal(path)),
            Self::Jsonb(expr) => format!("jsonb_typeof({expr})"),
        }
    }

    fn slot(&self) -> Slot {
        match self {
            Self::Path { doc, path } => Slot::Sqlite {
                value: format!("json_extract({doc}, {})", quote_literal(path)),
                kind: self.kind(),
            },
            Self::Jsonb(expr) => Slot::Postgres {
                json: expr.clone(),
                kind: self.kind(),
            },
        }
    }

    fn is_array(&self) -> String {
        format!("{} = 'array'", self.kind())
    }

    /// `test` only runs on arrays; Postgres array functions raise on scalars.
    fn when_array(&self, test: String) -> String {
        match self {
            Self::Path { .. } => format!("{} and {test}", self.is_array()),
            Self::Jsonb(_) => format!("case when {} then {test} else false end", self.is_array()),
        }
    }

    fn length(&self) -> Slot {
        match self {
            Self::Path { doc, path } => Slot::Count(format!(
                "json_array_length({doc}, {})",
                quote_literal(path)
            )),
            Self::Jsonb(expr) => Slot::Count(format!("jsonb_array_length({expr})")),
        }
    }

    /// Quantified test over the array elements, each bound as a slot.
    fn elements(&self, condition: impl Fn(&Slot) -> String, quantifier: Quantifier) -> String {
        let (source, element) = match self {
            Self::Path { doc, path } => (
                format!("json_each({doc}, {}) e", quote_literal(path)),
                Slot::Sqlite {
                    value: "e.value".to_string(),
                    kind: "e.type".to_string(),
                },
            ),
            Self::Jsonb(expr) => (
                format!("jsonb_array_elements({expr}) e(v)"),
                Slot::Postgres {
                    json: "e.v".to_string(),
                    kind: "jsonb_typeof(e.v)".to_string(),
                },
            ),
        };
        let condition = condition(&element);
        let test = match quantifier {
            Quantifier::Some => format!("exists (select 1 from {source} where {condition})"),
            Quantifier::None => format!("not exists (select 1 from {source} where {condition})"),
            Quantifier::Every => {
                format!("not exists (select 1 from {source} where not ({condition}))")
            }
        };
        self.when_array(test)
    }
}

#[derive(Clone, Copy)]
enum Quantifier {
    Some,
    None,
    Every,
}

/// A single JSON scalar that a test is applied to.
enum Slot {
    Sqlite { value: String, kind: String },
    Postgres { json: String, kind: String },
    /// Integer produced by SQL itself, e.g. an array length.
    Count(String),
}

impl Slot {
    fn kind(&self) -> Option<&str> {
        match self {
            Self::Sqlite { kind, .. } | Self::Postgres { kind, .. } => Some(kind),
            Self::Count(_) => None,
        }
    }

    fn guard(&self, constant: &Constant) -> Option<String> {
        let kinds = match (self, constant) {
            (Self::Count(_), _) => return None,
            (Self::Sqlite { .. }, Constant::Int(_) | Constant::Float(_)) => "in ('integer', 'real')",
            (Self::Sqlite { .. }, Constant::Str(_)) => "= 'text'",
            (Self::Sqlite { .. }, Constant::Bool(_)) => "in ('true', 'false')",
            (Self::Postgres { .. }, Constant::Int(_) | Constant::Float(_)) => "= 'number'",
            (Self::Postgres { .. }, Constant::Str(_)) => "= 'string'",
            (Self::Postgres { .. }, Constant::Bool(_)) => "= 'boolean'",
        };
        self.kind().map(|kind| format!("{kind} {kinds}"))
    }

    fn typed(&self, constant: &Constant) -> String {
        match (self, constant) {
            (Self::Sqlite { value, .. } | Self::Count(value), _) => value.clone(),
            (Self::Postgres { json, .. }, Constant::Str(_)) => format!("({json} #>> '{{}}')"),
            (Self::Postgres { json, .. }, Constant::Bool(_)) => format!("({json})::boolean"),
            (Self::Postgres { json, .. }, _) => format!("({json})::numeric"),
        }
    }

    fn text(&self) -> String {
        match self {
            Self::Sqlite { value, .. } | Self::Count(value) => value.clone(),
            Self::Postgres { json, .. } => format!("({json} #>> '{{}}')"),
        }
    }

    fn compare(&self, op: CmpOp, constant: &Constant) -> String {
        if let (Self::Sqlite { kind, .. }, Constant::Bool(expected)) = (self, constant) {
            let wanted = match op {
                CmpOp::Ne => !expected,
                _ => *expected,
            };
            return format!("{kind} = '{wanted}'");
        }
        let comparison = format!("{} {} {}", self.typed(constant), sql_operator(op), literal(constant));
        self.guarded(self.guard(constant), comparison)
    }

    fn matches(&self, pattern: &Pattern, negated: bool) -> String {
        let test = match self {
            Self::Postgres { .. } => {
                let operator = match (negated, pattern.case_insensitive()) {
                    (false, false) => "~",
                    (false, true) => "~*",
                    (true, false) => "!~",
                    (true, true) => "!~*",
                };
                format!("{} {operator} {}", self.text(), quote_literal(pattern.source()))
            }
            Self::Sqlite { .. } | Self::Count(_) => {
                let source = if pattern.case_insensitive() {
                    format!("(?i){}", pattern.source())
                } else {
                    pattern.source().to_string()
                };
                let test = format!("{} regexp {}", self.text(), quote_literal(&source));
                if negated {
                    format!("not ({test})")
                } else {
                    test
                }
            }
        };
        self.guarded(self.guard(&Constant::Str(String::new())), test)
    }

    fn range(&self, low: &Constant, high: &Constant, inside: bool) -> String {
        let low_value = self.typed(low);
        let high_value = self.typed(high);
        let test = if inside {
            format!(
                "{low_value} >= {} and {high_value} <= {}",
                literal(low),
                literal(high)
            )
        } else {
            format!(
                "({low_value} < {} or {high_value} > {})",
                literal(low),
                literal(high)
            )
        };
        self.guarded(self.guard(low), test)
    }

    fn in_set(&self, values: &[Constant]) -> String {
        let alternatives = values
            .iter()
            .map(|value| format!("({})", self.compare(CmpOp::Eq, value)))
            .collect::<Vec<_>>()
            .join(" or ");
        format!("({alternatives})")
    }

    fn not_in_set(&self, values: &[Constant]) -> String {
        let membership = format!("not {}", self.in_set(values));
        match self.kind() {
            Some(kind) => format!("{kind} is not null and {membership}"),
            None => membership,
        }
    }

    /// Postgres may evaluate `and` operands in any order, so a cast behind a
    /// type guard must sit inside `case` to never see the wrong JSON type.
    fn guarded(&self, guard: Option<String>, test: String) -> String {
        match (self, guard) {
            (_, None) => test,
            (Self::Postgres { .. }, Some(guard)) => {
                format!("case when {guard} then {test} else false end")
            }
            (_, Some(guard)) => format!("{guard} and {test}"),
        }
    }

    fn test(&self, op: &AtomOp) -> String {
        match op {
            AtomOp::Compare(op, constant) => self.compare(*op, constant),
            AtomOp::Match { pattern, negated } => self.matches(pattern, *negated),
            AtomOp::InRange(low, high) => self.range(low, high, true),
            AtomOp::NotInRange(low, high) => self.range(low, high, false),
            AtomOp::InSet(values) => self.in_set(values),
            AtomOp::NotInSet(values) => self.not_in_set(values),
            AtomOp::Contains(value) => self.compare(CmpOp::Eq, value),
            AtomOp::NotContains(value) => format!("not ({})", self.compare(CmpOp::Eq, value)),
            AtomOp::Present | AtomOp::NotPresent => match self.kind() {
                Some(kind) => format!("{kind} is not null"),
                None => "1 = 1".to_string(),
            },
        }
    }
}

fn atom_sql(dialect: SqlDialect, atom: &Atom, column: &str) -> Result<String, MqlError> {
    let location = Location::field(dialect, column, atom)?;
    let sql = match &atom.op {
        AtomOp::Present => format!("{} is not null", location.kind()),
        AtomOp::NotPresent => format!("{} is null", location.kind()),
        AtomOp::Contains(value) => location.elements(
            |element| element.compare(CmpOp::Eq, value),
            Quantifier::Some,
        ),
        AtomOp::NotContains(value) => location.elements(
            |element| element.compare(CmpOp::Eq, value),
            Quantifier::None,
        ),
        op => match &atom.accessor {
            Accessor::Value => location.slot().test(op),
            Accessor::Index(index) => location.index(*index).slot().test(op),
            Accessor::Key(key) => location.key(atom, key)?.slot().test(op),
            Accessor::Any => location.elements(|element| element.test(op), Quantifier::Some),
            Accessor::All => location.elements(|element| element.test(op), Quantifier::Every),
            Accessor::Length => location.when_array(location.length().test(op)),
        },
    };
    Ok(format!("({sql})"))
}

fn path_key(atom: &Atom, key: &str) -> Result<String, MqlError> {
    if key.contains('"') {
        return Err(errors::malformed_predicate_error(
            &atom.to_string(),
            "metadata keys containing `\"` cannot be addressed in SQL",
        ));
    }
    Ok(format!("\"{key}\""))
}

const fn sql_operator(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::Ne => "<>",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        CmpOp::Match | CmpOp::NotMatch | CmpOp::MatchCi | CmpOp::NotMatchCi => "=",
    }
}

fn literal(constant: &Constant) -> String {
    match constant {
        Constant::Bool(value) => value.to_string(),
        Constant::Int(value) => value.to_string(),
        Constant::Float(value) => format!("{value:?}"),
        Constant::Str(value) => quote_literal(value),
    }
}
