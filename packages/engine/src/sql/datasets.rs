//! Dataset queries. Rows are `(namespace, name, metadata)`.

use super::quote_literal;
use crate::backend::SqlDialect;
use crate::tree::DatasetSelector;

pub(crate) fn dataset_ref_sql(
    dialect: SqlDialect,
    namespace: &str,
    selector: &DatasetSelector,
) -> String {
    let name_match = if selector.pattern {
        match dialect {
            SqlDialect::Sqlite => format!("d.name glob {}", quote_literal(&selector.name)),
            SqlDialect::Postgres => format!(
                "d.name like {} escape '\\'",
                quote_literal(&glob_to_like(&selector.name))
            ),
        }
    } else {
        format!("d.name = {}", quote_literal(&selector.name))
    };
    let base = format!(
        "select d.namespace, d.name, d.metadata from datasets d \
         where d.namespace = {} and {name_match}",
        quote_literal(namespace)
    );
    if !selector.with_children {
        return base;
    }
    let members = if selector.recursively {
        format!(
            "with recursive closure(namespace, name) as (\
             select b.namespace, b.name from ({base}) b \
             union select pc.child_namespace, pc.child_name from datasets_parent_child pc \
             join closure c on pc.parent_namespace = c.namespace and pc.parent_name = c.name) \
             select namespace, name from closure"
        )
    } else {
        format!(
            "select b.namespace, b.name from ({base}) b \
             union select pc.child_namespace, pc.child_name from datasets_parent_child pc \
             join ({base}) p on pc.parent_namespace = p.namespace and pc.parent_name = p.name"
        )
    };
    format!(
        "select d.namespace, d.name, d.metadata from datasets d \
         where exists (select 1 from ({members}) x where x.namespace = d.namespace and x.name = d.name)"
    )
}

/// `predicate` is a boolean expression over `d.metadata`.
pub(crate) fn dataset_having_sql(inner: &str, predicate: &str) -> String {
    format!("select d.namespace, d.name, d.metadata from ({inner}) d where {predicate}")
}

pub(crate) fn dataset_union_sql(parts: &[String]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| format!("select * from ({part}) u{index}"))
        .collect::<Vec<_>>()
        .join(" union ")
}

fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{dataset_ref_sql, dataset_union_sql, glob_to_like};
    use crate::backend::SqlDialect;
    use crate::tree::DatasetSelector;

    fn selector(name: &str) -> DatasetSelector {
        DatasetSelector {
            namespace: None,
            name: name.to_string(),
            pattern: false,
            with_children: false,
            recursively: false,
        }
    }

    #[test]
    fn exact_reference() {
        assert_eq!(
            dataset_ref_sql(SqlDialect::Sqlite, "test", &selector("ds1")),
            "select d.namespace, d.name, d.metadata from datasets d \
             where d.namespace = 'test' and d.name = 'ds1'"
        );
    }

    #[test]
    fn patterns_per_dialect() {
        let mut glob = selector("run_*");
        glob.pattern = true;
        assert!(dataset_ref_sql(SqlDialect::Sqlite, "test", &glob).contains("d.name glob 'run_*'"));
        assert!(dataset_ref_sql(SqlDialect::Postgres, "test", &glob)
            .contains("d.name like 'run\\_%' escape '\\'"));
        assert_eq!(glob_to_like("a?b%"), "a_b\\%");
    }

    #[test]
    fn children_one_hop_or_recursive() {
        let mut one = selector("top");
        one.with_children = true;
        let sql = dataset_ref_sql(SqlDialect::Sqlite, "test", &one);
        assert!(!sql.contains("with recursive"));
        assert!(sql.contains("from datasets_parent_child pc join (select"));
        one.recursively = true;
        let sql = dataset_ref_sql(SqlDialect::Postgres, "test", &one);
        assert!(sql.contains("with recursive closure(namespace, name) as ("));
    }

    #[test]
    fn union_of_parts() {
        let parts = vec!["select 1".to_string(), "select 2".to_string()];
        assert_eq!(
            dataset_union_sql(&parts),
            "select * from (select 1) u0 union select * from (select 2) u1"
        );
    }
}
