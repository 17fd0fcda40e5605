#![allow(dead_code)]

use std::collections::BTreeSet;

use mql_engine::meta::Constant;
use mql_engine::{
    init_schema, open_engine, Engine, EngineConfig, FilterInvocation, FilterRegistry, MetaStore,
    NamedQueryRegistry, Node, QueryOptions, Record, Value,
};
use mql_rs_sdk::SqliteStore;
use serde_json::json;

/// Runs one test body once per operand backing.
macro_rules! backing_test {
    ($name:ident, |$catalog:ident, $backing:ident| $body:expr) => {
        paste::paste! {
            #[test]
            fn [<$name _sql>]() {
                let $catalog = $crate::support::seeded_catalog();
                let $backing = $crate::support::Backing::Sql;
                $body
            }

            #[test]
            fn [<$name _records>]() {
                let $catalog = $crate::support::seeded_catalog();
                let $backing = $crate::support::Backing::Records;
                $body
            }

            #[test]
            fn [<$name _mixed>]() {
                let $catalog = $crate::support::seeded_catalog();
                let $backing = $crate::support::Backing::Mixed;
                $body
            }
        }
    };
}

/// How an operand is handed to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Sql,
    Records,
    /// Odd operands as records, even operands as SQL.
    Mixed,
}

impl Backing {
    pub fn operand(self, index: usize, node: Node) -> Node {
        match self {
            Self::Sql => node,
            Self::Records => as_records(node),
            Self::Mixed if index % 2 == 1 => as_records(node),
            Self::Mixed => node,
        }
    }
}

/// Same rows, but produced by a filter so the compiler cannot keep SQL.
pub fn as_records(node: Node) -> Node {
    every_nth(1, node)
}

pub fn every_nth(n: i64, node: Node) -> Node {
    Node::Filter(FilterInvocation {
        name: "every_nth".to_string(),
        positional: vec![Constant::Int(n)],
        keyword: Default::default(),
        queries: vec![node],
    })
}

pub fn fid(index: usize) -> String {
    format!("f{index:02}")
}

/// Ten files `f01..f10` in namespace `test`; `f10` is retired.
///
/// - `run.number` is `30 * i`, `core.data_tier` alternates `raw`/`reco`,
///   `core.runs` is `[1000 + i]`, every third file has `tags`.
/// - `test:ds1` holds `f01..f06`, `test:ds2` holds `f04..f08`,
///   `test:ds3` holds `f09`; `test:top -> test:ds1 -> test:ds3`.
/// - provenance: `f01 -> f03`, `f01 -> f04`, `f02 -> f04`, `f04 -> f07`,
///   `f05 -> f07`.
pub fn seeded_catalog() -> Engine {
    seeded_catalog_with(FilterRegistry::with_builtins(), NamedQueryRegistry::new())
}

pub fn seeded_catalog_with(filters: FilterRegistry, named_queries: NamedQueryRegistry) -> Engine {
    let mut config = EngineConfig::new(Box::new(seeded_store()));
    config.filters = filters;
    config.named_queries = named_queries;
    open_engine(config).expect("engine opens")
}

/// The seeded catalog plus `g01..g05`, whose metadata mixes booleans, floats,
/// nulls, nested objects and heterogeneous arrays under `flag`, `energy`,
/// `note`, `detector` and `mixed`.
pub fn typed_catalog() -> Engine {
    let store = seeded_store();
    let typed = [
        json!({
            "flag": true,
            "energy": 1.5,
            "detector": { "name": "np04", "slot": 3, "ok": true },
            "mixed": [1, "a", true, null, 2.5, [1], { "k": 1 }],
            "note": null
        }),
        json!({
            "flag": false,
            "energy": 2,
            "detector": { "name": "np02", "slot": "3" },
            "mixed": ["b", 2, false],
            "note": "x"
        }),
        json!({
            "flag": "true",
            "energy": "1.5",
            "detector": "np04",
            "mixed": [],
            "note": 0
        }),
        json!({
            "flag": null,
            "energy": -0.5,
            "detector": { "ok": false },
            "mixed": [null, 3.25],
            "note": [null]
        }),
        json!({ "mixed": "a" }),
    ];
    for (index, metadata) in typed.iter().enumerate() {
        let id = format!("g{:02}", index + 1);
        insert_file(&store, &id, 10, metadata, false);
    }
    open_engine(EngineConfig::new(Box::new(store))).expect("engine opens")
}

fn seeded_store() -> SqliteStore {
    let store = SqliteStore::in_memory().expect("sqlite opens");
    init_schema(&store).expect("schema");
    for index in 1..=10 {
        let tier = if index % 2 == 1 { "raw" } else { "reco" };
        let mut metadata = json!({
            "run.number": 30 * index,
            "core.data_tier": tier,
            "core.runs": [1000 + index],
        });
        if index % 3 == 0 {
            metadata["tags"] = json!(["calib", format!("t{index}")]);
        }
        insert_file(&store, &fid(index), (100 * index) as i64, &metadata, index == 10);
    }
    for (name, metadata) in [
        ("ds1", json!({ "owner": "ana", "priority": 2 })),
        ("ds2", json!({ "owner": "ben", "priority": 5 })),
        ("ds3", json!({ "owner": "ana" })),
        ("top", json!({})),
    ] {
        exec(
            &store,
            "insert into datasets (namespace, name, metadata) values ('test', ?, ?)",
            &[text(name), text(&metadata.to_string())],
        );
    }
    let members = [("ds1", 1..=6), ("ds2", 4..=8), ("ds3", 9..=9)];
    for (dataset, range) in members {
        for index in range {
            exec(
                &store,
                "insert into files_datasets (file_id, dataset_namespace, dataset_name) values (?, 'test', ?)",
                &[text(&fid(index)), text(dataset)],
            );
        }
    }
    for (parent, child) in [("top", "ds1"), ("ds1", "ds3")] {
        exec(
            &store,
            "insert into datasets_parent_child (parent_namespace, parent_name, child_namespace, child_name) \
             values ('test', ?, 'test', ?)",
            &[text(parent), text(child)],
        );
    }
    for (parent, child) in [(1, 3), (1, 4), (2, 4), (4, 7), (5, 7)] {
        exec(
            &store,
            "insert into parent_child (parent_id, child_id) values (?, ?)",
            &[text(&fid(parent)), text(&fid(child))],
        );
    }
    store
}

fn insert_file(store: &SqliteStore, id: &str, size: i64, metadata: &serde_json::Value, retired: bool) {
    exec(
        store,
        "insert into files (id, namespace, name, size, metadata, retired) values (?, 'test', ?, ?, ?, ?)",
        &[
            text(id),
            text(&format!("{id}.root")),
            Value::Integer(size),
            text(&metadata.to_string()),
            Value::Integer(i64::from(retired)),
        ],
    );
}

fn exec(store: &SqliteStore, sql: &str, params: &[Value]) {
    store.execute(sql, params).expect("fixture statement");
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn records(engine: &Engine, node: &Node, options: &QueryOptions) -> Vec<Record> {
    engine
        .files(node, options)
        .expect("compiles")
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("executes")
}

/// Ids in the order the query produced them.
pub fn ids(engine: &Engine, node: &Node) -> Vec<String> {
    records(engine, node, &QueryOptions::default())
        .into_iter()
        .map(|record| record.id)
        .collect()
}

pub fn id_set(engine: &Engine, node: &Node) -> BTreeSet<String> {
    let ids = ids(engine, node);
    let set: BTreeSet<String> = ids.iter().cloned().collect();
    assert_eq!(set.len(), ids.len(), "duplicate ids in {ids:?}");
    set
}

pub fn fid_set(indices: &[usize]) -> BTreeSet<String> {
    indices.iter().map(|index| fid(*index)).collect()
}
