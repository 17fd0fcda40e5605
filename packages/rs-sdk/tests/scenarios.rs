#[macro_use]
mod support;

use std::sync::Arc;

use mql_engine::filter::RunHistoryAnnotator;
use mql_engine::meta::{CmpOp, MetaExpr, Scalar};
use mql_engine::{
    Compiled, ErrorKind, FileList, FilterInvocation, FilterRegistry, MetaStore,
    NamedQueryRegistry, Node, QueryOptions, QueryOutput, Summary, SummaryOutput,
};
use mql_rs_sdk::{open_catalog, OpenCatalogConfig, SqliteStore, Value};
use support::{
    as_records, every_nth, fid_set, id_set, ids, records, seeded_catalog, seeded_catalog_with,
};

fn ds(name: &str) -> Node {
    Node::files_from(Node::dataset("test", name))
}

#[test]
fn fresh_catalog_has_the_schema_but_no_files() {
    let catalog = open_catalog(OpenCatalogConfig::default()).expect("opens");
    assert!(ids(&catalog, &Node::files()).is_empty());
    assert_eq!(
        catalog
            .summary(&Node::files(), Summary::Count, &QueryOptions::default())
            .expect("counts"),
        SummaryOutput::Count {
            count: 0,
            total_size: 0
        }
    );
}

#[test]
fn dataset_selection_with_filter_wraps_exactly_once() {
    let catalog = seeded_catalog();
    let options = QueryOptions::default();
    let Compiled::Sql(base) = catalog.compile(&ds("ds1"), &options).expect("compiles") else {
        panic!("dataset selection must stay in sql");
    };
    let filtered = ds("ds1").with_meta(MetaExpr::compare(
        Scalar::field("run.number"),
        CmpOp::Gt,
        100,
    ));
    let Compiled::Sql(wrapped) = catalog.compile(&filtered, &options).expect("compiles") else {
        panic!("filtered selection must stay in sql");
    };
    let prefix = format!("from ({}) t where ", base.text.replace("null as metadata", "f.metadata"));
    assert!(wrapped.text.starts_with("select t.id"));
    assert_eq!(wrapped.text.matches(" t where ").count(), 1);
    assert!(wrapped.text.contains(&prefix), "{}", wrapped.text);
    assert_eq!(id_set(&catalog, &filtered), fid_set(&[4, 5, 6]));
}

#[test]
fn union_of_id_list_and_filter_output() {
    let catalog = seeded_catalog();
    let node = Node::Union(vec![
        Node::fids(["f01", "f02"]),
        every_nth(2, ds("ds2")),
    ]);
    let compiled = catalog.compile(&node, &QueryOptions::default()).expect("compiles");
    assert!(!compiled.is_sql());
    assert_eq!(id_set(&catalog, &node), fid_set(&[1, 2, 4, 6, 8]));
}

#[test]
fn limit_five_skip_two_matches_positions_two_to_seven() {
    let catalog = seeded_catalog();
    let full = ids(&catalog, &ds("ds1"));
    let window = ds("ds1").skip(2).limit(5);
    assert_eq!(ids(&catalog, &window), full[2..6].to_vec());
    let everything = ids(&catalog, &Node::files());
    assert_eq!(
        ids(&catalog, &Node::files().skip(2).limit(5)),
        everything[2..7].to_vec()
    );
}

#[test]
fn materialized_rows_give_the_same_answer() {
    let catalog = seeded_catalog();
    let operators: [fn(Node) -> Node; 5] = [
        |node: Node| node.parents(),
        |node: Node| node.children(),
        |node: Node| node.skip(1).limit(2),
        |node: Node| node.with_meta(MetaExpr::eq("core.data_tier", "reco")),
        |node: Node| Node::minus(node, Node::fids(["f04"])),
    ];
    for operator in operators {
        let direct = ids(&catalog, &operator(ds("ds1")));
        let materialized = ids(&catalog, &operator(as_records(ds("ds1"))));
        assert_eq!(direct, materialized);
    }
}

#[test]
fn retired_files_need_an_explicit_opt_in() {
    let catalog = seeded_catalog();
    assert!(!ids(&catalog, &Node::files()).contains(&"f10".to_string()));
    let options = QueryOptions {
        include_retired_files: true,
        ..QueryOptions::default()
    };
    let all = records(&catalog, &Node::files(), &options);
    assert_eq!(all.len(), 10);
    assert_eq!(ids(&catalog, &Node::fids(["f10"])), vec!["f10"]);
}

#[test]
fn names_and_dids_resolve_against_the_default_namespace() {
    let catalog = seeded_catalog();
    let options = QueryOptions {
        default_namespace: Some("test".to_string()),
        ..QueryOptions::default()
    };
    let node = Node::FileList(mql_engine::FileList::Dids(vec![
        "f01.root".to_string(),
        "test:f02.root".to_string(),
    ]));
    let found: Vec<String> = records(&catalog, &node, &options)
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(found, vec!["f01", "f02"]);

    let err = catalog
        .files(&node, &QueryOptions::default())
        .expect_err("no default namespace");
    assert_eq!(err.kind, ErrorKind::Compilation);
}

#[test]
fn requested_columns_are_populated() {
    let catalog = seeded_catalog();
    let options = QueryOptions {
        with_meta: true,
        with_provenance: true,
        ..QueryOptions::default()
    };
    let rows = records(&catalog, &Node::fids(["f04"]), &options);
    let record = &rows[0];
    assert_eq!(record.metadata.get("run.number"), Some(&serde_json::json!(120)));
    let mut parents = record.parents.clone().expect("parents requested");
    parents.sort();
    assert_eq!(parents, vec!["f01", "f02"]);
    assert_eq!(record.children.clone().expect("children requested"), vec!["f07"]);

    let bare = records(&catalog, &as_records(Node::fids(["f04"])), &QueryOptions::default());
    assert!(bare[0].metadata.is_empty());
    assert!(bare[0].parents.is_none());
}

#[test]
fn named_queries_splice_and_cycles_fail() {
    let mut named = NamedQueryRegistry::new();
    named
        .insert_node("test", "early", &ds("ds1").limit(3))
        .expect("stores");
    named
        .insert_node("test", "loop_a", &Node::named("test", "loop_b"))
        .expect("stores");
    named
        .insert_node("test", "loop_b", &Node::Union(vec![Node::named("test", "loop_a")]))
        .expect("stores");
    let catalog = seeded_catalog_with(FilterRegistry::with_builtins(), named);
    assert_eq!(
        ids(&catalog, &Node::named("test", "early")),
        vec!["f01", "f02", "f03"]
    );

    let err = catalog
        .files(&Node::named("test", "loop_a"), &QueryOptions::default())
        .expect_err("cycle");
    assert_eq!(err.kind, ErrorKind::Compilation);
    assert!(err.description.contains("named query cycle"));

    let QueryOutput::NamedQueries(found) = catalog
        .query(
            &Node::NamedQueries {
                namespace: Some("test".to_string()),
                pattern: Some("loop_*".to_string()),
            },
            &QueryOptions::default(),
        )
        .expect("search")
    else {
        panic!("expected named queries");
    };
    assert_eq!(found.len(), 2);
}

#[test]
fn unknown_filter_is_a_compilation_error() {
    let catalog = seeded_catalog();
    let node = Node::Union(vec![
        Node::fids(["f01"]),
        Node::filter("myfilter", vec![ds("ds2")]),
    ]);
    let err = catalog
        .files(&node, &QueryOptions::default())
        .expect_err("unknown filter");
    assert_eq!(err.kind, ErrorKind::Compilation);
    assert_eq!(err.description, "unknown filter myfilter");
    // the catalog stays usable
    assert_eq!(ids(&catalog, &Node::fids(["f01"])), vec!["f01"]);
}

#[test]
fn filter_parameter_errors_surface_when_pulled() {
    let catalog = seeded_catalog();
    let node = every_nth(0, ds("ds1"));
    let mut files = catalog
        .files(&node, &QueryOptions::default())
        .expect("compiles")
        .into_iter();
    let err = files.next().expect("one item").expect_err("bad parameter");
    assert_eq!(err.kind, ErrorKind::Execution);
    assert_eq!(err.code, "MQL_ERROR_FILTER_FAILURE");
}

backing_test!(semicolons_inside_literals_reach_the_store, |catalog, backing| {
    catalog
        .store()
        .execute(
            "insert into files (id, namespace, name, size, metadata, retired) \
             values (?, 'test', ?, 7, ?, 0)",
            &[
                Value::Text("x;1".to_string()),
                Value::Text("a;b.root".to_string()),
                Value::Text(r#"{"core.note":"a;b"}"#.to_string()),
            ],
        )
        .expect("insert");
    let by_id = backing.operand(1, Node::fids(["x;1"]));
    assert_eq!(ids(&catalog, &by_id), vec!["x;1"]);
    let by_name = backing.operand(
        1,
        Node::FileList(FileList::Names {
            namespace: Some("test".to_string()),
            names: vec!["a;b.root".to_string()],
        }),
    );
    assert_eq!(ids(&catalog, &by_name), vec!["x;1"]);
    let by_note = backing
        .operand(1, Node::files())
        .with_meta(MetaExpr::eq("core.note", "a;b"));
    assert_eq!(ids(&catalog, &by_note), vec!["x;1"]);
    let by_pattern = backing
        .operand(1, Node::files())
        .with_meta(MetaExpr::compare(Scalar::field("core.note"), CmpOp::Match, "^a;"));
    assert_eq!(ids(&catalog, &by_pattern), vec!["x;1"]);
});

backing_test!(count_reports_files_and_sizes, |catalog, backing| {
    let node = backing.operand(1, ds("ds1"));
    let summary = catalog
        .summary(&node, Summary::Count, &QueryOptions::default())
        .expect("counts");
    assert_eq!(
        summary,
        SummaryOutput::Count {
            count: 6,
            total_size: 2100
        }
    );
});

backing_test!(keys_lists_top_level_metadata_keys, |catalog, backing| {
    let node = backing.operand(1, Node::fids(["f01", "f03"]));
    let SummaryOutput::Keys(keys) = catalog
        .summary(&node, Summary::Keys, &QueryOptions::default())
        .expect("keys")
    else {
        panic!("expected keys");
    };
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    assert_eq!(keys, vec!["core.data_tier", "core.runs", "run.number", "tags"]);
});

#[test]
fn dataset_queries_cover_globs_children_and_having() {
    let catalog = seeded_catalog();
    let datasets = |node: Node| -> Vec<String> {
        let QueryOutput::Datasets(found) =
            catalog.query(&node, &QueryOptions::default()).expect("runs")
        else {
            panic!("expected datasets");
        };
        let mut names: Vec<String> = found.into_iter().map(|dataset| dataset.name).collect();
        names.sort();
        names
    };
    let glob = |pattern: &str, with_children: bool, recursively: bool| {
        Node::DatasetRef(mql_engine::DatasetSelector {
            namespace: Some("test".to_string()),
            name: pattern.to_string(),
            pattern: pattern.contains('*'),
            with_children,
            recursively,
        })
    };
    assert_eq!(datasets(glob("ds*", false, false)), vec!["ds1", "ds2", "ds3"]);
    assert_eq!(datasets(glob("top", true, false)), vec!["ds1", "top"]);
    assert_eq!(datasets(glob("top", true, true)), vec!["ds1", "ds3", "top"]);
    assert_eq!(
        datasets(Node::DatasetHaving {
            query: Box::new(glob("ds*", false, false)),
            expr: MetaExpr::eq("owner", "ana"),
        }),
        vec!["ds1", "ds3"]
    );
    assert_eq!(
        datasets(Node::DatasetUnion(vec![
            glob("ds2", false, false),
            glob("ds3", false, false),
        ])),
        vec!["ds2", "ds3"]
    );
    let recursive_files = Node::files_from(glob("top", true, true));
    assert_eq!(
        id_set(&catalog, &recursive_files),
        fid_set(&[1, 2, 3, 4, 5, 6, 9])
    );
}

#[test]
fn store_errors_carry_the_fragment_only_in_debug_mode() {
    let catalog = seeded_catalog();
    catalog
        .store()
        .execute("drop table parent_child", &[])
        .expect("drop");
    let node = Node::fids(["f01"]).children();
    let quiet = catalog
        .files(&node, &QueryOptions::default())
        .expect("compiles")
        .into_iter()
        .next()
        .expect("one item")
        .expect_err("missing table");
    assert_eq!(quiet.kind, ErrorKind::Execution);
    assert!(quiet.description.starts_with("children_of"));
    assert!(!quiet.description.contains("-- fragment --"));

    let debug = QueryOptions {
        debug: true,
        ..QueryOptions::default()
    };
    let verbose = catalog
        .files(&node, &debug)
        .expect("compiles")
        .into_iter()
        .next()
        .expect("one item")
        .expect_err("missing table");
    assert!(verbose.description.contains("-- fragment --"));
    assert!(verbose.description.contains("parent_child"));
}

#[test]
fn run_history_annotates_from_a_second_store() {
    let annotator = RunHistoryAnnotator::new(Arc::new(history_store()), "runs_history", "run");
    let catalog = seeded_catalog_with(
        FilterRegistry::with_builtins().with("runs_history", Arc::new(annotator)),
        NamedQueryRegistry::new(),
    );
    let node = Node::Filter(FilterInvocation {
        name: "runs_history".to_string(),
        positional: Vec::new(),
        keyword: Default::default(),
        queries: vec![Node::fids(["f01", "f02", "f03"])],
    })
    .with_meta(MetaExpr::eq("runs_history.detector", "np04"));
    let options = QueryOptions {
        with_meta: true,
        ..QueryOptions::default()
    };
    let annotated = records(&catalog, &node, &options);
    assert_eq!(annotated.len(), 1);
    assert_eq!(annotated[0].id, "f01");
    assert_eq!(
        annotated[0].metadata.get("runs_history.beam"),
        Some(&serde_json::json!(6.5))
    );
}

fn history_store() -> SqliteStore {
    let history = SqliteStore::in_memory().expect("opens");
    history
        .execute(
            "create table runs_history (run integer, detector text, beam real)",
            &[],
        )
        .expect("ddl");
    for (run, detector) in [(1001, "np04"), (1002, "np02")] {
        history
            .execute(
                "insert into runs_history (run, detector, beam) values (?, ?, 6.5)",
                &[Value::Integer(run), Value::Text(detector.to_string())],
            )
            .expect("insert");
    }
    history
}
