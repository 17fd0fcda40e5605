use tracing::debug;

use crate::backend::{MetaStore, SqlDialect};
use crate::MqlError;

const SQLITE_SCHEMA: &[&str] = &[
    "create table if not exists files (\
     id text primary key, \
     namespace text not null, \
     name text not null, \
     size integer, \
     metadata text not null default '{}', \
     retired integer not null default 0, \
     unique (namespace, name))",
    "create table if not exists datasets (\
     namespace text not null, \
     name text not null, \
     metadata text not null default '{}', \
     description text, \
     primary key (namespace, name))",
    "create table if not exists files_datasets (\
     file_id text not null references files(id), \
     dataset_namespace text not null, \
     dataset_name text not null, \
     primary key (file_id, dataset_namespace, dataset_name))",
    "create table if not exists parent_child (\
     parent_id text not null references files(id), \
     child_id text not null references files(id), \
     primary key (parent_id, child_id))",
    "create index if not exists parent_child_child on parent_child (child_id)",
    "create table if not exists datasets_parent_child (\
     parent_namespace text not null, \
     parent_name text not null, \
     child_namespace text not null, \
     child_name text not null, \
     primary key (parent_namespace, parent_name, child_namespace, child_name))",
    "create view if not exists files_with_provenance as \
     select f.id, f.namespace, f.name, f.size, f.metadata, f.retired, \
     (select json_group_array(pc.parent_id) from parent_child pc where pc.child_id = f.id) as parents, \
     (select json_group_array(pc.child_id) from parent_child pc where pc.parent_id = f.id) as children \
     from files f",
];

const POSTGRES_SCHEMA: &[&str] = &[
    "create table if not exists files (\
     id text primary key, \
     namespace text not null, \
     name text not null, \
     size bigint, \
     metadata jsonb not null default '{}', \
     retired boolean not null default false, \
     unique (namespace, name))",
    "create table if not exists datasets (\
     namespace text not null, \
     name text not null, \
     metadata jsonb not null default '{}', \
     description text, \
     primary key (namespace, name))",
    "create table if not exists files_datasets (\
     file_id text not null references files(id), \
     dataset_namespace text not null, \
     dataset_name text not null, \
     primary key (file_id, dataset_namespace, dataset_name))",
    "create table if not exists parent_child (\
     parent_id text not null references files(id), \
     child_id text not null references files(id), \
     primary key (parent_id, child_id))",
    "create index if not exists parent_child_child on parent_child (child_id)",
    "create table if not exists datasets_parent_child (\
     parent_namespace text not null, \
     parent_name text not null, \
     child_namespace text not null, \
     child_name text not null, \
     primary key (parent_namespace, parent_name, child_namespace, child_name))",
    "create or replace view files_with_provenance as \
     select f.id, f.namespace, f.name, f.size, f.metadata, f.retired, \
     coalesce((select jsonb_agg(pc.parent_id) from parent_child pc where pc.child_id = f.id), '[]'::jsonb) as parents, \
     coalesce((select jsonb_agg(pc.child_id) from parent_child pc where pc.parent_id = f.id), '[]'::jsonb) as children \
     from files f",
];

/// DDL for the catalog tables the compiled queries read.
pub fn schema_statements(dialect: SqlDialect) -> &'static [&'static str] {
    match dialect {
        SqlDialect::Sqlite => SQLITE_SCHEMA,
        SqlDialect::Postgres => POSTGRES_SCHEMA,
    }
}

pub fn init_schema(store: &dyn MetaStore) -> Result<(), MqlError> {
    let statements = schema_statements(store.dialect());
    debug!(statements = statements.len(), "initializing catalog schema");
    for statement in statements {
        store.execute(statement, &[])?;
    }
    Ok(())
}
