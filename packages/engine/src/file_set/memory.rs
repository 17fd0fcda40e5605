//! In-memory algorithms over record streams, keyed by id. Every operator keeps
//! the first occurrence of an id and the order its left operand yields them.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::{execute_rows, RecordStream};
use crate::backend::MetaStore;
use crate::record::Record;
use crate::sql::{self, ColumnSet, Provenance};
use crate::MqlError;

/// Ids per store round trip when the in-memory path needs the store.
pub(crate) const LOOKUP_CHUNK: usize = 1000;

pub(super) fn union<'s>(operands: Vec<RecordStream<'s>>) -> RecordStream<'s> {
    let mut seen = HashSet::new();
    Box::new(
        operands
            .into_iter()
            .flatten()
            .filter(move |item| match item {
                Ok(record) => seen.insert(record.id.clone()),
                Err(_) => true,
            }),
    )
}

/// Keeps records of `left` whose id is in every one of `others`.
pub(super) fn intersect<'s>(
    left: RecordStream<'s>,
    others: Vec<RecordStream<'s>>,
) -> Result<RecordStream<'s>, MqlError> {
    let mut keep: Option<HashSet<String>> = None;
    for other in others {
        let ids = collect_ids(other)?;
        keep = Some(match keep {
            None => ids,
            Some(current) => current.intersection(&ids).cloned().collect(),
        });
    }
    let keep = keep.unwrap_or_default();
    Ok(dedupe(Box::new(left.filter(move |item| match item {
        Ok(record) => keep.contains(&record.id),
        Err(_) => true,
    }))))
}

/// Records of `left` whose id never appears in `right`.
pub(super) fn difference<'s>(
    left: RecordStream<'s>,
    right: RecordStream<'s>,
) -> Result<RecordStream<'s>, MqlError> {
    let drop = collect_ids(right)?;
    Ok(dedupe(Box::new(left.filter(move |item| match item {
        Ok(record) => !drop.contains(&record.id),
        Err(_) => true,
    }))))
}

pub(super) fn dedupe<'s>(stream: RecordStream<'s>) -> RecordStream<'s> {
    union(vec![stream])
}

fn collect_ids(stream: RecordStream<'_>) -> Result<HashSet<String>, MqlError> {
    stream.map(|item| item.map(|record| record.id)).collect()
}

/// One provenance hop, asking the store for each chunk of input ids.
/// Ids reached through several inputs are yielded once.
pub(super) fn expand<'s>(
    store: &'s dyn MetaStore,
    input: RecordStream<'s>,
    direction: Provenance,
    columns: ColumnSet,
    debug_sql: bool,
) -> RecordStream<'s> {
    let mut input = input;
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending: VecDeque<Record> = VecDeque::new();
    let mut failed = false;
    Box::new(std::iter::from_fn(move || loop {
        if let Some(record) = pending.pop_front() {
            return Some(Ok(record));
        }
        if failed {
            return None;
        }
        let mut ids = Vec::with_capacity(LOOKUP_CHUNK);
        for item in input.by_ref() {
            match item {
                Ok(record) => ids.push(record.id),
                Err(err) => {
                    failed = true;
                    return Some(Err(err));
                }
            }
            if ids.len() == LOOKUP_CHUNK {
                break;
            }
        }
        if ids.is_empty() {
            return None;
        }
        debug!(ids = ids.len(), ?direction, "expanding provenance chunk");
        let fragment = sql::provenance_sql(direction, &sql::ids_sql(&ids, ColumnSet::IDS), columns);
        let context = match direction {
            Provenance::Parents => "parents_of",
            Provenance::Children => "children_of",
        };
        match execute_rows(store, &fragment.text, context, debug_sql) {
            Ok(records) => pending.extend(
                records
                    .into_iter()
                    .filter(|record| seen.insert(record.id.clone())),
            ),
            Err(err) => {
                failed = true;
                return Some(Err(err));
            }
        }
    }))
}
