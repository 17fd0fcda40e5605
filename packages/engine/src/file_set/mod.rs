//! Lazy, single-pass record sequences backed either by a SQL fragment or by
//! an arbitrary record stream.

mod memory;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use tracing::debug;

use crate::backend::MetaStore;
use crate::errors;
use crate::meta::{normalize, MetaEvaluator, MetaExpr};
use crate::record::Record;
use crate::sql::{self, ColumnSet, Provenance, SetOperation, SqlFragment};
use crate::MqlError;

pub(crate) use memory::LOOKUP_CHUNK;

pub type RecordStream<'s> = Box<dyn Iterator<Item = Result<Record, MqlError>> + 's>;

/// Sequence of file records. Nothing touches the store until the first record
/// is pulled; dropping the set releases any cursor it holds.
pub struct FileSet<'s> {
    store: &'s dyn MetaStore,
    debug: bool,
    source: Source<'s>,
}

enum Source<'s> {
    Sql {
        fragment: SqlFragment,
        context: &'static str,
    },
    Stream(RecordStream<'s>),
}

impl fmt::Debug for FileSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Sql { fragment, context } => f
                .debug_struct("FileSet")
                .field("context", context)
                .field("sql", &fragment.text)
                .finish(),
            Source::Stream(_) => f.debug_struct("FileSet").field("stream", &"..").finish(),
        }
    }
}

impl<'s> FileSet<'s> {
    pub fn from_sql(
        store: &'s dyn MetaStore,
        fragment: SqlFragment,
        context: &'static str,
        debug: bool,
    ) -> Self {
        Self {
            store,
            debug,
            source: Source::Sql { fragment, context },
        }
    }

    pub fn from_records<I>(store: &'s dyn MetaStore, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: 's,
    {
        Self::from_stream(store, Box::new(records.into_iter().map(Ok)))
    }

    pub fn from_stream(store: &'s dyn MetaStore, stream: RecordStream<'s>) -> Self {
        Self {
            store,
            debug: false,
            source: Source::Stream(stream),
        }
    }

    /// Stream produced by `start` on the first pull.
    pub(crate) fn deferred<F>(store: &'s dyn MetaStore, debug: bool, start: F) -> Self
    where
        F: FnOnce() -> Result<RecordStream<'s>, MqlError> + 's,
    {
        Self {
            store,
            debug,
            source: Source::Stream(Box::new(Deferred {
                start: Some(Box::new(start)),
                stream: None,
            })),
        }
    }

    pub fn store(&self) -> &'s dyn MetaStore {
        self.store
    }

    pub fn is_sql(&self) -> bool {
        matches!(self.source, Source::Sql { .. })
    }

    pub fn sql(&self) -> Option<&SqlFragment> {
        match &self.source {
            Source::Sql { fragment, .. } => Some(fragment),
            Source::Stream(_) => None,
        }
    }

    /// Turns the set into a record stream, executing its fragment lazily.
    pub fn into_stream(self) -> RecordStream<'s> {
        match self.source {
            Source::Stream(stream) => stream,
            Source::Sql { fragment, context } => {
                let store = self.store;
                let debug_sql = self.debug;
                Box::new(Deferred {
                    start: Some(Box::new(move || {
                        stream_rows(store, &fragment.text, context, debug_sql)
                    })),
                    stream: None,
                })
            }
        }
    }

    pub fn chunked(self, size: usize) -> Chunks<'s> {
        Chunks {
            stream: self.into_stream(),
            size: size.max(1),
            done: false,
        }
    }

    pub fn union(self, others: Vec<FileSet<'s>>) -> FileSet<'s> {
        if others.is_empty() {
            return self;
        }
        let store = self.store;
        let debug = self.debug || others.iter().any(|other| other.debug);
        let mut operands = Vec::with_capacity(others.len() + 1);
        operands.push(self);
        operands.extend(others);
        if let Some(fragments) = all_sql(&operands) {
            let columns = fragments[0].columns;
            let fragment = sql::set_operation_sql(SetOperation::Union, &fragments, columns);
            return FileSet::from_sql(store, fragment, "union", debug);
        }
        let streams = operands.into_iter().map(FileSet::into_stream).collect();
        FileSet {
            store,
            debug,
            source: Source::Stream(memory::union(streams)),
        }
    }

    pub fn intersect(self, others: Vec<FileSet<'s>>) -> FileSet<'s> {
        if others.is_empty() {
            return self;
        }
        let store = self.store;
        let debug = self.debug || others.iter().any(|other| other.debug);
        let mut operands = Vec::with_capacity(others.len() + 1);
        operands.push(self);
        operands.extend(others);
        if let Some(fragments) = all_sql(&operands) {
            let columns = fragments[0].columns;
            let fragment = sql::set_operation_sql(SetOperation::Intersect, &fragments, columns);
            return FileSet::from_sql(store, fragment, "join", debug);
        }
        let mut streams: Vec<RecordStream<'s>> =
            operands.into_iter().map(FileSet::into_stream).collect();
        let left = streams.remove(0);
        FileSet::deferred(store, debug, move || memory::intersect(left, streams))
    }

    /// Records of `self` that are not in `other`.
    pub fn difference(self, other: FileSet<'s>) -> FileSet<'s> {
        let store = self.store;
        let debug = self.debug || other.debug;
        if let (Some(left), Some(right)) = (self.sql(), other.sql()) {
            let fragment = sql::set_operation_sql(
                SetOperation::Except,
                &[left.clone(), right.clone()],
                left.columns,
            );
            return FileSet::from_sql(store, fragment, "minus", debug);
        }
        let left = self.into_stream();
        let right = other.into_stream();
        FileSet::deferred(store, debug, move || memory::difference(left, right))
    }

    pub fn parents(self, columns: ColumnSet) -> FileSet<'s> {
        self.provenance(Provenance::Parents, columns)
    }

    pub fn children(self, columns: ColumnSet) -> FileSet<'s> {
        self.provenance(Provenance::Children, columns)
    }

    fn provenance(self, direction: Provenance, columns: ColumnSet) -> FileSet<'s> {
        let store = self.store;
        let debug = self.debug;
        let context = match direction {
            Provenance::Parents => "parents_of",
            Provenance::Children => "children_of",
        };
        if let Some(fragment) = self.sql() {
            let fragment = sql::provenance_sql(direction, fragment, columns);
            return FileSet::from_sql(store, fragment, context, debug);
        }
        let input = self.into_stream();
        FileSet {
            store,
            debug,
            source: Source::Stream(memory::expand(store, input, direction, columns, debug)),
        }
    }

    pub fn limit(self, limit: u64) -> FileSet<'s> {
        self.window(Some(limit), 0, "limit")
    }

    pub fn skip(self, skip: u64) -> FileSet<'s> {
        self.window(None, skip, "skip")
    }

    fn window(self, limit: Option<u64>, offset: u64, context: &'static str) -> FileSet<'s> {
        let store = self.store;
        let debug = self.debug;
        if let Some(fragment) = self.sql() {
            let fragment =
                sql::limit_sql(store.dialect(), fragment, limit, offset, fragment.columns);
            return FileSet::from_sql(store, fragment, context, debug);
        }
        let skipped = self
            .into_stream()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX));
        let stream: RecordStream<'s> = match limit {
            Some(limit) => Box::new(skipped.take(usize::try_from(limit).unwrap_or(usize::MAX))),
            None => Box::new(skipped),
        };
        FileSet {
            store,
            debug,
            source: Source::Stream(stream),
        }
    }

    /// Keeps records whose metadata satisfies `expr`. Fails right away on a
    /// malformed expression.
    pub fn filter_metadata(self, expr: &MetaExpr) -> Result<FileSet<'s>, MqlError> {
        let FileSet {
            store,
            debug,
            source,
        } = self;
        let source = match source {
            Source::Sql { fragment, context } => {
                let dnf = normalize(expr)?;
                if dnf.is_always_true() {
                    Source::Sql { fragment, context }
                } else {
                    let predicate = sql::dnf_predicate_sql(store.dialect(), &dnf, "t.metadata")?;
                    Source::Sql {
                        fragment: sql::meta_filter_sql(
                            &with_metadata(&fragment),
                            &predicate,
                            fragment.columns,
                        ),
                        context: "meta_filter",
                    }
                }
            }
            Source::Stream(stream) => {
                let evaluator = MetaEvaluator::new(expr)?;
                Source::Stream(Box::new(stream.filter(move |item| match item {
                    Ok(record) => evaluator.evaluate(&record.metadata),
                    Err(_) => true,
                })))
            }
        };
        Ok(FileSet {
            store,
            debug,
            source,
        })
    }

    /// `(count, total_size)` over distinct ids. Sizes the records do not
    /// carry are read from the file table.
    pub fn counts(self) -> Result<(u64, u64), MqlError> {
        let store = self.store;
        let debug_sql = self.debug;
        if let Some(fragment) = self.sql() {
            let sql = sql::counts_sql(fragment);
            log_fragment("count", &sql);
            let result = store
                .execute(&sql, &[])
                .map_err(|err| errors::store_failure_error("count", debug_sql.then_some(sql.as_str()), &err))?;
            let row = result.rows.into_iter().next().unwrap_or_default();
            let count = row.first().and_then(|value| value.as_integer()).unwrap_or(0);
            let size = row.get(1).and_then(|value| value.as_integer()).unwrap_or(0);
            return Ok((count.max(0) as u64, size.max(0) as u64));
        }
        let mut seen = HashSet::new();
        let mut total = 0_u64;
        for chunk in self.chunked(LOOKUP_CHUNK) {
            let mut unknown = Vec::new();
            for record in chunk? {
                if !seen.insert(record.id.clone()) {
                    continue;
                }
                match record.size {
                    Some(size) => total += size,
                    None => unknown.push(record.id),
                }
            }
            if !unknown.is_empty() {
                total += sizes_of(store, &unknown, debug_sql)?;
            }
        }
        Ok((seen.len() as u64, total))
    }

    pub fn metadata_keys(self) -> Result<BTreeSet<String>, MqlError> {
        let store = self.store;
        let debug_sql = self.debug;
        if let Some(fragment) = self.sql() {
            let sql = sql::metadata_keys_sql(store.dialect(), &with_metadata(fragment));
            log_fragment("keys", &sql);
            let result = store
                .execute(&sql, &[])
                .map_err(|err| errors::store_failure_error("keys", debug_sql.then_some(sql.as_str()), &err))?;
            return Ok(result
                .rows
                .into_iter()
                .filter_map(|row| row.into_iter().next()?.as_text().map(str::to_string))
                .collect());
        }
        let mut keys = BTreeSet::new();
        for item in self.into_stream() {
            keys.extend(item?.metadata.into_iter().map(|(key, _)| key));
        }
        Ok(keys)
    }

    /// Releases the underlying cursor without reading further.
    pub fn close(self) {
        drop(self);
    }
}

impl<'s> IntoIterator for FileSet<'s> {
    type Item = Result<Record, MqlError>;
    type IntoIter = RecordStream<'s>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_stream()
    }
}

/// Finite batches of records; the last one may be short. Stops after the
/// first error.
pub struct Chunks<'s> {
    stream: RecordStream<'s>,
    size: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Result<Vec<Record>, MqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.size);
        for item in self.stream.by_ref() {
            match item {
                Ok(record) => chunk.push(record),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            if chunk.len() == self.size {
                return Some(Ok(chunk));
            }
        }
        self.done = true;
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}

struct Deferred<'s> {
    start: Option<Box<dyn FnOnce() -> Result<RecordStream<'s>, MqlError> + 's>>,
    stream: Option<RecordStream<'s>>,
}

impl Iterator for Deferred<'_> {
    type Item = Result<Record, MqlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(start) = self.start.take() {
            match start() {
                Ok(stream) => self.stream = Some(stream),
                Err(err) => return Some(Err(err)),
            }
        }
        self.stream.as_mut()?.next()
    }
}

fn all_sql(operands: &[FileSet<'_>]) -> Option<Vec<SqlFragment>> {
    operands
        .iter()
        .map(|operand| operand.sql().cloned())
        .collect()
}

/// Same rows re-read with the metadata column filled.
fn with_metadata(fragment: &SqlFragment) -> SqlFragment {
    if fragment.columns.meta {
        return fragment.clone();
    }
    sql::set_operation_sql(
        SetOperation::Union,
        std::slice::from_ref(fragment),
        fragment.columns.with_meta(),
    )
}

fn log_fragment(context: &str, sql: &str) {
    debug!(node = context, sql, "executing fragment");
}

fn stream_rows<'s>(
    store: &'s dyn MetaStore,
    sql: &str,
    context: &'static str,
    debug_sql: bool,
) -> Result<RecordStream<'s>, MqlError> {
    log_fragment(context, sql);
    let failing_sql = debug_sql.then(|| sql.to_string());
    let rows = store
        .stream(sql, &[])
        .map_err(|err| errors::store_failure_error(context, failing_sql.as_deref(), &err))?;
    Ok(Box::new(rows.map(move |row| {
        row.map_err(|err| errors::store_failure_error(context, failing_sql.as_deref(), &err))
            .and_then(|row| Record::from_row(row, context))
    })))
}

pub(crate) fn execute_rows(
    store: &dyn MetaStore,
    sql: &str,
    context: &'static str,
    debug_sql: bool,
) -> Result<Vec<Record>, MqlError> {
    log_fragment(context, sql);
    let result = store
        .execute(sql, &[])
        .map_err(|err| errors::store_failure_error(context, debug_sql.then_some(sql), &err))?;
    result
        .rows
        .into_iter()
        .map(|row| Record::from_row(row, context))
        .collect()
}

fn sizes_of(store: &dyn MetaStore, ids: &[String], debug_sql: bool) -> Result<u64, MqlError> {
    let sql = format!(
        "select coalesce(sum(f.size), 0) from files f where f.id in ({})",
        sql::literal_list(ids)
    );
    log_fragment("count", &sql);
    let result = store
        .execute(&sql, &[])
        .map_err(|err| errors::store_failure_error("count", debug_sql.then_some(sql.as_str()), &err))?;
    let total = result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|value| value.as_integer())
        .unwrap_or(0);
    Ok(total.max(0) as u64)
}
