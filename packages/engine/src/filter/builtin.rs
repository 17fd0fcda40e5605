use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use super::{FileFilter, FilterParams};
use crate::backend::MetaStore;
use crate::file_set::{FileSet, RecordStream, LOOKUP_CHUNK};
use crate::record::{Metadata, Record};
use crate::{MqlError, Value};

fn single_input<'s>(name: &str, inputs: Vec<FileSet<'s>>) -> Result<FileSet<'s>, MqlError> {
    let count = inputs.len();
    let mut inputs = inputs.into_iter();
    match (inputs.next(), count) {
        (Some(input), 1) => Ok(input),
        _ => Err(MqlError::filter(format!(
            "{name} takes exactly one input query, got {count}"
        ))),
    }
}

/// `every_nth(n, i)`: keeps the records at positions `i, i + n, i + 2n, ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EveryNth;

impl FileFilter for EveryNth {
    fn apply<'s>(
        &self,
        inputs: Vec<FileSet<'s>>,
        params: &FilterParams,
    ) -> Result<RecordStream<'s>, MqlError> {
        let input = single_input("every_nth", inputs)?;
        let n = params
            .int(0, "n")
            .filter(|n| *n > 0)
            .ok_or_else(|| MqlError::filter("every_nth needs a positive integer `n`"))?;
        let offset = params.int(1, "i").unwrap_or(0);
        if !(0..n).contains(&offset) {
            return Err(MqlError::filter(format!(
                "every_nth offset {offset} must be in 0..{n}"
            )));
        }
        let mut position = 0_i64;
        Ok(Box::new(input.into_stream().filter(move |item| {
            if item.is_err() {
                return true;
            }
            let keep = position % n == offset;
            position += 1;
            keep
        })))
    }
}

/// `sample(fraction[, seed])`: keeps a deterministic pseudo-random share of
/// the input, decided by hashing each id.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample;

impl FileFilter for Sample {
    fn apply<'s>(
        &self,
        inputs: Vec<FileSet<'s>>,
        params: &FilterParams,
    ) -> Result<RecordStream<'s>, MqlError> {
        let input = single_input("sample", inputs)?;
        let fraction = params
            .float(0, "fraction")
            .filter(|fraction| (0.0..=1.0).contains(fraction))
            .ok_or_else(|| MqlError::filter("sample needs a `fraction` between 0 and 1"))?;
        let seed = params.int(1, "seed").unwrap_or(0) as u64;
        Ok(Box::new(input.into_stream().filter(move |item| match item {
            Ok(record) => {
                let hash = xxh3_64_with_seed(record.id.as_bytes(), seed);
                (hash as f64 / u64::MAX as f64) < fraction
            }
            Err(_) => true,
        })))
    }
}

/// Attaches run history rows from a second store to each file's metadata.
///
/// The run number is `core.runs[0]`. Rows of `table` are keyed by
/// `run_column`; every other column `c` lands in the metadata as
/// `<prefix>.c`. Files without a run number, or whose run has no row, pass
/// through unchanged.
pub struct RunHistoryAnnotator {
    source: Arc<dyn MetaStore>,
    table: String,
    run_column: String,
    prefix: String,
}

impl RunHistoryAnnotator {
    pub fn new(source: Arc<dyn MetaStore>, table: &str, run_column: &str) -> Self {
        Self {
            source,
            table: table.to_string(),
            run_column: run_column.to_string(),
            prefix: "runs_history".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }
}

type RunRow = Vec<(String, JsonValue)>;

struct RunLookup {
    source: Arc<dyn MetaStore>,
    table: String,
    run_column: String,
    prefix: String,
    rows: HashMap<i64, RunRow>,
}

impl RunLookup {
    fn fetch(&mut self, runs: &[i64]) -> Result<(), MqlError> {
        let (Some(low), Some(high)) = (runs.iter().min(), runs.iter().max()) else {
            return Ok(());
        };
        let sql = format!(
            "select * from {} where {} between {low} and {high}",
            quote_ident(&self.table),
            quote_ident(&self.run_column)
        );
        debug!(table = %self.table, low, high, "fetching run history");
        let result = self.source.execute(&sql, &[])?;
        let Some(key) = result
            .columns
            .iter()
            .position(|column| column == &self.run_column)
        else {
            return Err(MqlError::filter(format!(
                "run history table {} has no column {}",
                self.table, self.run_column
            )));
        };
        for row in result.rows {
            let Some(run) = row.get(key).and_then(Value::as_integer) else {
                continue;
            };
            let data = result
                .columns
                .iter()
                .zip(row)
                .enumerate()
                .filter(|(index, _)| *index != key)
                .map(|(_, (column, value))| (format!("{}.{column}", self.prefix), json_value(value)))
                .collect();
            self.rows.entry(run).or_insert(data);
        }
        Ok(())
    }

    fn annotate(&self, record: &mut Record) {
        let Some(data) = run_number(&record.metadata).and_then(|run| self.rows.get(&run)) else {
            return;
        };
        for (key, value) in data {
            record.metadata.insert(key.clone(), value.clone());
        }
    }
}

impl FileFilter for RunHistoryAnnotator {
    fn apply<'s>(
        &self,
        inputs: Vec<FileSet<'s>>,
        _params: &FilterParams,
    ) -> Result<RecordStream<'s>, MqlError> {
        let mut chunks = single_input("run_history", inputs)?.chunked(LOOKUP_CHUNK);
        let mut lookup = RunLookup {
            source: Arc::clone(&self.source),
            table: self.table.clone(),
            run_column: self.run_column.clone(),
            prefix: self.prefix.clone(),
            rows: HashMap::new(),
        };
        let mut pending: VecDeque<Record> = VecDeque::new();
        let mut failed = false;
        Ok(Box::new(std::iter::from_fn(move || {
            if let Some(record) = pending.pop_front() {
                return Some(Ok(record));
            }
            if failed {
                return None;
            }
            let mut chunk = match chunks.next()? {
                Ok(chunk) => chunk,
                Err(err) => {
                    failed = true;
                    return Some(Err(err));
                }
            };
            let mut missing: Vec<i64> = chunk
                .iter()
                .filter_map(|record| run_number(&record.metadata))
                .filter(|run| !lookup.rows.contains_key(run))
                .collect();
            missing.sort_unstable();
            missing.dedup();
            if let Err(err) = lookup.fetch(&missing) {
                failed = true;
                return Some(Err(err));
            }
            for record in &mut chunk {
                lookup.annotate(record);
            }
            pending.extend(chunk);
            pending.pop_front().map(Ok)
        })))
    }
}

fn run_number(metadata: &Metadata) -> Option<i64> {
    metadata.get("core.runs")?.as_array()?.first()?.as_i64()
}

fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn json_value(value: Value) -> JsonValue {
    match value {
        Value::Null | Value::Blob(_) => JsonValue::Null,
        Value::Integer(number) => JsonValue::from(number),
        Value::Real(number) => JsonValue::from(number),
        Value::Text(text) => JsonValue::String(text),
    }
}
