//! Reads T-Drive ping files and cuts them into numbered batches.
//!
//! Stands in for the message bus: readings from all files are merged in
//! timestamp order (ties keep file order) and delivered in fixed-size batches
//! with consecutive ids.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::engine::Batch;
use crate::error::ReadingError;
use crate::reading::{Reading, parse_record};
use crate::state::BatchId;

/// A line that could not be turned into a [`Reading`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub source: String,
    pub line: u64,
    pub error: ReadingError,
}

/// Everything read from a set of ping files.
#[derive(Debug, Default)]
pub struct Pings {
    pub readings: Vec<Reading>,
    pub rejected: Vec<Rejected>,
}

/// Parses every line of a headerless `id,timestamp,longitude,latitude` file.
///
/// Malformed lines are collected, not fatal. I/O errors are.
pub fn read_pings(path: &Path) -> Result<Pings> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut loaded = Pings::default();
    let source = path.display().to_string();

    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("cannot read {source}"))?;
        let line = record.position().map(|p| p.line()).unwrap_or(idx as u64 + 1);
        match parse_record(&record) {
            Ok(reading) => loaded.readings.push(reading),
            Err(error) => {
                warn!(source = %source, line, error = %error, "Skipping malformed ping");
                loaded.rejected.push(Rejected {
                    source: source.clone(),
                    line,
                    error,
                });
            }
        }
    }

    Ok(loaded)
}

/// Reads all files and merges their readings in timestamp order.
#[tracing::instrument(skip_all, fields(files = paths.len()))]
pub fn read_all<P: AsRef<Path>>(paths: &[P]) -> Result<Pings> {
    let mut all = Pings::default();
    for path in paths {
        let loaded = read_pings(path.as_ref())?;
        all.readings.extend(loaded.readings);
        all.rejected.extend(loaded.rejected);
    }
    all.readings.sort_by_key(|r| r.timestamp);

    info!(
        readings = all.readings.len(),
        rejected = all.rejected.len(),
        "Ping files loaded"
    );
    Ok(all)
}

/// Splits readings into batches of `batch_size` (at least 1) numbered from
/// `first_id` upwards.
pub fn into_batches(readings: Vec<Reading>, batch_size: usize, first_id: u64) -> Vec<Batch> {
    readings
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| Batch::new(BatchId(first_id + i as u64), chunk.to_vec()))
        .collect()
}
