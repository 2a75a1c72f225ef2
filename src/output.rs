//! Output sinks for aggregator emissions.
//!
//! Supports appending to per-kind CSV files, structured log lines, and
//! posting JSON to a dashboard endpoint.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::emission::Emission;
use crate::notify::{HttpClient, post_json};

/// Dashboard path that receives metric updates.
pub const STATS_URI: &str = "/stats";

/// Receives the emissions of each committed batch, in commit order.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, emissions: &[Emission]) -> Result<()>;
}

/// Appends serializable records as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes `speed.csv`, `distance.csv` and `average_speed.csv` under a directory.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create output dir {}", dir.display()))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn send(&self, emissions: &[Emission]) -> Result<()> {
        let mut speed = Vec::new();
        let mut distance = Vec::new();
        let mut average = Vec::new();
        for emission in emissions {
            match emission {
                Emission::Speed(u) => speed.push(*u),
                Emission::Distance(u) => distance.push(*u),
                Emission::AverageSpeed(u) => average.push(*u),
            }
        }

        append_records(&self.dir.join("speed.csv"), &speed)?;
        append_records(&self.dir.join("distance.csv"), &distance)?;
        append_records(&self.dir.join("average_speed.csv"), &average)?;
        Ok(())
    }
}

/// Logs every emission at info level.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn send(&self, emissions: &[Emission]) -> Result<()> {
        for emission in emissions {
            match emission {
                Emission::Speed(u) => {
                    info!(taxi_id = u.taxi_id, timestamp = %u.timestamp, speed = u.speed, "speed")
                }
                Emission::Distance(u) => {
                    info!(taxi_id = u.taxi_id, timestamp = %u.timestamp, distance = u.distance, "distance")
                }
                Emission::AverageSpeed(u) => info!(
                    taxi_id = u.taxi_id,
                    timestamp = %u.timestamp,
                    speed = u.speed,
                    average_speed = u.average_speed,
                    "average_speed"
                ),
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StatsPayload<'a> {
    updates: &'a [Emission],
}

/// Posts each batch of emissions as `{"updates": [...]}` to `<base_url>/stats`.
pub struct HttpSink<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpSink<C> {
    pub fn new(client: C, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), STATS_URI),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<C: HttpClient> Sink for HttpSink<C> {
    async fn send(&self, emissions: &[Emission]) -> Result<()> {
        if emissions.is_empty() {
            return Ok(());
        }
        post_json(&self.client, &self.url, &StatsPayload { updates: emissions }).await
    }
}
