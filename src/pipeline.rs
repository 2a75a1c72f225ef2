//! Drives batches through the [`Engine`] and forwards emissions to sinks.

use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::emission::EmissionCounts;
use crate::engine::{Batch, BatchReport, Engine};
use crate::output::Sink;
use crate::state::StateStore;

/// Totals over a whole run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    pub retries: usize,
    pub committed: usize,
    pub replayed: usize,
    pub rejected: usize,
    pub sink_failures: usize,
    pub emissions: EmissionCounts,
}

impl RunSummary {
    fn absorb(&mut self, report: &BatchReport) {
        self.committed += report.committed.len();
        self.replayed += report.replayed.len();
        self.rejected += report.rejected.len();
        self.emissions.add(report.counts());
    }
}

pub struct Pipeline<S> {
    engine: Engine<S>,
    sinks: Vec<Box<dyn Sink>>,
    max_retries: u32,
    backoff: Duration,
}

impl<S: StateStore> Pipeline<S> {
    pub fn new(engine: Engine<S>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            engine,
            sinks: Vec::new(),
            max_retries,
            backoff,
        }
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Processes every batch in order, stopping at the first batch that
    /// cannot be fully committed.
    ///
    /// Batches whose taxis were all committed by an earlier run are skipped
    /// with a warning; input numbered from [`StateAdapter::next_batch`]
    /// never hits that.
    ///
    /// [`StateAdapter::next_batch`]: crate::state::StateAdapter::next_batch
    #[tracing::instrument(skip_all, fields(batches = batches.len()))]
    pub async fn run(&self, batches: Vec<Batch>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for batch in batches {
            self.run_batch(batch, &mut summary).await?;
        }

        info!(
            batches = summary.batches,
            retries = summary.retries,
            committed = summary.committed,
            rejected = summary.rejected,
            speed = summary.emissions.speed,
            distance = summary.emissions.distance,
            average_speed = summary.emissions.average_speed,
            "Run complete"
        );
        if summary.committed == 0 && summary.replayed > 0 {
            warn!(
                replayed = summary.replayed,
                "Every taxi was skipped as already applied; check the batch numbering"
            );
        }
        Ok(summary)
    }

    /// Applies one batch, retrying it under the same id while some taxis
    /// failed to commit. Taxis already committed are skipped on each retry,
    /// so every emission is forwarded once.
    pub async fn run_batch(&self, batch: Batch, summary: &mut RunSummary) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let report = match self.engine.process_batch(batch.clone()).await {
                Ok(report) => report,
                Err(aborted) => {
                    summary.absorb(&aborted.report);
                    self.forward(&aborted.report, summary).await;
                    return Err(aborted.into());
                }
            };
            summary.absorb(&report);
            self.forward(&report, summary).await;

            if attempt == 0
                && report.is_complete()
                && report.committed.is_empty()
                && !report.replayed.is_empty()
            {
                warn!(
                    batch_id = %batch.id,
                    replayed = report.replayed.len(),
                    "Batch was already applied to every taxi"
                );
            }

            if report.is_complete() {
                summary.batches += 1;
                return Ok(());
            }

            if attempt >= self.max_retries {
                let (taxi_id, first) = &report.failed[0];
                bail!(
                    "batch {} still has {} uncommitted taxis after {} retries (taxi {}: {})",
                    batch.id,
                    report.failed.len(),
                    attempt,
                    taxi_id,
                    first
                );
            }

            attempt += 1;
            summary.retries += 1;
            let wait = self.backoff * attempt;
            warn!(
                batch_id = %batch.id,
                failed = report.failed.len(),
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Retrying batch"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn forward(&self, report: &BatchReport, summary: &mut RunSummary) {
        if report.emissions.is_empty() {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.send(&report.emissions).await {
                error!(batch_id = %report.batch, error = %e, "Sink failed");
                summary.sink_failures += 1;
            }
        }
    }
}
