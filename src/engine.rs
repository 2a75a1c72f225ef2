//! Batch processing over the per-taxi aggregators.
//!
//! A batch is split by taxi id. Each taxi is handled by its own task, and a
//! per-taxi async mutex makes sure two batches never fold the same taxi at the
//! same time. For one taxi the engine loads the committed slices, skips the
//! taxi when they already reflect this batch, folds the readings in timestamp
//! order and commits all slices in one atomic write tagged with the batch id.
//! Emissions are released only after that write succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::aggregators::{
    Aggregator, AverageSpeedAggregator, AverageSpeedState, DistanceAggregator, DistanceState,
    PositionState, SpeedAggregator,
};
use crate::emission::{Emission, EmissionCounts};
use crate::error::{BatchAborted, EngineError, ReadingError};
use crate::reading::{Reading, TaxiId};
use crate::state::{AggregatorKind, BatchId, KeyLocks, StateAdapter, StateCodec, StateStore};

/// Readings delivered together under one retryable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    pub readings: Vec<Reading>,
}

impl Batch {
    pub fn new(id: BatchId, readings: Vec<Reading>) -> Self {
        Self { id, readings }
    }
}

/// Result of processing one batch.
///
/// Taxis listed in `failed` committed nothing; retrying the same batch
/// applies them while every committed taxi is skipped as a replay.
#[derive(Debug)]
pub struct BatchReport {
    pub batch: BatchId,
    pub emissions: Vec<Emission>,
    pub rejected: Vec<ReadingError>,
    pub committed: Vec<TaxiId>,
    pub replayed: Vec<TaxiId>,
    pub failed: Vec<(TaxiId, EngineError)>,
}

impl BatchReport {
    fn new(batch: BatchId) -> Self {
        Self {
            batch,
            emissions: Vec::new(),
            rejected: Vec::new(),
            committed: Vec::new(),
            replayed: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// `true` when no taxi needs a retry.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn counts(&self) -> EmissionCounts {
        EmissionCounts::tally(&self.emissions)
    }
}

enum KeyOutcome {
    Replayed,
    Applied {
        emissions: Vec<Emission>,
        rejected: Vec<ReadingError>,
        committed: bool,
    },
}

/// The stateful aggregation engine over a [`StateStore`].
pub struct Engine<S> {
    state: StateAdapter<S>,
    locks: Arc<KeyLocks>,
    permits: Arc<Semaphore>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            locks: self.locks.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<S: StateStore> Engine<S> {
    /// `concurrency` bounds how many taxis are folded at once; `0` is
    /// treated as `1`.
    pub fn new(store: Arc<S>, concurrency: usize) -> Self {
        Self {
            state: StateAdapter::new(store),
            locks: Arc::new(KeyLocks::default()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.state.store()
    }

    /// Folds one batch into the committed state.
    ///
    /// Every taxi task runs to completion before the result is decided, so a
    /// failure on one taxi never discards what the others committed.
    ///
    /// # Errors
    ///
    /// Returns [`BatchAborted`] for fatal conditions (cross-key
    /// contamination, undecodable or inconsistent state, a crashed worker).
    /// Its report still holds the emissions of every taxi that committed.
    /// Store unavailability is not fatal and is reported per taxi in
    /// [`BatchReport::failed`].
    #[tracing::instrument(skip_all, fields(batch_id = %batch.id, readings = batch.readings.len()))]
    pub async fn process_batch(&self, batch: Batch) -> Result<BatchReport, BatchAborted> {
        let batch_id = batch.id;
        let groups = partition(batch.readings);
        debug!(taxis = groups.len(), "Batch partitioned");

        let mut tasks = JoinSet::new();
        for (taxi_id, readings) in groups {
            let engine = self.clone();
            let span = tracing::debug_span!("process_taxi", taxi_id);
            tasks.spawn(
                async move {
                    let outcome = engine.process_taxi(taxi_id, batch_id, readings).await;
                    (taxi_id, outcome)
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::new();
        let mut fatal = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Taxi worker crashed");
                    fatal.push(EngineError::from(e));
                }
            }
        }
        outcomes.sort_by_key(|(taxi_id, _)| *taxi_id);

        let mut report = BatchReport::new(batch_id);
        for (taxi_id, outcome) in outcomes {
            match outcome {
                Ok(KeyOutcome::Replayed) => report.replayed.push(taxi_id),
                Ok(KeyOutcome::Applied {
                    emissions,
                    rejected,
                    committed,
                }) => {
                    if committed {
                        report.committed.push(taxi_id);
                    }
                    report.emissions.extend(emissions);
                    report.rejected.extend(rejected);
                }
                Err(e) if e.is_fatal() => {
                    error!(taxi_id, error = %e, "Fatal error, aborting batch");
                    fatal.push(e);
                }
                Err(e) => {
                    warn!(taxi_id, error = %e, "Taxi not committed, batch needs retry");
                    report.failed.push((taxi_id, e));
                }
            }
        }

        info!(
            committed = report.committed.len(),
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            emissions = report.emissions.len(),
            "Batch processed"
        );

        let mut fatal = fatal.into_iter();
        match fatal.next() {
            None => Ok(report),
            Some(error) => {
                let more = fatal.count();
                if more > 0 {
                    warn!(more, "Further fatal errors in the same batch");
                }
                Err(BatchAborted {
                    error,
                    report: Box::new(report),
                })
            }
        }
    }

    async fn process_taxi(
        &self,
        taxi_id: TaxiId,
        batch: BatchId,
        readings: Vec<Reading>,
    ) -> Result<KeyOutcome, EngineError> {
        let _permit = self.permits.clone().acquire_owned().await?;
        let _guard = self.locks.acquire(taxi_id).await;

        let position = self.state.load::<PositionState>(taxi_id).await?;
        let distance = self.state.load::<DistanceState>(taxi_id).await?;
        let average = self.state.load::<AverageSpeedState>(taxi_id).await?;

        let committed = [
            (AggregatorKind::Speed, position.as_ref().map(|l| l.batch)),
            (AggregatorKind::Distance, distance.as_ref().map(|l| l.batch)),
            (AggregatorKind::AverageSpeed, average.as_ref().map(|l| l.batch)),
        ];
        if let Some(last) = last_applied(taxi_id, &committed)? {
            if last >= batch {
                debug!(taxi_id, %last, %batch, "Batch already applied, skipping");
                return Ok(KeyOutcome::Replayed);
            }
        }

        let mut fold = TaxiFold {
            position: position.map(|l| l.state),
            distance: distance.map(|l| l.state),
            average: average.map(|l| l.state),
            emissions: Vec::new(),
        };
        let mut rejected = Vec::new();
        let mut applied = 0usize;

        for reading in &readings {
            if reading.taxi_id != taxi_id {
                return Err(EngineError::MisroutedReading {
                    expected: taxi_id,
                    found: reading.taxi_id,
                });
            }
            if let Err(e) = reading.validate() {
                warn!(taxi_id, error = %e, "Rejected reading");
                rejected.push(e);
                continue;
            }
            fold.apply(reading);
            applied += 1;
        }

        if applied == 0 {
            return Ok(KeyOutcome::Applied {
                emissions: Vec::new(),
                rejected,
                committed: false,
            });
        }

        self.state.commit(taxi_id, fold.encode(taxi_id), batch).await?;
        debug!(taxi_id, %batch, applied, "Taxi state committed");

        Ok(KeyOutcome::Applied {
            emissions: fold.emissions,
            rejected,
            committed: true,
        })
    }
}

/// Groups readings by taxi, each group stably sorted by timestamp so equal
/// timestamps keep their arrival order.
fn partition(readings: Vec<Reading>) -> BTreeMap<TaxiId, Vec<Reading>> {
    let mut groups: BTreeMap<TaxiId, Vec<Reading>> = BTreeMap::new();
    for reading in readings {
        groups.entry(reading.taxi_id).or_default().push(reading);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|r| r.timestamp);
    }
    groups
}

/// The batch that last committed this taxi, if any. All present slices are
/// written together, so they must agree.
fn last_applied(
    taxi_id: TaxiId,
    committed: &[(AggregatorKind, Option<BatchId>)],
) -> Result<Option<BatchId>, EngineError> {
    let present: Vec<(AggregatorKind, BatchId)> = committed
        .iter()
        .filter_map(|(kind, batch)| batch.map(|b| (*kind, b)))
        .collect();

    match present.first() {
        None => Ok(None),
        Some((_, first)) if present.iter().all(|(_, b)| b == first) => Ok(Some(*first)),
        Some(_) => Err(EngineError::InconsistentBatch {
            taxi_id,
            batches: present,
        }),
    }
}

/// In-flight state of one taxi while its readings are folded.
struct TaxiFold {
    position: Option<PositionState>,
    distance: Option<DistanceState>,
    average: Option<AverageSpeedState>,
    emissions: Vec<Emission>,
}

impl TaxiFold {
    fn apply(&mut self, reading: &Reading) {
        if let Some(speed) = step::<SpeedAggregator>(&mut self.position, reading) {
            self.emissions.push(Emission::Speed(speed));
            if let Some(average) = step::<AverageSpeedAggregator>(&mut self.average, &speed) {
                self.emissions.push(Emission::AverageSpeed(average));
            }
        }
        if let Some(distance) = step::<DistanceAggregator>(&mut self.distance, reading) {
            self.emissions.push(Emission::Distance(distance));
        }
    }

    fn encode(&self, taxi_id: TaxiId) -> Vec<(AggregatorKind, Bytes)> {
        [
            encoded(&self.position, taxi_id),
            encoded(&self.distance, taxi_id),
            encoded(&self.average, taxi_id),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn step<A: Aggregator>(slot: &mut Option<A::State>, input: &A::Input) -> Option<A::Output> {
    let (next, output) = A::fold(slot.as_ref(), input);
    *slot = Some(next);
    output
}

fn encoded<C: StateCodec>(slot: &Option<C>, taxi_id: TaxiId) -> Option<(AggregatorKind, Bytes)> {
    slot.as_ref().map(|state| (C::KIND, state.encode(taxi_id)))
}
