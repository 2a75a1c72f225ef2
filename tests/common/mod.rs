#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use taxi_stream::emission::{AverageSpeedUpdate, DistanceUpdate, Emission, SpeedUpdate};
use taxi_stream::error::StoreError;
use taxi_stream::output::Sink;
use taxi_stream::reading::{Reading, TaxiId};
use taxi_stream::state::{AggregatorKind, BatchId, Committed, MemoryStore, StateStore};
use tokio::sync::Mutex;

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2008, 2, 2)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap()
}

pub fn ping(taxi_id: TaxiId, minutes: i64, latitude: f64, longitude: f64) -> Reading {
    Reading::new(taxi_id, t0() + Duration::minutes(minutes), latitude, longitude)
}

pub fn speeds(emissions: &[Emission]) -> Vec<SpeedUpdate> {
    emissions
        .iter()
        .filter_map(|e| match e {
            Emission::Speed(u) => Some(*u),
            _ => None,
        })
        .collect()
}

pub fn distances(emissions: &[Emission]) -> Vec<DistanceUpdate> {
    emissions
        .iter()
        .filter_map(|e| match e {
            Emission::Distance(u) => Some(*u),
            _ => None,
        })
        .collect()
}

pub fn averages(emissions: &[Emission]) -> Vec<AverageSpeedUpdate> {
    emissions
        .iter()
        .filter_map(|e| match e {
            Emission::AverageSpeed(u) => Some(*u),
            _ => None,
        })
        .collect()
}

/// A [`MemoryStore`] whose atomic commits fail a set number of times per taxi.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: Mutex<HashMap<TaxiId, usize>>,
}

impl FlakyStore {
    pub async fn fail_commits(&self, taxi_id: TaxiId, times: usize) {
        self.failures.lock().await.insert(taxi_id, times);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
    ) -> Result<Option<Committed>, StoreError> {
        self.inner.get(taxi_id, kind).await
    }

    async fn put(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
        blob: Bytes,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        self.inner.put(taxi_id, kind, blob, batch).await
    }

    async fn put_all(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        {
            let mut failures = self.failures.lock().await;
            if let Some(left) = failures.get_mut(&taxi_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(StoreError::Unavailable(format!("injected failure for taxi {taxi_id}")));
                }
            }
        }
        self.inner.put_all(taxi_id, slices, batch).await
    }

    async fn last_batch(&self) -> Result<Option<BatchId>, StoreError> {
        self.inner.last_batch().await
    }
}

/// A [`MemoryStore`] whose commits take `delay` and which records how many
/// commits of the same taxi were ever in flight at once.
pub struct SlowStore {
    inner: MemoryStore,
    delay: std::time::Duration,
    in_flight: Mutex<HashMap<TaxiId, usize>>,
    max_overlap: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
            in_flight: Mutex::new(HashMap::new()),
            max_overlap: AtomicUsize::new(0),
        }
    }

    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for SlowStore {
    async fn get(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
    ) -> Result<Option<Committed>, StoreError> {
        self.inner.get(taxi_id, kind).await
    }

    async fn put(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
        blob: Bytes,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        self.inner.put(taxi_id, kind, blob, batch).await
    }

    async fn put_all(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            let count = in_flight.entry(taxi_id).or_default();
            *count += 1;
            self.max_overlap.fetch_max(*count, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        let result = self.inner.put_all(taxi_id, slices, batch).await;
        if let Some(count) = self.in_flight.lock().await.get_mut(&taxi_id) {
            *count -= 1;
        }
        result
    }

    async fn last_batch(&self) -> Result<Option<BatchId>, StoreError> {
        self.inner.last_batch().await
    }
}

/// Collects everything it is sent.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub received: Arc<Mutex<Vec<Emission>>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, emissions: &[Emission]) -> anyhow::Result<()> {
        self.received.lock().await.extend_from_slice(emissions);
        Ok(())
    }
}
