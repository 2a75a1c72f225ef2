use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{AggregatorKind, BatchId, Committed, StateStore};
use crate::error::StoreError;
use crate::reading::TaxiId;

/// Keeps every committed slice in process memory.
#[derive(Default)]
pub struct MemoryStore {
    slices: Mutex<HashMap<(TaxiId, AggregatorKind), Committed>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed slices across all taxis.
    pub async fn len(&self) -> usize {
        self.slices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
    ) -> Result<Option<Committed>, StoreError> {
        Ok(self.slices.lock().await.get(&(taxi_id, kind)).cloned())
    }

    async fn put(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
        blob: Bytes,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        self.slices
            .lock()
            .await
            .insert((taxi_id, kind), Committed { batch, blob });
        Ok(())
    }

    async fn put_all(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        // One guard for the whole write keeps readers from seeing a partial commit.
        let mut guard = self.slices.lock().await;
        for (kind, blob) in slices {
            guard.insert((taxi_id, kind), Committed { batch, blob });
        }
        Ok(())
    }

    async fn last_batch(&self) -> Result<Option<BatchId>, StoreError> {
        Ok(self.slices.lock().await.values().map(|c| c.batch).max())
    }
}
