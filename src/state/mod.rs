//! Per-key state persistence.
//!
//! [`StateStore`] is the narrow get/put contract over a key-value backend,
//! addressed by `(taxi id, aggregator kind)`. Every slice is stored together
//! with the id of the batch that produced it so that replays can be detected.
//! [`MemoryStore`] keeps slices in process memory, [`FileStore`] keeps one
//! file per taxi on disk. [`StateAdapter`] layers typed access over any store
//! through the [`StateCodec`] encoding of each state kind.

pub mod codec;
mod file;
mod memory;

pub use codec::StateCodec;
pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{EngineError, StoreError};
use crate::reading::TaxiId;

/// Which aggregator owns a state slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregatorKind {
    Speed,
    Distance,
    AverageSpeed,
}

impl AggregatorKind {
    pub const ALL: [AggregatorKind; 3] = [
        AggregatorKind::Speed,
        AggregatorKind::Distance,
        AggregatorKind::AverageSpeed,
    ];

    /// Stable numeric tag used in persisted records.
    pub fn tag(self) -> u32 {
        match self {
            AggregatorKind::Speed => 1,
            AggregatorKind::Distance => 2,
            AggregatorKind::AverageSpeed => 3,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregatorKind::Speed => "speed",
            AggregatorKind::Distance => "distance",
            AggregatorKind::AverageSpeed => "average_speed",
        })
    }
}

/// Monotonically increasing identifier of a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A state blob as last committed, with the batch that committed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub batch: BatchId,
    pub blob: Bytes,
}

/// One async mutex per taxi, created on first use and kept for the life of
/// the owner. Holders of different taxis never wait on each other.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<TaxiId, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn acquire(&self, taxi_id: TaxiId) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(taxi_id).or_default().clone();
        lock.lock_owned().await
    }
}

/// Key-value backend holding the encoded state slices.
///
/// Failures are always surfaced to the caller. `put_all` must be atomic:
/// either every slice is visible afterwards or none of them is.
/// `last_batch` is the highest batch id committed for any taxi.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, taxi_id: TaxiId, kind: AggregatorKind)
    -> Result<Option<Committed>, StoreError>;

    async fn put(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
        blob: Bytes,
        batch: BatchId,
    ) -> Result<(), StoreError>;

    async fn put_all(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError>;

    async fn last_batch(&self) -> Result<Option<BatchId>, StoreError>;
}

/// A decoded state slice and the batch that committed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub batch: BatchId,
    pub state: T,
}

/// Typed access to a [`StateStore`].
pub struct StateAdapter<S> {
    store: Arc<S>,
}

impl<S> Clone for StateAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: StateStore> StateAdapter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Loads and decodes the `C` slice of `taxi_id`.
    ///
    /// A blob that belongs to another taxi is reported as
    /// [`EngineError::KeyMismatch`] rather than handed back.
    pub async fn load<C: StateCodec>(&self, taxi_id: TaxiId) -> Result<Option<Loaded<C>>, EngineError> {
        let committed = self
            .store
            .get(taxi_id, C::KIND)
            .await
            .map_err(|source| EngineError::Store { taxi_id, source })?;

        let Some(committed) = committed else {
            return Ok(None);
        };

        let (owner, state) = C::decode(&committed.blob).map_err(|source| EngineError::Codec {
            taxi_id,
            kind: C::KIND,
            source,
        })?;

        if owner != taxi_id {
            return Err(EngineError::KeyMismatch {
                expected: taxi_id,
                found: owner,
                kind: C::KIND,
            });
        }

        Ok(Some(Loaded {
            batch: committed.batch,
            state,
        }))
    }

    /// The id after the highest committed batch, or `BatchId(1)` for an
    /// empty store. New input numbered from here is never mistaken for a
    /// replay.
    pub async fn next_batch(&self) -> Result<BatchId, StoreError> {
        let last = self.store.last_batch().await?;
        Ok(last.map_or(BatchId(1), |b| BatchId(b.0 + 1)))
    }

    /// Atomically commits already-encoded slices for `taxi_id` under `batch`.
    pub async fn commit(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), EngineError> {
        self.store
            .put_all(taxi_id, slices, batch)
            .await
            .map_err(|source| EngineError::Store { taxi_id, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in AggregatorKind::ALL {
            assert_eq!(AggregatorKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(AggregatorKind::from_tag(0), None);
    }

    #[tokio::test]
    async fn test_next_batch_follows_highest_commit() {
        let store = Arc::new(MemoryStore::new());
        let state = StateAdapter::new(store.clone());
        assert_eq!(state.next_batch().await.unwrap(), BatchId(1));

        store
            .put(1, AggregatorKind::Speed, Bytes::from_static(b"a"), BatchId(7))
            .await
            .unwrap();
        store
            .put(2, AggregatorKind::Speed, Bytes::from_static(b"b"), BatchId(3))
            .await
            .unwrap();
        assert_eq!(state.next_batch().await.unwrap(), BatchId(8));
    }

    #[tokio::test]
    async fn test_key_locks_are_independent_per_taxi() {
        let locks = KeyLocks::default();
        let _held = locks.acquire(1).await;

        let other = tokio::time::timeout(Duration::from_secs(1), locks.acquire(2)).await;
        assert!(other.is_ok());
        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(same.is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AggregatorKind::AverageSpeed.to_string(), "average_speed");
    }
}
