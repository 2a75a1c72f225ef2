use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tracing::debug;

use super::{AggregatorKind, BatchId, Committed, KeyLocks, StateStore};
use crate::error::StoreError;
use crate::reading::TaxiId;

#[derive(Clone, PartialEq, Message)]
struct SliceRecord {
    #[prost(uint32, tag = "1")]
    kind: u32,
    #[prost(uint64, tag = "2")]
    batch: u64,
    #[prost(bytes = "bytes", tag = "3")]
    blob: Bytes,
}

#[derive(Clone, PartialEq, Message)]
struct TaxiRecord {
    #[prost(message, repeated, tag = "1")]
    slices: Vec<SliceRecord>,
}

/// Stores all slices of a taxi in one file, `<dir>/taxi_id=<id>.state`.
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash mid-write leaves the previous commit intact. Writers of the same
/// taxi are serialized; writers of different taxis run in parallel.
pub struct FileStore {
    dir: PathBuf,
    writers: KeyLocks,
}

impl FileStore {
    /// Opens (and creates if needed) the state directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            writers: KeyLocks::default(),
        })
    }

    fn path_for(&self, taxi_id: TaxiId) -> PathBuf {
        self.dir.join(format!("taxi_id={taxi_id}.state"))
    }

    fn taxi_of(file_name: &str) -> Option<TaxiId> {
        file_name
            .strip_prefix("taxi_id=")?
            .strip_suffix(".state")?
            .parse()
            .ok()
    }

    async fn read_record(&self, taxi_id: TaxiId) -> Result<TaxiRecord, StoreError> {
        match tokio::fs::read(self.path_for(taxi_id)).await {
            Ok(bytes) => TaxiRecord::decode(bytes.as_slice())
                .map_err(|e| StoreError::Corrupt(format!("taxi {taxi_id}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TaxiRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_merged(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        let _guard = self.writers.acquire(taxi_id).await;

        let mut record = self.read_record(taxi_id).await?;
        for (kind, blob) in slices {
            record.slices.retain(|s| s.kind != kind.tag());
            record.slices.push(SliceRecord {
                kind: kind.tag(),
                batch: batch.0,
                blob,
            });
        }

        let path = self.path_for(taxi_id);
        let tmp = path.with_extension("state.tmp");
        tokio::fs::write(&tmp, record.encode_to_vec()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(taxi_id, batch = batch.0, path = %path.display(), "State file written");
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
    ) -> Result<Option<Committed>, StoreError> {
        let record = self.read_record(taxi_id).await?;
        Ok(record
            .slices
            .into_iter()
            .find(|s| s.kind == kind.tag())
            .map(|s| Committed {
                batch: BatchId(s.batch),
                blob: s.blob,
            }))
    }

    async fn put(
        &self,
        taxi_id: TaxiId,
        kind: AggregatorKind,
        blob: Bytes,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        self.write_merged(taxi_id, vec![(kind, blob)], batch).await
    }

    async fn put_all(
        &self,
        taxi_id: TaxiId,
        slices: Vec<(AggregatorKind, Bytes)>,
        batch: BatchId,
    ) -> Result<(), StoreError> {
        self.write_merged(taxi_id, slices, batch).await
    }

    async fn last_batch(&self) -> Result<Option<BatchId>, StoreError> {
        let mut last = None;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(taxi_id) = name.to_str().and_then(Self::taxi_of) else {
                continue;
            };
            let record = self.read_record(taxi_id).await?;
            last = record
                .slices
                .iter()
                .map(|s| BatchId(s.batch))
                .chain(last)
                .max();
        }
        debug!(dir = %self.dir.display(), last = ?last, "Scanned state directory");
        Ok(last)
    }
}
