//! Error taxonomy for the aggregation engine and its state store.

use thiserror::Error;

use crate::engine::BatchReport;
use crate::reading::TaxiId;
use crate::state::{AggregatorKind, BatchId};

/// A single reading that cannot be folded into any aggregator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadingError {
    #[error("taxi {taxi_id}: non-finite coordinate ({latitude}, {longitude})")]
    NonFiniteCoordinate {
        taxi_id: TaxiId,
        latitude: f64,
        longitude: f64,
    },

    #[error("unparseable timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("unparseable taxi id '{value}'")]
    InvalidTaxiId { value: String },

    #[error("unparseable {field} '{value}'")]
    InvalidCoordinate { field: &'static str, value: String },

    #[error("record has {found} fields, expected 4")]
    FieldCount { found: usize },
}

/// Failure reported by a [`StateStore`](crate::state::StateStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("state store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state record: {0}")]
    Corrupt(String),
}

/// Failure decoding a persisted state blob.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error("timestamp {0}s is out of range")]
    TimestampOutOfRange(i64),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("taxi {taxi_id}: {source}")]
    Store {
        taxi_id: TaxiId,
        #[source]
        source: StoreError,
    },

    #[error("taxi {taxi_id}: cannot decode {kind} state: {source}")]
    Codec {
        taxi_id: TaxiId,
        kind: AggregatorKind,
        #[source]
        source: CodecError,
    },

    #[error("{kind} state for taxi {found} was routed to taxi {expected}")]
    KeyMismatch {
        expected: TaxiId,
        found: TaxiId,
        kind: AggregatorKind,
    },

    #[error("reading for taxi {found} was routed to taxi {expected}")]
    MisroutedReading { expected: TaxiId, found: TaxiId },

    #[error("taxi {taxi_id}: slices committed under different batches ({batches:?})")]
    InconsistentBatch {
        taxi_id: TaxiId,
        batches: Vec<(AggregatorKind, BatchId)>,
    },

    #[error("key worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("engine is shut down")]
    Shutdown(#[from] tokio::sync::AcquireError),
}

/// A batch stopped by a fatal error.
///
/// Taxis that committed before the failure stay committed and will be
/// skipped when the batch is redelivered, so `report` carries their
/// emissions and must still be forwarded.
#[derive(Debug, Error)]
#[error("batch {} aborted: {error}", .report.batch)]
pub struct BatchAborted {
    #[source]
    pub error: EngineError,
    pub report: Box<BatchReport>,
}

impl EngineError {
    /// Fatal errors mean state would be corrupted by continuing; anything
    /// else is safe to retry under the batch-id gate.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Store { .. })
    }
}
