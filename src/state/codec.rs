//! Binary encoding of the per-aggregator state slices.
//!
//! Each slice is a protobuf message that also records the taxi it belongs
//! to, so a blob read back under the wrong key is detectable. Timestamps are
//! split into whole seconds and nanoseconds, floats are stored as `double`,
//! so decoding reproduces the committed state bit for bit.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime};
use prost::Message;

use crate::aggregators::{AverageSpeedState, DistanceState, PositionState};
use crate::error::CodecError;
use crate::reading::TaxiId;
use crate::state::AggregatorKind;

/// Encode/decode pair for one kind of state slice.
pub trait StateCodec: Sized + Send {
    const KIND: AggregatorKind;

    fn encode(&self, taxi_id: TaxiId) -> Bytes;

    /// Returns the owning taxi id alongside the decoded state.
    fn decode(blob: &[u8]) -> Result<(TaxiId, Self), CodecError>;
}

#[derive(Clone, PartialEq, Message)]
struct PositionRecord {
    #[prost(uint32, tag = "1")]
    taxi_id: u32,
    #[prost(int64, tag = "2")]
    timestamp_secs: i64,
    #[prost(uint32, tag = "3")]
    timestamp_nanos: u32,
    #[prost(double, tag = "4")]
    latitude: f64,
    #[prost(double, tag = "5")]
    longitude: f64,
}

#[derive(Clone, PartialEq, Message)]
struct DistanceRecord {
    #[prost(uint32, tag = "1")]
    taxi_id: u32,
    #[prost(double, tag = "2")]
    latitude: f64,
    #[prost(double, tag = "3")]
    longitude: f64,
    #[prost(double, tag = "4")]
    cumulative_distance: f64,
}

#[derive(Clone, PartialEq, Message)]
struct AverageSpeedRecord {
    #[prost(uint32, tag = "1")]
    taxi_id: u32,
    #[prost(int64, tag = "2")]
    timestamp_secs: i64,
    #[prost(uint32, tag = "3")]
    timestamp_nanos: u32,
    #[prost(double, tag = "4")]
    average_speed: f64,
    #[prost(double, tag = "5")]
    total_hours: f64,
}

fn split_timestamp(ts: NaiveDateTime) -> (i64, u32) {
    let utc = ts.and_utc();
    (utc.timestamp(), utc.timestamp_subsec_nanos())
}

fn join_timestamp(secs: i64, nanos: u32) -> Result<NaiveDateTime, CodecError> {
    DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.naive_utc())
        .ok_or(CodecError::TimestampOutOfRange(secs))
}

impl StateCodec for PositionState {
    const KIND: AggregatorKind = AggregatorKind::Speed;

    fn encode(&self, taxi_id: TaxiId) -> Bytes {
        let (timestamp_secs, timestamp_nanos) = split_timestamp(self.last_timestamp);
        PositionRecord {
            taxi_id,
            timestamp_secs,
            timestamp_nanos,
            latitude: self.last_latitude,
            longitude: self.last_longitude,
        }
        .encode_to_vec()
        .into()
    }

    fn decode(blob: &[u8]) -> Result<(TaxiId, Self), CodecError> {
        let record = PositionRecord::decode(blob)?;
        let state = PositionState {
            last_timestamp: join_timestamp(record.timestamp_secs, record.timestamp_nanos)?,
            last_latitude: record.latitude,
            last_longitude: record.longitude,
        };
        Ok((record.taxi_id, state))
    }
}

impl StateCodec for DistanceState {
    const KIND: AggregatorKind = AggregatorKind::Distance;

    fn encode(&self, taxi_id: TaxiId) -> Bytes {
        DistanceRecord {
            taxi_id,
            latitude: self.last_latitude,
            longitude: self.last_longitude,
            cumulative_distance: self.cumulative_distance,
        }
        .encode_to_vec()
        .into()
    }

    fn decode(blob: &[u8]) -> Result<(TaxiId, Self), CodecError> {
        let record = DistanceRecord::decode(blob)?;
        let state = DistanceState {
            last_latitude: record.latitude,
            last_longitude: record.longitude,
            cumulative_distance: record.cumulative_distance,
        };
        Ok((record.taxi_id, state))
    }
}

impl StateCodec for AverageSpeedState {
    const KIND: AggregatorKind = AggregatorKind::AverageSpeed;

    fn encode(&self, taxi_id: TaxiId) -> Bytes {
        let (timestamp_secs, timestamp_nanos) = split_timestamp(self.last_timestamp);
        AverageSpeedRecord {
            taxi_id,
            timestamp_secs,
            timestamp_nanos,
            average_speed: self.average_speed,
            total_hours: self.total_hours,
        }
        .encode_to_vec()
        .into()
    }

    fn decode(blob: &[u8]) -> Result<(TaxiId, Self), CodecError> {
        let record = AverageSpeedRecord::decode(blob)?;
        let state = AverageSpeedState {
            last_timestamp: join_timestamp(record.timestamp_secs, record.timestamp_nanos)?,
            average_speed: record.average_speed,
            total_hours: record.total_hours,
        };
        Ok((record.taxi_id, state))
    }
}
