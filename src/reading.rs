//! Geolocation pings and their validation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ReadingError;

/// Identifier of a taxi; the partitioning key for all state.
pub type TaxiId = u32;

/// Timestamp layout used by T-Drive ping files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One geolocation observation of a taxi.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub taxi_id: TaxiId,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
}

impl Reading {
    pub fn new(taxi_id: TaxiId, timestamp: NaiveDateTime, latitude: f64, longitude: f64) -> Self {
        Self {
            taxi_id,
            timestamp,
            latitude,
            longitude,
        }
    }

    /// Rejects readings whose coordinates cannot take part in distance math.
    pub fn validate(&self) -> Result<(), ReadingError> {
        if self.latitude.is_finite() && self.longitude.is_finite() {
            Ok(())
        } else {
            Err(ReadingError::NonFiniteCoordinate {
                taxi_id: self.taxi_id,
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// Parses a T-Drive record: `taxi_id,timestamp,longitude,latitude`.
///
/// # Errors
///
/// Returns the first field that fails to parse, or a non-finite coordinate.
pub fn parse_record(record: &csv::StringRecord) -> Result<Reading, ReadingError> {
    if record.len() != 4 {
        return Err(ReadingError::FieldCount {
            found: record.len(),
        });
    }

    let id_field = record[0].trim();
    let taxi_id = id_field
        .parse::<TaxiId>()
        .map_err(|_| ReadingError::InvalidTaxiId {
            value: id_field.to_string(),
        })?;

    let ts_field = record[1].trim();
    let timestamp = NaiveDateTime::parse_from_str(ts_field, TIMESTAMP_FORMAT).map_err(|_| {
        ReadingError::InvalidTimestamp {
            value: ts_field.to_string(),
        }
    })?;

    let longitude = parse_coordinate("longitude", &record[2])?;
    let latitude = parse_coordinate("latitude", &record[3])?;

    let reading = Reading::new(taxi_id, timestamp, latitude, longitude);
    reading.validate()?;
    Ok(reading)
}

fn parse_coordinate(field: &'static str, raw: &str) -> Result<f64, ReadingError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ReadingError::InvalidCoordinate {
            field,
            value: raw.trim().to_string(),
        })
}
