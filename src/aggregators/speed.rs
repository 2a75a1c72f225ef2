use chrono::NaiveDateTime;
use tracing::debug;

use super::Aggregator;
use super::time::elapsed_hours;
use crate::emission::SpeedUpdate;
use crate::geo::haversine;
use crate::reading::Reading;

/// Last observed position of a taxi.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub last_timestamp: NaiveDateTime,
    pub last_latitude: f64,
    pub last_longitude: f64,
}

/// Speed between consecutive pings.
///
/// A ping that does not advance the clock gets speed `0.0`. Its coordinates
/// still replace the stored position, but the stored timestamp never moves
/// backwards.
pub struct SpeedAggregator;

impl Aggregator for SpeedAggregator {
    type State = PositionState;
    type Input = Reading;
    type Output = SpeedUpdate;

    fn fold(state: Option<&PositionState>, reading: &Reading) -> (PositionState, Option<SpeedUpdate>) {
        let Some(prev) = state else {
            let seeded = PositionState {
                last_timestamp: reading.timestamp,
                last_latitude: reading.latitude,
                last_longitude: reading.longitude,
            };
            return (seeded, None);
        };

        let speed = match elapsed_hours(prev.last_timestamp, reading.timestamp) {
            Some(hours) => {
                haversine(
                    prev.last_latitude,
                    prev.last_longitude,
                    reading.latitude,
                    reading.longitude,
                ) / hours
            }
            None => {
                debug!(
                    taxi_id = reading.taxi_id,
                    last = %prev.last_timestamp,
                    current = %reading.timestamp,
                    "Non-increasing timestamp, speed set to zero"
                );
                0.0
            }
        };

        let next = PositionState {
            last_timestamp: prev.last_timestamp.max(reading.timestamp),
            last_latitude: reading.latitude,
            last_longitude: reading.longitude,
        };

        let update = SpeedUpdate {
            taxi_id: reading.taxi_id,
            timestamp: reading.timestamp,
            latitude: reading.latitude,
            longitude: reading.longitude,
            speed,
        };

        (next, Some(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2008, 2, 2)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_first_reading_seeds_without_emitting() {
        let (state, out) = SpeedAggregator::fold(None, &Reading::new(1, t0(), 10.0, 10.0));

        assert!(out.is_none());
        assert_eq!(state.last_timestamp, t0());
        assert_eq!(state.last_latitude, 10.0);
    }

    #[test]
    fn test_speed_over_one_hour_equals_distance() {
        let (state, _) = SpeedAggregator::fold(None, &Reading::new(1, t0(), 10.0, 10.0));
        let next = Reading::new(1, t0() + Duration::minutes(60), 10.5, 10.0);
        let (_, out) = SpeedAggregator::fold(Some(&state), &next);

        assert_eq!(out.unwrap().speed, haversine(10.0, 10.0, 10.5, 10.0));
    }

    #[test]
    fn test_half_hour_doubles_speed() {
        let (state, _) = SpeedAggregator::fold(None, &Reading::new(1, t0(), 10.0, 10.0));
        let next = Reading::new(1, t0() + Duration::minutes(30), 10.5, 10.0);
        let (_, out) = SpeedAggregator::fold(Some(&state), &next);

        let expected = haversine(10.0, 10.0, 10.5, 10.0) * 2.0;
        assert!((out.unwrap().speed - expected).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_order_reading_zero_speed_keeps_clock() {
        let prev = PositionState {
            last_timestamp: t0(),
            last_latitude: 10.0,
            last_longitude: 10.0,
        };
        let late = Reading::new(1, t0() - Duration::minutes(5), 11.0, 11.0);
        let (state, out) = SpeedAggregator::fold(Some(&prev), &late);

        assert_eq!(out.unwrap().speed, 0.0);
        assert_eq!(state.last_timestamp, t0());
        assert_eq!(state.last_latitude, 11.0);
        assert_eq!(state.last_longitude, 11.0);
    }
}
