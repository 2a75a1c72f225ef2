use chrono::NaiveDateTime;
use tracing::debug;

use super::Aggregator;
use super::time::elapsed_hours;
use crate::emission::{AverageSpeedUpdate, SpeedUpdate};

/// Time-weighted mean speed of a taxi and the hours it is weighted over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageSpeedState {
    pub last_timestamp: NaiveDateTime,
    pub average_speed: f64,
    pub total_hours: f64,
}

/// Running time-weighted average over the output of
/// [`SpeedAggregator`](super::SpeedAggregator).
///
/// Each speed is weighted by the hours elapsed since the previous speed
/// update. Updates that do not advance the clock carry the average forward
/// unchanged.
pub struct AverageSpeedAggregator;

impl Aggregator for AverageSpeedAggregator {
    type State = AverageSpeedState;
    type Input = SpeedUpdate;
    type Output = AverageSpeedUpdate;

    fn fold(
        state: Option<&AverageSpeedState>,
        input: &SpeedUpdate,
    ) -> (AverageSpeedState, Option<AverageSpeedUpdate>) {
        let Some(prev) = state else {
            let seeded = AverageSpeedState {
                last_timestamp: input.timestamp,
                average_speed: 0.0,
                total_hours: 0.0,
            };
            return (seeded, None);
        };

        let next = match elapsed_hours(prev.last_timestamp, input.timestamp) {
            Some(hours) => {
                let total_hours = prev.total_hours + hours;
                let average_speed = if total_hours == 0.0 {
                    0.0
                } else {
                    (prev.average_speed * prev.total_hours + input.speed * hours) / total_hours
                };
                AverageSpeedState {
                    last_timestamp: input.timestamp,
                    average_speed,
                    total_hours,
                }
            }
            None => {
                debug!(
                    taxi_id = input.taxi_id,
                    last = %prev.last_timestamp,
                    current = %input.timestamp,
                    "Non-increasing timestamp, average carried forward"
                );
                *prev
            }
        };

        let update = AverageSpeedUpdate {
            taxi_id: input.taxi_id,
            timestamp: input.timestamp,
            latitude: input.latitude,
            longitude: input.longitude,
            speed: input.speed,
            average_speed: next.average_speed,
        };

        (next, Some(update))
    }
}
