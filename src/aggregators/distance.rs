use super::Aggregator;
use crate::emission::DistanceUpdate;
use crate::geo::haversine;
use crate::reading::Reading;

/// Running distance total of a taxi and where it was last seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceState {
    pub last_latitude: f64,
    pub last_longitude: f64,
    pub cumulative_distance: f64,
}

/// Cumulative distance travelled. Purely positional: timestamps are ignored,
/// so a duplicate or late ping still adds its displacement.
pub struct DistanceAggregator;

impl Aggregator for DistanceAggregator {
    type State = DistanceState;
    type Input = Reading;
    type Output = DistanceUpdate;

    fn fold(state: Option<&DistanceState>, reading: &Reading) -> (DistanceState, Option<DistanceUpdate>) {
        let Some(prev) = state else {
            let seeded = DistanceState {
                last_latitude: reading.latitude,
                last_longitude: reading.longitude,
                cumulative_distance: 0.0,
            };
            return (seeded, None);
        };

        let increment = haversine(
            prev.last_latitude,
            prev.last_longitude,
            reading.latitude,
            reading.longitude,
        );

        let next = DistanceState {
            last_latitude: reading.latitude,
            last_longitude: reading.longitude,
            cumulative_distance: prev.cumulative_distance + increment,
        };

        let update = DistanceUpdate {
            taxi_id: reading.taxi_id,
            timestamp: reading.timestamp,
            distance: next.cumulative_distance,
        };

        (next, Some(update))
    }
}
