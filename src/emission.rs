//! Values emitted by the aggregators, handed to the output sinks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::reading::TaxiId;

/// Instantaneous speed (km/h) between a taxi's previous and current ping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedUpdate {
    pub taxi_id: TaxiId,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
}

/// Distance (km) a taxi has covered since its first ping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceUpdate {
    pub taxi_id: TaxiId,
    pub timestamp: NaiveDateTime,
    pub distance: f64,
}

/// Time-weighted average speed (km/h) alongside the speed it was updated with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AverageSpeedUpdate {
    pub taxi_id: TaxiId,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub average_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emission {
    Speed(SpeedUpdate),
    Distance(DistanceUpdate),
    AverageSpeed(AverageSpeedUpdate),
}

impl Emission {
    pub fn taxi_id(&self) -> TaxiId {
        match self {
            Emission::Speed(u) => u.taxi_id,
            Emission::Distance(u) => u.taxi_id,
            Emission::AverageSpeed(u) => u.taxi_id,
        }
    }
}

/// Per-kind counts over a slice of emissions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmissionCounts {
    pub speed: usize,
    pub distance: usize,
    pub average_speed: usize,
}

impl EmissionCounts {
    pub fn tally(emissions: &[Emission]) -> Self {
        let mut counts = Self::default();
        for emission in emissions {
            match emission {
                Emission::Speed(_) => counts.speed += 1,
                Emission::Distance(_) => counts.distance += 1,
                Emission::AverageSpeed(_) => counts.average_speed += 1,
            }
        }
        counts
    }

    pub fn add(&mut self, other: EmissionCounts) {
        self.speed += other.speed;
        self.distance += other.distance;
        self.average_speed += other.average_speed;
    }
}
