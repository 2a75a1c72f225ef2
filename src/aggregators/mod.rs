//! Stateful per-taxi folds.
//!
//! Each aggregator is a pure function from the last committed state of one
//! taxi and a new input to the next state and an optional emission. The
//! first input for a taxi only seeds state, so `N` inputs yield `N - 1`
//! emissions. Persisting state and forwarding emissions is the caller's job.

pub mod average;
pub mod distance;
pub mod speed;
pub mod time;

pub use average::{AverageSpeedAggregator, AverageSpeedState};
pub use distance::{DistanceAggregator, DistanceState};
pub use speed::{PositionState, SpeedAggregator};

use crate::state::StateCodec;

pub trait Aggregator {
    type State: StateCodec + Clone;
    type Input;
    type Output;

    fn fold(state: Option<&Self::State>, input: &Self::Input) -> (Self::State, Option<Self::Output>);
}
