use chrono::NaiveDateTime;

const NANOS_PER_HOUR: f64 = 3_600_000_000_000.0;
const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Hours from `from` to `to`, or `None` when `to` does not lie after `from`.
pub fn elapsed_hours(from: NaiveDateTime, to: NaiveDateTime) -> Option<f64> {
    if to <= from {
        return None;
    }

    let delta = to - from;
    Some(match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / NANOS_PER_HOUR,
        // spans beyond ~292 years overflow nanoseconds
        None => delta.num_seconds() as f64 / SECONDS_PER_HOUR,
    })
}
