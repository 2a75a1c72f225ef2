mod common;

use std::sync::Arc;

use common::{averages, distances, ping, speeds};
use taxi_stream::emission::Emission;
use taxi_stream::engine::{Batch, Engine};
use taxi_stream::geo::haversine;
use taxi_stream::reading::Reading;
use taxi_stream::state::{BatchId, MemoryStore};

async fn run_single_batch(readings: Vec<Reading>) -> Vec<Emission> {
    let engine = Engine::new(Arc::new(MemoryStore::new()), 4);
    let report = engine
        .process_batch(Batch::new(BatchId(1), readings))
        .await
        .expect("batch failed");
    assert!(report.is_complete());
    report.emissions
}

#[tokio::test]
async fn test_stationary_taxi_yields_zero_values() {
    let emissions = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 5, 10.0, 10.0),
        ping(1, 10, 10.0, 10.0),
    ])
    .await;

    // three data points yield two speed + distance updates and one average speed update
    let speeds = speeds(&emissions);
    let distances = distances(&emissions);
    let averages = averages(&emissions);
    assert_eq!(speeds.len(), 2);
    assert_eq!(distances.len(), 2);
    assert_eq!(averages.len(), 1);

    assert!(speeds.iter().all(|s| s.speed == 0.0));
    assert!(distances.iter().all(|d| d.distance == 0.0));
    assert_eq!(averages[0].average_speed, 0.0);
}

#[tokio::test]
async fn test_simple_moving_taxi() {
    let emissions = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 60, 10.5, 10.0),
        ping(1, 120, 10.0, 10.0),
    ])
    .await;

    let dist1 = haversine(10.0, 10.0, 10.5, 10.0);
    let dist2 = haversine(10.5, 10.0, 10.0, 10.0);

    let speeds = speeds(&emissions);
    let distances = distances(&emissions);
    let averages = averages(&emissions);
    assert_eq!(speeds.len(), 2);
    assert_eq!(distances.len(), 2);
    assert_eq!(averages.len(), 1);

    // both legs take an hour, so speed equals leg length
    assert_eq!(speeds[0].speed, dist1);
    assert_eq!(speeds[1].speed, dist2);
    assert_eq!(distances[0].distance, dist1);
    assert_eq!(distances[1].distance, dist1 + dist2);
    assert_eq!(averages[0].average_speed, dist2);
    assert!((averages[0].average_speed - dist1).abs() < 1e-12);
}

#[tokio::test]
async fn test_same_timestamp_zero_speed_but_distance_accumulates() {
    let emissions = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 0, 10.5, 10.0),
        ping(1, 0, 10.0, 10.0),
    ])
    .await;

    let dist1 = haversine(10.0, 10.0, 10.5, 10.0);
    let dist2 = haversine(10.5, 10.0, 10.0, 10.0);

    let speeds = speeds(&emissions);
    let distances = distances(&emissions);
    let averages = averages(&emissions);
    assert_eq!(speeds.len(), 2);
    assert_eq!(averages.len(), 1);

    assert!(speeds.iter().all(|s| s.speed == 0.0));
    assert_eq!(distances[0].distance, dist1);
    assert_eq!(distances[1].distance, dist1 + dist2);
    assert_eq!(averages[0].average_speed, 0.0);
}

#[tokio::test]
async fn test_duplicate_timestamp_after_movement_keeps_average() {
    let emissions = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 60, 10.5, 10.0),
        ping(1, 120, 10.0, 10.0),
        ping(1, 120, 15.0, 15.0),
    ])
    .await;

    let dist1 = haversine(10.0, 10.0, 10.5, 10.0);
    let dist2 = haversine(10.5, 10.0, 10.0, 10.0);
    let dist3 = haversine(10.0, 10.0, 15.0, 15.0);

    // four data points yield three speed + distance updates and two average speed updates
    let speeds = speeds(&emissions);
    let distances = distances(&emissions);
    let averages = averages(&emissions);
    assert_eq!(speeds.len(), 3);
    assert_eq!(distances.len(), 3);
    assert_eq!(averages.len(), 2);

    assert_eq!(speeds[0].speed, dist1);
    assert_eq!(speeds[1].speed, dist2);
    assert_eq!(speeds[2].speed, 0.0);

    assert_eq!(distances[1].distance, dist1 + dist2);
    assert_eq!(distances[2].distance, dist1 + dist2 + dist3);

    assert_eq!(averages[0].average_speed, dist2);
    assert_eq!(averages[1].average_speed, dist2);
}

#[tokio::test]
async fn test_emission_counts_per_taxi() {
    // taxis interleaved the way a bus would deliver them
    let mut readings = Vec::new();
    for minute in 0..5 {
        readings.push(ping(1, minute * 10, 39.90 + minute as f64 * 0.01, 116.40));
        readings.push(ping(2, minute * 10, 39.80, 116.30 + minute as f64 * 0.01));
        if minute < 2 {
            readings.push(ping(3, minute * 10, 39.70, 116.20));
        }
    }

    let emissions = run_single_batch(readings).await;

    for (taxi, n) in [(1u32, 5usize), (2, 5), (3, 2)] {
        let mine: Vec<Emission> = emissions
            .iter()
            .copied()
            .filter(|e| e.taxi_id() == taxi)
            .collect();
        assert_eq!(speeds(&mine).len(), n - 1, "taxi {taxi}");
        assert_eq!(distances(&mine).len(), n - 1, "taxi {taxi}");
        assert_eq!(averages(&mine).len(), n - 2, "taxi {taxi}");
    }
}

#[tokio::test]
async fn test_out_of_order_within_batch_is_sorted() {
    let sorted = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 60, 10.5, 10.0),
        ping(1, 120, 10.0, 10.0),
    ])
    .await;
    let shuffled = run_single_batch(vec![
        ping(1, 120, 10.0, 10.0),
        ping(1, 0, 10.0, 10.0),
        ping(1, 60, 10.5, 10.0),
    ])
    .await;

    assert_eq!(sorted, shuffled);
}

#[tokio::test]
async fn test_state_carries_across_batches() {
    let engine = Engine::new(Arc::new(MemoryStore::new()), 2);

    let first = engine
        .process_batch(Batch::new(
            BatchId(1),
            vec![ping(1, 0, 10.0, 10.0), ping(1, 60, 10.5, 10.0)],
        ))
        .await
        .unwrap();
    let second = engine
        .process_batch(Batch::new(BatchId(2), vec![ping(1, 120, 10.0, 10.0)]))
        .await
        .unwrap();

    let whole = run_single_batch(vec![
        ping(1, 0, 10.0, 10.0),
        ping(1, 60, 10.5, 10.0),
        ping(1, 120, 10.0, 10.0),
    ])
    .await;

    let mut split = first.emissions;
    split.extend(second.emissions);
    assert_eq!(split, whole);
}

#[tokio::test]
async fn test_late_reading_in_later_batch() {
    let engine = Engine::new(Arc::new(MemoryStore::new()), 2);
    engine
        .process_batch(Batch::new(
            BatchId(1),
            vec![
                ping(1, 0, 10.0, 10.0),
                ping(1, 60, 10.5, 10.0),
                ping(1, 120, 10.0, 10.0),
            ],
        ))
        .await
        .unwrap();

    let late = engine
        .process_batch(Batch::new(BatchId(2), vec![ping(1, 90, 10.2, 10.0)]))
        .await
        .unwrap();

    let leg = haversine(10.5, 10.0, 10.0, 10.0);
    assert_eq!(speeds(&late.emissions)[0].speed, 0.0);
    assert_eq!(averages(&late.emissions)[0].average_speed, leg);
    let total = distances(&late.emissions)[0].distance;
    assert!(total > haversine(10.0, 10.0, 10.5, 10.0) + leg);
}
