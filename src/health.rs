//! Tumbling-window health aggregation over the merged batch stream.
//!
//! Batches are classified acceptable or bad as they arrive; every window
//! close emits one health sample, including for windows that saw no traffic
//! at all (which read as not operational).

use crate::bus::Bus;
use crate::reading::{HealthReading, HealthStatus, Quality, ReadingBatch};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub const HEALTH_WINDOW: Duration = Duration::from_secs(30);

/// Component name stamped on every emitted health sample.
pub const COMPONENT: &str = "acquisition";

const MSG_OPERATIONAL: &str = "operating normally";
const MSG_DEGRADED: &str = "not receiving all expected data";

/// A batch is acceptable if any reading carries GOOD or NONE quality.
///
/// NONE counts as acceptable here, matching long-standing upstream consumers
/// that tag synthetic values with NONE; an empty batch is never acceptable.
pub fn is_acceptable(batch: &ReadingBatch) -> bool {
    batch
        .readings
        .iter()
        .any(|r| matches!(r.quality, Quality::Good | Quality::None))
}

pub fn classify_window(acceptable: u64, bad: u64) -> HealthStatus {
    if acceptable > 0 {
        if bad == 0 {
            HealthStatus::Operational
        } else {
            HealthStatus::PartiallyOperational
        }
    } else {
        HealthStatus::NotOperational
    }
}

pub fn status_message(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Operational => MSG_OPERATIONAL,
        HealthStatus::PartiallyOperational | HealthStatus::NotOperational => MSG_DEGRADED,
    }
}

/// Run the health engine until the merged batch stream closes.
///
/// `window` is [`HEALTH_WINDOW`] in production; tests shrink it. The engine
/// must never die while the pipeline is alive, so emission is fire-and-forget
/// and nothing in the loop propagates an error.
pub async fn run_health_engine(
    mut batches: mpsc::Receiver<ReadingBatch>,
    bus: Bus,
    window: Duration,
) {
    info!("starting up telemetry acquisition");
    let mut window_close =
        tokio::time::interval_at(tokio::time::Instant::now() + window, window);
    window_close.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut acceptable = 0u64;
    let mut bad = 0u64;

    loop {
        tokio::select! {
            maybe_batch = batches.recv() => match maybe_batch {
                Some(batch) => {
                    if is_acceptable(&batch) {
                        acceptable += 1;
                    } else {
                        bad += 1;
                    }
                }
                None => break,
            },
            _ = window_close.tick() => {
                let status = classify_window(acceptable, bad);
                bus.publish_health(HealthReading::new(
                    COMPONENT,
                    status,
                    status_message(status),
                    Utc::now(),
                ));
                acceptable = 0;
                bad = 0;
            }
        }
    }
    info!("shutting down telemetry acquisition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use tokio::time::timeout;

    fn batch_with(quality: Quality) -> ReadingBatch {
        ReadingBatch::new(vec![Reading::new(
            "m:f",
            Utc::now(),
            if quality == Quality::Bad { f64::NAN } else { 1.0 },
            quality,
        )])
    }

    #[test]
    fn test_acceptable_requires_good_or_none() {
        assert!(is_acceptable(&batch_with(Quality::Good)));
        assert!(is_acceptable(&batch_with(Quality::None)));
        assert!(!is_acceptable(&batch_with(Quality::Bad)));
        assert!(!is_acceptable(&batch_with(Quality::Unknown)));
        assert!(!is_acceptable(&ReadingBatch::empty()));
    }

    #[test]
    fn test_window_classification() {
        assert_eq!(classify_window(1, 0), HealthStatus::Operational);
        assert_eq!(classify_window(5, 0), HealthStatus::Operational);
        assert_eq!(classify_window(1, 1), HealthStatus::PartiallyOperational);
        assert_eq!(classify_window(0, 0), HealthStatus::NotOperational);
        assert_eq!(classify_window(0, 7), HealthStatus::NotOperational);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(HealthStatus::Operational), "operating normally");
        assert_eq!(
            status_message(HealthStatus::NotOperational),
            "not receiving all expected data"
        );
        assert_eq!(
            status_message(HealthStatus::PartiallyOperational),
            "not receiving all expected data"
        );
    }

    async fn first_health(bus: &Bus) -> HealthReading {
        let mut health = bus.subscribe_health();
        timeout(Duration::from_secs(5), health.recv())
            .await
            .expect("no health sample before timeout")
            .unwrap()
    }

    #[tokio::test]
    async fn test_good_window_is_operational() {
        let bus = Bus::new();
        let (tx, rx) = mpsc::channel(8);
        let engine = tokio::spawn(run_health_engine(rx, bus.clone(), Duration::from_millis(200)));

        tx.send(batch_with(Quality::Good)).await.unwrap();
        let health = first_health(&bus).await;
        assert_eq!(health.status, HealthStatus::Operational);
        assert_eq!(health.component, COMPONENT);
        assert_eq!(health.message, "operating normally");

        drop(tx);
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_mixed_window_is_partially_operational() {
        let bus = Bus::new();
        let (tx, rx) = mpsc::channel(8);
        let engine = tokio::spawn(run_health_engine(rx, bus.clone(), Duration::from_millis(200)));

        tx.send(batch_with(Quality::Good)).await.unwrap();
        tx.send(ReadingBatch::empty()).await.unwrap();
        let health = first_health(&bus).await;
        assert_eq!(health.status, HealthStatus::PartiallyOperational);
        assert_eq!(health.message, "not receiving all expected data");

        drop(tx);
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_window_is_not_operational() {
        let bus = Bus::new();
        let (tx, rx) = mpsc::channel::<ReadingBatch>(8);
        let engine = tokio::spawn(run_health_engine(rx, bus.clone(), Duration::from_millis(200)));

        let health = first_health(&bus).await;
        assert_eq!(health.status, HealthStatus::NotOperational);

        drop(tx);
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn test_counts_reset_between_windows() {
        let bus = Bus::new();
        let (tx, rx) = mpsc::channel(8);
        let engine = tokio::spawn(run_health_engine(rx, bus.clone(), Duration::from_millis(200)));

        let mut health = bus.subscribe_health();
        tx.send(batch_with(Quality::Good)).await.unwrap();

        let first = timeout(Duration::from_secs(5), health.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, HealthStatus::Operational);

        // nothing sent in the second window
        let second = timeout(Duration::from_secs(5), health.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, HealthStatus::NotOperational);

        drop(tx);
        engine.await.unwrap();
    }
}
