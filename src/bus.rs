//! Fire-and-forget publication of decoded readings and health samples.
//!
//! The bus is a fixed pair of broadcast channels registered at startup; any
//! number of subscribers may consume each stream without affecting one
//! another's delivery. Publishing with no subscribers is not an error.

use crate::reading::{HealthReading, ReadingBatch};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Bus {
    readings: broadcast::Sender<ReadingBatch>,
    health: broadcast::Sender<HealthReading>,
}

impl Bus {
    pub fn new() -> Self {
        let (readings, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (health, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { readings, health }
    }

    pub fn publish_readings(&self, batch: ReadingBatch) {
        let _ = self.readings.send(batch);
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<ReadingBatch> {
        self.readings.subscribe()
    }

    pub fn publish_health(&self, health: HealthReading) {
        let _ = self.health.send(health);
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthReading> {
        self.health.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Quality, Reading};
    use chrono::Utc;

    #[tokio::test]
    async fn test_all_subscribers_see_each_batch() {
        let bus = Bus::new();
        let mut first = bus.subscribe_readings();
        let mut second = bus.subscribe_readings();

        let batch = ReadingBatch::new(vec![Reading::new("m:f", Utc::now(), 1.0, Quality::Good)]);
        bus.publish_readings(batch.clone());

        assert_eq!(first.recv().await.unwrap(), batch);
        assert_eq!(second.recv().await.unwrap(), batch);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = Bus::new();
        bus.publish_readings(ReadingBatch::empty());
    }
}
