use super::{ReadinessFlag, SessionClient};
use chrono::{DateTime, Local};
use rumqttc::QoS;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Result of a single heartbeat cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatOutcome {
    Published,
    /// The session was not ready; nothing was sent
    Skipped,
    Failed,
}

/// Publishes a fixed liveness payload on the status topic while the session is ready.
pub struct Heartbeat<C: SessionClient> {
    client: C,
    readiness: ReadinessFlag,
    topic: String,
    payload: Vec<u8>,
    period: Duration,
    last_published: Option<DateTime<Local>>,
}

impl<C: SessionClient + 'static> Heartbeat<C> {
    pub fn new(
        client: C,
        readiness: ReadinessFlag,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        period: Duration,
    ) -> Self {
        Self {
            client,
            readiness,
            topic: topic.into(),
            payload: payload.into(),
            period,
            last_published: None,
        }
    }

    pub fn last_published(&self) -> Option<DateTime<Local>> {
        self.last_published
    }

    /// One cycle: publish if ready, otherwise skip. Never blocks on the broker.
    pub fn beat(&mut self) -> BeatOutcome {
        if !self.readiness.is_ready() {
            warn!("MQTT not connected, skipping heartbeat");
            return BeatOutcome::Skipped;
        }

        match self.client.publish(&self.topic, QoS::AtLeastOnce, &self.payload) {
            Ok(()) => {
                self.last_published = Some(Local::now());
                debug!("Heartbeat sent on {}", self.topic);
                BeatOutcome::Published
            }
            Err(e) => {
                error!("Failed to publish heartbeat on {}: {}", self.topic, e);
                BeatOutcome::Failed
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Heartbeat on {} every {:?}", self.topic, self.period);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // the first tick completes immediately, so the first cycle runs at start
            ticker.tick().await;
            self.beat();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::client::testing::RecordingClient;

    const STATUS: &str = "esp32/heartbeat";

    fn heartbeat(client: RecordingClient, readiness: ReadinessFlag) -> Heartbeat<RecordingClient> {
        Heartbeat::new(client, readiness, STATUS, "I'm alive!", Duration::from_secs(10))
    }

    #[test]
    fn publishes_only_while_ready() {
        let client = RecordingClient::default();
        let readiness = ReadinessFlag::new();
        let mut heartbeat = heartbeat(client.clone(), readiness.clone());

        assert_eq!(heartbeat.beat(), BeatOutcome::Skipped);
        assert!(client.publishes().is_empty());
        assert!(heartbeat.last_published().is_none());

        readiness.set(true);
        assert_eq!(heartbeat.beat(), BeatOutcome::Published);
        assert_eq!(
            client.publishes(),
            vec![(STATUS.to_string(), QoS::AtLeastOnce, b"I'm alive!".to_vec())]
        );
        assert!(heartbeat.last_published().is_some());

        readiness.set(false);
        assert_eq!(heartbeat.beat(), BeatOutcome::Skipped);
        assert_eq!(client.publishes().len(), 1);
    }

    #[test]
    fn failed_publish_does_not_stop_later_cycles() {
        let client = RecordingClient::failing_publish();
        let readiness = ReadinessFlag::new();
        readiness.set(true);
        let mut heartbeat = heartbeat(client.clone(), readiness);

        assert_eq!(heartbeat.beat(), BeatOutcome::Failed);
        assert_eq!(heartbeat.beat(), BeatOutcome::Failed);
        assert_eq!(client.publishes().len(), 2);
        assert!(heartbeat.last_published().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_period() {
        let client = RecordingClient::default();
        let readiness = ReadinessFlag::new();
        readiness.set(true);

        let task = heartbeat(client.clone(), readiness).spawn();
        // ticks at 0, 10 and 20 seconds
        tokio::time::sleep(Duration::from_secs(25)).await;
        task.abort();

        assert_eq!(client.publishes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_readiness_returns() {
        let client = RecordingClient::default();
        let readiness = ReadinessFlag::new();

        let task = heartbeat(client.clone(), readiness.clone()).spawn();
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(client.publishes().is_empty());

        readiness.set(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        task.abort();

        assert_eq!(client.publishes().len(), 1);
    }
}
