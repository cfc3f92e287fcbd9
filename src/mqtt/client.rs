//! The narrow slice of the broker client that session handling and the heartbeat need.
//!
//! Both calls are non-blocking: they only queue a request for the event loop, so they are safe
//! to use from inside event handling.

use super::SessionError;
use rumqttc::{AsyncClient, QoS};

pub trait SessionClient: Send {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError>;

    /// Publishes a non-retained message.
    fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), SessionError>;
}

impl SessionClient for AsyncClient {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        self.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), SessionError> {
        self.try_publish(topic, qos, false, payload.to_vec())?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every request instead of talking to a broker. Clones share their records.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingClient {
        subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
        publishes: Arc<Mutex<Vec<(String, QoS, Vec<u8>)>>>,
        fail_publish: bool,
        fail_subscribe: bool,
    }

    impl RecordingClient {
        pub(crate) fn failing_publish() -> Self {
            Self {
                fail_publish: true,
                ..Default::default()
            }
        }

        pub(crate) fn failing_subscribe() -> Self {
            Self {
                fail_subscribe: true,
                ..Default::default()
            }
        }

        pub(crate) fn subscriptions(&self) -> Vec<(String, QoS)> {
            self.subscriptions.lock().unwrap().clone()
        }

        pub(crate) fn publishes(&self) -> Vec<(String, QoS, Vec<u8>)> {
            self.publishes.lock().unwrap().clone()
        }
    }

    impl SessionClient for RecordingClient {
        fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
            self.subscriptions.lock().unwrap().push((topic.to_string(), qos));
            if self.fail_subscribe {
                return Err(queue_full());
            }
            Ok(())
        }

        fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), SessionError> {
            self.publishes
                .lock()
                .unwrap()
                .push((topic.to_string(), qos, payload.to_vec()));
            if self.fail_publish {
                return Err(queue_full());
            }
            Ok(())
        }
    }

    fn queue_full() -> SessionError {
        SessionError::Request(rumqttc::ClientError::TryRequest(
            rumqttc::Request::Disconnect(rumqttc::Disconnect),
        ))
    }
}
