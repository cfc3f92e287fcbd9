//! Session Manager - supervised broker session
//!
//! [`SessionMachine`] is the pure transition function: it turns [`SessionEvent`]s into
//! [`SessionAction`]s and never performs I/O. [`SessionManager`] executes those actions
//! against a [`SessionClient`], the [`CommandDispatcher`] and the [`ReadinessFlag`], and
//! [`SessionManager::start`] wires it to a rumqttc event loop.
//!
//! # Supervision
//!
//! rumqttc reconnects whenever its event loop is polled again after an error. The supervisor
//! decides *when* that happens: after a loss it waits out the backoff for the current attempt
//! and for the link to be up, then polls again.

use super::{InboundMessage, ReadinessFlag, SessionClient, SessionConfig};
use crate::backoff::Backoff;
use crate::link::LinkState;
use crate::relay::CommandDispatcher;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delivery guarantee of the control subscription
const CONTROL_QOS: QoS = QoS::AtLeastOnce;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Down,
    Connecting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Connected,
    Disconnected,
    TransportError(String),
    Message(InboundMessage),
    /// The reconnect delay scheduled by the last loss has run out
    RetryElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    SetReadiness(bool),
    SubscribeControl,
    Dispatch(Vec<u8>),
    ScheduleReconnect { attempt: u32 },
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    control_topic: String,
    attempt: u32,
    retry_pending: bool,
}

impl SessionMachine {
    pub fn new(control_topic: impl Into<String>) -> Self {
        Self {
            state: SessionState::Down,
            control_topic: control_topic.into(),
            attempt: 0,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::Start => match self.state {
                SessionState::Down | SessionState::Failed if !self.retry_pending => {
                    info!("Session connecting");
                    self.state = SessionState::Connecting;
                    Vec::new()
                }
                _ => {
                    debug!("Start ignored in state {:?}", self.state);
                    Vec::new()
                }
            },
            SessionEvent::Connected => {
                if self.state == SessionState::Ready {
                    debug!("Duplicate connect acknowledgement ignored");
                    return Vec::new();
                }
                info!("Connected to MQTT broker");
                self.state = SessionState::Ready;
                self.attempt = 0;
                self.retry_pending = false;
                vec![
                    SessionAction::SetReadiness(true),
                    SessionAction::SubscribeControl,
                ]
            }
            SessionEvent::Disconnected => {
                warn!("Disconnected from MQTT broker");
                self.leave(SessionState::Down)
            }
            SessionEvent::TransportError(reason) => {
                warn!("MQTT error occurred: {}", reason);
                self.leave(SessionState::Failed)
            }
            SessionEvent::Message(message) => {
                if message.topic() == self.control_topic {
                    debug!("Message received: {}", message);
                    vec![SessionAction::Dispatch(message.into_payload())]
                } else {
                    debug!("Message on unexpected topic dropped: {}", message);
                    Vec::new()
                }
            }
            SessionEvent::RetryElapsed => {
                if !self.retry_pending {
                    return Vec::new();
                }
                self.retry_pending = false;
                self.state = SessionState::Connecting;
                info!("Reconnecting to MQTT broker (attempt {})", self.attempt);
                Vec::new()
            }
        }
    }

    fn leave(&mut self, next: SessionState) -> Vec<SessionAction> {
        self.state = next;
        let mut actions = vec![SessionAction::SetReadiness(false)];
        if !self.retry_pending {
            self.attempt = self.attempt.saturating_add(1);
            self.retry_pending = true;
            actions.push(SessionAction::ScheduleReconnect {
                attempt: self.attempt,
            });
        }
        actions
    }
}

/// Handle to the running session task
pub struct SessionHandle {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Client for publishing on this session
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

pub struct SessionManager<C: SessionClient> {
    machine: SessionMachine,
    client: C,
    dispatcher: CommandDispatcher,
    readiness: ReadinessFlag,
    backoff: Backoff,
}

impl<C: SessionClient> SessionManager<C> {
    pub fn new(
        control_topic: impl Into<String>,
        client: C,
        dispatcher: CommandDispatcher,
        readiness: ReadinessFlag,
        backoff: Backoff,
    ) -> Self {
        Self {
            machine: SessionMachine::new(control_topic),
            client,
            dispatcher,
            readiness,
            backoff,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Runs one event through the machine and carries out its actions.
    ///
    /// Returns the delay to wait before feeding [`SessionEvent::RetryElapsed`] when a reconnect
    /// was scheduled. A control subscription that cannot be queued fails the session.
    pub fn handle_event(&mut self, event: SessionEvent) -> Option<Duration> {
        let mut reconnect_in = None;
        let mut follow_up = None;

        for action in self.machine.handle(event) {
            match action {
                SessionAction::SetReadiness(ready) => self.readiness.set(ready),
                SessionAction::SubscribeControl => {
                    let topic = self.machine.control_topic();
                    match self.client.subscribe(topic, CONTROL_QOS) {
                        Ok(()) => info!("Subscribed to {}", topic),
                        Err(e) => {
                            error!("Failed to subscribe to {}: {}", topic, e);
                            follow_up = Some(SessionEvent::TransportError(format!(
                                "subscription to {} not queued: {}",
                                topic, e
                            )));
                        }
                    }
                }
                SessionAction::Dispatch(payload) => self.dispatcher.dispatch(&payload),
                SessionAction::ScheduleReconnect { attempt } => {
                    let delay = self.backoff.delay(attempt);
                    info!("Reconnect attempt {} scheduled in {:?}", attempt, delay);
                    reconnect_in = Some(delay);
                }
            }
        }

        if let Some(event) = follow_up {
            reconnect_in = self.handle_event(event).or(reconnect_in);
        }

        reconnect_in
    }
}

impl SessionManager<AsyncClient> {
    /// Creates the broker client for `config` and spawns the supervised session task.
    ///
    /// The session starts connecting as soon as `link` reports [`LinkState::Up`].
    pub fn start(
        config: &SessionConfig,
        dispatcher: CommandDispatcher,
        readiness: ReadinessFlag,
        backoff: Backoff,
        link: watch::Receiver<LinkState>,
    ) -> SessionHandle {
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), config.capacity());
        info!(
            "Session configured for {} (trust anchor: {}, credentials: {})",
            config.endpoint(),
            config.has_trust_anchor(),
            config.credentials().is_some()
        );

        let manager = Self::new(
            config.control_topic(),
            client.clone(),
            dispatcher,
            readiness,
            backoff,
        );
        let task = tokio::spawn(manager.supervise(eventloop, link));

        SessionHandle { client, task }
    }

    async fn supervise(mut self, mut eventloop: EventLoop, mut link: watch::Receiver<LinkState>) {
        self.handle_event(SessionEvent::Start);

        loop {
            if self.state() == SessionState::Connecting && *link.borrow() != LinkState::Up {
                debug!("Waiting for link before connecting");
                if link.wait_for(|state| *state == LinkState::Up).await.is_err() {
                    warn!("Link supervisor gone, connecting without link state");
                }
            }

            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => SessionEvent::Connected,
                Ok(Event::Incoming(Packet::Publish(publish))) => SessionEvent::Message(
                    InboundMessage::new(publish.topic.clone(), publish.payload.to_vec()),
                ),
                Ok(Event::Incoming(Packet::Disconnect)) => SessionEvent::Disconnected,
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                    continue;
                }
                Ok(_) => continue,
                Err(e) => SessionEvent::TransportError(e.to_string()),
            };

            if let Some(delay) = self.handle_event(event) {
                // drop whatever is left of the connection so the next poll dials afresh
                eventloop.clean();
                tokio::time::sleep(delay).await;
                self.handle_event(SessionEvent::RetryElapsed);
            }
        }
    }
}
