//! Link Manager - station lifecycle and reconnection
//!
//! The transition logic lives in [`LinkMachine`], which consumes [`LinkEvent`]s and emits
//! [`LinkAction`]s without touching any I/O. [`LinkManager`] owns the machine, the driver and
//! the reconnect timer, and runs as its own tokio task for the life of the process.
//!
//! # State Machine
//!
//! ```text
//!            StationStarted / backoff elapsed
//!   Down ─────────────────────────────────────► Connecting
//!    ▲                                               │
//!    │ Disconnected (schedules one reconnect)        │ AddressAcquired
//!    └──────────────────── Up ◄──────────────────────┘
//! ```

use super::{LinkDriver, LinkError};
use crate::backoff::Backoff;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Capacity of the notification channel handed to the driver
const LINK_EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Down,
    Connecting,
    Up,
}

/// Notifications delivered by the link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StationStarted,
    Disconnected,
    AddressAcquired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Ask the driver to associate now
    Associate,
    /// Ask the driver to associate once the backoff for `attempt` has elapsed
    ScheduleReconnect { attempt: u32 },
}

#[derive(Debug, Default)]
pub struct LinkMachine {
    state: LinkState,
    attempt: u32,
    retry_pending: bool,
}

impl LinkMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn handle(&mut self, event: LinkEvent) -> Option<LinkAction> {
        match event {
            LinkEvent::StationStarted => {
                info!("Station started, requesting association");
                self.retry_pending = false;
                self.state = LinkState::Connecting;
                Some(LinkAction::Associate)
            }
            LinkEvent::Disconnected => {
                if self.retry_pending {
                    debug!("Link already down with a reconnect pending");
                    return None;
                }
                self.state = LinkState::Down;
                self.attempt = self.attempt.saturating_add(1);
                self.retry_pending = true;
                Some(LinkAction::ScheduleReconnect {
                    attempt: self.attempt,
                })
            }
            LinkEvent::AddressAcquired => {
                info!("Link up, address acquired");
                self.state = LinkState::Up;
                self.attempt = 0;
                self.retry_pending = false;
                None
            }
        }
    }

    /// Called when the reconnect delay scheduled by the last loss has run out.
    pub fn retry_elapsed(&mut self) -> Option<LinkAction> {
        if !self.retry_pending {
            return None;
        }
        self.retry_pending = false;
        self.state = LinkState::Connecting;
        Some(LinkAction::Associate)
    }
}

/// Handle to the running link supervisor
pub struct LinkHandle {
    state: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Receiver that always holds the current [`LinkState`]
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

enum LinkInput {
    Notification(LinkEvent),
    RetryElapsed,
}

pub struct LinkManager<D: LinkDriver> {
    machine: LinkMachine,
    driver: D,
    backoff: Backoff,
    events: mpsc::Receiver<LinkEvent>,
    state_sender: watch::Sender<LinkState>,
}

impl<D: LinkDriver + 'static> LinkManager<D> {
    /// Initializes the driver and spawns the supervisor task.
    ///
    /// # Errors
    ///
    /// [`LinkError::InitializationError`] when the interface cannot be brought up. Callers treat
    /// this as an unrecoverable boot failure.
    pub async fn start(mut driver: D, backoff: Backoff) -> Result<LinkHandle, LinkError> {
        let (event_sender, events) = mpsc::channel(LINK_EVENT_CAPACITY);
        driver.init(event_sender).await?;
        info!("Network interface initialized");

        let (state_sender, state) = watch::channel(LinkState::Down);
        let manager = Self {
            machine: LinkMachine::new(),
            driver,
            backoff,
            events,
            state_sender,
        };

        let task = tokio::spawn(manager.run());
        Ok(LinkHandle { state, task })
    }

    async fn run(mut self) {
        let mut retry_at: Option<Instant> = None;

        loop {
            let input = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => LinkInput::Notification(event),
                    None => {
                        error!("Link event source closed, link supervision stopped");
                        return;
                    }
                },
                _ = wait_until(retry_at) => LinkInput::RetryElapsed,
            };

            let mut next = match input {
                LinkInput::Notification(event) => {
                    debug!("Link event: {:?}", event);
                    self.machine.handle(event)
                }
                LinkInput::RetryElapsed => self.machine.retry_elapsed(),
            };
            if !self.machine.retry_pending() {
                retry_at = None;
            }

            while let Some(action) = next {
                next = self.apply(action, &mut retry_at);
            }

            self.state_sender.send_replace(self.machine.state());
        }
    }

    fn apply(&mut self, action: LinkAction, retry_at: &mut Option<Instant>) -> Option<LinkAction> {
        match action {
            LinkAction::Associate => match self.driver.request_association() {
                Ok(()) => {
                    debug!("Association requested");
                    None
                }
                Err(e) => {
                    warn!("Association request failed: {}", e);
                    self.machine.handle(LinkEvent::Disconnected)
                }
            },
            LinkAction::ScheduleReconnect { attempt } => {
                let delay = self.backoff.delay(attempt);
                warn!("Wi-Fi disconnected, reconnect attempt {} in {:?}", attempt, delay);
                *retry_at = Some(Instant::now() + delay);
                None
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingDriver {
        events: Arc<Mutex<Option<mpsc::Sender<LinkEvent>>>>,
        requests: Arc<Mutex<usize>>,
        fail_requests: bool,
    }

    impl RecordingDriver {
        fn requests(&self) -> usize {
            *self.requests.lock().unwrap()
        }

        async fn notify(&self, event: LinkEvent) {
            let sender = self.events.lock().unwrap().clone().unwrap();
            sender.send(event).await.unwrap();
        }
    }

    impl LinkDriver for RecordingDriver {
        async fn init(&mut self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn request_association(&mut self) -> Result<(), LinkError> {
            *self.requests.lock().unwrap() += 1;
            if self.fail_requests {
                return Err(LinkError::AssociationError("radio busy".to_string()));
            }
            Ok(())
        }
    }

    fn fixed_backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 0.0)
    }

    #[test]
    fn station_start_requests_association() {
        let mut machine = LinkMachine::new();
        assert_eq!(machine.state(), LinkState::Down);

        assert_eq!(
            machine.handle(LinkEvent::StationStarted),
            Some(LinkAction::Associate)
        );
        assert_eq!(machine.state(), LinkState::Connecting);

        assert_eq!(machine.handle(LinkEvent::AddressAcquired), None);
        assert_eq!(machine.state(), LinkState::Up);
    }

    #[test]
    fn link_loss_schedules_exactly_one_reconnect() {
        let mut machine = LinkMachine::new();

        assert_eq!(
            machine.handle(LinkEvent::Disconnected),
            Some(LinkAction::ScheduleReconnect { attempt: 1 })
        );
        assert_eq!(machine.handle(LinkEvent::Disconnected), None);
        assert_eq!(machine.state(), LinkState::Down);

        assert_eq!(machine.retry_elapsed(), Some(LinkAction::Associate));
        assert_eq!(machine.state(), LinkState::Connecting);
        assert_eq!(machine.retry_elapsed(), None);
    }

    #[test]
    fn attempts_grow_until_address_acquired() {
        let mut machine = LinkMachine::new();
        machine.handle(LinkEvent::StationStarted);

        for expected in 1..=3 {
            assert_eq!(
                machine.handle(LinkEvent::Disconnected),
                Some(LinkAction::ScheduleReconnect { attempt: expected })
            );
            machine.retry_elapsed();
        }

        machine.handle(LinkEvent::AddressAcquired);
        assert_eq!(
            machine.handle(LinkEvent::Disconnected),
            Some(LinkAction::ScheduleReconnect { attempt: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn link_down_without_prior_connect_issues_one_request() {
        let driver = RecordingDriver::default();
        let handle = LinkManager::start(driver.clone(), fixed_backoff()).await.unwrap();
        let state = handle.subscribe();

        driver.notify(LinkEvent::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(driver.requests(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(driver.requests(), 1);
        assert_eq!(*state.borrow(), LinkState::Connecting);

        handle.into_task().abort();
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_state_changes() {
        let driver = RecordingDriver::default();
        let handle = LinkManager::start(driver.clone(), fixed_backoff()).await.unwrap();
        let mut state = handle.subscribe();

        driver.notify(LinkEvent::StationStarted).await;
        driver.notify(LinkEvent::AddressAcquired).await;
        state.wait_for(|s| *s == LinkState::Up).await.unwrap();
        assert_eq!(driver.requests(), 1);

        driver.notify(LinkEvent::Disconnected).await;
        state.wait_for(|s| *s == LinkState::Down).await.unwrap();

        handle.into_task().abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_backs_off_and_retries() {
        let driver = RecordingDriver {
            fail_requests: true,
            ..Default::default()
        };
        let handle = LinkManager::start(driver.clone(), fixed_backoff()).await.unwrap();

        driver.notify(LinkEvent::StationStarted).await;
        // immediate request, then retries after 1s, 2s and 4s
        tokio::time::sleep(Duration::from_millis(7500)).await;
        assert_eq!(driver.requests(), 4);

        handle.into_task().abort();
    }
}
