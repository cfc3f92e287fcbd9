//! Link drivers
//!
//! A [`LinkDriver`] is the boundary to whatever actually owns the radio. Drivers never block
//! the runtime: initialization is awaited once at boot, association requests return immediately
//! and their outcome arrives later as a [`LinkEvent`] on the channel handed over in
//! [`LinkDriver::init`].

use super::{LinkError, LinkEvent};
use crate::config::{LinkConfig, Secret};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Seconds `nmcli` may spend on one activation, including DHCP
const NMCLI_ACTIVATION_TIMEOUT_SECS: u32 = 30;

pub trait LinkDriver: Send {
    /// Brings up the interface and starts delivering notifications through `events`.
    async fn init(&mut self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError>;

    /// Requests association with the configured network. Must return promptly.
    fn request_association(&mut self) -> Result<(), LinkError>;
}

/// Driver for hosts whose operating system already manages the link
#[derive(Debug, Default)]
pub struct HostDriver {
    events: Option<mpsc::Sender<LinkEvent>>,
}

impl HostDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkDriver for HostDriver {
    async fn init(&mut self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
        events
            .try_send(LinkEvent::StationStarted)
            .map_err(|e| LinkError::InitializationError(e.to_string()))?;
        self.events = Some(events);
        info!("Link managed by host, skipping station control");
        Ok(())
    }

    fn request_association(&mut self) -> Result<(), LinkError> {
        let events = self.events.as_ref().ok_or(LinkError::NotInitialized)?;
        events
            .try_send(LinkEvent::AddressAcquired)
            .map_err(|e| LinkError::AssociationError(e.to_string()))
    }
}

/// NetworkManager-backed station driver.
///
/// Association runs `nmcli device wifi connect`, which returns once the interface has an
/// address. A watcher task polls the interface state to detect link loss and links that
/// NetworkManager restored on its own.
pub struct NmcliDriver {
    ssid: String,
    passphrase: Secret,
    interface: String,
    watch_interval: Duration,
    events: Option<mpsc::Sender<LinkEvent>>,
}

impl NmcliDriver {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            ssid: config.ssid.clone(),
            passphrase: config.passphrase.clone(),
            interface: config.interface.clone(),
            watch_interval: config.watch_interval(),
            events: None,
        }
    }

    fn connect_command(&self) -> Command {
        let mut command = Command::new("nmcli");
        command
            .arg("--wait")
            .arg(NMCLI_ACTIVATION_TIMEOUT_SECS.to_string())
            .args(["device", "wifi", "connect"])
            .arg(&self.ssid);
        if !self.passphrase.is_empty() {
            command.arg("password").arg(self.passphrase.expose());
        }
        command
            .arg("ifname")
            .arg(&self.interface)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl LinkDriver for NmcliDriver {
    async fn init(&mut self, events: mpsc::Sender<LinkEvent>) -> Result<(), LinkError> {
        let radio = Command::new("nmcli")
            .args(["radio", "wifi", "on"])
            .output()
            .await
            .map_err(|e| LinkError::InitializationError(format!("nmcli not available: {}", e)))?;
        if !radio.status.success() {
            return Err(LinkError::InitializationError(format!(
                "failed to enable wifi radio: {}",
                String::from_utf8_lossy(&radio.stderr).trim()
            )));
        }

        tokio::spawn(watch_interface(
            self.interface.clone(),
            self.watch_interval,
            events.clone(),
        ));

        events
            .try_send(LinkEvent::StationStarted)
            .map_err(|e| LinkError::InitializationError(e.to_string()))?;
        self.events = Some(events);
        info!("Station mode on {} started", self.interface);
        Ok(())
    }

    fn request_association(&mut self) -> Result<(), LinkError> {
        let events = self.events.clone().ok_or(LinkError::NotInitialized)?;
        let mut command = self.connect_command();
        let ssid = self.ssid.clone();

        info!("Associating with '{}'", ssid);
        tokio::spawn(async move {
            let event = match command.output().await {
                Ok(output) if output.status.success() => {
                    info!("Wi-Fi connected to '{}' and address received", ssid);
                    LinkEvent::AddressAcquired
                }
                Ok(output) => {
                    warn!(
                        "Association with '{}' failed: {}",
                        ssid,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    LinkEvent::Disconnected
                }
                Err(e) => {
                    error!("Failed to run nmcli: {}", e);
                    LinkEvent::Disconnected
                }
            };
            if events.send(event).await.is_err() {
                debug!("Link manager gone, dropping association result");
            }
        });
        Ok(())
    }
}

/// Polls `nmcli` and reports changes of the interface's connected state.
async fn watch_interface(
    interface: String,
    period: Duration,
    events: mpsc::Sender<LinkEvent>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut was_connected: Option<bool> = None;

    loop {
        interval.tick().await;

        let output = match Command::new("nmcli")
            .args(["-t", "-f", "DEVICE,STATE", "device", "status"])
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to poll interface state: {}", e);
                continue;
            }
        };

        let Some(connected) =
            parse_device_state(&String::from_utf8_lossy(&output.stdout), &interface)
        else {
            debug!("Interface {} not listed by nmcli", interface);
            continue;
        };

        let event = match (was_connected, connected) {
            (Some(true), false) => Some(LinkEvent::Disconnected),
            (Some(false), true) => Some(LinkEvent::AddressAcquired),
            _ => None,
        };
        was_connected = Some(connected);

        if let Some(event) = event {
            debug!("Interface {} changed: {:?}", interface, event);
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Reads `DEVICE:STATE` lines as printed by `nmcli -t -f DEVICE,STATE device status`.
/// Returns whether `interface` is fully connected, or `None` if it is not listed.
fn parse_device_state(output: &str, interface: &str) -> Option<bool> {
    output.lines().find_map(|line| {
        let (device, state) = line.split_once(':')?;
        (device == interface).then(|| state.trim() == "connected")
    })
}
