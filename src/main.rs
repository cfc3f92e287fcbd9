pub mod backoff;
pub mod config;
pub mod link;
pub mod mqtt;
pub mod relay;

use crate::backoff::Backoff;
use crate::config::{ActuatorBackend, DeviceConfig, LinkDriverKind};
use crate::link::{HostDriver, LinkHandle, LinkManager, NmcliDriver};
use crate::mqtt::{Heartbeat, ReadinessFlag, SessionConfig, SessionManager};
use crate::relay::{Actuator, Armed, CommandDispatcher, GpioLine, OutputLine, SimulatedLine};
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use std::future::{pending, Future};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Usage: `openrelay [CONFIG_PATH]`
#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(DeviceConfig::default_path);

    config::ensure_default_config(&config_path)
        .await
        .wrap_err("Config storage unavailable")?;
    let device = DeviceConfig::load(&config_path)
        .await
        .wrap_err_with(|| format!("Unusable configuration in {}", config_path.display()))?;
    info!("Configuration loaded from {}", config_path.display());

    let backoff = Backoff::from_config(&device.backoff);

    let link = start_link(&device, backoff)
        .await
        .wrap_err("Failed to bring up network link")?;

    let actuator = start_actuator(&device).wrap_err("Failed to configure relay output")?;
    let dispatcher = CommandDispatcher::new(actuator);

    info!("Waiting {:?} for the network to settle", device.boot.startup_delay());
    tokio::time::sleep(device.boot.startup_delay()).await;

    let readiness = ReadinessFlag::new();
    let session = match SessionConfig::from_device(&device) {
        Ok(session_config) => Some(SessionManager::start(
            &session_config,
            dispatcher,
            readiness.clone(),
            backoff,
            link.subscribe(),
        )),
        Err(e) => {
            // the relay keeps its safe default; no session means no commands and no heartbeat
            error!("Broker session not started: {}", e);
            None
        }
    };

    let heartbeat = session.as_ref().map(|session| {
        Heartbeat::new(
            session.client(),
            readiness.clone(),
            device.topics.status.clone(),
            device.heartbeat.payload.clone(),
            device.heartbeat.period(),
        )
        .spawn()
    });

    info!("Relay node running");

    tokio::select! {
        _ = watch_task(Some(link.into_task())) => Err(eyre!("Link supervisor stopped")),
        _ = watch_task(session.map(|s| s.into_task())) => Err(eyre!("Session supervisor stopped")),
        _ = watch_task(heartbeat) => Err(eyre!("Heartbeat stopped")),
    }
}

async fn start_link(device: &DeviceConfig, backoff: Backoff) -> Result<LinkHandle> {
    let handle = match device.link.driver {
        LinkDriverKind::Nmcli => {
            info!("Bringing up {} for network {}", device.link.interface, device.link.ssid);
            LinkManager::start(NmcliDriver::new(&device.link), backoff).await?
        }
        LinkDriverKind::Host => {
            info!("Network link managed by the host");
            LinkManager::start(HostDriver::new(), backoff).await?
        }
    };
    Ok(handle)
}

fn start_actuator(device: &DeviceConfig) -> Result<Actuator<Armed>> {
    let line: Box<dyn OutputLine> = match device.actuator.backend {
        ActuatorBackend::Gpio => Box::new(GpioLine::new(device.actuator.pin)),
        ActuatorBackend::Simulated => Box::new(SimulatedLine::new()),
    };
    Ok(Actuator::create(line).initialize()?)
}

/// Resolves once the task ends. A missing task never resolves.
fn watch_task(task: Option<JoinHandle<()>>) -> impl Future<Output = ()> {
    async move {
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    error!("Task ended abnormally: {}", e);
                }
            }
            None => pending::<()>().await,
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
