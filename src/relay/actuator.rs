//! Relay actuator with a compile-time enforced lifecycle
//!
//! ```text
//! Unconfigured ──initialize()──► Armed
//!                (line driven to the safe level)
//! ```
//!
//! Only an `Actuator<Armed>` exposes [`Actuator::set`], so no code path can drive the relay
//! before the safe default has been applied.

use super::{ActuatorError, Level, OutputLine};
use statum::{machine, state};
use tracing::{debug, info};

/// Logical relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Energized,
    DeEnergized,
}

impl ActuatorState {
    /// Line level encoding this state. The relay board is active-low.
    pub fn level(self) -> Level {
        match self {
            ActuatorState::Energized => Level::Low,
            ActuatorState::DeEnergized => Level::High,
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum ActuatorLifecycle {
    Unconfigured,
    Armed,
}

#[machine]
pub struct Actuator<S: ActuatorLifecycle> {
    line: Box<dyn OutputLine>,
    current: ActuatorState,
}

impl Actuator<Unconfigured> {
    pub fn create(line: Box<dyn OutputLine>) -> Self {
        Self::new(line, ActuatorState::DeEnergized)
    }

    /// Configures the line as an output at the de-energized level.
    pub fn initialize(mut self) -> Result<Actuator<Armed>, ActuatorError> {
        let safe = ActuatorState::DeEnergized;
        self.line.configure_output(safe.level())?;
        self.current = safe;

        info!(
            "Relay on {} configured, default {:?}",
            self.line.describe(),
            safe
        );
        Ok(self.transition())
    }
}

impl Actuator<Armed> {
    /// Drives the relay to `target`. Setting the current state again writes nothing.
    pub fn set(&mut self, target: ActuatorState) -> Result<(), ActuatorError> {
        if self.current == target {
            debug!("Relay already {:?}", target);
            return Ok(());
        }

        self.line.drive(target.level())?;
        self.current = target;
        info!("Relay {:?} (line {:?})", target, target.level());
        Ok(())
    }

    pub fn state(&self) -> ActuatorState {
        self.current
    }
}
