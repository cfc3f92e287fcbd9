//! Relay output and command handling
//!
//! ```text
//! payload ──► Command::decode ──► CommandDispatcher ──► Actuator<Armed> ──► OutputLine
//!                                                        (active-low)        (GPIO / simulated)
//! ```
//!
//! The relay board is active-low: driving the control line low energizes the relay. The line is
//! driven high (de-energized) as soon as it is configured, before any network activity.

pub mod actuator;
pub mod dispatcher;
pub mod line;

pub use actuator::{Actuator, ActuatorState, Armed, Unconfigured};
pub use dispatcher::{Command, CommandDispatcher};
pub use line::{GpioLine, Level, OutputLine, SimulatedLine};

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Failed to configure output line: {0}")]
    InitializationError(String),

    #[error("Output line {0} used before it was configured")]
    NotConfigured(String),

    #[error("Failed to drive output line: {0}")]
    WriteError(String),
}
