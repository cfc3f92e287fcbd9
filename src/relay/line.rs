use super::ActuatorError;
use rppal::gpio::{Gpio, OutputPin};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Electrical level of the control line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// A single digital output.
pub trait OutputLine: Send {
    /// Configures the line as an output and drives `initial` in the same step.
    fn configure_output(&mut self, initial: Level) -> Result<(), ActuatorError>;

    fn drive(&mut self, level: Level) -> Result<(), ActuatorError>;

    /// Short name for log lines
    fn describe(&self) -> String;
}

/// GPIO line on the board's header, BCM numbering.
pub struct GpioLine {
    pin: u8,
    output: Option<OutputPin>,
}

impl GpioLine {
    pub fn new(pin: u8) -> Self {
        Self { pin, output: None }
    }
}

impl OutputLine for GpioLine {
    fn configure_output(&mut self, initial: Level) -> Result<(), ActuatorError> {
        let gpio = Gpio::new()
            .map_err(|e| ActuatorError::InitializationError(format!("GPIO unavailable: {}", e)))?;
        let pin = gpio
            .get(self.pin)
            .map_err(|e| ActuatorError::InitializationError(format!("pin {}: {}", self.pin, e)))?;

        // Output pins have no edge detection, so no interrupt can fire on this line.
        let mut output = match initial {
            Level::High => pin.into_output_high(),
            Level::Low => pin.into_output_low(),
        };
        // keep the relay in its last state if the process exits
        output.set_reset_on_drop(false);

        debug!("GPIO {} configured as output, level {:?}", self.pin, initial);
        self.output = Some(output);
        Ok(())
    }

    fn drive(&mut self, level: Level) -> Result<(), ActuatorError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| ActuatorError::NotConfigured(format!("GPIO {}", self.pin)))?;
        match level {
            Level::High => output.set_high(),
            Level::Low => output.set_low(),
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("GPIO {}", self.pin)
    }
}

/// In-memory line that records every level it is driven to. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLine {
    levels: Arc<Mutex<Vec<Level>>>,
    configured: bool,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every level written so far, oldest first
    pub fn history(&self) -> Vec<Level> {
        self.levels
            .lock()
            .map(|levels| levels.clone())
            .unwrap_or_default()
    }

    pub fn level(&self) -> Option<Level> {
        self.history().last().copied()
    }

    fn record(&self, level: Level) -> Result<(), ActuatorError> {
        self.levels
            .lock()
            .map_err(|_| ActuatorError::WriteError("simulated line poisoned".to_string()))?
            .push(level);
        Ok(())
    }
}

impl OutputLine for SimulatedLine {
    fn configure_output(&mut self, initial: Level) -> Result<(), ActuatorError> {
        self.configured = true;
        self.record(initial)
    }

    fn drive(&mut self, level: Level) -> Result<(), ActuatorError> {
        if !self.configured {
            return Err(ActuatorError::NotConfigured(self.describe()));
        }
        self.record(level)
    }

    fn describe(&self) -> String {
        "simulated line".to_string()
    }
}
