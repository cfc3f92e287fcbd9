use super::{Actuator, ActuatorState, Armed};
use tracing::{error, warn};

/// Command vocabulary of the control topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    Unrecognized(Vec<u8>),
}

impl Command {
    /// Exact, case-sensitive match over the whole payload. No trimming.
    pub fn decode(payload: &[u8]) -> Self {
        match payload {
            b"on" => Command::TurnOn,
            b"off" => Command::TurnOff,
            other => Command::Unrecognized(other.to_vec()),
        }
    }
}

/// Applies control-topic payloads to the relay. Sole writer of the actuator after boot.
pub struct CommandDispatcher {
    actuator: Actuator<Armed>,
}

impl CommandDispatcher {
    pub fn new(actuator: Actuator<Armed>) -> Self {
        Self { actuator }
    }

    pub fn dispatch(&mut self, payload: &[u8]) {
        let target = match Command::decode(payload) {
            Command::TurnOn => ActuatorState::Energized,
            Command::TurnOff => ActuatorState::DeEnergized,
            Command::Unrecognized(raw) => {
                warn!(
                    "Ignoring unrecognized command: {:?} ({} bytes)",
                    String::from_utf8_lossy(&raw),
                    raw.len()
                );
                return;
            }
        };

        if let Err(e) = self.actuator.set(target) {
            error!("Failed to switch relay to {:?}: {}", target, e);
        }
    }

    pub fn actuator_state(&self) -> ActuatorState {
        self.actuator.state()
    }
}
