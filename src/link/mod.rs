//! Wireless station link supervision
//!
//! ```text
//! LinkDriver ─[LinkEvent]→ LinkManager ─[LinkState]→ watch channel ─→ SessionManager
//!     ▲                        │
//!     └── request_association ─┘  (after backoff on link loss)
//! ```
//!
//! 1. [`driver`] - brings up the interface and reports link notifications
//! 2. [`link_manager`] - pure transition function plus the task that executes it
//!
//! The manager self-heals: every loss of the link schedules exactly one new association
//! request, paced by [`crate::backoff::Backoff`]. Nothing outside this module can command the
//! link; other components only observe [`LinkState`].

pub mod driver;
pub mod link_manager;

pub use driver::{HostDriver, LinkDriver, NmcliDriver};
pub use link_manager::{LinkAction, LinkEvent, LinkHandle, LinkMachine, LinkManager, LinkState};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The network interface could not be brought up. Unrecoverable at boot.
    #[error("Failed to initialize network interface: {0}")]
    InitializationError(String),

    #[error("Failed to request association: {0}")]
    AssociationError(String),

    #[error("Link driver used before initialization")]
    NotInitialized,
}
