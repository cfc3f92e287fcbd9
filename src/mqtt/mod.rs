//! # MQTT Session Module
//!
//! Owns everything that talks to the broker: the supervised session, the readiness flag shared
//! with the heartbeat, and the heartbeat itself.
//!
//! ```text
//! mqtt/
//! ├── config.rs     - SessionConfig: endpoint, TLS trust anchor, credentials, sizing
//! ├── client.rs     - SessionClient trait over rumqttc's AsyncClient
//! ├── message.rs    - InboundMessage with receive timestamp
//! ├── readiness.rs  - ReadinessFlag, the one cross-task shared cell
//! ├── session.rs    - SessionMachine and the supervising SessionManager
//! └── heartbeat.rs  - periodic status publisher gated on readiness
//! ```
//!
//! ## Session lifecycle
//!
//! ```text
//!  Down ──start──► Connecting ──connected──► Ready ──disconnected──► Down
//!   ▲                  ▲                       │                      │
//!   │                  └──── retry elapsed ────┼──── (backoff) ◄──────┤
//!   │                                          ▼                      │
//!   └──────────────────────────────────── Failed ◄── transport error ─┘
//! ```
//!
//! Entering Ready sets the readiness flag and subscribes to the control topic exactly once.
//! Leaving Ready (to Down or Failed) clears the flag and schedules a supervised reconnect.
//! Plaintext and TLS brokers run through the same path; only [`SessionConfig`] differs.

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod message;
pub mod readiness;
pub mod session;

pub use client::SessionClient;
pub use config::{Credentials, Scheme, SessionConfig};
pub use heartbeat::{BeatOutcome, Heartbeat};
pub use message::InboundMessage;
pub use readiness::ReadinessFlag;
pub use session::{
    SessionAction, SessionEvent, SessionHandle, SessionMachine, SessionManager, SessionState,
};

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid broker endpoint '{uri}': {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("Failed to load trust anchor: {0}")]
    TrustAnchor(#[from] ConfigError),

    #[error("Failed to queue request: {0}")]
    Request(#[from] rumqttc::ClientError),
}
