//! Voice session registry
//!
//! Maintains short-lived, tenant-scoped sessions routed to the external
//! realtime speech provider. The registry owns session identity, the
//! lifecycle state machine and metric accounting; speech processing
//! stays on the provider side.

pub mod registry;
pub mod session;

pub use registry::{
    InputOutcome, RegistryConfig, RegistryStatus, VoiceSessionRegistry,
};
pub use session::{
    AudioConfig, SessionMetrics, VoiceInput, VoiceSessionConfig, VoiceSessionStatus,
    VoiceSessionView, LatencyKind,
};

use thiserror::Error;

/// Voice session errors
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Cross-tenant access denied")]
    Forbidden,

    #[error("Session capacity reached")]
    CapacityReached,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Realtime provider error: {0}")]
    Provider(String),
}

impl From<VoiceError> for sitevoice_core::Error {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::NotFound(what) => sitevoice_core::Error::NotFound(what),
            VoiceError::Forbidden => {
                sitevoice_core::Error::Forbidden("session belongs to another tenant".to_string())
            },
            VoiceError::CapacityReached => {
                sitevoice_core::Error::Transient("voice session capacity reached".to_string())
            },
            VoiceError::InvalidTransition { from, to } => sitevoice_core::Error::Validation(
                format!("invalid session transition from {} to {}", from, to),
            ),
            VoiceError::Provider(msg) => sitevoice_core::Error::Transient(msg),
        }
    }
}
