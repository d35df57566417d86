//! Session transport contract

use serde::Serialize;
use thiserror::Error;

use super::JoinCode;

/// Relay/session API failure. Recovered by resetting the lobby, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error("Relay allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Unknown join code {0}")]
    UnknownJoinCode(JoinCode),

    #[error("No active session")]
    NoActiveSession,
}

/// Where participants reach the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointInfo {
    pub address: String,
    pub max_connections: usize,
}

/// Relay session broker: allocates sessions, hands out join codes, closes them
pub trait SessionTransport {
    fn create_session(&self, max_connections: usize)
        -> Result<(JoinCode, EndpointInfo), SessionFault>;

    fn join_session(&self, code: &JoinCode) -> Result<EndpointInfo, SessionFault>;

    /// Begin closing the session. Completion is observed through `is_listening`.
    fn shutdown(&self);

    fn is_listening(&self) -> bool;
}
