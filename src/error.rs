use thiserror::Error;

use crate::sessions::types::InterfaceState;

/// Unified error type for wpamon
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a session already exists for interface {0}")]
    AlreadyExists(String),

    #[error("session for interface {0} is down and cannot be reused")]
    StaleSession(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("interface {interface} is not ready (state: {state})")]
    NotReady {
        interface: String,
        state: InterfaceState,
    },

    #[error("backend error {name}: {message}")]
    Backend { name: String, message: String },

    #[error("backend request channel is closed")]
    BackendUnavailable,

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("D-Bus fdo error: {0}")]
    DbusFdo(#[from] zbus::fdo::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
