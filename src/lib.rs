//! Session-state tracking for wpa_supplicant-managed interfaces.
//!
//! The `sessions` module is the core: a registry of per-interface sessions,
//! each running a one-way interface lifecycle and a supplicant-driven
//! connection state machine, with synchronous observer dispatch. It performs
//! no I/O; a backend adapter drains its request channel and feeds events
//! back. `supplicant` is the concrete adapter speaking to wpa_supplicant
//! over the system bus.

pub mod auth;
pub mod error;
pub mod event;
pub mod sessions;
pub mod supplicant;

pub use error::{SessionError, SessionResult};
pub use sessions::{Session, SessionRegistry};
pub use supplicant::{LinkEvent, SupplicantLink};
