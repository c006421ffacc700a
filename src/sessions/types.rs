use std::fmt;

/// Coarse lifecycle of a supplicant-side interface object.
///
/// States are linear: Init -> Starting -> Ready -> Down, and may only move
/// forward. Once an interface reaches Down it cannot be re-initialized; the
/// session must be torn down and a new one created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceState {
    /// Created, waiting for pending backend requests to complete
    Init,
    /// Backend accepted the setup request
    Starting,
    /// Ready for use
    Ready,
    /// Removed or otherwise invalid; terminal
    Down,
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Down => write!(f, "down"),
        }
    }
}

impl InterfaceState {
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Down)
    }
}

/// Authentication/association progress reported by the supplicant for the
/// current connection attempt.
///
/// Unlike [`InterfaceState`] this is not monotonic: the backend may regress
/// (e.g. Associated -> Scanning on a link drop), so every reported value is
/// an authoritative replacement rather than a step counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Inactive,
    Scanning,
    Associating,
    Associated,
    FourWayHandshake,
    GroupHandshake,
    Completed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Inactive => write!(f, "inactive"),
            Self::Scanning => write!(f, "scanning"),
            Self::Associating => write!(f, "associating"),
            Self::Associated => write!(f, "associated"),
            Self::FourWayHandshake => write!(f, "4-way handshake"),
            Self::GroupHandshake => write!(f, "group handshake"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl ConnectionState {
    /// Parse a wpa_supplicant `State` property string.
    ///
    /// `authenticating` has no slot in this model and coarsens to
    /// [`ConnectionState::Associating`]; unknown strings yield `None`.
    pub fn from_wpa(state: &str) -> Option<Self> {
        match state {
            "disconnected" => Some(Self::Disconnected),
            "inactive" => Some(Self::Inactive),
            "scanning" => Some(Self::Scanning),
            "authenticating" | "associating" => Some(Self::Associating),
            "associated" => Some(Self::Associated),
            "4way_handshake" => Some(Self::FourWayHandshake),
            "group_handshake" => Some(Self::GroupHandshake),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A backend-reported error: D-Bus error name (or a synthetic one) plus a
/// human-readable message. Non-fatal to the session unless followed by a
/// removal event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BackendFault {
    pub name: String,
    pub message: String,
}

impl BackendFault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// One scanned BSS, as reported by the backend during a scan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BssInfo {
    pub bssid: String,
    pub ssid: String,
    /// Signal level in dBm
    pub signal_dbm: i16,
    /// Frequency in MHz
    pub frequency: u32,
}

/// Identifier for one session incarnation, allocated from a counter owned by
/// the registry. Interface names can be reused across incarnations; ids are
/// never reused within one registry lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events a backend adapter feeds into the registry for one interface.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// The backend accepted the interface setup request
    SetupAccepted,
    /// The backend-side interface object is ready for use
    InterfaceReady,
    /// Setup failed before the interface became ready
    StartupFailed(BackendFault),
    /// The backend-side interface object is gone
    InterfaceRemoved,
    /// Progress report for the current connection attempt
    ConnectionState(ConnectionState),
    /// A previously requested scan finished (or the request itself failed)
    ScanDone { success: bool },
    /// A BSS showed up in scan results
    BssFound(BssInfo),
    /// Non-fatal backend error
    Error(BackendFault),
}

/// Events emitted through a session's dispatcher.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    InterfaceState {
        new_state: InterfaceState,
        old_state: InterfaceState,
    },
    ConnectionState {
        new_state: ConnectionState,
        old_state: ConnectionState,
    },
    ScanDone {
        success: bool,
    },
    BssFound(BssInfo),
    Error(BackendFault),
    /// The session is being destroyed; no further events follow
    Removed,
}

/// Events emitted through the registry's dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    SessionCreated { interface: String },
    SessionRemoved { interface: String },
}
