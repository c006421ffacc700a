use tokio::sync::mpsc;

use crate::error::{SessionError, SessionResult};
use crate::sessions::config::SupplicantConfig;

/// Requests the session core hands to whatever backend drives it.
///
/// Every variant names the interface it concerns; the backend answers with
/// [`BackendEvent`](crate::sessions::types::BackendEvent)s routed back through
/// the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendRequest {
    /// Bring up a backend-side object for this interface
    CreateInterface {
        interface: String,
        is_wireless: bool,
    },
    /// Replace the interface's network configuration and start connecting
    SetConfig {
        interface: String,
        config: SupplicantConfig,
    },
    /// Drop the current association
    Disconnect { interface: String },
    /// Trigger a scan
    Scan { interface: String },
    /// Tear down the backend-side object for this interface
    RemoveInterface { interface: String },
}

impl BackendRequest {
    pub fn interface(&self) -> &str {
        match self {
            Self::CreateInterface { interface, .. }
            | Self::SetConfig { interface, .. }
            | Self::Disconnect { interface }
            | Self::Scan { interface }
            | Self::RemoveInterface { interface } => interface,
        }
    }
}

/// Sending half of the backend request channel.
///
/// Sends never block; if the backend has gone away every send fails with
/// [`SessionError::BackendUnavailable`].
#[derive(Debug, Clone)]
pub struct BackendHandle {
    tx: mpsc::UnboundedSender<BackendRequest>,
}

impl BackendHandle {
    pub fn create_interface(&self, interface: &str, is_wireless: bool) -> SessionResult<()> {
        self.send(BackendRequest::CreateInterface {
            interface: interface.to_owned(),
            is_wireless,
        })
    }

    pub fn set_config(&self, interface: &str, config: SupplicantConfig) -> SessionResult<()> {
        self.send(BackendRequest::SetConfig {
            interface: interface.to_owned(),
            config,
        })
    }

    pub fn disconnect(&self, interface: &str) -> SessionResult<()> {
        self.send(BackendRequest::Disconnect {
            interface: interface.to_owned(),
        })
    }

    pub fn scan(&self, interface: &str) -> SessionResult<()> {
        self.send(BackendRequest::Scan {
            interface: interface.to_owned(),
        })
    }

    pub fn remove_interface(&self, interface: &str) -> SessionResult<()> {
        self.send(BackendRequest::RemoveInterface {
            interface: interface.to_owned(),
        })
    }

    fn send(&self, request: BackendRequest) -> SessionResult<()> {
        self.tx
            .send(request)
            .map_err(|_| SessionError::BackendUnavailable)
    }
}

/// Create the request channel linking a registry to its backend adapter.
pub fn backend_channel() -> (BackendHandle, mpsc::UnboundedReceiver<BackendRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BackendHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_arrive_in_order() {
        let (handle, mut rx) = backend_channel();
        handle.create_interface("wlan0", true).unwrap();
        handle.scan("wlan0").unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            BackendRequest::CreateInterface {
                interface: "wlan0".into(),
                is_wireless: true,
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendRequest::Scan {
                interface: "wlan0".into(),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_after_backend_gone_fails() {
        let (handle, rx) = backend_channel();
        drop(rx);
        let err = handle.disconnect("wlan0").unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable));
    }

    #[test]
    fn request_names_its_interface() {
        let request = BackendRequest::Disconnect {
            interface: "eth0".into(),
        };
        assert_eq!(request.interface(), "eth0");
    }
}
