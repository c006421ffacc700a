use tracing::{info, warn};

use crate::supplicant::dbus_proxies::SupplicantProxy;

/// Access level detected for the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// Full access (root, or the bus policy allows us)
    Full,
    /// The supplicant is reachable but may reject mutating calls
    Limited,
    /// The supplicant could not be reached at all
    Unreachable,
}

impl AccessLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Full => "full access",
            Self::Limited => "limited access",
            Self::Unreachable => "supplicant unreachable",
        }
    }

    pub fn can_configure(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Probe what wpa_supplicant will let us do.
///
/// The system bus policy for wpa_supplicant usually restricts mutating calls
/// to root; this only warns early rather than gating anything, since the bus
/// policy has the final say per call.
pub async fn check_access(connection: &zbus::Connection) -> AccessLevel {
    let euid = unsafe { libc::geteuid() };

    let proxy = match SupplicantProxy::new(connection).await {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("Supplicant proxy setup failed: {e}");
            return AccessLevel::Unreachable;
        }
    };

    // Interfaces is readable under the default policy; it tells us whether
    // the supplicant is up without touching anything.
    match proxy.interfaces().await {
        Ok(paths) => {
            if euid == 0 {
                info!(
                    "Running as root, supplicant reachable ({} interface(s))",
                    paths.len()
                );
                AccessLevel::Full
            } else {
                warn!("Running as uid {euid}; interface setup may be denied by bus policy");
                AccessLevel::Limited
            }
        }
        Err(e) => {
            let rendered = e.to_string();
            if rendered.contains("org.freedesktop.DBus.Error.AccessDenied") {
                warn!("Bus policy denies supplicant access; run as root");
                AccessLevel::Limited
            } else {
                warn!("wpa_supplicant not reachable: {e}");
                AccessLevel::Unreachable
            }
        }
    }
}
