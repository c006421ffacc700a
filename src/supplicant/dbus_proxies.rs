// D-Bus proxy trait definitions for the wpa_supplicant interfaces.
// These use zbus's #[proxy] macro to auto-generate typed async clients.

use std::collections::HashMap;
use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

// ── Supplicant Root Interface ─────────────────────────────────────────

#[proxy(
    interface = "fi.w1.wpa_supplicant1",
    default_service = "fi.w1.wpa_supplicant1",
    default_path = "/fi/w1/wpa_supplicant1"
)]
pub trait Supplicant {
    /// Register a network interface ("Ifname", "Driver", ...)
    fn create_interface(&self, args: HashMap<&str, Value<'_>>) -> zbus::Result<OwnedObjectPath>;

    /// Object path of an already-registered interface
    fn get_interface(&self, ifname: &str) -> zbus::Result<OwnedObjectPath>;

    /// Deregister a network interface
    fn remove_interface(&self, path: &ObjectPath<'_>) -> zbus::Result<()>;

    /// Paths of all registered interfaces
    #[zbus(property)]
    fn interfaces(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Signal: interface registered
    #[zbus(signal)]
    fn interface_added(
        &self,
        path: OwnedObjectPath,
        properties: HashMap<String, OwnedValue>,
    ) -> zbus::Result<()>;

    /// Signal: interface deregistered
    #[zbus(signal)]
    fn interface_removed(&self, path: OwnedObjectPath) -> zbus::Result<()>;
}

// ── Interface Object ──────────────────────────────────────────────────

#[proxy(
    interface = "fi.w1.wpa_supplicant1.Interface",
    default_service = "fi.w1.wpa_supplicant1"
)]
pub trait Interface {
    /// Trigger a scan ("Type": "active" or "passive")
    fn scan(&self, args: HashMap<&str, Value<'_>>) -> zbus::Result<()>;

    /// Disassociate from the current network
    fn disconnect(&self) -> zbus::Result<()>;

    /// Add a network block, returning its object path
    fn add_network(&self, args: HashMap<&str, Value<'_>>) -> zbus::Result<OwnedObjectPath>;

    /// Mark a network block as the one to associate with
    fn select_network(&self, path: &ObjectPath<'_>) -> zbus::Result<()>;

    /// Drop every configured network block
    fn remove_all_networks(&self) -> zbus::Result<()>;

    /// Supplicant state string ("scanning", "completed", ...)
    #[zbus(property)]
    fn state(&self) -> zbus::Result<String>;

    /// Kernel interface name (e.g., "wlan0")
    #[zbus(property)]
    fn ifname(&self) -> zbus::Result<String>;

    /// Whether a scan is in progress
    #[zbus(property)]
    fn scanning(&self) -> zbus::Result<bool>;

    /// Signal: scan finished
    #[zbus(signal)]
    fn scan_done(&self, success: bool) -> zbus::Result<()>;

    /// Signal: BSS appeared in the scan results
    #[zbus(signal, name = "BSSAdded")]
    fn bss_added(
        &self,
        path: OwnedObjectPath,
        properties: HashMap<String, OwnedValue>,
    ) -> zbus::Result<()>;

    /// Signal: BSS dropped from the scan results
    #[zbus(signal, name = "BSSRemoved")]
    fn bss_removed(&self, path: OwnedObjectPath) -> zbus::Result<()>;
}

// ── BSS Object ────────────────────────────────────────────────────────

#[proxy(
    interface = "fi.w1.wpa_supplicant1.BSS",
    default_service = "fi.w1.wpa_supplicant1"
)]
pub trait Bss {
    /// SSID as bytes
    #[zbus(property, name = "SSID")]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;

    /// BSSID as raw MAC bytes
    #[zbus(property, name = "BSSID")]
    fn bssid(&self) -> zbus::Result<Vec<u8>>;

    /// Signal level in dBm
    #[zbus(property)]
    fn signal(&self) -> zbus::Result<i16>;

    /// Frequency in MHz
    #[zbus(property)]
    fn frequency(&self) -> zbus::Result<u16>;

    /// Whether the BSS requires privacy (WEP/WPA)
    #[zbus(property)]
    fn privacy(&self) -> zbus::Result<bool>;
}
