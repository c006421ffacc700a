use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zbus::fdo;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::Connection;

use crate::error::SessionResult;
use crate::sessions::backend::BackendRequest;
use crate::sessions::config::SupplicantConfig;
use crate::sessions::types::{BackendEvent, BackendFault, BssInfo, ConnectionState};
use crate::supplicant::dbus_proxies::{BssProxy, InterfaceProxy, SupplicantProxy};

const SUPPLICANT_SERVICE: &str = "fi.w1.wpa_supplicant1";
const ERR_INTERFACE_EXISTS: &str = "fi.w1.wpa_supplicant1.InterfaceExists";
const ERR_NOT_CONNECTED: &str = "fi.w1.wpa_supplicant1.NotConnected";

/// Everything the supplicant side reports to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Per-interface event, to be routed into the session registry
    Interface {
        interface: String,
        event: BackendEvent,
    },
    /// The supplicant knows an interface nothing here asked for
    InterfaceDiscovered { interface: String },
    /// wpa_supplicant dropped off the bus
    SupplicantVanished,
    /// wpa_supplicant (re)appeared on the bus
    SupplicantReturned,
}

struct InterfaceTask {
    path: OwnedObjectPath,
    listener: JoinHandle<()>,
}

/// The concrete backend: drives wpa_supplicant over the system bus.
///
/// Drains [`BackendRequest`]s from the registry side and answers with
/// [`LinkEvent`]s. Each interface the supplicant hands us gets a listener
/// task translating its signals; the link itself watches interface
/// registration and the supplicant's bus name.
pub struct SupplicantLink {
    connection: Connection,
    requests: mpsc::UnboundedReceiver<BackendRequest>,
    events: mpsc::UnboundedSender<LinkEvent>,
    interfaces: HashMap<String, InterfaceTask>,
}

impl SupplicantLink {
    /// Connect to the system bus and wire up a link.
    pub async fn connect(
        requests: mpsc::UnboundedReceiver<BackendRequest>,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<LinkEvent>)> {
        let connection = Connection::system().await?;
        Ok(Self::with_connection(connection, requests))
    }

    /// Wire up a link on an existing connection (useful against a session
    /// bus running a supplicant stand-in).
    pub fn with_connection(
        connection: Connection,
        requests: mpsc::UnboundedReceiver<BackendRequest>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                connection,
                requests,
                events,
                interfaces: HashMap::new(),
            },
            events_rx,
        )
    }

    /// Drive the link until the request channel closes.
    ///
    /// Announces interfaces the supplicant already has, then multiplexes
    /// registry requests, interface registration signals and the
    /// supplicant's bus-name ownership.
    pub async fn run(mut self) -> SessionResult<()> {
        let supplicant = SupplicantProxy::new(&self.connection).await?;
        let mut interface_added = supplicant.receive_interface_added().await?;
        let mut interface_removed = supplicant.receive_interface_removed().await?;

        let bus = fdo::DBusProxy::new(&self.connection).await?;
        let mut owner_changed = bus.receive_name_owner_changed().await?;

        self.announce_existing().await;

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle_request(request).await;
                }
                maybe = interface_added.next() => {
                    let Some(signal) = maybe else { break };
                    match signal.args() {
                        Ok(args) => self.on_interface_added(args.path().clone()).await,
                        Err(err) => debug!("bad InterfaceAdded signal: {err}"),
                    }
                }
                maybe = interface_removed.next() => {
                    let Some(signal) = maybe else { break };
                    match signal.args() {
                        Ok(args) => self.on_interface_removed(args.path()),
                        Err(err) => debug!("bad InterfaceRemoved signal: {err}"),
                    }
                }
                maybe = owner_changed.next() => {
                    let Some(signal) = maybe else { break };
                    match signal.args() {
                        Ok(args) => {
                            if args.name().as_str() == SUPPLICANT_SERVICE {
                                self.on_owner_changed(args.new_owner().is_none()).await;
                            }
                        }
                        Err(err) => debug!("bad NameOwnerChanged signal: {err}"),
                    }
                }
            }
        }

        for (_, task) in self.interfaces.drain() {
            task.listener.abort();
        }
        debug!("supplicant link stopped");
        Ok(())
    }

    // ── Request handling ──────────────────────────────────────────────────

    async fn handle_request(&mut self, request: BackendRequest) {
        match request {
            BackendRequest::CreateInterface {
                interface,
                is_wireless,
            } => {
                self.create_interface(&interface, is_wireless).await;
            }
            BackendRequest::SetConfig { interface, config } => {
                if let Err(fault) = self.set_config(&interface, &config).await {
                    warn!("{interface}: configuration push failed: {fault}");
                    self.send_event(&interface, BackendEvent::Error(fault));
                }
            }
            BackendRequest::Disconnect { interface } => {
                if let Err(fault) = self.disconnect(&interface).await {
                    warn!("{interface}: disconnect failed: {fault}");
                    self.send_event(&interface, BackendEvent::Error(fault));
                }
            }
            BackendRequest::Scan { interface } => {
                if let Err(fault) = self.scan(&interface).await {
                    debug!("{interface}: scan request failed: {fault}");
                    self.send_event(&interface, BackendEvent::ScanDone { success: false });
                }
            }
            BackendRequest::RemoveInterface { interface } => {
                self.remove_interface(&interface).await;
            }
        }
    }

    async fn create_interface(&mut self, interface: &str, is_wireless: bool) {
        self.send_event(interface, BackendEvent::SetupAccepted);
        match self.register_interface(interface, is_wireless).await {
            Ok(path) => {
                info!("{interface}: supplicant interface at {path}");
                self.send_event(interface, BackendEvent::InterfaceReady);
                self.attach(interface, path);
            }
            Err(err) => {
                let fault = fault_from_zbus(&err);
                warn!("{interface}: supplicant setup failed: {fault}");
                self.send_event(interface, BackendEvent::StartupFailed(fault));
            }
        }
    }

    /// CreateInterface, falling back to GetInterface when the supplicant
    /// already has the interface (left over from a previous run, or another
    /// client's).
    async fn register_interface(
        &self,
        interface: &str,
        is_wireless: bool,
    ) -> zbus::Result<OwnedObjectPath> {
        let supplicant = SupplicantProxy::new(&self.connection).await?;
        let driver = if is_wireless { "nl80211,wext" } else { "wired" };
        let mut args: HashMap<&str, Value<'_>> = HashMap::new();
        args.insert("Ifname", Value::from(interface));
        args.insert("Driver", Value::from(driver));

        match supplicant.create_interface(args).await {
            Ok(path) => Ok(path),
            Err(zbus::Error::MethodError(ref name, _, _))
                if name.as_str() == ERR_INTERFACE_EXISTS =>
            {
                debug!("{interface}: already registered, adopting");
                supplicant.get_interface(interface).await
            }
            Err(err) => Err(err),
        }
    }

    async fn set_config(
        &self,
        interface: &str,
        config: &SupplicantConfig,
    ) -> Result<(), BackendFault> {
        let proxy = self.interface_proxy(interface).await?;
        proxy
            .remove_all_networks()
            .await
            .map_err(|e| fault_from_zbus(&e))?;
        let network = proxy
            .add_network(network_args(config))
            .await
            .map_err(|e| fault_from_zbus(&e))?;
        proxy
            .select_network(&network)
            .await
            .map_err(|e| fault_from_zbus(&e))?;
        debug!("{interface}: network block {network} selected");
        Ok(())
    }

    async fn disconnect(&self, interface: &str) -> Result<(), BackendFault> {
        let proxy = self.interface_proxy(interface).await?;
        match proxy.disconnect().await {
            Ok(()) => Ok(()),
            // Nothing to drop; the session treats that as done.
            Err(zbus::Error::MethodError(ref name, _, _))
                if name.as_str() == ERR_NOT_CONNECTED =>
            {
                Ok(())
            }
            Err(err) => Err(fault_from_zbus(&err)),
        }
    }

    async fn scan(&self, interface: &str) -> Result<(), BackendFault> {
        let proxy = self.interface_proxy(interface).await?;
        let mut args: HashMap<&str, Value<'_>> = HashMap::new();
        args.insert("Type", Value::from("active"));
        proxy.scan(args).await.map_err(|e| fault_from_zbus(&e))
    }

    async fn remove_interface(&mut self, interface: &str) {
        let Some(task) = self.interfaces.remove(interface) else {
            return;
        };
        task.listener.abort();
        let removed = match SupplicantProxy::new(&self.connection).await {
            Ok(supplicant) => supplicant.remove_interface(&task.path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = removed {
            debug!("{interface}: supplicant removal failed: {err}");
        }
    }

    // ── Supplicant-side changes ───────────────────────────────────────────

    async fn on_interface_added(&mut self, path: OwnedObjectPath) {
        match self.interface_name_of(&path).await {
            Ok(interface) if !self.interfaces.contains_key(&interface) => {
                debug!("{interface}: announced by supplicant");
                let _ = self.events.send(LinkEvent::InterfaceDiscovered { interface });
            }
            Ok(_) => {}
            Err(err) => debug!("interface lookup failed for {path}: {err}"),
        }
    }

    fn on_interface_removed(&mut self, path: &OwnedObjectPath) {
        let Some(interface) = self
            .interfaces
            .iter()
            .find(|(_, task)| task.path == *path)
            .map(|(name, _)| name.clone())
        else {
            return;
        };
        if let Some(task) = self.interfaces.remove(&interface) {
            task.listener.abort();
        }
        info!("{interface}: removed by supplicant");
        self.send_event(&interface, BackendEvent::InterfaceRemoved);
    }

    async fn on_owner_changed(&mut self, vanished: bool) {
        if vanished {
            warn!("wpa_supplicant left the bus");
            for (_, task) in self.interfaces.drain() {
                task.listener.abort();
            }
            let _ = self.events.send(LinkEvent::SupplicantVanished);
        } else {
            info!("wpa_supplicant appeared on the bus");
            let _ = self.events.send(LinkEvent::SupplicantReturned);
            self.announce_existing().await;
        }
    }

    /// Report interfaces the supplicant already has. Quietly does nothing
    /// when the supplicant is not reachable; it will announce itself through
    /// NameOwnerChanged once it starts.
    async fn announce_existing(&mut self) {
        let paths = match self.list_interfaces().await {
            Ok(paths) => paths,
            Err(err) => {
                debug!("supplicant not reachable: {err}");
                return;
            }
        };
        for path in paths {
            self.on_interface_added(path).await;
        }
    }

    async fn list_interfaces(&self) -> zbus::Result<Vec<OwnedObjectPath>> {
        let supplicant = SupplicantProxy::new(&self.connection).await?;
        supplicant.interfaces().await
    }

    // ── Plumbing ──────────────────────────────────────────────────────────

    async fn interface_proxy(
        &self,
        interface: &str,
    ) -> Result<InterfaceProxy<'static>, BackendFault> {
        let task = self.interfaces.get(interface).ok_or_else(|| {
            BackendFault::new(
                "org.freedesktop.DBus.Error.UnknownObject",
                format!("interface {interface} is not attached"),
            )
        })?;
        build_interface_proxy(&self.connection, &task.path)
            .await
            .map_err(|e| fault_from_zbus(&e))
    }

    async fn interface_name_of(&self, path: &OwnedObjectPath) -> zbus::Result<String> {
        let proxy = build_interface_proxy(&self.connection, path).await?;
        proxy.ifname().await
    }

    fn attach(&mut self, interface: &str, path: OwnedObjectPath) {
        if self.interfaces.contains_key(interface) {
            return;
        }
        let listener = tokio::spawn(listen_interface(
            self.connection.clone(),
            path.clone(),
            interface.to_owned(),
            self.events.clone(),
        ));
        self.interfaces
            .insert(interface.to_owned(), InterfaceTask { path, listener });
    }

    fn send_event(&self, interface: &str, event: BackendEvent) {
        let _ = self.events.send(LinkEvent::Interface {
            interface: interface.to_owned(),
            event,
        });
    }
}

async fn build_interface_proxy(
    connection: &Connection,
    path: &OwnedObjectPath,
) -> zbus::Result<InterfaceProxy<'static>> {
    InterfaceProxy::builder(connection)
        .path(path.clone())?
        .build()
        .await
}

/// Listener task for one supplicant interface object: forwards state
/// changes, scan completion and scan results.
async fn listen_interface(
    connection: Connection,
    path: OwnedObjectPath,
    interface: String,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    if let Err(err) = watch_interface(&connection, &path, &interface, &events).await {
        debug!("{interface}: interface listener stopped: {err}");
    }
}

async fn watch_interface(
    connection: &Connection,
    path: &OwnedObjectPath,
    interface: &str,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> zbus::Result<()> {
    let proxy = build_interface_proxy(connection, path).await?;
    let mut state_changes = proxy.receive_state_changed().await;
    let mut scan_done = proxy.receive_scan_done().await?;
    let mut bss_added = proxy.receive_bss_added().await?;

    // The interface is usually mid-life when we attach; report where it is.
    if let Ok(state) = proxy.state().await {
        forward_state(interface, &state, events);
    }

    loop {
        tokio::select! {
            maybe = state_changes.next() => {
                let Some(change) = maybe else { break };
                if let Ok(state) = change.get().await {
                    forward_state(interface, &state, events);
                }
            }
            maybe = scan_done.next() => {
                let Some(signal) = maybe else { break };
                match signal.args() {
                    Ok(args) => {
                        let _ = events.send(LinkEvent::Interface {
                            interface: interface.to_owned(),
                            event: BackendEvent::ScanDone { success: *args.success() },
                        });
                    }
                    Err(err) => debug!("{interface}: bad ScanDone signal: {err}"),
                }
            }
            maybe = bss_added.next() => {
                let Some(signal) = maybe else { break };
                let bss_path = match signal.args() {
                    Ok(args) => args.path().clone(),
                    Err(err) => {
                        debug!("{interface}: bad BSSAdded signal: {err}");
                        continue;
                    }
                };
                match read_bss(connection, &bss_path).await {
                    Ok(info) => {
                        let _ = events.send(LinkEvent::Interface {
                            interface: interface.to_owned(),
                            event: BackendEvent::BssFound(info),
                        });
                    }
                    Err(err) => debug!("{interface}: BSS read failed for {bss_path}: {err}"),
                }
            }
        }
    }
    Ok(())
}

fn forward_state(interface: &str, state: &str, events: &mpsc::UnboundedSender<LinkEvent>) {
    match ConnectionState::from_wpa(state) {
        Some(parsed) => {
            let _ = events.send(LinkEvent::Interface {
                interface: interface.to_owned(),
                event: BackendEvent::ConnectionState(parsed),
            });
        }
        None => debug!("{interface}: unhandled supplicant state {state:?}"),
    }
}

async fn read_bss(connection: &Connection, path: &OwnedObjectPath) -> zbus::Result<BssInfo> {
    let proxy = BssProxy::builder(connection)
        .path(path.clone())?
        .build()
        .await?;
    Ok(BssInfo {
        bssid: format_mac(&proxy.bssid().await?),
        ssid: String::from_utf8_lossy(&proxy.ssid().await?).into_owned(),
        signal_dbm: proxy.signal().await?,
        frequency: u32::from(proxy.frequency().await?),
    })
}

/// Network block properties for AddNetwork.
fn network_args(config: &SupplicantConfig) -> HashMap<&'static str, Value<'_>> {
    let mut args: HashMap<&'static str, Value<'_>> = HashMap::new();
    args.insert("ssid", Value::from(config.ssid.as_str()));
    args.insert("key_mgmt", Value::from(config.key_mgmt.as_wpa()));
    if let Some(psk) = &config.psk {
        args.insert("psk", Value::from(psk.as_str()));
    }
    if let Some(bssid) = &config.bssid {
        args.insert("bssid", Value::from(bssid.as_str()));
    }
    if config.scan_ssid {
        args.insert("scan_ssid", Value::from(1i32));
    }
    args
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn fault_from_zbus(err: &zbus::Error) -> BackendFault {
    match err {
        zbus::Error::MethodError(name, message, _) => {
            BackendFault::new(name.as_str(), message.clone().unwrap_or_default())
        }
        other => BackendFault::new("org.freedesktop.DBus.Error.Failed", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::config::KeyManagement;

    #[test]
    fn network_args_cover_the_config() {
        let mut config = SupplicantConfig::wpa_psk("cafe", "password1");
        config.bssid = Some("00:11:22:33:44:55".into());
        config.scan_ssid = true;

        let args = network_args(&config);
        assert_eq!(args["ssid"], Value::from("cafe"));
        assert_eq!(args["key_mgmt"], Value::from("WPA-PSK"));
        assert_eq!(args["psk"], Value::from("password1"));
        assert_eq!(args["bssid"], Value::from("00:11:22:33:44:55"));
        assert_eq!(args["scan_ssid"], Value::from(1i32));
    }

    #[test]
    fn open_network_args_omit_secrets() {
        let config = SupplicantConfig::open("lobby");
        let args = network_args(&config);
        assert_eq!(args["key_mgmt"], Value::from("NONE"));
        assert!(!args.contains_key("psk"));
        assert!(!args.contains_key("scan_ssid"));
        assert_eq!(config.key_mgmt, KeyManagement::None);
    }

    #[test]
    fn mac_bytes_render_lowercase_colon_separated() {
        assert_eq!(
            format_mac(&[0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0xff]),
            "00:1a:2b:3c:4d:ff"
        );
        assert_eq!(format_mac(&[]), "");
    }
}
