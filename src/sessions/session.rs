use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::sessions::backend::BackendHandle;
use crate::sessions::config::SupplicantConfig;
use crate::sessions::dispatcher::{Dispatcher, Observer, SubscriptionId};
use crate::sessions::types::{
    BackendEvent, BackendFault, ConnectionState, InterfaceState, SessionEvent, SessionId,
};

/// One interface attached to the authentication backend.
///
/// Sessions are created and owned by the
/// [`SessionRegistry`](crate::sessions::registry::SessionRegistry); callers get
/// at one through the registry's lookup methods. A session that reaches
/// [`InterfaceState::Down`] is finished and gets retired by the registry; the
/// same interface name comes back as a fresh session with a new id.
pub struct Session {
    id: SessionId,
    interface_name: String,
    is_wireless: bool,
    interface_state: InterfaceState,
    connection_state: ConnectionState,
    active_config: Option<SupplicantConfig>,
    last_error: Option<BackendFault>,
    /// Set when we asked the backend to disconnect and are waiting for the
    /// confirming Disconnected report, which also clears `active_config`.
    disconnect_pending: bool,
    backend: BackendHandle,
    dispatcher: Dispatcher<SessionEvent>,
}

// Manual impl: the dispatcher's observers are opaque trait objects.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("interface_name", &self.interface_name)
            .field("is_wireless", &self.is_wireless)
            .field("interface_state", &self.interface_state)
            .field("connection_state", &self.connection_state)
            .field("active_config", &self.active_config)
            .field("last_error", &self.last_error)
            .field("disconnect_pending", &self.disconnect_pending)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        interface_name: impl Into<String>,
        is_wireless: bool,
        backend: BackendHandle,
    ) -> Self {
        Self {
            id,
            interface_name: interface_name.into(),
            is_wireless,
            interface_state: InterfaceState::Init,
            connection_state: ConnectionState::Disconnected,
            active_config: None,
            last_error: None,
            disconnect_pending: false,
            backend,
            dispatcher: Dispatcher::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn is_wireless(&self) -> bool {
        self.is_wireless
    }

    pub fn interface_state(&self) -> InterfaceState {
        self.interface_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn active_config(&self) -> Option<&SupplicantConfig> {
        self.active_config.as_ref()
    }

    pub fn last_error(&self) -> Option<&BackendFault> {
        self.last_error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.interface_state == InterfaceState::Ready
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn subscribe(&self, observer: Arc<dyn Observer<SessionEvent>>) -> SubscriptionId {
        self.dispatcher.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_fn(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Cloneable handle to this session's dispatcher, for observers that
    /// un/subscribe from inside a delivery.
    pub fn events(&self) -> Dispatcher<SessionEvent> {
        self.dispatcher.clone()
    }

    fn emit(&self, event: SessionEvent) {
        let report = self.dispatcher.emit(&event);
        for fault in &report.faults {
            warn!(
                "{} {}: {fault}",
                self.interface_name, self.id
            );
        }
    }

    // ── Caller operations ────────────────────────────────────────────────────

    /// Hand a new network configuration to the supplicant.
    ///
    /// Fails with `InvalidConfig` unless the interface is Ready and the
    /// settings pass validation; the previous configuration stays in place on
    /// any failure. On success the configuration replaces the old one
    /// wholesale, the connection state resets to Inactive and the backend is
    /// asked to start connecting.
    pub fn apply_configuration(&mut self, config: SupplicantConfig) -> SessionResult<()> {
        if self.interface_state != InterfaceState::Ready {
            return Err(SessionError::InvalidConfig(format!(
                "interface {} cannot take a configuration in state {}",
                self.interface_name, self.interface_state
            )));
        }
        config.validate()?;
        self.backend
            .set_config(&self.interface_name, config.clone())?;

        info!(
            "{}: applying configuration for ssid {:?}",
            self.interface_name, config.ssid
        );
        self.active_config = Some(config);
        self.disconnect_pending = false;
        self.set_connection_state(ConnectionState::Inactive);
        Ok(())
    }

    /// Ask the backend to drop the current association.
    ///
    /// Idempotent: repeated calls while a disconnect is pending, or on a
    /// session with nothing to disconnect, are Ok no-ops. The active
    /// configuration is cleared only once the backend confirms with a
    /// Disconnected report.
    pub fn disconnect(&mut self) -> SessionResult<()> {
        if self.interface_state.is_down() {
            return Err(SessionError::StaleSession(self.interface_name.clone()));
        }
        if self.interface_state < InterfaceState::Ready || self.disconnect_pending {
            return Ok(());
        }
        if self.connection_state == ConnectionState::Disconnected && self.active_config.is_none() {
            return Ok(());
        }
        self.backend.disconnect(&self.interface_name)?;
        self.disconnect_pending = true;
        debug!("{}: disconnect requested", self.interface_name);
        Ok(())
    }

    /// Trigger a scan. The outcome arrives later as a `ScanDone` event, with
    /// any results as `BssFound` events.
    pub fn request_scan(&self) -> SessionResult<()> {
        if self.interface_state.is_down() {
            return Err(SessionError::StaleSession(self.interface_name.clone()));
        }
        if self.interface_state != InterfaceState::Ready {
            return Err(SessionError::NotReady {
                interface: self.interface_name.clone(),
                state: self.interface_state,
            });
        }
        self.backend.scan(&self.interface_name)
    }

    // ── Backend event handling ───────────────────────────────────────────────

    pub(crate) fn handle_backend_event(&mut self, event: BackendEvent) {
        if self.interface_state.is_down() {
            debug!(
                "{}: ignoring backend event on down session: {event:?}",
                self.interface_name
            );
            return;
        }
        match event {
            BackendEvent::SetupAccepted => {
                self.advance_interface_state(InterfaceState::Starting);
            }
            BackendEvent::InterfaceReady => {
                self.advance_interface_state(InterfaceState::Ready);
            }
            BackendEvent::StartupFailed(fault) => {
                warn!("{}: startup failed: {fault}", self.interface_name);
                self.last_error = Some(fault.clone());
                self.emit(SessionEvent::Error(fault));
                self.advance_interface_state(InterfaceState::Down);
            }
            BackendEvent::InterfaceRemoved => {
                self.advance_interface_state(InterfaceState::Down);
            }
            BackendEvent::ConnectionState(state) => {
                if self.interface_state != InterfaceState::Ready {
                    debug!(
                        "{}: dropping connection state {state} in interface state {}",
                        self.interface_name, self.interface_state
                    );
                    return;
                }
                self.set_connection_state(state);
            }
            BackendEvent::ScanDone { success } => {
                debug!("{}: scan done (success: {success})", self.interface_name);
                self.emit(SessionEvent::ScanDone { success });
            }
            BackendEvent::BssFound(info) => {
                self.emit(SessionEvent::BssFound(info));
            }
            BackendEvent::Error(fault) => {
                warn!("{}: backend error: {fault}", self.interface_name);
                self.last_error = Some(fault.clone());
                self.emit(SessionEvent::Error(fault));
            }
        }
    }

    /// Force the session to Down. Used by the registry on explicit removal
    /// and when the backend itself goes away.
    pub(crate) fn shut_down(&mut self) {
        self.advance_interface_state(InterfaceState::Down);
    }

    /// Emit the final `Removed` event. The registry calls this right before
    /// dropping the session.
    pub(crate) fn notify_removed(&self) {
        self.emit(SessionEvent::Removed);
    }

    // ── State machines ───────────────────────────────────────────────────────

    /// Move the interface state forward. Same-state moves are silent no-ops;
    /// backward moves are a backend protocol violation and are refused.
    fn advance_interface_state(&mut self, new_state: InterfaceState) {
        let old_state = self.interface_state;
        if new_state == old_state {
            return;
        }
        if new_state < old_state {
            warn!(
                "{}: refusing interface state regression {old_state} -> {new_state}",
                self.interface_name
            );
            return;
        }
        self.interface_state = new_state;
        if new_state == InterfaceState::Ready || new_state == InterfaceState::Down {
            info!("{} {}: interface {old_state} -> {new_state}", self.interface_name, self.id);
        } else {
            debug!("{} {}: interface {old_state} -> {new_state}", self.interface_name, self.id);
        }
        self.emit(SessionEvent::InterfaceState {
            new_state,
            old_state,
        });
    }

    /// Adopt a backend-reported connection state. Reports are authoritative
    /// replacements, so regressions are fine and every report is re-emitted,
    /// same-state ones included.
    fn set_connection_state(&mut self, new_state: ConnectionState) {
        let old_state = self.connection_state;
        self.connection_state = new_state;
        if new_state == ConnectionState::Disconnected && self.disconnect_pending {
            self.disconnect_pending = false;
            self.active_config = None;
            debug!("{}: disconnect confirmed, configuration dropped", self.interface_name);
        }
        debug!(
            "{} {}: connection {old_state} -> {new_state}",
            self.interface_name, self.id
        );
        self.emit(SessionEvent::ConnectionState {
            new_state,
            old_state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::backend::{backend_channel, BackendRequest};
    use crate::sessions::types::BssInfo;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (Session, UnboundedReceiver<BackendRequest>) {
        let (handle, rx) = backend_channel();
        (Session::new(SessionId(1), "wlan0", true, handle), rx)
    }

    fn ready_session() -> (Session, UnboundedReceiver<BackendRequest>) {
        let (mut session, rx) = session();
        session.handle_backend_event(BackendEvent::SetupAccepted);
        session.handle_backend_event(BackendEvent::InterfaceReady);
        (session, rx)
    }

    fn collect_events(session: &Session) -> Arc<Mutex<Vec<SessionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.subscribe_fn(move |event: &SessionEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        events
    }

    #[test]
    fn new_session_starts_at_init_disconnected() {
        let (session, _rx) = session();
        assert_eq!(session.interface_state(), InterfaceState::Init);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session.active_config().is_none());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn startup_walks_forward_and_emits() {
        let (mut session, _rx) = session();
        let events = collect_events(&session);

        session.handle_backend_event(BackendEvent::SetupAccepted);
        session.handle_backend_event(BackendEvent::InterfaceReady);

        assert!(session.is_ready());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::InterfaceState {
                    new_state: InterfaceState::Starting,
                    old_state: InterfaceState::Init,
                },
                SessionEvent::InterfaceState {
                    new_state: InterfaceState::Ready,
                    old_state: InterfaceState::Starting,
                },
            ]
        );
    }

    #[test]
    fn repeated_interface_state_is_silent() {
        let (mut session, _rx) = session();
        session.handle_backend_event(BackendEvent::SetupAccepted);
        let events = collect_events(&session);
        session.handle_backend_event(BackendEvent::SetupAccepted);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(session.interface_state(), InterfaceState::Starting);
    }

    #[test]
    fn interface_state_never_regresses() {
        let (mut session, _rx) = ready_session();
        let events = collect_events(&session);
        session.handle_backend_event(BackendEvent::SetupAccepted);
        assert_eq!(session.interface_state(), InterfaceState::Ready);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn startup_failure_lands_on_down_with_error() {
        let (mut session, _rx) = session();
        session.handle_backend_event(BackendEvent::SetupAccepted);
        let events = collect_events(&session);

        let fault = BackendFault::new("fi.w1.wpa_supplicant1.UnknownError", "driver rejected");
        session.handle_backend_event(BackendEvent::StartupFailed(fault.clone()));

        assert_eq!(session.interface_state(), InterfaceState::Down);
        assert_eq!(session.last_error(), Some(&fault));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::Error(fault),
                SessionEvent::InterfaceState {
                    new_state: InterfaceState::Down,
                    old_state: InterfaceState::Starting,
                },
            ]
        );
    }

    #[test]
    fn connection_states_before_ready_are_dropped() {
        let (mut session, _rx) = session();
        session.handle_backend_event(BackendEvent::SetupAccepted);
        let events = collect_events(&session);

        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Scanning));

        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn connection_state_replaces_unconditionally() {
        let (mut session, _rx) = ready_session();
        let events = collect_events(&session);

        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Associated));
        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Scanning));

        assert_eq!(session.connection_state(), ConnectionState::Scanning);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::ConnectionState {
                    new_state: ConnectionState::Associated,
                    old_state: ConnectionState::Disconnected,
                },
                SessionEvent::ConnectionState {
                    new_state: ConnectionState::Scanning,
                    old_state: ConnectionState::Associated,
                },
            ]
        );
    }

    #[test]
    fn same_connection_state_still_emits() {
        let (mut session, _rx) = ready_session();
        let events = collect_events(&session);

        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Scanning));
        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Scanning));

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn apply_configuration_needs_ready() {
        let (mut session, mut rx) = session();
        let err = session
            .apply_configuration(SupplicantConfig::open("cafe"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert!(session.active_config().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn apply_configuration_sends_and_resets() {
        let (mut session, mut rx) = ready_session();
        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Completed));
        let events = collect_events(&session);

        session
            .apply_configuration(SupplicantConfig::open("cafe"))
            .unwrap();

        assert_eq!(session.active_config().map(|c| c.ssid.as_str()), Some("cafe"));
        assert_eq!(session.connection_state(), ConnectionState::Inactive);
        assert!(matches!(
            rx.try_recv().unwrap(),
            BackendRequest::SetConfig { .. }
        ));
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEvent::ConnectionState {
                new_state: ConnectionState::Inactive,
                old_state: ConnectionState::Completed,
            }]
        );
    }

    #[test]
    fn invalid_settings_leave_session_untouched() {
        let (mut session, mut rx) = ready_session();
        let err = session
            .apply_configuration(SupplicantConfig::wpa_psk("cafe", "short"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert!(session.active_config().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconfiguration_replaces_wholesale() {
        let (mut session, _rx) = ready_session();
        session
            .apply_configuration(SupplicantConfig::open("first"))
            .unwrap();
        session
            .apply_configuration(SupplicantConfig::wpa_psk("second", "password1"))
            .unwrap();
        assert_eq!(
            session.active_config().map(|c| c.ssid.as_str()),
            Some("second")
        );
    }

    #[test]
    fn disconnect_before_ready_is_noop() {
        let (mut session, mut rx) = session();
        session.disconnect().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn confirmed_disconnect_clears_config() {
        let (mut session, mut rx) = ready_session();
        session
            .apply_configuration(SupplicantConfig::open("cafe"))
            .unwrap();
        rx.try_recv().unwrap(); // SetConfig

        session.disconnect().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            BackendRequest::Disconnect { .. }
        ));
        // Config survives until the backend confirms.
        assert!(session.active_config().is_some());

        session.handle_backend_event(BackendEvent::ConnectionState(
            ConnectionState::Disconnected,
        ));
        assert!(session.active_config().is_none());
    }

    #[test]
    fn spontaneous_disconnect_keeps_config() {
        let (mut session, _rx) = ready_session();
        session
            .apply_configuration(SupplicantConfig::open("cafe"))
            .unwrap();

        session.handle_backend_event(BackendEvent::ConnectionState(
            ConnectionState::Disconnected,
        ));
        assert!(session.active_config().is_some());
    }

    #[test]
    fn repeated_disconnect_sends_once() {
        let (mut session, mut rx) = ready_session();
        session
            .apply_configuration(SupplicantConfig::open("cafe"))
            .unwrap();
        rx.try_recv().unwrap(); // SetConfig

        session.disconnect().unwrap();
        session.disconnect().unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            BackendRequest::Disconnect { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scan_needs_ready() {
        let (session, mut rx) = session();
        let err = session.request_scan().unwrap_err();
        assert!(matches!(err, SessionError::NotReady { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scan_sends_one_request() {
        let (session, mut rx) = ready_session();
        session.request_scan().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), BackendRequest::Scan { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scan_results_pass_through() {
        let (mut session, _rx) = ready_session();
        let events = collect_events(&session);

        let bss = BssInfo {
            bssid: "00:11:22:33:44:55".into(),
            ssid: "cafe".into(),
            signal_dbm: -52,
            frequency: 2437,
        };
        session.handle_backend_event(BackendEvent::BssFound(bss.clone()));
        session.handle_backend_event(BackendEvent::ScanDone { success: true });

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SessionEvent::BssFound(bss),
                SessionEvent::ScanDone { success: true },
            ]
        );
    }

    #[test]
    fn down_session_ignores_backend_and_rejects_callers() {
        let (mut session, mut rx) = ready_session();
        session.shut_down();
        let events = collect_events(&session);

        session.handle_backend_event(BackendEvent::ConnectionState(ConnectionState::Scanning));
        session.handle_backend_event(BackendEvent::ScanDone { success: true });
        assert!(events.lock().unwrap().is_empty());

        assert!(matches!(
            session.disconnect().unwrap_err(),
            SessionError::StaleSession(_)
        ));
        assert!(matches!(
            session.request_scan().unwrap_err(),
            SessionError::StaleSession(_)
        ));
        // apply_configuration reports InvalidConfig for any non-Ready
        // state, Down included.
        assert!(matches!(
            session
                .apply_configuration(SupplicantConfig::open("cafe"))
                .unwrap_err(),
            SessionError::InvalidConfig(_)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn error_event_records_and_forwards() {
        let (mut session, _rx) = ready_session();
        let events = collect_events(&session);

        let fault = BackendFault::new("fi.w1.wpa_supplicant1.Failed", "scan busy");
        session.handle_backend_event(BackendEvent::Error(fault.clone()));

        assert_eq!(session.last_error(), Some(&fault));
        assert_eq!(*events.lock().unwrap(), vec![SessionEvent::Error(fault)]);
        // Non-fatal: the session stays ready.
        assert!(session.is_ready());
    }
}
