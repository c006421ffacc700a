use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::sessions::backend::BackendHandle;
use crate::sessions::dispatcher::{Dispatcher, Observer, SubscriptionId};
use crate::sessions::session::Session;
use crate::sessions::types::{BackendEvent, RegistryEvent, SessionId};

/// Owner of all live [`Session`]s, keyed by interface name.
///
/// The registry is the single mutation point: callers borrow sessions through
/// it, and every backend-originated event enters through
/// [`handle_backend_event`](SessionRegistry::handle_backend_event). A session
/// that reaches Down is retired on the spot; its name can then be registered
/// again as a fresh session with a new id.
///
/// All mutating methods take `&mut self`. Hosts drive the registry from one
/// event-processing task; anything needing shared access wraps it in its own
/// lock.
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    backend: BackendHandle,
    dispatcher: Dispatcher<RegistryEvent>,
    next_session_id: u64,
}

impl SessionRegistry {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            sessions: HashMap::new(),
            backend,
            dispatcher: Dispatcher::new(),
            next_session_id: 1,
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Register an interface and ask the backend to bring it up.
    ///
    /// The new session starts at Init/Disconnected; progress arrives as
    /// backend events. Fails with `AlreadyExists` if the name is registered
    /// and `BackendUnavailable` if the backend is gone, in which case nothing
    /// is registered.
    pub fn create_session(
        &mut self,
        interface: &str,
        is_wireless: bool,
    ) -> SessionResult<&mut Session> {
        let entry = match self.sessions.entry(interface.to_owned()) {
            Entry::Occupied(_) => {
                return Err(SessionError::AlreadyExists(interface.to_owned()));
            }
            Entry::Vacant(entry) => entry,
        };
        self.backend.create_interface(interface, is_wireless)?;

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        info!("{interface}: session {id} created (wireless: {is_wireless})");

        let session = entry.insert(Session::new(id, interface, is_wireless, self.backend.clone()));
        Self::emit(
            &self.dispatcher,
            RegistryEvent::SessionCreated {
                interface: interface.to_owned(),
            },
        );
        Ok(session)
    }

    /// Tear down a session and its backend-side interface.
    ///
    /// Idempotent: removing an unknown name is a no-op returning false. The
    /// session emits its Down transition and final `Removed` event before the
    /// registry drops it.
    pub fn remove_session(&mut self, interface: &str) -> bool {
        self.retire(interface, true)
    }

    pub fn session(&self, interface: &str) -> Option<&Session> {
        self.sessions.get(interface)
    }

    pub fn session_mut(&mut self, interface: &str) -> Option<&mut Session> {
        self.sessions.get_mut(interface)
    }

    /// Sorted snapshot of the registered interface names.
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session, tearing down the backend side of each. For
    /// process exit.
    pub fn shutdown(&mut self) {
        for interface in self.interfaces() {
            self.retire(&interface, true);
        }
    }

    // ── Backend events ───────────────────────────────────────────────────────

    /// Route one backend event to its session.
    ///
    /// Events for unknown interfaces are dropped; a late completion for a
    /// retired session must be harmless. If the event leaves the session Down
    /// it is retired here, without a teardown request (the backend side is
    /// already gone).
    pub fn handle_backend_event(&mut self, interface: &str, event: BackendEvent) {
        let Some(session) = self.sessions.get_mut(interface) else {
            debug!("{interface}: dropping backend event for unknown interface: {event:?}");
            return;
        };
        session.handle_backend_event(event);
        if session.interface_state().is_down() {
            self.retire(interface, false);
        }
    }

    /// The backend itself disappeared: every session goes Down and is
    /// retired. No teardown requests are sent.
    pub fn handle_backend_gone(&mut self) {
        let interfaces = self.interfaces();
        if interfaces.is_empty() {
            return;
        }
        warn!("backend gone, retiring {} session(s)", interfaces.len());
        for interface in interfaces {
            self.retire(&interface, false);
        }
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn subscribe(&self, observer: Arc<dyn Observer<RegistryEvent>>) -> SubscriptionId {
        self.dispatcher.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe_fn(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Cloneable handle to the registry's dispatcher.
    pub fn events(&self) -> Dispatcher<RegistryEvent> {
        self.dispatcher.clone()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn retire(&mut self, interface: &str, notify_backend: bool) -> bool {
        let Some(mut session) = self.sessions.remove(interface) else {
            return false;
        };
        session.shut_down();
        session.notify_removed();
        if notify_backend {
            if let Err(err) = self.backend.remove_interface(interface) {
                debug!("{interface}: backend teardown skipped: {err}");
            }
        }
        info!("{interface}: session {} removed", session.id());
        Self::emit(
            &self.dispatcher,
            RegistryEvent::SessionRemoved {
                interface: interface.to_owned(),
            },
        );
        true
    }

    fn emit(dispatcher: &Dispatcher<RegistryEvent>, event: RegistryEvent) {
        let report = dispatcher.emit(&event);
        for fault in &report.faults {
            warn!("registry {fault}");
        }
    }
}
