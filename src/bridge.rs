use crate::dispatch::{cot_callback_trampoline, trampoline_user_data, Dispatcher};
use crate::native::{ConnectRequest, ConnectionStatus, NativeCore, NO_CONNECTION};
use crate::registry::CallbackRegistry;
use crate::runtime::HostRuntime;
use crate::{ConnectionId, Status};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The connection manager seen by the host application.
///
/// A `Bridge` owns the native core handle together with the registry of
/// host callbacks for its connections, and routes every callback the core
/// makes back to the right host object.
pub struct Bridge<C: NativeCore, R: HostRuntime> {
    core: C,
    dispatcher: Arc<Dispatcher<R>>,
    // Connections the core holds our trampoline and `user_data` for. This can
    // outlive the registry entry, e.g. after `shutdown`.
    core_callbacks: Mutex<HashSet<ConnectionId>>,
}

impl<C: NativeCore, R: HostRuntime> Bridge<C, R> {
    /// Creates a bridge delivering `core`'s events into `runtime`.
    pub fn new(core: C, runtime: R) -> Self {
        let registry = Arc::new(CallbackRegistry::new(Arc::new(runtime)));
        Self {
            core,
            dispatcher: Arc::new(Dispatcher::new(registry)),
            core_callbacks: Mutex::new(HashSet::new()),
        }
    }

    /// The native core this bridge forwards to.
    pub fn core(&self) -> &C {
        &self.core
    }

    /// The host runtime events are delivered into.
    pub fn runtime(&self) -> &Arc<R> {
        self.registry().runtime()
    }

    /// The dispatcher the core's callbacks are routed through.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<R>> {
        &self.dispatcher
    }

    /// The registered callback targets.
    pub fn registry(&self) -> &Arc<CallbackRegistry<R>> {
        self.dispatcher.registry()
    }

    fn core_callbacks(&self) -> MutexGuard<'_, HashSet<ConnectionId>> {
        self.core_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Initializes the native core.
    pub fn init(&self) -> Status {
        let status = self.core.init();
        log::info!("omnitak_init returned {}", status);
        status
    }

    /// Releases every registered callback, then shuts the core down.
    pub fn shutdown(&self) {
        let released = self.registry().clear_all();
        log::debug!("released {} callback(s)", released);

        self.core.shutdown();
        log::info!("Shutdown complete");
    }

    /// Opens a connection, returning its id or [`NO_CONNECTION`].
    pub fn connect(&self, request: &ConnectRequest) -> ConnectionId {
        log::info!(
            "Connecting to {}:{} (protocol={}, tls={})",
            request.host,
            request.port,
            request.protocol,
            request.use_tls
        );

        let connection_id = self.core.connect(request);

        if connection_id != NO_CONNECTION {
            log::info!("Connected successfully: {}", connection_id);
        } else {
            log::error!("Connection to {}:{} failed", request.host, request.port);
        }

        connection_id
    }

    /// Closes a connection and drops its callback registration, if any.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Status {
        {
            let mut core_callbacks = self.core_callbacks();
            if core_callbacks.contains(&connection_id) {
                self.core.unregister_callback(connection_id);
                core_callbacks.remove(&connection_id);
            }
        }

        let status = self.core.disconnect(connection_id);

        if self.registry().unregister(connection_id) {
            log::info!("Callback cleaned up for connection {}", connection_id);
        }

        status
    }

    /// Sends one CoT message on `connection_id`.
    pub fn send_message(&self, connection_id: ConnectionId, payload: &str) -> Status {
        log::debug!("Sending CoT on connection {}", connection_id);

        let status = self.core.send_message(connection_id, payload);
        if !status.is_ok() {
            log::error!("Failed to send CoT: {}", status);
        }

        status
    }

    /// Routes events for `connection_id` to `target` from now on.
    ///
    /// A target already registered for the connection is released. If the
    /// core rejects the registration, `target` is released as well and the
    /// connection is left without any callback, in the core or here.
    pub fn register_callback(&self, connection_id: ConnectionId, target: R::Target) -> Status {
        let context = self.registry().register(connection_id, target);

        let mut core_callbacks = self.core_callbacks();
        // SAFETY: The dispatcher lives as long as `self`, and dropping `self`
        // unregisters every connection in `core_callbacks` from the core first.
        let status = unsafe {
            self.core.register_callback(
                connection_id,
                cot_callback_trampoline::<R>,
                trampoline_user_data(&self.dispatcher),
            )
        };

        if status.is_ok() {
            core_callbacks.insert(connection_id);
            log::info!("Callback registered for connection {}", connection_id);
        } else {
            log::error!("Failed to register callback: {}", status);
            // An earlier registration for this connection may still be live.
            if core_callbacks.contains(&connection_id) {
                self.core.unregister_callback(connection_id);
                core_callbacks.remove(&connection_id);
            }
            drop(core_callbacks);
            self.registry().unregister_context(connection_id, &context);
        }

        status
    }

    /// Stops routing events for `connection_id` and releases its target.
    pub fn unregister_callback(&self, connection_id: ConnectionId) -> Status {
        // The core goes first so no new callbacks start for a target that
        // is about to be released.
        let status = {
            let mut core_callbacks = self.core_callbacks();
            let status = self.core.unregister_callback(connection_id);
            core_callbacks.remove(&connection_id);
            status
        };
        self.registry().unregister(connection_id);

        status
    }

    /// Reads the core's counters for `connection_id`.
    pub fn get_status(&self, connection_id: ConnectionId) -> Result<ConnectionStatus, Status> {
        self.core.get_status(connection_id).map_err(|status| {
            log::error!("Failed to get status: {}", status);
            status
        })
    }

    /// The native core's version string.
    pub fn version(&self) -> String {
        let version = self.core.version();
        log::info!("Library version: {}", version);
        version
    }
}

impl<C: NativeCore, R: HostRuntime> Drop for Bridge<C, R> {
    fn drop(&mut self) {
        let core_callbacks = self
            .core_callbacks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for connection_id in core_callbacks.drain() {
            self.core.unregister_callback(connection_id);
        }
        self.dispatcher.registry().clear_all();
    }
}
