//! Test doubles for the host runtime and the native core, plus the dispatch
//! test suite shared between `cargo test` and on-device runs.
#![cfg_attr(not(test), allow(dead_code))]





use crate::dispatch::CotCallback;
use crate::native::{ConnectRequest, ConnectionStatus, NativeCore, NO_CONNECTION};
use crate::registry::CallbackRegistry;
use crate::runtime::{AttachState, HostRuntime};
use crate::{ConnectionId, DispatchError, Status};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

static NEXT_RUNTIME_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Ids of the mock runtimes the current thread is attached to.
    static ATTACHED_TO: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

fn attached_to_any_runtime() -> bool {
    ATTACHED_TO
        .try_with(|set| !set.borrow().is_empty())
        .unwrap_or(false)
}

/// A host runtime which tracks thread attachment per OS thread, the way a JVM does.
pub(crate) struct MockRuntime {
    id: usize,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    fail_attach: AtomicBool,
    fail_attach_state: AtomicBool,
}

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            fail_attach: AtomicBool::new(false),
            fail_attach_state: AtomicBool::new(false),
        }
    }

    pub(crate) fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub(crate) fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_attach_state(&self, fail: bool) {
        self.fail_attach_state.store(fail, Ordering::SeqCst);
    }

    fn is_attached(&self) -> bool {
        ATTACHED_TO.with(|set| set.borrow().contains(&self.id))
    }
}

impl Drop for MockRuntime {
    fn drop(&mut self) {
        let _ = ATTACHED_TO.try_with(|set| set.borrow_mut().remove(&self.id));
    }
}

impl HostRuntime for MockRuntime {
    type Target = MockTarget;

    fn attach_state(&self) -> Result<AttachState, DispatchError> {
        if self.fail_attach_state.load(Ordering::SeqCst) {
            return Err(DispatchError::Attach(String::from("GetEnv: JNI_EVERSION")));
        }

        Ok(if self.is_attached() {
            AttachState::Attached
        } else {
            AttachState::Detached
        })
    }

    fn attach_current_thread(&self) -> Result<(), DispatchError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DispatchError::Attach(String::from("AttachCurrentThread: JNI_ERR")));
        }

        ATTACHED_TO.with(|set| set.borrow_mut().insert(self.id));
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach_current_thread(&self) {
        ATTACHED_TO.with(|set| set.borrow_mut().remove(&self.id));
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn deliver(
        &self,
        target: &MockTarget,
        connection_id: ConnectionId,
        payload: &str,
    ) -> Result<(), DispatchError> {
        if !self.is_attached() {
            return Err(DispatchError::Attach(String::from(
                "deliver called on a detached thread",
            )));
        }

        target.invoke(connection_id, payload)
    }
}

/// One event as seen by a [`MockTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub(crate) connection_id: ConnectionId,
    pub(crate) payload: String,
}

/// How a [`MockTarget`] reacts to being invoked.
pub(crate) enum TargetBehavior {
    /// Records the event.
    Record,
    /// Behaves as if the event method doesn't exist on the target's class.
    MissingMethod,
    /// Raises a host runtime fault, which the runtime clears.
    Throw,
    /// Panics inside the runtime layer.
    Panic,
    /// Records the event, then unregisters itself from inside the callback.
    UnregisterSelf(Arc<CallbackRegistry<MockRuntime>>),
}

#[derive(Default)]
struct ProbeState {
    deliveries: Mutex<Vec<Delivery>>,
    threads: Mutex<Vec<ThreadId>>,
    releases: AtomicUsize,
    faults_cleared: AtomicUsize,
    released_while_attached: Mutex<Option<bool>>,
}

/// A callback receiver. Dropping it counts as releasing the reference.
pub(crate) struct MockTarget {
    behavior: TargetBehavior,
    state: Arc<ProbeState>,
}

/// Observes a [`MockTarget`] after it has been handed to a registry.
#[derive(Clone)]
pub(crate) struct TargetProbe {
    state: Arc<ProbeState>,
}

impl MockTarget {
    pub(crate) fn new() -> (Self, TargetProbe) {
        Self::with_behavior(TargetBehavior::Record)
    }

    pub(crate) fn with_behavior(behavior: TargetBehavior) -> (Self, TargetProbe) {
        let state = Arc::new(ProbeState::default());
        let probe = TargetProbe {
            state: Arc::clone(&state),
        };
        (Self { behavior, state }, probe)
    }

    fn record(&self, connection_id: ConnectionId, payload: &str) {
        self.state.deliveries.lock().unwrap().push(Delivery {
            connection_id,
            payload: payload.to_owned(),
        });
        self.state
            .threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
    }

    fn invoke(&self, connection_id: ConnectionId, payload: &str) -> Result<(), DispatchError> {
        match &self.behavior {
            TargetBehavior::Record => {
                self.record(connection_id, payload);
                Ok(())
            }
            TargetBehavior::MissingMethod => Err(DispatchError::Binding {
                method: "onCotReceived",
                signature: "(JLjava/lang/String;)V",
                reason: String::from("java.lang.NoSuchMethodError"),
            }),
            TargetBehavior::Throw => {
                self.state.faults_cleared.fetch_add(1, Ordering::SeqCst);
                Err(DispatchError::Fault(String::from(
                    "java.lang.IllegalStateException: listener gone",
                )))
            }
            TargetBehavior::Panic => panic!("callback target panicked"),
            TargetBehavior::UnregisterSelf(registry) => {
                self.record(connection_id, payload);
                registry.unregister(connection_id);
                Ok(())
            }
        }
    }
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.state.released_while_attached.lock() {
            *slot = Some(attached_to_any_runtime());
        }
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl TargetProbe {
    pub(crate) fn deliveries(&self) -> Vec<Delivery> {
        self.state.deliveries.lock().unwrap().clone()
    }

    pub(crate) fn delivery_threads(&self) -> Vec<ThreadId> {
        self.state.threads.lock().unwrap().clone()
    }

    pub(crate) fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    pub(crate) fn faults_cleared(&self) -> usize {
        self.state.faults_cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn released_while_attached(&self) -> Option<bool> {
        *self.state.released_while_attached.lock().unwrap()
    }
}

#[derive(Default)]
struct CoreState {
    next_id: ConnectionId,
    shut_down: bool,
    reject_callbacks: Option<Status>,
    retain_callbacks_on_disconnect: bool,
    connections: HashMap<ConnectionId, ConnectionStatus>,
    // The user data pointer is kept as an address so the state stays `Send`.
    callbacks: HashMap<ConnectionId, (CotCallback, usize)>,
}

/// An in-memory native core which invokes callbacks on demand.
#[derive(Clone, Default)]
pub(crate) struct MockCore {
    state: Arc<Mutex<CoreState>>,
}

impl MockCore {
    pub(crate) const VERSION: &'static str = "omnitak-mock 0.0.0";

    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reject_callbacks(&self, status: Status) {
        self.state.lock().unwrap().reject_callbacks = Some(status);
    }

    /// Keeps a connection's callback registered after it is disconnected.
    pub(crate) fn retain_callbacks_on_disconnect(&self, retain: bool) {
        self.state.lock().unwrap().retain_callbacks_on_disconnect = retain;
    }

    pub(crate) fn has_callback(&self, connection_id: ConnectionId) -> bool {
        self.state
            .lock()
            .unwrap()
            .callbacks
            .contains_key(&connection_id)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }

    /// Invokes the callback registered for `connection_id` on the calling
    /// thread, as the core's I/O threads would. Returns `false` if there was
    /// none.
    pub(crate) fn emit(&self, connection_id: ConnectionId, payload: &str) -> bool {
        let registered = self
            .state
            .lock()
            .unwrap()
            .callbacks
            .get(&connection_id)
            .copied();

        match registered {
            Some((callback, user_data)) => {
                let payload = CString::new(payload).unwrap();
                callback(user_data as *mut c_void, connection_id, payload.as_ptr());
                true
            }
            None => false,
        }
    }
}

impl NativeCore for MockCore {
    fn init(&self) -> Status {
        self.state.lock().unwrap().shut_down = false;
        Status::OK
    }

    fn shutdown(&self) {
        self.state.lock().unwrap().shut_down = true;
    }

    fn connect(&self, request: &ConnectRequest) -> ConnectionId {
        if request.host.is_empty() {
            return NO_CONNECTION;
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(
            id,
            ConnectionStatus {
                is_connected: true,
                ..ConnectionStatus::default()
            },
        );
        id
    }

    fn disconnect(&self, connection_id: ConnectionId) -> Status {
        let mut state = self.state.lock().unwrap();
        if !state.retain_callbacks_on_disconnect {
            state.callbacks.remove(&connection_id);
        }
        match state.connections.remove(&connection_id) {
            Some(_) => Status::OK,
            None => Status(-1),
        }
    }

    fn send_message(&self, connection_id: ConnectionId, _payload: &str) -> Status {
        match self.state.lock().unwrap().connections.get_mut(&connection_id) {
            Some(status) => {
                status.messages_sent += 1;
                Status::OK
            }
            None => Status(-1),
        }
    }

    unsafe fn register_callback(
        &self,
        connection_id: ConnectionId,
        callback: CotCallback,
        user_data: *mut c_void,
    ) -> Status {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.reject_callbacks {
            return status;
        }
        state
            .callbacks
            .insert(connection_id, (callback, user_data as usize));
        Status::OK
    }

    fn unregister_callback(&self, connection_id: ConnectionId) -> Status {
        self.state.lock().unwrap().callbacks.remove(&connection_id);
        Status::OK
    }

    fn get_status(&self, connection_id: ConnectionId) -> Result<ConnectionStatus, Status> {
        self.state
            .lock()
            .unwrap()
            .connections
            .get(&connection_id)
            .copied()
            .ok_or(Status(-1))
    }

    fn version(&self) -> String {
        String::from(Self::VERSION)
    }
}
