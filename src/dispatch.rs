//! Delivery of native-originated events into the host runtime.

use crate::registry::CallbackRegistry;
use crate::runtime::{AttachGuard, HostRuntime};
use crate::{ConnectionId, DispatchError};
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Delivers events from arbitrary native threads to the targets held in a
/// [`CallbackRegistry`].
pub struct Dispatcher<R: HostRuntime> {
    registry: Arc<CallbackRegistry<R>>,
}

impl<R: HostRuntime> Dispatcher<R> {
    /// Creates a dispatcher delivering to the targets in `registry`.
    pub fn new(registry: Arc<CallbackRegistry<R>>) -> Self {
        Self { registry }
    }

    /// The registry events are routed through.
    pub fn registry(&self) -> &Arc<CallbackRegistry<R>> {
        &self.registry
    }

    /// Delivers one event, logging and dropping it if anything goes wrong.
    ///
    /// Safe to call from any thread, attached to the host runtime or not.
    pub fn dispatch(&self, connection_id: ConnectionId, payload: &str) {
        log::debug!("CoT callback triggered for connection {}", connection_id);

        match self.try_dispatch(connection_id, payload) {
            Ok(()) => {}
            Err(e @ DispatchError::NotRegistered(_)) => log::warn!("{}", e),
            Err(e) => log::error!("dropping event for connection {}: {}", connection_id, e),
        }
    }

    /// Delivers one event, reporting why it was dropped if it was.
    ///
    /// The registry lock is only held while taking a snapshot of the
    /// connection's context. Attaching, invoking and detaching all happen
    /// without it.
    pub fn try_dispatch(
        &self,
        connection_id: ConnectionId,
        payload: &str,
    ) -> Result<(), DispatchError> {
        let context = self
            .registry
            .lookup(connection_id)
            .ok_or(DispatchError::NotRegistered(connection_id))?;

        let runtime = Arc::clone(context.runtime());
        let attachment = AttachGuard::attach_if_needed(&*runtime)?;

        let result = runtime.deliver(context.target(), connection_id, payload);

        // If the entry was unregistered meanwhile, this releases the target.
        // Do it while the thread is still attached.
        drop(context);
        drop(attachment);

        result
    }
}

/// The callback signature the native core invokes for every received message.
pub type CotCallback =
    extern "C" fn(user_data: *mut c_void, connection_id: ConnectionId, cot_xml: *const c_char);

/// The [`CotCallback`] handed to the native core.
///
/// `user_data` must point to a [`Dispatcher<R>`] which outlives every
/// invocation. Nothing, including a panic, is allowed to unwind back into the
/// native caller.
pub extern "C" fn cot_callback_trampoline<R: HostRuntime>(
    user_data: *mut c_void,
    connection_id: ConnectionId,
    cot_xml: *const c_char,
) {
    if user_data.is_null() {
        log::error!(
            "CoT callback for connection {} is missing its dispatcher",
            connection_id
        );
        return;
    }

    if cot_xml.is_null() {
        log::warn!("dropping null CoT payload for connection {}", connection_id);
        return;
    }

    // SAFETY: The pointer was created from a live `Dispatcher<R>` by `Bridge`, which
    // unregisters it from the core before the dispatcher is freed.
    let dispatcher = unsafe { &*(user_data as *const Dispatcher<R>) };
    // SAFETY: The core passes a NUL-terminated string valid for the duration of the call.
    let payload = unsafe { CStr::from_ptr(cot_xml) }.to_string_lossy();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatcher.dispatch(connection_id, &payload)
    }));

    if outcome.is_err() {
        log::error!("panic while dispatching CoT for connection {}", connection_id);
    }
}

/// Returns the `user_data` pointer to pair with [`cot_callback_trampoline`].
pub(crate) fn trampoline_user_data<R: HostRuntime>(dispatcher: &Arc<Dispatcher<R>>) -> *mut c_void {
    Arc::as_ptr(dispatcher) as *mut c_void
}
