//! Connection id → callback target bookkeeping.

use crate::runtime::HostRuntime;
use crate::ConnectionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything needed to deliver events for one connection.
///
/// The target reference is released when the last handle to the context is
/// dropped. The registry holds one handle; every in-flight dispatch holds
/// another for its duration.
pub struct CallbackContext<R: HostRuntime> {
    runtime: Arc<R>,
    target: R::Target,
}

impl<R: HostRuntime> CallbackContext<R> {
    /// The runtime `target` belongs to.
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// The host object events are delivered to.
    pub fn target(&self) -> &R::Target {
        &self.target
    }
}

/// A thread-safe map from connection ids to their registered callback targets.
///
/// At most one target is registered per connection. Every registered target
/// is released exactly once: when it is unregistered, replaced, or cleared.
/// Releases always happen after the entry has left the map and outside of the
/// lock, since releasing may need to call into the host runtime.
pub struct CallbackRegistry<R: HostRuntime> {
    runtime: Arc<R>,
    entries: Mutex<HashMap<ConnectionId, Arc<CallbackContext<R>>>>,
}

impl<R: HostRuntime> CallbackRegistry<R> {
    /// Creates an empty registry for targets of `runtime`.
    pub fn new(runtime: Arc<R>) -> Self {
        Self {
            runtime,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The runtime every registered target belongs to.
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    // No code runs under the lock that could leave the map half-updated, so
    // a poisoned lock still guards a consistent map.
    fn entries(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<CallbackContext<R>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `target` for `connection_id`, replacing and releasing any
    /// previously registered target.
    ///
    /// Returns a handle to the new context, which can later be passed to
    /// [`CallbackRegistry::unregister_context`].
    pub fn register(
        &self,
        connection_id: ConnectionId,
        target: R::Target,
    ) -> Arc<CallbackContext<R>> {
        let context = Arc::new(CallbackContext {
            runtime: Arc::clone(&self.runtime),
            target,
        });

        let previous = self
            .entries()
            .insert(connection_id, Arc::clone(&context));

        if previous.is_some() {
            log::warn!(
                "replacing existing callback for connection {}",
                connection_id
            );
        }
        // `previous` is dropped here, after the lock is released.
        context
    }

    /// Returns a snapshot of the context registered for `connection_id`.
    ///
    /// The snapshot stays usable even if the entry is unregistered while it
    /// is held.
    pub fn lookup(&self, connection_id: ConnectionId) -> Option<Arc<CallbackContext<R>>> {
        self.entries().get(&connection_id).cloned()
    }

    /// Removes and releases the target for `connection_id`.
    ///
    /// Returns `false` if nothing was registered.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        let removed = self.entries().remove(&connection_id);
        removed.is_some()
    }

    /// Removes the entry for `connection_id` only if it is still `context`.
    ///
    /// Returns `false`, leaving the registry untouched, if the connection has
    /// been registered again since `context` was handed out.
    pub fn unregister_context(
        &self,
        connection_id: ConnectionId,
        context: &Arc<CallbackContext<R>>,
    ) -> bool {
        let mut entries = self.entries();
        match entries.get(&connection_id) {
            Some(current) if Arc::ptr_eq(current, context) => {
                let removed = entries.remove(&connection_id);
                drop(entries);
                removed.is_some()
            }
            _ => false,
        }
    }

    /// Removes and releases every registered target, returning how many
    /// there were.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        drained.len()
    }

    /// Whether a target is registered for `connection_id`.
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.entries().contains_key(&connection_id)
    }

    /// The connections which currently have a target, in no particular order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.entries().keys().copied().collect()
    }

    /// The number of registered targets.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no target is registered.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
