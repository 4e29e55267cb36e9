//! The seam between this crate and the managed runtime hosting the application.

use crate::{ConnectionId, DispatchError};

/// Whether the current OS thread is known to the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    /// The thread can call into the runtime.
    Attached,
    /// The thread must be attached before calling into the runtime.
    Detached,
}

/// A layer to access the managed runtime which is hosting the current
/// application process.
///
/// On Android this is implemented by [`JvmRuntime`](crate::android::JvmRuntime).
pub trait HostRuntime: Send + Sync + 'static {
    /// A long-lived reference to a callback receiver, which keeps the receiver
    /// from being collected.
    ///
    /// Dropping the value must release the reference.
    type Target: Send + Sync;

    /// Reports whether the calling thread is attached to this runtime.
    ///
    /// An error means the state could not be determined, and no attempt to
    /// call into the runtime should be made from this thread.
    fn attach_state(&self) -> Result<AttachState, DispatchError>;

    /// Attaches the calling thread to this runtime.
    fn attach_current_thread(&self) -> Result<(), DispatchError>;

    /// Detaches the calling thread from this runtime.
    ///
    /// Only called for threads that were attached by [`attach_current_thread`](Self::attach_current_thread).
    fn detach_current_thread(&self);

    /// Resolves the event method on `target` and invokes it with the event.
    ///
    /// The calling thread is attached for the duration of this call. Any fault
    /// raised by the callback must be cleared before returning, and any
    /// transient references created here must be released.
    fn deliver(
        &self,
        target: &Self::Target,
        connection_id: ConnectionId,
        payload: &str,
    ) -> Result<(), DispatchError>;
}

/// Keeps the current thread attached to a [`HostRuntime`] for as long as
/// it lives.
///
/// If the thread was already attached when the guard was created, dropping it
/// does nothing. Otherwise the thread is detached again on drop, so the thread
/// always leaves in the same state it entered.
#[must_use = "the thread is detached again when the guard is dropped"]
pub struct AttachGuard<'a, R: HostRuntime + ?Sized> {
    runtime: &'a R,
    detach_on_drop: bool,
}

impl<'a, R: HostRuntime + ?Sized> AttachGuard<'a, R> {
    /// Attaches the current thread unless it is already attached.
    pub fn attach_if_needed(runtime: &'a R) -> Result<Self, DispatchError> {
        let detach_on_drop = match runtime.attach_state()? {
            AttachState::Attached => false,
            AttachState::Detached => {
                log::debug!("attaching thread {:?} to host runtime", std::thread::current().id());
                runtime.attach_current_thread()?;
                true
            }
        };

        Ok(Self {
            runtime,
            detach_on_drop,
        })
    }

    /// Whether this guard performed the attachment, and so will detach.
    pub fn attached_here(&self) -> bool {
        self.detach_on_drop
    }
}

impl<R: HostRuntime + ?Sized> Drop for AttachGuard<'_, R> {
    fn drop(&mut self) {
        if self.detach_on_drop {
            log::debug!("detaching thread {:?} from host runtime", std::thread::current().id());
            self.runtime.detach_current_thread();
        }
    }
}
