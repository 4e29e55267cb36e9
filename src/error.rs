use crate::ConnectionId;
use std::fmt;

/// The reasons a single dispatch can fail.
///
/// None of these are surfaced to the native core, which has no channel to
/// receive them. They are logged by [`Dispatcher::dispatch`] and otherwise
/// only visible through [`Dispatcher::try_dispatch`].
///
/// [`Dispatcher::dispatch`]: crate::Dispatcher::dispatch
/// [`Dispatcher::try_dispatch`]: crate::Dispatcher::try_dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No callback is registered for the connection. The event is dropped.
    NotRegistered(ConnectionId),
    /// The current thread could not be attached to the host runtime, or its
    /// attachment state could not be determined.
    Attach(String),
    /// The callback method could not be resolved on the registered target.
    ///
    /// This is a binary compatibility problem between the native library and
    /// the host application, not a problem with the event itself.
    Binding {
        /// The method name looked up on the target's class.
        method: &'static str,
        /// The JNI signature it was looked up with.
        signature: &'static str,
        /// Why the lookup failed.
        reason: String,
    },
    /// The payload could not be converted into a host runtime string.
    Conversion(String),
    /// The callback raised a fault inside the host runtime. The fault has
    /// already been cleared by the time this is returned.
    Fault(String),
    /// The host runtime failed around the call rather than inside it, for
    /// example while creating or releasing a local reference frame.
    Runtime(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::NotRegistered(id) => {
                write!(f, "no callback context found for connection {}", id)
            }
            DispatchError::Attach(reason) => {
                write!(f, "failed to attach to the host runtime: {}", reason)
            }
            DispatchError::Binding {
                method,
                signature,
                reason,
            } => write!(
                f,
                "failed to find callback method {}{}: {}",
                method, signature, reason
            ),
            DispatchError::Conversion(reason) => {
                write!(f, "failed to convert payload: {}", reason)
            }
            DispatchError::Fault(reason) => {
                write!(f, "exception occurred in callback: {}", reason)
            }
            DispatchError::Runtime(reason) => {
                write!(f, "host runtime failure around callback: {}", reason)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// A status code as returned by the native core.
///
/// Zero means success; every other value is a core-defined failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    /// Success.
    pub const OK: Status = Status(0);
    /// Used by this crate when an argument can't be handed to the core at all,
    /// such as a string containing an interior NUL.
    pub const INVALID_ARGUMENT: Status = Status(-1);

    /// Returns `true` for [`Status::OK`].
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Converts into a `Result`, keeping the failing status as the error.
    pub fn into_result(self) -> Result<(), Status> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
