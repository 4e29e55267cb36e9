//! The functional interface of the native connection core.
//!
//! Connection handling, TLS and message construction all live behind this
//! trait. This crate only forwards to it and routes its callbacks.

use crate::dispatch::CotCallback;
use crate::{ConnectionId, Status};
use std::ffi::c_void;

/// Returned by [`NativeCore::connect`] when no connection could be made.
pub const NO_CONNECTION: ConnectionId = 0;

/// Parameters for opening a connection to a TAK server.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Core-defined transport selector, passed through untouched.
    pub protocol: i32,
    /// Whether to wrap the connection in TLS.
    pub use_tls: bool,
    /// Client certificate, PEM encoded.
    pub cert_pem: Option<String>,
    /// Client private key, PEM encoded.
    pub key_pem: Option<String>,
    /// Trusted CA certificate, PEM encoded.
    pub ca_pem: Option<String>,
}

// Key material must never end up in logs.
impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("use_tls", &self.use_tls)
            .field("cert_pem", &self.cert_pem.as_ref().map(|_| "<redacted>"))
            .field("key_pem", &self.key_pem.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A point-in-time view of a connection, as reported by the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the connection is currently up.
    pub is_connected: bool,
    /// Messages sent since connecting.
    pub messages_sent: u64,
    /// Messages received since connecting.
    pub messages_received: u64,
    /// The core's code for the most recent error, `0` if there was none.
    pub last_error_code: i32,
}

/// The native connection core.
///
/// Implementations must be callable from any thread.
pub trait NativeCore: Send + Sync {
    /// Starts the core. Must be called before anything else.
    fn init(&self) -> Status;

    /// Closes every connection and stops the core.
    fn shutdown(&self);

    /// Opens a connection, returning its id or [`NO_CONNECTION`].
    fn connect(&self, request: &ConnectRequest) -> ConnectionId;

    /// Closes `connection_id`.
    fn disconnect(&self, connection_id: ConnectionId) -> Status;

    /// Queues a CoT XML message for sending on `connection_id`.
    fn send_message(&self, connection_id: ConnectionId, payload: &str) -> Status;

    /// Asks the core to invoke `callback` with `user_data` for every message
    /// received on `connection_id`, from any thread, until unregistered.
    ///
    /// # Safety
    ///
    /// `user_data` must stay valid for as long as the core may invoke
    /// `callback`, which is until [`unregister_callback`](Self::unregister_callback)
    /// or [`shutdown`](Self::shutdown) returns.
    unsafe fn register_callback(
        &self,
        connection_id: ConnectionId,
        callback: CotCallback,
        user_data: *mut c_void,
    ) -> Status;

    /// Stops callbacks for `connection_id`. None may start after this returns.
    fn unregister_callback(&self, connection_id: ConnectionId) -> Status;

    /// Reports the current state of `connection_id`.
    fn get_status(&self, connection_id: ConnectionId) -> Result<ConnectionStatus, Status>;

    /// The core's version string.
    fn version(&self) -> String;
}
