//! Bindings to the `omnitak_*` C interface of `libomnitak_mobile`.

use crate::dispatch::CotCallback;
use crate::native::{ConnectRequest, ConnectionStatus, NativeCore, NO_CONNECTION};
use crate::{ConnectionId, Status};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;

// Note: Keep in sync with `omnitak_mobile.h`.
#[repr(C)]
#[derive(Default)]
struct RawConnectionStatus {
    is_connected: i32,
    messages_sent: u64,
    messages_received: u64,
    last_error_code: i32,
}

#[link(name = "omnitak_mobile")]
extern "C" {
    fn omnitak_init() -> i32;
    fn omnitak_shutdown();
    fn omnitak_connect(
        host: *const c_char,
        port: u16,
        protocol: i32,
        use_tls: i32,
        cert_pem: *const c_char,
        key_pem: *const c_char,
        ca_pem: *const c_char,
    ) -> u64;
    fn omnitak_disconnect(connection_id: u64) -> i32;
    fn omnitak_send_cot(connection_id: u64, cot_xml: *const c_char) -> i32;
    fn omnitak_register_callback(
        connection_id: u64,
        callback: CotCallback,
        user_data: *mut c_void,
    ) -> i32;
    fn omnitak_unregister_callback(connection_id: u64) -> i32;
    fn omnitak_get_status(connection_id: u64, status: *mut RawConnectionStatus) -> i32;
    fn omnitak_version() -> *const c_char;
}

/// The OmniTAK native core, linked into the same process.
#[derive(Debug, Default, Clone, Copy)]
pub struct OmniTakCore;

fn c_string(field: &str, value: &str) -> Option<CString> {
    match CString::new(value) {
        Ok(value) => Some(value),
        Err(_) => {
            log::error!("{} contains an interior NUL byte", field);
            None
        }
    }
}

fn optional_c_string(field: &str, value: Option<&str>) -> Option<Option<CString>> {
    match value {
        Some(value) => c_string(field, value).map(Some),
        None => Some(None),
    }
}

fn as_ptr_or_null(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |v| v.as_ptr())
}

impl NativeCore for OmniTakCore {
    fn init(&self) -> Status {
        Status(unsafe { omnitak_init() })
    }

    fn shutdown(&self) {
        unsafe { omnitak_shutdown() }
    }

    fn connect(&self, request: &ConnectRequest) -> ConnectionId {
        // The strings must stay alive until the call returns.
        let strings = (|| {
            Some((
                c_string("host", &request.host)?,
                optional_c_string("cert_pem", request.cert_pem.as_deref())?,
                optional_c_string("key_pem", request.key_pem.as_deref())?,
                optional_c_string("ca_pem", request.ca_pem.as_deref())?,
            ))
        })();

        let (host, cert_pem, key_pem, ca_pem) = match strings {
            Some(strings) => strings,
            None => return NO_CONNECTION,
        };

        unsafe {
            omnitak_connect(
                host.as_ptr(),
                request.port,
                request.protocol,
                i32::from(request.use_tls),
                as_ptr_or_null(&cert_pem),
                as_ptr_or_null(&key_pem),
                as_ptr_or_null(&ca_pem),
            )
        }
    }

    fn disconnect(&self, connection_id: ConnectionId) -> Status {
        Status(unsafe { omnitak_disconnect(connection_id) })
    }

    fn send_message(&self, connection_id: ConnectionId, payload: &str) -> Status {
        match c_string("CoT payload", payload) {
            Some(payload) => Status(unsafe { omnitak_send_cot(connection_id, payload.as_ptr()) }),
            None => Status::INVALID_ARGUMENT,
        }
    }

    unsafe fn register_callback(
        &self,
        connection_id: ConnectionId,
        callback: CotCallback,
        user_data: *mut c_void,
    ) -> Status {
        Status(omnitak_register_callback(connection_id, callback, user_data))
    }

    fn unregister_callback(&self, connection_id: ConnectionId) -> Status {
        Status(unsafe { omnitak_unregister_callback(connection_id) })
    }

    fn get_status(&self, connection_id: ConnectionId) -> Result<ConnectionStatus, Status> {
        let mut raw = RawConnectionStatus::default();
        Status(unsafe { omnitak_get_status(connection_id, &mut raw) }).into_result()?;

        Ok(ConnectionStatus {
            is_connected: raw.is_connected != 0,
            messages_sent: raw.messages_sent,
            messages_received: raw.messages_received,
            last_error_code: raw.last_error_code,
        })
    }

    fn version(&self) -> String {
        let version = unsafe { omnitak_version() };
        if version.is_null() {
            return String::new();
        }
        // SAFETY: The core returns a static, NUL-terminated string.
        unsafe { CStr::from_ptr(version) }
            .to_string_lossy()
            .into_owned()
    }
}
