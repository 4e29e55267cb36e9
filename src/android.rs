//! The JNI surface of the library, backing `OmniTAKNativeBridge.kt`.
//!
//! <div class="warning">
//! The library expects to be loaded with `System.loadLibrary`, which runs
//! [`JNI_OnLoad`] and sets up logging and the global [`Bridge`]. Hosts that
//! link it some other way must call [`init_with_env`] or [`init_with_vm`]
//! before any `native*` method is used.
//! </div>
//!
//! Events from the native core are delivered to the instance method
//! `onCotReceived(connectionId: Long, cotXml: String)` of whichever
//! `OmniTAKNativeBridge` called `nativeRegisterCallback` for that connection.
//! The call may arrive on any thread.
#![allow(clippy::as_conversions)]

use crate::config::BindingConfig;
use crate::native::{ConnectRequest, ConnectionStatus, NO_CONNECTION};
use crate::omnitak::OmniTakCore;
use crate::runtime::{AttachState, HostRuntime};
use crate::{Bridge, ConnectionId, DispatchError, Status};
use jni::errors::{Error as JNIError, JniError};
use jni::objects::{GlobalRef, JObject, JString, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{jboolean, jint, jlong, jobject, jstring, JNI_ERR, JNI_FALSE, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use once_cell::sync::OnceCell;
use std::ffi::c_void;

/// The bridge used by the JNI entry points.
pub type JniBridge = Bridge<OmniTakCore, JvmRuntime>;

static GLOBAL: OnceCell<JniBridge> = OnceCell::new();

// Locals needed by one delivery: the target's class and the payload string.
const DELIVERY_LOCAL_FRAME: i32 = 8;

/// The Android Runtime, as seen from native threads.
pub struct JvmRuntime {
    vm: JavaVM,
    binding: BindingConfig,
}

impl JvmRuntime {
    /// Creates a runtime which delivers events through `binding`'s callback method.
    pub fn new(vm: JavaVM, binding: BindingConfig) -> Self {
        Self { vm, binding }
    }

    /// The VM native threads are attached to.
    pub fn java_vm(&self) -> &JavaVM {
        &self.vm
    }

    /// The Java names this runtime binds to.
    pub fn binding(&self) -> &BindingConfig {
        &self.binding
    }

    fn binding_fault(&self, env: &JNIEnv, cause: JNIError) -> DispatchError {
        clear_pending_exception(env);
        DispatchError::Binding {
            method: self.binding.callback_method,
            signature: self.binding.callback_signature,
            reason: cause.to_string(),
        }
    }
}

impl HostRuntime for JvmRuntime {
    type Target = GlobalRef;

    fn attach_state(&self) -> Result<AttachState, DispatchError> {
        match self.vm.get_env() {
            Ok(_) => Ok(AttachState::Attached),
            Err(JNIError::JniCall(JniError::ThreadDetached)) => Ok(AttachState::Detached),
            Err(e) => Err(DispatchError::Attach(format!(
                "failed to get JNI environment: {}",
                e
            ))),
        }
    }

    fn attach_current_thread(&self) -> Result<(), DispatchError> {
        self.vm
            .attach_current_thread_permanently()
            .map(|_| ())
            .map_err(|e| DispatchError::Attach(e.to_string()))
    }

    fn detach_current_thread(&self) {
        // SAFETY: Only called by `AttachGuard` after delivery has finished,
        // when no `JNIEnv` or local reference from this attachment is left.
        unsafe { self.vm.detach_current_thread() }
    }

    fn deliver(
        &self,
        target: &GlobalRef,
        connection_id: ConnectionId,
        payload: &str,
    ) -> Result<(), DispatchError> {
        let mut env = self
            .vm
            .get_env()
            .map_err(|e| DispatchError::Attach(e.to_string()))?;

        // Every local reference created in here is freed when the frame is popped.
        env.with_local_frame(DELIVERY_LOCAL_FRAME, |env| -> Result<(), DispatchError> {
            let class = env
                .get_object_class(target)
                .map_err(|e| self.binding_fault(&*env, e))?;
            let method = env
                .get_method_id(
                    &class,
                    self.binding.callback_method,
                    self.binding.callback_signature,
                )
                .map_err(|e| self.binding_fault(&*env, e))?;

            let payload = env.new_string(payload).map_err(|e| {
                clear_pending_exception(&*env);
                DispatchError::Conversion(e.to_string())
            })?;

            let args = [
                JValue::Long(connection_id as jlong).as_jni(),
                JValue::Object(&payload).as_jni(),
            ];

            // SAFETY: `method` was resolved on the target's own class with the
            // signature the arguments are built for.
            let result = unsafe {
                env.call_method_unchecked(
                    target,
                    method,
                    ReturnType::Primitive(Primitive::Void),
                    &args,
                )
            };

            if clear_pending_exception(env) {
                return Err(DispatchError::Fault(format!(
                    "{}.{} threw",
                    self.binding.bridge_class, self.binding.callback_method
                )));
            }

            result
                .map(|_| ())
                .map_err(|e| DispatchError::Fault(e.to_string()))
        })
    }
}

// Only reached by `with_local_frame` pushing or popping its frame. Every
// error from inside the frame is classified where it happens.
impl From<JNIError> for DispatchError {
    fn from(cause: JNIError) -> Self {
        DispatchError::Runtime(cause.to_string())
    }
}

/// Describes and clears any pending Java exception, reporting if there was one.
fn clear_pending_exception(env: &JNIEnv) -> bool {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
        true
    } else {
        false
    }
}

fn init_logging(binding: &BindingConfig) {
    let log_filter = android_logger::FilterBuilder::new()
        .filter_level(binding.max_log_level)
        .filter_module("jni", log::LevelFilter::Warn)
        .build();

    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(binding.max_log_level)
            .with_tag(binding.log_tag)
            .with_filter(log_filter),
    );
}

/// Initialize given the process' [`JavaVM`], using the default [`BindingConfig`].
///
/// Only the first initialization takes effect.
pub fn init_with_vm(vm: JavaVM) {
    init_with_config(vm, BindingConfig::default());
}

/// Initialize given the process' [`JavaVM`] and the names to bind with.
///
/// Only the first initialization takes effect.
pub fn init_with_config(vm: JavaVM, binding: BindingConfig) {
    GLOBAL.get_or_init(|| Bridge::new(OmniTakCore, JvmRuntime::new(vm, binding)));
}

/// Initialize given a typical Android NDK [`JNIEnv`].
pub fn init_with_env(env: &JNIEnv) -> Result<(), JNIError> {
    GLOBAL.get_or_try_init(|| -> Result<_, JNIError> {
        Ok(Bridge::new(
            OmniTakCore,
            JvmRuntime::new(env.get_java_vm()?, BindingConfig::default()),
        ))
    })?;
    Ok(())
}

/// Returns the bridge set up by [`JNI_OnLoad`] or one of the `init_*` functions.
pub fn bridge() -> Option<&'static JniBridge> {
    let bridge = GLOBAL.get();
    if bridge.is_none() {
        log::error!("omnitak-bridge used before initialization");
    }
    bridge
}

/// A JNI error raised while serving an entry point. If it stands for a Java
/// exception, that exception has been described and cleared already.
#[derive(Debug)]
pub(crate) struct Error(JNIError);

impl From<JNIError> for Error {
    #[track_caller]
    fn from(cause: JNIError) -> Self {
        if let JNIError::JavaException = cause {
            if let Some(bridge) = GLOBAL.get() {
                if let Ok(env) = bridge.runtime().java_vm().get_env() {
                    clear_pending_exception(&env);
                }
            }
        }

        Self(cause)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

fn optional_string(env: &mut JNIEnv, value: &JString) -> Result<Option<String>, Error> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(env.get_string(value)?.into()))
}

fn status_object<'local>(
    env: &mut JNIEnv<'local>,
    binding: &BindingConfig,
    status: &ConnectionStatus,
) -> Result<JObject<'local>, Error> {
    let class = env.find_class(binding.status_class)?;
    let object = env.new_object(
        &class,
        binding.status_constructor_signature,
        &[
            JValue::Int(jint::from(status.is_connected)),
            JValue::Long(status.messages_sent as jlong),
            JValue::Long(status.messages_received as jlong),
            JValue::Int(status.last_error_code),
        ],
    )?;
    env.delete_local_ref(class)?;
    Ok(object)
}

/// Called by the JVM when the library is loaded.
///
/// # Safety
///
/// `vm` must be the `JavaVM` pointer handed over by the JVM.
#[no_mangle]
pub unsafe extern "system" fn JNI_OnLoad(vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    let binding = BindingConfig::default();
    init_logging(&binding);
    log::info!("JNI_OnLoad called");

    match JavaVM::from_raw(vm) {
        Ok(vm) => {
            init_with_config(vm, binding);
            JNI_VERSION_1_6
        }
        Err(e) => {
            log::error!("JNI_OnLoad received an unusable JavaVM: {}", e);
            JNI_ERR
        }
    }
}

/// `OmniTAKNativeBridge.nativeInit(): Int`. Initializes the native core.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeInit(
    _env: JNIEnv,
    _this: JObject,
) -> jint {
    log::info!("nativeInit called");
    match bridge() {
        Some(bridge) => bridge.init().0,
        None => Status::INVALID_ARGUMENT.0,
    }
}

/// `OmniTAKNativeBridge.nativeShutdown()`. Releases every callback and shuts the core down.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeShutdown(
    _env: JNIEnv,
    _this: JObject,
) {
    log::info!("nativeShutdown called");
    if let Some(bridge) = bridge() {
        bridge.shutdown();
    }
}

/// `OmniTAKNativeBridge.nativeConnect(...): Long`. Returns the new connection id, or `0`.
#[allow(clippy::too_many_arguments)]
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeConnect(
    mut env: JNIEnv,
    _this: JObject,
    host: JString,
    port: jint,
    protocol: jint,
    use_tls: jboolean,
    cert_pem: JString,
    key_pem: JString,
    ca_pem: JString,
) -> jlong {
    log::info!("nativeConnect called");
    let bridge = match bridge() {
        Some(bridge) => bridge,
        None => return NO_CONNECTION as jlong,
    };

    let port = match u16::try_from(port) {
        Ok(port) => port,
        Err(_) => {
            log::error!("Connection failed: port {} is out of range", port);
            return NO_CONNECTION as jlong;
        }
    };

    let request = (|| -> Result<ConnectRequest, Error> {
        Ok(ConnectRequest {
            host: optional_string(&mut env, &host)?.unwrap_or_default(),
            port,
            protocol,
            use_tls: use_tls != JNI_FALSE,
            cert_pem: optional_string(&mut env, &cert_pem)?,
            key_pem: optional_string(&mut env, &key_pem)?,
            ca_pem: optional_string(&mut env, &ca_pem)?,
        })
    })();

    match request {
        Ok(request) => bridge.connect(&request) as jlong,
        Err(e) => {
            log::error!("Connection failed: unreadable arguments: {}", e);
            NO_CONNECTION as jlong
        }
    }
}

/// `OmniTAKNativeBridge.nativeDisconnect(connectionId: Long): Int`.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeDisconnect(
    _env: JNIEnv,
    _this: JObject,
    connection_id: jlong,
) -> jint {
    log::info!("nativeDisconnect called for connection {}", connection_id);
    match bridge() {
        Some(bridge) => bridge.disconnect(connection_id as ConnectionId).0,
        None => Status::INVALID_ARGUMENT.0,
    }
}

/// `OmniTAKNativeBridge.nativeSendCot(connectionId: Long, cotXml: String): Int`.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeSendCot(
    mut env: JNIEnv,
    _this: JObject,
    connection_id: jlong,
    cot_xml: JString,
) -> jint {
    let bridge = match bridge() {
        Some(bridge) => bridge,
        None => return Status::INVALID_ARGUMENT.0,
    };

    match optional_string(&mut env, &cot_xml) {
        Ok(cot_xml) => bridge
            .send_message(connection_id as ConnectionId, &cot_xml.unwrap_or_default())
            .0,
        Err(e) => {
            log::error!("Failed to read CoT for connection {}: {}", connection_id, e);
            Status::INVALID_ARGUMENT.0
        }
    }
}

/// `OmniTAKNativeBridge.nativeRegisterCallback(connectionId: Long): Int`.
///
/// Events for the connection are delivered to `this.onCotReceived` from now on.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeRegisterCallback(
    env: JNIEnv,
    this: JObject,
    connection_id: jlong,
) -> jint {
    log::info!(
        "nativeRegisterCallback called for connection {}",
        connection_id
    );
    let bridge = match bridge() {
        Some(bridge) => bridge,
        None => return Status::INVALID_ARGUMENT.0,
    };

    match env.new_global_ref(&this).map_err(Error::from) {
        Ok(target) => bridge
            .register_callback(connection_id as ConnectionId, target)
            .0,
        Err(e) => {
            log::error!("Failed to register callback: {}", e);
            Status::INVALID_ARGUMENT.0
        }
    }
}

/// `OmniTAKNativeBridge.nativeUnregisterCallback(connectionId: Long): Int`.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeUnregisterCallback(
    _env: JNIEnv,
    _this: JObject,
    connection_id: jlong,
) -> jint {
    log::info!(
        "nativeUnregisterCallback called for connection {}",
        connection_id
    );
    match bridge() {
        Some(bridge) => bridge.unregister_callback(connection_id as ConnectionId).0,
        None => Status::INVALID_ARGUMENT.0,
    }
}

/// `OmniTAKNativeBridge.nativeGetStatus(connectionId: Long): ConnectionStatusNative?`.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeGetStatus(
    mut env: JNIEnv,
    _this: JObject,
    connection_id: jlong,
) -> jobject {
    log::debug!("nativeGetStatus called for connection {}", connection_id);
    let bridge = match bridge() {
        Some(bridge) => bridge,
        None => return JObject::null().into_raw(),
    };

    let status = match bridge.get_status(connection_id as ConnectionId) {
        Ok(status) => status,
        Err(_) => return JObject::null().into_raw(),
    };

    match status_object(&mut env, bridge.runtime().binding(), &status) {
        Ok(object) => object.into_raw(),
        Err(e) => {
            log::error!("Failed to create ConnectionStatusNative: {}", e);
            JObject::null().into_raw()
        }
    }
}

/// `OmniTAKNativeBridge.nativeVersion(): String?`.
#[no_mangle]
pub extern "system" fn Java_com_engindearing_omnitak_native_OmniTAKNativeBridge_nativeVersion(
    env: JNIEnv,
    _this: JObject,
) -> jstring {
    let bridge = match bridge() {
        Some(bridge) => bridge,
        None => return JObject::null().into_raw(),
    };

    match env.new_string(bridge.version()).map_err(Error::from) {
        Ok(version) => version.into_raw(),
        Err(e) => {
            log::error!("Failed to create version string: {}", e);
            JObject::null().into_raw()
        }
    }
}
