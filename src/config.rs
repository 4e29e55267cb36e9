//! Names the native library uses to find its way around the host application.

/// How the native library binds to the Kotlin side of the bridge.
///
/// Note: Keep these in sync with `OmniTAKNativeBridge.kt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    /// Fully qualified, slash separated name of the class declaring the
    /// `native*` methods.
    pub bridge_class: &'static str,
    /// Name of the instance method events are delivered to.
    pub callback_method: &'static str,
    /// JNI signature of [`callback_method`](Self::callback_method). It must
    /// take a `long` connection id and a `String` payload, and return `void`.
    pub callback_signature: &'static str,
    /// Class constructed by `nativeGetStatus`.
    pub status_class: &'static str,
    /// JNI signature of the [`status_class`](Self::status_class) constructor.
    pub status_constructor_signature: &'static str,
    /// Tag attached to every log line written by this library.
    pub log_tag: &'static str,
    /// The most verbose level logged on Android.
    pub max_log_level: log::LevelFilter,
}

const CALLBACK_SIGNATURE: &str = concat!('(', 'J', "Ljava/lang/String;", ')', 'V');

// (isConnected: Int, messagesSent: Long, messagesReceived: Long, lastErrorCode: Int)
const STATUS_CONSTRUCTOR_SIGNATURE: &str = concat!('(', 'I', 'J', 'J', 'I', ')', 'V');

impl BindingConfig {
    /// The names used by the OmniTAK Android app.
    pub const fn new() -> Self {
        Self {
            bridge_class: "com/engindearing/omnitak/native/OmniTAKNativeBridge",
            callback_method: "onCotReceived",
            callback_signature: CALLBACK_SIGNATURE,
            status_class: "com/engindearing/omnitak/native/OmniTAKNativeBridge$ConnectionStatusNative",
            status_constructor_signature: STATUS_CONSTRUCTOR_SIGNATURE,
            log_tag: "OmniTAK-JNI",
            max_log_level: log::LevelFilter::Debug,
        }
    }

    /// Delivers events to a differently named method with the same shape.
    pub const fn with_callback_method(mut self, name: &'static str) -> Self {
        self.callback_method = name;
        self
    }

    /// Changes the most verbose level logged on Android.
    pub const fn with_max_log_level(mut self, level: log::LevelFilter) -> Self {
        self.max_log_level = level;
        self
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self::new()
    }
}
