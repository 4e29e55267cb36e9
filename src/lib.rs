#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod bridge;
pub mod config;
pub mod dispatch;
mod error;
pub mod native;
pub mod registry;
pub mod runtime;

pub use bridge::Bridge;
pub use config::BindingConfig;
pub use dispatch::Dispatcher;
pub use error::{DispatchError, Status};
pub use native::{ConnectRequest, ConnectionStatus, NativeCore};
pub use registry::{CallbackContext, CallbackRegistry};
pub use runtime::{AttachGuard, AttachState, HostRuntime};

/// Identifies one connection of the native core, for its whole lifetime.
///
/// Assigned by the core when connecting; `0` is never a valid id.
pub type ConnectionId = u64;

// Build the Android module when generating docs so that
// the Android-specific functions are included regardless of
// the host.
#[cfg(any(all(doc, docsrs), target_os = "android"))]
#[cfg_attr(docsrs, doc(cfg(target_os = "android")))]
pub mod android;

#[cfg(any(all(doc, docsrs), target_os = "android"))]
mod omnitak;

/// Test doubles and the dispatch test suite.
#[cfg(any(test, feature = "ffi-testing"))]
mod tests;

// Re-export any exported functions that are required for
// tests to run in a platform-native environment.
#[cfg(feature = "ffi-testing")]
#[cfg_attr(feature = "ffi-testing", allow(unused_imports))]
pub use tests::ffi::*;
