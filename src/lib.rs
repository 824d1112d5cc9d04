//! Interop Bindings - signature-driven calls from a host into a managed engine
//!
//! A compact signature string such as `"ii"` or `"s!"` describes how each
//! argument crosses the boundary. The [`Binder`] compiles it into a cached
//! [`Converter`] and wraps method, receiver and converter into a
//! [`Dispatcher`] that marshals arguments, invokes the method through the
//! engine's [`ManagedRuntime`] primitives and decodes the result. References
//! handed to the engine stay rooted in a [`RootRegistry`] for the duration of
//! the call.

pub mod config;
pub mod error;
pub mod gc;
pub mod interop;
pub mod logging;
pub mod runtime;

pub use config::BindingConfig;
pub use error::{BindingError, Result};
pub use gc::{Root, RootBuffer, RootRegistry};
pub use interop::{
    Binder, Converter, CustomMarshaler, Dispatcher, HostValue, MarshalType, MethodHandle,
    ObjectRef, Signature,
};
pub use runtime::{ManagedRuntime, NativeOutcome};

/// Install the tracing subscriber configured from the environment
pub fn init() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    logging::init()
}
