//! Binding errors
//!
//! Signature and compilation errors surface at bind time; arity and native
//! faults surface per call. Nothing here is retried by the binding layer.

use crate::interop::{MarshalType, MethodHandle, ObjectRef};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BindingError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    #[error("malformed signature '{signature}': '!' must be at the end of the signature (found at position {position})")]
    MalformedSignature { signature: String, position: usize },

    #[error("unknown parameter type '{kind}' at position {position} in signature '{signature}'")]
    UnknownParameterKind {
        signature: String,
        kind: char,
        position: usize,
    },

    #[error("cannot use automatic argument type handling without a method (signature '{signature}')")]
    MissingMethodForAutoConversion { signature: String },

    #[error("failed to select an automatic converter for parameter #{index} of method {method}")]
    NoAutomaticConverter { method: MethodHandle, index: usize },

    #[error("signature info unavailable for method {method} on type {type_name}")]
    SignatureInfoUnavailable {
        method: MethodHandle,
        type_name: String,
    },

    #[error("invalid signature info for method {method}: {reason}")]
    InvalidSignatureInfo { method: MethodHandle, reason: String },

    #[error("expected {expected} argument(s) but got {actual} for signature '{signature}'")]
    ArityMismatch {
        signature: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument #{index} cannot be passed as '{kind}': got {found}")]
    InvalidArgument {
        index: usize,
        kind: char,
        found: &'static str,
    },

    #[error("managed exception thrown by {method_name}: {message}")]
    NativeInvocationFault {
        method_name: String,
        exception: ObjectRef,
        message: String,
    },

    #[error("no converter available for bound method '{name}'")]
    NoConverterAvailable { name: String },

    #[error("corrupt converter cache entry for '{signature}': {reason}")]
    CorruptCacheEntry {
        signature: String,
        reason: &'static str,
    },

    #[error("could not resolve the owning class for method {method}")]
    UnresolvedClass {
        method: MethodHandle,
        receiver: Option<ObjectRef>,
    },

    #[error("can't find runtime method '{name}'")]
    MethodNotFound { name: String },

    #[error("signature '{signature}' roots managed references but no root buffer was provided")]
    MissingRootBuffer { signature: String },

    #[error("failed to unbox result of type {marshal_type:?}: {reason}")]
    Unbox {
        marshal_type: MarshalType,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BindingError {
    /// Errors raised while parsing or compiling a signature.
    pub fn is_bind_time(&self) -> bool {
        matches!(
            self,
            Self::MalformedSignature { .. }
                | Self::UnknownParameterKind { .. }
                | Self::MissingMethodForAutoConversion { .. }
                | Self::NoAutomaticConverter { .. }
                | Self::SignatureInfoUnavailable { .. }
                | Self::InvalidSignatureInfo { .. }
                | Self::NoConverterAvailable { .. }
                | Self::CorruptCacheEntry { .. }
                | Self::UnresolvedClass { .. }
        )
    }
}
