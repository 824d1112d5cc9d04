//! Converter compilation
//!
//! A [`Converter`] is the compiled form of a signature: one
//! [`ConversionStep`] per parameter, the scratch size those steps need, and
//! the result policy. Converters are immutable once built, apart from the
//! call stub which is planned on first use.

use super::abi::{ArgBuffer, CallStub};
use super::automatic::{pick_automatic_step, CustomMarshaler, MarshalerRegistry, SignatureInfoTable};
use super::marshal::{convert_argument, Marshaled};
use super::signature::{primitive_step, ResultPolicy, Signature, AUTOMATIC};
use super::types::{HostValue, IndirectMode, MethodHandle, MethodTarget};
use crate::error::{BindingError, Result};
use crate::gc::RootBuffer;
use crate::logging;
use crate::runtime::ManagedRuntime;
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Conversion applied to a host value before it is written to the buffer
#[derive(Clone)]
pub enum Transform {
    ManagedString,
    InternedString,
    ObjectBox,
    EnumBox,
    UriBox,
    Custom(Arc<dyn CustomMarshaler>),
}

impl Transform {
    pub fn name(&self) -> &str {
        match self {
            Self::ManagedString => "managed_string",
            Self::InternedString => "interned_string",
            Self::ObjectBox => "object_box",
            Self::EnumBox => "enum_box",
            Self::UriBox => "uri_box",
            Self::Custom(marshaler) => marshaler.name(),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(marshaler) => f.debug_tuple("Custom").field(&marshaler.name()).finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            (Self::ManagedString, Self::ManagedString)
            | (Self::InternedString, Self::InternedString)
            | (Self::ObjectBox, Self::ObjectBox)
            | (Self::EnumBox, Self::EnumBox)
            | (Self::UriBox, Self::UriBox) => true,
            _ => false,
        }
    }
}

/// How one parameter is marshaled
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionStep {
    /// Resolved kind code; automatic steps carry the code they resolved to
    pub kind: char,
    /// Bytes reserved in the indirect region, 0 for direct values
    pub size: usize,
    pub indirect: IndirectMode,
    pub transform: Option<Transform>,
    pub needs_root: bool,
    /// Picked from the callee's declared parameter type
    pub automatic: bool,
}

impl ConversionStep {
    pub fn indirect(kind: char, mode: IndirectMode, size: usize, transform: Option<Transform>) -> Self {
        Self {
            kind,
            size,
            indirect: mode,
            transform,
            needs_root: false,
            automatic: false,
        }
    }

    /// Direct step whose transform produces a managed reference
    pub fn rooted(kind: char, transform: Transform) -> Self {
        Self {
            kind,
            size: 0,
            indirect: IndirectMode::None,
            transform: Some(transform),
            needs_root: true,
            automatic: false,
        }
    }

    pub fn direct(kind: char) -> Self {
        Self {
            kind,
            size: 0,
            indirect: IndirectMode::None,
            transform: None,
            needs_root: false,
            automatic: false,
        }
    }

    pub fn into_automatic(mut self) -> Self {
        self.automatic = true;
        self
    }
}

/// Compiled signature
pub struct Converter {
    signature: Signature,
    /// Set only when at least one step is automatic
    method: Option<MethodHandle>,
    steps: SmallVec<[ConversionStep; 4]>,
    size: usize,
    root_count: usize,
    stub: OnceCell<CallStub>,
    warn_legacy: bool,
    legacy_notice: AtomicBool,
}

impl Converter {
    /// Compile `signature`, resolving automatic positions through `target`
    pub fn compile(
        signature: Signature,
        target: Option<MethodTarget>,
        runtime: &dyn ManagedRuntime,
        signature_info: &SignatureInfoTable,
        marshalers: &MarshalerRegistry,
    ) -> Result<Self> {
        let info = if signature.has_automatic() {
            let target = target.ok_or_else(|| BindingError::MissingMethodForAutoConversion {
                signature: signature.as_str().to_owned(),
            })?;
            Some((target.method, signature_info.lookup(runtime, target)?))
        } else {
            None
        };

        let mut steps = SmallVec::with_capacity(signature.param_count());
        let mut size = 0;
        let mut root_count = 0;

        for (index, &kind) in signature.kinds().iter().enumerate() {
            let step = match (&info, kind) {
                (Some((method, info)), AUTOMATIC) => {
                    pick_automatic_step(*method, index, info.parameters.get(index), marshalers)?
                }
                _ => primitive_step(kind).ok_or_else(|| BindingError::UnknownParameterKind {
                    signature: signature.as_str().to_owned(),
                    kind,
                    position: index,
                })?,
            };

            size += step.size;
            if step.needs_root {
                root_count += 1;
            }
            steps.push(step);
        }

        let converter = Self {
            method: info.map(|(method, _)| method),
            signature,
            steps,
            size,
            root_count,
            stub: OnceCell::new(),
            warn_legacy: true,
            legacy_notice: AtomicBool::new(false),
        };
        logging::log_converter_compiled(
            converter.signature.as_str(),
            converter.method,
            converter.size,
            converter.root_count,
        );
        Ok(converter)
    }

    /// Whether the one-time legacy `m` notice is logged
    pub fn with_legacy_warnings(mut self, enabled: bool) -> Self {
        self.warn_legacy = enabled;
        self
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn method(&self) -> Option<MethodHandle> {
        self.method
    }

    #[inline]
    pub fn steps(&self) -> &[ConversionStep] {
        &self.steps
    }

    /// Total indirect scratch size of all steps
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn root_count(&self) -> usize {
        self.root_count
    }

    #[inline]
    pub fn needs_root_buffer(&self) -> bool {
        self.root_count > 0
    }

    pub fn is_result_definitely_unmarshaled(&self) -> bool {
        self.signature.policy() == ResultPolicy::Suppressed
    }

    pub fn is_result_possibly_unmarshaled(&self) -> bool {
        matches!(self.signature.policy(), ResultPolicy::LegacyRaw { .. })
    }

    pub fn result_unmarshaled_if_argc(&self) -> Option<usize> {
        match self.signature.policy() {
            ResultPolicy::LegacyRaw { unmarshaled_if_argc } => Some(unmarshaled_if_argc),
            _ => None,
        }
    }

    /// Fewest arguments a call may supply
    pub fn min_args(&self) -> usize {
        self.result_unmarshaled_if_argc().unwrap_or(self.steps.len())
    }

    pub fn stub_name(&self) -> String {
        match self.method {
            Some(method) => format!("{}_for_method{}", self.signature.stub_name(), method),
            None => self.signature.stub_name(),
        }
    }

    /// Call stub, planned on first request
    pub fn stub(&self) -> &CallStub {
        self.stub.get_or_init(|| {
            let stub = CallStub::plan(self.stub_name(), &self.steps, self.size);
            logging::log_stub_attached(stub.name(), stub.buffer_size());
            stub
        })
    }

    #[inline]
    pub fn has_stub(&self) -> bool {
        self.stub.get().is_some()
    }

    pub fn legacy_notice_emitted(&self) -> bool {
        self.legacy_notice.load(Ordering::Relaxed)
    }

    /// Record a legacy raw-result call; true only the first time
    pub fn maybe_warn_legacy_signature(&self) -> bool {
        if self.legacy_notice.swap(true, Ordering::Relaxed) {
            return false;
        }
        if self.warn_legacy {
            logging::log_legacy_signature(self.signature.as_str());
        }
        true
    }

    pub fn check_arity(&self, argc: usize) -> Result<()> {
        let expected = self.min_args();
        if argc < expected {
            return Err(BindingError::ArityMismatch {
                signature: self.signature.as_str().to_owned(),
                expected,
                actual: argc,
            });
        }
        Ok(())
    }

    /// Whether a call with `argc` arguments gets its result unmarshaled
    pub fn decide_result_marshaled(&self, argc: usize) -> Result<bool> {
        match self.signature.policy() {
            ResultPolicy::Suppressed => Ok(false),
            ResultPolicy::Marshaled => Ok(true),
            ResultPolicy::LegacyRaw { unmarshaled_if_argc } => {
                self.check_arity(argc)?;
                if argc == unmarshaled_if_argc {
                    self.maybe_warn_legacy_signature();
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
        }
    }

    /// Fill `buffer` from `args`, rooting managed references in `roots`
    ///
    /// Missing trailing arguments marshal as `Undefined`; surplus ones are
    /// ignored.
    pub fn marshal(
        &self,
        runtime: &dyn ManagedRuntime,
        method: MethodHandle,
        args: &[HostValue],
        buffer: &mut ArgBuffer,
        mut roots: Option<&mut RootBuffer>,
    ) -> Result<()> {
        if self.needs_root_buffer() && roots.is_none() {
            return Err(BindingError::MissingRootBuffer {
                signature: self.signature.as_str().to_owned(),
            });
        }

        let stub = self.stub();
        buffer.prepare(stub.buffer_size(), self.steps.len());
        let undefined = HostValue::Undefined;

        for (index, (step, slot)) in self.steps.iter().zip(stub.slots()).enumerate() {
            let value = args.get(index).unwrap_or(&undefined);
            let marshaled = convert_argument(runtime, method, index, step, value)?;

            if let (Marshaled::Ref(obj), Some(root_slot)) = (marshaled, slot.root_slot) {
                if let Some(roots) = roots.as_deref_mut() {
                    roots.set(root_slot, obj);
                }
            }

            match slot.indirect {
                Some(offset) => {
                    marshaled.write_at(buffer, offset);
                    buffer.write_u32(slot.directory, offset as u32);
                }
                None => marshaled.write_at(buffer, slot.directory),
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("signature", &self.signature.as_str())
            .field("method", &self.method)
            .field("steps", &self.steps)
            .field("size", &self.size)
            .field("root_count", &self.root_count)
            .field("has_stub", &self.has_stub())
            .finish()
    }
}
