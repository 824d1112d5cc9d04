//! Automatic (`a`) parameter resolution
//!
//! An automatic parameter takes its conversion from the callee's declared
//! parameter type, read from the engine's signature metadata. Types with a
//! registered custom marshaler use it; everything else maps onto the
//! narrowest primitive step.

use super::converter::{ConversionStep, Transform};
use super::signature::primitive_step;
use super::types::{
    HostValue, IndirectMode, MarshalType, MethodHandle, MethodTarget, ObjectRef, TypeHandle,
};
use crate::error::{BindingError, Result};
use crate::logging;
use crate::runtime::ManagedRuntime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Declared type of one method parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterInfo {
    pub marshal_type: MarshalType,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub custom_marshaler: Option<String>,
}

impl ParameterInfo {
    pub fn new(marshal_type: MarshalType) -> Self {
        Self {
            marshal_type,
            type_name: None,
            custom_marshaler: None,
        }
    }

    pub fn with_type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    pub fn with_custom_marshaler(mut self, name: impl Into<String>) -> Self {
        self.custom_marshaler = Some(name.into());
        self
    }
}

/// Parameter metadata for one method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub parameters: Vec<ParameterInfo>,
    /// Type the metadata was requested through
    #[serde(skip)]
    pub owner: TypeHandle,
}

impl SignatureInfo {
    pub fn from_json(method: MethodHandle, json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BindingError::InvalidSignatureInfo {
            method,
            reason: e.to_string(),
        })
    }
}

/// Memoized signature metadata, one entry per method
#[derive(Debug, Default)]
pub struct SignatureInfoTable {
    entries: DashMap<MethodHandle, Arc<SignatureInfo>>,
}

impl SignatureInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, runtime: &dyn ManagedRuntime, target: MethodTarget) -> Result<Arc<SignatureInfo>> {
        let owner_mismatch = match self.entries.get(&target.method) {
            Some(cached) if cached.owner == target.ty => return Ok(Arc::clone(cached.value())),
            Some(_) => true,
            None => false,
        };

        let json = runtime
            .marshal_signature_info(target.ty, target.method)
            .ok_or_else(|| BindingError::SignatureInfoUnavailable {
                method: target.method,
                type_name: runtime.type_name(target.ty),
            })?;

        let mut info = SignatureInfo::from_json(target.method, &json)?;
        info.owner = target.ty;
        let info = Arc::new(info);

        if owner_mismatch {
            warn!(
                target: logging::TARGET_CONVERTER,
                method = %target.method,
                ty = %target.ty,
                "owning type mismatch for signature info, caching disabled"
            );
            return Ok(info);
        }

        Ok(Arc::clone(self.entries.entry(target.method).or_insert(info).value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Converts host values of one managed type that has no primitive mapping
pub trait CustomMarshaler {
    fn name(&self) -> &str;

    fn to_managed(&self, value: &HostValue, runtime: &dyn ManagedRuntime) -> Result<ObjectRef>;
}

/// Name → marshaler table fed by the generated registration code
#[derive(Default)]
pub struct MarshalerRegistry {
    marshalers: DashMap<String, Arc<dyn CustomMarshaler>>,
}

impl MarshalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the managed type name it handles; replaces any previous entry
    pub fn register(&self, type_name: impl Into<String>, marshaler: Arc<dyn CustomMarshaler>) {
        let type_name = type_name.into();
        debug!(target: logging::TARGET_CONVERTER, type_name = %type_name, marshaler = marshaler.name(), "custom marshaler registered");
        self.marshalers.insert(type_name, marshaler);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn CustomMarshaler>> {
        self.marshalers.get(type_name).map(|m| Arc::clone(m.value()))
    }

    pub fn len(&self) -> usize {
        self.marshalers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marshalers.is_empty()
    }
}

impl fmt::Debug for MarshalerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshalerRegistry")
            .field("count", &self.marshalers.len())
            .finish()
    }
}

/// Pick the step for automatic parameter `index` of `method`
pub fn pick_automatic_step(
    method: MethodHandle,
    index: usize,
    param: Option<&ParameterInfo>,
    marshalers: &MarshalerRegistry,
) -> Result<ConversionStep> {
    let unresolved = || BindingError::NoAutomaticConverter { method, index };
    let param = param.ok_or_else(unresolved)?;

    // An explicitly named marshaler must be registered; a type name match is optional
    let custom = match param.custom_marshaler.as_deref() {
        Some(name) => match marshalers.get(name) {
            Some(marshaler) => Some(marshaler),
            None => {
                warn!(
                    target: logging::TARGET_CONVERTER,
                    method = %method,
                    index = index,
                    marshaler = name,
                    "custom marshaler is not registered"
                );
                return Err(unresolved());
            }
        },
        None => param.type_name.as_deref().and_then(|name| marshalers.get(name)),
    };
    if let Some(marshaler) = custom {
        return Ok(ConversionStep::rooted('o', Transform::Custom(marshaler)).into_automatic());
    }

    let step = match param.marshal_type {
        MarshalType::Int | MarshalType::Bool | MarshalType::Char => primitive_step('i'),
        MarshalType::UInt32 | MarshalType::Pointer => {
            Some(ConversionStep::indirect('i', IndirectMode::U32, 8, None))
        }
        MarshalType::Int64 | MarshalType::UInt64 => primitive_step('l'),
        MarshalType::Fp32 => primitive_step('f'),
        MarshalType::Fp64 => primitive_step('d'),
        MarshalType::String => primitive_step('s'),
        MarshalType::StringInterned => primitive_step('S'),
        MarshalType::Enum => primitive_step('j'),
        MarshalType::Enum64 => primitive_step('k'),
        MarshalType::Uri => primitive_step('u'),
        MarshalType::Object
        | MarshalType::ValueType
        | MarshalType::Delegate
        | MarshalType::Task
        | MarshalType::SafeHandle => primitive_step('o'),
        t if t.is_array() => primitive_step('o'),
        _ => None,
    };

    step.map(ConversionStep::into_automatic).ok_or_else(unresolved)
}
