//! Value conversion between host values and the argument buffer
//!
//! Arguments go through [`convert_argument`]; results come back through
//! [`unmarshal_result`], which reads primitives straight from the unboxing
//! cell and hands everything else to the engine.

use super::abi::ArgBuffer;
use super::converter::{ConversionStep, Transform};
use super::types::{HostValue, IndirectMode, MarshalType, MethodHandle, ObjectRef};
use crate::error::{BindingError, Result};
use crate::gc::Root;
use crate::runtime::ManagedRuntime;

/// Bytes the fast unboxing path may read from the scratch cell
pub const PRIMITIVE_CELL_SIZE: usize = 8;

/// A converted argument, ready to be written
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Marshaled {
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Managed reference, written as its 32-bit handle
    Ref(ObjectRef),
}

impl Marshaled {
    pub(crate) fn write_at(self, buffer: &mut ArgBuffer, offset: usize) {
        match self {
            Self::I32(v) => buffer.write_i32(offset, v),
            Self::U32(v) => buffer.write_u32(offset, v),
            Self::I64(v) => buffer.write_i64(offset, v),
            Self::F32(v) => buffer.write_f32(offset, v),
            Self::F64(v) => buffer.write_f64(offset, v),
            Self::Ref(obj) => buffer.write_u32(offset, obj.raw()),
        }
    }
}

fn invalid(index: usize, step: &ConversionStep, value: &HostValue) -> BindingError {
    BindingError::InvalidArgument {
        index,
        kind: step.kind,
        found: value.kind_name(),
    }
}

/// Run `step` over `value`, the argument at position `index`
pub fn convert_argument(
    runtime: &dyn ManagedRuntime,
    method: MethodHandle,
    index: usize,
    step: &ConversionStep,
    value: &HostValue,
) -> Result<Marshaled> {
    let converted = match &step.transform {
        Some(Transform::EnumBox) => {
            let raw = runtime.host_to_enum(value, method, index)?;
            match step.indirect {
                IndirectMode::I64 => Marshaled::I64(raw),
                _ => Marshaled::I32(raw as i32),
            }
        }
        Some(transform) => Marshaled::Ref(to_managed_ref(runtime, transform, value)
            .ok_or_else(|| invalid(index, step, value))??),
        None => {
            let bad = || invalid(index, step, value);
            match step.indirect {
                IndirectMode::I32 => Marshaled::I32(to_i32(value).ok_or_else(bad)?),
                IndirectMode::U32 => Marshaled::U32(to_u32(value).ok_or_else(bad)?),
                IndirectMode::I64 => Marshaled::I64(to_i64(value).ok_or_else(bad)?),
                IndirectMode::F32 => Marshaled::F32(to_f64(value).ok_or_else(bad)? as f32),
                IndirectMode::F64 => Marshaled::F64(to_f64(value).ok_or_else(bad)?),
                IndirectMode::None => Marshaled::Ref(to_raw_handle(value).ok_or_else(bad)?),
            }
        }
    };
    Ok(converted)
}

/// Managed reference for a transformed argument; `None` when the host value
/// has no representation under this transform
fn to_managed_ref(
    runtime: &dyn ManagedRuntime,
    transform: &Transform,
    value: &HostValue,
) -> Option<Result<ObjectRef>> {
    if value.is_nullish() {
        return Some(Ok(ObjectRef::NULL));
    }
    if let HostValue::Handle(obj) = value {
        return Some(Ok(*obj));
    }

    let obj = match transform {
        Transform::ManagedString | Transform::InternedString => {
            let interned = matches!(transform, Transform::InternedString);
            let text = stringify(value)?;
            runtime.string_to_managed(&text, interned)
        }
        Transform::ObjectBox => runtime.host_to_managed_object(value),
        Transform::UriBox => runtime.host_to_managed_uri(value),
        Transform::Custom(marshaler) => return Some(marshaler.to_managed(value, runtime)),
        Transform::EnumBox => return None,
    };
    Some(Ok(obj))
}

fn stringify(value: &HostValue) -> Option<String> {
    Some(match value {
        HostValue::String(s) => s.clone(),
        HostValue::Char(c) => c.to_string(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Int32(v) => v.to_string(),
        HostValue::UInt32(v) => v.to_string(),
        HostValue::Int64(v) => v.to_string(),
        HostValue::Float32(v) => v.to_string(),
        HostValue::Float64(v) => v.to_string(),
        _ => return None,
    })
}

pub fn to_i32(value: &HostValue) -> Option<i32> {
    Some(match *value {
        HostValue::Undefined | HostValue::Null => 0,
        HostValue::Bool(b) => b as i32,
        HostValue::Int32(v) => v,
        HostValue::UInt32(v) => v as i32,
        HostValue::Int64(v) => v as i32,
        HostValue::Float32(v) => v as i32,
        HostValue::Float64(v) => v as i32,
        HostValue::Char(c) => c as i32,
        _ => return None,
    })
}

pub fn to_u32(value: &HostValue) -> Option<u32> {
    Some(match *value {
        HostValue::UInt32(v) => v,
        HostValue::Int64(v) => v as u32,
        HostValue::Float32(v) => v as u32,
        HostValue::Float64(v) => v as u32,
        HostValue::Char(c) => c as u32,
        ref other => to_i32(other)? as u32,
    })
}

pub fn to_i64(value: &HostValue) -> Option<i64> {
    Some(match *value {
        HostValue::UInt32(v) => i64::from(v),
        HostValue::Int64(v) => v,
        HostValue::Float32(v) => v as i64,
        HostValue::Float64(v) => v as i64,
        ref other => i64::from(to_i32(other)?),
    })
}

pub fn to_f64(value: &HostValue) -> Option<f64> {
    Some(match *value {
        HostValue::UInt32(v) => f64::from(v),
        HostValue::Int64(v) => v as f64,
        HostValue::Float32(v) => f64::from(v),
        HostValue::Float64(v) => v,
        ref other => f64::from(to_i32(other)?),
    })
}

/// Raw handle for an `m` parameter
pub fn to_raw_handle(value: &HostValue) -> Option<ObjectRef> {
    match *value {
        HostValue::Undefined | HostValue::Null => Some(ObjectRef::NULL),
        HostValue::Handle(obj) => Some(obj),
        HostValue::UInt32(raw) => Some(ObjectRef(raw)),
        HostValue::Int32(raw) => Some(ObjectRef(raw as u32)),
        _ => None,
    }
}

fn cell<const N: usize>(scratch: &[u8], marshal_type: MarshalType) -> Result<[u8; N]> {
    scratch
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| BindingError::Unbox {
            marshal_type,
            reason: format!("scratch cell holds {} bytes, need {}", scratch.len(), N),
        })
}

/// Host value for the call result held by `root`
///
/// A null result is `Undefined`.
pub fn unmarshal_result(
    runtime: &dyn ManagedRuntime,
    root: &Root,
    scratch: &mut [u8],
) -> Result<HostValue> {
    let value = root.get();
    if value.is_null() {
        return Ok(HostValue::Undefined);
    }
    if scratch.len() < PRIMITIVE_CELL_SIZE {
        return Err(BindingError::Unbox {
            marshal_type: MarshalType::Null,
            reason: format!("scratch cell holds {} bytes, need {}", scratch.len(), PRIMITIVE_CELL_SIZE),
        });
    }

    let tag = runtime.try_unbox_primitive(value, scratch);
    let unboxed = match tag {
        MarshalType::Int => HostValue::Int32(i32::from_le_bytes(cell(scratch, tag)?)),
        MarshalType::Pointer | MarshalType::UInt32 => {
            HostValue::UInt32(u32::from_le_bytes(cell(scratch, tag)?))
        }
        MarshalType::Fp32 => HostValue::Float32(f32::from_le_bytes(cell(scratch, tag)?)),
        MarshalType::Fp64 => HostValue::Float64(f64::from_le_bytes(cell(scratch, tag)?)),
        MarshalType::Bool => HostValue::Bool(i32::from_le_bytes(cell(scratch, tag)?) != 0),
        MarshalType::Char => {
            let code = u32::from_le_bytes(cell(scratch, tag)?);
            HostValue::Char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
        }
        MarshalType::Int64 => HostValue::Int64(i64::from_le_bytes(cell(scratch, tag)?)),
        other => return runtime.unbox_non_primitive(root, other, scratch),
    };
    Ok(unboxed)
}
