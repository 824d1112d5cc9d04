//! Type definitions shared across the binding layer
//!
//! Engine handles are 32-bit values where zero means null. Host values are
//! what the scripting side hands in and gets back.

use core::fmt;
use serde::{Deserialize, Serialize};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// Reference to an object on the managed heap
    ObjectRef
);
handle_type!(
    /// Native method handle
    MethodHandle
);
handle_type!(ClassHandle);
handle_type!(TypeHandle);

/// Opaque identifier of an object living on the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostObjectId(pub u64);

/// A value as seen by the host scripting environment
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Char(char),
    String(String),
    /// Raw managed reference, passed or returned without marshaling
    Handle(ObjectRef),
    Object(HostObjectId),
}

impl HostValue {
    /// Short name used in error messages
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int32(_) => "int32",
            Self::UInt32(_) => "uint32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Handle(_) => "handle",
            Self::Object(_) => "object",
        }
    }

    #[inline]
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectRef> for HostValue {
    fn from(v: ObjectRef) -> Self {
        Self::Handle(v)
    }
}

/// Engine type tag for parameters and unboxed results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum MarshalType {
    Null = 0,
    Int = 1,
    Fp64 = 2,
    String = 3,
    #[serde(rename = "VT")]
    ValueType = 4,
    Delegate = 5,
    Task = 6,
    Object = 7,
    Bool = 8,
    Enum = 9,
    ArrayByte = 10,
    ArrayUbyte = 11,
    ArrayUbyteC = 12,
    ArrayShort = 13,
    ArrayUshort = 14,
    ArrayInt = 15,
    ArrayUint = 16,
    ArrayFloat = 17,
    ArrayDouble = 18,
    Uri = 22,
    SafeHandle = 23,
    Fp32 = 24,
    #[serde(rename = "UINT32")]
    UInt32 = 25,
    Int64 = 26,
    #[serde(rename = "UINT64")]
    UInt64 = 27,
    Char = 28,
    StringInterned = 29,
    Void = 30,
    Enum64 = 31,
    Pointer = 32,
}

impl MarshalType {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Null,
            1 => Self::Int,
            2 => Self::Fp64,
            3 => Self::String,
            4 => Self::ValueType,
            5 => Self::Delegate,
            6 => Self::Task,
            7 => Self::Object,
            8 => Self::Bool,
            9 => Self::Enum,
            10 => Self::ArrayByte,
            11 => Self::ArrayUbyte,
            12 => Self::ArrayUbyteC,
            13 => Self::ArrayShort,
            14 => Self::ArrayUshort,
            15 => Self::ArrayInt,
            16 => Self::ArrayUint,
            17 => Self::ArrayFloat,
            18 => Self::ArrayDouble,
            22 => Self::Uri,
            23 => Self::SafeHandle,
            24 => Self::Fp32,
            25 => Self::UInt32,
            26 => Self::Int64,
            27 => Self::UInt64,
            28 => Self::Char,
            29 => Self::StringInterned,
            30 => Self::Void,
            31 => Self::Enum64,
            32 => Self::Pointer,
            _ => return None,
        })
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Tags the fast unboxing path reads straight out of the scratch cell
    #[inline]
    pub const fn is_primitive(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Pointer
                | Self::UInt32
                | Self::Fp32
                | Self::Fp64
                | Self::Bool
                | Self::Char
                | Self::Int64
        )
    }

    #[inline]
    pub const fn is_array(self) -> bool {
        matches!(
            self,
            Self::ArrayByte
                | Self::ArrayUbyte
                | Self::ArrayUbyteC
                | Self::ArrayShort
                | Self::ArrayUshort
                | Self::ArrayInt
                | Self::ArrayUint
                | Self::ArrayFloat
                | Self::ArrayDouble
        )
    }
}

/// How a parameter value reaches the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum IndirectMode {
    /// 32-bit value stored directly in the parameter's directory slot
    #[default]
    None,
    I32,
    U32,
    I64,
    F32,
    F64,
}

impl IndirectMode {
    /// Bytes occupied in the indirect region
    #[inline]
    pub const fn value_size(self) -> usize {
        match self {
            Self::None => 0,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    #[inline]
    pub const fn is_indirect(self) -> bool {
        !matches!(self, Self::None)
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A method together with the type it is bound through
///
/// Signature metadata is resolved per target, so two owning types sharing one
/// method handle are kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodTarget {
    pub ty: TypeHandle,
    pub method: MethodHandle,
}

impl MethodTarget {
    pub const fn new(ty: TypeHandle, method: MethodHandle) -> Self {
        Self { ty, method }
    }
}
