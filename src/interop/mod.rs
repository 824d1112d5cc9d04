//! Interop - Call managed methods from the host with compiled marshaling
//!
//! Architecture:
//! - `types.rs` - engine handles, host values, marshal type tags
//! - `signature.rs` - signature strings and the primitive converter table
//! - `automatic.rs` - per-callee resolution of automatic parameters
//! - `converter.rs` - compiled converters and argument marshaling
//! - `marshal.rs` - host value coercions and result unboxing
//! - `abi.rs` - argument buffer layout and call stubs
//! - `cache.rs` - converter cache keyed by signature and method
//! - `call.rs` - bound method tokens, scratch leases, dispatchers
//! - `bind.rs` - binder context and dispatcher cache

mod abi;
mod automatic;
mod bind;
mod cache;
mod call;
mod converter;
mod marshal;
mod signature;
mod types;

pub use abi::{align_up, ArgBuffer, CallStub, SlotLayout, BUFFER_PADDING, DIRECTORY_SLOT_SIZE, INDIRECT_ALIGN};
pub use automatic::{
    pick_automatic_step, CustomMarshaler, MarshalerRegistry, ParameterInfo, SignatureInfo,
    SignatureInfoTable,
};
pub use bind::Binder;
pub use cache::ConverterCache;
pub use call::{display_name, BoundMethodToken, Dispatcher};
pub use converter::{ConversionStep, Converter, Transform};
pub use marshal::{
    convert_argument, to_f64, to_i32, to_i64, to_raw_handle, to_u32, unmarshal_result, Marshaled,
    PRIMITIVE_CELL_SIZE,
};
pub use signature::{primitive_step, ResultPolicy, Signature, AUTOMATIC, RAW_HANDLE, SUPPRESS_RESULT};
pub use types::{
    ClassHandle, HostObjectId, HostValue, IndirectMode, MarshalType, MethodHandle, MethodTarget,
    ObjectRef, TypeHandle,
};
