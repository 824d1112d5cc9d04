//! Managed engine primitives consumed by the binding layer
//!
//! The engine owns method lookup, signature metadata, the actual unmanaged
//! invocation and boxing/unboxing of values. The binding layer only decides
//! what to call and in which order.

use crate::error::Result;
use crate::gc::Root;
use crate::interop::{
    ArgBuffer, ClassHandle, HostValue, MarshalType, MethodHandle, ObjectRef, TypeHandle,
};

/// Result of one native invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeOutcome {
    pub result: ObjectRef,
    /// Non-null when the callee threw
    pub exception: ObjectRef,
}

impl NativeOutcome {
    pub const fn returned(result: ObjectRef) -> Self {
        Self {
            result,
            exception: ObjectRef::NULL,
        }
    }

    pub const fn threw(exception: ObjectRef) -> Self {
        Self {
            result: ObjectRef::NULL,
            exception,
        }
    }
}

pub trait ManagedRuntime {
    /// Find a method on `class` by name; `arity` of -1 matches any
    fn find_method(&self, class: ClassHandle, name: &str, arity: i32) -> Option<MethodHandle>;

    /// Class hosting the engine's own binding helpers
    fn runtime_class(&self) -> Option<ClassHandle> {
        None
    }

    /// Owning class for binding `method`, optionally against `receiver`
    fn class_for_bind(&self, receiver: Option<ObjectRef>, method: MethodHandle)
        -> Option<ClassHandle>;

    fn class_type(&self, class: ClassHandle) -> TypeHandle;

    fn type_name(&self, ty: TypeHandle) -> String;

    /// Assembly-qualified type name
    fn type_aqn(&self, ty: TypeHandle) -> String {
        self.type_name(ty)
    }

    /// Parameter metadata for `method` as seen through `ty`, as a JSON document
    fn marshal_signature_info(&self, ty: TypeHandle, method: MethodHandle) -> Option<String>;

    /// Perform the unmanaged call with an already marshaled argument buffer
    fn invoke(
        &self,
        method: MethodHandle,
        receiver: Option<ObjectRef>,
        args: &ArgBuffer,
    ) -> NativeOutcome;

    /// Human-readable message of a thrown managed exception
    fn exception_message(&self, exception: ObjectRef) -> String;

    /// Unbox `value` into `scratch` if it is a primitive, returning its tag either way
    fn try_unbox_primitive(&self, value: ObjectRef, scratch: &mut [u8]) -> MarshalType;

    /// Convert a non-primitive result, kept alive by `root`, to a host value
    fn unbox_non_primitive(
        &self,
        root: &Root,
        marshal_type: MarshalType,
        scratch: &mut [u8],
    ) -> Result<HostValue>;

    fn string_to_managed(&self, value: &str, interned: bool) -> ObjectRef;

    /// Box an arbitrary host value as a managed object
    fn host_to_managed_object(&self, value: &HostValue) -> ObjectRef;

    fn host_to_managed_uri(&self, value: &HostValue) -> ObjectRef;

    /// Numeric value of an enum argument for parameter `index` of `method`
    fn host_to_enum(&self, value: &HostValue, method: MethodHandle, index: usize) -> Result<i64>;
}
