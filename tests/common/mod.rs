//! In-memory managed engine for integration tests

#![allow(dead_code)]

use interop_bindings::interop::{
    to_i64, ArgBuffer, ClassHandle, HostValue, MarshalType, Marshaled, MethodHandle, ObjectRef,
    ParameterInfo, SignatureInfo, TypeHandle,
};
use interop_bindings::{BindingError, ManagedRuntime, NativeOutcome, Root};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const APP_CLASS: ClassHandle = ClassHandle(1);
pub const RUNTIME_CLASS: ClassHandle = ClassHandle(99);

#[derive(Debug, Clone, PartialEq)]
pub enum FakeObject {
    Int(i32),
    UInt(u32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Uri(String),
    Host(HostValue),
    Exception(String),
}

/// What a fake method body produces
pub enum Outcome {
    Return(FakeObject),
    Null,
    /// A reference the heap does not know, so unboxing it fails
    Dangling,
    Throw(String),
}

pub type Body = Box<dyn Fn(&FakeRuntime, Option<ObjectRef>, &[Marshaled]) -> Outcome>;

pub struct FakeMethod {
    pub name: String,
    pub class: ClassHandle,
    pub params: Vec<ParameterInfo>,
    body: Body,
}

#[derive(Default)]
pub struct FakeRuntime {
    heap: RefCell<Vec<FakeObject>>,
    methods: RefCell<HashMap<MethodHandle, Rc<FakeMethod>>>,
    pub invocations: RefCell<usize>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method on `class` taking parameters of `params`
    pub fn define(
        &self,
        class: ClassHandle,
        name: &str,
        params: &[MarshalType],
        body: impl Fn(&FakeRuntime, Option<ObjectRef>, &[Marshaled]) -> Outcome + 'static,
    ) -> MethodHandle {
        let params = params.iter().map(|&t| ParameterInfo::new(t)).collect();
        self.define_with_info(class, name, params, body)
    }

    pub fn define_with_info(
        &self,
        class: ClassHandle,
        name: &str,
        params: Vec<ParameterInfo>,
        body: impl Fn(&FakeRuntime, Option<ObjectRef>, &[Marshaled]) -> Outcome + 'static,
    ) -> MethodHandle {
        let mut methods = self.methods.borrow_mut();
        let handle = MethodHandle(methods.len() as u32 + 1);
        methods.insert(
            handle,
            Rc::new(FakeMethod {
                name: name.to_owned(),
                class,
                params,
                body: Box::new(body),
            }),
        );
        handle
    }

    pub fn alloc(&self, obj: FakeObject) -> ObjectRef {
        let mut heap = self.heap.borrow_mut();
        heap.push(obj);
        ObjectRef(heap.len() as u32)
    }

    pub fn object(&self, obj: ObjectRef) -> Option<FakeObject> {
        if obj.is_null() {
            return None;
        }
        self.heap.borrow().get(obj.raw() as usize - 1).cloned()
    }

    pub fn string(&self, obj: ObjectRef) -> Option<String> {
        match self.object(obj)? {
            FakeObject::Str(s) => Some(s),
            _ => None,
        }
    }

    fn method(&self, method: MethodHandle) -> Option<Rc<FakeMethod>> {
        self.methods.borrow().get(&method).cloned()
    }

    fn decode(params: &[ParameterInfo], args: &ArgBuffer) -> Vec<Marshaled> {
        params
            .iter()
            .enumerate()
            .map(|(i, param)| match param.marshal_type {
                MarshalType::Int | MarshalType::Bool | MarshalType::Char | MarshalType::Enum => {
                    Marshaled::I32(args.indirect_i32(i).unwrap_or_default())
                }
                MarshalType::UInt32 | MarshalType::Pointer => {
                    Marshaled::U32(args.indirect_u32(i).unwrap_or_default())
                }
                MarshalType::Int64 | MarshalType::UInt64 | MarshalType::Enum64 => {
                    Marshaled::I64(args.indirect_i64(i).unwrap_or_default())
                }
                MarshalType::Fp32 => Marshaled::F32(args.indirect_f32(i).unwrap_or_default()),
                MarshalType::Fp64 => Marshaled::F64(args.indirect_f64(i).unwrap_or_default()),
                _ => Marshaled::Ref(ObjectRef(args.directory_slot(i).unwrap_or_default())),
            })
            .collect()
    }
}

impl ManagedRuntime for FakeRuntime {
    fn find_method(&self, class: ClassHandle, name: &str, arity: i32) -> Option<MethodHandle> {
        self.methods
            .borrow()
            .iter()
            .find(|(_, m)| {
                m.class == class && m.name == name && (arity < 0 || m.params.len() == arity as usize)
            })
            .map(|(&handle, _)| handle)
    }

    fn runtime_class(&self) -> Option<ClassHandle> {
        Some(RUNTIME_CLASS)
    }

    fn class_for_bind(&self, _receiver: Option<ObjectRef>, method: MethodHandle) -> Option<ClassHandle> {
        self.method(method).map(|m| m.class)
    }

    fn class_type(&self, class: ClassHandle) -> TypeHandle {
        TypeHandle(class.raw() + 1000)
    }

    fn type_name(&self, ty: TypeHandle) -> String {
        format!("App.Type{}", ty.raw() - 1000)
    }

    fn type_aqn(&self, ty: TypeHandle) -> String {
        format!("{}, App, Version=1.0.0.0", self.type_name(ty))
    }

    fn marshal_signature_info(&self, _ty: TypeHandle, method: MethodHandle) -> Option<String> {
        let method = self.method(method)?;
        let info = SignatureInfo {
            parameters: method.params.clone(),
            owner: TypeHandle::NULL,
        };
        serde_json::to_string(&info).ok()
    }

    fn invoke(&self, method: MethodHandle, receiver: Option<ObjectRef>, args: &ArgBuffer) -> NativeOutcome {
        *self.invocations.borrow_mut() += 1;
        let Some(method) = self.method(method) else {
            return NativeOutcome::threw(self.alloc(FakeObject::Exception("missing method".into())));
        };

        let decoded = Self::decode(&method.params, args);
        match (method.body)(self, receiver, &decoded) {
            Outcome::Return(obj) => NativeOutcome::returned(self.alloc(obj)),
            Outcome::Null => NativeOutcome::returned(ObjectRef::NULL),
            Outcome::Dangling => NativeOutcome::returned(ObjectRef(u32::MAX)),
            Outcome::Throw(message) => NativeOutcome::threw(self.alloc(FakeObject::Exception(message))),
        }
    }

    fn exception_message(&self, exception: ObjectRef) -> String {
        match self.object(exception) {
            Some(FakeObject::Exception(message)) => message,
            other => format!("{:?}", other),
        }
    }

    fn try_unbox_primitive(&self, value: ObjectRef, scratch: &mut [u8]) -> MarshalType {
        let Some(obj) = self.object(value) else {
            return MarshalType::Null;
        };
        match obj {
            FakeObject::Int(v) => {
                scratch[..4].copy_from_slice(&v.to_le_bytes());
                MarshalType::Int
            }
            FakeObject::UInt(v) => {
                scratch[..4].copy_from_slice(&v.to_le_bytes());
                MarshalType::UInt32
            }
            FakeObject::Long(v) => {
                scratch[..8].copy_from_slice(&v.to_le_bytes());
                MarshalType::Int64
            }
            FakeObject::Float(v) => {
                scratch[..4].copy_from_slice(&v.to_le_bytes());
                MarshalType::Fp32
            }
            FakeObject::Double(v) => {
                scratch[..8].copy_from_slice(&v.to_le_bytes());
                MarshalType::Fp64
            }
            FakeObject::Bool(v) => {
                scratch[..4].copy_from_slice(&(v as i32).to_le_bytes());
                MarshalType::Bool
            }
            FakeObject::Char(c) => {
                scratch[..4].copy_from_slice(&(c as u32).to_le_bytes());
                MarshalType::Char
            }
            FakeObject::Str(_) => MarshalType::String,
            FakeObject::Uri(_) => MarshalType::Uri,
            FakeObject::Host(_) | FakeObject::Exception(_) => MarshalType::Object,
        }
    }

    fn unbox_non_primitive(
        &self,
        root: &Root,
        marshal_type: MarshalType,
        _scratch: &mut [u8],
    ) -> interop_bindings::Result<HostValue> {
        match self.object(root.get()) {
            Some(FakeObject::Str(s)) | Some(FakeObject::Uri(s)) => Ok(HostValue::String(s)),
            Some(FakeObject::Host(value)) => Ok(value),
            Some(_) => Ok(HostValue::Handle(root.get())),
            None => Err(BindingError::Unbox {
                marshal_type,
                reason: "dangling result reference".into(),
            }),
        }
    }

    fn string_to_managed(&self, value: &str, _interned: bool) -> ObjectRef {
        self.alloc(FakeObject::Str(value.to_owned()))
    }

    fn host_to_managed_object(&self, value: &HostValue) -> ObjectRef {
        self.alloc(FakeObject::Host(value.clone()))
    }

    fn host_to_managed_uri(&self, value: &HostValue) -> ObjectRef {
        match value {
            HostValue::String(s) => self.alloc(FakeObject::Uri(s.clone())),
            other => self.alloc(FakeObject::Uri(format!("{:?}", other))),
        }
    }

    fn host_to_enum(&self, value: &HostValue, _method: MethodHandle, index: usize) -> interop_bindings::Result<i64> {
        to_i64(value).ok_or(BindingError::InvalidArgument {
            index,
            kind: 'j',
            found: value.kind_name(),
        })
    }
}

/// i32 argument at `index`, 0 when it is not an i32
pub fn arg_i32(args: &[Marshaled], index: usize) -> i32 {
    match args.get(index) {
        Some(Marshaled::I32(v)) => *v,
        _ => 0,
    }
}

pub fn arg_ref(args: &[Marshaled], index: usize) -> ObjectRef {
    match args.get(index) {
        Some(Marshaled::Ref(obj)) => *obj,
        _ => ObjectRef::NULL,
    }
}
