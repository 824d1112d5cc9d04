//! End-to-end binding and dispatch against the in-memory engine

mod common;

use common::*;
use interop_bindings::interop::{Dispatcher, Marshaled, MarshalType, ParameterInfo};
use interop_bindings::{
    Binder, BindingConfig, BindingError, CustomMarshaler, HostValue, ManagedRuntime, ObjectRef,
    RootRegistry,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn setup() -> (Arc<FakeRuntime>, Arc<RootRegistry>, Binder) {
    let runtime = Arc::new(FakeRuntime::new());
    let roots = RootRegistry::new();
    let binder = Binder::with_roots(runtime.clone(), Arc::clone(&roots));
    (runtime, roots, binder)
}

fn define_add(runtime: &FakeRuntime) -> interop_bindings::MethodHandle {
    runtime.define(APP_CLASS, "Add", &[MarshalType::Int, MarshalType::Int], |_, _, args| {
        Outcome::Return(FakeObject::Int(arg_i32(args, 0) + arg_i32(args, 1)))
    })
}

#[test]
fn test_add_two_ints() {
    let (runtime, roots, binder) = setup();
    let add = define_add(&runtime);

    let dispatcher = binder.bind(add, None, "ii", Some("Math.Add")).unwrap();
    let result = dispatcher.call(&[HostValue::Int32(3), HostValue::Int32(4)]).unwrap();

    assert_eq!(result, HostValue::Int32(7));
    assert_eq!(dispatcher.display_name(), "Math_Add");
    assert_eq!(roots.live_references(), 0);
}

#[test]
fn test_repeat_calls_reuse_scratch() {
    let (runtime, _roots, binder) = setup();
    let add = define_add(&runtime);
    let dispatcher = binder.bind(add, None, "ii", None).unwrap();

    for i in 0..10 {
        let result = dispatcher.call(&[HostValue::Int32(i), HostValue::Int32(1)]).unwrap();
        assert_eq!(result, HostValue::Int32(i + 1));
    }
    assert_eq!(dispatcher.token().idle_scratch(), 1);
    assert_eq!(dispatcher.token().active_leases(), 0);
    assert_eq!(*runtime.invocations.borrow(), 10);
}

#[test]
fn test_suppressed_result_returns_raw_handle() {
    let (runtime, roots, binder) = setup();
    let roots_in_call = Arc::clone(&roots);
    let greet = runtime.define(APP_CLASS, "Greet", &[MarshalType::String], move |rt, _, args| {
        let name = arg_ref(args, 0);
        // The argument string is rooted for the duration of the call
        assert!(roots_in_call.is_rooted(name));
        let name = rt.string(name).unwrap_or_default();
        Outcome::Return(FakeObject::Str(format!("hello {}", name)))
    });

    let dispatcher = binder.bind(greet, None, "s!", None).unwrap();
    let result = dispatcher.call(&["world".into()]).unwrap();

    let HostValue::Handle(raw) = result else {
        panic!("expected a raw handle, got {:?}", result);
    };
    assert_eq!(runtime.string(raw).as_deref(), Some("hello world"));
    assert_eq!(roots.live_references(), 0);

    // Same method marshaled decodes the string
    let marshaled = binder.bind(greet, None, "s", None).unwrap();
    assert_eq!(
        marshaled.call(&["there".into()]).unwrap(),
        HostValue::from("hello there")
    );
}

#[test]
fn test_automatic_without_method_fails() {
    let (_runtime, _roots, binder) = setup();
    let err = binder.compile("aa", None).unwrap_err();
    assert!(matches!(err, BindingError::MissingMethodForAutoConversion { .. }));
    assert!(err.is_bind_time());
}

#[test]
fn test_automatic_binding_resolves_per_method() {
    let (runtime, _roots, binder) = setup();
    let scale = runtime.define(APP_CLASS, "Scale", &[MarshalType::String, MarshalType::Fp64], |rt, _, args| {
        let label = rt.string(arg_ref(args, 0)).unwrap_or_default();
        match args.get(1) {
            Some(Marshaled::F64(v)) => Outcome::Return(FakeObject::Str(format!("{}={}", label, v * 2.0))),
            _ => Outcome::Throw("bad factor".into()),
        }
    });
    let count = runtime.define(APP_CLASS, "Count", &[MarshalType::Int, MarshalType::Int64], |_, _, args| {
        match args.get(1) {
            Some(Marshaled::I64(v)) => Outcome::Return(FakeObject::Long(i64::from(arg_i32(args, 0)) + v)),
            _ => Outcome::Throw("bad count".into()),
        }
    });

    let scale_call = binder.bind(scale, None, "aa", None).unwrap();
    assert_eq!(
        scale_call.call(&["x".into(), HostValue::Float64(1.5)]).unwrap(),
        HostValue::from("x=3")
    );

    let count_call = binder.bind(count, None, "aa", None).unwrap();
    assert_eq!(
        count_call.call(&[HostValue::Int32(2), HostValue::Int64(40)]).unwrap(),
        HostValue::Int64(42)
    );

    let scale_converter = scale_call.converter().unwrap();
    let count_converter = count_call.converter().unwrap();
    assert!(!Arc::ptr_eq(scale_converter, count_converter));
    assert_eq!(scale_converter.steps()[0].kind, 's');
    assert_eq!(count_converter.steps()[1].kind, 'l');

    // Compiling through the binder finds the per-method entries
    let again = binder.compile("aa", Some(scale)).unwrap();
    assert!(Arc::ptr_eq(scale_converter, &again));
}

#[test]
fn test_native_exception_surfaces_and_releases_roots() {
    let (runtime, roots, binder) = setup();
    let roots_in_call = Arc::clone(&roots);
    let fail = runtime.define(APP_CLASS, "Fail", &[MarshalType::String, MarshalType::Object], move |_, _, args| {
        assert!(roots_in_call.is_rooted(arg_ref(args, 0)));
        assert!(roots_in_call.is_rooted(arg_ref(args, 1)));
        Outcome::Throw("boom".into())
    });

    let dispatcher = binder.bind(fail, None, "so", Some("Fail")).unwrap();
    let err = dispatcher
        .call(&["payload".into(), HostValue::Bool(true)])
        .unwrap_err();

    match &err {
        BindingError::NativeInvocationFault {
            method_name,
            exception,
            message,
        } => {
            assert_eq!(method_name, "Fail");
            assert_eq!(message, "boom");
            assert_eq!(runtime.object(*exception), Some(FakeObject::Exception("boom".into())));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_bind_time());
    assert_eq!(roots.live_references(), 0);
    assert_eq!(dispatcher.token().active_leases(), 0);
    assert_eq!(dispatcher.token().idle_scratch(), 1);

    // The binding stays usable after a fault
    assert!(dispatcher.call(&["again".into(), HostValue::Int32(1)]).is_err());
    assert_eq!(roots.live_references(), 0);
}

#[test]
fn test_arity_mismatch_holds_no_roots() {
    let (runtime, roots, binder) = setup();
    let add = define_add(&runtime);
    let dispatcher = binder.bind(add, None, "ii", None).unwrap();

    let err = dispatcher.call(&[HostValue::Int32(1)]).unwrap_err();
    assert_eq!(
        err,
        BindingError::ArityMismatch {
            signature: "ii".into(),
            expected: 2,
            actual: 1
        }
    );
    assert_eq!(*runtime.invocations.borrow(), 0);
    assert_eq!(roots.live_references(), 0);
    assert_eq!(dispatcher.token().active_leases(), 0);
}

#[test]
fn test_invalid_argument_releases_lease() {
    let (runtime, roots, binder) = setup();
    let concat = runtime.define(APP_CLASS, "Concat", &[MarshalType::String, MarshalType::Int], |_, _, _| {
        Outcome::Null
    });
    let dispatcher = binder.bind(concat, None, "si", None).unwrap();

    let err = dispatcher
        .call(&["kept".into(), HostValue::Object(interop_bindings::interop::HostObjectId(3))])
        .unwrap_err();
    assert!(matches!(err, BindingError::InvalidArgument { index: 1, kind: 'i', .. }));
    assert_eq!(roots.live_references(), 0);
    assert_eq!(dispatcher.token().active_leases(), 0);
    assert_eq!(*runtime.invocations.borrow(), 0);
}

#[test]
fn test_unbox_failure_releases_roots() {
    let (runtime, roots, binder) = setup();
    let lost = runtime.define(APP_CLASS, "Lost", &[MarshalType::String], |_, _, _| Outcome::Dangling);
    let dispatcher = binder.bind(lost, None, "s", None).unwrap();

    let err = dispatcher.call(&[HostValue::from("key")]).unwrap_err();
    assert!(matches!(err, BindingError::Unbox { .. }));
    assert_eq!(roots.live_references(), 0);
    assert_eq!(dispatcher.token().active_leases(), 0);
    assert_eq!(dispatcher.token().idle_scratch(), 1);

    // The raw form never unboxes
    let raw = binder.bind(lost, None, "s!", None).unwrap();
    assert_eq!(raw.call(&[HostValue::from("key")]), Ok(HostValue::Handle(ObjectRef(u32::MAX))));
    assert_eq!(roots.live_references(), 0);
}

#[test]
fn test_null_result_is_undefined() {
    let (runtime, _roots, binder) = setup();
    let nothing = runtime.define(APP_CLASS, "Nothing", &[], |_, _, _| Outcome::Null);
    let dispatcher = binder.bind(nothing, None, "", None).unwrap();
    assert_eq!(dispatcher.call(&[]).unwrap(), HostValue::Undefined);
}

#[test]
fn test_static_bindings_are_cached() {
    let (runtime, _roots, binder) = setup();
    let add = define_add(&runtime);
    let sub = runtime.define(APP_CLASS, "Sub", &[MarshalType::Int, MarshalType::Int], |_, _, args| {
        Outcome::Return(FakeObject::Int(arg_i32(args, 0) - arg_i32(args, 1)))
    });

    let first = binder.bind(add, None, "ii", None).unwrap();
    let second = binder.bind(add, None, "ii", Some("ignored")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(binder.bound_count(), 1);

    // A different signature is a different dispatcher
    let raw = binder.bind(add, None, "ii!", None).unwrap();
    assert!(!Arc::ptr_eq(&first, &raw));

    // Methods sharing a signature share its converter
    let other = binder.bind(sub, None, "ii", None).unwrap();
    assert!(Arc::ptr_eq(first.converter().unwrap(), other.converter().unwrap()));
    assert_eq!(other.call(&[HostValue::Int32(9), HostValue::Int32(4)]).unwrap(), HostValue::Int32(5));
}

#[test]
fn test_static_cache_can_be_disabled() {
    let runtime = Arc::new(FakeRuntime::new());
    let config = BindingConfig {
        cache_static_bindings: false,
        ..BindingConfig::default()
    };
    let binder = Binder::with_config(runtime.clone(), RootRegistry::new(), config);
    let add = define_add(&runtime);

    let first = binder.bind(add, None, "ii", None).unwrap();
    let second = binder.bind(add, None, "ii", None).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(binder.bound_count(), 0);
}

#[test]
fn test_undersized_config_is_clamped() {
    let runtime = Arc::new(FakeRuntime::new());
    let config = BindingConfig {
        unbox_scratch_size: 2,
        scratch_pool_limit: 0,
        ..BindingConfig::default()
    };
    let binder = Binder::with_config(runtime.clone(), RootRegistry::new(), config);
    assert_eq!(binder.config().unbox_scratch_size, 8);
    assert_eq!(binder.config().scratch_pool_limit, 1);

    let add = define_add(&runtime);
    let dispatcher = binder.bind(add, None, "ii", None).unwrap();
    let result = dispatcher.call(&[HostValue::Int32(20), HostValue::Int32(22)]).unwrap();
    assert_eq!(result, HostValue::Int32(42));
}

#[test]
fn test_receiver_bindings_are_never_cached() {
    let (runtime, roots, binder) = setup();
    let offset = runtime.define(APP_CLASS, "Offset", &[MarshalType::Int], |rt, receiver, args| {
        match receiver.and_then(|r| rt.object(r)) {
            Some(FakeObject::Int(base)) => Outcome::Return(FakeObject::Int(base + arg_i32(args, 0))),
            _ => Outcome::Throw("no receiver".into()),
        }
    });

    let ten = runtime.alloc(FakeObject::Int(10));
    let twenty = runtime.alloc(FakeObject::Int(20));

    let on_ten = binder.bind(offset, Some(ten), "i", Some("Offset")).unwrap();
    let on_twenty = binder.bind(offset, Some(twenty), "i", Some("Offset")).unwrap();

    assert_eq!(on_ten.call(&[HostValue::Int32(1)]).unwrap(), HostValue::Int32(11));
    assert_eq!(on_twenty.call(&[HostValue::Int32(1)]).unwrap(), HostValue::Int32(21));
    assert_eq!(on_ten.call(&[HostValue::Int32(2)]).unwrap(), HostValue::Int32(12));

    assert!(!Arc::ptr_eq(&on_ten, &on_twenty));
    assert_eq!(binder.bound_count(), 0);
    assert_eq!(on_ten.display_name(), format!("Offset_this{}", ten));

    // Receivers stay alive exactly as long as their dispatcher
    assert!(roots.is_rooted(ten));
    drop(on_ten);
    assert!(!roots.is_rooted(ten));
    assert!(roots.is_rooted(twenty));
}

#[test]
fn test_reentrant_call_gets_fresh_scratch() {
    let (runtime, roots, binder) = setup();
    let slot: Rc<RefCell<Option<Arc<Dispatcher>>>> = Rc::new(RefCell::new(None));
    let slot_in_call = Rc::clone(&slot);
    let roots_in_call = Arc::clone(&roots);

    let countdown = runtime.define(APP_CLASS, "Countdown", &[MarshalType::Int, MarshalType::String], move |_, _, args| {
        let n = arg_i32(args, 0);
        let tag = arg_ref(args, 1);
        if n == 0 {
            return Outcome::Return(FakeObject::Int(0));
        }

        let dispatcher = slot_in_call.borrow().clone();
        let Some(dispatcher) = dispatcher else {
            return Outcome::Throw("unbound".into());
        };
        let inner = dispatcher.call(&[HostValue::Int32(n - 1), HostValue::from(format!("level{}", n - 1))]);

        // The inner call must not have released this call's argument roots
        assert!(roots_in_call.is_rooted(tag));
        match inner {
            Ok(HostValue::Int32(v)) => Outcome::Return(FakeObject::Int(v + n)),
            other => Outcome::Throw(format!("inner call failed: {:?}", other)),
        }
    });

    let dispatcher = binder.bind(countdown, None, "is", None).unwrap();
    *slot.borrow_mut() = Some(Arc::clone(&dispatcher));

    let result = dispatcher.call(&[HostValue::Int32(3), "level3".into()]).unwrap();
    assert_eq!(result, HostValue::Int32(6));

    let token = dispatcher.token();
    assert_eq!(token.active_leases(), 0);
    assert_eq!(token.idle_scratch(), 4);
    assert_eq!(roots.live_references(), 0);

    // Break the dispatcher <-> runtime cycle
    slot.borrow_mut().take();
}

#[test]
fn test_legacy_trailing_m() {
    let (runtime, _roots, binder) = setup();
    let wrap = runtime.define(APP_CLASS, "Wrap", &[MarshalType::Int, MarshalType::Object], |_, _, args| {
        Outcome::Return(FakeObject::Int(arg_i32(args, 0) * 10))
    });

    let dispatcher = binder.bind(wrap, None, "im", None).unwrap();
    let converter = dispatcher.converter().unwrap();
    assert_eq!(converter.result_unmarshaled_if_argc(), Some(1));

    // One argument: raw result, notice emitted once
    let raw = dispatcher.call(&[HostValue::Int32(4)]).unwrap();
    let HostValue::Handle(handle) = raw else {
        panic!("expected raw handle, got {:?}", raw);
    };
    assert_eq!(runtime.object(handle), Some(FakeObject::Int(40)));
    assert!(converter.legacy_notice_emitted());
    assert!(!converter.maybe_warn_legacy_signature());

    // Two arguments: marshaled result
    let marshaled = dispatcher.call(&[HostValue::Int32(4), HostValue::Null]).unwrap();
    assert_eq!(marshaled, HostValue::Int32(40));

    assert!(matches!(
        dispatcher.call(&[]),
        Err(BindingError::ArityMismatch { expected: 1, actual: 0, .. })
    ));
}

#[test]
fn test_enum_and_uri_transforms() {
    let (runtime, _roots, binder) = setup();
    let open = runtime.define(APP_CLASS, "Open", &[MarshalType::Uri, MarshalType::Enum], |rt, _, args| {
        match rt.object(arg_ref(args, 0)) {
            Some(FakeObject::Uri(uri)) => Outcome::Return(FakeObject::Str(format!("{}#{}", uri, arg_i32(args, 1)))),
            _ => Outcome::Throw("not a uri".into()),
        }
    });

    let dispatcher = binder.bind(open, None, "uj", None).unwrap();
    let result = dispatcher
        .call(&["https://example.org".into(), HostValue::Int32(2)])
        .unwrap();
    assert_eq!(result, HostValue::from("https://example.org#2"));
}

struct TagMarshaler;

impl CustomMarshaler for TagMarshaler {
    fn name(&self) -> &str {
        "tag"
    }

    fn to_managed(&self, value: &HostValue, runtime: &dyn ManagedRuntime) -> interop_bindings::Result<ObjectRef> {
        match value {
            HostValue::String(s) => Ok(runtime.string_to_managed(&format!("<{}>", s), false)),
            other => Err(BindingError::InvalidArgument {
                index: 0,
                kind: 'o',
                found: other.kind_name(),
            }),
        }
    }
}

#[test]
fn test_custom_marshaler_through_automatic_step() {
    let (runtime, roots, binder) = setup();
    binder.register_marshaler("App.Tag", Arc::new(TagMarshaler));

    let show = runtime.define_with_info(
        APP_CLASS,
        "Show",
        vec![ParameterInfo::new(MarshalType::ValueType).with_type_name("App.Tag")],
        |rt, _, args| Outcome::Return(FakeObject::Str(rt.string(arg_ref(args, 0)).unwrap_or_default())),
    );

    let dispatcher = binder.bind(show, None, "a", None).unwrap();
    assert_eq!(dispatcher.call(&["b".into()]).unwrap(), HostValue::from("<b>"));
    assert_eq!(roots.live_references(), 0);
}

#[test]
fn test_runtime_method_lookup() {
    let (runtime, _roots, binder) = setup();
    let echo = runtime.define(RUNTIME_CLASS, "Echo", &[MarshalType::Int], |_, _, args| {
        Outcome::Return(FakeObject::Int(arg_i32(args, 0)))
    });

    assert_eq!(binder.runtime_method("Echo").unwrap(), echo);
    assert_eq!(binder.method_description(echo).as_deref(), Some("Echo"));

    let dispatcher = binder.bind_runtime_method("Echo", "i").unwrap();
    assert_eq!(dispatcher.display_name(), "BINDINGS_Echo");
    assert_eq!(dispatcher.call(&[HostValue::Int32(5)]).unwrap(), HostValue::Int32(5));

    assert_eq!(
        binder.runtime_method("Missing").unwrap_err(),
        BindingError::MethodNotFound {
            name: "Missing".into()
        }
    );
}

#[test]
fn test_found_method_names_dispatcher() {
    let (runtime, _roots, binder) = setup();
    let add = define_add(&runtime);
    assert_eq!(binder.find_method(APP_CLASS, "Add", 2), Some(add));
    assert_eq!(binder.find_method(APP_CLASS, "Add", 3), None);

    let dispatcher = binder.bind(add, None, "ii", None).unwrap();
    assert_eq!(dispatcher.display_name(), "Add");
}

#[test]
fn test_type_names() {
    let (_runtime, _roots, binder) = setup();
    assert_eq!(binder.class_name(APP_CLASS), "App.Type1");
    assert_eq!(binder.type_aqn(interop_bindings::interop::TypeHandle(1001)), "App.Type1, App, Version=1.0.0.0");
    assert_eq!(binder.type_name(interop_bindings::interop::TypeHandle::NULL), "<null>");
    assert_eq!(binder.class_name(interop_bindings::interop::ClassHandle::NULL), "<null>");
}

#[test]
fn test_unresolved_class() {
    let (_runtime, _roots, binder) = setup();
    let err = binder
        .bind(interop_bindings::MethodHandle(404), None, "i", None)
        .unwrap_err();
    assert!(matches!(err, BindingError::UnresolvedClass { .. }));
}

#[test]
fn test_bad_signature_fails_at_bind_time() {
    let (runtime, _roots, binder) = setup();
    let add = define_add(&runtime);
    assert!(matches!(
        binder.bind(add, None, "i!i", None),
        Err(BindingError::MalformedSignature { position: 1, .. })
    ));
    assert!(matches!(
        binder.bind(add, None, "ix", None),
        Err(BindingError::UnknownParameterKind { kind: 'x', .. })
    ));
    assert_eq!(binder.bound_count(), 0);
}
