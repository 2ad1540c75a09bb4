use super::mock_test_prelude::*;

use crate::compiler_to_vm;
use crate::util::bytecodes;

fn object_constant(env: &JVMCIEnv<MockVM>, object: ObjectReference) -> JVMCIObject {
    env.get_object_constant(object, false, false).unwrap()
}

#[test]
pub fn bytecodes_are_reconstituted() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let [hi, lo] = 0x0102u16.to_ne_bytes();
            with_host(|host| {
                host.constant_pool_mut(method.constants).resolved_references = vec![5, 7];
                // fast_aldc 1; invokevirtual #0x0102 (native order); fast_aldc_w 0; return
                host.method_mut(method.method).bytecodes = vec![0xe6, 1, bytecodes::INVOKEVIRTUAL, hi, lo, 0xe7, 0, 0, 0xb1];
            });
            let env = fixture.env();
            let code = compiler_to_vm::get_bytecode(&env, method.mirror(&env)).unwrap();
            assert_eq!(
                env.read_byte_array(code).unwrap(),
                vec![bytecodes::LDC, 7, bytecodes::INVOKEVIRTUAL, 1, 2, bytecodes::LDC_W, 0, 5, 0xb1]
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn truncated_bytecodes_are_rejected() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            with_host(|host| host.method_mut(method.method).bytecodes = vec![0x04, bytecodes::INVOKEVIRTUAL, 0]);
            let env = fixture.env();
            let error = compiler_to_vm::get_bytecode(&env, method.mirror(&env)).unwrap_err();
            assert!(matches!(error, JVMCIError::Internal(_)));
        },
        no_cleanup,
    )
}

#[test]
pub fn method_tables() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let handler = ExceptionTableEntry {
                start_pc: 0,
                end_pc: 3,
                handler_pc: 3,
                catch_type_index: 0,
            };
            with_host(|host| host.method_mut(method.method).exception_table = vec![handler]);
            let env = fixture.env();
            let mirror = method.mirror(&env);

            let lines = compiler_to_vm::get_line_number_table(&env, mirror).unwrap().unwrap();
            let lines: Vec<i64> = (0..4).map(|i| env.get_long_at(lines, i).unwrap()).collect();
            assert_eq!(lines, vec![0, 10, 2, 11]);

            assert_eq!(compiler_to_vm::get_exception_table_length(&env, mirror).unwrap(), 1);
            assert_eq!(compiler_to_vm::get_exception_table(&env, mirror).unwrap(), vec![handler]);
            assert_eq!(compiler_to_vm::get_local_variable_table_length(&env, mirror).unwrap(), 0);

            // No line numbers, no table
            with_host(|host| host.method_mut(method.method).line_numbers.clear());
            assert_eq!(compiler_to_vm::get_line_number_table(&env, mirror).unwrap(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn constant_pool_references() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (method_ref, field_ref, string) = with_host(|host| {
                host.klass_mut(method.klass).fields.push(MockField {
                    name: "count".to_string(),
                    signature: "I".to_string(),
                    offset: 12,
                    flags: 2,
                });
                let method_ref = host.add_method_ref(method.constants, "test/Holder", "run", "(I)I");
                let field_ref = host.add_field_ref(method.constants, "test/Holder", "count", "I");
                let string = host
                    .constant_pool_mut(method.constants)
                    .add(CpEntry::String("hello".to_string()));
                (method_ref, field_ref, string)
            });
            let env = fixture.env();
            let cp = env.get_jvmci_constant_pool(method.constants).unwrap();

            let name = compiler_to_vm::lookup_name_in_pool(&env, cp, method_ref).unwrap();
            assert_eq!(env.as_utf8_string(name).unwrap(), "run");
            let signature = compiler_to_vm::lookup_signature_in_pool(&env, cp, method_ref).unwrap();
            assert_eq!(env.as_utf8_string(signature).unwrap(), "(I)I");
            // add_method_ref lays out Class, Utf8, Utf8, NameAndType, MethodRef
            assert_eq!(compiler_to_vm::lookup_klass_ref_index_in_pool(&env, cp, method_ref).unwrap(), method_ref - 4);
            assert_eq!(
                compiler_to_vm::lookup_name_and_type_ref_index_in_pool(&env, cp, method_ref).unwrap(),
                method_ref - 1
            );

            let holder = compiler_to_vm::resolve_type_in_pool(&env, cp, method_ref - 4).unwrap();
            assert_eq!(env.as_klass(holder).unwrap(), method.klass);
            let resolved = compiler_to_vm::lookup_method_in_pool(&env, cp, method_ref, bytecodes::INVOKEVIRTUAL)
                .unwrap()
                .unwrap();
            assert_eq!(env.as_method(resolved).unwrap(), method.method);

            let info = env.new_int_array(3).unwrap();
            let holder =
                compiler_to_vm::resolve_field_in_pool(&env, cp, field_ref, Some(method.mirror(&env)), bytecodes::GETFIELD, Some(info))
                    .unwrap();
            assert_eq!(env.as_klass(holder).unwrap(), method.klass);
            let info: Vec<i32> = (0..3).map(|i| env.get_int_at(info, i).unwrap()).collect();
            assert_eq!(info, vec![2, 12, 0]);

            let short_info = env.new_int_array(2).unwrap();
            let error = compiler_to_vm::resolve_field_in_pool(&env, cp, field_ref, None, bytecodes::GETFIELD, Some(short_info))
                .unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::JVMCIError));
            assert_eq!(error.message(), Some("info must not be null and have a length of 3"));

            let constant = compiler_to_vm::resolve_constant_in_pool(&env, cp, string).unwrap().unwrap();
            let object = env.as_constant(constant).unwrap();
            assert_eq!(with_host(|host| host.string_value(object)), "hello");
            // Resolved once
            let again = compiler_to_vm::resolve_constant_in_pool(&env, cp, string).unwrap().unwrap();
            assert!(compiler_to_vm::equals(&env, Some(constant), Some(again)).unwrap());

            assert_eq!(compiler_to_vm::lookup_appendix_in_pool(&env, cp, method_ref).unwrap(), None);
            compiler_to_vm::resolve_invoke_dynamic_in_pool(&env, cp, method_ref).unwrap();
            compiler_to_vm::resolve_invoke_handle_in_pool(&env, cp, method_ref).unwrap();
        },
        no_cleanup,
    )
}

#[test]
pub fn missing_field_is_reported() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let field_ref = with_host(|host| host.add_field_ref(method.constants, "test/Holder", "missing", "J"));
            let env = fixture.env();
            let cp = env.get_jvmci_constant_pool(method.constants).unwrap();
            let info = env.new_int_array(3).unwrap();
            let error = compiler_to_vm::resolve_field_in_pool(&env, cp, field_ref, None, bytecodes::GETFIELD, Some(info))
                .unwrap_err();
            assert_eq!(error.message(), Some("missing"));
            // The exception was taken off the thread
            assert_eq!(with_host(|host| host.thread(fixture.thread).pending_exception), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn type_lookup() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let lookup = |name: &str, resolve: bool| {
                let name = env.create_string(name).unwrap();
                compiler_to_vm::lookup_type(&env, name, None, resolve)
            };

            let found = lookup("Ltest/Holder;", false).unwrap().unwrap();
            assert_eq!(env.as_klass(found).unwrap(), method.klass);
            assert_eq!(lookup("Ltest/Missing;", false).unwrap(), None);
            assert_eq!(lookup("Ltest/Missing;", true).unwrap_err().message(), Some("test/Missing"));

            let error = lookup("I", true).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::InternalError));
            assert_eq!(error.message(), Some("Primitive type I should be handled in Java code"));
        },
        no_cleanup,
    )
}

#[test]
pub fn class_hierarchy_queries() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (sub, interface) = with_host(|host| {
                let sub = host.define_klass("test/Sub", Some("test/Holder"));
                let interface = host.define_interface("test/Runner");
                (sub, interface)
            });
            let env = fixture.env();
            let holder = env.get_jvmci_type(method.klass).unwrap();
            let mirror = method.mirror(&env);

            let unique = compiler_to_vm::find_unique_concrete_method(&env, holder, mirror).unwrap().unwrap();
            assert_eq!(env.as_method(unique).unwrap(), method.method);
            // An override makes it ambiguous
            with_host(|host| host.define_method(sub, "run", "(I)I"));
            assert_eq!(compiler_to_vm::find_unique_concrete_method(&env, holder, mirror).unwrap(), None);

            let runner = env.get_jvmci_type(interface).unwrap();
            let error = compiler_to_vm::find_unique_concrete_method(&env, runner, mirror).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::InternalError));
            assert_eq!(error.message(), Some("Interface test.Runner should be handled in Java code"));

            assert_eq!(compiler_to_vm::get_implementor(&env, runner).unwrap(), None);
            with_host(|host| host.klass_mut(interface).implementor = Some(sub));
            let implementor = compiler_to_vm::get_implementor(&env, runner).unwrap().unwrap();
            assert_eq!(env.as_klass(implementor).unwrap(), sub);
            let error = compiler_to_vm::get_implementor(&env, holder).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::IllegalArgumentException));
            assert_eq!(error.message(), Some("Expected interface type, got test.Holder"));

            assert!(!compiler_to_vm::has_finalizable_subclass(&env, holder).unwrap());
            with_host(|host| host.klass_mut(sub).has_finalizer = true);
            assert!(compiler_to_vm::has_finalizable_subclass(&env, holder).unwrap());

            assert!(compiler_to_vm::is_compilable(&env, mirror).unwrap());
            with_host(|host| host.method_mut(method.method).not_compilable = true);
            assert!(!compiler_to_vm::is_compilable(&env, mirror).unwrap());
        },
        no_cleanup,
    )
}

#[test]
pub fn compile_ids() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mirror = Some(method.mirror(&env));

            let first = compiler_to_vm::allocate_compile_id(&env, mirror, INVOCATION_ENTRY_BCI).unwrap();
            let second = compiler_to_vm::allocate_compile_id(&env, mirror, 2).unwrap();
            assert!(second > first);

            // The method has four bytes of code
            for bci in [4, -2] {
                let error = compiler_to_vm::allocate_compile_id(&env, mirror, bci).unwrap_err();
                assert_eq!(error.kind(), Some(ExceptionKind::IllegalArgumentException));
                assert_eq!(error.message(), Some(format!("Unexpected bci {}", bci).as_str()));
            }
            let error = compiler_to_vm::allocate_compile_id(&env, None, 0).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::NullPointerException));
        },
        no_cleanup,
    )
}

#[test]
pub fn object_constants() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let (a, b) = (new_host_object(), new_host_object());
            let constant = object_constant(&env, a);

            let hash = compiler_to_vm::get_identity_hash_code(&env, Some(constant)).unwrap();
            assert_eq!(hash, MockVM::identity_hash(a));
            assert!(compiler_to_vm::equals(&env, Some(constant), Some(object_constant(&env, a))).unwrap());
            assert!(!compiler_to_vm::equals(&env, Some(constant), Some(object_constant(&env, b))).unwrap());
            assert_eq!(
                compiler_to_vm::equals(&env, None, Some(constant)).unwrap_err().kind(),
                Some(ExceptionKind::NullPointerException)
            );

            // Boxing goes through the host heap and back
            let boxed = env.create_box(PrimitiveValue::Int(5)).unwrap();
            let host_box = compiler_to_vm::box_primitive(&env, Some(boxed)).unwrap();
            let unboxed = compiler_to_vm::unbox_primitive(&env, Some(host_box)).unwrap().unwrap();
            assert_eq!(env.get_boxed_value(unboxed).unwrap(), PrimitiveValue::Int(5));
            assert_eq!(compiler_to_vm::unbox_primitive(&env, Some(constant)).unwrap(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn array_constants() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let (ints, objects) = with_host(|host| {
                let int_klass = host.define_klass("[I", None);
                let object_klass = host.define_klass("[Ljava/lang/Object;", None);
                let ints = host.allocate_array(fixture.thread, int_klass, 3).unwrap();
                let objects = host.allocate_array(fixture.thread, object_klass, 2).unwrap();
                host.heap.array_set(object_id(ints), 1, Value::Primitive(PrimitiveValue::Int(9)));
                (ints, objects)
            });
            let element = new_host_object();
            MockVM::array_store(objects, 0, Value::Object(Some(element)));
            let (ints, objects) = (object_constant(&env, ints), object_constant(&env, objects));

            assert_eq!(compiler_to_vm::get_array_length(&env, Some(ints)).unwrap(), 3);
            let plain = object_constant(&env, new_host_object());
            assert_eq!(compiler_to_vm::get_array_length(&env, Some(plain)).unwrap(), -1);

            let value = compiler_to_vm::read_array_element(&env, Some(ints), 1).unwrap().unwrap();
            assert_eq!(env.get_boxed_value(value).unwrap(), PrimitiveValue::Int(9));
            for index in [-1, 3] {
                assert_eq!(compiler_to_vm::read_array_element(&env, Some(ints), index).unwrap(), None);
            }
            assert_eq!(compiler_to_vm::read_array_element(&env, Some(plain), 0).unwrap(), None);

            let first = compiler_to_vm::read_array_element(&env, Some(objects), 0).unwrap().unwrap();
            assert_eq!(env.as_constant(first).unwrap(), element);
            let null = compiler_to_vm::read_array_element(&env, Some(objects), 1).unwrap();
            let null_pointer = env.get_field(JVMCIField::JavaConstantNullPointer, None).unwrap().as_object().flatten();
            assert!(null.is_some());
            assert_eq!(null, null_pointer);
        },
        no_cleanup,
    )
}

/// `run` interpreted, then `other` with `run` inlined into one compiled frame.
fn push_frames(fixture: &JVMCIFixture, method: &MethodFixture) -> (MethodRef, [ObjectReference; 3]) {
    let objects = [new_host_object(), new_host_object(), new_host_object()];
    let other = with_host(|host| {
        let other = host.define_method(method.klass, "other", "()V");
        host.thread(fixture.thread).frames = vec![
            FrameInfo {
                frame_id: 10,
                method: method.method,
                bci: 1,
                is_compiled: false,
                locals: vec![Value::Object(Some(objects[0])), Value::Primitive(PrimitiveValue::Int(3))],
                virtual_locals: vec![],
            },
            FrameInfo {
                frame_id: 20,
                method: other,
                bci: 2,
                is_compiled: true,
                locals: vec![Value::Object(None), Value::Object(Some(objects[1]))],
                virtual_locals: vec![0],
            },
            FrameInfo {
                frame_id: 20,
                method: method.method,
                bci: 5,
                is_compiled: true,
                locals: vec![Value::Object(Some(objects[2]))],
                virtual_locals: vec![],
            },
        ];
        other
    });
    (other, objects)
}

#[test]
pub fn frame_iteration() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (_, objects) = push_frames(&fixture, &method);
            let env = fixture.env();
            let run = [method.mirror(&env)];

            let mut visited = vec![];
            let result: Option<()> = compiler_to_vm::iterate_frames(&env, None, Some(&run), 0, |frame| {
                let method = env.get_object_field(JVMCIField::HotSpotStackFrameReferenceMethod, frame)?.unwrap();
                visited.push((
                    env.as_method(method)?,
                    env.get_int_field(JVMCIField::HotSpotStackFrameReferenceBci, frame)?,
                    env.get_int_field(JVMCIField::HotSpotStackFrameReferenceFrameNumber, frame)?,
                ));
                Ok(None)
            })
            .unwrap();
            assert_eq!(result, None);
            // Everything matches first, then only `run`
            assert_eq!(visited, vec![(method.method, 1, 0), (method.method, 5, 1)]);

            // Skipping the first match finds the inlined frame
            let bci = compiler_to_vm::iterate_frames(&env, Some(&run), None, 1, |frame| {
                env.get_int_field(JVMCIField::HotSpotStackFrameReferenceBci, frame).map(Some)
            })
            .unwrap();
            assert_eq!(bci, Some(5));

            let locals = compiler_to_vm::iterate_frames(&env, None, None, 0, |frame| {
                let locals = env.get_object_field(JVMCIField::HotSpotStackFrameReferenceLocals, frame)?.unwrap();
                let locals = JVMCIObjectArray(locals);
                let values = (0..env.get_array_length(locals.0)?)
                    .map(|i| Ok(env.get_object_at(locals, i)?.and_then(|o| o.as_host())))
                    .collect::<JVMCIResult<Vec<_>>>()?;
                Ok(Some(values))
            })
            .unwrap();
            // Primitive locals are not visible
            assert_eq!(locals, Some(vec![Some(objects[0]), None]));
        },
        no_cleanup,
    )
}

#[test]
pub fn virtual_objects_are_materialized() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (other, objects) = push_frames(&fixture, &method);
            let env = fixture.env();
            let other = [env.get_jvmci_method(other).unwrap()];

            let frame = compiler_to_vm::iterate_frames(&env, Some(&other), None, 0, |frame| Ok(Some(frame)))
                .unwrap()
                .unwrap();
            let is_virtual = env
                .get_object_field(JVMCIField::HotSpotStackFrameReferenceLocalIsVirtual, frame)
                .unwrap()
                .map(JVMCIPrimitiveArray)
                .unwrap();
            assert!(env.get_bool_at(is_virtual, 0).unwrap());
            assert!(!env.get_bool_at(is_virtual, 1).unwrap());

            compiler_to_vm::materialize_virtual_objects(&env, Some(frame), true).unwrap();
            assert_eq!(with_host(|host| host.thread(fixture.thread).materialized.clone()), vec![(20, true)]);
            assert!(env
                .get_bool_field(JVMCIField::HotSpotStackFrameReferenceObjectsMaterialized, frame)
                .unwrap());
            assert_eq!(
                env.get_object_field(JVMCIField::HotSpotStackFrameReferenceLocalIsVirtual, frame).unwrap(),
                None
            );
            let locals = JVMCIObjectArray(
                env.get_object_field(JVMCIField::HotSpotStackFrameReferenceLocals, frame)
                    .unwrap()
                    .unwrap(),
            );
            let reallocated = env.get_object_at(locals, 0).unwrap().and_then(|o| o.as_host()).unwrap();
            assert!(!objects.contains(&reallocated));
            assert_eq!(env.get_object_at(locals, 1).unwrap().and_then(|o| o.as_host()), Some(objects[1]));

            // Interpreted frames have nothing to materialize
            let interpreted = compiler_to_vm::iterate_frames(&env, None, None, 0, |frame| Ok(Some(frame)))
                .unwrap()
                .unwrap();
            let error = compiler_to_vm::materialize_virtual_objects(&env, Some(interpreted), false).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::IllegalStateException));
            assert_eq!(error.message(), Some("compiled stack frame expected"));
            assert_eq!(
                compiler_to_vm::materialize_virtual_objects(&env, None, false).unwrap_err().kind(),
                Some(ExceptionKind::NullPointerException)
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn debug_output() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let bytes = env.new_byte_array_from(b"hello world").unwrap();
            compiler_to_vm::write_debug_output(&env, Some(bytes), 6, 5).unwrap();
            compiler_to_vm::write_debug_output(&env, Some(bytes), 0, 0).unwrap();
            compiler_to_vm::flush_debug_output(&env);
            assert_eq!(fixture.output.contents(), "world");

            for (offset, length) in [(6, 6), (-1, 2), (0, -1)] {
                let error = compiler_to_vm::write_debug_output(&env, Some(bytes), offset, length).unwrap_err();
                assert_eq!(error.kind(), Some(ExceptionKind::ArrayIndexOutOfBoundsException));
                assert_eq!(error.message(), Some(format!("{}+{}", offset, length).as_str()));
            }
            assert_eq!(
                compiler_to_vm::write_debug_output(&env, None, 0, 0).unwrap_err().kind(),
                Some(ExceptionKind::NullPointerException)
            );
            assert_eq!(fixture.output.contents(), "world");
        },
        no_cleanup,
    )
}

#[test]
pub fn native_methods_need_the_shared_library() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mirror = with_host(|host| host.klass_mirror(method.klass));
            let error = compiler_to_vm::register_native_methods(&env, Some(JVMCIObject::from_host(mirror))).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::UnsatisfiedLinkError));
            assert_eq!(
                error.message(),
                Some("JVMCI shared library is not enabled (requires UseJVMCINativeLibrary)")
            );
        },
        no_cleanup,
    )
}
