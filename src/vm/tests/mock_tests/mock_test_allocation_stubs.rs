use super::mock_test_prelude::*;

use crate::runtime::stubs;

fn result(thread: VMThread) -> Option<ObjectReference> {
    with_host(|host| host.thread(thread).vm_result)
}

fn pending(thread: VMThread) -> Option<(String, Option<String>)> {
    with_host(|host| host.pending_exception_description(thread))
}

fn class_of(object: ObjectReference) -> String {
    with_host(|host| host.object(object).class.clone())
}

#[test]
pub fn new_instance_initializes_the_class() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let klass = with_host(|host| host.define_klass("test/Point", None));
            stubs::new_instance(&fixture.jvmci, fixture.thread, klass);
            assert_eq!(pending(fixture.thread), None);
            let object = result(fixture.thread).unwrap();
            assert_eq!(class_of(object), "test/Point");
            assert!(with_host(|host| host.klass(klass).initialized));
        },
        no_cleanup,
    )
}

#[test]
pub fn new_instance_or_null_does_not_initialize() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let klass = with_host(|host| host.define_klass("test/Point", None));
            stubs::new_instance_or_null(&fixture.jvmci, fixture.thread, klass);
            assert_eq!(result(fixture.thread), None);
            assert_eq!(pending(fixture.thread), None);
            assert!(!with_host(|host| host.klass(klass).initialized));

            with_host(|host| host.klass_mut(klass).initialized = true);
            stubs::new_instance_or_null(&fixture.jvmci, fixture.thread, klass);
            assert!(result(fixture.thread).is_some());
            assert!(!with_host(|host| host.thread(fixture.thread).in_retryable_allocation));
        },
        no_cleanup,
    )
}

#[test]
pub fn abstract_classes_are_not_instantiated() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let klass = with_host(|host| {
                let klass = host.define_klass("test/Shape", None);
                host.klass_mut(klass).is_abstract = true;
                klass
            });
            stubs::new_instance(&fixture.jvmci, fixture.thread, klass);
            assert_eq!(result(fixture.thread), None);
            assert_eq!(
                pending(fixture.thread),
                Some(("java/lang/InstantiationException".to_string(), Some("test.Shape".to_string())))
            );

            // The retryable variant swallows the exception
            with_host(|host| host.thread(fixture.thread).pending_exception = None);
            stubs::new_instance_or_null(&fixture.jvmci, fixture.thread, klass);
            assert_eq!(pending(fixture.thread), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn out_of_memory() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let array_klass = with_host(|host| {
                host.allocation_budget = Some(0);
                host.define_klass("[I", None)
            });

            stubs::new_array_or_null(&fixture.jvmci, fixture.thread, array_klass, 10);
            assert_eq!(result(fixture.thread), None);
            assert_eq!(pending(fixture.thread), None);

            stubs::new_array(&fixture.jvmci, fixture.thread, array_klass, 10);
            assert_eq!(result(fixture.thread), None);
            assert_eq!(
                pending(fixture.thread),
                Some(("java/lang/OutOfMemoryError".to_string(), Some("Java heap space".to_string())))
            );
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "Unexpected exception in scope of retryable allocation")]
pub fn ordinary_out_of_memory_in_retryable_allocation_is_fatal() {
    with_mockvm(
        || MockVM {
            allocate_instance: MockMethod::new_fixed(Box::new(|(thread, _)| {
                with_host(|host| Err(host.throw(thread, "java/lang/OutOfMemoryError", Some("Java heap space"))))
            })),
            ..MockVM::default()
        },
        || {
            let fixture = JVMCIFixture::create();
            let klass = with_host(|host| {
                let klass = host.define_klass("test/Point", None);
                host.klass_mut(klass).initialized = true;
                klass
            });
            stubs::new_instance_or_null(&fixture.jvmci, fixture.thread, klass);
        },
        no_cleanup,
    )
}

#[test]
pub fn arrays() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let (ints, matrix) = with_host(|host| (host.define_klass("[I", None), host.define_klass("[[I", None)));

            stubs::new_array(&fixture.jvmci, fixture.thread, ints, 4);
            let array = result(fixture.thread).unwrap();
            assert_eq!(class_of(array), "[I");
            assert_eq!(with_host(|host| host.heap.array_length(object_id(array))), 4);

            stubs::new_array(&fixture.jvmci, fixture.thread, ints, -1);
            assert_eq!(
                pending(fixture.thread),
                Some(("java/lang/NegativeArraySizeException".to_string(), Some("-1".to_string())))
            );
            with_host(|host| host.thread(fixture.thread).pending_exception = None);

            stubs::new_multi_array::<MockVM>(fixture.thread, matrix, &[2, 3]);
            let outer = result(fixture.thread).unwrap();
            assert_eq!(class_of(outer), "[[I");
            with_host(|host| {
                assert_eq!(host.heap.array_length(object_id(outer)), 2);
                let inner = host.heap.array_get(object_id(outer), 1).as_object().flatten().unwrap();
                assert_eq!(host.heap.array_length(inner), 3);
            });

            stubs::new_multi_array_or_null::<MockVM>(fixture.thread, matrix, &[-1, 3]);
            assert_eq!(result(fixture.thread), None);
            assert_eq!(pending(fixture.thread), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn reflective_allocation() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let int_mirror = with_host(|host| host.primitive_mirror(BasicType::Int));
            stubs::dynamic_new_array::<MockVM>(fixture.thread, int_mirror, 2);
            assert_eq!(class_of(result(fixture.thread).unwrap()), "[I");

            let void_mirror = with_host(|host| host.primitive_mirror(BasicType::Void));
            stubs::dynamic_new_array::<MockVM>(fixture.thread, void_mirror, 2);
            assert_eq!(
                pending(fixture.thread).map(|(class, _)| class).as_deref(),
                Some("java/lang/IllegalArgumentException")
            );
            with_host(|host| host.thread(fixture.thread).pending_exception = None);

            let point = with_host(|host| {
                let klass = host.define_klass("test/Point", None);
                host.klass_mirror(klass)
            });
            stubs::dynamic_new_instance::<MockVM>(fixture.thread, Some(point));
            assert_eq!(class_of(result(fixture.thread).unwrap()), "test/Point");

            // Neither a missing mirror nor a primitive one can be instantiated
            for mirror in [None, Some(int_mirror)] {
                stubs::dynamic_new_instance::<MockVM>(fixture.thread, mirror);
                assert_eq!(
                    pending(fixture.thread).map(|(class, _)| class).as_deref(),
                    Some("java/lang/InstantiationException")
                );
                with_host(|host| host.thread(fixture.thread).pending_exception = None);
            }
        },
        no_cleanup,
    )
}

#[test]
pub fn deoptimize_a_lot_alternates() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create_with_builder(|builder| {
                assert!(builder.set_option("DeoptimizeALot", "true"));
            });
            let ints = with_host(|host| host.define_klass("[I", None));
            let mut deopts = vec![];
            for _ in 0..4 {
                stubs::new_array(&fixture.jvmci, fixture.thread, ints, 1);
                assert!(result(fixture.thread).is_some());
                with_host(|host| {
                    let state = host.thread(fixture.thread);
                    deopts.push(state.caller_deoptimized);
                    state.caller_deoptimized = false;
                });
            }
            // The count belongs to this runtime, so it starts over with every fixture
            assert_eq!(deopts, vec![false, true, false, true]);
        },
        no_cleanup,
    )
}

#[test]
pub fn write_barriers() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let object = new_host_object();
            stubs::write_barrier_pre::<MockVM>(fixture.thread, object);
            let card = unsafe { crate::util::Address::from_usize(0x100) };
            stubs::write_barrier_post::<MockVM>(fixture.thread, card);
            with_host(|host| {
                assert_eq!(host.satb_queue, vec![object]);
                assert_eq!(host.dirty_cards, vec![card]);
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn locking() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let object = new_host_object();
            let lock = crate::util::Address::ZERO;
            stubs::monitorenter(&fixture.jvmci, fixture.thread, object, lock);
            assert!(stubs::object_notify::<MockVM>(fixture.thread, object));
            assert!(stubs::object_notify_all::<MockVM>(fixture.thread, object));
            stubs::monitorexit(&fixture.jvmci, fixture.thread, object, lock);
            assert!(!stubs::object_notify::<MockVM>(fixture.thread, object));
            assert!(with_host(|host| host.revoked_biases.is_empty()));

            let biased = JVMCIFixture::create_with_builder(|builder| {
                assert!(builder.set_option("UseBiasedLocking", "true"));
            });
            stubs::monitorenter(&biased.jvmci, biased.thread, object, lock);
            assert_eq!(with_host(|host| host.revoked_biases.clone()), vec![object]);
        },
        no_cleanup,
    )
}
