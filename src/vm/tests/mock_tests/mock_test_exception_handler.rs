use super::mock_test_install_code::nmethod_code;
use super::mock_test_prelude::*;

use crate::code::{CodeInstaller, InstalledBlob};
use crate::runtime::stubs;

/// Install compiled code for a fresh method. Returns the nmethod, a throwing pc, and its handler.
fn install_with_handler(fixture: &JVMCIFixture) -> (NMethodRef, Address, Address) {
    let method = MethodFixture::create();
    let env = fixture.env();
    let outcome = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 1), None, None).unwrap();
    let nm = match outcome.blob {
        Some(InstalledBlob::NMethod(nm)) => nm,
        other => panic!("expected an nmethod, got {:?}", other),
    };
    with_host(|host| {
        let code_begin = host.blob(nm).state.code_begin;
        let (pc, handler) = (code_begin + 4usize, code_begin + 24usize);
        host.blob_mut(nm).handlers.insert(pc, handler);
        (nm, pc, handler)
    })
}

fn raise_in_compiled_code(thread: VMThread, class: &str, pc: Address) -> ObjectReference {
    with_host(|host| {
        let exception = host.new_object(class);
        let state = host.thread(thread);
        state.exception_oop = Some(exception);
        state.exception_pc = pc;
        exception
    })
}

#[test]
pub fn handler_lookup_is_cached() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let (_, pc, handler) = install_with_handler(&fixture);
            let exception = raise_in_compiled_code(fixture.thread, "java/lang/ArithmeticException", pc);

            assert_eq!(stubs::exception_handler_for_pc::<MockVM>(fixture.thread), handler);
            with_host(|host| {
                assert_eq!(host.handler_lookups, 1);
                let state = host.thread(fixture.thread);
                assert_eq!(state.exception_oop, Some(exception));
                assert_eq!(state.exception_pc, pc);
                assert!(!state.is_method_handle_return);
            });

            // The same exception class at the same pc finds the cached handler
            raise_in_compiled_code(fixture.thread, "java/lang/ArithmeticException", pc);
            assert_eq!(stubs::exception_handler_for_pc::<MockVM>(fixture.thread), handler);
            assert_eq!(with_host(|host| host.handler_lookups), 1);

            raise_in_compiled_code(fixture.thread, "java/lang/NullPointerException", pc);
            assert_eq!(stubs::exception_handler_for_pc::<MockVM>(fixture.thread), handler);
            assert_eq!(with_host(|host| host.handler_lookups), 2);
        },
        no_cleanup,
    )
}

#[test]
pub fn deoptimized_frames_use_the_original_pc() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let (nm, pc, handler) = install_with_handler(&fixture);
            let deopt_pc = with_host(|host| {
                let deopt_pc = host.blob(nm).state.code_begin + 8usize;
                host.blob_mut(nm).deopt_pcs.insert(deopt_pc);
                host.blob_mut(nm).method_handle_return_pcs.insert(pc);
                host.thread(fixture.thread).deoptimized_frame_original_pc = pc;
                deopt_pc
            });
            raise_in_compiled_code(fixture.thread, "java/lang/ArithmeticException", deopt_pc);
            assert_eq!(stubs::exception_handler_for_pc::<MockVM>(fixture.thread), handler);
            with_host(|host| {
                let state = host.thread(fixture.thread);
                assert_eq!(state.exception_pc, pc);
                assert!(state.is_method_handle_return);
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn posting_exceptions_deoptimizes_the_caller() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let (_, pc, _) = install_with_handler(&fixture);
            with_host(|host| host.jvmti.can_post_on_exceptions = true);
            raise_in_compiled_code(fixture.thread, "java/lang/ArithmeticException", pc);

            let continuation = stubs::exception_handler_for_pc::<MockVM>(fixture.thread);
            assert_eq!(continuation.as_usize(), CODE_CACHE_BASE + UNPACK_WITH_EXCEPTION_OFFSET);
            with_host(|host| {
                assert_eq!(host.handler_lookups, 0);
                assert_eq!(host.thread(fixture.thread).deopt_reasons, vec![DeoptReason::Constraint]);
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn disabled_stack_guards_are_reenabled() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let (_, pc, handler) = install_with_handler(&fixture);
            with_host(|host| {
                host.reguard_succeeds = true;
                host.thread(fixture.thread).stack_guards_disabled = true;
            });
            raise_in_compiled_code(fixture.thread, "java/lang/StackOverflowError", pc);
            assert_eq!(stubs::exception_handler_for_pc::<MockVM>(fixture.thread), handler);
            assert!(!with_host(|host| host.thread(fixture.thread).stack_guards_disabled));
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "exception_handler_for_pc called without an exception")]
pub fn handler_lookup_needs_an_exception() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            stubs::exception_handler_for_pc::<MockVM>(fixture.thread);
        },
        no_cleanup,
    )
}

#[test]
pub fn throw_stubs() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let thread = fixture.thread;
            let (a, b) = with_host(|host| (host.define_klass("test/A", None), host.define_klass("test/B", None)));

            assert!(!stubs::throw_class_cast_exception::<MockVM>(thread, "java/lang/ClassCastException", a, b));
            assert_eq!(
                with_host(|host| host.pending_exception_description(thread)),
                Some((
                    "java/lang/ClassCastException".to_string(),
                    Some("class test.A cannot be cast to class test.B".to_string())
                ))
            );
            with_host(|host| host.thread(thread).pending_exception = None);

            assert!(!stubs::throw_klass_external_name_exception::<MockVM>(
                thread,
                "java/lang/NoClassDefFoundError",
                b
            ));
            assert_eq!(
                with_host(|host| host.pending_exception_description(thread)).and_then(|(_, message)| message),
                Some("test.B".to_string())
            );
            with_host(|host| host.thread(thread).pending_exception = None);

            // Posted to JVMTI when an agent listens, and reports a deoptimized caller
            with_host(|host| {
                host.post_on_exceptions = true;
                host.thread(thread).caller_deoptimized = true;
            });
            assert!(stubs::throw_and_post_jvmti_exception::<MockVM>(
                thread,
                "java/lang/IllegalMonitorStateException",
                None
            ));
            with_host(|host| {
                let exception = host.thread(thread).pending_exception;
                assert!(exception.is_some());
                assert_eq!(host.thread(thread).posted_exceptions, vec![exception.unwrap()]);
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn load_and_clear_exception() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let pc = unsafe { Address::from_usize(CODE_CACHE_BASE + 0x1000) };
            let exception = raise_in_compiled_code(fixture.thread, "java/lang/ArithmeticException", pc);
            assert_eq!(stubs::load_and_clear_exception::<MockVM>(fixture.thread), Some(exception));
            with_host(|host| {
                let state = host.thread(fixture.thread);
                assert_eq!(state.exception_oop, None);
                assert!(state.exception_pc.is_zero());
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn thread_queries() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let thread_object = with_host(|host| host.new_object("java/lang/Thread"));
            with_host(|host| host.interrupted.insert(object_id(thread_object)));
            assert!(stubs::thread_is_interrupted::<MockVM>(fixture.thread, thread_object, false));
            assert!(stubs::thread_is_interrupted::<MockVM>(fixture.thread, thread_object, true));
            assert!(!stubs::thread_is_interrupted::<MockVM>(fixture.thread, thread_object, false));

            let hash = stubs::identity_hash_code::<MockVM>(thread_object);
            assert!(hash >= 0);
            assert_eq!(stubs::identity_hash_code::<MockVM>(thread_object), hash);

            assert_eq!(stubs::test_deoptimize_call_int::<MockVM>(fixture.thread, 7), 7);
            assert_eq!(
                with_host(|host| host.thread(fixture.thread).deopt_reasons.clone()),
                vec![DeoptReason::Constraint]
            );
            // An already deoptimized caller is not deoptimized again
            assert_eq!(stubs::test_deoptimize_call_int::<MockVM>(fixture.thread, 8), 8);
            assert_eq!(with_host(|host| host.thread(fixture.thread).deopt_reasons.len()), 1);
        },
        no_cleanup,
    )
}
