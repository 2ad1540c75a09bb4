use super::mock_test_prelude::*;

use crate::compiler_to_vm;
use crate::util::test_util::mock_vm::remote::RefKind;

/// The class and message of the exception pending in the remote heap.
fn remote_pending(fixture: &RemoteJVMCIFixture) -> Option<(String, Option<String>)> {
    let caller = fixture.remote.env();
    let exception = caller.exception_occurred()?;
    fixture.remote.with_state(|s| {
        let id = s.resolve(exception).unwrap();
        Some((s.heap.class_of(id).to_string(), s.heap.throwable_message(id)))
    })
}

#[test]
pub fn environments_attach_and_push_a_local_frame() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let depth = fixture.remote.with_state(|s| s.local_frame_depth());
            let locals = {
                let env = fixture.base.env();
                assert_eq!(env.mode(), Mode::Remote);
                assert_eq!(fixture.remote.with_state(|s| s.local_frame_depth()), depth + 1);
                let locals = fixture.remote.with_state(|s| s.number_of_refs(RefKind::Local));
                env.create_string("scratch").unwrap();
                assert!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Local)) > locals);
                locals
            };
            // Leaving the environment drops its local references
            fixture.remote.with_state(|s| {
                assert_eq!(s.local_frame_depth(), depth);
                assert_eq!(s.number_of_refs(RefKind::Local), locals);
                assert_eq!(s.attached, 1);
            });

            // Ids are only looked up once
            let globals = fixture.remote.with_state(|s| s.number_of_refs(RefKind::Global));
            drop(fixture.base.env());
            assert_eq!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Global)), globals);
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "fatal error: Error attaching current thread to the JVMCI shared library")]
pub fn failing_to_attach_is_fatal() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            fixture.remote.with_state(|s| s.attach_fails = true);
            let _env = fixture.base.env();
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "fatal error: Error initializing JNI ids: jdk/vm/ci/hotspot/HotSpotNmethod not found")]
pub fn missing_runtime_classes_are_fatal() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            fixture.remote.with_state(|s| {
                s.missing_classes.insert("jdk/vm/ci/hotspot/HotSpotNmethod".to_string());
            });
            let _env = fixture.base.env();
        },
        no_cleanup,
    )
}

#[test]
pub fn errors_are_thrown_in_the_remote_caller() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let caller = fixture.remote.env();
            {
                let env = JVMCIEnv::for_caller(fixture.jvmci(), fixture.thread(), &caller);
                assert!(env.propagate::<()>(Err(JVMCIError::illegal_argument("bad index"))).is_none());
                assert!(env.has_pending_exception());
            }
            assert_eq!(
                remote_pending(&fixture),
                Some(("java/lang/IllegalArgumentException".to_string(), Some("bad index".to_string())))
            );
            caller.exception_clear();

            // A throwable of the host heap is rebuilt in the remote heap
            let throwable = with_host(|host| object_ref(host.heap.new_throwable("java/lang/IllegalStateException", Some("host side"))));
            {
                let env = JVMCIEnv::for_caller(fixture.jvmci(), fixture.thread(), &caller);
                env.propagate::<()>(Err(JVMCIError::Exception(ThrownException {
                    kind: ExceptionKind::IllegalStateException,
                    message: Some("host side".to_string()),
                    throwable: Some(JVMCIObject::from_host(throwable)),
                })));
            }
            assert_eq!(
                remote_pending(&fixture),
                Some(("java/lang/IllegalStateException".to_string(), Some("host side".to_string())))
            );
            assert!(with_host(|host| host.heap.was_called("TranslatedException.encodeThrowable")));
            assert!(fixture
                .remote
                .with_state(|s| s.heap.was_called("TranslatedException.decodeThrowable")));
        },
        no_cleanup,
    )
}

#[test]
pub fn remote_exceptions_are_classified() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let env = fixture.base.env();
            let error = env
                .call(JVMCIMethod::HotSpotJVMCIRuntimeCallToString, None, &[Value::Object(None)])
                .unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::NullPointerException));
            match error {
                JVMCIError::Exception(e) => assert_eq!(e.throwable.map(|t| t.mode()), Some(Mode::Remote)),
                other => panic!("expected an exception, got {}", other),
            }
            // The exception was taken from the remote heap
            assert!(!fixture.remote.env().exception_check());

            // Checked before the remote heap is asked
            let bytes = env.new_byte_array_from(b"xy").unwrap();
            let error = env.get_byte_at(bytes, 2).unwrap_err();
            assert_eq!(error.message(), Some("Index 2 out of bounds for length 2"));
        },
        no_cleanup,
    )
}

#[test]
pub fn stack_walking_needs_the_host_heap() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let env = fixture.base.env();
            let error = compiler_to_vm::iterate_frames(&env, None, None, 0, |_| Ok(Some(()))).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::InternalError));
            assert_eq!(
                error.message(),
                Some("Stack walking is only supported for compilers in the host heap")
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn to_string_runs_in_either_heap() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let host = fixture.base.host_env();
            let remote = fixture.base.env();

            let object = new_host_object();
            assert_eq!(
                host.call_to_string(JVMCIObject::from_host(object)).unwrap(),
                format!("java.lang.Object@{:x}", object_id(object))
            );
            let s = remote.create_string("in the library").unwrap();
            assert_eq!(remote.call_to_string(s).unwrap(), "in the library");
            assert!(fixture
                .remote
                .with_state(|s| s.heap.was_called("HotSpotJVMCIRuntime.callToString")));
        },
        no_cleanup,
    )
}
