use super::mock_test_prelude::*;

#[test]
pub fn object_constant_handles() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let object = new_host_object();
            let before = with_host(|host| host.number_of_handles(HandleKind::Global));

            let handle = fixture.jvmci.make_global(object);
            assert!(fixture.jvmci.is_global_handle(handle));
            assert_eq!(fixture.jvmci.global_handle_count(), 1);
            assert_eq!(with_host(|host| host.resolve_handle(handle)), Some(object));

            assert!(fixture.jvmci.destroy_global(handle));
            assert!(!fixture.jvmci.is_global_handle(handle));
            assert_eq!(fixture.jvmci.global_handle_count(), 0);
            assert_eq!(with_host(|host| host.number_of_handles(HandleKind::Global)), before);

            // Only handles created for object constants can be destroyed this way
            assert!(!fixture.jvmci.destroy_global(handle));
            let other = with_host(|host| host.new_global_handle(Some(object)));
            assert!(!fixture.jvmci.destroy_global(other));
            assert_eq!(with_host(|host| host.resolve_handle(other)), Some(object));
        },
        no_cleanup,
    )
}

#[test]
pub fn env_handles_outlive_the_env() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let handle = {
                let env = fixture.env();
                let s = env.create_string("kept").unwrap();
                env.make_global(s).unwrap()
            };
            assert_eq!(handle.mode(), Mode::Host);
            assert!(!handle.is_weak());

            let env = fixture.env();
            let resolved = env.resolve_handle(&handle).unwrap().unwrap();
            assert_eq!(env.as_utf8_string(resolved).unwrap(), "kept");
            env.destroy_handle(handle).unwrap();
        },
        no_cleanup,
    )
}

#[test]
pub fn weak_handles_do_not_keep_objects_alive() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let object = new_host_object();
            let env = fixture.env();
            let weak = env.make_weak(JVMCIObject::from_host(object)).unwrap();
            assert!(weak.is_weak());
            assert_eq!(env.resolve_handle(&weak).unwrap(), Some(JVMCIObject::from_host(object)));

            assert!(with_host(|host| host.collect(object)));
            assert_eq!(env.resolve_handle(&weak).unwrap(), None);
            env.destroy_handle(weak).unwrap();
        },
        no_cleanup,
    )
}

#[test]
pub fn objects_of_the_other_heap_are_rejected() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let compiler = JVMCIEnv::for_thread(fixture.jvmci(), fixture.thread());
            assert_eq!(compiler.mode(), Mode::Remote);
            let remote_string = compiler.create_string("remote").unwrap();
            assert_eq!(remote_string.mode(), Mode::Remote);

            let host = JVMCIEnv::with_mode(fixture.jvmci(), fixture.thread(), Mode::Host);
            match host.as_utf8_string(remote_string) {
                Err(JVMCIError::ModeMismatch { expected, found }) => {
                    assert_eq!(expected, Mode::Host);
                    assert_eq!(found, Mode::Remote);
                }
                other => panic!("expected a mode mismatch, got {:?}", other),
            }

            let handle = compiler.make_global(remote_string).unwrap();
            assert_eq!(handle.mode(), Mode::Remote);
            assert!(matches!(
                host.resolve_handle(&handle),
                Err(JVMCIError::ModeMismatch { .. })
            ));
            compiler.destroy_handle(handle).unwrap();
        },
        no_cleanup,
    )
}
