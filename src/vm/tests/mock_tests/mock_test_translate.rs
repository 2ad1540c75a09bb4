use super::mock_test_install_code::nmethod_code;
use super::mock_test_prelude::*;

use crate::code::{CodeInstaller, InstalledBlob};
use crate::compiler_to_vm::{translate, unhand};
use crate::util::test_util::mock_vm::remote::RefKind;

/// Translate `object` out of `from` and take the result in `to`.
fn round_trip(from: &JVMCIEnv<MockVM>, to: &JVMCIEnv<MockVM>, object: JVMCIObject) -> JVMCIObject {
    let handle = translate(from, Some(object)).unwrap();
    assert_ne!(handle, 0);
    let translated = unhand(to, handle).unwrap().unwrap();
    assert_eq!(translated.mode(), to.mode());
    translated
}

#[test]
pub fn translation_needs_a_remote_runtime() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let object = JVMCIObject::from_host(new_host_object());
            let error = translate(&env, Some(object)).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::UnsatisfiedLinkError));
            assert_eq!(error.message(), Some("JVMCI shared library is unavailable"));

            assert_eq!(translate(&env, None).unwrap(), 0);
            assert_eq!(unhand(&env, 0).unwrap(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn metadata_mirrors() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let method = MethodFixture::create();
            let host = fixture.base.host_env();
            let remote = fixture.base.env();
            assert_eq!(remote.mode(), Mode::Remote);
            let globals = fixture.remote.with_state(|s| s.number_of_refs(RefKind::Global));

            let remote_method = round_trip(&host, &remote, method.mirror(&host));
            assert_eq!(remote.as_method(remote_method).unwrap(), method.method);
            // unhand releases the handle
            assert_eq!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Global)), globals);

            let host_method = round_trip(&remote, &host, remote_method);
            assert_eq!(host.as_method(host_method).unwrap(), method.method);

            let remote_type = round_trip(&host, &remote, host.get_jvmci_type(method.klass).unwrap());
            assert_eq!(remote.as_klass(remote_type).unwrap(), method.klass);

            let int_type = host.get_jvmci_primitive_type(BasicType::Int).unwrap();
            let remote_int = round_trip(&host, &remote, int_type);
            assert_eq!(remote.as_primitive_type(remote_int).unwrap(), BasicType::Int);
        },
        no_cleanup,
    )
}

#[test]
pub fn object_constants() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let host = fixture.base.host_env();
            let remote = fixture.base.env();
            let object = new_host_object();

            let constant = host.get_object_constant(object, true, false).unwrap();
            let remote_constant = round_trip(&host, &remote, constant);
            assert_eq!(remote.as_constant(remote_constant).unwrap(), object);
            assert!(remote
                .get_bool_field(JVMCIField::HotSpotObjectConstantImplCompressed, remote_constant)
                .unwrap());

            let back = round_trip(&remote, &host, remote_constant);
            assert_eq!(host.as_constant(back).unwrap(), object);
        },
        no_cleanup,
    )
}

#[test]
pub fn nmethod_mirrors() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let method = MethodFixture::create();
            let host = fixture.base.host_env();
            let remote = fixture.base.env();

            let mirror = host
                .new_hotspot_nmethod(method.mirror(&host), Some("translated"), false, 1)
                .unwrap();
            let outcome = CodeInstaller::<MockVM>::install(&host, &nmethod_code(method.method, 1), Some(mirror), None).unwrap();
            let nm = match outcome.blob {
                Some(InstalledBlob::NMethod(nm)) => nm,
                other => panic!("expected an nmethod, got {:?}", other),
            };

            let remote_mirror = round_trip(&host, &remote, mirror);
            assert_eq!(remote.get_nmethod(remote_mirror).unwrap(), Some(nm));
            assert_eq!(remote.get_installed_code_address(remote_mirror).unwrap(), nm.0);
            let name = remote
                .get_object_field(JVMCIField::InstalledCodeName, remote_mirror)
                .unwrap()
                .unwrap();
            assert_eq!(remote.as_utf8_string(name).unwrap(), "translated");
            assert_eq!(
                remote
                    .get_long_field(JVMCIField::HotSpotNmethodCompileIdSnapshot, remote_mirror)
                    .unwrap(),
                1
            );
            let remote_method = remote
                .get_object_field(JVMCIField::HotSpotNmethodMethod, remote_mirror)
                .unwrap()
                .unwrap();
            assert_eq!(remote.as_method(remote_method).unwrap(), method.method);
        },
        no_cleanup,
    )
}

#[test]
pub fn untranslatable_objects() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let host = fixture.base.host_env();
            let error = translate(&host, Some(JVMCIObject::from_host(new_host_object()))).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::IllegalArgumentException));
            assert_eq!(error.message(), Some("Cannot translate object of type: java/lang/Object"));
        },
        no_cleanup,
    )
}
