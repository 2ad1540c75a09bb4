use super::mock_test_install_code::nmethod_code;
use super::mock_test_prelude::*;

use crate::code::{CodeInstaller, InstalledBlob};
use crate::nmethod_data::NMethodData;
use crate::util::test_util::mock_vm::remote::RefKind;

/// Install code for the method through a new mirror, and return both.
fn install(fixture: &JVMCIFixture, method: &MethodFixture, is_default: bool) -> (NMethodRef, ObjectReference) {
    let env = fixture.env();
    let mirror = env
        .new_hotspot_nmethod(method.mirror(&env), Some("installed"), is_default, 0)
        .unwrap();
    let outcome = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 1), Some(mirror), None).unwrap();
    match outcome.blob {
        Some(InstalledBlob::NMethod(nm)) => (nm, mirror.as_host().unwrap()),
        other => panic!("expected an nmethod, got {:?}", other),
    }
}

fn collect(fixture: &JVMCIFixture, object: ObjectReference) {
    with_host(|host| {
        host.release_local_handles(fixture.thread);
        assert!(host.collect(object));
    });
}

#[test]
pub fn dead_mirror_invalidates_its_nmethod() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (nm, mirror) = install(&fixture, &method, false);
            assert!(fixture.jvmci.with_nmethod_data(nm, |d| d.nmethod_mirror()).unwrap().is_some());
            let weak_handles = with_host(|host| host.number_of_handles(HandleKind::Weak));

            // Nothing happens while the mirror is alive
            fixture.jvmci.update_nmethod_mirrors_in_gc();
            assert!(MockVM::nmethod_state(nm).is_in_use);

            collect(&fixture, mirror);
            fixture.jvmci.update_nmethod_mirrors_in_gc();
            assert!(MockVM::nmethod_state(nm).is_not_entrant());
            assert_eq!(fixture.jvmci.with_nmethod_data(nm, |d| d.nmethod_mirror()), Some(None));
            assert_eq!(with_host(|host| host.number_of_handles(HandleKind::Weak)), weak_handles - 1);
        },
        no_cleanup,
    )
}

#[test]
pub fn dead_default_mirror_keeps_its_nmethod() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (nm, mirror) = install(&fixture, &method, true);
            collect(&fixture, mirror);
            fixture.jvmci.update_nmethod_mirrors_in_gc();
            assert!(MockVM::nmethod_state(nm).is_in_use);
            assert_eq!(fixture.jvmci.with_nmethod_data(nm, |d| d.nmethod_mirror()), Some(None));
        },
        no_cleanup,
    )
}

#[test]
pub fn mirror_follows_the_nmethod_state() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (nm, mirror) = install(&fixture, &method, false);
            let mirror = JVMCIObject::from_host(mirror);

            // Not entrant: the entry point goes, the address stays for existing activations
            with_host(|host| host.make_not_entrant(nm));
            fixture.jvmci.invalidate_nmethod_mirror(fixture.thread, nm);
            {
                let env = fixture.env();
                assert_eq!(env.get_installed_code_address(mirror).unwrap(), nm.0);
                assert!(env.get_installed_code_entry_point(mirror).unwrap().is_zero());
            }
            assert!(fixture.jvmci.with_nmethod_data(nm, |d| d.nmethod_mirror()).unwrap().is_some());

            // Unloaded: the mirror is unlinked and forgotten
            with_host(|host| host.unload_nmethod(nm));
            fixture.jvmci.invalidate_nmethod_mirror(fixture.thread, nm);
            let env = fixture.env();
            assert!(env.get_installed_code_address(mirror).unwrap().is_zero());
            assert_eq!(env.get_nmethod(mirror).unwrap(), None);
            assert_eq!(fixture.jvmci.with_nmethod_data(nm, |d| d.nmethod_mirror()), Some(None));
        },
        no_cleanup,
    )
}

#[test]
pub fn invalidate_through_the_mirror() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (nm, mirror) = install(&fixture, &method, false);
            let env = fixture.env();
            let mirror = JVMCIObject::from_host(mirror);
            crate::compiler_to_vm::invalidate_hotspot_nmethod(&env, mirror).unwrap();
            assert!(MockVM::nmethod_state(nm).is_not_entrant());
            assert!(env.get_installed_code_entry_point(mirror).unwrap().is_zero());

            // Refreshing an unloaded nmethod's mirror unlinks it
            with_host(|host| host.unload_nmethod(nm));
            crate::compiler_to_vm::update_hotspot_nmethod_handle(&env, mirror).unwrap();
            assert!(env.get_installed_code_address(mirror).unwrap().is_zero());
            assert_eq!(crate::compiler_to_vm::get_code(&env, mirror).unwrap(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn failed_speculation_is_recorded_in_the_log() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let log = JVMCIObject::from_host(with_host(|host| host.new_object("jdk/vm/ci/hotspot/HotSpotSpeculationLog")));
            let mirror = env
                .new_hotspot_nmethod(method.mirror(&env), Some("speculative"), false, 0)
                .unwrap();
            let outcome = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 1), Some(mirror), Some(log)).unwrap();
            let nm = match outcome.blob {
                Some(InstalledBlob::NMethod(nm)) => nm,
                other => panic!("expected an nmethod, got {:?}", other),
            };

            with_host(|host| host.thread(fixture.thread).pending_failed_speculation = 42);
            fixture.jvmci.update_speculation(fixture.thread, nm);
            assert_eq!(env.get_long_field(JVMCIField::HotSpotSpeculationLogLastFailed, log).unwrap(), 42);
            assert_eq!(with_host(|host| host.thread(fixture.thread).pending_failed_speculation), 0);

            // No failed speculation, nothing to record
            fixture.jvmci.update_speculation(fixture.thread, nm);
            assert_eq!(env.get_long_field(JVMCIField::HotSpotSpeculationLogLastFailed, log).unwrap(), 42);
        },
        no_cleanup,
    )
}

#[test]
pub fn freeing_host_data_is_immediate() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let (nm, _) = install(&fixture, &method, false);
            let weak_handles = with_host(|host| host.number_of_handles(HandleKind::Weak));

            fixture.jvmci.nmethod_freed(fixture.thread, nm);
            assert!(!fixture.jvmci.has_nmethod_data(nm));
            assert_eq!(fixture.jvmci.queued_nmethod_data(), 0);
            assert_eq!(with_host(|host| host.number_of_handles(HandleKind::Weak)), weak_handles - 1);

            // Freeing code the runtime did not install is a no-op
            fixture.jvmci.nmethod_freed(fixture.thread, nm);
        },
        no_cleanup,
    )
}

#[test]
pub fn freeing_remote_data_is_deferred() {
    with_mockvm(
        default_setup,
        || {
            let fixture = RemoteJVMCIFixture::create();
            let nm = NMethodRef(unsafe { crate::util::Address::from_usize(CODE_CACHE_BASE + 0x1000) });
            {
                let env = JVMCIEnv::for_thread(fixture.jvmci(), fixture.thread());
                let mirror = env.create_string("mirror").unwrap();
                let log = env.create_string("log").unwrap();
                let data = NMethodData::new(&env, mirror, Some(log), true).unwrap();
                assert!(data.needs_deferred_release());
                // Remote mirrors are updated by the compiler itself
                assert_eq!(data.nmethod_mirror(), None);
                fixture.jvmci().register_nmethod_data(nm, data);
            }
            assert_eq!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Weak)), 1);

            fixture.jvmci().nmethod_freed(fixture.thread(), nm);
            assert_eq!(fixture.jvmci().queued_nmethod_data(), 1);
            assert_eq!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Weak)), 1);

            fixture.jvmci().release_queued_nmethod_data(fixture.thread());
            assert_eq!(fixture.jvmci().queued_nmethod_data(), 0);
            assert_eq!(fixture.remote.with_state(|s| s.number_of_refs(RefKind::Weak)), 0);
        },
        no_cleanup,
    )
}

#[test]
pub fn unloaded_metadata_is_dropped() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let _ = method.mirror(&env);
            let mut visited = vec![];
            fixture.jvmci.metadata_do(|m| visited.push(m.address));
            assert!(visited.contains(&method.method.0));

            with_host(|host| host.unloading.insert(method.method.0));
            // Nothing is cleared unless classes were unloaded
            fixture.jvmci.do_unloading(false);
            assert!(fixture.jvmci.metadata_handles().count_in_use() > 0);

            fixture.jvmci.do_unloading(true);
            let mut visited = vec![];
            fixture.jvmci.metadata_do(|m| visited.push(m.address));
            assert!(!visited.contains(&method.method.0));
        },
        no_cleanup,
    )
}
