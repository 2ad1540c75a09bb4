use super::mock_test_prelude::*;

use crate::code::*;
use crate::compile_state::JVMCICompileState;
use crate::compiler_to_vm;

/// 32 bytes of code with a verified entry at 0.
pub fn nmethod_code(method: MethodRef, compile_id: i32) -> CompiledCode {
    CompiledCode {
        name: format!("compiled#{}", compile_id),
        kind: CompiledCodeKind::Nmethod {
            method,
            entry_bci: INVOCATION_ENTRY_BCI,
            compile_id,
            has_unsafe_access: false,
        },
        target_code: vec![0x90; 32],
        data_section: vec![],
        data_section_alignment: 8,
        data_section_patches: vec![],
        sites: vec![Site {
            pc_offset: 0,
            kind: SiteKind::Mark {
                id: MarkId::VerifiedEntry as i32,
            },
        }],
        assumptions: vec![],
        methods: vec![method],
        comments: vec![],
        total_frame_size: 16,
        deopt_rescue_slot: None,
        has_wide_vectors: false,
    }
}

fn stub_code() -> CompiledCode {
    CompiledCode {
        name: "stub".to_string(),
        kind: CompiledCodeKind::RuntimeStub,
        methods: vec![],
        sites: vec![],
        ..nmethod_code(MethodRef(crate::util::Address::ZERO), 0)
    }
}

fn install_serialized(
    env: &JVMCIEnv<MockVM>,
    compiled: &CompiledCode,
    installed_code: Option<JVMCIObject>,
) -> (CodeInstallResult, JVMCIObject) {
    let (bytes, pool) = stream::encode(compiled);
    assert!(pool.is_empty());
    let serialized = env.new_byte_array_from(&bytes).unwrap();
    let compiled_code = JVMCIObject::from_host(with_host(|host| host.new_object("jdk/vm/ci/hotspot/HotSpotCompiledCode")));
    let result = compiler_to_vm::install_code(env, compiled_code, serialized, None, installed_code, None).unwrap();
    (result, compiled_code)
}

fn failure_message(env: &JVMCIEnv<MockVM>, compiled_code: JVMCIObject) -> Option<String> {
    env.get_object_field(JVMCIField::HotSpotCompiledCodeInstallationFailureMessage, compiled_code)
        .unwrap()
        .map(|m| env.as_utf8_string(m).unwrap())
}

#[test]
pub fn install_default_nmethod() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 7, CompLevel::FullOptimization as i32);
            let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);

            let outcome = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 7), None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::Ok);
            let nm = match outcome.blob {
                Some(InstalledBlob::NMethod(nm)) => nm,
                other => panic!("expected an nmethod, got {:?}", other),
            };

            // The compile state and the method both know the new code
            assert_eq!(state.code(), Some(nm));
            with_host(|host| {
                assert_eq!(host.method(method.method).code, Some(nm));
                let blob = host.blob(nm);
                assert_eq!(blob.state.compile_id, 7);
                assert_eq!(blob.comp_level, CompLevel::FullOptimization as i32);
                assert_eq!(blob.code.len(), 32);
            });

            // The default mirror does not invalidate the code when it dies
            assert!(fixture.jvmci.has_nmethod_data(nm));
            let triggers = fixture.jvmci.with_nmethod_data(nm, |data| data.triggers_invalidation());
            assert_eq!(triggers, Some(false));
            let name = fixture.jvmci.with_nmethod_data(nm, |data| data.nmethod_mirror_name().map(String::from));
            assert_eq!(name, Some(Some("compiled#7".to_string())));
            assert_eq!(fixture.jvmci.state().code_installs(), 1);
        },
        no_cleanup,
    )
}

#[test]
pub fn install_into_a_mirror() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mirror = env
                .new_hotspot_nmethod(method.mirror(&env), Some("explicit"), false, 0)
                .unwrap();

            let (result, _) = install_serialized(&env, &nmethod_code(method.method, 1), Some(mirror));
            assert_eq!(result, CodeInstallResult::Ok);
            let first = env.get_nmethod(mirror).unwrap().unwrap();
            let state = MockVM::nmethod_state(first);
            assert_eq!(env.get_installed_code_address(mirror).unwrap(), first.0);
            assert_eq!(
                Some(env.get_installed_code_entry_point(mirror).unwrap()),
                state.verified_entry_point
            );
            assert_eq!(env.get_long_field(JVMCIField::InstalledCodeVersion, mirror).unwrap(), 1);
            // The snapshot was taken when the mirror was created
            assert_eq!(env.get_long_field(JVMCIField::HotSpotNmethodCompileIdSnapshot, mirror).unwrap(), 0);
            // Only default code replaces the code of the method
            assert_eq!(with_host(|host| host.method(method.method).code), None);

            // Installing again through the same mirror retires the old code
            let (result, _) = install_serialized(&env, &nmethod_code(method.method, 2), Some(mirror));
            assert_eq!(result, CodeInstallResult::Ok);
            let second = env.get_nmethod(mirror).unwrap().unwrap();
            assert_ne!(first, second);
            assert!(MockVM::nmethod_state(first).is_not_entrant());
            assert!(MockVM::nmethod_state(second).is_in_use);
            assert_eq!(env.get_long_field(JVMCIField::InstalledCodeVersion, mirror).unwrap(), 2);

            // The non-default mirror triggers invalidation
            let triggers = fixture.jvmci.with_nmethod_data(second, |data| data.triggers_invalidation());
            assert_eq!(triggers, Some(true));
        },
        no_cleanup,
    )
}

#[test]
pub fn replacing_default_code() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let first = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 1), None, None).unwrap();
            let second = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 2), None, None).unwrap();
            let (first, second) = match (first.blob, second.blob) {
                (Some(InstalledBlob::NMethod(a)), Some(InstalledBlob::NMethod(b))) => (a, b),
                other => panic!("expected two nmethods, got {:?}", other),
            };
            assert!(MockVM::nmethod_state(first).is_not_entrant());
            assert_eq!(with_host(|host| host.method(method.method).code), Some(second));
        },
        no_cleanup,
    )
}

#[test]
pub fn dependency_failed_after_class_loading() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 3, CompLevel::FullOptimization as i32);
            // A subclass appears while the compiler works
            with_host(|host| host.define_klass("test/Sub", Some("test/Holder")));

            let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
            let mut compiled = nmethod_code(method.method, 3);
            compiled.assumptions.push(Assumption::LeafType { context: method.klass });
            let (result, compiled_code) = install_serialized(&env, &compiled, None);
            assert_eq!(result, CodeInstallResult::DependenciesFailed);
            let message = failure_message(&env, compiled_code).unwrap();
            assert!(message.contains("witness test/Sub"), "{}", message);
            assert_eq!(state.code(), None);
            with_host(|host| {
                assert_eq!(host.method(method.method).code, None);
                assert_eq!(host.method(method.method).decompile_count, 1);
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn dependency_invalid_from_the_start() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            with_host(|host| host.define_klass("test/Sub", Some("test/Holder")));
            // Nothing is loaded after the snapshot, so the compiler assumed something that was
            // never true
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 4, CompLevel::FullOptimization as i32);
            let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
            let mut compiled = nmethod_code(method.method, 4);
            compiled.assumptions.push(Assumption::LeafType { context: method.klass });
            let outcome = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::DependenciesInvalid);
            assert!(outcome.blob.is_none());
        },
        no_cleanup,
    )
}

#[test]
pub fn jvmti_state_change_fails_the_install() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 5, CompLevel::FullOptimization as i32);
            with_host(|host| host.jvmti.can_access_local_variables = true);
            assert!(state.jvmti_state_changed());

            let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
            let (result, compiled_code) = install_serialized(&env, &nmethod_code(method.method, 5), None);
            assert_eq!(result, CodeInstallResult::DependenciesFailed);
            assert_eq!(
                failure_message(&env, compiled_code).as_deref(),
                Some("Jvmti state change during compilation invalidated dependencies")
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn code_cache_full() {
    with_mockvm(
        || MockVM {
            register_nmethod: MockMethod::new_fixed(Box::new(|_| None)),
            register_runtime_stub: MockMethod::new_fixed(Box::new(|_| None)),
            ..MockVM::default()
        },
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();

            let outcome = CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 1), None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::CacheFull);
            assert!(outcome.blob.is_none());

            let outcome = CodeInstaller::<MockVM>::install(&env, &stub_code(), None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::CacheFull);

            read_mockvm(|mock| {
                assert_eq!(mock.handle_full_code_cache.call_count(), 2);
            });
            assert_eq!(with_host(|host| host.cache_full_events), 2);
        },
        no_cleanup,
    )
}

#[test]
pub fn code_too_large() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mut compiled = nmethod_code(method.method, 1);
            compiled.target_code = vec![0x90; (1 << 16) + 1];

            let (result, compiled_code) = install_serialized(&env, &compiled, None);
            assert_eq!(result, CodeInstallResult::CodeTooLarge);
            assert_eq!(failure_message(&env, compiled_code).as_deref(), Some("code is too large"));
            read_mockvm(|mock| assert!(!mock.register_nmethod.is_called()));
        },
        no_cleanup,
    )
}

#[test]
pub fn install_runtime_stub() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let mirror = JVMCIObject::from_host(with_host(|host| host.new_object("jdk/vm/ci/hotspot/HotSpotRuntimeStub")));
            let outcome = CodeInstaller::<MockVM>::install(&env, &stub_code(), Some(mirror), None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::Ok);
            let stub = match outcome.blob {
                Some(InstalledBlob::RuntimeStub(stub)) => stub,
                other => panic!("expected a stub, got {:?}", other),
            };
            assert_eq!(env.get_installed_code_address(mirror).unwrap(), stub.0);
            assert!(with_host(|host| host.code_blobs[&stub.0].is_stub));
        },
        no_cleanup,
    )
}

#[test]
pub fn invalid_code_is_an_error() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mut compiled = nmethod_code(method.method, 1);
            compiled.data_section_alignment = 3;
            let error = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::JVMCIError));

            let mut compiled = nmethod_code(method.method, 1);
            compiled.sites.push(Site {
                pc_offset: 0,
                kind: SiteKind::Mark { id: 99 },
            });
            let error = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap_err();
            assert_eq!(error.message(), Some("invalid mark id: 99"));

            // A site at the end of the code is past the last instruction
            let mut compiled = nmethod_code(method.method, 1);
            compiled.sites.push(Site {
                pc_offset: 32,
                kind: SiteKind::Mark {
                    id: MarkId::DeoptHandlerEntry as i32,
                },
            });
            let error = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::JVMCIError));
            assert_eq!(error.message(), Some("site pc offset 32 is outside of the code (32 bytes)"));
            read_mockvm(|mock| assert!(!mock.register_nmethod.is_called()));
        },
        no_cleanup,
    )
}

#[test]
pub fn stale_compile_id_snapshot() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let mirror = env
                .new_hotspot_nmethod(method.mirror(&env), Some("stale"), false, 7)
                .unwrap();

            let (result, _) = install_serialized(&env, &nmethod_code(method.method, 1), Some(mirror));
            assert_eq!(result, CodeInstallResult::Ok);
            // The mirror still carries the id it was created with, so the code is not its own
            assert_eq!(env.get_long_field(JVMCIField::HotSpotNmethodCompileIdSnapshot, mirror).unwrap(), 7);
            assert!(!env.get_installed_code_address(mirror).unwrap().is_zero());
            assert_eq!(env.get_nmethod(mirror).unwrap(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn foreign_call_displacement() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let target = unsafe { Address::from_usize(CODE_CACHE_BASE + 0x40) };
            let mut compiled = nmethod_code(method.method, 1);
            compiled.target_code[16] = 0xE8;
            compiled.target_code[17..21].copy_from_slice(&[0; 4]);
            compiled.sites.push(Site {
                pc_offset: 16,
                kind: SiteKind::Call {
                    target: CallTarget::Foreign(target),
                    direct: true,
                    debug_info: None,
                },
            });

            let outcome = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::Ok);
            let nm = match outcome.blob {
                Some(InstalledBlob::NMethod(nm)) => nm,
                other => panic!("expected an nmethod, got {:?}", other),
            };
            with_host(|host| {
                let blob = host.blob(nm);
                assert_eq!(blob.offsets.get(CodeOffset::VerifiedEntry), Some(0));
                assert_eq!(blob.state.verified_entry_point, Some(blob.state.code_begin));
                assert_eq!(blob.code[16], 0xE8);
                let mut disp = [0u8; 4];
                disp.copy_from_slice(&blob.code[17..21]);
                let end = (blob.state.code_begin + 21usize).as_usize() as i64;
                assert_eq!(i32::from_ne_bytes(disp) as i64, target.as_usize() as i64 - end);
                // The target is in reach, so no trampoline is emitted
                assert_eq!(blob.code.len(), 32);
            });
        },
        no_cleanup,
    )
}

/// 32 bytes with a safepoint at 4 that throws to the handler at 24.
fn code_with_handler(method: MethodRef) -> CompiledCode {
    let mut compiled = nmethod_code(method, 1);
    compiled.sites.extend([
        Site {
            pc_offset: 4,
            kind: SiteKind::Infopoint {
                reason: InfopointReason::Safepoint,
                debug_info: DebugInfo {
                    frame: None,
                    reference_map: Some(ReferenceMap {
                        objects: vec![
                            Location::Register(3),
                            Location::Stack(StackSlot {
                                offset: 8,
                                add_frame_size: false,
                            }),
                        ],
                        derived_base: vec![None, None],
                        size_in_bytes: vec![8, 8],
                    }),
                    virtual_objects: vec![],
                },
            },
        },
        Site {
            pc_offset: 4,
            kind: SiteKind::ExceptionHandler { handler_pos: 24 },
        },
        Site {
            pc_offset: 24,
            kind: SiteKind::Mark {
                id: MarkId::ExceptionHandlerEntry as i32,
            },
        },
    ]);
    compiled
}

#[test]
pub fn exception_handler_sites() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let outcome = CodeInstaller::<MockVM>::install(&env, &code_with_handler(method.method), None, None).unwrap();
            assert_eq!(outcome.result, CodeInstallResult::Ok);
            let nm = match outcome.blob {
                Some(InstalledBlob::NMethod(nm)) => nm,
                other => panic!("expected an nmethod, got {:?}", other),
            };
            with_host(|host| {
                let blob = host.blob(nm);
                assert_eq!(blob.exception_table.entries(), &[(4, 24)]);
                assert_eq!(blob.exception_table.handler_for(4), Some(24));
                assert_eq!(blob.exception_table.handler_for(8), None);
                assert_eq!(blob.offsets.get(CodeOffset::Exceptions), Some(24));
                let map = blob.oop_maps.find_map_at_offset(4).unwrap();
                assert_eq!(
                    map.registers(),
                    vec![VMReg::from_register(3).unwrap(), VMReg::from_stack_offset(8).unwrap()]
                );
            });
        },
        no_cleanup,
    )
}

#[test]
pub fn installing_twice_gives_the_same_tables() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let compiled = code_with_handler(method.method);
            let mut installed = vec![];
            for _ in 0..2 {
                let outcome = CodeInstaller::<MockVM>::install(&env, &compiled, None, None).unwrap();
                assert_eq!(outcome.result, CodeInstallResult::Ok);
                match outcome.blob {
                    Some(InstalledBlob::NMethod(nm)) => installed.push(nm),
                    other => panic!("expected an nmethod, got {:?}", other),
                }
            }
            assert_ne!(installed[0], installed[1]);

            with_host(|host| {
                let (first, second) = (host.blob(installed[0]), host.blob(installed[1]));
                assert_eq!(first.offsets, second.offsets);
                assert_eq!(first.exception_table.entries(), second.exception_table.entries());
                assert_eq!(first.oop_maps.len(), second.oop_maps.len());
                for (a, b) in first.oop_maps.iter().zip(second.oop_maps.iter()) {
                    assert_eq!(a.pc_offset, b.pc_offset);
                    assert_eq!(a.registers(), b.registers());
                }
            });
        },
        no_cleanup,
    )
}
