use super::mock_test_install_code::nmethod_code;
use super::mock_test_prelude::*;

use crate::code::CodeInstaller;
use crate::compile_state::{JVMCICompileState, MAX_FAILURE_REASON_LENGTH};
use crate::runtime::CompLevelAdjustment;
use crate::util::test_util::mock_vm::java_heap::CompileOutcome;

const LEVEL: i32 = CompLevel::FullOptimization as i32;

fn set_outcome(failure_message: Option<&str>, retry: bool, inlined_bytecodes: i32) {
    with_host(|host| {
        host.heap.compile_outcome = CompileOutcome {
            failure_message: failure_message.map(|m| m.to_string()),
            retry,
            inlined_bytecodes,
        }
    })
}

#[test]
pub fn successful_compilation() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 3, LEVEL);
            set_outcome(None, false, 12);
            {
                let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
                // The compiler installs its code before compileMethod returns
                CodeInstaller::<MockVM>::install(&env, &nmethod_code(method.method, 3), None, None).unwrap();
                fixture.jvmci.compiler_runtime().compile_method(&env, method.method, INVOCATION_ENTRY_BCI);
            }
            assert!(!state.is_failed());
            assert!(state.code().is_some());
            assert_eq!(state.num_inlined_bytecodes(), 12);
            assert_eq!(fixture.jvmci.state().methods_compiled(), 1);
            assert!(with_host(|host| host.heap.was_called("HotSpotJVMCIRuntime.compileMethod")));
        },
        no_cleanup,
    )
}

#[test]
pub fn compilation_failures() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let compile = |outcome: (Option<&str>, bool)| {
                set_outcome(outcome.0, outcome.1, 0);
                let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 1, LEVEL);
                {
                    let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
                    fixture.jvmci.compiler_runtime().compile_method(&env, method.method, INVOCATION_ENTRY_BCI);
                }
                (state.failure_reason(), state.retryable())
            };

            assert_eq!(compile((Some("bailout"), true)), (Some("bailout".to_string()), true));
            assert_eq!(compile((Some("fatal bailout"), false)), (Some("fatal bailout".to_string()), false));
            // Success without code
            assert_eq!(compile((None, false)), (Some("no nmethod produced".to_string()), true));

            let long = "x".repeat(MAX_FAILURE_REASON_LENGTH + 10);
            let (reason, _) = compile((Some(&long), false));
            assert_eq!(reason.map(|r| r.len()), Some(MAX_FAILURE_REASON_LENGTH));
            assert_eq!(fixture.jvmci.state().methods_compiled(), 0);
        },
        no_cleanup,
    )
}

#[test]
pub fn the_last_failure_is_kept() {
    with_mockvm(
        default_setup,
        || {
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 1, LEVEL);
            assert!(state.retryable());
            state.set_failure("first", false);
            state.set_failure("second", true);
            assert_eq!(state.failure_reason().as_deref(), Some("second"));
            assert!(state.retryable());
            state.set_failure("third", false);
            assert_eq!(state.failure_reason().as_deref(), Some("third"));
            assert!(!state.retryable());

            // Truncation never splits a character
            let reason = format!("{}\u{e9}", "x".repeat(MAX_FAILURE_REASON_LENGTH - 1));
            state.set_failure(&reason, true);
            assert_eq!(state.failure_reason(), Some("x".repeat(MAX_FAILURE_REASON_LENGTH - 1)));
        },
        no_cleanup,
    )
}

#[test]
pub fn leaked_exceptions_fail_the_compilation() {
    with_mockvm(
        || MockVM {
            call_method: MockMethod::new_fixed(Box::new(|(thread, method, receiver, args)| {
                with_host(|host| {
                    if method.name == "compileMethod" {
                        return Err(host.throw(thread, "java/lang/IllegalStateException", Some("compiler bug")));
                    }
                    let args: Vec<_> = args.into_iter().map(to_heap_value).collect();
                    match host.heap.invoke(method.class, method.name, receiver.map(object_id), &args) {
                        Ok(result) => Ok(to_host_value(result)),
                        Err(exception) => {
                            host.thread(thread).pending_exception = Some(object_ref(exception));
                            Err(ExceptionPending)
                        }
                    }
                })
            })),
            ..MockVM::default()
        },
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 1, LEVEL);
            {
                let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
                fixture.jvmci.compiler_runtime().compile_method(&env, method.method, INVOCATION_ENTRY_BCI);
            }
            assert_eq!(state.failure_reason().as_deref(), Some("unexpected exception thrown"));
            assert!(!state.retryable());
            assert_eq!(
                with_host(|host| host.described_exceptions.clone()),
                vec!["java/lang/IllegalStateException: compiler bug".to_string()]
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn no_osr_while_bootstrapping() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create_with_builder(|builder| {
                assert!(builder.set_option("BootstrapJVMCI", "true"));
            });
            assert!(fixture.jvmci.state().is_bootstrapping());
            let method = MethodFixture::create();

            let state = JVMCICompileState::<MockVM>::new(method.method, 2, 1, LEVEL);
            {
                let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
                fixture.jvmci.compiler_runtime().compile_method(&env, method.method, 2);
            }
            assert_eq!(state.failure_reason().as_deref(), Some("No OSR during boostrap"));
            assert!(state.retryable());
            assert!(!with_host(|host| host.heap.was_called("HotSpotJVMCIRuntime.compileMethod")));
            assert!(!fixture.jvmci.state().bootstrap_compilation_request_handled());

            let state = JVMCICompileState::<MockVM>::new(method.method, INVOCATION_ENTRY_BCI, 2, LEVEL);
            {
                let env = JVMCIEnv::for_compile(&fixture.jvmci, fixture.thread, &state);
                fixture.jvmci.compiler_runtime().compile_method(&env, method.method, INVOCATION_ENTRY_BCI);
            }
            assert!(fixture.jvmci.state().bootstrap_compilation_request_handled());

            fixture.jvmci.bootstrap_finished(fixture.thread);
            assert!(!fixture.jvmci.state().is_bootstrapping());
            assert!(with_host(|host| host.heap.was_called("HotSpotJVMCIRuntime.bootstrapFinished")));
        },
        no_cleanup,
    )
}

#[test]
pub fn compiler_initialization() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            assert!(!fixture.jvmci.is_compiler_initialized());
            fixture.jvmci.initialize_compiler(fixture.thread);
            fixture.jvmci.initialize_compiler(fixture.thread);
            assert!(fixture.jvmci.is_compiler_initialized());
            assert!(fixture.jvmci.compiler_runtime().is_initialized());
            assert_eq!(with_host(|host| host.heap.call_count("HotSpotJVMCIRuntime.getCompiler")), 1);

            fixture.jvmci.shutdown(fixture.thread);
            assert!(fixture.jvmci.shutdown_called());
            assert!(with_host(|host| host.heap.was_called("HotSpotJVMCIRuntime.shutdown")));
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "VM exited with status -1")]
pub fn failing_compiler_initialization_exits() {
    with_mockvm(
        default_setup,
        || {
            with_host(|host| host.heap.get_compiler_failure = Some("no compiler".to_string()));
            let fixture = JVMCIFixture::create();
            fixture.jvmci.initialize_compiler(fixture.thread);
        },
        no_cleanup,
    )
}

#[test]
pub fn compilation_level_adjustment() {
    with_mockvm(
        default_setup,
        || {
            with_host(|host| {
                host.heap.comp_level_adjustment = CompLevelAdjustment::ByFullSignature as i32;
                host.heap.adjusted_level = Some(2);
            });
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let runtime = fixture.jvmci.compiler_runtime();

            // Nothing is asked before the runtime exists
            assert_eq!(runtime.adjust_comp_level(&env, method.method, false, 3), 3);
            runtime.get_hotspot_jvmci_runtime(&env).unwrap();
            assert_eq!(runtime.comp_level_adjustment(), CompLevelAdjustment::ByFullSignature);

            assert_eq!(runtime.adjust_comp_level(&env, method.method, false, 3), 2);
            assert!(!with_host(|host| host.thread(fixture.thread).adjusting_comp_level));
            let calls = || with_host(|host| host.heap.call_count("HotSpotJVMCIRuntime.adjustCompilationLevel"));
            assert_eq!(calls(), 1);

            // Not a level
            with_host(|host| host.heap.adjusted_level = Some(9));
            assert_eq!(runtime.adjust_comp_level(&env, method.method, false, 3), 3);
            assert_eq!(calls(), 2);

            // A nested request keeps the level without asking
            with_host(|host| host.thread(fixture.thread).adjusting_comp_level = true);
            assert_eq!(runtime.adjust_comp_level(&env, method.method, false, 3), 3);
            assert_eq!(calls(), 2);
        },
        no_cleanup,
    )
}

#[test]
pub fn compilation_level_adjustment_disabled() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let method = MethodFixture::create();
            let env = fixture.env();
            let runtime = fixture.jvmci.compiler_runtime();
            runtime.get_hotspot_jvmci_runtime(&env).unwrap();
            assert_eq!(runtime.comp_level_adjustment(), CompLevelAdjustment::None);
            assert_eq!(runtime.adjust_comp_level(&env, method.method, true, 4), 4);
            assert!(!with_host(|host| host.heap.was_called("HotSpotJVMCIRuntime.adjustCompilationLevel")));
        },
        no_cleanup,
    )
}
