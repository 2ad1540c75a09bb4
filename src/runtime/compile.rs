use super::JVMCIRuntime;
use crate::code::Dependencies;
use crate::compile_state::JVMCICompileState;
use crate::env::{JVMCIEnv, JVMCIError, JVMCIField, JVMCIObject, JVMCIResult};
use crate::jvmci::CodeInstallResult;
use crate::nmethod_data::NMethodData;
use crate::vm::{CodeBlobDescription, MethodRef, NMethodRef, VMBinding, INVOCATION_ENTRY_BCI};

/// The outcome of registering an nmethod.
#[derive(Debug)]
pub struct RegisteredMethod {
    pub result: CodeInstallResult,
    /// The new nmethod, if one was created.
    pub nmethod: Option<NMethodRef>,
    /// Why the install failed, for the compiler.
    pub failure_detail: Option<String>,
}

impl<VM: VMBinding> JVMCIRuntime<VM> {
    /// Run one compilation request through `HotSpotJVMCIRuntime.compileMethod`. The outcome is
    /// recorded in the environment's compile state.
    pub fn compile_method(&self, env: &JVMCIEnv<VM>, method: MethodRef, entry_bci: i32) {
        let state = match env.compile_state() {
            Some(state) => state,
            None => VM::fatal("compile_method requires a compilation environment"),
        };
        let global = env.jvmci().state();
        let is_osr = entry_bci != INVOCATION_ENTRY_BCI;
        if global.is_bootstrapping() && is_osr {
            // The compiler is too slow for OSR while it is compiling itself, and bootstrapping
            // does not run endless loops
            state.set_failure("No OSR during boostrap", true);
            return;
        }

        let receiver = match self.get_hotspot_jvmci_runtime(env) {
            Ok(receiver) => receiver,
            Err(e) => self.exit_on_pending_exception(env, Some(&e), "Error creating the JVMCI runtime"),
        };

        let result = env.get_jvmci_method(method).and_then(|jvmci_method| {
            // The compiler hands the address of the compile state back to the VM
            let state_address = state as *const JVMCICompileState<VM> as i64;
            env.call_hotspot_jvmci_runtime_compile_method(receiver, jvmci_method, entry_bci, state_address, state.compile_id())
        });
        match result.and_then(|r| self.record_compilation_result(env, state, r)) {
            Ok(()) => {}
            Err(e) => {
                // The compiler should handle its own exceptions. Report one that leaked instead of
                // ignoring it.
                env.describe_exception(&e);
                state.set_failure("unexpected exception thrown", false);
            }
        }

        if global.is_bootstrapping() {
            global.set_bootstrap_compilation_request_handled();
        }
    }

    fn record_compilation_result(
        &self,
        env: &JVMCIEnv<VM>,
        state: &JVMCICompileState<VM>,
        result: Option<JVMCIObject>,
    ) -> JVMCIResult<()> {
        let result = match result {
            Some(result) => result,
            None => {
                error!("JVMCICompiler.compileMethod returned null");
                state.set_failure("compileMethod returned null", false);
                return Ok(());
            }
        };
        let message = env.get_object_field(JVMCIField::HotSpotCompilationRequestResultFailureMessage, result)?;
        if let Some(message) = message {
            let reason = env.as_utf8_string(message)?;
            let retry = env.get_bool_field(JVMCIField::HotSpotCompilationRequestResultRetry, result)?;
            state.set_failure(&reason, retry);
        } else if state.code().is_none() {
            state.set_failure("no nmethod produced", true);
        } else {
            let inlined = env.get_int_field(JVMCIField::HotSpotCompilationRequestResultInlinedBytecodes, result)?;
            state.set_num_inlined_bytecodes(inlined);
            env.jvmci().state().inc_methods_compiled();
        }
        Ok(())
    }

    /// Register the code of a compilation as an nmethod of `method` and, for a default install,
    /// make it the method's code. The dependencies are checked under the compile lock, so no class
    /// can be loaded between the check and the install.
    pub fn register_method(
        &self,
        env: &JVMCIEnv<VM>,
        method: MethodRef,
        blob: &CodeBlobDescription,
        nmethod_mirror: JVMCIObject,
        speculation_log: Option<JVMCIObject>,
    ) -> JVMCIResult<RegisteredMethod> {
        if !env.is_hotspot_nmethod(nmethod_mirror)? {
            return Err(JVMCIError::illegal_argument("installed code must be a HotSpotNmethod"));
        }
        let install_default = env.get_bool_field(JVMCIField::HotSpotNmethodIsDefault, nmethod_mirror)?;
        let data = NMethodData::new(env, nmethod_mirror, speculation_log, !install_default)?;
        let compile_state = env.compile_state();

        let (result, nmethod, failure_detail, cache_full) = VM::with_compile_lock(|| {
            for dependency in blob.dependencies.iter() {
                trace!("Dependency of {}: {:?}", blob.name, dependency);
            }
            let (result, failure_detail) = validate_compile_task_dependencies::<VM>(blob.dependencies, compile_state);
            if result != CodeInstallResult::Ok {
                // Not a real deoptimization, but a preemptive decompile
                VM::increment_decompile_count(method);
                return (result, None, failure_detail, false);
            }

            let nm = match VM::register_nmethod(blob) {
                Some(nm) => nm,
                None => return (CodeInstallResult::CacheFull, None, None, true),
            };
            // The compile state learns about the nmethod before it is published
            if let Some(state) = compile_state {
                state.set_code(nm);
            }
            if install_default {
                if blob.entry_bci == INVOCATION_ENTRY_BCI {
                    if let Some(old) = VM::method_code(method) {
                        debug!("Replacing method {}", VM::method_name(method));
                        VM::make_not_entrant(old);
                    }
                    debug!(
                        "Installing method ({}) {} [entry point: {:?}]",
                        blob.comp_level,
                        VM::method_name(method),
                        VM::nmethod_state(nm).verified_entry_point
                    );
                    VM::set_method_code(method, nm);
                } else {
                    debug!(
                        "Installing osr method ({}) {} @ {}",
                        blob.comp_level,
                        VM::method_name(method),
                        blob.entry_bci
                    );
                    VM::add_osr_nmethod(method, nm);
                }
            }
            (CodeInstallResult::Ok, Some(nm), None, false)
        });

        if cache_full {
            warn!("CodeCache is full while installing {}", blob.name);
            VM::handle_full_code_cache();
        }

        match nmethod {
            Some(nm) => env.jvmci().register_nmethod_data(nm, data),
            None => data.destroy(env.jvmci(), env.thread()),
        }

        Ok(RegisteredMethod {
            result,
            nmethod,
            failure_detail,
        })
    }
}

/// Check the dependencies of a compilation against the current class hierarchy. A debugging
/// capability enabled during the compilation fails the install outright, since the debug info may
/// not have the shape the capability needs.
pub(crate) fn validate_compile_task_dependencies<VM: VMBinding>(
    dependencies: &Dependencies,
    compile_state: Option<&JVMCICompileState<VM>>,
) -> (CodeInstallResult, Option<String>) {
    if let Some(state) = compile_state {
        if state.jvmti_state_changed() {
            return (
                CodeInstallResult::DependenciesFailed,
                Some("Jvmti state change during compilation invalidated dependencies".to_string()),
            );
        }
    }

    // Without a compile state there is no snapshot, so assume the hierarchy changed
    let counter_changed = compile_state.map_or(true, |state| {
        state.system_dictionary_modification_counter() != VM::system_dictionary_modification_counter()
    });
    match dependencies.validate::<VM>(counter_changed) {
        None => (CodeInstallResult::Ok, None),
        Some(failure) => {
            let result = if !failure.dependency.is_klass_type() || counter_changed {
                CodeInstallResult::DependenciesFailed
            } else {
                // Nothing was loaded, so the dependency was wrong from the start
                CodeInstallResult::DependenciesInvalid
            };
            (result, Some(failure.detail))
        }
    }
}
