//! The JVMCI instance: everything the runtime keeps for the lifetime of the VM.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::build_info;
use crate::env::{JVMCIEnv, Mode};
use crate::global_state::GlobalState;
use crate::metadata_handles::MetadataHandles;
use crate::nmethod_data::NMethodData;
use crate::runtime::shared_library::SharedLibrary;
use crate::runtime::JVMCIRuntime;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference, VMThread};
use crate::vm::{MetadataRef, NMethodRef, RemoteJavaVM, VMBinding};

/// The outcome of installing code. The values are the ones the compiler side expects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CodeInstallResult {
    Ok = 0,
    /// A dependency was invalidated by a class loaded during the compilation.
    DependenciesFailed = 1,
    /// A dependency never held. The compiled code is wrong.
    DependenciesInvalid = 2,
    CacheFull = 3,
    CodeTooLarge = 4,
}

impl CodeInstallResult {
    pub fn from_i32(value: i32) -> Option<CodeInstallResult> {
        Some(match value {
            0 => CodeInstallResult::Ok,
            1 => CodeInstallResult::DependenciesFailed,
            2 => CodeInstallResult::DependenciesInvalid,
            3 => CodeInstallResult::CacheFull,
            4 => CodeInstallResult::CodeTooLarge,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Build a [`JVMCI`] instance. Options are set before building, either from the environment (the
/// `JVMCI_` variables read by [`Options::default`]) or with [`JVMCIBuilder::set_option`].
pub struct JVMCIBuilder {
    pub options: Options,
    remote_vm: Option<Arc<dyn RemoteJavaVM>>,
    tty: Option<DebugOutput>,
}

/// Where the logging stubs and `CompilerToVM.writeDebugOutput` print to.
pub type DebugOutput = Arc<Mutex<dyn Write + Send>>;

impl Default for JVMCIBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JVMCIBuilder {
    pub fn new() -> Self {
        JVMCIBuilder {
            options: Options::default(),
            remote_vm: None,
            tty: None,
        }
    }

    /// Set an option by its HotSpot flag name, e.g. `JVMCIUseFastLocking`, or by its snake case
    /// name. Returns false if the option is unknown or the value is invalid.
    pub fn set_option(&mut self, name: &str, value: &str) -> bool {
        self.options.set_from_camelcase_str(name, value)
    }

    /// Use an embedded VM that is already running as the compiler runtime, instead of loading
    /// `jvmci_lib_path`.
    pub fn set_remote_vm(&mut self, vm: Arc<dyn RemoteJavaVM>) {
        self.remote_vm = Some(vm);
    }

    /// Print debug output to `out` instead of the error stream.
    pub fn set_debug_output(&mut self, out: DebugOutput) {
        self.tty = Some(out);
    }

    pub fn build<VM: VMBinding>(&self) -> Result<JVMCI<VM>, String> {
        let mut options = self.options.clone();
        options.check_consistent()?;
        info!("Building {}", *build_info::JVMCI_FULL_VERSION);

        let mut shared_library = None;
        let remote_runtime = if options.use_jvmci_native_library || self.remote_vm.is_some() {
            let vm = match &self.remote_vm {
                Some(vm) => vm.clone(),
                None => {
                    let library = SharedLibrary::load(&options)?;
                    let vm = library.java_vm();
                    shared_library = Some(library);
                    vm
                }
            };
            Some(JVMCIRuntime::new_remote(vm))
        } else {
            None
        };

        let state = GlobalState::default();
        if options.use_jvmci_compiler && options.bootstrap_jvmci {
            state.set_bootstrapping(true);
        }
        Ok(JVMCI {
            options,
            state,
            metadata_handles: MetadataHandles::new(),
            java_runtime: JVMCIRuntime::new_host(),
            remote_runtime,
            shared_library,
            nmethod_data: Mutex::new(HashMap::new()),
            release_queue: Mutex::new(Vec::new()),
            object_handles: Mutex::new(HashSet::new()),
            tty: self
                .tty
                .clone()
                .unwrap_or_else(|| -> DebugOutput { Arc::new(Mutex::new(std::io::stderr())) }),
        })
    }
}

/// The JVMCI instance. There is one per VM. It is shared by every thread and passed to every
/// entry point of the runtime.
pub struct JVMCI<VM: VMBinding> {
    pub options: Options,
    state: GlobalState,
    metadata_handles: MetadataHandles,
    /// The runtime in the host heap, used by Java code running in the VM.
    java_runtime: JVMCIRuntime<VM>,
    /// The runtime in the shared library heap, if the compiler is loaded from a shared library.
    remote_runtime: Option<JVMCIRuntime<VM>>,
    shared_library: Option<SharedLibrary>,
    nmethod_data: Mutex<HashMap<NMethodRef, NMethodData>>,
    /// Data of freed nmethods whose destruction must call into the remote heap.
    release_queue: Mutex<Vec<NMethodData>>,
    /// Global handles created for object constants handed to a remote compiler.
    object_handles: Mutex<HashSet<Address>>,
    tty: DebugOutput,
}

impl<VM: VMBinding> JVMCI<VM> {
    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn metadata_handles(&self) -> &MetadataHandles {
        &self.metadata_handles
    }

    pub fn java_runtime(&self) -> &JVMCIRuntime<VM> {
        &self.java_runtime
    }

    /// The runtime compilation requests go to.
    pub fn compiler_runtime(&self) -> &JVMCIRuntime<VM> {
        self.remote_runtime.as_ref().unwrap_or(&self.java_runtime)
    }

    /// The runtime of the given heap.
    pub fn runtime_for(&self, mode: Mode) -> &JVMCIRuntime<VM> {
        match mode {
            Mode::Host => &self.java_runtime,
            Mode::Remote => match &self.remote_runtime {
                Some(runtime) => runtime,
                None => VM::fatal("No JVMCI shared library runtime"),
            },
        }
    }

    pub fn has_remote_runtime(&self) -> bool {
        self.remote_runtime.is_some()
    }

    pub fn shared_library(&self) -> Option<&SharedLibrary> {
        self.shared_library.as_ref()
    }

    /// Print to the debug output. Output errors are ignored.
    pub fn print_tty(&self, s: &str) {
        self.write_tty(s.as_bytes());
    }

    pub fn write_tty(&self, bytes: &[u8]) {
        let mut tty = self.tty.lock().unwrap_or_else(|e| e.into_inner());
        let _ = tty.write_all(bytes);
    }

    pub fn flush_tty(&self) {
        let mut tty = self.tty.lock().unwrap_or_else(|e| e.into_inner());
        let _ = tty.flush();
    }

    // --- Compiler lifecycle ---

    pub fn is_compiler_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    /// Create the compiler in the compiler runtime. A failure is fatal.
    pub fn initialize_compiler(&self, thread: VMThread) {
        if self.is_compiler_initialized() {
            return;
        }
        let runtime = self.compiler_runtime();
        let env = JVMCIEnv::for_thread(self, thread);
        if let Err(e) = runtime.call_get_compiler(&env) {
            runtime.exit_on_pending_exception(&env, Some(&e), "Error initializing the JVMCI compiler");
        }
        self.state.set_initialized();
    }

    /// Tell the compiler that bootstrapping is done.
    pub fn bootstrap_finished(&self, thread: VMThread) {
        self.state.set_bootstrapping(false);
        let env = JVMCIEnv::for_thread(self, thread);
        if let Err(e) = self.compiler_runtime().bootstrap_finished(&env) {
            env.describe_exception(&e);
        }
    }

    /// Shut down both runtimes. Exceptions are printed and otherwise ignored.
    pub fn shutdown(&self, thread: VMThread) {
        let mut modes = vec![Mode::Host];
        if self.remote_runtime.is_some() {
            modes.push(Mode::Remote);
        }
        for mode in modes {
            let runtime = self.runtime_for(mode);
            if !runtime.is_hotspot_jvmci_runtime_initialized() {
                runtime.mark_shutdown();
                continue;
            }
            let env = JVMCIEnv::with_mode(self, thread, mode);
            if let Err(e) = runtime.shutdown(&env) {
                env.describe_exception(&e);
            }
        }
    }

    pub fn shutdown_called(&self) -> bool {
        self.compiler_runtime().shutdown_called()
    }

    // --- Object constants ---

    /// Create a global handle for an object constant handed to the compiler.
    pub fn make_global(&self, object: ObjectReference) -> Address {
        let handle = VM::new_global_handle(Some(object));
        self.object_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle);
        handle
    }

    pub fn is_global_handle(&self, handle: Address) -> bool {
        self.object_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&handle)
    }

    /// Destroy a handle created by [`JVMCI::make_global`]. Returns false if it is not one.
    pub fn destroy_global(&self, handle: Address) -> bool {
        let removed = self
            .object_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        if removed {
            VM::destroy_global_handle(handle);
        }
        removed
    }

    pub fn global_handle_count(&self) -> usize {
        self.object_handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    // --- NMethod data ---

    pub fn register_nmethod_data(&self, nm: NMethodRef, data: NMethodData) {
        let previous = self
            .nmethod_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(nm, data);
        if let Some(previous) = previous {
            // The nmethod was freed without telling us
            warn!("Replacing stale NMethodData of {:?}", nm);
            self.release_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(previous);
        }
    }

    pub fn has_nmethod_data(&self, nm: NMethodRef) -> bool {
        self.nmethod_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&nm)
    }

    /// Run `f` on the data of an nmethod. `None` if the nmethod was not installed by the runtime.
    pub fn with_nmethod_data<R, F: FnOnce(&mut NMethodData) -> R>(&self, nm: NMethodRef, f: F) -> Option<R> {
        let mut map = self.nmethod_data.lock().unwrap_or_else(|e| e.into_inner());
        map.get_mut(&nm).map(f)
    }

    /// Called by the code cache when an nmethod is freed. Data that references the remote heap
    /// is queued, since this may run in a GC pause.
    pub fn nmethod_freed(&self, thread: VMThread, nm: NMethodRef) {
        let data = self
            .nmethod_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&nm);
        let data = match data {
            Some(data) => data,
            None => return,
        };
        if data.needs_deferred_release() {
            trace!("Deferring release of NMethodData of {:?}", nm);
            self.release_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(data);
        } else {
            data.destroy(self, thread);
        }
    }

    /// Destroy the data queued by [`JVMCI::nmethod_freed`]. Must not be called in a GC pause.
    pub fn release_queued_nmethod_data(&self, thread: VMThread) {
        let queued: Vec<NMethodData> = std::mem::take(&mut *self.release_queue.lock().unwrap_or_else(|e| e.into_inner()));
        if !queued.is_empty() {
            debug!("Releasing {} queued NMethodData", queued.len());
        }
        for data in queued {
            data.destroy(self, thread);
        }
    }

    pub fn queued_nmethod_data(&self) -> usize {
        self.release_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Bring the mirror of an nmethod up to date after its state changed.
    pub fn invalidate_nmethod_mirror(&self, thread: VMThread, nm: NMethodRef) {
        let mut map = self.nmethod_data.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = map.get_mut(&nm) {
            data.invalidate_mirror(self, thread, nm);
        }
    }

    /// Record the failed speculation of a deoptimization in the speculation log of the nmethod.
    pub fn update_speculation(&self, thread: VMThread, nm: NMethodRef) {
        let mut map = self.nmethod_data.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = map.get_mut(&nm) {
            data.update_speculation(self, thread);
        }
    }

    // --- GC hooks ---

    /// Visit the metadata held by the compiler.
    pub fn metadata_do<F: FnMut(MetadataRef)>(&self, visitor: F) {
        self.metadata_handles.metadata_do(visitor);
    }

    /// Called after class unloading.
    pub fn do_unloading(&self, unloading_occurred: bool) {
        if unloading_occurred {
            self.metadata_handles.do_unloading(VM::metadata_is_unloading);
        }
    }

    /// Called while the GC unloads nmethods. Makes nmethods whose mirror died not entrant.
    pub fn update_nmethod_mirrors_in_gc(&self) {
        let mut map = self.nmethod_data.lock().unwrap_or_else(|e| e.into_inner());
        for (nm, data) in map.iter_mut() {
            data.update_nmethod_mirror_in_gc::<VM>(*nm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::serial_test;

    #[test]
    fn install_result_values() {
        for value in 0..5 {
            let result = CodeInstallResult::from_i32(value).unwrap();
            assert_eq!(result.as_i32(), value);
        }
        assert_eq!(CodeInstallResult::from_i32(5), None);
        assert_eq!(CodeInstallResult::CacheFull as i32, 3);
    }

    #[test]
    fn builder_rejects_inconsistent_options() {
        serial_test(|| {
            let mut builder = JVMCIBuilder::new();
            assert!(builder.set_option("EnableJVMCI", "false"));
            assert!(builder.set_option("JVMCIUseFastLocking", "false"));
            assert!(builder.options.check_consistent().is_err());
        })
    }
}
