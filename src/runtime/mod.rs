//! A compiler runtime: one `HotSpotJVMCIRuntime` instance living in one heap.
//!
//! There is always a runtime in the host heap (the one Java code in the VM sees). When the compiler
//! is loaded from a shared library, a second runtime lives in the library's heap and compilation
//! requests go there.

mod compile;
pub mod shared_library;
pub mod stubs;

pub use self::compile::RegisteredMethod;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use atomic::Atomic;
use bytemuck::NoUninit;

use crate::env::{
    ExceptionKind, JVMCIEnv, JVMCIError, JVMCIField, JVMCIHandle, JVMCIObject, JVMCIResult, Mode, RemoteIds,
};
use crate::vm::{BasicType, MethodRef, RemoteEnv, RemoteJavaVM, VMBinding};

/// How `HotSpotJVMCIRuntime.adjustCompilationLevel` is consulted. The values are those of the
/// `compilationLevelAdjustment` field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
#[repr(i32)]
pub enum CompLevelAdjustment {
    /// Never consult the compiler.
    None = 0,
    /// Pass only the holder of the method.
    ByHolder = 1,
    /// Pass the holder, name and signature of the method.
    ByFullSignature = 2,
}

impl CompLevelAdjustment {
    fn from_i32(value: i32) -> CompLevelAdjustment {
        match value {
            1 => CompLevelAdjustment::ByHolder,
            2 => CompLevelAdjustment::ByFullSignature,
            _ => CompLevelAdjustment::None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    BeingInitialized,
    Initialized,
}

/// Set by the first thread that reports a fatal pending exception.
static REPORTING_PENDING_EXCEPTION: AtomicBool = AtomicBool::new(false);

/// How long a thread that lost the race to report a pending exception waits for the winner to
/// finish printing before exiting.
const REPORT_WAIT: Duration = Duration::from_millis(200);

pub struct JVMCIRuntime<VM: VMBinding> {
    mode: Mode,
    remote_vm: Option<Arc<dyn RemoteJavaVM>>,
    remote_ids: spin::Once<RemoteIds>,
    init_state: Mutex<InitState>,
    init_cond: Condvar,
    /// A global handle to the `HotSpotJVMCIRuntime` object, once it was created.
    hotspot_runtime: Mutex<Option<JVMCIHandle>>,
    comp_level_adjustment: Atomic<CompLevelAdjustment>,
    shutdown_called: AtomicBool,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> JVMCIRuntime<VM> {
    /// A runtime in the host heap.
    pub fn new_host() -> Self {
        Self::new(Mode::Host, None)
    }

    /// A runtime in the heap of an embedded VM.
    pub fn new_remote(vm: Arc<dyn RemoteJavaVM>) -> Self {
        Self::new(Mode::Remote, Some(vm))
    }

    fn new(mode: Mode, remote_vm: Option<Arc<dyn RemoteJavaVM>>) -> Self {
        JVMCIRuntime {
            mode,
            remote_vm,
            remote_ids: spin::Once::new(),
            init_state: Mutex::new(InitState::Uninitialized),
            init_cond: Condvar::new(),
            hotspot_runtime: Mutex::new(None),
            comp_level_adjustment: Atomic::new(CompLevelAdjustment::None),
            shutdown_called: AtomicBool::new(false),
            phantom: PhantomData,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Attach the current thread to the embedded VM. `None` for a host runtime or if attaching fails.
    pub fn attach_current_thread(&self) -> Option<Box<dyn RemoteEnv>> {
        self.remote_vm.as_ref()?.attach_current_thread()
    }

    /// The JNI ids of the well-known classes, looked up through `env` the first time they are needed.
    /// On failure, the name of the missing class or member is returned.
    pub(crate) fn remote_ids(&self, env: &dyn RemoteEnv) -> Result<&RemoteIds, String> {
        self.remote_ids.try_call_once(|| RemoteIds::resolve(env))
    }

    pub fn is_initialized(&self) -> bool {
        *self.init_state.lock().unwrap_or_else(|e| e.into_inner()) == InitState::Initialized
    }

    pub fn comp_level_adjustment(&self) -> CompLevelAdjustment {
        self.comp_level_adjustment.load(Ordering::Relaxed)
    }

    pub fn shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }

    /// Record a shutdown of a runtime whose `HotSpotJVMCIRuntime` was never created.
    pub(crate) fn mark_shutdown(&self) {
        self.shutdown_called.store(true, Ordering::SeqCst);
    }

    /// Make the runtime ready for use. Threads racing to initialize wait for the first one. A
    /// failed initialization can be retried.
    pub fn initialize(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        {
            let mut state = self.init_state.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                match *state {
                    InitState::Initialized => return Ok(()),
                    InitState::BeingInitialized => {
                        state = self.init_cond.wait(state).unwrap_or_else(|e| e.into_inner());
                    }
                    InitState::Uninitialized => break,
                }
            }
            *state = InitState::BeingInitialized;
        }

        debug!("Initializing {} JVMCI runtime", self.mode);
        let result = self.create_primitive_types(env);

        let mut state = self.init_state.lock().unwrap_or_else(|e| e.into_inner());
        *state = if result.is_ok() {
            InitState::Initialized
        } else {
            InitState::Uninitialized
        };
        self.init_cond.notify_all();
        result
    }

    /// The mirrors of the primitive types are created eagerly, so later lookups cannot fail.
    fn create_primitive_types(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        use strum::IntoEnumIterator;
        for ty in BasicType::iter().filter(|t| t.is_primitive() || *t == BasicType::Void) {
            env.get_jvmci_primitive_type(ty)?;
        }
        Ok(())
    }

    pub fn is_hotspot_jvmci_runtime_initialized(&self) -> bool {
        self.hotspot_runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Create the `HotSpotJVMCIRuntime` object if it does not exist yet.
    pub fn initialize_hotspot_jvmci_runtime(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        if self.is_hotspot_jvmci_runtime_initialized() {
            return Ok(());
        }
        self.initialize(env)?;
        let runtime = env.call_hotspot_jvmci_runtime_runtime()?;
        let adjustment = env.get_int_field(JVMCIField::HotSpotJVMCIRuntimeCompilationLevelAdjustment, runtime)?;
        self.comp_level_adjustment
            .store(CompLevelAdjustment::from_i32(adjustment), Ordering::Relaxed);
        let handle = env.make_global(runtime)?;

        let mut slot = self.hotspot_runtime.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            // Another thread got there first
            drop(slot);
            env.destroy_handle(handle)?;
        } else {
            info!("Created the {} HotSpotJVMCIRuntime", self.mode);
            *slot = Some(handle);
        }
        Ok(())
    }

    /// The `HotSpotJVMCIRuntime` object, created on first use.
    pub fn get_hotspot_jvmci_runtime(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<JVMCIObject> {
        self.initialize_hotspot_jvmci_runtime(env)?;
        self.existing_hotspot_jvmci_runtime(env)?
            .ok_or_else(|| JVMCIError::Internal("HotSpotJVMCIRuntime was not created".to_string()))
    }

    /// The `HotSpotJVMCIRuntime` object if it was created, without creating it.
    fn existing_hotspot_jvmci_runtime(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<Option<JVMCIObject>> {
        let handle = *self.hotspot_runtime.lock().unwrap_or_else(|e| e.into_inner());
        match handle {
            Some(handle) => env.resolve_handle(&handle),
            None => Ok(None),
        }
    }

    /// `HotSpotJVMCIRuntime.getCompiler()`, which makes the runtime select and create its compiler.
    pub fn call_get_compiler(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        let runtime = self.get_hotspot_jvmci_runtime(env)?;
        env.call_hotspot_jvmci_runtime_get_compiler(runtime)
    }

    /// Tell the runtime that the VM is shutting down. Only a runtime that was created is told.
    pub fn shutdown(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        self.shutdown_called.store(true, Ordering::SeqCst);
        if let Some(runtime) = self.existing_hotspot_jvmci_runtime(env)? {
            debug!("Shutting down the {} HotSpotJVMCIRuntime", self.mode);
            env.call_hotspot_jvmci_runtime_shutdown(runtime)?;
        }
        Ok(())
    }

    pub fn bootstrap_finished(&self, env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
        if let Some(runtime) = self.existing_hotspot_jvmci_runtime(env)? {
            env.call_hotspot_jvmci_runtime_bootstrap_finished(runtime)?;
        }
        Ok(())
    }

    /// Let the compiler change the tier a method is compiled at. Any failure leaves the level as
    /// it was.
    pub fn adjust_comp_level(&self, env: &JVMCIEnv<VM>, method: MethodRef, is_osr: bool, level: i32) -> i32 {
        if env.jvmci().state().is_bootstrapping() || !self.is_hotspot_jvmci_runtime_initialized() {
            return level;
        }
        let adjustment = self.comp_level_adjustment();
        if adjustment == CompLevelAdjustment::None {
            return level;
        }

        let thread = env.thread();
        // The compiler may run code that asks for its own compilation level to be adjusted
        if VM::adjusting_comp_level(thread) {
            return level;
        }
        VM::set_adjusting_comp_level(thread, true);
        let result = self.call_adjust_comp_level(env, method, is_osr, level, adjustment);
        VM::set_adjusting_comp_level(thread, false);

        match result {
            Ok(adjusted) if (0..=4).contains(&adjusted) => adjusted,
            Ok(adjusted) => {
                warn!(
                    "{} is not a valid compilation level, keeping {} for {}",
                    adjusted,
                    level,
                    VM::method_name(method)
                );
                level
            }
            Err(e) => {
                env.describe_exception(&e);
                level
            }
        }
    }

    fn call_adjust_comp_level(
        &self,
        env: &JVMCIEnv<VM>,
        method: MethodRef,
        is_osr: bool,
        level: i32,
        adjustment: CompLevelAdjustment,
    ) -> JVMCIResult<i32> {
        let runtime = self.get_hotspot_jvmci_runtime(env)?;
        let holder = env.get_jvmci_type(VM::method_holder(method))?;
        let (name, signature) = if adjustment == CompLevelAdjustment::ByFullSignature {
            (
                Some(env.create_string(&VM::method_name(method))?),
                Some(env.create_string(&VM::method_signature(method))?),
            )
        } else {
            (None, None)
        };
        env.call_hotspot_jvmci_runtime_adjust_compilation_level(runtime, holder, name, signature, is_osr, level)
    }

    /// Report an error that leaves the runtime unusable and exit the VM. Only the first thread to
    /// get here prints; the others wait for it to finish.
    pub fn exit_on_pending_exception(&self, env: &JVMCIEnv<VM>, error: Option<&JVMCIError>, message: &str) -> ! {
        let first = REPORTING_PENDING_EXCEPTION
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            error!("{}", message);
            match error {
                Some(e) => env.describe_exception(e),
                None => {
                    if let Some(exception) = env.take_pending_exception() {
                        env.describe_exception(&JVMCIError::Exception(exception));
                    }
                }
            }
        } else {
            std::thread::sleep(REPORT_WAIT);
        }
        VM::exit_vm(-1)
    }

    /// Create an `InternalError` that says the runtime is not enabled.
    pub fn not_enabled_error() -> JVMCIError {
        // The message is matched by the compiler side
        JVMCIError::new(ExceptionKind::InternalError, "JVMCI is not enabled")
    }

    /// Drop the JNI ids. Only needed when the embedded VM outlives this runtime.
    pub fn release_remote_ids(&mut self, env: &dyn RemoteEnv) {
        if let Some(ids) = self.remote_ids.get_mut() {
            ids.release(env);
        }
    }
}
