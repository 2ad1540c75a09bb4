use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

/// This stores the global states of a JVMCI instance.
// Components that only need the counters (the compile driver, the installer, the compiler-side
// API) take a reference to this struct instead of the whole context.
pub struct GlobalState {
    /// Whether the compiler has been initialized. Set the first time a compiler runtime finishes
    /// `HotSpotJVMCIRuntime.getCompiler()`.
    pub(crate) initialized: AtomicBool,
    /// Is the compiler compiling itself before the application starts?
    pub(crate) bootstrapping: AtomicBool,
    /// Has a compilation request been handled since bootstrapping started? Bootstrapping waits for
    /// this before it considers the compile queue drained.
    pub(crate) bootstrap_compilation_request_handled: AtomicBool,
    /// Number of methods successfully compiled.
    pub(crate) methods_compiled: AtomicUsize,
    /// Total time spent installing code, in nanoseconds.
    pub(crate) code_install_time_ns: AtomicU64,
    /// Number of code installs, successful or not.
    pub(crate) code_installs: AtomicUsize,
    /// The last compile id handed out by `allocate_compile_id`.
    pub(crate) last_compile_id: AtomicI32,
    /// Array allocations seen by the allocation stubs under `deoptimize_a_lot`.
    pub(crate) new_array_allocations: AtomicUsize,
}

impl GlobalState {
    /// Is the compiler initialized?
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    /// Start or end bootstrapping. Starting resets the request-handled flag.
    pub fn set_bootstrapping(&self, value: bool) {
        if value {
            self.bootstrap_compilation_request_handled
                .store(false, Ordering::Release);
        }
        self.bootstrapping.store(value, Ordering::Release);
    }

    pub fn bootstrap_compilation_request_handled(&self) -> bool {
        self.bootstrap_compilation_request_handled
            .load(Ordering::Acquire)
    }

    pub fn set_bootstrap_compilation_request_handled(&self) {
        self.bootstrap_compilation_request_handled
            .store(true, Ordering::Release);
    }

    pub fn methods_compiled(&self) -> usize {
        self.methods_compiled.load(Ordering::Relaxed)
    }

    /// Increase the number of compiled methods and return the number after increasing.
    pub fn inc_methods_compiled(&self) -> usize {
        self.methods_compiled.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Account one code install that took `nanos` nanoseconds.
    pub fn record_code_install(&self, nanos: u64) {
        self.code_installs.fetch_add(1, Ordering::Relaxed);
        let total = self.code_install_time_ns.fetch_add(nanos, Ordering::Relaxed) + nanos;
        trace!(
            "Code install took {}ns, {}ns over {} installs",
            nanos,
            total,
            self.code_installs.load(Ordering::Relaxed)
        );
    }

    pub fn code_install_time_ns(&self) -> u64 {
        self.code_install_time_ns.load(Ordering::Relaxed)
    }

    pub fn code_installs(&self) -> usize {
        self.code_installs.load(Ordering::Relaxed)
    }

    /// Hand out a new compile id.
    pub fn allocate_compile_id(&self) -> i32 {
        self.last_compile_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count an array allocation under `deoptimize_a_lot`. Every second one deoptimizes its caller.
    pub fn should_deopt_new_array(&self) -> bool {
        self.new_array_allocations.fetch_add(1, Ordering::Relaxed) % 2 == 1
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            bootstrapping: AtomicBool::new(false),
            bootstrap_compilation_request_handled: AtomicBool::new(false),
            methods_compiled: AtomicUsize::new(0),
            code_install_time_ns: AtomicU64::new(0),
            code_installs: AtomicUsize::new(0),
            last_compile_id: AtomicI32::new(0),
            new_array_allocations: AtomicUsize::new(0),
        }
    }
}
