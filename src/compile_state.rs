//! The state of one compilation request.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use crate::vm::{JvmtiCapabilities, MethodRef, NMethodRef, VMBinding};

/// The longest failure reason kept. Longer reasons are truncated.
pub const MAX_FAILURE_REASON_LENGTH: usize = 256;

/// A failure reason kept inline, truncated on a character boundary.
#[derive(Copy, Clone)]
struct FailureReason {
    bytes: [u8; MAX_FAILURE_REASON_LENGTH],
    len: usize,
}

impl FailureReason {
    fn new(reason: &str) -> Self {
        let mut len = reason.len().min(MAX_FAILURE_REASON_LENGTH);
        while !reason.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; MAX_FAILURE_REASON_LENGTH];
        bytes[..len].copy_from_slice(&reason.as_bytes()[..len]);
        Self { bytes, len }
    }

    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }
}

/// The state of one compilation: what was snapshotted when it started and how it ended.
///
/// The snapshot is taken when the state is created. At install time, [`JVMCICompileState::jvmti_state_changed`]
/// tells whether a debugging capability was enabled in between, and the modification counter tells
/// whether any class was loaded.
pub struct JVMCICompileState<VM: VMBinding> {
    method: MethodRef,
    entry_bci: i32,
    compile_id: i32,
    comp_level: i32,
    jvmti_capabilities: JvmtiCapabilities,
    system_dictionary_modification_counter: u64,
    failure_reason: RefCell<Option<FailureReason>>,
    retryable: Cell<bool>,
    /// The nmethod installed by this compilation.
    code: Cell<Option<NMethodRef>>,
    num_inlined_bytecodes: Cell<i32>,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> JVMCICompileState<VM> {
    pub fn new(method: MethodRef, entry_bci: i32, compile_id: i32, comp_level: i32) -> Self {
        Self {
            method,
            entry_bci,
            compile_id,
            comp_level,
            jvmti_capabilities: VM::jvmti_capabilities(),
            system_dictionary_modification_counter: VM::system_dictionary_modification_counter(),
            failure_reason: RefCell::new(None),
            retryable: Cell::new(true),
            code: Cell::new(None),
            num_inlined_bytecodes: Cell::new(0),
            phantom: PhantomData,
        }
    }

    pub fn method(&self) -> MethodRef {
        self.method
    }

    pub fn entry_bci(&self) -> i32 {
        self.entry_bci
    }

    pub fn compile_id(&self) -> i32 {
        self.compile_id
    }

    pub fn comp_level(&self) -> i32 {
        self.comp_level
    }

    pub fn jvmti_can_hotswap_or_post_breakpoint(&self) -> bool {
        self.jvmti_capabilities.can_hotswap_or_post_breakpoint
    }

    pub fn jvmti_can_access_local_variables(&self) -> bool {
        self.jvmti_capabilities.can_access_local_variables
    }

    pub fn jvmti_can_post_on_exceptions(&self) -> bool {
        self.jvmti_capabilities.can_post_on_exceptions
    }

    pub fn jvmti_can_pop_frame(&self) -> bool {
        self.jvmti_capabilities.can_pop_frame
    }

    pub fn system_dictionary_modification_counter(&self) -> u64 {
        self.system_dictionary_modification_counter
    }

    /// Has a capability that changes the shape of compiled code been enabled since the compilation
    /// started? A capability that was disabled does not count.
    pub fn jvmti_state_changed(&self) -> bool {
        let now = VM::jvmti_capabilities();
        let was = &self.jvmti_capabilities;
        (!was.can_access_local_variables && now.can_access_local_variables)
            || (!was.can_hotswap_or_post_breakpoint && now.can_hotswap_or_post_breakpoint)
            || (!was.can_post_on_exceptions && now.can_post_on_exceptions)
            || (!was.can_pop_frame && now.can_pop_frame)
    }

    /// Record why the compilation failed. A later failure replaces an earlier one.
    pub fn set_failure(&self, reason: &str, retryable: bool) {
        let failure = FailureReason::new(reason);
        debug!("Compilation {} failed: {} (retryable: {})", self.compile_id, failure.as_str(), retryable);
        *self.failure_reason.borrow_mut() = Some(failure);
        self.retryable.set(retryable);
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.borrow().as_ref().map(|f| f.as_str().to_string())
    }

    pub fn retryable(&self) -> bool {
        self.retryable.get()
    }

    pub fn is_failed(&self) -> bool {
        self.failure_reason.borrow().is_some()
    }

    pub fn code(&self) -> Option<NMethodRef> {
        self.code.get()
    }

    pub(crate) fn set_code(&self, nm: NMethodRef) {
        self.code.set(Some(nm));
    }

    pub fn num_inlined_bytecodes(&self) -> i32 {
        self.num_inlined_bytecodes.get()
    }

    pub(crate) fn set_num_inlined_bytecodes(&self, n: i32) {
        self.num_inlined_bytecodes.set(n);
    }
}
