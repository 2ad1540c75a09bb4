use crate::util::Address;
use libc::c_void;

/// A VM-owned pointer the runtime only passes back to the VM, such as a `JavaThread*` or the
/// `JavaVM*` of the shared library.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OpaquePointer(*mut c_void);

// Never dereferenced here.
unsafe impl Sync for OpaquePointer {}
unsafe impl Send for OpaquePointer {}

impl Default for OpaquePointer {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl OpaquePointer {
    pub const UNINITIALIZED: Self = Self(std::ptr::null_mut());

    pub fn from_address(addr: Address) -> Self {
        OpaquePointer(addr.to_mut_ptr::<c_void>())
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// The `JavaThread` an operation runs on. Handed back to [`crate::vm::VMBinding`] whenever the
/// VM needs that thread's pending exception, vm result or JNI environment.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct VMThread(pub OpaquePointer);
