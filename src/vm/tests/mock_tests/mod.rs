// Mock tests can be placed anywhere in the source directory `src` or the test directory `tests`.
// * They need to be conditional compiled when the feature `mock_test` is enabled. Otherwise they cannot access `MockVM`.
// * They should have the prefix 'mock_test_' in their file name so they will be picked up by the CI testing scripts.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::env::*;
    pub use crate::util::test_util::fixtures::*;
    pub use crate::util::test_util::mock_method::*;
    pub use crate::util::test_util::mock_vm::host::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::{Address, ObjectReference, VMThread};
    pub use crate::vm::*;
    pub use crate::{CodeInstallResult, JVMCIBuilder, JVMCI};
}

mod mock_test_allocation_stubs;
mod mock_test_compile_method;
mod mock_test_compiler_to_vm;
mod mock_test_exception_handler;
mod mock_test_global_handles;
mod mock_test_install_code;
mod mock_test_logging_stubs;
mod mock_test_nmethod_data;
mod mock_test_read_configuration;
mod mock_test_remote_runtime;
mod mock_test_translate;
