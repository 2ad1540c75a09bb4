//! Utilities shared by the rest of the runtime.

/// Address and object reference types of the host heap.
pub mod address;
/// The JVM bytecode set, as far as the runtime needs to decode it.
pub mod bytecodes;
/// Options of the compiler that the runtime validates and forwards.
pub mod compiler_options;
/// Open hash tables with a pluggable key.
pub mod hashtable;
/// The built-in logger.
pub mod logger;
/// Pointers the runtime carries around but never dereferences.
pub mod opaque_pointer;
/// Runtime options.
pub mod options;
/// Test utilities. The mock VM is only compiled with the `mock_test` feature.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::opaque_pointer::*;
