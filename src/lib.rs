#![allow(clippy::new_without_default)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

//! JVMCI is the runtime side of a compiler interface: it lets a JIT compiler written in Java, or
//! compiled ahead of time into a shared library, compile methods for a host virtual machine and
//! install the resulting code into the VM's code cache.
//!
//! The crate is VM agnostic. A host VM implements [`vm::VMBinding`] to expose its threads, heap,
//! code cache and class hierarchy, builds a [`JVMCI`] context with [`JVMCIBuilder`], and then
//! enters the runtime through:
//! * [`runtime::JVMCIRuntime`] to start the compiler and request compilations,
//! * [`compiler_to_vm`] for the services the compiler calls back into,
//! * [`runtime::stubs`] for the slow paths of compiled code,
//! * [`code::CodeInstaller`] for turning compiled code into nmethods.
//!
//! Every operation on a compiler-side object goes through a [`env::JVMCIEnv`], which hides whether
//! the compiler's heap is the host heap or a separate one.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod build_info;
pub mod code;
pub mod compile_state;
pub mod compiler_to_vm;
pub mod env;
pub(crate) mod global_state;
mod jvmci;
pub mod metadata_handles;
pub mod nmethod_data;
pub mod runtime;
pub mod util;
pub mod vm;

pub use crate::jvmci::CodeInstallResult;
pub use crate::jvmci::JVMCIBuilder;
pub use crate::jvmci::JVMCI;
