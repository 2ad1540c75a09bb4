//! The interface between the runtime and the host VM.
//!
//! A host VM implements [`VMBinding`] to give the runtime access to its threads, heap, code cache
//! and class hierarchy. When the compiler runs in a separate heap (usually a shared library), that
//! heap is reached through the JNI-shaped [`RemoteEnv`].

mod remote;
mod types;
mod vmbinding;

pub use self::remote::*;
pub use self::types::*;
pub use self::vmbinding::VMBinding;

#[cfg(test)]
mod tests;
