//! The JNI-shaped boundary to a compiler runtime that lives in another heap.
//!
//! A [`RemoteJavaVM`] is an embedded VM (usually created inside a shared library) and a
//! [`RemoteEnv`] is one thread's view of it, with the same operations and the same rules as a JNI
//! `JNIEnv`: references are opaque handles, local references live until the enclosing local frame
//! is popped, and an exception raised by a call stays pending until it is checked and cleared.

use std::fmt;
use std::num::NonZeroUsize;

use super::types::{BasicType, Value};
use crate::util::Address;

/// A reference into the remote heap (a `jobject`). Null is represented by `None`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRef(NonZeroUsize);

// `Option<RemoteRef>` is passed across the boundary as a plain `jobject`.
static_assertions::assert_eq_size!(Option<RemoteRef>, usize);

impl RemoteRef {
    pub fn from_raw(raw: usize) -> Option<RemoteRef> {
        NonZeroUsize::new(raw).map(RemoteRef)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RemoteRef({:#x})", self.0)
    }
}

/// A resolved field id (`jfieldID`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldId(pub NonZeroUsize);

/// A resolved method id (`jmethodID`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(pub NonZeroUsize);

/// A value passed to or returned from the remote side.
pub type JValue = Value<Option<RemoteRef>>;

/// A native method to bind to a Java `native` declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeMethod {
    pub name: String,
    pub signature: String,
    pub fn_ptr: Address,
}

/// One thread's interface to the remote heap. Every operation may leave an exception pending,
/// which the caller detects with [`RemoteEnv::exception_check`].
pub trait RemoteEnv {
    // --- Local frames ---

    /// Push a frame for local references. Returns false if the frame could not be allocated, in
    /// which case an `OutOfMemoryError` is pending.
    fn push_local_frame(&self, capacity: i32) -> bool;
    /// Pop the current local frame, freeing all its local references. `result` is carried over into
    /// the enclosing frame and the new local reference to it is returned.
    fn pop_local_frame(&self, result: Option<RemoteRef>) -> Option<RemoteRef>;

    // --- Exceptions ---

    fn exception_check(&self) -> bool;
    fn exception_occurred(&self) -> Option<RemoteRef>;
    fn exception_clear(&self);
    /// Print the pending exception and its stack trace to the error stream, then clear it.
    fn exception_describe(&self);
    fn throw(&self, throwable: RemoteRef) -> bool;
    fn throw_new(&self, class: RemoteRef, message: &str) -> bool;

    // --- Classes and members ---

    /// Find a class by its internal name, e.g. `jdk/vm/ci/code/InstalledCode`.
    fn find_class(&self, name: &str) -> Option<RemoteRef>;
    fn get_field_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<FieldId>;
    fn get_method_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<MethodId>;
    fn is_instance_of(&self, object: RemoteRef, class: RemoteRef) -> bool;
    fn get_object_class(&self, object: RemoteRef) -> RemoteRef;
    fn register_natives(&self, class: RemoteRef, methods: &[NativeMethod]) -> bool;

    // --- Fields and calls ---

    fn get_field(&self, object: RemoteRef, field: FieldId, ty: BasicType) -> JValue;
    fn set_field(&self, object: RemoteRef, field: FieldId, value: JValue);
    fn get_static_field(&self, class: RemoteRef, field: FieldId, ty: BasicType) -> JValue;
    fn set_static_field(&self, class: RemoteRef, field: FieldId, value: JValue);
    fn new_object(&self, class: RemoteRef, constructor: MethodId, args: &[JValue]) -> Option<RemoteRef>;
    fn call_static_method(&self, class: RemoteRef, method: MethodId, ret: BasicType, args: &[JValue]) -> JValue;
    fn call_method(&self, object: RemoteRef, method: MethodId, ret: BasicType, args: &[JValue]) -> JValue;

    // --- Arrays and strings ---

    fn get_array_length(&self, array: RemoteRef) -> i32;
    fn new_object_array(&self, length: i32, element_class: RemoteRef) -> Option<RemoteRef>;
    fn get_object_array_element(&self, array: RemoteRef, index: i32) -> Option<RemoteRef>;
    fn set_object_array_element(&self, array: RemoteRef, index: i32, value: Option<RemoteRef>);
    fn new_primitive_array(&self, ty: BasicType, length: i32) -> Option<RemoteRef>;
    /// Copy elements `[start, start + buf.len() / element_size)` into `buf`, little-endian.
    fn get_primitive_array_region(&self, array: RemoteRef, ty: BasicType, start: i32, buf: &mut [u8]);
    fn set_primitive_array_region(&self, array: RemoteRef, ty: BasicType, start: i32, buf: &[u8]);
    fn new_string_utf(&self, s: &str) -> Option<RemoteRef>;
    fn get_string_utf(&self, s: RemoteRef) -> String;

    // --- References ---

    fn new_local_ref(&self, object: RemoteRef) -> Option<RemoteRef>;
    fn delete_local_ref(&self, object: RemoteRef);
    fn new_global_ref(&self, object: RemoteRef) -> Option<RemoteRef>;
    fn delete_global_ref(&self, object: RemoteRef);
    fn new_weak_global_ref(&self, object: RemoteRef) -> Option<RemoteRef>;
    fn delete_weak_global_ref(&self, object: RemoteRef);
    /// Identity comparison. A cleared weak reference is the same object as null.
    fn is_same_object(&self, a: Option<RemoteRef>, b: Option<RemoteRef>) -> bool;
}

/// An embedded VM that hosts a compiler runtime in its own heap.
pub trait RemoteJavaVM: Send + Sync {
    /// Attach the current thread to the VM (a no-op if it is already attached) and return its
    /// environment. Returns `None` if the thread cannot be attached.
    fn attach_current_thread(&self) -> Option<Box<dyn RemoteEnv>>;
    fn detach_current_thread(&self);
}
