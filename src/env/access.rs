use std::fmt::Debug;

use super::classes::{JVMCIClass, JVMCIField, JVMCIMethod};
use super::error::{ExceptionKind, JVMCIResult};
use super::object::{HandleStrength, JVMCIHandle, JVMCIObject, Mode};
use crate::vm::{BasicType, PrimitiveValue, Value};

/// The operations an environment performs on compiler-side objects. There is one implementation
/// per heap: [`super::host::HostAccess`] works on host objects directly and
/// [`super::remote::RemoteAccess`] goes through the JNI-shaped boundary. Both report a raised
/// exception as `Err`, never as a null result.
pub(crate) trait HeapAccess {
    /// How a reference to an object in this heap is represented.
    type Ref: Copy + PartialEq + Debug;

    const MODE: Mode;

    fn wrap(r: Self::Ref) -> JVMCIObject;

    /// Unwrap a reference, rejecting references from the other heap.
    fn unwrap(object: JVMCIObject) -> JVMCIResult<Self::Ref>;

    fn wrap_value(v: Value<Option<Self::Ref>>) -> Value<Option<JVMCIObject>> {
        v.map_object(|o| o.map(Self::wrap))
    }

    fn unwrap_value(v: Value<Option<JVMCIObject>>) -> JVMCIResult<Value<Option<Self::Ref>>> {
        Ok(match v {
            Value::Object(Some(o)) => Value::Object(Some(Self::unwrap(o)?)),
            Value::Object(None) => Value::Object(None),
            Value::Primitive(p) => Value::Primitive(p),
            Value::Void => Value::Void,
        })
    }

    // The same conversions as methods, so code generic over the accessor can name them through a
    // value of the accessor type.

    fn to_ref(&self, object: JVMCIObject) -> JVMCIResult<Self::Ref> {
        Self::unwrap(object)
    }

    fn to_ref_opt(&self, object: Option<JVMCIObject>) -> JVMCIResult<Option<Self::Ref>> {
        object.map(Self::unwrap).transpose()
    }

    fn to_object(&self, r: Self::Ref) -> JVMCIObject {
        Self::wrap(r)
    }

    fn to_object_opt(&self, r: Option<Self::Ref>) -> Option<JVMCIObject> {
        r.map(Self::wrap)
    }

    fn to_values(&self, values: &[Value<Option<JVMCIObject>>]) -> JVMCIResult<Vec<Value<Option<Self::Ref>>>> {
        values.iter().map(|v| Self::unwrap_value(*v)).collect()
    }

    fn to_jvmci_value(&self, v: Value<Option<Self::Ref>>) -> Value<Option<JVMCIObject>> {
        Self::wrap_value(v)
    }

    // --- Arrays ---

    fn get_array_length(&self, array: Self::Ref) -> JVMCIResult<i32>;
    fn get_object_at(&self, array: Self::Ref, index: i32) -> JVMCIResult<Option<Self::Ref>>;
    fn put_object_at(&self, array: Self::Ref, index: i32, value: Option<Self::Ref>) -> JVMCIResult<()>;
    fn get_primitive_at(&self, array: Self::Ref, ty: BasicType, index: i32) -> JVMCIResult<PrimitiveValue>;
    fn put_primitive_at(&self, array: Self::Ref, index: i32, value: PrimitiveValue) -> JVMCIResult<()>;
    /// Copy `dest.len()` bytes out of a `byte[]`, starting at `offset`.
    fn copy_bytes_to(&self, src: Self::Ref, dest: &mut [u8], offset: i32) -> JVMCIResult<()>;
    /// Copy bytes into a `byte[]`, starting at `offset`.
    fn copy_bytes_from(&self, src: &[u8], dest: Self::Ref, offset: i32) -> JVMCIResult<()>;
    fn new_object_array(&self, element_class: JVMCIClass, length: i32) -> JVMCIResult<Self::Ref>;
    fn new_primitive_array(&self, ty: BasicType, length: i32) -> JVMCIResult<Self::Ref>;

    // --- Boxes and strings ---

    fn create_box(&self, value: PrimitiveValue) -> JVMCIResult<Self::Ref>;
    /// The value of a box. `None` if the object is not a box.
    fn get_boxed_value(&self, object: Self::Ref) -> JVMCIResult<Option<PrimitiveValue>>;
    fn create_string(&self, s: &str) -> JVMCIResult<Self::Ref>;
    fn as_utf8_string(&self, s: Self::Ref) -> JVMCIResult<String>;

    // --- References ---

    fn make_local(&self, object: Self::Ref) -> JVMCIResult<Self::Ref>;
    fn make_handle(&self, object: Self::Ref, strength: HandleStrength) -> JVMCIResult<JVMCIHandle>;
    /// The object a handle refers to. `None` if a weak handle was cleared.
    fn resolve_handle(&self, handle: &JVMCIHandle) -> JVMCIResult<Option<Self::Ref>>;
    fn destroy_handle(&self, handle: JVMCIHandle) -> JVMCIResult<()>;
    fn equals(&self, a: Option<Self::Ref>, b: Option<Self::Ref>) -> bool;

    // --- Exceptions ---

    fn new_throwable(&self, kind: ExceptionKind, message: Option<&str>) -> JVMCIResult<Self::Ref>;
    /// Make the throwable the pending exception of this heap.
    fn throw(&self, throwable: Self::Ref);
    /// Print the throwable and its stack trace. Secondary exceptions are swallowed.
    fn describe_exception(&self, throwable: Self::Ref);
    /// Take the pending exception of this heap, if any, clearing it.
    fn take_pending_exception(&self) -> Option<Self::Ref>;

    // --- Fields and calls of the well-known classes ---

    /// Read a field. `object` is `None` for a static field.
    fn get_field(&self, field: JVMCIField, object: Option<Self::Ref>) -> JVMCIResult<Value<Option<Self::Ref>>>;
    fn set_field(&self, field: JVMCIField, object: Option<Self::Ref>, value: Value<Option<Self::Ref>>) -> JVMCIResult<()>;
    /// Call a method. `receiver` is `None` for a static method. For a constructor, the new object
    /// is returned.
    fn call(
        &self,
        method: JVMCIMethod,
        receiver: Option<Self::Ref>,
        args: &[Value<Option<Self::Ref>>],
    ) -> JVMCIResult<Value<Option<Self::Ref>>>;
    fn is_instance_of(&self, object: Self::Ref, class: JVMCIClass) -> JVMCIResult<bool>;
    /// The name of the object's class, in internal form.
    fn class_name(&self, object: Self::Ref) -> JVMCIResult<String>;
}

/// Check an array index the way the VM does before touching an element.
pub(crate) fn check_index(index: i32, length: i32) -> JVMCIResult<()> {
    if index < 0 || index >= length {
        Err(super::JVMCIError::new(
            ExceptionKind::ArrayIndexOutOfBoundsException,
            format!("Index {} out of bounds for length {}", index, length),
        ))
    } else {
        Ok(())
    }
}

/// Check a range of array elements.
pub(crate) fn check_range(offset: i32, count: usize, length: i32) -> JVMCIResult<()> {
    let end = offset as i64 + count as i64;
    if offset < 0 || end > length as i64 {
        Err(super::JVMCIError::new(
            ExceptionKind::ArrayIndexOutOfBoundsException,
            format!("Range [{}, {}) out of bounds for length {}", offset, end, length),
        ))
    } else {
        Ok(())
    }
}
