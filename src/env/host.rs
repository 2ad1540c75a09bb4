use std::marker::PhantomData;

use super::access::{check_index, check_range, HeapAccess};
use super::classes::{JVMCIClass, JVMCIField, JVMCIMethod};
use super::error::{ExceptionKind, JVMCIError, JVMCIResult, ThrownException};
use super::object::{HandleStrength, JVMCIHandle, JVMCIObject, Mode};
use crate::util::{ObjectReference, VMThread};
use crate::vm::{BasicType, HostValue, MethodKind, PrimitiveValue, VMBinding, VMResult, Value};

/// Direct access to objects in the host heap.
pub(crate) struct HostAccess<VM: VMBinding> {
    thread: VMThread,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> HostAccess<VM> {
    pub fn new(thread: VMThread) -> Self {
        Self {
            thread,
            phantom: PhantomData,
        }
    }

    /// Turn a failed host call into an error carrying the exception it left pending.
    pub(crate) fn check<T>(&self, result: VMResult<T>) -> JVMCIResult<T> {
        result.map_err(|_| match self.take_pending_exception() {
            Some(exception) => JVMCIError::Exception(describe_host_exception::<VM>(exception)),
            None => JVMCIError::Internal("host call failed without a pending exception".to_string()),
        })
    }

    fn non_null(object: Option<ObjectReference>) -> JVMCIResult<ObjectReference> {
        object.ok_or_else(JVMCIError::null_pointer)
    }
}

/// Classify a host throwable and read its message.
pub(crate) fn describe_host_exception<VM: VMBinding>(exception: ObjectReference) -> ThrownException {
    let kind = ExceptionKind::CLASSIFICATION_ORDER
        .iter()
        .copied()
        .find(|kind| kind.class_name().is_some_and(|name| VM::is_instance_of(exception, name)))
        .unwrap_or(ExceptionKind::Other);
    ThrownException {
        kind,
        message: VM::throwable_message(exception),
        throwable: Some(JVMCIObject::from_host(exception)),
    }
}

impl<VM: VMBinding> HeapAccess for HostAccess<VM> {
    type Ref = ObjectReference;

    const MODE: Mode = Mode::Host;

    fn wrap(r: ObjectReference) -> JVMCIObject {
        JVMCIObject::from_host(r)
    }

    fn unwrap(object: JVMCIObject) -> JVMCIResult<ObjectReference> {
        object.as_host().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Host,
            found: object.mode(),
        })
    }

    fn get_array_length(&self, array: ObjectReference) -> JVMCIResult<i32> {
        Ok(VM::array_length(array))
    }

    fn get_object_at(&self, array: ObjectReference, index: i32) -> JVMCIResult<Option<ObjectReference>> {
        check_index(index, VM::array_length(array))?;
        match VM::array_load(array, index) {
            Value::Object(o) => Ok(o),
            other => Err(JVMCIError::Internal(format!("expected an object element, got {:?}", other))),
        }
    }

    fn put_object_at(&self, array: ObjectReference, index: i32, value: Option<ObjectReference>) -> JVMCIResult<()> {
        check_index(index, VM::array_length(array))?;
        VM::array_store(array, index, Value::Object(value));
        Ok(())
    }

    fn get_primitive_at(&self, array: ObjectReference, ty: BasicType, index: i32) -> JVMCIResult<PrimitiveValue> {
        check_index(index, VM::array_length(array))?;
        VM::array_load(array, index)
            .as_primitive()
            .filter(|v| v.basic_type() == ty)
            .ok_or_else(|| JVMCIError::Internal(format!("expected a {} element", ty.java_name())))
    }

    fn put_primitive_at(&self, array: ObjectReference, index: i32, value: PrimitiveValue) -> JVMCIResult<()> {
        check_index(index, VM::array_length(array))?;
        VM::array_store(array, index, Value::Primitive(value));
        Ok(())
    }

    fn copy_bytes_to(&self, src: ObjectReference, dest: &mut [u8], offset: i32) -> JVMCIResult<()> {
        check_range(offset, dest.len(), VM::array_length(src))?;
        VM::array_copy_out(src, offset, dest);
        Ok(())
    }

    fn copy_bytes_from(&self, src: &[u8], dest: ObjectReference, offset: i32) -> JVMCIResult<()> {
        check_range(offset, src.len(), VM::array_length(dest))?;
        VM::array_copy_in(dest, offset, src);
        Ok(())
    }

    fn new_object_array(&self, element_class: JVMCIClass, length: i32) -> JVMCIResult<ObjectReference> {
        self.check(VM::new_object_array(self.thread, element_class.name(), length))
    }

    fn new_primitive_array(&self, ty: BasicType, length: i32) -> JVMCIResult<ObjectReference> {
        self.check(VM::new_primitive_array(self.thread, ty, length))
    }

    fn create_box(&self, value: PrimitiveValue) -> JVMCIResult<ObjectReference> {
        self.check(VM::box_primitive(self.thread, value))
    }

    fn get_boxed_value(&self, object: ObjectReference) -> JVMCIResult<Option<PrimitiveValue>> {
        Ok(VM::unbox_primitive(object))
    }

    fn create_string(&self, s: &str) -> JVMCIResult<ObjectReference> {
        self.check(VM::new_string(self.thread, s))
    }

    fn as_utf8_string(&self, s: ObjectReference) -> JVMCIResult<String> {
        Ok(VM::string_value(s))
    }

    fn make_local(&self, object: ObjectReference) -> JVMCIResult<ObjectReference> {
        // Host objects are always reachable from the thread's handle area while in use
        VM::new_local_handle(self.thread, Some(object));
        Ok(object)
    }

    fn make_handle(&self, object: ObjectReference, strength: HandleStrength) -> JVMCIResult<JVMCIHandle> {
        let handle = match strength {
            HandleStrength::Global => VM::new_global_handle(Some(object)),
            HandleStrength::Weak => VM::new_weak_handle(Some(object)),
        };
        Ok(JVMCIHandle::host(handle, strength))
    }

    fn resolve_handle(&self, handle: &JVMCIHandle) -> JVMCIResult<Option<ObjectReference>> {
        let address = handle.host_address().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Host,
            found: handle.mode(),
        })?;
        Ok(VM::resolve_handle(address))
    }

    fn destroy_handle(&self, handle: JVMCIHandle) -> JVMCIResult<()> {
        let address = handle.host_address().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Host,
            found: handle.mode(),
        })?;
        match handle.strength() {
            HandleStrength::Global => VM::destroy_global_handle(address),
            HandleStrength::Weak => VM::destroy_weak_handle(address),
        }
        Ok(())
    }

    fn equals(&self, a: Option<ObjectReference>, b: Option<ObjectReference>) -> bool {
        a == b
    }

    fn new_throwable(&self, kind: ExceptionKind, message: Option<&str>) -> JVMCIResult<ObjectReference> {
        let class = kind
            .class_name()
            .ok_or_else(|| JVMCIError::Internal("cannot create an exception of unknown class".to_string()))?;
        self.check(VM::new_throwable(self.thread, class, message))
    }

    fn throw(&self, throwable: ObjectReference) {
        VM::set_pending_exception(self.thread, throwable);
    }

    fn describe_exception(&self, throwable: ObjectReference) {
        VM::describe_exception(self.thread, throwable);
        // Printing may itself raise. Such an exception is of no interest.
        VM::clear_pending_exception(self.thread);
    }

    fn take_pending_exception(&self) -> Option<ObjectReference> {
        let exception = VM::pending_exception(self.thread);
        if exception.is_some() {
            VM::clear_pending_exception(self.thread);
        }
        exception
    }

    fn get_field(&self, field: JVMCIField, object: Option<ObjectReference>) -> JVMCIResult<HostValue> {
        let descriptor = field.descriptor();
        if !descriptor.is_static {
            Self::non_null(object)?;
        }
        Ok(VM::get_field(object, &descriptor))
    }

    fn set_field(&self, field: JVMCIField, object: Option<ObjectReference>, value: HostValue) -> JVMCIResult<()> {
        let descriptor = field.descriptor();
        if !descriptor.is_static {
            Self::non_null(object)?;
        }
        VM::set_field(object, &descriptor, value);
        Ok(())
    }

    fn call(
        &self,
        method: JVMCIMethod,
        receiver: Option<ObjectReference>,
        args: &[HostValue],
    ) -> JVMCIResult<HostValue> {
        let descriptor = method.descriptor();
        if descriptor.kind == MethodKind::Virtual {
            Self::non_null(receiver)?;
        }
        trace!("Calling {}.{}{} in the host heap", descriptor.class, descriptor.name, descriptor.signature);
        self.check(VM::call_method(self.thread, &descriptor, receiver, args))
    }

    fn is_instance_of(&self, object: ObjectReference, class: JVMCIClass) -> JVMCIResult<bool> {
        Ok(VM::is_instance_of(object, class.name()))
    }

    fn class_name(&self, object: ObjectReference) -> JVMCIResult<String> {
        Ok(VM::class_name_of(object))
    }
}
