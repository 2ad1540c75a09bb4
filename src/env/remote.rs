use enum_map::EnumMap;
use strum::IntoEnumIterator;

use super::access::{check_index, check_range, HeapAccess};
use super::classes::{JVMCIClass, JVMCIField, JVMCIMethod, BOXED_TYPES};
use super::error::{ExceptionKind, JVMCIError, JVMCIResult, ThrownException};
use super::object::{HandleStrength, JVMCIHandle, JVMCIObject, Mode};
use crate::vm::{BasicType, FieldId, JValue, MethodId, MethodKind, PrimitiveValue, RemoteEnv, RemoteRef, Value};

/// The JNI ids of the well-known classes, fields and methods in one remote heap. Classes are held
/// as global references so they stay valid across local frames.
#[derive(Default)]
pub(crate) struct RemoteIds {
    classes: EnumMap<JVMCIClass, Option<RemoteRef>>,
    fields: EnumMap<JVMCIField, Option<FieldId>>,
    methods: EnumMap<JVMCIMethod, Option<MethodId>>,
    exceptions: EnumMap<ExceptionKind, Option<RemoteRef>>,
}

impl RemoteIds {
    /// Look up every class, field and method. Fails with the name of the first one that is missing.
    pub fn resolve(env: &dyn RemoteEnv) -> Result<RemoteIds, String> {
        let mut ids = RemoteIds::default();
        for class in JVMCIClass::iter() {
            ids.classes[class] = Some(Self::global_class(env, class.name())?);
        }
        for kind in ExceptionKind::iter() {
            if let Some(name) = kind.class_name() {
                ids.exceptions[kind] = Some(Self::global_class(env, name)?);
            }
        }
        for field in JVMCIField::iter() {
            let d = field.descriptor();
            let class = ids.classes[field.class()].ok_or_else(|| d.class.to_string())?;
            let id = env.get_field_id(class, d.name, d.signature, d.is_static);
            if env.exception_check() {
                env.exception_clear();
            }
            ids.fields[field] = Some(id.ok_or_else(|| format!("{}.{}:{}", d.class, d.name, d.signature))?);
        }
        for method in JVMCIMethod::iter() {
            let d = method.descriptor();
            let class = ids.classes[method.class()].ok_or_else(|| d.class.to_string())?;
            let id = env.get_method_id(class, d.name, d.signature, d.kind == MethodKind::Static);
            if env.exception_check() {
                env.exception_clear();
            }
            ids.methods[method] = Some(id.ok_or_else(|| format!("{}.{}{}", d.class, d.name, d.signature))?);
        }
        debug!(
            "Resolved {} classes, {} fields and {} methods in the remote heap",
            ids.classes.len(),
            ids.fields.len(),
            ids.methods.len()
        );
        Ok(ids)
    }

    fn global_class(env: &dyn RemoteEnv, name: &str) -> Result<RemoteRef, String> {
        let local = env.find_class(name);
        if env.exception_check() {
            env.exception_clear();
        }
        let local = local.ok_or_else(|| name.to_string())?;
        let global = env.new_global_ref(local).ok_or_else(|| name.to_string());
        env.delete_local_ref(local);
        global
    }

    pub fn class(&self, class: JVMCIClass) -> JVMCIResult<RemoteRef> {
        self.classes[class]
            .ok_or_else(|| JVMCIError::Internal(format!("class {} is not resolved", class.name())))
    }

    pub fn field(&self, field: JVMCIField) -> JVMCIResult<FieldId> {
        self.fields[field].ok_or_else(|| JVMCIError::Internal(format!("field {:?} is not resolved", field)))
    }

    pub fn method(&self, method: JVMCIMethod) -> JVMCIResult<MethodId> {
        self.methods[method].ok_or_else(|| JVMCIError::Internal(format!("method {:?} is not resolved", method)))
    }

    pub fn exception_class(&self, kind: ExceptionKind) -> JVMCIResult<RemoteRef> {
        self.exceptions[kind]
            .ok_or_else(|| JVMCIError::Internal(format!("exception class {:?} is not resolved", kind)))
    }

    /// Release the global references. Only used when the remote VM is torn down.
    pub fn release(&mut self, env: &dyn RemoteEnv) {
        for class in self.classes.values_mut().chain(self.exceptions.values_mut()) {
            if let Some(global) = class.take() {
                env.delete_global_ref(global);
            }
        }
    }
}

/// Access to objects in a remote heap through a thread's [`RemoteEnv`].
pub(crate) struct RemoteAccess<'a> {
    env: &'a dyn RemoteEnv,
    ids: &'a RemoteIds,
}

impl<'a> RemoteAccess<'a> {
    pub fn new(env: &'a dyn RemoteEnv, ids: &'a RemoteIds) -> Self {
        Self { env, ids }
    }

    pub fn env(&self) -> &'a dyn RemoteEnv {
        self.env
    }

    /// Turn an exception left pending by the last call into an error. A result is only trusted
    /// after this returns `Ok`, since null is also a legitimate result.
    fn check(&self) -> JVMCIResult<()> {
        if !self.env.exception_check() {
            return Ok(());
        }
        match self.take_pending_exception() {
            Some(throwable) => Err(JVMCIError::Exception(self.describe_remote_exception(throwable))),
            None => Err(JVMCIError::Internal("exception check failed without an exception".to_string())),
        }
    }

    fn checked<T>(&self, result: T) -> JVMCIResult<T> {
        self.check().map(|_| result)
    }

    /// Like [`RemoteAccess::checked`] for calls that must return an object.
    fn checked_non_null(&self, result: Option<RemoteRef>, what: &str) -> JVMCIResult<RemoteRef> {
        self.check()?;
        result.ok_or_else(|| JVMCIError::Internal(format!("{} returned null without an exception", what)))
    }

    /// Classify a remote throwable and read its message. An exception raised while reading the
    /// message is discarded.
    pub fn describe_remote_exception(&self, throwable: RemoteRef) -> ThrownException {
        let kind = ExceptionKind::CLASSIFICATION_ORDER
            .iter()
            .copied()
            .find(|kind| {
                self.ids
                    .exception_class(*kind)
                    .map(|class| self.env.is_instance_of(throwable, class))
                    .unwrap_or(false)
            })
            .unwrap_or(ExceptionKind::Other);
        let message = self.ids.method(JVMCIMethod::ThrowableGetMessage).ok().and_then(|id| {
            let message = self.env.call_method(throwable, id, BasicType::Object, &[]);
            if self.env.exception_check() {
                self.env.exception_clear();
                return None;
            }
            message.as_object().flatten().map(|s| self.env.get_string_utf(s))
        });
        ThrownException {
            kind,
            message,
            throwable: Some(JVMCIObject::from_remote(throwable)),
        }
    }

    fn non_null(object: Option<RemoteRef>) -> JVMCIResult<RemoteRef> {
        object.ok_or_else(JVMCIError::null_pointer)
    }
}

impl<'a> HeapAccess for RemoteAccess<'a> {
    type Ref = RemoteRef;

    const MODE: Mode = Mode::Remote;

    fn wrap(r: RemoteRef) -> JVMCIObject {
        JVMCIObject::from_remote(r)
    }

    fn unwrap(object: JVMCIObject) -> JVMCIResult<RemoteRef> {
        object.as_remote().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Remote,
            found: object.mode(),
        })
    }

    fn get_array_length(&self, array: RemoteRef) -> JVMCIResult<i32> {
        let length = self.env.get_array_length(array);
        self.checked(length)
    }

    fn get_object_at(&self, array: RemoteRef, index: i32) -> JVMCIResult<Option<RemoteRef>> {
        check_index(index, self.get_array_length(array)?)?;
        let element = self.env.get_object_array_element(array, index);
        self.checked(element)
    }

    fn put_object_at(&self, array: RemoteRef, index: i32, value: Option<RemoteRef>) -> JVMCIResult<()> {
        check_index(index, self.get_array_length(array)?)?;
        self.env.set_object_array_element(array, index, value);
        self.check()
    }

    fn get_primitive_at(&self, array: RemoteRef, ty: BasicType, index: i32) -> JVMCIResult<PrimitiveValue> {
        check_index(index, self.get_array_length(array)?)?;
        let mut buf = [0u8; 8];
        let size = ty.element_size();
        self.env.get_primitive_array_region(array, ty, index, &mut buf[..size]);
        self.check()?;
        PrimitiveValue::from_le_bytes(ty, &buf[..size])
            .ok_or_else(|| JVMCIError::Internal(format!("{} is not a primitive element type", ty.java_name())))
    }

    fn put_primitive_at(&self, array: RemoteRef, index: i32, value: PrimitiveValue) -> JVMCIResult<()> {
        check_index(index, self.get_array_length(array)?)?;
        self.env
            .set_primitive_array_region(array, value.basic_type(), index, &value.to_le_bytes());
        self.check()
    }

    fn copy_bytes_to(&self, src: RemoteRef, dest: &mut [u8], offset: i32) -> JVMCIResult<()> {
        check_range(offset, dest.len(), self.get_array_length(src)?)?;
        self.env.get_primitive_array_region(src, BasicType::Byte, offset, dest);
        self.check()
    }

    fn copy_bytes_from(&self, src: &[u8], dest: RemoteRef, offset: i32) -> JVMCIResult<()> {
        check_range(offset, src.len(), self.get_array_length(dest)?)?;
        self.env.set_primitive_array_region(dest, BasicType::Byte, offset, src);
        self.check()
    }

    fn new_object_array(&self, element_class: JVMCIClass, length: i32) -> JVMCIResult<RemoteRef> {
        let array = self.env.new_object_array(length, self.ids.class(element_class)?);
        self.checked_non_null(array, "NewObjectArray")
    }

    fn new_primitive_array(&self, ty: BasicType, length: i32) -> JVMCIResult<RemoteRef> {
        let array = self.env.new_primitive_array(ty, length);
        self.checked_non_null(array, "New<Type>Array")
    }

    fn create_box(&self, value: PrimitiveValue) -> JVMCIResult<RemoteRef> {
        let ty = value.basic_type();
        let (class, method) = match (JVMCIClass::box_of(ty), JVMCIMethod::box_value_of(ty)) {
            (Some(c), Some(m)) => (c, m),
            _ => return Err(JVMCIError::illegal_argument(format!("cannot box {}", ty.java_name()))),
        };
        let result = self.env.call_static_method(
            self.ids.class(class)?,
            self.ids.method(method)?,
            BasicType::Object,
            &[Value::Primitive(value)],
        );
        self.checked_non_null(result.as_object().flatten(), "valueOf")
    }

    fn get_boxed_value(&self, object: RemoteRef) -> JVMCIResult<Option<PrimitiveValue>> {
        for ty in BOXED_TYPES {
            let (class, field) = match (JVMCIClass::box_of(ty), JVMCIField::box_value(ty)) {
                (Some(c), Some(f)) => (c, f),
                _ => continue,
            };
            if self.env.is_instance_of(object, self.ids.class(class)?) {
                let value = self.env.get_field(object, self.ids.field(field)?, ty);
                return self.checked(value.as_primitive());
            }
        }
        Ok(None)
    }

    fn create_string(&self, s: &str) -> JVMCIResult<RemoteRef> {
        let string = self.env.new_string_utf(s);
        self.checked_non_null(string, "NewStringUTF")
    }

    fn as_utf8_string(&self, s: RemoteRef) -> JVMCIResult<String> {
        let value = self.env.get_string_utf(s);
        self.checked(value)
    }

    fn make_local(&self, object: RemoteRef) -> JVMCIResult<RemoteRef> {
        let local = self.env.new_local_ref(object);
        self.checked_non_null(local, "NewLocalRef")
    }

    fn make_handle(&self, object: RemoteRef, strength: HandleStrength) -> JVMCIResult<JVMCIHandle> {
        let reference = match strength {
            HandleStrength::Global => self.env.new_global_ref(object),
            HandleStrength::Weak => self.env.new_weak_global_ref(object),
        };
        let reference = self.checked_non_null(reference, "NewGlobalRef")?;
        Ok(JVMCIHandle::remote(reference, strength))
    }

    fn resolve_handle(&self, handle: &JVMCIHandle) -> JVMCIResult<Option<RemoteRef>> {
        let reference = handle.remote_ref().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Remote,
            found: handle.mode(),
        })?;
        match handle.strength() {
            HandleStrength::Global => Ok(Some(reference)),
            // A weak reference must be turned into a strong local before use. This yields null if
            // the referent has been collected.
            HandleStrength::Weak => {
                let local = self.env.new_local_ref(reference);
                self.checked(local)
            }
        }
    }

    fn destroy_handle(&self, handle: JVMCIHandle) -> JVMCIResult<()> {
        let reference = handle.remote_ref().ok_or(JVMCIError::ModeMismatch {
            expected: Mode::Remote,
            found: handle.mode(),
        })?;
        match handle.strength() {
            HandleStrength::Global => self.env.delete_global_ref(reference),
            HandleStrength::Weak => self.env.delete_weak_global_ref(reference),
        }
        self.check()
    }

    fn equals(&self, a: Option<RemoteRef>, b: Option<RemoteRef>) -> bool {
        self.env.is_same_object(a, b)
    }

    fn new_throwable(&self, kind: ExceptionKind, message: Option<&str>) -> JVMCIResult<RemoteRef> {
        // JNI has no way to create a throwable without throwing it
        let class = self.ids.exception_class(kind)?;
        self.env.throw_new(class, message.unwrap_or(""));
        let throwable = self.env.exception_occurred();
        self.env.exception_clear();
        throwable.ok_or_else(|| JVMCIError::Internal(format!("ThrowNew did not raise {:?}", kind)))
    }

    fn throw(&self, throwable: RemoteRef) {
        self.env.throw(throwable);
    }

    fn describe_exception(&self, throwable: RemoteRef) {
        if self.env.exception_check() {
            self.env.exception_clear();
        }
        self.env.throw(throwable);
        self.env.exception_describe();
    }

    fn take_pending_exception(&self) -> Option<RemoteRef> {
        let exception = self.env.exception_occurred();
        if exception.is_some() {
            self.env.exception_clear();
        }
        exception
    }

    fn get_field(&self, field: JVMCIField, object: Option<RemoteRef>) -> JVMCIResult<JValue> {
        let ty = field.basic_type();
        let id = self.ids.field(field)?;
        let value = if field.descriptor().is_static {
            self.env.get_static_field(self.ids.class(field.class())?, id, ty)
        } else {
            self.env.get_field(Self::non_null(object)?, id, ty)
        };
        self.checked(value)
    }

    fn set_field(&self, field: JVMCIField, object: Option<RemoteRef>, value: JValue) -> JVMCIResult<()> {
        let id = self.ids.field(field)?;
        if field.descriptor().is_static {
            self.env.set_static_field(self.ids.class(field.class())?, id, value);
        } else {
            self.env.set_field(Self::non_null(object)?, id, value);
        }
        self.check()
    }

    fn call(&self, method: JVMCIMethod, receiver: Option<RemoteRef>, args: &[JValue]) -> JVMCIResult<JValue> {
        let descriptor = method.descriptor();
        let id = self.ids.method(method)?;
        trace!("Calling {}.{}{} in the remote heap", descriptor.class, descriptor.name, descriptor.signature);
        match descriptor.kind {
            MethodKind::Static => {
                let class = self.ids.class(method.class())?;
                let result = self.env.call_static_method(class, id, descriptor.return_type(), args);
                self.checked(result)
            }
            MethodKind::Virtual => {
                let result = self
                    .env
                    .call_method(Self::non_null(receiver)?, id, descriptor.return_type(), args);
                self.checked(result)
            }
            MethodKind::Constructor => {
                let class = self.ids.class(method.class())?;
                let object = self.env.new_object(class, id, args);
                self.checked_non_null(object, "NewObject").map(|o| Value::Object(Some(o)))
            }
        }
    }

    fn is_instance_of(&self, object: RemoteRef, class: JVMCIClass) -> JVMCIResult<bool> {
        Ok(self.env.is_instance_of(object, self.ids.class(class)?))
    }

    fn class_name(&self, object: RemoteRef) -> JVMCIResult<String> {
        let class = self.env.get_object_class(object);
        let name = self.call(JVMCIMethod::ClassGetName, Some(class), &[])?;
        self.env.delete_local_ref(class);
        match name.as_object().flatten() {
            Some(name) => Ok(self.as_utf8_string(name)?.replace('.', "/")),
            None => Err(JVMCIError::null_pointer()),
        }
    }
}
