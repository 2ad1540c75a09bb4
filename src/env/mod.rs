//! The environment through which the runtime works on compiler-side objects.
//!
//! The compiler's objects live either in the host heap (the compiler runs as ordinary Java code in
//! the VM) or in a separate heap reached through a JNI-shaped interface (the compiler runs in a
//! shared library). A [`JVMCIEnv`] is bound to one of the two for its whole lifetime and every
//! operation is implemented once per heap, behind [`access::HeapAccess`].
//!
//! Operations that may raise return [`JVMCIResult`]. An environment entered on behalf of a caller
//! across the boundary hands a recorded exception back to that caller when it is dropped; any other
//! environment treats an unhandled exception as fatal.

mod access;
mod classes;
mod error;
mod host;
mod object;
mod remote;

pub use self::classes::{JVMCIClass, JVMCIField, JVMCIMethod};
pub use self::error::{ExceptionKind, JVMCIError, JVMCIResult, ThrownException};
pub use self::object::{
    HandleStrength, JVMCIHandle, JVMCIObject, JVMCIObjectArray, JVMCIPrimitiveArray, JVMCIValue, Mode,
};
pub(crate) use self::remote::RemoteIds;

use std::cell::RefCell;
use std::panic::Location;

use self::access::HeapAccess;
use self::host::HostAccess;
use self::remote::RemoteAccess;
use crate::compile_state::JVMCICompileState;
use crate::jvmci::JVMCI;
use crate::metadata_handles::MetadataHandle;
use crate::runtime::JVMCIRuntime;
use crate::util::{Address, ObjectReference, VMThread};
use crate::vm::{
    BasicType, ConstantPoolRef, KlassRef, MetadataRef, MethodRef, NMethodRef, PrimitiveValue, RemoteEnv, VMBinding, Value,
};

/// Number of local references reserved in the frame pushed by a remote environment.
const LOCAL_FRAME_CAPACITY: i32 = 32;

enum RemoteEnvHolder<'a> {
    /// The environment of a thread this runtime attached.
    Attached(Box<dyn RemoteEnv>),
    /// The environment of a remote caller that called into the runtime.
    Caller(&'a dyn RemoteEnv),
}

impl RemoteEnvHolder<'_> {
    fn get(&self) -> &dyn RemoteEnv {
        match self {
            RemoteEnvHolder::Attached(env) => env.as_ref(),
            RemoteEnvHolder::Caller(env) => *env,
        }
    }
}

enum EnvAccess<'a> {
    Host,
    Remote {
        env: RemoteEnvHolder<'a>,
        ids: &'a RemoteIds,
    },
}

/// Run `$body` with `$a` bound to the accessor of the environment's heap. The body is instantiated
/// once per heap.
macro_rules! with_access {
    ($env:expr, $a:ident => $body:expr) => {
        match &$env.access {
            EnvAccess::Host => {
                let $a = HostAccess::<VM>::new($env.thread);
                $body
            }
            EnvAccess::Remote { env, ids } => {
                let $a = RemoteAccess::new(env.get(), ids);
                $body
            }
        }
    };
}

/// A scope in which the runtime works on the objects of one compiler heap.
pub struct JVMCIEnv<'a, VM: VMBinding> {
    jvmci: &'a JVMCI<VM>,
    runtime: &'a JVMCIRuntime<VM>,
    thread: VMThread,
    access: EnvAccess<'a>,
    pushed_local_frame: bool,
    /// Hand exceptions to the caller on drop instead of treating them as fatal.
    throw_to_caller: bool,
    compile_state: Option<&'a JVMCICompileState<VM>>,
    location: &'static Location<'static>,
    pending: RefCell<Option<ThrownException>>,
}

impl<'a, VM: VMBinding> JVMCIEnv<'a, VM> {
    /// An environment for a compilation, in the heap of the compiler runtime.
    #[track_caller]
    pub fn for_compile(jvmci: &'a JVMCI<VM>, thread: VMThread, compile_state: &'a JVMCICompileState<VM>) -> Self {
        let mut env = Self::new(jvmci, jvmci.compiler_runtime(), thread, Location::caller());
        env.compile_state = Some(compile_state);
        env
    }

    /// An environment for an arbitrary thread, in the heap of the compiler runtime.
    #[track_caller]
    pub fn for_thread(jvmci: &'a JVMCI<VM>, thread: VMThread) -> Self {
        Self::new(jvmci, jvmci.compiler_runtime(), thread, Location::caller())
    }

    /// An environment in the heap the object lives in.
    #[track_caller]
    pub fn for_object(jvmci: &'a JVMCI<VM>, thread: VMThread, object: JVMCIObject) -> Self {
        Self::new(jvmci, jvmci.runtime_for(object.mode()), thread, Location::caller())
    }

    #[track_caller]
    pub fn with_mode(jvmci: &'a JVMCI<VM>, thread: VMThread, mode: Mode) -> Self {
        Self::new(jvmci, jvmci.runtime_for(mode), thread, Location::caller())
    }

    /// An environment for a call from Java code in the host heap. Exceptions are left pending on
    /// the thread when the environment is dropped.
    #[track_caller]
    pub fn for_java_caller(jvmci: &'a JVMCI<VM>, thread: VMThread) -> Self {
        let mut env = Self::new(jvmci, jvmci.java_runtime(), thread, Location::caller());
        env.throw_to_caller = true;
        env
    }

    /// An environment for a call from the remote heap, made through `caller`. Exceptions are
    /// translated into the remote heap and left pending there when the environment is dropped.
    #[track_caller]
    pub fn for_caller(jvmci: &'a JVMCI<VM>, thread: VMThread, caller: &'a dyn RemoteEnv) -> Self {
        let runtime = jvmci.runtime_for(Mode::Remote);
        let location = Location::caller();
        let ids = Self::resolve_ids(runtime, caller);
        let pushed_local_frame = Self::push_local_frame(caller);
        JVMCIEnv {
            jvmci,
            runtime,
            thread,
            access: EnvAccess::Remote {
                env: RemoteEnvHolder::Caller(caller),
                ids,
            },
            pushed_local_frame,
            throw_to_caller: true,
            compile_state: None,
            location,
            pending: RefCell::new(None),
        }
    }

    fn new(
        jvmci: &'a JVMCI<VM>,
        runtime: &'a JVMCIRuntime<VM>,
        thread: VMThread,
        location: &'static Location<'static>,
    ) -> Self {
        let (access, pushed_local_frame) = match runtime.mode() {
            Mode::Host => (EnvAccess::Host, false),
            Mode::Remote => {
                let env = runtime
                    .attach_current_thread()
                    .unwrap_or_else(|| VM::fatal("Error attaching current thread to the JVMCI shared library"));
                let ids = Self::resolve_ids(runtime, env.as_ref());
                let pushed = Self::push_local_frame(env.as_ref());
                (
                    EnvAccess::Remote {
                        env: RemoteEnvHolder::Attached(env),
                        ids,
                    },
                    pushed,
                )
            }
        };
        trace!("Entered {} JVMCIEnv at {}:{}", runtime.mode(), location.file(), location.line());
        JVMCIEnv {
            jvmci,
            runtime,
            thread,
            access,
            pushed_local_frame,
            throw_to_caller: false,
            compile_state: None,
            location,
            pending: RefCell::new(None),
        }
    }

    fn resolve_ids(runtime: &'a JVMCIRuntime<VM>, env: &dyn RemoteEnv) -> &'a RemoteIds {
        runtime
            .remote_ids(env)
            .unwrap_or_else(|missing| VM::fatal(&format!("Error initializing JNI ids: {} not found", missing)))
    }

    fn push_local_frame(env: &dyn RemoteEnv) -> bool {
        if !env.push_local_frame(LOCAL_FRAME_CAPACITY) {
            env.exception_describe();
            VM::fatal("Error pushing local JNI frame");
        }
        true
    }

    // --- Environment state ---

    pub fn mode(&self) -> Mode {
        match self.access {
            EnvAccess::Host => Mode::Host,
            EnvAccess::Remote { .. } => Mode::Remote,
        }
    }

    pub fn is_host(&self) -> bool {
        self.mode() == Mode::Host
    }

    pub fn thread(&self) -> VMThread {
        self.thread
    }

    pub fn jvmci(&self) -> &'a JVMCI<VM> {
        self.jvmci
    }

    pub fn runtime(&self) -> &'a JVMCIRuntime<VM> {
        self.runtime
    }

    pub fn compile_state(&self) -> Option<&'a JVMCICompileState<VM>> {
        self.compile_state
    }

    /// Where the environment was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// The remote interface, if this is a remote environment.
    pub fn remote_env(&self) -> Option<&dyn RemoteEnv> {
        match &self.access {
            EnvAccess::Host => None,
            EnvAccess::Remote { env, .. } => Some(env.get()),
        }
    }

    // --- Exceptions ---

    /// Convert the result of a host VM call made on this environment's thread. A failed call
    /// becomes an error carrying the exception it left pending.
    pub fn check_host<T>(&self, result: crate::vm::VMResult<T>) -> JVMCIResult<T> {
        HostAccess::<VM>::new(self.thread).check(result)
    }

    /// Record the error of a failed operation as the environment's pending exception, to be
    /// handed to the caller when the environment is dropped.
    pub fn propagate<T>(&self, result: JVMCIResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                let exception = match e {
                    JVMCIError::Exception(exception) => exception,
                    other => ThrownException {
                        kind: ExceptionKind::InternalError,
                        message: Some(other.to_string()),
                        throwable: None,
                    },
                };
                debug!("Exception pending in JVMCIEnv: {}", exception);
                *self.pending.borrow_mut() = Some(exception);
                None
            }
        }
    }

    pub fn has_pending_exception(&self) -> bool {
        if self.pending.borrow().is_some() {
            return true;
        }
        match &self.access {
            EnvAccess::Host => VM::pending_exception(self.thread).is_some(),
            EnvAccess::Remote { env, .. } => env.get().exception_check(),
        }
    }

    /// Take the pending exception, whether it was recorded with [`JVMCIEnv::propagate`] or raised
    /// in the heap.
    pub fn take_pending_exception(&self) -> Option<ThrownException> {
        if let Some(e) = self.pending.borrow_mut().take() {
            return Some(e);
        }
        match &self.access {
            EnvAccess::Host => {
                let a = HostAccess::<VM>::new(self.thread);
                a.take_pending_exception().map(host::describe_host_exception::<VM>)
            }
            EnvAccess::Remote { env, ids } => {
                let a = RemoteAccess::new(env.get(), ids);
                a.take_pending_exception().map(|t| a.describe_remote_exception(t))
            }
        }
    }

    /// Print an error. If it carries a throwable of this heap, its stack trace is printed too.
    pub fn describe_exception(&self, error: &JVMCIError) {
        let throwable = match error {
            JVMCIError::Exception(ThrownException {
                throwable: Some(t), ..
            }) if t.mode() == self.mode() => Some(*t),
            _ => None,
        };
        match throwable {
            Some(t) => with_access!(self, a => {
                if let Ok(t) = a.to_ref(t) {
                    a.describe_exception(t);
                }
            }),
            None => error!("{}", error),
        }
    }

    /// Create the exception object for an error in this heap.
    pub fn new_exception(&self, kind: ExceptionKind, message: Option<&str>) -> JVMCIResult<JVMCIObject> {
        with_access!(self, a => Ok(a.to_object(a.new_throwable(kind, message)?)))
    }

    // --- Arrays ---

    pub fn get_array_length(&self, array: JVMCIObject) -> JVMCIResult<i32> {
        with_access!(self, a => a.get_array_length(a.to_ref(array)?))
    }

    pub fn get_object_at(&self, array: JVMCIObjectArray, index: i32) -> JVMCIResult<Option<JVMCIObject>> {
        with_access!(self, a => Ok(a.to_object_opt(a.get_object_at(a.to_ref(array.0)?, index)?)))
    }

    pub fn put_object_at(&self, array: JVMCIObjectArray, index: i32, value: Option<JVMCIObject>) -> JVMCIResult<()> {
        with_access!(self, a => a.put_object_at(a.to_ref(array.0)?, index, a.to_ref_opt(value)?))
    }

    pub fn get_primitive_at(&self, array: JVMCIPrimitiveArray, ty: BasicType, index: i32) -> JVMCIResult<PrimitiveValue> {
        with_access!(self, a => a.get_primitive_at(a.to_ref(array.0)?, ty, index))
    }

    pub fn put_primitive_at(&self, array: JVMCIPrimitiveArray, index: i32, value: PrimitiveValue) -> JVMCIResult<()> {
        with_access!(self, a => a.put_primitive_at(a.to_ref(array.0)?, index, value))
    }

    pub fn get_bool_at(&self, array: JVMCIPrimitiveArray, index: i32) -> JVMCIResult<bool> {
        match self.get_primitive_at(array, BasicType::Boolean, index)? {
            PrimitiveValue::Boolean(v) => Ok(v),
            other => Err(JVMCIError::Internal(format!("expected a boolean, got {:?}", other))),
        }
    }

    pub fn put_bool_at(&self, array: JVMCIPrimitiveArray, index: i32, value: bool) -> JVMCIResult<()> {
        self.put_primitive_at(array, index, PrimitiveValue::Boolean(value))
    }

    pub fn get_int_at(&self, array: JVMCIPrimitiveArray, index: i32) -> JVMCIResult<i32> {
        match self.get_primitive_at(array, BasicType::Int, index)? {
            PrimitiveValue::Int(v) => Ok(v),
            other => Err(JVMCIError::Internal(format!("expected an int, got {:?}", other))),
        }
    }

    pub fn put_int_at(&self, array: JVMCIPrimitiveArray, index: i32, value: i32) -> JVMCIResult<()> {
        self.put_primitive_at(array, index, PrimitiveValue::Int(value))
    }

    pub fn get_long_at(&self, array: JVMCIPrimitiveArray, index: i32) -> JVMCIResult<i64> {
        match self.get_primitive_at(array, BasicType::Long, index)? {
            PrimitiveValue::Long(v) => Ok(v),
            other => Err(JVMCIError::Internal(format!("expected a long, got {:?}", other))),
        }
    }

    pub fn put_long_at(&self, array: JVMCIPrimitiveArray, index: i32, value: i64) -> JVMCIResult<()> {
        self.put_primitive_at(array, index, PrimitiveValue::Long(value))
    }

    pub fn get_byte_at(&self, array: JVMCIPrimitiveArray, index: i32) -> JVMCIResult<i8> {
        match self.get_primitive_at(array, BasicType::Byte, index)? {
            PrimitiveValue::Byte(v) => Ok(v),
            other => Err(JVMCIError::Internal(format!("expected a byte, got {:?}", other))),
        }
    }

    pub fn put_byte_at(&self, array: JVMCIPrimitiveArray, index: i32, value: i8) -> JVMCIResult<()> {
        self.put_primitive_at(array, index, PrimitiveValue::Byte(value))
    }

    /// Copy `dest.len()` bytes out of a `byte[]`, starting at `offset`.
    pub fn copy_bytes_to(&self, src: JVMCIPrimitiveArray, dest: &mut [u8], offset: i32) -> JVMCIResult<()> {
        with_access!(self, a => a.copy_bytes_to(a.to_ref(src.0)?, dest, offset))
    }

    /// Copy bytes into a `byte[]`, starting at `offset`.
    pub fn copy_bytes_from(&self, src: &[u8], dest: JVMCIPrimitiveArray, offset: i32) -> JVMCIResult<()> {
        with_access!(self, a => a.copy_bytes_from(src, a.to_ref(dest.0)?, offset))
    }

    /// Read a whole `byte[]`.
    pub fn read_byte_array(&self, array: JVMCIPrimitiveArray) -> JVMCIResult<Vec<u8>> {
        let mut bytes = vec![0u8; self.get_array_length(array.0)?.max(0) as usize];
        self.copy_bytes_to(array, &mut bytes, 0)?;
        Ok(bytes)
    }

    pub fn new_object_array(&self, element_class: JVMCIClass, length: i32) -> JVMCIResult<JVMCIObjectArray> {
        with_access!(self, a => Ok(JVMCIObjectArray(a.to_object(a.new_object_array(element_class, length)?))))
    }

    pub fn new_primitive_array(&self, ty: BasicType, length: i32) -> JVMCIResult<JVMCIPrimitiveArray> {
        if !ty.is_primitive() {
            return Err(JVMCIError::illegal_argument(format!("not a primitive type: {}", ty.java_name())));
        }
        with_access!(self, a => Ok(JVMCIPrimitiveArray(a.to_object(a.new_primitive_array(ty, length)?))))
    }

    pub fn new_byte_array(&self, length: i32) -> JVMCIResult<JVMCIPrimitiveArray> {
        self.new_primitive_array(BasicType::Byte, length)
    }

    pub fn new_int_array(&self, length: i32) -> JVMCIResult<JVMCIPrimitiveArray> {
        self.new_primitive_array(BasicType::Int, length)
    }

    pub fn new_long_array(&self, length: i32) -> JVMCIResult<JVMCIPrimitiveArray> {
        self.new_primitive_array(BasicType::Long, length)
    }

    pub fn new_boolean_array(&self, length: i32) -> JVMCIResult<JVMCIPrimitiveArray> {
        self.new_primitive_array(BasicType::Boolean, length)
    }

    /// Create a `byte[]` holding the bytes.
    pub fn new_byte_array_from(&self, bytes: &[u8]) -> JVMCIResult<JVMCIPrimitiveArray> {
        let array = self.new_byte_array(bytes.len() as i32)?;
        self.copy_bytes_from(bytes, array, 0)?;
        Ok(array)
    }

    // --- Boxes and strings ---

    pub fn create_box(&self, value: PrimitiveValue) -> JVMCIResult<JVMCIObject> {
        with_access!(self, a => Ok(a.to_object(a.create_box(value)?)))
    }

    /// The primitive value of a box. Fails with `IllegalArgumentException` if the object is not a box.
    pub fn get_boxed_value(&self, object: JVMCIObject) -> JVMCIResult<PrimitiveValue> {
        with_access!(self, a => a.get_boxed_value(a.to_ref(object)?)?)
            .ok_or_else(|| JVMCIError::illegal_argument("not a box"))
    }

    /// The primitive type boxed by the object, if it is a box.
    pub fn get_box_type(&self, object: JVMCIObject) -> JVMCIResult<Option<BasicType>> {
        Ok(with_access!(self, a => a.get_boxed_value(a.to_ref(object)?)?).map(|v| v.basic_type()))
    }

    pub fn create_string(&self, s: &str) -> JVMCIResult<JVMCIObject> {
        with_access!(self, a => Ok(a.to_object(a.create_string(s)?)))
    }

    pub fn as_utf8_string(&self, s: JVMCIObject) -> JVMCIResult<String> {
        with_access!(self, a => a.as_utf8_string(a.to_ref(s)?))
    }

    // --- References ---

    pub fn make_local(&self, object: JVMCIObject) -> JVMCIResult<JVMCIObject> {
        with_access!(self, a => Ok(a.to_object(a.make_local(a.to_ref(object)?)?)))
    }

    pub fn make_global(&self, object: JVMCIObject) -> JVMCIResult<JVMCIHandle> {
        with_access!(self, a => a.make_handle(a.to_ref(object)?, HandleStrength::Global))
    }

    pub fn make_weak(&self, object: JVMCIObject) -> JVMCIResult<JVMCIHandle> {
        with_access!(self, a => a.make_handle(a.to_ref(object)?, HandleStrength::Weak))
    }

    /// The object of a handle. `None` if a weak handle was cleared.
    pub fn resolve_handle(&self, handle: &JVMCIHandle) -> JVMCIResult<Option<JVMCIObject>> {
        with_access!(self, a => Ok(a.to_object_opt(a.resolve_handle(handle)?)))
    }

    pub fn destroy_handle(&self, handle: JVMCIHandle) -> JVMCIResult<()> {
        with_access!(self, a => a.destroy_handle(handle))
    }

    /// Identity comparison. Both references must be of this environment's heap.
    pub fn equals(&self, a: Option<JVMCIObject>, b: Option<JVMCIObject>) -> JVMCIResult<bool> {
        with_access!(self, acc => {
            let a = acc.to_ref_opt(a)?;
            let b = acc.to_ref_opt(b)?;
            Ok(acc.equals(a, b))
        })
    }

    pub fn is_instance_of(&self, object: JVMCIObject, class: JVMCIClass) -> JVMCIResult<bool> {
        with_access!(self, a => a.is_instance_of(a.to_ref(object)?, class))
    }

    /// The class name of the object in internal form.
    pub fn class_name(&self, object: JVMCIObject) -> JVMCIResult<String> {
        with_access!(self, a => a.class_name(a.to_ref(object)?))
    }

    // --- Fields and calls ---

    pub fn get_field(&self, field: JVMCIField, object: Option<JVMCIObject>) -> JVMCIResult<JVMCIValue> {
        with_access!(self, a => Ok(a.to_jvmci_value(a.get_field(field, a.to_ref_opt(object)?)?)))
    }

    pub fn set_field(&self, field: JVMCIField, object: Option<JVMCIObject>, value: JVMCIValue) -> JVMCIResult<()> {
        with_access!(self, a => {
            let value = a.to_values(&[value])?.remove(0);
            a.set_field(field, a.to_ref_opt(object)?, value)
        })
    }

    pub fn get_int_field(&self, field: JVMCIField, object: JVMCIObject) -> JVMCIResult<i32> {
        let value = self.get_field(field, Some(object))?;
        value
            .as_int()
            .ok_or_else(|| JVMCIError::Internal(format!("{:?} is not an int field", field)))
    }

    pub fn get_long_field(&self, field: JVMCIField, object: JVMCIObject) -> JVMCIResult<i64> {
        let value = self.get_field(field, Some(object))?;
        value
            .as_long()
            .ok_or_else(|| JVMCIError::Internal(format!("{:?} is not a long field", field)))
    }

    pub fn get_bool_field(&self, field: JVMCIField, object: JVMCIObject) -> JVMCIResult<bool> {
        let value = self.get_field(field, Some(object))?;
        value
            .as_bool()
            .ok_or_else(|| JVMCIError::Internal(format!("{:?} is not a boolean field", field)))
    }

    pub fn get_object_field(&self, field: JVMCIField, object: JVMCIObject) -> JVMCIResult<Option<JVMCIObject>> {
        let value = self.get_field(field, Some(object))?;
        value
            .as_object()
            .ok_or_else(|| JVMCIError::Internal(format!("{:?} is not an object field", field)))
    }

    pub fn set_int_field(&self, field: JVMCIField, object: JVMCIObject, value: i32) -> JVMCIResult<()> {
        self.set_field(field, Some(object), Value::Primitive(PrimitiveValue::Int(value)))
    }

    pub fn set_long_field(&self, field: JVMCIField, object: JVMCIObject, value: i64) -> JVMCIResult<()> {
        self.set_field(field, Some(object), Value::Primitive(PrimitiveValue::Long(value)))
    }

    pub fn set_bool_field(&self, field: JVMCIField, object: JVMCIObject, value: bool) -> JVMCIResult<()> {
        self.set_field(field, Some(object), Value::Primitive(PrimitiveValue::Boolean(value)))
    }

    pub fn set_object_field(&self, field: JVMCIField, object: JVMCIObject, value: Option<JVMCIObject>) -> JVMCIResult<()> {
        self.set_field(field, Some(object), Value::Object(value))
    }

    /// Call a method. `receiver` is `None` for static methods and constructors.
    pub fn call(&self, method: JVMCIMethod, receiver: Option<JVMCIObject>, args: &[JVMCIValue]) -> JVMCIResult<JVMCIValue> {
        with_access!(self, a => {
            let args = a.to_values(args)?;
            Ok(a.to_jvmci_value(a.call(method, a.to_ref_opt(receiver)?, &args)?))
        })
    }

    /// Call a method that returns an object, failing if it returns null.
    pub fn call_for_object(
        &self,
        method: JVMCIMethod,
        receiver: Option<JVMCIObject>,
        args: &[JVMCIValue],
    ) -> JVMCIResult<JVMCIObject> {
        self.call(method, receiver, args)?
            .as_object()
            .flatten()
            .ok_or_else(JVMCIError::null_pointer)
    }

    // --- HotSpotJVMCIRuntime ---

    /// `HotSpotJVMCIRuntime.runtime()`, which creates the runtime on first use.
    pub fn call_hotspot_jvmci_runtime_runtime(&self) -> JVMCIResult<JVMCIObject> {
        self.call_for_object(JVMCIMethod::HotSpotJVMCIRuntimeRuntime, None, &[])
    }

    pub fn call_hotspot_jvmci_runtime_compile_method(
        &self,
        runtime: JVMCIObject,
        method: JVMCIObject,
        entry_bci: i32,
        env: i64,
        compile_id: i32,
    ) -> JVMCIResult<Option<JVMCIObject>> {
        let args = [
            Value::Object(Some(method)),
            Value::Primitive(PrimitiveValue::Int(entry_bci)),
            Value::Primitive(PrimitiveValue::Long(env)),
            Value::Primitive(PrimitiveValue::Int(compile_id)),
        ];
        let result = self.call(JVMCIMethod::HotSpotJVMCIRuntimeCompileMethod, Some(runtime), &args)?;
        Ok(result.as_object().flatten())
    }

    pub fn call_hotspot_jvmci_runtime_adjust_compilation_level(
        &self,
        runtime: JVMCIObject,
        declaring_class: JVMCIObject,
        name: Option<JVMCIObject>,
        signature: Option<JVMCIObject>,
        is_osr: bool,
        level: i32,
    ) -> JVMCIResult<i32> {
        let args = [
            Value::Object(Some(declaring_class)),
            Value::Object(name),
            Value::Object(signature),
            Value::Primitive(PrimitiveValue::Boolean(is_osr)),
            Value::Primitive(PrimitiveValue::Int(level)),
        ];
        let result = self.call(JVMCIMethod::HotSpotJVMCIRuntimeAdjustCompilationLevel, Some(runtime), &args)?;
        result
            .as_int()
            .ok_or_else(|| JVMCIError::Internal("adjustCompilationLevel did not return an int".to_string()))
    }

    pub fn call_hotspot_jvmci_runtime_get_compiler(&self, runtime: JVMCIObject) -> JVMCIResult<()> {
        self.call(JVMCIMethod::HotSpotJVMCIRuntimeGetCompiler, Some(runtime), &[])
            .map(|_| ())
    }

    pub fn call_hotspot_jvmci_runtime_bootstrap_finished(&self, runtime: JVMCIObject) -> JVMCIResult<()> {
        self.call(JVMCIMethod::HotSpotJVMCIRuntimeBootstrapFinished, Some(runtime), &[])
            .map(|_| ())
    }

    pub fn call_hotspot_jvmci_runtime_shutdown(&self, runtime: JVMCIObject) -> JVMCIResult<()> {
        self.call(JVMCIMethod::HotSpotJVMCIRuntimeShutdown, Some(runtime), &[])
            .map(|_| ())
    }

    /// `HotSpotJVMCIRuntime.callToString(object)`.
    pub fn call_to_string(&self, object: JVMCIObject) -> JVMCIResult<String> {
        let s = self.call_for_object(
            JVMCIMethod::HotSpotJVMCIRuntimeCallToString,
            None,
            &[Value::Object(Some(object))],
        )?;
        self.as_utf8_string(s)
    }

    // --- Metadata mirrors ---

    /// The `HotSpotResolvedJavaMethodImpl` of a method.
    pub fn get_jvmci_method(&self, method: MethodRef) -> JVMCIResult<JVMCIObject> {
        self.mirror_with_handle(
            method.into(),
            JVMCIMethod::HotSpotResolvedJavaMethodImplFromMetaspace,
            JVMCIField::HotSpotResolvedJavaMethodImplMetadataHandle,
        )
    }

    /// The `HotSpotConstantPool` of a constant pool.
    pub fn get_jvmci_constant_pool(&self, cp: ConstantPoolRef) -> JVMCIResult<JVMCIObject> {
        self.mirror_with_handle(
            cp.into(),
            JVMCIMethod::HotSpotConstantPoolFromMetaspace,
            JVMCIField::HotSpotConstantPoolMetadataHandle,
        )
    }

    /// Create or find the mirror of metadata that refers to it through a metadata handle.
    fn mirror_with_handle(&self, metadata: MetadataRef, factory: JVMCIMethod, handle_field: JVMCIField) -> JVMCIResult<JVMCIObject> {
        let handles = self.jvmci.metadata_handles();
        let handle = handles.allocate(metadata);
        let result = self.call(factory, None, &[Value::Primitive(PrimitiveValue::Long(handle.as_jlong()))]);
        let mirror = match result {
            Ok(v) => v.as_object().flatten(),
            Err(e) => {
                handles.release(handle);
                return Err(e);
            }
        };
        let mirror = match mirror {
            Some(m) => m,
            None => {
                handles.release(handle);
                return Err(JVMCIError::null_pointer());
            }
        };
        // An existing mirror keeps the handle it was created with
        if self.get_long_field(handle_field, mirror)? != handle.as_jlong() {
            handles.release(handle);
        }
        Ok(mirror)
    }

    /// The `HotSpotResolvedObjectTypeImpl` of a class.
    pub fn get_jvmci_type(&self, klass: KlassRef) -> JVMCIResult<JVMCIObject> {
        self.call_for_object(
            JVMCIMethod::HotSpotResolvedObjectTypeImplFromMetaspace,
            None,
            &[Value::Primitive(PrimitiveValue::Long(klass.as_jlong()))],
        )
    }

    /// The `HotSpotResolvedPrimitiveType` of a primitive type.
    pub fn get_jvmci_primitive_type(&self, ty: BasicType) -> JVMCIResult<JVMCIObject> {
        let type_char = ty.to_string().chars().next().map(|c| c as u16).unwrap_or(0);
        self.call_for_object(
            JVMCIMethod::HotSpotResolvedPrimitiveTypeForTypeChar,
            None,
            &[Value::Primitive(PrimitiveValue::Char(type_char))],
        )
    }

    /// The method of a `HotSpotResolvedJavaMethodImpl`.
    pub fn as_method(&self, mirror: JVMCIObject) -> JVMCIResult<MethodRef> {
        let raw = self.get_long_field(JVMCIField::HotSpotResolvedJavaMethodImplMetadataHandle, mirror)?;
        MetadataHandle::from_jlong(raw)
            .and_then(|handle| self.jvmci.metadata_handles().get(handle))
            .and_then(|metadata| metadata.as_method())
            .ok_or_else(|| JVMCIError::Internal(format!("invalid method metadata handle {:#x}", raw)))
    }

    /// The constant pool of a `HotSpotConstantPool`.
    pub fn as_constant_pool(&self, mirror: JVMCIObject) -> JVMCIResult<ConstantPoolRef> {
        let raw = self.get_long_field(JVMCIField::HotSpotConstantPoolMetadataHandle, mirror)?;
        MetadataHandle::from_jlong(raw)
            .and_then(|handle| self.jvmci.metadata_handles().get(handle))
            .and_then(|metadata| metadata.as_constant_pool())
            .ok_or_else(|| JVMCIError::Internal(format!("invalid constant pool metadata handle {:#x}", raw)))
    }

    /// The class of a `HotSpotResolvedObjectTypeImpl`.
    pub fn as_klass(&self, mirror: JVMCIObject) -> JVMCIResult<KlassRef> {
        let raw = self.get_long_field(JVMCIField::HotSpotResolvedObjectTypeImplMetadataPointer, mirror)?;
        // The field only ever holds a pointer the runtime handed out with `get_jvmci_type`
        unsafe { KlassRef::from_jlong(raw) }.ok_or_else(JVMCIError::null_pointer)
    }

    /// The basic type of a `HotSpotResolvedPrimitiveType`.
    pub fn as_primitive_type(&self, mirror: JVMCIObject) -> JVMCIResult<BasicType> {
        let kind = self
            .get_object_field(JVMCIField::HotSpotResolvedPrimitiveTypeKind, mirror)?
            .ok_or_else(JVMCIError::null_pointer)?;
        let type_char = self.get_int_field(JVMCIField::JavaKindTypeChar, kind)?;
        char::from_u32(type_char as u32)
            .and_then(|c| BasicType::from_descriptor(&c.to_string()))
            .ok_or_else(|| JVMCIError::Internal(format!("invalid type char {}", type_char)))
    }

    // --- Object constants ---

    /// Wrap a host object in a `HotSpotObjectConstantImpl` of this heap. A remote constant refers to
    /// the object through a global handle. If `dont_register` is set, the compiler does not own
    /// that handle.
    pub fn get_object_constant(&self, object: ObjectReference, compressed: bool, dont_register: bool) -> JVMCIResult<JVMCIObject> {
        match self.mode() {
            Mode::Host => self.call_for_object(
                JVMCIMethod::DirectHotSpotObjectConstantImplConstructor,
                None,
                &[
                    Value::Object(Some(JVMCIObject::from_host(object))),
                    Value::Primitive(PrimitiveValue::Boolean(compressed)),
                ],
            ),
            Mode::Remote => {
                let handle = self.jvmci.make_global(object);
                self.call_for_object(
                    JVMCIMethod::IndirectHotSpotObjectConstantImplConstructor,
                    None,
                    &[
                        Value::Primitive(PrimitiveValue::Long(handle.as_jlong())),
                        Value::Primitive(PrimitiveValue::Boolean(compressed)),
                        Value::Primitive(PrimitiveValue::Boolean(dont_register)),
                    ],
                )
            }
        }
    }

    /// The host object of a `HotSpotObjectConstantImpl`.
    pub fn as_constant(&self, constant: JVMCIObject) -> JVMCIResult<ObjectReference> {
        match self.mode() {
            Mode::Host => self
                .get_object_field(JVMCIField::DirectHotSpotObjectConstantImplObject, constant)?
                .and_then(|o| o.as_host())
                .ok_or_else(JVMCIError::null_pointer),
            Mode::Remote => {
                let raw = self.get_long_field(JVMCIField::IndirectHotSpotObjectConstantImplObjectHandle, constant)?;
                if raw == 0 {
                    return Err(JVMCIError::null_pointer());
                }
                // The handle was created by `get_object_constant`
                VM::resolve_handle(unsafe { Address::from_jlong(raw) }).ok_or_else(JVMCIError::null_pointer)
            }
        }
    }

    // --- Installed code ---

    /// Create a `HotSpotNmethod` mirror.
    pub fn new_hotspot_nmethod(&self, method: JVMCIObject, name: Option<&str>, is_default: bool, compile_id: i64) -> JVMCIResult<JVMCIObject> {
        let name = name.map(|n| self.create_string(n)).transpose()?;
        self.call_for_object(
            JVMCIMethod::HotSpotNmethodConstructor,
            None,
            &[
                Value::Object(Some(method)),
                Value::Object(name),
                Value::Primitive(PrimitiveValue::Boolean(is_default)),
                Value::Primitive(PrimitiveValue::Long(compile_id)),
            ],
        )
    }

    pub fn get_installed_code_address(&self, mirror: JVMCIObject) -> JVMCIResult<Address> {
        let raw = self.get_long_field(JVMCIField::InstalledCodeAddress, mirror)?;
        Ok(unsafe { Address::from_jlong(raw) })
    }

    pub fn set_installed_code_address(&self, mirror: JVMCIObject, address: Address) -> JVMCIResult<()> {
        self.set_long_field(JVMCIField::InstalledCodeAddress, mirror, address.as_jlong())
    }

    pub fn get_installed_code_entry_point(&self, mirror: JVMCIObject) -> JVMCIResult<Address> {
        let raw = self.get_long_field(JVMCIField::InstalledCodeEntryPoint, mirror)?;
        Ok(unsafe { Address::from_jlong(raw) })
    }

    pub fn set_installed_code_entry_point(&self, mirror: JVMCIObject, entry: Address) -> JVMCIResult<()> {
        self.set_long_field(JVMCIField::InstalledCodeEntryPoint, mirror, entry.as_jlong())
    }

    /// Is the mirror a `HotSpotNmethod`, as opposed to some other installed code?
    pub fn is_hotspot_nmethod(&self, mirror: JVMCIObject) -> JVMCIResult<bool> {
        self.is_instance_of(mirror, JVMCIClass::HotSpotNmethod)
    }

    /// The nmethod a mirror is bound to. `None` if the mirror is not bound, or if it refers to an
    /// nmethod that was freed and its memory reused for another compilation.
    pub fn get_nmethod(&self, mirror: JVMCIObject) -> JVMCIResult<Option<NMethodRef>> {
        let address = self.get_installed_code_address(mirror)?;
        if address.is_zero() {
            return Ok(None);
        }
        let nm = match VM::find_nmethod(address) {
            Some(nm) if nm.0 == address => nm,
            _ => return Ok(None),
        };
        if self.is_hotspot_nmethod(mirror)? {
            let snapshot = self.get_long_field(JVMCIField::HotSpotNmethodCompileIdSnapshot, mirror)?;
            if snapshot != 0 && snapshot != VM::nmethod_state(nm).compile_id as i64 {
                return Ok(None);
            }
        }
        Ok(Some(nm))
    }

    /// Make the code of a mirror not entrant and clear its entry point.
    pub fn invalidate_nmethod_mirror(&self, mirror: JVMCIObject) -> JVMCIResult<()> {
        let nm = match self.get_nmethod(mirror)? {
            Some(nm) => nm,
            None => return Ok(()),
        };
        if VM::make_not_entrant(nm) {
            debug!("Invalidated nmethod {:?} through its mirror", nm);
        }
        self.set_installed_code_entry_point(mirror, Address::ZERO)
    }

    // --- Exception translation ---

    /// Hand an exception to the caller of this environment.
    fn throw_in_caller(&self, exception: ThrownException) {
        match &self.access {
            EnvAccess::Host => {
                let a = HostAccess::<VM>::new(self.thread);
                let throwable = match exception.throwable {
                    Some(t) => match t.as_host() {
                        Some(t) => Ok(t),
                        None => Err(JVMCIError::Internal("remote throwable in a host environment".to_string())),
                    },
                    None => a.new_throwable(exception.kind, exception.message.as_deref()),
                };
                match throwable {
                    Ok(t) => a.throw(t),
                    Err(e) => VM::fatal(&format!("Error creating exception {}: {}", exception, e)),
                }
            }
            EnvAccess::Remote { env, ids } => {
                let remote = RemoteAccess::new(env.get(), ids);
                let throwable = match exception.throwable {
                    Some(t) => match t.as_host() {
                        Some(h) => translate_throwable(&HostAccess::<VM>::new(self.thread), &remote, h),
                        None => remote.to_ref(t),
                    },
                    None => remote.new_throwable(exception.kind, exception.message.as_deref()),
                };
                let throwable = throwable.or_else(|e| {
                    warn!("Error translating exception {}: {}", exception, e);
                    remote.new_throwable(ExceptionKind::InternalError, Some(&exception.to_string()))
                });
                match throwable {
                    Ok(t) => remote.throw(t),
                    Err(e) => VM::fatal(&format!("Error creating exception {}: {}", exception, e)),
                }
            }
        }
    }
}

/// Rehome a throwable from one heap into another: it is encoded to a string in its own heap and
/// decoded in the other, since the two heaps share no objects.
pub(crate) fn translate_throwable<F: HeapAccess, T: HeapAccess>(from: &F, to: &T, throwable: F::Ref) -> JVMCIResult<T::Ref> {
    let encoded = from
        .call(
            JVMCIMethod::TranslatedExceptionEncodeThrowable,
            None,
            &[Value::Object(Some(throwable))],
        )?
        .as_object()
        .flatten()
        .ok_or_else(JVMCIError::null_pointer)?;
    let encoded = from.as_utf8_string(encoded)?;
    let string = to.create_string(&encoded)?;
    to.call(
        JVMCIMethod::TranslatedExceptionDecodeThrowable,
        None,
        &[Value::Object(Some(string))],
    )?
    .as_object()
    .flatten()
    .ok_or_else(JVMCIError::null_pointer)
}

impl<VM: VMBinding> Drop for JVMCIEnv<'_, VM> {
    fn drop(&mut self) {
        if let Some(exception) = self.take_pending_exception() {
            if self.throw_to_caller {
                self.throw_in_caller(exception);
            } else if !std::thread::panicking() {
                if let Some(t) = exception.throwable.filter(|t| t.mode() == self.mode()) {
                    with_access!(self, a => {
                        if let Ok(t) = a.to_ref(t) {
                            a.describe_exception(t);
                        }
                    });
                }
                error!("{}", exception);
                VM::fatal(&format!(
                    "Uncaught exception exiting JVMCIEnv scope entered at {}:{}",
                    self.location.file(),
                    self.location.line()
                ));
            }
        }
        if let EnvAccess::Remote { env, .. } = &self.access {
            if self.pushed_local_frame {
                env.get().pop_local_frame(None);
            }
        }
        trace!("Exited JVMCIEnv entered at {}:{}", self.location.file(), self.location.line());
    }
}
