//! The JVMCI shared library: a compiler compiled ahead of time into a native library that embeds
//! its own small VM and heap.
//!
//! The library is opened with `libloading` and its VM is created through `JNI_CreateJavaVM`. From
//! then on, the runtime talks to it through plain JNI: [`JniJavaVM`] wraps the invocation interface
//! and [`JniEnv`] wraps a thread's `JNIEnv`, calling its function table by index.

use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::util::options::Options;
use crate::util::Address;
use crate::vm::{BasicType, FieldId, JValue, MethodId, NativeMethod, PrimitiveValue, RemoteEnv, RemoteJavaVM, RemoteRef, Value};

/// The base name of the library, without platform prefix and suffix.
pub const LIBRARY_NAME: &str = "jvmcicompiler";

const JNI_OK: i32 = 0;
const JNI_EDETACHED: i32 = -2;
const JNI_VERSION_1_2: i32 = 0x0001_0002;

type JObject = *mut c_void;
/// `JNIEnv*` is a pointer to a pointer to the function table.
type RawEnv = *mut *const *const c_void;
/// `JavaVM*`, likewise.
type RawVM = *mut *const *const c_void;

#[repr(C)]
struct JavaVMOption {
    option_string: *mut c_char,
    extra_info: *mut c_void,
}

#[repr(C)]
struct JavaVMInitArgs {
    version: i32,
    n_options: i32,
    options: *mut JavaVMOption,
    ignore_unrecognized: u8,
}

#[repr(C)]
struct JNINativeMethod {
    name: *const c_char,
    signature: *const c_char,
    fn_ptr: *mut c_void,
}

#[repr(C)]
#[derive(Copy, Clone)]
union RawValue {
    z: u8,
    b: i8,
    c: u16,
    s: i16,
    i: i32,
    j: i64,
    f: f32,
    d: f64,
    l: JObject,
}

type CreateJavaVM = unsafe extern "system" fn(*mut RawVM, *mut RawEnv, *mut JavaVMInitArgs) -> i32;

/// A loaded JVMCI shared library and the VM it created.
pub struct SharedLibrary {
    path: PathBuf,
    vm: Arc<JniJavaVM>,
    /// The id the library gave its VM.
    javavm_id: i64,
    // Dropped last: the VM lives in the library.
    library: Library,
}

impl SharedLibrary {
    /// Open the library named by `jvmci_lib_path` (a file, or a directory containing the library)
    /// and create its VM with `jvmci_lib_args`.
    pub fn load(options: &Options) -> Result<SharedLibrary, String> {
        let path = Self::library_path(&options.jvmci_lib_path);
        debug!("Loading JVMCI shared library {}", path.display());
        let library =
            unsafe { Library::new(&path) }.map_err(|e| format!("Unable to load JVMCI shared library from {}: {}", path.display(), e))?;

        let create: Symbol<CreateJavaVM> = unsafe { library.get(b"JNI_CreateJavaVM\0") }
            .map_err(|e| format!("Unable to find JNI_CreateJavaVM in {}: {}", path.display(), e))?;

        let lib_args = options.lib_args();
        let arg_strings = lib_args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Invalid JVMCI shared library argument: {}", e))?;

        let mut javavm_id: i64 = 0;
        // The library writes the id of its VM to the extra info of this option
        let id_option = b"_javavm_id\0";
        let mut vm_options = vec![JavaVMOption {
            option_string: id_option.as_ptr() as *mut c_char,
            extra_info: &mut javavm_id as *mut i64 as *mut c_void,
        }];
        vm_options.extend(arg_strings.iter().map(|a| JavaVMOption {
            option_string: a.as_ptr() as *mut c_char,
            extra_info: ptr::null_mut(),
        }));
        let mut init_args = JavaVMInitArgs {
            version: JNI_VERSION_1_2,
            n_options: vm_options.len() as i32,
            options: vm_options.as_mut_ptr(),
            ignore_unrecognized: 1,
        };

        let mut raw_vm: RawVM = ptr::null_mut();
        let mut raw_env: RawEnv = ptr::null_mut();
        let result = unsafe { create(&mut raw_vm, &mut raw_env, &mut init_args) };
        if result != JNI_OK || raw_vm.is_null() {
            return Err(format!(
                "JNI_CreateJavaVM failed with {} for JVMCI shared library {}",
                result,
                path.display()
            ));
        }
        info!(
            "Created JavaVM[{}] of JVMCI shared library {} with {} argument(s)",
            javavm_id,
            path.display(),
            lib_args.len()
        );
        drop(create);
        Ok(SharedLibrary {
            path,
            vm: Arc::new(JniJavaVM { vm: raw_vm }),
            javavm_id,
            library,
        })
    }

    fn library_path(configured: &str) -> PathBuf {
        let file_name = libloading::library_filename(LIBRARY_NAME);
        if configured.is_empty() {
            return PathBuf::from(file_name);
        }
        let configured = Path::new(configured);
        if configured.is_dir() {
            configured.join(file_name)
        } else {
            configured.to_path_buf()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn javavm_id(&self) -> i64 {
        self.javavm_id
    }

    pub fn java_vm(&self) -> Arc<dyn RemoteJavaVM> {
        self.vm.clone()
    }

    /// The `JavaVM*` of the library's VM.
    pub fn java_vm_address(&self) -> Address {
        Address::from_mut_ptr(self.vm.vm)
    }

    /// The address of an exported symbol, e.g. a `JVMCI_*` native method implementation.
    pub fn lookup(&self, symbol: &str) -> Option<Address> {
        let name = CString::new(symbol).ok()?;
        let sym: Symbol<*mut c_void> = unsafe { self.library.get(name.as_bytes_with_nul()) }.ok()?;
        let raw = *sym;
        if raw.is_null() {
            None
        } else {
            Some(Address::from_mut_ptr(raw))
        }
    }
}

/// The invocation interface of a VM created by a shared library.
pub struct JniJavaVM {
    vm: RawVM,
}

// The invocation interface may be used from any thread.
unsafe impl Send for JniJavaVM {}
unsafe impl Sync for JniJavaVM {}

impl JniJavaVM {
    unsafe fn function<F: Copy>(&self, index: usize) -> F {
        let table = *self.vm;
        std::mem::transmute_copy::<*const c_void, F>(&*table.add(index))
    }
}

impl RemoteJavaVM for JniJavaVM {
    fn attach_current_thread(&self) -> Option<Box<dyn RemoteEnv>> {
        type GetEnv = unsafe extern "system" fn(RawVM, *mut RawEnv, i32) -> i32;
        type AttachCurrentThread = unsafe extern "system" fn(RawVM, *mut RawEnv, *mut c_void) -> i32;
        let mut env: RawEnv = ptr::null_mut();
        unsafe {
            let get_env: GetEnv = self.function(6);
            let mut result = get_env(self.vm, &mut env, JNI_VERSION_1_2);
            if result == JNI_EDETACHED {
                let attach: AttachCurrentThread = self.function(4);
                result = attach(self.vm, &mut env, ptr::null_mut());
                if result == JNI_OK {
                    trace!("Attached thread to JVMCI shared library VM");
                }
            }
            if result != JNI_OK || env.is_null() {
                warn!("Unable to attach thread to JVMCI shared library VM: {}", result);
                return None;
            }
        }
        Some(Box::new(JniEnv { env }))
    }

    fn detach_current_thread(&self) {
        type DetachCurrentThread = unsafe extern "system" fn(RawVM) -> i32;
        unsafe {
            let detach: DetachCurrentThread = self.function(5);
            detach(self.vm);
        }
    }
}

/// The position of a type in the typed families of the JNI function table
/// (`Object, Boolean, Byte, Char, Short, Int, Long, Float, Double, Void`).
fn type_index(ty: BasicType) -> usize {
    match ty {
        BasicType::Object | BasicType::Array => 0,
        BasicType::Boolean => 1,
        BasicType::Byte => 2,
        BasicType::Char => 3,
        BasicType::Short => 4,
        BasicType::Int => 5,
        BasicType::Long => 6,
        BasicType::Float => 7,
        BasicType::Double => 8,
        BasicType::Void => 9,
    }
}

mod index {
    pub const FIND_CLASS: usize = 6;
    pub const THROW: usize = 13;
    pub const THROW_NEW: usize = 14;
    pub const EXCEPTION_OCCURRED: usize = 15;
    pub const EXCEPTION_DESCRIBE: usize = 16;
    pub const EXCEPTION_CLEAR: usize = 17;
    pub const PUSH_LOCAL_FRAME: usize = 19;
    pub const POP_LOCAL_FRAME: usize = 20;
    pub const NEW_GLOBAL_REF: usize = 21;
    pub const DELETE_GLOBAL_REF: usize = 22;
    pub const DELETE_LOCAL_REF: usize = 23;
    pub const IS_SAME_OBJECT: usize = 24;
    pub const NEW_LOCAL_REF: usize = 25;
    pub const NEW_OBJECT_A: usize = 30;
    pub const GET_OBJECT_CLASS: usize = 31;
    pub const IS_INSTANCE_OF: usize = 32;
    pub const GET_METHOD_ID: usize = 33;
    /// `Call<Type>MethodA`, three entries per type.
    pub const CALL_METHOD_A: usize = 36;
    pub const GET_FIELD_ID: usize = 94;
    pub const GET_FIELD: usize = 95;
    pub const SET_FIELD: usize = 104;
    pub const GET_STATIC_METHOD_ID: usize = 113;
    pub const CALL_STATIC_METHOD_A: usize = 116;
    pub const GET_STATIC_FIELD_ID: usize = 144;
    pub const GET_STATIC_FIELD: usize = 145;
    pub const SET_STATIC_FIELD: usize = 154;
    pub const NEW_STRING_UTF: usize = 167;
    pub const GET_STRING_UTF_LENGTH: usize = 168;
    pub const GET_STRING_UTF_CHARS: usize = 169;
    pub const RELEASE_STRING_UTF_CHARS: usize = 170;
    pub const GET_ARRAY_LENGTH: usize = 171;
    pub const NEW_OBJECT_ARRAY: usize = 172;
    pub const GET_OBJECT_ARRAY_ELEMENT: usize = 173;
    pub const SET_OBJECT_ARRAY_ELEMENT: usize = 174;
    /// `New<Type>Array`, starting with `boolean`.
    pub const NEW_PRIMITIVE_ARRAY: usize = 175;
    pub const GET_ARRAY_REGION: usize = 199;
    pub const SET_ARRAY_REGION: usize = 207;
    pub const REGISTER_NATIVES: usize = 215;
    pub const NEW_WEAK_GLOBAL_REF: usize = 226;
    pub const DELETE_WEAK_GLOBAL_REF: usize = 227;
    pub const EXCEPTION_CHECK: usize = 228;
}

/// A thread's `JNIEnv` in the shared library VM.
pub struct JniEnv {
    env: RawEnv,
}

fn to_raw(r: Option<RemoteRef>) -> JObject {
    r.map_or(ptr::null_mut(), |r| r.as_raw() as JObject)
}

fn from_raw(o: JObject) -> Option<RemoteRef> {
    RemoteRef::from_raw(o as usize)
}

fn to_raw_value(value: &JValue) -> RawValue {
    match *value {
        Value::Primitive(PrimitiveValue::Boolean(v)) => RawValue { z: v as u8 },
        Value::Primitive(PrimitiveValue::Byte(v)) => RawValue { b: v },
        Value::Primitive(PrimitiveValue::Char(v)) => RawValue { c: v },
        Value::Primitive(PrimitiveValue::Short(v)) => RawValue { s: v },
        Value::Primitive(PrimitiveValue::Int(v)) => RawValue { i: v },
        Value::Primitive(PrimitiveValue::Long(v)) => RawValue { j: v },
        Value::Primitive(PrimitiveValue::Float(v)) => RawValue { f: v },
        Value::Primitive(PrimitiveValue::Double(v)) => RawValue { d: v },
        Value::Object(o) => RawValue { l: to_raw(o) },
        Value::Void => RawValue { j: 0 },
    }
}

/// Encode a string as the modified UTF-8 of JNI: UTF-16 code units encoded one by one, and NUL
/// as two bytes.
pub fn to_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8. Malformed sequences become replacement characters.
pub fn from_modified_utf8(bytes: &[u8]) -> String {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let (unit, len) = if b < 0x80 {
            (b as u16, 1)
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            (((b as u16 & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F), 2)
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            (
                ((b as u16 & 0x0F) << 12) | ((bytes[i + 1] as u16 & 0x3F) << 6) | (bytes[i + 2] as u16 & 0x3F),
                3,
            )
        } else {
            (0xFFFD, 1)
        };
        units.push(unit);
        i += len;
    }
    String::from_utf16_lossy(&units)
}

impl JniEnv {
    unsafe fn function<F: Copy>(&self, index: usize) -> F {
        let table = *self.env;
        std::mem::transmute_copy::<*const c_void, F>(&*table.add(index))
    }

    fn class_for(&self, class: RemoteRef, name: &str, signature: &str) -> Option<(CString, CString, JObject)> {
        let name = CString::new(name).ok()?;
        let signature = CString::new(signature).ok()?;
        Some((name, signature, to_raw(Some(class))))
    }

    /// Read a typed value with a `Get<Type>Field` style function.
    unsafe fn get_typed(&self, base: usize, target: JObject, field: FieldId, ty: BasicType) -> JValue {
        let id = field.0.get() as *mut c_void;
        let index = base + type_index(ty);
        macro_rules! get {
            ($t:ty) => {{
                let f: unsafe extern "system" fn(RawEnv, JObject, *mut c_void) -> $t = self.function(index);
                f(self.env, target, id)
            }};
        }
        match ty {
            BasicType::Object | BasicType::Array => Value::Object(from_raw(get!(JObject))),
            BasicType::Boolean => Value::Primitive(PrimitiveValue::Boolean(get!(u8) != 0)),
            BasicType::Byte => Value::Primitive(PrimitiveValue::Byte(get!(i8))),
            BasicType::Char => Value::Primitive(PrimitiveValue::Char(get!(u16))),
            BasicType::Short => Value::Primitive(PrimitiveValue::Short(get!(i16))),
            BasicType::Int => Value::Primitive(PrimitiveValue::Int(get!(i32))),
            BasicType::Long => Value::Primitive(PrimitiveValue::Long(get!(i64))),
            BasicType::Float => Value::Primitive(PrimitiveValue::Float(get!(f32))),
            BasicType::Double => Value::Primitive(PrimitiveValue::Double(get!(f64))),
            BasicType::Void => Value::Void,
        }
    }

    /// Write a typed value with a `Set<Type>Field` style function.
    unsafe fn set_typed(&self, base: usize, target: JObject, field: FieldId, value: JValue) {
        let id = field.0.get() as *mut c_void;
        macro_rules! set {
            ($ty:expr, $t:ty, $v:expr) => {{
                let f: unsafe extern "system" fn(RawEnv, JObject, *mut c_void, $t) = self.function(base + type_index($ty));
                f(self.env, target, id, $v)
            }};
        }
        match value {
            Value::Object(o) => set!(BasicType::Object, JObject, to_raw(o)),
            Value::Primitive(PrimitiveValue::Boolean(v)) => set!(BasicType::Boolean, u8, v as u8),
            Value::Primitive(PrimitiveValue::Byte(v)) => set!(BasicType::Byte, i8, v),
            Value::Primitive(PrimitiveValue::Char(v)) => set!(BasicType::Char, u16, v),
            Value::Primitive(PrimitiveValue::Short(v)) => set!(BasicType::Short, i16, v),
            Value::Primitive(PrimitiveValue::Int(v)) => set!(BasicType::Int, i32, v),
            Value::Primitive(PrimitiveValue::Long(v)) => set!(BasicType::Long, i64, v),
            Value::Primitive(PrimitiveValue::Float(v)) => set!(BasicType::Float, f32, v),
            Value::Primitive(PrimitiveValue::Double(v)) => set!(BasicType::Double, f64, v),
            Value::Void => {}
        }
    }

    /// Call with a `Call<Type>MethodA` style function.
    unsafe fn call_typed(&self, base: usize, target: JObject, method: MethodId, ret: BasicType, args: &[JValue]) -> JValue {
        let id = method.0.get() as *mut c_void;
        let raw_args: Vec<RawValue> = args.iter().map(to_raw_value).collect();
        let args_ptr = raw_args.as_ptr();
        let index = base + 3 * type_index(ret);
        macro_rules! call {
            ($t:ty) => {{
                let f: unsafe extern "system" fn(RawEnv, JObject, *mut c_void, *const RawValue) -> $t = self.function(index);
                f(self.env, target, id, args_ptr)
            }};
        }
        match ret {
            BasicType::Object | BasicType::Array => Value::Object(from_raw(call!(JObject))),
            BasicType::Boolean => Value::Primitive(PrimitiveValue::Boolean(call!(u8) != 0)),
            BasicType::Byte => Value::Primitive(PrimitiveValue::Byte(call!(i8))),
            BasicType::Char => Value::Primitive(PrimitiveValue::Char(call!(u16))),
            BasicType::Short => Value::Primitive(PrimitiveValue::Short(call!(i16))),
            BasicType::Int => Value::Primitive(PrimitiveValue::Int(call!(i32))),
            BasicType::Long => Value::Primitive(PrimitiveValue::Long(call!(i64))),
            BasicType::Float => Value::Primitive(PrimitiveValue::Float(call!(f32))),
            BasicType::Double => Value::Primitive(PrimitiveValue::Double(call!(f64))),
            BasicType::Void => {
                call!(());
                Value::Void
            }
        }
    }

    unsafe fn one_ref(&self, index: usize, o: JObject) -> JObject {
        let f: unsafe extern "system" fn(RawEnv, JObject) -> JObject = self.function(index);
        f(self.env, o)
    }

    unsafe fn release_ref(&self, index: usize, o: JObject) {
        let f: unsafe extern "system" fn(RawEnv, JObject) = self.function(index);
        f(self.env, o)
    }

    fn member_id(&self, index: usize, class: RemoteRef, name: &str, signature: &str) -> Option<std::num::NonZeroUsize> {
        let (name, signature, class) = self.class_for(class, name, signature)?;
        let id = unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, *const c_char, *const c_char) -> *mut c_void =
                self.function(index);
            f(self.env, class, name.as_ptr(), signature.as_ptr())
        };
        std::num::NonZeroUsize::new(id as usize)
    }
}

impl RemoteEnv for JniEnv {
    fn push_local_frame(&self, capacity: i32) -> bool {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, i32) -> i32 = self.function(index::PUSH_LOCAL_FRAME);
            f(self.env, capacity) == JNI_OK
        }
    }

    fn pop_local_frame(&self, result: Option<RemoteRef>) -> Option<RemoteRef> {
        from_raw(unsafe { self.one_ref(index::POP_LOCAL_FRAME, to_raw(result)) })
    }

    fn exception_check(&self) -> bool {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv) -> u8 = self.function(index::EXCEPTION_CHECK);
            f(self.env) != 0
        }
    }

    fn exception_occurred(&self) -> Option<RemoteRef> {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv) -> JObject = self.function(index::EXCEPTION_OCCURRED);
            from_raw(f(self.env))
        }
    }

    fn exception_clear(&self) {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv) = self.function(index::EXCEPTION_CLEAR);
            f(self.env)
        }
    }

    fn exception_describe(&self) {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv) = self.function(index::EXCEPTION_DESCRIBE);
            f(self.env)
        }
    }

    fn throw(&self, throwable: RemoteRef) -> bool {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject) -> i32 = self.function(index::THROW);
            f(self.env, to_raw(Some(throwable))) == JNI_OK
        }
    }

    fn throw_new(&self, class: RemoteRef, message: &str) -> bool {
        let message = match CString::new(to_modified_utf8(message)) {
            Ok(message) => message,
            Err(_) => return false,
        };
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, *const c_char) -> i32 = self.function(index::THROW_NEW);
            f(self.env, to_raw(Some(class)), message.as_ptr()) == JNI_OK
        }
    }

    fn find_class(&self, name: &str) -> Option<RemoteRef> {
        let name = CString::new(name).ok()?;
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, *const c_char) -> JObject = self.function(index::FIND_CLASS);
            from_raw(f(self.env, name.as_ptr()))
        }
    }

    fn get_field_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<FieldId> {
        let index = if is_static { index::GET_STATIC_FIELD_ID } else { index::GET_FIELD_ID };
        self.member_id(index, class, name, signature).map(FieldId)
    }

    fn get_method_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<MethodId> {
        let index = if is_static { index::GET_STATIC_METHOD_ID } else { index::GET_METHOD_ID };
        self.member_id(index, class, name, signature).map(MethodId)
    }

    fn is_instance_of(&self, object: RemoteRef, class: RemoteRef) -> bool {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, JObject) -> u8 = self.function(index::IS_INSTANCE_OF);
            f(self.env, to_raw(Some(object)), to_raw(Some(class))) != 0
        }
    }

    fn get_object_class(&self, object: RemoteRef) -> RemoteRef {
        let class = unsafe { self.one_ref(index::GET_OBJECT_CLASS, to_raw(Some(object))) };
        // Never null for a non-null object
        from_raw(class).unwrap_or(object)
    }

    fn register_natives(&self, class: RemoteRef, methods: &[NativeMethod]) -> bool {
        let mut strings = Vec::with_capacity(methods.len());
        for m in methods {
            match (CString::new(m.name.as_str()), CString::new(m.signature.as_str())) {
                (Ok(name), Ok(signature)) => strings.push((name, signature)),
                _ => return false,
            }
        }
        let raw: Vec<JNINativeMethod> = methods
            .iter()
            .zip(strings.iter())
            .map(|(m, (name, signature))| JNINativeMethod {
                name: name.as_ptr(),
                signature: signature.as_ptr(),
                fn_ptr: m.fn_ptr.to_mut_ptr(),
            })
            .collect();
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, *const JNINativeMethod, i32) -> i32 =
                self.function(index::REGISTER_NATIVES);
            f(self.env, to_raw(Some(class)), raw.as_ptr(), raw.len() as i32) == JNI_OK
        }
    }

    fn get_field(&self, object: RemoteRef, field: FieldId, ty: BasicType) -> JValue {
        unsafe { self.get_typed(index::GET_FIELD, to_raw(Some(object)), field, ty) }
    }

    fn set_field(&self, object: RemoteRef, field: FieldId, value: JValue) {
        unsafe { self.set_typed(index::SET_FIELD, to_raw(Some(object)), field, value) }
    }

    fn get_static_field(&self, class: RemoteRef, field: FieldId, ty: BasicType) -> JValue {
        unsafe { self.get_typed(index::GET_STATIC_FIELD, to_raw(Some(class)), field, ty) }
    }

    fn set_static_field(&self, class: RemoteRef, field: FieldId, value: JValue) {
        unsafe { self.set_typed(index::SET_STATIC_FIELD, to_raw(Some(class)), field, value) }
    }

    fn new_object(&self, class: RemoteRef, constructor: MethodId, args: &[JValue]) -> Option<RemoteRef> {
        let raw_args: Vec<RawValue> = args.iter().map(to_raw_value).collect();
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, *mut c_void, *const RawValue) -> JObject =
                self.function(index::NEW_OBJECT_A);
            from_raw(f(self.env, to_raw(Some(class)), constructor.0.get() as *mut c_void, raw_args.as_ptr()))
        }
    }

    fn call_static_method(&self, class: RemoteRef, method: MethodId, ret: BasicType, args: &[JValue]) -> JValue {
        unsafe { self.call_typed(index::CALL_STATIC_METHOD_A, to_raw(Some(class)), method, ret, args) }
    }

    fn call_method(&self, object: RemoteRef, method: MethodId, ret: BasicType, args: &[JValue]) -> JValue {
        unsafe { self.call_typed(index::CALL_METHOD_A, to_raw(Some(object)), method, ret, args) }
    }

    fn get_array_length(&self, array: RemoteRef) -> i32 {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject) -> i32 = self.function(index::GET_ARRAY_LENGTH);
            f(self.env, to_raw(Some(array)))
        }
    }

    fn new_object_array(&self, length: i32, element_class: RemoteRef) -> Option<RemoteRef> {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, i32, JObject, JObject) -> JObject =
                self.function(index::NEW_OBJECT_ARRAY);
            from_raw(f(self.env, length, to_raw(Some(element_class)), ptr::null_mut()))
        }
    }

    fn get_object_array_element(&self, array: RemoteRef, index: i32) -> Option<RemoteRef> {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, i32) -> JObject =
                self.function(index::GET_OBJECT_ARRAY_ELEMENT);
            from_raw(f(self.env, to_raw(Some(array)), index))
        }
    }

    fn set_object_array_element(&self, array: RemoteRef, index: i32, value: Option<RemoteRef>) {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, i32, JObject) =
                self.function(index::SET_OBJECT_ARRAY_ELEMENT);
            f(self.env, to_raw(Some(array)), index, to_raw(value))
        }
    }

    fn new_primitive_array(&self, ty: BasicType, length: i32) -> Option<RemoteRef> {
        if !ty.is_primitive() {
            return None;
        }
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, i32) -> JObject =
                self.function(index::NEW_PRIMITIVE_ARRAY + type_index(ty) - 1);
            from_raw(f(self.env, length))
        }
    }

    fn get_primitive_array_region(&self, array: RemoteRef, ty: BasicType, start: i32, buf: &mut [u8]) {
        let len = (buf.len() / ty.element_size().max(1)) as i32;
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, i32, i32, *mut c_void) =
                self.function(index::GET_ARRAY_REGION + type_index(ty) - 1);
            f(self.env, to_raw(Some(array)), start, len, buf.as_mut_ptr() as *mut c_void)
        }
    }

    fn set_primitive_array_region(&self, array: RemoteRef, ty: BasicType, start: i32, buf: &[u8]) {
        let len = (buf.len() / ty.element_size().max(1)) as i32;
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, i32, i32, *const c_void) =
                self.function(index::SET_ARRAY_REGION + type_index(ty) - 1);
            f(self.env, to_raw(Some(array)), start, len, buf.as_ptr() as *const c_void)
        }
    }

    fn new_string_utf(&self, s: &str) -> Option<RemoteRef> {
        // Modified UTF-8 never contains a NUL byte
        let utf = CString::new(to_modified_utf8(s)).ok()?;
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, *const c_char) -> JObject = self.function(index::NEW_STRING_UTF);
            from_raw(f(self.env, utf.as_ptr()))
        }
    }

    fn get_string_utf(&self, s: RemoteRef) -> String {
        let string = to_raw(Some(s));
        unsafe {
            let length: unsafe extern "system" fn(RawEnv, JObject) -> i32 = self.function(index::GET_STRING_UTF_LENGTH);
            let get: unsafe extern "system" fn(RawEnv, JObject, *mut u8) -> *const c_char =
                self.function(index::GET_STRING_UTF_CHARS);
            let release: unsafe extern "system" fn(RawEnv, JObject, *const c_char) =
                self.function(index::RELEASE_STRING_UTF_CHARS);
            let len = length(self.env, string).max(0) as usize;
            let chars = get(self.env, string, ptr::null_mut());
            if chars.is_null() {
                return String::new();
            }
            let result = from_modified_utf8(std::slice::from_raw_parts(chars as *const u8, len));
            release(self.env, string, chars);
            result
        }
    }

    fn new_local_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        from_raw(unsafe { self.one_ref(index::NEW_LOCAL_REF, to_raw(Some(object))) })
    }

    fn delete_local_ref(&self, object: RemoteRef) {
        unsafe { self.release_ref(index::DELETE_LOCAL_REF, to_raw(Some(object))) }
    }

    fn new_global_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        from_raw(unsafe { self.one_ref(index::NEW_GLOBAL_REF, to_raw(Some(object))) })
    }

    fn delete_global_ref(&self, object: RemoteRef) {
        unsafe { self.release_ref(index::DELETE_GLOBAL_REF, to_raw(Some(object))) }
    }

    fn new_weak_global_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        from_raw(unsafe { self.one_ref(index::NEW_WEAK_GLOBAL_REF, to_raw(Some(object))) })
    }

    fn delete_weak_global_ref(&self, object: RemoteRef) {
        unsafe { self.release_ref(index::DELETE_WEAK_GLOBAL_REF, to_raw(Some(object))) }
    }

    fn is_same_object(&self, a: Option<RemoteRef>, b: Option<RemoteRef>) -> bool {
        unsafe {
            let f: unsafe extern "system" fn(RawEnv, JObject, JObject) -> u8 = self.function(index::IS_SAME_OBJECT);
            f(self.env, to_raw(a), to_raw(b)) != 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_utf8() {
        assert_eq!(to_modified_utf8("abc"), b"abc".to_vec());
        assert_eq!(to_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        // A supplementary character is a surrogate pair, three bytes per half
        let clef = "\u{1D11E}";
        let encoded = to_modified_utf8(clef);
        assert_eq!(encoded.len(), 6);
        assert_eq!(from_modified_utf8(&encoded), clef);
        assert_eq!(from_modified_utf8(&to_modified_utf8("h\u{e9}\0")), "h\u{e9}\0");
    }

    #[test]
    fn function_table_families() {
        // Call<Type>MethodA and CallStatic<Type>MethodA end with the Void entries
        assert_eq!(index::CALL_METHOD_A + 3 * type_index(BasicType::Void), 63);
        assert_eq!(index::CALL_STATIC_METHOD_A + 3 * type_index(BasicType::Void), 143);
        assert_eq!(index::GET_FIELD + type_index(BasicType::Double), 103);
        assert_eq!(index::SET_STATIC_FIELD + type_index(BasicType::Double), 162);
        assert_eq!(index::NEW_PRIMITIVE_ARRAY + type_index(BasicType::Double) - 1, 182);
        assert_eq!(index::SET_ARRAY_REGION + type_index(BasicType::Double) - 1, 214);
    }

    #[test]
    fn library_path() {
        let file_name = PathBuf::from(libloading::library_filename(LIBRARY_NAME));
        assert_eq!(SharedLibrary::library_path(""), file_name);
        assert_eq!(SharedLibrary::library_path("/tmp"), Path::new("/tmp").join(&file_name));
        assert_eq!(SharedLibrary::library_path("/opt/lib/custom.so"), PathBuf::from("/opt/lib/custom.so"));
    }
}
