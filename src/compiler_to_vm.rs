//! The VM services the compiler calls.
//!
//! These are the entry points behind the compiler's `CompilerToVM` native methods. Each takes the
//! environment of the call (see [`JVMCIEnv::for_java_caller`] and [`JVMCIEnv::for_caller`]) and
//! the compiler objects passed in. An error is raised in the compiler when the environment is
//! dropped, usually after [`JVMCIEnv::propagate`] recorded it.
//!
//! A binding exposes these functions to the compiler as native methods, and is responsible for
//! the unsafety of doing so.

use std::fmt::Write;

use crate::code::{self, stream, CompiledCodeKind};
use crate::env::{
    ExceptionKind, HandleStrength, JVMCIClass, JVMCIEnv, JVMCIError, JVMCIField, JVMCIHandle, JVMCIMethod, JVMCIObject,
    JVMCIObjectArray, JVMCIPrimitiveArray, JVMCIResult, JVMCIValue, Mode,
};
use crate::jvmci::CodeInstallResult;
use crate::util::bytecodes;
use crate::util::compiler_options::{str_similar, FUZZY_MATCH_SIMILARITY};
use crate::util::hashtable::{HandleTable, LongKey, StrKey};
use crate::util::{Address, ObjectReference};
use crate::vm::{
    ExceptionTableEntry, FlagValue, FrameInfo, KlassRef, LocalVariableEntry, MethodRef, PrimitiveValue, VMBinding,
    VMFlag, VMStructEntry, Value,
};

fn non_null(object: Option<JVMCIObject>) -> JVMCIResult<JVMCIObject> {
    object.ok_or_else(JVMCIError::null_pointer)
}

fn illegal_state(message: &str) -> JVMCIError {
    JVMCIError::new(ExceptionKind::IllegalStateException, message)
}

/// `java/lang/String` becomes `java.lang.String`.
fn external_name(name: &str) -> String {
    name.replace('/', ".")
}

// --- Configuration ---

struct CachedLong {
    value: i64,
    object: JVMCIObject,
}

impl AsRef<i64> for CachedLong {
    fn as_ref(&self) -> &i64 {
        &self.value
    }
}

struct CachedString {
    value: String,
    object: JVMCIObject,
}

impl AsRef<str> for CachedString {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

/// Canonical boxes and strings for the configuration, so each distinct value is created once.
struct ConfigCache {
    longs: HandleTable<CachedLong, LongKey>,
    strings: HandleTable<CachedString, StrKey>,
    boxed_true: JVMCIObject,
    boxed_false: JVMCIObject,
}

const CONFIG_CACHE_SIZE: usize = 256;

impl ConfigCache {
    fn new<VM: VMBinding>(env: &JVMCIEnv<VM>) -> JVMCIResult<Self> {
        Ok(ConfigCache {
            longs: HandleTable::new(CONFIG_CACHE_SIZE),
            strings: HandleTable::new(CONFIG_CACHE_SIZE),
            boxed_true: env.create_box(PrimitiveValue::Boolean(true))?,
            boxed_false: env.create_box(PrimitiveValue::Boolean(false))?,
        })
    }

    fn long<VM: VMBinding>(&mut self, env: &JVMCIEnv<VM>, value: i64) -> JVMCIResult<JVMCIObject> {
        if let Some(cached) = self.longs.get(&value) {
            return Ok(cached.object);
        }
        let object = env.create_box(PrimitiveValue::Long(value))?;
        self.longs.add(CachedLong { value, object });
        Ok(object)
    }

    fn string<VM: VMBinding>(&mut self, env: &JVMCIEnv<VM>, value: &str) -> JVMCIResult<JVMCIObject> {
        if let Some(cached) = self.strings.get(value) {
            return Ok(cached.object);
        }
        let object = env.create_string(value)?;
        self.strings.add(CachedString {
            value: value.to_string(),
            object,
        });
        Ok(object)
    }

    fn boolean(&self, value: bool) -> JVMCIObject {
        if value {
            self.boxed_true
        } else {
            self.boxed_false
        }
    }
}

/// The value of a static VM field whose type the compiler can read, boxed.
fn static_field_value<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    cache: &mut ConfigCache,
    field: &VMStructEntry,
) -> JVMCIResult<Option<JVMCIObject>> {
    if !field.is_static || field.type_string.is_empty() || field.address.is_zero() {
        return Ok(None);
    }
    let ty = field.type_string.as_str();
    // The VM exports the address of a live static of the named type
    let value = unsafe {
        match ty {
            "bool" => return Ok(Some(cache.boolean(field.address.load::<u8>() != 0))),
            "int" | "jint" => field.address.load::<i32>() as i64,
            "uint64_t" => field.address.load::<u64>() as i64,
            "address" | "intptr_t" | "uintptr_t" | "size_t" => field.address.load::<usize>() as i64,
            _ if ty.ends_with('*') => field.address.load::<usize>() as i64,
            _ => return Ok(None),
        }
    };
    cache.long(env, value).map(Some)
}

/// Box a flag value. `None` for a `ccstr` flag that is not set.
fn flag_value<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    cache: Option<&mut ConfigCache>,
    flag: &VMFlag,
) -> JVMCIResult<Option<JVMCIObject>> {
    let long = match &flag.value {
        FlagValue::Bool(b) => {
            return match cache {
                Some(cache) => Ok(Some(cache.boolean(*b))),
                None => env.create_box(PrimitiveValue::Boolean(*b)).map(Some),
            }
        }
        FlagValue::Ccstr(s) => return s.as_deref().map(|s| env.create_string(s)).transpose(),
        FlagValue::Double(d) => return env.create_box(PrimitiveValue::Double(*d)).map(Some),
        FlagValue::Intx(v) => *v,
        FlagValue::Uintx(v) | FlagValue::Uint64(v) => *v as i64,
        FlagValue::Other(ty) => {
            return Err(JVMCIError::jvmci(format!(
                "VM flag {} has unsupported type {}",
                flag.name, ty
            )))
        }
    };
    match cache {
        Some(cache) => cache.long(env, long).map(Some),
        None => env.create_box(PrimitiveValue::Long(long)).map(Some),
    }
}

/// Export the VM configuration. The result is an `Object[5]` of:
///
/// 0. the VM structure fields, as `VMField[]`,
/// 1. the integer and long constants, as `{name, Long}` pairs,
/// 2. the addresses, as `{name, Long}` pairs,
/// 3. the flags, as `VMFlag[]`,
/// 4. the intrinsics, as `VMIntrinsicMethod[]`.
///
/// Equal longs and strings share one object.
pub fn read_configuration<VM: VMBinding>(env: &JVMCIEnv<VM>) -> JVMCIResult<JVMCIObjectArray> {
    let mut cache = ConfigCache::new(env)?;

    let structs = VM::vm_structs();
    let fields = env.new_object_array(JVMCIClass::VMField, structs.len() as i32)?;
    for (i, field) in structs.iter().enumerate() {
        let name = cache.string(env, &format!("{}::{}", field.type_name, field.field_name))?;
        let ty = if field.type_string.is_empty() {
            None
        } else {
            Some(cache.string(env, &field.type_string)?)
        };
        let value = static_field_value(env, &mut cache, field)?;
        let object = env.call_for_object(
            JVMCIMethod::VMFieldConstructor,
            None,
            &[
                Value::Object(Some(name)),
                Value::Object(ty),
                Value::Primitive(PrimitiveValue::Long(field.offset as i64)),
                Value::Primitive(PrimitiveValue::Long(field.address.as_jlong())),
                Value::Object(value),
            ],
        )?;
        env.put_object_at(fields, i as i32, Some(object))?;
    }

    let constants: Vec<(String, i64)> = VM::vm_int_constants()
        .into_iter()
        .chain(VM::vm_long_constants())
        .collect();
    let constants_array = env.new_object_array(JVMCIClass::Object, constants.len() as i32 * 2)?;
    for (i, (name, value)) in constants.iter().enumerate() {
        env.put_object_at(constants_array, i as i32 * 2, Some(cache.string(env, name)?))?;
        env.put_object_at(constants_array, i as i32 * 2 + 1, Some(cache.long(env, *value)?))?;
    }

    let addresses = VM::vm_addresses();
    let addresses_array = env.new_object_array(JVMCIClass::Object, addresses.len() as i32 * 2)?;
    for (i, (name, address)) in addresses.iter().enumerate() {
        env.put_object_at(addresses_array, i as i32 * 2, Some(cache.string(env, name)?))?;
        env.put_object_at(addresses_array, i as i32 * 2 + 1, Some(cache.long(env, address.as_jlong())?))?;
    }

    let flags = VM::vm_flags();
    let flags_array = env.new_object_array(JVMCIClass::VMFlag, flags.len() as i32)?;
    for (i, flag) in flags.iter().enumerate() {
        let name = cache.string(env, &flag.name)?;
        let ty = cache.string(env, flag.value.type_name())?;
        let value = flag_value(env, Some(&mut cache), flag)?;
        let object = env.call_for_object(
            JVMCIMethod::VMFlagConstructor,
            None,
            &[Value::Object(Some(name)), Value::Object(Some(ty)), Value::Object(value)],
        )?;
        env.put_object_at(flags_array, i as i32, Some(object))?;
    }

    let intrinsics = VM::vm_intrinsics();
    let intrinsics_array = env.new_object_array(JVMCIClass::VMIntrinsicMethod, intrinsics.len() as i32)?;
    for (i, intrinsic) in intrinsics.iter().enumerate() {
        let object = env.call_for_object(
            JVMCIMethod::VMIntrinsicMethodConstructor,
            None,
            &[
                Value::Object(Some(cache.string(env, &intrinsic.holder)?)),
                Value::Object(Some(cache.string(env, &intrinsic.name)?)),
                Value::Object(Some(cache.string(env, &intrinsic.signature)?)),
                Value::Primitive(PrimitiveValue::Int(intrinsic.id)),
            ],
        )?;
        env.put_object_at(intrinsics_array, i as i32, Some(object))?;
    }

    debug!(
        "Exported VM configuration: {} fields, {} constants, {} addresses, {} flags, {} intrinsics",
        structs.len(),
        constants.len(),
        addresses.len(),
        flags.len(),
        intrinsics.len()
    );
    let data = env.new_object_array(JVMCIClass::Object, 5)?;
    for (i, part) in [fields, constants_array, addresses_array, flags_array, intrinsics_array]
        .into_iter()
        .enumerate()
    {
        env.put_object_at(data, i as i32, Some(part.0))?;
    }
    Ok(data)
}

/// The boxed value of the named VM flag, or `sentinel` if there is no such flag.
pub fn get_flag_value<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    name: Option<JVMCIObject>,
    sentinel: JVMCIObject,
) -> JVMCIResult<Option<JVMCIObject>> {
    let name = env.as_utf8_string(non_null(name)?)?;
    match VM::find_flag(&name) {
        Some(flag) => flag_value(env, None, &flag),
        None => Ok(Some(sentinel)),
    }
}

/// Find a VM flag by name. For an unknown name, the error message suggests the most similar flag.
pub fn lookup_flag<VM: VMBinding>(name: &str) -> Result<VMFlag, String> {
    if let Some(flag) = VM::find_flag(name) {
        return Ok(flag);
    }
    let mut best: Option<(VMFlag, f32)> = None;
    for flag in VM::vm_flags() {
        let score = str_similar(&flag.name, name);
        if score >= FUZZY_MATCH_SIMILARITY && best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((flag, score));
        }
    }
    let mut message = format!("Unrecognized VM option '{}'", name);
    if let Some((flag, _)) = best {
        let is_bool = matches!(flag.value, FlagValue::Bool(_));
        message.push_str(&format!(
            "\nDid you mean '{}{}{}'?",
            if is_bool { "(+/-)" } else { "" },
            flag.name,
            if is_bool { "" } else { "=<value>" }
        ));
    }
    Err(message)
}

// --- Installed code ---

/// Install serialized compiled code. `object_pool` holds the object constants the stream refers
/// to by index. If the install fails with a reason, it is stored in the compiled code's
/// `installationFailureMessage`.
pub fn install_code<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    compiled_code: JVMCIObject,
    serialized: JVMCIPrimitiveArray,
    object_pool: Option<JVMCIObjectArray>,
    installed_code: Option<JVMCIObject>,
    speculation_log: Option<JVMCIObject>,
) -> JVMCIResult<CodeInstallResult> {
    // Data released by the GC may refer to the compiler heap, so it is only destroyed here
    env.jvmci().release_queued_nmethod_data(env.thread());

    let bytes = env.read_byte_array(serialized)?;
    let mut pool: Vec<ObjectReference> = vec![];
    if let Some(object_pool) = object_pool {
        for i in 0..env.get_array_length(object_pool.0)? {
            let constant = non_null(env.get_object_at(object_pool, i)?)?;
            pool.push(env.as_constant(constant)?);
        }
    }
    let compiled = stream::decode(&bytes, &pool)?;

    // The mirror is about to be linked to the new code. The code it was linked to must not stay
    // reachable through it.
    let previous = match installed_code {
        Some(mirror) if matches!(compiled.kind, CompiledCodeKind::Nmethod { .. }) && env.is_hotspot_nmethod(mirror)? => {
            env.get_nmethod(mirror)?
        }
        _ => None,
    };

    let outcome = code::CodeInstaller::<VM>::install(env, &compiled, installed_code, speculation_log)?;
    if outcome.result == CodeInstallResult::Ok {
        if let (Some(old), Some(code::InstalledBlob::NMethod(new))) = (previous, outcome.blob) {
            if old != new && VM::make_not_entrant(old) {
                debug!("Made {:?} not entrant, its mirror now links to {:?}", old, new);
            }
        }
    } else if let Some(detail) = &outcome.failure_detail {
        let message = env.create_string(detail)?;
        env.set_object_field(JVMCIField::HotSpotCompiledCodeInstallationFailureMessage, compiled_code, Some(message))?;
    }
    Ok(outcome.result)
}

/// Make the nmethod of a `HotSpotNmethod` not entrant.
pub fn invalidate_hotspot_nmethod<VM: VMBinding>(env: &JVMCIEnv<VM>, mirror: JVMCIObject) -> JVMCIResult<()> {
    env.invalidate_nmethod_mirror(mirror)
}

/// Bring a mirror up to date with its nmethod: unlink it if the nmethod is gone, and clear its
/// entry point if the nmethod is no longer entrant.
pub fn update_hotspot_nmethod_handle<VM: VMBinding>(env: &JVMCIEnv<VM>, mirror: JVMCIObject) -> JVMCIResult<()> {
    if env.get_installed_code_address(mirror)?.is_zero() {
        return Ok(());
    }
    match env.get_nmethod(mirror)? {
        Some(nm) => {
            let state = VM::nmethod_state(nm);
            if !state.is_alive {
                env.set_installed_code_address(mirror, Address::ZERO)?;
                env.set_installed_code_entry_point(mirror, Address::ZERO)
            } else if state.is_not_entrant() {
                env.set_installed_code_entry_point(mirror, Address::ZERO)
            } else {
                Ok(())
            }
        }
        None => {
            env.set_installed_code_address(mirror, Address::ZERO)?;
            env.set_installed_code_entry_point(mirror, Address::ZERO)
        }
    }
}

/// The instructions of the nmethod of a mirror, or `None` if the mirror is not linked to one.
pub fn get_code<VM: VMBinding>(env: &JVMCIEnv<VM>, mirror: JVMCIObject) -> JVMCIResult<Option<JVMCIPrimitiveArray>> {
    match env.get_nmethod(mirror)? {
        Some(nm) => env.new_byte_array_from(&VM::nmethod_code_bytes(nm)).map(Some),
        None => Ok(None),
    }
}

/// Disassemble the code of installed code. `None` if it is not linked to live code or the VM
/// cannot disassemble.
pub fn disassemble_code_blob<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    installed_code: Option<JVMCIObject>,
) -> JVMCIResult<Option<JVMCIObject>> {
    let mirror = installed_code.ok_or_else(|| JVMCIError::new(ExceptionKind::NullPointerException, "installedCode is null"))?;
    let address = env.get_installed_code_address(mirror)?;
    if address.is_zero() {
        return Ok(None);
    }
    if env.is_hotspot_nmethod(mirror)? {
        match env.get_nmethod(mirror)? {
            Some(nm) if VM::nmethod_state(nm).is_alive => {}
            _ => return Ok(None),
        }
    }
    match VM::disassemble(address) {
        Some(text) if !text.is_empty() => env.create_string(&text).map(Some),
        _ => Ok(None),
    }
}

// --- Translation between the two compiler heaps ---

/// Turn an error raised in `peer` into one that can be raised in another heap.
fn detach_throwable(error: JVMCIError) -> JVMCIError {
    match error {
        JVMCIError::Exception(mut e) => {
            e.throwable = None;
            JVMCIError::Exception(e)
        }
        other => other,
    }
}

/// Create the counterpart of a compiler object in the other compiler heap, and return a global
/// handle to it. Resolved methods and types, primitive types, object constants and
/// `HotSpotNmethod`s can be translated. The handle is turned into a reference with [`unhand`].
pub fn translate<VM: VMBinding>(env: &JVMCIEnv<VM>, object: Option<JVMCIObject>) -> JVMCIResult<i64> {
    let object = match object {
        Some(object) => object,
        None => return Ok(0),
    };
    let jvmci = env.jvmci();
    if !jvmci.has_remote_runtime() {
        return Err(JVMCIError::new(
            ExceptionKind::UnsatisfiedLinkError,
            "JVMCI shared library is unavailable",
        ));
    }
    let peer_mode = match env.mode() {
        Mode::Host => Mode::Remote,
        Mode::Remote => Mode::Host,
    };
    let peer = JVMCIEnv::with_mode(jvmci, env.thread(), peer_mode);
    let result = translate_into(env, &peer, object).and_then(|r| peer.make_global(r));
    match result {
        Ok(handle) => Ok(handle.as_jlong()),
        Err(e) => Err(detach_throwable(e)),
    }
}

fn translate_into<VM: VMBinding>(env: &JVMCIEnv<VM>, peer: &JVMCIEnv<VM>, object: JVMCIObject) -> JVMCIResult<JVMCIObject> {
    if env.is_instance_of(object, JVMCIClass::HotSpotResolvedJavaMethodImpl)? {
        peer.get_jvmci_method(env.as_method(object)?)
    } else if env.is_instance_of(object, JVMCIClass::HotSpotResolvedObjectTypeImpl)? {
        peer.get_jvmci_type(env.as_klass(object)?)
    } else if env.is_instance_of(object, JVMCIClass::HotSpotResolvedPrimitiveType)? {
        peer.get_jvmci_primitive_type(env.as_primitive_type(object)?)
    } else if env.is_instance_of(object, JVMCIClass::HotSpotObjectConstantImpl)? {
        let compressed = env.get_bool_field(JVMCIField::HotSpotObjectConstantImplCompressed, object)?;
        peer.get_object_constant(env.as_constant(object)?, compressed, false)
    } else if env.is_hotspot_nmethod(object)? {
        translate_nmethod(env, peer, object)
    } else {
        Err(JVMCIError::illegal_argument(format!(
            "Cannot translate object of type: {}",
            env.class_name(object)?
        )))
    }
}

fn translate_nmethod<VM: VMBinding>(env: &JVMCIEnv<VM>, peer: &JVMCIEnv<VM>, mirror: JVMCIObject) -> JVMCIResult<JVMCIObject> {
    let nm = env.get_nmethod(mirror)?;
    if let Some(nm) = nm {
        // The peer may already have a mirror for the nmethod
        let existing = env.jvmci().with_nmethod_data(nm, |data| data.nmethod_mirror()).flatten();
        if let Some(handle) = existing.filter(|h| h.mode() == peer.mode()) {
            if let Some(peer_mirror) = peer.resolve_handle(&handle)? {
                if peer.get_nmethod(peer_mirror)? == Some(nm) {
                    return Ok(peer_mirror);
                }
            }
        }
    }

    let method = env.as_method(non_null(env.get_object_field(JVMCIField::HotSpotNmethodMethod, mirror)?)?)?;
    let is_default = env.get_bool_field(JVMCIField::HotSpotNmethodIsDefault, mirror)?;
    let name = env
        .get_object_field(JVMCIField::InstalledCodeName, mirror)?
        .map(|n| env.as_utf8_string(n))
        .transpose()?;
    let compile_id = env.get_long_field(JVMCIField::HotSpotNmethodCompileIdSnapshot, mirror)?;
    let peer_method = peer.get_jvmci_method(method)?;
    let result = peer.new_hotspot_nmethod(peer_method, name.as_deref(), is_default, compile_id)?;
    // An nmethod that was unloaded leaves the new mirror unlinked
    if let Some(nm) = nm {
        code::bind_nmethod_mirror(peer, result, nm)?;
        env.jvmci()
            .with_nmethod_data(nm, |data| match data.nmethod_mirror() {
                Some(_) => Ok(()),
                None => data.add_nmethod_mirror(peer, result),
            })
            .transpose()?;
    }
    Ok(result)
}

/// Turn a global handle created by [`translate`] into a reference, and destroy the handle.
pub fn unhand<VM: VMBinding>(env: &JVMCIEnv<VM>, handle: i64) -> JVMCIResult<Option<JVMCIObject>> {
    // Handles passed here were created by `translate` in a peer environment of this mode
    let handle = match unsafe { JVMCIHandle::from_jlong(env.mode(), handle, HandleStrength::Global) } {
        Some(handle) => handle,
        None => return Ok(None),
    };
    let local = env
        .resolve_handle(&handle)?
        .map(|object| env.make_local(object))
        .transpose()?;
    env.destroy_handle(handle)?;
    Ok(local)
}

// --- Bytecode and method tables ---

/// The bytecodes of a method as the class file had them. The VM rewrites some bytecodes and
/// operands for the interpreter: rewritten opcodes are mapped back to standard ones, constant pool
/// indexes the VM stored in native order are stored big-endian again, and rewritten `ldc`s get
/// back their constant pool index.
pub fn get_bytecode<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<JVMCIPrimitiveArray> {
    let method = env.as_method(method)?;
    let code = reconstitute_bytecode::<VM>(method)?;
    env.new_byte_array_from(&code)
}

fn reconstitute_bytecode<VM: VMBinding>(method: MethodRef) -> JVMCIResult<Vec<u8>> {
    let raw = VM::method_bytecodes(method);
    let mut code = raw.clone();
    let mut bci = 0;
    while bci < raw.len() {
        let (java_code, resolved_reference_operand) = match VM::rewritten_bytecode(raw[bci]) {
            Some(rewritten) => (rewritten.java_code, rewritten.resolved_reference_operand),
            None => (raw[bci], false),
        };
        let length = bytecodes::instruction_length(&raw, bci, java_code).ok_or_else(|| {
            JVMCIError::Internal(format!(
                "invalid bytecode {:#04x} at bci {} of {}",
                raw[bci],
                bci,
                VM::method_name(method)
            ))
        })?;
        code[bci] = java_code;
        let operands = &mut code[bci + 1..bci + length];
        match java_code {
            bytecodes::GETSTATIC..=bytecodes::INVOKEINTERFACE => {
                let index = u16::from_ne_bytes([operands[0], operands[1]]);
                operands[..2].copy_from_slice(&index.to_be_bytes());
            }
            bytecodes::INVOKEDYNAMIC => {
                let index = u32::from_ne_bytes([operands[0], operands[1], operands[2], operands[3]]);
                operands[..4].copy_from_slice(&index.to_be_bytes());
            }
            _ => {}
        }
        if resolved_reference_operand {
            let cp = VM::method_constants(method);
            match java_code {
                bytecodes::LDC => {
                    operands[0] = VM::cp_object_to_cp_index(cp, operands[0] as i32) as u8;
                }
                bytecodes::LDC_W => {
                    let index = u16::from_ne_bytes([operands[0], operands[1]]) as i32;
                    let cp_index = VM::cp_object_to_cp_index(cp, index) as u16;
                    operands[..2].copy_from_slice(&cp_index.to_be_bytes());
                }
                _ => {}
            }
        }
        bci += length;
    }
    Ok(code)
}

pub fn get_exception_table_length<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<i32> {
    Ok(VM::method_exception_table(env.as_method(method)?).len() as i32)
}

/// The exception table of a method, in class file order.
pub fn get_exception_table<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<Vec<ExceptionTableEntry>> {
    Ok(VM::method_exception_table(env.as_method(method)?))
}

/// The line number table as a `long[]` of `bci, line` pairs, or `None` if the method has none.
pub fn get_line_number_table<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<Option<JVMCIPrimitiveArray>> {
    let table = VM::method_line_number_table(env.as_method(method)?);
    if table.is_empty() {
        return Ok(None);
    }
    let array = env.new_long_array(table.len() as i32 * 2)?;
    for (i, (bci, line)) in table.iter().enumerate() {
        env.put_long_at(array, i as i32 * 2, *bci as i64)?;
        env.put_long_at(array, i as i32 * 2 + 1, *line as i64)?;
    }
    Ok(Some(array))
}

pub fn get_local_variable_table_length<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<i32> {
    Ok(VM::method_local_variable_table(env.as_method(method)?).len() as i32)
}

pub fn get_local_variable_table<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<Vec<LocalVariableEntry>> {
    Ok(VM::method_local_variable_table(env.as_method(method)?))
}

// --- Constant pools ---

pub fn lookup_name_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, which: i32) -> JVMCIResult<JVMCIObject> {
    let name = VM::cp_name_ref_at(env.as_constant_pool(cp)?, which);
    env.create_string(&name)
}

pub fn lookup_signature_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, which: i32) -> JVMCIResult<JVMCIObject> {
    let signature = VM::cp_signature_ref_at(env.as_constant_pool(cp)?, which);
    env.create_string(&signature)
}

pub fn lookup_klass_ref_index_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<i32> {
    Ok(VM::cp_klass_ref_index_at(env.as_constant_pool(cp)?, index))
}

pub fn lookup_name_and_type_ref_index_in_pool<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    cp: JVMCIObject,
    index: i32,
) -> JVMCIResult<i32> {
    Ok(VM::cp_name_and_type_ref_index_at(env.as_constant_pool(cp)?, index))
}

/// Resolve the class at a constant pool index, loading it if needed.
pub fn resolve_type_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<JVMCIObject> {
    let cp = env.as_constant_pool(cp)?;
    let klass = env.check_host(VM::cp_resolve_klass(env.thread(), cp, index))?;
    env.get_jvmci_type(klass)
}

/// The method a call site refers to, for the invoke bytecode `opcode`. `None` if it cannot be
/// linked yet.
pub fn lookup_method_in_pool<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    cp: JVMCIObject,
    index: i32,
    opcode: u8,
) -> JVMCIResult<Option<JVMCIObject>> {
    let cp = env.as_constant_pool(cp)?;
    match env.check_host(VM::cp_lookup_method(env.thread(), cp, index, opcode))? {
        Some(method) => env.get_jvmci_method(method).map(Some),
        None => Ok(None),
    }
}

/// Resolve the field a field access refers to. Its flags, offset and index are written to `info`,
/// which must be an `int[3]`. Returns the holder of the field.
pub fn resolve_field_in_pool<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    cp: JVMCIObject,
    index: i32,
    method: Option<JVMCIObject>,
    opcode: u8,
    info: Option<JVMCIPrimitiveArray>,
) -> JVMCIResult<JVMCIObject> {
    let info = match info {
        Some(info) if env.get_array_length(info.0)? == 3 => info,
        _ => return Err(JVMCIError::jvmci("info must not be null and have a length of 3")),
    };
    let cp = env.as_constant_pool(cp)?;
    let method = method.map(|m| env.as_method(m)).transpose()?;
    let field = env.check_host(VM::cp_resolve_field(env.thread(), cp, index, method, opcode))?;
    env.put_int_at(info, 0, field.flags)?;
    env.put_int_at(info, 1, field.offset)?;
    env.put_int_at(info, 2, field.field_index)?;
    env.get_jvmci_type(field.holder)
}

/// The appendix of a linked `invokedynamic` or `invokehandle` call site, as an object constant.
pub fn lookup_appendix_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<Option<JVMCIObject>> {
    match VM::cp_lookup_appendix(env.as_constant_pool(cp)?, index) {
        Some(appendix) => env.get_object_constant(appendix, false, false).map(Some),
        None => Ok(None),
    }
}

pub fn resolve_invoke_dynamic_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<()> {
    let cp = env.as_constant_pool(cp)?;
    env.check_host(VM::cp_resolve_invoke_dynamic(env.thread(), cp, index))
}

pub fn resolve_invoke_handle_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<()> {
    let cp = env.as_constant_pool(cp)?;
    env.check_host(VM::cp_resolve_invoke_handle(env.thread(), cp, index))
}

/// Resolve an object constant (a string, method handle, method type or dynamic constant).
pub fn resolve_constant_in_pool<VM: VMBinding>(env: &JVMCIEnv<VM>, cp: JVMCIObject, index: i32) -> JVMCIResult<Option<JVMCIObject>> {
    let cp = env.as_constant_pool(cp)?;
    match env.check_host(VM::cp_resolve_constant(env.thread(), cp, index))? {
        Some(object) => env.get_object_constant(object, false, false).map(Some),
        None => Ok(None),
    }
}

// --- Types and methods ---

/// Find a class by name, as seen from `accessing`. With `resolve` set the class is loaded if it
/// is not loaded yet. Primitive types are looked up by the compiler itself.
pub fn lookup_type<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    name: JVMCIObject,
    accessing: Option<JVMCIObject>,
    resolve: bool,
) -> JVMCIResult<Option<JVMCIObject>> {
    let name = env.as_utf8_string(name)?;
    if name.chars().count() <= 1 {
        return Err(JVMCIError::new(
            ExceptionKind::InternalError,
            format!("Primitive type {} should be handled in Java code", name),
        ));
    }
    let accessing = accessing.map(|a| env.as_klass(a)).transpose()?;
    match env.check_host(VM::lookup_klass(env.thread(), &name, accessing, resolve))? {
        Some(klass) => env.get_jvmci_type(klass).map(Some),
        None => Ok(None),
    }
}

/// The single concrete implementation of `method` in the hierarchy below `holder`, if there is
/// exactly one.
pub fn find_unique_concrete_method<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    holder: JVMCIObject,
    method: JVMCIObject,
) -> JVMCIResult<Option<JVMCIObject>> {
    let holder = env.as_klass(holder)?;
    let method = env.as_method(method)?;
    if VM::klass_is_interface(holder) {
        return Err(JVMCIError::new(
            ExceptionKind::InternalError,
            format!("Interface {} should be handled in Java code", external_name(&VM::klass_name(holder))),
        ));
    }
    match VM::with_compile_lock(|| VM::find_unique_concrete_method(holder, method)) {
        Some(unique) => env.get_jvmci_method(unique).map(Some),
        None => Ok(None),
    }
}

/// The single implementor of an interface, if there is exactly one.
pub fn get_implementor<VM: VMBinding>(env: &JVMCIEnv<VM>, interface: JVMCIObject) -> JVMCIResult<Option<JVMCIObject>> {
    let klass = env.as_klass(interface)?;
    if !VM::klass_is_interface(klass) {
        return Err(JVMCIError::illegal_argument(format!(
            "Expected interface type, got {}",
            external_name(&VM::klass_name(klass))
        )));
    }
    match VM::with_compile_lock(|| VM::implementor(klass)) {
        Some(implementor) => env.get_jvmci_type(implementor).map(Some),
        None => Ok(None),
    }
}

pub fn has_finalizable_subclass<VM: VMBinding>(env: &JVMCIEnv<VM>, ty: JVMCIObject) -> JVMCIResult<bool> {
    let klass = env.as_klass(ty)?;
    Ok(VM::with_compile_lock(|| VM::has_finalizable_subclass(klass)))
}

pub fn is_compilable<VM: VMBinding>(env: &JVMCIEnv<VM>, method: JVMCIObject) -> JVMCIResult<bool> {
    Ok(VM::method_is_compilable(env.as_method(method)?))
}

/// Hand out a compile id for a compilation of the method at `entry_bci`.
pub fn allocate_compile_id<VM: VMBinding>(env: &JVMCIEnv<VM>, method: Option<JVMCIObject>, entry_bci: i32) -> JVMCIResult<i32> {
    let method = env.as_method(non_null(method)?)?;
    let code_size = VM::method_bytecodes(method).len() as i64;
    if entry_bci as i64 >= code_size || entry_bci < crate::vm::INVOCATION_ENTRY_BCI {
        return Err(JVMCIError::illegal_argument(format!("Unexpected bci {}", entry_bci)));
    }
    Ok(env.jvmci().state().allocate_compile_id())
}

// --- Object constants ---

pub fn get_identity_hash_code<VM: VMBinding>(env: &JVMCIEnv<VM>, constant: Option<JVMCIObject>) -> JVMCIResult<i32> {
    let object = env.as_constant(non_null(constant)?)?;
    Ok(VM::identity_hash(object))
}

/// Box a compiler-side box's value in the host heap, and return it as an object constant.
pub fn box_primitive<VM: VMBinding>(env: &JVMCIEnv<VM>, boxed: Option<JVMCIObject>) -> JVMCIResult<JVMCIObject> {
    let value = env.get_boxed_value(non_null(boxed)?)?;
    let host_box = env.check_host(VM::box_primitive(env.thread(), value))?;
    env.get_object_constant(host_box, false, false)
}

/// The value of a boxed object constant as a box of this heap, or `None` if it is not a box.
pub fn unbox_primitive<VM: VMBinding>(env: &JVMCIEnv<VM>, constant: Option<JVMCIObject>) -> JVMCIResult<Option<JVMCIObject>> {
    let object = env.as_constant(non_null(constant)?)?;
    VM::unbox_primitive(object).map(|value| env.create_box(value)).transpose()
}

/// The length of an array constant, or -1 if it is not an array.
pub fn get_array_length<VM: VMBinding>(env: &JVMCIEnv<VM>, constant: Option<JVMCIObject>) -> JVMCIResult<i32> {
    let object = env.as_constant(non_null(constant)?)?;
    Ok(match VM::array_element_type(object) {
        Some(_) => VM::array_length(object),
        None => -1,
    })
}

/// An element of an array constant: an object constant (`JavaConstant.NULL_POINTER` for null) or
/// a box. `None` if the constant is not an array or the index is out of bounds.
pub fn read_array_element<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    constant: Option<JVMCIObject>,
    index: i32,
) -> JVMCIResult<Option<JVMCIObject>> {
    let array = env.as_constant(non_null(constant)?)?;
    if VM::array_element_type(array).is_none() || index < 0 || index >= VM::array_length(array) {
        return Ok(None);
    }
    match VM::array_load(array, index) {
        Value::Object(Some(element)) => env.get_object_constant(element, false, false).map(Some),
        Value::Object(None) => Ok(env.get_field(JVMCIField::JavaConstantNullPointer, None)?.as_object().flatten()),
        Value::Primitive(value) => env.create_box(value).map(Some),
        Value::Void => Ok(None),
    }
}

/// Do two object constants refer to the same object?
pub fn equals<VM: VMBinding>(env: &JVMCIEnv<VM>, x: Option<JVMCIObject>, y: Option<JVMCIObject>) -> JVMCIResult<bool> {
    let x = env.as_constant(non_null(x)?)?;
    let y = env.as_constant(non_null(y)?)?;
    Ok(x == y)
}

// --- Stack frames ---

fn check_stack_walking<VM: VMBinding>(env: &JVMCIEnv<VM>) -> JVMCIResult<()> {
    if env.is_host() {
        Ok(())
    } else {
        Err(JVMCIError::new(
            ExceptionKind::InternalError,
            "Stack walking is only supported for compilers in the host heap",
        ))
    }
}

/// The position of the frame among the frames inlined into the same compiled frame.
fn frame_number(frames: &[FrameInfo], index: usize) -> i32 {
    let frame_id = frames[index].frame_id;
    frames[..index]
        .iter()
        .rev()
        .take_while(|f| f.frame_id == frame_id)
        .count() as i32
}

fn resolve_methods<VM: VMBinding>(env: &JVMCIEnv<VM>, methods: Option<&[JVMCIObject]>) -> JVMCIResult<Option<Vec<MethodRef>>> {
    methods
        .map(|methods| methods.iter().map(|m| env.as_method(*m)).collect())
        .transpose()
}

/// Create the `HotSpotStackFrameReference` of a frame.
fn new_frame_reference<VM: VMBinding>(env: &JVMCIEnv<VM>, frame: &FrameInfo, frame_number: i32) -> JVMCIResult<JVMCIObject> {
    let reference = env.call_for_object(JVMCIMethod::HotSpotStackFrameReferenceConstructor, None, &[])?;
    let method = env.get_jvmci_method(frame.method)?;
    env.set_object_field(JVMCIField::HotSpotStackFrameReferenceMethod, reference, Some(method))?;
    env.set_int_field(JVMCIField::HotSpotStackFrameReferenceBci, reference, frame.bci)?;
    env.set_long_field(JVMCIField::HotSpotStackFrameReferenceStackPointer, reference, frame.frame_id as i64)?;
    env.set_int_field(JVMCIField::HotSpotStackFrameReferenceFrameNumber, reference, frame_number)?;

    // Only reference locals are visible to the compiler
    let locals = env.new_object_array(JVMCIClass::Object, frame.locals.len() as i32)?;
    for (i, value) in frame.locals.iter().enumerate() {
        if let Value::Object(Some(object)) = value {
            env.put_object_at(locals, i as i32, Some(JVMCIObject::from_host(*object)))?;
        }
    }
    env.set_object_field(JVMCIField::HotSpotStackFrameReferenceLocals, reference, Some(locals.0))?;

    let local_is_virtual = if frame.is_compiled && !frame.virtual_locals.is_empty() {
        let array = env.new_boolean_array(frame.locals.len() as i32)?;
        for &i in frame.virtual_locals.iter() {
            env.put_bool_at(array, i as i32, true)?;
        }
        Some(array.0)
    } else {
        None
    };
    env.set_object_field(JVMCIField::HotSpotStackFrameReferenceLocalIsVirtual, reference, local_is_virtual)?;
    env.set_bool_field(JVMCIField::HotSpotStackFrameReferenceObjectsMaterialized, reference, false)?;
    Ok(reference)
}

/// Find a frame again after it was deoptimized. Returns its index in `frames`.
fn refind_frame(frames: &[FrameInfo], frame_id: usize, frame_number: i32) -> JVMCIResult<usize> {
    let first = frames
        .iter()
        .position(|f| f.frame_id == frame_id)
        .ok_or_else(|| illegal_state("stack frame not found after deopt"))?;
    if !frames[first].is_compiled {
        return Err(illegal_state("compiled stack frame expected"));
    }
    let index = first + frame_number as usize;
    match frames.get(index) {
        Some(f) if f.frame_id == frame_id => Ok(index),
        _ => Err(illegal_state("vframe not found after deopt")),
    }
}

/// Walk the Java frames of the current thread, innermost first, and call `visitor` with a
/// `HotSpotStackFrameReference` for each frame whose method is in `initial_methods`, skipping the
/// first `initial_skip` matches. After the first visit, frames are matched against
/// `match_methods`. `None` for a method list matches every frame. The walk stops at the first
/// frame for which the visitor returns a result.
///
/// If the visitor materializes the virtual objects of a frame, the walk continues from where the
/// frame is after deoptimization.
pub fn iterate_frames<VM, R, F>(
    env: &JVMCIEnv<VM>,
    initial_methods: Option<&[JVMCIObject]>,
    match_methods: Option<&[JVMCIObject]>,
    initial_skip: i32,
    mut visitor: F,
) -> JVMCIResult<Option<R>>
where
    VM: VMBinding,
    F: FnMut(JVMCIObject) -> JVMCIResult<Option<R>>,
{
    check_stack_walking(env)?;
    let thread = env.thread();
    let initial = resolve_methods(env, initial_methods)?;
    let matching = resolve_methods(env, match_methods)?;
    let mut methods = &initial;
    let mut skip = initial_skip;
    let mut frames = VM::stack_frames(thread);
    let mut index = 0;
    while index < frames.len() {
        let frame = &frames[index];
        let matched = methods.as_ref().map_or(true, |m| m.contains(&frame.method));
        if matched {
            if skip > 0 {
                skip -= 1;
            } else {
                let number = frame_number(&frames, index);
                let reference = new_frame_reference(env, frame, number)?;
                let frame_id = frame.frame_id;
                if let Some(result) = visitor(reference)? {
                    return Ok(Some(result));
                }
                methods = &matching;
                if env.get_bool_field(JVMCIField::HotSpotStackFrameReferenceObjectsMaterialized, reference)? {
                    frames = VM::stack_frames(thread);
                    index = refind_frame(&frames, frame_id, number)?;
                }
            }
        }
        index += 1;
    }
    Ok(None)
}

/// Deoptimize the compiled frame of a `HotSpotStackFrameReference` and reallocate the objects the
/// compiler scalar-replaced in it. The reference's locals are updated to the reallocated objects.
/// If `invalidate` is set, the frame's code is also made not entrant.
pub fn materialize_virtual_objects<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    frame: Option<JVMCIObject>,
    invalidate: bool,
) -> JVMCIResult<()> {
    let frame = frame.ok_or_else(|| JVMCIError::new(ExceptionKind::NullPointerException, "stack frame is null"))?;
    check_stack_walking(env)?;
    let thread = env.thread();
    let frame_id = env.get_long_field(JVMCIField::HotSpotStackFrameReferenceStackPointer, frame)? as usize;
    let number = env.get_int_field(JVMCIField::HotSpotStackFrameReferenceFrameNumber, frame)?;

    let frames = VM::stack_frames(thread);
    let first = frames
        .iter()
        .position(|f| f.frame_id == frame_id)
        .ok_or_else(|| illegal_state("stack frame not found"))?;
    if !frames[first].is_compiled {
        return Err(illegal_state("compiled stack frame expected"));
    }
    env.check_host(VM::materialize_virtual_objects(thread, frame_id, invalidate))?;

    let frames = VM::stack_frames(thread);
    let inlined: Vec<&FrameInfo> = frames.iter().filter(|f| f.frame_id == frame_id).collect();
    if inlined.is_empty() {
        return Err(illegal_state("stack frame not found after deopt"));
    }
    let target = match usize::try_from(number).ok().and_then(|n| inlined.get(n)) {
        Some(target) => *target,
        None => return Err(illegal_state("invalid frame number")),
    };

    env.set_object_field(JVMCIField::HotSpotStackFrameReferenceLocalIsVirtual, frame, None)?;
    if let Some(locals) = env.get_object_field(JVMCIField::HotSpotStackFrameReferenceLocals, frame)? {
        let locals = JVMCIObjectArray(locals);
        let length = env.get_array_length(locals.0)?.max(0) as usize;
        for (i, value) in target.locals.iter().enumerate().take(length) {
            if let Value::Object(object) = value {
                env.put_object_at(locals, i as i32, object.map(JVMCIObject::from_host))?;
            }
        }
    }
    env.set_bool_field(JVMCIField::HotSpotStackFrameReferenceObjectsMaterialized, frame, true)
}

// --- Debug output ---

/// Write `length` bytes of `bytes` starting at `offset` to the debug output.
pub fn write_debug_output<VM: VMBinding>(
    env: &JVMCIEnv<VM>,
    bytes: Option<JVMCIPrimitiveArray>,
    offset: i32,
    length: i32,
) -> JVMCIResult<()> {
    let bytes = bytes.ok_or_else(JVMCIError::null_pointer)?;
    let out_of_bounds = || JVMCIError::new(ExceptionKind::ArrayIndexOutOfBoundsException, format!("{}+{}", offset, length));
    if offset < 0 || length < 0 {
        return Err(out_of_bounds());
    }
    let array_length = env.get_array_length(bytes.0)?;
    if offset as i64 + length as i64 > array_length as i64 {
        return Err(out_of_bounds());
    }
    let mut buffer = vec![0u8; length as usize];
    env.copy_bytes_to(bytes, &mut buffer, offset)?;
    env.jvmci().write_tty(&buffer);
    Ok(())
}

pub fn flush_debug_output<VM: VMBinding>(env: &JVMCIEnv<VM>) {
    env.jvmci().flush_tty();
}

// --- Native methods ---

/// Mangle a name for a JNI symbol.
fn mangle_jni(name: &str, out: &mut String) {
    for c in name.chars() {
        match c {
            '/' => out.push('_'),
            '_' => out.push_str("_1"),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                for unit in c.encode_utf16(&mut [0; 2]).iter() {
                    let _ = write!(out, "_0{:04x}", unit);
                }
            }
        }
    }
}

/// `Java_<class>_<method>`.
fn jni_short_name(class: &str, method: &str) -> String {
    let mut name = String::from("Java_");
    mangle_jni(class, &mut name);
    name.push('_');
    mangle_jni(method, &mut name);
    name
}

/// The short name followed by `__` and the mangled argument types, for overloaded methods.
fn jni_long_name(class: &str, method: &str, signature: &str) -> String {
    let mut name = jni_short_name(class, method);
    name.push_str("__");
    let arguments = signature
        .strip_prefix('(')
        .and_then(|s| s.split_once(')'))
        .map_or("", |(args, _)| args);
    mangle_jni(arguments, &mut name);
    name
}

/// Bind the native methods of a class to the symbols `lookup` finds for them. Returns the number
/// of methods bound.
fn bind_native_methods<VM: VMBinding, L: Fn(&str) -> Option<Address>>(klass: KlassRef, lookup: L) -> JVMCIResult<usize> {
    let holder = VM::klass_name(klass);
    let mut bound = 0;
    for method in VM::native_methods(klass) {
        let name = VM::method_name(method);
        let signature = VM::method_signature(method);
        let description = format!("{}.{}{}", external_name(&holder), name, signature);
        let entry = lookup(&jni_short_name(&holder, &name))
            .or_else(|| lookup(&jni_long_name(&holder, &name, &signature)))
            .ok_or_else(|| JVMCIError::new(ExceptionKind::UnsatisfiedLinkError, description.clone()))?;
        if let Some(existing) = VM::native_function(method) {
            if existing != entry {
                return Err(JVMCIError::new(
                    ExceptionKind::UnsatisfiedLinkError,
                    format!("Cannot overwrite existing native implementation for {}", description),
                ));
            }
        }
        VM::set_native_function(method, entry);
        debug!("[Dynamic-linking native method {} ... JNI]", description);
        bound += 1;
    }
    Ok(bound)
}

/// Bind the `native` methods of a class to their implementations in the JVMCI shared library.
/// Returns the `JavaVM*` of the library's VM.
pub fn register_native_methods<VM: VMBinding>(env: &JVMCIEnv<VM>, class: Option<JVMCIObject>) -> JVMCIResult<i64> {
    let jvmci = env.jvmci();
    if !jvmci.options.use_jvmci_native_library {
        return Err(JVMCIError::new(
            ExceptionKind::UnsatisfiedLinkError,
            "JVMCI shared library is not enabled (requires UseJVMCINativeLibrary)",
        ));
    }
    let library = jvmci.shared_library().ok_or_else(|| {
        JVMCIError::new(ExceptionKind::UnsatisfiedLinkError, "JVMCI shared library is unavailable")
    })?;
    let mirror = non_null(class)?;
    let mirror = mirror.as_host().ok_or(JVMCIError::ModeMismatch {
        expected: Mode::Host,
        found: mirror.mode(),
    })?;
    let klass = match VM::mirror_to_klass(mirror) {
        Some(klass) if VM::klass_is_instance(klass) => klass,
        _ => return Err(JVMCIError::illegal_argument("clazz is for primitive type")),
    };
    bind_native_methods::<VM, _>(klass, |symbol| library.lookup(symbol))?;
    Ok(library.java_vm_address().as_jlong())
}
