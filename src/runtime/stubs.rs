//! The runtime functions that compiled code calls.
//!
//! Compiled code enters these through the VM's transition wrappers, which move the thread into
//! the VM before calling and back afterwards. Allocation stubs return their object in the thread's
//! `vm_result` slot and signal failure with a pending exception. The `_or_null` variants are used by
//! code that deoptimizes and retries in the interpreter when allocation fails: they never leave an
//! exception pending and return no object instead.

use crate::jvmci::JVMCI;
use crate::util::{Address, ObjectReference, VMThread};
use crate::vm::{BasicType, DeoptReason, KlassRef, PrimitiveValue, VMBinding};

/// Makes allocations fail with the preallocated retry `OutOfMemoryError` while it is alive, then
/// clears the error and the result when it is dropped.
struct RetryableAllocationMark<VM: VMBinding> {
    thread: Option<VMThread>,
    phantom: std::marker::PhantomData<VM>,
}

impl<VM: VMBinding> RetryableAllocationMark<VM> {
    fn new(thread: VMThread, activate: bool) -> Self {
        if activate {
            debug_assert!(!VM::in_retryable_allocation(thread), "retryable allocation scopes cannot nest");
            VM::set_in_retryable_allocation(thread, true);
        }
        RetryableAllocationMark {
            thread: activate.then_some(thread),
            phantom: std::marker::PhantomData,
        }
    }
}

impl<VM: VMBinding> Drop for RetryableAllocationMark<VM> {
    fn drop(&mut self) {
        let thread = match self.thread {
            Some(thread) => thread,
            None => return,
        };
        VM::set_in_retryable_allocation(thread, false);
        if let Some(exception) = VM::pending_exception(thread) {
            VM::clear_pending_exception(thread);
            if VM::is_out_of_memory_error(exception) && !VM::is_retry_out_of_memory_error(exception) {
                VM::fatal(&format!(
                    "Unexpected exception in scope of retryable allocation: {} of type {}",
                    exception,
                    VM::class_name_of(exception)
                ));
            }
            VM::set_vm_result(thread, None);
        }
    }
}

/// Let the collector see the new object before compiled code initializes it without card marks.
fn on_slowpath_allocation_exit<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread) {
    if !jvmci.options.reduce_initial_card_marks {
        return;
    }
    if let Some(object) = VM::vm_result(thread) {
        if !VM::can_elide_initializing_store_barrier(object) {
            let object = VM::on_slowpath_allocation_exit(thread, object);
            VM::set_vm_result(thread, Some(object));
        }
    }
}

/// Create an exception and leave it pending. If creating it raises, that exception is pending instead.
fn throw_new<VM: VMBinding>(thread: VMThread, class_name: &str, message: Option<&str>) {
    if let Ok(exception) = VM::new_throwable(thread, class_name, message) {
        VM::set_pending_exception(thread, exception);
    }
}

fn raise_and_post<VM: VMBinding>(thread: VMThread, class_name: &str, message: Option<&str>) {
    throw_new::<VM>(thread, class_name, message);
    if VM::jvmti_should_post_on_exceptions(thread) {
        if let Some(exception) = VM::pending_exception(thread) {
            VM::post_exception_throw(thread, exception);
        }
    }
}

fn deopt_caller<VM: VMBinding>(thread: VMThread) {
    if !VM::caller_is_deoptimized(thread) {
        VM::deoptimize_caller(thread, DeoptReason::Constraint);
        debug_assert!(VM::caller_is_deoptimized(thread), "must be deoptimized");
    }
}

/// The Java name of a class, with dots instead of slashes.
fn external_name<VM: VMBinding>(klass: KlassRef) -> String {
    VM::klass_name(klass).replace('/', ".")
}

// --- Allocation ---

fn new_instance_common<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, klass: KlassRef, null_on_fail: bool) {
    {
        let _mark = RetryableAllocationMark::<VM>::new(thread, null_on_fail);
        if VM::check_valid_for_instantiation(thread, klass).is_err() {
            return;
        }
        if null_on_fail {
            // Class initialization cannot be re-executed without side effects
            if !VM::klass_is_initialized(klass) {
                return;
            }
        } else if VM::initialize_klass(thread, klass).is_err() {
            return;
        }
        match VM::allocate_instance(thread, klass) {
            Ok(object) => VM::set_vm_result(thread, Some(object)),
            Err(_) => return,
        }
    }
    on_slowpath_allocation_exit(jvmci, thread);
}

pub fn new_instance<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, klass: KlassRef) {
    new_instance_common(jvmci, thread, klass, false)
}

pub fn new_instance_or_null<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, klass: KlassRef) {
    new_instance_common(jvmci, thread, klass, true)
}

fn new_array_common<VM: VMBinding>(
    jvmci: &JVMCI<VM>,
    thread: VMThread,
    array_klass: KlassRef,
    length: i32,
    null_on_fail: bool,
) {
    {
        let _mark = RetryableAllocationMark::<VM>::new(thread, null_on_fail);
        match VM::allocate_array(thread, array_klass, length) {
            Ok(array) => VM::set_vm_result(thread, Some(array)),
            Err(_) => return,
        }
    }
    on_slowpath_allocation_exit(jvmci, thread);

    if jvmci.options.deoptimize_a_lot && jvmci.state().should_deopt_new_array() {
        deopt_caller::<VM>(thread);
    }
}

pub fn new_array<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, array_klass: KlassRef, length: i32) {
    new_array_common(jvmci, thread, array_klass, length, false)
}

pub fn new_array_or_null<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, array_klass: KlassRef, length: i32) {
    new_array_common(jvmci, thread, array_klass, length, true)
}

fn new_multi_array_common<VM: VMBinding>(thread: VMThread, klass: KlassRef, dims: &[i32], null_on_fail: bool) {
    debug_assert!(!dims.is_empty(), "multi-array needs at least one dimension");
    let _mark = RetryableAllocationMark::<VM>::new(thread, null_on_fail);
    if let Ok(array) = VM::allocate_multi_array(thread, klass, dims) {
        VM::set_vm_result(thread, Some(array));
    }
}

pub fn new_multi_array<VM: VMBinding>(thread: VMThread, klass: KlassRef, dims: &[i32]) {
    new_multi_array_common::<VM>(thread, klass, dims, false)
}

pub fn new_multi_array_or_null<VM: VMBinding>(thread: VMThread, klass: KlassRef, dims: &[i32]) {
    new_multi_array_common::<VM>(thread, klass, dims, true)
}

fn dynamic_new_array_common<VM: VMBinding>(
    thread: VMThread,
    element_mirror: ObjectReference,
    length: i32,
    null_on_fail: bool,
) {
    let _mark = RetryableAllocationMark::<VM>::new(thread, null_on_fail);
    if let Ok(array) = VM::reflect_new_array(thread, element_mirror, length) {
        VM::set_vm_result(thread, Some(array));
    }
}

/// `Array.newInstance`, with the element type given by its mirror.
pub fn dynamic_new_array<VM: VMBinding>(thread: VMThread, element_mirror: ObjectReference, length: i32) {
    dynamic_new_array_common::<VM>(thread, element_mirror, length, false)
}

pub fn dynamic_new_array_or_null<VM: VMBinding>(thread: VMThread, element_mirror: ObjectReference, length: i32) {
    dynamic_new_array_common::<VM>(thread, element_mirror, length, true)
}

fn dynamic_new_instance_common<VM: VMBinding>(
    thread: VMThread,
    type_mirror: Option<ObjectReference>,
    null_on_fail: bool,
) {
    let klass = match type_mirror.and_then(VM::mirror_to_klass) {
        Some(klass) => klass,
        None => {
            // Also for the mirrors of primitive types
            throw_new::<VM>(thread, "java/lang/InstantiationException", None);
            return;
        }
    };
    let _mark = RetryableAllocationMark::<VM>::new(thread, null_on_fail);
    if VM::check_valid_for_instantiation(thread, klass).is_err() {
        return;
    }
    if null_on_fail {
        if !VM::klass_is_initialized(klass) {
            return;
        }
    } else if VM::initialize_klass(thread, klass).is_err() {
        return;
    }
    if let Ok(object) = VM::allocate_instance(thread, klass) {
        VM::set_vm_result(thread, Some(object));
    }
}

/// `Class.newInstance` without running a constructor.
pub fn dynamic_new_instance<VM: VMBinding>(thread: VMThread, type_mirror: Option<ObjectReference>) {
    dynamic_new_instance_common::<VM>(thread, type_mirror, false)
}

pub fn dynamic_new_instance_or_null<VM: VMBinding>(thread: VMThread, type_mirror: Option<ObjectReference>) {
    dynamic_new_instance_common::<VM>(thread, type_mirror, true)
}

// --- Locking ---

pub fn monitorenter<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, object: ObjectReference, lock: Address) {
    trace!("{:?}: entering locking slow case with obj={} and lock={}", thread, object, lock);
    let options = &jvmci.options;
    let result = if options.use_biased_locking {
        // Revoking the bias first avoids inflating the lock
        VM::revoke_biased_lock(thread, object);
        VM::monitor_enter(thread, object, lock, true)
    } else {
        // With fast locking, compiled code already tried the fast case
        VM::monitor_enter(thread, object, lock, !options.jvmci_use_fast_locking)
    };
    if result.is_ok() {
        trace!("{:?}: exiting locking slow case with obj={}", thread, object);
    }
}

/// Never raises.
pub fn monitorexit<VM: VMBinding>(jvmci: &JVMCI<VM>, thread: VMThread, object: ObjectReference, lock: Address) {
    debug_assert!(VM::pending_exception(thread).is_none(), "monitorexit with a pending exception");
    trace!("{:?}: entering unlocking slow case with obj={} and lock={}", thread, object, lock);
    VM::monitor_exit(thread, object, lock, !jvmci.options.jvmci_use_fast_locking);
}

/// The fast path of `Object.notify`. Returns false if the caller must take the slow path.
pub fn object_notify<VM: VMBinding>(thread: VMThread, object: ObjectReference) -> bool {
    VM::object_notify(thread, object, false)
}

pub fn object_notify_all<VM: VMBinding>(thread: VMThread, object: ObjectReference) -> bool {
    VM::object_notify(thread, object, true)
}

// --- Exceptions ---

/// Find the handler for the exception in the thread's exception slot. Runs in the VM.
fn exception_handler_for_pc_helper<VM: VMBinding>(
    thread: VMThread,
    exception: ObjectReference,
    mut pc: Address,
) -> Address {
    VM::set_is_method_handle_return(thread, false);
    let nm = match VM::find_nmethod(pc) {
        Some(nm) => nm,
        None => VM::fatal(&format!("{} is not in a compiled method", pc)),
    };
    if VM::is_deopt_pc(nm, pc) {
        // The frame was deoptimized. Its original pc tells where the exception was raised.
        pc = VM::deoptimized_frame_original_pc(thread);
    }
    debug!(
        "Exception <{}> thrown in compiled method <{}> at pc {}",
        VM::class_name_of(exception),
        VM::nmethod_state(nm)
            .method
            .map(|m| VM::method_name(m))
            .unwrap_or_default(),
        pc
    );

    let guard_pages_enabled = VM::stack_guards_enabled(thread) || VM::reguard_stack(thread);

    if VM::jvmti_capabilities().can_post_on_exceptions {
        // Notifying the catch here and again in the interpreter after a later deoptimization
        // would report it twice, so deoptimize now.
        VM::deoptimize_caller(thread, DeoptReason::Constraint);
        debug_assert!(VM::caller_is_deoptimized(thread), "must be deoptimized");
        return VM::deopt_blob_unpack_with_exception();
    }

    if guard_pages_enabled {
        if let Some(handler) = VM::cached_exception_handler(nm, pc, exception) {
            VM::set_is_method_handle_return(thread, VM::is_method_handle_return(nm, pc));
            return handler;
        }
    }

    // Without guard pages, the frame is unwound
    let mut continuation = Address::ZERO;
    if guard_pages_enabled {
        // Looking up the handler may load classes, which expects a clear exception slot
        VM::set_exception_oop(thread, None);
        VM::set_exception_pc(thread, Address::ZERO);

        let (handler, recursive_exception) = VM::compute_compiled_exception_handler(thread, nm, pc, exception);
        continuation = handler;
        let exception = if recursive_exception {
            // The handler is for the exception raised by the lookup
            match VM::pending_exception(thread) {
                Some(raised) => {
                    VM::clear_pending_exception(thread);
                    raised
                }
                None => exception,
            }
        } else {
            exception
        };
        VM::set_exception_oop(thread, Some(exception));
        VM::set_exception_pc(thread, pc);

        if !continuation.is_zero() && !recursive_exception && !VM::deopt_blob_contains(continuation) {
            VM::cache_exception_handler(nm, pc, exception, continuation);
        }
    }

    VM::set_is_method_handle_return(thread, VM::is_method_handle_return(nm, pc));
    trace!("Found handler {} for pc {} (guard pages enabled: {})", continuation, pc, guard_pages_enabled);
    continuation
}

/// Called by the exception stub of compiled code that has a handler for the exception in the
/// thread's exception slot. If the caller was deoptimized during the lookup, returns the entry
/// of the deoptimization blob instead of the handler.
pub fn exception_handler_for_pc<VM: VMBinding>(thread: VMThread) -> Address {
    let exception = match VM::exception_oop(thread) {
        Some(exception) => exception,
        None => VM::fatal("exception_handler_for_pc called without an exception"),
    };
    let pc = VM::exception_pc(thread);
    let mut continuation = exception_handler_for_pc_helper::<VM>(thread, exception, pc);
    // Back in Java, nothing may safepoint here
    if VM::caller_is_deoptimized(thread) {
        continuation = VM::deopt_blob_unpack_with_exception();
    }
    debug_assert!(!continuation.is_zero(), "no handler found");
    continuation
}

/// Throw a new exception of the named class. Returns whether the caller was deoptimized, in
/// which case compiled code must not continue in the calling frame.
pub fn throw_and_post_jvmti_exception<VM: VMBinding>(
    thread: VMThread,
    exception_class: &str,
    message: Option<&str>,
) -> bool {
    debug_assert!(VM::pending_exception(thread).is_none(), "exception already pending");
    raise_and_post::<VM>(thread, exception_class, message);
    VM::caller_is_deoptimized(thread)
}

/// Throw an exception whose message is the name of `klass`.
pub fn throw_klass_external_name_exception<VM: VMBinding>(
    thread: VMThread,
    exception_class: &str,
    klass: KlassRef,
) -> bool {
    let message = external_name::<VM>(klass);
    raise_and_post::<VM>(thread, exception_class, Some(&message));
    VM::caller_is_deoptimized(thread)
}

pub fn throw_class_cast_exception<VM: VMBinding>(
    thread: VMThread,
    exception_class: &str,
    caster: KlassRef,
    target: KlassRef,
) -> bool {
    let message = format!(
        "class {} cannot be cast to class {}",
        external_name::<VM>(caster),
        external_name::<VM>(target)
    );
    raise_and_post::<VM>(thread, exception_class, Some(&message));
    VM::caller_is_deoptimized(thread)
}

/// Take the exception out of the thread's exception slot.
pub fn load_and_clear_exception<VM: VMBinding>(thread: VMThread) -> Option<ObjectReference> {
    let exception = VM::exception_oop(thread);
    debug_assert!(exception.is_some(), "no exception to load");
    VM::set_exception_oop(thread, None);
    VM::set_exception_pc(thread, Address::ZERO);
    exception
}

// --- Barriers ---

pub fn write_barrier_pre<VM: VMBinding>(thread: VMThread, previous: ObjectReference) {
    VM::write_barrier_pre(thread, previous)
}

pub fn write_barrier_post<VM: VMBinding>(thread: VMThread, card_address: Address) {
    VM::write_barrier_post(thread, card_address)
}

/// Check that both objects of a field store are in the heap. Reports the objects that are not.
pub fn validate_object<VM: VMBinding>(jvmci: &JVMCI<VM>, parent: ObjectReference, child: ObjectReference) -> bool {
    let mut valid = true;
    for (role, object) in [("Parent", parent), ("Child", child)] {
        if !VM::is_valid_object(object) {
            jvmci.print_tty(&format!("{} Object {} not in heap\n", role, object));
            valid = false;
        }
    }
    valid
}

// --- Queries ---

pub fn identity_hash_code<VM: VMBinding>(object: ObjectReference) -> i32 {
    VM::identity_hash(object)
}

pub fn thread_is_interrupted<VM: VMBinding>(thread: VMThread, receiver: ObjectReference, clear_interrupted: bool) -> bool {
    VM::thread_is_interrupted(thread, receiver, clear_interrupted)
}

/// Deoptimize the caller and return `value`. For testing deoptimization.
pub fn test_deoptimize_call_int<VM: VMBinding>(thread: VMThread, value: i32) -> i32 {
    deopt_caller::<VM>(thread);
    value
}

// --- Logging ---

/// Print a message, or with `vm_error` set, report a fatal error. Without a format, `v1` is
/// described instead.
pub fn vm_message<VM: VMBinding>(jvmci: &JVMCI<VM>, vm_error: bool, format: Option<&str>, v1: i64, v2: i64, v3: i64) {
    if vm_error {
        match format {
            Some(format) => VM::fatal(&format_printf::<VM>(format, &[v1, v2, v3])),
            None => VM::fatal("<anonymous error>"),
        }
    }
    match format {
        Some(format) => jvmci.print_tty(&format_printf::<VM>(format, &[v1, v2, v3])),
        None => {
            debug_assert!(v2 == 0 && v3 == 0, "only v1 is described");
            jvmci.print_tty(&VM::describe_value(v1));
        }
    }
}

/// Report a fatal error raised by compiled code.
pub fn vm_error<VM: VMBinding>(location: Option<&str>, format: Option<&str>, value: i64) -> ! {
    let message = location.unwrap_or("<internal JVMCI error>");
    match format {
        Some(format) => VM::fatal(&format!("{}: {}", message, format_printf::<VM>(format, &[value]))),
        None => VM::fatal(message),
    }
}

pub fn log_object<VM: VMBinding>(jvmci: &JVMCI<VM>, object: Option<ObjectReference>, as_string: bool, newline: bool) {
    let mut out = match object {
        None => "NULL".to_string(),
        Some(object) if as_string && VM::is_instance_of(object, "java/lang/String") => VM::string_value(object),
        Some(object) if VM::is_valid_object(object) => format!("{}@{}", VM::class_name_of(object), object),
        Some(object) => format!("{}", object),
    };
    if newline {
        out.push('\n');
    }
    jvmci.print_tty(&out);
}

/// Print a primitive value given as its type character and raw bits.
pub fn log_primitive<VM: VMBinding>(jvmci: &JVMCI<VM>, type_char: char, value: i64, newline: bool) {
    let parsed = BasicType::from_descriptor(&type_char.to_string()).and_then(|ty| PrimitiveValue::from_raw_bits(ty, value));
    let mut out = match parsed {
        Some(PrimitiveValue::Boolean(_)) => (if value == 0 { "false" } else { "true" }).to_string(),
        Some(PrimitiveValue::Byte(v)) => v.to_string(),
        Some(PrimitiveValue::Char(v)) => char::from_u32(v as u32).unwrap_or(char::REPLACEMENT_CHARACTER).to_string(),
        Some(PrimitiveValue::Short(v)) => v.to_string(),
        Some(PrimitiveValue::Int(v)) => v.to_string(),
        Some(PrimitiveValue::Long(v)) => v.to_string(),
        Some(PrimitiveValue::Float(v)) => format!("{:.6}", v),
        Some(PrimitiveValue::Double(v)) => format!("{:.6}", v),
        None => {
            warn!("log_primitive: unknown type char {:?}", type_char);
            return;
        }
    };
    if newline {
        out.push('\n');
    }
    jvmci.print_tty(&out);
}

pub fn log_printf<VM: VMBinding>(jvmci: &JVMCI<VM>, format: &str, v1: i64, v2: i64, v3: i64) {
    jvmci.print_tty(&format_printf::<VM>(format, &[v1, v2, v3]));
}

/// Widths and precisions above this are clamped.
const MAX_PRINTF_FIELD: usize = 4096;

/// Format `args` with a printf format string. Every conversion consumes one argument. `%s` cannot
/// read a string from compiled code, so it prints what the VM knows about the value.
pub(crate) fn format_printf<VM: VMBinding>(format: &str, args: &[i64]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter().copied();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut left_align = false;
        let mut zero_pad = false;
        let mut alternate = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '#' => alternate = true,
                '+' | ' ' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width.saturating_mul(10).saturating_add(d as usize).min(MAX_PRINTF_FIELD);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p.saturating_mul(10).saturating_add(d as usize).min(MAX_PRINTF_FIELD);
                chars.next();
            }
            precision = Some(p);
        }
        while matches!(chars.peek(), Some('l' | 'h' | 'z' | 'j' | 't' | 'L')) {
            chars.next();
        }
        let conversion = match chars.next() {
            Some(conversion) => conversion,
            None => {
                out.push('%');
                break;
            }
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = args.next().unwrap_or(0);
        let body = match conversion {
            'd' | 'i' => value.to_string(),
            'u' => (value as u64).to_string(),
            'x' if alternate => format!("{:#x}", value),
            'x' => format!("{:x}", value),
            'X' => format!("{:X}", value),
            'o' => format!("{:o}", value),
            'p' => format!("{:#018x}", value),
            'c' => char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER).to_string(),
            'f' | 'F' | 'e' | 'g' => format!("{:.*}", precision.unwrap_or(6), f64::from_bits(value as u64)),
            's' => VM::describe_value(value),
            other => format!("%{}", other),
        };
        let padding = width.saturating_sub(body.chars().count());
        if left_align {
            out.push_str(&body);
            out.extend(std::iter::repeat(' ').take(padding));
        } else if zero_pad && conversion != 's' && conversion != 'c' {
            let (sign, digits) = match body.strip_prefix('-') {
                Some(digits) => ("-", digits),
                None => ("", body.as_str()),
            };
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(padding));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat(' ').take(padding));
            out.push_str(&body);
        }
    }
    out
}
