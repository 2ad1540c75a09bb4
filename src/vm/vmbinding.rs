use super::types::*;
use crate::code::Dependency;
use crate::util::{Address, ObjectReference, VMThread};

use std::ops::Range;

/// The `VMBinding` trait is how the runtime reaches the host VM: its threads, heap, code cache,
/// class hierarchy and configuration. A VM implements it once, as a set of static functions, and
/// every type in this crate is parameterized by it.
///
/// Functions that may raise in the host VM return [`VMResult`]. On `Err`, the binding must have
/// left the exception pending on the given thread, where [`VMBinding::pending_exception`] finds it.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    /// The largest code blob the code cache accepts, in bytes. Larger installs fail with `code_too_large`.
    const MAX_CODE_BLOB_SIZE: usize = i32::MAX as usize;

    /// Is the host VM a debug build? Debug builds re-check class hierarchy dependencies even when
    /// no class was loaded during the compilation.
    const IS_DEBUG_BUILD: bool = false;

    // --- Threads ---

    /// Is the thread one of the VM's compiler threads?
    fn is_compiler_thread(thread: VMThread) -> bool;

    /// The exception pending on the thread, if any.
    fn pending_exception(thread: VMThread) -> Option<ObjectReference>;

    fn set_pending_exception(thread: VMThread, exception: ObjectReference);

    fn clear_pending_exception(thread: VMThread);

    /// The object result slot that runtime stubs return objects through.
    fn vm_result(thread: VMThread) -> Option<ObjectReference>;

    fn set_vm_result(thread: VMThread, result: Option<ObjectReference>);

    /// Is the thread in an allocation that should fail with the preallocated retry
    /// `OutOfMemoryError` instead of running a GC and throwing a real one?
    fn in_retryable_allocation(thread: VMThread) -> bool;

    fn set_in_retryable_allocation(thread: VMThread, value: bool);

    /// The exception being dispatched by compiled code, and the pc it was thrown at.
    fn exception_oop(thread: VMThread) -> Option<ObjectReference>;

    fn set_exception_oop(thread: VMThread, exception: Option<ObjectReference>);

    fn exception_pc(thread: VMThread) -> Address;

    fn set_exception_pc(thread: VMThread, pc: Address);

    /// Record whether the exception is being returned through a method handle call site.
    fn set_is_method_handle_return(thread: VMThread, value: bool);

    /// The id of the speculation that failed in the last deoptimization of this thread, or 0.
    fn pending_failed_speculation(thread: VMThread) -> i64;

    fn set_pending_failed_speculation(thread: VMThread, speculation: i64);

    /// Is the thread currently calling into the compiler to adjust a compilation level?
    fn adjusting_comp_level(thread: VMThread) -> bool;

    fn set_adjusting_comp_level(thread: VMThread, value: bool);

    /// Query the interrupted flag of the Java thread `receiver`, optionally clearing it.
    fn thread_is_interrupted(thread: VMThread, receiver: ObjectReference, clear_interrupted: bool) -> bool;

    /// Are the stack guard pages of the thread in place?
    fn stack_guards_enabled(thread: VMThread) -> bool;

    /// Try to re-protect the stack guard pages after a stack overflow was handled.
    fn reguard_stack(thread: VMThread) -> bool;

    /// Was the compiled frame that called into the runtime deoptimized while the runtime ran?
    fn caller_is_deoptimized(thread: VMThread) -> bool;

    /// Deoptimize the compiled frame that called into the runtime.
    fn deoptimize_caller(thread: VMThread, reason: DeoptReason);

    /// The original pc of the deoptimized frame that raised the exception being dispatched.
    fn deoptimized_frame_original_pc(thread: VMThread) -> Address;

    // --- Allocation and synchronization ---

    /// Allocate an instance of an initialized class.
    fn allocate_instance(thread: VMThread, klass: KlassRef) -> VMResult<ObjectReference>;

    /// Allocate a one-dimensional array of the given array class.
    fn allocate_array(thread: VMThread, array_klass: KlassRef, length: i32) -> VMResult<ObjectReference>;

    /// Allocate a multi-dimensional array. `dims` has one length per dimension, outermost first.
    fn allocate_multi_array(thread: VMThread, array_klass: KlassRef, dims: &[i32]) -> VMResult<ObjectReference>;

    /// `java.lang.reflect.Array.newInstance`: the element type is given by its mirror.
    fn reflect_new_array(thread: VMThread, element_mirror: ObjectReference, length: i32) -> VMResult<ObjectReference>;

    fn klass_is_initialized(klass: KlassRef) -> bool;

    /// Run the static initializer of the class if it has not run yet.
    fn initialize_klass(thread: VMThread, klass: KlassRef) -> VMResult<()>;

    /// Throw `InstantiationException` (or the appropriate error) if instances of the class cannot be created.
    fn check_valid_for_instantiation(thread: VMThread, klass: KlassRef) -> VMResult<()>;

    /// Let the collector see a new object before compiled code initializes it without barriers.
    /// Returns the object to use, which may be a different copy.
    fn on_slowpath_allocation_exit(thread: VMThread, object: ObjectReference) -> ObjectReference;

    /// May initializing stores into this freshly allocated object skip the card marks?
    fn can_elide_initializing_store_barrier(object: ObjectReference) -> bool;

    /// Enqueue the previous value of a field for a snapshot-at-the-beginning collector.
    fn write_barrier_pre(thread: VMThread, previous: ObjectReference);

    /// Record a dirtied card.
    fn write_barrier_post(thread: VMThread, card_address: Address);

    /// Is this an `OutOfMemoryError`?
    fn is_out_of_memory_error(exception: ObjectReference) -> bool;

    /// Is this the preallocated error raised by allocations made in retryable mode?
    fn is_retry_out_of_memory_error(exception: ObjectReference) -> bool;

    /// Revoke a bias on the object's lock before locking it.
    fn revoke_biased_lock(thread: VMThread, object: ObjectReference);

    /// Lock the object, using the lock record at `lock` on the caller's stack. `fast` selects the
    /// fast locking path.
    fn monitor_enter(thread: VMThread, object: ObjectReference, lock: Address, fast: bool) -> VMResult<()>;

    /// Unlock the object. This never raises.
    fn monitor_exit(thread: VMThread, object: ObjectReference, lock: Address, fast: bool);

    /// The fast path of `Object.notify`/`notifyAll`. Returns false if the slow path is needed.
    fn object_notify(thread: VMThread, object: ObjectReference, all: bool) -> bool;

    // --- Java objects ---

    /// Create a handle in the thread's current handle scope.
    fn new_local_handle(thread: VMThread, object: Option<ObjectReference>) -> Address;

    /// Create a handle that lives until it is destroyed. It is a strong root.
    fn new_global_handle(object: Option<ObjectReference>) -> Address;

    fn destroy_global_handle(handle: Address);

    /// Create a handle that does not keep the object alive. It reads as null once the object dies.
    fn new_weak_handle(object: Option<ObjectReference>) -> Address;

    fn destroy_weak_handle(handle: Address);

    /// The object a local, global or weak handle refers to.
    fn resolve_handle(handle: Address) -> Option<ObjectReference>;

    /// Load and link a class by internal name, returning its mirror.
    fn find_class(thread: VMThread, name: &str) -> VMResult<ObjectReference>;

    /// Initialize a class by internal name.
    fn initialize_class(thread: VMThread, name: &str) -> VMResult<()>;

    /// Is the object an instance of the named class or one of its subtypes?
    fn is_instance_of(object: ObjectReference, class_name: &str) -> bool;

    /// The internal name of the object's class.
    fn class_name_of(object: ObjectReference) -> String;

    /// Read a field. `object` is `None` for a static field.
    fn get_field(object: Option<ObjectReference>, field: &FieldDescriptor) -> HostValue;

    /// Write a field. `object` is `None` for a static field.
    fn set_field(object: Option<ObjectReference>, field: &FieldDescriptor, value: HostValue);

    /// Call a Java method. For constructors, `receiver` is ignored and the new object is returned.
    fn call_method(
        thread: VMThread,
        method: &MethodDescriptor,
        receiver: Option<ObjectReference>,
        args: &[HostValue],
    ) -> VMResult<HostValue>;

    fn new_string(thread: VMThread, value: &str) -> VMResult<ObjectReference>;

    fn string_value(string: ObjectReference) -> String;

    fn box_primitive(thread: VMThread, value: PrimitiveValue) -> VMResult<ObjectReference>;

    /// The primitive value of a box, or `None` if the object is not a box.
    fn unbox_primitive(object: ObjectReference) -> Option<PrimitiveValue>;

    fn array_length(array: ObjectReference) -> i32;

    /// The element type of an array (`Object` for arrays of references), or `None` if the object
    /// is not an array.
    fn array_element_type(object: ObjectReference) -> Option<BasicType>;

    fn new_object_array(thread: VMThread, element_class: &str, length: i32) -> VMResult<ObjectReference>;

    fn new_primitive_array(thread: VMThread, element_type: BasicType, length: i32) -> VMResult<ObjectReference>;

    fn array_load(array: ObjectReference, index: i32) -> HostValue;

    fn array_store(array: ObjectReference, index: i32, value: HostValue);

    /// Copy the raw bytes of primitive elements starting at element `start` out of the array.
    fn array_copy_out(array: ObjectReference, start: i32, buf: &mut [u8]);

    /// Copy raw bytes into primitive elements starting at element `start`.
    fn array_copy_in(array: ObjectReference, start: i32, buf: &[u8]);

    /// Create an exception object of the named class.
    fn new_throwable(thread: VMThread, class_name: &str, message: Option<&str>) -> VMResult<ObjectReference>;

    fn throwable_message(throwable: ObjectReference) -> Option<String>;

    /// Print the exception and its stack trace to the error stream.
    fn describe_exception(thread: VMThread, throwable: ObjectReference);

    /// Post a JVMTI exception throw event for an exception raised by the runtime.
    fn post_exception_throw(thread: VMThread, exception: ObjectReference);

    fn is_valid_object(object: ObjectReference) -> bool;

    fn identity_hash(object: ObjectReference) -> i32;

    fn klass_of(object: ObjectReference) -> KlassRef;

    /// The `java.lang.Class` mirror of a class.
    fn klass_mirror(klass: KlassRef) -> ObjectReference;

    /// The class a mirror stands for. `None` for the mirrors of primitive types.
    fn mirror_to_klass(mirror: ObjectReference) -> Option<KlassRef>;

    // --- Code cache ---

    /// The address range of the code cache.
    fn code_cache_bounds() -> Range<Address>;

    fn find_nmethod(pc: Address) -> Option<NMethodRef>;

    /// Copy the code into the code cache and create an nmethod. Returns `None` if the code cache is full.
    fn register_nmethod(description: &CodeBlobDescription) -> Option<NMethodRef>;

    /// Copy the code into the code cache as a runtime stub. Returns `None` if the code cache is full.
    fn register_runtime_stub(description: &CodeBlobDescription) -> Option<CodeBlobRef>;

    /// Let the VM react to a full code cache (for example by turning compilation off).
    fn handle_full_code_cache();

    fn nmethod_state(nm: NMethodRef) -> NMethodState;

    /// Make the nmethod not entrant. Returns false if it already was.
    fn make_not_entrant(nm: NMethodRef) -> bool;

    /// The compiled code the method's calls currently go to.
    fn method_code(method: MethodRef) -> Option<NMethodRef>;

    /// Make `nm` the compiled code of the method.
    fn set_method_code(method: MethodRef, nm: NMethodRef);

    /// Register an on-stack-replacement nmethod with the method's holder.
    fn add_osr_nmethod(method: MethodRef, nm: NMethodRef);

    /// Disassemble the code blob at the address, or `None` if the VM has no disassembler.
    fn disassemble(code: Address) -> Option<String>;

    /// The instruction bytes of the nmethod.
    fn nmethod_code_bytes(nm: NMethodRef) -> Vec<u8>;

    /// The entry of a call resolution stub.
    fn call_stub_entry(stub: CallStub) -> Address;

    /// The page that compiled code polls at safepoint polls.
    fn polling_page() -> Address;

    /// The compressed form of a reference, as compiled code embeds it.
    fn encode_narrow_oop(object: ObjectReference) -> u32;

    /// The compressed form of a class pointer.
    fn encode_narrow_klass(klass: KlassRef) -> u32;

    /// The biased base of the card table that write barriers in compiled code index into.
    fn card_table_base() -> Address;

    /// log2 of the card size.
    fn card_table_shift() -> i32;

    fn is_deopt_pc(nm: NMethodRef, pc: Address) -> bool;

    fn is_method_handle_return(nm: NMethodRef, pc: Address) -> bool;

    /// The entry of the deoptimization blob that unpacks a frame with a pending exception.
    fn deopt_blob_unpack_with_exception() -> Address;

    fn deopt_blob_contains(pc: Address) -> bool;

    /// Find the handler for an exception thrown at `pc`. Returns the handler and whether the lookup
    /// itself raised (in which case the handler is for the new exception).
    fn compute_compiled_exception_handler(
        thread: VMThread,
        nm: NMethodRef,
        pc: Address,
        exception: ObjectReference,
    ) -> (Address, bool);

    fn cached_exception_handler(nm: NMethodRef, pc: Address, exception: ObjectReference) -> Option<Address>;

    fn cache_exception_handler(nm: NMethodRef, pc: Address, exception: ObjectReference, handler: Address);

    // --- Class hierarchy and JVMTI ---

    /// The current JVMTI capabilities.
    fn jvmti_capabilities() -> JvmtiCapabilities;

    /// Should exception events be posted for this thread?
    fn jvmti_should_post_on_exceptions(thread: VMThread) -> bool;

    /// A counter bumped every time a class is added to the class hierarchy.
    fn system_dictionary_modification_counter() -> u64;

    /// Run `f` holding the locks that keep the class hierarchy and the compile queue stable.
    fn with_compile_lock<R, F: FnOnce() -> R>(f: F) -> R;

    /// Check a recorded assumption against the current class hierarchy. Returns the class that
    /// violates it (the witness), or `None` if the assumption still holds.
    fn check_dependency(dependency: &Dependency) -> Option<KlassRef>;

    /// Note that compiled code for the method was thrown away because of a failed assumption.
    fn increment_decompile_count(method: MethodRef);

    // --- Metadata ---

    /// Is the class loader owning this metadata being unloaded?
    fn metadata_is_unloading(metadata: MetadataRef) -> bool;

    fn klass_name(klass: KlassRef) -> String;

    fn method_holder(method: MethodRef) -> KlassRef;

    fn method_name(method: MethodRef) -> String;

    fn method_signature(method: MethodRef) -> String;

    fn method_constants(method: MethodRef) -> ConstantPoolRef;

    /// The bytecodes of the method as the interpreter sees them, including rewritten bytecodes.
    fn method_bytecodes(method: MethodRef) -> Vec<u8>;

    /// Decode a bytecode that is not a standard one. `None` if the VM does not know it.
    fn rewritten_bytecode(_raw: u8) -> Option<RewrittenBytecode> {
        None
    }

    fn method_exception_table(method: MethodRef) -> Vec<ExceptionTableEntry>;

    /// `(bci, line)` pairs.
    fn method_line_number_table(method: MethodRef) -> Vec<(i32, i32)>;

    fn method_local_variable_table(method: MethodRef) -> Vec<LocalVariableEntry>;

    fn method_is_compilable(method: MethodRef) -> bool;

    /// The `native` methods declared by the class.
    fn native_methods(klass: KlassRef) -> Vec<MethodRef>;

    /// The function a native method is bound to, if it is bound.
    fn native_function(method: MethodRef) -> Option<Address>;

    fn set_native_function(method: MethodRef, function: Address);

    /// Is the class an interface?
    fn klass_is_interface(klass: KlassRef) -> bool;

    /// Is the class an ordinary instance class (neither an array class nor a primitive type)?
    fn klass_is_instance(klass: KlassRef) -> bool;

    fn find_unique_concrete_method(holder: KlassRef, method: MethodRef) -> Option<MethodRef>;

    /// The single implementor of an interface, if there is exactly one.
    fn implementor(klass: KlassRef) -> Option<KlassRef>;

    fn has_finalizable_subclass(klass: KlassRef) -> bool;

    /// Find a class by name in the context of `accessing`. If `resolve` is false, only classes that
    /// are already loaded are found.
    fn lookup_klass(
        thread: VMThread,
        name: &str,
        accessing: Option<KlassRef>,
        resolve: bool,
    ) -> VMResult<Option<KlassRef>>;

    // --- Constant pools ---

    fn cp_name_ref_at(cp: ConstantPoolRef, which: i32) -> String;

    fn cp_signature_ref_at(cp: ConstantPoolRef, which: i32) -> String;

    fn cp_klass_ref_index_at(cp: ConstantPoolRef, index: i32) -> i32;

    fn cp_name_and_type_ref_index_at(cp: ConstantPoolRef, index: i32) -> i32;

    fn cp_resolve_klass(thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<KlassRef>;

    fn cp_lookup_method(thread: VMThread, cp: ConstantPoolRef, index: i32, opcode: u8) -> VMResult<Option<MethodRef>>;

    fn cp_resolve_field(
        thread: VMThread,
        cp: ConstantPoolRef,
        index: i32,
        method: Option<MethodRef>,
        opcode: u8,
    ) -> VMResult<ResolvedField>;

    fn cp_lookup_appendix(cp: ConstantPoolRef, index: i32) -> Option<ObjectReference>;

    fn cp_resolve_invoke_dynamic(thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<()>;

    fn cp_resolve_invoke_handle(thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<()>;

    fn cp_resolve_constant(thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<Option<ObjectReference>>;

    /// Map the index in a rewritten `ldc` back to the constant pool index it was rewritten from.
    fn cp_object_to_cp_index(cp: ConstantPoolRef, index: i32) -> i32;

    // --- Stack frames ---

    /// The Java frames of the thread, innermost first. Frames inlined into one compiled frame share
    /// its `frame_id` and are listed innermost first.
    fn stack_frames(thread: VMThread) -> Vec<FrameInfo>;

    /// Deoptimize the compiled frame and reallocate the objects the compiler scalar-replaced in it.
    /// Afterwards [`VMBinding::stack_frames`] reports the reallocated objects as ordinary locals.
    /// If `invalidate` is set, the frame's nmethod is also made not entrant.
    fn materialize_virtual_objects(thread: VMThread, frame_id: usize, invalidate: bool) -> VMResult<()>;

    // --- Configuration ---

    fn vm_structs() -> Vec<VMStructEntry>;

    fn vm_int_constants() -> Vec<(String, i64)>;

    fn vm_long_constants() -> Vec<(String, i64)>;

    fn vm_addresses() -> Vec<(String, Address)>;

    fn vm_flags() -> Vec<VMFlag>;

    fn find_flag(name: &str) -> Option<VMFlag> {
        Self::vm_flags().into_iter().find(|f| f.name == name)
    }

    fn vm_intrinsics() -> Vec<VMIntrinsic>;

    // --- Process ---

    /// Describe what a value points to (an object, a code blob, a metadata structure), for diagnostics.
    fn describe_value(value: i64) -> String {
        format!("{:#x}", value)
    }

    /// Report a fatal error and abort the process.
    fn fatal(message: &str) -> !;

    /// Exit the VM with the given status.
    fn exit_vm(code: i32) -> !;
}
