use crate::code::Dependency;
use crate::util::{Address, ObjectReference, VMThread};
use crate::vm::*;

use super::mock_method::*;

pub mod host;
pub mod java_heap;
pub mod remote;

use self::host::{object_id, object_ref, to_heap_value, to_host_value, with_host, HandleKind};

use std::default::Default;
use std::ops::Range;
use std::sync::Mutex;

lazy_static! {
    // The mutex may get poisoned any time. Accessing this mutex needs to deal with the poisoned case.
    // One can use read/write_mockvm to access mock vm.
    static ref MOCK_VM_INSTANCE: Mutex<MockVM> = Mutex::new(MockVM::default());
}

macro_rules! lifetime {
    ($e: expr) => {
        unsafe { std::mem::transmute($e) }
    };
}

macro_rules! mock {
    ($fn: ident($($arg:expr),*)) => {
        write_mockvm(|mock| mock.$fn.call(($($arg),*)))
    };
}

pub fn read_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&MockVM) -> R,
{
    let lock = MOCK_VM_INSTANCE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&lock)
}
pub fn write_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&mut MockVM) -> R,
{
    let mut lock = MOCK_VM_INSTANCE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&mut lock)
}

/// Run a test against a fresh host with the mock VM returned by `setup`.
#[cfg(feature = "mock_test")]
pub fn with_mockvm<S, T, C>(setup: S, test: T, cleanup: C)
where
    S: FnOnce() -> MockVM,
    T: FnOnce() + std::panic::UnwindSafe,
    C: FnOnce(),
{
    super::serial_test(|| {
        // Setup
        {
            host::reset_host();
            write_mockvm(|mock| *mock = setup());
        }
        super::with_cleanup(test, cleanup);
    })
}

pub fn default_setup() -> MockVM {
    MockVM::default()
}

pub fn no_cleanup() {}

/// Host VM operations that tests may replace. The defaults work on the [`host::MockHost`]. All
/// other operations of the binding go to the host directly.
pub struct MockVM {
    // threads
    pub is_compiler_thread: MockMethod<VMThread, bool>,
    pub caller_is_deoptimized: MockMethod<VMThread, bool>,
    pub deoptimize_caller: MockMethod<(VMThread, DeoptReason), ()>,
    // allocation
    pub allocate_instance: MockMethod<(VMThread, KlassRef), VMResult<ObjectReference>>,
    pub allocate_array: MockMethod<(VMThread, KlassRef, i32), VMResult<ObjectReference>>,
    pub allocate_multi_array: MockMethod<(VMThread, KlassRef, Vec<i32>), VMResult<ObjectReference>>,
    pub initialize_klass: MockMethod<(VMThread, KlassRef), VMResult<()>>,
    pub check_valid_for_instantiation: MockMethod<(VMThread, KlassRef), VMResult<()>>,
    pub monitor_enter: MockMethod<(VMThread, ObjectReference, Address, bool), VMResult<()>>,
    // java objects
    pub call_method:
        MockMethod<(VMThread, MethodDescriptor, Option<ObjectReference>, Vec<HostValue>), VMResult<HostValue>>,
    // code cache
    pub register_nmethod: MockMethod<&'static CodeBlobDescription<'static>, Option<NMethodRef>>,
    pub register_runtime_stub: MockMethod<&'static CodeBlobDescription<'static>, Option<CodeBlobRef>>,
    pub handle_full_code_cache: MockMethod<(), ()>,
    pub make_not_entrant: MockMethod<NMethodRef, bool>,
    pub disassemble: MockMethod<Address, Option<String>>,
    pub compute_compiled_exception_handler: MockMethod<(VMThread, NMethodRef, Address, ObjectReference), (Address, bool)>,
    // class hierarchy
    pub check_dependency: MockMethod<Dependency, Option<KlassRef>>,
    pub lookup_klass: MockMethod<(VMThread, String, Option<KlassRef>, bool), VMResult<Option<KlassRef>>>,
    // stack frames
    pub stack_frames: MockMethod<VMThread, Vec<FrameInfo>>,
    pub materialize_virtual_objects: MockMethod<(VMThread, usize, bool), VMResult<()>>,
    // configuration
    pub vm_flags: MockMethod<(), Vec<VMFlag>>,
    // process
    pub fatal: MockMethod<String, ()>,
}

impl Default for MockVM {
    fn default() -> Self {
        Self {
            is_compiler_thread: MockMethod::new_fixed(Box::new(|thread| {
                with_host(|host| host.thread(thread).is_compiler_thread)
            })),
            caller_is_deoptimized: MockMethod::new_fixed(Box::new(|thread| {
                with_host(|host| host.thread(thread).caller_deoptimized)
            })),
            deoptimize_caller: MockMethod::new_fixed(Box::new(|(thread, reason)| {
                with_host(|host| {
                    let state = host.thread(thread);
                    state.caller_deoptimized = true;
                    state.deopt_reasons.push(reason);
                })
            })),

            allocate_instance: MockMethod::new_fixed(Box::new(|(thread, klass)| {
                with_host(|host| host.allocate_instance(thread, klass))
            })),
            allocate_array: MockMethod::new_fixed(Box::new(|(thread, klass, length)| {
                with_host(|host| host.allocate_array(thread, klass, length))
            })),
            allocate_multi_array: MockMethod::new_fixed(Box::new(|(thread, klass, dims)| {
                with_host(|host| host.allocate_multi_array(thread, klass, &dims))
            })),
            initialize_klass: MockMethod::new_fixed(Box::new(|(_, klass)| {
                with_host(|host| host.klass_mut(klass).initialized = true);
                Ok(())
            })),
            check_valid_for_instantiation: MockMethod::new_fixed(Box::new(|(thread, klass)| {
                with_host(|host| {
                    let k = host.klass(klass);
                    if k.is_abstract || k.is_interface || !k.is_instance {
                        let name = k.name.replace('/', ".");
                        Err(host.throw(thread, "java/lang/InstantiationException", Some(&name)))
                    } else {
                        Ok(())
                    }
                })
            })),
            monitor_enter: MockMethod::new_fixed(Box::new(|(thread, object, _, _)| {
                with_host(|host| host.thread(thread).locked.push(object));
                Ok(())
            })),

            call_method: MockMethod::new_fixed(Box::new(|(thread, method, receiver, args)| {
                with_host(|host| {
                    let args: Vec<_> = args.into_iter().map(to_heap_value).collect();
                    match host
                        .heap
                        .invoke(method.class, method.name, receiver.map(object_id), &args)
                    {
                        Ok(result) => Ok(to_host_value(result)),
                        Err(exception) => {
                            host.thread(thread).pending_exception = Some(object_ref(exception));
                            Err(ExceptionPending)
                        }
                    }
                })
            })),

            register_nmethod: MockMethod::new_fixed(Box::new(|description| {
                with_host(|host| host.register_nmethod(description))
            })),
            register_runtime_stub: MockMethod::new_fixed(Box::new(|description| {
                with_host(|host| host.register_runtime_stub(description))
            })),
            handle_full_code_cache: MockMethod::new_fixed(Box::new(|()| {
                with_host(|host| host.cache_full_events += 1)
            })),
            make_not_entrant: MockMethod::new_fixed(Box::new(|nm| {
                with_host(|host| host.make_not_entrant(nm))
            })),
            disassemble: MockMethod::new_fixed(Box::new(|code| {
                with_host(|host| {
                    host.find_nmethod(code).map(|nm| {
                        let blob = host.blob(nm);
                        format!("{}: {} bytes at {}", blob.name, blob.state.code_size, blob.state.code_begin)
                    })
                })
            })),
            compute_compiled_exception_handler: MockMethod::new_fixed(Box::new(|(_, nm, pc, _)| {
                (with_host(|host| host.compute_compiled_exception_handler(nm, pc)), false)
            })),

            check_dependency: MockMethod::new_fixed(Box::new(|dependency| {
                with_host(|host| host.check_dependency(&dependency))
            })),
            lookup_klass: MockMethod::new_fixed(Box::new(|(thread, name, _, resolve)| {
                with_host(|host| host.lookup_klass(thread, &name, resolve))
            })),

            stack_frames: MockMethod::new_fixed(Box::new(|thread| {
                with_host(|host| host.thread(thread).frames.clone())
            })),
            materialize_virtual_objects: MockMethod::new_fixed(Box::new(|(thread, frame_id, invalidate)| {
                with_host(|host| host.materialize_virtual_objects(thread, frame_id, invalidate))
            })),

            vm_flags: MockMethod::new_fixed(Box::new(|()| with_host(|host| host.flags.clone()))),

            fatal: MockMethod::new_default(),
        }
    }
}

unsafe impl Sync for MockVM {}
unsafe impl Send for MockVM {}

impl VMBinding for MockVM {
    const MAX_CODE_BLOB_SIZE: usize = 1 << 16;
    const IS_DEBUG_BUILD: bool = true;

    fn is_compiler_thread(thread: VMThread) -> bool {
        mock!(is_compiler_thread(thread))
    }

    fn pending_exception(thread: VMThread) -> Option<ObjectReference> {
        with_host(|host| host.thread(thread).pending_exception)
    }

    fn set_pending_exception(thread: VMThread, exception: ObjectReference) {
        with_host(|host| host.thread(thread).pending_exception = Some(exception))
    }

    fn clear_pending_exception(thread: VMThread) {
        with_host(|host| host.thread(thread).pending_exception = None)
    }

    fn vm_result(thread: VMThread) -> Option<ObjectReference> {
        with_host(|host| host.thread(thread).vm_result)
    }

    fn set_vm_result(thread: VMThread, result: Option<ObjectReference>) {
        with_host(|host| host.thread(thread).vm_result = result)
    }

    fn in_retryable_allocation(thread: VMThread) -> bool {
        with_host(|host| host.thread(thread).in_retryable_allocation)
    }

    fn set_in_retryable_allocation(thread: VMThread, value: bool) {
        with_host(|host| host.thread(thread).in_retryable_allocation = value)
    }

    fn exception_oop(thread: VMThread) -> Option<ObjectReference> {
        with_host(|host| host.thread(thread).exception_oop)
    }

    fn set_exception_oop(thread: VMThread, exception: Option<ObjectReference>) {
        with_host(|host| host.thread(thread).exception_oop = exception)
    }

    fn exception_pc(thread: VMThread) -> Address {
        with_host(|host| host.thread(thread).exception_pc)
    }

    fn set_exception_pc(thread: VMThread, pc: Address) {
        with_host(|host| host.thread(thread).exception_pc = pc)
    }

    fn set_is_method_handle_return(thread: VMThread, value: bool) {
        with_host(|host| host.thread(thread).is_method_handle_return = value)
    }

    fn pending_failed_speculation(thread: VMThread) -> i64 {
        with_host(|host| host.thread(thread).pending_failed_speculation)
    }

    fn set_pending_failed_speculation(thread: VMThread, speculation: i64) {
        with_host(|host| host.thread(thread).pending_failed_speculation = speculation)
    }

    fn adjusting_comp_level(thread: VMThread) -> bool {
        with_host(|host| host.thread(thread).adjusting_comp_level)
    }

    fn set_adjusting_comp_level(thread: VMThread, value: bool) {
        with_host(|host| host.thread(thread).adjusting_comp_level = value)
    }

    fn thread_is_interrupted(_thread: VMThread, receiver: ObjectReference, clear_interrupted: bool) -> bool {
        with_host(|host| {
            let id = object_id(receiver);
            if clear_interrupted {
                host.interrupted.remove(&id)
            } else {
                host.interrupted.contains(&id)
            }
        })
    }

    fn stack_guards_enabled(thread: VMThread) -> bool {
        with_host(|host| !host.thread(thread).stack_guards_disabled)
    }

    fn reguard_stack(thread: VMThread) -> bool {
        with_host(|host| {
            if host.reguard_succeeds {
                host.thread(thread).stack_guards_disabled = false;
            }
            host.reguard_succeeds
        })
    }

    fn caller_is_deoptimized(thread: VMThread) -> bool {
        mock!(caller_is_deoptimized(thread))
    }

    fn deoptimize_caller(thread: VMThread, reason: DeoptReason) {
        mock!(deoptimize_caller(thread, reason))
    }

    fn deoptimized_frame_original_pc(thread: VMThread) -> Address {
        with_host(|host| host.thread(thread).deoptimized_frame_original_pc)
    }

    fn allocate_instance(thread: VMThread, klass: KlassRef) -> VMResult<ObjectReference> {
        mock!(allocate_instance(thread, klass))
    }

    fn allocate_array(thread: VMThread, array_klass: KlassRef, length: i32) -> VMResult<ObjectReference> {
        mock!(allocate_array(thread, array_klass, length))
    }

    fn allocate_multi_array(thread: VMThread, array_klass: KlassRef, dims: &[i32]) -> VMResult<ObjectReference> {
        mock!(allocate_multi_array(thread, array_klass, dims.to_vec()))
    }

    fn reflect_new_array(thread: VMThread, element_mirror: ObjectReference, length: i32) -> VMResult<ObjectReference> {
        with_host(|host| host.reflect_new_array(thread, element_mirror, length))
    }

    fn klass_is_initialized(klass: KlassRef) -> bool {
        with_host(|host| host.klass(klass).initialized)
    }

    fn initialize_klass(thread: VMThread, klass: KlassRef) -> VMResult<()> {
        mock!(initialize_klass(thread, klass))
    }

    fn check_valid_for_instantiation(thread: VMThread, klass: KlassRef) -> VMResult<()> {
        mock!(check_valid_for_instantiation(thread, klass))
    }

    fn on_slowpath_allocation_exit(_thread: VMThread, object: ObjectReference) -> ObjectReference {
        object
    }

    fn can_elide_initializing_store_barrier(_object: ObjectReference) -> bool {
        with_host(|host| host.elide_initializing_barriers)
    }

    fn write_barrier_pre(_thread: VMThread, previous: ObjectReference) {
        with_host(|host| host.satb_queue.push(previous))
    }

    fn write_barrier_post(_thread: VMThread, card_address: Address) {
        with_host(|host| host.dirty_cards.push(card_address))
    }

    fn is_out_of_memory_error(exception: ObjectReference) -> bool {
        with_host(|host| host.heap.is_instance_of(object_id(exception), "java/lang/OutOfMemoryError"))
    }

    fn is_retry_out_of_memory_error(exception: ObjectReference) -> bool {
        with_host(|host| host.is_retry_out_of_memory_error(exception))
    }

    fn revoke_biased_lock(_thread: VMThread, object: ObjectReference) {
        with_host(|host| host.revoked_biases.push(object))
    }

    fn monitor_enter(thread: VMThread, object: ObjectReference, lock: Address, fast: bool) -> VMResult<()> {
        mock!(monitor_enter(thread, object, lock, fast))
    }

    fn monitor_exit(thread: VMThread, object: ObjectReference, _lock: Address, _fast: bool) {
        with_host(|host| {
            let locked = &mut host.thread(thread).locked;
            if let Some(i) = locked.iter().rposition(|o| *o == object) {
                locked.remove(i);
            }
        })
    }

    fn object_notify(thread: VMThread, object: ObjectReference, _all: bool) -> bool {
        with_host(|host| host.thread(thread).locked.contains(&object))
    }

    fn new_local_handle(thread: VMThread, object: Option<ObjectReference>) -> Address {
        with_host(|host| host.new_local_handle(thread, object))
    }

    fn new_global_handle(object: Option<ObjectReference>) -> Address {
        with_host(|host| host.new_global_handle(object))
    }

    fn destroy_global_handle(handle: Address) {
        with_host(|host| host.destroy_handle(handle, HandleKind::Global))
    }

    fn new_weak_handle(object: Option<ObjectReference>) -> Address {
        with_host(|host| host.new_weak_handle(object))
    }

    fn destroy_weak_handle(handle: Address) {
        with_host(|host| host.destroy_handle(handle, HandleKind::Weak))
    }

    fn resolve_handle(handle: Address) -> Option<ObjectReference> {
        with_host(|host| host.resolve_handle(handle))
    }

    fn find_class(thread: VMThread, name: &str) -> VMResult<ObjectReference> {
        with_host(|host| host.find_class(thread, name))
    }

    fn initialize_class(thread: VMThread, name: &str) -> VMResult<()> {
        let mirror = Self::find_class(thread, name)?;
        with_host(|host| {
            if let Some(klass) = host.mirror_to_klass(mirror) {
                host.klass_mut(klass).initialized = true;
            }
        });
        Ok(())
    }

    fn is_instance_of(object: ObjectReference, class_name: &str) -> bool {
        with_host(|host| host.heap.is_instance_of(object_id(object), class_name))
    }

    fn class_name_of(object: ObjectReference) -> String {
        with_host(|host| host.object(object).class.clone())
    }

    fn get_field(object: Option<ObjectReference>, field: &FieldDescriptor) -> HostValue {
        with_host(|host| {
            let value = match object {
                Some(object) => host
                    .heap
                    .get_field(object_id(object), field.class, field.name, field.signature),
                None => host.heap.get_static(field.class, field.name, field.signature),
            };
            to_host_value(value)
        })
    }

    fn set_field(object: Option<ObjectReference>, field: &FieldDescriptor, value: HostValue) {
        with_host(|host| match object {
            Some(object) => host
                .heap
                .set_field(object_id(object), field.class, field.name, to_heap_value(value)),
            None => host.heap.set_static(field.class, field.name, to_heap_value(value)),
        })
    }

    fn call_method(
        thread: VMThread,
        method: &MethodDescriptor,
        receiver: Option<ObjectReference>,
        args: &[HostValue],
    ) -> VMResult<HostValue> {
        mock!(call_method(thread, *method, receiver, args.to_vec()))
    }

    fn new_string(_thread: VMThread, value: &str) -> VMResult<ObjectReference> {
        Ok(with_host(|host| host.new_string(value)))
    }

    fn string_value(string: ObjectReference) -> String {
        with_host(|host| host.string_value(string))
    }

    fn box_primitive(_thread: VMThread, value: PrimitiveValue) -> VMResult<ObjectReference> {
        Ok(with_host(|host| object_ref(host.heap.new_box(value))))
    }

    fn unbox_primitive(object: ObjectReference) -> Option<PrimitiveValue> {
        with_host(|host| host.heap.unbox(object_id(object)))
    }

    fn array_length(array: ObjectReference) -> i32 {
        with_host(|host| host.heap.array_length(object_id(array)))
    }

    fn array_element_type(object: ObjectReference) -> Option<BasicType> {
        with_host(|host| host.heap.array_element_type(object_id(object)))
    }

    fn new_object_array(thread: VMThread, element_class: &str, length: i32) -> VMResult<ObjectReference> {
        with_host(|host| {
            if length < 0 {
                return Err(host.throw(thread, "java/lang/NegativeArraySizeException", None));
            }
            let id = host.heap.new_array(BasicType::Object, length as usize);
            host.heap.object_mut(id).class = format!("[L{};", element_class);
            Ok(object_ref(id))
        })
    }

    fn new_primitive_array(thread: VMThread, element_type: BasicType, length: i32) -> VMResult<ObjectReference> {
        with_host(|host| {
            if length < 0 {
                return Err(host.throw(thread, "java/lang/NegativeArraySizeException", None));
            }
            Ok(object_ref(host.heap.new_array(element_type, length as usize)))
        })
    }

    fn array_load(array: ObjectReference, index: i32) -> HostValue {
        with_host(|host| to_host_value(host.heap.array_get(object_id(array), index)))
    }

    fn array_store(array: ObjectReference, index: i32, value: HostValue) {
        with_host(|host| host.heap.array_set(object_id(array), index, to_heap_value(value)))
    }

    fn array_copy_out(array: ObjectReference, start: i32, buf: &mut [u8]) {
        with_host(|host| host.heap.copy_out(object_id(array), start, buf))
    }

    fn array_copy_in(array: ObjectReference, start: i32, buf: &[u8]) {
        with_host(|host| host.heap.copy_in(object_id(array), start, buf))
    }

    fn new_throwable(_thread: VMThread, class_name: &str, message: Option<&str>) -> VMResult<ObjectReference> {
        Ok(with_host(|host| object_ref(host.heap.new_throwable(class_name, message))))
    }

    fn throwable_message(throwable: ObjectReference) -> Option<String> {
        with_host(|host| host.heap.throwable_message(object_id(throwable)))
    }

    fn describe_exception(_thread: VMThread, throwable: ObjectReference) {
        with_host(|host| {
            let id = object_id(throwable);
            let description = match host.heap.throwable_message(id) {
                Some(message) => format!("{}: {}", host.heap.class_of(id), message),
                None => host.heap.class_of(id).to_string(),
            };
            host.described_exceptions.push(description);
        })
    }

    fn post_exception_throw(thread: VMThread, exception: ObjectReference) {
        with_host(|host| host.thread(thread).posted_exceptions.push(exception))
    }

    fn is_valid_object(object: ObjectReference) -> bool {
        with_host(|host| host.is_live(object))
    }

    fn identity_hash(object: ObjectReference) -> i32 {
        (object_id(object) as i32).wrapping_mul(0x9e37_79b9_u32 as i32) & 0x7fff_ffff
    }

    fn klass_of(object: ObjectReference) -> KlassRef {
        with_host(|host| host.klass_of(object))
    }

    fn klass_mirror(klass: KlassRef) -> ObjectReference {
        with_host(|host| host.klass_mirror(klass))
    }

    fn mirror_to_klass(mirror: ObjectReference) -> Option<KlassRef> {
        with_host(|host| host.mirror_to_klass(mirror))
    }

    fn code_cache_bounds() -> Range<Address> {
        with_host(|host| unsafe {
            Address::from_usize(host::CODE_CACHE_BASE)..Address::from_usize(host.code_cache_end)
        })
    }

    fn find_nmethod(pc: Address) -> Option<NMethodRef> {
        with_host(|host| host.find_nmethod(pc))
    }

    fn register_nmethod(description: &CodeBlobDescription) -> Option<NMethodRef> {
        mock!(register_nmethod(lifetime!(description)))
    }

    fn register_runtime_stub(description: &CodeBlobDescription) -> Option<CodeBlobRef> {
        mock!(register_runtime_stub(lifetime!(description)))
    }

    fn handle_full_code_cache() {
        mock!(handle_full_code_cache())
    }

    fn nmethod_state(nm: NMethodRef) -> NMethodState {
        with_host(|host| host.blob(nm).state.clone())
    }

    fn make_not_entrant(nm: NMethodRef) -> bool {
        mock!(make_not_entrant(nm))
    }

    fn method_code(method: MethodRef) -> Option<NMethodRef> {
        with_host(|host| host.method(method).code)
    }

    fn set_method_code(method: MethodRef, nm: NMethodRef) {
        with_host(|host| host.method_mut(method).code = Some(nm))
    }

    fn add_osr_nmethod(method: MethodRef, nm: NMethodRef) {
        with_host(|host| host.method_mut(method).osr_code.push(nm))
    }

    fn disassemble(code: Address) -> Option<String> {
        mock!(disassemble(code))
    }

    fn nmethod_code_bytes(nm: NMethodRef) -> Vec<u8> {
        with_host(|host| {
            let blob = host.blob(nm);
            blob.code[..blob.state.code_size].to_vec()
        })
    }

    fn call_stub_entry(stub: CallStub) -> Address {
        let index = match stub {
            CallStub::ResolveVirtual => 0,
            CallStub::ResolveStatic => 1,
            CallStub::ResolveOptVirtual => 2,
        };
        unsafe { Address::from_usize(host::CODE_CACHE_BASE + host::DEOPT_BLOB_SIZE + index * 0x20) }
    }

    fn polling_page() -> Address {
        unsafe { Address::from_usize(host::POLLING_PAGE) }
    }

    fn encode_narrow_oop(object: ObjectReference) -> u32 {
        ((object.value() - host::OBJECT_BASE) >> 4) as u32
    }

    fn encode_narrow_klass(klass: KlassRef) -> u32 {
        ((klass.0.as_usize() - host::KLASS_BASE) >> 3) as u32
    }

    fn card_table_base() -> Address {
        unsafe { Address::from_usize(host::CARD_TABLE_BASE) }
    }

    fn card_table_shift() -> i32 {
        host::CARD_TABLE_SHIFT
    }

    fn is_deopt_pc(nm: NMethodRef, pc: Address) -> bool {
        with_host(|host| host.blob(nm).deopt_pcs.contains(&pc))
    }

    fn is_method_handle_return(nm: NMethodRef, pc: Address) -> bool {
        with_host(|host| host.blob(nm).method_handle_return_pcs.contains(&pc))
    }

    fn deopt_blob_unpack_with_exception() -> Address {
        unsafe { Address::from_usize(host::CODE_CACHE_BASE + host::UNPACK_WITH_EXCEPTION_OFFSET) }
    }

    fn deopt_blob_contains(pc: Address) -> bool {
        let start = host::CODE_CACHE_BASE;
        (start..start + host::DEOPT_BLOB_SIZE).contains(&pc.as_usize())
    }

    fn compute_compiled_exception_handler(
        thread: VMThread,
        nm: NMethodRef,
        pc: Address,
        exception: ObjectReference,
    ) -> (Address, bool) {
        mock!(compute_compiled_exception_handler(thread, nm, pc, exception))
    }

    fn cached_exception_handler(nm: NMethodRef, pc: Address, exception: ObjectReference) -> Option<Address> {
        with_host(|host| host.cached_exception_handler(nm, pc, exception))
    }

    fn cache_exception_handler(nm: NMethodRef, pc: Address, exception: ObjectReference, handler: Address) {
        with_host(|host| host.cache_exception_handler(nm, pc, exception, handler))
    }

    fn jvmti_capabilities() -> JvmtiCapabilities {
        with_host(|host| host.jvmti)
    }

    fn jvmti_should_post_on_exceptions(_thread: VMThread) -> bool {
        with_host(|host| host.post_on_exceptions)
    }

    fn system_dictionary_modification_counter() -> u64 {
        with_host(|host| host.dictionary_counter)
    }

    fn with_compile_lock<R, F: FnOnce() -> R>(f: F) -> R {
        f()
    }

    fn check_dependency(dependency: &Dependency) -> Option<KlassRef> {
        mock!(check_dependency(*dependency))
    }

    fn increment_decompile_count(method: MethodRef) {
        with_host(|host| host.method_mut(method).decompile_count += 1)
    }

    fn metadata_is_unloading(metadata: MetadataRef) -> bool {
        with_host(|host| host.unloading.contains(&metadata.address))
    }

    fn klass_name(klass: KlassRef) -> String {
        with_host(|host| host.klass(klass).name.clone())
    }

    fn method_holder(method: MethodRef) -> KlassRef {
        with_host(|host| host.method_holder(method))
    }

    fn method_name(method: MethodRef) -> String {
        with_host(|host| host.method(method).name.clone())
    }

    fn method_signature(method: MethodRef) -> String {
        with_host(|host| host.method(method).signature.clone())
    }

    fn method_constants(method: MethodRef) -> ConstantPoolRef {
        with_host(|host| {
            let holder = host.method_holder(method);
            host.klass(holder).constants
        })
    }

    fn method_bytecodes(method: MethodRef) -> Vec<u8> {
        with_host(|host| host.method(method).bytecodes.clone())
    }

    /// `fast_aldc` and `fast_aldc_w`, which load resolved references.
    fn rewritten_bytecode(raw: u8) -> Option<RewrittenBytecode> {
        let java_code = match raw {
            0xe6 => crate::util::bytecodes::LDC,
            0xe7 => crate::util::bytecodes::LDC_W,
            _ => return None,
        };
        Some(RewrittenBytecode {
            java_code,
            resolved_reference_operand: true,
        })
    }

    fn method_exception_table(method: MethodRef) -> Vec<ExceptionTableEntry> {
        with_host(|host| host.method(method).exception_table.clone())
    }

    fn method_line_number_table(method: MethodRef) -> Vec<(i32, i32)> {
        with_host(|host| host.method(method).line_numbers.clone())
    }

    fn method_local_variable_table(method: MethodRef) -> Vec<LocalVariableEntry> {
        with_host(|host| host.method(method).local_variables.clone())
    }

    fn method_is_compilable(method: MethodRef) -> bool {
        with_host(|host| !host.method(method).not_compilable)
    }

    fn native_methods(klass: KlassRef) -> Vec<MethodRef> {
        with_host(|host| {
            host.klass(klass)
                .methods
                .iter()
                .copied()
                .filter(|m| host.method(*m).is_native)
                .collect()
        })
    }

    fn native_function(method: MethodRef) -> Option<Address> {
        with_host(|host| host.method(method).native_function)
    }

    fn set_native_function(method: MethodRef, function: Address) {
        with_host(|host| host.method_mut(method).native_function = Some(function))
    }

    fn klass_is_interface(klass: KlassRef) -> bool {
        with_host(|host| host.klass(klass).is_interface)
    }

    fn klass_is_instance(klass: KlassRef) -> bool {
        with_host(|host| host.klass(klass).is_instance)
    }

    fn find_unique_concrete_method(holder: KlassRef, method: MethodRef) -> Option<MethodRef> {
        with_host(|host| host.find_unique_concrete_method(holder, method))
    }

    fn implementor(klass: KlassRef) -> Option<KlassRef> {
        with_host(|host| host.klass(klass).implementor)
    }

    fn has_finalizable_subclass(klass: KlassRef) -> bool {
        with_host(|host| host.has_finalizable_subclass(klass))
    }

    fn lookup_klass(
        thread: VMThread,
        name: &str,
        accessing: Option<KlassRef>,
        resolve: bool,
    ) -> VMResult<Option<KlassRef>> {
        mock!(lookup_klass(thread, name.to_string(), accessing, resolve))
    }

    fn cp_name_ref_at(cp: ConstantPoolRef, which: i32) -> String {
        with_host(|host| host.cp_name_ref_at(cp, which))
    }

    fn cp_signature_ref_at(cp: ConstantPoolRef, which: i32) -> String {
        with_host(|host| host.cp_signature_ref_at(cp, which))
    }

    fn cp_klass_ref_index_at(cp: ConstantPoolRef, index: i32) -> i32 {
        with_host(|host| host.cp_klass_ref_index_at(cp, index))
    }

    fn cp_name_and_type_ref_index_at(cp: ConstantPoolRef, index: i32) -> i32 {
        with_host(|host| host.cp_name_and_type_ref_index_at(cp, index))
    }

    fn cp_resolve_klass(thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<KlassRef> {
        with_host(|host| host.cp_resolve_klass(thread, cp, index))
    }

    fn cp_lookup_method(thread: VMThread, cp: ConstantPoolRef, index: i32, _opcode: u8) -> VMResult<Option<MethodRef>> {
        with_host(|host| host.cp_lookup_method(thread, cp, index))
    }

    fn cp_resolve_field(
        thread: VMThread,
        cp: ConstantPoolRef,
        index: i32,
        _method: Option<MethodRef>,
        _opcode: u8,
    ) -> VMResult<ResolvedField> {
        with_host(|host| host.cp_resolve_field(thread, cp, index))
    }

    fn cp_lookup_appendix(_cp: ConstantPoolRef, _index: i32) -> Option<ObjectReference> {
        None
    }

    fn cp_resolve_invoke_dynamic(_thread: VMThread, _cp: ConstantPoolRef, _index: i32) -> VMResult<()> {
        Ok(())
    }

    fn cp_resolve_invoke_handle(_thread: VMThread, _cp: ConstantPoolRef, _index: i32) -> VMResult<()> {
        Ok(())
    }

    fn cp_resolve_constant(_thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<Option<ObjectReference>> {
        Ok(with_host(|host| host.cp_resolve_constant(cp, index)))
    }

    fn cp_object_to_cp_index(cp: ConstantPoolRef, index: i32) -> i32 {
        with_host(|host| host.cp_object_to_cp_index(cp, index))
    }

    fn stack_frames(thread: VMThread) -> Vec<FrameInfo> {
        mock!(stack_frames(thread))
    }

    fn materialize_virtual_objects(thread: VMThread, frame_id: usize, invalidate: bool) -> VMResult<()> {
        mock!(materialize_virtual_objects(thread, frame_id, invalidate))
    }

    fn vm_structs() -> Vec<VMStructEntry> {
        with_host(|host| host.structs.clone())
    }

    fn vm_int_constants() -> Vec<(String, i64)> {
        with_host(|host| host.int_constants.clone())
    }

    fn vm_long_constants() -> Vec<(String, i64)> {
        with_host(|host| host.long_constants.clone())
    }

    fn vm_addresses() -> Vec<(String, Address)> {
        with_host(|host| host.addresses.clone())
    }

    fn vm_flags() -> Vec<VMFlag> {
        mock!(vm_flags())
    }

    fn vm_intrinsics() -> Vec<VMIntrinsic> {
        with_host(|host| host.intrinsics.clone())
    }

    fn describe_value(value: i64) -> String {
        let address = unsafe { Address::from_jlong(value) };
        with_host(|host| match host.find_nmethod(address) {
            Some(nm) => format!("{:#x} is at code blob {}", value, host.blob(nm).name),
            None if ObjectReference::from_raw_address(address).map_or(false, |o| host.is_live(o)) => {
                format!("{:#x} is an oop", value)
            }
            None => format!("{:#x}", value),
        })
    }

    fn fatal(message: &str) -> ! {
        mock!(fatal(message.to_string()));
        panic!("fatal error: {}", message)
    }

    fn exit_vm(code: i32) -> ! {
        panic!("VM exited with status {}", code)
    }
}

