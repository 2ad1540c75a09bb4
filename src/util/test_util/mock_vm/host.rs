//! The state of the mock host VM: its heap, handles, threads, class metadata and code cache.
//!
//! The default implementations of [`super::MockVM`] operate on this state, and tests set it up and
//! inspect it with [`with_host`]. It lives behind its own lock, so a mock closure (which runs
//! while the mock VM is locked) can use it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::java_heap::{HeapValue, JavaHeap, ObjectId, Payload};
use crate::code::{CodeOffset, CodeOffsets, Dependency, ExceptionHandlerTable, OopMapSet};
use crate::util::{Address, ObjectReference, VMThread};
use crate::vm::*;

pub const OBJECT_BASE: usize = 0x1000_0000;
pub const OBJECT_ALIGNMENT: usize = 16;
pub const HANDLE_BASE: usize = 0x2000_0000;
pub const KLASS_BASE: usize = 0x3000_0000;
pub const METHOD_BASE: usize = 0x3800_0000;
pub const CONSTANT_POOL_BASE: usize = 0x3c00_0000;
pub const METADATA_ALIGNMENT: usize = 0x100;
pub const CODE_CACHE_BASE: usize = 0x5000_0000;
pub const CODE_CACHE_SIZE: usize = 1 << 20;
/// The deoptimization blob and the call stubs sit at the bottom of the code cache.
pub const DEOPT_BLOB_SIZE: usize = 0x100;
pub const UNPACK_WITH_EXCEPTION_OFFSET: usize = 0x20;
pub const CALL_STUBS_SIZE: usize = 0x100;
/// Space before the first instruction of an nmethod.
pub const NMETHOD_HEADER_SIZE: usize = 0x40;
pub const POLLING_PAGE: usize = 0x6000_0000;
pub const CARD_TABLE_BASE: usize = 0x6100_0000;
pub const CARD_TABLE_SHIFT: i32 = 9;

lazy_static! {
    static ref MOCK_HOST: Mutex<MockHost> = Mutex::new(MockHost::new());
}

/// Run `f` on the mock host. Do not nest calls.
pub fn with_host<F, R>(f: F) -> R
where
    F: FnOnce(&mut MockHost) -> R,
{
    let mut lock = MOCK_HOST.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut lock)
}

/// Start over with a fresh host.
pub fn reset_host() {
    with_host(|host| *host = MockHost::new());
}

pub fn object_ref(id: ObjectId) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(OBJECT_BASE + id * OBJECT_ALIGNMENT) })
        .expect("object id 0 is not a valid object")
}

pub fn object_id(object: ObjectReference) -> ObjectId {
    assert!(object.value() >= OBJECT_BASE, "{} is not a mock object", object);
    (object.value() - OBJECT_BASE) / OBJECT_ALIGNMENT
}

pub fn to_host_value(value: HeapValue) -> HostValue {
    value.map_object(|o| o.map(object_ref))
}

pub fn to_heap_value(value: HostValue) -> HeapValue {
    value.map_object(|o| o.map(object_id))
}

/// A thread for tests. Different `n` give different threads.
pub fn test_thread(n: usize) -> VMThread {
    VMThread(crate::util::OpaquePointer::from_address(unsafe { Address::from_usize(0x7000_0000 + n * 0x1000) }))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Local,
    Global,
    Weak,
}

#[derive(Copy, Clone, Debug)]
struct HandleEntry {
    object: Option<ObjectId>,
    kind: HandleKind,
}

#[derive(Default)]
pub struct ThreadState {
    pub pending_exception: Option<ObjectReference>,
    pub vm_result: Option<ObjectReference>,
    pub in_retryable_allocation: bool,
    pub exception_oop: Option<ObjectReference>,
    pub exception_pc: Address,
    pub is_method_handle_return: bool,
    pub pending_failed_speculation: i64,
    pub adjusting_comp_level: bool,
    pub frames: Vec<FrameInfo>,
    /// `(frame_id, invalidate)` of every materialization.
    pub materialized: Vec<(usize, bool)>,
    pub caller_deoptimized: bool,
    pub deopt_reasons: Vec<DeoptReason>,
    pub deoptimized_frame_original_pc: Address,
    pub stack_guards_disabled: bool,
    pub local_handles: Vec<Address>,
    pub posted_exceptions: Vec<ObjectReference>,
    pub locked: Vec<ObjectReference>,
    pub is_compiler_thread: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockField {
    pub name: String,
    pub signature: String,
    pub offset: i32,
    pub flags: i32,
}

pub struct MockKlass {
    pub name: String,
    pub superclass: Option<KlassRef>,
    pub is_interface: bool,
    pub is_abstract: bool,
    /// False for array classes.
    pub is_instance: bool,
    pub initialized: bool,
    pub mirror: ObjectId,
    pub implementor: Option<KlassRef>,
    pub has_finalizer: bool,
    pub methods: Vec<MethodRef>,
    pub fields: Vec<MockField>,
    pub constants: ConstantPoolRef,
}

#[derive(Default)]
pub struct MockJavaMethod {
    pub holder: Option<KlassRef>,
    pub name: String,
    pub signature: String,
    pub bytecodes: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub line_numbers: Vec<(i32, i32)>,
    pub local_variables: Vec<LocalVariableEntry>,
    pub not_compilable: bool,
    pub is_native: bool,
    pub is_abstract: bool,
    /// The method was redefined.
    pub is_old: bool,
    pub native_function: Option<Address>,
    pub code: Option<NMethodRef>,
    pub osr_code: Vec<NMethodRef>,
    pub decompile_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CpEntry {
    Empty,
    Utf8(String),
    Class(String),
    NameAndType { name_index: i32, signature_index: i32 },
    MethodRef { class_index: i32, name_and_type_index: i32 },
    FieldRef { class_index: i32, name_and_type_index: i32 },
    String(String),
}

pub struct MockConstantPool {
    pub holder: KlassRef,
    pub entries: Vec<CpEntry>,
    /// Resolved references index to constant pool index, for rewritten `ldc`s.
    pub resolved_references: Vec<i32>,
    resolved_strings: HashMap<i32, ObjectId>,
}

impl MockConstantPool {
    /// Append an entry and return its index. Index 0 is never used.
    pub fn add(&mut self, entry: CpEntry) -> i32 {
        self.entries.push(entry);
        self.entries.len() as i32 - 1
    }

    fn entry(&self, index: i32) -> &CpEntry {
        self.entries.get(index as usize).unwrap_or(&CpEntry::Empty)
    }

    fn utf8(&self, index: i32) -> String {
        match self.entry(index) {
            CpEntry::Utf8(s) => s.clone(),
            other => panic!("constant pool entry {} is {:?}, not a Utf8", index, other),
        }
    }

    fn member(&self, index: i32) -> (i32, i32) {
        match *self.entry(index) {
            CpEntry::MethodRef {
                class_index,
                name_and_type_index,
            }
            | CpEntry::FieldRef {
                class_index,
                name_and_type_index,
            } => (class_index, name_and_type_index),
            ref other => panic!("constant pool entry {} is {:?}, not a member reference", index, other),
        }
    }

    fn name_and_type(&self, index: i32) -> (String, String) {
        match *self.entry(index) {
            CpEntry::NameAndType {
                name_index,
                signature_index,
            } => (self.utf8(name_index), self.utf8(signature_index)),
            ref other => panic!("constant pool entry {} is {:?}, not a NameAndType", index, other),
        }
    }

    fn class_name(&self, index: i32) -> String {
        match self.entry(index) {
            CpEntry::Class(name) => name.clone(),
            other => panic!("constant pool entry {} is {:?}, not a Class", index, other),
        }
    }
}

pub struct CodeBlob {
    pub name: String,
    pub state: NMethodState,
    pub code: Vec<u8>,
    pub is_stub: bool,
    pub comp_level: i32,
    pub dependencies: Vec<Dependency>,
    pub offsets: CodeOffsets,
    pub oop_maps: OopMapSet,
    /// The handler table as installed, by pc offset.
    pub exception_table: ExceptionHandlerTable,
    /// Exception handlers for throwing pcs.
    pub handlers: HashMap<Address, Address>,
    pub deopt_pcs: HashSet<Address>,
    pub method_handle_return_pcs: HashSet<Address>,
    handler_cache: HashMap<(Address, String), Address>,
    /// The handler of pcs without an entry in `handlers`.
    exception_entry: Address,
}

pub struct MockHost {
    pub heap: JavaHeap,
    handles: BTreeMap<Address, HandleEntry>,
    next_handle: usize,
    threads: HashMap<VMThread, ThreadState>,
    klasses: Vec<MockKlass>,
    klass_by_name: HashMap<String, KlassRef>,
    methods: Vec<MockJavaMethod>,
    constant_pools: Vec<MockConstantPool>,
    pub code_blobs: BTreeMap<Address, CodeBlob>,
    code_top: usize,
    /// The code cache ends here. Lower it to fill the cache up early.
    pub code_cache_end: usize,
    pub cache_full_events: usize,
    pub flags: Vec<VMFlag>,
    pub structs: Vec<VMStructEntry>,
    pub int_constants: Vec<(String, i64)>,
    pub long_constants: Vec<(String, i64)>,
    pub addresses: Vec<(String, Address)>,
    pub intrinsics: Vec<VMIntrinsic>,
    pub jvmti: JvmtiCapabilities,
    pub post_on_exceptions: bool,
    pub dictionary_counter: u64,
    /// Number of allocations that succeed before the heap runs out. `None` never runs out.
    pub allocation_budget: Option<usize>,
    retry_oom: Option<ObjectId>,
    pub unloading: HashSet<Address>,
    pub interrupted: HashSet<ObjectId>,
    pub elide_initializing_barriers: bool,
    pub satb_queue: Vec<ObjectReference>,
    pub dirty_cards: Vec<Address>,
    pub revoked_biases: Vec<ObjectReference>,
    pub described_exceptions: Vec<String>,
    pub reguard_succeeds: bool,
    pub handler_lookups: usize,
}

fn raw(address: usize) -> Address {
    unsafe { Address::from_usize(address) }
}

impl MockHost {
    pub fn new() -> Self {
        let mut host = MockHost {
            heap: JavaHeap::new(),
            handles: BTreeMap::new(),
            next_handle: 0,
            threads: HashMap::new(),
            klasses: vec![],
            klass_by_name: HashMap::new(),
            methods: vec![],
            constant_pools: vec![],
            code_blobs: BTreeMap::new(),
            code_top: CODE_CACHE_BASE + DEOPT_BLOB_SIZE + CALL_STUBS_SIZE,
            code_cache_end: CODE_CACHE_BASE + CODE_CACHE_SIZE,
            cache_full_events: 0,
            flags: default_flags(),
            structs: vec![VMStructEntry {
                type_name: "Klass".to_string(),
                field_name: "_name".to_string(),
                type_string: "Symbol*".to_string(),
                is_static: false,
                offset: 16,
                address: Address::ZERO,
            }],
            int_constants: vec![("Method::_caller_sensitive".to_string(), 1)],
            long_constants: vec![("markWord::hash_mask".to_string(), 0x7fff_ffff)],
            addresses: vec![("SharedRuntime::deopt_blob_unpack".to_string(), raw(CODE_CACHE_BASE))],
            intrinsics: vec![VMIntrinsic {
                holder: "java/lang/Math".to_string(),
                name: "sqrt".to_string(),
                signature: "(D)D".to_string(),
                id: 1,
            }],
            jvmti: JvmtiCapabilities::default(),
            post_on_exceptions: false,
            dictionary_counter: 0,
            allocation_budget: None,
            retry_oom: None,
            unloading: HashSet::new(),
            interrupted: HashSet::new(),
            elide_initializing_barriers: true,
            satb_queue: vec![],
            dirty_cards: vec![],
            revoked_biases: vec![],
            described_exceptions: vec![],
            reguard_succeeds: true,
            handler_lookups: 0,
        };
        host.define_klass("java/lang/Object", None);
        host
    }

    // --- Objects ---

    pub fn object(&self, object: ObjectReference) -> &super::java_heap::JavaObject {
        self.heap.object(object_id(object))
    }

    pub fn new_object(&mut self, class: &str) -> ObjectReference {
        object_ref(self.heap.alloc(class, Payload::Plain))
    }

    pub fn new_string(&mut self, value: &str) -> ObjectReference {
        object_ref(self.heap.new_string(value))
    }

    pub fn string_value(&self, object: ObjectReference) -> String {
        self.heap
            .string_value(object_id(object))
            .unwrap_or_else(|| panic!("{} is not a string", object))
    }

    /// Simulate a collection of an object that is not strongly reachable. Returns false, and
    /// leaves the object alone, if a local or global handle still refers to it.
    pub fn collect(&mut self, object: ObjectReference) -> bool {
        let id = object_id(object);
        let strongly_held = self
            .handles
            .values()
            .any(|h| h.object == Some(id) && h.kind != HandleKind::Weak);
        if strongly_held {
            return false;
        }
        self.heap.collect(id);
        for handle in self.handles.values_mut() {
            if handle.kind == HandleKind::Weak && handle.object == Some(id) {
                handle.object = None;
            }
        }
        true
    }

    pub fn is_live(&self, object: ObjectReference) -> bool {
        object.value() >= OBJECT_BASE && self.heap.is_live(object_id(object))
    }

    // --- Handles ---

    fn new_handle(&mut self, object: Option<ObjectReference>, kind: HandleKind) -> Address {
        self.next_handle += 1;
        let handle = raw(HANDLE_BASE + self.next_handle * std::mem::size_of::<usize>());
        self.handles.insert(
            handle,
            HandleEntry {
                object: object.map(object_id),
                kind,
            },
        );
        handle
    }

    pub fn new_local_handle(&mut self, thread: VMThread, object: Option<ObjectReference>) -> Address {
        let handle = self.new_handle(object, HandleKind::Local);
        self.thread(thread).local_handles.push(handle);
        handle
    }

    pub fn new_global_handle(&mut self, object: Option<ObjectReference>) -> Address {
        self.new_handle(object, HandleKind::Global)
    }

    pub fn new_weak_handle(&mut self, object: Option<ObjectReference>) -> Address {
        self.new_handle(object, HandleKind::Weak)
    }

    pub fn destroy_handle(&mut self, handle: Address, kind: HandleKind) {
        match self.handles.remove(&handle) {
            Some(entry) => assert_eq!(entry.kind, kind, "destroyed handle {} with the wrong kind", handle),
            None => panic!("{} is not a live handle", handle),
        }
    }

    pub fn resolve_handle(&self, handle: Address) -> Option<ObjectReference> {
        match self.handles.get(&handle) {
            Some(entry) => entry.object.map(object_ref),
            None => panic!("{} is not a live handle", handle),
        }
    }

    pub fn handle_kind(&self, handle: Address) -> Option<HandleKind> {
        self.handles.get(&handle).map(|h| h.kind)
    }

    pub fn number_of_handles(&self, kind: HandleKind) -> usize {
        self.handles.values().filter(|h| h.kind == kind).count()
    }

    /// Pop every local handle of the thread, as leaving its outermost handle scope does.
    pub fn release_local_handles(&mut self, thread: VMThread) {
        let locals = std::mem::take(&mut self.thread(thread).local_handles);
        for handle in locals {
            self.handles.remove(&handle);
        }
    }

    // --- Threads ---

    pub fn thread(&mut self, thread: VMThread) -> &mut ThreadState {
        self.threads.entry(thread).or_default()
    }

    /// Create an exception and leave it pending on the thread.
    pub fn throw(&mut self, thread: VMThread, class: &str, message: Option<&str>) -> ExceptionPending {
        let exception = object_ref(self.heap.new_throwable(class, message));
        self.thread(thread).pending_exception = Some(exception);
        ExceptionPending
    }

    fn throw_object(&mut self, thread: VMThread, exception: ObjectId) -> ExceptionPending {
        self.thread(thread).pending_exception = Some(object_ref(exception));
        ExceptionPending
    }

    /// The class and message of the pending exception.
    pub fn pending_exception_description(&mut self, thread: VMThread) -> Option<(String, Option<String>)> {
        let exception = self.thread(thread).pending_exception?;
        let id = object_id(exception);
        Some((self.heap.class_of(id).to_string(), self.heap.throwable_message(id)))
    }

    // --- Allocation ---

    fn charge_allocation(&mut self, thread: VMThread) -> VMResult<()> {
        match self.allocation_budget {
            Some(0) => {
                if self.thread(thread).in_retryable_allocation {
                    let oom = match self.retry_oom {
                        Some(oom) => oom,
                        None => {
                            let oom = self
                                .heap
                                .new_throwable("java/lang/OutOfMemoryError", Some("Java heap space: failed retryable allocation"));
                            self.retry_oom = Some(oom);
                            oom
                        }
                    };
                    Err(self.throw_object(thread, oom))
                } else {
                    Err(self.throw(thread, "java/lang/OutOfMemoryError", Some("Java heap space")))
                }
            }
            Some(n) => {
                self.allocation_budget = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn is_retry_out_of_memory_error(&self, exception: ObjectReference) -> bool {
        self.retry_oom == Some(object_id(exception))
    }

    pub fn allocate_instance(&mut self, thread: VMThread, klass: KlassRef) -> VMResult<ObjectReference> {
        self.charge_allocation(thread)?;
        let class = self.klass(klass).name.clone();
        Ok(self.new_object(&class))
    }

    pub fn allocate_array(&mut self, thread: VMThread, array_klass: KlassRef, length: i32) -> VMResult<ObjectReference> {
        let name = self.klass(array_klass).name.clone();
        let element = name.strip_prefix('[').unwrap_or_else(|| panic!("{} is not an array class", name));
        self.new_array(thread, element, length)
    }

    /// Allocate an array with elements of the given descriptor.
    fn new_array(&mut self, thread: VMThread, element_descriptor: &str, length: i32) -> VMResult<ObjectReference> {
        if length < 0 {
            return Err(self.throw(thread, "java/lang/NegativeArraySizeException", Some(&length.to_string())));
        }
        self.charge_allocation(thread)?;
        let element = match BasicType::from_descriptor(element_descriptor) {
            Some(ty) if ty.is_primitive() => ty,
            _ => BasicType::Object,
        };
        let id = self.heap.new_array(element, length as usize);
        self.heap.object_mut(id).class = format!("[{}", element_descriptor);
        Ok(object_ref(id))
    }

    pub fn allocate_multi_array(&mut self, thread: VMThread, array_klass: KlassRef, dims: &[i32]) -> VMResult<ObjectReference> {
        let name = self.klass(array_klass).name.clone();
        self.new_multi_array(thread, &name, dims)
    }

    fn new_multi_array(&mut self, thread: VMThread, class: &str, dims: &[i32]) -> VMResult<ObjectReference> {
        let element = &class[1..];
        let array = self.new_array(thread, element, dims[0])?;
        if dims.len() > 1 {
            for i in 0..dims[0] {
                let inner = self.new_multi_array(thread, element, &dims[1..])?;
                self.heap.array_set(object_id(array), i, Value::Object(Some(object_id(inner))));
            }
        }
        Ok(array)
    }

    pub fn reflect_new_array(&mut self, thread: VMThread, element_mirror: ObjectReference, length: i32) -> VMResult<ObjectReference> {
        let payload = self.object(element_mirror).payload.clone();
        let descriptor = match &payload {
            Payload::Class { name, metadata: None } => match name.as_str() {
                "void" => return Err(self.throw(thread, "java/lang/IllegalArgumentException", None)),
                primitive => primitive_descriptor(primitive).to_string(),
            },
            Payload::Class { name, .. } if name.starts_with('[') => name.clone(),
            Payload::Class { name, .. } => format!("L{};", name),
            _ => return Err(self.throw(thread, "java/lang/ClassCastException", None)),
        };
        self.new_array(thread, &descriptor, length)
    }

    /// The mirror of a primitive type, e.g. `int.class`.
    pub fn primitive_mirror(&mut self, ty: BasicType) -> ObjectReference {
        object_ref(self.heap.new_class_mirror(ty.java_name(), None))
    }

    // --- Class metadata ---

    /// Load a class. Loading bumps the system dictionary counter.
    pub fn define_klass(&mut self, name: &str, superclass: Option<&str>) -> KlassRef {
        if let Some(klass) = self.klass_by_name.get(name) {
            return *klass;
        }
        let superclass = superclass.map(|s| self.define_klass(s, Some("java/lang/Object")));
        if name != "java/lang/Object" {
            let super_name = superclass.map_or("java/lang/Object".to_string(), |s| self.klass(s).name.clone());
            self.heap.define_class(name, &super_name);
        }
        let klass = KlassRef(raw(KLASS_BASE + self.klasses.len() * METADATA_ALIGNMENT));
        let mirror = self.heap.new_class_mirror(name, Some(klass.as_jlong()));
        let constants = ConstantPoolRef(raw(CONSTANT_POOL_BASE + self.constant_pools.len() * METADATA_ALIGNMENT));
        self.constant_pools.push(MockConstantPool {
            holder: klass,
            entries: vec![CpEntry::Empty],
            resolved_references: vec![],
            resolved_strings: HashMap::new(),
        });
        self.klasses.push(MockKlass {
            name: name.to_string(),
            superclass,
            is_interface: false,
            is_abstract: false,
            is_instance: !name.starts_with('['),
            initialized: false,
            mirror,
            implementor: None,
            has_finalizer: false,
            methods: vec![],
            fields: vec![],
            constants,
        });
        self.klass_by_name.insert(name.to_string(), klass);
        self.dictionary_counter += 1;
        klass
    }

    pub fn define_interface(&mut self, name: &str) -> KlassRef {
        let klass = self.define_klass(name, None);
        let k = self.klass_mut(klass);
        k.is_interface = true;
        k.is_abstract = true;
        klass
    }

    pub fn find_klass(&self, name: &str) -> Option<KlassRef> {
        self.klass_by_name.get(name).copied()
    }

    fn klass_index(klass: KlassRef) -> usize {
        (klass.0.as_usize() - KLASS_BASE) / METADATA_ALIGNMENT
    }

    pub fn klass(&self, klass: KlassRef) -> &MockKlass {
        &self.klasses[Self::klass_index(klass)]
    }

    pub fn klass_mut(&mut self, klass: KlassRef) -> &mut MockKlass {
        &mut self.klasses[Self::klass_index(klass)]
    }

    pub fn is_subklass(&self, klass: KlassRef, of: KlassRef) -> bool {
        let mut current = Some(klass);
        while let Some(k) = current {
            if k == of {
                return true;
            }
            current = self.klass(k).superclass;
        }
        false
    }

    fn klasses_below(&self, context: KlassRef) -> Vec<KlassRef> {
        (0..self.klasses.len())
            .map(|i| KlassRef(raw(KLASS_BASE + i * METADATA_ALIGNMENT)))
            .filter(|k| self.is_subklass(*k, context))
            .collect()
    }

    pub fn klass_of(&mut self, object: ObjectReference) -> KlassRef {
        let class = self.object(object).class.clone();
        self.define_klass(&class, None)
    }

    pub fn klass_mirror(&self, klass: KlassRef) -> ObjectReference {
        object_ref(self.klass(klass).mirror)
    }

    pub fn mirror_to_klass(&self, mirror: ObjectReference) -> Option<KlassRef> {
        match self.object(mirror).payload {
            Payload::Class { metadata, .. } => metadata.map(|m| KlassRef(unsafe { Address::from_jlong(m) })),
            _ => panic!("{} is not a class mirror", mirror),
        }
    }

    pub fn define_method(&mut self, holder: KlassRef, name: &str, signature: &str) -> MethodRef {
        let method = MethodRef(raw(METHOD_BASE + self.methods.len() * METADATA_ALIGNMENT));
        self.methods.push(MockJavaMethod {
            holder: Some(holder),
            name: name.to_string(),
            signature: signature.to_string(),
            ..Default::default()
        });
        self.klass_mut(holder).methods.push(method);
        method
    }

    pub fn method(&self, method: MethodRef) -> &MockJavaMethod {
        &self.methods[(method.0.as_usize() - METHOD_BASE) / METADATA_ALIGNMENT]
    }

    pub fn method_mut(&mut self, method: MethodRef) -> &mut MockJavaMethod {
        &mut self.methods[(method.0.as_usize() - METHOD_BASE) / METADATA_ALIGNMENT]
    }

    pub fn method_holder(&self, method: MethodRef) -> KlassRef {
        self.method(method).holder.expect("method without a holder")
    }

    pub fn constant_pool(&self, cp: ConstantPoolRef) -> &MockConstantPool {
        &self.constant_pools[(cp.0.as_usize() - CONSTANT_POOL_BASE) / METADATA_ALIGNMENT]
    }

    pub fn constant_pool_mut(&mut self, cp: ConstantPoolRef) -> &mut MockConstantPool {
        &mut self.constant_pools[(cp.0.as_usize() - CONSTANT_POOL_BASE) / METADATA_ALIGNMENT]
    }

    /// Add a method reference to a constant pool, with the entries it needs. Returns its index.
    pub fn add_method_ref(&mut self, cp: ConstantPoolRef, class: &str, name: &str, signature: &str) -> i32 {
        let pool = self.constant_pool_mut(cp);
        let class_index = pool.add(CpEntry::Class(class.to_string()));
        let name_index = pool.add(CpEntry::Utf8(name.to_string()));
        let signature_index = pool.add(CpEntry::Utf8(signature.to_string()));
        let name_and_type_index = pool.add(CpEntry::NameAndType {
            name_index,
            signature_index,
        });
        pool.add(CpEntry::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Add a field reference to a constant pool, with the entries it needs. Returns its index.
    pub fn add_field_ref(&mut self, cp: ConstantPoolRef, class: &str, name: &str, signature: &str) -> i32 {
        let pool = self.constant_pool_mut(cp);
        let class_index = pool.add(CpEntry::Class(class.to_string()));
        let name_index = pool.add(CpEntry::Utf8(name.to_string()));
        let signature_index = pool.add(CpEntry::Utf8(signature.to_string()));
        let name_and_type_index = pool.add(CpEntry::NameAndType {
            name_index,
            signature_index,
        });
        pool.add(CpEntry::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    fn find_method_in(&self, klass: KlassRef, name: &str, signature: &str) -> Option<MethodRef> {
        let mut current = Some(klass);
        while let Some(k) = current {
            let found = self.klass(k).methods.iter().copied().find(|m| {
                let m = self.method(*m);
                m.name == name && m.signature == signature
            });
            if found.is_some() {
                return found;
            }
            current = self.klass(k).superclass;
        }
        None
    }

    pub fn find_unique_concrete_method(&self, holder: KlassRef, method: MethodRef) -> Option<MethodRef> {
        let (name, signature) = (&self.method(method).name, &self.method(method).signature);
        let mut found = None;
        for klass in self.klasses_below(holder) {
            for m in self.klass(klass).methods.iter().copied() {
                let candidate = self.method(m);
                if candidate.name == *name && candidate.signature == *signature && !candidate.is_abstract {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(m);
                }
            }
        }
        found
    }

    pub fn has_finalizable_subclass(&self, klass: KlassRef) -> bool {
        self.klasses_below(klass).iter().any(|k| self.klass(*k).has_finalizer)
    }

    pub fn lookup_klass(&mut self, thread: VMThread, name: &str, resolve: bool) -> VMResult<Option<KlassRef>> {
        let name = name
            .strip_prefix('L')
            .and_then(|n| n.strip_suffix(';'))
            .unwrap_or(name);
        match self.find_klass(name) {
            Some(klass) => Ok(Some(klass)),
            None if resolve => Err(self.throw(thread, "java/lang/NoClassDefFoundError", Some(name))),
            None => Ok(None),
        }
    }

    pub fn find_class(&mut self, thread: VMThread, name: &str) -> VMResult<ObjectReference> {
        match self.lookup_klass(thread, name, false)? {
            Some(klass) => Ok(self.klass_mirror(klass)),
            // Classes of the runtime itself are always there
            None if name.starts_with("java/") || name.starts_with("jdk/vm/ci/") => {
                let klass = self.define_klass(name, None);
                Ok(self.klass_mirror(klass))
            }
            None => Err(self.throw(thread, "java/lang/NoClassDefFoundError", Some(name))),
        }
    }

    /// Check a dependency against the classes loaded so far.
    pub fn check_dependency(&mut self, dependency: &Dependency) -> Option<KlassRef> {
        match *dependency {
            Dependency::NoFinalizableSubclasses { context } => self
                .klasses_below(context)
                .into_iter()
                .find(|k| self.klass(*k).has_finalizer),
            Dependency::LeafType { context } => self.klasses_below(context).into_iter().find(|k| *k != context),
            Dependency::ConcreteSubtype { context, subtype } => self.klasses_below(context).into_iter().find(|k| {
                let klass = self.klass(*k);
                *k != subtype && !klass.is_abstract && !klass.is_interface && !self.is_subklass(subtype, *k)
            }),
            Dependency::UniqueConcreteMethod { context, method } => {
                let (name, signature) = (self.method(method).name.clone(), self.method(method).signature.clone());
                self.klasses_below(context).into_iter().find(|k| {
                    self.klass(*k).methods.iter().any(|m| {
                        let candidate = self.method(*m);
                        *m != method && candidate.name == name && candidate.signature == signature && !candidate.is_abstract
                    })
                })
            }
            Dependency::EvolMethod { method } => {
                let m = self.method(method);
                if m.is_old {
                    m.holder
                } else {
                    None
                }
            }
            Dependency::CallSiteTargetValue { call_site, method_handle } => {
                let target = self.heap.get_field(
                    object_id(call_site),
                    "java/lang/invoke/CallSite",
                    "target",
                    "Ljava/lang/invoke/MethodHandle;",
                );
                if target == Value::Object(Some(object_id(method_handle))) {
                    None
                } else {
                    Some(self.klass_of(call_site))
                }
            }
        }
    }

    // --- Constant pools ---

    pub fn cp_name_ref_at(&self, cp: ConstantPoolRef, which: i32) -> String {
        let pool = self.constant_pool(cp);
        pool.name_and_type(pool.member(which).1).0
    }

    pub fn cp_signature_ref_at(&self, cp: ConstantPoolRef, which: i32) -> String {
        let pool = self.constant_pool(cp);
        pool.name_and_type(pool.member(which).1).1
    }

    pub fn cp_klass_ref_index_at(&self, cp: ConstantPoolRef, index: i32) -> i32 {
        self.constant_pool(cp).member(index).0
    }

    pub fn cp_name_and_type_ref_index_at(&self, cp: ConstantPoolRef, index: i32) -> i32 {
        self.constant_pool(cp).member(index).1
    }

    pub fn cp_resolve_klass(&mut self, thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<KlassRef> {
        let name = self.constant_pool(cp).class_name(index);
        match self.lookup_klass(thread, &name, true)? {
            Some(klass) => Ok(klass),
            None => Err(self.throw(thread, "java/lang/NoClassDefFoundError", Some(&name))),
        }
    }

    pub fn cp_lookup_method(&mut self, thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<Option<MethodRef>> {
        let (class_index, _) = self.constant_pool(cp).member(index);
        let class = self.constant_pool(cp).class_name(class_index);
        let klass = match self.lookup_klass(thread, &class, true)? {
            Some(klass) => klass,
            None => return Ok(None),
        };
        let name = self.cp_name_ref_at(cp, index);
        let signature = self.cp_signature_ref_at(cp, index);
        Ok(self.find_method_in(klass, &name, &signature))
    }

    pub fn cp_resolve_field(&mut self, thread: VMThread, cp: ConstantPoolRef, index: i32) -> VMResult<ResolvedField> {
        let (class_index, _) = self.constant_pool(cp).member(index);
        let holder = self.cp_resolve_klass(thread, cp, class_index)?;
        let name = self.cp_name_ref_at(cp, index);
        let signature = self.cp_signature_ref_at(cp, index);
        let found = self
            .klass(holder)
            .fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name && f.signature == signature)
            .map(|(i, f)| ResolvedField {
                holder,
                offset: f.offset,
                flags: f.flags,
                field_index: i as i32,
            });
        match found {
            Some(field) => Ok(field),
            None => Err(self.throw(thread, "java/lang/NoSuchFieldError", Some(&name))),
        }
    }

    pub fn cp_resolve_constant(&mut self, cp: ConstantPoolRef, index: i32) -> Option<ObjectReference> {
        if let Some(id) = self.constant_pool(cp).resolved_strings.get(&index) {
            return Some(object_ref(*id));
        }
        let value = match self.constant_pool(cp).entry(index) {
            CpEntry::String(s) => s.clone(),
            _ => return None,
        };
        let id = self.heap.new_string(&value);
        self.constant_pool_mut(cp).resolved_strings.insert(index, id);
        Some(object_ref(id))
    }

    pub fn cp_object_to_cp_index(&self, cp: ConstantPoolRef, index: i32) -> i32 {
        self.constant_pool(cp)
            .resolved_references
            .get(index as usize)
            .copied()
            .unwrap_or(index)
    }

    // --- Code cache ---

    fn allocate_code(&mut self, description: &CodeBlobDescription, is_stub: bool) -> Option<Address> {
        let size = (NMETHOD_HEADER_SIZE + description.code.total_size() + 63) & !63;
        if self.code_top + size > self.code_cache_end {
            return None;
        }
        let address = raw(self.code_top);
        self.code_top += size;
        let code_begin = address + NMETHOD_HEADER_SIZE;
        let code = description
            .code
            .relocated_code(code_begin)
            .unwrap_or_else(|e| panic!("cannot relocate {}: {}", description.name, e));
        let state = NMethodState {
            address,
            size,
            code_begin,
            code_size: description.code.insts().len(),
            verified_entry_point: Some(code_begin + description.offsets.value(CodeOffset::VerifiedEntry) as usize),
            is_alive: true,
            is_in_use: true,
            method: description.method,
            entry_bci: description.entry_bci,
            compile_id: description.compile_id,
        };
        let exception_entry = description
            .offsets
            .get(CodeOffset::Exceptions)
            .map_or(Address::ZERO, |offset| code_begin + offset as usize);
        self.code_blobs.insert(
            address,
            CodeBlob {
                name: description.name.to_string(),
                state,
                code,
                is_stub,
                comp_level: description.comp_level,
                dependencies: description.dependencies.iter().cloned().collect(),
                offsets: description.offsets.clone(),
                oop_maps: description.oop_maps.clone(),
                exception_table: description.exception_handlers.clone(),
                handlers: HashMap::new(),
                deopt_pcs: HashSet::new(),
                method_handle_return_pcs: HashSet::new(),
                handler_cache: HashMap::new(),
                exception_entry,
            },
        );
        Some(address)
    }

    pub fn register_nmethod(&mut self, description: &CodeBlobDescription) -> Option<NMethodRef> {
        self.allocate_code(description, false).map(NMethodRef)
    }

    pub fn register_runtime_stub(&mut self, description: &CodeBlobDescription) -> Option<CodeBlobRef> {
        self.allocate_code(description, true).map(CodeBlobRef)
    }

    pub fn blob(&self, nm: NMethodRef) -> &CodeBlob {
        self.code_blobs
            .get(&nm.0)
            .unwrap_or_else(|| panic!("{:?} is not in the code cache", nm))
    }

    pub fn blob_mut(&mut self, nm: NMethodRef) -> &mut CodeBlob {
        self.code_blobs
            .get_mut(&nm.0)
            .unwrap_or_else(|| panic!("{:?} is not in the code cache", nm))
    }

    pub fn find_nmethod(&self, pc: Address) -> Option<NMethodRef> {
        self.code_blobs
            .range(..=pc)
            .next_back()
            .filter(|(start, blob)| !blob.is_stub && pc < **start + blob.state.size)
            .map(|(start, _)| NMethodRef(*start))
    }

    pub fn make_not_entrant(&mut self, nm: NMethodRef) -> bool {
        let blob = self.blob_mut(nm);
        if !blob.state.is_in_use {
            return false;
        }
        blob.state.is_in_use = false;
        blob.state.verified_entry_point = None;
        let method = blob.state.method;
        if let Some(method) = method {
            let m = self.method_mut(method);
            if m.code == Some(nm) {
                m.code = None;
            }
        }
        true
    }

    /// Unload an nmethod, as the collector does with nmethods nothing runs anymore.
    pub fn unload_nmethod(&mut self, nm: NMethodRef) {
        self.make_not_entrant(nm);
        self.blob_mut(nm).state.is_alive = false;
    }

    pub fn compute_compiled_exception_handler(&mut self, nm: NMethodRef, pc: Address) -> Address {
        self.handler_lookups += 1;
        let blob = self.blob(nm);
        blob.handlers.get(&pc).copied().unwrap_or(blob.exception_entry)
    }

    pub fn cached_exception_handler(&self, nm: NMethodRef, pc: Address, exception: ObjectReference) -> Option<Address> {
        let class = self.object(exception).class.clone();
        self.blob(nm).handler_cache.get(&(pc, class)).copied()
    }

    pub fn cache_exception_handler(&mut self, nm: NMethodRef, pc: Address, exception: ObjectReference, handler: Address) {
        let class = self.object(exception).class.clone();
        self.blob_mut(nm).handler_cache.insert((pc, class), handler);
    }

    // --- Stack frames ---

    pub fn materialize_virtual_objects(&mut self, thread: VMThread, frame_id: usize, invalidate: bool) -> VMResult<()> {
        if !self.thread(thread).frames.iter().any(|f| f.frame_id == frame_id) {
            return Err(self.throw(thread, "java/lang/IllegalStateException", Some("frame not found")));
        }
        let mut frames = std::mem::take(&mut self.thread(thread).frames);
        for frame in frames.iter_mut().filter(|f| f.frame_id == frame_id) {
            for local in std::mem::take(&mut frame.virtual_locals) {
                frame.locals[local] = Value::Object(Some(self.new_object("java/lang/Object")));
            }
        }
        let state = self.thread(thread);
        state.frames = frames;
        state.materialized.push((frame_id, invalidate));
        Ok(())
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

/// The descriptor of a primitive type, given its Java name.
fn primitive_descriptor(java_name: &str) -> &'static str {
    match java_name {
        "boolean" => "Z",
        "byte" => "B",
        "char" => "C",
        "short" => "S",
        "int" => "I",
        "long" => "J",
        "float" => "F",
        "double" => "D",
        _ => "V",
    }
}

fn default_flags() -> Vec<VMFlag> {
    let flag = |name: &str, value: FlagValue, n: usize| VMFlag {
        name: name.to_string(),
        value,
        address: raw(0x6800_0000 + n * 8),
    };
    vec![
        flag("UseCompressedOops", FlagValue::Bool(true), 0),
        flag("CodeEntryAlignment", FlagValue::Intx(32), 1),
        flag("ReservedCodeCacheSize", FlagValue::Uintx(CODE_CACHE_SIZE as u64), 2),
        flag("MaxRAM", FlagValue::Uint64(1 << 30), 3),
        flag("CompileThresholdScaling", FlagValue::Double(1.0), 4),
        flag("JVMCILibPath", FlagValue::Ccstr(None), 5),
        flag("OnError", FlagValue::Other("ccstrlist".to_string()), 6),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_handles_are_cleared() {
        let mut host = MockHost::new();
        let object = host.new_object("java/lang/Object");
        let weak = host.new_weak_handle(Some(object));
        let global = host.new_global_handle(Some(object));
        assert!(!host.collect(object));
        host.destroy_handle(global, HandleKind::Global);
        assert!(host.collect(object));
        assert_eq!(host.resolve_handle(weak), None);
        assert!(!host.is_live(object));
    }

    #[test]
    fn loading_classes_bumps_the_counter() {
        let mut host = MockHost::new();
        let before = host.dictionary_counter;
        let a = host.define_klass("A", None);
        let b = host.define_klass("B", Some("A"));
        assert_eq!(host.dictionary_counter, before + 2);
        assert!(host.is_subklass(b, a));
        assert_eq!(host.check_dependency(&Dependency::LeafType { context: a }), Some(b));
        assert_eq!(host.check_dependency(&Dependency::LeafType { context: b }), None);
    }

    #[test]
    fn constant_pool_references() {
        let mut host = MockHost::new();
        let a = host.define_klass("A", None);
        let m = host.define_method(a, "run", "()V");
        let cp = host.klass(a).constants;
        let index = host.add_method_ref(cp, "A", "run", "()V");
        assert_eq!(host.cp_name_ref_at(cp, index), "run");
        assert_eq!(host.cp_signature_ref_at(cp, index), "()V");
        assert_eq!(host.cp_lookup_method(test_thread(0), cp, index), Ok(Some(m)));
    }
}
