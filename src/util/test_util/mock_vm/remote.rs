//! A remote VM for tests. It keeps its own [`JavaHeap`] and hands out JNI style references to it,
//! so code that mixes up the two heaps fails loudly.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::java_heap::{HeapValue, JavaHeap, ObjectId, Payload};
use crate::vm::{BasicType, FieldId, JValue, MethodId, NativeMethod, RemoteEnv, RemoteJavaVM, RemoteRef, Value};

/// Remote references are odd, so they never look like a host object or handle.
const REF_TAG: usize = 0x1;
const REF_STRIDE: usize = 0x10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    Local,
    Global,
    Weak,
}

struct RefEntry {
    /// `None` once a weak referent was collected.
    object: Option<ObjectId>,
    kind: RefKind,
}

#[derive(Clone, Debug)]
struct Member {
    class: String,
    name: String,
    signature: String,
    is_static: bool,
}

/// The state of the remote VM, shared by all attached threads.
pub struct RemoteState {
    pub heap: JavaHeap,
    refs: HashMap<usize, RefEntry>,
    next_ref: usize,
    /// Local references of each pushed local frame. The first frame is never popped.
    frames: Vec<Vec<usize>>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    pending: Option<ObjectId>,
    /// Classes `FindClass` does not find.
    pub missing_classes: HashSet<String>,
    pub attach_fails: bool,
    pub attached: usize,
    pub detached: usize,
    pub registered_natives: Vec<(String, Vec<NativeMethod>)>,
    pub described_exceptions: Vec<String>,
}

impl RemoteState {
    fn new() -> Self {
        RemoteState {
            heap: JavaHeap::new(),
            refs: HashMap::new(),
            next_ref: 0,
            frames: vec![vec![]],
            fields: vec![],
            methods: vec![],
            pending: None,
            missing_classes: HashSet::new(),
            attach_fails: false,
            attached: 0,
            detached: 0,
            registered_natives: vec![],
            described_exceptions: vec![],
        }
    }

    /// Create a reference to `object`. Locals are recorded in the current frame.
    pub fn new_ref(&mut self, object: ObjectId, kind: RefKind) -> RemoteRef {
        self.next_ref += 1;
        let raw = self.next_ref * REF_STRIDE + REF_TAG;
        self.refs.insert(
            raw,
            RefEntry {
                object: Some(object),
                kind,
            },
        );
        if kind == RefKind::Local {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(raw);
            }
        }
        RemoteRef::from_raw(raw).expect("reference is never zero")
    }

    /// The object behind a reference. Panics on a dangling reference, like a crash in a real VM.
    pub fn resolve(&self, r: RemoteRef) -> Option<ObjectId> {
        match self.refs.get(&r.as_raw()) {
            Some(entry) => entry.object,
            None => panic!("use of a deleted or foreign reference {:?}", r),
        }
    }

    fn object_of(&self, r: RemoteRef) -> ObjectId {
        match self.resolve(r) {
            Some(object) => object,
            None => panic!("use of a cleared weak reference {:?}", r),
        }
    }

    fn delete_ref(&mut self, r: RemoteRef, kind: RefKind) {
        match self.refs.remove(&r.as_raw()) {
            Some(entry) => assert_eq!(entry.kind, kind, "{:?} deleted as a {:?} reference", r, kind),
            None => panic!("{:?} deleted twice", r),
        }
    }

    pub fn number_of_refs(&self, kind: RefKind) -> usize {
        self.refs.values().filter(|e| e.kind == kind).count()
    }

    pub fn local_frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Collect `object` if no strong reference holds it. Weak references to it are cleared.
    pub fn collect(&mut self, object: ObjectId) -> bool {
        let strongly_held = self
            .refs
            .values()
            .any(|e| e.object == Some(object) && e.kind != RefKind::Weak);
        if strongly_held {
            return false;
        }
        for entry in self.refs.values_mut() {
            if entry.object == Some(object) {
                entry.object = None;
            }
        }
        self.heap.collect(object);
        true
    }

    fn class_name(&self, class: RemoteRef) -> String {
        match &self.heap.object(self.object_of(class)).payload {
            Payload::Class { name, .. } => name.clone(),
            _ => panic!("{:?} is not a class", class),
        }
    }

    fn to_heap(&self, value: JValue) -> HeapValue {
        value.map_object(|o| o.and_then(|r| self.resolve(r)))
    }

    fn to_local(&mut self, value: HeapValue) -> JValue {
        value.map_object(|o| o.map(|id| self.new_ref(id, RefKind::Local)))
    }

    fn member(members: &[Member], id: NonZeroUsize) -> Member {
        members[id.get() - 1].clone()
    }

    fn add_member(members: &mut Vec<Member>, member: Member) -> NonZeroUsize {
        members.push(member);
        NonZeroUsize::new(members.len()).expect("length after push is non-zero")
    }

    /// Run a method, leaving an exception pending if it throws.
    fn invoke(&mut self, member: &Member, receiver: Option<ObjectId>, args: &[JValue]) -> JValue {
        let args: Vec<HeapValue> = args.iter().map(|a| self.to_heap(*a)).collect();
        match self.heap.invoke(&member.class, &member.name, receiver, &args) {
            Ok(result) => self.to_local(result),
            Err(exception) => {
                self.pending = Some(exception);
                Value::Void
            }
        }
    }

    fn throw_new(&mut self, class: &str, message: Option<&str>) {
        self.pending = Some(self.heap.new_throwable(class, message));
    }
}

/// A remote VM. Clones share the same heap.
#[derive(Clone)]
pub struct MockRemoteVM {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for MockRemoteVM {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteVM {
    pub fn new() -> Self {
        MockRemoteVM {
            state: Arc::new(Mutex::new(RemoteState::new())),
        }
    }

    pub fn with_state<R, F: FnOnce(&mut RemoteState) -> R>(&self, f: F) -> R {
        f(&mut lock(&self.state))
    }

    /// An environment for the test itself, to create and inspect remote objects.
    pub fn env(&self) -> MockRemoteEnv {
        MockRemoteEnv {
            state: self.state.clone(),
        }
    }
}

fn lock(state: &Mutex<RemoteState>) -> MutexGuard<RemoteState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RemoteJavaVM for MockRemoteVM {
    fn attach_current_thread(&self) -> Option<Box<dyn RemoteEnv>> {
        let mut state = lock(&self.state);
        if state.attach_fails {
            return None;
        }
        state.attached += 1;
        Some(Box::new(self.env()))
    }

    fn detach_current_thread(&self) {
        lock(&self.state).detached += 1;
    }
}

/// A thread's view of a [`MockRemoteVM`].
pub struct MockRemoteEnv {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemoteEnv {
    fn state(&self) -> MutexGuard<RemoteState> {
        lock(&self.state)
    }
}

impl RemoteEnv for MockRemoteEnv {
    fn push_local_frame(&self, _capacity: i32) -> bool {
        self.state().frames.push(vec![]);
        true
    }

    fn pop_local_frame(&self, result: Option<RemoteRef>) -> Option<RemoteRef> {
        let mut state = self.state();
        let result = result.and_then(|r| state.resolve(r));
        if state.frames.len() > 1 {
            if let Some(frame) = state.frames.pop() {
                for raw in frame {
                    state.refs.remove(&raw);
                }
            }
        }
        result.map(|object| state.new_ref(object, RefKind::Local))
    }

    fn exception_check(&self) -> bool {
        self.state().pending.is_some()
    }

    fn exception_occurred(&self) -> Option<RemoteRef> {
        let mut state = self.state();
        state.pending.map(|e| state.new_ref(e, RefKind::Local))
    }

    fn exception_clear(&self) {
        self.state().pending = None;
    }

    fn exception_describe(&self) {
        let mut state = self.state();
        if let Some(exception) = state.pending.take() {
            let description = match state.heap.throwable_message(exception) {
                Some(message) => format!("{}: {}", state.heap.class_of(exception), message),
                None => state.heap.class_of(exception).to_string(),
            };
            state.described_exceptions.push(description);
        }
    }

    fn throw(&self, throwable: RemoteRef) -> bool {
        let mut state = self.state();
        state.pending = Some(state.object_of(throwable));
        true
    }

    fn throw_new(&self, class: RemoteRef, message: &str) -> bool {
        let mut state = self.state();
        let class = state.class_name(class);
        let message = if message.is_empty() { None } else { Some(message) };
        state.throw_new(&class, message);
        true
    }

    fn find_class(&self, name: &str) -> Option<RemoteRef> {
        let mut state = self.state();
        if state.missing_classes.contains(name) {
            state.throw_new("java/lang/NoClassDefFoundError", Some(name));
            return None;
        }
        let mirror = state.heap.new_class_mirror(name, None);
        Some(state.new_ref(mirror, RefKind::Local))
    }

    fn get_field_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<FieldId> {
        let mut state = self.state();
        let member = Member {
            class: state.class_name(class),
            name: name.to_string(),
            signature: signature.to_string(),
            is_static,
        };
        Some(FieldId(RemoteState::add_member(&mut state.fields, member)))
    }

    fn get_method_id(&self, class: RemoteRef, name: &str, signature: &str, is_static: bool) -> Option<MethodId> {
        let mut state = self.state();
        let member = Member {
            class: state.class_name(class),
            name: name.to_string(),
            signature: signature.to_string(),
            is_static,
        };
        Some(MethodId(RemoteState::add_member(&mut state.methods, member)))
    }

    fn is_instance_of(&self, object: RemoteRef, class: RemoteRef) -> bool {
        let state = self.state();
        let class = state.class_name(class);
        state.heap.is_instance_of(state.object_of(object), &class)
    }

    fn get_object_class(&self, object: RemoteRef) -> RemoteRef {
        let mut state = self.state();
        let name = state.heap.class_of(state.object_of(object)).to_string();
        let mirror = state.heap.new_class_mirror(&name, None);
        state.new_ref(mirror, RefKind::Local)
    }

    fn register_natives(&self, class: RemoteRef, methods: &[NativeMethod]) -> bool {
        let mut state = self.state();
        let class = state.class_name(class);
        state.registered_natives.push((class, methods.to_vec()));
        true
    }

    fn get_field(&self, object: RemoteRef, field: FieldId, _ty: BasicType) -> JValue {
        let mut state = self.state();
        let member = RemoteState::member(&state.fields, field.0);
        assert!(!member.is_static, "{}.{} is static", member.class, member.name);
        let value = state
            .heap
            .get_field(state.object_of(object), &member.class, &member.name, &member.signature);
        state.to_local(value)
    }

    fn set_field(&self, object: RemoteRef, field: FieldId, value: JValue) {
        let mut state = self.state();
        let member = RemoteState::member(&state.fields, field.0);
        let object = state.object_of(object);
        let value = state.to_heap(value);
        state.heap.set_field(object, &member.class, &member.name, value);
    }

    fn get_static_field(&self, _class: RemoteRef, field: FieldId, _ty: BasicType) -> JValue {
        let mut state = self.state();
        let member = RemoteState::member(&state.fields, field.0);
        assert!(member.is_static, "{}.{} is not static", member.class, member.name);
        let value = state.heap.get_static(&member.class, &member.name, &member.signature);
        state.to_local(value)
    }

    fn set_static_field(&self, _class: RemoteRef, field: FieldId, value: JValue) {
        let mut state = self.state();
        let member = RemoteState::member(&state.fields, field.0);
        let value = state.to_heap(value);
        state.heap.set_static(&member.class, &member.name, value);
    }

    fn new_object(&self, _class: RemoteRef, constructor: MethodId, args: &[JValue]) -> Option<RemoteRef> {
        let mut state = self.state();
        let member = RemoteState::member(&state.methods, constructor.0);
        assert_eq!(member.name, "<init>");
        state.invoke(&member, None, args).as_object().flatten()
    }

    fn call_static_method(&self, _class: RemoteRef, method: MethodId, _ret: BasicType, args: &[JValue]) -> JValue {
        let mut state = self.state();
        let member = RemoteState::member(&state.methods, method.0);
        assert!(member.is_static, "{}.{} is not static", member.class, member.name);
        state.invoke(&member, None, args)
    }

    fn call_method(&self, object: RemoteRef, method: MethodId, _ret: BasicType, args: &[JValue]) -> JValue {
        let mut state = self.state();
        let member = RemoteState::member(&state.methods, method.0);
        let receiver = state.object_of(object);
        state.invoke(&member, Some(receiver), args)
    }

    fn get_array_length(&self, array: RemoteRef) -> i32 {
        let state = self.state();
        state.heap.array_length(state.object_of(array))
    }

    fn new_object_array(&self, length: i32, element_class: RemoteRef) -> Option<RemoteRef> {
        let mut state = self.state();
        if length < 0 {
            state.throw_new("java/lang/NegativeArraySizeException", None);
            return None;
        }
        let element = state.class_name(element_class);
        let array = state.heap.new_array(BasicType::Object, length as usize);
        state.heap.object_mut(array).class = format!("[L{};", element);
        Some(state.new_ref(array, RefKind::Local))
    }

    fn get_object_array_element(&self, array: RemoteRef, index: i32) -> Option<RemoteRef> {
        let mut state = self.state();
        let value = state.heap.array_get(state.object_of(array), index);
        state.to_local(value).as_object().flatten()
    }

    fn set_object_array_element(&self, array: RemoteRef, index: i32, value: Option<RemoteRef>) {
        let mut state = self.state();
        let array = state.object_of(array);
        let value = value.and_then(|v| state.resolve(v));
        state.heap.array_set(array, index, Value::Object(value));
    }

    fn new_primitive_array(&self, ty: BasicType, length: i32) -> Option<RemoteRef> {
        let mut state = self.state();
        if length < 0 {
            state.throw_new("java/lang/NegativeArraySizeException", None);
            return None;
        }
        let array = state.heap.new_array(ty, length as usize);
        Some(state.new_ref(array, RefKind::Local))
    }

    fn get_primitive_array_region(&self, array: RemoteRef, _ty: BasicType, start: i32, buf: &mut [u8]) {
        let state = self.state();
        state.heap.copy_out(state.object_of(array), start, buf)
    }

    fn set_primitive_array_region(&self, array: RemoteRef, _ty: BasicType, start: i32, buf: &[u8]) {
        let mut state = self.state();
        let array = state.object_of(array);
        state.heap.copy_in(array, start, buf)
    }

    fn new_string_utf(&self, s: &str) -> Option<RemoteRef> {
        let mut state = self.state();
        let string = state.heap.new_string(s);
        Some(state.new_ref(string, RefKind::Local))
    }

    fn get_string_utf(&self, s: RemoteRef) -> String {
        let state = self.state();
        state.heap.string_value(state.object_of(s)).unwrap_or_default()
    }

    fn new_local_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        let mut state = self.state();
        state.resolve(object).map(|o| state.new_ref(o, RefKind::Local))
    }

    fn delete_local_ref(&self, object: RemoteRef) {
        self.state().delete_ref(object, RefKind::Local)
    }

    fn new_global_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        let mut state = self.state();
        state.resolve(object).map(|o| state.new_ref(o, RefKind::Global))
    }

    fn delete_global_ref(&self, object: RemoteRef) {
        self.state().delete_ref(object, RefKind::Global)
    }

    fn new_weak_global_ref(&self, object: RemoteRef) -> Option<RemoteRef> {
        let mut state = self.state();
        state.resolve(object).map(|o| state.new_ref(o, RefKind::Weak))
    }

    fn delete_weak_global_ref(&self, object: RemoteRef) {
        self.state().delete_ref(object, RefKind::Weak)
    }

    fn is_same_object(&self, a: Option<RemoteRef>, b: Option<RemoteRef>) -> bool {
        let state = self.state();
        a.and_then(|a| state.resolve(a)) == b.and_then(|b| state.resolve(b))
    }
}
