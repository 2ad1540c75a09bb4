//! A toy Java heap. The mock VM keeps one for the host heap, and each mock remote VM keeps its
//! own. Objects are field maps, and the few Java methods the runtime calls are simulated by
//! [`JavaHeap::invoke`].

use std::collections::HashMap;

use crate::vm::{BasicType, PrimitiveValue, Value};

/// Index of an object in a [`JavaHeap`]. Never zero.
pub type ObjectId = usize;

pub type HeapValue = Value<Option<ObjectId>>;

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Plain,
    String(String),
    Array { element: BasicType, values: Vec<HeapValue> },
    Box(PrimitiveValue),
    Throwable { message: Option<String> },
    /// A `java.lang.Class`. `metadata` is the klass pointer of the class, if it has one.
    Class { name: String, metadata: Option<i64> },
}

#[derive(Clone, Debug)]
pub struct JavaObject {
    pub class: String,
    pub fields: HashMap<(String, String), HeapValue>,
    pub payload: Payload,
}

/// Superclasses of the classes the runtime knows by name.
const SUPERCLASSES: &[(&str, &str)] = &[
    ("java/lang/Throwable", "java/lang/Object"),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/InstantiationException", "java/lang/ReflectiveOperationException"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/InternalError", "java/lang/VirtualMachineError"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("jdk/vm/ci/code/InvalidInstalledCodeException", "java/lang/Exception"),
    ("jdk/vm/ci/common/JVMCIError", "java/lang/Error"),
    ("jdk/vm/ci/hotspot/TranslatedException", "java/lang/Exception"),
    ("java/lang/Number", "java/lang/Object"),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("jdk/vm/ci/hotspot/HotSpotInstalledCode", "jdk/vm/ci/code/InstalledCode"),
    ("jdk/vm/ci/hotspot/HotSpotNmethod", "jdk/vm/ci/hotspot/HotSpotInstalledCode"),
    ("jdk/vm/ci/hotspot/HotSpotRuntimeStub", "jdk/vm/ci/hotspot/HotSpotInstalledCode"),
    ("jdk/vm/ci/hotspot/HotSpotObjectConstantImpl", "jdk/vm/ci/meta/JavaConstant"),
    ("jdk/vm/ci/hotspot/DirectHotSpotObjectConstantImpl", "jdk/vm/ci/hotspot/HotSpotObjectConstantImpl"),
    ("jdk/vm/ci/hotspot/IndirectHotSpotObjectConstantImpl", "jdk/vm/ci/hotspot/HotSpotObjectConstantImpl"),
    ("jdk/vm/ci/hotspot/HotSpotCompressedNullConstant", "jdk/vm/ci/meta/JavaConstant"),
];

const RUNTIME_CLASS: &str = "jdk/vm/ci/hotspot/HotSpotJVMCIRuntime";
const NULL_CONSTANT_CLASS: &str = "jdk/vm/ci/hotspot/HotSpotCompressedNullConstant";

/// What `HotSpotJVMCIRuntime.compileMethod` reports.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompileOutcome {
    pub failure_message: Option<String>,
    pub retry: bool,
    pub inlined_bytecodes: i32,
}

/// A call the simulated Java code received, as `Class.name`.
pub type CallRecord = String;

#[derive(Default)]
pub struct JavaHeap {
    objects: Vec<Option<JavaObject>>,
    superclasses: HashMap<String, String>,
    statics: HashMap<(String, String), HeapValue>,
    type_mirrors: HashMap<i64, ObjectId>,
    primitive_mirrors: HashMap<u16, ObjectId>,
    runtime: Option<ObjectId>,
    /// `HotSpotJVMCIRuntime.compilationLevelAdjustment` of a new runtime object.
    pub comp_level_adjustment: i32,
    /// The level `adjustCompilationLevel` returns. `None` returns the level it was given.
    pub adjusted_level: Option<i32>,
    pub compile_outcome: CompileOutcome,
    /// A message for an exception that `getCompiler` throws.
    pub get_compiler_failure: Option<String>,
    pub calls: Vec<CallRecord>,
}

impl JavaHeap {
    pub fn new() -> Self {
        let mut heap = JavaHeap {
            objects: vec![None],
            ..Default::default()
        };
        for (class, superclass) in SUPERCLASSES {
            heap.define_class(class, superclass);
        }
        let null_constant = heap.alloc(NULL_CONSTANT_CLASS, Payload::Plain);
        heap.statics.insert(
            ("jdk/vm/ci/meta/JavaConstant".to_string(), "NULL_POINTER".to_string()),
            Value::Object(Some(null_constant)),
        );
        heap
    }

    pub fn define_class(&mut self, class: &str, superclass: &str) {
        self.superclasses.insert(class.to_string(), superclass.to_string());
    }

    // --- Objects ---

    pub fn alloc(&mut self, class: &str, payload: Payload) -> ObjectId {
        self.objects.push(Some(JavaObject {
            class: class.to_string(),
            fields: HashMap::new(),
            payload,
        }));
        self.objects.len() - 1
    }

    /// Simulate the collection of an object.
    pub fn collect(&mut self, id: ObjectId) {
        if let Some(slot) = self.objects.get_mut(id) {
            *slot = None;
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        matches!(self.objects.get(id), Some(Some(_)))
    }

    pub fn object(&self, id: ObjectId) -> &JavaObject {
        match self.objects.get(id) {
            Some(Some(object)) => object,
            _ => panic!("object {} is not in the heap", id),
        }
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut JavaObject {
        match self.objects.get_mut(id) {
            Some(Some(object)) => object,
            _ => panic!("object {} is not in the heap", id),
        }
    }

    pub fn class_of(&self, id: ObjectId) -> &str {
        &self.object(id).class
    }

    pub fn number_of_objects(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    /// Is `class` the same as or a subclass of `of`? Every class is an `Object`.
    pub fn is_subclass(&self, class: &str, of: &str) -> bool {
        if of == "java/lang/Object" {
            return true;
        }
        let mut current = Some(class);
        while let Some(c) = current {
            if c == of {
                return true;
            }
            current = self.superclasses.get(c).map(|s| s.as_str());
        }
        false
    }

    pub fn is_instance_of(&self, id: ObjectId, class: &str) -> bool {
        self.is_subclass(self.class_of(id), class)
    }

    // --- Strings, boxes, throwables ---

    pub fn new_string(&mut self, value: &str) -> ObjectId {
        self.alloc("java/lang/String", Payload::String(value.to_string()))
    }

    pub fn string_value(&self, id: ObjectId) -> Option<String> {
        match &self.object(id).payload {
            Payload::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn new_box(&mut self, value: PrimitiveValue) -> ObjectId {
        let class = value.basic_type().box_class_name().unwrap_or("java/lang/Object");
        let id = self.alloc(class, Payload::Box(value));
        self.set_field(id, class, "value", Value::Primitive(value));
        id
    }

    pub fn unbox(&self, id: ObjectId) -> Option<PrimitiveValue> {
        match self.object(id).payload {
            Payload::Box(value) => Some(value),
            _ => None,
        }
    }

    pub fn new_throwable(&mut self, class: &str, message: Option<&str>) -> ObjectId {
        self.alloc(
            class,
            Payload::Throwable {
                message: message.map(|m| m.to_string()),
            },
        )
    }

    pub fn throwable_message(&self, id: ObjectId) -> Option<String> {
        match &self.object(id).payload {
            Payload::Throwable { message } => message.clone(),
            _ => None,
        }
    }

    pub fn new_class_mirror(&mut self, name: &str, metadata: Option<i64>) -> ObjectId {
        self.alloc(
            "java/lang/Class",
            Payload::Class {
                name: name.to_string(),
                metadata,
            },
        )
    }

    // --- Arrays ---

    pub fn new_array(&mut self, element: BasicType, length: usize) -> ObjectId {
        let zero = match PrimitiveValue::from_raw_bits(element, 0) {
            Some(zero) => Value::Primitive(zero),
            None => Value::Object(None),
        };
        let class = if element.is_primitive() {
            format!("[{}", element)
        } else {
            "[Ljava/lang/Object;".to_string()
        };
        self.alloc(
            &class,
            Payload::Array {
                element,
                values: vec![zero; length],
            },
        )
    }

    pub fn new_byte_array_from(&mut self, bytes: &[u8]) -> ObjectId {
        let id = self.new_array(BasicType::Byte, bytes.len());
        self.copy_in(id, 0, bytes);
        id
    }

    pub fn array_element_type(&self, id: ObjectId) -> Option<BasicType> {
        match &self.object(id).payload {
            Payload::Array { element, .. } => Some(*element),
            _ => None,
        }
    }

    pub fn array_length(&self, id: ObjectId) -> i32 {
        match &self.object(id).payload {
            Payload::Array { values, .. } => values.len() as i32,
            _ => panic!("object {} is not an array", id),
        }
    }

    pub fn array_get(&self, id: ObjectId, index: i32) -> HeapValue {
        match &self.object(id).payload {
            Payload::Array { values, .. } => values[index as usize],
            _ => panic!("object {} is not an array", id),
        }
    }

    pub fn array_set(&mut self, id: ObjectId, index: i32, value: HeapValue) {
        match &mut self.object_mut(id).payload {
            Payload::Array { values, .. } => values[index as usize] = value,
            _ => panic!("object {} is not an array", id),
        }
    }

    /// Copy elements out as little-endian bytes, starting at element `start`.
    pub fn copy_out(&self, id: ObjectId, start: i32, buf: &mut [u8]) {
        let element = self.array_element_type(id).unwrap_or(BasicType::Byte);
        let size = element.element_size();
        for (i, chunk) in buf.chunks_mut(size).enumerate() {
            if let Value::Primitive(value) = self.array_get(id, start + i as i32) {
                let bytes = value.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    pub fn copy_in(&mut self, id: ObjectId, start: i32, buf: &[u8]) {
        let element = self.array_element_type(id).unwrap_or(BasicType::Byte);
        for (i, chunk) in buf.chunks(element.element_size()).enumerate() {
            if let Some(value) = PrimitiveValue::from_le_bytes(element, chunk) {
                self.array_set(id, start + i as i32, Value::Primitive(value));
            }
        }
    }

    /// All bytes of a `byte[]`.
    pub fn byte_array(&self, id: ObjectId) -> Vec<u8> {
        let mut bytes = vec![0u8; self.array_length(id) as usize];
        self.copy_out(id, 0, &mut bytes);
        bytes
    }

    // --- Fields ---

    /// Read a field. A field that was never written has the zero value of its type.
    pub fn get_field(&self, id: ObjectId, class: &str, name: &str, signature: &str) -> HeapValue {
        self.object(id)
            .fields
            .get(&(class.to_string(), name.to_string()))
            .copied()
            .unwrap_or_else(|| zero_value(signature))
    }

    pub fn set_field(&mut self, id: ObjectId, class: &str, name: &str, value: HeapValue) {
        self.object_mut(id)
            .fields
            .insert((class.to_string(), name.to_string()), value);
    }

    pub fn get_static(&self, class: &str, name: &str, signature: &str) -> HeapValue {
        self.statics
            .get(&(class.to_string(), name.to_string()))
            .copied()
            .unwrap_or_else(|| zero_value(signature))
    }

    pub fn set_static(&mut self, class: &str, name: &str, value: HeapValue) {
        self.statics.insert((class.to_string(), name.to_string()), value);
    }

    // --- Java code ---

    pub fn was_called(&self, call: &str) -> bool {
        self.calls.iter().any(|c| c == call)
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    /// The `HotSpotJVMCIRuntime` object, if `HotSpotJVMCIRuntime.runtime()` has been called.
    pub fn runtime_object(&self) -> Option<ObjectId> {
        self.runtime
    }

    /// Run a Java method. For a constructor, the new object is returned. `Err` carries the thrown
    /// exception.
    pub fn invoke(
        &mut self,
        class: &str,
        name: &str,
        receiver: Option<ObjectId>,
        args: &[HeapValue],
    ) -> Result<HeapValue, ObjectId> {
        let simple_class = class.rsplit('/').next().unwrap_or(class);
        self.calls.push(format!("{}.{}", simple_class, name));
        let object = |i: usize| args.get(i).and_then(|a| a.as_object()).flatten();
        let long = |i: usize| args.get(i).and_then(|a| a.as_long()).unwrap_or(0);
        let int = |i: usize| args.get(i).and_then(|a| a.as_int()).unwrap_or(0);
        let boolean = |i: usize| args.get(i).and_then(|a| a.as_bool()).unwrap_or(false);

        let result = match (simple_class, name) {
            ("Throwable", "getMessage") => {
                let receiver = self.non_null(receiver)?;
                match self.throwable_message(receiver) {
                    Some(message) => Value::Object(Some(self.new_string(&message))),
                    None => Value::Object(None),
                }
            }
            ("Class", "getName") => {
                let receiver = self.non_null(receiver)?;
                let name = match &self.object(receiver).payload {
                    Payload::Class { name, .. } => name.replace('/', "."),
                    _ => return Err(self.new_throwable("java/lang/ClassCastException", None)),
                };
                Value::Object(Some(self.new_string(&name)))
            }
            ("TranslatedException", "encodeThrowable") => {
                let throwable = self.non_null(object(0))?;
                let mut encoded = self.class_of(throwable).to_string();
                if let Some(message) = self.throwable_message(throwable) {
                    encoded.push('|');
                    encoded.push_str(&message);
                }
                Value::Object(Some(self.new_string(&encoded)))
            }
            ("TranslatedException", "decodeThrowable") => {
                let encoded = self.non_null(object(0))?;
                let encoded = self.string_value(encoded).unwrap_or_default();
                let throwable = match encoded.split_once('|') {
                    Some((class, message)) => self.new_throwable(class, Some(message)),
                    None => self.new_throwable(&encoded, None),
                };
                Value::Object(Some(throwable))
            }
            ("HotSpotJVMCIRuntime", "runtime") => {
                let runtime = match self.runtime {
                    Some(runtime) => runtime,
                    None => {
                        let runtime = self.alloc(RUNTIME_CLASS, Payload::Plain);
                        let adjustment = Value::Primitive(PrimitiveValue::Int(self.comp_level_adjustment));
                        self.set_field(runtime, RUNTIME_CLASS, "compilationLevelAdjustment", adjustment);
                        self.runtime = Some(runtime);
                        runtime
                    }
                };
                Value::Object(Some(runtime))
            }
            ("HotSpotJVMCIRuntime", "compileMethod") => {
                const RESULT_CLASS: &str = "jdk/vm/ci/hotspot/HotSpotCompilationRequestResult";
                let outcome = self.compile_outcome.clone();
                let result = self.alloc(RESULT_CLASS, Payload::Plain);
                let message = outcome.failure_message.map(|m| self.new_string(&m));
                self.set_field(result, RESULT_CLASS, "failureMessage", Value::Object(message));
                self.set_field(result, RESULT_CLASS, "retry", Value::Primitive(PrimitiveValue::Boolean(outcome.retry)));
                let inlined = Value::Primitive(PrimitiveValue::Int(outcome.inlined_bytecodes));
                self.set_field(result, RESULT_CLASS, "inlinedBytecodes", inlined);
                Value::Object(Some(result))
            }
            ("HotSpotJVMCIRuntime", "adjustCompilationLevel") => {
                Value::Primitive(PrimitiveValue::Int(self.adjusted_level.unwrap_or_else(|| int(4))))
            }
            ("HotSpotJVMCIRuntime", "getCompiler") => {
                if let Some(message) = self.get_compiler_failure.clone() {
                    return Err(self.new_throwable("java/lang/InternalError", Some(&message)));
                }
                Value::Object(None)
            }
            ("HotSpotJVMCIRuntime", "bootstrapFinished") | ("HotSpotJVMCIRuntime", "shutdown") => Value::Void,
            ("HotSpotJVMCIRuntime", "callToString") => {
                let object = self.non_null(object(0))?;
                let s = match self.string_value(object) {
                    Some(s) => s,
                    None => format!("{}@{:x}", self.class_of(object).replace('/', "."), object),
                };
                Value::Object(Some(self.new_string(&s)))
            }
            ("HotSpotResolvedJavaMethodImpl", "fromMetaspace") | ("HotSpotConstantPool", "fromMetaspace") => {
                let mirror = self.alloc(class, Payload::Plain);
                self.set_field(mirror, class, "metadataHandle", Value::Primitive(PrimitiveValue::Long(long(0))));
                Value::Object(Some(mirror))
            }
            ("HotSpotResolvedObjectTypeImpl", "fromMetaspace") => {
                let pointer = long(0);
                let mirror = match self.type_mirrors.get(&pointer) {
                    Some(mirror) => *mirror,
                    None => {
                        let mirror = self.alloc(class, Payload::Plain);
                        self.set_field(mirror, class, "metadataPointer", Value::Primitive(PrimitiveValue::Long(pointer)));
                        self.type_mirrors.insert(pointer, mirror);
                        mirror
                    }
                };
                Value::Object(Some(mirror))
            }
            ("HotSpotResolvedPrimitiveType", "forTypeChar") => {
                let type_char = int(0) as u16;
                let mirror = match self.primitive_mirrors.get(&type_char) {
                    Some(mirror) => *mirror,
                    None => {
                        const KIND_CLASS: &str = "jdk/vm/ci/meta/JavaKind";
                        let kind = self.alloc(KIND_CLASS, Payload::Plain);
                        self.set_field(kind, KIND_CLASS, "typeChar", Value::Primitive(PrimitiveValue::Char(type_char)));
                        let mirror = self.alloc(class, Payload::Plain);
                        self.set_field(mirror, class, "kind", Value::Object(Some(kind)));
                        self.primitive_mirrors.insert(type_char, mirror);
                        mirror
                    }
                };
                Value::Object(Some(mirror))
            }
            ("HotSpotNmethod", "<init>") => {
                let nmethod = self.alloc(class, Payload::Plain);
                self.set_field(nmethod, class, "method", Value::Object(object(0)));
                self.set_field(nmethod, "jdk/vm/ci/code/InstalledCode", "name", Value::Object(object(1)));
                self.set_field(nmethod, class, "isDefault", Value::Primitive(PrimitiveValue::Boolean(boolean(2))));
                self.set_field(nmethod, class, "compileIdSnapshot", Value::Primitive(PrimitiveValue::Long(long(3))));
                Value::Object(Some(nmethod))
            }
            ("DirectHotSpotObjectConstantImpl", "<init>") => {
                let constant = self.alloc(class, Payload::Plain);
                self.set_field(constant, class, "object", Value::Object(object(0)));
                self.set_compressed(constant, boolean(1));
                Value::Object(Some(constant))
            }
            ("IndirectHotSpotObjectConstantImpl", "<init>") => {
                let constant = self.alloc(class, Payload::Plain);
                self.set_field(constant, class, "objectHandle", Value::Primitive(PrimitiveValue::Long(long(0))));
                self.set_compressed(constant, boolean(1));
                Value::Object(Some(constant))
            }
            ("VMField", "<init>") => {
                let field = self.alloc(class, Payload::Plain);
                self.set_field(field, class, "name", Value::Object(object(0)));
                self.set_field(field, class, "type", Value::Object(object(1)));
                self.set_field(field, class, "offset", Value::Primitive(PrimitiveValue::Long(long(2))));
                self.set_field(field, class, "address", Value::Primitive(PrimitiveValue::Long(long(3))));
                self.set_field(field, class, "value", Value::Object(object(4)));
                Value::Object(Some(field))
            }
            ("VMFlag", "<init>") => {
                let flag = self.alloc(class, Payload::Plain);
                self.set_field(flag, class, "name", Value::Object(object(0)));
                self.set_field(flag, class, "type", Value::Object(object(1)));
                self.set_field(flag, class, "value", Value::Object(object(2)));
                Value::Object(Some(flag))
            }
            ("VMIntrinsicMethod", "<init>") => {
                let intrinsic = self.alloc(class, Payload::Plain);
                self.set_field(intrinsic, class, "declaringClass", Value::Object(object(0)));
                self.set_field(intrinsic, class, "name", Value::Object(object(1)));
                self.set_field(intrinsic, class, "descriptor", Value::Object(object(2)));
                self.set_field(intrinsic, class, "id", Value::Primitive(PrimitiveValue::Int(int(3))));
                Value::Object(Some(intrinsic))
            }
            (_, "<init>") => Value::Object(Some(self.alloc(class, Payload::Plain))),
            (_, "valueOf") => match args.first().and_then(|a| a.as_primitive()) {
                Some(value) => Value::Object(Some(self.new_box(value))),
                None => return Err(self.new_throwable("java/lang/NullPointerException", None)),
            },
            _ => {
                let message = format!("{}.{}", class, name);
                return Err(self.new_throwable("java/lang/UnsupportedOperationException", Some(&message)));
            }
        };
        Ok(result)
    }

    fn set_compressed(&mut self, constant: ObjectId, compressed: bool) {
        self.set_field(
            constant,
            "jdk/vm/ci/hotspot/HotSpotObjectConstantImpl",
            "compressed",
            Value::Primitive(PrimitiveValue::Boolean(compressed)),
        );
    }

    fn non_null(&mut self, object: Option<ObjectId>) -> Result<ObjectId, ObjectId> {
        object.ok_or_else(|| self.new_throwable("java/lang/NullPointerException", None))
    }
}

/// The value of a field that was never written.
pub fn zero_value(signature: &str) -> HeapValue {
    BasicType::from_descriptor(signature)
        .and_then(|ty| PrimitiveValue::from_raw_bits(ty, 0))
        .map_or(Value::Object(None), Value::Primitive)
}
