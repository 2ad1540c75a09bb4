//! Values and references that cross the boundary between the runtime and the host VM.

use std::fmt;
use std::ops::Range;

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::util::{Address, ObjectReference};

/// The result of a host VM call that may raise. On `Err`, the exception is pending on the thread
/// that made the call, which is how the host VM reports failure.
pub type VMResult<T> = Result<T, ExceptionPending>;

/// Marker for "the call failed and left an exception pending on the current thread".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExceptionPending;

/// Java basic types, with the descriptor characters used in signatures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum BasicType {
    #[strum(serialize = "Z")]
    Boolean,
    #[strum(serialize = "B")]
    Byte,
    #[strum(serialize = "C")]
    Char,
    #[strum(serialize = "S")]
    Short,
    #[strum(serialize = "I")]
    Int,
    #[strum(serialize = "J")]
    Long,
    #[strum(serialize = "F")]
    Float,
    #[strum(serialize = "D")]
    Double,
    #[strum(serialize = "V")]
    Void,
    #[strum(serialize = "L")]
    Object,
    #[strum(serialize = "[")]
    Array,
}

impl BasicType {
    /// The type denoted by the first character of a field or return descriptor.
    pub fn from_descriptor(signature: &str) -> Option<BasicType> {
        signature.get(..1).and_then(|c| c.parse().ok())
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, BasicType::Object | BasicType::Array | BasicType::Void)
    }

    pub fn is_reference(self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    /// Size of one element of this type in a Java array.
    pub fn element_size(self) -> usize {
        match self {
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Int | BasicType::Float => 4,
            BasicType::Long | BasicType::Double => 8,
            BasicType::Object | BasicType::Array => std::mem::size_of::<usize>(),
            BasicType::Void => 0,
        }
    }

    /// Does a value of this type take two slots in a frame?
    pub fn is_double_word(self) -> bool {
        matches!(self, BasicType::Long | BasicType::Double)
    }

    /// The name of the box class, in internal form.
    pub fn box_class_name(self) -> Option<&'static str> {
        Some(match self {
            BasicType::Boolean => "java/lang/Boolean",
            BasicType::Byte => "java/lang/Byte",
            BasicType::Char => "java/lang/Character",
            BasicType::Short => "java/lang/Short",
            BasicType::Int => "java/lang/Integer",
            BasicType::Long => "java/lang/Long",
            BasicType::Float => "java/lang/Float",
            BasicType::Double => "java/lang/Double",
            _ => return None,
        })
    }

    /// The Java source name of the type, e.g. `int`.
    pub fn java_name(self) -> &'static str {
        match self {
            BasicType::Boolean => "boolean",
            BasicType::Byte => "byte",
            BasicType::Char => "char",
            BasicType::Short => "short",
            BasicType::Int => "int",
            BasicType::Long => "long",
            BasicType::Float => "float",
            BasicType::Double => "double",
            BasicType::Void => "void",
            BasicType::Object => "object",
            BasicType::Array => "array",
        }
    }
}

/// A Java primitive value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl PrimitiveValue {
    pub fn basic_type(&self) -> BasicType {
        match self {
            PrimitiveValue::Boolean(_) => BasicType::Boolean,
            PrimitiveValue::Byte(_) => BasicType::Byte,
            PrimitiveValue::Char(_) => BasicType::Char,
            PrimitiveValue::Short(_) => BasicType::Short,
            PrimitiveValue::Int(_) => BasicType::Int,
            PrimitiveValue::Long(_) => BasicType::Long,
            PrimitiveValue::Float(_) => BasicType::Float,
            PrimitiveValue::Double(_) => BasicType::Double,
        }
    }

    /// The raw bits of the value, widened to 64 bits the way a `long` slot holds it.
    pub fn to_raw_bits(&self) -> i64 {
        match *self {
            PrimitiveValue::Boolean(v) => v as i64,
            PrimitiveValue::Byte(v) => v as i64,
            PrimitiveValue::Char(v) => v as i64,
            PrimitiveValue::Short(v) => v as i64,
            PrimitiveValue::Int(v) => v as i64,
            PrimitiveValue::Long(v) => v,
            PrimitiveValue::Float(v) => v.to_bits() as i64,
            PrimitiveValue::Double(v) => v.to_bits() as i64,
        }
    }

    /// Rebuild a value of the given type from raw bits. Returns `None` for non-primitive types.
    pub fn from_raw_bits(basic_type: BasicType, bits: i64) -> Option<PrimitiveValue> {
        Some(match basic_type {
            BasicType::Boolean => PrimitiveValue::Boolean(bits & 1 != 0),
            BasicType::Byte => PrimitiveValue::Byte(bits as i8),
            BasicType::Char => PrimitiveValue::Char(bits as u16),
            BasicType::Short => PrimitiveValue::Short(bits as i16),
            BasicType::Int => PrimitiveValue::Int(bits as i32),
            BasicType::Long => PrimitiveValue::Long(bits),
            BasicType::Float => PrimitiveValue::Float(f32::from_bits(bits as u32)),
            BasicType::Double => PrimitiveValue::Double(f64::from_bits(bits as u64)),
            _ => return None,
        })
    }

    /// Little-endian bytes of the value, as stored in a primitive array element.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            PrimitiveValue::Boolean(v) => vec![v as u8],
            PrimitiveValue::Byte(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Char(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Short(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Int(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Long(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Float(v) => v.to_le_bytes().to_vec(),
            PrimitiveValue::Double(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Read a value of the given type from little-endian bytes.
    pub fn from_le_bytes(basic_type: BasicType, bytes: &[u8]) -> Option<PrimitiveValue> {
        let size = basic_type.element_size();
        if !basic_type.is_primitive() || bytes.len() < size {
            return None;
        }
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&bytes[..size]);
        let bits = i64::from_le_bytes(raw);
        // Sign extension is done by the narrowing casts in from_raw_bits
        PrimitiveValue::from_raw_bits(basic_type, bits)
    }
}

/// A value read from or passed to the Java world. `R` is the reference representation of the
/// side the value lives on.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value<R> {
    Primitive(PrimitiveValue),
    Object(R),
    Void,
}

impl<R: Copy> Value<R> {
    pub fn as_primitive(&self) -> Option<PrimitiveValue> {
        match self {
            Value::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<R> {
        match self {
            Value::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Primitive(PrimitiveValue::Boolean(v)) => Some(*v),
            _ => None,
        }
    }

    /// The value as an `int`. Narrower integral types are widened.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Primitive(PrimitiveValue::Int(v)) => Some(*v),
            Value::Primitive(PrimitiveValue::Short(v)) => Some(*v as i32),
            Value::Primitive(PrimitiveValue::Char(v)) => Some(*v as i32),
            Value::Primitive(PrimitiveValue::Byte(v)) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Primitive(PrimitiveValue::Long(v)) => Some(*v),
            _ => self.as_int().map(|v| v as i64),
        }
    }

    /// Convert the reference representation, keeping primitives as they are.
    pub fn map_object<S, F: FnOnce(R) -> S>(self, f: F) -> Value<S> {
        match self {
            Value::Primitive(p) => Value::Primitive(p),
            Value::Object(o) => Value::Object(f(o)),
            Value::Void => Value::Void,
        }
    }
}

/// A value in the host heap. A null reference is `Object(None)`.
pub type HostValue = Value<Option<ObjectReference>>;

macro_rules! metadata_ref {
    ($(#[$attr:meta])* $name:ident, $kind:expr) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Address);

        impl $name {
            pub fn address(self) -> Address {
                self.0
            }

            /// The metadata pointer as stored in a `long` field on the compiler side.
            pub fn as_jlong(self) -> i64 {
                self.0.as_jlong()
            }

            /// # Safety
            /// The value must be a metadata pointer of the right kind handed out by the VM.
            pub unsafe fn from_jlong(raw: i64) -> Option<Self> {
                if raw == 0 {
                    None
                } else {
                    Some($name(Address::from_jlong(raw)))
                }
            }
        }

        impl From<$name> for MetadataRef {
            fn from(r: $name) -> MetadataRef {
                MetadataRef {
                    address: r.0,
                    kind: $kind,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

metadata_ref!(
    /// A pointer to class metadata.
    KlassRef,
    MetadataKind::Klass
);
metadata_ref!(
    /// A pointer to method metadata.
    MethodRef,
    MetadataKind::Method
);
metadata_ref!(
    /// A pointer to a constant pool.
    ConstantPoolRef,
    MetadataKind::ConstantPool
);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Klass,
    Method,
    ConstantPool,
}

/// Any metadata pointer, with its kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetadataRef {
    pub address: Address,
    pub kind: MetadataKind,
}

impl MetadataRef {
    pub fn as_klass(self) -> Option<KlassRef> {
        (self.kind == MetadataKind::Klass).then_some(KlassRef(self.address))
    }

    pub fn as_method(self) -> Option<MethodRef> {
        (self.kind == MetadataKind::Method).then_some(MethodRef(self.address))
    }

    pub fn as_constant_pool(self) -> Option<ConstantPoolRef> {
        (self.kind == MetadataKind::ConstantPool).then_some(ConstantPoolRef(self.address))
    }
}

/// A code blob that belongs to a method (an nmethod).
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NMethodRef(pub Address);

/// A code blob that is not tied to a method, such as a runtime stub.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CodeBlobRef(pub Address);

/// A snapshot of an nmethod's state in the code cache.
#[derive(Clone, Debug, PartialEq)]
pub struct NMethodState {
    pub address: Address,
    /// Size of the whole blob.
    pub size: usize,
    pub code_begin: Address,
    pub code_size: usize,
    /// `None` once the nmethod is not entrant.
    pub verified_entry_point: Option<Address>,
    pub is_alive: bool,
    pub is_in_use: bool,
    pub method: Option<MethodRef>,
    /// `-1` for a standard entry, the bytecode index for an on-stack-replacement entry.
    pub entry_bci: i32,
    pub compile_id: i32,
}

impl NMethodState {
    pub fn is_not_entrant(&self) -> bool {
        self.is_alive && !self.is_in_use
    }

    pub fn is_osr(&self) -> bool {
        self.entry_bci != INVOCATION_ENTRY_BCI
    }
}

/// The entry bci of a normal (non-OSR) compilation.
pub const INVOCATION_ENTRY_BCI: i32 = -1;

/// The JVMTI capabilities that change what compiled code must look like.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct JvmtiCapabilities {
    pub can_hotswap_or_post_breakpoint: bool,
    pub can_access_local_variables: bool,
    pub can_post_on_exceptions: bool,
    pub can_pop_frame: bool,
}

/// Compilation tiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum CompLevel {
    None = 0,
    Simple = 1,
    LimitedProfile = 2,
    FullProfile = 3,
    FullOptimization = 4,
}

impl CompLevel {
    pub fn from_i32(level: i32) -> Option<CompLevel> {
        Some(match level {
            0 => CompLevel::None,
            1 => CompLevel::Simple,
            2 => CompLevel::LimitedProfile,
            3 => CompLevel::FullProfile,
            4 => CompLevel::FullOptimization,
            _ => return None,
        })
    }
}

/// Deoptimization reasons used by the runtime itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum DeoptReason {
    Constraint,
    NotCompiledExceptionHandler,
    TransferToInterpreter,
}

/// The resolution stubs that unlinked Java calls go through.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallStub {
    ResolveVirtual,
    ResolveStatic,
    ResolveOptVirtual,
}

/// Everything the VM needs to register a new code blob.
#[derive(Debug)]
pub struct CodeBlobDescription<'a> {
    pub name: &'a str,
    /// `None` for a detached blob such as a runtime stub.
    pub method: Option<MethodRef>,
    pub entry_bci: i32,
    pub compile_id: i32,
    pub comp_level: i32,
    /// The instructions, stubs and constants, already relocated.
    pub code: &'a crate::code::CodeBuffer,
    pub offsets: &'a crate::code::CodeOffsets,
    pub frame_size: usize,
    pub oop_maps: &'a crate::code::OopMapSet,
    pub exception_handlers: &'a crate::code::ExceptionHandlerTable,
    pub implicit_exceptions: &'a crate::code::ImplicitExceptionTable,
    pub debug_info: &'a crate::code::DebugInformationRecorder,
    pub dependencies: &'a crate::code::Dependencies,
    pub has_unsafe_access: bool,
    pub has_wide_vectors: bool,
}

/// A field of a Java class, named the way the VM resolves it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Class name in internal form, e.g. `jdk/vm/ci/code/InstalledCode`.
    pub class: &'static str,
    pub name: &'static str,
    pub signature: &'static str,
    pub is_static: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Static,
    Virtual,
    Constructor,
}

/// A method of a Java class, named the way the VM resolves it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub class: &'static str,
    pub name: &'static str,
    pub signature: &'static str,
    pub kind: MethodKind,
}

impl MethodDescriptor {
    /// The return type, from the part of the signature after `)`.
    pub fn return_type(&self) -> BasicType {
        self.signature
            .rsplit_once(')')
            .and_then(|(_, ret)| BasicType::from_descriptor(ret))
            .unwrap_or(BasicType::Void)
    }
}

/// A field of a VM structure, exported to the compiler by `readConfiguration`.
#[derive(Clone, Debug, PartialEq)]
pub struct VMStructEntry {
    pub type_name: String,
    pub field_name: String,
    /// The C type of the field, e.g. `int` or `Klass*`.
    pub type_string: String,
    pub is_static: bool,
    /// Offset of an instance field.
    pub offset: usize,
    /// Address of a static field.
    pub address: Address,
}

/// A VM flag value.
#[derive(Clone, Debug, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Intx(i64),
    Uintx(u64),
    Uint64(u64),
    Double(f64),
    Ccstr(Option<String>),
    /// A type the compiler side cannot read. Keeps the type name for error messages.
    Other(String),
}

impl FlagValue {
    /// The type name as the VM prints it.
    pub fn type_name(&self) -> &str {
        match self {
            FlagValue::Bool(_) => "bool",
            FlagValue::Intx(_) => "intx",
            FlagValue::Uintx(_) => "uintx",
            FlagValue::Uint64(_) => "uint64_t",
            FlagValue::Double(_) => "double",
            FlagValue::Ccstr(_) => "ccstr",
            FlagValue::Other(name) => name,
        }
    }
}

/// What a VM-internal bytecode in a method's code was rewritten from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RewrittenBytecode {
    /// The standard bytecode.
    pub java_code: u8,
    /// The operand is an index into the resolved references of the constant pool (a rewritten
    /// `ldc`), to be mapped back with [`crate::vm::VMBinding::cp_object_to_cp_index`].
    pub resolved_reference_operand: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VMFlag {
    pub name: String,
    pub value: FlagValue,
    pub address: Address,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VMIntrinsic {
    pub holder: String,
    pub name: String,
    pub signature: String,
    pub id: i32,
}

/// One entry of a method's exception table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_bci: i32,
    pub length: i32,
    pub name_cp_index: i32,
    pub signature_cp_index: i32,
    pub slot: i32,
}

/// A resolved field, as the constant pool lookup returns it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResolvedField {
    pub holder: KlassRef,
    pub offset: i32,
    pub flags: i32,
    pub field_index: i32,
}

/// A Java frame visited by stack walking.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameInfo {
    /// Identifies the frame while the stack is not modified.
    pub frame_id: usize,
    pub method: MethodRef,
    pub bci: i32,
    pub is_compiled: bool,
    pub locals: Vec<HostValue>,
    /// Indices into `locals` that hold objects the compiler scalar-replaced.
    pub virtual_locals: Vec<usize>,
}

/// The half-open range of the code cache.
pub type CodeCacheBounds = Range<Address>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_type_from_descriptor() {
        assert_eq!(BasicType::from_descriptor("I"), Some(BasicType::Int));
        assert_eq!(BasicType::from_descriptor("[I"), Some(BasicType::Array));
        assert_eq!(BasicType::from_descriptor("Ljava/lang/String;"), Some(BasicType::Object));
        assert_eq!(BasicType::from_descriptor(""), None);
    }

    #[test]
    fn primitive_bytes() {
        let v = PrimitiveValue::Short(-2);
        assert_eq!(PrimitiveValue::from_le_bytes(BasicType::Short, &v.to_le_bytes()), Some(v));
        let d = PrimitiveValue::Double(1.5);
        assert_eq!(PrimitiveValue::from_raw_bits(BasicType::Double, d.to_raw_bits()), Some(d));
        assert_eq!(PrimitiveValue::from_le_bytes(BasicType::Int, &[1, 2]), None);
    }

    #[test]
    fn method_return_type() {
        let m = MethodDescriptor {
            class: "A",
            name: "m",
            signature: "(JI)Ljava/lang/Object;",
            kind: MethodKind::Static,
        };
        assert_eq!(m.return_type(), BasicType::Object);
    }

    #[test]
    fn metadata_kinds() {
        let k = KlassRef(unsafe { Address::from_usize(0x1000) });
        let md: MetadataRef = k.into();
        assert_eq!(md.as_klass(), Some(k));
        assert_eq!(md.as_method(), None);
    }
}
