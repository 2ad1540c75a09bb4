//! The description of compiled code that the compiler hands to the VM for installation.

use crate::util::{Address, ObjectReference};
use crate::vm::{KlassRef, MetadataRef, MethodRef, PrimitiveValue};

/// A piece of compiled code: its instructions, its data and everything the VM must know to run it.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledCode {
    pub name: String,
    pub kind: CompiledCodeKind,
    pub target_code: Vec<u8>,
    pub data_section: Vec<u8>,
    /// Alignment of the data section. A power of two.
    pub data_section_alignment: u32,
    /// Patches of the data section. `pc_offset` is an offset in the data section.
    pub data_section_patches: Vec<DataPatch>,
    /// Sites in ascending pc order.
    pub sites: Vec<Site>,
    pub assumptions: Vec<Assumption>,
    /// The methods whose bytecodes were compiled. The first is the root method.
    pub methods: Vec<MethodRef>,
    pub comments: Vec<Comment>,
    pub total_frame_size: u32,
    /// The stack slot the deoptimization handler saves the original pc in.
    pub deopt_rescue_slot: Option<StackSlot>,
    /// Does the code use vector registers wider than 16 bytes?
    pub has_wide_vectors: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CompiledCodeKind {
    /// Code that belongs to a method.
    Nmethod {
        method: MethodRef,
        entry_bci: i32,
        compile_id: i32,
        has_unsafe_access: bool,
    },
    /// A stub that is not tied to a method.
    RuntimeStub,
}

impl CompiledCode {
    pub fn is_nmethod(&self) -> bool {
        matches!(self.kind, CompiledCodeKind::Nmethod { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comment {
    pub pc_offset: u32,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub pc_offset: u32,
    pub kind: SiteKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SiteKind {
    /// A landmark, identified by a mark id.
    Mark { id: i32 },
    /// A point with debug information. Safepoint, call and implicit exception infopoints also get
    /// an oop map.
    Infopoint { reason: InfopointReason, debug_info: DebugInfo },
    /// A call instruction.
    Call {
        target: CallTarget,
        /// Is the call bound directly instead of through an inline cache?
        direct: bool,
        debug_info: Option<DebugInfo>,
    },
    /// A constant embedded in the instruction at the site.
    DataPatch { reference: Reference },
    /// An exception raised at the site is handled at `handler_pos`.
    ExceptionHandler { handler_pos: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InfopointReason {
    Safepoint,
    Call,
    ImplicitException,
    MethodStart,
    MethodEnd,
    BytecodePosition,
}

impl InfopointReason {
    pub fn is_safepoint(self) -> bool {
        matches!(
            self,
            InfopointReason::Safepoint | InfopointReason::Call | InfopointReason::ImplicitException
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// A call into the VM or a runtime stub at a fixed address.
    Foreign(Address),
    /// A call to a Java method.
    Method(MethodRef),
}

/// What a data patch refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    Object { object: ObjectReference, compressed: bool },
    Metaspace { metadata: MetadataRef, compressed: bool },
    /// An offset in the data section.
    DataSection { offset: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataPatch {
    pub pc_offset: u32,
    pub reference: Reference,
}

/// An assumption the compiler made about the class hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Assumption {
    NoFinalizableSubclass { receiver_type: KlassRef },
    ConcreteSubtype { context: KlassRef, subtype: KlassRef },
    LeafType { context: KlassRef },
    ConcreteMethod { context: KlassRef, impl_method: MethodRef },
    CallSiteTargetValue { call_site: ObjectReference, method_handle: ObjectReference },
}

/// A stack slot, as an offset from the stack pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackSlot {
    pub offset: i32,
    /// Is the offset relative to the caller's frame, so the frame size must be added?
    pub add_frame_size: bool,
}

impl StackSlot {
    /// The offset from the stack pointer of the compiled frame.
    pub fn raw_offset(&self, total_frame_size: u32) -> i32 {
        if self.add_frame_size {
            self.offset + total_frame_size as i32
        } else {
            self.offset
        }
    }
}

/// Where a value lives at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// A register, by its number in the target's register list.
    Register(u16),
    Stack(StackSlot),
}

/// The kind of a slot in a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Illegal,
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl SlotKind {
    /// Does a value of this kind occupy two slots?
    pub fn is_double_word(self) -> bool {
        matches!(self, SlotKind::Long | SlotKind::Double)
    }
}

/// A value in a frame or a virtual object.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum JavaValue {
    /// The second half of a two-slot value, or a dead slot.
    Illegal,
    Location(Location),
    Primitive(PrimitiveValue),
    Null,
    Object { object: ObjectReference, compressed: bool },
    /// A scalar-replaced object, by id.
    Virtual(u32),
}

/// The position in the bytecodes, and the values live there, of one (possibly inlined) frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BytecodeFrame {
    pub method: MethodRef,
    pub bci: i32,
    /// The frame this one was inlined into.
    pub caller: Option<Box<BytecodeFrame>>,
    /// Locals, then expression stack, then the owners of the locks.
    pub values: Vec<JavaValue>,
    /// The kinds of the locals and the expression stack.
    pub slot_kinds: Vec<SlotKind>,
    pub num_locals: u32,
    pub num_stack: u32,
    pub num_locks: u32,
    /// Where the locks are kept, one entry per lock.
    pub locks: Vec<StackLock>,
    pub rethrow_exception: bool,
    pub during_call: bool,
}

/// The stack slot of a lock held by a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackLock {
    pub slot: StackSlot,
    /// Was the lock removed along with its scalar-replaced owner?
    pub eliminated: bool,
}

/// The locations that hold references at a safepoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceMap {
    pub objects: Vec<Location>,
    /// For each entry in `objects`, the base of a derived pointer, if it is one.
    pub derived_base: Vec<Option<Location>>,
    /// For each entry in `objects`, the size of the location: 8 for a reference, 4 for a
    /// compressed reference and 16 for two compressed references.
    pub size_in_bytes: Vec<u8>,
}

/// An object the compiler did not allocate.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualObject {
    pub id: u32,
    pub klass: KlassRef,
    pub values: Vec<JavaValue>,
    pub slot_kinds: Vec<SlotKind>,
    /// Is this a box that may be replaced by a cached box on reallocation?
    pub is_auto_box: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugInfo {
    pub frame: Option<BytecodeFrame>,
    pub reference_map: Option<ReferenceMap>,
    pub virtual_objects: Vec<VirtualObject>,
}
