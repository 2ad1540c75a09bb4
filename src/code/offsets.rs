use enum_map::{Enum, EnumMap};
use strum_macros::EnumIter;

/// The landmarks the compiler marks in its code. The ids are shared with the compiler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter)]
#[repr(i32)]
pub enum MarkId {
    VerifiedEntry = 1,
    UnverifiedEntry = 2,
    OsrEntry = 3,
    ExceptionHandlerEntry = 4,
    DeoptHandlerEntry = 5,
    InvokeInterface = 6,
    InvokeVirtual = 7,
    InvokeStatic = 8,
    InvokeSpecial = 9,
    InlineInvoke = 10,
    PollNear = 11,
    PollReturnNear = 12,
    PollFar = 13,
    PollReturnFar = 14,
    CardTableAddress = 15,
    CardTableShift = 16,
    /// Marks a call that must never be reached.
    InvokeInvalid = -1,
}

impl MarkId {
    pub fn from_i32(id: i32) -> Option<MarkId> {
        Some(match id {
            1 => MarkId::VerifiedEntry,
            2 => MarkId::UnverifiedEntry,
            3 => MarkId::OsrEntry,
            4 => MarkId::ExceptionHandlerEntry,
            5 => MarkId::DeoptHandlerEntry,
            6 => MarkId::InvokeInterface,
            7 => MarkId::InvokeVirtual,
            8 => MarkId::InvokeStatic,
            9 => MarkId::InvokeSpecial,
            10 => MarkId::InlineInvoke,
            11 => MarkId::PollNear,
            12 => MarkId::PollReturnNear,
            13 => MarkId::PollFar,
            14 => MarkId::PollReturnFar,
            15 => MarkId::CardTableAddress,
            16 => MarkId::CardTableShift,
            -1 => MarkId::InvokeInvalid,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Does the mark announce the kind of the next call?
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            MarkId::InvokeInterface
                | MarkId::InvokeVirtual
                | MarkId::InvokeStatic
                | MarkId::InvokeSpecial
                | MarkId::InlineInvoke
                | MarkId::InvokeInvalid
        )
    }

    /// Does a call of this kind need a stub that jumps to the interpreter?
    pub fn needs_static_call_stub(self) -> bool {
        matches!(
            self,
            MarkId::InvokeInterface | MarkId::InvokeVirtual | MarkId::InvokeStatic | MarkId::InvokeSpecial
        )
    }
}

/// The entry points and handler offsets of a code blob.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter)]
pub enum CodeOffset {
    VerifiedEntry,
    UnverifiedEntry,
    OsrEntry,
    Exceptions,
    Deopt,
    DeoptMH,
    FrameComplete,
}

/// Offsets of the landmarks of a code blob, relative to the start of its instructions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeOffsets {
    offsets: EnumMap<CodeOffset, Option<u32>>,
}

impl CodeOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, which: CodeOffset, offset: u32) {
        self.offsets[which] = Some(offset);
    }

    pub fn get(&self, which: CodeOffset) -> Option<u32> {
        self.offsets[which]
    }

    /// The offset, or 0 for a landmark the code does not have.
    pub fn value(&self, which: CodeOffset) -> u32 {
        self.offsets[which].unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CodeOffset, u32)> + '_ {
        self.offsets.iter().filter_map(|(k, v)| v.map(|v| (k, v)))
    }
}
