/// Maps the pc offset of an instruction that may throw to the offset of its handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionHandlerTable {
    entries: Vec<(u32, u32)>,
}

impl ExceptionHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, pc_offset: u32, handler_offset: u32) {
        self.entries.push((pc_offset, handler_offset));
    }

    pub fn handler_for(&self, pc_offset: u32) -> Option<u32> {
        self.entries.iter().find(|(pc, _)| *pc == pc_offset).map(|(_, h)| *h)
    }

    /// `(pc offset, handler offset)` pairs in the order they were added.
    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps the pc offset of an instruction that raises an exception by faulting (a null check that
/// is a memory access) to where execution continues. The code deoptimizes at the continuation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImplicitExceptionTable {
    entries: Vec<(u32, u32)>,
}

impl ImplicitExceptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, exec_offset: u32, cont_offset: u32) {
        self.entries.push((exec_offset, cont_offset));
    }

    pub fn continuation_for(&self, exec_offset: u32) -> Option<u32> {
        self.entries.iter().find(|(pc, _)| *pc == exec_offset).map(|(_, c)| *c)
    }

    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
