//! The buffer code is assembled into before it is copied into the code cache.
//!
//! A buffer has three sections, laid out in this order: constants (the data section of the
//! compiled code), instructions, and stubs emitted during installation. Patches whose value
//! depends on where the code ends up (pc-relative displacements, addresses inside the blob) are
//! kept as relocations and applied by [`CodeBuffer::relocated_code`] once the VM has picked an
//! address.

use enum_map::{Enum, EnumMap};

use crate::util::address::raw_align_up;
use crate::util::{Address, ObjectReference};
use crate::vm::MetadataRef;

/// Alignment of the start of the instructions.
pub const INSTS_ALIGNMENT: usize = 32;
/// Alignment of the start of the stubs.
pub const STUBS_ALIGNMENT: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum Section {
    Consts,
    Insts,
    Stubs,
}

/// What a relocation refers to. The VM and the collector use this to find embedded pointers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocKind {
    /// An object, by index into the buffer's oops.
    Oop { index: usize, narrow: bool },
    /// A metadata pointer, by index into the buffer's metadata.
    Metadata { index: usize, narrow: bool },
    /// A call into the VM or a runtime stub.
    RuntimeCall,
    /// An address outside the code cache.
    ExternalWord,
    /// A statically bound Java call.
    StaticCall,
    /// A Java call through a final or private method that is bound like a static call.
    OptVirtualCall,
    /// A Java call through an inline cache. `ic_offset` is the instruction loading the cache.
    VirtualCall { ic_offset: u32 },
    /// The stub of the static call at `call_offset` in the instructions.
    StaticStub { call_offset: u32 },
    /// A reference to another section of the same blob.
    SectionWord,
    /// A far jump through a trampoline.
    Trampoline,
    Poll,
    PollReturn,
}

/// Where a patch points.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PatchTarget {
    Absolute(Address),
    /// An offset in a section of this blob.
    Section(Section, u32),
}

/// How the target is written into the code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Patch {
    /// Nothing is written when the code is relocated.
    None,
    /// A 32 bit displacement at the relocation offset, relative to the end of the instruction,
    /// which is at offset `end` of the same section.
    Rel32 { end: u32, target: PatchTarget },
    /// A 64 bit address at the relocation offset.
    Abs64 { target: PatchTarget },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Relocation {
    pub section: Section,
    /// Offset in `section` of the instruction or data word.
    pub offset: u32,
    pub kind: RelocKind,
    pub patch: Patch,
}

#[derive(Debug, Default)]
pub struct CodeBuffer {
    sections: EnumMap<Section, Vec<u8>>,
    /// Alignment the constants need, honored by the VM when it places the blob.
    consts_alignment: usize,
    relocations: Vec<Relocation>,
    oops: Vec<ObjectReference>,
    metadata: Vec<MetadataRef>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, section: Section) -> &[u8] {
        &self.sections[section]
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<u8> {
        &mut self.sections[section]
    }

    pub fn insts(&self) -> &[u8] {
        &self.sections[Section::Insts]
    }

    pub fn consts_alignment(&self) -> usize {
        self.consts_alignment.max(1)
    }

    /// Set the constants and their alignment. The alignment must be a power of two.
    pub fn set_consts(&mut self, data: &[u8], alignment: usize) {
        self.sections[Section::Consts] = data.to_vec();
        self.consts_alignment = alignment;
    }

    pub fn set_insts(&mut self, code: &[u8]) {
        self.sections[Section::Insts] = code.to_vec();
    }

    /// Append bytes to the stubs and return the offset they were placed at.
    pub fn emit_stub(&mut self, bytes: &[u8]) -> u32 {
        let stubs = &mut self.sections[Section::Stubs];
        let offset = stubs.len() as u32;
        stubs.extend_from_slice(bytes);
        offset
    }

    pub fn stubs_size(&self) -> usize {
        self.sections[Section::Stubs].len()
    }

    /// Offset of each section from the start of the blob's code.
    pub fn section_start(&self, section: Section) -> usize {
        let consts_end = self.sections[Section::Consts].len();
        let insts_start = raw_align_up(consts_end, INSTS_ALIGNMENT);
        match section {
            Section::Consts => 0,
            Section::Insts => insts_start,
            Section::Stubs => raw_align_up(insts_start + self.sections[Section::Insts].len(), STUBS_ALIGNMENT),
        }
    }

    /// The size of the code once the sections are laid out.
    pub fn total_size(&self) -> usize {
        self.section_start(Section::Stubs) + self.sections[Section::Stubs].len()
    }

    pub fn relocate(&mut self, section: Section, offset: u32, kind: RelocKind, patch: Patch) {
        trace!("Relocation {:?}+{}: {:?} {:?}", section, offset, kind, patch);
        self.relocations.push(Relocation {
            section,
            offset,
            kind,
            patch,
        });
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Record an object embedded in the code and return its index.
    pub fn oop_index(&mut self, object: ObjectReference) -> usize {
        match self.oops.iter().position(|o| *o == object) {
            Some(index) => index,
            None => {
                self.oops.push(object);
                self.oops.len() - 1
            }
        }
    }

    /// Record a metadata pointer embedded in the code and return its index.
    pub fn metadata_index(&mut self, metadata: MetadataRef) -> usize {
        match self.metadata.iter().position(|m| *m == metadata) {
            Some(index) => index,
            None => {
                self.metadata.push(metadata);
                self.metadata.len() - 1
            }
        }
    }

    pub fn oops(&self) -> &[ObjectReference] {
        &self.oops
    }

    pub fn metadata(&self) -> &[MetadataRef] {
        &self.metadata
    }

    /// Write a 32 bit value into a section.
    pub fn write_u32(&mut self, section: Section, offset: usize, value: u32) -> Result<(), String> {
        write_bytes(&mut self.sections[section], offset, &value.to_ne_bytes())
    }

    /// Write a 64 bit value into a section.
    pub fn write_u64(&mut self, section: Section, offset: usize, value: u64) -> Result<(), String> {
        write_bytes(&mut self.sections[section], offset, &value.to_ne_bytes())
    }

    /// Lay the sections out as if the code started at `base` and apply every patch.
    pub fn relocated_code(&self, base: Address) -> Result<Vec<u8>, String> {
        let mut code = vec![0u8; self.total_size()];
        for (section, bytes) in self.sections.iter() {
            let start = self.section_start(section);
            code[start..start + bytes.len()].copy_from_slice(bytes);
        }
        for reloc in self.relocations.iter() {
            let at = self.section_start(reloc.section) + reloc.offset as usize;
            match reloc.patch {
                Patch::None => {}
                Patch::Rel32 { end, target } => {
                    let end = base.as_usize() as i64 + (self.section_start(reloc.section) + end as usize) as i64;
                    let target = self.resolve(base, target).as_usize() as i64;
                    let disp = i32::try_from(target - end)
                        .map_err(|_| format!("displacement {:#x} at {:?}+{} out of range", target - end, reloc.section, reloc.offset))?;
                    write_bytes(&mut code, at, &disp.to_ne_bytes())?;
                }
                Patch::Abs64 { target } => {
                    let target = self.resolve(base, target);
                    write_bytes(&mut code, at, &(target.as_usize() as u64).to_ne_bytes())?;
                }
            }
        }
        Ok(code)
    }

    fn resolve(&self, base: Address, target: PatchTarget) -> Address {
        match target {
            PatchTarget::Absolute(address) => address,
            PatchTarget::Section(section, offset) => base + self.section_start(section) + offset as usize,
        }
    }
}

fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), String> {
    match buf.get_mut(offset..offset + bytes.len()) {
        Some(dest) => {
            dest.copy_from_slice(bytes);
            Ok(())
        }
        None => Err(format!("patch at offset {} is outside of the code", offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let mut buffer = CodeBuffer::new();
        buffer.set_consts(&[0u8; 20], 16);
        buffer.set_insts(&[0x90u8; 13]);
        buffer.emit_stub(&[0xCCu8; 4]);
        assert_eq!(buffer.section_start(Section::Consts), 0);
        assert_eq!(buffer.section_start(Section::Insts), 32);
        assert_eq!(buffer.section_start(Section::Stubs), 48);
        assert_eq!(buffer.total_size(), 52);
    }

    #[test]
    fn rel32_patch() {
        let mut buffer = CodeBuffer::new();
        buffer.set_insts(&[0xE8, 0, 0, 0, 0, 0x90]);
        let target = unsafe { Address::from_usize(0x2000) };
        buffer.relocate(
            Section::Insts,
            1,
            RelocKind::RuntimeCall,
            Patch::Rel32 {
                end: 5,
                target: PatchTarget::Absolute(target),
            },
        );
        let base = unsafe { Address::from_usize(0x1000) };
        let code = buffer.relocated_code(base).unwrap();
        let disp = i32::from_ne_bytes(code[1..5].try_into().unwrap());
        assert_eq!(disp, 0x2000 - (0x1000 + 5));
    }

    #[test]
    fn section_reference() {
        let mut buffer = CodeBuffer::new();
        buffer.set_consts(&[1, 2, 3, 4, 5, 6, 7, 8], 8);
        buffer.set_insts(&[0u8; 8]);
        buffer.relocate(
            Section::Insts,
            0,
            RelocKind::SectionWord,
            Patch::Abs64 {
                target: PatchTarget::Section(Section::Consts, 4),
            },
        );
        let base = unsafe { Address::from_usize(0x10000) };
        let code = buffer.relocated_code(base).unwrap();
        let insts = buffer.section_start(Section::Insts);
        let word = u64::from_ne_bytes(code[insts..insts + 8].try_into().unwrap());
        assert_eq!(word, 0x10004);
        assert_eq!(&code[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn out_of_range_displacement() {
        let mut buffer = CodeBuffer::new();
        buffer.set_insts(&[0xE8, 0, 0, 0, 0]);
        buffer.relocate(
            Section::Insts,
            1,
            RelocKind::RuntimeCall,
            Patch::Rel32 {
                end: 5,
                target: PatchTarget::Absolute(unsafe { Address::from_usize(0x7000_0000_0000) }),
            },
        );
        assert!(buffer.relocated_code(unsafe { Address::from_usize(0x1000) }).is_err());
    }

    #[test]
    fn oop_indexes_are_shared() {
        let mut buffer = CodeBuffer::new();
        let a = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1008) }).unwrap();
        let b = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x2008) }).unwrap();
        assert_eq!(buffer.oop_index(a), 0);
        assert_eq!(buffer.oop_index(b), 1);
        assert_eq!(buffer.oop_index(a), 0);
    }
}
