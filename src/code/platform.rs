//! x86_64 instruction patching and relocation.
//!
//! The compiler leaves placeholder operands in the instructions at sites that need a VM-specific
//! value. This module finds those operands, writes what is known at install time and records a
//! relocation for what depends on where the code is finally placed.

use std::collections::HashMap;
use std::ops::Range;

use super::buffer::{CodeBuffer, Patch, PatchTarget, RelocKind, Section};
use super::compiled_code::{CallTarget, CompiledCode, SiteKind};
use super::offsets::MarkId;
use crate::util::{Address, ObjectReference};
use crate::vm::{CallStub, MetadataRef, VMBinding};

/// `movabs r11, imm64; jmp r11`
const TRAMPOLINE: [u8; 13] = [0x49, 0xBB, 0, 0, 0, 0, 0, 0, 0, 0, 0x41, 0xFF, 0xE3];
pub const TRAMPOLINE_SIZE: usize = TRAMPOLINE.len();
/// `movabs rbx, <method>; jmp <interpreter entry>`. Both operands are set when the call is bound.
const STATIC_CALL_STUB: [u8; 15] = [0x48, 0xBB, 0, 0, 0, 0, 0, 0, 0, 0, 0xE9, 0xFB, 0xFF, 0xFF, 0xFF];
pub const STATIC_CALL_STUB_SIZE: usize = STATIC_CALL_STUB.len();
/// The value an unbound inline cache holds.
const NON_OOP_WORD: u64 = u64::MAX;

fn byte_at(code: &[u8], offset: usize) -> Result<u8, String> {
    code.get(offset)
        .copied()
        .ok_or_else(|| format!("instruction at {} is outside of the code", offset))
}

fn is_rex(b: u8) -> bool {
    (0x40..=0x4F).contains(&b)
}

fn is_rex_w(b: u8) -> bool {
    is_rex(b) && b & 0x08 != 0
}

/// Can a 32 bit displacement reach `target` from anywhere in the code cache?
pub fn is_reachable(target: Address, code_cache: &Range<Address>) -> bool {
    let reach = |from: Address| i32::try_from(target.as_usize() as i64 - from.as_usize() as i64).is_ok();
    reach(code_cache.start) && reach(code_cache.end)
}

/// The offset of the instruction after the call at `pc_offset`.
pub fn next_offset(code: &[u8], pc_offset: u32) -> Result<u32, String> {
    let pc = pc_offset as usize;
    let mut at = pc;
    let first = byte_at(code, at)?;
    if first == 0xE8 {
        return Ok(pc_offset + 5);
    }
    if is_rex(first) {
        at += 1;
    }
    if byte_at(code, at)? == 0xFF {
        let modrm = byte_at(code, at + 1)?;
        // call through a register
        if modrm >> 6 == 0b11 && (modrm >> 3) & 7 == 2 {
            return Ok((at + 2) as u32);
        }
    }
    Err(format!("unsupported call instruction at pc {}", pc_offset))
}

/// The offset of the operand of a `movabs reg, imm64` at `pc`, if there is one.
fn movabs_operand(code: &[u8], pc: usize) -> Option<usize> {
    let rex = *code.get(pc)?;
    let opcode = *code.get(pc + 1)?;
    (is_rex_w(rex) && (0xB8..=0xBF).contains(&opcode)).then_some(pc + 2)
}

/// The offset of the 32 bit immediate of a `mov r32, imm32` or `cmp r32, imm32` at `pc`.
fn imm32_operand(code: &[u8], pc: usize) -> Option<usize> {
    let mut at = pc;
    let first = *code.get(at)?;
    if is_rex(first) {
        if is_rex_w(first) {
            return None;
        }
        at += 1;
    }
    match *code.get(at)? {
        0xB8..=0xBF => Some(at + 1),
        0x81 if code.get(at + 1)? >> 6 == 0b11 => Some(at + 2),
        _ => None,
    }
}

/// Find the `[rip + disp32]` operand of the instruction at `pc`. Returns the offset of the
/// displacement and the offset of the end of the instruction.
fn rip_relative_operand(code: &[u8], pc: usize) -> Option<(usize, usize)> {
    let mut at = pc;
    let mut operand_size_prefix = false;
    loop {
        match *code.get(at)? {
            0x66 => operand_size_prefix = true,
            0xF2 | 0xF3 => {}
            _ => break,
        }
        at += 1;
    }
    if is_rex(*code.get(at)?) {
        at += 1;
    }
    let opcode = *code.get(at)?;
    at += 1;
    let imm_size = if opcode == 0x0F {
        let second = *code.get(at)?;
        at += 1;
        match second {
            0x38 => {
                at += 1;
                0
            }
            0x3A => {
                at += 1;
                1
            }
            _ => 0,
        }
    } else {
        match opcode {
            0x80 | 0x83 | 0xC6 | 0x6B => 1,
            0x81 | 0xC7 | 0x69 if operand_size_prefix => 2,
            0x81 | 0xC7 | 0x69 => 4,
            _ => 0,
        }
    };
    let modrm = *code.get(at)?;
    if modrm & 0b1100_0111 != 0b0000_0101 {
        return None;
    }
    let disp = at + 1;
    let end = disp + 4 + imm_size;
    (end <= code.len()).then_some((disp, end))
}

/// Patches and relocates the instructions of one install.
pub(crate) struct Relocator {
    code_cache: Range<Address>,
    /// Trampolines already emitted, by target.
    trampolines: HashMap<Address, u32>,
}

impl Relocator {
    pub fn new(code_cache: Range<Address>) -> Self {
        Relocator {
            code_cache,
            trampolines: HashMap::new(),
        }
    }

    /// The stub space the sites of `compiled` may need: one static call stub per Java call and a
    /// trampoline per distinct foreign target the code cache cannot reach directly.
    pub fn estimate_stub_space(&self, compiled: &CompiledCode) -> usize {
        let mut static_call_stubs = 0;
        let mut far_targets = vec![];
        for site in compiled.sites.iter() {
            match &site.kind {
                SiteKind::Mark { id } => {
                    if MarkId::from_i32(*id).map_or(false, |m| m.needs_static_call_stub()) {
                        static_call_stubs += 1;
                    }
                }
                SiteKind::Call {
                    target: CallTarget::Foreign(target),
                    ..
                } => {
                    if !is_reachable(*target, &self.code_cache) && !far_targets.contains(target) {
                        far_targets.push(*target);
                    }
                }
                _ => {}
            }
        }
        static_call_stubs * STATIC_CALL_STUB_SIZE + far_targets.len() * TRAMPOLINE_SIZE
    }

    /// Embed an object in the instruction at `pc_offset`.
    pub fn patch_oop<VM: VMBinding>(
        &self,
        buffer: &mut CodeBuffer,
        pc_offset: u32,
        object: ObjectReference,
        narrow: bool,
    ) -> Result<(), String> {
        let index = buffer.oop_index(object);
        let pc = pc_offset as usize;
        if narrow {
            let operand = imm32_operand(buffer.insts(), pc)
                .ok_or_else(|| format!("no 32 bit operand for a compressed oop at pc {}", pc_offset))?;
            buffer.write_u32(Section::Insts, operand, VM::encode_narrow_oop(object))?;
            buffer.relocate(Section::Insts, operand as u32, RelocKind::Oop { index, narrow }, Patch::None);
        } else {
            let operand = movabs_operand(buffer.insts(), pc)
                .ok_or_else(|| format!("no 64 bit operand for an oop at pc {}", pc_offset))?;
            buffer.write_u64(Section::Insts, operand, object.to_raw_address().as_usize() as u64)?;
            buffer.relocate(Section::Insts, operand as u32, RelocKind::Oop { index, narrow }, Patch::None);
        }
        Ok(())
    }

    /// Embed a metadata pointer in the instruction at `pc_offset`. Only class pointers can be
    /// compressed.
    pub fn patch_metadata<VM: VMBinding>(
        &self,
        buffer: &mut CodeBuffer,
        pc_offset: u32,
        metadata: MetadataRef,
        narrow: bool,
    ) -> Result<(), String> {
        let index = buffer.metadata_index(metadata);
        let pc = pc_offset as usize;
        if narrow {
            let klass = metadata
                .as_klass()
                .ok_or_else(|| format!("unexpected compressed pointer to non-class metadata at pc {}", pc_offset))?;
            let operand = imm32_operand(buffer.insts(), pc)
                .ok_or_else(|| format!("no 32 bit operand for a compressed class pointer at pc {}", pc_offset))?;
            buffer.write_u32(Section::Insts, operand, VM::encode_narrow_klass(klass))?;
            buffer.relocate(Section::Insts, operand as u32, RelocKind::Metadata { index, narrow }, Patch::None);
        } else {
            let operand = movabs_operand(buffer.insts(), pc)
                .ok_or_else(|| format!("no 64 bit operand for metadata at pc {}", pc_offset))?;
            buffer.write_u64(Section::Insts, operand, metadata.address.as_usize() as u64)?;
            buffer.relocate(Section::Insts, operand as u32, RelocKind::Metadata { index, narrow }, Patch::None);
        }
        Ok(())
    }

    /// Make the instruction at `pc_offset` refer to `data_offset` in the data section.
    pub fn patch_data_section_reference(&self, buffer: &mut CodeBuffer, pc_offset: u32, data_offset: u32) -> Result<(), String> {
        if data_offset as usize >= buffer.section(Section::Consts).len() {
            return Err(format!("data section offset {} at pc {} is out of bounds", data_offset, pc_offset));
        }
        let pc = pc_offset as usize;
        let target = PatchTarget::Section(Section::Consts, data_offset);
        if let Some((disp, end)) = rip_relative_operand(buffer.insts(), pc) {
            buffer.relocate(
                Section::Insts,
                disp as u32,
                RelocKind::SectionWord,
                Patch::Rel32 { end: end as u32, target },
            );
        } else if let Some(operand) = movabs_operand(buffer.insts(), pc) {
            buffer.relocate(Section::Insts, operand as u32, RelocKind::SectionWord, Patch::Abs64 { target });
        } else {
            return Err(format!("unsupported data section reference at pc {}", pc_offset));
        }
        Ok(())
    }

    /// Relocate a call or jump to an address outside of the Java world.
    pub fn relocate_foreign_call(&mut self, buffer: &mut CodeBuffer, pc_offset: u32, target: Address) -> Result<(), String> {
        let pc = pc_offset as usize;
        let opcode = byte_at(buffer.insts(), pc)?;
        if opcode == 0xE8 || opcode == 0xE9 {
            let end = pc_offset + 5;
            if is_reachable(target, &self.code_cache) {
                buffer.relocate(
                    Section::Insts,
                    pc_offset + 1,
                    RelocKind::RuntimeCall,
                    Patch::Rel32 {
                        end,
                        target: PatchTarget::Absolute(target),
                    },
                );
            } else {
                let trampoline = self.trampoline(buffer, target);
                trace!("Call at {} goes to {} through the trampoline at {}", pc_offset, target, trampoline);
                buffer.relocate(
                    Section::Insts,
                    pc_offset + 1,
                    RelocKind::Trampoline,
                    Patch::Rel32 {
                        end,
                        target: PatchTarget::Section(Section::Stubs, trampoline),
                    },
                );
            }
        } else if let Some(operand) = movabs_operand(buffer.insts(), pc) {
            // The address is loaded into a register that the call goes through
            buffer.relocate(
                Section::Insts,
                operand as u32,
                RelocKind::RuntimeCall,
                Patch::Abs64 {
                    target: PatchTarget::Absolute(target),
                },
            );
        } else {
            return Err(format!("unsupported foreign call instruction at pc {}", pc_offset));
        }
        Ok(())
    }

    fn trampoline(&mut self, buffer: &mut CodeBuffer, target: Address) -> u32 {
        if let Some(offset) = self.trampolines.get(&target) {
            return *offset;
        }
        let offset = buffer.emit_stub(&TRAMPOLINE);
        buffer.relocate(
            Section::Stubs,
            offset + 2,
            RelocKind::RuntimeCall,
            Patch::Abs64 {
                target: PatchTarget::Absolute(target),
            },
        );
        self.trampolines.insert(target, offset);
        offset
    }

    /// Relocate a call to a Java method. Unbound calls go to the resolution stubs; the kind of
    /// call comes from the invoke mark before it.
    pub fn relocate_java_call<VM: VMBinding>(
        &mut self,
        buffer: &mut CodeBuffer,
        pc_offset: u32,
        call_type: MarkId,
        invoke_mark_pc: u32,
    ) -> Result<(), String> {
        if byte_at(buffer.insts(), pc_offset as usize)? != 0xE8 {
            return Err(format!("Java call at pc {} must be a direct call", pc_offset));
        }
        let end = pc_offset + 5;
        let (kind, stub) = match call_type {
            MarkId::InvokeInterface | MarkId::InvokeVirtual => {
                // The inline cache starts out unbound
                let operand = movabs_operand(buffer.insts(), invoke_mark_pc as usize)
                    .ok_or_else(|| format!("no inline cache load at pc {}", invoke_mark_pc))?;
                buffer.write_u64(Section::Insts, operand, NON_OOP_WORD)?;
                (
                    RelocKind::VirtualCall {
                        ic_offset: invoke_mark_pc,
                    },
                    CallStub::ResolveVirtual,
                )
            }
            MarkId::InvokeStatic => (RelocKind::StaticCall, CallStub::ResolveStatic),
            MarkId::InvokeSpecial => (RelocKind::OptVirtualCall, CallStub::ResolveOptVirtual),
            _ => return Err(format!("invalid call type {:?} for the call at pc {}", call_type, pc_offset)),
        };
        buffer.relocate(
            Section::Insts,
            pc_offset + 1,
            kind,
            Patch::Rel32 {
                end,
                target: PatchTarget::Absolute(VM::call_stub_entry(stub)),
            },
        );
        if matches!(call_type, MarkId::InvokeStatic | MarkId::InvokeSpecial) {
            // Calls from compiled code to interpreted code go through this stub
            let stub_offset = buffer.emit_stub(&STATIC_CALL_STUB);
            buffer.relocate(
                Section::Stubs,
                stub_offset,
                RelocKind::StaticStub { call_offset: pc_offset },
                Patch::None,
            );
        }
        Ok(())
    }

    /// Relocate a safepoint poll.
    pub fn relocate_poll(&self, buffer: &mut CodeBuffer, pc_offset: u32, mark: MarkId, polling_page: Address) -> Result<(), String> {
        let kind = match mark {
            MarkId::PollNear | MarkId::PollFar => RelocKind::Poll,
            MarkId::PollReturnNear | MarkId::PollReturnFar => RelocKind::PollReturn,
            _ => return Err(format!("{:?} is not a poll mark", mark)),
        };
        match mark {
            MarkId::PollNear | MarkId::PollReturnNear => {
                let (disp, end) = rip_relative_operand(buffer.insts(), pc_offset as usize)
                    .ok_or_else(|| format!("near poll at pc {} has no rip relative operand", pc_offset))?;
                buffer.relocate(
                    Section::Insts,
                    disp as u32,
                    kind,
                    Patch::Rel32 {
                        end: end as u32,
                        target: PatchTarget::Absolute(polling_page),
                    },
                );
            }
            _ => {
                // The page address is loaded into a register earlier
                buffer.relocate(Section::Insts, pc_offset, kind, Patch::None);
            }
        }
        Ok(())
    }

    pub fn patch_card_table_address(&self, buffer: &mut CodeBuffer, pc_offset: u32, base: Address) -> Result<(), String> {
        let operand = movabs_operand(buffer.insts(), pc_offset as usize)
            .ok_or_else(|| format!("no 64 bit operand for the card table address at pc {}", pc_offset))?;
        buffer.write_u64(Section::Insts, operand, base.as_usize() as u64)?;
        buffer.relocate(Section::Insts, operand as u32, RelocKind::ExternalWord, Patch::None);
        Ok(())
    }

    /// Write the card shift into a `shr r, imm8` or a `mov r32, imm32`.
    pub fn patch_card_table_shift(&self, buffer: &mut CodeBuffer, pc_offset: u32, shift: i32) -> Result<(), String> {
        let pc = pc_offset as usize;
        let insts = buffer.insts();
        let at = if is_rex(byte_at(insts, pc)?) { pc + 1 } else { pc };
        if byte_at(insts, at)? == 0xC1 && (byte_at(insts, at + 1)? >> 3) & 7 == 5 {
            let imm = at + 2;
            byte_at(insts, imm)?;
            buffer.section_mut(Section::Insts)[imm] = shift as u8;
            return Ok(());
        }
        match imm32_operand(insts, pc) {
            Some(operand) => buffer.write_u32(Section::Insts, operand, shift as u32),
            None => Err(format!("no operand for the card table shift at pc {}", pc_offset)),
        }
    }
}
