//! Oop maps: which registers and stack slots hold references at each safepoint.

use super::compiled_code::{Location, ReferenceMap};

/// Number of general purpose registers.
pub const NUM_CPU_REGISTERS: u16 = 16;
/// Number of vector registers.
pub const NUM_XMM_REGISTERS: u16 = 32;
/// Each 64 bit general purpose register takes two 32 bit register slots.
const SLOTS_PER_CPU_REGISTER: i32 = 2;
/// Each vector register takes sixteen slots, enough for 512 bits.
const SLOTS_PER_XMM_REGISTER: i32 = 16;

/// A register or stack slot in the VM's numbering. Registers come first, then stack slots in 32
/// bit units.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VMReg(pub i32);

impl VMReg {
    /// The first stack slot.
    pub const STACK0: VMReg = VMReg(
        NUM_CPU_REGISTERS as i32 * SLOTS_PER_CPU_REGISTER + NUM_XMM_REGISTERS as i32 * SLOTS_PER_XMM_REGISTER,
    );

    pub fn from_register(number: u16) -> Option<VMReg> {
        if number < NUM_CPU_REGISTERS {
            Some(VMReg(number as i32 * SLOTS_PER_CPU_REGISTER))
        } else if number < NUM_CPU_REGISTERS + NUM_XMM_REGISTERS {
            let xmm = (number - NUM_CPU_REGISTERS) as i32;
            Some(VMReg(
                NUM_CPU_REGISTERS as i32 * SLOTS_PER_CPU_REGISTER + xmm * SLOTS_PER_XMM_REGISTER,
            ))
        } else {
            None
        }
    }

    /// A stack slot at a byte offset from the stack pointer. The offset must be 4 byte aligned.
    pub fn from_stack_offset(offset: i32) -> Option<VMReg> {
        if offset < 0 || offset % 4 != 0 {
            return None;
        }
        Some(VMReg(Self::STACK0.0 + offset / 4))
    }

    pub fn is_stack(self) -> bool {
        self.0 >= Self::STACK0.0
    }

    /// The next 32 bit slot.
    pub fn next(self) -> VMReg {
        VMReg(self.0 + 1)
    }

    /// Map a location in compiled code to a VM register.
    pub fn from_location(location: &Location, total_frame_size: u32) -> Result<VMReg, String> {
        match location {
            Location::Register(number) => {
                VMReg::from_register(*number).ok_or_else(|| format!("invalid register number: {}", number))
            }
            Location::Stack(slot) => {
                let offset = slot.raw_offset(total_frame_size);
                VMReg::from_stack_offset(offset).ok_or_else(|| format!("invalid stack offset: {}", offset))
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OopMapValue {
    Oop(VMReg),
    NarrowOop(VMReg),
    /// A pointer into the middle of the object at `base`.
    Derived { reg: VMReg, base: VMReg },
}

impl OopMapValue {
    pub fn reg(&self) -> VMReg {
        match *self {
            OopMapValue::Oop(reg) | OopMapValue::NarrowOop(reg) => reg,
            OopMapValue::Derived { reg, .. } => reg,
        }
    }
}

/// The references live at one safepoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OopMap {
    pub pc_offset: u32,
    /// Frame size in 32 bit slots.
    pub frame_slots: u32,
    values: Vec<OopMapValue>,
}

impl OopMap {
    pub fn new(frame_slots: u32) -> Self {
        OopMap {
            pc_offset: 0,
            frame_slots,
            values: vec![],
        }
    }

    pub fn set_oop(&mut self, reg: VMReg) {
        self.values.push(OopMapValue::Oop(reg));
    }

    pub fn set_narrow_oop(&mut self, reg: VMReg) {
        self.values.push(OopMapValue::NarrowOop(reg));
    }

    pub fn set_derived_oop(&mut self, reg: VMReg, base: VMReg) {
        self.values.push(OopMapValue::Derived { reg, base });
    }

    pub fn values(&self) -> &[OopMapValue] {
        &self.values
    }

    /// The registers and stack slots that hold references, sorted.
    pub fn registers(&self) -> Vec<VMReg> {
        let mut regs: Vec<VMReg> = self.values.iter().map(|v| v.reg()).collect();
        regs.sort();
        regs
    }

    /// Build the oop map of a safepoint from the compiler's reference map.
    pub fn from_reference_map(
        map: &ReferenceMap,
        total_frame_size: u32,
        use_compressed_oops: bool,
    ) -> Result<OopMap, String> {
        if map.derived_base.len() != map.objects.len() || map.size_in_bytes.len() != map.objects.len() {
            return Err("reference map arrays have different lengths".to_string());
        }
        let mut oop_map = OopMap::new(total_frame_size / 4);
        for ((location, base), size) in map.objects.iter().zip(map.derived_base.iter()).zip(map.size_in_bytes.iter()) {
            let reg = VMReg::from_location(location, total_frame_size)?;
            match base {
                None => match *size {
                    8 if !use_compressed_oops => oop_map.set_oop(reg),
                    4 | 8 if use_compressed_oops => oop_map.set_narrow_oop(reg),
                    16 if use_compressed_oops => {
                        oop_map.set_narrow_oop(reg);
                        oop_map.set_narrow_oop(reg.next());
                    }
                    _ => return Err(format!("unexpected size {} of reference at {:?}", size, location)),
                },
                Some(base) => {
                    if *size != 8 {
                        return Err(format!("derived reference at {:?} must be 8 bytes, not {}", location, size));
                    }
                    let base = VMReg::from_location(base, total_frame_size)?;
                    oop_map.set_derived_oop(reg, base);
                }
            }
        }
        Ok(oop_map)
    }
}

/// The oop maps of a code blob, by pc offset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OopMapSet {
    maps: Vec<OopMap>,
}

impl OopMapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gc_map(&mut self, pc_offset: u32, mut map: OopMap) {
        map.pc_offset = pc_offset;
        self.maps.push(map);
    }

    pub fn find_map_at_offset(&self, pc_offset: u32) -> Option<&OopMap> {
        self.maps.iter().find(|m| m.pc_offset == pc_offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OopMap> {
        self.maps.iter()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::StackSlot;

    #[test]
    fn vm_registers() {
        assert_eq!(VMReg::from_register(0), Some(VMReg(0)));
        assert_eq!(VMReg::from_register(3), Some(VMReg(6)));
        assert_eq!(VMReg::from_register(16), Some(VMReg(32)));
        assert_eq!(VMReg::from_register(48), None);
        assert_eq!(VMReg::from_stack_offset(8), Some(VMReg(VMReg::STACK0.0 + 2)));
        assert_eq!(VMReg::from_stack_offset(6), None);
        assert!(VMReg::from_stack_offset(0).unwrap().is_stack());
    }

    #[test]
    fn reference_map() {
        let map = ReferenceMap {
            objects: vec![
                Location::Register(1),
                Location::Stack(StackSlot {
                    offset: 8,
                    add_frame_size: true,
                }),
                Location::Register(2),
            ],
            derived_base: vec![None, None, Some(Location::Register(1))],
            size_in_bytes: vec![8, 8, 8],
        };
        let oop_map = OopMap::from_reference_map(&map, 32, false).unwrap();
        assert_eq!(
            oop_map.values(),
            &[
                OopMapValue::Oop(VMReg(2)),
                OopMapValue::Oop(VMReg(VMReg::STACK0.0 + 10)),
                OopMapValue::Derived {
                    reg: VMReg(4),
                    base: VMReg(2)
                },
            ]
        );
        assert_eq!(oop_map.frame_slots, 8);
    }

    #[test]
    fn compressed_pair() {
        let map = ReferenceMap {
            objects: vec![Location::Register(0)],
            derived_base: vec![None],
            size_in_bytes: vec![16],
        };
        let oop_map = OopMap::from_reference_map(&map, 0, true).unwrap();
        assert_eq!(
            oop_map.values(),
            &[OopMapValue::NarrowOop(VMReg(0)), OopMapValue::NarrowOop(VMReg(1))]
        );
        assert!(OopMap::from_reference_map(&map, 0, false).is_err());
    }
}
