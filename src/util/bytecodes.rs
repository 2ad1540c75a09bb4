//! Java bytecode opcodes and instruction lengths.

pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const IINC: u8 = 0x84;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const WIDE: u8 = 0xc4;

/// The length of an instruction with a fixed length, opcode included. `None` for the switches and
/// `wide`, whose length depends on their operands, and for opcodes that are not standard.
pub fn fixed_length(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        LDC => 2,
        LDC_W | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xac..=0xb1 => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca => 1,
        _ => return None,
    })
}

fn read_java_i32(code: &[u8], at: usize) -> Option<i32> {
    let bytes = code.get(at..at + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The length of the instruction of standard opcode `opcode` at `bci`. `None` if the instruction
/// is malformed or runs past the end of the code.
pub fn instruction_length(code: &[u8], bci: usize, opcode: u8) -> Option<usize> {
    let length = match opcode {
        WIDE => match code.get(bci + 1)? {
            &IINC => 6,
            _ => 4,
        },
        TABLESWITCH | LOOKUPSWITCH => {
            // Operands start at the next multiple of 4
            let operands = (bci + 4) & !3;
            let table = if opcode == TABLESWITCH {
                let low = read_java_i32(code, operands + 4)?;
                let high = read_java_i32(code, operands + 8)?;
                if high < low {
                    return None;
                }
                12 + (high as i64 - low as i64 + 1) as usize * 4
            } else {
                let npairs = read_java_i32(code, operands + 4)?;
                if npairs < 0 {
                    return None;
                }
                8 + npairs as usize * 8
            };
            operands - bci + table
        }
        _ => fixed_length(opcode)?,
    };
    if bci + length > code.len() {
        return None;
    }
    Some(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_lengths() {
        assert_eq!(fixed_length(0x00), Some(1));
        assert_eq!(fixed_length(LDC), Some(2));
        assert_eq!(fixed_length(INVOKEINTERFACE), Some(5));
        assert_eq!(fixed_length(0xc5), Some(4));
        assert_eq!(fixed_length(TABLESWITCH), None);
        assert_eq!(fixed_length(WIDE), None);
        assert_eq!(fixed_length(0xe0), None);
    }

    #[test]
    fn wide_lengths() {
        assert_eq!(instruction_length(&[WIDE, IINC, 0, 1, 0, 1], 0, WIDE), Some(6));
        assert_eq!(instruction_length(&[WIDE, 0x15, 1, 0], 0, WIDE), Some(4));
        assert_eq!(instruction_length(&[WIDE, 0x15, 1], 0, WIDE), None);
    }

    #[test]
    fn switch_lengths() {
        // bci 1: two bytes of padding, default, low 0, high 1, two offsets
        let mut code = vec![0x00, TABLESWITCH, 0, 0];
        for v in [8i32, 0, 1, 16, 24] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(instruction_length(&code, 1, TABLESWITCH), Some(3 + 20));

        // bci 0: three bytes of padding, default, one pair
        let mut code = vec![LOOKUPSWITCH, 0, 0, 0];
        for v in [8i32, 1, 5, 12] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(instruction_length(&code, 0, LOOKUPSWITCH), Some(4 + 16));
        assert_eq!(instruction_length(&code[..10], 0, LOOKUPSWITCH), None);
    }
}
