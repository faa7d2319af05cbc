//! Code generation: encodes the resolved AST into section images.
//!
//! Every instruction is one 32-bit word with the opcode in byte 0:
//!
//! ```text
//! NoOperand                 [op, 0,   0,    0   ]
//! SingleRegister            [op, r,   0,    0   ]
//! RegisterImmediate         [op, r,   lo,   hi  ]   16-bit immediate
//! RegisterRegisterOffset    [op, dst, base, off ]   signed 8-bit offset
//! RegisterRegister          [op, dst, src,  0   ]
//! RegisterRegisterRegister  [op, dst, src1, src2]
//! ```
use super::ast::*;
use super::error::{Error, ErrorKind, Result};
use super::isa::{Isa, LUI};
use super::object::{ObjectFile, SectionFlags, SectionImage};
use super::semantic::SymbolTable;

/// Symbol whose address becomes the entry point.
pub const ENTRY_SYMBOL: &str = "_start";

pub fn generate(isa: &Isa, program: &Program, symbols: &SymbolTable) -> Result<ObjectFile> {
    let mut sections: Vec<SectionImage> = Vec::with_capacity(program.len());

    for section in program {
        let mut bytes: Vec<u8> = Vec::with_capacity(section.size().unwrap_or(0) as usize);
        for item in &section.items {
            bytes.extend(encode_item(isa, item)?);
        }

        let (line, column) = section.items.first().map_or((0, 0), |item| (item.line, item.column));
        let image = SectionImage::new(&section.name, section.address(), bytes, line, column)?;
        debug!("section `{}` at 0x{:08X}: {} bytes", image.name, image.address, image.bytes.len());
        sections.push(image);
    }

    let entry = symbols.address(ENTRY_SYMBOL)
        .or_else(|| {
            sections.iter()
                .find(|s| s.flags.contains(SectionFlags::EXECUTE))
                .map(|s| s.address)
        })
        .unwrap_or(0);
    info!("entry point 0x{:08X}", entry);

    Ok(ObjectFile::new(entry, sections))
}

/// Bytes emitted for a single item. Items without a size emit nothing.
pub fn encode_item(isa: &Isa, item: &Item) -> Result<Vec<u8>> {
    match &item.node {
        BlockItem::Instruction(ins) => Ok(encode_instruction(isa, ins, item.line, item.column)?.to_vec()),
        BlockItem::Data(data) => encode_data(data, item.line, item.column),
        _ => Ok(Vec::new()),
    }
}

pub fn encode_instruction(isa: &Isa, ins: &Instruction, line: usize, column: usize) -> Result<[u8; 4]> {
    use Instruction::*;
    let mnemonic = isa.opcode_by_code(ins.opcode()).map_or("???", |op| op.mnemonic);

    let word = match ins {
        NoOperand { op } => [*op, 0, 0, 0],
        SingleRegister { op, reg } => [*op, *reg, 0, 0],
        RegisterImmediate { op, reg, imm } => {
            let v = value(imm, line, column)?;
            let imm = if *op == LUI {
                (v >> 16) as u16
            } else if fits(v, 16) {
                v as u16
            } else {
                return Err(range(format!("`{}` immediate 0x{:X} does not fit in 16 bits", mnemonic, v), line, column));
            };
            let [lo, hi] = imm.to_le_bytes();
            [*op, *reg, lo, hi]
        }
        RegisterRegisterOffset { op, dst, base, offset } => {
            let v = value(offset, line, column)? as i32;
            if v < -128 || v > 127 {
                return Err(range(format!("`{}` offset {} is outside -128..=127", mnemonic, v), line, column));
            }
            [*op, *dst, *base, v as i8 as u8]
        }
        RegisterRegister { op, dst, src } => [*op, *dst, *src, 0],
        RegisterRegisterRegister { op, dst, src1, src2 } => [*op, *dst, *src1, *src2],
    };

    Ok(word)
}

fn encode_data(data: &Data, line: usize, column: usize) -> Result<Vec<u8>> {
    match data {
        Data::Bytes(bytes) => Ok(bytes.clone()),
        Data::Zero(count) => Ok(vec![0; *count as usize]),
        Data::Values { width, values } => {
            let width = *width as usize;
            let mut out: Vec<u8> = Vec::with_capacity(width * values.len());
            for constant in values {
                let v = value(constant, line, column)?;
                if !fits(v, 8 * width as u32) {
                    return Err(range(format!("0x{:X} does not fit in {} byte(s)", v, width), line, column));
                }
                out.extend_from_slice(&v.to_le_bytes()[..width]);
            }
            Ok(out)
        }
    }
}

/// True if `value` fits in `bits` bits, read either as unsigned or as a
/// sign-extended negative number.
fn fits(value: u32, bits: u32) -> bool {
    if bits >= 32 {
        return true;
    }
    let signed = value as i32 as i64;
    (value as u64) < (1u64 << bits) || (signed < 0 && signed >= -(1i64 << (bits - 1)))
}

fn value(constant: &Constant, line: usize, column: usize) -> Result<u32> {
    constant.value()
        .ok_or_else(|| Error::new(ErrorKind::UnresolvedSymbol(constant.to_string()), line, column))
}

fn range(msg: String, line: usize, column: usize) -> Error {
    Error::new(ErrorKind::EncodingRange(msg), line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(ins: Instruction) -> Result<[u8; 4]> {
        encode_instruction(&Isa::new(), &ins, 1, 1)
    }

    fn imm(op: u8, v: u32) -> Instruction {
        Instruction::RegisterImmediate { op, reg: 3, imm: Constant::Immediate(v) }
    }

    #[test]
    fn test_formats() {
        assert_eq!(encode(Instruction::NoOperand { op: 0x00 }).unwrap(), [0, 0, 0, 0]);
        assert_eq!(encode(Instruction::SingleRegister { op: 0x08, reg: 14 }).unwrap(), [0x08, 14, 0, 0]);
        assert_eq!(encode(imm(0x10, 0xBEEF)).unwrap(), [0x10, 3, 0xEF, 0xBE]);
        assert_eq!(encode(Instruction::RegisterRegisterOffset {
            op: 0x20, dst: 1, base: 14, offset: Constant::Immediate((-4i32) as u32),
        }).unwrap(), [0x20, 1, 14, 0xFC]);
        assert_eq!(encode(Instruction::RegisterRegister { op: 0x28, dst: 1, src: 2 }).unwrap(), [0x28, 1, 2, 0]);
        assert_eq!(encode(Instruction::RegisterRegisterRegister { op: 0x30, dst: 1, src1: 2, src2: 3 }).unwrap(),
                   [0x30, 1, 2, 3]);
    }

    #[test]
    fn test_immediate_range() {
        assert_eq!(encode(imm(0x12, (-1i32) as u32)).unwrap(), [0x12, 3, 0xFF, 0xFF]);
        assert_eq!(encode(imm(0x12, (-32768i32) as u32)).unwrap(), [0x12, 3, 0x00, 0x80]);
        assert!(matches!(encode(imm(0x12, 0x1_0000)).unwrap_err().kind, ErrorKind::EncodingRange(_)));
        assert!(matches!(encode(imm(0x12, (-32769i32) as u32)).unwrap_err().kind, ErrorKind::EncodingRange(_)));
    }

    #[test]
    fn test_lui_takes_high_half() {
        assert_eq!(encode(imm(LUI, 0x1234_5678)).unwrap(), [LUI, 3, 0x34, 0x12]);
        assert_eq!(encode(imm(LUI, 0xFFFF_FFFF)).unwrap(), [LUI, 3, 0xFF, 0xFF]);
    }

    #[test]
    fn test_offset_range() {
        let ld = |v: i32| Instruction::RegisterRegisterOffset { op: 0x20, dst: 1, base: 2, offset: Constant::Immediate(v as u32) };
        assert_eq!(encode(ld(127)).unwrap()[3], 0x7F);
        assert_eq!(encode(ld(-128)).unwrap()[3], 0x80);
        assert!(matches!(encode(ld(128)).unwrap_err().kind, ErrorKind::EncodingRange(_)));
        assert!(matches!(encode(ld(-129)).unwrap_err().kind, ErrorKind::EncodingRange(_)));
    }

    #[test]
    fn test_unresolved_constant() {
        let ins = Instruction::RegisterImmediate { op: 0x10, reg: 1, imm: Constant::SymbolRef("later".to_owned()) };
        let err = encode(ins).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol("later".to_owned()));
    }

    #[test]
    fn test_data() {
        let values = |width, values: Vec<u32>| Data::Values {
            width,
            values: values.into_iter().map(Constant::Immediate).collect(),
        };
        assert_eq!(encode_data(&values(Width::Byte, vec![1, 0xFF, (-1i32) as u32]), 1, 1).unwrap(), vec![1, 0xFF, 0xFF]);
        assert_eq!(encode_data(&values(Width::Half, vec![0x1234]), 1, 1).unwrap(), vec![0x34, 0x12]);
        assert_eq!(encode_data(&values(Width::Word, vec![0xDEAD_BEEF]), 1, 1).unwrap(), vec![0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(encode_data(&Data::Bytes(b"ok\0".to_vec()), 1, 1).unwrap(), b"ok\0".to_vec());
        assert_eq!(encode_data(&Data::Zero(3), 1, 1).unwrap(), vec![0, 0, 0]);

        let err = encode_data(&values(Width::Byte, vec![0x100]), 7, 2).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EncodingRange(_)));
        assert_eq!((err.line, err.column), (7, 2));
    }

    #[test]
    fn test_fits() {
        assert!(fits(0xFF, 8));
        assert!(fits(0xFFFF_FF80, 8));
        assert!(!fits(0xFFFF_FF7F, 8));
        assert!(!fits(0x100, 8));
        assert!(fits(0xFFFF_FFFF, 32));
    }
}
