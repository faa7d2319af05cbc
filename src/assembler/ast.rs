//! This AST describes a parsed BISC program.
//!
//! A program is a list of sections. Each section holds its block items
//! in declaration order, and each item records its source line and, after
//! semantic analysis, its address.
//!
//! Example source file:
//!
//! ```nasm
//! .define COUNT 10
//!
//! .data
//! greeting: .string "hi\n"
//! table:    .word 1, 2, %COUNT
//!
//! .text
//! _start:
//!     li   a0, table          ; pseudo-instruction, expands to lli + lui
//!     ld   t0, a0[4]          ; t0 <= mem[a0 + 4]
//!     add  t1, t0, t0
//!     call done               ; forward reference
//! done:
//!     halt
//! ```
use std::convert::TryFrom;
use std::fmt;

use super::isa::{self, BISC};

/// Selects part of a resolved 32-bit value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Selector {
    /// Bits 0-15.
    Lo,
    /// Bits 16-31.
    Hi,
    /// Bytes `first..=last`, byte 0 being the least significant.
    Bytes { first: u8, last: u8 },
}

impl Selector {
    pub fn apply(&self, value: u32) -> u32 {
        match *self {
            Selector::Lo => value & 0xFFFF,
            Selector::Hi => (value >> 16) & 0xFFFF,
            Selector::Bytes { first, last } => {
                let width = 8 * (last as u32 - first as u32 + 1);
                let mask = if width >= 32 { u32::MAX } else { (1 << width) - 1 };
                (value >> (8 * first as u32)) & mask
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Constant {
    Immediate(u32),
    SymbolRef(String),
    Relocation(Box<Constant>, Selector),
}

impl Constant {
    /// The concrete value, if this constant has been resolved.
    pub fn value(&self) -> Option<u32> {
        match self {
            Constant::Immediate(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Constant::Immediate(v) => write!(f, "0x{:X}", v),
            Constant::SymbolRef(name) => write!(f, "{}", name),
            Constant::Relocation(inner, Selector::Lo) => write!(f, ".lo {}", inner),
            Constant::Relocation(inner, Selector::Hi) => write!(f, ".hi {}", inner),
            Constant::Relocation(inner, Selector::Bytes { first, last }) => {
                write!(f, "{}({}:{})", inner, first, last)
            }
        }
    }
}

/// One variant per instruction format, carrying only what the format encodes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    NoOperand { op: u8 },
    SingleRegister { op: u8, reg: u8 },
    RegisterImmediate { op: u8, reg: u8, imm: Constant },
    RegisterRegisterOffset { op: u8, dst: u8, base: u8, offset: Constant },
    RegisterRegister { op: u8, dst: u8, src: u8 },
    RegisterRegisterRegister { op: u8, dst: u8, src1: u8, src2: u8 },
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        use Instruction::*;
        match *self {
            NoOperand { op }                       |
            SingleRegister { op, .. }              |
            RegisterImmediate { op, .. }           |
            RegisterRegisterOffset { op, .. }      |
            RegisterRegister { op, .. }            |
            RegisterRegisterRegister { op, .. }    => op,
        }
    }

    pub fn constant_mut(&mut self) -> Option<&mut Constant> {
        match self {
            Instruction::RegisterImmediate { imm, .. } => Some(imm),
            Instruction::RegisterRegisterOffset { offset, .. } => Some(offset),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Instruction::*;
        let mnemonic = BISC.opcode_by_code(self.opcode()).map_or("???", |op| op.mnemonic);
        let r = |index: u8| isa::register_name(index);
        match self {
            NoOperand { .. } => write!(f, "{}", mnemonic),
            SingleRegister { reg, .. } => write!(f, "{} {}", mnemonic, r(*reg)),
            RegisterImmediate { reg, imm, .. } => write!(f, "{} {}, {}", mnemonic, r(*reg), imm),
            RegisterRegisterOffset { dst, base, offset, .. } => {
                write!(f, "{} {}, {}[{}]", mnemonic, r(*dst), r(*base), offset)
            }
            RegisterRegister { dst, src, .. } => write!(f, "{} {}, {}", mnemonic, r(*dst), r(*src)),
            RegisterRegisterRegister { dst, src1, src2, .. } => {
                write!(f, "{} {}, {}, {}", mnemonic, r(*dst), r(*src1), r(*src2))
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Data {
    /// Raw bytes from `.string` and `.asciz`.
    Bytes(Vec<u8>),
    /// `.zero N`, kept as a count until code generation.
    Zero(u32),
    /// Little-endian values from `.byte`, `.half` and `.word`.
    Values { width: Width, values: Vec<Constant> },
}

impl Data {
    /// Size in bytes, or `None` if it does not fit in 32 bits.
    pub fn size(&self) -> Option<u32> {
        match self {
            Data::Bytes(bytes) => u32::try_from(bytes.len()).ok(),
            Data::Zero(count) => Some(*count),
            Data::Values { width, values } => {
                u32::try_from(values.len()).ok()?.checked_mul(*width as u32)
            }
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Data::Bytes(bytes) => write!(f, ".bytes [{} bytes]", bytes.len()),
            Data::Zero(count) => write!(f, ".zero {}", count),
            Data::Values { width, values } => {
                let directive = match width {
                    Width::Byte => ".byte",
                    Width::Half => ".half",
                    Width::Word => ".word",
                };
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} {}", directive, values.join(", "))
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BlockItem {
    Label(String),
    Instruction(Instruction),
    Data(Data),
    SectionDirective(String),
    ConstantDefinition { name: String, value: String },
    MacroDefinition { name: String, params: Vec<String> },
}

impl BlockItem {
    /// Bytes this item occupies in its section.
    pub fn size(&self) -> Option<u32> {
        match self {
            BlockItem::Instruction(_) => Some(4),
            BlockItem::Data(data) => data.size(),
            _ => Some(0),
        }
    }

    /// Labels, instructions and data give a section content.
    pub fn is_content(&self) -> bool {
        match self {
            BlockItem::Label(_) | BlockItem::Instruction(_) | BlockItem::Data(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BlockItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockItem::Label(name) => write!(f, "{}:", name),
            BlockItem::Instruction(ins) => write!(f, "    {}", ins),
            BlockItem::Data(data) => write!(f, "    {}", data),
            BlockItem::SectionDirective(name) => write!(f, ".section {}", name),
            BlockItem::ConstantDefinition { name, value } => write!(f, ".define {} {}", name, value),
            BlockItem::MacroDefinition { name, params } => write!(f, ".macro {} {}", name, params.join(", ")),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Item {
    pub node: BlockItem,
    pub line: usize,
    pub column: usize,
    /// Assigned by semantic analysis.
    pub address: u32,
}

impl Item {
    pub fn new(node: BlockItem, line: usize, column: usize) -> Self {
        Item { node, line, column, address: 0 }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Section {
    pub name: String,
    pub items: Vec<Item>,
}

impl Section {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Section { name: name.into(), items: Vec::new() }
    }

    /// Total size, or `None` if it does not fit in 32 bits.
    pub fn size(&self) -> Option<u32> {
        self.items.iter().try_fold(0u32, |total, item| total.checked_add(item.node.size()?))
    }

    /// Address of the first item, valid once addresses are assigned.
    pub fn address(&self) -> u32 {
        self.items.first().map_or(0, |item| item.address)
    }

    pub fn has_content(&self) -> bool {
        self.items.iter().any(|item| item.node.is_content())
    }
}

pub type Program = Vec<Section>;
