//! Lookup tables for the BISC instruction set.
//!
//! Every instruction is 32 bits wide and byte 0 is always the opcode.
//! The remaining three bytes are laid out according to one of six formats:
//!
//! ```text
//! NoOperand                 [op, 0,   0,      0     ]
//! SingleRegister            [op, reg, 0,      0     ]
//! RegisterImmediate         [op, reg, imm_lo, imm_hi]
//! RegisterRegisterOffset    [op, dst, base,   offset]
//! RegisterRegister          [op, dst, src,    0     ]
//! RegisterRegisterRegister  [op, dst, src1,   src2  ]
//! ```
//!
//! The tables are shared with the virtual machine, so the numbering here
//! must never change independently of it.
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use self::OperandKind as K;

/// The instruction set tables, built once and shared read-only.
pub static BISC: Lazy<Isa> = Lazy::new(Isa::new);

/// `lui` takes bits 16-31 of its operand instead of bits 0-15.
pub const LUI: u8 = 0x11;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Format {
    NoOperand,
    SingleRegister,
    RegisterImmediate,
    RegisterRegisterOffset,
    RegisterRegister,
    RegisterRegisterRegister,
}

/// Operand slots used by opcode and pseudo-op signatures.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum OperandKind {
    Register,
    /// A number, a symbol or a relocation.
    Immediate,
    /// `register [ constant ]`
    Memory,
}

impl Format {
    pub fn signature(&self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Format::NoOperand                => &[],
            Format::SingleRegister           => &[Register],
            Format::RegisterImmediate        => &[Register, Immediate],
            Format::RegisterRegisterOffset   => &[Register, Memory],
            Format::RegisterRegister         => &[Register, Register],
            Format::RegisterRegisterRegister => &[Register, Register, Register],
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperandKind::Register  => write!(f, "register"),
            OperandKind::Immediate => write!(f, "immediate"),
            OperandKind::Memory    => write!(f, "memory operand"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Opcode {
    pub code: u8,
    pub mnemonic: &'static str,
    pub format: Format,
}

impl Opcode {
    pub fn signature(&self) -> &'static [OperandKind] {
        self.format.signature()
    }
}

/// One way of spelling a pseudo-instruction.
///
/// Template lines are ordinary source lines in which `{n}` stands for the
/// text of the n-th matched operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PseudoForm {
    pub signature: &'static [OperandKind],
    pub template: &'static [&'static str],
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct RegisterDef {
    name: &'static str,
    index: u8,
    valid: bool,
}

const OPCODES: &[Opcode] = &[
    Opcode { code: 0x00, mnemonic: "nop",     format: Format::NoOperand },
    Opcode { code: 0x01, mnemonic: "halt",    format: Format::NoOperand },
    Opcode { code: 0x02, mnemonic: "ret",     format: Format::NoOperand },
    Opcode { code: 0x03, mnemonic: "syscall", format: Format::NoOperand },

    Opcode { code: 0x08, mnemonic: "push",    format: Format::SingleRegister },
    Opcode { code: 0x09, mnemonic: "pop",     format: Format::SingleRegister },
    Opcode { code: 0x0A, mnemonic: "jmp",     format: Format::SingleRegister },
    Opcode { code: 0x0B, mnemonic: "call",    format: Format::SingleRegister },

    Opcode { code: 0x10, mnemonic: "lli",     format: Format::RegisterImmediate },
    Opcode { code: LUI,  mnemonic: "lui",     format: Format::RegisterImmediate },
    Opcode { code: 0x12, mnemonic: "addi",    format: Format::RegisterImmediate },
    Opcode { code: 0x13, mnemonic: "subi",    format: Format::RegisterImmediate },
    Opcode { code: 0x14, mnemonic: "andi",    format: Format::RegisterImmediate },
    Opcode { code: 0x15, mnemonic: "ori",     format: Format::RegisterImmediate },
    Opcode { code: 0x16, mnemonic: "xori",    format: Format::RegisterImmediate },
    Opcode { code: 0x17, mnemonic: "shli",    format: Format::RegisterImmediate },
    Opcode { code: 0x18, mnemonic: "shri",    format: Format::RegisterImmediate },
    Opcode { code: 0x19, mnemonic: "beqz",    format: Format::RegisterImmediate },
    Opcode { code: 0x1A, mnemonic: "bnez",    format: Format::RegisterImmediate },

    Opcode { code: 0x20, mnemonic: "ld",      format: Format::RegisterRegisterOffset },
    Opcode { code: 0x21, mnemonic: "st",      format: Format::RegisterRegisterOffset },
    Opcode { code: 0x22, mnemonic: "ldb",     format: Format::RegisterRegisterOffset },
    Opcode { code: 0x23, mnemonic: "stb",     format: Format::RegisterRegisterOffset },

    Opcode { code: 0x28, mnemonic: "mov",     format: Format::RegisterRegister },
    Opcode { code: 0x29, mnemonic: "not",     format: Format::RegisterRegister },
    Opcode { code: 0x2A, mnemonic: "neg",     format: Format::RegisterRegister },
    Opcode { code: 0x2B, mnemonic: "cmp",     format: Format::RegisterRegister },

    Opcode { code: 0x30, mnemonic: "add",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x31, mnemonic: "sub",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x32, mnemonic: "mul",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x33, mnemonic: "div",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x34, mnemonic: "rem",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x35, mnemonic: "and",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x36, mnemonic: "or",      format: Format::RegisterRegisterRegister },
    Opcode { code: 0x37, mnemonic: "xor",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x38, mnemonic: "shl",     format: Format::RegisterRegisterRegister },
    Opcode { code: 0x39, mnemonic: "shr",     format: Format::RegisterRegisterRegister },
];

const fn reg(name: &'static str, index: u8) -> RegisterDef {
    RegisterDef { name, index, valid: true }
}

const REGISTERS: &[RegisterDef] = &[
    reg("r0", 0),   reg("r1", 1),   reg("r2", 2),   reg("r3", 3),
    reg("r4", 4),   reg("r5", 5),   reg("r6", 6),   reg("r7", 7),
    reg("r8", 8),   reg("r9", 9),   reg("r10", 10), reg("r11", 11),
    reg("r12", 12), reg("r13", 13), reg("r14", 14), reg("r15", 15),

    reg("zero", 0), reg("at", 1),
    reg("a0", 2),   reg("a1", 3),   reg("a2", 4),   reg("a3", 5),
    reg("t0", 6),   reg("t1", 7),   reg("t2", 8),   reg("t3", 9),
    reg("t4", 10),  reg("t5", 11),
    reg("s0", 12),  reg("s1", 13),
    reg("sp", 14),  reg("ra", 15),

    // Hardware-only registers, never addressable from source.
    RegisterDef { name: "pc",    index: 16, valid: false },
    RegisterDef { name: "flags", index: 17, valid: false },
];

const PSEUDO_OPS: &[(&str, PseudoForm)] = &[
    ("li",   PseudoForm { signature: &[K::Register, K::Immediate], template: &["lli {0}, .lo {1}", "lui {0}, {1}"] }),
    ("mov",  PseudoForm { signature: &[K::Register, K::Immediate], template: &["li {0}, {1}"] }),
    ("call", PseudoForm { signature: &[K::Immediate], template: &["li at, {0}", "call at"] }),
    ("jmp",  PseudoForm { signature: &[K::Immediate], template: &["li at, {0}", "jmp at"] }),
    ("goto", PseudoForm { signature: &[K::Immediate], template: &["jmp {0}"] }),
    ("push", PseudoForm { signature: &[K::Immediate], template: &["li at, {0}", "push at"] }),
    ("ld",   PseudoForm { signature: &[K::Register, K::Immediate], template: &["li at, {1}", "ld {0}, at[0]"] }),
    ("st",   PseudoForm { signature: &[K::Register, K::Immediate], template: &["li at, {1}", "st {0}, at[0]"] }),
    ("add",  PseudoForm { signature: &[K::Register, K::Register, K::Immediate], template: &["li at, {2}", "add {0}, {1}, at"] }),
    ("sub",  PseudoForm { signature: &[K::Register, K::Register, K::Immediate], template: &["li at, {2}", "sub {0}, {1}, at"] }),
    ("inc",  PseudoForm { signature: &[K::Register], template: &["addi {0}, 1"] }),
    ("dec",  PseudoForm { signature: &[K::Register], template: &["subi {0}, 1"] }),
    ("clr",  PseudoForm { signature: &[K::Register], template: &["xor {0}, {0}, {0}"] }),
    ("exit", PseudoForm { signature: &[], template: &["halt"] }),
    ("exit", PseudoForm { signature: &[K::Immediate], template: &["li a0, {0}", "halt"] }),
];

/// Opcode, register and pseudo-op lookups.
///
/// Names are stored lowercase; callers are expected to lowercase
/// their input since mnemonics are case-insensitive.
pub struct Isa {
    opcodes:   HashMap<&'static str, Opcode>,
    by_code:   HashMap<u8, Opcode>,
    registers: HashMap<&'static str, u8>,
    pseudo:    HashMap<&'static str, Vec<PseudoForm>>,
}

impl Isa {
    pub fn new() -> Self {
        let mut pseudo: HashMap<&'static str, Vec<PseudoForm>> = HashMap::new();
        for (name, form) in PSEUDO_OPS {
            pseudo.entry(*name).or_default().push(*form);
        }

        Isa {
            opcodes: OPCODES.iter().map(|op| (op.mnemonic, *op)).collect(),
            by_code: OPCODES.iter().map(|op| (op.code, *op)).collect(),
            registers: REGISTERS.iter()
                .filter(|r| r.valid)
                .map(|r| (r.name, r.index))
                .collect(),
            pseudo,
        }
    }

    pub fn opcode(&self, mnemonic: &str) -> Option<&Opcode> {
        self.opcodes.get(mnemonic)
    }

    pub fn opcode_by_code(&self, code: u8) -> Option<&Opcode> {
        self.by_code.get(&code)
    }

    pub fn register(&self, name: &str) -> Option<u8> {
        self.registers.get(name).copied()
    }

    /// Candidate forms of a pseudo-op in declaration order.
    pub fn pseudo(&self, name: &str) -> Option<&[PseudoForm]> {
        self.pseudo.get(name).map(|forms| forms.as_slice())
    }
}

impl Default for Isa {
    fn default() -> Self {
        Isa::new()
    }
}

/// Display name of a register index: `rN`, or `pc`/`flags` for the
/// reserved indices.
pub fn register_name(index: u8) -> String {
    match REGISTERS.iter().find(|r| r.index == index) {
        Some(r) if !r.valid => r.name.to_owned(),
        _ => format!("r{}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lookup() {
        let isa = Isa::new();
        assert_eq!(isa.opcode("nop").map(|op| op.code), Some(0x00));
        assert_eq!(isa.opcode("lui").map(|op| op.code), Some(LUI));
        assert_eq!(isa.opcode("ld").map(|op| op.format), Some(Format::RegisterRegisterOffset));
        assert_eq!(isa.opcode("li"), None);
        assert_eq!(isa.opcode_by_code(0x30).map(|op| op.mnemonic), Some("add"));
        assert_eq!(isa.opcode("add").unwrap().signature().len(), 3);
    }

    #[test]
    fn test_opcodes_unique() {
        let isa = Isa::new();
        assert_eq!(isa.opcodes.len(), OPCODES.len());
        assert_eq!(isa.by_code.len(), OPCODES.len());
    }

    #[test]
    fn test_register_lookup() {
        let isa = Isa::new();
        assert_eq!(isa.register("r0"), Some(0));
        assert_eq!(isa.register("zero"), Some(0));
        assert_eq!(isa.register("r15"), Some(15));
        assert_eq!(isa.register("ra"), Some(15));
        assert_eq!(isa.register("at"), Some(1));
        assert_eq!(isa.register("r16"), None);
        // Reserved registers are not nameable.
        assert_eq!(isa.register("pc"), None);
        assert_eq!(isa.register("flags"), None);
        assert_eq!(register_name(16), "pc");
        assert_eq!(register_name(3), "r3");
    }

    #[test]
    fn test_pseudo_lookup() {
        let isa = Isa::new();
        let exit = isa.pseudo("exit").unwrap();
        assert_eq!(exit.len(), 2);
        assert!(exit[0].signature.is_empty());
        assert_eq!(exit[1].signature, &[OperandKind::Immediate]);
        assert!(isa.pseudo("nop").is_none());
        // Pseudo-ops may share a name with a real opcode.
        assert!(isa.pseudo("call").is_some() && isa.opcode("call").is_some());
    }

    #[test]
    fn test_shared_names_differ_in_signature() {
        let isa = Isa::new();
        for (name, form) in PSEUDO_OPS {
            if let Some(op) = isa.opcode(name) {
                assert_ne!(form.signature, op.signature(), "{} shadows its opcode", name);
            }
        }
    }
}
