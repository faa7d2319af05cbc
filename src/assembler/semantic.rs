//! Semantic analysis: address assignment and symbol resolution.
//!
//! Runs in two passes over the parsed program. The first assigns every item
//! an address from one counter shared by all sections and records labels.
//! The second rewrites every symbol reference into an immediate.
use std::collections::BTreeMap;

use super::ast::*;
use super::error::{Error, ErrorKind, Result};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Symbol {
    pub address: u32,
    /// Line of the defining label.
    pub line: usize,
}

/// Label addresses, ordered by name.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    symbols: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { symbols: BTreeMap::new() }
    }

    /// Records a label. Fails if the name is already taken.
    pub fn insert(&mut self, name: &str, symbol: Symbol, column: usize) -> Result<()> {
        if self.symbols.contains_key(name) {
            return Err(Error::new(ErrorKind::DuplicateSymbol(name.to_owned()), symbol.line, column));
        }
        self.symbols.insert(name.to_owned(), symbol);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn address(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).map(|s| s.address)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Symbol)> {
        self.symbols.iter()
    }
}

/// Assigns addresses, builds the symbol table and resolves every constant
/// in `program` in place.
pub fn analyze(program: &mut Program) -> Result<SymbolTable> {
    let symbols = assign_addresses(program)?;
    debug!("symbol table holds {} labels", symbols.len());

    for section in program.iter_mut() {
        for item in section.items.iter_mut() {
            let (line, column) = (item.line, item.column);
            match &mut item.node {
                BlockItem::Instruction(ins) => {
                    if let Some(constant) = ins.constant_mut() {
                        resolve_in_place(constant, &symbols, line, column)?;
                    }
                }
                BlockItem::Data(Data::Values { values, .. }) => {
                    for constant in values.iter_mut() {
                        resolve_in_place(constant, &symbols, line, column)?;
                    }
                }
                _ => {}
            }
        }
    }

    Ok(symbols)
}

fn assign_addresses(program: &mut Program) -> Result<SymbolTable> {
    let mut symbols = SymbolTable::new();
    // One past the last byte placed so far; may reach 2^32 exactly.
    let mut next: u64 = 0;

    for section in program.iter_mut() {
        trace!("section `{}` starts at 0x{:08X}", section.name, next);
        for item in section.items.iter_mut() {
            let end = item.node.size().map(|size| next + size as u64);
            let address = match end {
                Some(end) if next <= u32::MAX as u64 && end <= 1 << 32 => next as u32,
                _ => {
                    let msg = format!("`{}` does not fit below address 0x1_0000_0000", item.node.to_string().trim());
                    return Err(Error::new(ErrorKind::EncodingRange(msg), item.line, item.column));
                }
            };

            item.address = address;
            if let BlockItem::Label(name) = &item.node {
                trace!("label `{}` = 0x{:08X}", name, address);
                symbols.insert(name, Symbol { address, line: item.line }, item.column)?;
            }
            next = end.unwrap_or(next);
        }
    }

    Ok(symbols)
}

fn resolve_in_place(constant: &mut Constant, symbols: &SymbolTable, line: usize, column: usize) -> Result<()> {
    let value = resolve(constant, symbols, line, column)?;
    *constant = Constant::Immediate(value);
    Ok(())
}

/// Computes the value of a constant.
pub fn resolve(constant: &Constant, symbols: &SymbolTable, line: usize, column: usize) -> Result<u32> {
    match constant {
        Constant::Immediate(v) => Ok(*v),
        Constant::SymbolRef(name) => symbols
            .address(name)
            .ok_or_else(|| Error::new(ErrorKind::UnresolvedSymbol(name.clone()), line, column)),
        Constant::Relocation(inner, selector) => {
            // Only a byte slice may sit under `.lo`/`.hi`; the slice is applied first.
            let nested = match (&**inner, selector) {
                (Constant::Relocation(_, Selector::Bytes { .. }), Selector::Lo) |
                (Constant::Relocation(_, Selector::Bytes { .. }), Selector::Hi) => false,
                (Constant::Relocation(..), _) => true,
                _ => false,
            };
            if nested {
                return Err(Error::syntax("number or symbol", format!("`{}`", inner), line, column));
            }
            Ok(selector.apply(resolve(inner, symbols, line, column)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::isa::Isa;
    use crate::assembler::lexer::tokenize;
    use crate::assembler::parser::parse;
    use crate::assembler::preprocessor::preprocess;

    fn program(source: &str) -> Program {
        let isa = Isa::new();
        parse(&isa, preprocess(tokenize(&isa, source)).unwrap()).unwrap()
    }

    fn immediates(program: &Program) -> Vec<u32> {
        program.iter()
            .flat_map(|s| s.items.iter())
            .filter_map(|item| match &item.node {
                BlockItem::Instruction(Instruction::RegisterImmediate { imm, .. }) => imm.value(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_addresses() {
        let mut p = program("\
.data
a: .byte 1, 2, 3
b: .half 4
.text
start: nop
end:
");
        let symbols = analyze(&mut p).unwrap();
        assert_eq!(symbols.address("a"), Some(0));
        assert_eq!(symbols.address("b"), Some(3));
        assert_eq!(symbols.address("start"), Some(5));
        assert_eq!(symbols.address("end"), Some(9));
        assert_eq!(symbols.get("end").unwrap().line, 6);
        assert_eq!(p[1].address(), 5);
        assert_eq!(p[0].size().unwrap() + p[1].size().unwrap(), 9);
    }

    #[test]
    fn test_forward_reference() {
        let mut p = program("lli r1, later\nnop\nlater: halt\n");
        analyze(&mut p).unwrap();
        assert_eq!(immediates(&p), vec![8]);
    }

    #[test]
    fn test_relocations() {
        let mut p = program("\
lli r1, .lo target
lli r2, .hi target
lli r3, target(0:0)
lli r4, .hi 0xABCD1234
.zero 0x12340
target:
");
        let symbols = analyze(&mut p).unwrap();
        assert_eq!(symbols.address("target"), Some(0x1_2350));
        assert_eq!(immediates(&p), vec![0x2350, 0x1, 0x50, 0xABCD]);
    }

    #[test]
    fn test_data_values() {
        let mut p = program(".data\nptr: .word ptr, .hi ptr, 7\n");
        analyze(&mut p).unwrap();
        assert_eq!(p[0].items[2].node, BlockItem::Data(Data::Values {
            width: Width::Word,
            values: vec![Constant::Immediate(0), Constant::Immediate(0), Constant::Immediate(7)],
        }));
    }

    #[test]
    fn test_duplicate_label() {
        let mut p = program("dup: nop\n  dup: nop\n");
        let err = analyze(&mut p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol("dup".to_owned()));
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_unresolved() {
        let mut p = program("nop\njmp nowhere\n");
        let err = analyze(&mut p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol("nowhere".to_owned()));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_address_space_overflow() {
        let mut p = program(".zero 0xFFFFFFFC\na: nop\nb: nop\nlli r1, b\n");
        let err = analyze(&mut p).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EncodingRange(_)));
        assert_eq!(err.line, 3);

        // The last word of the address space is still usable.
        let mut p = program(".zero 0xFFFFFFFC\nlast: nop\n");
        let symbols = analyze(&mut p).unwrap();
        assert_eq!(symbols.address("last"), Some(0xFFFF_FFFC));
    }

    #[test]
    fn test_relocation_of_slice() {
        let mut p = program("lli r1, .lo table(1:2)\nlli r2, .hi table(0:1)\n.zero 0x1230\ntable:\n");
        analyze(&mut p).unwrap();
        assert_eq!(immediates(&p), vec![0x12, 0]);
    }

    #[test]
    fn test_nested_relocation_rejected() {
        let symbols = SymbolTable::new();
        let nested = Constant::Relocation(
            Box::new(Constant::Relocation(Box::new(Constant::Immediate(1)), Selector::Lo)),
            Selector::Hi,
        );
        let err = resolve(&nested, &symbols, 1, 1).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax { .. }));
    }
}
