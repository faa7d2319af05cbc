//! The Assembler module is in charge of taking a
//! BISC source file and producing an object file.
//!
//! The pipeline runs in order, each stage consuming the previous one's output:
//! lexer, preprocessor, parser (which also expands pseudo-instructions),
//! semantic analysis and code generation.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod isa;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod preprocessor;
pub mod pseudo;
pub mod semantic;

use self::ast::Program;
use self::error::Result;
use self::isa::BISC;
use self::object::ObjectFile;
use self::semantic::SymbolTable;

/// Everything produced by one assembly, kept for listings.
#[derive(Clone, Debug)]
pub struct Build {
    pub program: Program,
    pub symbols: SymbolTable,
    pub object: ObjectFile,
}

/// Runs the whole pipeline over `source`.
pub fn build(source: &str) -> Result<Build> {
    let tokens = preprocessor::preprocess(lexer::tokenize(&BISC, source))?;
    let mut program = parser::parse(&BISC, tokens)?;
    info!("parsed {} section(s)", program.len());

    let symbols = semantic::analyze(&mut program)?;
    let object = codegen::generate(&BISC, &program, &symbols)?;
    Ok(Build { program, symbols, object })
}

/// Assembles `source` into the bytes of an object file.
pub fn assemble(source: &str) -> Result<Vec<u8>> {
    Ok(build(source)?.object.to_bytes())
}

/// Lexes and preprocesses `source`, returning the expanded text.
pub fn preprocess(source: &str) -> Result<String> {
    let tokens = preprocessor::preprocess(lexer::tokenize(&BISC, source))?;
    Ok(lexer::untokenize(&tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::error::ErrorKind;
    use super::isa::LUI;

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    fn text(source: &str) -> Vec<u8> {
        let build = build(source).unwrap();
        let section = build.object.sections.iter().find(|s| s.name == ".text").unwrap();
        section.bytes.clone()
    }

    #[test]
    fn test_single_nop() {
        let bytes = assemble("nop").unwrap();
        assert_eq!(bytes.len(), 16 + 30 + 4);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 1);
        assert_eq!(&bytes[46..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_li_reassembles() {
        for &v in &[0u32, 1, 0xFFFF, 0x1_0000, 0x1234_5678, 0x8000_0000, 0xFFFF_FFFF] {
            let code = text(&format!("li t0, {}", v));
            assert_eq!(code.len(), 8);
            assert_eq!(code[0], 0x10);
            assert_eq!(code[4], LUI);
            assert_eq!((code[1], code[5]), (6, 6));
            let lo = u16::from_le_bytes([code[2], code[3]]) as u32;
            let hi = u16::from_le_bytes([code[6], code[7]]) as u32;
            assert_eq!(hi << 16 | lo, v);
        }
    }

    #[test]
    fn test_forward_call() {
        let code = text("call func\nnop\nfunc: halt\n");
        assert_eq!(code, vec![
            0x10, 1, 16, 0,
            LUI, 1, 0, 0,
            0x0B, 1, 0, 0,
            0x00, 0, 0, 0,
            0x01, 0, 0, 0,
        ]);
    }

    #[test]
    fn test_unresolved_label() {
        let err = assemble("nop\njmp nowhere\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol("nowhere".to_owned()));
    }

    #[test]
    fn test_duplicate_label() {
        let err = assemble("here: nop\nhere: nop\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol("here".to_owned()));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_data_and_text_sections() {
        let source = "\
.data
msg: .byte 1, 2, 3
.text
_start:
    lli r1, msg
    halt
";
        let bytes = assemble(source).unwrap();
        assert_eq!(&bytes[0..4], b"BISC");
        assert_eq!(bytes[4], 0xB1);
        assert_eq!(u32_at(&bytes, 6), 3);
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 2);

        let data = 16;
        assert_eq!(bytes[data + 1], 0x0B);
        assert_eq!(u32_at(&bytes, data + 2), 76);
        assert_eq!(u32_at(&bytes, data + 6), 0);
        assert_eq!(u32_at(&bytes, data + 10), 3);
        assert_eq!(&bytes[data + 14..data + 19], b".data");

        let text = data + 30;
        assert_eq!(bytes[text + 1], 0x1D);
        assert_eq!(u32_at(&bytes, text + 2), 79);
        assert_eq!(u32_at(&bytes, text + 6), 3);
        assert_eq!(u32_at(&bytes, text + 10), 8);

        assert_eq!(&bytes[76..79], &[1, 2, 3]);
        assert_eq!(&bytes[79..], &[0x10, 1, 0, 0, 0x01, 0, 0, 0]);
    }

    #[test]
    fn test_entry_point() {
        let build = build(".data\n.byte 1\n.text\nnop\n").unwrap();
        assert_eq!(build.object.entry, 1);

        let build = super::build(".data\n.byte 1\n").unwrap();
        assert_eq!(build.object.entry, 0);
    }

    #[test]
    fn test_sliced_symbol_operands() {
        assert_eq!(text("x: nop\nli r1, x(0:1)\n"), vec![0, 0, 0, 0, 0x10, 1, 0, 0, LUI, 1, 0, 0]);
        assert_eq!(text("x: nop\ncall x(0:1)\n")[12..], [0x0B, 1, 0, 0]);
    }

    #[test]
    fn test_address_space_overflow() {
        let err = build(".zero 0xFFFFFFFC\na: nop\nb: nop\nlli r1, b\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EncodingRange(_)));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let source = "\
.define BASE 0x100
.macro PUSH2 a, b
push %a
push %b
.endmacro
.text
_start:
    li sp, %BASE
    %PUSH2 t0, t1
    exit 3
";
        let tokens = preprocessor::preprocess(lexer::tokenize(&BISC, source)).unwrap();
        let first = parser::parse(&BISC, tokens.clone()).unwrap();
        let second = parser::parse(&BISC, tokens).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_program() {
        let source = "\
; Sum the bytes of `table` into a0.
.define COUNT 4

.rodata
table: .byte 1, 2, 3, 4

.text
_start:
    li   t0, table
    li   t1, %COUNT
    clr  a0
loop:
    ldb  t2, t0[0]
    add  a0, a0, t2
    inc  t0
    dec  t1
    bnez t1, .lo loop
    exit
";
        let build = build(source).unwrap();
        assert_eq!(build.symbols.address("table"), Some(0));
        assert_eq!(build.symbols.address("_start"), Some(4));
        assert_eq!(build.symbols.address("loop"), Some(4 + 5 * 4));
        assert_eq!(build.object.entry, 4);

        let code = &build.object.sections[1].bytes;
        assert_eq!(code.len(), 11 * 4);
        // clr a0 => xor a0, a0, a0
        assert_eq!(&code[16..20], &[0x37, 2, 2, 2]);
        // bnez t1, .lo loop
        assert_eq!(&code[36..40], &[0x1A, 7, 24, 0]);
    }

    #[test]
    fn test_preprocess_only() {
        let out = preprocess(".define N 2\nlli r1, %N\n").unwrap();
        assert_eq!(out, ". define N 2\nlli r1 , 2\n");
    }
}
