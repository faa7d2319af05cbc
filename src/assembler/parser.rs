//! The Parser module takes the preprocessed token stream from the lexer
//! and converts it into an AST.
//!
//! Pseudo-instructions are resolved inline: their expansion is pushed back
//! onto the front of the stream and parsed like any other source line.
use std::collections::VecDeque;

use super::ast::*;
use super::error::{Error, ErrorKind, Result};
use super::isa::{Format, Isa};
use super::lexer::{self, unescape, Token, TokenKind};
use super::preprocessor::MAX_EXPANSION_DEPTH;
use super::pseudo;

pub struct Parser<'a> {
    isa: &'a Isa,
    tokens: VecDeque<Token>,
    sections: Program,
    current: Section,
    /// Position of the last consumed token, for errors at end of input.
    last: (usize, usize),
}

impl<'a> Parser<'a> {
    pub fn new(isa: &'a Isa, tokens: Vec<Token>) -> Self {
        Parser {
            isa,
            tokens: tokens.into(),
            sections: Vec::new(),
            current: Section::new(".text"),
            last: (1, 1),
        }
    }

    /// Run the parser, consuming itself and returning the program.
    pub fn run(mut self) -> Result<Program> {
        while let Some(tok) = self.consume() {
            self.block_item(tok)?;
        }

        if self.current.has_content() {
            self.sections.push(self.current);
        }
        Ok(self.sections)
    }

    fn block_item(&mut self, tok: Token) -> Result<()> {
        match tok.kind {
            TokenKind::Comment | TokenKind::LineSeparator => Ok(()),
            TokenKind::Opcode => {
                let ins = self.instruction(&tok)?;
                self.push(BlockItem::Instruction(ins), &tok);
                Ok(())
            }
            TokenKind::PseudoOp => self.pseudo_instruction(tok),
            TokenKind::Identifier => {
                self.expect(TokenKind::Colon)?;
                trace!("line {}: label `{}`", tok.line, tok.raw);
                self.push(BlockItem::Label(tok.raw.clone()), &tok);
                Ok(())
            }
            TokenKind::Directive => self.directive(tok),
            TokenKind::Invalid => Err(lex_error(&tok)),
            _ => Err(Error::syntax("label, instruction or directive", tok.describe(), tok.line, tok.column)),
        }
    }

    /// Parses the operands of a real instruction. `tok` is its mnemonic.
    fn instruction(&mut self, tok: &Token) -> Result<Instruction> {
        let opcode = self.isa.opcode(&tok.name())
            .ok_or_else(|| Error::syntax("opcode", tok.describe(), tok.line, tok.column))?;
        let op = opcode.code;

        let ins = match opcode.format {
            Format::NoOperand => Instruction::NoOperand { op },
            Format::SingleRegister => Instruction::SingleRegister { op, reg: self.register()? },
            Format::RegisterImmediate => {
                let reg = self.register()?;
                self.expect(TokenKind::Comma)?;
                Instruction::RegisterImmediate { op, reg, imm: self.constant()? }
            }
            Format::RegisterRegisterOffset => {
                let dst = self.register()?;
                self.expect(TokenKind::Comma)?;
                let base = self.register()?;
                self.expect(TokenKind::LeftBracket)?;
                let offset = self.constant()?;
                self.expect(TokenKind::RightBracket)?;
                Instruction::RegisterRegisterOffset { op, dst, base, offset }
            }
            Format::RegisterRegister => {
                let dst = self.register()?;
                self.expect(TokenKind::Comma)?;
                Instruction::RegisterRegister { op, dst, src: self.register()? }
            }
            Format::RegisterRegisterRegister => {
                let dst = self.register()?;
                self.expect(TokenKind::Comma)?;
                let src1 = self.register()?;
                self.expect(TokenKind::Comma)?;
                Instruction::RegisterRegisterRegister { op, dst, src1, src2: self.register()? }
            }
        };

        self.end_of_line()?;
        Ok(ins)
    }

    fn pseudo_instruction(&mut self, mut tok: Token) -> Result<()> {
        let isa = self.isa;
        let name = tok.name();

        let mut args: Vec<Token> = Vec::new();
        let mut terminator: Option<Token> = None;
        while let Some(t) = self.consume() {
            match t.kind {
                TokenKind::LineSeparator => {
                    terminator = Some(t);
                    break;
                }
                TokenKind::Comment => {}
                _ => args.push(t),
            }
        }

        let forms = isa.pseudo(&name).unwrap_or(&[]);
        if let Some((form, operands)) = pseudo::match_form(forms, &args) {
            if tok.depth >= MAX_EXPANSION_DEPTH {
                return Err(Error::new(ErrorKind::ExpansionDepth(tok.raw.clone()), tok.line, tok.column));
            }
            let expansion = pseudo::expand(isa, form, &operands, &tok);
            debug!("line {}: {} {} => {}", tok.line, name, operands.join(", "), form.template.join("; "));
            for t in expansion.into_iter().rev() {
                self.tokens.push_front(t);
            }
            return Ok(());
        }

        // No pseudo form matched; the mnemonic may still be a real opcode.
        match isa.opcode(&name) {
            Some(op) => {
                tok.kind = TokenKind::Opcode;
                tok.value = Some(op.code as u32);
                if let Some(t) = terminator {
                    self.tokens.push_front(t);
                }
                for t in args.into_iter().rev() {
                    self.tokens.push_front(t);
                }
                let ins = self.instruction(&tok)?;
                self.push(BlockItem::Instruction(ins), &tok);
                Ok(())
            }
            None => {
                if let Some(bad) = args.iter().find(|t| t.is(TokenKind::Invalid)) {
                    return Err(lex_error(bad));
                }
                let found = if args.is_empty() {
                    "no operands".to_owned()
                } else {
                    format!("`{}`", lexer::untokenize(&args))
                };
                Err(Error::syntax(format!("operands of a form of `{}`", name), found, tok.line, tok.column))
            }
        }
    }

    fn directive(&mut self, prefix: Token) -> Result<()> {
        let name_tok = self.word("directive name")?;
        let name = name_tok.name();

        match name.as_str() {
            "text" | "data" | "rodata" | "bss" => {
                self.start_section(format!(".{}", name), &prefix);
                self.end_of_line()
            }
            "section" => {
                let section = if self.peek_is(TokenKind::Directive) {
                    self.consume();
                    format!(".{}", self.word("section name")?.raw)
                } else {
                    self.word("section name")?.raw
                };
                self.start_section(section, &prefix);
                self.end_of_line()
            }
            "define" => {
                let constant = self.word("constant name")?;
                let mut value: Vec<Token> = Vec::new();
                while let Some(t) = self.consume() {
                    match t.kind {
                        TokenKind::LineSeparator => break,
                        TokenKind::Comment => {}
                        _ => value.push(t),
                    }
                }
                let node = BlockItem::ConstantDefinition { name: constant.raw, value: lexer::untokenize(&value) };
                self.push(node, &prefix);
                Ok(())
            }
            "macro" => {
                let mac = self.word("macro name")?;
                let mut params: Vec<String> = Vec::new();
                if self.tokens.front().map_or(false, Token::is_word) {
                    params.push(self.word("parameter name")?.raw);
                    while self.peek_is(TokenKind::Comma) {
                        self.consume();
                        params.push(self.word("parameter name")?.raw);
                    }
                }
                self.end_of_line()?;
                self.push(BlockItem::MacroDefinition { name: mac.raw, params }, &prefix);
                Ok(())
            }
            "endmacro" | "endm" => self.end_of_line(),
            "byte" => self.values(Width::Byte, &prefix),
            "half" => self.values(Width::Half, &prefix),
            "word" => self.values(Width::Word, &prefix),
            "zero" => {
                let count = self.expect(TokenKind::Immediate)?;
                self.end_of_line()?;
                self.push(BlockItem::Data(Data::Zero(count.value.unwrap_or(0))), &prefix);
                Ok(())
            }
            "string" | "asciz" => {
                let literal = self.expect(TokenKind::StringLiteral)?;
                let body = &literal.raw[1..literal.raw.len() - 1];
                let mut bytes = unescape(body).map_err(|bad| {
                    Error::syntax("escape sequence", format!("`{}`", bad), literal.line, literal.column)
                })?;
                if name == "asciz" {
                    bytes.push(0);
                }
                self.end_of_line()?;
                self.push(BlockItem::Data(Data::Bytes(bytes)), &prefix);
                Ok(())
            }
            _ => Err(Error::syntax("directive", format!("`.{}`", name_tok.raw), name_tok.line, name_tok.column)),
        }
    }

    /// Parses a comma-separated list of constants for `.byte`, `.half` or `.word`.
    fn values(&mut self, width: Width, prefix: &Token) -> Result<()> {
        let mut values = vec![self.constant()?];
        while self.peek_is(TokenKind::Comma) {
            self.consume();
            values.push(self.constant()?);
        }
        self.end_of_line()?;
        self.push(BlockItem::Data(Data::Values { width, values }), prefix);
        Ok(())
    }

    /// Begins a new section. The current one is kept only if it has
    /// content; otherwise its definitions move into the new section.
    fn start_section(&mut self, name: String, at: &Token) {
        debug!("line {}: section `{}`", at.line, name);
        let mut next = Section::new(name.clone());
        next.items.push(Item::new(BlockItem::SectionDirective(name), at.line, at.column));

        let previous = std::mem::replace(&mut self.current, next);
        if previous.has_content() {
            self.sections.push(previous);
        } else {
            self.current.items.extend(
                previous.items.into_iter().filter(|item| match item.node {
                    BlockItem::SectionDirective(_) => false,
                    _ => true,
                }),
            );
        }
    }

    fn register(&mut self) -> Result<u8> {
        let tok = self.expect(TokenKind::Register)?;
        Ok(tok.value.unwrap_or(0) as u8)
    }

    /// Parses an operand constant: a number, a symbol, a byte slice of a
    /// symbol, or a `.lo`/`.hi` relocation of any of those.
    fn constant(&mut self) -> Result<Constant> {
        let tok = self.next_token("constant")?;
        match tok.kind {
            TokenKind::Immediate => Ok(Constant::Immediate(tok.value.unwrap_or(0))),
            TokenKind::Identifier if self.peek_is(TokenKind::LeftParen) => self.byte_slice(tok),
            TokenKind::Identifier => Ok(Constant::SymbolRef(tok.raw)),
            TokenKind::Directive => {
                let selector = self.word("`lo` or `hi`")?;
                let selector = match selector.name().as_str() {
                    "lo" => Selector::Lo,
                    "hi" => Selector::Hi,
                    _ => return Err(Error::syntax("`lo` or `hi`", selector.describe(), selector.line, selector.column)),
                };
                let inner = self.next_token("constant")?;
                let inner = match inner.kind {
                    TokenKind::Immediate => Constant::Immediate(inner.value.unwrap_or(0)),
                    TokenKind::Identifier if self.peek_is(TokenKind::LeftParen) => self.byte_slice(inner)?,
                    TokenKind::Identifier => Constant::SymbolRef(inner.raw),
                    TokenKind::Invalid => return Err(lex_error(&inner)),
                    _ => return Err(Error::syntax("number or symbol", inner.describe(), inner.line, inner.column)),
                };
                Ok(Constant::Relocation(Box::new(inner), selector))
            }
            TokenKind::Invalid => Err(lex_error(&tok)),
            _ => Err(Error::syntax("constant", tok.describe(), tok.line, tok.column)),
        }
    }

    /// Parses `(first:last)` after a symbol name.
    fn byte_slice(&mut self, symbol: Token) -> Result<Constant> {
        self.expect(TokenKind::LeftParen)?;
        let first = self.expect(TokenKind::Immediate)?.value.unwrap_or(0);
        self.expect(TokenKind::Colon)?;
        let last = self.expect(TokenKind::Immediate)?.value.unwrap_or(0);
        self.expect(TokenKind::RightParen)?;

        if first > last || last > 3 || last - first > 1 {
            return Err(Error::new(
                ErrorKind::EncodingRange(format!("byte slice `{}({}:{})` must select one or two bytes of 0-3", symbol.raw, first, last)),
                symbol.line,
                symbol.column,
            ));
        }

        let selector = Selector::Bytes { first: first as u8, last: last as u8 };
        Ok(Constant::Relocation(Box::new(Constant::SymbolRef(symbol.raw)), selector))
    }

    /// An optional comment followed by a line separator or end of input.
    fn end_of_line(&mut self) -> Result<()> {
        if self.peek_is(TokenKind::Comment) {
            self.consume();
        }
        match self.consume() {
            None => Ok(()),
            Some(ref t) if t.is(TokenKind::LineSeparator) => Ok(()),
            Some(t) if t.is(TokenKind::Invalid) => Err(lex_error(&t)),
            Some(t) => Err(Error::syntax("end of line", t.describe(), t.line, t.column)),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let tok = self.next_token(&kind.to_string())?;
        if tok.is(kind) {
            Ok(tok)
        } else if tok.is(TokenKind::Invalid) {
            Err(lex_error(&tok))
        } else {
            Err(Error::syntax(kind.to_string(), tok.describe(), tok.line, tok.column))
        }
    }

    /// A word-like token; directive and macro names may be spelled
    /// like registers or mnemonics.
    fn word(&mut self, expected: &str) -> Result<Token> {
        let tok = self.next_token(expected)?;
        if tok.is_word() {
            Ok(tok)
        } else if tok.is(TokenKind::Invalid) {
            Err(lex_error(&tok))
        } else {
            Err(Error::syntax(expected, tok.describe(), tok.line, tok.column))
        }
    }

    fn next_token(&mut self, expected: &str) -> Result<Token> {
        let (line, column) = self.last;
        self.consume()
            .ok_or_else(|| Error::syntax(expected, "end of file", line, column))
    }

    fn push(&mut self, node: BlockItem, at: &Token) {
        self.current.items.push(Item::new(node, at.line, at.column));
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.tokens.front().map_or(false, |t| t.is(kind))
    }

    /// Pops a token off the input stream and returns it.
    /// Returns None if no tokens are left.
    #[inline]
    fn consume(&mut self) -> Option<Token> {
        let tok = self.tokens.pop_front();
        if let Some(ref t) = tok {
            self.last = (t.line, t.column);
        }
        tok
    }
}

fn lex_error(tok: &Token) -> Error {
    Error::new(ErrorKind::Lex(tok.raw.clone()), tok.line, tok.column)
}

/// Parses a preprocessed token stream into a program.
pub fn parse(isa: &Isa, tokens: Vec<Token>) -> Result<Program> {
    Parser::new(isa, tokens).run()
}
