//! The preprocessor expands constants and macros over the flat token stream.
//!
//! ```nasm
//! .define STACK_TOP 0xFF00
//!
//! .macro SWAP a, b
//!     xor %a, %a, %b
//!     xor %b, %a, %b
//!     xor %a, %a, %b
//! .endmacro
//!
//!     li sp, %STACK_TOP
//!     %SWAP t0, t1
//! ```
//!
//! Definitions are collected in a first pass and expanded in a second, so a
//! name may be used before the line that defines it. `.define` lines are left
//! in the stream for the parser to record; macro bodies are removed.
use std::collections::{HashMap, VecDeque};

use super::error::{Error, ErrorKind, Result};
use super::lexer::{Token, TokenKind};

/// Deepest chain of nested expansions before assembly is aborted.
pub const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Clone, Debug)]
struct Macro {
    params: Vec<String>,
    body: Vec<Token>,
}

pub struct Preprocessor {
    constants: HashMap<String, Vec<Token>>,
    macros: HashMap<String, Macro>,
}

/// Runs both preprocessor passes over `tokens`.
pub fn preprocess(tokens: Vec<Token>) -> Result<Vec<Token>> {
    Preprocessor::new().run(tokens)
}

impl Preprocessor {
    pub fn new() -> Self {
        Preprocessor { constants: HashMap::new(), macros: HashMap::new() }
    }

    pub fn run(mut self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        let tokens = self.collect_definitions(tokens)?;
        self.expand(tokens)
    }

    fn collect_definitions(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            match directive_at(&tokens, i).as_deref() {
                Some("define") => {
                    let end = line_end(&tokens, i);
                    let name = definition_name(&tokens, i, "constant name")?;
                    let value: Vec<Token> = tokens[i + 3..end]
                        .iter()
                        .filter(|t| !t.is(TokenKind::Comment))
                        .cloned()
                        .collect();
                    self.check_unique(name)?;
                    debug!("defined constant `{}` on line {}", name.raw, name.line);
                    self.constants.insert(name.raw.clone(), value);

                    out.extend_from_slice(&tokens[i..end]);
                    i = end;
                }
                Some("macro") => {
                    let header_end = line_end(&tokens, i);
                    let name = definition_name(&tokens, i, "macro name")?;
                    let params = macro_params(&tokens[i + 3..header_end])?;

                    let body_start = (header_end + 1).min(tokens.len());
                    let body_end = (body_start..tokens.len())
                        .find(|&k| match directive_at(&tokens, k).as_deref() {
                            Some("endmacro") | Some("endm") => true,
                            _ => false,
                        })
                        .ok_or_else(|| Error::syntax("`.endmacro`", "end of file", name.line, name.column))?;

                    self.check_unique(name)?;
                    debug!("defined macro `{}`({}) on line {}", name.raw, params.join(", "), name.line);
                    self.macros.insert(name.raw.clone(), Macro {
                        params,
                        body: tokens[body_start..body_end].to_vec(),
                    });

                    // Keep the header line, drop the body, resume at `.endmacro`.
                    out.extend_from_slice(&tokens[i..body_start]);
                    i = body_end;
                }
                _ => {
                    out.push(tokens[i].clone());
                    i += 1;
                }
            }
        }

        Ok(out)
    }

    fn check_unique(&self, name: &Token) -> Result<()> {
        if self.constants.contains_key(&name.raw) || self.macros.contains_key(&name.raw) {
            return Err(Error::new(ErrorKind::DuplicateSymbol(name.raw.clone()), name.line, name.column));
        }
        Ok(())
    }

    fn expand(&self, tokens: Vec<Token>) -> Result<Vec<Token>> {
        let mut pending: VecDeque<Token> = tokens.into();
        let mut out: Vec<Token> = Vec::with_capacity(pending.len());

        while let Some(tok) = pending.pop_front() {
            // Definition lines pass through untouched.
            let is_define = tok.is(TokenKind::Directive)
                && pending.front().map_or(false, |t| t.is_word() && t.name() == "define");
            if is_define {
                out.push(tok);
                while let Some(t) = pending.pop_front() {
                    let end = t.is(TokenKind::LineSeparator);
                    out.push(t);
                    if end {
                        break;
                    }
                }
                continue;
            }

            if !tok.is(TokenKind::MacroOp) {
                out.push(tok);
                continue;
            }

            let name = match pending.pop_front() {
                Some(t) if t.is_word() => t,
                Some(t) => return Err(Error::syntax("macro or constant name", t.describe(), t.line, t.column)),
                None => return Err(Error::syntax("macro or constant name", "end of file", tok.line, tok.column)),
            };

            if tok.depth >= MAX_EXPANSION_DEPTH {
                return Err(Error::new(ErrorKind::ExpansionDepth(name.raw), tok.line, tok.column));
            }

            let expansion = if let Some(value) = self.constants.get(&name.raw) {
                trace!("line {}: expanding constant `{}`", tok.line, name.raw);
                value.clone()
            } else if let Some(mac) = self.macros.get(&name.raw) {
                trace!("line {}: expanding macro `{}`", tok.line, name.raw);
                expand_macro(mac, &name, &mut pending)?
            } else {
                return Err(Error::new(ErrorKind::UnresolvedSymbol(name.raw), name.line, name.column));
            };

            for mut t in expansion.into_iter().rev() {
                t.line = tok.line;
                t.column = tok.column;
                t.depth = tok.depth + 1;
                pending.push_front(t);
            }
        }

        Ok(out)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor::new()
    }
}

/// Consumes the arguments of a macro invocation from `pending` and returns
/// a fresh copy of the body with every `%param` replaced.
fn expand_macro(mac: &Macro, name: &Token, pending: &mut VecDeque<Token>) -> Result<Vec<Token>> {
    let mut args: HashMap<&str, Vec<Token>> = HashMap::with_capacity(mac.params.len());

    for (i, param) in mac.params.iter().enumerate() {
        let mut arg: Vec<Token> = Vec::new();
        while let Some(t) = pending.pop_front() {
            match t.kind {
                TokenKind::LineSeparator | TokenKind::Comma => {
                    pending.push_front(t);
                    break;
                }
                TokenKind::Comment => {}
                _ => arg.push(t),
            }
        }

        if arg.is_empty() {
            let found = pending.front().map_or("end of file".to_owned(), Token::describe);
            return Err(Error::syntax(format!("argument `{}` of macro `{}`", param, name.raw), found, name.line, name.column));
        }
        if i + 1 < mac.params.len() {
            match pending.pop_front() {
                Some(ref t) if t.is(TokenKind::Comma) => {}
                Some(t) => return Err(Error::syntax("`,`", t.describe(), t.line, t.column)),
                None => return Err(Error::syntax("`,`", "end of file", name.line, name.column)),
            }
        }
        args.insert(param.as_str(), arg);
    }

    while let Some(t) = pending.pop_front() {
        match t.kind {
            TokenKind::Comment => {}
            TokenKind::LineSeparator => break,
            _ => {
                return Err(Error::syntax(
                    format!("end of line after {} argument(s) of `{}`", mac.params.len(), name.raw),
                    t.describe(),
                    t.line,
                    t.column,
                ))
            }
        }
    }

    let mut body: Vec<Token> = Vec::with_capacity(mac.body.len());
    let mut i = 0;
    while i < mac.body.len() {
        let t = &mac.body[i];
        if t.is(TokenKind::MacroOp) {
            if let Some(arg) = mac.body.get(i + 1).and_then(|p| args.get(p.raw.as_str())) {
                body.extend(arg.iter().cloned());
                i += 2;
                continue;
            }
        }
        body.push(t.clone());
        i += 1;
    }

    Ok(body)
}

/// The lowercased name of the directive starting at `i`, if any.
fn directive_at(tokens: &[Token], i: usize) -> Option<String> {
    match (tokens.get(i), tokens.get(i + 1)) {
        (Some(prefix), Some(name)) if prefix.is(TokenKind::Directive) && name.is_word() => Some(name.name()),
        _ => None,
    }
}

/// Index of the `LineSeparator` ending the line that contains `i`,
/// or the stream length.
fn line_end(tokens: &[Token], i: usize) -> usize {
    (i..tokens.len())
        .find(|&k| tokens[k].is(TokenKind::LineSeparator))
        .unwrap_or_else(|| tokens.len())
}

/// The name following `.define` or `.macro` at `i`.
fn definition_name<'a>(tokens: &'a [Token], i: usize, expected: &str) -> Result<&'a Token> {
    let directive = &tokens[i];
    match tokens.get(i + 2) {
        Some(t) if t.is_word() => Ok(t),
        Some(t) => Err(Error::syntax(expected, t.describe(), t.line, t.column)),
        None => Err(Error::syntax(expected, "end of file", directive.line, directive.column)),
    }
}

/// Parses `p1, p2, ...` up to the end of the header line.
fn macro_params(tokens: &[Token]) -> Result<Vec<String>> {
    let tokens: Vec<&Token> = tokens.iter().filter(|t| !t.is(TokenKind::Comment)).collect();
    let mut params: Vec<String> = Vec::new();

    for (i, t) in tokens.iter().enumerate() {
        let expect_name = i % 2 == 0;
        if expect_name && t.is_word() {
            if params.contains(&t.raw) {
                return Err(Error::new(ErrorKind::DuplicateSymbol(t.raw.clone()), t.line, t.column));
            }
            params.push(t.raw.clone());
        } else if !expect_name && t.is(TokenKind::Comma) {
            continue;
        } else {
            let expected = if expect_name { "parameter name" } else { "`,`" };
            return Err(Error::syntax(expected, t.describe(), t.line, t.column));
        }
    }

    if let Some(last) = tokens.last() {
        if last.is(TokenKind::Comma) {
            return Err(Error::syntax("parameter name", "end of line", last.line, last.column));
        }
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::isa::Isa;
    use crate::assembler::lexer::{tokenize, untokenize};

    fn run(source: &str) -> Result<Vec<Token>> {
        preprocess(tokenize(&Isa::new(), source))
    }

    #[test]
    fn test_constant() {
        let out = run(".define SIZE 16 ; bytes\nlli r1, %SIZE\n").unwrap();
        assert_eq!(untokenize(&out), ". define SIZE 16 ; bytes\nlli r1 , 16\n");

        let imm = out.iter().find(|t| t.is(TokenKind::Immediate) && t.line == 2).unwrap();
        assert_eq!(imm.value, Some(16));
        assert_eq!(imm.depth, 1);
    }

    #[test]
    fn test_nested_constants() {
        let out = run(".word %B\n.define A 0x10\n.define B %A\n").unwrap();
        let first_line: Vec<&Token> = out.iter().take_while(|t| !t.is(TokenKind::LineSeparator)).collect();
        assert_eq!(first_line.len(), 3);
        assert_eq!(first_line[2].value, Some(0x10));
        assert_eq!(first_line[2].depth, 2);
    }

    #[test]
    fn test_macro() {
        let source = "\
.macro SWAP x, y
xor %x, %x, %y
xor %y, %x, %y
xor %x, %x, %y
.endmacro
%SWAP r1, r2 ; swap
nop
";
        let out = run(source).unwrap();
        assert_eq!(
            untokenize(&out),
            ". macro SWAP x , y\n. endmacro\nxor r1 , r1 , r2\nxor r2 , r1 , r2\nxor r1 , r1 , r2\nnop\n"
        );
        assert!(out.iter().filter(|t| t.raw == "xor").all(|t| t.line == 6));
    }

    #[test]
    fn test_macro_uses_constant_and_macro() {
        let source = "\
.define ONE 1
.macro BUMP r
addi %r, %ONE
.endm
.macro TWICE r
%BUMP %r
%BUMP %r
.endm
%TWICE t0
";
        let out = run(source).unwrap();
        assert_eq!(
            untokenize(&out),
            ". define ONE 1\n. macro BUMP r\n. endm\n. macro TWICE r\n. endm\naddi t0 , 1\naddi t0 , 1\n"
        );
    }

    #[test]
    fn test_macro_argument_count() {
        let source = ".macro PAIR a, b\nadd %a, %a, %b\n.endmacro\n";
        let err = run(&format!("{}%PAIR r1\n", source)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax { .. }));
        assert_eq!(err.line, 4);

        let err = run(&format!("{}%PAIR r1, r2, r3\n", source)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax { .. }));
    }

    #[test]
    fn test_duplicates() {
        let err = run(".define A 1\n.define A 2\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol("A".to_owned()));
        assert_eq!(err.line, 2);

        let err = run(".define A 1\n.macro A\nnop\n.endmacro\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol("A".to_owned()));
    }

    #[test]
    fn test_undefined() {
        let err = run("lli r1, %MISSING\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol("MISSING".to_owned()));
        assert_eq!((err.line, err.column), (1, 10));
    }

    #[test]
    fn test_self_reference() {
        let err = run(".define LOOP %LOOP\n.word %LOOP\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExpansionDepth("LOOP".to_owned()));

        let err = run(".macro M\n%M\n.endmacro\n%M\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExpansionDepth("M".to_owned()));
    }

    #[test]
    fn test_missing_endmacro() {
        let err = run(".macro M a\nnop\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax { .. }));
    }
}
