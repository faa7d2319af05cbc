//! Pseudo-instruction matching and template expansion.
//!
//! A pseudo-op names an ordered list of forms. The first form whose operand
//! signature consumes the argument tokens exactly wins, and its template is
//! rendered with the matched operands and re-lexed into real tokens.
use super::isa::{Isa, OperandKind, PseudoForm};
use super::lexer::{tokenize_line, Token, TokenKind};

/// Finds the first form of a pseudo-op that matches `args`.
/// Returns the form together with the source text of each operand.
pub fn match_form<'f>(forms: &'f [PseudoForm], args: &[Token]) -> Option<(&'f PseudoForm, Vec<String>)> {
    forms
        .iter()
        .find_map(|form| match_signature(form.signature, args).map(|operands| (form, operands)))
}

/// Matches `args` against a signature. Operands are separated by exactly one
/// comma and every token must be consumed.
fn match_signature(signature: &[OperandKind], args: &[Token]) -> Option<Vec<String>> {
    let mut operands: Vec<String> = Vec::with_capacity(signature.len());
    let mut pos = 0;

    for (i, kind) in signature.iter().enumerate() {
        if i > 0 {
            if !args.get(pos)?.is(TokenKind::Comma) {
                return None;
            }
            pos += 1;
        }

        let rest = &args[pos..];
        let len = match kind {
            OperandKind::Register => {
                if rest.first()?.is(TokenKind::Register) { 1 } else { return None; }
            }
            OperandKind::Immediate => immediate_len(rest)?,
            OperandKind::Memory => {
                if !rest.first()?.is(TokenKind::Register) || !rest.get(1)?.is(TokenKind::LeftBracket) {
                    return None;
                }
                let n = immediate_len(&rest[2..])?;
                if !rest.get(2 + n)?.is(TokenKind::RightBracket) {
                    return None;
                }
                n + 3
            }
        };

        operands.push(render(&rest[..len]));
        pos += len;
    }

    if pos == args.len() {
        Some(operands)
    } else {
        None
    }
}

/// Length of the immediate-like operand at the start of `args`: a number,
/// or an identifier with an optional `(first:last)` byte slice.
///
/// `.lo`/`.hi` relocations are not immediates here. Every immediate slot
/// ends up in `li`, which applies its own `.lo` and takes the high half
/// with `lui`, so an operand that already selects half a word would nest.
fn immediate_len(args: &[Token]) -> Option<usize> {
    let is = |i: usize, kind: TokenKind| args.get(i).map_or(false, |t| t.is(kind));

    match args.first()?.kind {
        TokenKind::Immediate => Some(1),
        TokenKind::Identifier => {
            let sliced = is(1, TokenKind::LeftParen)
                && is(2, TokenKind::Immediate)
                && is(3, TokenKind::Colon)
                && is(4, TokenKind::Immediate)
                && is(5, TokenKind::RightParen);
            Some(if sliced { 6 } else { 1 })
        }
        _ => None,
    }
}

fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.raw.as_str()).collect::<Vec<_>>().join(" ")
}

/// Renders and re-lexes a matched template. Every produced token carries
/// the pseudo-op's position and one more level of expansion depth, and each
/// template line ends in its own `LineSeparator`.
pub fn expand(isa: &Isa, form: &PseudoForm, operands: &[String], origin: &Token) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::new();

    for line in form.template {
        let mut text = line.to_string();
        for (i, operand) in operands.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), operand);
        }

        let mut tokens = tokenize_line(isa, &text, origin.line);
        tokens.push(Token::new(TokenKind::LineSeparator, "\n", None, origin.line, origin.column));
        for mut tok in tokens {
            tok.column = origin.column;
            tok.depth = origin.depth + 1;
            out.push(tok);
        }
    }

    out
}
