//! This lexer tokenizes BISC assembly.
//!
//! Lexing never fails outright. Anything that cannot be recognized becomes
//! an `Invalid` token, and the first stage that needs it to mean something
//! reports the error.
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::isa::Isa;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*").unwrap());
static NUMBER:     Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?(0[xX][0-9A-Fa-f]+|0[bB][01]+|[0-9]+)").unwrap());
static CHARACTER:  Lazy<Regex> = Lazy::new(|| Regex::new(r"^'(\\.|[^'\\])'").unwrap());
static STRING:     Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"(\\.|[^"\\])*""#).unwrap());

pub const DIRECTIVE_PREFIX: char = '.';
pub const MACRO_OPERATOR: char = '%';

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum TokenKind {
    Opcode,
    PseudoOp,
    Register,
    Immediate,
    Identifier,
    StringLiteral,
    Comma,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Colon,
    Directive,
    MacroOp,
    Comment,
    LineSeparator,
    Invalid,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TokenKind::*;
        let s = match self {
            Opcode        => "opcode",
            PseudoOp      => "pseudo-instruction",
            Register      => "register",
            Immediate     => "numeric literal",
            Identifier    => "identifier",
            StringLiteral => "string literal",
            Comma         => "`,`",
            LeftBracket   => "`[`",
            RightBracket  => "`]`",
            LeftParen     => "`(`",
            RightParen    => "`)`",
            Colon         => "`:`",
            Directive     => "directive",
            MacroOp       => "`%`",
            Comment       => "comment",
            LineSeparator => "end of line",
            Invalid       => "invalid token",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    /// Opcode byte, register index or literal value.
    pub value: Option<u32>,
    pub line: usize,
    pub column: usize,
    /// Number of macro or pseudo-op expansions that produced this token.
    pub depth: usize,
}

impl Token {
    pub fn new<S: Into<String>>(kind: TokenKind, raw: S, value: Option<u32>, line: usize, column: usize) -> Self {
        Token { kind, raw: raw.into(), value, line, column, depth: 0 }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// Identifiers and anything spelled like one (mnemonics, registers).
    /// Directive and macro names may collide with instruction names.
    pub fn is_word(&self) -> bool {
        match self.kind {
            TokenKind::Identifier | TokenKind::Opcode |
            TokenKind::PseudoOp   | TokenKind::Register => true,
            _ => false,
        }
    }

    /// Lowercased spelling, used for case-insensitive lookups.
    pub fn name(&self) -> String {
        self.raw.to_ascii_lowercase()
    }

    /// Human-readable form for diagnostics.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::LineSeparator => "end of line".to_owned(),
            _ => format!("`{}`", self.raw),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            TokenKind::LineSeparator => writeln!(f),
            _ => write!(f, "{}", self.raw),
        }
    }
}

/// Splits source text into tokens, one `LineSeparator` per newline.
pub fn tokenize(isa: &Isa, source: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::with_capacity(source.len() / 2);
    let mut lines = source.split('\n').enumerate().peekable();

    while let Some((index, line)) = lines.next() {
        let line = line.replace('\r', "");
        tokens.append(&mut tokenize_line(isa, &line, index + 1));
        if lines.peek().is_some() {
            tokens.push(Token::new(TokenKind::LineSeparator, "\n", None, index + 1, line.len() + 1));
        }
    }

    debug!("lexer produced {} tokens", tokens.len());
    tokens
}

/// Tokenizes a single line, which must not contain a newline.
pub fn tokenize_line(isa: &Isa, line: &str, line_num: usize) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::new();
    let mut pos = 0;

    while let Some(c) = line[pos..].chars().next() {
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let rest = &line[pos..];
        let (kind, len, value) = match c {
            ';' => (TokenKind::Comment, rest.len(), None),
            ',' => (TokenKind::Comma, 1, None),
            '[' => (TokenKind::LeftBracket, 1, None),
            ']' => (TokenKind::RightBracket, 1, None),
            '(' => (TokenKind::LeftParen, 1, None),
            ')' => (TokenKind::RightParen, 1, None),
            ':' => (TokenKind::Colon, 1, None),
            DIRECTIVE_PREFIX => (TokenKind::Directive, 1, None),
            MACRO_OPERATOR => (TokenKind::MacroOp, 1, None),
            '"' => match STRING.find(rest) {
                Some(m) => (TokenKind::StringLiteral, m.end(), None),
                None => (TokenKind::Invalid, rest.len(), None),
            },
            '\'' => match CHARACTER.find(rest) {
                Some(m) => match tokenize_char(m.as_str()) {
                    Some(v) => (TokenKind::Immediate, m.end(), Some(v)),
                    None => (TokenKind::Invalid, m.end(), None),
                },
                None => (TokenKind::Invalid, invalid_run(rest), None),
            },
            _ => process_token(isa, rest),
        };

        out.push(Token::new(kind, &rest[..len], value, line_num, pos + 1));
        pos += len;
    }

    out
}

/// Classifies a number or word at the start of `rest`.
/// Returns the token kind, its length in bytes and its value.
fn process_token(isa: &Isa, rest: &str) -> (TokenKind, usize, Option<u32>) {
    if let Some(m) = NUMBER.find(rest) {
        let trailing = rest[m.end()..].chars().next();
        if trailing.map_or(true, |c| !is_word_char(c)) {
            return match tokenize_const(m.as_str()) {
                Some(v) => (TokenKind::Immediate, m.end(), Some(v)),
                None => (TokenKind::Invalid, m.end(), None),
            };
        }
        return (TokenKind::Invalid, invalid_run(rest), None);
    }

    if let Some(m) = IDENTIFIER.find(rest) {
        let (kind, value) = classify_word(isa, m.as_str());
        return (kind, m.end(), value);
    }

    (TokenKind::Invalid, invalid_run(rest), None)
}

fn classify_word(isa: &Isa, word: &str) -> (TokenKind, Option<u32>) {
    let lower = word.to_ascii_lowercase();
    if isa.pseudo(&lower).is_some() {
        (TokenKind::PseudoOp, None)
    } else if let Some(op) = isa.opcode(&lower) {
        (TokenKind::Opcode, Some(op.code as u32))
    } else if let Some(index) = isa.register(&lower) {
        (TokenKind::Register, Some(index as u32))
    } else {
        (TokenKind::Identifier, None)
    }
}

/// Parses a numeric literal. Negative values wrap into two's complement.
fn tokenize_const(text: &str) -> Option<u32> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, text),
    };

    let magnitude = if digits.starts_with("0x") || digits.starts_with("0X") {
        u64::from_str_radix(&digits[2..], 16).ok()?
    } else if digits.starts_with("0b") || digits.starts_with("0B") {
        u64::from_str_radix(&digits[2..], 2).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };

    if negative {
        if magnitude > 1 << 31 {
            return None;
        }
        Some((magnitude as u32).wrapping_neg())
    } else if magnitude > u32::MAX as u64 {
        None
    } else {
        Some(magnitude as u32)
    }
}

fn tokenize_char(literal: &str) -> Option<u32> {
    let body = &literal[1..literal.len() - 1];
    match unescape(body) {
        Ok(bytes) if bytes.len() == 1 => Some(bytes[0] as u32),
        _ => None,
    }
}

/// Decodes the escapes `\0 \b \t \n \r \\ \" \'`.
/// Returns the offending escape on failure.
pub fn unescape(body: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let byte = match chars.next() {
            Some('0')  => 0x00,
            Some('b')  => 0x08,
            Some('t')  => b'\t',
            Some('n')  => b'\n',
            Some('r')  => b'\r',
            Some('\\') => b'\\',
            Some('"')  => b'"',
            Some('\'') => b'\'',
            Some(other) => return Err(format!("\\{}", other)),
            None => return Err("\\".to_owned()),
        };
        out.push(byte);
    }

    Ok(out)
}

/// Joins tokens back into source text, one line per `LineSeparator`.
pub fn untokenize(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut line_start = true;
    for tok in tokens {
        if tok.is(TokenKind::LineSeparator) {
            out.push('\n');
            line_start = true;
            continue;
        }
        if !line_start {
            out.push(' ');
        }
        out.push_str(&tok.raw);
        line_start = false;
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Length of a run of unrecognizable characters, up to the next
/// whitespace or punctuation.
fn invalid_run(rest: &str) -> usize {
    let mut chars = rest.char_indices();
    let first = match chars.next() {
        Some((_, c)) => c.len_utf8(),
        None => return 0,
    };
    chars
        .find(|(_, c)| c.is_whitespace() || ",[]():;\"".contains(*c))
        .map_or(rest.len(), |(i, _)| i.max(first))
}
