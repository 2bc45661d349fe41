//! Byte-oriented tokenizer for Lua 5.4 source.
//!
//! Strings are raw byte sequences with full escape handling; long brackets
//! carry any level of `=` padding. Decimal integer literals that overflow
//! i64 lex as BigInt numerals so the parsed program can keep their exact
//! value.

use phf::phf_map;

use crate::ast::Numeral;
use crate::error_types::{LuaError, LuaResult};
use crate::number;
use crate::value::LuaValue;

/// Token kinds. Keyword and symbol variants carry no payload so they can
/// live in the static keyword table.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    // Keywords.
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // Symbols.
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    Hash,
    Amp,
    Tilde,
    Pipe,
    Shl,
    Shr,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    DoubleColon,
    Semi,
    Colon,
    Comma,
    Dot,
    DotDot,
    Ellipsis,
    // Literals.
    Name(String),
    Number(Numeral),
    Str { bytes: Vec<u8>, long: bool },
    Eof,
}

impl Tok {
    /// Short rendering for "near '...'" error messages.
    pub fn describe(&self) -> String {
        match self {
            Tok::Name(n) => n.clone(),
            Tok::Number(_) => "number".to_string(),
            Tok::Str { .. } => "string".to_string(),
            Tok::Eof => "<eof>".to_string(),
            Tok::And => "and".to_string(),
            Tok::Break => "break".to_string(),
            Tok::Do => "do".to_string(),
            Tok::Else => "else".to_string(),
            Tok::Elseif => "elseif".to_string(),
            Tok::End => "end".to_string(),
            Tok::False => "false".to_string(),
            Tok::For => "for".to_string(),
            Tok::Function => "function".to_string(),
            Tok::Goto => "goto".to_string(),
            Tok::If => "if".to_string(),
            Tok::In => "in".to_string(),
            Tok::Local => "local".to_string(),
            Tok::Nil => "nil".to_string(),
            Tok::Not => "not".to_string(),
            Tok::Or => "or".to_string(),
            Tok::Repeat => "repeat".to_string(),
            Tok::Return => "return".to_string(),
            Tok::Then => "then".to_string(),
            Tok::True => "true".to_string(),
            Tok::Until => "until".to_string(),
            Tok::While => "while".to_string(),
            Tok::Plus => "+".to_string(),
            Tok::Minus => "-".to_string(),
            Tok::Star => "*".to_string(),
            Tok::Slash => "/".to_string(),
            Tok::DoubleSlash => "//".to_string(),
            Tok::Percent => "%".to_string(),
            Tok::Caret => "^".to_string(),
            Tok::Hash => "#".to_string(),
            Tok::Amp => "&".to_string(),
            Tok::Tilde => "~".to_string(),
            Tok::Pipe => "|".to_string(),
            Tok::Shl => "<<".to_string(),
            Tok::Shr => ">>".to_string(),
            Tok::Eq => "==".to_string(),
            Tok::Ne => "~=".to_string(),
            Tok::Le => "<=".to_string(),
            Tok::Ge => ">=".to_string(),
            Tok::Lt => "<".to_string(),
            Tok::Gt => ">".to_string(),
            Tok::Assign => "=".to_string(),
            Tok::LParen => "(".to_string(),
            Tok::RParen => ")".to_string(),
            Tok::LBrace => "{".to_string(),
            Tok::RBrace => "}".to_string(),
            Tok::LBracket => "[".to_string(),
            Tok::RBracket => "]".to_string(),
            Tok::DoubleColon => "::".to_string(),
            Tok::Semi => ";".to_string(),
            Tok::Colon => ":".to_string(),
            Tok::Comma => ",".to_string(),
            Tok::Dot => ".".to_string(),
            Tok::DotDot => "..".to_string(),
            Tok::Ellipsis => "...".to_string(),
        }
    }
}

static KEYWORDS: phf::Map<&'static str, Tok> = phf_map! {
    "and" => Tok::And,
    "break" => Tok::Break,
    "do" => Tok::Do,
    "else" => Tok::Else,
    "elseif" => Tok::Elseif,
    "end" => Tok::End,
    "false" => Tok::False,
    "for" => Tok::For,
    "function" => Tok::Function,
    "goto" => Tok::Goto,
    "if" => Tok::If,
    "in" => Tok::In,
    "local" => Tok::Local,
    "nil" => Tok::Nil,
    "not" => Tok::Not,
    "or" => Tok::Or,
    "repeat" => Tok::Repeat,
    "return" => Tok::Return,
    "then" => Tok::Then,
    "true" => Tok::True,
    "until" => Tok::Until,
    "while" => Tok::While,
};

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer<'a> {
    input: &'a [u8],
    chunk: &'a str,
    pos: usize,
    line: u32,
    line_start: usize,
}

/// Tokenize a whole chunk, ending with an `Eof` token.
pub fn tokenize(source: &str, chunk: &str) -> LuaResult<Vec<Token>> {
    let mut lexer = Lexer::new(source, chunk);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.tok == Tok::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, chunk: &'a str) -> Self {
        Lexer { input: source.as_bytes(), chunk, pos: 0, line: 1, line_start: 0 }
    }

    fn error(&self, message: impl Into<String>) -> LuaError {
        LuaError::syntax(self.chunk, self.line, message)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn column(&self) -> u32 {
        (self.pos - self.line_start) as u32 + 1
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> LuaResult<()> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c) => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.bump();
                    self.bump();
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_bracket(level)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If the cursor sits on a long-bracket opener `[=*[`, return its level
    /// and consume the opener.
    fn long_bracket_level(&mut self) -> Option<usize> {
        debug_assert_eq!(self.peek(), Some(b'['));
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) == Some(b'[') {
            for _ in 0..level + 2 {
                self.bump();
            }
            Some(level)
        } else {
            None
        }
    }

    /// Body of a long string/comment after its opener; ends at `]=*]` of the
    /// same level. A leading newline is skipped.
    fn read_long_bracket(&mut self, level: usize) -> LuaResult<Vec<u8>> {
        if self.peek() == Some(b'\r') {
            self.bump();
            self.eat(b'\n');
        } else if self.peek() == Some(b'\n') {
            self.bump();
        }
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unfinished long string")),
                Some(b']') => {
                    let mut close = 0;
                    while self.peek_at(1 + close) == Some(b'=') {
                        close += 1;
                    }
                    if close == level && self.peek_at(1 + close) == Some(b']') {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(bytes);
                    }
                    bytes.push(b']');
                    self.bump();
                }
                Some(c) => {
                    bytes.push(c);
                    self.bump();
                }
            }
        }
    }

    fn read_short_string(&mut self, quote: u8) -> LuaResult<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let c = match self.bump() {
                None => return Err(self.error("unfinished string")),
                Some(c) => c,
            };
            if c == quote {
                return Ok(bytes);
            }
            match c {
                b'\n' => return Err(self.error("unfinished string")),
                b'\\' => {
                    let esc = self.bump().ok_or_else(|| self.error("unfinished string"))?;
                    match esc {
                        b'a' => bytes.push(0x07),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0c),
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'v' => bytes.push(0x0b),
                        b'\\' => bytes.push(b'\\'),
                        b'"' => bytes.push(b'"'),
                        b'\'' => bytes.push(b'\''),
                        b'\n' => bytes.push(b'\n'),
                        b'\r' => {
                            bytes.push(b'\n');
                            self.eat(b'\n');
                        }
                        b'x' => {
                            let mut value: u32 = 0;
                            for _ in 0..2 {
                                let d = self
                                    .bump()
                                    .and_then(|c| (c as char).to_digit(16))
                                    .ok_or_else(|| self.error("hexadecimal digit expected"))?;
                                value = value * 16 + d;
                            }
                            bytes.push(value as u8);
                        }
                        b'z' => {
                            while matches!(
                                self.peek(),
                                Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
                            ) {
                                self.bump();
                            }
                        }
                        b'u' => {
                            if !self.eat(b'{') {
                                return Err(self.error("missing '{' in \\u{xxxx}"));
                            }
                            let mut value: u32 = 0;
                            let mut any = false;
                            while let Some(c) = self.peek() {
                                match (c as char).to_digit(16) {
                                    Some(d) => {
                                        any = true;
                                        value = value
                                            .checked_mul(16)
                                            .and_then(|v| v.checked_add(d))
                                            .ok_or_else(|| {
                                                self.error("UTF-8 value too large")
                                            })?;
                                        self.bump();
                                    }
                                    None => break,
                                }
                            }
                            if !any {
                                return Err(self.error("hexadecimal digit expected"));
                            }
                            if !self.eat(b'}') {
                                return Err(self.error("missing '}' in \\u{xxxx}"));
                            }
                            let ch = char::from_u32(value)
                                .ok_or_else(|| self.error("UTF-8 value too large"))?;
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                        b'0'..=b'9' => {
                            let mut value: u32 = (esc - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(c) if c.is_ascii_digit() => {
                                        value = value * 10 + (c - b'0') as u32;
                                        self.bump();
                                    }
                                    _ => break,
                                }
                            }
                            if value > 255 {
                                return Err(self.error("decimal escape too large"));
                            }
                            bytes.push(value as u8);
                        }
                        other => {
                            return Err(self.error(format!(
                                "invalid escape sequence '\\{}'",
                                other as char
                            )));
                        }
                    }
                }
                _ => bytes.push(c),
            }
        }
    }

    fn read_number(&mut self) -> LuaResult<Numeral> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'));
        if hex {
            self.bump();
            self.bump();
        }
        while let Some(c) = self.peek() {
            let exponent = if hex { c == b'p' || c == b'P' } else { c == b'e' || c == b'E' };
            if exponent {
                self.bump();
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.bump();
                }
                continue;
            }
            if c.is_ascii_alphanumeric() || c == b'.' {
                self.bump();
                continue;
            }
            break;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("malformed number"))?;
        match number::parse_lua_number(text) {
            Some(LuaValue::Integer(i)) => Ok(Numeral::Int(i)),
            Some(LuaValue::Float(f)) => Ok(Numeral::Float(f)),
            Some(LuaValue::BigInt(b)) => Ok(Numeral::Big(b.to_string())),
            _ => Err(self.error(format!("malformed number near '{}'", text))),
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    pub fn next_token(&mut self) -> LuaResult<Token> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let column = self.column();
        let make = |tok| Token { tok, line, column };

        let c = match self.peek() {
            None => return Ok(make(Tok::Eof)),
            Some(c) => c,
        };

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            return Ok(make(Tok::Number(self.read_number()?)));
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let name = self.read_name();
            return Ok(match KEYWORDS.get(name.as_str()) {
                Some(keyword) => make(keyword.clone()),
                None => make(Tok::Name(name)),
            });
        }
        if c == b'"' || c == b'\'' {
            self.bump();
            let bytes = self.read_short_string(c)?;
            return Ok(make(Tok::Str { bytes, long: false }));
        }
        if c == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let bytes = self.read_long_bracket(level)?;
                return Ok(make(Tok::Str { bytes, long: true }));
            }
            self.bump();
            return Ok(make(Tok::LBracket));
        }

        self.bump();
        let tok = match c {
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'/' => {
                if self.eat(b'/') {
                    Tok::DoubleSlash
                } else {
                    Tok::Slash
                }
            }
            b'%' => Tok::Percent,
            b'^' => Tok::Caret,
            b'#' => Tok::Hash,
            b'&' => Tok::Amp,
            b'~' => {
                if self.eat(b'=') {
                    Tok::Ne
                } else {
                    Tok::Tilde
                }
            }
            b'|' => Tok::Pipe,
            b'<' => {
                if self.eat(b'=') {
                    Tok::Le
                } else if self.eat(b'<') {
                    Tok::Shl
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    Tok::Ge
                } else if self.eat(b'>') {
                    Tok::Shr
                } else {
                    Tok::Gt
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    Tok::Eq
                } else {
                    Tok::Assign
                }
            }
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'{' => Tok::LBrace,
            b'}' => Tok::RBrace,
            b']' => Tok::RBracket,
            b';' => Tok::Semi,
            b':' => {
                if self.eat(b':') {
                    Tok::DoubleColon
                } else {
                    Tok::Colon
                }
            }
            b',' => Tok::Comma,
            b'.' => {
                if self.eat(b'.') {
                    if self.eat(b'.') {
                        Tok::Ellipsis
                    } else {
                        Tok::DotDot
                    }
                } else {
                    Tok::Dot
                }
            }
            other => {
                return Err(self.error(format!(
                    "unexpected symbol near '{}'",
                    (other as char).escape_default()
                )));
            }
        };
        Ok(make(tok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source, "lex").unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_keywords_and_names() {
        assert_eq!(
            toks("local x = nil"),
            vec![Tok::Local, Tok::Name("x".into()), Tok::Assign, Tok::Nil, Tok::Eof]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("42")[0], Tok::Number(Numeral::Int(42)));
        assert_eq!(toks("3.5")[0], Tok::Number(Numeral::Float(3.5)));
        assert_eq!(toks("0xFF")[0], Tok::Number(Numeral::Int(255)));
        assert_eq!(toks("1e2")[0], Tok::Number(Numeral::Float(100.0)));
        assert_eq!(toks("0x1p4")[0], Tok::Number(Numeral::Float(16.0)));
        assert_eq!(toks(".5")[0], Tok::Number(Numeral::Float(0.5)));
    }

    #[test]
    fn test_bigint_literal() {
        match &toks("18446744073709551615")[0] {
            Tok::Number(Numeral::Big(digits)) => assert_eq!(digits, "18446744073709551615"),
            other => panic!("expected BigInt numeral, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_number() {
        assert!(tokenize("0x", "lex").is_err());
        assert!(tokenize("5..2", "lex").is_err());
    }

    #[test]
    fn test_string_escapes() {
        match &toks(r#""a\110\x62\u{63}\z   d""#)[0] {
            Tok::Str { bytes, .. } => assert_eq!(bytes, b"anbcd"),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_long_string_levels() {
        match &toks("[==[line]]==]")[0] {
            Tok::Str { bytes, long } => {
                assert!(*long);
                assert_eq!(bytes, b"line]]");
            }
            other => panic!("expected long string, got {:?}", other),
        }
        // Leading newline is dropped.
        match &toks("[[\nbody]]")[0] {
            Tok::Str { bytes, .. } => assert_eq!(bytes, b"body"),
            other => panic!("expected long string, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            toks("a -- line comment\n--[[ long\ncomment ]] b"),
            vec![Tok::Name("a".into()), Tok::Name("b".into()), Tok::Eof]
        );
    }

    #[test]
    fn test_multibyte_symbols() {
        assert_eq!(
            toks("<< >> <= >= == ~= // .. ... ::"),
            vec![
                Tok::Shl,
                Tok::Shr,
                Tok::Le,
                Tok::Ge,
                Tok::Eq,
                Tok::Ne,
                Tok::DoubleSlash,
                Tok::DotDot,
                Tok::Ellipsis,
                Tok::DoubleColon,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let tokens = tokenize("a\nb\n  c", "lex").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 3);
        assert_eq!(tokens[2].column, 3);
    }

    #[test]
    fn test_unfinished_string() {
        assert!(tokenize("'abc", "lex").is_err());
        assert!(tokenize("'ab\nc'", "lex").is_err());
        assert!(tokenize("[[abc", "lex").is_err());
    }
}
