// Hand-written lexer. Operates on bytes; Lua sources are byte strings.

use crate::compiler::token::Tok;
use crate::value::{parse_number, ParsedNumber};
use crate::vm::SyntaxError;

pub struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    pub line: u32,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s [u8]) -> Self {
        let mut lex = Lexer { src, pos: 0, line: 1 };
        // skip a shebang line, as the reference lexer does for `lua file`
        if lex.src.starts_with(b"#") {
            while let Some(b) = lex.peek() {
                if b == b'\n' {
                    break;
                }
                lex.pos += 1;
            }
        }
        lex
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    #[inline]
    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line: self.line,
            message: message.into(),
        }
    }

    /// Next token plus the line it started on.
    pub fn next_token(&mut self) -> Result<(Tok, u32), SyntaxError> {
        loop {
            let b = match self.peek() {
                None => return Ok((Tok::Eof, self.line)),
                Some(b) => b,
            };
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'-' if self.peek2() == Some(b'-') => {
                    self.pos += 2;
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_string(level)?;
                            continue;
                        }
                    }
                    // line comment
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let line = self.line;
        let tok = self.scan()?;
        Ok((tok, line))
    }

    fn scan(&mut self) -> Result<Tok, SyntaxError> {
        let b = match self.peek() {
            None => return Ok(Tok::Eof),
            Some(b) => b,
        };
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let name = std::str::from_utf8(&self.src[start..self.pos])
                    .map_err(|_| self.error("invalid identifier"))?;
                Ok(Tok::keyword(name).unwrap_or_else(|| Tok::Name(name.to_string())))
            }
            b'0'..=b'9' => self.read_number(),
            b'.' => {
                if self.peek2().is_some_and(|c| c.is_ascii_digit()) {
                    return self.read_number();
                }
                self.pos += 1;
                if self.peek() == Some(b'.') {
                    self.pos += 1;
                    if self.peek() == Some(b'.') {
                        self.pos += 1;
                        Ok(Tok::Ellipsis)
                    } else {
                        Ok(Tok::Concat)
                    }
                } else {
                    Ok(Tok::Dot)
                }
            }
            b'"' | b'\'' => self.read_short_string(b),
            b'[' => {
                if let Some(level) = self.long_bracket_level() {
                    let bytes = self.read_long_string(level)?;
                    Ok(Tok::Str(bytes))
                } else {
                    self.pos += 1;
                    Ok(Tok::LBracket)
                }
            }
            b'=' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Ok(Tok::Eq)
                } else {
                    Ok(Tok::Assign)
                }
            }
            b'~' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Ok(Tok::Ne)
                } else {
                    Ok(Tok::Tilde)
                }
            }
            b'<' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.pos += 1;
                        Ok(Tok::Le)
                    }
                    Some(b'<') => {
                        self.pos += 1;
                        Ok(Tok::Shl)
                    }
                    _ => Ok(Tok::Lt),
                }
            }
            b'>' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.pos += 1;
                        Ok(Tok::Ge)
                    }
                    Some(b'>') => {
                        self.pos += 1;
                        Ok(Tok::Shr)
                    }
                    _ => Ok(Tok::Gt),
                }
            }
            b'/' => {
                self.pos += 1;
                if self.peek() == Some(b'/') {
                    self.pos += 1;
                    Ok(Tok::DSlash)
                } else {
                    Ok(Tok::Slash)
                }
            }
            b':' => {
                self.pos += 1;
                if self.peek() == Some(b':') {
                    self.pos += 1;
                    Ok(Tok::DColon)
                } else {
                    Ok(Tok::Colon)
                }
            }
            b'+' => {
                self.pos += 1;
                Ok(Tok::Plus)
            }
            b'-' => {
                self.pos += 1;
                Ok(Tok::Minus)
            }
            b'*' => {
                self.pos += 1;
                Ok(Tok::Star)
            }
            b'%' => {
                self.pos += 1;
                Ok(Tok::Percent)
            }
            b'^' => {
                self.pos += 1;
                Ok(Tok::Caret)
            }
            b'#' => {
                self.pos += 1;
                Ok(Tok::Hash)
            }
            b'&' => {
                self.pos += 1;
                Ok(Tok::Amp)
            }
            b'|' => {
                self.pos += 1;
                Ok(Tok::Pipe)
            }
            b'(' => {
                self.pos += 1;
                Ok(Tok::LParen)
            }
            b')' => {
                self.pos += 1;
                Ok(Tok::RParen)
            }
            b'{' => {
                self.pos += 1;
                Ok(Tok::LBrace)
            }
            b'}' => {
                self.pos += 1;
                Ok(Tok::RBrace)
            }
            b']' => {
                self.pos += 1;
                Ok(Tok::RBracket)
            }
            b';' => {
                self.pos += 1;
                Ok(Tok::Semi)
            }
            b',' => {
                self.pos += 1;
                Ok(Tok::Comma)
            }
            other => Err(self.error(format!(
                "unexpected symbol near '{}'",
                (other as char).escape_default()
            ))),
        }
    }

    fn read_number(&mut self) -> Result<Tok, SyntaxError> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0')
            && matches!(self.peek2(), Some(b'x') | Some(b'X'));
        if hex {
            self.pos += 2;
        }
        let exp_chars: &[u8] = if hex { b"pP" } else { b"eE" };
        while let Some(c) = self.peek() {
            let ok = c.is_ascii_digit()
                || c == b'.'
                || exp_chars.contains(&c)
                || (hex && c.is_ascii_hexdigit())
                || ((c == b'+' || c == b'-')
                    && self.pos > start
                    && exp_chars.contains(&self.src[self.pos - 1]));
            if ok {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("malformed number"))?;
        match parse_number(text) {
            Some(ParsedNumber::Int(i)) => Ok(Tok::Int(i)),
            Some(ParsedNumber::Float(f)) => Ok(Tok::Float(f)),
            None => Err(self.error(format!("malformed number near '{}'", text))),
        }
    }

    fn read_short_string(&mut self, quote: u8) -> Result<Tok, SyntaxError> {
        self.pos += 1; // opening quote
        let mut out: Vec<u8> = Vec::new();
        loop {
            let b = self
                .bump()
                .ok_or_else(|| self.error("unfinished string"))?;
            match b {
                b if b == quote => break,
                b'\n' => return Err(self.error("unfinished string")),
                b'\\' => {
                    let e = self
                        .bump()
                        .ok_or_else(|| self.error("unfinished string"))?;
                    match e {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(7),
                        b'b' => out.push(8),
                        b'f' => out.push(12),
                        b'v' => out.push(11),
                        b'\\' => out.push(b'\\'),
                        b'"' => out.push(b'"'),
                        b'\'' => out.push(b'\''),
                        b'\n' => out.push(b'\n'),
                        b'x' => {
                            let mut v: u32 = 0;
                            for _ in 0..2 {
                                let d = self
                                    .bump()
                                    .and_then(|c| (c as char).to_digit(16))
                                    .ok_or_else(|| {
                                        self.error("hexadecimal digit expected")
                                    })?;
                                v = v * 16 + d;
                            }
                            out.push(v as u8);
                        }
                        b'z' => {
                            while let Some(c) = self.peek() {
                                if c.is_ascii_whitespace() {
                                    self.bump();
                                } else {
                                    break;
                                }
                            }
                        }
                        b'u' => {
                            if self.bump() != Some(b'{') {
                                return Err(self.error("missing '{' in \\u{xxxx}"));
                            }
                            let mut v: u32 = 0;
                            loop {
                                let c = self
                                    .bump()
                                    .ok_or_else(|| self.error("unfinished string"))?;
                                if c == b'}' {
                                    break;
                                }
                                let d = (c as char)
                                    .to_digit(16)
                                    .ok_or_else(|| self.error("hexadecimal digit expected"))?;
                                v = v
                                    .checked_mul(16)
                                    .and_then(|x| x.checked_add(d))
                                    .ok_or_else(|| self.error("UTF-8 value too large"))?;
                            }
                            push_utf8(&mut out, v);
                        }
                        d if d.is_ascii_digit() => {
                            let mut v: u32 = (d - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(c) if c.is_ascii_digit() => {
                                        v = v * 10 + (c - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if v > 255 {
                                return Err(self.error("decimal escape too large"));
                            }
                            out.push(v as u8);
                        }
                        other => {
                            return Err(self.error(format!(
                                "invalid escape sequence '\\{}'",
                                other as char
                            )))
                        }
                    }
                }
                other => out.push(other),
            }
        }
        Ok(Tok::Str(out))
    }

    /// At a '[': Some(level) when `[=*[` starts a long bracket.
    fn long_bracket_level(&self) -> Option<usize> {
        debug_assert_eq!(self.peek(), Some(b'['));
        let mut i = self.pos + 1;
        let mut level = 0;
        while self.src.get(i) == Some(&b'=') {
            level += 1;
            i += 1;
        }
        if self.src.get(i) == Some(&b'[') {
            Some(level)
        } else {
            None
        }
    }

    fn read_long_string(&mut self, level: usize) -> Result<Vec<u8>, SyntaxError> {
        // skip [=*[
        self.pos += 2 + level;
        // a newline immediately after the opening bracket is dropped
        if self.peek() == Some(b'\r') {
            self.bump();
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
        } else if self.peek() == Some(b'\n') {
            self.bump();
        }
        let mut out: Vec<u8> = Vec::new();
        loop {
            let b = self
                .bump()
                .ok_or_else(|| self.error("unfinished long string"))?;
            if b == b']' {
                let mut i = self.pos;
                let mut eq = 0;
                while self.src.get(i) == Some(&b'=') {
                    eq += 1;
                    i += 1;
                }
                if eq == level && self.src.get(i) == Some(&b']') {
                    self.pos = i + 1;
                    return Ok(out);
                }
                out.push(b);
            } else {
                out.push(b);
            }
        }
    }
}

fn push_utf8(out: &mut Vec<u8>, cp: u32) {
    // Lua accepts code points up to 2^31; encode with the extended
    // UTF-8 scheme the reference implementation uses
    if cp < 0x80 {
        out.push(cp as u8);
    } else if cp < 0x800 {
        out.push(0xC0 | (cp >> 6) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x10000 {
        out.push(0xE0 | (cp >> 12) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x200000 {
        out.push(0xF0 | (cp >> 18) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x4000000 {
        out.push(0xF8 | (cp >> 24) as u8);
        out.push(0x80 | ((cp >> 18) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else {
        out.push(0xFC | (cp >> 30) as u8);
        out.push(0x80 | ((cp >> 24) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 18) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    }
}
