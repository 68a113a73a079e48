//! Hand-written SQL scanner.
//!
//! Scans bytes into tokens, tracking line/char positions and the raw span
//! of every token so the parser can recover the source text of any
//! sub-expression. Strings accept the `\n \t \\ \" \'` escapes; any other
//! escape produces a [`Token::BadEscape`]. Identifiers may be
//! backtick-quoted to carry spaces and punctuation. Keywords are matched
//! case-insensitively, identifiers are case-sensitive.

mod token;

pub use token::{Keyword, Token};

/// Line/char position of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Source line.
    pub line: usize,
    /// Character offset within the line.
    pub column: usize,
}

/// One scanned token with its literal text and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenItem {
    /// The token kind.
    pub tok: Token,
    /// Decoded literal text: identifier name, unescaped string contents,
    /// digits of a number, parameter name without the `$`.
    pub lit: String,
    /// Position of the token's first byte.
    pub pos: Position,
    /// Byte offset of the token start in the source.
    pub start: usize,
    /// Byte offset one past the token end.
    pub end: usize,
}

/// A streaming scanner over SQL source text.
pub struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner over the given source.
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Scans the whole input, ending with an EOF token.
    pub fn scan_all(src: &'a str) -> Vec<TokenItem> {
        let mut scanner = Self::new(src);
        let mut tokens = Vec::new();
        loop {
            let item = scanner.next_token();
            let done = item.tok == Token::Eof;
            tokens.push(item);
            if done {
                return tokens;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    /// Produces the next token.
    pub fn next_token(&mut self) -> TokenItem {
        let start = self.pos;
        let pos = Position {
            line: self.line,
            column: self.column,
        };

        let Some(b) = self.peek() else {
            return self.make(Token::Eof, String::new(), start, pos);
        };

        match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
                    self.advance();
                }
                self.make(Token::Ws, String::new(), start, pos)
            }
            b'-' if self.peek_at(1) == Some(b'-') => self.scan_line_comment(start, pos),
            b'/' if self.peek_at(1) == Some(b'/') => self.scan_line_comment(start, pos),
            b'/' if self.peek_at(1) == Some(b'*') => self.scan_block_comment(start, pos),
            b'\'' | b'"' => self.scan_string(start, pos),
            b'`' => self.scan_backtick_ident(start, pos),
            b'0'..=b'9' => self.scan_number(start, pos),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number(start, pos)
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.scan_ident(start, pos),
            b'$' => self.scan_named_param(start, pos),
            b'?' => {
                self.advance();
                self.make(Token::PositionalParam, String::new(), start, pos)
            }
            _ => self.scan_operator(start, pos),
        }
    }

    fn make(&self, tok: Token, lit: String, start: usize, pos: Position) -> TokenItem {
        TokenItem {
            tok,
            lit,
            pos,
            start,
            end: self.pos,
        }
    }

    fn scan_line_comment(&mut self, start: usize, pos: Position) -> TokenItem {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.advance();
        }
        self.make(Token::Comment, String::new(), start, pos)
    }

    fn scan_block_comment(&mut self, start: usize, pos: Position) -> TokenItem {
        self.advance();
        self.advance();
        while let Some(b) = self.advance() {
            if b == b'*' && self.peek() == Some(b'/') {
                self.advance();
                return self.make(Token::Comment, String::new(), start, pos);
            }
        }
        self.make(Token::Comment, String::new(), start, pos)
    }

    fn scan_string(&mut self, start: usize, pos: Position) -> TokenItem {
        let quote = self.advance().unwrap_or(b'"');
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return self.make(Token::BadString, out, start, pos),
                Some(b) if b == quote => return self.make(Token::String, out, start, pos),
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'"') => out.push('"'),
                    Some(b'\'') => out.push('\''),
                    _ => return self.make(Token::BadEscape, out, start, pos),
                },
                Some(b) => out.push(b as char),
            }
        }
    }

    fn scan_backtick_ident(&mut self, start: usize, pos: Position) -> TokenItem {
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return self.make(Token::BadString, out, start, pos),
                Some(b'`') => return self.make(Token::Ident, out, start, pos),
                Some(b) => out.push(b as char),
            }
        }
    }

    fn scan_ident(&mut self, start: usize, pos: Position) -> TokenItem {
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let lit = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        match Keyword::lookup(&lit) {
            Some(kw) => self.make(Token::Keyword(kw), lit, start, pos),
            None => self.make(Token::Ident, lit, start, pos),
        }
    }

    fn scan_number(&mut self, start: usize, pos: Position) -> TokenItem {
        let mut is_float = false;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E'))
            && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek_at(1), Some(b'+' | b'-'))
                    && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
        {
            is_float = true;
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
        }
        let lit = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let tok = if is_float { Token::Number } else { Token::Integer };
        self.make(tok, lit, start, pos)
    }

    fn scan_named_param(&mut self, start: usize, pos: Position) -> TokenItem {
        self.advance();
        let name_start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.advance();
        }
        let lit = String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned();
        self.make(Token::NamedParam, lit, start, pos)
    }

    fn scan_operator(&mut self, start: usize, pos: Position) -> TokenItem {
        let b = self.advance().unwrap_or(0);
        let tok = match b {
            b'=' => Token::Eq,
            b'!' if self.peek() == Some(b'=') => {
                self.advance();
                Token::Neq
            }
            b'<' if self.peek() == Some(b'=') => {
                self.advance();
                Token::Lte
            }
            b'<' if self.peek() == Some(b'>') => {
                self.advance();
                Token::Neq
            }
            b'<' => Token::Lt,
            b'>' if self.peek() == Some(b'=') => {
                self.advance();
                Token::Gte
            }
            b'>' => Token::Gt,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'&' => Token::Ampersand,
            b'|' if self.peek() == Some(b'|') => {
                self.advance();
                Token::Concat
            }
            b'|' => Token::Pipe,
            b'^' => Token::Caret,
            b'(' => Token::Lparen,
            b')' => Token::Rparen,
            b'{' => Token::Lbrace,
            b'}' => Token::Rbrace,
            b'[' => Token::Lbracket,
            b']' => Token::Rbracket,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b';' => Token::Semicolon,
            b'.' => Token::Dot,
            _ => Token::Illegal,
        };
        let lit = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.make(tok, lit, start, pos)
    }
}
