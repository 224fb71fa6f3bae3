//! Incremental JSON tokenizer.
//!
//! The VM consumes tokens through the contract implemented here: bytes are
//! appended with [`TokenStream::feed`] and complete tokens are pulled with
//! [`TokenStream::next`], which reports [`Next::More`] whenever the buffered
//! input ends mid-token. Partial string and number fragments never escape
//! the tokenizer; suspension is observable only as `More`.
//!
//! Object keys are bounded by [`KEY_CAPACITY`]; a longer key is a stream
//! error that the validator surfaces as `ErrorCode::KeyTooLong`.

use weir_asm::TokenKind;

/// Capacity of the object-key buffer, in bytes.
pub const KEY_CAPACITY: usize = 128;

// Consumed input is compacted out of the buffer once it crosses this mark.
const COMPACT_THRESHOLD: usize = 4096;

/// Whether a string token was an object key or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCtx {
    /// The string names an object property.
    Key,
    /// The token is a value (or a structural token).
    Value,
}

/// A complete token produced by the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind; indexes compiled type switches.
    pub kind: TokenKind,
    /// Numeric value; meaningful only for `TokenKind::Number`.
    pub num: f64,
    /// Unescaped bytes; meaningful only for `TokenKind::String`.
    pub text: Vec<u8>,
    /// Key/value position of the token.
    pub ctx: TokenCtx,
}

impl Token {
    fn bare(kind: TokenKind) -> Self {
        Token {
            kind,
            num: 0.0,
            text: Vec::new(),
            ctx: TokenCtx::Value,
        }
    }

    fn number(num: f64) -> Self {
        Token {
            kind: TokenKind::Number,
            num,
            text: Vec::new(),
            ctx: TokenCtx::Value,
        }
    }

    fn string(text: Vec<u8>, ctx: TokenCtx) -> Self {
        Token {
            kind: TokenKind::String,
            num: 0.0,
            text,
            ctx,
        }
    }

    /// Byte length of the token text, as exposed by the `TLEN` register.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether the token text is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Context of the stream, as reported by [`TokenStream::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// At the top level of the document.
    TopLevel,
    /// Inside an object, at or before a property name.
    ObjectKey,
    /// Inside an object, at a property value.
    ObjectValue,
    /// Inside an array.
    ArrayItem,
}

/// Result of pulling the next token.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// A complete token.
    Token(Token),
    /// The buffered input ends mid-token or mid-document; feed more bytes.
    More,
    /// The stream is closed and exhausted.
    End,
    /// The input is not valid JSON.
    Error(StreamError),
}

/// Tokenization failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// A byte that doesn't fit the JSON grammar at this position.
    Syntax,
    /// A malformed string literal (bad escape, lone surrogate, raw
    /// control byte, or unterminated at close).
    InvalidString,
    /// An object key longer than [`KEY_CAPACITY`].
    KeyTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

// What the grammar admits at the read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    NameOrEnd,
    Name,
    Colon,
    CommaOrObjEnd,
    ValueOrEnd,
    ElemValue,
    CommaOrArrEnd,
    Done,
}

/// The incremental tokenizer.
///
/// `feed` appends input; `next` pulls the next complete token or reports
/// `More`. Tokens interrupted by the end of the buffered input are
/// re-scanned from their first byte on the next pull, so no partial state
/// survives between calls.
#[derive(Debug, Clone)]
pub struct TokenStream {
    buf: Vec<u8>,
    pos: usize,
    stack: Vec<Container>,
    expect: Expect,
    closed: bool,
}

impl Default for TokenStream {
    fn default() -> Self {
        Self::new()
    }
}

enum Scan<T> {
    Done(T),
    Starved,
    Fail(StreamError),
}

impl TokenStream {
    /// Create an empty stream expecting one top-level value.
    pub fn new() -> Self {
        TokenStream {
            buf: Vec::new(),
            pos: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            closed: false,
        }
    }

    /// Append input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Close the stream.
    ///
    /// A single whitespace byte is appended first so that a number ending
    /// exactly at the input boundary tokenizes; afterwards `next` reports
    /// `End` instead of `More` when the buffer runs dry.
    pub fn close(&mut self) {
        if !self.closed {
            self.buf.push(b' ');
            self.closed = true;
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current context of the stream.
    pub fn state(&self) -> StreamState {
        match self.expect {
            Expect::NameOrEnd | Expect::Name | Expect::Colon | Expect::CommaOrObjEnd => {
                StreamState::ObjectKey
            }
            Expect::ValueOrEnd | Expect::ElemValue | Expect::CommaOrArrEnd => {
                StreamState::ArrayItem
            }
            Expect::Value => match self.stack.last() {
                Some(Container::Object) => StreamState::ObjectValue,
                Some(Container::Array) => StreamState::ArrayItem,
                None => StreamState::TopLevel,
            },
            Expect::Done => StreamState::TopLevel,
        }
    }

    /// Pull the next complete token.
    pub fn next(&mut self) -> Next {
        let next = self.pull();

        if let Next::Token(token) = &next {
            tracing::trace!(kind = %token.kind, len = token.text.len(), "token");
            if self.pos > COMPACT_THRESHOLD {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }
        }

        next
    }

    fn pull(&mut self) -> Next {
        loop {
            while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            let Some(&b) = self.buf.get(self.pos) else {
                return if self.closed { Next::End } else { Next::More };
            };

            match self.expect {
                Expect::Value | Expect::ElemValue => return self.scan_value(b),

                Expect::ValueOrEnd => {
                    if b == b']' {
                        return self.end_container(Container::Array, TokenKind::ArrayEnd);
                    }
                    return self.scan_value(b);
                }

                Expect::NameOrEnd | Expect::Name => {
                    if b == b'}' && self.expect == Expect::NameOrEnd {
                        return self.end_container(Container::Object, TokenKind::ObjectEnd);
                    }
                    if b != b'"' {
                        return Next::Error(StreamError::Syntax);
                    }

                    match self.scan_string(true) {
                        Scan::Done(text) => {
                            self.expect = Expect::Colon;
                            return Next::Token(Token::string(text, TokenCtx::Key));
                        }
                        Scan::Starved => return self.starved_mid_token(),
                        Scan::Fail(e) => return Next::Error(e),
                    }
                }

                Expect::Colon => {
                    if b != b':' {
                        return Next::Error(StreamError::Syntax);
                    }
                    self.pos += 1;
                    self.expect = Expect::Value;
                }

                Expect::CommaOrObjEnd => match b {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::Name;
                    }
                    b'}' => return self.end_container(Container::Object, TokenKind::ObjectEnd),
                    _ => return Next::Error(StreamError::Syntax),
                },

                Expect::CommaOrArrEnd => match b {
                    b',' => {
                        self.pos += 1;
                        self.expect = Expect::ElemValue;
                    }
                    b']' => return self.end_container(Container::Array, TokenKind::ArrayEnd),
                    _ => return Next::Error(StreamError::Syntax),
                },

                Expect::Done => return Next::Error(StreamError::Syntax),
            }
        }
    }

    fn starved_mid_token(&self) -> Next {
        if self.closed {
            // the document ends inside a token
            Next::Error(StreamError::InvalidString)
        } else {
            Next::More
        }
    }

    fn end_container(&mut self, expected: Container, kind: TokenKind) -> Next {
        if self.stack.pop() != Some(expected) {
            return Next::Error(StreamError::Syntax);
        }

        self.pos += 1;
        self.after_value();
        Next::Token(Token::bare(kind))
    }

    fn after_value(&mut self) {
        self.expect = match self.stack.last() {
            None => Expect::Done,
            Some(Container::Object) => Expect::CommaOrObjEnd,
            Some(Container::Array) => Expect::CommaOrArrEnd,
        };
    }

    fn scan_value(&mut self, b: u8) -> Next {
        match b {
            b'{' => {
                self.pos += 1;
                self.stack.push(Container::Object);
                self.expect = Expect::NameOrEnd;
                Next::Token(Token::bare(TokenKind::ObjectBegin))
            }

            b'[' => {
                self.pos += 1;
                self.stack.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
                Next::Token(Token::bare(TokenKind::ArrayBegin))
            }

            b'"' => match self.scan_string(false) {
                Scan::Done(text) => {
                    self.after_value();
                    Next::Token(Token::string(text, TokenCtx::Value))
                }
                Scan::Starved => self.starved_mid_token(),
                Scan::Fail(e) => Next::Error(e),
            },

            b'-' | b'0'..=b'9' => match self.scan_number() {
                Scan::Done(num) => {
                    self.after_value();
                    Next::Token(Token::number(num))
                }
                Scan::Starved => Next::More,
                Scan::Fail(e) => Next::Error(e),
            },

            b't' => self.scan_literal(b"true", TokenKind::True),
            b'f' => self.scan_literal(b"false", TokenKind::False),
            b'n' => self.scan_literal(b"null", TokenKind::Null),

            _ => Next::Error(StreamError::Syntax),
        }
    }

    fn scan_literal(&mut self, word: &[u8], kind: TokenKind) -> Next {
        let avail = &self.buf[self.pos..];
        let n = avail.len().min(word.len());

        if avail[..n] != word[..n] {
            return Next::Error(StreamError::Syntax);
        }

        if n < word.len() {
            return if self.closed {
                Next::Error(StreamError::Syntax)
            } else {
                Next::More
            };
        }

        self.pos += word.len();
        self.after_value();
        Next::Token(Token::bare(kind))
    }

    // Scans the string literal starting at `self.pos` (on the opening
    // quote). Only advances the cursor when the whole literal is buffered.
    fn scan_string(&mut self, is_key: bool) -> Scan<Vec<u8>> {
        let buf = &self.buf;
        let mut i = self.pos + 1;
        let mut out = Vec::new();

        loop {
            let Some(&b) = buf.get(i) else {
                return Scan::Starved;
            };

            match b {
                b'"' => {
                    self.pos = i + 1;
                    return Scan::Done(out);
                }

                b'\\' => {
                    let Some(&esc) = buf.get(i + 1) else {
                        return Scan::Starved;
                    };

                    i += 2;
                    match esc {
                        b'"' => out.push(b'"'),
                        b'\\' => out.push(b'\\'),
                        b'/' => out.push(b'/'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'u' => match unescape_unicode(buf, &mut i) {
                            Scan::Done(ch) => {
                                let mut utf8 = [0u8; 4];
                                out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                            }
                            Scan::Starved => return Scan::Starved,
                            Scan::Fail(e) => return Scan::Fail(e),
                        },
                        _ => return Scan::Fail(StreamError::InvalidString),
                    }
                }

                0x00..=0x1f => return Scan::Fail(StreamError::InvalidString),

                _ => {
                    out.push(b);
                    i += 1;
                }
            }

            if is_key && out.len() > KEY_CAPACITY {
                return Scan::Fail(StreamError::KeyTooLong);
            }
        }
    }

    // Scans the number starting at `self.pos`. Only advances the cursor
    // when the number provably ends inside the buffer.
    fn scan_number(&mut self) -> Scan<f64> {
        let buf = &self.buf;
        let start = self.pos;
        let mut i = start;

        if buf.get(i) == Some(&b'-') {
            i += 1;
        }

        // integer part: 0 alone, or a nonzero digit run
        match buf.get(i) {
            Some(b'0') => i += 1,
            Some(b'1'..=b'9') => {
                while matches!(buf.get(i), Some(b'0'..=b'9')) {
                    i += 1;
                }
            }
            Some(_) => return Scan::Fail(StreamError::Syntax),
            None => return Scan::Starved,
        }

        if buf.get(i) == Some(&b'.') {
            i += 1;
            if !matches!(buf.get(i), Some(b'0'..=b'9')) {
                return match buf.get(i) {
                    None => Scan::Starved,
                    Some(_) => Scan::Fail(StreamError::Syntax),
                };
            }
            while matches!(buf.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }

        if matches!(buf.get(i), Some(b'e') | Some(b'E')) {
            i += 1;
            if matches!(buf.get(i), Some(b'+') | Some(b'-')) {
                i += 1;
            }
            if !matches!(buf.get(i), Some(b'0'..=b'9')) {
                return match buf.get(i) {
                    None => Scan::Starved,
                    Some(_) => Scan::Fail(StreamError::Syntax),
                };
            }
            while matches!(buf.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }

        if i == buf.len() {
            // a digit at the input boundary could still extend
            return Scan::Starved;
        }

        let text = core::str::from_utf8(&buf[start..i]).expect("number bytes are ASCII");
        match text.parse::<f64>() {
            Ok(num) => {
                self.pos = i;
                Scan::Done(num)
            }
            Err(_) => Scan::Fail(StreamError::Syntax),
        }
    }
}

// Decodes `XXXX` (and a following `\uXXXX` for surrogate pairs) after a
// `\u` escape. `i` sits just past the `u` and is advanced past the hex.
fn unescape_unicode(buf: &[u8], i: &mut usize) -> Scan<char> {
    let Some(hi) = hex4(buf, *i) else {
        return if buf.len() < *i + 4 {
            Scan::Starved
        } else {
            Scan::Fail(StreamError::InvalidString)
        };
    };
    *i += 4;

    if (0xd800..0xdc00).contains(&hi) {
        // high surrogate; a low surrogate escape must follow
        if buf.len() < *i + 2 {
            return Scan::Starved;
        }
        if buf[*i] != b'\\' || buf[*i + 1] != b'u' {
            return Scan::Fail(StreamError::InvalidString);
        }

        let Some(lo) = hex4(buf, *i + 2) else {
            return if buf.len() < *i + 6 {
                Scan::Starved
            } else {
                Scan::Fail(StreamError::InvalidString)
            };
        };
        if !(0xdc00..0xe000).contains(&lo) {
            return Scan::Fail(StreamError::InvalidString);
        }
        *i += 6;

        let cp = 0x10000 + ((hi - 0xd800) << 10) + (lo - 0xdc00);
        return match char::from_u32(cp) {
            Some(ch) => Scan::Done(ch),
            None => Scan::Fail(StreamError::InvalidString),
        };
    }

    if (0xdc00..0xe000).contains(&hi) {
        // lone low surrogate
        return Scan::Fail(StreamError::InvalidString);
    }

    match char::from_u32(hi) {
        Some(ch) => Scan::Done(ch),
        None => Scan::Fail(StreamError::InvalidString),
    }
}

fn hex4(buf: &[u8], at: usize) -> Option<u32> {
    let chunk = buf.get(at..at + 4)?;
    let mut v = 0u32;
    for &b in chunk {
        v = (v << 4) | (b as char).to_digit(16)?;
    }
    Some(v)
}
