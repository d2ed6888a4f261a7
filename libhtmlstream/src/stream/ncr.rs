/* Copyright (c) 2021 Jeremy Davis (jeremydavis519@gmail.com)
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy of this software
 * and associated documentation files (the "Software"), to deal in the Software without restriction,
 * including without limitation the rights to use, copy, modify, merge, publish, distribute,
 * sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all copies or
 * substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
 * NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
 * DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
 */

//! This module repairs numeric character references that name invalid code points.
//!
//! Pages that were written in windows-1252 often contain references like `&#149;`, which
//! literally means U+0095 (a C1 control character) but was obviously meant as the byte 0x95 in
//! windows-1252, a bullet. Browsers fix these up, so we do the same, rewriting the reference so
//! that any parser downstream gets the right character.
//!
//! > If the number is one of the numbers in the first column of the following table, then find the
//! > row with that number in the first column, and set the character reference code to the number
//! > in the second column.
//!
//! References in the content of `<script>` and `<style>` elements aren't references at all, so
//! they're left alone. The scanner only knows enough about tags to tell where those elements
//! begin and end.

use {
    core::mem,
    std::io::Cursor,
    log::trace,
    crate::error::Result,
    super::decoder::take_chars
};

/// The fixed replacement table for numeric character references. Each entry maps a code point
/// that a reference may not name to the one it should name instead.
pub const REPLACEMENTS: &[(u32, u32)] = &[
    (0x00, 0xfffd),
    (0x0d, 0x000d),
    (0x80, 0x20ac),
    (0x81, 0x0081),
    (0x82, 0x201a),
    (0x83, 0x0192),
    (0x84, 0x201e),
    (0x85, 0x2026),
    (0x86, 0x2020),
    (0x87, 0x2021),
    (0x88, 0x02c6),
    (0x89, 0x2030),
    (0x8a, 0x0160),
    (0x8b, 0x2039),
    (0x8c, 0x0152),
    (0x8d, 0x008d),
    (0x8e, 0x017d),
    (0x8f, 0x008f),
    (0x90, 0x0090),
    (0x91, 0x2018),
    (0x92, 0x2019),
    (0x93, 0x201c),
    (0x94, 0x201d),
    (0x95, 0x2022),
    (0x96, 0x2013),
    (0x97, 0x2014),
    (0x98, 0x02dc),
    (0x99, 0x2122),
    (0x9a, 0x0161),
    (0x9b, 0x203a),
    (0x9c, 0x0153),
    (0x9d, 0x009d),
    (0x9e, 0x017e),
    (0x9f, 0x0178)
];

/// Looks up the replacement for a referenced code point.
pub fn replacement(code_point: u32) -> Option<u32> {
    REPLACEMENTS.iter()
        .find(|&&(from, _)| from == code_point)
        .map(|&(_, to)| to)
}

/// The element whose content is currently being scanned, if its content isn't markup.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum CdataState {
    /// Ordinary markup
    #[default]
    None,
    /// Inside `<script>`
    Script,
    /// Inside `<style>`
    Style
}

impl CdataState {
    fn for_tag(name: &[u8]) -> Self {
        if name.eq_ignore_ascii_case(b"script") {
            CdataState::Script
        } else if name.eq_ignore_ascii_case(b"style") {
            CdataState::Style
        } else {
            CdataState::None
        }
    }

    /// The name of the element, or `None` outside of CDATA.
    pub fn tag_name(self) -> Option<&'static str> {
        match self {
            CdataState::None => None,
            CdataState::Script => Some("script"),
            CdataState::Style => Some("style")
        }
    }
}

/// Rewrites the invalid numeric character references in `text`.
///
/// Returns the clean text, the pending tail and the new CDATA state. The pending tail is a
/// trailing token that can't be classified until more text arrives; the caller must prepend it
/// to the next chunk. If `eof` is `true`, nothing is left pending and unterminated tokens pass
/// through unchanged.
///
/// The output never depends on where the input was split into chunks.
pub fn clean_ncr(text: &str, eof: bool, cdata: CdataState) -> (String, String, CdataState) {
    let mut scanner = Scanner {
        text,
        bytes: text.as_bytes(),
        eof,
        cdata,
        clean: String::with_capacity(text.len())
    };
    let pending = scanner.run();
    (scanner.clean, pending, scanner.cdata)
}

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    eof: bool,
    cdata: CdataState,
    clean: String
}

// The outcome of looking at one token.
enum Token {
    // Copy this many bytes verbatim.
    Text(usize),
    // A numeric reference that needs to be rewritten. Its digits (with the `x`, if any) span
    // `start .. end` relative to the token, and the reference should name `replacement` instead.
    Reference { start: usize, end: usize, replacement: u32 },
    // A start tag of the given length. If the tag opens a CDATA element, that's the new state.
    StartTag(usize, CdataState),
    // An end tag that closes the current CDATA element.
    CdataEnd(usize),
    // The token might continue past the end of the text.
    Incomplete
}

impl<'a> Scanner<'a> {
    // Returns the pending tail.
    fn run(&mut self) -> String {
        let mut position = 0;
        while position < self.bytes.len() {
            let next = match self.cdata {
                CdataState::None => find_any(&self.bytes[position ..], b"<&"),
                _ => find_any(&self.bytes[position ..], b"<")
            };
            let start = match next {
                Some(offset) => position + offset,
                None => break
            };
            self.clean.push_str(&self.text[position .. start]);
            position = start;

            match self.token(position) {
                Token::Text(len) => {
                    self.clean.push_str(&self.text[position .. position + len]);
                    position += len;
                },
                Token::Reference { start, end, replacement } => {
                    let digits = &self.text[position + start .. position + end];
                    let fixed = format!("x{:X}", replacement);
                    trace!("replacing numeric reference {:?} with {:?}", digits, fixed);
                    self.clean.push_str(&self.text[position .. position + start]);
                    self.clean.push_str(&fixed);
                    position += end;
                },
                Token::StartTag(len, cdata) => {
                    self.clean.push_str(&self.text[position .. position + len]);
                    position += len;
                    self.cdata = cdata;
                },
                Token::CdataEnd(len) => {
                    self.clean.push_str(&self.text[position .. position + len]);
                    position += len;
                    self.cdata = CdataState::None;
                },
                Token::Incomplete => {
                    if self.eof {
                        // Nothing more is coming, so it's just text.
                        self.clean.push_str(&self.text[position ..]);
                        return String::new();
                    }
                    return self.text[position ..].into();
                }
            };
        }
        self.clean.push_str(&self.text[position ..]);
        String::new()
    }

    // Classifies the token beginning with the `<` or `&` at `position`.
    fn token(&self, position: usize) -> Token {
        let rest = &self.bytes[position ..];
        match (rest[0], self.cdata) {
            (b'&', _) => reference(rest, self.eof),
            (b'<', CdataState::None) => markup(rest),
            (b'<', cdata) => cdata_end(rest, cdata),
            _ => Token::Text(1)
        }
    }
}

fn reference(rest: &[u8], eof: bool) -> Token {
    let hex = match rest.get(1 ..= 2) {
        Some([b'#', b'x']) | Some([b'#', b'X']) => true,
        Some([b'#', _]) => false,
        Some(_) => return Token::Text(1),
        None => return match rest.get(1) {
            None | Some(b'#') => Token::Incomplete,
            Some(_) => Token::Text(1)
        }
    };

    let start = 2;
    let digits_start = if hex { 3 } else { 2 };
    let is_digit = |b: &u8| if hex { b.is_ascii_hexdigit() } else { b.is_ascii_digit() };
    let digits = rest[digits_start ..].iter().take_while(|&b| is_digit(b)).count();
    if digits == 0 {
        return if digits_start == rest.len() { Token::Incomplete } else { Token::Text(1) };
    }
    let end = digits_start + digits;

    // The reference has to be followed by something that can't be part of it, like `;`.
    match rest.get(end) {
        None if eof => return Token::Text(end),
        None => return Token::Incomplete,
        Some(b) if b.is_ascii_hexdigit() => return Token::Text(end),
        Some(_) => {}
    };

    // The digits are all ASCII.
    let digits = core::str::from_utf8(&rest[digits_start .. end]).unwrap_or_default();
    let code_point = u32::from_str_radix(digits, if hex { 16 } else { 10 });
    match code_point.ok().and_then(replacement) {
        Some(replacement) => Token::Reference { start, end, replacement },
        None => Token::Text(end)
    }
}

// A `<` outside of CDATA.
fn markup(rest: &[u8]) -> Token {
    match rest.get(1) {
        None => Token::Incomplete,
        Some(b) if b.is_ascii_alphabetic() => match tag_end(rest, 1) {
            Some(len) => {
                let name_len = rest[1 ..].iter().take_while(|&&b| !is_tag_name_end(b)).count();
                Token::StartTag(len, CdataState::for_tag(&rest[1 .. 1 + name_len]))
            },
            None => Token::Incomplete
        },
        Some(b'/') => match rest.get(2) {
            None => Token::Incomplete,
            Some(b) if b.is_ascii_alphabetic() => tag_end(rest, 2).map_or(Token::Incomplete, Token::Text),
            Some(_) => Token::Text(1)
        },
        Some(b'!') => {
            if rest.starts_with(b"<!--") {
                match find(&rest[4 ..], b"-->") {
                    Some(offset) => Token::Text(4 + offset + 3),
                    None => Token::Incomplete
                }
            } else if b"<!--".starts_with(rest) {
                Token::Incomplete
            } else {
                find(rest, b">").map_or(Token::Incomplete, |offset| Token::Text(offset + 1))
            }
        },
        Some(b'?') => find(rest, b">").map_or(Token::Incomplete, |offset| Token::Text(offset + 1)),
        Some(_) => Token::Text(1)
    }
}

// A `<` inside CDATA. Only the end tag of the current element means anything.
fn cdata_end(rest: &[u8], cdata: CdataState) -> Token {
    let name = match cdata.tag_name() {
        Some(name) => name.as_bytes(),
        None => return Token::Text(1)
    };
    let prefix_len = 2 + name.len();

    // Compare as much of `</name` as we have.
    let have = usize::min(rest.len(), prefix_len);
    let matches = rest[.. have].iter()
        .zip(b"</".iter().chain(name))
        .all(|(a, b)| a.eq_ignore_ascii_case(b));
    if !matches {
        return Token::Text(1);
    }
    match rest.get(prefix_len) {
        None => Token::Incomplete,
        Some(&b) if is_tag_name_end(b) => tag_end(rest, prefix_len).map_or(Token::Incomplete, Token::CdataEnd),
        // Something like `</scripts`
        Some(_) => Token::Text(1)
    }
}

// Finds the end of a tag, starting after the `<`, and returns the tag's length. Quoted attribute
// values may contain `>`.
fn tag_end(tag: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < tag.len() {
        match tag[i] {
            b'>' => return Some(i + 1),
            b'=' => {
                i += 1;
                while tag.get(i).map_or(false, u8::is_ascii_whitespace) {
                    i += 1;
                }
                match tag.get(i) {
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        i += 1 + find(&tag[i + 1 ..], &[quote])? + 1;
                    },
                    Some(_) => {},
                    None => return None
                };
            },
            _ => i += 1
        };
    }
    None
}

fn is_tag_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'/' || b == b'>'
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn find_any(haystack: &[u8], bytes: &[u8]) -> Option<usize> {
    haystack.iter().position(|b| bytes.contains(b))
}

// Longer than any prefix of `<!--` or `</script` plus its terminator
const LONG_TOKEN: usize = 10;

/// Sanitizes a text stream one chunk at a time, holding onto the pending tail and CDATA state
/// between chunks.
#[derive(Debug, Default, Clone)]
pub struct ReferenceSanitizer {
    pending: String,
    cdata: CdataState
}

impl ReferenceSanitizer {
    /// Creates a sanitizer in its initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizes the next chunk. Text may be held back until a later call (or the final one,
    /// with `eof` set) shows where its last token ends.
    pub fn process(&mut self, chunk: &str, eof: bool) -> String {
        // A held-back tag, comment or end tag this long can only be finished by a `>`.
        if !eof && self.pending.len() >= LONG_TOKEN && self.pending.starts_with('<') && !chunk.contains('>') {
            self.pending.push_str(chunk);
            return String::new();
        }

        let mut text = mem::take(&mut self.pending);
        text.push_str(chunk);
        let (clean, pending, cdata) = clean_ncr(&text, eof, self.cdata);
        self.pending = pending;
        self.cdata = cdata;
        clean
    }

    /// Forgets everything, as when decoding restarts from the beginning.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.cdata = CdataState::None;
    }

    /// The current CDATA state.
    pub fn cdata(&self) -> CdataState {
        self.cdata
    }

    /// Returns `true` if some text is being held back.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// A source of text that can be read incrementally.
pub trait TextRead {
    /// Reads up to `size` characters, or everything that's left if `size` is `None`. An empty
    /// string means the end of the text.
    fn read_text(&mut self, size: Option<usize>) -> Result<String>;

    /// The number of times the text has started over from the beginning. Whenever this changes,
    /// everything read before the change should be thrown away.
    fn restarts(&self) -> usize {
        0
    }
}

impl<T: AsRef<str>> TextRead for Cursor<T> {
    fn read_text(&mut self, size: Option<usize>) -> Result<String> {
        let text = self.get_ref().as_ref();
        let start = usize::min(self.position() as usize, text.len());
        let rest = text.get(start ..).unwrap_or_default();
        let len = match size {
            Some(size) => rest.char_indices().nth(size).map_or(rest.len(), |(i, _)| i),
            None => rest.len()
        };
        let chunk = rest[.. len].to_string();
        self.set_position((start + len) as u64);
        Ok(chunk)
    }
}

/// Wraps a text source, replacing its invalid numeric character references.
#[derive(Debug)]
pub struct ReplaceInvalidNcr<R: TextRead> {
    inner: R,
    sanitizer: ReferenceSanitizer,
    ready: String,
    eof: bool,
    // The source's restart count as of the last read
    restarts: usize
}

impl<R: TextRead> ReplaceInvalidNcr<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        let restarts = inner.restarts();
        Self {
            inner,
            sanitizer: ReferenceSanitizer::new(),
            ready: String::new(),
            eof: false,
            restarts
        }
    }

    /// The wrapped text source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwraps the text source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: TextRead> TextRead for ReplaceInvalidNcr<R> {
    fn read_text(&mut self, size: Option<usize>) -> Result<String> {
        if size == Some(0) {
            return Ok(String::new());
        }
        while !self.eof && size.map_or(true, |size| self.ready.chars().count() < size) {
            let chunk = self.inner.read_text(size)?;
            if self.inner.restarts() != self.restarts {
                // The source started over, so everything held here belongs to the old text.
                self.restarts = self.inner.restarts();
                self.sanitizer.reset();
                self.ready.clear();
            }
            self.eof = chunk.is_empty();
            let clean = self.sanitizer.process(&chunk, self.eof);
            self.ready.push_str(&clean);
        }
        Ok(match size {
            Some(size) => take_chars(&mut self.ready, size),
            None => mem::take(&mut self.ready)
        })
    }

    fn restarts(&self) -> usize {
        self.inner.restarts()
    }
}
