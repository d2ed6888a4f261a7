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

//! Here we prescan the head of a byte stream to find out which encodings it claims to be in.
//!
//! Declarations can be found in a byte-order mark, in the `charset` parameter of the HTTP
//! `Content-Type` header, in the `charset` attribute of a `<meta>` tag, and in the `content`
//! attribute of a `<meta http-equiv="content-type">` tag. Sometimes these agree and sometimes they
//! don't, so all of them are collected and the decoder chain sorts it out.

use {
    core::fmt,
    std::io::{self, Read, Seek, SeekFrom},
    log::debug,
    crate::config::ScanLimits,
    super::encoding::{self, Codec}
};

// Tags that can legitimately appear before the end of `<head>`. Seeing any other start tag means
// the head is over, and so are the encoding declarations.
const HEAD_TAGS: &[&[u8]] = &[
    b"html",
    b"head",
    b"title",
    b"style",
    b"base",
    b"link",
    b"meta",
    b"script",
    b"noscript"
];

// Elements whose content isn't markup. The scanner skips straight to their end tags.
const RAW_TEXT_TAGS: &[&[u8]] = &[b"title", b"style", b"script"];

/// Where an encoding declaration was found.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Label {
    /// A byte-order mark at the start of the stream
    Bom,
    /// A `charset` parameter in the HTTP `Content-Type` header
    HttpContentType,
    /// `<meta charset="...">`
    MetaCharset,
    /// `<meta http-equiv="content-type" content="...; charset=...">`
    MetaContentType
}

impl Label {
    /// The name used for this source in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Bom => "bom",
            Label::HttpContentType => "http-content-type",
            Label::MetaCharset => "meta-charset",
            Label::MetaContentType => "meta-content-type"
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An encoding name declared by the document or its transport. The name is kept exactly as
/// declared; it might not name any encoding we support.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DeclaredEncoding {
    /// Where the declaration came from
    pub label: Label,
    /// The declared name
    pub name: String
}

impl DeclaredEncoding {
    fn new(label: Label, name: &[u8]) -> Self {
        Self {
            label,
            name: String::from_utf8_lossy(name).into_owned()
        }
    }
}

/// A byte-order mark found at the start of the stream.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Bom {
    /// The encoding the mark announces
    pub codec: Codec,
    /// The length of the mark in bytes
    pub len: usize
}

static BOMS: &[(&[u8], fn() -> Codec)] = &[
    // Longest first: the UTF-32LE mark begins with the UTF-16LE mark.
    (&[0xff, 0xfe, 0x00, 0x00], || Codec::Utf32Le),
    (&[0x00, 0x00, 0xfe, 0xff], || Codec::Utf32Be),
    (&[0xef, 0xbb, 0xbf],       Codec::utf_8),
    (&[0xfe, 0xff],             Codec::utf_16be),
    (&[0xff, 0xfe],             Codec::utf_16le)
];

impl Bom {
    /// Identifies the byte-order mark at the start of `bytes`, if any.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        BOMS.iter()
            .find(|(mark, _)| bytes.starts_with(mark))
            .map(|&(mark, codec)| Bom { codec: codec(), len: mark.len() })
    }
}

/// The findings of the declaration scanner.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Prescan {
    /// Every declaration, in the order found: HTTP header, then byte-order mark, then `<meta>`
    /// tags. Duplicates are kept.
    pub encodings: Vec<DeclaredEncoding>,
    /// The byte-order mark, if there was one
    pub bom: Option<Bom>
}

/// Collects the encoding declarations at the head of `source`.
///
/// The source is read in chunks of `limits.chunk_size` bytes until a start tag that doesn't belong
/// in `<head>` is found, the source ends, or `limits.max_bytes` bytes have been read. Markup the
/// scanner can't make sense of just ends the scan. The source is rewound to the start before
/// returning, whatever happens.
pub fn scan<S: Read + Seek>(
        source: &mut S,
        http_content_type: Option<&str>,
        limits: &ScanLimits
) -> io::Result<Prescan> {
    let mut prescan = Prescan::default();
    if let Some(content_type) = http_content_type {
        for charset in encoding::content_type_charsets(content_type.as_bytes()) {
            prescan.encodings.push(DeclaredEncoding::new(Label::HttpContentType, charset));
        }
    }

    source.seek(SeekFrom::Start(0))?;
    let result = scan_head(source, limits, &mut prescan);
    source.seek(SeekFrom::Start(0))?;
    result?;

    debug!(
        "found {} encoding declaration(s): {:?}",
        prescan.encodings.len(),
        prescan.encodings.iter().map(|e| format!("{}={}", e.label, e.name)).collect::<Vec<_>>()
    );
    Ok(prescan)
}

fn scan_head<S: Read>(source: &mut S, limits: &ScanLimits, prescan: &mut Prescan) -> io::Result<()> {
    let mut scanner = HeadScanner::new();
    let mut chunk = vec![0u8; usize::max(limits.chunk_size, 4)];
    let mut bom_checked = false;

    loop {
        let len = read_some(source, &mut chunk)?;
        let eof = len == 0;
        scanner.buffer.extend_from_slice(&chunk[.. len]);

        // "There can only be one BOM", and it takes four bytes to tell them all apart.
        if !bom_checked && (scanner.buffer.len() >= 4 || eof) {
            bom_checked = true;
            if let Some(bom) = Bom::sniff(&scanner.buffer) {
                prescan.encodings.push(DeclaredEncoding::new(Label::Bom, bom.codec.name().as_bytes()));
                prescan.bom = Some(bom);
            }
        }

        scanner.run(eof, &mut prescan.encodings);
        if scanner.done || eof || scanner.buffer.len() >= limits.max_bytes {
            return Ok(());
        }
    }
}

// Like `Read::read`, but retries if interrupted.
fn read_some<S: Read>(source: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result
        }
    }
}

// A very small tag scanner. It finds start tags and their attributes, skips comments, end tags,
// and the contents of raw text elements, and treats everything else as text. Whenever it runs out
// of bytes in the middle of something, it waits for the next chunk and starts over from the
// beginning of that thing.
#[derive(Debug)]
struct HeadScanner {
    buffer: Vec<u8>,
    position: usize,
    done: bool
}

enum Step {
    // Continue at the given position.
    Advance(usize),
    // The bytes run out before we know what we're looking at.
    NeedMore,
    // The head is over.
    Stop
}

impl HeadScanner {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            position: 0,
            done: false
        }
    }

    fn run(&mut self, eof: bool, encodings: &mut Vec<DeclaredEncoding>) {
        while !self.done {
            let bytes = &self.buffer[..];
            let start = match bytes.iter().skip(self.position).position(|&b| b == b'<') {
                Some(p) => self.position + p,
                None => {
                    self.position = bytes.len();
                    return;
                }
            };

            match step(bytes, start, encodings) {
                Step::Advance(position) => self.position = position,
                Step::NeedMore if eof => self.done = true,
                Step::NeedMore => {
                    self.position = start;
                    return;
                },
                Step::Stop => self.done = true
            };
        }
    }
}

// Interprets whatever starts with the `<` at `start`.
fn step(bytes: &[u8], start: usize, encodings: &mut Vec<DeclaredEncoding>) -> Step {
    let rest = &bytes[start ..];

    if rest.len() < 4 && b"<!--".starts_with(rest) {
        return Step::NeedMore;
    }
    if rest.starts_with(b"<!--") {
        // <!-- ... -->
        return match find(rest, 4, b"-->") {
            Some(p) => Step::Advance(start + p + 3),
            None => Step::NeedMore
        };
    }

    match rest {
        [b'<', a, ..] if a.is_ascii_alphabetic() => start_tag(bytes, start, encodings),
        [b'<', b'!' | b'/' | b'?', ..] => {
            // <!...>, </...>, or <?...>
            match rest.iter().position(|&b| b == b'>') {
                Some(p) => Step::Advance(start + p + 1),
                None => Step::NeedMore
            }
        },
        // Not a tag
        _ => Step::Advance(start + 1)
    }
}

fn start_tag(bytes: &[u8], start: usize, encodings: &mut Vec<DeclaredEncoding>) -> Step {
    let mut position = start + 1;
    let name_len = match bytes.iter().skip(position).position(|&b| b.is_ascii_whitespace() || b == b'/' || b == b'>') {
        Some(p) => p,
        None => return Step::NeedMore
    };
    let name = &bytes[position .. position + name_len];
    position += name_len;

    if !HEAD_TAGS.iter().any(|tag| name.eq_ignore_ascii_case(tag)) {
        return Step::Stop;
    }

    let mut attributes = Vec::new();
    loop {
        match get_attribute(&mut position, bytes) {
            Attribute::Pair(attr_name, attr_value) => attributes.push((attr_name, attr_value)),
            Attribute::End => break,
            Attribute::Incomplete => return Step::NeedMore
        };
    }
    position += 1; // The `>`

    if name.eq_ignore_ascii_case(b"meta") {
        meta_declarations(&attributes, encodings);
    } else if let Some(&tag) = RAW_TEXT_TAGS.iter().find(|tag| name.eq_ignore_ascii_case(tag)) {
        // Skip to the end tag, which had better be in the same chunk.
        match find_end_tag(bytes, position, tag) {
            Some(end) => position = end,
            None => return Step::NeedMore
        };
    }

    Step::Advance(position)
}

fn meta_declarations(attributes: &[(&[u8], &[u8])], encodings: &mut Vec<DeclaredEncoding>) {
    if let Some(charset) = first_attribute(attributes, b"charset") {
        encodings.push(DeclaredEncoding::new(Label::MetaCharset, charset));
    } else if first_attribute(attributes, b"http-equiv").map_or(false, |v| v.eq_ignore_ascii_case(b"content-type")) {
        let content = first_attribute(attributes, b"content").unwrap_or(b"");
        for charset in encoding::content_type_charsets(content) {
            encodings.push(DeclaredEncoding::new(Label::MetaContentType, charset));
        }
    }
}

// Only the first occurrence of each attribute counts.
fn first_attribute<'a>(attributes: &[(&[u8], &'a [u8])], name: &[u8]) -> Option<&'a [u8]> {
    attributes.iter()
        .find(|(attr_name, _)| attr_name.eq_ignore_ascii_case(name))
        .map(|&(_, value)| value)
}

// Finds `</tag` (ignoring case) at or after `from` and returns the position just past it.
fn find_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let needle_len = tag.len() + 2;
    let mut position = from;
    loop {
        let p = find(bytes, position, b"</")?;
        let candidate = clamped_slice(bytes, p + 2, p + needle_len);
        if candidate.len() < tag.len() {
            return None;
        }
        if candidate.eq_ignore_ascii_case(tag) {
            return Some(p + needle_len);
        }
        position = p + 2;
    }
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes.windows(needle.len()).skip(from).position(|w| w == needle).map(|p| from + p)
}

enum Attribute<'a> {
    Pair(&'a [u8], &'a [u8]),
    // The `>` that ends the tag is at the current position.
    End,
    // The bytes ran out before the end of the attribute.
    Incomplete
}

// "Get an attribute"
// Returns the name and value of an attribute, as subslices of the `bytes` slice.
// NOTE: Names and values aren't converted to lowercase here, since that can't be done in place.
//       Every use of them has to be case-insensitive instead.
fn get_attribute<'a>(position: &mut usize, bytes: &'a [u8]) -> Attribute<'a> {
    match bytes.iter().skip(*position).position(|&b| !b.is_ascii_whitespace() && b != b'/') {
        Some(p) => *position += p,
        None => {
            *position = bytes.len();
            return Attribute::Incomplete;
        }
    };

    if bytes[*position] == b'>' {
        return Attribute::End;
    }

    let empty = &bytes[0 .. 0];

    // Get the attribute's name.
    let attr_name_start = *position;
    while *position < bytes.len() {
        match bytes[*position] {
            b'=' if *position > attr_name_start => break,
            x if x.is_ascii_whitespace() => break,
            b'/' | b'>' => {
                // There's no equals sign, so the attribute's value is the empty string.
                return Attribute::Pair(&bytes[attr_name_start .. *position], empty);
            },
            _ => *position += 1
        };
    }
    let attr_name = &bytes[attr_name_start .. *position];

    // Whitespace and the equals sign
    match bytes.iter().skip(*position).position(|&b| !b.is_ascii_whitespace()) {
        Some(p) => *position += p,
        None => return Attribute::Incomplete
    };

    if bytes[*position] != b'=' {
        // There's no equals sign, so the attribute's value is the empty string.
        return Attribute::Pair(attr_name, empty);
    }
    *position += 1;

    match bytes.iter().skip(*position).position(|&b| !b.is_ascii_whitespace()) {
        Some(p) => *position += p,
        None => return Attribute::Incomplete
    };

    // Get the attribute's value.
    match bytes[*position] {
        quote @ (b'"' | b'\'') => {
            let attr_value_start = *position + 1;
            match bytes.iter().skip(attr_value_start).position(|&b| b == quote) {
                Some(p) => {
                    *position = attr_value_start + p + 1;
                    Attribute::Pair(attr_name, &bytes[attr_value_start .. attr_value_start + p])
                },
                None => Attribute::Incomplete
            }
        },
        b'>' => {
            // There's nothing after the equals sign, so the attribute's value is the empty string.
            Attribute::Pair(attr_name, empty)
        },
        _ => {
            // This is the start of an unquoted value.
            let attr_value_start = *position;
            match bytes.iter().skip(*position).position(|&b| b.is_ascii_whitespace() || b == b'>') {
                Some(p) => {
                    *position += p;
                    Attribute::Pair(attr_name, &bytes[attr_value_start .. *position])
                },
                None => Attribute::Incomplete
            }
        }
    }
}

// Slices the source slice after forcing the start and end indices to be in-bounds.
fn clamped_slice<T>(src: &[T], start: usize, end: usize) -> &[T] {
    let len = src.len();
    &src[usize::min(start, len) .. usize::min(end, len)]
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::io::Cursor
    };

    fn scan_bytes(bytes: &[u8], content_type: Option<&str>) -> Prescan {
        let mut source = Cursor::new(bytes.to_vec());
        let prescan = scan(&mut source, content_type, &ScanLimits::default())
            .expect("reading from memory can't fail");
        assert_eq!(source.position(), 0, "the source wasn't rewound");
        prescan
    }

    fn declared(label: Label, name: &str) -> DeclaredEncoding {
        DeclaredEncoding { label, name: name.into() }
    }

    #[test]
    fn nothing_declared() {
        let prescan = scan_bytes(b"<p>just ASCII</p>\n", None);
        assert_eq!(prescan, Prescan::default());
    }

    #[test]
    fn empty_source() {
        assert_eq!(scan_bytes(b"", None), Prescan::default());
    }

    #[test]
    fn http_content_type() {
        let prescan = scan_bytes(b"<p>x</p>", Some("text/html; charset=Shift_JIS; charset=utf-8"));
        assert_eq!(prescan.encodings, vec![
            declared(Label::HttpContentType, "Shift_JIS"),
            declared(Label::HttpContentType, "utf-8")
        ]);
    }

    #[test]
    fn meta_charset() {
        let prescan = scan_bytes(b"<meta charset=\"shift-jis\">\n<p>\x8b\x90<p>\n", None);
        assert_eq!(prescan.encodings, vec![declared(Label::MetaCharset, "shift-jis")]);
    }

    #[test]
    fn meta_http_equiv() {
        let prescan = scan_bytes(
            b"<html><head><META HTTP-EQUIV=Content-Type CONTENT='text/html;charset=euc-jp'></head>",
            None
        );
        assert_eq!(prescan.encodings, vec![declared(Label::MetaContentType, "euc-jp")]);
    }

    #[test]
    fn meta_without_http_equiv_is_ignored() {
        let prescan = scan_bytes(b"<meta content=\"text/html; charset=utf-8\"><meta name=x>", None);
        assert!(prescan.encodings.is_empty());
    }

    #[test]
    fn declarations_in_order() {
        let prescan = scan_bytes(
            b"\xef\xbb\xbf<meta charset=utf-8><meta charset=utf-8><title>x</title>",
            Some("text/html; charset=iso-8859-1")
        );
        assert_eq!(prescan.encodings, vec![
            declared(Label::HttpContentType, "iso-8859-1"),
            declared(Label::Bom, "UTF-8"),
            declared(Label::MetaCharset, "utf-8"),
            declared(Label::MetaCharset, "utf-8")
        ]);
        assert_eq!(prescan.bom, Some(Bom { codec: Codec::utf_8(), len: 3 }));
    }

    #[test]
    fn stops_at_body() {
        let prescan = scan_bytes(b"<head></head><body><meta charset=utf-8>", None);
        assert!(prescan.encodings.is_empty());
    }

    #[test]
    fn skips_comments_and_raw_text() {
        let prescan = scan_bytes(
            b"<!-- <body> --><script>document.write('<body>')</script>\
              <style>p { }</style><meta charset=\"koi8-r\">",
            None
        );
        assert_eq!(prescan.encodings, vec![declared(Label::MetaCharset, "koi8-r")]);
    }

    #[test]
    fn tags_split_across_chunks() {
        let html = b"<html><head><title>a title</title><meta http-equiv=\"Content-Type\" \
                     content=\"text/html; charset=big5\"></head><body>";
        let limits = ScanLimits { chunk_size: 4, ..ScanLimits::default() };
        let mut source = Cursor::new(html.to_vec());
        let prescan = scan(&mut source, None, &limits).unwrap();
        assert_eq!(prescan.encodings, vec![declared(Label::MetaContentType, "big5")]);
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn byte_budget() {
        let mut html = b"<html><head>".to_vec();
        html.extend(b"<link rel=x>".iter().cycle().take(50 * 1024));
        html.extend(b"<meta charset=utf-8>");
        assert!(scan_bytes(&html, None).encodings.is_empty());
    }

    #[test]
    fn malformed_markup_is_tolerated() {
        let prescan = scan_bytes(b"<meta charset=\"utf-8", None);
        assert!(prescan.encodings.is_empty());
        let prescan = scan_bytes(b"<<<>>> <! <meta charset=utf-8>", None);
        assert!(prescan.encodings.is_empty());
    }

    #[test]
    fn boms() {
        assert_eq!(Bom::sniff(b"\xff\xfe<\0"), Some(Bom { codec: Codec::utf_16le(), len: 2 }));
        assert_eq!(Bom::sniff(b"\xfe\xff\0<"), Some(Bom { codec: Codec::utf_16be(), len: 2 }));
        assert_eq!(Bom::sniff(b"\xff\xfe\0\0<\0\0\0"), Some(Bom { codec: Codec::Utf32Le, len: 4 }));
        assert_eq!(Bom::sniff(b"\0\0\xfe\xff"), Some(Bom { codec: Codec::Utf32Be, len: 4 }));
        assert_eq!(Bom::sniff(b"<html>"), None);
        assert_eq!(Bom::sniff(b"\xef\xbb"), None);
    }

    #[test]
    fn utf16le_bom() {
        let prescan = scan_bytes(b"\xff\xfeh\0i\0", None);
        assert_eq!(prescan.encodings, vec![declared(Label::Bom, "UTF-16LE")]);
        assert_eq!(prescan.bom, Some(Bom { codec: Codec::utf_16le(), len: 2 }));
    }
}
