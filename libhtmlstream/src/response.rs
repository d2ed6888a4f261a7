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

//! Stored HTTP responses.
//!
//! A stored response is the raw bytes of an HTTP response: status line, headers, a blank line, and
//! the body. It may be preceded by the header block of a WARC record. The body is read into
//! memory so that it can be rewound, which the decoder chain needs.

use {
    std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom},
    log::debug,
    crate::{
        content::{ContentDecoder, ContentEncoding},
        error::{Error, Result}
    }
};

/// The number of bytes at the start of the body kept as [`Response::magic_bytes`].
pub const MAGIC_BYTES_LEN: usize = 8;

/// An ordered list of header fields. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>
}

impl Headers {
    /// The value of the first field with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The values of all the fields with the given name, in order.
    pub fn get_all<'a: 'n, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n {
        self.fields.iter()
            .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every field, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // Reads fields up to and including the blank line that ends the block (or the end of the
    // input). Field values are Latin-1.
    fn parse<R: BufRead>(readable: &mut R) -> io::Result<Self> {
        let mut fields: Vec<(String, String)> = Vec::new();
        loop {
            let line = read_line(readable)?;
            let line = trim_newline(&line);
            if line.is_empty() {
                return Ok(Self { fields });
            }

            if line[0] == b' ' || line[0] == b'\t' {
                // An obsolete continuation line
                if let Some((_, value)) = fields.last_mut() {
                    value.push(' ');
                    value.push_str(&latin1(trim(line)));
                    continue;
                }
            }

            match line.iter().position(|&b| b == b':') {
                Some(colon) => fields.push((latin1(trim(&line[.. colon])), latin1(trim(&line[colon + 1 ..])))),
                None => debug!("skipping malformed header line {:?}", latin1(line))
            };
        }
    }
}

/// A stored HTTP response. The body can be read and rewound.
#[derive(Debug)]
pub struct Response {
    protocol: String,
    version: Vec<u32>,
    code: u16,
    reason: String,
    headers: Headers,
    warc_headers: Option<Headers>,
    url: Option<String>,
    request_url: Option<String>,
    magic_bytes: Vec<u8>,
    content: Cursor<Vec<u8>>
}

impl Response {
    /// Reads a stored response.
    ///
    /// If the headers give a `Content-Encoding` of `gzip` or `deflate`, the body is decompressed.
    /// Any other content encoding is left alone.
    pub fn from_readable<R: BufRead>(mut readable: R) -> Result<Self> {
        let mut status_line = read_line(&mut readable)?;

        let warc_headers = if status_line.starts_with(b"WARC/") {
            // The version isn't needed, but it has to make sense.
            parse_protocol_version(&status_line)?;
            let headers = Headers::parse(&mut readable)?;
            status_line = read_line(&mut readable)?;
            Some(headers)
        } else {
            None
        };

        let (protocol, version, code, reason) = parse_status_line(&status_line)?;
        let headers = Headers::parse(&mut readable)?;

        let request_url = headers.get("X-wex-request-url")
            .or_else(|| warc_headers.as_ref()?.get("WARC-Target-URI"))
            .map(str::to_owned);
        let url = headers.get("X-wex-url")
            .map(str::to_owned)
            .or_else(|| request_url.clone());

        let mut body = Vec::new();
        match headers.get("Content-Encoding").and_then(ContentEncoding::from_header) {
            Some(encoding) => {
                debug!("decoding {:?} content", encoding);
                ContentDecoder::new(readable, encoding).read_to_end(&mut body)?;
            },
            None => {
                readable.read_to_end(&mut body)?;
            }
        };
        let magic_bytes = body[.. usize::min(body.len(), MAGIC_BYTES_LEN)].to_vec();

        Ok(Self {
            protocol,
            version,
            code,
            reason,
            headers,
            warc_headers,
            url,
            request_url,
            magic_bytes,
            content: Cursor::new(body)
        })
    }

    /// The protocol from the status line, e.g. `HTTP`.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The protocol version from the status line, e.g. `[1, 1]`.
    pub fn version(&self) -> &[u32] {
        &self.version
    }

    /// The status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The HTTP headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The headers of the WARC record the response was stored in, if any.
    pub fn warc_headers(&self) -> Option<&Headers> {
        self.warc_headers.as_ref()
    }

    /// The value of the first HTTP header with the given name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// The URL the response came from.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The URL that was requested. This differs from [`Response::url`] after a redirect.
    pub fn request_url(&self) -> Option<&str> {
        self.request_url.as_deref()
    }

    /// The first few bytes of the (decompressed) body, for identifying its file type.
    pub fn magic_bytes(&self) -> &[u8] {
        &self.magic_bytes
    }

    /// The whole body.
    pub fn body(&self) -> &[u8] {
        self.content.get_ref()
    }
}

impl Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

impl Seek for Response {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.content.seek(pos)
    }
}

fn read_line<R: BufRead>(readable: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    readable.read_until(b'\n', &mut line)?;
    Ok(line)
}

fn parse_status_line(line: &[u8]) -> Result<(String, Vec<u32>, u16, String)> {
    let bad = || Error::BadStatusLine(String::from_utf8_lossy(line).into_owned());

    let (protocol_version, rest) = split_field(trim_newline(line));
    let (code, reason) = split_field(rest);

    if code.is_empty() || !code.iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }
    let code = core::str::from_utf8(code).ok()
        .and_then(|code| code.parse().ok())
        .ok_or_else(bad)?;
    let (protocol, version) = parse_protocol_version(protocol_version)?;

    Ok((protocol, version, code, String::from_utf8_lossy(reason).into_owned()))
}

// Parses something like `HTTP/1.1` or `WARC/1.0`. The version must be a dot-separated list of
// integers.
fn parse_protocol_version(field: &[u8]) -> Result<(String, Vec<u32>)> {
    let field = trim(trim_newline(field));
    let bad = || Error::BadStatusLine(String::from_utf8_lossy(field).into_owned());

    let slash = field.iter().position(|&b| b == b'/').unwrap_or(field.len());
    let protocol = String::from_utf8_lossy(&field[.. slash]).into_owned();
    let version = field.get(slash + 1 ..).unwrap_or_default();
    let version = version.split(|&b| b == b'.')
        .map(|part| core::str::from_utf8(part).ok()?.parse().ok())
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(bad)?;
    Ok((protocol, version))
}

// Splits off the first whitespace-delimited field.
fn split_field(s: &[u8]) -> (&[u8], &[u8]) {
    let s = trim_start(s);
    let end = s.iter().position(u8::is_ascii_whitespace).unwrap_or(s.len());
    (&s[.. end], trim_start(&s[end ..]))
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_start(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(s.len());
    &s[start ..]
}

fn trim(s: &[u8]) -> &[u8] {
    let s = trim_start(s);
    let end = s.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(0, |i| i + 1);
    &s[.. end]
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
