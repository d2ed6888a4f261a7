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

//! Decoders for HTTP `Content-Encoding`s.
//!
//! Only the zlib family is supported: `gzip` and `deflate`. Servers disagree about what `deflate`
//! means. RFC 9110 says it's a zlib stream, but some servers send raw DEFLATE data instead, so we
//! look at the first two bytes to decide which one we've got.

use {
    core::mem,
    std::io::{self, Chain, Cursor, Read},
    flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder},
    log::debug
};

/// A content encoding we know how to undo.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContentEncoding {
    /// `gzip` (or `x-gzip`)
    Gzip,
    /// `deflate`
    Deflate
}

impl ContentEncoding {
    /// Parses the value of a `Content-Encoding` header. Returns `None` for `identity` and for
    /// anything we don't support.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Some(ContentEncoding::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(ContentEncoding::Deflate)
        } else {
            None
        }
    }
}

type Sniffed<R> = Chain<Cursor<Vec<u8>>, R>;

enum State<R: Read> {
    Gzip(GzDecoder<R>),
    // We haven't seen the header yet.
    Deflate(R),
    Zlib(ZlibDecoder<Sniffed<R>>),
    Raw(DeflateDecoder<Sniffed<R>>),
    Empty
}

/// Reads decompressed bytes from a compressed stream.
pub struct ContentDecoder<R: Read> {
    state: State<R>
}

impl<R: Read> core::fmt::Debug for ContentDecoder<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let state = match self.state {
            State::Gzip(_) => "gzip",
            State::Deflate(_) => "deflate",
            State::Zlib(_) => "zlib",
            State::Raw(_) => "raw deflate",
            State::Empty => "empty"
        };
        f.debug_struct("ContentDecoder").field("state", &state).finish()
    }
}

impl<R: Read> ContentDecoder<R> {
    /// Wraps `reader`, which holds data in the given encoding.
    pub fn new(reader: R, encoding: ContentEncoding) -> Self {
        let state = match encoding {
            ContentEncoding::Gzip => State::Gzip(GzDecoder::new(reader)),
            ContentEncoding::Deflate => State::Deflate(reader)
        };
        Self { state }
    }

    // Decides what kind of `deflate` this is.
    fn sniff(&mut self) -> io::Result<()> {
        let mut reader = match mem::replace(&mut self.state, State::Empty) {
            State::Deflate(reader) => reader,
            state => {
                self.state = state;
                return Ok(());
            }
        };

        let mut header = [0u8; 2];
        let mut len = 0;
        while len < header.len() {
            match reader.read(&mut header[len ..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    self.state = State::Deflate(reader);
                    return Err(e);
                }
            };
        }

        let zlib = match header[.. len] {
            [cmf, flg] => is_zlib_header(cmf, flg),
            _ => false
        };
        let header = Cursor::new(header[.. len].to_vec());
        self.state = if len == 0 {
            State::Empty
        } else if zlib {
            State::Zlib(ZlibDecoder::new(header.chain(reader)))
        } else {
            debug!("deflate content without a zlib header");
            State::Raw(DeflateDecoder::new(header.chain(reader)))
        };
        Ok(())
    }
}

// RFC 1950: the compression method must be 8 (DEFLATE), and the first two bytes, read as a
// big-endian number, must be a multiple of 31.
fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

impl<R: Read> Read for ContentDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sniff()?;
        match &mut self.state {
            State::Gzip(decoder) => decoder.read(buf),
            State::Zlib(decoder) => decoder.read(buf),
            State::Raw(decoder) => decoder.read(buf),
            State::Deflate(_) | State::Empty => Ok(0)
        }
    }
}
