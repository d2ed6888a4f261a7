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

//! The decode-and-sanitize pipeline: bytes go in, clean Unicode text comes out.
//!
//! [`HtmlStream`] ties the pieces together. On the first read, it [prescans](prescan) the source
//! for encoding declarations and builds a [chain of decoders](decoder::DecoderChain) from them.
//! Text from the current decoder is passed through the [reference sanitizer](ncr) on its way
//! out. If a decoder meets bytes it can't decode, the whole stream is restarted from the first
//! byte with the next decoder in the chain, and the consumer has to start over too.

use {
    std::io::{Read, Seek},
    log::debug,
    crate::{
        config::Config,
        error::Result,
        response::Response
    },
    self::{
        decoder::{take_chars, DecoderChain},
        ncr::{ReferenceSanitizer, TextRead},
        prescan::DeclaredEncoding
    }
};

pub mod decoder;
pub mod encoding;
pub mod ncr;
pub mod prescan;

/// A stream of decoded and sanitized text read from a stream of bytes.
///
/// The byte source must be seekable, since decoding may have to restart from the beginning. If
/// that happens, [`HtmlStream::restarts`] goes up, and any text read before the restart should be
/// thrown away.
#[derive(Debug)]
pub struct HtmlStream<S: Read + Seek> {
    source: S,
    config: Config,
    http_content_type: Option<String>,

    // Built on the first read
    chain: Option<DecoderChain>,
    declared: Vec<DeclaredEncoding>,

    sanitizer: ReferenceSanitizer,
    // Sanitized text that hasn't been returned yet
    ready: String,
    eof: bool,
    restarts: usize
}

impl<S: Read + Seek> HtmlStream<S> {
    /// Creates a stream with the default configuration. `http_content_type` is the value of the
    /// `Content-Type` header the bytes came with, if any.
    pub fn new(source: S, http_content_type: Option<&str>) -> Self {
        Self::with_config(source, http_content_type, Config::default())
    }

    /// Creates a stream with the given configuration.
    pub fn with_config(source: S, http_content_type: Option<&str>, config: Config) -> Self {
        Self {
            source,
            config,
            http_content_type: http_content_type.map(str::to_owned),
            chain: None,
            declared: Vec::new(),
            sanitizer: ReferenceSanitizer::new(),
            ready: String::new(),
            eof: false,
            restarts: 0
        }
    }

    /// The name of the encoding currently being decoded, or `None` before the first read.
    pub fn encoding(&self) -> Option<&'static str> {
        self.chain.as_ref().map(|chain| chain.current().name())
    }

    /// The encodings declared by the HTTP header, byte-order mark, and `<meta>` tags. This is
    /// empty until the first read.
    pub fn declared_encodings(&self) -> &[DeclaredEncoding] {
        &self.declared
    }

    /// The decoder chain, or `None` before the first read.
    pub fn decoder_chain(&self) -> Option<&DecoderChain> {
        self.chain.as_ref()
    }

    /// The number of times decoding has restarted with a different encoding.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Unwraps the byte source.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Reads up to `size` characters of clean text, or everything that's left if `size` is
    /// `None`. An empty string means the end of the stream.
    ///
    /// If this call had to restart decoding, the text it returns comes from the start of the
    /// document again. Compare [`HtmlStream::restarts`] before and after to find out.
    pub fn read(&mut self, size: Option<usize>) -> Result<String> {
        if size == Some(0) {
            return Ok(String::new());
        }
        while !self.eof && size.map_or(true, |size| self.ready.chars().count() < size) {
            let chunk = self.decode(size)?;
            self.eof = chunk.is_empty();
            let clean = self.sanitizer.process(&chunk, self.eof);
            self.ready.push_str(&clean);
        }
        Ok(match size {
            Some(size) => take_chars(&mut self.ready, size),
            None => core::mem::take(&mut self.ready)
        })
    }

    /// Reads the whole document. Whenever decoding restarts, the text read so far is discarded,
    /// so the result is always the document as decoded by the last decoder used.
    pub fn read_to_string(&mut self) -> Result<String> {
        let size = usize::max(self.config.limits.read_size, 1);
        let mut text = String::new();
        let mut restarts = self.restarts;
        loop {
            let chunk = self.read(Some(size))?;
            if self.restarts != restarts {
                restarts = self.restarts;
                text.clear();
            }
            if chunk.is_empty() {
                return Ok(text);
            }
            text.push_str(&chunk);
        }
    }

    // Reads decoded (but not yet sanitized) text, restarting with the next decoder as often as
    // necessary.
    fn decode(&mut self, size: Option<usize>) -> Result<String> {
        loop {
            let chain = match self.chain.as_mut() {
                Some(chain) => chain,
                None => {
                    self.start()?;
                    continue;
                }
            };
            match chain.read(&mut self.source, size) {
                Err(e) if e.is_decode() => {
                    debug!("{}", e);
                    // The last decoder replaces bad bytes, so this can't go on forever.
                    chain.next_encoding(&mut self.source)?;
                    self.sanitizer.reset();
                    self.ready.clear();
                    self.eof = false;
                    self.restarts += 1;
                },
                result => return result
            };
        }
    }

    fn start(&mut self) -> Result<()> {
        let prescan = prescan::scan(
            &mut self.source,
            self.http_content_type.as_deref(),
            &self.config.limits
        )?;
        self.chain = Some(DecoderChain::build(&prescan.encodings, prescan.bom, &self.config));
        self.declared = prescan.encodings;
        Ok(())
    }
}

impl HtmlStream<Response> {
    /// Creates a stream over the body of a stored HTTP response, taking the `Content-Type` from
    /// its headers.
    pub fn from_response(response: Response) -> Self {
        Self::from_response_with_config(response, Config::default())
    }

    /// Like [`HtmlStream::from_response`], but with the given configuration.
    pub fn from_response_with_config(response: Response, config: Config) -> Self {
        let content_type = response.content_type().map(str::to_owned);
        Self::with_config(response, content_type.as_deref(), config)
    }
}

impl<S: Read + Seek> TextRead for HtmlStream<S> {
    fn read_text(&mut self, size: Option<usize>) -> Result<String> {
        self.read(size)
    }

    fn restarts(&self) -> usize {
        self.restarts
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::io::Cursor,
        crate::config::ScanLimits
    };

    fn stream(bytes: &[u8], content_type: Option<&str>) -> HtmlStream<Cursor<Vec<u8>>> {
        HtmlStream::new(Cursor::new(bytes.to_vec()), content_type)
    }

    #[test]
    fn nothing_before_first_read() {
        let stream = stream(b"<p>hi</p>", None);
        assert_eq!(stream.encoding(), None);
        assert!(stream.declared_encodings().is_empty());
        assert!(stream.decoder_chain().is_none());
    }

    #[test]
    fn ascii() {
        let mut stream = stream(b"<p>&#149; hi</p>", None);
        assert_eq!(stream.read(None).unwrap(), "<p>&#x2022; hi</p>");
        assert_eq!(stream.read(None).unwrap(), "");
        assert_eq!(stream.encoding(), Some("UTF-8"));
        assert_eq!(stream.restarts(), 0);
    }

    #[test]
    fn zero_size_read() {
        let mut stream = stream(b"abc", None);
        assert_eq!(stream.read(Some(0)).unwrap(), "");
        assert_eq!(stream.read(Some(5)).unwrap(), "abc");
    }

    #[test]
    fn restart_on_bad_bytes() {
        // Valid UTF-8 for more than one read's worth of bytes, then a windows-1252 curly quote.
        let mut bytes = "<p>caf\u{e9} ".repeat(200).into_bytes();
        bytes.extend_from_slice(b"\x93quoted\x94</p>");
        let mut stream = stream(&bytes, None);

        let first = stream.read(Some(10)).unwrap();
        assert_eq!(first, "<p>caf\u{e9} <p");
        assert_eq!(stream.restarts(), 0);

        // Every byte is one character in windows-1252, including the UTF-8 ones.
        let text = stream.read_to_string().unwrap();
        assert_eq!(stream.restarts(), 1);
        assert_eq!(stream.encoding(), Some("windows-1252"));
        assert!(text.starts_with("<p>caf\u{c3}\u{a9} <p>"));
        assert!(text.ends_with("\u{201c}quoted\u{201d}</p>"));
        assert_eq!(text.chars().count(), bytes.len());
    }

    #[test]
    fn huge_size_read() {
        let mut stream = stream(b"<p>&#149;</p>", None);
        assert_eq!(stream.read(Some(usize::MAX)).unwrap(), "<p>&#x2022;</p>");
        assert_eq!(stream.read(Some(usize::MAX)).unwrap(), "");
    }

    #[test]
    fn sanitizing_wrapper_follows_restarts() {
        let mut bytes = "<p>caf\u{e9} ".repeat(200).into_bytes();
        bytes.extend_from_slice(b"\x93q\x94</p>");
        let expected = stream(&bytes, None).read_to_string().unwrap();

        let mut wrapper = ncr::ReplaceInvalidNcr::new(stream(&bytes, None));
        let mut text = String::new();
        let mut restarts = wrapper.restarts();
        loop {
            let chunk = wrapper.read_text(Some(50)).unwrap();
            if wrapper.restarts() != restarts {
                restarts = wrapper.restarts();
                text.clear();
            }
            if chunk.is_empty() {
                break;
            }
            text.push_str(&chunk);
        }
        assert_eq!(restarts, 1);
        assert_eq!(wrapper.get_ref().restarts(), 1);
        assert_eq!(text.matches("<p>").count(), 200);
        assert_eq!(text, expected);
    }

    #[test]
    fn restart_discards_buffered_text() {
        let mut bytes = b"<script>".to_vec();
        bytes.extend(core::iter::repeat(b'a').take(2000));
        bytes.extend_from_slice(b"\xff</script>&#149;");
        let mut stream = stream(&bytes, None);

        let text = stream.read_to_string().unwrap();
        assert_eq!(stream.restarts(), 1);
        assert_eq!(text.len(), 8 + 2000 + 2 + 9 + 8);
        assert!(text.starts_with("<script>aaa"));
        assert!(text.ends_with("a\u{ff}</script>&#x2022;"));
        assert_eq!(stream.sanitizer.cdata(), ncr::CdataState::None);
    }

    #[test]
    fn fallback_after_immediate_failure() {
        let mut stream = stream(b"&#149;\x81<script>", None);
        assert_eq!(stream.read_to_string().unwrap(), "&#x2022;\u{81}<script>");
        assert_eq!(stream.restarts(), 1);
    }

    #[test]
    fn small_config() {
        let config = Config {
            limits: ScanLimits { chunk_size: 3, max_bytes: 64, read_size: 2 },
            ..Config::default()
        };
        let bytes = b"<meta charset=shift_jis><p>\x8b\x90</p>";
        let mut stream = HtmlStream::with_config(Cursor::new(bytes.to_vec()), None, config);
        assert_eq!(stream.read_to_string().unwrap(), "<meta charset=shift_jis><p>\u{5de8}</p>");
        assert_eq!(stream.encoding(), Some("Shift_JIS"));
        assert_eq!(stream.declared_encodings().len(), 1);
    }

    #[test]
    fn into_inner() {
        let mut stream = stream(b"abc", None);
        stream.read(None).unwrap();
        assert_eq!(stream.into_inner().into_inner(), b"abc");
    }
}
