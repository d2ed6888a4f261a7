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

//! This module defines the chain of decoders that are tried, one after another, until one of them
//! manages to decode the whole byte stream.

use {
    core::{cmp::Reverse, mem},
    std::io::{self, Read, Seek, SeekFrom},
    encoding_rs::{CoderResult, Decoder, DecoderResult},
    log::{debug, warn},
    crate::{
        config::{Config, EncodingTable},
        error::{Error, Result}
    },
    super::{
        encoding::Codec,
        prescan::{Bom, DeclaredEncoding}
    }
};

/// What a decoder does with bytes that aren't valid in its encoding.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorMode {
    /// Fail with [`Error::Decode`].
    Strict,
    /// Substitute U+FFFD REPLACEMENT CHARACTER and carry on. A decoder in this mode never fails.
    Replace
}

/// One entry in a [`DecoderChain`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Candidate {
    /// The encoding to decode with
    pub codec: Codec,
    /// How to handle invalid input
    pub mode: ErrorMode
}

impl Candidate {
    /// The canonical name of the candidate's encoding.
    pub fn name(&self) -> &'static str {
        self.codec.name()
    }
}

/// Ranks the declared encodings by resilience score, highest first.
///
/// Names are normalized through the table's substitutions; names with no supported decoder are
/// dropped, and duplicates are removed. Ties keep the order in which the declarations were found.
pub fn ranked_encodings(declared: &[DeclaredEncoding], table: &EncodingTable) -> Vec<Codec> {
    let mut ranked = Vec::with_capacity(declared.len());
    for declaration in declared {
        match table.normalize(&declaration.name) {
            Some(codec) => if !ranked.contains(&codec) {
                ranked.push(codec);
            },
            None => warn!("ignoring unsupported encoding {:?} ({})", declaration.name, declaration.label)
        };
    }
    // `sort_by_key` is stable.
    ranked.sort_by_key(|&codec| Reverse(table.rank(codec)));
    ranked
}

/// An ordered sequence of candidate decoders, plus the state of the one currently in use.
///
/// Every candidate except the last decodes strictly. When the current candidate fails, the caller
/// calls [`DecoderChain::next_encoding`], which rewinds the byte source and starts over with the
/// next candidate. The last candidate replaces invalid input instead of failing, so reading from
/// it always succeeds.
#[derive(Debug)]
pub struct DecoderChain {
    candidates: Vec<Candidate>,
    index: usize,
    decoder: CodecDecoder,
    bom: Option<Bom>,
    // The number of BOM bytes still to be skipped.
    bom_remaining: usize,
    // Decoded text that hasn't been returned yet
    decoded: String,
    // The source has ended and the decoder has been flushed.
    flushed: bool,
    // The error from the current candidate, if it has failed.
    failure: Option<(&'static str, u64)>,
    read_size: usize
}

impl DecoderChain {
    /// Builds the chain for the given declarations.
    ///
    /// The chain holds one strict candidate per ranked encoding, then strict UTF-8 (unless it was
    /// already ranked), then a replacing fallback: the highest-ranked encoding if there was one,
    /// and otherwise `config.default_encoding`.
    ///
    /// The chain starts out on its first candidate and assumes the byte source is positioned at
    /// the start, as [`super::prescan::scan`] leaves it.
    pub fn build(declared: &[DeclaredEncoding], bom: Option<Bom>, config: &Config) -> Self {
        let ranked = ranked_encodings(declared, &config.table);

        let mut candidates: Vec<Candidate> = ranked.iter()
            .map(|&codec| Candidate { codec, mode: ErrorMode::Strict })
            .collect();
        if !ranked.contains(&Codec::utf_8()) {
            candidates.push(Candidate { codec: Codec::utf_8(), mode: ErrorMode::Strict });
        }
        // Character set detection could go here.
        let fallback = ranked.first().copied().unwrap_or(config.default_encoding);
        candidates.push(Candidate { codec: fallback, mode: ErrorMode::Replace });

        debug!(
            "decoder chain: {:?}",
            candidates.iter().map(|c| format!("{}/{:?}", c.name(), c.mode)).collect::<Vec<_>>()
        );

        let first = candidates[0];
        let mut chain = Self {
            candidates,
            index: 0,
            decoder: CodecDecoder::new(first.codec, first.mode),
            bom,
            bom_remaining: 0,
            decoded: String::new(),
            flushed: false,
            failure: None,
            read_size: usize::max(config.limits.read_size, 1)
        };
        chain.reset();
        chain
    }

    /// All the candidates, in the order they're tried.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// The candidate currently in use.
    pub fn current(&self) -> &Candidate {
        &self.candidates[self.index]
    }

    /// Returns `true` if the current candidate is the final fallback.
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.candidates.len()
    }

    /// Returns `true` once everything in the source has been decoded and returned.
    pub fn is_exhausted(&self) -> bool {
        self.flushed && self.decoded.is_empty()
    }

    /// Rewinds the source and switches to the next candidate. Any text decoded by the previous
    /// candidate is discarded.
    pub fn next_encoding<S: Seek>(&mut self, source: &mut S) -> Result<()> {
        if self.is_last() {
            return Err(Error::CandidatesExhausted);
        }
        source.seek(SeekFrom::Start(0))?;
        self.index += 1;
        let candidate = self.candidates[self.index];
        debug!("restarting with {} ({:?})", candidate.name(), candidate.mode);
        self.decoder = CodecDecoder::new(candidate.codec, candidate.mode);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.decoded.clear();
        self.flushed = false;
        self.failure = None;
        self.bom_remaining = match self.bom {
            Some(bom) if bom.codec == self.current().codec => bom.len,
            _ => 0
        };
    }

    /// Reads up to `size` characters of decoded text, or everything that's left if `size` is
    /// `None`. An empty string means the source has ended.
    ///
    /// Bytes are pulled from the source, a configured number at a time, only until enough text has
    /// been decoded; anything decoded beyond `size` is kept for the next call. Once the current candidate has failed, every call
    /// fails the same way until [`DecoderChain::next_encoding`] is called.
    pub fn read<S: Read>(&mut self, source: &mut S, size: Option<usize>) -> Result<String> {
        if let Some((encoding, position)) = self.failure {
            return Err(Error::Decode { encoding, position });
        }
        if size == Some(0) {
            return Ok(String::new());
        }

        let mut buffer = vec![0u8; self.read_size];
        while !self.flushed && size.map_or(true, |size| self.decoded.chars().count() < size) {
            let len = read_some(source, &mut buffer)?;
            let result = if len == 0 {
                // Tell the decoder to flush.
                self.flushed = true;
                self.decoder.decode(&[], true, &mut self.decoded)
            } else {
                let skip = usize::min(self.bom_remaining, len);
                self.bom_remaining -= skip;
                self.decoder.consumed += skip as u64;
                self.decoder.decode(&buffer[skip .. len], false, &mut self.decoded)
            };
            if let Err(e) = result {
                if let Error::Decode { encoding, position } = e {
                    self.failure = Some((encoding, position));
                }
                self.decoded.clear();
                return Err(e);
            }
        }

        Ok(match size {
            Some(size) => take_chars(&mut self.decoded, size),
            None => mem::take(&mut self.decoded)
        })
    }
}

// Removes and returns up to `n` characters from the start of `s`.
pub(crate) fn take_chars(s: &mut String, n: usize) -> String {
    let split = s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    let rest = s.split_off(split);
    mem::replace(s, rest)
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

/// An incremental decoder for one [`Codec`]. Multi-byte sequences split between calls are carried
/// over to the next call.
pub struct CodecDecoder {
    codec: Codec,
    mode: ErrorMode,
    inner: Inner,
    // The number of bytes fed in so far
    consumed: u64
}

enum Inner {
    Whatwg(Decoder),
    Utf32 {
        big_endian: bool,
        partial: Vec<u8>
    },
    Ascii
}

impl core::fmt::Debug for CodecDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("CodecDecoder")
            .field("codec", &self.codec.name())
            .field("mode", &self.mode)
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl CodecDecoder {
    /// Creates a decoder in its initial state. Byte-order marks are not handled; they are just
    /// more bytes to decode.
    pub fn new(codec: Codec, mode: ErrorMode) -> Self {
        let inner = match codec {
            Codec::Whatwg(encoding) => Inner::Whatwg(encoding.new_decoder_without_bom_handling()),
            Codec::Utf32Le => Inner::Utf32 { big_endian: false, partial: Vec::with_capacity(4) },
            Codec::Utf32Be => Inner::Utf32 { big_endian: true, partial: Vec::with_capacity(4) },
            Codec::Ascii => Inner::Ascii
        };
        Self { codec, mode, inner, consumed: 0 }
    }

    /// Decodes `bytes`, appending the text to `out`. If `last` is `true`, any incomplete sequence
    /// left over from earlier calls is flushed, which is an error in strict mode.
    pub fn decode(&mut self, bytes: &[u8], last: bool, out: &mut String) -> Result<()> {
        let start = self.consumed;
        self.consumed += bytes.len() as u64;
        let name = self.codec.name();

        match (&mut self.inner, self.mode) {
            (Inner::Whatwg(decoder), ErrorMode::Strict) => {
                let mut input = bytes;
                let mut offset = start;
                loop {
                    let needed = decoder.max_utf8_buffer_length_without_replacement(input.len());
                    out.reserve(needed.unwrap_or(input.len()));
                    let (result, read) = decoder.decode_to_string_without_replacement(input, out, last);
                    offset += read as u64;
                    match result {
                        DecoderResult::InputEmpty => return Ok(()),
                        DecoderResult::OutputFull => input = &input[read ..],
                        DecoderResult::Malformed(bad, extra) => {
                            let position = offset.saturating_sub(bad as u64 + extra as u64);
                            return Err(Error::Decode { encoding: name, position });
                        }
                    };
                }
            },
            (Inner::Whatwg(decoder), ErrorMode::Replace) => {
                let mut input = bytes;
                loop {
                    let needed = decoder.max_utf8_buffer_length(input.len());
                    out.reserve(needed.unwrap_or(input.len()));
                    let (result, read, _) = decoder.decode_to_string(input, out, last);
                    match result {
                        CoderResult::InputEmpty => return Ok(()),
                        CoderResult::OutputFull => input = &input[read ..]
                    };
                }
            },
            (Inner::Utf32 { big_endian, partial }, mode) => {
                decode_utf32(*big_endian, partial, bytes, last, mode == ErrorMode::Strict, out)
                    .map_err(|index| Error::Decode { encoding: name, position: (start as i64 + index) as u64 })
            },
            (Inner::Ascii, ErrorMode::Strict) => {
                if let Some(index) = bytes.iter().position(|&b| !b.is_ascii()) {
                    return Err(Error::Decode { encoding: name, position: start + index as u64 });
                }
                out.extend(bytes.iter().map(|&b| b as char));
                Ok(())
            },
            (Inner::Ascii, ErrorMode::Replace) => {
                out.extend(bytes.iter().map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER }));
                Ok(())
            }
        }
    }
}

// Decodes UTF-32 in either byte order. `partial` holds the bytes of an incomplete code unit from
// the previous call. On failure, returns the offset (relative to `bytes`) of the offending unit.
fn decode_utf32(
        big_endian: bool,
        partial: &mut Vec<u8>,
        bytes: &[u8],
        last: bool,
        strict: bool,
        out: &mut String
) -> core::result::Result<(), i64> {
    // Offsets are relative to the start of `bytes`, so the carried-over bytes come before 0.
    let mut unit_start = -(partial.len() as i64);
    let mut bytes = bytes.iter();

    loop {
        while partial.len() < 4 {
            match bytes.next() {
                Some(&b) => partial.push(b),
                None => {
                    if last && !partial.is_empty() {
                        // A truncated code unit at the end of the stream
                        if strict {
                            return Err(unit_start);
                        }
                        partial.clear();
                        out.push(char::REPLACEMENT_CHARACTER);
                    }
                    return Ok(());
                }
            };
        }

        let unit = [partial[0], partial[1], partial[2], partial[3]];
        let code_point = if big_endian { u32::from_be_bytes(unit) } else { u32::from_le_bytes(unit) };
        match char::from_u32(code_point) {
            Some(c) => out.push(c),
            None if strict => return Err(unit_start),
            None => out.push(char::REPLACEMENT_CHARACTER)
        };
        partial.clear();
        unit_start += 4;
    }
}
