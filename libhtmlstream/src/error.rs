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

//! The errors that can come out of this crate.

use {
    std::io,
    thiserror::Error
};

/// Everything that can go wrong while turning a byte stream into sanitized text.
#[derive(Debug, Error)]
pub enum Error {
    /// A strict decoder found bytes that are not valid in its encoding. [`crate::HtmlStream`]
    /// consumes these by moving on to the next candidate encoding; they only reach the caller
    /// when a [`crate::stream::decoder::DecoderChain`] is driven by hand.
    #[error("bytes at offset {position} are not valid {encoding}")]
    Decode {
        /// The canonical name of the encoding that rejected the input.
        encoding: &'static str,
        /// The offset of the first rejected byte, counted from the start of the decoded body.
        position: u64
    },

    /// The byte source itself failed. Nothing here can recover from that.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A stored HTTP response began with something that isn't a status line.
    #[error("bad status line: {0:?}")]
    BadStatusLine(String),

    /// The decoder chain was asked to advance past its final fallback.
    #[error("no candidate encodings remain")]
    CandidatesExhausted
}

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this is a decode error, i.e. one that can be fixed by trying another
    /// encoding.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }
}
