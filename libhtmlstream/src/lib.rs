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

//! This library turns the bytes of a web page into clean Unicode text, ready for an HTML parser.
//!
//! Web pages lie about their encodings all the time. The HTTP header says one thing, a `<meta>`
//! tag says another, and the bytes themselves say a third. So rather than trusting any one of
//! them, we collect every declaration, rank the declared encodings, and try them in turn,
//! starting over with the next one whenever the bytes turn out not to be valid in the current
//! one. The decoded text also has its invalid numeric character references (like `&#149;`)
//! rewritten to what the author meant.
//!
//! ```no_run
//! use {
//!     std::{fs::File, io::BufReader},
//!     libhtmlstream::{HtmlStream, Response}
//! };
//!
//! # fn main() -> libhtmlstream::Result<()> {
//! let response = Response::from_readable(BufReader::new(File::open("page.http")?))?;
//! let mut stream = HtmlStream::from_response(response);
//! let text = stream.read_to_string()?;
//! println!("{} characters of {}", text.chars().count(), stream.encoding().unwrap_or("?"));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod content;
pub mod error;
pub mod response;
pub mod stream;

pub use {
    config::{Config, EncodingTable, ScanLimits},
    error::{Error, Result},
    response::Response,
    stream::{
        HtmlStream,
        ncr::{ReplaceInvalidNcr, TextRead}
    }
};
