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

//! Tunable data used while choosing an encoding. None of this is global: a [`Config`] is handed to
//! each [`crate::HtmlStream`], and tests are free to build their own.

use {
    std::collections::HashMap,
    crate::stream::encoding::Codec
};

/// Everything an [`crate::HtmlStream`] needs to know besides the bytes themselves.
#[derive(Debug, Clone)]
pub struct Config {
    /// Alias substitutions and resilience ranking.
    pub table: EncodingTable,
    /// How much of the document the declaration scanner is allowed to look at.
    pub limits: ScanLimits,
    /// The encoding used for the final fallback when nothing was declared.
    pub default_encoding: Codec
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table: EncodingTable::default(),
            limits: ScanLimits::default(),
            default_encoding: Codec::windows_1252()
        }
    }
}

/// Byte budgets for reading the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// The number of bytes the declaration scanner reads at a time. Must be at least 4 so the
    /// whole of any byte-order mark can be seen.
    pub chunk_size: usize,
    /// The declaration scanner stops after reading this many bytes, even if the `<head>` hasn't
    /// ended yet.
    pub max_bytes: usize,
    /// The number of bytes pulled from the source per step when a read has no size limit.
    pub read_size: usize
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024,
            max_bytes:  40 * 1024,
            read_size:  1024
        }
    }
}

/// The static reference data used to turn declared encoding names into a ranked list of
/// decoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingTable {
    // Lower-case label -> lower-case label of an encoding whose printable repertoire is a superset.
    substitutions: HashMap<String, String>,
    // Lower-case canonical name -> score
    ranking: HashMap<String, u32>
}

// Encodings where the printable characters are a superset of the declared one. Decoding with the
// superset accepts everything the declared encoding would, plus the bytes that pages mislabelled
// this way actually contain.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("gb2312",     "gbk"),
    ("iso-8859-1", "windows-1252"),
    ("iso-8859-9", "windows-1254")
];

// Out of 10,000 random 8-byte strings, the number that failed to decode under each encoding. An
// encoding that rejects more input is tried earlier: if it does decode the page cleanly, that's
// much stronger evidence than a clean decode by an encoding that accepts nearly anything.
// Anything not listed here failed on none of the strings.
const RANKING: &[(&str, u32)] = &[
    ("ASCII",        99627),
    ("UTF-8",        99095),
    ("EUC-JP",       96995),
    ("EUC-KR",       96158),
    ("Big5",         90760),
    ("GBK",          74930),
    ("Shift_JIS",    71873),
    ("windows-1255", 52721),
    ("windows-874",  24760),
    ("windows-1254", 19754),
    ("windows-1252", 14429),
    ("windows-1250", 14390),
    ("ISO-8859-7",   9059),
    ("windows-1251", 3058)
];

impl Default for EncodingTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for &(from, to) in SUBSTITUTIONS {
            table = table.with_substitution(from, to);
        }
        for &(name, score) in RANKING {
            table = table.with_rank(name, score);
        }
        table
    }
}

impl EncodingTable {
    /// Returns a table with no substitutions, in which every encoding scores zero.
    pub fn empty() -> Self {
        Self {
            substitutions: HashMap::new(),
            ranking: HashMap::new()
        }
    }

    /// Adds (or replaces) a substitution: whenever `from` is declared, `to` is used instead.
    /// Either name may be any label the decoders recognize.
    pub fn with_substitution(mut self, from: &str, to: &str) -> Self {
        self.substitutions.insert(from.trim().to_ascii_lowercase(), to.trim().to_ascii_lowercase());
        self
    }

    /// Sets the resilience score of the encoding with the given label.
    pub fn with_rank(mut self, name: &str, score: u32) -> Self {
        let key = match Codec::from_label(name.as_bytes()) {
            Some(codec) => codec.name().to_ascii_lowercase(),
            None => name.trim().to_ascii_lowercase()
        };
        self.ranking.insert(key, score);
        self
    }

    /// Resolves a declared encoding name to a decoder, applying any substitution. Returns `None`
    /// if no supported decoder goes by that name.
    pub fn normalize(&self, label: &str) -> Option<Codec> {
        let label = label.trim().to_ascii_lowercase();
        let label = self.substitutions.get(&label).unwrap_or(&label);
        let codec = Codec::from_label(label.as_bytes())?;

        // The declared label may be an alias of a name that has a substitution of its own.
        match self.substitutions.get(&codec.name().to_ascii_lowercase()) {
            Some(substitute) => Some(Codec::from_label(substitute.as_bytes()).unwrap_or(codec)),
            None => Some(codec)
        }
    }

    /// The resilience score of the given encoding. Higher scores are tried first.
    pub fn rank(&self, codec: Codec) -> u32 {
        self.ranking.get(&codec.name().to_ascii_lowercase()).copied().unwrap_or(0)
    }
}
