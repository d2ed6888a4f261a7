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

//! This module defines the closed set of character encodings we know how to decode, and the
//! parsing of encoding names out of `Content-Type` values.

use {
    core::fmt,
    encoding_rs::Encoding
};

/// A character encoding with an installed decoder.
///
/// Nearly everything is delegated to [`encoding_rs`], which implements the WHATWG Encoding
/// Standard. UTF-32 isn't part of that standard, but it can still be announced by a byte-order
/// mark, so it gets a small decoder of its own. So does plain ASCII, which the standard treats as
/// another name for windows-1252.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Codec {
    /// An encoding from the WHATWG Encoding Standard
    Whatwg(&'static Encoding),
    /// UTF-32, little-endian
    Utf32Le,
    /// UTF-32, big-endian
    Utf32Be,
    /// 7-bit US-ASCII. Every byte above 0x7f is an error.
    Ascii
}

impl Codec {
    /// UTF-8
    pub fn utf_8() -> Self {
        Codec::Whatwg(encoding_rs::UTF_8)
    }

    /// UTF-16, little-endian
    pub fn utf_16le() -> Self {
        Codec::Whatwg(encoding_rs::UTF_16LE)
    }

    /// UTF-16, big-endian
    pub fn utf_16be() -> Self {
        Codec::Whatwg(encoding_rs::UTF_16BE)
    }

    /// Windows-1252, the usual default for legacy Western content
    pub fn windows_1252() -> Self {
        Codec::Whatwg(encoding_rs::WINDOWS_1252)
    }

    /// The canonical name of the encoding.
    pub fn name(self) -> &'static str {
        match self {
            Codec::Whatwg(encoding) => encoding.name(),
            Codec::Utf32Le => "UTF-32LE",
            Codec::Utf32Be => "UTF-32BE",
            Codec::Ascii => "ASCII"
        }
    }

    /// Looks up the encoding with the given label. Labels are matched case-insensitively, after
    /// trimming ASCII whitespace.
    ///
    /// Besides the labels defined by the Encoding Standard, this accepts the spellings commonly
    /// produced by codec registries (e.g. `utf-16-le`, `euc_jp`), the UTF-32 family and ASCII. The
    /// "replacement" encoding is never returned: it can't decode anything.
    pub fn from_label(label: &[u8]) -> Option<Self> {
        // Trim the ASCII whitespace from the beginning and end of the label.
        let label_start = label.iter().position(|&b| !b.is_ascii_whitespace())?;
        let label_end = label.iter().rposition(|&b| !b.is_ascii_whitespace())? + 1;
        let label = &label[label_start .. label_end];

        macro_rules! match_ignore_ascii_case {
            (($var:expr) { $($($value:expr),+ => $encoding:expr;)* _ => $def_encoding:expr; }) => {
                $(
                    if $($var.eq_ignore_ascii_case($value) ||)+ false {
                        $encoding
                    } else
                )*
                {
                    $def_encoding
                }
            };
        }

        let extra = match_ignore_ascii_case! {
            (label) {
                b"utf-32",
                b"utf-32le",
                b"utf-32-le",
                b"utf_32",
                b"utf_32_le",
                b"ucs-4",
                b"ucs-4le" => Some(Codec::Utf32Le);
                b"utf-32be",
                b"utf-32-be",
                b"utf_32_be",
                b"ucs-4be" => Some(Codec::Utf32Be);
                b"utf_8",
                b"u8",
                b"utf8-sig",
                b"utf-8-sig" => Some(Codec::utf_8());
                b"utf-16-le",
                b"utf_16_le",
                b"utf_16" => Some(Codec::utf_16le());
                b"utf-16-be",
                b"utf_16_be" => Some(Codec::utf_16be());
                b"euc_jp",
                b"eucjp" => Some(Codec::Whatwg(encoding_rs::EUC_JP));
                b"euc_kr",
                b"euckr",
                b"cp949" => Some(Codec::Whatwg(encoding_rs::EUC_KR));
                b"cp932",
                b"shiftjis" => Some(Codec::Whatwg(encoding_rs::SHIFT_JIS));
                b"cp936" => Some(Codec::Whatwg(encoding_rs::GBK));
                b"cp874" => Some(Codec::Whatwg(encoding_rs::WINDOWS_874));
                b"ascii",
                b"us-ascii",
                b"us_ascii",
                b"646",
                b"ansi_x3.4-1968",
                b"ansi_x3.4-1986",
                b"iso646-us",
                b"iso_646.irv:1991",
                b"csascii",
                b"cp367",
                b"ibm367",
                b"iso-ir-6",
                b"us" => Some(Codec::Ascii);
                b"latin_1",
                b"iso8859_1" => Some(Codec::windows_1252());
                _ => None;
            }
        };

        match extra {
            Some(codec) => Some(codec),
            None => match Encoding::for_label(label) {
                Some(encoding) if encoding == encoding_rs::REPLACEMENT => None,
                Some(encoding) => Some(Codec::Whatwg(encoding)),
                None => None
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns every `charset` parameter in a `Content-Type` value, in order.
///
/// Pages have been seen with two `charset=` parameters, one right and one wrong, so all of them
/// are returned rather than only the first. Surrounding whitespace and quotation marks are
/// removed from the values.
pub fn content_type_charsets(content_type: &[u8]) -> Vec<&[u8]> {
    content_type.split(|&b| b == b';')
        .skip(1) // The media type itself
        .filter_map(|param| {
            let eq = param.iter().position(|&b| b == b'=');
            let (key, value) = match eq {
                Some(p) => (&param[.. p], &param[p + 1 ..]),
                None => (param, &param[param.len() ..])
            };
            if trim(key).eq_ignore_ascii_case(b"charset") {
                Some(unquote(trim(value)))
            } else {
                None
            }
        })
        .collect()
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start .. end]
}

fn unquote(bytes: &[u8]) -> &[u8] {
    match bytes {
        [quote @ (b'"' | b'\''), inner @ .., last] if last == quote => inner,
        _ => bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatwg_labels() {
        assert_eq!(Codec::from_label(b"utf-8"), Some(Codec::utf_8()));
        assert_eq!(Codec::from_label(b"  UTF8\t"), Some(Codec::utf_8()));
        assert_eq!(Codec::from_label(b"shift-jis").map(Codec::name), Some("Shift_JIS"));
        assert_eq!(Codec::from_label(b"latin1"), Some(Codec::windows_1252()));
    }

    #[test]
    fn registry_spellings() {
        assert_eq!(Codec::from_label(b"utf-16-le"), Some(Codec::utf_16le()));
        assert_eq!(Codec::from_label(b"UTF-16-BE"), Some(Codec::utf_16be()));
        assert_eq!(Codec::from_label(b"euc_jp").map(Codec::name), Some("EUC-JP"));
        assert_eq!(Codec::from_label(b"utf-32-be"), Some(Codec::Utf32Be));
    }

    #[test]
    fn ascii_is_not_windows_1252() {
        for label in [&b"ascii"[..], b"US-ASCII", b" 646 ", b"ANSI_X3.4-1968"] {
            assert_eq!(Codec::from_label(label), Some(Codec::Ascii));
        }
        assert_eq!(Codec::Ascii.name(), "ASCII");
        assert_eq!(Codec::from_label(b"latin1"), Some(Codec::windows_1252()));
    }

    #[test]
    fn unsupported_labels() {
        assert_eq!(Codec::from_label(b""), None);
        assert_eq!(Codec::from_label(b"   "), None);
        assert_eq!(Codec::from_label(b"no-such-encoding"), None);
        assert_eq!(Codec::from_label(b"iso-2022-kr"), None);
    }

    #[test]
    fn charset_parameters() {
        assert_eq!(content_type_charsets(b"text/html; charset=utf-8"), vec![&b"utf-8"[..]]);
        assert_eq!(content_type_charsets(b"text/html;CharSet = \"Shift_JIS\" "), vec![&b"Shift_JIS"[..]]);
        assert_eq!(
            content_type_charsets(b"text/html; charset=utf-8; charset=iso-8859-1"),
            vec![&b"utf-8"[..], &b"iso-8859-1"[..]]
        );
    }

    #[test]
    fn charset_parameters_missing() {
        assert!(content_type_charsets(b"").is_empty());
        assert!(content_type_charsets(b"text/html").is_empty());
        assert!(content_type_charsets(b"charset=utf-8").is_empty());
        assert!(content_type_charsets(b"text/html; boundary=x").is_empty());
    }
}
