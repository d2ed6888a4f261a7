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

//! Whole-pipeline tests over stored HTTP responses.

use {
    std::{
        fs::File,
        io::{BufReader, Cursor},
        path::PathBuf
    },
    libhtmlstream::{
        Config, EncodingTable, HtmlStream, Response, TextRead, ReplaceInvalidNcr,
        stream::{
            decoder::ErrorMode,
            prescan::{DeclaredEncoding, Label}
        }
    }
};

fn response(file_name: &str) -> Response {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(file_name);
    let file = File::open(&path)
        .unwrap_or_else(|e| panic!("failed to open test file `{}`: {}", path.display(), e));
    Response::from_readable(BufReader::new(file))
        .unwrap_or_else(|e| panic!("failed to read response from `{}`: {}", path.display(), e))
}

fn declared(label: Label, name: &str) -> DeclaredEncoding {
    DeclaredEncoding { label, name: name.into() }
}

// Reads everything `size` characters at a time, starting over whenever decoding restarts.
fn read_in_chunks<S: std::io::Read + std::io::Seek>(stream: &mut HtmlStream<S>, size: usize) -> String {
    let mut text = String::new();
    let mut restarts = stream.restarts();
    loop {
        let chunk = stream.read(Some(size)).expect("read failed");
        if stream.restarts() != restarts {
            restarts = stream.restarts();
            text.clear();
        }
        if chunk.is_empty() {
            return text;
        }
        assert!(chunk.chars().count() <= size);
        text.push_str(&chunk);
    }
}

macro_rules! file_test {
    (
        $test_name:ident,
        response from $file_name:expr,
        $closure:expr
    ) => {
        #[test]
        fn $test_name() {
            let mut stream = HtmlStream::from_response(response($file_name));
            let text = stream.read_to_string().expect("read failed");
            $closure(stream, text);

            // The result can't depend on how much is read at a time.
            for size in [1, 2, 3, 17, 4096] {
                let mut chunked = HtmlStream::from_response(response($file_name));
                let mut whole = HtmlStream::from_response(response($file_name));
                assert_eq!(
                    read_in_chunks(&mut chunked, size),
                    whole.read_to_string().unwrap(),
                    "reading {} characters at a time", size
                );
            }
        }
    };
}

file_test! {
    ascii,
    response from "ascii.http",

    |stream: HtmlStream<Response>, text: String| {
        assert!(stream.declared_encodings().is_empty());
        assert_eq!(stream.encoding(), Some("UTF-8"));
        assert_eq!(stream.restarts(), 0);
        assert!(text.starts_with("<!DOCTYPE html>\n<html>"));
        assert!(text.contains("<p>&#x201C;Hello&#x201D; &#x2022; world</p>"));
        assert_eq!(stream.into_inner().url(), Some("http://example.com/ascii"));
    }
}

file_test! {
    utf8,
    response from "utf-8.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[
            declared(Label::HttpContentType, "UTF-8"),
            declared(Label::MetaCharset, "utf-8")
        ]);
        let chain = stream.decoder_chain().unwrap();
        assert_eq!(chain.candidates().len(), 2);
        assert_eq!(chain.candidates()[1].mode, ErrorMode::Replace);
        assert_eq!(stream.encoding(), Some("UTF-8"));
        assert!(text.contains("<p>Caf\u{e9} \u{a9} \u{5de8}</p>"));
    }
}

file_test! {
    shift_jis_meta_charset,
    response from "shift-jis-meta-charset.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[declared(Label::MetaCharset, "shift_jis")]);
        assert_eq!(stream.encoding(), Some("Shift_JIS"));
        assert_eq!(stream.restarts(), 0);
        assert!(text.contains("<p>巨大な日本語</p>"));
    }
}

file_test! {
    shift_jis_meta_http_equiv,
    response from "shift-jis-meta-http-equiv.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[declared(Label::MetaContentType, "Shift_JIS")]);
        assert_eq!(stream.encoding(), Some("Shift_JIS"));
        assert!(text.contains("<p>巨大な日本語</p>"));
    }
}

file_test! {
    shift_jis_http_content_type,
    response from "shift-jis-http-content-type.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[
            declared(Label::HttpContentType, "shift_jis"),
            declared(Label::MetaCharset, "iso-8859-1")
        ]);
        // Shift_JIS outranks windows-1252 (which is what ISO-8859-1 means).
        let names: Vec<_> = stream.decoder_chain().unwrap()
            .candidates()
            .iter()
            .map(|candidate| candidate.name())
            .collect();
        assert_eq!(names, vec!["Shift_JIS", "windows-1252", "UTF-8", "Shift_JIS"]);
        assert_eq!(stream.restarts(), 0);
        assert!(text.contains("<p>巨大な日本語</p>"));
    }
}

file_test! {
    shift_jis_next_decoder,
    response from "shift-jis-next-decoder.http",

    |stream: HtmlStream<Response>, text: String| {
        // UTF-8 is tried first, and fails on the first Shift_JIS character.
        assert_eq!(stream.decoder_chain().unwrap().candidates()[0].name(), "UTF-8");
        assert_eq!(stream.restarts(), 1);
        assert_eq!(stream.encoding(), Some("Shift_JIS"));
        assert!(text.starts_with("<!DOCTYPE html>"));
        assert!(text.contains("<p>巨大な日本語</p>"));
        assert_eq!(text.matches("<!DOCTYPE").count(), 1);
    }
}

file_test! {
    utf16le_bom,
    response from "utf-16le-bom.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[declared(Label::Bom, "UTF-16LE")]);
        assert_eq!(stream.encoding(), Some("UTF-16LE"));
        assert!(text.starts_with("<!DOCTYPE html>"));
        assert!(!text.contains('\u{feff}'));
        assert!(text.contains("<p>\u{bf}Qu\u{e9}? &#x2013;</p>"));
    }
}

file_test! {
    undecodable,
    response from "undecodable.http",

    |stream: HtmlStream<Response>, text: String| {
        let chain = stream.decoder_chain().unwrap();
        assert!(chain.is_last());
        assert_eq!(chain.current().mode, ErrorMode::Replace);
        assert_eq!(stream.restarts(), 2);
        assert!(text.contains("<p>\u{fffd}\u{fffd}巨</p>"));
    }
}

file_test! {
    gzip,
    response from "gzip.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[declared(Label::MetaCharset, "windows-1252")]);
        assert_eq!(stream.encoding(), Some("windows-1252"));
        assert!(text.contains("<p>\u{201c}Compressed\u{201d} &#x2013; caf\u{e9}</p>"));
        assert_eq!(stream.into_inner().magic_bytes(), b"<!DOCTYP");
    }
}

file_test! {
    warc,
    response from "warc.http",

    |stream: HtmlStream<Response>, text: String| {
        assert_eq!(stream.declared_encodings(), &[declared(Label::HttpContentType, "windows-1252")]);
        assert!(text.contains("<p>na\u{ef}ve &#x2019;quoted&#x2019;</p>"));
        let response = stream.into_inner();
        assert_eq!(response.url(), Some("http://example.com/warc"));
        assert_eq!(response.warc_headers().and_then(|h| h.get("WARC-Type")), Some("response"));
    }
}

#[test]
fn mismatched_declaration_matches_correct_decode() {
    // The <meta> tag says UTF-8, but the bytes are Shift_JIS. The output must be exactly what
    // decoding them as Shift_JIS gives.
    let body = response("shift-jis-next-decoder.http").body().to_vec();
    let (expected, _, had_errors) = encoding_rs::SHIFT_JIS.decode(&body);
    assert!(!had_errors);

    let mut stream = HtmlStream::new(Cursor::new(body.clone()), Some("text/html; charset=shift_jis"));
    assert_eq!(stream.read_to_string().unwrap(), expected);
    assert_eq!(stream.encoding(), Some("Shift_JIS"));
}

#[test]
fn ascii_declaration_with_utf8_bytes() {
    let body = "<p>caf\u{e9}</p>".as_bytes().to_vec();
    let mut stream = HtmlStream::new(Cursor::new(body), Some("text/html; charset=us-ascii"));
    assert_eq!(stream.read_to_string().unwrap(), "<p>caf\u{e9}</p>");
    let names: Vec<_> = stream.decoder_chain().unwrap()
        .candidates()
        .iter()
        .map(|candidate| candidate.name())
        .collect();
    assert_eq!(names, vec!["ASCII", "UTF-8", "ASCII"]);
    assert_eq!(stream.encoding(), Some("UTF-8"));
    assert_eq!(stream.restarts(), 1);
}

#[test]
fn substituted_table() {
    // With an empty table, nothing outranks anything, so the HTTP header wins the tie.
    let config = Config { table: EncodingTable::empty(), ..Config::default() };
    let mut stream = HtmlStream::from_response_with_config(response("shift-jis-next-decoder.http"), config);
    let text = stream.read_to_string().unwrap();
    assert_eq!(stream.restarts(), 0);
    assert_eq!(stream.decoder_chain().unwrap().candidates()[0].name(), "Shift_JIS");
    assert!(text.contains("<p>巨大な日本語</p>"));
}

#[test]
fn replacer_over_a_stream() {
    // Sanitizing twice changes nothing.
    let stream = HtmlStream::from_response(response("ascii.http"));
    let mut twice = ReplaceInvalidNcr::new(stream);
    let mut text = String::new();
    loop {
        let chunk = twice.read_text(Some(5)).unwrap();
        if chunk.is_empty() {
            break;
        }
        text.push_str(&chunk);
    }
    assert!(text.contains("<p>&#x201C;Hello&#x201D; &#x2022; world</p>"));
    assert_eq!(twice.into_inner().restarts(), 0);
}
