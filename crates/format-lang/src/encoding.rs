//! Text decoding for string fields
//!
//! Decoding is lossy: bytes that are invalid in the chosen encoding become
//! U+FFFD rather than failing the decode. Multi-byte encodings go through
//! `encoding_rs`.

use encoding_rs::{SHIFT_JIS, UTF_16BE, UTF_16LE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encodings a string field can be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
    ShiftJis,
    Latin1,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "ascii",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::ShiftJis => "shift_jis",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode `data` as text in the given encoding
pub fn decode_text(data: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Ascii => data
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
            .collect(),
        TextEncoding::Latin1 => data.iter().map(|&b| b as char).collect(),
        TextEncoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
        TextEncoding::Utf16Le => decode_with_encoding_rs(data, UTF_16LE),
        TextEncoding::Utf16Be => decode_with_encoding_rs(data, UTF_16BE),
        TextEncoding::ShiftJis => decode_with_encoding_rs(data, SHIFT_JIS),
    }
}

/// BOMs are kept as data; a field's bytes are decoded exactly as declared
fn decode_with_encoding_rs(data: &[u8], encoding: &'static encoding_rs::Encoding) -> String {
    let (text, _had_errors) = encoding.decode_without_bom_handling(data);
    text.into_owned()
}
