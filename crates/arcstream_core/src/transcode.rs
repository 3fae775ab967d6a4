//! Character-set handling for text entries.

use crate::{Error, Result};
pub use encoding_rs::Encoding;
use encoding_rs::UTF_8;
use std::fmt;

/// Labels that mean ISO-8859-1 proper. The WHATWG registry folds them into
/// windows-1252, which maps 0x80..=0x9F to punctuation.
const LATIN1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso88591",
    "iso_8859-1",
    "iso_8859-1:1987",
    "latin1",
    "l1",
    "iso-ir-100",
    "cp819",
    "ibm819",
    "csisolatin1",
];

/// A resolved text encoding
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// ISO-8859-1: every byte is the code point of the same value
    Latin1,
    Whatwg(&'static Encoding),
}

impl Charset {
    pub fn utf8() -> Charset {
        Charset::Whatwg(UTF_8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Latin1 => "ISO-8859-1",
            Charset::Whatwg(encoding) => encoding.name(),
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset::utf8()
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve an encoding label (`"UTF-8"`, `"latin1"`, `"Shift_JIS"`, ...).
pub fn lookup(label: &str) -> Result<Charset> {
    let trimmed = label.trim();
    if LATIN1_LABELS.iter().any(|l| l.eq_ignore_ascii_case(trimmed)) {
        return Ok(Charset::Latin1);
    }
    Encoding::for_label(trimmed.as_bytes())
        .map(Charset::Whatwg)
        .ok_or_else(|| Error::UnsupportedEncoding(label.to_string()))
}

pub fn is_supported(label: &str) -> bool {
    lookup(label).is_ok()
}

/// Whether bytes in `charset` need converting to become UTF-8 text
pub fn is_necessary(charset: Charset) -> bool {
    charset != Charset::utf8()
}

/// Decode entry bytes into UTF-8 text. Malformed sequences become U+FFFD.
pub fn decode(bytes: Vec<u8>, charset: Charset) -> String {
    match charset {
        Charset::Latin1 => bytes.iter().map(|b| char::from(*b)).collect(),
        Charset::Whatwg(encoding) if encoding == UTF_8 => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(&e.into_bytes()).into_owned(),
        },
        Charset::Whatwg(encoding) => {
            let (text, _) = encoding.decode_without_bom_handling(&bytes);
            text.into_owned()
        }
    }
}

/// Encode UTF-8 text into `charset`. Characters it cannot represent become
/// `&#N;` references. UTF-16 labels encode as UTF-8, since the WHATWG
/// encoders never produce UTF-16.
pub fn encode(text: &str, charset: Charset) -> Vec<u8> {
    match charset {
        Charset::Latin1 => {
            let mut bytes = Vec::with_capacity(text.len());
            for c in text.chars() {
                match u8::try_from(u32::from(c)) {
                    Ok(b) => bytes.push(b),
                    Err(_) => bytes.extend_from_slice(format!("&#{};", u32::from(c)).as_bytes()),
                }
            }
            bytes
        }
        Charset::Whatwg(encoding) if encoding == UTF_8 => text.as_bytes().to_vec(),
        Charset::Whatwg(encoding) => {
            let (bytes, _, _) = encoding.encode(text);
            bytes.into_owned()
        }
    }
}
