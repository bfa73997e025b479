//! Base64 payload helpers.
//!
//! Browsers hand us either a full data URI (`data:<mime>;base64,<payload>`)
//! or a bare base64 string.  These functions split the two apart and measure
//! the binary size a payload represents without ever decoding it, so size
//! limits can be enforced on multi-megabyte uploads at string-scan cost.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

const DATA_URI_PREFIX: &str = "data:";

static BASE64_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").unwrap());

/// Result of splitting a raw upload string.  Both fields borrow from the
/// input so the multi-megabyte payload is never copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedPayload<'a> {
    /// MIME type announced by a data URI header, if the input had one.
    pub detected_mime_type: Option<&'a str>,
    /// Bare base64 text.
    pub payload: &'a str,
}

/// Split `raw` into an optional data URI MIME type and the bare payload.
///
/// Only inputs starting with the literal `data:` and containing a comma are
/// treated as data URIs.  The MIME type runs up to the first `;` of the
/// header, or to the comma when the header has no parameters.
pub fn extract_payload(raw: &str) -> ExtractedPayload<'_> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix(DATA_URI_PREFIX) {
        if let Some((header, payload)) = rest.split_once(',') {
            let mime = header.split(';').next().unwrap_or(header);
            return ExtractedPayload {
                detected_mime_type: Some(mime),
                payload,
            };
        }
    }
    ExtractedPayload {
        detected_mime_type: None,
        payload: trimmed,
    }
}

/// Number of bytes `base64` decodes to, or `None` when it is not valid
/// padded base64.  Whitespace anywhere in the input is ignored.
pub fn decoded_byte_length(base64: &str) -> Option<usize> {
    let compact: String;
    let text = if base64.chars().any(char::is_whitespace) {
        compact = base64.chars().filter(|c| !c.is_whitespace()).collect();
        compact.as_str()
    } else {
        base64
    };

    let len = text.len();
    if len == 0 || len % 4 != 0 || !BASE64_RE.is_match(text) {
        return None;
    }
    let padding = if text.ends_with("==") {
        2
    } else if text.ends_with('=') {
        1
    } else {
        0
    };
    Some(len * 3 / 4 - padding)
}

/// A data URI assembled lazily from a MIME type and an already-extracted
/// payload.  Serializes as a string without building an intermediate copy of
/// the payload.  Line breaks and other whitespace in the payload are dropped
/// on output, so the URI carries the same compact base64 that was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    pub payload: &'a str,
}

impl fmt::Display for DataUri<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{};base64,", DATA_URI_PREFIX, self.mime_type)?;
        for chunk in self.payload.split(char::is_whitespace) {
            f.write_str(chunk)?;
        }
        Ok(())
    }
}

impl Serialize for DataUri<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
