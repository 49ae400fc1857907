//! Charset handling for request/response bodies.
//!
//! Only the charsets seen in practice for fixed-width payloads are
//! recognized (utf-8, us-ascii, iso-8859-1); anything else decodes as
//! UTF-8 with replacement.

/// Extract the `charset` parameter from a Content-Type header value.
pub fn from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Decode bytes using the named charset, defaulting to UTF-8.
pub fn decode(bytes: &[u8], charset: Option<&str>) -> String {
    match charset {
        Some(name) if name.eq_ignore_ascii_case("iso-8859-1") => {
            bytes.iter().map(|&b| b as char).collect()
        }
        // us-ascii is a UTF-8 subset; unknown charsets also fall back here
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Encode a string using the named charset, defaulting to UTF-8.
/// ISO-8859-1 encoding replaces out-of-range characters with `?`.
pub fn encode(s: &str, charset: Option<&str>) -> Vec<u8> {
    match charset {
        Some(name) if name.eq_ignore_ascii_case("iso-8859-1") => s
            .chars()
            .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
            .collect(),
        _ => s.as_bytes().to_vec(),
    }
}
