//! JSONP callback rewrite (spec §4.4, §9): the original implementation shells
//! out to an external script for this; per spec §9 that's an implementation
//! artifact, so this decodes/rewrites/re-encodes inline instead.

use std::io::{Read, Write};

use retrace_core::error::{CoreError, Result};

/// Extracts the `callback=` or `callbackPubmine=` query parameter's value
/// from an incoming request-target, if present and non-empty.
pub fn extract_callback(request_uri: &str) -> Option<String> {
    let query = request_uri.split_once('?')?.1;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if (key == "callback" || key == "callbackPubmine") && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Finds the identifier the stored body is wrapped in, i.e. everything
/// before the first `(` once leading whitespace is skipped.
fn stored_callback_identifier(decoded: &str) -> Option<&str> {
    let trimmed = decoded.trim_start();
    let paren = trimmed.find('(')?;
    let ident = trimmed[..paren].trim_end();
    if ident.is_empty() || !ident.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.') {
        return None;
    }
    Some(ident)
}

/// Rewrites `body` (already decoded per its `content-encoding`) so that it is
/// wrapped in `new_callback` instead of whatever identifier it shipped with,
/// then re-encodes with the same content-encoding. Returns `None` if the
/// stored body isn't a recognizable `ident(...)` wrapper.
pub fn rewrite(body: &[u8], content_encoding: Option<&str>, new_callback: &str) -> Result<Option<Vec<u8>>> {
    let decoded = decode(body, content_encoding)?;
    let text = match std::str::from_utf8(&decoded) {
        Ok(t) => t,
        Err(_) => return Ok(None),
    };

    let Some(old_ident) = stored_callback_identifier(text) else {
        return Ok(None);
    };
    if old_ident == new_callback {
        return Ok(Some(body.to_vec()));
    }

    let rewritten = replace_identifier(text, old_ident, new_callback);
    let encoded = encode(rewritten.as_bytes(), content_encoding)?;
    Ok(Some(encoded))
}

/// Whole-word replacement: every maximal run of identifier characters equal
/// to `old` becomes `new`, everything else passes through untouched.
fn replace_identifier(text: &str, old: &str, new: &str) -> String {
    let is_ident_char = |c: char| c.is_alphanumeric() || c == '_' || c == '$' || c == '.';
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &text[i..];
        if rest.starts_with(old) {
            let end = i + old.len();
            let prev_is_ident = text[..i].chars().next_back().map(is_ident_char).unwrap_or(false);
            let next_is_ident = text[end..].chars().next().map(is_ident_char).unwrap_or(false);
            if !prev_is_ident && !next_is_ident {
                out.push_str(new);
                i = end;
                continue;
            }
        }
        let ch = rest.chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn decode(body: &[u8], content_encoding: Option<&str>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match content_encoding.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("gzip") => {
            flate2::read::GzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| CoreError::Parse(format!("gzip decode failed: {e}")))?;
        }
        Some("deflate") => {
            flate2::read::ZlibDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| CoreError::Parse(format!("deflate decode failed: {e}")))?;
        }
        Some("br") => {
            brotli::Decompressor::new(body, 4096)
                .read_to_end(&mut out)
                .map_err(|e| CoreError::Parse(format!("brotli decode failed: {e}")))?;
        }
        _ => out.extend_from_slice(body),
    }
    Ok(out)
}

fn encode(body: &[u8], content_encoding: Option<&str>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match content_encoding.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("gzip") => {
            let mut enc = flate2::write::GzEncoder::new(&mut out, flate2::Compression::default());
            enc.write_all(body)
                .map_err(|e| CoreError::Internal(format!("gzip encode failed: {e}")))?;
            enc.finish()
                .map_err(|e| CoreError::Internal(format!("gzip encode failed: {e}")))?;
        }
        Some("deflate") => {
            let mut enc = flate2::write::ZlibEncoder::new(&mut out, flate2::Compression::default());
            enc.write_all(body)
                .map_err(|e| CoreError::Internal(format!("deflate encode failed: {e}")))?;
            enc.finish()
                .map_err(|e| CoreError::Internal(format!("deflate encode failed: {e}")))?;
        }
        Some("br") => {
            let mut enc = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
            enc.write_all(body)
                .map_err(|e| CoreError::Internal(format!("brotli encode failed: {e}")))?;
            enc.flush()
                .map_err(|e| CoreError::Internal(format!("brotli encode failed: {e}")))?;
        }
        _ => out.extend_from_slice(body),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_callback_param() {
        assert_eq!(extract_callback("/a?callback=foo&x=1"), Some("foo".to_string()));
        assert_eq!(
            extract_callback("/a?x=1&callbackPubmine=bar"),
            Some("bar".to_string())
        );
        assert_eq!(extract_callback("/a?x=1"), None);
        assert_eq!(extract_callback("/a?callback="), None);
    }

    #[test]
    fn rewrites_identity_encoded_body() {
        let body = b"origCb({\"a\":1});";
        let out = rewrite(body, None, "newCb").unwrap().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("newCb("));
        assert!(!text.contains("origCb"));
    }

    #[test]
    fn rewrite_is_noop_when_not_jsonp_shaped() {
        let body = b"{\"a\":1}";
        let out = rewrite(body, None, "newCb").unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn rewrites_gzip_encoded_body() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"origCb({\"a\":1})").unwrap();
        let body = gz.finish().unwrap();

        let out = rewrite(&body, Some("gzip"), "newCb").unwrap().unwrap();
        let mut decompressed = Vec::new();
        flate2::read::GzDecoder::new(out.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        let text = String::from_utf8(decompressed).unwrap();
        assert!(text.starts_with("newCb("));
    }
}
