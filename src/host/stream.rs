//! Pure helpers for the raw PTY byte stream.
//!
//! UTF-8 sequences can be split across read boundaries, so decoding keeps
//! a small carry buffer between chunks. Shell integration hooks report the
//! current directory and foreground command via OSC 1337 sequences embedded
//! in the output.

use std::sync::OnceLock;

use regex::Regex;

/// Decode a raw chunk, carrying incomplete UTF-8 sequences to the next call.
///
/// Valid prefixes are appended to the result; an incomplete trailing
/// sequence stays in `carry`; invalid bytes become U+FFFD replacements.
pub fn decode_utf8_stream(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    if chunk.is_empty() {
        return String::new();
    }
    carry.extend_from_slice(chunk);

    let mut out = String::new();
    let mut idx = 0usize;
    while idx < carry.len() {
        match std::str::from_utf8(&carry[idx..]) {
            Ok(valid) => {
                out.push_str(valid);
                idx = carry.len();
            }
            Err(err) => {
                let valid_len = err.valid_up_to();
                if valid_len > 0 {
                    if let Ok(valid) = std::str::from_utf8(&carry[idx..idx + valid_len]) {
                        out.push_str(valid);
                    }
                    idx += valid_len;
                }
                match err.error_len() {
                    // Incomplete sequence at the end: keep for the next chunk.
                    None => break,
                    Some(len) => {
                        out.push('\u{fffd}');
                        idx = (idx + len).min(carry.len());
                    }
                }
            }
        }
    }

    if idx > 0 {
        carry.drain(..idx);
    }
    out
}

/// Drain whatever is left in the carry buffer at end of stream.
#[must_use]
pub fn flush_carry(carry: &mut Vec<u8>) -> String {
    if carry.is_empty() {
        return String::new();
    }
    let rest = String::from_utf8_lossy(carry).into_owned();
    carry.clear();
    rest
}

/// Shell-integration notification parsed out of an output chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscNote {
    /// `CurrentDir=` notification: the shell changed directory.
    CurrentDir(String),
    /// `Command=` notification: a new foreground command started, or the
    /// shell returned to the prompt (empty value).
    Command(String),
}

fn osc1337_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // OSC 1337 terminated by BEL or ST (ESC \).
    RE.get_or_init(|| {
        Regex::new(r"\x1b\]1337;(CurrentDir|Command)=([^\x07\x1b]*)(?:\x07|\x1b\\)").ok()
    })
    .as_ref()
}

/// Extract OSC 1337 `CurrentDir=` / `Command=` notifications from a chunk.
///
/// Notes split across chunk boundaries are not recovered; the shell hooks
/// emit them in a single write in practice.
#[must_use]
pub fn scan_osc1337(data: &str) -> Vec<OscNote> {
    if !data.contains("\u{1b}]1337;") {
        return Vec::new();
    }
    let Some(re) = osc1337_re() else {
        return Vec::new();
    };
    re.captures_iter(data)
        .filter_map(|caps| {
            let value = caps.get(2)?.as_str().to_owned();
            match caps.get(1)?.as_str() {
                "CurrentDir" => Some(OscNote::CurrentDir(value)),
                "Command" => Some(OscNote::Command(value)),
                _ => None,
            }
        })
        .collect()
}

/// Whether an environment variable key is safe to pass to a child process.
#[must_use]
pub fn valid_env_key(key: &str) -> bool {
    let trimmed = key.trim();
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return false;
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
