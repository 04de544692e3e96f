//! SDP answer sanitizing
//!
//! The calling platform only accepts SHA-256 DTLS fingerprints spelled in
//! upper case and rejects answers carrying any other fingerprint algorithm.
//! Everything else in the answer passes through untouched.

use once_cell::sync::Lazy;
use regex::Regex;

static FINGERPRINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(a=fingerprint:)(sha-\d+)(\s.*)?$").expect("valid fingerprint regex")
});

/// Normalize line endings to CRLF and rewrite fingerprint attributes
///
/// - `sha-256` fingerprints have the algorithm token upper-cased
/// - `sha-384` and `sha-512` fingerprint lines are removed
/// - non-empty output always ends with CRLF
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(sdp: &str) -> String {
    let normalized = sdp.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<&str> = normalized.split('\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut out = String::with_capacity(sdp.len() + lines.len());
    for line in lines {
        match rewrite_fingerprint(line) {
            Some(Some(rewritten)) => out.push_str(&rewritten),
            Some(None) => continue,
            None => out.push_str(line),
        }
        out.push_str("\r\n");
    }

    out
}

/// `None` when `line` is not a fingerprint, `Some(None)` to drop it
fn rewrite_fingerprint(line: &str) -> Option<Option<String>> {
    let caps = FINGERPRINT.captures(line)?;
    let algorithm = caps.get(2)?.as_str().to_ascii_uppercase();

    match algorithm.as_str() {
        "SHA-256" => {
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            let rest = caps.get(3).map_or("", |m| m.as_str());
            Some(Some(format!("{}{}{}", prefix, algorithm, rest)))
        },
        "SHA-384" | "SHA-512" => Some(None),
        _ => None,
    }
}
