//! Log sanitization for secrets and key material.
//!
//! Formatted log lines pass through [`SanitizingMakeWriter`], which redacts:
//! - Bearer tokens and JWTs (service credentials)
//! - `token=...`, `secret: ...` and similar key/value secrets
//! - Long base64 runs (ciphertexts, serialized keys, scheme parameters)
//! - Long hex runs and PEM private keys
//!
//! Key fingerprints (16 hex characters) are short enough to survive, so log
//! lines can still correlate keys without exposing them.
//!
//! # Important: prefer redaction-by-type
//!
//! This is a fallback. Secret-bearing types (`CryptoContext`, `ClientConfig`,
//! `ReleasedArtifact`) already redact themselves in `Debug`.
//!
//! # Performance
//!
//! Input is capped at `CIPHERFLOW_SANITIZE_MAX_BYTES` (default 16 KiB) per call.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static SECRET_PATTERNS: OnceLock<SecretPatterns> = OnceLock::new();

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

struct SecretPattern {
    regex: Regex,
    replacement: &'static str,
}

struct SecretPatterns {
    fast_set: RegexSet,
    fast_patterns: Vec<SecretPattern>,
    pem: SecretPattern,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }

    let mut end = max_bytes.min(input.len());
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("CIPHERFLOW_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn get_patterns() -> &'static SecretPatterns {
    SECRET_PATTERNS.get_or_init(|| {
        // Applied in this order; earlier rules win on overlapping text.
        let fast_rules: Vec<(&'static str, &'static str)> = vec![
            (
                r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]{8,}=*",
                "Bearer [REDACTED-TOKEN]",
            ),
            (
                r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b",
                "[REDACTED-JWT]",
            ),
            (
                r#"(?i)\b(?:api[_-]?token|api[_-]?key|access[_-]?token|token|secret|password|private[_-]?key|secret[_-]?key)\b["']?\s*[:=]\s*["']?[A-Za-z0-9+/_-]{16,}={0,2}"#,
                "[REDACTED-SECRET]",
            ),
            (r"[A-Za-z0-9+/]{64,}={0,2}", "[REDACTED-BLOB]"),
            (r"\b[0-9a-fA-F]{32,}\b", "[REDACTED-KEY]"),
        ];

        // Kept out of the set: a bounded dot-all pattern inflates the merged program.
        let pem = SecretPattern {
            regex: Regex::new(
                r"(?s)-----BEGIN [A-Z0-9 ]{0,40}PRIVATE KEY-----[\s\S]{0,8192}-----END [A-Z0-9 ]{0,40}PRIVATE KEY-----",
            )
            .expect("Valid regex"),
            replacement: "[REDACTED-PEM-PRIVATE-KEY]",
        };

        let fast_set =
            RegexSet::new(fast_rules.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let fast_patterns = fast_rules
            .into_iter()
            .map(|(pattern, replacement)| SecretPattern {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect();

        SecretPatterns {
            fast_set,
            fast_patterns,
            pem,
        }
    })
}

/// Replace secrets in `input`, truncating it to the configured size cap.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = get_patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    for idx in patterns.fast_set.matches(prefix).into_iter() {
        let pattern = &patterns.fast_patterns[idx];
        result = pattern
            .regex
            .replace_all(&result, pattern.replacement)
            .into_owned();
    }

    if result.contains("-----BEGIN ") {
        result = patterns
            .pem
            .regex
            .replace_all(&result, patterns.pem.replacement)
            .into_owned();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// Whether `input` contains anything [`sanitize`] would redact.
#[must_use]
pub fn contains_secret(input: &str) -> bool {
    let patterns = get_patterns();
    let (prefix, _truncated) = truncate_to_char_boundary(input, max_sanitize_bytes());
    patterns.fast_set.is_match(prefix)
        || (prefix.contains("-----BEGIN ") && patterns.pem.regex.is_match(prefix))
}

/// `MakeWriter` wrapper that sanitizes each formatted log line before it
/// reaches the underlying sink.
#[derive(Debug)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: Clone> Clone for SanitizingMakeWriter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            // The newline is kept out of `sanitize` so truncation cannot drop it.
            let sanitized = sanitize(&String::from_utf8_lossy(&line[..pos]));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A line with no newline must not buffer without bound.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.buffer.clear();
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;

        if !self.buffer.is_empty() {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.buffer.clear();
        }

        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
