//! Static security screening
//!
//! Pattern-based, per language, plus two language-independent heuristics.
//! This is a deterrent that stops the obvious cases before they cost a
//! sandbox run. It is not a containment boundary: anything it misses is
//! left to the provider's own isolation.

use std::collections::HashSet;
use tracing::debug;

use super::patterns::patterns_for;
use super::{SecurityFinding, Severity};
use crate::sandbox::Language;

/// Lines longer than this are treated as an obfuscation signal
pub const MAX_LINE_LENGTH: usize = 500;

/// Contiguous base64-like runs at least this long are treated as hidden payloads
pub const MIN_BASE64_RUN: usize = 200;

/// Static analyzer for untrusted snippets
#[derive(Debug, Clone)]
pub struct SecurityScanner {
    max_line_length: usize,
    min_base64_run: usize,
}

impl Default for SecurityScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityScanner {
    pub fn new() -> Self {
        SecurityScanner {
            max_line_length: MAX_LINE_LENGTH,
            min_base64_run: MIN_BASE64_RUN,
        }
    }

    /// Scan `code`, returning findings with criticals first and duplicate
    /// descriptions removed.
    pub fn scan(&self, code: &str, language: Language) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();
        let mut seen = HashSet::new();

        for pattern in patterns_for(language) {
            if pattern.regex.is_match(code) && seen.insert(pattern.description) {
                findings.push(SecurityFinding::new(pattern.description, pattern.severity));
            }
        }

        if let Some((line_no, len)) = self.longest_offending_line(code) {
            findings.push(SecurityFinding::new(
                format!(
                    "Possible obfuscation: line {} is {} characters long (limit {})",
                    line_no, len, self.max_line_length
                ),
                Severity::Warning,
            ));
        }

        if self.has_base64_payload(code) {
            findings.push(SecurityFinding::new(
                format!(
                    "Possible encoded payload: base64-like run of {}+ characters",
                    self.min_base64_run
                ),
                Severity::Warning,
            ));
        }

        // Stable sort keeps pattern order within each severity
        findings.sort_by_key(|f| f.severity != Severity::Critical);

        debug!(
            "Scanned {} bytes of {}: {} finding(s)",
            code.len(),
            language,
            findings.len()
        );
        findings
    }

    fn longest_offending_line(&self, code: &str) -> Option<(usize, usize)> {
        code.lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.chars().count()))
            .filter(|(_, len)| *len > self.max_line_length)
            .max_by_key(|(_, len)| *len)
    }

    fn has_base64_payload(&self, code: &str) -> bool {
        longest_base64_run(code) >= self.min_base64_run
    }
}

/// Length of the longest run of base64 alphabet characters
fn longest_base64_run(code: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in code.chars() {
        if c.is_ascii_alphanumeric() || c == '+' || c == '/' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// True if any finding must block execution
pub fn has_critical(findings: &[SecurityFinding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Critical)
}
