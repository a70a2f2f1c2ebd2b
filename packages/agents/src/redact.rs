// ABOUTME: Secret redaction for agent output before it reaches logs
// ABOUTME: Masks provider keys, bearer tokens, KEY/TOKEN assignments and run credentials

use regex::Regex;
use std::sync::LazyLock;

const MASK: &str = "[REDACTED]";

/// Patterns applied in order; more specific prefixes come first
static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"sk-ant-[A-Za-z0-9_\-]{8,}", "sk-ant-[REDACTED]"),
        (r"sk-[A-Za-z0-9_\-]{16,}", "sk-[REDACTED]"),
        (r"gh[pousr]_[A-Za-z0-9]{20,}", "gh_[REDACTED]"),
        (r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*", "Bearer [REDACTED]"),
        (
            r"\b([A-Za-z_][A-Za-z0-9_]*_(?:KEY|TOKEN|SECRET))=(?:'[^']*'|\S+)",
            "${1}=[REDACTED]",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("redaction pattern must compile"),
            replacement,
        )
    })
    .collect()
});

/// Redactor carrying the literal secrets of one run
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| s.len() >= 4)
            .collect();
        // Longest first so overlapping secrets are masked whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut output = text.to_string();
        for secret in &self.secrets {
            if output.contains(secret.as_str()) {
                output = output.replace(secret.as_str(), MASK);
            }
        }
        redact(&output)
    }
}

/// Mask well-known secret shapes in free text
pub fn redact(text: &str) -> String {
    let mut output = text.to_string();
    for (regex, replacement) in PATTERNS.iter() {
        if regex.is_match(&output) {
            output = regex.replace_all(&output, *replacement).into_owned();
        }
    }
    output
}
