//! Regex-based PII masking.
//!
//! Patterns are applied in a fixed order; longer digit runs (card numbers)
//! go first so that their fragments are not picked up as SSNs or phone
//! numbers. Every match is replaced by `[REDACTED_<KIND>]`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    CreditCard,
    Ssn,
    VaFileNumber,
    Email,
    Phone,
    DateOfBirth,
}

impl PiiKind {
    pub fn placeholder(self) -> &'static str {
        match self {
            PiiKind::CreditCard => "[REDACTED_CARD]",
            PiiKind::Ssn => "[REDACTED_SSN]",
            PiiKind::VaFileNumber => "[REDACTED_VA_FILE]",
            PiiKind::Email => "[REDACTED_EMAIL]",
            PiiKind::Phone => "[REDACTED_PHONE]",
            PiiKind::DateOfBirth => "[REDACTED_DOB]",
        }
    }
}

static PATTERNS: Lazy<Vec<(PiiKind, Regex)>> = Lazy::new(|| {
    let table: [(PiiKind, &str); 6] = [
        (PiiKind::CreditCard, r"\b(?:\d[ -]?){12,15}\d\b"),
        (PiiKind::Ssn, r"\b\d{3}[- ]\d{2}[- ]\d{4}\b"),
        (PiiKind::VaFileNumber, r"\b[Cc]-?\d{8}\b"),
        (
            PiiKind::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        (
            PiiKind::Phone,
            r"(?:\+?1[-. ]?)?(?:\(\d{3}\)|\b\d{3})[-. ]?\d{3}[-. ]\d{4}\b",
        ),
        (
            PiiKind::DateOfBirth,
            r"\b(?:0?[1-9]|1[0-2])/(?:0?[1-9]|[12]\d|3[01])/(?:19|20)\d{2}\b",
        ),
    ];
    table
        .into_iter()
        .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("static PII pattern")))
        .collect()
});

/// Text after masking, plus the kinds that were found (one entry per kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Masked {
    pub text: String,
    pub findings: Vec<PiiKind>,
}

impl Masked {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Replace all recognised PII in `text`.
///
/// ```rust
/// use vetchat_core::pii::{mask, PiiKind};
///
/// let masked = mask("my ssn is 123-45-6789");
/// assert_eq!(masked.text, "my ssn is [REDACTED_SSN]");
/// assert_eq!(masked.findings, vec![PiiKind::Ssn]);
/// ```
pub fn mask(text: &str) -> Masked {
    let mut current = text.to_string();
    let mut findings = Vec::new();
    for (kind, re) in PATTERNS.iter() {
        if re.is_match(&current) {
            findings.push(*kind);
            current = re.replace_all(&current, kind.placeholder()).into_owned();
        }
    }
    Masked {
        text: current,
        findings,
    }
}

pub fn contains_pii(text: &str) -> bool {
    PATTERNS.iter().any(|(_, re)| re.is_match(text))
}

/// Masked and length-capped rendering for log fields.
pub fn for_log(text: &str) -> String {
    let masked = mask(text).text;
    if masked.chars().count() > 80 {
        let head: String = masked.chars().take(80).collect();
        format!("{head}...")
    } else {
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_untouched() {
        let masked = mask("I served 8 years in the Army, 2 tours.");
        assert!(masked.is_clean());
        assert_eq!(masked.text, "I served 8 years in the Army, 2 tours.");
    }

    #[test]
    fn test_email_and_phone() {
        let masked = mask("reach me at joe.vet@example.org or (555) 123-4567");
        assert_eq!(
            masked.text,
            "reach me at [REDACTED_EMAIL] or [REDACTED_PHONE]"
        );
        assert_eq!(masked.findings, vec![PiiKind::Email, PiiKind::Phone]);
    }

    #[test]
    fn test_plain_phone_formats() {
        assert_eq!(mask("555-123-4567").text, "[REDACTED_PHONE]");
        assert_eq!(mask("call 555.123.4567 now").text, "call [REDACTED_PHONE] now");
    }

    #[test]
    fn test_card_number_not_split_into_other_kinds() {
        let masked = mask("card 4111 1111 1111 1111 please");
        assert_eq!(masked.text, "card [REDACTED_CARD] please");
        assert_eq!(masked.findings, vec![PiiKind::CreditCard]);
    }

    #[test]
    fn test_va_file_and_dob() {
        let masked = mask("file C12345678, born 04/15/1975");
        assert_eq!(masked.text, "file [REDACTED_VA_FILE], born [REDACTED_DOB]");
    }

    #[test]
    fn test_contains_pii() {
        assert!(contains_pii("ssn 123 45 6789"));
        assert!(!contains_pii("rated 70 percent"));
    }

    #[test]
    fn test_for_log_truncates() {
        let long = "a".repeat(200);
        assert_eq!(for_log(&long).len(), 83);
    }
}
