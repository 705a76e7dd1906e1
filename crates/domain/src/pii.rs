//! Built-in PII pattern library (component B). A closed enumeration of PII
//! kinds, each backed by one or more compiled regexes tagged with a
//! confidence tier, plus user-supplied custom patterns at kind `custom`.
//! Ordering is deterministic so masking output is reproducible: kind order as
//! declared in [`PiiKind::ALL`], then pattern order within kind.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Ssn,
    Phone,
    CreditCard,
    IpAddress,
    DateOfBirth,
    Passport,
    DriverLicense,
    Custom,
}

impl PiiKind {
    /// Declaration order. Drives both pattern-library ordering and placeholder
    /// kind tags (`[EMAIL_1]`, `[SSN_1]`, ...).
    pub const ALL: [PiiKind; 9] = [
        PiiKind::Email,
        PiiKind::Ssn,
        PiiKind::Phone,
        PiiKind::CreditCard,
        PiiKind::IpAddress,
        PiiKind::DateOfBirth,
        PiiKind::Passport,
        PiiKind::DriverLicense,
        PiiKind::Custom,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Ssn => "SSN",
            PiiKind::Phone => "PHONE",
            PiiKind::CreditCard => "CREDIT_CARD",
            PiiKind::IpAddress => "IP_ADDRESS",
            PiiKind::DateOfBirth => "DATE_OF_BIRTH",
            PiiKind::Passport => "PASSPORT",
            PiiKind::DriverLicense => "DRIVER_LICENSE",
            PiiKind::Custom => "CUSTOM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A user-supplied `(regex, replacement)` pair at kind `custom`. `replacement`
/// is a short human label for what the pattern identifies (e.g. `"internal-id"`),
/// surfaced in masked-field descriptors; it is not substituted into the text —
/// masked text always becomes the numbered `[CUSTOM_N]` placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPattern {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub kind: PiiKind,
    pub confidence: Confidence,
    pub regex: Regex,
    pub label: Option<String>,
}

struct BuiltinDef {
    kind: PiiKind,
    confidence: Confidence,
    pattern: &'static str,
}

fn builtin_defs() -> &'static [BuiltinDef] {
    static DEFS: OnceLock<Vec<BuiltinDef>> = OnceLock::new();
    DEFS.get_or_init(|| {
        vec![
            BuiltinDef {
                kind: PiiKind::Email,
                confidence: Confidence::High,
                pattern: r"(?i)\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b",
            },
            BuiltinDef {
                kind: PiiKind::Ssn,
                confidence: Confidence::High,
                pattern: r"\b\d{3}-\d{2}-\d{4}\b",
            },
            BuiltinDef {
                kind: PiiKind::Phone,
                confidence: Confidence::Medium,
                pattern: r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b",
            },
            BuiltinDef {
                kind: PiiKind::CreditCard,
                confidence: Confidence::High,
                pattern: r"\b(?:\d[ -]?){13,16}\b",
            },
            BuiltinDef {
                kind: PiiKind::IpAddress,
                confidence: Confidence::Medium,
                pattern: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
            },
            BuiltinDef {
                kind: PiiKind::DateOfBirth,
                confidence: Confidence::Low,
                pattern: r"\b\d{4}-\d{2}-\d{2}\b",
            },
            BuiltinDef {
                kind: PiiKind::DateOfBirth,
                confidence: Confidence::Low,
                pattern: r"\b\d{1,2}/\d{1,2}/\d{4}\b",
            },
            BuiltinDef {
                kind: PiiKind::Passport,
                confidence: Confidence::Medium,
                pattern: r"\b[A-Z]{1,2}[0-9]{6,9}\b",
            },
            BuiltinDef {
                kind: PiiKind::DriverLicense,
                confidence: Confidence::Low,
                pattern: r"\b[A-Z]{1}[0-9]{6,8}\b",
            },
        ]
    })
}

fn compiled_builtins() -> &'static [CompiledPattern] {
    static COMPILED: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        builtin_defs()
            .iter()
            .map(|def| CompiledPattern {
                kind: def.kind,
                confidence: def.confidence,
                regex: Regex::new(def.pattern).expect("built-in PII pattern is valid regex"),
                label: None,
            })
            .collect()
    })
}

/// Returns the ordered sequence of patterns applicable to `enabled_kinds`,
/// followed by the compiled `custom` patterns (in the order given). A
/// malformed custom regex is surfaced as an `Err` rather than silently
/// skipped, so configuration validation (not mask-time) is where it is
/// expected to be caught.
pub fn applicable_patterns(
    enabled_kinds: &[PiiKind],
    custom: &[CustomPattern],
) -> Result<Vec<CompiledPattern>, regex::Error> {
    let mut out = Vec::new();
    for kind in PiiKind::ALL {
        if kind == PiiKind::Custom || !enabled_kinds.contains(&kind) {
            continue;
        }
        out.extend(
            compiled_builtins()
                .iter()
                .filter(|p| p.kind == kind)
                .cloned(),
        );
    }
    if enabled_kinds.contains(&PiiKind::Custom) {
        for c in custom {
            out.push(CompiledPattern {
                kind: PiiKind::Custom,
                confidence: Confidence::Medium,
                regex: Regex::new(&c.pattern)?,
                label: Some(c.replacement.clone()),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_kind_then_pattern() {
        let kinds = vec![PiiKind::Phone, PiiKind::Email, PiiKind::DateOfBirth];
        let patterns = applicable_patterns(&kinds, &[]).unwrap();
        let kinds_seen: Vec<PiiKind> = patterns.iter().map(|p| p.kind).collect();
        assert_eq!(kinds_seen[0], PiiKind::Email);
        assert_eq!(kinds_seen[1], PiiKind::Phone);
        assert_eq!(kinds_seen[2], PiiKind::DateOfBirth);
        assert_eq!(kinds_seen[3], PiiKind::DateOfBirth);
    }

    #[test]
    fn email_pattern_matches() {
        let patterns = applicable_patterns(&[PiiKind::Email], &[]).unwrap();
        assert!(patterns[0].regex.is_match("a@b.com"));
    }

    #[test]
    fn custom_patterns_compiled_in_order() {
        let custom = vec![
            CustomPattern { pattern: "FOO-\\d+".into(), replacement: "foo-id".into() },
            CustomPattern { pattern: "BAR-\\d+".into(), replacement: "bar-id".into() },
        ];
        let patterns = applicable_patterns(&[PiiKind::Custom], &custom).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].label.as_deref(), Some("foo-id"));
        assert!(patterns[0].regex.is_match("FOO-123"));
    }

    #[test]
    fn malformed_custom_pattern_errors() {
        let custom = vec![CustomPattern { pattern: "(".into(), replacement: "bad".into() }];
        assert!(applicable_patterns(&[PiiKind::Custom], &custom).is_err());
    }

    #[test]
    fn disabled_kind_excluded() {
        let patterns = applicable_patterns(&[PiiKind::Email], &[]).unwrap();
        assert!(patterns.iter().all(|p| p.kind == PiiKind::Email));
    }
}
