//! Identifier extraction from free-text tool output
//!
//! Two tiers: labeled patterns first, then a positional scan for any base58
//! token of plausible length. The positional tier can pick the wrong token
//! when the output mentions other addresses; the first occurrence wins and the
//! result records that the fallback was used.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Base58 alphabet as a regex character class (no 0, O, I, l)
const BASE58_CLASS: &str = "[1-9A-HJ-NP-Za-km-z]";

/// How an identifier was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExtractionSource {
    /// Matched next to a known label
    Labeled { label: String },

    /// Positional scan; `candidates` distinct tokens of valid length were seen
    Fallback { candidates: usize },
}

impl ExtractionSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ExtractionSource::Fallback { .. })
    }
}

/// An extracted identifier and how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub value: String,
    pub source: ExtractionSource,
}

impl Extraction {
    /// The fallback saw more than one plausible token
    pub fn is_ambiguous(&self) -> bool {
        matches!(self.source, ExtractionSource::Fallback { candidates } if candidates > 1)
    }
}

struct LabeledPattern {
    label: &'static str,
    regex: Regex,
}

/// Ordered labeled patterns plus a length-bounded base58 fallback
pub struct IdExtractor {
    labeled: Vec<LabeledPattern>,
    fallback: Regex,
}

impl IdExtractor {
    /// Build a policy. Each label is matched literally, optionally
    /// case-insensitively, and must be followed by a base58 token of at least
    /// `min_len` characters. The fallback accepts whole tokens of
    /// `min_len..=max_len` characters.
    fn new(labels: &[(&'static str, bool)], min_len: usize, max_len: usize) -> Self {
        let labeled = labels
            .iter()
            .map(|(label, case_insensitive)| {
                let flags = if *case_insensitive { "(?i)" } else { "" };
                let pattern = format!(
                    r"{}{}\s*[:=]?\s*({}{{{},}})",
                    flags,
                    regex::escape(label),
                    BASE58_CLASS,
                    min_len
                );
                LabeledPattern {
                    label,
                    regex: Regex::new(&pattern).unwrap(),
                }
            })
            .collect();

        let fallback =
            Regex::new(&format!(r"\b{}{{{},{}}}\b", BASE58_CLASS, min_len, max_len)).unwrap();

        Self { labeled, fallback }
    }

    /// Policy for on-chain program addresses
    pub fn program_id() -> &'static IdExtractor {
        static EXTRACTOR: LazyLock<IdExtractor> = LazyLock::new(|| {
            IdExtractor::new(
                &[
                    ("Program Id:", false),
                    ("Program:", false),
                    ("Deployed:", false),
                    ("program id", true),
                ],
                32,
                44,
            )
        });
        &EXTRACTOR
    }

    /// Policy for transaction signatures, which are longer than addresses
    pub fn signature() -> &'static IdExtractor {
        static EXTRACTOR: LazyLock<IdExtractor> = LazyLock::new(|| {
            IdExtractor::new(
                &[("Signature:", false), ("transaction signature", true)],
                64,
                88,
            )
        });
        &EXTRACTOR
    }

    pub fn extract(&self, output: &str) -> Option<Extraction> {
        for pattern in &self.labeled {
            if let Some(caps) = pattern.regex.captures(output) {
                return Some(Extraction {
                    value: caps[1].to_string(),
                    source: ExtractionSource::Labeled {
                        label: pattern.label.to_string(),
                    },
                });
            }
        }

        let mut candidates: Vec<&str> = Vec::new();
        for m in self.fallback.find_iter(output) {
            if !candidates.contains(&m.as_str()) {
                candidates.push(m.as_str());
            }
        }

        candidates.first().map(|first| Extraction {
            value: first.to_string(),
            source: ExtractionSource::Fallback {
                candidates: candidates.len(),
            },
        })
    }
}
