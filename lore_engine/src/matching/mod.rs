//! Keyword matching over recent conversation turns.
//!
//! The matcher is stateless: the same entry and messages always produce the
//! same [`KeywordMatch`].

use regex::{Regex, RegexBuilder};
use tracing::warn;

use lorebook::{ActivationSettings, ChatMessage, KnowledgeEntry, ScanRoles, SelectiveLogic};

use crate::errors::KeywordMatchError;

/// Score contributed by each matched primary keyword.
pub const PRIMARY_KEYWORD_WEIGHT: f64 = 2.0;

/// Score contributed by each matched secondary keyword.
pub const SECONDARY_KEYWORD_WEIGHT: f64 = 1.0;

/// What to scan and how to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Number of most recent messages searched.
    pub scan_depth: usize,
    pub roles: ScanRoles,
    pub case_sensitive: bool,
    pub match_whole_words: bool,
    pub use_regex: bool,
}

impl From<&ActivationSettings> for ScanConfig {
    fn from(settings: &ActivationSettings) -> Self {
        Self {
            scan_depth: settings.scan_depth,
            roles: settings.scan_roles,
            case_sensitive: settings.case_sensitive,
            match_whole_words: settings.match_whole_words,
            use_regex: settings.use_regex,
        }
    }
}

/// Outcome of matching one entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordMatch {
    pub matched: bool,
    pub score: f64,
    /// Primary then secondary hits.
    pub matched_keywords: Vec<String>,
    pub primary_matches: Vec<String>,
    pub secondary_matches: Vec<String>,
}

/// Stateless keyword matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match an entry's keyword lists against recent messages.
    pub fn match_entry(
        &self,
        entry: &KnowledgeEntry,
        messages: &[ChatMessage],
        scan: &ScanConfig,
    ) -> KeywordMatch {
        let settings = &entry.activation_settings;
        let primary = configured(&settings.primary_keywords);
        let secondary = configured(&settings.secondary_keywords);

        if primary.is_empty() && secondary.is_empty() {
            return KeywordMatch::default();
        }

        let corpus = Self::build_corpus(messages, scan);
        let primary_matches = self.find_matches(entry, &primary, &corpus, scan);
        let secondary_matches = self.find_matches(entry, &secondary, &corpus, scan);

        let matched = selective_logic_passes(
            settings.selective_logic,
            primary.len(),
            primary_matches.len(),
            secondary.len(),
            secondary_matches.len(),
        );

        let score = PRIMARY_KEYWORD_WEIGHT * primary_matches.len() as f64
            + SECONDARY_KEYWORD_WEIGHT * secondary_matches.len() as f64;

        let matched_keywords = primary_matches
            .iter()
            .chain(secondary_matches.iter())
            .cloned()
            .collect();

        KeywordMatch {
            matched,
            score,
            matched_keywords,
            primary_matches,
            secondary_matches,
        }
    }

    /// Concatenate the last `scan_depth` messages whose role is scanned.
    pub fn build_corpus(messages: &[ChatMessage], scan: &ScanConfig) -> String {
        let start = messages.len().saturating_sub(scan.scan_depth);
        messages[start..]
            .iter()
            .filter(|m| scan.roles.includes(m.role))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Test one keyword against the corpus.
    pub fn keyword_present(
        keyword: &str,
        corpus: &str,
        scan: &ScanConfig,
    ) -> Result<bool, KeywordMatchError> {
        if scan.use_regex {
            let regex = compile(keyword, scan.case_sensitive)?;
            return Ok(regex.is_match(corpus));
        }

        if scan.match_whole_words {
            let regex = compile(&whole_word_pattern(keyword), scan.case_sensitive)?;
            return Ok(regex.is_match(corpus));
        }

        if scan.case_sensitive {
            Ok(corpus.contains(keyword))
        } else {
            Ok(corpus.to_lowercase().contains(&keyword.to_lowercase()))
        }
    }

    fn find_matches(
        &self,
        entry: &KnowledgeEntry,
        keywords: &[&str],
        corpus: &str,
        scan: &ScanConfig,
    ) -> Vec<String> {
        keywords
            .iter()
            .filter(|keyword| match Self::keyword_present(keyword, corpus, scan) {
                Ok(found) => found,
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "keyword skipped");
                    false
                }
            })
            .map(|keyword| keyword.to_string())
            .collect()
    }
}

/// Decide pass/fail from keyword counts.
///
/// | logic     | passes when                                                   |
/// |-----------|---------------------------------------------------------------|
/// | `AND_ANY` | at least one keyword on either list matched                   |
/// | `AND_ALL` | every primary and every secondary keyword matched             |
/// | `NOT_ALL` | not (both lists non-empty and both fully matched)             |
/// | `NOT_ANY` | no keyword matched                                            |
///
/// An empty list counts as fully matched.
pub fn selective_logic_passes(
    logic: SelectiveLogic,
    primary_total: usize,
    primary_hits: usize,
    secondary_total: usize,
    secondary_hits: usize,
) -> bool {
    let all_primary = primary_hits == primary_total;
    let all_secondary = secondary_hits == secondary_total;

    match logic {
        SelectiveLogic::AndAny => primary_hits + secondary_hits > 0,
        SelectiveLogic::AndAll => all_primary && all_secondary,
        SelectiveLogic::NotAll => {
            !(primary_total > 0 && secondary_total > 0 && all_primary && all_secondary)
        }
        SelectiveLogic::NotAny => primary_hits + secondary_hits == 0,
    }
}

fn configured(keywords: &[String]) -> Vec<&str> {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Escaped keyword with `\b` on each edge that starts or ends with a word
/// character. A boundary next to "+" or "#" would never match.
fn whole_word_pattern(keyword: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let start = if keyword.chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let end = if keyword.chars().next_back().is_some_and(is_word) { r"\b" } else { "" };
    format!("{start}{}{end}", regex::escape(keyword))
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<Regex, KeywordMatchError> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|source| KeywordMatchError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}
