//! Anchor heuristics, one strategy per text position.
//!
//! Each strategy looks for a marker in the prompt and falls back to a fixed
//! location when the marker is missing. Inserted blocks are separated from
//! surrounding text by a blank line.

use regex::Regex;

/// Names available to anchor detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptContext<'a> {
    pub bot_name: Option<&'a str>,
    pub persona_name: Option<&'a str>,
}

/// Places a formatted block into prompt text.
pub trait PositionStrategy: Send + Sync {
    fn insert(&self, prompt: &str, block: &str, context: &PromptContext<'_>) -> String;
}

/// Before the character definition; prepends when no anchor is found.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeforeCharacter;

impl PositionStrategy for BeforeCharacter {
    fn insert(&self, prompt: &str, block: &str, context: &PromptContext<'_>) -> String {
        match character_anchor(prompt, context) {
            Some(at) => insert_at(prompt, at, block),
            None => prepend(prompt, block),
        }
    }
}

/// After the paragraph holding the character definition.
///
/// Without an anchor the block goes after the first paragraph, or at the end
/// of a single-paragraph prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct AfterCharacter;

impl PositionStrategy for AfterCharacter {
    fn insert(&self, prompt: &str, block: &str, context: &PromptContext<'_>) -> String {
        let from = character_anchor(prompt, context).unwrap_or(0);
        match paragraph_end(prompt, from) {
            Some(at) => insert_at(prompt, at, block),
            None => append(prompt, block),
        }
    }
}

/// Before the example dialogue; falls back to after the second paragraph.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeforeExamples;

impl PositionStrategy for BeforeExamples {
    fn insert(&self, prompt: &str, block: &str, _context: &PromptContext<'_>) -> String {
        if let Some(at) = examples_anchors(prompt).first() {
            return insert_at(prompt, *at, block);
        }
        match paragraph_end(prompt, 0).and_then(|first| paragraph_end(prompt, first + 2)) {
            Some(at) => insert_at(prompt, at, block),
            None => append(prompt, block),
        }
    }
}

/// After the paragraph of the last example marker; appends otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct AfterExamples;

impl PositionStrategy for AfterExamples {
    fn insert(&self, prompt: &str, block: &str, _context: &PromptContext<'_>) -> String {
        let end = examples_anchors(prompt)
            .last()
            .and_then(|last| paragraph_end(prompt, *last));
        match end {
            Some(at) => insert_at(prompt, at, block),
            None => append(prompt, block),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTop;

impl PositionStrategy for SystemTop {
    fn insert(&self, prompt: &str, block: &str, _context: &PromptContext<'_>) -> String {
        prepend(prompt, block)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBottom;

impl PositionStrategy for SystemBottom {
    fn insert(&self, prompt: &str, block: &str, _context: &PromptContext<'_>) -> String {
        append(prompt, block)
    }
}

/// Byte offset of the first line starting with `Character:` or `{bot}:`.
fn character_anchor(prompt: &str, context: &PromptContext<'_>) -> Option<usize> {
    let mut labels = vec!["Character".to_string()];
    if let Some(name) = context.bot_name.map(str::trim).filter(|n| !n.is_empty()) {
        labels.push(regex::escape(name));
    }
    let pattern = format!(r"(?m)^(?:{}):", labels.join("|"));
    line_anchor(&pattern, prompt).first().copied()
}

/// Byte offsets of every line starting an example block.
fn examples_anchors(prompt: &str) -> Vec<usize> {
    line_anchor(r"(?mi)^(?:<START>|Example)", prompt)
}

fn line_anchor(pattern: &str, prompt: &str) -> Vec<usize> {
    match Regex::new(pattern) {
        Ok(regex) => regex.find_iter(prompt).map(|m| m.start()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Offset of the first paragraph break at or after `from`.
fn paragraph_end(prompt: &str, from: usize) -> Option<usize> {
    prompt.get(from..)?.find("\n\n").map(|i| from + i)
}

fn prepend(prompt: &str, block: &str) -> String {
    insert_at(prompt, 0, block)
}

fn append(prompt: &str, block: &str) -> String {
    insert_at(prompt, prompt.len(), block)
}

/// Split at `at` and join head, block and tail with blank lines.
fn insert_at(prompt: &str, at: usize, block: &str) -> String {
    let (head, tail) = prompt.split_at(at.min(prompt.len()));
    [head.trim_end(), block, tail.trim_start()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
