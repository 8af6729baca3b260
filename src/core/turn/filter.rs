//! Rejection of no-speech and noise transcripts.
//!
//! Silence and background noise often come back from transcription models as
//! confident single letters ("P P P") or stretched consonants ("pppp"). Those
//! must never reach the conversation history.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::transcription::NO_SPEECH_SENTINEL;

/// Stock phrases models emit around noise, followed by the remainder.
static STOCK_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(thank you|thanks|okay|ok|yes|no|um+|uh+|hmm+|bye|so)\b[\s,.!?;:-]*(.*)$")
        .expect("stock phrase pattern is valid")
});

/// Shortest run of one repeated consonant treated as noise.
pub const MIN_CONSONANT_RUN: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptFilter;

impl TranscriptFilter {
    pub fn new() -> Self {
        Self
    }

    /// Trimmed transcript when it carries speech, `None` when it is garbage.
    pub fn filter(&self, text: &str) -> Option<String> {
        self.is_meaningful(text).then(|| text.trim().to_string())
    }

    pub fn is_meaningful(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || !trimmed.chars().any(char::is_alphanumeric) {
            return false;
        }
        if is_no_speech(trimmed) || is_noise(trimmed) {
            return false;
        }
        if let Some(caps) = STOCK_PHRASE.captures(trimmed) {
            let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
            if !rest.is_empty() && (is_noise(rest) || is_no_speech(rest)) {
                return false;
            }
        }
        true
    }
}

fn is_no_speech(text: &str) -> bool {
    let core = text.trim_matches(|c: char| !c.is_alphanumeric());
    core.eq_ignore_ascii_case(NO_SPEECH_SENTINEL) || core.eq_ignore_ascii_case("no speech")
}

fn is_noise(text: &str) -> bool {
    is_repeated_single_letter(text) || has_consonant_run(text, MIN_CONSONANT_RUN)
}

/// Two or more tokens that are all the same single letter, e.g. `"P P P"`.
fn is_repeated_single_letter(text: &str) -> bool {
    let mut tokens = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty());
    let Some(first) = tokens.next() else {
        return false;
    };
    let mut chars = first.chars();
    let (Some(letter), None) = (chars.next(), chars.next()) else {
        return false;
    };
    if !letter.is_alphabetic() {
        return false;
    }
    let letter = letter.to_ascii_lowercase();

    let mut count = 1;
    for token in tokens {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.to_ascii_lowercase() == letter => count += 1,
            _ => return false,
        }
    }
    count >= 2
}

fn is_consonant(c: char) -> bool {
    c.is_ascii_alphabetic() && !matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

fn has_consonant_run(text: &str, min_run: usize) -> bool {
    let mut previous: Option<char> = None;
    let mut run = 0;
    for c in text.chars().map(|c| c.to_ascii_lowercase()) {
        if is_consonant(c) && previous == Some(c) {
            run += 1;
        } else {
            run = usize::from(is_consonant(c));
        }
        if run >= min_run {
            return true;
        }
        previous = Some(c);
    }
    false
}
