//! Text normalization pipeline for speech synthesis.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::markdown::strip_markdown;
use super::sentences::split_sentences;

/// Upper bound on normalization passes. Real text settles in two or three.
const MAX_PASSES: usize = 16;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

// Numbered-list artifacts: "1.1." / "1. 1." where both numbers agree.
static DOUBLED_LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| re(r"(^|\s)(\d+)\.\s?(\d+)\."));

// Abbreviations.
static ABBR_IE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bi\.e\."));
static ABBR_EG: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\be\.g\."));
static ABBR_ETC_SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| re(r"\b(?i:etc)\.(\s+[A-Z]|\s*$)"));
static ABBR_ETC: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\betc\."));
static ABBR_VS: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bvs\."));

// Ellipses, in the order they are rewritten.
static DOT_RUN: LazyLock<Regex> = LazyLock::new(|| re(r"\.{2,}"));
static ELLIPSIS_TRAILING: LazyLock<Regex> = LazyLock::new(|| re(r"([.!?])\s*\.{3,}\s*$"));
static ELLIPSIS_LEADING: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*\.{3,}\s*"));
static ELLIPSIS_AFTER_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| re(r"([.!?])\s*\.{3,}\s+([A-Z])"));
static ELLIPSIS_CONTINUATION: LazyLock<Regex> =
    LazyLock::new(|| re(r"([^.!?\s])\s*\.{3,}\s+([a-z])"));
static ELLIPSIS_TRANSITION: LazyLock<Regex> =
    LazyLock::new(|| re(r"([^.!?\s])\s*\.{3,}\s*([A-Z])"));
static ELLIPSIS_REMAINING: LazyLock<Regex> = LazyLock::new(|| re(r"\s*\.{3,}"));

// Repeated punctuation and connectors.
static REPEATED_TERMINAL: LazyLock<Regex> = LazyLock::new(|| re(r"([.!?])[.!?]+"));
static REPEATED_CLAUSE: LazyLock<Regex> = LazyLock::new(|| re(r"([,;:])[,;:]+"));
static DOUBLE_DASH: LazyLock<Regex> = LazyLock::new(|| re(r"\s*-{2,}\s*"));
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| re(r"\bhttps?://\S+"));
static SLASH: LazyLock<Regex> = LazyLock::new(|| re(r"(\w*)\s*/\s*(\w*)"));
static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| re(r"\s*\(([^()]*)\)"));
static STRAIGHT_QUOTED: LazyLock<Regex> = LazyLock::new(|| re(r#""([^"]*)""#));
static CURLY_QUOTED: LazyLock<Regex> = LazyLock::new(|| re("\u{201c}([^\u{201d}]*)\u{201d}"));

// Final tidy-up.
static COMMA_BEFORE_STOP: LazyLock<Regex> = LazyLock::new(|| re(r",\s*([.!?;:])"));
static COMMA_AFTER_STOP: LazyLock<Regex> = LazyLock::new(|| re(r"([.!?;:])\s*,"));
static COMMA_RUN: LazyLock<Regex> = LazyLock::new(|| re(r",(?:\s*,)+"));
static LEADING_CLAUSE_PUNCT: LazyLock<Regex> = LazyLock::new(|| re(r"^[\s,;:]+"));

/// Normalize raw model text into speakable prose.
///
/// Pipeline, per pass:
/// 1. markup removal (line-aware), whitespace collapse
/// 2. numbered-list artifact dedupe
/// 3. exact duplicate sentence and adjacent duplicate word removal
/// 4. spoken-punctuation rewrite (abbreviations, ellipses, slashes, …)
/// 5. whitespace-around-punctuation tidy
///
/// Passes repeat until the output stops changing, so
/// `normalize(normalize(x)) == normalize(x)`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut current = normalize_pass(text);
    for _ in 1..MAX_PASSES {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_pass(text: &str) -> String {
    let text = collapse_whitespace(&strip_markdown(text));
    let text = dedupe_list_markers(&text);
    let text = remove_duplicate_sentences(&text);
    let text = remove_duplicate_words(&text);
    let text = rewrite_for_speech(&text);
    tidy_punctuation(&text)
}

/// Collapse every whitespace run (including newlines) to one space.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn dedupe_list_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in DOUBLED_LIST_MARKER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let at_word_end = text[whole.end()..].chars().next().is_none_or(char::is_whitespace);
        if caps[2] != caps[3] || !at_word_end {
            continue;
        }
        out.push_str(&text[last..whole.start()]);
        out.push_str(&caps[1]);
        out.push_str(&caps[2]);
        out.push('.');
        last = whole.end();
    }

    out.push_str(&text[last..]);
    out
}

fn remove_duplicate_sentences(text: &str) -> String {
    let mut seen = HashSet::new();
    split_sentences(text)
        .into_iter()
        .filter(|sentence| seen.insert(*sentence))
        .collect::<Vec<_>>()
        .join(" ")
}

fn remove_duplicate_words(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();

    for token in text.split(' ') {
        if let Some(prev) = out.last_mut() {
            let word_len = token.find(|c: char| !is_word_char(c)).unwrap_or(token.len());
            let (word, rest) = token.split_at(word_len);
            if is_word(prev) && !word.is_empty() && word.to_lowercase() == prev.to_lowercase() {
                prev.push_str(rest);
                continue;
            }
        }
        out.push(token.to_string());
    }

    out.join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word(token: &str) -> bool {
    !token.is_empty() && token.chars().all(is_word_char)
}

fn rewrite_for_speech(text: &str) -> String {
    let text = ABBR_IE.replace_all(text, "that is");
    let text = ABBR_EG.replace_all(&text, "for example");
    let text = ABBR_ETC_SENTENCE_END.replace_all(&text, "et cetera.${1}");
    let text = ABBR_ETC.replace_all(&text, "et cetera");
    let text = ABBR_VS.replace_all(&text, "versus");

    let text = text.replace('\u{2026}', "...");
    let text = DOT_RUN.replace_all(&text, "...");
    let text = ELLIPSIS_TRAILING.replace_all(&text, "${1}");
    let text = ELLIPSIS_LEADING.replace_all(&text, "");
    let text = ELLIPSIS_AFTER_SENTENCE.replace_all(&text, "${1} Additionally, ${2}");
    let text = ELLIPSIS_CONTINUATION.replace_all(&text, "${1} and ${2}");
    let text = ELLIPSIS_TRANSITION.replace_all(&text, "${1}. Furthermore, ${2}");
    let text = ELLIPSIS_REMAINING.replace_all(&text, " and so forth");

    let text = REPEATED_TERMINAL.replace_all(&text, "${1}");
    let text = REPEATED_CLAUSE.replace_all(&text, "${1}");
    let text = DOUBLE_DASH.replace_all(&text, " \u{2014} ");

    let text = BARE_URL.replace_all(&text, "the link");
    let text = SLASH.replace_all(&text, |caps: &Captures| {
        let (left, right) = (&caps[1], &caps[2]);
        if is_number(left) && is_number(right) {
            format!("{left}/{right}")
        } else {
            format!("{left} or {right}")
        }
    });

    let text = PARENTHETICAL.replace_all(&text, ", ${1},");
    let text = STRAIGHT_QUOTED.replace_all(&text, "${1}");
    let text = CURLY_QUOTED.replace_all(&text, "${1}");
    text.into_owned()
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn tidy_punctuation(text: &str) -> String {
    let text = COMMA_BEFORE_STOP.replace_all(text, "${1}");
    let text = COMMA_AFTER_STOP.replace_all(&text, "${1}");
    let text = COMMA_RUN.replace_all(&text, ",");
    let text = fix_punctuation_spacing(&text);
    let text = LEADING_CLAUSE_PUNCT.replace(&text, "");
    collapse_whitespace(&text)
}

/// No space before `. , ! ? ; :`, one space after, except inside numbers
/// (`3.14`, `1,000`) and dotted names (`node.js`).
fn fix_punctuation_spacing(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_whitespace() && chars.get(i + 1).copied().is_some_and(is_spacing_punct) {
            continue;
        }

        out.push(c);

        if !is_spacing_punct(c) {
            continue;
        }
        let Some(&next) = chars.get(i + 1) else { continue };
        let prev = i.checked_sub(1).and_then(|p| chars.get(p)).copied();
        if next.is_whitespace() || is_spacing_punct(next) || is_closing(next) {
            continue;
        }
        if prev.is_some_and(|p| p.is_ascii_digit()) && next.is_ascii_digit() && matches!(c, '.' | ',') {
            continue;
        }
        if c == '.' && prev.is_some_and(char::is_alphanumeric) && next.is_lowercase() {
            continue;
        }
        out.push(' ');
    }

    out
}

const fn is_spacing_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?' | ';' | ':')
}

const fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}
