//! Sentence boundary detection shared by the normalizer and the segmenter.

/// Words ending in `.` that never end a sentence.
const NON_TERMINAL_ABBREVIATIONS: &[&str] = &["i.e.", "e.g.", "vs.", "mr.", "mrs.", "ms.", "dr.", "st."];

/// Byte offsets just past each complete sentence in `text`.
///
/// A sentence ends at a run of `.`, `!` or `?` (plus any closing quotes or
/// brackets) that is followed by whitespace. The end of `text` is *not* a
/// boundary: in a stream more text may still arrive. Numbered list markers
/// (`1.`) and common abbreviations (`e.g.`) are not boundaries either.
#[must_use]
pub fn sentence_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if is_terminator(next) || is_closer(next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        let followed_by_space = chars.peek().is_some_and(|&(_, next)| next.is_whitespace());
        if !followed_by_space || is_false_boundary(&text[start..end]) {
            continue;
        }

        ends.push(end);
        start = end;
    }

    ends
}

/// Split a complete text into trimmed sentences; the unterminated remainder
/// counts as the last sentence.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for end in sentence_ends(text) {
        push_trimmed(&mut sentences, &text[start..end]);
        start = end;
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

/// Whether `text` is a bare numbered-list marker such as `3.` or `12)`.
#[must_use]
pub fn is_list_marker(text: &str) -> bool {
    text.strip_suffix('.')
        .or_else(|| text.strip_suffix(')'))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, sentence: &'a str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

const fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

const fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

fn is_false_boundary(sentence: &str) -> bool {
    let trimmed = sentence.trim();
    if is_list_marker(trimmed) {
        return true;
    }

    let last_word = trimmed.rsplit(char::is_whitespace).next().unwrap_or_default();
    let last_word = last_word
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    NON_TERMINAL_ABBREVIATIONS.contains(&last_word.as_str())
}
