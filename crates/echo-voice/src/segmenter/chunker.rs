//! Incremental chunking of streamed text.
//!
//! [`SegmentBuffer`] only ever cuts spans off the front of its buffer, so the
//! spans it returns, followed by whatever [`finish`](SegmentBuffer::finish)
//! yields, concatenate back to exactly the text that was pushed.

use std::ops::Range;

use crate::config::SegmenterConfig;
use crate::text::sentence_ends;

/// Blocks that must not be split while still open: their content is either
/// dropped or replaced as a whole by the normalizer.
const HELD_BLOCKS: &[(&str, &str)] = &[("<think", "</think>"), ("<reasoning>", "</reasoning>")];
const CODE_FENCE: &str = "```";

/// Working buffer of not-yet-emitted model text.
#[derive(Debug)]
pub struct SegmentBuffer {
    buf: String,
    config: SegmenterConfig,
}

impl SegmentBuffer {
    pub const fn new(config: SegmenterConfig) -> Self {
        Self {
            buf: String::new(),
            config,
        }
    }

    /// Append a fragment and return every span that is now ready, oldest
    /// first.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buf.push_str(fragment);

        let mut spans = Vec::new();
        while let Some(cut) = self.next_cut() {
            spans.push(self.buf.drain(..cut).collect());
        }
        spans
    }

    /// Take the remainder once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    pub fn pending(&self) -> &str {
        &self.buf
    }

    /// Byte offset of the next cut, or `None` to keep waiting.
    ///
    /// Rules in priority order: complete paragraph, sentence group past the
    /// group size, forced break of an over-long unterminated tail. Code
    /// fences and reasoning blocks are never cut inside.
    fn next_cut(&self) -> Option<usize> {
        let held = HeldBlocks::scan(&self.buf);
        let region = &self.buf[..held.open_at.unwrap_or(self.buf.len())];

        if let Some(end) = paragraph_end(region, &held) {
            return Some(end);
        }

        let ends: Vec<usize> = sentence_ends(region)
            .into_iter()
            .filter(|&end| !held.contains(end))
            .collect();
        if let Some(&end) = ends
            .iter()
            .find(|&&end| char_len(&region[..end]) > self.config.sentence_group_chars)
        {
            return Some(end);
        }

        let tail_start = ends.last().copied().unwrap_or(0);
        let tail = &region[tail_start..];
        if char_len(tail) > self.config.force_break_after_chars {
            let cut = tail_start + soft_break(tail, self.config.force_break_window_chars);
            return Some(held.end_of_block_at(cut).unwrap_or(cut));
        }

        None
    }
}

/// Code fences and reasoning blocks found in the buffer.
#[derive(Debug, Default)]
struct HeldBlocks {
    /// Closed blocks. A fence block ends before its closing line's `\n`.
    closed: Vec<Range<usize>>,
    /// Start of a block that is still streaming in.
    open_at: Option<usize>,
}

impl HeldBlocks {
    fn scan(buf: &str) -> Self {
        let mut held = Self::default();
        held.scan_fences(buf);
        held.scan_tags(buf);
        held
    }

    fn scan_fences(&mut self, buf: &str) {
        let mut offset = 0;
        let mut open = None;
        for line in buf.split_inclusive('\n') {
            if line.trim_start().starts_with(CODE_FENCE) {
                match open {
                    None => open = Some(offset),
                    // A closing fence counts once its line is complete.
                    Some(start) if line.ends_with('\n') => {
                        self.closed.push(start..offset + line.len() - 1);
                        open = None;
                    }
                    Some(_) => {}
                }
            }
            offset += line.len();
        }
        self.mark_open(open);
    }

    fn scan_tags(&mut self, buf: &str) {
        let lower = buf.to_ascii_lowercase();
        for (open_tag, close_tag) in HELD_BLOCKS {
            let mut cursor = 0;
            while let Some(found) = lower[cursor..].find(open_tag) {
                let start = cursor + found;
                match lower[start..].find(close_tag) {
                    Some(close) => {
                        let end = start + close + close_tag.len();
                        self.closed.push(start..end);
                        cursor = end;
                    }
                    None => {
                        self.mark_open(Some(start));
                        break;
                    }
                }
            }
        }
    }

    fn mark_open(&mut self, start: Option<usize>) {
        if let Some(start) = start {
            self.open_at = Some(self.open_at.map_or(start, |o| o.min(start)));
        }
    }

    /// Whether a cut at `pos` would land inside a closed block.
    fn contains(&self, pos: usize) -> bool {
        self.closed.iter().any(|r| r.start < pos && pos < r.end)
    }

    fn end_of_block_at(&self, pos: usize) -> Option<usize> {
        self.closed
            .iter()
            .find(|r| r.start < pos && pos < r.end)
            .map(|r| r.end)
    }
}

/// End (past the `\n`) of the first line that carries text, skipping line
/// breaks inside held blocks.
fn paragraph_end(region: &str, held: &HeldBlocks) -> Option<usize> {
    let mut start = 0;
    for (i, _) in region.match_indices('\n') {
        if held.closed.iter().any(|r| r.contains(&i)) {
            continue;
        }
        if !region[start..i].trim().is_empty() {
            return Some(i + 1);
        }
        // Leading blank lines ride along with the next paragraph.
        start = i + 1;
    }
    None
}

/// Where to force-break `tail` inside its first `window` characters: after
/// the last clause boundary, else after the last whitespace, else at the
/// window edge. Always at least one character.
fn soft_break(tail: &str, window: usize) -> usize {
    let window_end = tail
        .char_indices()
        .nth(window)
        .map_or(tail.len(), |(i, _)| i);
    let scope = &tail[..window_end];

    let mut clause = None;
    let mut space = None;
    let mut chars = scope.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let next = chars.peek().copied();
        if matches!(c, ',' | ';' | ':') {
            if let Some((j, n)) = next {
                if n.is_whitespace() {
                    clause = Some(j + n.len_utf8());
                }
            }
        }
        if c.is_whitespace() && i > 0 {
            space = Some(i + c.len_utf8());
        }
    }

    clause.or(space).unwrap_or(window_end).max(first_char_len(tail))
}

fn first_char_len(s: &str) -> usize {
    s.chars().next().map_or(0, char::len_utf8)
}

fn char_len(s: &str) -> usize {
    s.trim().chars().count()
}
