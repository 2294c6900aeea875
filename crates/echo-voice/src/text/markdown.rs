//! Markup removal for spoken output.
//!
//! Three stages: reasoning blocks are cut from the whole text, then every
//! line is classified (fence, rule or prose) so block markers are seen
//! before the normalizer flattens whitespace, then a fixed table of inline
//! rewrites runs over each prose line. Numbered list markers are kept: they
//! are spoken ("1. Buy milk.").

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Spoken in place of a fenced code block.
pub const CODE_OMITTED: &str = "Code omitted.";

const FENCE: &str = "```";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

/// Closed reasoning blocks. An unclosed one is left alone; its closing tag
/// may still be streaming in.
static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)<think\b[^>]*>.*?</think>|<reasoning\b[^>]*>.*?</reasoning>|<seed:think>.*?</seed:think>|<\|START_THINKING\|>.*?<\|END_THINKING\|>")
});

static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$"));

/// Any run of blockquote, heading, bullet and task-box markers.
static BLOCK_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| re(r"^(?:>\s*|#{1,6}(?:\s+|$)|[-*+•]\s+|\[[ xX]\]\s+)*"));

static IMAGE: LazyLock<Regex> = LazyLock::new(|| re(r"!\[([^\]]*)\]\([^)]*\)"));
static LINK: LazyLock<Regex> = LazyLock::new(|| re(r"\[([^\]]*)\]\([^)]*\)"));
static AUTOLINK: LazyLock<Regex> = LazyLock::new(|| re(r"<(https?://[^<>\s]+)>"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| re(r"`([^`]*)`"));
// A lone `_` is usually part of an identifier, so only doubled ones go.
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| re(r"\*\*|__|~~|\*|`"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| re(r"</?[A-Za-z][A-Za-z0-9:-]*(?:\s[^<>]*)?/?>"));

/// Strip markdown and reasoning blocks, keeping one output line per
/// surviving input line.
///
/// - `<think>…</think>` and similar reasoning blocks → removed entirely
/// - fenced code blocks → [`CODE_OMITTED`]; an unterminated fence swallows
///   the rest of the text
/// - headings, blockquotes, bullets and task boxes → text only
/// - horizontal rules → removed
/// - images → "image: alt", links → link text, autolinks → the bare URL
/// - inline code, emphasis, strikethrough, HTML tags → text only
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let text = REASONING_BLOCK.replace_all(text, " ");

    let mut lines: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with(FENCE) {
            if !in_fence {
                lines.push(CODE_OMITTED.to_string());
            }
            in_fence = !in_fence;
        } else if !in_fence && !HORIZONTAL_RULE.is_match(line) {
            lines.push(strip_inline(&BLOCK_MARKERS.replace(line, "")));
        }
    }

    lines.join("\n")
}

fn strip_inline(line: &str) -> String {
    let line = IMAGE.replace_all(line, |caps: &Captures| {
        let alt = caps[1].trim();
        if alt.is_empty() {
            String::new()
        } else {
            format!("image: {alt}")
        }
    });
    let line = LINK.replace_all(&line, "${1}");
    let line = AUTOLINK.replace_all(&line, "${1}");
    let line = INLINE_CODE.replace_all(&line, "${1}");
    let line = EMPHASIS.replace_all(&line, "");
    HTML_TAG.replace_all(&line, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_markup_leaves_plain_words() {
        assert_eq!(
            strip_markdown("Run `cargo fmt` **before** you *push*, ~~not after~~."),
            "Run cargo fmt before you push, not after."
        );
    }

    #[test]
    fn fenced_block_is_announced_once() {
        let input = "Like so:\n```sh\necho hi\necho bye\n```\nThat is all.";
        assert_eq!(strip_markdown(input), "Like so:\nCode omitted.\nThat is all.");
    }

    #[test]
    fn unterminated_fence_hides_the_tail() {
        let input = "Start.\n```python\nprint(1)\nprint(2)";
        assert_eq!(strip_markdown(input), "Start.\nCode omitted.");
    }

    #[test]
    fn references_are_spoken_by_name() {
        assert_eq!(
            strip_markdown("See [the docs](https://d.example/x) or ![](spacer.gif)![a red fox](fox.jpg)."),
            "See the docs or image: a red fox."
        );
        assert_eq!(
            strip_markdown("Mail <https://example.com/path> now"),
            "Mail https://example.com/path now"
        );
    }

    #[test]
    fn block_markers_go_and_numbering_stays() {
        let input = "> ### Shopping\n> > nested quote\n+ eggs\n- [x] flour\n* [ ] sugar\n2. Bake\n* * *\n___";
        assert_eq!(
            strip_markdown(input),
            "Shopping\nnested quote\neggs\nflour\nsugar\n2. Bake"
        );
    }

    #[test]
    fn closed_reasoning_spans_lines_and_case() {
        let input = "<Reasoning>\nstep one\nstep two\n</REASONING>\nAnswer: yes.";
        assert_eq!(strip_markdown(input).trim(), "Answer: yes.");

        let input = "A <|START_THINKING|>x<|END_THINKING|> B <seed:think>y</seed:think> C";
        assert_eq!(strip_markdown(input), "A   B   C");
    }

    #[test]
    fn open_reasoning_tag_drops_only_the_tag() {
        assert_eq!(strip_markdown("<think budget=\"9\">half a thought"), "half a thought");
    }

    #[test]
    fn tags_go_but_comparisons_stay() {
        assert_eq!(strip_markdown("<em>odd</em><br/> x < y > z"), "odd x < y > z");
    }

    #[test]
    fn heading_marker_needs_a_space() {
        assert_eq!(strip_markdown("#1 priority"), "#1 priority");
        assert_eq!(strip_markdown("###### Deep"), "Deep");
    }

    #[test]
    fn stacked_markers_go_in_one_pass() {
        assert_eq!(strip_markdown("> - - [ ] > # odd"), "odd");
    }
}
