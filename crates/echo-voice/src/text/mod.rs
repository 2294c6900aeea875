//! Text cleanup between the model stream and speech synthesis.
//!
//! [`normalize`] is a pure, idempotent pipeline that turns raw streamed
//! model output into prose that sounds natural when spoken. The sentence
//! splitter is shared with the response segmenter so both agree on where a
//! sentence ends.

mod markdown;
mod normalize;
mod sentences;

pub use markdown::{strip_markdown, CODE_OMITTED};
pub use normalize::{collapse_whitespace, normalize};
pub use sentences::{is_list_marker, sentence_ends, split_sentences};
