//! Local audio devices: microphone via `cpal`, speaker via `rodio`.
//!
//! `cpal::Stream` and `rodio::OutputStream` are `!Send` on some platforms
//! (macOS CoreAudio, etc.), so each adapter confines its device to a
//! dedicated OS thread and talks to it over channels. The adapters
//! themselves are plain `Send` values that satisfy the capability traits.

mod capture;
mod output;

pub use capture::CpalCapturer;
pub use output::RodioPlayer;
