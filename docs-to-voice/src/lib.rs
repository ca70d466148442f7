//! Text-to-speech with sentence-level timelines
//!
//! Converts a block of text into one audio file through either the macOS
//! `say` engine or a remote Model Studio TTS API, then writes a JSON timeline
//! and an SRT subtitle file mapping each sentence to its time span.

pub mod aiff;
pub mod audio;
pub mod chunker;
pub mod concat;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod speed;
pub mod text;
pub mod timeline;
pub mod tts;

pub use error::{Result, VoiceError};
