//! Audio primitives shared by the streaming pipeline.
//!
//! This crate carries the format vocabulary (codec/PCM content types and
//! [`AudioFormat`] descriptors) plus the raw-PCM equal-power crossfade used
//! at track boundaries of the queue flow stream. Everything here operates
//! on plain interleaved little-endian PCM bytes so the streaming layer can
//! hand chunks around as [`bytes::Bytes`] without further conversion.

mod content_type;
mod crossfade;
mod format;

pub use content_type::ContentType;
pub use crossfade::{crossfade_pcm_parts, CrossfadeError};
pub use format::AudioFormat;
