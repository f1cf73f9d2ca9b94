use serde::{Deserialize, Serialize};

use crate::ContentType;

/// Full description of an audio stream format.
///
/// `output_format_str` keeps the raw URL suffix that produced this format
/// so responses can echo it back verbatim in the `Content-Type` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub content_type: ContentType,
    pub sample_rate: u32,
    pub bit_depth: u8,
    pub channels: u8,
    pub output_format_str: String,
}

impl AudioFormat {
    pub fn new(content_type: ContentType, sample_rate: u32, bit_depth: u8, channels: u8) -> Self {
        Self {
            content_type,
            sample_rate,
            bit_depth,
            channels,
            output_format_str: content_type.as_str().to_string(),
        }
    }

    /// Same as [`AudioFormat::new`] but preserving an explicit raw format
    /// string (URL suffix with parameters).
    pub fn with_format_str(
        content_type: ContentType,
        sample_rate: u32,
        bit_depth: u8,
        channels: u8,
        output_format_str: impl Into<String>,
    ) -> Self {
        Self {
            content_type,
            sample_rate,
            bit_depth,
            channels,
            output_format_str: output_format_str.into(),
        }
    }

    /// Bytes per second of audio for this format:
    /// `sample_rate × (bit_depth / 8) × channels`.
    pub fn pcm_sample_size(&self) -> u64 {
        self.sample_rate as u64 * (self.bit_depth as u64 / 8) * self.channels as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(ContentType::PcmS16Le, 44100, 16, 2)
    }
}
