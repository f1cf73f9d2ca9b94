use serde::{Deserialize, Serialize};

/// Audio content type of a stream, named after the ffmpeg format tokens so
/// the value can be used directly as a container/codec argument.
///
/// The PCM variants describe raw interleaved little-endian samples; `Pcm`
/// is the generic placeholder used in URLs before the bit depth is known
/// (resolved through [`ContentType::from_bit_depth`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[serde(rename = "s16le")]
    PcmS16Le,
    #[serde(rename = "s24le")]
    PcmS24Le,
    #[serde(rename = "s32le")]
    PcmS32Le,
    Pcm,
    Wav,
    Aiff,
    Flac,
    Mp3,
    Aac,
    Ogg,
}

impl ContentType {
    /// Parses a content type from an output format string of the form
    /// `codec[;key=value;…]`. Returns `None` for unknown codecs.
    pub fn try_parse(format_str: &str) -> Option<Self> {
        let codec = format_str.split(';').next().unwrap_or(format_str);
        match codec.trim().to_ascii_lowercase().as_str() {
            "s16le" | "pcm_s16le" => Some(Self::PcmS16Le),
            "s24le" | "pcm_s24le" => Some(Self::PcmS24Le),
            "s32le" | "pcm_s32le" => Some(Self::PcmS32Le),
            "pcm" => Some(Self::Pcm),
            "wav" => Some(Self::Wav),
            "aiff" => Some(Self::Aiff),
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "aac" => Some(Self::Aac),
            "ogg" => Some(Self::Ogg),
            _ => None,
        }
    }

    /// Resolves the concrete PCM variant for a bit depth.
    pub fn from_bit_depth(bit_depth: u8) -> Self {
        match bit_depth {
            d if d <= 16 => Self::PcmS16Le,
            24 => Self::PcmS24Le,
            _ => Self::PcmS32Le,
        }
    }

    /// ffmpeg format token / URL suffix for this content type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcmS16Le => "s16le",
            Self::PcmS24Le => "s24le",
            Self::PcmS32Le => "s32le",
            Self::Pcm => "pcm",
            Self::Wav => "wav",
            Self::Aiff => "aiff",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ogg => "ogg",
        }
    }

    /// True for raw PCM variants (including the generic placeholder).
    pub fn is_pcm(&self) -> bool {
        matches!(
            self,
            Self::PcmS16Le | Self::PcmS24Le | Self::PcmS32Le | Self::Pcm
        )
    }

    /// True for content that carries the full signal (PCM, WAV, AIFF, FLAC).
    pub fn is_lossless(&self) -> bool {
        self.is_pcm() || matches!(self, Self::Wav | Self::Aiff | Self::Flac)
    }

    /// Bit depth of the concrete PCM variants, `None` otherwise.
    pub fn bit_depth(&self) -> Option<u8> {
        match self {
            Self::PcmS16Le => Some(16),
            Self::PcmS24Le => Some(24),
            Self::PcmS32Le => Some(32),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
