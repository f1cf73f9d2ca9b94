//! Output format negotiation for the streaming endpoints.

use maaudio::{AudioFormat, ContentType};
use maconfig::get_config;

use crate::error::RequestError;
use crate::model::Player;

/// Parses PCM parameters from a `codec[;key=value;…]` format string.
///
/// Returns `(sample_rate, bit_depth, channels)` with the usual CD-quality
/// defaults (44100 Hz / 16 bit / stereo) for missing keys.
pub fn parse_pcm_info(content_type_str: &str) -> (u32, u8, u8) {
    let mut sample_rate = 44100u32;
    let mut bit_depth = 16u8;
    let mut channels = 2u8;

    for param in content_type_str.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim() {
            "rate" => {
                if let Ok(value) = value.trim().parse() {
                    sample_rate = value;
                }
            }
            // "bitrate" is historical naming: it carries the bit depth
            "bitrate" => {
                if let Ok(value) = value.trim().parse() {
                    bit_depth = value;
                }
            }
            "channels" => {
                if let Ok(value) = value.trim().parse() {
                    channels = value;
                }
            }
            _ => {}
        }
    }

    (sample_rate, bit_depth, channels)
}

/// Builds the PCM parameter block appended to stream URLs when a player is
/// configured for raw PCM output.
pub(crate) fn pcm_format_suffix(sample_rate: u32, bit_depth: u8, channels: u8) -> String {
    format!(";codec=pcm;rate={sample_rate};bitrate={bit_depth};channels={channels}")
}

/// Resolves the player-specific output format for a format string.
///
/// Explicit PCM/WAV parameters in the URL are authoritative — the URL was
/// minted against this player, so its values win. For every other codec
/// the defaults are clamped to the player capabilities and the configured
/// channel mode applies.
pub fn resolve_output_format(
    output_format_str: &str,
    queue_player: &Player,
    default_sample_rate: u32,
    default_bit_depth: u8,
) -> Result<AudioFormat, RequestError> {
    let mut content_type = ContentType::try_parse(output_format_str)
        .ok_or_else(|| RequestError::UnsupportedFormat(output_format_str.to_string()))?;

    let (output_sample_rate, output_bit_depth, output_channels);
    if content_type.is_pcm() || content_type == ContentType::Wav {
        let (sample_rate, bit_depth, channels) = parse_pcm_info(output_format_str);
        if content_type == ContentType::Pcm {
            // resolve the generic pcm type from the requested bit depth
            content_type = ContentType::from_bit_depth(bit_depth);
        }
        output_sample_rate = sample_rate;
        output_bit_depth = bit_depth;
        output_channels = channels;
    } else {
        let player_max_bit_depth = if queue_player.supports_24bit { 32 } else { 16 };
        output_sample_rate = default_sample_rate.min(queue_player.max_sample_rate);
        output_bit_depth = default_bit_depth.min(player_max_bit_depth);
        let channel_mode = get_config().get_output_channels(&queue_player.player_id);
        output_channels = if channel_mode != "stereo" { 1 } else { 2 };
    }

    Ok(AudioFormat::with_format_str(
        content_type,
        output_sample_rate,
        output_bit_depth,
        output_channels,
        output_format_str,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(max_sample_rate: u32, supports_24bit: bool) -> Player {
        Player {
            player_id: "test-player".into(),
            display_name: "Test Player".into(),
            max_sample_rate,
            supports_24bit,
        }
    }

    #[test]
    fn test_parse_pcm_info_defaults() {
        assert_eq!(parse_pcm_info("pcm"), (44100, 16, 2));
    }

    #[test]
    fn test_parse_pcm_info_full() {
        let parsed = parse_pcm_info("pcm;codec=pcm;rate=96000;bitrate=24;channels=1");
        assert_eq!(parsed, (96000, 24, 1));
    }

    #[test]
    fn test_parse_pcm_info_ignores_junk() {
        let parsed = parse_pcm_info("s24le;rate=48000;oops;x=y");
        assert_eq!(parsed, (48000, 16, 2));
    }

    #[test]
    fn test_pcm_url_parameters_win_over_player_caps() {
        // The URL was minted for this player, so the explicit parameters
        // are taken as-is even beyond the advertised caps.
        let format = resolve_output_format(
            "pcm;rate=96000;bitrate=24;channels=2",
            &player(48000, true),
            96000,
            24,
        )
        .unwrap();
        assert_eq!(format.sample_rate, 96000);
        assert_eq!(format.bit_depth, 24);
        assert_eq!(format.channels, 2);
        assert_eq!(format.content_type, ContentType::PcmS24Le);
    }

    #[test]
    fn test_generic_pcm_resolves_concrete_type() {
        let format =
            resolve_output_format("pcm;rate=44100;bitrate=16", &player(48000, false), 44100, 16)
                .unwrap();
        assert_eq!(format.content_type, ContentType::PcmS16Le);
    }

    #[test]
    fn test_wav_uses_url_parameters() {
        let format =
            resolve_output_format("wav;rate=48000;bitrate=24", &player(44100, false), 96000, 24)
                .unwrap();
        assert_eq!(format.content_type, ContentType::Wav);
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.bit_depth, 24);
    }

    #[test]
    fn test_lossy_codec_clamps_to_player_caps() {
        let format = resolve_output_format("flac", &player(48000, false), 96000, 24).unwrap();
        assert_eq!(format.content_type, ContentType::Flac);
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.bit_depth, 16);
        assert_eq!(format.channels, 2);
        assert_eq!(format.output_format_str, "flac");
    }

    #[test]
    fn test_24bit_capable_player_keeps_depth() {
        let format = resolve_output_format("flac", &player(192000, true), 96000, 24).unwrap();
        assert_eq!(format.sample_rate, 96000);
        assert_eq!(format.bit_depth, 24);
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let err = resolve_output_format("dsd", &player(48000, true), 96000, 24).unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_pcm_suffix_round_trip() {
        let suffix = pcm_format_suffix(48000, 24, 2);
        let format_str = format!("s24le{suffix}");
        let format =
            resolve_output_format(&format_str, &player(44100, false), 44100, 16).unwrap();
        assert_eq!(format.content_type, ContentType::PcmS24Le);
        assert_eq!(format.sample_rate, 48000);
        assert_eq!(format.bit_depth, 24);
        assert_eq!(format.channels, 2);
        assert_eq!(format.output_format_str, format_str);
    }
}
