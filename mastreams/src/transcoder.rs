//! External transcoder (ffmpeg) driver.
//!
//! Every streaming request owns one transcoder child process: raw PCM is
//! written to its stdin, the encoded target codec is read from its stdout.
//! The process is killed when the owning response ends, on every exit
//! path.

use std::process::Stdio;

use maaudio::{AudioFormat, ContentType};
use maconfig::get_config;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{Level, debug};

const FFMPEG_BINARY: &str = "ffmpeg";

/// Builds the player-specific ffmpeg argument list converting raw PCM on
/// stdin into the target codec on stdout, including the player's EQ and
/// channel-mix filter chain.
pub fn player_ffmpeg_args(
    player_id: &str,
    input_format: &AudioFormat,
    output_format: &AudioFormat,
) -> Vec<String> {
    let config = get_config();

    let loglevel = if tracing::enabled!(Level::DEBUG) {
        "warning"
    } else {
        "quiet"
    };
    let mut args: Vec<String> = [
        FFMPEG_BINARY,
        "-hide_banner",
        "-loglevel",
        loglevel,
        "-ignore_unknown",
        // input side: raw PCM on stdin
        "-f",
        input_format.content_type.as_str(),
        "-ac",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(input_format.channels.to_string());
    args.push("-channel_layout".to_string());
    args.push(if input_format.channels == 1 { "mono" } else { "stereo" }.to_string());
    args.push("-ar".to_string());
    args.push(input_format.sample_rate.to_string());
    args.push("-i".to_string());
    args.push("-".to_string());
    args.push("-metadata".to_string());
    args.push("title=\"Music Assistant\"".to_string());

    // a very basic 3-band equalizer plus left/right channel mixing
    let mut filter_params: Vec<String> = Vec::new();
    let eq_bass = config.get_eq_bass(player_id);
    if eq_bass != 0.0 {
        filter_params.push(format!(
            "equalizer=frequency=100:width=200:width_type=h:gain={eq_bass}"
        ));
    }
    let eq_mid = config.get_eq_mid(player_id);
    if eq_mid != 0.0 {
        filter_params.push(format!(
            "equalizer=frequency=900:width=1800:width_type=h:gain={eq_mid}"
        ));
    }
    let eq_treble = config.get_eq_treble(player_id);
    if eq_treble != 0.0 {
        filter_params.push(format!(
            "equalizer=frequency=9000:width=18000:width_type=h:gain={eq_treble}"
        ));
    }
    match config.get_output_channels(player_id).as_str() {
        "left" => filter_params.push("pan=mono|c0=FL".to_string()),
        "right" => filter_params.push("pan=mono|c0=FR".to_string()),
        _ => {}
    }
    if !filter_params.is_empty() {
        args.push("-af".to_string());
        args.push(filter_params.join(","));
    }

    // output side
    match output_format.content_type {
        ContentType::Flac => {
            // compression level 0 prevents latency spikes on cast receivers
            args.extend(
                ["-f", "flac", "-compression_level", "0"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        ContentType::Aac => {
            args.extend(
                ["-f", "adts", "-c:a", "aac", "-b:a", "320k"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        ContentType::Mp3 => {
            args.extend(
                ["-f", "mp3", "-c:a", "mp3", "-b:a", "320k"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        other => {
            args.push("-f".to_string());
            args.push(other.as_str().to_string());
        }
    }
    args.push("-ac".to_string());
    args.push(output_format.channels.to_string());
    if output_format.content_type.is_lossless() {
        args.push("-ar".to_string());
        args.push(output_format.sample_rate.to_string());
    }
    args.push("-".to_string());

    args
}

/// Supervised transcoder child process.
///
/// The child is spawned with `kill_on_drop`, tying its lifetime to the
/// HTTP response that owns it.
#[derive(Debug)]
pub struct Transcoder {
    child: Child,
}

impl Transcoder {
    /// Spawns the transcoder with piped stdin/stdout.
    pub fn spawn(args: &[String]) -> std::io::Result<Self> {
        let (program, rest) = args.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty transcoder command")
        })?;
        debug!("Spawning transcoder: {}", args.join(" "));
        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Self { child })
    }

    /// Takes the stdin pipe. The producer writes PCM into it and drops it
    /// to signal EOF to the encoder.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Takes the stdout pipe carrying the encoded stream.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Reaps the child after its stdout reached EOF.
    pub async fn wait(mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

/// Result of probing the ffmpeg binary at startup.
#[derive(Debug, Clone)]
pub struct AudioSupport {
    pub available: bool,
    pub version: Option<String>,
    pub libsoxr: bool,
}

/// Checks that ffmpeg is present and whether it was built with libsoxr
/// (required for the highest quality resampling).
pub async fn check_audio_support() -> AudioSupport {
    let output = match Command::new(FFMPEG_BINARY).arg("-version").output().await {
        Ok(output) if output.status.success() => output,
        _ => {
            return AudioSupport {
                available: false,
                version: None,
                libsoxr: false,
            };
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(2))
        .map(str::to_string);
    let libsoxr = stdout.contains("--enable-libsoxr");
    AudioSupport {
        available: true,
        version,
        libsoxr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maconfig::get_config;
    use serde_yaml::Value;

    fn pcm(rate: u32, depth: u8) -> AudioFormat {
        AudioFormat::new(ContentType::from_bit_depth(depth), rate, depth, 2)
    }

    #[test]
    fn test_flac_output_args() {
        let input = pcm(48000, 24);
        let output = AudioFormat::new(ContentType::Flac, 48000, 24, 2);
        let args = player_ffmpeg_args("args-flac", &input, &output);

        assert_eq!(args[0], "ffmpeg");
        let joined = args.join(" ");
        assert!(joined.contains("-f s24le -ac 2 -channel_layout stereo -ar 48000 -i -"));
        assert!(joined.contains("-f flac -compression_level 0"));
        // lossless output keeps the sample rate argument
        assert!(joined.ends_with("-ac 2 -ar 48000 -"));
    }

    #[test]
    fn test_aac_and_mp3_output_args() {
        let input = pcm(44100, 16);
        let aac = AudioFormat::new(ContentType::Aac, 44100, 16, 2);
        let args = player_ffmpeg_args("args-aac", &input, &aac).join(" ");
        assert!(args.contains("-f adts -c:a aac -b:a 320k"));
        // lossy output must not force the output sample rate
        assert!(args.ends_with("-ac 2 -"));

        let mp3 = AudioFormat::new(ContentType::Mp3, 44100, 16, 2);
        let args = player_ffmpeg_args("args-mp3", &input, &mp3).join(" ");
        assert!(args.contains("-f mp3 -c:a mp3 -b:a 320k"));
    }

    #[test]
    fn test_eq_and_channel_filters() {
        let config = get_config();
        let player_id = "args-eq-left";
        config
            .set_player_value(player_id, "eq_bass", Value::from(4.0))
            .unwrap();
        config
            .set_player_value(player_id, "eq_treble", Value::from(-2.0))
            .unwrap();
        config
            .set_player_value(player_id, "output_channels", Value::from("left"))
            .unwrap();

        let input = pcm(48000, 24);
        let output = AudioFormat::new(ContentType::Flac, 48000, 24, 1);
        let args = player_ffmpeg_args(player_id, &input, &output);

        let af_index = args.iter().position(|a| a == "-af").expect("filter chain");
        let chain = &args[af_index + 1];
        assert!(chain.contains("equalizer=frequency=100:width=200:width_type=h:gain=4"));
        assert!(chain.contains("equalizer=frequency=9000:width=18000:width_type=h:gain=-2"));
        assert!(chain.contains("pan=mono|c0=FL"));
        assert!(!chain.contains("frequency=900:"));
    }

    #[test]
    fn test_no_filters_by_default() {
        let input = pcm(48000, 24);
        let output = AudioFormat::new(ContentType::Flac, 48000, 24, 2);
        let args = player_ffmpeg_args("args-default", &input, &output);
        assert!(!args.iter().any(|a| a == "-af"));
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let err = Transcoder::spawn(&[]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
