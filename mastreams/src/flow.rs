//! Queue flow stream generator.
//!
//! Stitches an unbounded sequence of queue items into one continuous PCM
//! byte stream, blending track boundaries with an equal-power crossfade
//! when the queue asks for it. The generator is lazy: a track is only
//! resolved once its predecessor's buffer is draining, and the carried
//! fade-out tail is the only state kept across a boundary.

use std::sync::Arc;

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use maaudio::{AudioFormat, crossfade_pcm_parts};
use maconfig::get_config;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::model::{MediaProvider, PcmStream, PlayerQueue, PlayerQueues, QueueItem};

/// Produces the continuous PCM stream for a queue, starting at
/// `start_item`.
///
/// `pcm_format.content_type` must be a PCM variant. The stream ends when
/// the queue reports no next track; a track without resolvable stream
/// details is skipped. Provider I/O errors terminate the stream with a
/// final `Err` item.
///
/// `seek_position` and `fade_in` apply to the first track only.
pub fn get_flow_stream(
    queues: Arc<dyn PlayerQueues>,
    provider: Arc<dyn MediaProvider>,
    queue: PlayerQueue,
    start_item: QueueItem,
    pcm_format: AudioFormat,
    seek_position: u64,
    fade_in: bool,
) -> PcmStream {
    assert!(
        pcm_format.content_type.is_pcm(),
        "flow stream requires a PCM output format"
    );

    Box::pin(stream! {
        let mut started = false;
        let mut use_crossfade = queue.crossfade_enabled;
        let mut seek_position = seek_position;
        let mut fade_in = fade_in;
        let mut last_fadeout_part = Bytes::new();
        let mut total_bytes_written: u64 = 0;
        info!("Start Queue Flow stream for Queue {}", queue.display_name);

        loop {
            // get the (next) queue item to stream
            let queue_track = if !started {
                started = true;
                start_item.clone()
            } else {
                seek_position = 0;
                fade_in = false;
                match queues.preload_next(&queue.queue_id).await {
                    Ok(preloaded) => {
                        use_crossfade = preloaded.use_crossfade;
                        preloaded.item
                    }
                    Err(_) => break,
                }
            };

            let mut streamdetails = match provider.get_stream_details(&queue_track).await {
                Ok(details) => details,
                Err(ProviderError::MediaNotFound(reason)) => {
                    // skip to the next track instead of bailing out
                    warn!(
                        "Skip track {} due to missing streamdetails: {}",
                        queue_track.name, reason
                    );
                    continue;
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            debug!(
                "Start streaming queue track: {} ({}) for queue {} - crossfade: {}",
                streamdetails.uri, queue_track.name, queue.display_name, use_crossfade
            );

            let pcm_sample_size =
                pcm_format.sample_rate as u64 * (pcm_format.bit_depth as u64 / 8) * 2;
            let crossfade_duration = get_config().get_crossfade_duration(&queue.queue_id);
            let crossfade_size = (pcm_sample_size * crossfade_duration) as usize;
            streamdetails.seconds_skipped = seek_position;
            let buffer_size = if use_crossfade {
                crossfade_size
            } else {
                (pcm_sample_size * 2) as usize
            };
            queue_track.set_streamdetails(streamdetails.clone());

            let mut buffer = BytesMut::new();
            let mut bytes_written: u64 = 0;
            // only strip leading silence when this track is crossfaded into
            let strip_silence_begin = !last_fadeout_part.is_empty();
            let mut source = provider.get_media_stream(
                &streamdetails,
                &pcm_format,
                seek_position,
                fade_in,
                strip_silence_begin,
            );

            while let Some(chunk) = source.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                // buffer filled, blend the carried fade-out into this track's head
                if !last_fadeout_part.is_empty() && buffer.len() >= buffer_size {
                    buffer.extend_from_slice(&chunk);
                    let first_part = buffer.split().freeze();
                    let cut = first_part.len().min(crossfade_size);
                    let fadein_part = first_part.slice(..cut);
                    let remaining_bytes = first_part.slice(cut..);
                    let crossfade_part = match crossfade_pcm_parts(
                        &fadein_part,
                        &last_fadeout_part,
                        pcm_format.bit_depth,
                        pcm_format.sample_rate,
                    ) {
                        Ok(part) => part,
                        Err(err) => {
                            yield Err(ProviderError::Io(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                err,
                            )));
                            return;
                        }
                    };
                    bytes_written += crossfade_part.len() as u64;
                    yield Ok(crossfade_part);
                    if !remaining_bytes.is_empty() {
                        bytes_written += remaining_bytes.len() as u64;
                        yield Ok(remaining_bytes);
                    }
                    last_fadeout_part = Bytes::new();
                    continue;
                }

                // enough lookahead buffered, feed the head to the output
                if buffer.len() >= buffer_size * 2 {
                    let out = buffer.split_to(buffer_size).freeze();
                    bytes_written += out.len() as u64;
                    yield Ok(out);
                    buffer.extend_from_slice(&chunk);
                    continue;
                }

                // all other: fill the buffer
                buffer.extend_from_slice(&chunk);
            }

            if bytes_written == 0 {
                // the source never produced enough audio to emit anything
                warn!("Stream error on {}", streamdetails.uri);
                queue_track.update_streamdetails(|details| details.seconds_streamed = 0.0);
                continue;
            }

            if use_crossfade && !buffer.is_empty() {
                // keep the tail as fade-out material for the next track
                let cut = buffer.len().saturating_sub(crossfade_size);
                let remaining_bytes = buffer.split_to(cut).freeze();
                last_fadeout_part = buffer.split().freeze();
                if !remaining_bytes.is_empty() {
                    bytes_written += remaining_bytes.len() as u64;
                    yield Ok(remaining_bytes);
                }
            } else if !buffer.is_empty() {
                let rest = buffer.split().freeze();
                bytes_written += rest.len() as u64;
                yield Ok(rest);
            }

            // end of the track reached, store the accurate duration
            queue_track.update_streamdetails(|details| {
                details.seconds_streamed = bytes_written as f64 / pcm_sample_size as f64;
            });
            total_bytes_written += bytes_written;
            debug!(
                "Finished streaming queue track: {} ({}) on queue {}",
                streamdetails.uri, queue_track.name, queue.display_name
            );
        }

        if !last_fadeout_part.is_empty() {
            // the queue ended while a fade-out was pending; emit the tail
            // unfaded so the last track is not cut short
            total_bytes_written += last_fadeout_part.len() as u64;
            yield Ok(last_fadeout_part);
        }

        info!(
            "Finished Queue Flow stream for Queue {} ({} bytes written)",
            queue.display_name, total_bytes_written
        );
    })
}
