//! Streams controller: URL resolution, the multi-client job registry and
//! the three HTTP streaming endpoints.
//!
//! Routes:
//! - `/{queue_id}/single/{queue_item_id}.{fmt}` — one queue item
//! - `/{queue_id}/flow/{queue_item_id}.{fmt}` — continuous queue flow
//! - `/{queue_id}/multi/{job_id}/{player_id}/{queue_item_id}.{fmt}` —
//!   subscription of one child player to a shared stream job
//!
//! Every GET owns one transcoder process: a producer task pumps the PCM
//! source into its stdin while the response body relays its stdout. A
//! broken pipe on either side means the client disconnected and tears the
//! request down cleanly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use maaudio::{AudioFormat, ContentType};
use maconfig::get_config;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::flow::get_flow_stream;
use crate::format::{pcm_format_suffix, resolve_output_format};
use crate::icy::{
    DEFAULT_STREAM_TITLE, ICY_METAINT_LOSSLESS, ICY_METAINT_LOSSY, format_icy_metadata,
};
use crate::model::{MediaProvider, PcmStream, PlayerQueues, PlayerRegistry, QueueItem};
use crate::multi_client::MultiClientStreamJob;
use crate::transcoder::{Transcoder, player_ffmpeg_args};
use crate::{FLOW_MAX_BIT_DEPTH, FLOW_MAX_SAMPLE_RATE};

/// Read size for relaying transcoder output to the HTTP response.
const OUTPUT_READ_SIZE: usize = 64 * 1024;

/// Headers sent on every stream response (DLNA compatibility set plus ICY
/// station identification).
const DEFAULT_STREAM_HEADERS: &[(&str, &str)] = &[
    ("transferMode.dlna.org", "Streaming"),
    (
        "contentFeatures.dlna.org",
        "DLNA.ORG_OP=00;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=0d500000000000000000000000000000",
    ),
    ("Cache-Control", "no-cache"),
    ("Connection", "close"),
    ("icy-name", "Music Assistant"),
    ("icy-pub", "0"),
];

/// Controller streaming audio to players.
///
/// Holds the registry of multi-client jobs (at most one per queue) and is
/// threaded explicitly through the request handlers as axum state.
pub struct StreamsController {
    base_url: String,
    queues: Arc<dyn PlayerQueues>,
    players: Arc<dyn PlayerRegistry>,
    provider: Arc<dyn MediaProvider>,
    multi_client_jobs: Mutex<HashMap<String, Arc<MultiClientStreamJob>>>,
}

impl StreamsController {
    pub fn new(
        base_url: impl Into<String>,
        queues: Arc<dyn PlayerQueues>,
        players: Arc<dyn PlayerRegistry>,
        provider: Arc<dyn MediaProvider>,
    ) -> Arc<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Arc::new(Self {
            base_url,
            queues,
            players,
            provider,
            multi_client_jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Base URL under which the stream URLs are published.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolves the (regular, single player) stream URL for a queue item.
    ///
    /// Called just in time by the queue controller when a player asks
    /// where to find its audio.
    pub async fn resolve_stream_url(
        &self,
        queue_id: &str,
        queue_item: &QueueItem,
        seek_position: u64,
        fade_in: bool,
        flow_mode: bool,
    ) -> Result<String, RequestError> {
        let config = get_config();
        let output_codec = config.get_output_codec(queue_id);
        let content_type = ContentType::try_parse(&output_codec).unwrap_or_else(|| {
            warn!(
                "Player {} has unknown output codec {}, falling back to flac",
                queue_id, output_codec
            );
            ContentType::Flac
        });
        let mut fmt = content_type.as_str().to_string();
        if content_type.is_pcm() {
            let player = self
                .players
                .get(queue_id)
                .ok_or_else(|| RequestError::UnknownPlayer(queue_id.to_string()))?;
            let player_max_bit_depth = if player.supports_24bit { 32 } else { 16 };
            let (output_sample_rate, output_bit_depth) = if flow_mode {
                (
                    FLOW_MAX_SAMPLE_RATE.min(player.max_sample_rate),
                    FLOW_MAX_BIT_DEPTH.min(player_max_bit_depth),
                )
            } else {
                let streamdetails = self
                    .provider
                    .get_stream_details(queue_item)
                    .await
                    .map_err(|_| RequestError::StreamDetails(queue_item.name.clone()))?;
                (
                    streamdetails.audio_format.sample_rate.min(player.max_sample_rate),
                    streamdetails.audio_format.bit_depth.min(player_max_bit_depth),
                )
            };
            let channel_mode = config.get_output_channels(queue_id);
            let channels = if channel_mode != "stereo" { 1 } else { 2 };
            fmt.push_str(&pcm_format_suffix(
                output_sample_rate,
                output_bit_depth,
                channels,
            ));
        }

        let base_path = if flow_mode { "flow" } else { "single" };
        let mut url = format!(
            "{}/{}/{}/{}.{}",
            self.base_url, queue_id, base_path, queue_item.queue_item_id, fmt
        );
        let mut query_params = Vec::new();
        if seek_position > 0 {
            query_params.push(format!("seek_position={seek_position}"));
        }
        if fade_in {
            query_params.push("fade_in=1".to_string());
        }
        if !query_params.is_empty() {
            url.push('?');
            url.push_str(&query_params.join("&"));
        }
        Ok(url)
    }

    /// Creates a multi-client stream job for the queue.
    ///
    /// Called by sync-group implementations to start streaming the queue
    /// audio to multiple players at once. At most one job exists per
    /// queue; any previous job is stopped first.
    pub fn create_multi_client_stream_job(
        &self,
        queue_id: &str,
        start_item: QueueItem,
        seek_position: u64,
        fade_in: bool,
    ) -> Result<Arc<MultiClientStreamJob>, RequestError> {
        let queue = self
            .queues
            .get(queue_id)
            .ok_or_else(|| RequestError::UnknownQueue(queue_id.to_string()))?;

        let mut jobs = self.multi_client_jobs.lock().unwrap();
        if let Some(existing) = jobs.remove(queue_id) {
            if !existing.is_finished() {
                existing.stop();
            }
        }

        let job = MultiClientStreamJob::start(
            self.base_url.clone(),
            self.queues.clone(),
            self.players.clone(),
            self.provider.clone(),
            queue,
            start_item,
            seek_position,
            fade_in,
        );
        jobs.insert(queue_id.to_string(), job.clone());
        Ok(job)
    }

    /// The active multi-client job of a queue, if any.
    pub fn get_multi_client_job(&self, queue_id: &str) -> Option<Arc<MultiClientStreamJob>> {
        self.multi_client_jobs.lock().unwrap().get(queue_id).cloned()
    }

    /// Continuous PCM stream of a whole queue (see [`crate::flow`]).
    pub fn get_flow_stream(
        &self,
        queue: crate::model::PlayerQueue,
        start_item: QueueItem,
        pcm_format: AudioFormat,
        seek_position: u64,
        fade_in: bool,
    ) -> PcmStream {
        get_flow_stream(
            self.queues.clone(),
            self.provider.clone(),
            queue,
            start_item,
            pcm_format,
            seek_position,
            fade_in,
        )
    }

    /// Router serving the three streaming endpoints (GET and HEAD).
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/{queue_id}/single/{item_and_format}", get(serve_queue_item_stream))
            .route("/{queue_id}/flow/{item_and_format}", get(serve_queue_flow_stream))
            .route(
                "/{queue_id}/multi/{job_id}/{player_id}/{item_and_format}",
                get(serve_multi_subscriber_stream),
            )
            .with_state(self.clone())
    }
}

/// Query parameters shared by the single and flow endpoints.
#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    seek_position: Option<u64>,
    fade_in: Option<String>,
}

impl StreamQuery {
    fn seek_position(&self) -> u64 {
        self.seek_position.unwrap_or(0)
    }

    fn fade_in(&self) -> bool {
        self.fade_in.as_deref() == Some("1")
    }
}

/// Splits the `{queue_item_id}.{fmt}` path segment at the last dot.
fn split_item_and_format(segment: &str) -> Result<(&str, &str), RequestError> {
    segment
        .rsplit_once('.')
        .filter(|(item, fmt)| !item.is_empty() && !fmt.is_empty())
        .ok_or_else(|| RequestError::UnsupportedFormat(segment.to_string()))
}

fn stream_response_builder(output_format_str: &str) -> axum::http::response::Builder {
    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in DEFAULT_STREAM_HEADERS {
        builder = builder.header(*name, *value);
    }
    builder.header(header::CONTENT_TYPE, format!("audio/{output_format_str}"))
}

fn build_response(
    builder: axum::http::response::Builder,
    body: Body,
    output_format_str: &str,
) -> Result<Response, RequestError> {
    builder
        .body(body)
        .map_err(|_| RequestError::UnsupportedFormat(output_format_str.to_string()))
}

/// Spawns the producer pumping PCM chunks into the transcoder stdin.
///
/// A failed write means the transcoder went away (client disconnect path)
/// and ends the pump; dropping stdin signals EOF to the encoder.
fn spawn_pcm_pump(mut source: PcmStream, stdin: Option<ChildStdin>) {
    let Some(mut stdin) = stdin else {
        return;
    };
    tokio::spawn(async move {
        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(chunk) => {
                    if stdin.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("Source stream error: {}", err);
                    break;
                }
            }
        }
        let _ = stdin.shutdown().await;
    });
}

/// Response body relaying the transcoder output; dropping the body kills
/// the child process.
fn transcoder_body(mut transcoder: Transcoder) -> Body {
    let Some(mut stdout) = transcoder.take_stdout() else {
        return Body::empty();
    };
    Body::from_stream(stream! {
        let mut buffer = vec![0u8; OUTPUT_READ_SIZE];
        loop {
            match stdout.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buffer[..n])),
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
        let _ = transcoder.wait().await;
    })
}

/// Like [`transcoder_body`] but chunked at exactly `metaint` audio bytes
/// with an ICY metadata block after each chunk.
fn icy_transcoder_body(
    mut transcoder: Transcoder,
    metaint: usize,
    queues: Arc<dyn PlayerQueues>,
    queue_id: String,
) -> Body {
    let Some(mut stdout) = transcoder.take_stdout() else {
        return Body::empty();
    };
    Body::from_stream(stream! {
        let mut buffer = vec![0u8; metaint];
        loop {
            // read exactly `metaint` bytes; short only at EOF
            let mut filled = 0usize;
            while filled < metaint {
                match stdout.read(&mut buffer[filled..]).await {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) => {
                        yield Err(err);
                        let _ = transcoder.wait().await;
                        return;
                    }
                }
            }
            if filled == 0 {
                break;
            }
            yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buffer[..filled]));
            let title = current_stream_title(queues.as_ref(), &queue_id);
            yield Ok(format_icy_metadata(&title));
            if filled < metaint {
                break;
            }
        }
        let _ = transcoder.wait().await;
    })
}

/// Title announced over ICY: the live stream title if the source has one,
/// else the current item's name, else the station name.
fn current_stream_title(queues: &dyn PlayerQueues, queue_id: &str) -> String {
    let Some(current_item) = queues.current_item(queue_id) else {
        return DEFAULT_STREAM_TITLE.to_string();
    };
    if let Some(details) = current_item.streamdetails() {
        if let Some(title) = details.stream_title {
            if !title.is_empty() {
                return title;
            }
        }
    }
    if !current_item.name.is_empty() {
        return current_item.name;
    }
    DEFAULT_STREAM_TITLE.to_string()
}

fn log_request(method: &Method, path: &str, headers: &HeaderMap) {
    debug!("Got {} request to {}\nheaders: {:?}", method, path, headers);
}

/// Streams a single queue item's audio to a player.
async fn serve_queue_item_stream(
    State(controller): State<Arc<StreamsController>>,
    Path((queue_id, item_and_format)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    method: Method,
    request_headers: HeaderMap,
) -> Result<Response, RequestError> {
    log_request(
        &method,
        &format!("/{queue_id}/single/{item_and_format}"),
        &request_headers,
    );
    let (queue_item_id, format_str) = split_item_and_format(&item_and_format)?;
    let queue = controller
        .queues
        .get(&queue_id)
        .ok_or_else(|| RequestError::UnknownQueue(queue_id.clone()))?;
    let queue_player = controller
        .players
        .get(&queue_id)
        .ok_or_else(|| RequestError::UnknownPlayer(queue_id.clone()))?;
    let queue_item = controller
        .queues
        .get_item(&queue_id, queue_item_id)
        .ok_or_else(|| RequestError::UnknownQueueItem(queue_item_id.to_string()))?;
    let streamdetails = controller
        .provider
        .get_stream_details(&queue_item)
        .await
        .map_err(|_| RequestError::StreamDetails(queue_item.name.clone()))?;
    queue_item.set_streamdetails(streamdetails.clone());

    let output_format = resolve_output_format(
        format_str,
        &queue_player,
        streamdetails.audio_format.sample_rate,
        streamdetails.audio_format.bit_depth,
    )?;

    let builder = stream_response_builder(&output_format.output_format_str);
    if method == Method::HEAD {
        return build_response(builder, Body::empty(), &output_format.output_format_str);
    }

    debug!(
        "Start serving audio stream for QueueItem {} to {}",
        queue_item.uri, queue.display_name
    );

    let pcm_format = AudioFormat::new(
        ContentType::from_bit_depth(streamdetails.audio_format.bit_depth),
        streamdetails.audio_format.sample_rate,
        streamdetails.audio_format.bit_depth,
        2,
    );
    let args = player_ffmpeg_args(&queue_player.player_id, &pcm_format, &output_format);
    let mut transcoder = Transcoder::spawn(&args)?;

    let source = controller.provider.get_media_stream(
        &streamdetails,
        &pcm_format,
        query.seek_position(),
        query.fade_in(),
        false,
    );
    spawn_pcm_pump(source, transcoder.take_stdin());

    build_response(
        builder,
        transcoder_body(transcoder),
        &output_format.output_format_str,
    )
}

/// Streams the continuous queue flow audio to a player, optionally with
/// interleaved ICY metadata.
async fn serve_queue_flow_stream(
    State(controller): State<Arc<StreamsController>>,
    Path((queue_id, item_and_format)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    method: Method,
    request_headers: HeaderMap,
) -> Result<Response, RequestError> {
    log_request(
        &method,
        &format!("/{queue_id}/flow/{item_and_format}"),
        &request_headers,
    );
    let (queue_item_id, format_str) = split_item_and_format(&item_and_format)?;
    let queue = controller
        .queues
        .get(&queue_id)
        .ok_or_else(|| RequestError::UnknownQueue(queue_id.clone()))?;
    let start_queue_item = controller
        .queues
        .get_item(&queue_id, queue_item_id)
        .ok_or_else(|| RequestError::UnknownQueueItem(queue_item_id.to_string()))?;
    let queue_player = controller
        .players
        .get(&queue_id)
        .ok_or_else(|| RequestError::UnknownPlayer(queue_id.clone()))?;

    let output_format = resolve_output_format(
        format_str,
        &queue_player,
        FLOW_MAX_SAMPLE_RATE,
        FLOW_MAX_BIT_DEPTH,
    )?;

    let enable_icy = request_headers
        .get("Icy-MetaData")
        .is_some_and(|value| value.as_bytes() == b"1");
    let icy_meta_interval = if output_format.content_type.is_lossless() {
        ICY_METAINT_LOSSLESS
    } else {
        ICY_METAINT_LOSSY
    };

    let mut builder = stream_response_builder(&output_format.output_format_str);
    if enable_icy {
        builder = builder.header("icy-metaint", icy_meta_interval.to_string());
    }
    if method == Method::HEAD {
        return build_response(builder, Body::empty(), &output_format.output_format_str);
    }

    debug!(
        "Start serving Queue flow audio stream for {}",
        queue_player.display_name
    );

    let pcm_format = AudioFormat::new(
        ContentType::from_bit_depth(output_format.bit_depth),
        output_format.sample_rate,
        output_format.bit_depth,
        2,
    );
    let args = player_ffmpeg_args(&queue_player.player_id, &pcm_format, &output_format);
    let mut transcoder = Transcoder::spawn(&args)?;

    let source = controller.get_flow_stream(
        queue,
        start_queue_item,
        pcm_format,
        query.seek_position(),
        query.fade_in(),
    );
    spawn_pcm_pump(source, transcoder.take_stdin());

    let body = if enable_icy {
        icy_transcoder_body(
            transcoder,
            icy_meta_interval,
            controller.queues.clone(),
            queue_id.clone(),
        )
    } else {
        transcoder_body(transcoder)
    };
    build_response(builder, body, &output_format.output_format_str)
}

/// Streams the shared queue flow to one child player of a multi-client
/// stream job.
async fn serve_multi_subscriber_stream(
    State(controller): State<Arc<StreamsController>>,
    Path((queue_id, job_id, player_id, item_and_format)): Path<(String, String, String, String)>,
    method: Method,
    request_headers: HeaderMap,
) -> Result<Response, RequestError> {
    log_request(
        &method,
        &format!("/{queue_id}/multi/{job_id}/{player_id}/{item_and_format}"),
        &request_headers,
    );
    let (_queue_item_id, format_str) = split_item_and_format(&item_and_format)?;
    let streamjob = controller
        .get_multi_client_job(&queue_id)
        .ok_or_else(|| RequestError::UnknownStreamJob(queue_id.clone()))?;
    if job_id != streamjob.job_id {
        return Err(RequestError::StreamJobMismatch { job_id, queue_id });
    }
    let child_player = controller
        .players
        .get(&player_id)
        .ok_or_else(|| RequestError::UnknownPlayer(player_id.clone()))?;

    // work out the (child player specific!) output format
    let output_format = resolve_output_format(
        format_str,
        &child_player,
        streamjob.pcm_format.sample_rate,
        streamjob.pcm_format.bit_depth,
    )?;

    let builder = stream_response_builder(&output_format.output_format_str);
    if method == Method::HEAD {
        return build_response(builder, Body::empty(), &output_format.output_format_str);
    }

    // some players (e.g. dlna, sonos) issue multiple GETs to probe the
    // stream, which disturbs the subscription accounting
    if streamjob.is_subscribed(&player_id) {
        warn!(
            "Player {} is making multiple requests to the same stream, playback may be disturbed!",
            player_id
        );
    }

    debug!(
        "Start serving multi-subscriber Queue flow audio stream for queue {} to player {}",
        streamjob.queue_id, child_player.display_name
    );

    let args = player_ffmpeg_args(&child_player.player_id, &streamjob.pcm_format, &output_format);
    let mut transcoder = Transcoder::spawn(&args)?;

    let subscription = streamjob.subscribe(&player_id);
    spawn_pcm_pump(
        Box::pin(subscription.map(Ok)),
        transcoder.take_stdin(),
    );

    build_response(
        builder,
        transcoder_body(transcoder),
        &output_format.output_format_str,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_item_and_format() {
        assert_eq!(split_item_and_format("item1.flac").unwrap(), ("item1", "flac"));
        assert_eq!(
            split_item_and_format("item.with.dots.mp3").unwrap(),
            ("item.with.dots", "mp3")
        );
        assert_eq!(
            split_item_and_format("item1.pcm;rate=48000;bitrate=24;channels=2").unwrap(),
            ("item1", "pcm;rate=48000;bitrate=24;channels=2")
        );
        assert!(split_item_and_format("no-format").is_err());
        assert!(split_item_and_format(".flac").is_err());
        assert!(split_item_and_format("item1.").is_err());
    }

    #[test]
    fn test_stream_query_fade_in_requires_one() {
        let query = StreamQuery {
            seek_position: None,
            fade_in: Some("1".into()),
        };
        assert!(query.fade_in());
        let query = StreamQuery {
            seek_position: Some(30),
            fade_in: Some("true".into()),
        };
        assert!(!query.fade_in());
        assert_eq!(query.seek_position(), 30);
    }
}
