//! Domain model of the streaming core and the contracts of its external
//! collaborators (queue controller, player registry, stream providers).

use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use maaudio::AudioFormat;

use crate::error::{ProviderError, QueueEmpty};

/// A lazy PCM byte stream; `Err` items are terminal.
pub type PcmStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Stream characteristics of one playable item, resolved by the provider
/// layer just before streaming and updated with accurate durations while
/// the audio flows.
#[derive(Debug, Clone)]
pub struct StreamDetails {
    pub uri: String,
    pub audio_format: AudioFormat,
    /// Seconds skipped at the start of the stream (seek).
    pub seconds_skipped: u64,
    /// Accurate streamed duration, recorded once the track finished.
    pub seconds_streamed: f64,
    /// Live title for radio-like sources, used for ICY metadata.
    pub stream_title: Option<String>,
}

impl StreamDetails {
    pub fn new(uri: impl Into<String>, audio_format: AudioFormat) -> Self {
        Self {
            uri: uri.into(),
            audio_format,
            seconds_skipped: 0,
            seconds_streamed: 0.0,
            stream_title: None,
        }
    }
}

/// One playable unit of a queue, referenced by an opaque id.
///
/// The `streamdetails` slot is filled by the flow generator for the track
/// currently being streamed so other parts (ICY metadata, queue reporting)
/// can observe the live details.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub queue_item_id: String,
    pub name: String,
    pub uri: String,
    streamdetails: Arc<RwLock<Option<StreamDetails>>>,
}

impl QueueItem {
    pub fn new(
        queue_item_id: impl Into<String>,
        name: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            queue_item_id: queue_item_id.into(),
            name: name.into(),
            uri: uri.into(),
            streamdetails: Arc::new(RwLock::new(None)),
        }
    }

    /// Snapshot of the current stream details, if resolved.
    pub fn streamdetails(&self) -> Option<StreamDetails> {
        self.streamdetails.read().unwrap().clone()
    }

    pub fn set_streamdetails(&self, details: StreamDetails) {
        *self.streamdetails.write().unwrap() = Some(details);
    }

    /// Mutates the stored details in place; no-op when none are set.
    pub fn update_streamdetails(&self, update: impl FnOnce(&mut StreamDetails)) {
        if let Some(details) = self.streamdetails.write().unwrap().as_mut() {
            update(details);
        }
    }
}

/// The slice of a playback queue the streaming core needs.
#[derive(Debug, Clone)]
pub struct PlayerQueue {
    pub queue_id: String,
    pub display_name: String,
    pub crossfade_enabled: bool,
}

/// A playback device and its format capabilities.
#[derive(Debug, Clone)]
pub struct Player {
    pub player_id: String,
    pub display_name: String,
    pub max_sample_rate: u32,
    pub supports_24bit: bool,
}

/// Result of advancing the queue to the next track.
#[derive(Debug, Clone)]
pub struct PreloadedTrack {
    /// The item that was current before advancing.
    pub previous: Option<QueueItem>,
    /// The next item to stream.
    pub item: QueueItem,
    /// Whether the boundary into this item should be crossfaded.
    pub use_crossfade: bool,
}

/// Queue oracle consumed by the streaming core.
#[async_trait]
pub trait PlayerQueues: Send + Sync {
    /// Returns the queue, if known.
    fn get(&self, queue_id: &str) -> Option<PlayerQueue>;

    /// Looks up one item of a queue.
    fn get_item(&self, queue_id: &str, queue_item_id: &str) -> Option<QueueItem>;

    /// The item currently playing from the queue's buffer, for live
    /// metadata lookups.
    fn current_item(&self, queue_id: &str) -> Option<QueueItem>;

    /// Advances the queue and returns the next track to stream.
    async fn preload_next(&self, queue_id: &str) -> Result<PreloadedTrack, QueueEmpty>;
}

/// Registry of known players.
pub trait PlayerRegistry: Send + Sync {
    fn get(&self, player_id: &str) -> Option<Player>;
}

/// Stream acquisition contract of the provider layer.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Resolves the stream details for a queue item.
    async fn get_stream_details(&self, item: &QueueItem) -> Result<StreamDetails, ProviderError>;

    /// Opens the source as raw PCM in the requested format.
    ///
    /// `strip_silence_begin` is set when the track will be crossfaded into,
    /// so leading silence does not soften the blend.
    fn get_media_stream(
        &self,
        streamdetails: &StreamDetails,
        pcm_format: &AudioFormat,
        seek_position: u64,
        fade_in: bool,
        strip_silence_begin: bool,
    ) -> PcmStream;
}
