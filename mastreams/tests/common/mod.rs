//! Shared fakes and helpers for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use maaudio::{AudioFormat, ContentType};
use mastreams::{
    MediaProvider, PcmStream, Player, PlayerQueue, PlayerQueues, PlayerRegistry, PreloadedTrack,
    ProviderError, QueueEmpty, QueueItem, StreamDetails,
};
use tokio::sync::mpsc;

/// One recorded `get_media_stream` invocation.
#[derive(Debug, Clone)]
pub struct MediaStreamCall {
    pub uri: String,
    pub seek_position: u64,
    pub fade_in: bool,
    pub strip_silence_begin: bool,
}

/// Provider serving preset chunk lists per track.
#[derive(Default)]
pub struct FakeProvider {
    details: Mutex<HashMap<String, StreamDetails>>,
    chunks: Mutex<HashMap<String, Vec<Bytes>>>,
    calls: Mutex<Vec<MediaStreamCall>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_track(&self, item: &QueueItem, details: StreamDetails, chunks: Vec<Bytes>) {
        self.chunks
            .lock()
            .unwrap()
            .insert(details.uri.clone(), chunks);
        self.details
            .lock()
            .unwrap()
            .insert(item.queue_item_id.clone(), details);
    }

    pub fn calls(&self) -> Vec<MediaStreamCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProvider for FakeProvider {
    async fn get_stream_details(&self, item: &QueueItem) -> Result<StreamDetails, ProviderError> {
        self.details
            .lock()
            .unwrap()
            .get(&item.queue_item_id)
            .cloned()
            .ok_or_else(|| ProviderError::MediaNotFound(item.queue_item_id.clone()))
    }

    fn get_media_stream(
        &self,
        streamdetails: &StreamDetails,
        _pcm_format: &AudioFormat,
        seek_position: u64,
        fade_in: bool,
        strip_silence_begin: bool,
    ) -> PcmStream {
        self.calls.lock().unwrap().push(MediaStreamCall {
            uri: streamdetails.uri.clone(),
            seek_position,
            fade_in,
            strip_silence_begin,
        });
        let chunks = self
            .chunks
            .lock()
            .unwrap()
            .get(&streamdetails.uri)
            .cloned()
            .unwrap_or_default();
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }
}

/// Provider whose single media stream is fed chunk-by-chunk by the test.
pub struct ManualProvider {
    details: StreamDetails,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl ManualProvider {
    pub fn new(details: StreamDetails) -> (Arc<Self>, mpsc::UnboundedSender<Bytes>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                details,
                receiver: Mutex::new(Some(receiver)),
            }),
            sender,
        )
    }
}

#[async_trait]
impl MediaProvider for ManualProvider {
    async fn get_stream_details(&self, _item: &QueueItem) -> Result<StreamDetails, ProviderError> {
        Ok(self.details.clone())
    }

    fn get_media_stream(
        &self,
        _streamdetails: &StreamDetails,
        _pcm_format: &AudioFormat,
        _seek_position: u64,
        _fade_in: bool,
        _strip_silence_begin: bool,
    ) -> PcmStream {
        let mut receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .expect("manual provider supports a single media stream");
        Box::pin(async_stream::stream! {
            while let Some(chunk) = receiver.recv().await {
                yield Ok(chunk);
            }
        })
    }
}

/// Queue fake: a fixed item catalog plus a scripted sequence of upcoming
/// tracks for `preload_next`.
pub struct FakeQueues {
    queue: PlayerQueue,
    items: Mutex<HashMap<String, QueueItem>>,
    upcoming: Mutex<VecDeque<(QueueItem, bool)>>,
    current: Mutex<Option<QueueItem>>,
}

impl FakeQueues {
    pub fn new(queue_id: &str, crossfade_enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            queue: PlayerQueue {
                queue_id: queue_id.to_string(),
                display_name: format!("Queue {queue_id}"),
                crossfade_enabled,
            },
            items: Mutex::new(HashMap::new()),
            upcoming: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
        })
    }

    pub fn queue(&self) -> PlayerQueue {
        self.queue.clone()
    }

    pub fn add_item(&self, item: QueueItem) {
        self.items
            .lock()
            .unwrap()
            .insert(item.queue_item_id.clone(), item);
    }

    pub fn push_upcoming(&self, item: QueueItem, use_crossfade: bool) {
        self.add_item(item.clone());
        self.upcoming.lock().unwrap().push_back((item, use_crossfade));
    }

    pub fn set_current(&self, item: Option<QueueItem>) {
        *self.current.lock().unwrap() = item;
    }
}

#[async_trait]
impl PlayerQueues for FakeQueues {
    fn get(&self, queue_id: &str) -> Option<PlayerQueue> {
        (queue_id == self.queue.queue_id).then(|| self.queue.clone())
    }

    fn get_item(&self, queue_id: &str, queue_item_id: &str) -> Option<QueueItem> {
        if queue_id != self.queue.queue_id {
            return None;
        }
        self.items.lock().unwrap().get(queue_item_id).cloned()
    }

    fn current_item(&self, queue_id: &str) -> Option<QueueItem> {
        if queue_id != self.queue.queue_id {
            return None;
        }
        self.current.lock().unwrap().clone()
    }

    async fn preload_next(&self, _queue_id: &str) -> Result<PreloadedTrack, QueueEmpty> {
        match self.upcoming.lock().unwrap().pop_front() {
            Some((item, use_crossfade)) => Ok(PreloadedTrack {
                previous: None,
                item,
                use_crossfade,
            }),
            None => Err(QueueEmpty),
        }
    }
}

#[derive(Default)]
pub struct FakePlayers {
    players: Mutex<HashMap<String, Player>>,
}

impl FakePlayers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, player: Player) {
        self.players
            .lock()
            .unwrap()
            .insert(player.player_id.clone(), player);
    }
}

impl PlayerRegistry for FakePlayers {
    fn get(&self, player_id: &str) -> Option<Player> {
        self.players.lock().unwrap().get(player_id).cloned()
    }
}

pub fn player(player_id: &str, max_sample_rate: u32, supports_24bit: bool) -> Player {
    Player {
        player_id: player_id.to_string(),
        display_name: format!("Player {player_id}"),
        max_sample_rate,
        supports_24bit,
    }
}

pub fn pcm_details(uri: &str, sample_rate: u32, bit_depth: u8) -> StreamDetails {
    StreamDetails::new(
        uri,
        AudioFormat::new(
            ContentType::from_bit_depth(bit_depth),
            sample_rate,
            bit_depth,
            2,
        ),
    )
}

/// Splits `total` bytes of constant `fill` into `chunk_size`-sized chunks.
pub fn chunked_bytes(total: usize, chunk_size: usize, fill: u8) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(chunk_size);
        chunks.push(Bytes::from(vec![fill; size]));
        remaining -= size;
    }
    chunks
}

/// Polls `condition` until it holds or ~5 s passed.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
