//! Minimal end-to-end demo: a synthetic sine-wave provider behind the
//! stream server.
//!
//! Run with `cargo run --example serve_sine`, then point a player (or
//! `curl -o out.flac <url>`) at the printed flow URL. Requires ffmpeg in
//! the PATH.

use std::collections::{HashMap, VecDeque};
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use maaudio::{AudioFormat, ContentType};
use mastreams::{
    MediaProvider, PcmStream, Player, PlayerQueue, PlayerQueues, PlayerRegistry, PreloadedTrack,
    ProviderError, QueueEmpty, QueueItem, StreamDetails, StreamServer,
};
use tracing_subscriber::EnvFilter;

const TRACK_SECONDS: u32 = 20;

/// Provider rendering each queue item as a pure tone. The frequency is
/// encoded in the item uri (`sine://440`).
struct SineProvider;

impl SineProvider {
    fn render(frequency: f64, pcm_format: &AudioFormat) -> Vec<Bytes> {
        let bytes_per_sample = (pcm_format.bit_depth / 8) as usize;
        let frames = pcm_format.sample_rate as usize * TRACK_SECONDS as usize;
        let mut pcm = Vec::with_capacity(frames * bytes_per_sample * 2);
        let full_scale = ((1i64 << (pcm_format.bit_depth - 1)) - 1) as f64;

        for n in 0..frames {
            let t = n as f64 / pcm_format.sample_rate as f64;
            let sample = ((TAU * frequency * t).sin() * 0.4 * full_scale).round() as i64;
            for _ in 0..2 {
                pcm.extend_from_slice(&sample.to_le_bytes()[..bytes_per_sample]);
            }
        }

        pcm.chunks(64 * 1024)
            .map(Bytes::copy_from_slice)
            .collect()
    }
}

#[async_trait]
impl MediaProvider for SineProvider {
    async fn get_stream_details(&self, item: &QueueItem) -> Result<StreamDetails, ProviderError> {
        let mut details = StreamDetails::new(
            item.uri.clone(),
            AudioFormat::new(ContentType::PcmS16Le, 44100, 16, 2),
        );
        details.stream_title = Some(item.name.clone());
        Ok(details)
    }

    fn get_media_stream(
        &self,
        streamdetails: &StreamDetails,
        pcm_format: &AudioFormat,
        _seek_position: u64,
        _fade_in: bool,
        _strip_silence_begin: bool,
    ) -> PcmStream {
        let frequency: f64 = streamdetails
            .uri
            .strip_prefix("sine://")
            .and_then(|f| f.parse().ok())
            .unwrap_or(440.0);
        let chunks = Self::render(frequency, pcm_format);
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }
}

/// A single demo queue cycling through a few tones.
struct DemoQueues {
    queue: PlayerQueue,
    items: HashMap<String, QueueItem>,
    upcoming: Mutex<VecDeque<QueueItem>>,
    current: Mutex<Option<QueueItem>>,
}

impl DemoQueues {
    fn new() -> Self {
        let tones = [("a4", "Tone A4", 440), ("c5", "Tone C5", 523), ("e5", "Tone E5", 659)];
        let mut items = HashMap::new();
        let mut upcoming = VecDeque::new();
        for (index, (id, name, freq)) in tones.into_iter().enumerate() {
            let item = QueueItem::new(id, name, format!("sine://{freq}"));
            items.insert(id.to_string(), item.clone());
            if index > 0 {
                // the first tone is the start item, only the rest queue up
                upcoming.push_back(item);
            }
        }
        Self {
            queue: PlayerQueue {
                queue_id: "demo".into(),
                display_name: "Demo Queue".into(),
                crossfade_enabled: true,
            },
            items,
            upcoming: Mutex::new(upcoming),
            current: Mutex::new(None),
        }
    }

    fn first_item(&self) -> QueueItem {
        self.items["a4"].clone()
    }
}

#[async_trait]
impl PlayerQueues for DemoQueues {
    fn get(&self, queue_id: &str) -> Option<PlayerQueue> {
        (queue_id == self.queue.queue_id).then(|| self.queue.clone())
    }

    fn get_item(&self, _queue_id: &str, queue_item_id: &str) -> Option<QueueItem> {
        self.items.get(queue_item_id).cloned()
    }

    fn current_item(&self, _queue_id: &str) -> Option<QueueItem> {
        self.current.lock().unwrap().clone()
    }

    async fn preload_next(&self, _queue_id: &str) -> Result<PreloadedTrack, QueueEmpty> {
        let item = self.upcoming.lock().unwrap().pop_front().ok_or(QueueEmpty)?;
        let previous = self.current.lock().unwrap().replace(item.clone());
        Ok(PreloadedTrack {
            previous,
            item,
            use_crossfade: true,
        })
    }
}

struct DemoPlayers;

impl PlayerRegistry for DemoPlayers {
    fn get(&self, player_id: &str) -> Option<Player> {
        (player_id == "demo").then(|| Player {
            player_id: "demo".into(),
            display_name: "Demo Player".into(),
            max_sample_rate: 48000,
            supports_24bit: true,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let queues = Arc::new(DemoQueues::new());
    let start_item = queues.first_item();
    queues.current.lock().unwrap().replace(start_item.clone());

    let mut server = StreamServer::new_configured(
        queues.clone(),
        Arc::new(DemoPlayers),
        Arc::new(SineProvider),
    );
    let controller = server.controller();

    server.start().await?;
    let url = controller
        .resolve_stream_url("demo", &start_item, 0, false, true)
        .await?;
    println!("Flow stream ready at {url}");
    server.wait().await;
    Ok(())
}
