//! Multi-client stream job: one producer, N synchronized subscribers.
//!
//! For a player sync group all child players must receive the exact same
//! PCM chunks from the source audio. A job is tied to a queue and streams
//! the queue's flow stream; restarting playback (e.g. when seeking)
//! creates a new job.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, future};
use maaudio::{AudioFormat, ContentType};
use maconfig::get_config;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::RequestError;
use crate::flow::get_flow_stream;
use crate::format::pcm_format_suffix;
use crate::model::{MediaProvider, PlayerQueue, PlayerQueues, PlayerRegistry, QueueItem};

/// Per-subscriber channel depth. Two chunks absorb normal jitter while the
/// slowest client still dictates the production pace; dropping a chunk
/// would be an audible glitch, so the producer blocks instead.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 2;

/// How long the producer waits for all expected players before the first
/// chunk is broadcast.
const ALL_CLIENTS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace window after the last subscriber disappears before the producer
/// is cancelled.
const LAST_SUBSCRIBER_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a [`MultiClientStreamJob`]; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamJobState {
    /// Waiting for the expected players to connect.
    Pending,
    /// Broadcasting chunks.
    Running,
    /// Source exhausted, stopped or cancelled.
    Finished,
}

/// A multi-client audio queue stream job.
pub struct MultiClientStreamJob {
    pub job_id: String,
    pub queue_id: String,
    /// Fixed fan-out bus quality; every subscriber transcodes from this.
    pub pcm_format: AudioFormat,
    pub start_item: QueueItem,
    pub seek_position: u64,
    pub fade_in: bool,
    base_url: String,
    players: Arc<dyn PlayerRegistry>,
    expected_players: Mutex<HashSet<String>>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
    all_connected: watch::Sender<bool>,
    bytes_streamed: AtomicU64,
    client_seconds_skipped: Mutex<HashMap<String, f64>>,
    finished: AtomicBool,
    cancel: CancellationToken,
}

impl MultiClientStreamJob {
    /// Creates the job and immediately starts producing in the background.
    pub(crate) fn start(
        base_url: String,
        queues: Arc<dyn PlayerQueues>,
        players: Arc<dyn PlayerRegistry>,
        provider: Arc<dyn MediaProvider>,
        queue: PlayerQueue,
        start_item: QueueItem,
        seek_position: u64,
        fade_in: bool,
    ) -> Arc<Self> {
        let pcm_format = AudioFormat::new(ContentType::from_bit_depth(24), 48000, 24, 2);
        let job = Arc::new(Self {
            job_id: Uuid::new_v4().simple().to_string(),
            queue_id: queue.queue_id.clone(),
            pcm_format,
            start_item,
            seek_position,
            fade_in,
            base_url,
            players,
            expected_players: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashMap::new()),
            all_connected: watch::channel(false).0,
            bytes_streamed: AtomicU64::new(0),
            client_seconds_skipped: Mutex::new(HashMap::new()),
            finished: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let runner = job.clone();
        tokio::spawn(async move {
            let cancel = runner.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Stream job {} cancelled", runner.job_id);
                }
                _ = runner.run(queues, provider, queue) => {}
            }
            runner.finished.store(true, Ordering::SeqCst);
        });

        job
    }

    /// Feeds the flow stream's chunks to all subscribers.
    async fn run(
        &self,
        queues: Arc<dyn PlayerQueues>,
        provider: Arc<dyn MediaProvider>,
        queue: PlayerQueue,
    ) {
        let mut chunk_num: u64 = 0;
        let mut flow = get_flow_stream(
            queues,
            provider,
            queue.clone(),
            self.start_item.clone(),
            self.pcm_format.clone(),
            self.seek_position,
            self.fade_in,
        );

        while let Some(chunk) = flow.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    error!("Flow stream failed for queue {}: {}", queue.display_name, err);
                    break;
                }
            };

            if chunk_num == 0 {
                // wait until all expected clients are connected
                let mut connected = self.all_connected.subscribe();
                match timeout(ALL_CLIENTS_CONNECT_TIMEOUT, connected.wait_for(|ready| *ready))
                    .await
                {
                    Ok(_) => {
                        debug!(
                            "Starting multi client stream job for queue {} with {} out of {} connected clients",
                            queue.display_name,
                            self.subscriber_count(),
                            self.expected_players.lock().unwrap().len()
                        );
                    }
                    Err(_) => {
                        if self.subscriber_count() == 0 {
                            error!(
                                "Abort multi client stream job for queue {}: clients did not connect within timeout",
                                queue.display_name
                            );
                            break;
                        }
                        // timeout expired, move on with the clients that did connect
                        self.all_connected.send_replace(true);
                    }
                }
            }

            self.put_chunk(chunk).await;
            chunk_num += 1;
        }

        // mark EOF with an empty chunk
        self.put_chunk(Bytes::new()).await;
    }

    /// Puts a chunk of data to all subscribers, blocking on full channels
    /// so the slowest client dictates the pace.
    async fn put_chunk(&self, chunk: Bytes) {
        let senders: Vec<mpsc::Sender<Bytes>> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        let len = chunk.len() as u64;
        future::join_all(senders.iter().map(|sender| sender.send(chunk.clone()))).await;
        self.bytes_streamed.fetch_add(len, Ordering::SeqCst);
    }

    /// Resolves the child-player specific stream URL for this job and
    /// registers the player as expected.
    pub fn resolve_stream_url(&self, child_player_id: &str) -> Result<String, RequestError> {
        let config = get_config();
        let output_codec = config.get_output_codec(child_player_id);
        let content_type = ContentType::try_parse(&output_codec).unwrap_or_else(|| {
            warn!(
                "Player {} has unknown output codec {}, falling back to flac",
                child_player_id, output_codec
            );
            ContentType::Flac
        });
        let mut fmt = content_type.as_str().to_string();
        if content_type.is_pcm() {
            let player = self
                .players
                .get(child_player_id)
                .ok_or_else(|| RequestError::UnknownPlayer(child_player_id.to_string()))?;
            let player_max_bit_depth = if player.supports_24bit { 32 } else { 16 };
            let output_sample_rate = self.pcm_format.sample_rate.min(player.max_sample_rate);
            let output_bit_depth = self.pcm_format.bit_depth.min(player_max_bit_depth);
            let channel_mode = config.get_output_channels(child_player_id);
            let channels = if channel_mode != "stereo" { 1 } else { 2 };
            fmt.push_str(&pcm_format_suffix(
                output_sample_rate,
                output_bit_depth,
                channels,
            ));
        }
        let url = format!(
            "{}/{}/multi/{}/{}/{}.{}",
            self.base_url,
            self.queue_id,
            self.job_id,
            child_player_id,
            self.start_item.queue_item_id,
            fmt
        );
        self.expected_players.lock().unwrap().insert(child_player_id.to_string());
        Ok(url)
    }

    /// Registers a subscriber and yields its chunks until EOF.
    ///
    /// Misbehaving players issue multiple GETs to the same stream; a
    /// duplicate subscription replaces the previous channel and the
    /// replaced stream terminates.
    pub fn subscribe(self: Arc<Self>, player_id: &str) -> Pin<Box<dyn Stream<Item = Bytes> + Send>> {
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let guard = SubscriberGuard {
            job: self.clone(),
            player_id: player_id.to_string(),
            tx: tx.clone(),
        };
        let replaced = self
            .subscribers
            .lock()
            .unwrap()
            .insert(player_id.to_string(), tx)
            .is_some();
        if replaced {
            debug!("Replacing existing subscription of client {}", player_id);
        }

        if *self.all_connected.borrow() {
            // client subscribes while the stream already started
            debug!(
                "Client {} is joining while the stream is already started",
                player_id
            );
            let skipped = self.bytes_streamed.load(Ordering::SeqCst) as f64
                / self.pcm_format.pcm_sample_size() as f64;
            self.client_seconds_skipped
                .lock()
                .unwrap()
                .insert(player_id.to_string(), skipped);
        } else {
            debug!("Subscribed client {}", player_id);
        }

        if self.subscriber_count() == self.expected_players.lock().unwrap().len() {
            // all expected subscribers arrived, chunks can be pushed
            self.all_connected.send_replace(true);
        }

        Box::pin(stream! {
            let _guard = guard;
            while let Some(chunk) = rx.recv().await {
                if chunk.is_empty() {
                    // EOF chunk received
                    break;
                }
                yield chunk;
            }
        })
    }

    /// Stops the job: cancels the producer and unblocks every subscriber
    /// with a (non-blocking) EOF sentinel.
    pub fn stop(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        for sender in self.subscribers.lock().unwrap().values() {
            let _ = sender.try_send(Bytes::new());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> StreamJobState {
        if self.is_finished() {
            StreamJobState::Finished
        } else if !*self.all_connected.borrow() {
            StreamJobState::Pending
        } else {
            StreamJobState::Running
        }
    }

    /// Total bytes broadcast so far.
    pub fn bytes_streamed(&self) -> u64 {
        self.bytes_streamed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn is_subscribed(&self, player_id: &str) -> bool {
        self.subscribers.lock().unwrap().contains_key(player_id)
    }

    /// Seconds of audio a late joiner missed, if it joined late.
    pub fn client_seconds_skipped(&self, player_id: &str) -> Option<f64> {
        self.client_seconds_skipped
            .lock()
            .unwrap()
            .get(player_id)
            .copied()
    }
}

/// Deregisters a subscriber when its stream is dropped and cancels the job
/// once nobody is left after the grace window.
struct SubscriberGuard {
    job: Arc<MultiClientStreamJob>,
    player_id: String,
    tx: mpsc::Sender<Bytes>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        {
            let mut subscribers = self.job.subscribers.lock().unwrap();
            // only remove our own channel: a duplicate GET may have
            // replaced it already
            if subscribers
                .get(&self.player_id)
                .is_some_and(|current| current.same_channel(&self.tx))
            {
                subscribers.remove(&self.player_id);
            }
        }
        debug!("Unsubscribed client {}", self.player_id);

        let job = self.job.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(LAST_SUBSCRIBER_GRACE).await;
                if job.subscriber_count() == 0 && !job.is_finished() {
                    debug!("Cleaning up stream job {}, all clients disappeared", job.job_id);
                    job.cancel.cancel();
                }
            });
        }
    }
}
