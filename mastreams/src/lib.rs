//! Streaming core of the Music Assistant server.
//!
//! This crate hosts the controller that streams audio to players over a
//! basic, unprotected HTTP server on the local network:
//!
//! - the **flow stream generator** stitches the tracks of a queue into one
//!   continuous PCM stream with an equal-power crossfade at boundaries
//!   ([`flow::get_flow_stream`]),
//! - the **multi-client stream job** broadcasts one flow stream to a
//!   synchronized group of players with backpressure and late-join
//!   accounting ([`MultiClientStreamJob`]),
//! - the **HTTP endpoints** (`single`, `flow`, `multi`) glue a PCM source
//!   to a per-request ffmpeg transcoder and relay the encoded bytes to the
//!   player, optionally interleaving ICY metadata.
//!
//! The media catalog, the queue internals and the per-provider stream
//! acquisition live elsewhere; they are consumed through the traits in
//! [`model`].

pub mod controller;
pub mod error;
pub mod flow;
pub mod format;
pub mod icy;
pub mod model;
pub mod multi_client;
pub mod server;
pub mod transcoder;

pub use controller::StreamsController;
pub use error::{ProviderError, QueueEmpty, RequestError};
pub use model::{
    MediaProvider, PcmStream, Player, PlayerQueue, PlayerQueues, PlayerRegistry, PreloadedTrack,
    QueueItem, StreamDetails,
};
pub use multi_client::{MultiClientStreamJob, StreamJobState};
pub use server::StreamServer;

/// Maximum sample rate synthesized for the queue flow stream.
pub const FLOW_MAX_SAMPLE_RATE: u32 = 96000;

/// Maximum bit depth synthesized for the queue flow stream.
pub const FLOW_MAX_BIT_DEPTH: u8 = 24;
