//! Stream server lifecycle: binds the controller's router and keeps it
//! running until ctrl-c.
//!
//! The server is deliberately unprotected (HTTP only, no auth): it exists
//! purely to hand audio bytes to renderers on the local network, on a
//! bind/publish address pair taken from the configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use mautils::find_process_using_port;
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tracing::{error, info, warn};

use crate::controller::StreamsController;
use crate::model::{MediaProvider, PlayerQueues, PlayerRegistry};
use crate::transcoder::check_audio_support;

/// HTTP server streaming audio to players on the local network.
pub struct StreamServer {
    name: String,
    bind_ip: String,
    bind_port: u16,
    controller: Arc<StreamsController>,
    join_handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Creates a server with explicit bind settings around an existing
    /// controller.
    pub fn new(
        name: impl Into<String>,
        bind_ip: impl Into<String>,
        bind_port: u16,
        controller: Arc<StreamsController>,
    ) -> Self {
        Self {
            name: name.into(),
            bind_ip: bind_ip.into(),
            bind_port,
            controller,
            join_handle: None,
        }
    }

    /// Creates a server from the global configuration: bind ip/port and
    /// the published base URL come from [`maconfig`].
    pub fn new_configured(
        queues: Arc<dyn PlayerQueues>,
        players: Arc<dyn PlayerRegistry>,
        provider: Arc<dyn MediaProvider>,
    ) -> Self {
        let config = maconfig::get_config();
        let bind_ip = config.get_bind_ip();
        let bind_port = config.get_bind_port();
        let base_url = config.get_base_url();
        let controller = StreamsController::new(base_url, queues, players, provider);
        Self::new("MA-Streamserver", bind_ip, bind_port, controller)
    }

    pub fn controller(&self) -> Arc<StreamsController> {
        self.controller.clone()
    }

    /// Binds the listener and starts serving in the background; ctrl-c
    /// stops the server.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let support = check_audio_support().await;
        if !support.available {
            error!("FFmpeg binary not found on your system, playback will NOT work!");
        } else {
            if !support.libsoxr {
                warn!(
                    "FFmpeg version found without libsoxr support, \
                     highest quality audio not available"
                );
            }
            info!(
                "Detected ffmpeg version {}{}",
                support.version.as_deref().unwrap_or("unknown"),
                if support.libsoxr { " with libsoxr support" } else { "" }
            );
        }

        let addr: SocketAddr = format!("{}:{}", self.bind_ip, self.bind_port)
            .parse()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                if let Some(info) = find_process_using_port(self.bind_port) {
                    error!(
                        "Port {} is already in use by {} (pid {}, owner {})",
                        self.bind_port, info.process_name, info.pid, info.owner
                    );
                }
                return Err(err);
            }
        };

        info!(
            "Server {} running at {} (bound to {})",
            self.name,
            self.controller.base_url(),
            addr
        );

        let router = self.controller.router();
        let server_task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router.into_make_service()).await {
                error!("Stream server failed: {err}");
            }
        });

        let shutdown_task = tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, shutting down stream server");
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = server_task => {},
                _ = shutdown_task => {},
            }
        }));
        Ok(())
    }

    /// Waits until the server stops.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
