#![forbid(unsafe_code)]

// Engine module - thin adapter over the mediasoup SFU
// One worker process, one router, one shared WebRtcServer per service process

pub mod config;
pub mod types;

pub use config::EngineConfig;
pub use types::{ConsumerInfo, EngineError, EngineResult, TransportInfo};

use mediasoup::prelude::*;
use mediasoup::worker_manager::WorkerManager;
use std::sync::Mutex as StdMutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Process-wide media engine state.
///
/// Created once before any request is served and injected into the WHIP and
/// signaling layers. Transports created here are owned by their resource or
/// session, never by the engine.
pub struct MediaEngine {
    worker: StdMutex<Option<Worker>>,
    webrtc_server: WebRtcServer,
    router: Router,
    dead_rx: watch::Receiver<Option<String>>,
}

impl MediaEngine {
    /// Spawns the worker, binds the shared WebRtcServer, and creates the router.
    ///
    /// # Errors
    /// Returns an error if the worker process cannot be spawned, the RTC port
    /// cannot be bound, or the router rejects the codec set.
    pub async fn new(config: &EngineConfig) -> EngineResult<Self> {
        let worker_manager = WorkerManager::new();
        let worker = worker_manager
            .create_worker(config.worker.to_worker_settings())
            .await
            .map_err(|e| EngineError::WorkerError(format!("Failed to create worker: {e}")))?;
        info!("Created media worker {}", worker.id());

        let (dead_tx, dead_rx) = watch::channel(None);
        worker
            .on_dead(move |reason| {
                error!("Media worker died: {:?}", reason);
                let _ = dead_tx.send(Some(format!("{reason:?}")));
            })
            .detach();

        let rtc_port = config.transport.rtc_port;
        let webrtc_server = worker
            .create_webrtc_server(WebRtcServerOptions::new(WebRtcServerListenInfos::new(
                config.transport.server_listen_info(),
            )))
            .await
            .map_err(|e| {
                EngineError::WorkerError(format!(
                    "Failed to create WebRtcServer on port {rtc_port}: {e}"
                ))
            })?;
        info!("WebRtcServer listening on UDP port {rtc_port}");

        let router = worker
            .create_router(config.router.to_router_options())
            .await
            .map_err(|e| EngineError::RouterError(format!("Failed to create router: {e}")))?;
        info!("Created router {}", router.id());

        router
            .on_worker_close(|| {
                warn!("Router lost its worker");
            })
            .detach();

        Ok(Self {
            worker: StdMutex::new(Some(worker)),
            webrtc_server,
            router,
            dead_rx,
        })
    }

    /// Aggregate RTP capabilities of the routing context
    pub fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        self.router.rtp_capabilities().clone()
    }

    /// Creates a WebRTC transport on the shared server.
    ///
    /// The caller owns the returned handle; dropping it closes the transport
    /// and everything produced or consumed over it.
    pub async fn create_transport(&self) -> EngineResult<WebRtcTransport> {
        let options = WebRtcTransportOptions::new_with_server(self.webrtc_server.clone());
        let transport = self
            .router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| EngineError::TransportError(format!("Failed to create transport: {e}")))?;
        Ok(transport)
    }

    /// Whether the router can route the given producer to a client with the
    /// given capabilities
    pub fn can_consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        self.router.can_consume(producer_id, rtp_capabilities)
    }

    /// Receiver that resolves when the worker process dies.
    ///
    /// Worker death is fatal for the whole service: no routing context
    /// survives it, so the caller is expected to stop serving and exit.
    pub fn death_watch(&self) -> watch::Receiver<Option<String>> {
        self.dead_rx.clone()
    }

    /// Releases the worker, closing the router and every live transport.
    ///
    /// Engine calls made after this return errors; the service is expected to
    /// be on its way down.
    pub fn shutdown(&self) {
        info!("Shutting down media engine");
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        worker.take();
    }
}
