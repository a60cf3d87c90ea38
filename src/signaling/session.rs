#![forbid(unsafe_code)]

// WebSocket session handler for playback and publish clients
//
// The command set is dispatched from one loop for the whole session; handlers
// read and update the session's media state rather than registering anything
// per command.

use super::protocol::{ClientCommand, ServerReply};
use crate::engine::{ConsumerInfo, MediaEngine, TransportInfo};
use crate::metrics::ServerMetrics;
use crate::registry::{ProducerOwner, ProducerRegistry};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use mediasoup::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounded channel capacity per client. Replies are small and command-paced;
/// a client that cannot drain 64 of them is not keeping up.
const CHANNEL_CAPACITY: usize = 64;

/// Idle timeout — close connection if no message received within this duration.
/// Prevents Slowloris-style attacks that hold semaphore permits indefinitely.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Media state owned by one session.
///
/// One transport, at most one outbound producer, at most one consumer.
/// Replacing any of them drops the old handle, which closes it in the engine;
/// whatever is left closes when the session ends.
#[derive(Default)]
struct SessionMedia {
    transport: Option<WebRtcTransport>,
    producer: Option<Producer>,
    consumer: Option<Consumer>,
}

/// Serialize a ServerReply and send it through the channel as pre-serialized JSON.
fn send_json(sender: &mpsc::Sender<Arc<String>>, reply: &ServerReply) -> anyhow::Result<()> {
    let json = Arc::new(serde_json::to_string(reply)?);
    sender.try_send(json).map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(())
}

/// Handles a single WebSocket session
pub async fn handle_session(
    socket: WebSocket,
    engine: Arc<MediaEngine>,
    registry: Arc<ProducerRegistry>,
    metrics: ServerMetrics,
    _permit: OwnedSemaphorePermit,
) {
    let session_id = Uuid::new_v4().to_string();
    info!("New WebSocket session: {session_id}");

    metrics.inc_connections_total();
    let _conn_guard = metrics.connection_active_guard();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Bounded channel for sending replies to this client
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(CHANNEL_CAPACITY);

    // Spawn task to send messages to client
    let send_task = tokio::spawn({
        let session_id = session_id.clone();
        let metrics = metrics.clone();
        async move {
            while let Some(json) = rx.recv().await {
                metrics.inc_messages_sent();
                if ws_sender
                    .send(Message::Text((*json).clone().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("Send task finished for session: {session_id}");
        }
    });

    let mut media = SessionMedia::default();

    loop {
        // Idle timeout: close connection if no message within IDLE_TIMEOUT
        let msg = match tokio::time::timeout(IDLE_TIMEOUT, ws_receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(_))) | Ok(None) => break, // Stream error or closed
            Err(_) => {
                warn!("Idle timeout for session {session_id}");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                metrics.inc_messages_received();

                match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => {
                        let start = Instant::now();
                        let result = handle_command(
                            &command,
                            &session_id,
                            &mut media,
                            &engine,
                            &registry,
                            &metrics,
                        )
                        .await;
                        metrics.observe_message_handling(start.elapsed());

                        match result {
                            Ok(reply) => {
                                let _ = send_json(&tx, &reply);
                            }
                            Err(e) => {
                                error!("Error handling command: {e}");
                                metrics.inc_errors();
                                // If channel is closed, send task has exited — break
                                if tx.is_closed() {
                                    break;
                                }
                                let _ = send_json(
                                    &tx,
                                    &ServerReply::Error {
                                        error: e.to_string(),
                                    },
                                );
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Invalid message format: {e}");
                        metrics.inc_errors();
                        let _ = send_json(
                            &tx,
                            &ServerReply::Error {
                                error: format!("Invalid message format: {e}"),
                            },
                        );
                    }
                }
            }
            Message::Close(_) => {
                info!("Client closed session {session_id}");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // WebSocket ping/pong handled automatically
            }
            _ => {
                warn!("Unexpected message type from session {session_id}");
            }
        }
    }

    if let Some(producer) = media.producer.take() {
        registry.remove(&producer.id());
        debug!("Deregistered producer {} on session close", producer.id());
    }
    // Dropping the media state closes the transport and anything still on it
    drop(media);

    // _conn_guard dropped here → dec_connections_active
    // _permit dropped here → release semaphore

    drop(tx);
    let _ = send_task.await;

    info!("Session handler finished: {session_id}");
}

/// Handle a single client command, returning the reply to send
async fn handle_command(
    command: &ClientCommand,
    session_id: &str,
    media: &mut SessionMedia,
    engine: &Arc<MediaEngine>,
    registry: &Arc<ProducerRegistry>,
    metrics: &ServerMetrics,
) -> anyhow::Result<ServerReply> {
    match command {
        ClientCommand::GetRouterRtpCapabilities => Ok(ServerReply::RouterRtpCapabilities {
            rtp_capabilities: engine.rtp_capabilities(),
        }),

        ClientCommand::CreateTransport { transport_type } => {
            let transport = engine.create_transport().await?;
            debug!(
                "Created {:?} transport {} for session {session_id}",
                transport_type,
                transport.id()
            );
            let params = TransportInfo::from(&transport);

            if let Some(old) = media.transport.replace(transport) {
                // The replaced transport closes on drop, taking its producer
                // and consumer with it; clear the stale handles too.
                debug!("Session {session_id} replaced transport {}", old.id());
                if let Some(producer) = media.producer.take() {
                    registry.remove(&producer.id());
                }
                media.consumer = None;
            }

            Ok(ServerReply::TransportCreated { params })
        }

        ClientCommand::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            let transport = session_transport(media, transport_id)?;
            transport
                .connect(WebRtcTransportRemoteParameters {
                    dtls_parameters: dtls_parameters.clone(),
                })
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect transport: {e}"))?;

            debug!("Connected transport {transport_id} for session {session_id}");
            Ok(ServerReply::TransportConnected)
        }

        ClientCommand::Produce {
            transport_id,
            kind,
            rtp_parameters,
        } => {
            let transport = session_transport(media, transport_id)?;
            let producer = transport
                .produce(ProducerOptions::new(*kind, rtp_parameters.clone()))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to produce: {e}"))?;

            registry.insert(
                producer.id(),
                producer.kind(),
                ProducerOwner::Socket {
                    session_id: session_id.to_string(),
                },
            );
            producer
                .on_close({
                    let registry = Arc::clone(registry);
                    let producer_id = producer.id();
                    move || {
                        registry.remove(&producer_id);
                    }
                })
                .detach();
            metrics.inc_producers_created();

            let id = producer.id().to_string();
            info!("Session {session_id} producing {kind:?} as {id}");

            if let Some(old) = media.producer.replace(producer) {
                // Only the latest producer is tracked; drop closes the old one
                registry.remove(&old.id());
                debug!("Session {session_id} replaced producer {}", old.id());
            }

            Ok(ServerReply::Produced { id })
        }

        ClientCommand::GetProducers => Ok(ServerReply::Producers {
            producers: registry.list(),
        }),

        ClientCommand::Consume {
            transport_id,
            producer_id,
            rtp_capabilities,
        } => {
            let Ok(producer_id) = producer_id.parse::<ProducerId>() else {
                anyhow::bail!("Producer not found");
            };
            let record = registry
                .get(&producer_id)
                .ok_or_else(|| anyhow::anyhow!("Producer not found"))?;
            if !engine.can_consume(&producer_id, rtp_capabilities) {
                anyhow::bail!("Cannot consume");
            }

            let transport = session_transport(media, transport_id)?;
            let mut options = ConsumerOptions::new(producer_id, rtp_capabilities.clone());
            // Start paused; the client resumes once its receiver is wired up
            options.paused = true;

            let consumer = transport
                .consume(options)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to consume: {e}"))?;
            metrics.inc_consumers_created();

            let params = ConsumerInfo::from(&consumer);
            info!(
                "Session {session_id} consuming {:?} producer {producer_id} via consumer {}",
                record.kind, params.id
            );
            media.consumer = Some(consumer);

            Ok(ServerReply::Consumed { params })
        }

        ClientCommand::Resume => {
            if let Some(consumer) = media.consumer.as_ref() {
                consumer
                    .resume()
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to resume consumer: {e}"))?;
                debug!("Session {session_id} resumed consumer {}", consumer.id());
            }
            Ok(ServerReply::Resumed)
        }
    }
}

/// The session's transport, if it exists under the id the client named
fn session_transport<'a>(
    media: &'a SessionMedia,
    transport_id: &str,
) -> anyhow::Result<&'a WebRtcTransport> {
    match media.transport.as_ref() {
        Some(transport) if transport.id().to_string() == transport_id => Ok(transport),
        _ => anyhow::bail!("Transport not found"),
    }
}
