#![forbid(unsafe_code)]

// WHIP resource lifecycle
//
// A resource is one ingest transport plus the producers created from the
// offer. The map serializes create/delete per resource id: each id owns a
// mutex slot, and the engine work for that id runs under the slot's lock.

use super::WhipError;
use crate::engine::{EngineError, MediaEngine};
use crate::metrics::ServerMetrics;
use crate::registry::{ProducerOwner, ProducerRegistry};
use crate::sdp::{self, AnswerMedia};
use mediasoup::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Live ingest state. Dropping it closes the transport, which closes every
/// producer riding on it.
struct WhipResource {
    transport: WebRtcTransport,
    producers: Vec<Producer>,
}

/// Per-id slot: `None` while a create holds the lock, `Some` once live.
type ResourceSlot = Arc<Mutex<Option<WhipResource>>>;

/// One offered section the translator accepted, ready to produce.
struct TranslatedMedia {
    kind: MediaKind,
    answer: AnswerMedia,
    rtp_parameters: RtpParameters,
}

/// Map of WHIP resources keyed by caller-chosen id.
///
/// The outer lock is only ever held to look up or swap slots, never across an
/// await. Engine calls happen under the per-slot tokio mutex, so operations
/// on different ids run concurrently while same-id operations queue.
pub struct WhipResources {
    engine: Arc<MediaEngine>,
    registry: Arc<ProducerRegistry>,
    metrics: ServerMetrics,
    resources: RwLock<HashMap<String, ResourceSlot>>,
    failed_tx: mpsc::UnboundedSender<(String, TransportId)>,
}

impl WhipResources {
    pub fn new(
        engine: Arc<MediaEngine>,
        registry: Arc<ProducerRegistry>,
        metrics: ServerMetrics,
    ) -> Arc<Self> {
        let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<(String, TransportId)>();
        let resources = Arc::new(Self {
            engine,
            registry,
            metrics,
            resources: RwLock::new(HashMap::new()),
            failed_tx,
        });

        // Transport lifecycle handlers cannot run the async teardown
        // themselves, so they hand the id to this task. Weak keeps the task
        // from pinning the map alive.
        let weak = Arc::downgrade(&resources);
        tokio::spawn(async move {
            while let Some((resource_id, transport_id)) = failed_rx.recv().await {
                let Some(resources) = weak.upgrade() else {
                    break;
                };
                if resources
                    .remove_resource(&resource_id, Some(transport_id))
                    .await
                {
                    info!("Removed WHIP resource '{resource_id}' after transport failure");
                }
            }
        });

        resources
    }

    /// Creates the resource for `resource_id` from an SDP offer and returns
    /// the answer.
    ///
    /// The offer is parsed and translated before the id's slot is touched, so
    /// a malformed body never blocks or claims the id. A live resource under
    /// the same id is an error; the caller deletes first if it wants to
    /// replace.
    pub async fn create(&self, resource_id: &str, offer_sdp: &str) -> Result<String, WhipError> {
        let offer = sdp::parse_offer(offer_sdp)?;
        let remote_dtls = sdp::remote_dtls_parameters(&offer)?;

        let mut translated = Vec::new();
        for section in &offer.media {
            match sdp::build_rtp_parameters(section) {
                Ok(rtp_parameters) => {
                    let Some(codec) = section.codecs.first() else {
                        continue; // translation guarantees a codec
                    };
                    translated.push(TranslatedMedia {
                        kind: section.kind,
                        answer: AnswerMedia::accepted(section, codec),
                        rtp_parameters,
                    });
                }
                Err(e) => {
                    warn!(
                        "Ignoring {:?} section in offer for '{resource_id}': {e}",
                        section.kind
                    );
                }
            }
        }
        if translated.is_empty() {
            return Err(WhipError::NoUsableMedia);
        }

        let (slot, mut guard) = loop {
            let slot = self.slot(resource_id);
            let guard = Arc::clone(&slot).lock_owned().await;
            // A delete may have swapped the slot out while we waited for the
            // lock; a stale slot must not be claimed.
            if self.slot_is_current(resource_id, &slot) {
                break (slot, guard);
            }
        };

        if guard.is_some() {
            return Err(WhipError::ResourceExists(resource_id.to_string()));
        }

        match self.build_resource(resource_id, translated, remote_dtls).await {
            Ok((resource, answer)) => {
                info!(
                    "Created WHIP resource '{}' (transport {}, {} producers)",
                    resource_id,
                    resource.transport.id(),
                    resource.producers.len()
                );
                *guard = Some(resource);
                self.metrics.inc_whip_resources_created();
                Ok(answer)
            }
            Err(e) => {
                // The slot was claimed but never filled; unmap it before
                // releasing the lock so a queued create starts fresh.
                self.unmap_slot(resource_id, &slot);
                Err(e)
            }
        }
    }

    /// Tears down the resource for `resource_id`. Returns false when no live
    /// resource exists under that id.
    pub async fn delete(&self, resource_id: &str) -> bool {
        self.remove_resource(resource_id, None).await
    }

    /// Removes the mapped resource. With `only_transport` set, removal applies
    /// only while that transport is still the live one; lifecycle callbacks
    /// for a transport that was deleted and replaced since are then harmless.
    async fn remove_resource(
        &self,
        resource_id: &str,
        only_transport: Option<TransportId>,
    ) -> bool {
        let slot = {
            let map = self.resources.read().unwrap_or_else(|e| e.into_inner());
            match map.get(resource_id) {
                Some(slot) => Arc::clone(slot),
                None => return false,
            }
        };
        let mut guard = slot.lock().await;
        if let Some(transport_id) = only_transport {
            let is_live = guard
                .as_ref()
                .is_some_and(|resource| resource.transport.id() == transport_id);
            if !is_live {
                return false;
            }
        }
        let Some(resource) = guard.take() else {
            return false;
        };
        // Unmap while still holding the lock so a queued create retries on a
        // fresh slot instead of claiming this one.
        self.unmap_slot(resource_id, &slot);

        for producer in &resource.producers {
            self.registry.remove(&producer.id());
        }
        info!(
            "Deleted WHIP resource '{}' (transport {}, {} producers)",
            resource_id,
            resource.transport.id(),
            resource.producers.len()
        );
        self.metrics.inc_whip_resources_deleted();
        // Dropping the resource closes the transport and its producers
        true
    }

    /// Number of mapped resources, live or mid-create.
    pub fn len(&self) -> usize {
        self.resources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the slot for an id, mapping a fresh one if none exists.
    fn slot(&self, resource_id: &str) -> ResourceSlot {
        let mut map = self.resources.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(resource_id.to_string())
                .or_insert_with(ResourceSlot::default),
        )
    }

    fn slot_is_current(&self, resource_id: &str, slot: &ResourceSlot) -> bool {
        let map = self.resources.read().unwrap_or_else(|e| e.into_inner());
        map.get(resource_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Removes the id's mapping if it still points at `slot`.
    fn unmap_slot(&self, resource_id: &str, slot: &ResourceSlot) {
        let mut map = self.resources.write().unwrap_or_else(|e| e.into_inner());
        if map
            .get(resource_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            map.remove(resource_id);
        }
    }

    async fn build_resource(
        &self,
        resource_id: &str,
        translated: Vec<TranslatedMedia>,
        remote_dtls: DtlsParameters,
    ) -> Result<(WhipResource, String), WhipError> {
        let transport = self.engine.create_transport().await?;
        transport
            .connect(WebRtcTransportRemoteParameters {
                dtls_parameters: remote_dtls,
            })
            .await
            .map_err(|e| {
                EngineError::TransportError(format!("Failed to connect ingest transport: {e}"))
            })?;
        self.watch_transport(resource_id, &transport);

        let mut producers = Vec::new();
        let mut answer_media = Vec::new();
        let mut last_error = None;
        for media in translated {
            let options = ProducerOptions::new(media.kind, media.rtp_parameters);
            match transport.produce(options).await {
                Ok(producer) => {
                    self.registry.insert(
                        producer.id(),
                        producer.kind(),
                        ProducerOwner::Whip {
                            resource_id: resource_id.to_string(),
                        },
                    );
                    producer
                        .on_close({
                            let registry = Arc::clone(&self.registry);
                            let producer_id = producer.id();
                            move || {
                                registry.remove(&producer_id);
                            }
                        })
                        .detach();
                    self.metrics.inc_producers_created();
                    answer_media.push(media.answer);
                    producers.push(producer);
                }
                Err(e) => {
                    warn!(
                        "Producer for {:?} section of '{resource_id}' failed: {e}",
                        media.kind
                    );
                    last_error = Some(EngineError::ProducerError(format!(
                        "Failed to create producer: {e}"
                    )));
                }
            }
        }

        if producers.is_empty() {
            return Err(match last_error {
                Some(e) => WhipError::Engine(e),
                None => WhipError::NoUsableMedia,
            });
        }

        let answer = sdp::build_answer(
            transport.ice_parameters(),
            transport.ice_candidates(),
            &transport.dtls_parameters(),
            &answer_media,
        );
        Ok((WhipResource { transport, producers }, answer))
    }

    /// Hooks the ingest transport so a failed DTLS session or an
    /// engine-initiated close queues the resource for removal.
    fn watch_transport(&self, resource_id: &str, transport: &WebRtcTransport) {
        let transport_id = transport.id();
        transport
            .on_dtls_state_change({
                let failed_tx = self.failed_tx.clone();
                let resource_id = resource_id.to_string();
                move |dtls_state| {
                    if matches!(dtls_state, DtlsState::Failed | DtlsState::Closed) {
                        warn!("DTLS {dtls_state:?} on ingest transport for '{resource_id}'");
                        let _ = failed_tx.send((resource_id.clone(), transport_id));
                    }
                }
            })
            .detach();
        transport
            .on_close({
                let failed_tx = self.failed_tx.clone();
                let resource_id = resource_id.to_string();
                Box::new(move || {
                    let _ = failed_tx.send((resource_id, transport_id));
                })
            })
            .detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::registry::ProducerSource;
    use crate::sdp::SdpError;

    const AV_OFFER: &str = "v=0\r\n\
        o=- 5228595068118338881 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0 1\r\n\
        a=fingerprint:sha-256 7B:8B:F0:65:5F:78:E2:51:3B:AC:6F:F3:3F:46:1B:35:DC:B8:5F:64:1A:24:C2:43:F0:A1:58:D0:A1:2C:19:08\r\n\
        a=setup:actpass\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=ssrc:1001 cname:stream@test\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:1\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=ssrc:1002 cname:stream@test\r\n";

    async fn test_resources(rtc_port: u16) -> (Arc<WhipResources>, Arc<ProducerRegistry>) {
        let mut config = EngineConfig::default();
        config.transport.rtc_port = rtc_port;
        let engine = Arc::new(MediaEngine::new(&config).await.expect("engine should start"));
        let registry = Arc::new(ProducerRegistry::new());
        let resources = WhipResources::new(engine, Arc::clone(&registry), ServerMetrics::new());
        (resources, registry)
    }

    #[tokio::test]
    async fn create_registers_one_producer_per_accepted_section() {
        let (resources, registry) = test_resources(10721).await;

        let answer = resources.create("studio", AV_OFFER).await.expect("create");
        assert_eq!(answer.lines().filter(|l| l.starts_with("m=")).count(), 2);
        assert!(answer.contains("a=ice-lite"));

        let mut entries = registry.list();
        entries.sort_by_key(|e| matches!(e.kind, MediaKind::Video));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, MediaKind::Audio);
        assert_eq!(entries[1].kind, MediaKind::Video);
        for entry in &entries {
            assert_eq!(entry.source, ProducerSource::Whip);
            assert_eq!(entry.resource_id.as_deref(), Some("studio"));
        }
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn second_create_for_a_live_id_is_refused() {
        let (resources, registry) = test_resources(10722).await;

        resources.create("studio", AV_OFFER).await.expect("create");
        let err = resources.create("studio", AV_OFFER).await.unwrap_err();
        assert!(matches!(err, WhipError::ResourceExists(_)));

        // The live resource is untouched by the refused attempt
        assert_eq!(registry.len(), 2);
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn delete_unregisters_and_frees_the_id() {
        let (resources, registry) = test_resources(10723).await;

        resources.create("studio", AV_OFFER).await.expect("create");
        assert!(resources.delete("studio").await);
        assert!(registry.is_empty());
        assert!(resources.is_empty());

        assert!(!resources.delete("studio").await);

        // The id is reusable after deletion
        resources.create("studio", AV_OFFER).await.expect("recreate");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn unsupported_sections_are_skipped_not_fatal() {
        let (resources, registry) = test_resources(10724).await;

        let exotic_video = AV_OFFER.replace("a=rtpmap:96 VP8/90000", "a=rtpmap:96 FLV1/90000");
        let answer = resources.create("studio", &exotic_video).await.expect("create");
        assert_eq!(answer.lines().filter(|l| l.starts_with("m=")).count(), 1);
        assert!(answer.contains("m=audio"));

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn unusable_offers_never_claim_the_id() {
        let (resources, registry) = test_resources(10725).await;

        let all_exotic = AV_OFFER
            .replace("a=rtpmap:111 opus/48000/2", "a=rtpmap:111 G729/8000")
            .replace("a=rtpmap:96 VP8/90000", "a=rtpmap:96 FLV1/90000");
        let err = resources.create("studio", &all_exotic).await.unwrap_err();
        assert!(matches!(err, WhipError::NoUsableMedia));

        let no_fingerprint = AV_OFFER
            .lines()
            .filter(|l| !l.starts_with("a=fingerprint"))
            .collect::<Vec<_>>()
            .join("\r\n");
        let err = resources.create("studio", &no_fingerprint).await.unwrap_err();
        assert!(matches!(
            err,
            WhipError::Offer(SdpError::MissingFingerprint)
        ));

        assert!(resources.is_empty());
        assert!(registry.is_empty());

        // A good offer still goes through afterwards
        resources.create("studio", AV_OFFER).await.expect("create");
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_id_yield_one_resource() {
        let (resources, registry) = test_resources(10726).await;

        let (a, b) = tokio::join!(
            resources.create("studio", AV_OFFER),
            resources.create("studio", AV_OFFER),
        );
        assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
        assert!(matches!(
            a.and(b).unwrap_err(),
            WhipError::ResourceExists(_)
        ));
        assert_eq!(resources.len(), 1);
        assert_eq!(registry.len(), 2);
    }
}
