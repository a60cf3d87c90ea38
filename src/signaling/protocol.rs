#![forbid(unsafe_code)]

// Signaling protocol - playback command/reply messages, tagged by `action`

use crate::engine::{ConsumerInfo, TransportInfo};
use crate::registry::ProducerEntry;
use mediasoup::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction a client intends for a transport. The engine's transports are
/// bidirectional; the declared type only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Send,
    Recv,
}

/// Client-to-server commands. Every command receives exactly one reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Ask for the router's aggregate RTP capabilities
    GetRouterRtpCapabilities,
    /// Create this session's WebRTC transport
    #[serde(rename_all = "camelCase")]
    CreateTransport {
        #[serde(rename = "type")]
        transport_type: TransportType,
    },
    /// Finish DTLS setup on the session's transport
    #[serde(rename = "connect-transport", rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    /// Send media into the router over the session's transport
    #[serde(rename_all = "camelCase")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    /// List every producer known to the registry, WHIP and socket alike
    GetProducers,
    /// Receive one producer's media over the session's transport
    #[serde(rename_all = "camelCase")]
    Consume {
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    /// Un-pause the session's consumer
    Resume,
}

/// Server-to-client replies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerReply {
    /// Router RTP capabilities
    #[serde(rename_all = "camelCase")]
    RouterRtpCapabilities {
        rtp_capabilities: RtpCapabilitiesFinalized,
    },
    /// Transport created; params carry everything the client side needs
    TransportCreated { params: TransportInfo },
    /// Transport DTLS setup accepted
    TransportConnected,
    /// Producer created
    Produced { id: String },
    /// Producer directory snapshot
    Producers { producers: Vec<ProducerEntry> },
    /// Consumer created, starts paused
    Consumed { params: ConsumerInfo },
    /// Consumer resumed (or there was none to resume)
    Resumed,
    /// Command failed
    Error { error: String },
}
