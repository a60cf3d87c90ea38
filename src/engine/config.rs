#![forbid(unsafe_code)]

// Configuration for the mediasoup worker, router, and WebRTC transports

use mediasoup::prelude::*;
use mediasoup::worker::{WorkerLogLevel, WorkerLogTag};
use std::net::{IpAddr, Ipv4Addr};
use std::num::{NonZeroU32, NonZeroU8};

/// Default UDP port for the shared WebRTC server.
pub const DEFAULT_RTC_PORT: u16 = 10000;

/// Engine configuration: one worker, one router, one shared WebRTC server.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub worker: WorkerConfig,
    pub router: RouterConfig,
    pub transport: TransportConfig,
}

impl EngineConfig {
    /// Builds a configuration from environment variables.
    ///
    /// `ANNOUNCE_IP` sets the address advertised in ICE candidates (falls back
    /// to 127.0.0.1 for localhost testing), `RTC_PORT` the WebRTC server port.
    ///
    /// # Errors
    /// Returns an error if `ANNOUNCE_IP` or `RTC_PORT` is set but unparseable.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        match std::env::var("ANNOUNCE_IP") {
            Ok(ip) => {
                let addr: IpAddr = ip
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid ANNOUNCE_IP: {ip}"))?;
                config.transport = config.transport.with_announced_ip(addr);
            }
            Err(_) => {
                let default_ip: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
                config.transport = config.transport.with_announced_ip(default_ip);
            }
        }

        if let Ok(port) = std::env::var("RTC_PORT") {
            config.transport.rtc_port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RTC_PORT: {port}"))?;
        }

        Ok(config)
    }
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub log_level: WorkerLogLevel,
    pub log_tags: Vec<WorkerLogTag>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_level: WorkerLogLevel::Warn,
            log_tags: vec![
                WorkerLogTag::Info,
                WorkerLogTag::Ice,
                WorkerLogTag::Dtls,
                WorkerLogTag::Rtp,
                WorkerLogTag::Rtcp,
            ],
            rtc_min_port: 10000,
            rtc_max_port: 59999,
        }
    }
}

impl WorkerConfig {
    /// Converts to mediasoup WorkerSettings
    pub fn to_worker_settings(&self) -> WorkerSettings {
        let mut settings = WorkerSettings::default();
        settings.log_level = self.log_level;
        settings.log_tags = self.log_tags.clone();
        settings.rtc_port_range = self.rtc_min_port..=self.rtc_max_port;
        settings
    }
}

/// Router configuration with the codec capability set offered to all clients
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            media_codecs: Self::default_codecs(),
        }
    }
}

impl RouterConfig {
    /// Returns default codec capabilities for audio and video
    pub fn default_codecs() -> Vec<RtpCodecCapability> {
        vec![
            RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: Some(111),
                clock_rate: NonZeroU32::new(48000).unwrap(),
                channels: NonZeroU8::new(2).unwrap(),
                parameters: RtpCodecParametersParameters::from([
                    ("minptime", 10_u32.into()),
                    ("useinbandfec", 1_u32.into()),
                ]),
                rtcp_feedback: vec![RtcpFeedback::TransportCc],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp8,
                preferred_payload_type: Some(96),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![
                    RtcpFeedback::Nack,
                    RtcpFeedback::NackPli,
                    RtcpFeedback::CcmFir,
                    RtcpFeedback::GoogRemb,
                    RtcpFeedback::TransportCc,
                ],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp9,
                preferred_payload_type: Some(98),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![
                    RtcpFeedback::Nack,
                    RtcpFeedback::NackPli,
                    RtcpFeedback::CcmFir,
                    RtcpFeedback::GoogRemb,
                    RtcpFeedback::TransportCc,
                ],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::H264,
                preferred_payload_type: Some(102),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::from([
                    ("level-asymmetry-allowed", 1_u32.into()),
                    ("packetization-mode", 1_u32.into()),
                    ("profile-level-id", "42e01f".into()),
                ]),
                rtcp_feedback: vec![
                    RtcpFeedback::Nack,
                    RtcpFeedback::NackPli,
                    RtcpFeedback::CcmFir,
                    RtcpFeedback::GoogRemb,
                    RtcpFeedback::TransportCc,
                ],
            },
        ]
    }

    /// Converts to RouterOptions for mediasoup
    pub fn to_router_options(&self) -> RouterOptions {
        RouterOptions::new(self.media_codecs.clone())
    }
}

/// WebRTC transport configuration.
///
/// All transports share a single WebRtcServer bound to `rtc_port`, so one UDP
/// port serves every broadcaster and viewer.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub listen_ip: IpAddr,
    pub announced_address: Option<String>,
    pub rtc_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            announced_address: None,
            rtc_port: DEFAULT_RTC_PORT,
        }
    }
}

impl TransportConfig {
    /// Sets the address announced in ICE candidates
    pub fn with_announced_ip(mut self, announced: IpAddr) -> Self {
        self.announced_address = Some(announced.to_string());
        self
    }

    /// Listen info for the shared WebRtcServer
    pub fn server_listen_info(&self) -> ListenInfo {
        ListenInfo {
            protocol: Protocol::Udp,
            ip: self.listen_ip,
            announced_address: self.announced_address.clone(),
            port: Some(self.rtc_port),
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        }
    }
}
