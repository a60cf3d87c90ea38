#![forbid(unsafe_code)]

// SDP translation between WHIP offer/answer text and mediasoup RTP parameters
//
// Pure functions, no I/O. Parsing is tolerant of attributes and media kinds it
// does not understand; converting to engine parameters is strict.

use mediasoup::prelude::*;
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Payload type advertised in every generated answer section.
pub const ANSWER_PAYLOAD_TYPE: u8 = 96;

/// Transport protocol advertised in every generated answer section.
pub const ANSWER_PROTOCOL: &str = "UDP/TLS/RTP/SAVPF";

#[derive(Error, Debug)]
pub enum SdpError {
    #[error("Invalid SDP: {0}")]
    Invalid(String),

    #[error("Offer carries no DTLS fingerprint")]
    MissingFingerprint,

    #[error("Media section declares no codec")]
    MissingCodec,

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// One codec declared by an `a=rtpmap` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedCodec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

/// Fingerprint attribute as it appears in the offer, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// One audio or video section of a parsed offer.
#[derive(Debug, Clone)]
pub struct MediaSection {
    pub kind: MediaKind,
    pub mid: Option<String>,
    pub codecs: Vec<OfferedCodec>,
    pub ssrc: Option<u32>,
    pub cname: Option<String>,
    pub fingerprint: Option<RawFingerprint>,
    pub setup: Option<String>,
}

impl MediaSection {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            mid: None,
            codecs: Vec::new(),
            ssrc: None,
            cname: None,
            fingerprint: None,
            setup: None,
        }
    }
}

/// Parsed WHIP offer: supported media sections plus the session-level
/// handshake attributes.
#[derive(Debug, Clone, Default)]
pub struct ParsedOffer {
    pub media: Vec<MediaSection>,
    pub fingerprint: Option<RawFingerprint>,
    pub setup: Option<String>,
}

impl ParsedOffer {
    /// Fingerprint for the DTLS handshake: media-level wins over session-level.
    pub fn fingerprint(&self) -> Option<&RawFingerprint> {
        self.media
            .iter()
            .find_map(|m| m.fingerprint.as_ref())
            .or(self.fingerprint.as_ref())
    }

    /// Setup role declared by the offerer, media-level first.
    pub fn setup(&self) -> Option<&str> {
        self.media
            .iter()
            .find_map(|m| m.setup.as_deref())
            .or(self.setup.as_deref())
    }
}

/// Parses an SDP offer into its audio/video sections.
///
/// Sections of unsupported kinds (`application` and anything else that is not
/// audio or video) are ignored, as are attributes the translator has no use
/// for. A body that does not look like SDP at all is an error.
///
/// # Errors
/// Returns `SdpError::Invalid` when the text has no `v=` line.
pub fn parse_offer(sdp: &str) -> Result<ParsedOffer, SdpError> {
    let mut offer = ParsedOffer::default();
    // Some(section) inside a supported m= block, None before the first m=
    // line; unsupported blocks park their attributes in the discard flag.
    let mut current: Option<MediaSection> = None;
    let mut in_unsupported = false;
    let mut saw_version = false;

    for line in sdp.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let (key, value) = (line.as_bytes()[0] as char, &line[2..]);

        match key {
            'v' => saw_version = true,
            'm' => {
                if let Some(section) = current.take() {
                    offer.media.push(section);
                }
                in_unsupported = false;
                match value.split_whitespace().next() {
                    Some("audio") => current = Some(MediaSection::new(MediaKind::Audio)),
                    Some("video") => current = Some(MediaSection::new(MediaKind::Video)),
                    _ => in_unsupported = true,
                }
            }
            'a' => {
                if let Some(ref mut section) = current {
                    parse_media_attribute(section, value);
                } else if !in_unsupported {
                    parse_session_attribute(&mut offer, value);
                }
            }
            _ => {}
        }
    }

    if let Some(section) = current.take() {
        offer.media.push(section);
    }

    if !saw_version {
        return Err(SdpError::Invalid("missing version line".to_string()));
    }

    Ok(offer)
}

fn parse_media_attribute(section: &mut MediaSection, value: &str) {
    if let Some((key, val)) = value.split_once(':') {
        match key {
            "rtpmap" => {
                // PT codec/clock[/channels]
                let parts: Vec<&str> = val.split_whitespace().collect();
                if parts.len() >= 2 {
                    let Ok(payload_type) = parts[0].parse() else {
                        return;
                    };
                    let codec_parts: Vec<&str> = parts[1].split('/').collect();
                    if !codec_parts.is_empty() {
                        section.codecs.push(OfferedCodec {
                            payload_type,
                            name: codec_parts[0].to_string(),
                            clock_rate: codec_parts
                                .get(1)
                                .and_then(|s| s.parse().ok())
                                .unwrap_or(90000),
                            channels: codec_parts.get(2).and_then(|s| s.parse().ok()),
                        });
                    }
                }
            }
            "ssrc" => {
                // First ssrc wins; trailing cname travels with it
                let mut parts = val.split_whitespace();
                if let Some(ssrc) = parts.next().and_then(|s| s.parse().ok()) {
                    if section.ssrc.is_none() {
                        section.ssrc = Some(ssrc);
                    }
                    if section.cname.is_none() {
                        section.cname = parts
                            .next()
                            .and_then(|attr| attr.strip_prefix("cname:"))
                            .map(str::to_string);
                    }
                }
            }
            "mid" => section.mid = Some(val.to_string()),
            "fingerprint" => section.fingerprint = parse_fingerprint_attr(val),
            "setup" => section.setup = Some(val.to_string()),
            _ => {}
        }
    }
}

fn parse_session_attribute(offer: &mut ParsedOffer, value: &str) {
    if let Some((key, val)) = value.split_once(':') {
        match key {
            "fingerprint" => offer.fingerprint = parse_fingerprint_attr(val),
            "setup" => offer.setup = Some(val.to_string()),
            _ => {}
        }
    }
}

fn parse_fingerprint_attr(val: &str) -> Option<RawFingerprint> {
    let mut parts = val.split_whitespace();
    let algorithm = parts.next()?.to_string();
    let value = parts.next()?.to_string();
    Some(RawFingerprint { algorithm, value })
}

/// Builds the remote DTLS parameters for `transport.connect` from an offer.
///
/// The offer must carry a fingerprint (media- or session-level); WHIP clients
/// always send one, so a missing fingerprint is rejected instead of letting
/// the handshake proceed against an unverifiable peer. The remote role
/// derives from `a=setup`; `actpass` and absent both resolve to client, which
/// is the role a browser takes against an ICE-lite answerer.
///
/// # Errors
/// `MissingFingerprint` when the offer has none, `Invalid` when the
/// fingerprint does not decode.
pub fn remote_dtls_parameters(offer: &ParsedOffer) -> Result<DtlsParameters, SdpError> {
    let raw = offer.fingerprint().ok_or(SdpError::MissingFingerprint)?;
    let fingerprint = decode_fingerprint(raw)?;
    let role = match offer.setup() {
        Some("passive") => DtlsRole::Server,
        _ => DtlsRole::Client,
    };
    Ok(DtlsParameters {
        role,
        fingerprints: vec![fingerprint],
    })
}

fn decode_fingerprint(raw: &RawFingerprint) -> Result<DtlsFingerprint, SdpError> {
    let bytes: Vec<u8> = raw
        .value
        .split(':')
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<Result<_, _>>()
        .map_err(|_| SdpError::Invalid(format!("bad fingerprint value: {}", raw.value)))?;

    let wrong_len =
        |expected: usize| SdpError::Invalid(format!("fingerprint length {} != {expected}", bytes.len()));

    match raw.algorithm.to_ascii_lowercase().as_str() {
        "sha-1" => Ok(DtlsFingerprint::Sha1 {
            value: bytes.as_slice().try_into().map_err(|_| wrong_len(20))?,
        }),
        "sha-224" => Ok(DtlsFingerprint::Sha224 {
            value: bytes.as_slice().try_into().map_err(|_| wrong_len(28))?,
        }),
        "sha-256" => Ok(DtlsFingerprint::Sha256 {
            value: bytes.as_slice().try_into().map_err(|_| wrong_len(32))?,
        }),
        "sha-384" => Ok(DtlsFingerprint::Sha384 {
            value: bytes.as_slice().try_into().map_err(|_| wrong_len(48))?,
        }),
        "sha-512" => Ok(DtlsFingerprint::Sha512 {
            value: bytes.as_slice().try_into().map_err(|_| wrong_len(64))?,
        }),
        other => Err(SdpError::Invalid(format!(
            "unsupported fingerprint algorithm: {other}"
        ))),
    }
}

/// Builds engine RTP parameters for one offered media section.
///
/// The first declared codec wins; there is no preference negotiation. The
/// payload type is the one the sender declared, so incoming RTP matches.
/// Audio defaults to two channels when the rtpmap omits a count. The codec
/// name must be one the router's capability set knows, otherwise the section
/// is untranslatable and the caller skips it.
///
/// # Errors
/// `MissingCodec` for a section without rtpmap lines, `UnsupportedCodec` or
/// `Invalid` when the first codec cannot map onto the engine's model.
pub fn build_rtp_parameters(section: &MediaSection) -> Result<RtpParameters, SdpError> {
    let offered = section.codecs.first().ok_or(SdpError::MissingCodec)?;

    let clock_rate = NonZeroU32::new(offered.clock_rate)
        .ok_or_else(|| SdpError::Invalid("zero clock rate".to_string()))?;

    let codec = match section.kind {
        MediaKind::Audio => {
            let mime_type = match offered.name.to_ascii_lowercase().as_str() {
                "opus" => MimeTypeAudio::Opus,
                other => return Err(SdpError::UnsupportedCodec(other.to_string())),
            };
            let channels = NonZeroU8::new(offered.channels.unwrap_or(2))
                .ok_or_else(|| SdpError::Invalid("zero channel count".to_string()))?;
            RtpCodecParameters::Audio {
                mime_type,
                payload_type: offered.payload_type,
                clock_rate,
                channels,
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            }
        }
        MediaKind::Video => {
            let mime_type = match offered.name.to_ascii_lowercase().as_str() {
                "vp8" => MimeTypeVideo::Vp8,
                "vp9" => MimeTypeVideo::Vp9,
                "h264" => MimeTypeVideo::H264,
                other => return Err(SdpError::UnsupportedCodec(other.to_string())),
            };
            RtpCodecParameters::Video {
                mime_type,
                payload_type: offered.payload_type,
                clock_rate,
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![],
            }
        }
    };

    let encodings = match section.ssrc {
        Some(ssrc) => vec![RtpEncodingParameters {
            ssrc: Some(ssrc),
            ..RtpEncodingParameters::default()
        }],
        None => vec![],
    };

    Ok(RtpParameters {
        codecs: vec![codec],
        encodings,
        rtcp: RtcpParameters {
            cname: section.cname.clone(),
            ..RtcpParameters::default()
        },
        ..RtpParameters::default()
    })
}

/// One media section of a generated answer, in producer creation order.
#[derive(Debug, Clone)]
pub struct AnswerMedia {
    pub kind: MediaKind,
    pub mid: Option<String>,
    pub codec_name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

impl AnswerMedia {
    /// Answer section for an offered section whose producer was created.
    pub fn accepted(section: &MediaSection, codec: &OfferedCodec) -> Self {
        Self {
            kind: section.kind,
            mid: section.mid.clone(),
            codec_name: codec.name.clone(),
            clock_rate: codec.clock_rate,
            channels: match section.kind {
                MediaKind::Audio => Some(codec.channels.unwrap_or(2)),
                MediaKind::Video => None,
            },
        }
    }
}

/// Builds the SDP answer for a WHIP create.
///
/// One `m=` section per successfully created producer, in creation order,
/// each with the fixed answer payload type, the transport's ICE material and
/// DTLS fingerprint, and `setup=actpass`. The session origin id never
/// decreases across calls within one process.
pub fn build_answer(
    ice: &IceParameters,
    candidates: &[IceCandidate],
    dtls: &DtlsParameters,
    media: &[AnswerMedia],
) -> String {
    let mut lines = Vec::new();

    lines.push("v=0".to_string());
    lines.push(format!("o=- {} 2 IN IP4 0.0.0.0", next_session_id()));
    lines.push("s=-".to_string());
    lines.push("t=0 0".to_string());
    lines.push("a=ice-lite".to_string());

    let mids: Vec<&str> = media.iter().filter_map(|m| m.mid.as_deref()).collect();
    if !mids.is_empty() {
        lines.push(format!("a=group:BUNDLE {}", mids.join(" ")));
    }

    let (fp_algorithm, fp_value) = answer_fingerprint(dtls);

    for section in media {
        lines.push(format!(
            "m={} 9 {} {}",
            kind_str(section.kind),
            ANSWER_PROTOCOL,
            ANSWER_PAYLOAD_TYPE
        ));
        lines.push("c=IN IP4 0.0.0.0".to_string());
        if let Some(mid) = &section.mid {
            lines.push(format!("a=mid:{mid}"));
        }
        lines.push(format!("a=ice-ufrag:{}", ice.username_fragment));
        lines.push(format!("a=ice-pwd:{}", ice.password));
        lines.push(format!("a=fingerprint:{fp_algorithm} {fp_value}"));
        lines.push("a=setup:actpass".to_string());
        lines.push("a=recvonly".to_string());
        lines.push("a=rtcp-mux".to_string());
        match section.channels {
            Some(channels) => lines.push(format!(
                "a=rtpmap:{} {}/{}/{}",
                ANSWER_PAYLOAD_TYPE, section.codec_name, section.clock_rate, channels
            )),
            None => lines.push(format!(
                "a=rtpmap:{} {}/{}",
                ANSWER_PAYLOAD_TYPE, section.codec_name, section.clock_rate
            )),
        }
        for candidate in candidates {
            lines.push(candidate_line(candidate));
        }
    }

    lines.join("\r\n") + "\r\n"
}

/// Monotonically non-decreasing session id for answer origins. Wall-clock
/// based; a clock step backwards reuses the previous value rather than
/// emitting a smaller one.
fn next_session_id() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let prev = LAST.fetch_max(now, Ordering::SeqCst);
    prev.max(now)
}

fn kind_str(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

/// Picks the fingerprint to advertise: SHA-256 when the engine offers it,
/// otherwise the last (strongest) entry.
fn answer_fingerprint(dtls: &DtlsParameters) -> (&'static str, String) {
    let chosen = dtls
        .fingerprints
        .iter()
        .find(|fp| matches!(fp, DtlsFingerprint::Sha256 { .. }))
        .or_else(|| dtls.fingerprints.last());

    match chosen {
        Some(fp) => fingerprint_attr(fp),
        None => ("sha-256", String::new()),
    }
}

fn fingerprint_attr(fp: &DtlsFingerprint) -> (&'static str, String) {
    match fp {
        DtlsFingerprint::Sha1 { value } => ("sha-1", hex_colon(value)),
        DtlsFingerprint::Sha224 { value } => ("sha-224", hex_colon(value)),
        DtlsFingerprint::Sha256 { value } => ("sha-256", hex_colon(value)),
        DtlsFingerprint::Sha384 { value } => ("sha-384", hex_colon(value)),
        DtlsFingerprint::Sha512 { value } => ("sha-512", hex_colon(value)),
    }
}

fn hex_colon(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn candidate_line(candidate: &IceCandidate) -> String {
    let protocol = match candidate.protocol {
        Protocol::Udp => "udp",
        Protocol::Tcp => "tcp",
    };
    let typ = match candidate.r#type {
        IceCandidateType::Host => "host",
        IceCandidateType::Srflx => "srflx",
        IceCandidateType::Prflx => "prflx",
        IceCandidateType::Relay => "relay",
    };
    let mut line = format!(
        "a=candidate:{} 1 {} {} {} {} typ {}",
        candidate.foundation, protocol, candidate.priority, candidate.address, candidate.port, typ
    );
    if let Some(tcp_type) = candidate.tcp_type.as_ref() {
        let tcp_type = match tcp_type {
            IceCandidateTcpType::Passive => "passive",
        };
        line.push_str(&format!(" tcptype {tcp_type}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0 1\r\n\
        a=fingerprint:sha-256 7B:8B:F0:65:5F:78:E2:51:3B:AC:6F:F3:3F:46:1B:35:DC:B8:5F:64:1A:24:C2:43:F0:A1:58:D0:A1:2C:19:08\r\n\
        a=setup:actpass\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 103\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=rtpmap:103 ISAC/16000\r\n\
        a=ssrc:11111111 cname:ingest@example\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 98\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:1\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtpmap:98 VP9/90000\r\n\
        a=ssrc:22222222 cname:ingest@example\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        a=mid:2\r\n";

    #[test]
    fn parses_supported_sections_and_ignores_the_rest() {
        let offer = parse_offer(OFFER).unwrap();
        assert_eq!(offer.media.len(), 2);

        let audio = &offer.media[0];
        assert_eq!(audio.kind, MediaKind::Audio);
        assert_eq!(audio.mid.as_deref(), Some("0"));
        assert_eq!(audio.codecs.len(), 2);
        assert_eq!(audio.codecs[0].name, "opus");
        assert_eq!(audio.codecs[0].payload_type, 111);
        assert_eq!(audio.codecs[0].channels, Some(2));
        assert_eq!(audio.ssrc, Some(11111111));
        assert_eq!(audio.cname.as_deref(), Some("ingest@example"));

        let video = &offer.media[1];
        assert_eq!(video.kind, MediaKind::Video);
        assert_eq!(video.codecs[0].name, "VP8");
        assert_eq!(video.codecs[0].clock_rate, 90000);
        assert_eq!(video.codecs[0].channels, None);
    }

    #[test]
    fn rejects_non_sdp_bodies() {
        assert!(matches!(
            parse_offer("this is not sdp"),
            Err(SdpError::Invalid(_))
        ));
    }

    #[test]
    fn first_codec_wins_and_keeps_its_payload_type() {
        let offer = parse_offer(OFFER).unwrap();
        let params = build_rtp_parameters(&offer.media[0]).unwrap();
        assert_eq!(params.codecs.len(), 1);
        match &params.codecs[0] {
            RtpCodecParameters::Audio {
                payload_type,
                channels,
                ..
            } => {
                assert_eq!(*payload_type, 111);
                assert_eq!(channels.get(), 2);
            }
            other => panic!("expected audio codec, got {other:?}"),
        }
        assert_eq!(params.encodings.len(), 1);
        assert_eq!(params.encodings[0].ssrc, Some(11111111));
        assert_eq!(params.rtcp.cname.as_deref(), Some("ingest@example"));
    }

    #[test]
    fn audio_channels_default_to_two() {
        let section = MediaSection {
            codecs: vec![OfferedCodec {
                payload_type: 109,
                name: "opus".into(),
                clock_rate: 48000,
                channels: None,
            }],
            ..MediaSection::new(MediaKind::Audio)
        };
        let params = build_rtp_parameters(&section).unwrap();
        match &params.codecs[0] {
            RtpCodecParameters::Audio { channels, .. } => assert_eq!(channels.get(), 2),
            other => panic!("expected audio codec, got {other:?}"),
        }
    }

    #[test]
    fn unknown_codecs_are_unsupported() {
        let mut section = MediaSection::new(MediaKind::Video);
        section.codecs.push(OfferedCodec {
            payload_type: 97,
            name: "FLV1".into(),
            clock_rate: 90000,
            channels: None,
        });
        assert!(matches!(
            build_rtp_parameters(&section),
            Err(SdpError::UnsupportedCodec(_))
        ));

        let empty = MediaSection::new(MediaKind::Audio);
        assert!(matches!(
            build_rtp_parameters(&empty),
            Err(SdpError::MissingCodec)
        ));
    }

    #[test]
    fn fingerprint_and_setup_reach_dtls_parameters() {
        let offer = parse_offer(OFFER).unwrap();
        let dtls = remote_dtls_parameters(&offer).unwrap();
        assert_eq!(dtls.role, DtlsRole::Client);
        match &dtls.fingerprints[0] {
            DtlsFingerprint::Sha256 { value } => {
                assert_eq!(value[0], 0x7B);
                assert_eq!(value[31], 0x08);
            }
            other => panic!("expected sha-256 fingerprint, got {other:?}"),
        }
    }

    #[test]
    fn passive_setup_makes_remote_the_server() {
        let sdp = OFFER.replace("a=setup:actpass", "a=setup:passive");
        let offer = parse_offer(&sdp).unwrap();
        let dtls = remote_dtls_parameters(&offer).unwrap();
        assert_eq!(dtls.role, DtlsRole::Server);
    }

    #[test]
    fn offers_without_fingerprints_are_rejected() {
        let sdp = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
                   m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n";
        let offer = parse_offer(sdp).unwrap();
        assert!(matches!(
            remote_dtls_parameters(&offer),
            Err(SdpError::MissingFingerprint)
        ));
    }

    fn test_ice() -> IceParameters {
        IceParameters {
            username_fragment: "frag".to_string(),
            password: "pwd".to_string(),
            ice_lite: Some(true),
        }
    }

    fn test_candidates() -> Vec<IceCandidate> {
        vec![IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1015,
            address: "198.51.100.4".to_string(),
            protocol: Protocol::Udp,
            port: 10000,
            r#type: IceCandidateType::Host,
            tcp_type: None,
        }]
    }

    fn test_dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: vec![DtlsFingerprint::Sha256 { value: [0xAB; 32] }],
        }
    }

    fn answer_media(n: usize) -> Vec<AnswerMedia> {
        (0..n)
            .map(|i| AnswerMedia {
                kind: if i == 0 {
                    MediaKind::Audio
                } else {
                    MediaKind::Video
                },
                mid: Some(i.to_string()),
                codec_name: if i == 0 { "opus".into() } else { "VP8".into() },
                clock_rate: if i == 0 { 48000 } else { 90000 },
                channels: if i == 0 { Some(2) } else { None },
            })
            .collect()
    }

    #[test]
    fn answer_sections_match_created_producers() {
        for n in 0..3 {
            let answer = build_answer(&test_ice(), &test_candidates(), &test_dtls(), &answer_media(n));
            let sections = answer.lines().filter(|l| l.starts_with("m=")).count();
            assert_eq!(sections, n);
        }
    }

    #[test]
    fn answer_carries_the_negotiated_transport_material() {
        let answer = build_answer(&test_ice(), &test_candidates(), &test_dtls(), &answer_media(2));

        assert!(answer.contains("m=audio 9 UDP/TLS/RTP/SAVPF 96\r\n"));
        assert!(answer.contains("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n"));
        assert!(answer.contains("a=group:BUNDLE 0 1\r\n"));
        assert!(answer.contains("a=ice-lite\r\n"));
        assert!(answer.contains("a=ice-ufrag:frag\r\n"));
        assert!(answer.contains("a=ice-pwd:pwd\r\n"));
        assert!(answer.contains("a=setup:actpass\r\n"));
        assert!(answer.contains("a=rtpmap:96 opus/48000/2\r\n"));
        assert!(answer.contains("a=rtpmap:96 VP8/90000\r\n"));
        assert!(answer.contains("a=fingerprint:sha-256 AB:AB"));
        assert!(answer.contains("a=candidate:udpcandidate 1 udp 1015 198.51.100.4 10000 typ host\r\n"));
    }

    #[test]
    fn session_ids_never_decrease() {
        let extract = |answer: &str| -> u64 {
            answer
                .lines()
                .find(|l| l.starts_with("o="))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|id| id.parse().ok())
                .expect("origin line with session id")
        };

        let first = extract(&build_answer(
            &test_ice(),
            &test_candidates(),
            &test_dtls(),
            &answer_media(1),
        ));
        let second = extract(&build_answer(
            &test_ice(),
            &test_candidates(),
            &test_dtls(),
            &answer_media(1),
        ));
        assert!(second >= first);
    }
}
