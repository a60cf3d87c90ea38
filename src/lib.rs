#![forbid(unsafe_code)]

// Whipcast library - WHIP ingest and WebSocket playback signaling over mediasoup

pub mod engine;
pub mod metrics;
pub mod registry;
pub mod sdp;
pub mod signaling;
pub mod whip;
