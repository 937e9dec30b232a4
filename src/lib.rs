//! # SpeekChat
//!
//! Low-latency group voice chat over UDP. A relay server forwards short
//! compressed audio frames between connected clients; every client captures
//! its microphone, detects speech, compresses and sends frames, and mixes the
//! streams it receives from its peers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── CLIENT ────────────────────────────┐
//! │  Microphone ──► AudioPipeline::capture_tick                    │
//! │                  │  VAD (RMS) ──► SpeakingTracker               │
//! │                  ▼                                              │
//! │             FrameEncoder (zlib) ──► OutboundQueue (drop oldest) │
//! │                                          │                      │
//! │                               send loop (recv_timeout 1s)       │
//! │                                          ▼                      │
//! │  VoiceClient ── JOIN/PING/LEAVE ──► Transport (UDP, ephemeral)  │
//! └──────────────────────────────────────────┼──────────────────────┘
//!                                            │ [0x01]["SPK!"][0][zlib]
//!                                            ▼
//! ┌──────────────────────────── SERVER ────────────────────────────┐
//! │  Transport (UDP :50005) ──► VoiceServer                         │
//! │      Command ──► SessionRegistry ──► PARTICIPANTS broadcast     │
//! │      Audio   ──► inject speaker name ──► fan-out (never echo)   │
//! └──────────────────────────────────────────┼──────────────────────┘
//!                                            │ [0x01]["SPK!"][n][name][zlib]
//!                                            ▼
//! ┌──────────────────────────── CLIENT ────────────────────────────┐
//! │  VoiceClient ──► AudioSink::on_audio_received                   │
//! │                     │                                           │
//! │                     ▼                                           │
//! │  PeerQueues (one FIFO per speaker)                              │
//! │                     │                                           │
//! │  AudioPipeline::playback_tick: pop ─► decompress ─► reconcile   │
//! │                                 ─► mix (x >> 1, saturate) ─► 🔊 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Well-known UDP port of the relay server
    pub const DEFAULT_SERVER_PORT: u16 = 50005;

    /// Largest datagram accepted on either side
    pub const MAX_DATAGRAM_SIZE: usize = 8192;

    /// Default capture/playback sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Samples per channel in one audio frame
    pub const DEFAULT_FRAMES_PER_BLOCK: usize = 1024;

    /// RMS amplitude above which a frame counts as speech.
    /// Amplitude domain on raw i16 samples, not normalized.
    pub const VAD_THRESHOLD: f32 = 500.0;

    /// How long an identity stays "speaking" after its last loud frame
    pub const SPEAKING_HOLD: Duration = Duration::from_millis(300);

    /// Delay between JOIN attempts
    pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(2);

    /// JOIN attempts before the client gives up
    pub const JOIN_MAX_ATTEMPTS: u32 = 15;

    /// Delay between PINGs while connected
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

    /// Server drops clients not heard from for this long
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Blocking wait of the outbound audio send loop
    pub const SEND_LOOP_TIMEOUT: Duration = Duration::from_secs(1);

    /// Outbound compressed-frame queue capacity
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

    /// Per-peer inbound queue capacity (frames)
    pub const MAX_PEER_QUEUE_FRAMES: usize = 50;

    /// zlib level used for audio frames
    pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

    /// Relay name used for audio from endpoints that never joined
    pub const UNKNOWN_SPEAKER: &str = "Unknown";
}
