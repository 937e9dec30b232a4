//! Per-tick audio processing shared by the capture and playback callbacks
//!
//! Capture: compress → outbound queue (unless muted), then VAD on the local
//! identity. Playback: pop one frame per peer → decompress → VAD → reconcile
//! to block length → halve-and-add → saturate to the output buffer.
//!
//! Nothing here blocks on I/O. Locks are held only for map operations and
//! try-pops, so both ticks are safe to run from real-time audio callbacks.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::buffer::{outbound_queue, OutboundQueue, OutboundReceiver, PeerQueues};
use super::mixer::{reconcile, Mixer};
use super::vad::SpeakingTracker;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::AudioConfig;
use crate::session::{AudioSink, SessionObserver};

/// Scratch state reused across playback ticks
struct PlaybackScratch {
    popped: Vec<(Arc<str>, Bytes)>,
    mixer: Mixer,
}

/// Capture/playback pipeline for one process
pub struct AudioPipeline {
    local_identity: String,
    channels: usize,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    outbound: OutboundQueue,
    peers: PeerQueues,
    speaking: SpeakingTracker,
    muted: AtomicBool,
    deafened: AtomicBool,
    playback: Mutex<PlaybackScratch>,
    frames_captured: AtomicU64,
    encode_failures: AtomicU64,
    decode_failures: AtomicU64,
}

impl AudioPipeline {
    /// Build a pipeline; the returned receiver feeds the network send loop
    pub fn new(config: &AudioConfig, local_identity: impl Into<String>) -> (Self, OutboundReceiver) {
        let (outbound, outbound_rx) = outbound_queue(config.outbound_queue_capacity);
        let pipeline = Self {
            local_identity: local_identity.into(),
            channels: config.channels.max(1) as usize,
            encoder: FrameEncoder::new(config.compression_level),
            decoder: FrameDecoder::for_config(config),
            outbound,
            peers: PeerQueues::new(config.max_peer_queue_frames),
            speaking: SpeakingTracker::new(config.vad_threshold, config.speaking_hold()),
            muted: AtomicBool::new(false),
            deafened: AtomicBool::new(false),
            playback: Mutex::new(PlaybackScratch {
                popped: Vec::new(),
                mixer: Mixer::new(config.samples_per_block()),
            }),
            frames_captured: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        };
        (pipeline, outbound_rx)
    }

    /// Process one captured frame of interleaved samples
    pub fn capture_tick(&self, frame: &[i16]) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);

        if !self.is_muted() {
            match self.encoder.encode(frame) {
                Ok(compressed) => self.outbound.push(compressed),
                Err(_) => {
                    self.encode_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.speaking.observe(&self.local_identity, frame);
    }

    /// Fill `out` (interleaved, `frames * channels` samples) with the mix of
    /// one frame from every peer that has one buffered
    pub fn playback_tick(&self, out: &mut [i16]) {
        if self.is_deafened() {
            out.fill(0);
            return;
        }

        let mut scratch = self.playback.lock();
        let PlaybackScratch { popped, mixer } = &mut *scratch;

        mixer.reset(out.len());
        self.peers.pop_each(popped);

        for (identity, compressed) in popped.drain(..) {
            let mut samples = match self.decoder.decode(&compressed) {
                Ok(samples) => samples,
                // Counted only; this runs on the audio callback
                Err(_) => {
                    self.decode_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            self.speaking.observe(&identity, &samples);
            reconcile(&mut samples, out.len());
            mixer.add(&samples);
        }

        mixer.finish(out);
    }

    /// Create an empty queue for `identity` (idempotent)
    pub fn add_peer(&self, identity: &str) {
        if self.peers.add(identity) {
            tracing::debug!(peer = identity, "Added peer queue");
        }
    }

    /// Drop the queue for `identity` and anything buffered in it
    pub fn remove_peer(&self, identity: &str) {
        if self.peers.remove(identity) {
            self.speaking.forget(identity);
            tracing::debug!(peer = identity, "Removed peer queue");
        }
    }

    /// Buffer a compressed frame from `identity`, creating its queue if needed
    pub fn receive(&self, identity: &str, frame: Bytes) {
        self.peers.push(identity, frame);
    }

    /// Align peer queues with a participant list: add every listed peer other
    /// than ourselves, remove every queue no longer listed
    pub fn sync_participants(&self, participants: &[String]) {
        let listed: HashSet<&str> = participants
            .iter()
            .map(String::as_str)
            .filter(|name| *name != self.local_identity)
            .collect();

        for name in &listed {
            self.add_peer(name);
        }
        for known in self.peers.identities() {
            if !listed.contains(known.as_str()) {
                self.remove_peer(&known);
            }
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn set_deafened(&self, deafened: bool) {
        self.deafened.store(deafened, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened.load(Ordering::Relaxed)
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn speaking(&self) -> &SpeakingTracker {
        &self.speaking
    }

    pub fn is_speaking(&self, identity: &str) -> bool {
        self.speaking.is_speaking(identity)
    }

    pub fn peers(&self) -> &PeerQueues {
        &self.peers
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_encoded: self.encoder.stats().frames_encoded,
            outbound_dropped: self.outbound.dropped(),
            inbound_dropped: self.peers.overflow_count(),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            peers: self.peers.len(),
        }
    }
}

impl AudioSink for AudioPipeline {
    fn on_audio_received(&self, identity: &str, frame: Bytes) {
        self.receive(identity, frame);
    }
}

impl SessionObserver for AudioPipeline {
    fn on_participants_updated(&self, participants: &[String]) {
        self.sync_participants(participants);
    }
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub outbound_dropped: usize,
    pub inbound_dropped: usize,
    pub encode_failures: u64,
    pub decode_failures: u64,
    pub peers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameEncoder;

    fn config(frames: usize) -> AudioConfig {
        AudioConfig {
            frames_per_block: frames,
            ..Default::default()
        }
    }

    fn compressed(samples: &[i16]) -> Bytes {
        FrameEncoder::default().encode(samples).unwrap()
    }

    #[test]
    fn test_capture_enqueues_compressed_frame() {
        let (pipeline, rx) = AudioPipeline::new(&config(256), "me");
        let frame: Vec<i16> = (0..256).map(|i| (i * 3) as i16).collect();
        pipeline.capture_tick(&frame);

        let sent = rx.try_recv().expect("frame queued");
        let decoded = FrameDecoder::new(1 << 16).decode(&sent).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(pipeline.stats().frames_encoded, 1);
    }

    #[test]
    fn test_muted_capture_sends_nothing_but_still_detects_speech() {
        let (pipeline, rx) = AudioPipeline::new(&config(256), "me");
        pipeline.set_muted(true);
        pipeline.capture_tick(&[5000; 256]);

        assert!(rx.try_recv().is_none());
        assert!(pipeline.is_speaking("me"));
    }

    #[test]
    fn test_quiet_capture_is_not_speech() {
        let (pipeline, _rx) = AudioPipeline::new(&config(256), "me");
        pipeline.capture_tick(&[100; 256]);
        assert!(!pipeline.is_speaking("me"));
    }

    #[test]
    fn test_playback_mixes_halved_peers() {
        let (pipeline, _rx) = AudioPipeline::new(&config(4), "me");
        pipeline.receive("a", compressed(&[1000, 2000, 3000, 4000]));
        pipeline.receive("b", compressed(&[-1000, 0, 1000, 2000]));

        let mut out = [0i16; 4];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [0, 1000, 2000, 3000]);
    }

    #[test]
    fn test_playback_with_no_frames_is_silence() {
        let (pipeline, _rx) = AudioPipeline::new(&config(8), "me");
        pipeline.add_peer("a");
        let mut out = [123i16; 8];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [0; 8]);
    }

    #[test]
    fn test_empty_peer_is_skipped_not_waited_on() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        pipeline.add_peer("idle");
        pipeline.receive("talker", compressed(&[400, 400]));

        let mut out = [0i16; 2];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [200, 200]);
    }

    #[test]
    fn test_one_frame_per_peer_per_tick() {
        let (pipeline, _rx) = AudioPipeline::new(&config(1), "me");
        pipeline.receive("a", compressed(&[100]));
        pipeline.receive("a", compressed(&[300]));

        let mut out = [0i16; 1];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [50]);
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [150]);
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [0]);
    }

    #[test]
    fn test_short_and_long_frames_are_reconciled() {
        let (pipeline, _rx) = AudioPipeline::new(&config(4), "me");
        pipeline.receive("short", compressed(&[200, 200]));
        pipeline.receive("long", compressed(&[20, 20, 20, 20, 8000, 8000]));

        let mut out = [0i16; 4];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [110, 110, 10, 10]);
    }

    #[test]
    fn test_output_length_follows_device_request() {
        let (pipeline, _rx) = AudioPipeline::new(&config(1024), "me");
        pipeline.receive("a", compressed(&[1000; 1024]));

        let mut out = vec![0i16; 300];
        pipeline.playback_tick(&mut out);
        assert!(out.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_corrupt_frame_only_affects_its_peer() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        pipeline.receive("bad", Bytes::from_static(b"garbage"));
        pipeline.receive("good", compressed(&[600, 600]));

        let mut out = [0i16; 2];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [300, 300]);
        assert_eq!(pipeline.stats().decode_failures, 1);
    }

    #[test]
    fn test_repeated_corrupt_frames_are_counted_every_tick() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        let mut out = [0i16; 2];

        for tick in 1..=3u64 {
            pipeline.receive("bad", Bytes::from_static(b"garbage"));
            pipeline.receive("good", compressed(&[600, 600]));
            pipeline.playback_tick(&mut out);
            assert_eq!(out, [300, 300]);
            assert_eq!(pipeline.stats().decode_failures, tick);
        }
        assert_eq!(pipeline.peers().queued("bad"), 0);
    }

    #[test]
    fn test_deafened_outputs_silence_and_keeps_queue() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        pipeline.receive("a", compressed(&[600, 600]));
        pipeline.set_deafened(true);

        let mut out = [7i16; 2];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [0, 0]);
        assert_eq!(pipeline.peers().queued("a"), 1);
    }

    #[test]
    fn test_full_scale_peers_never_wrap() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        for peer in 0..6 {
            pipeline.receive(&format!("p{}", peer), compressed(&[i16::MAX, i16::MIN]));
        }

        let mut out = [0i16; 2];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_peer_vad_marks_speaker() {
        let (pipeline, _rx) = AudioPipeline::new(&config(4), "me");
        pipeline.receive("loud", compressed(&[3000; 4]));
        pipeline.receive("quiet", compressed(&[10; 4]));

        let mut out = [0i16; 4];
        pipeline.playback_tick(&mut out);
        assert!(pipeline.is_speaking("loud"));
        assert!(!pipeline.is_speaking("quiet"));
    }

    #[test]
    fn test_sync_participants() {
        let (pipeline, _rx) = AudioPipeline::new(&config(4), "me");
        pipeline.receive("gone", compressed(&[1; 4]));

        pipeline.sync_participants(&["me".into(), "a".into(), "b".into()]);
        let mut ids = pipeline.peers().identities();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!pipeline.peers().contains("me"));
    }

    #[test]
    fn test_remove_peer_drops_buffered_frames() {
        let (pipeline, _rx) = AudioPipeline::new(&config(2), "me");
        pipeline.receive("a", compressed(&[600, 600]));
        pipeline.remove_peer("a");

        let mut out = [0i16; 2];
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [0, 0]);

        // Late audio brings the queue back
        pipeline.on_audio_received("a", compressed(&[600, 600]));
        pipeline.playback_tick(&mut out);
        assert_eq!(out, [300, 300]);
    }
}
