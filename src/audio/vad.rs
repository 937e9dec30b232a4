//! Energy-based voice activity detection

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Root-mean-square amplitude of raw i16 samples
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Last-speech timestamps per identity
///
/// Written from the audio callback, read from the UI, so it lives in a
/// sharded map rather than behind one lock.
pub struct SpeakingTracker {
    threshold: f32,
    hold: Duration,
    last_spoke: DashMap<String, Instant>,
}

impl SpeakingTracker {
    pub fn new(threshold: f32, hold: Duration) -> Self {
        Self {
            threshold,
            hold,
            last_spoke: DashMap::new(),
        }
    }

    /// Mark `identity` as speaking if the frame is loud enough.
    /// Returns whether it was.
    pub fn observe(&self, identity: &str, samples: &[i16]) -> bool {
        let loud = rms(samples) > self.threshold;
        if loud {
            self.mark(identity);
        }
        loud
    }

    /// Record speech for `identity` now
    pub fn mark(&self, identity: &str) {
        let now = Instant::now();
        match self.last_spoke.get_mut(identity) {
            Some(mut entry) => *entry = now,
            None => {
                self.last_spoke.insert(identity.to_string(), now);
            }
        }
    }

    pub fn last_spoke(&self, identity: &str) -> Option<Instant> {
        self.last_spoke.get(identity).map(|entry| *entry)
    }

    /// True within the hold window after the last loud frame
    pub fn is_speaking(&self, identity: &str) -> bool {
        self.last_spoke(identity)
            .is_some_and(|at| at.elapsed() < self.hold)
    }

    pub fn forget(&self, identity: &str) {
        self.last_spoke.remove(identity);
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_values() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 64]), 0.0);
        assert!((rms(&[1000, -1000, 1000, -1000]) - 1000.0).abs() < 0.01);
        assert!((rms(&[i16::MIN; 16]) - 32768.0).abs() < 0.01);
    }

    #[test]
    fn test_threshold_is_amplitude_domain() {
        let tracker = SpeakingTracker::new(500.0, Duration::from_millis(300));

        assert!(!tracker.observe("alice", &[400; 256]));
        assert!(!tracker.is_speaking("alice"));
        assert!(tracker.last_spoke("alice").is_none());

        assert!(tracker.observe("alice", &[600; 256]));
        assert!(tracker.is_speaking("alice"));
    }

    #[test]
    fn test_hold_expires() {
        let tracker = SpeakingTracker::new(500.0, Duration::from_millis(20));
        tracker.mark("bob");
        assert!(tracker.is_speaking("bob"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!tracker.is_speaking("bob"));
        assert!(tracker.last_spoke("bob").is_some());

        tracker.forget("bob");
        assert!(tracker.last_spoke("bob").is_none());
    }
}
