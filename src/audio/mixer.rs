//! Frame reconciliation and additive mixing

/// Force a decoded peer frame to exactly `len` interleaved samples:
/// truncate if longer, zero-pad if shorter. Stateless, no resampling and no
/// carry-over between ticks.
pub fn reconcile(samples: &mut Vec<i16>, len: usize) {
    samples.resize(len, 0);
}

/// Accumulates peer frames for one playback tick
///
/// Each frame is halved before it is added (`x >> 1`). That buys headroom for
/// two simultaneous speakers; three or more can still exceed the i16 range,
/// which the wide accumulator absorbs and `finish` saturates.
pub struct Mixer {
    acc: Vec<i32>,
    sources: usize,
}

impl Mixer {
    /// Mixer for blocks of `len` interleaved samples
    pub fn new(len: usize) -> Self {
        Self {
            acc: vec![0; len],
            sources: 0,
        }
    }

    /// Zero the accumulator and resize it for this tick
    pub fn reset(&mut self, len: usize) {
        self.acc.clear();
        self.acc.resize(len, 0);
        self.sources = 0;
    }

    /// Add one reconciled frame. Samples past the block length are ignored,
    /// missing ones count as silence.
    pub fn add(&mut self, frame: &[i16]) {
        for (acc, &sample) in self.acc.iter_mut().zip(frame) {
            *acc += (sample >> 1) as i32;
        }
        self.sources += 1;
    }

    /// Frames mixed since the last reset
    pub fn sources(&self) -> usize {
        self.sources
    }

    /// Write the saturated mix into `out`
    pub fn finish(&self, out: &mut [i16]) {
        for (dst, &acc) in out.iter_mut().zip(self.acc.iter().chain(std::iter::repeat(&0))) {
            *dst = acc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
    }

    pub fn len(&self) -> usize {
        self.acc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acc.is_empty()
    }
}
