//! Frame accumulation into fixed-size recognizer batches.

/// Native-rate samples that trigger one batch (≈ 85 ms at 48 kHz).
pub const BATCH_THRESHOLD: usize = 4096;

/// Samples per capture frame, one render quantum.
pub const FRAME_SAMPLES: usize = 128;

/// Mono f32 samples at the capture stage's native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Contiguous merge of accumulated frames. Consumed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBatch {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBatch {
    /// Returns the duration of this batch in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Collects frames until their combined length reaches the threshold.
#[derive(Debug)]
pub struct BatchAccumulator {
    frames: Vec<AudioFrame>,
    buffered: usize,
    threshold: usize,
    sample_rate: u32,
}

impl BatchAccumulator {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_threshold(sample_rate, BATCH_THRESHOLD)
    }

    pub fn with_threshold(sample_rate: u32, threshold: usize) -> Self {
        Self {
            frames: Vec::new(),
            buffered: 0,
            threshold: threshold.max(1),
            sample_rate,
        }
    }

    /// Append a frame. Returns the merged batch when the threshold is reached,
    /// leaving the accumulator empty.
    pub fn push(&mut self, frame: AudioFrame) -> Option<AudioBatch> {
        if frame.is_empty() {
            return None;
        }
        self.buffered += frame.len();
        self.frames.push(frame);

        if self.buffered < self.threshold {
            return None;
        }

        let mut samples = Vec::with_capacity(self.buffered);
        for frame in self.frames.drain(..) {
            samples.extend_from_slice(&frame.samples);
        }
        self.buffered = 0;

        Some(AudioBatch {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    /// Samples waiting for the next batch.
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
