//! Sample-rate conversion.
//!
//! ## Capture path: `decimate`
//!
//! Capture batches are brought down to the recognizer's 16 kHz with a plain
//! block-average decimator: output sample *i* is the mean of the input
//! samples in `[round(i·r), round((i+1)·r))` with `r = input_rate / output_rate`.
//! It aliases, but it costs one pass and adds no latency, which is what a
//! streaming recognizer wants. Equal rates pass the buffer through untouched.
//!
//! ## Playback path: `RateConverter`
//!
//! Synthesized chunks arrive at the synthesizer's rate (commonly 22.05 kHz)
//! while output devices run at their own (commonly 48 kHz). `RateConverter`
//! wraps a rubato `FastFixedIn` resampler for that direction, where quality
//! matters more and a few milliseconds of filter delay are invisible.
//!
//! ```ignore
//! let pcm16k = decimate(batch.samples, 48_000, 16_000);
//! let playable = convert(&chunk.samples, 22_050, 48_000)?;
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{DuplexError, Result};

/// Rate expected by the recognizer.
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

/// Input frames per rubato call on the playback path.
const CONVERTER_CHUNK: usize = 1024;

/// Block-average decimation from `input_rate` to `output_rate`.
///
/// A zero rate on either side carries no timing information, so the input
/// is returned unchanged.
pub fn decimate(input: Vec<f32>, input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == output_rate || input.is_empty() || input_rate == 0 || output_rate == 0 {
        return input;
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = (i as f64 * ratio).round() as usize;
        let end = ((i + 1) as f64 * ratio).round() as usize;

        if end <= start {
            // Upsampling degenerates to sample-and-hold.
            out.push(input[start.min(input.len() - 1)]);
            continue;
        }

        let sum: f32 = input[start.min(input.len())..end.min(input.len())]
            .iter()
            .sum();
        out.push(sum / (end - start) as f32);
    }

    out
}

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// Returns `DuplexError::AudioDevice` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| DuplexError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(source_rate, target_rate, chunk_size, "playback resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated until a full `chunk_size` block is available;
    /// the remainder waits for the next call or `flush`.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out whatever is still buffered, zero-padding the final block.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let tail = std::mem::take(&mut self.input_buf);
        let wave_in: [&[f32]; 1] = [tail.as_slice()];
        match resampler.process_partial_into_buffer(Some(&wave_in[..]), &mut self.output_buf, None) {
            Ok((_consumed, produced)) => self.output_buf[0][..produced].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    /// Returns `true` when source rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a whole buffer in one go.
pub fn convert(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut converter = RateConverter::new(source_rate, target_rate, CONVERTER_CHUNK)?;
    if converter.is_passthrough() {
        return Ok(samples.to_vec());
    }
    let mut out = converter.process(samples);
    out.extend(converter.flush());

    // The zero-padded final block overshoots; trim to the ideal length.
    let expected =
        (samples.len() as f64 * target_rate as f64 / source_rate as f64).round() as usize;
    out.truncate(expected);
    Ok(out)
}
