//! WAV file as a microphone.
//!
//! `WavInput` replays a file through the same ring the live capture path
//! uses, one render quantum at a time and paced to real time, so the rest of
//! the pipeline cannot tell it from a device. Replay pauses while the
//! capture stage is disconnected.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    audio::{CaptureConstraints, InputDevice, InputStream},
    buffering::{batch::FRAME_SAMPLES, FrameProducer, Producer},
    error::{PermissionError, Result},
};

const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct WavInput {
    path: PathBuf,
    looped: bool,
}

impl WavInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            looped: false,
        }
    }

    /// Restart from the beginning at end of file instead of going silent.
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode a WAV file to mono f32, averaging channels.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path).map_err(map_hound_err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(map_hound_err)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(map_hound_err)?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

fn map_hound_err(err: hound::Error) -> PermissionError {
    match err {
        hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
            PermissionError::NotFound
        }
        other => PermissionError::Device(other.to_string()),
    }
}

impl InputDevice for WavInput {
    fn open(
        &self,
        _constraints: &CaptureConstraints,
        producer: FrameProducer,
        connected: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        let (samples, sample_rate) = read_mono(&self.path)?;
        if sample_rate == 0 {
            return Err(PermissionError::Device("WAV header reports 0 Hz".into()).into());
        }
        info!(
            path = %self.path.display(),
            sample_rate,
            seconds = samples.len() as f64 / sample_rate as f64,
            "replaying WAV file as microphone"
        );

        let released = Arc::new(AtomicBool::new(false));
        let replay = Replay {
            samples,
            sample_rate,
            looped: self.looped,
            producer,
            connected,
            released: Arc::clone(&released),
        };
        let thread = std::thread::Builder::new()
            .name("wav-replay".into())
            .spawn(move || replay.run())?;

        Ok(Box::new(WavInputStream {
            sample_rate,
            released,
            thread: Some(thread),
        }))
    }
}

struct Replay {
    samples: Vec<f32>,
    sample_rate: u32,
    looped: bool,
    producer: FrameProducer,
    connected: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl Replay {
    fn run(mut self) {
        let frame_period = Duration::from_secs_f64(FRAME_SAMPLES as f64 / self.sample_rate as f64);
        let mut position = 0usize;
        let mut next_tick = Instant::now();

        while !self.released.load(Ordering::Acquire) {
            if position >= self.samples.len() {
                if self.looped && !self.samples.is_empty() {
                    position = 0;
                } else {
                    std::thread::sleep(IDLE_POLL);
                    next_tick = Instant::now();
                    continue;
                }
            }

            if !self.connected.load(Ordering::Relaxed) {
                std::thread::sleep(IDLE_POLL);
                next_tick = Instant::now();
                continue;
            }

            let end = (position + FRAME_SAMPLES).min(self.samples.len());
            let written = self.producer.push_slice(&self.samples[position..end]);
            if written < end - position {
                warn!("frame ring full: dropped {} samples", end - position - written);
            }
            position = end;

            next_tick += frame_period;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            } else {
                next_tick = now;
            }
        }
        debug!("WAV replay stopped");
    }
}

struct WavInputStream {
    sample_rate: u32,
    released: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for WavInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for WavInputStream {
    fn drop(&mut self) {
        self.released.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("WAV replay thread panicked");
            }
        }
    }
}
