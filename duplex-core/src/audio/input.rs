//! Microphone capture via cpal.
//!
//! The input callback downmixes to mono and writes straight into the frame
//! ring while the `connected` flag is set. Clearing the flag "disconnects"
//! the capture stage without closing the device, so a restart needs no new
//! permission grant.

#[cfg(feature = "audio-cpal")]
pub use cpal_input::CpalInput;

#[cfg(feature = "audio-cpal")]
mod cpal_input {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    };
    use std::thread::JoinHandle;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SampleRate, Stream, StreamConfig,
    };
    use tracing::{debug, error, info, warn};

    use crate::{
        audio::{CaptureConstraints, InputDevice, InputStream},
        buffering::{FrameProducer, Producer},
        error::{DuplexError, PermissionError, Result},
    };

    /// The system microphone.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CpalInput;

    impl InputDevice for CpalInput {
        fn open(
            &self,
            constraints: &CaptureConstraints,
            producer: FrameProducer,
            connected: Arc<AtomicBool>,
        ) -> Result<Box<dyn InputStream>> {
            if constraints.echo_cancellation
                || constraints.noise_suppression
                || constraints.auto_gain_control
            {
                debug!("cpal exposes no voice processing; capturing raw input");
            }

            let preferred = constraints.preferred_device.clone();
            // Carries the native sample rate on success.
            let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();
            let (release_tx, release_rx) = mpsc::channel::<()>();

            let thread = std::thread::Builder::new()
                .name("capture-device".into())
                .spawn(move || {
                    let stream = match open_stream(producer, connected, preferred.as_deref()) {
                        Ok((stream, rate)) => {
                            let _ = open_tx.send(Ok(rate));
                            stream
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                    // Park until released; the stream must drop on this thread.
                    let _ = release_rx.recv();
                    drop(stream);
                    debug!("input stream released");
                })?;

            match open_rx.recv() {
                Ok(Ok(sample_rate)) => Ok(Box::new(CpalInputStream {
                    sample_rate,
                    release_tx: Some(release_tx),
                    thread: Some(thread),
                })),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => Err(DuplexError::AudioStream(
                    "capture thread exited before opening the device".into(),
                )),
            }
        }
    }

    struct CpalInputStream {
        sample_rate: u32,
        release_tx: Option<mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl InputStream for CpalInputStream {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn close(self: Box<Self>) {
            drop(self);
        }
    }

    impl Drop for CpalInputStream {
        fn drop(&mut self) {
            if let Some(tx) = self.release_tx.take() {
                let _ = tx.send(());
            }
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("capture device thread panicked");
                }
            }
        }
    }

    fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(preferred_name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    }) {
                        return Ok(device);
                    }
                    warn!(
                        "preferred input device '{}' not found, falling back",
                        preferred_name
                    );
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }

        if let Some(default) = host.default_input_device() {
            return Ok(default);
        }

        let mut devices = host
            .input_devices()
            .map_err(|e| PermissionError::Device(e.to_string()))?;
        let fallback = devices.next().ok_or(PermissionError::NotFound)?;
        warn!("no default input device, falling back to first available input");
        Ok(fallback)
    }

    fn open_stream(
        producer: FrameProducer,
        connected: Arc<AtomicBool>,
        preferred: Option<&str>,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        let device = select_device(&host, preferred)?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device.default_input_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => PermissionError::NotFound,
            other => PermissionError::Device(other.to_string()),
        })?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build::<f32>(&device, &config, producer, connected, |s| s),
            SampleFormat::I16 => {
                build::<i16>(&device, &config, producer, connected, |s| s as f32 / 32768.0)
            }
            SampleFormat::U8 => build::<u8>(&device, &config, producer, connected, |s| {
                (s as f32 - 128.0) / 128.0
            }),
            fmt => {
                return Err(DuplexError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => PermissionError::NotFound,
            other => PermissionError::Device(other.to_string()),
        })?;

        stream
            .play()
            .map_err(|e| DuplexError::AudioStream(e.to_string()))?;

        Ok((stream, sample_rate))
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: FrameProducer,
        connected: Arc<AtomicBool>,
        to_f32: fn(T) -> f32,
    ) -> std::result::Result<Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample + Send + 'static,
    {
        let ch = config.channels.max(1) as usize;
        // Grows on the first callbacks only, then reused.
        let mut mix_buf: Vec<f32> = Vec::new();

        device.build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !connected.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                for (f, out) in mix_buf.iter_mut().enumerate() {
                    let base = f * ch;
                    let sum: f32 = data[base..base + ch].iter().map(|s| to_f32(*s)).sum();
                    *out = sum / ch as f32;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!("frame ring full: dropped {} samples", mix_buf.len() - written);
                }
            },
            |err| error!("audio input stream error: {err}"),
            None,
        )
    }
}
