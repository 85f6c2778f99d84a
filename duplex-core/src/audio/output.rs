//! Speaker output.
//!
//! An `OutputContext` plays one `PlaybackBuffer` at a time and reports the
//! natural end of each buffer through its `on_ended` callback. Forced
//! `stop()` discards the pending callback, so callers only ever hear about
//! buffers that actually finished.

use crate::{audio::resample, error::Result};

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalOutput;

/// Invoked once when a buffer finishes playing on its own. Never invoked
/// from inside `play()`.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Mono f32 audio ready for the context it was created by.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A speaker backend. Contexts are created lazily by the playback pipeline.
pub trait OutputDevice: Send + Sync + 'static {
    /// Fail with `DuplexError::Capability` when playback cannot work here.
    fn check_support(&self) -> Result<()> {
        Ok(())
    }

    fn create_context(&self) -> Result<Box<dyn OutputContext>>;
}

pub trait OutputContext: Send {
    /// Rate buffers are played at.
    fn sample_rate(&self) -> u32;

    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Wrap synthesized audio, converting it to the context rate.
    fn create_buffer(&self, samples: Vec<f32>, sample_rate: u32) -> Result<PlaybackBuffer> {
        let target = self.sample_rate();
        if sample_rate == target {
            return Ok(PlaybackBuffer {
                samples,
                sample_rate,
            });
        }
        Ok(PlaybackBuffer {
            samples: resample::convert(&samples, sample_rate, target)?,
            sample_rate: target,
        })
    }

    /// Start `buffer`, replacing whatever is playing. `on_ended` fires once
    /// the last sample has been rendered.
    fn play(&mut self, buffer: PlaybackBuffer, on_ended: EndedCallback) -> Result<()>;

    /// Silence immediately. A no-op when nothing is playing.
    fn stop(&mut self);

    fn close(self: Box<Self>);
}

#[cfg(feature = "audio-cpal")]
mod cpal_output {
    use std::collections::HashMap;
    use std::sync::{mpsc, Arc};
    use std::thread::JoinHandle;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, Stream, StreamConfig,
    };
    use crossbeam_channel::{bounded, Receiver, Sender};
    use parking_lot::Mutex;
    use tracing::{debug, error, info, warn};

    use super::{EndedCallback, OutputContext, OutputDevice, PlaybackBuffer};
    use crate::error::{DuplexError, Result};

    /// The system speaker.
    #[derive(Debug, Clone, Default)]
    pub struct CpalOutput {
        /// Output device name; `None` selects the system default.
        pub preferred_device: Option<String>,
    }

    impl CpalOutput {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl OutputDevice for CpalOutput {
        fn create_context(&self) -> Result<Box<dyn OutputContext>> {
            let ctx = CpalOutputContext::open(self.preferred_device.clone())?;
            Ok(Box::new(ctx))
        }
    }

    /// What the render callback reads from.
    #[derive(Default)]
    struct Voice {
        samples: Vec<f32>,
        position: usize,
        token: u64,
        active: bool,
        /// Finished token the dispatcher has not accepted yet.
        undelivered: Option<u64>,
    }

    impl Voice {
        /// Fill `data` with interleaved frames. Returns the buffer's token
        /// when this call rendered its last sample.
        fn render(&mut self, data: &mut [f32], channels: usize) -> Option<u64> {
            for frame in data.chunks_mut(channels.max(1)) {
                let sample = if self.active && self.position < self.samples.len() {
                    let s = self.samples[self.position];
                    self.position += 1;
                    s
                } else {
                    0.0
                };
                frame.fill(sample);
            }
            if self.active && self.position >= self.samples.len() {
                self.active = false;
                return Some(self.token);
            }
            None
        }

        /// Hand finished tokens to the dispatcher without blocking. A full
        /// channel keeps the newest token for the next callback.
        fn notify(&mut self, finished: Option<u64>, ended_tx: &Sender<u64>) {
            if let Some(token) = self.undelivered.take() {
                if let Err(e) = ended_tx.try_send(token) {
                    if finished.is_none() {
                        self.undelivered = Some(e.into_inner());
                        return;
                    }
                    error!(token, "ended notification superseded before delivery");
                }
            }
            if let Some(token) = finished {
                if ended_tx.try_send(token).is_err() {
                    error!(token, "ended notification channel full, retrying");
                    self.undelivered = Some(token);
                }
            }
        }
    }

    type PendingMap = Arc<Mutex<HashMap<u64, EndedCallback>>>;

    struct CpalOutputContext {
        sample_rate: u32,
        voice: Arc<Mutex<Voice>>,
        pending: PendingMap,
        next_token: u64,
        release_tx: Option<mpsc::Sender<()>>,
        device_thread: Option<JoinHandle<()>>,
        dispatch_thread: Option<JoinHandle<()>>,
    }

    impl CpalOutputContext {
        fn open(preferred: Option<String>) -> Result<Self> {
            let voice = Arc::new(Mutex::new(Voice::default()));
            let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
            // Tokens of buffers that ran to completion.
            let (ended_tx, ended_rx) = bounded::<u64>(16);
            let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();
            let (release_tx, release_rx) = mpsc::channel::<()>();

            let voice_cb = Arc::clone(&voice);
            let device_thread = std::thread::Builder::new()
                .name("playback-device".into())
                .spawn(move || {
                    let stream = match open_stream(voice_cb, ended_tx, preferred.as_deref()) {
                        Ok((stream, rate)) => {
                            let _ = open_tx.send(Ok(rate));
                            stream
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = release_rx.recv();
                    drop(stream);
                    debug!("output stream released");
                })?;

            let sample_rate = match open_rx.recv() {
                Ok(Ok(rate)) => rate,
                Ok(Err(e)) => {
                    let _ = device_thread.join();
                    return Err(e);
                }
                Err(_) => {
                    return Err(DuplexError::AudioStream(
                        "playback thread exited before opening the device".into(),
                    ))
                }
            };

            let dispatch_pending = Arc::clone(&pending);
            let dispatch_thread = std::thread::Builder::new()
                .name("playback-ended".into())
                .spawn(move || dispatch_ended(ended_rx, dispatch_pending))?;

            Ok(Self {
                sample_rate,
                voice,
                pending,
                next_token: 0,
                release_tx: Some(release_tx),
                device_thread: Some(device_thread),
                dispatch_thread: Some(dispatch_thread),
            })
        }
    }

    /// Runs callbacks off the audio thread. Exits when the stream is gone.
    fn dispatch_ended(ended_rx: Receiver<u64>, pending: PendingMap) {
        for token in ended_rx.iter() {
            let callback = pending.lock().remove(&token);
            if let Some(on_ended) = callback {
                on_ended();
            }
        }
    }

    impl OutputContext for CpalOutputContext {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn play(&mut self, buffer: PlaybackBuffer, on_ended: EndedCallback) -> Result<()> {
            self.next_token += 1;
            let token = self.next_token;

            // Register before the callback can observe the new voice. The
            // replaced buffer never ends on its own, so its callback goes.
            {
                let mut pending = self.pending.lock();
                pending.clear();
                pending.insert(token, on_ended);
            }

            let mut voice = self.voice.lock();
            voice.samples = buffer.samples;
            voice.position = 0;
            voice.token = token;
            voice.active = true;
            Ok(())
        }

        fn stop(&mut self) {
            {
                let mut voice = self.voice.lock();
                voice.active = false;
                voice.samples.clear();
                voice.position = 0;
                voice.undelivered = None;
            }
            self.pending.lock().clear();
        }

        fn close(mut self: Box<Self>) {
            self.stop();
            drop(self);
        }
    }

    impl Drop for CpalOutputContext {
        fn drop(&mut self) {
            if let Some(tx) = self.release_tx.take() {
                let _ = tx.send(());
            }
            if let Some(thread) = self.device_thread.take() {
                if thread.join().is_err() {
                    warn!("playback device thread panicked");
                }
            }
            if let Some(thread) = self.dispatch_thread.take() {
                // Dropped from inside an `on_ended` callback: the dispatcher
                // exits on its own once the stream is gone.
                if thread.thread().id() == std::thread::current().id() {
                    return;
                }
                if thread.join().is_err() {
                    warn!("playback dispatch thread panicked");
                }
            }
        }
    }

    fn select_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
        if let Some(preferred_name) = preferred {
            if let Ok(mut devices) = host.output_devices() {
                if let Some(device) = devices.find(|d| {
                    d.name().map(|n| n == preferred_name).unwrap_or(false)
                }) {
                    return Ok(device);
                }
            }
            warn!("preferred output device '{}' not found, falling back", preferred_name);
        }
        host.default_output_device().ok_or(DuplexError::NoOutputDevice)
    }

    fn open_stream(
        voice: Arc<Mutex<Voice>>,
        ended_tx: Sender<u64>,
        preferred: Option<&str>,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        let device = select_device(&host, preferred)?;

        let supported = device
            .default_output_config()
            .map_err(|e| DuplexError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate();

        // The mixer renders f32; find an f32 config at the default rate.
        let supported = if supported.sample_format() == SampleFormat::F32 {
            supported
        } else {
            device
                .supported_output_configs()
                .map_err(|e| DuplexError::AudioDevice(e.to_string()))?
                .find(|range| {
                    range.sample_format() == SampleFormat::F32
                        && range.min_sample_rate() <= sample_rate
                        && range.max_sample_rate() >= sample_rate
                })
                .map(|range| range.with_sample_rate(sample_rate))
                .ok_or_else(|| {
                    DuplexError::AudioDevice("no f32 output configuration available".into())
                })?
        };

        let channels = supported.channels().max(1) as usize;
        let config: StreamConfig = supported.config();

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate = config.sample_rate.0,
            channels,
            "opening output device"
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    // Never wait on play() or stop() from the audio thread.
                    let Some(mut voice) = voice.try_lock() else {
                        data.fill(0.0);
                        return;
                    };
                    let finished = voice.render(data, channels);
                    voice.notify(finished, &ended_tx);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| DuplexError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DuplexError::AudioStream(e.to_string()))?;

        Ok((stream, config.sample_rate.0))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn voice_with(samples: Vec<f32>, token: u64) -> Voice {
            Voice {
                samples,
                token,
                active: true,
                ..Voice::default()
            }
        }

        #[test]
        fn render_duplicates_mono_across_channels_and_reports_the_end() {
            let mut voice = voice_with(vec![0.5, -0.5, 0.25], 7);
            let mut data = [1.0f32; 4];
            assert_eq!(voice.render(&mut data, 2), None);
            assert_eq!(data, [0.5, 0.5, -0.5, -0.5]);

            let mut data = [1.0f32; 4];
            assert_eq!(voice.render(&mut data, 2), Some(7));
            assert_eq!(data, [0.25, 0.25, 0.0, 0.0]);

            let mut data = [1.0f32; 4];
            assert_eq!(voice.render(&mut data, 2), None);
            assert_eq!(data, [0.0; 4]);
        }

        #[test]
        fn full_channel_keeps_the_token_for_the_next_callback() {
            let (tx, rx) = bounded::<u64>(1);
            tx.send(99).unwrap();

            let mut voice = voice_with(vec![0.1], 3);
            let mut data = [0.0f32; 2];
            let finished = voice.render(&mut data, 1);
            voice.notify(finished, &tx);
            assert_eq!(voice.undelivered, Some(3));

            assert_eq!(rx.recv().unwrap(), 99);
            let finished = voice.render(&mut data, 1);
            assert_eq!(finished, None);
            voice.notify(finished, &tx);
            assert_eq!(voice.undelivered, None);
            assert_eq!(rx.try_recv().unwrap(), 3);
        }

        #[test]
        fn dispatcher_runs_only_registered_callbacks() {
            let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
            let (fired_tx, fired_rx) = mpsc::channel::<u64>();
            for token in [1u64, 2] {
                let fired_tx = fired_tx.clone();
                pending
                    .lock()
                    .insert(token, Box::new(move || fired_tx.send(token).unwrap()));
            }
            let (tx, rx) = bounded::<u64>(4);
            tx.send(2).unwrap();
            tx.send(5).unwrap();
            drop(tx);

            dispatch_ended(rx, Arc::clone(&pending));
            assert_eq!(fired_rx.try_iter().collect::<Vec<_>>(), vec![2]);
            assert!(pending.lock().contains_key(&1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRate(u32);

    impl OutputContext for FixedRate {
        fn sample_rate(&self) -> u32 {
            self.0
        }
        fn play(&mut self, _buffer: PlaybackBuffer, _on_ended: EndedCallback) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn close(self: Box<Self>) {}
    }

    #[test]
    fn create_buffer_passes_matching_rate_through() {
        let ctx = FixedRate(22_050);
        let buffer = ctx.create_buffer(vec![0.1, 0.2, 0.3], 22_050).unwrap();
        assert_eq!(buffer.samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.sample_rate, 22_050);
    }

    #[test]
    fn create_buffer_converts_to_context_rate() {
        let ctx = FixedRate(48_000);
        let buffer = ctx.create_buffer(vec![0.0; 24_000], 24_000).unwrap();
        assert_eq!(buffer.sample_rate, 48_000);
        approx::assert_abs_diff_eq!(buffer.duration_secs(), 1.0, epsilon = 0.05);
    }
}
