//! Duplex headless host.
//!
//! Loads the stub engines behind a `SpeechClient`, speaks each `--say`
//! text in turn, optionally listens for `--listen-secs`, and prints every
//! client event to stdout as one JSON object per line.

mod settings;
mod transcript;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_core::{
    audio::{device, CpalInput, CpalOutput, InputDevice, WavInput},
    inference::stub::{StubRecognizer, ToneSynthesizer},
    ClientBackends, ClientEvent, ClientEventName, SpeechClient,
};
use parking_lot::Mutex;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::mpsc;
use tracing::{info, warn};
use transcript::TranscriptLog;

/// Longest a single utterance may take to play before we move on.
const SPEAK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Parser)]
#[command(name = "duplex", version, about = "Speak text and transcribe speech")]
struct Args {
    /// Settings file. Defaults to the per-user data directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text to speak; repeat for several utterances.
    #[arg(long = "say", value_name = "TEXT")]
    say: Vec<String>,

    /// Voice id for `--say` (overrides the configured default).
    #[arg(long)]
    voice: Option<u32>,

    /// Speech rate for `--say`, 0.25 to 4.0.
    #[arg(long)]
    speed: Option<f32>,

    /// Listen for this many seconds after speaking.
    #[arg(long, default_value_t = 0)]
    listen_secs: u64,

    /// Use a WAV file as the microphone.
    #[arg(long, value_name = "PATH")]
    input_wav: Option<PathBuf>,

    /// Replay `--input-wav` in a loop.
    #[arg(long)]
    loop_wav: bool,

    /// Microphone name (overrides the settings file).
    #[arg(long)]
    input_device: Option<String>,

    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Print the effective settings and exit.
    #[arg(long)]
    print_config: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("duplex=info,duplex_core=info")),
        )
        .init();

    let args = Args::parse();
    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if let Some(name) = args.input_device.clone() {
        settings.client.input_device = Some(name);
    }
    settings.normalize();

    if args.save_config {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }
    if args.list_devices {
        let devices: Vec<_> = device::list_input_devices()
            .into_iter()
            .chain(device::list_output_devices())
            .collect();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    info!("Duplex starting");
    let client = SpeechClient::new(settings.client.clone(), backends(&args, &settings));

    let transcript = Arc::new(Mutex::new(TranscriptLog::new()));
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<()>();
    for name in ClientEventName::ALL {
        if name == ClientEventName::SttPartial && !settings.show_partials {
            continue;
        }
        let transcript = Arc::clone(&transcript);
        let ended_tx = ended_tx.clone();
        client.subscribe(name, move |event| {
            match event {
                ClientEvent::SttFinal(text) => transcript.lock().push_final(text),
                ClientEvent::TtsEnd => {
                    let _ = ended_tx.send(());
                }
                _ => {}
            }
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("unprintable event: {e}"),
            }
        });
    }

    let outcome = run(&client, &args, &mut ended_rx).await;
    client.destroy();

    let transcript = transcript.lock();
    if !transcript.is_empty() {
        info!(utterances = transcript.len(), text = %transcript.text(), "transcript");
    }
    outcome
}

fn backends(args: &Args, settings: &AppSettings) -> ClientBackends {
    let input: Arc<dyn InputDevice> = match &args.input_wav {
        Some(path) => Arc::new(WavInput::new(path).looped(args.loop_wav)),
        None => Arc::new(CpalInput),
    };
    ClientBackends {
        recognizer: StubRecognizer::loader(settings.endpoint_samples),
        synthesizer: ToneSynthesizer::loader(settings.num_speakers),
        input,
        output: Arc::new(CpalOutput {
            preferred_device: settings.output_device.clone(),
        }),
    }
}

async fn run(
    client: &SpeechClient,
    args: &Args,
    ended_rx: &mut mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    client
        .initialize()
        .await
        .context("speech engines failed to load")?;

    for text in &args.say {
        while ended_rx.try_recv().is_ok() {}
        let Some(id) = client.speak(text, args.voice, args.speed) else {
            warn!(text = text.as_str(), "nothing spoken");
            continue;
        };
        info!(%id, "speaking");
        tokio::select! {
            ended = tokio::time::timeout(SPEAK_TIMEOUT, ended_rx.recv()) => {
                if ended.is_err() {
                    warn!(%id, "playback did not finish in time");
                    client.stop_speaking();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.stop_speaking();
                return Ok(());
            }
        }
    }

    if args.listen_secs > 0 {
        client
            .start_listening()
            .await
            .context("could not start listening")?;
        info!(seconds = args.listen_secs, "listening");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.listen_secs)) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        client.stop_listening();
    }
    Ok(())
}
