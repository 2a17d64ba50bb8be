use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use super::{decode_to_mono_f32, resample_linear_mono};
use crate::config::MusicConfig;
use crate::error::{FortuneError, Result};
use crate::playback::{AudioClip, AudioOutput};

/// Output stream sample rate; clips are resampled to it.
const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Plays clips on a cpal output device.
///
/// Speech and background music use independent streams, so music keeps
/// going while turns play out.
pub struct DeviceOutput {
    device_name: Option<String>,
    current: Mutex<Option<Arc<AtomicBool>>>,
    background: Arc<AtomicBool>,
}

impl DeviceOutput {
    /// Open the named output device, or the default one.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available.
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let device = open_device(device_name.as_deref())?;
        let label = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {label}");

        Ok(Self {
            device_name,
            current: Mutex::new(None),
            background: Arc::new(AtomicBool::new(false)),
        })
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.background.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioOutput for DeviceOutput {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        if clip.is_empty() {
            return Err(FortuneError::Playback("empty clip".into()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        *self.current() = Some(Arc::clone(&stop));

        let clip = clip.clone();
        let device_name = self.device_name.clone();
        let result = tokio::task::spawn_blocking(move || {
            let (samples, rate) = decode_to_mono_f32(&clip)?;
            let samples = resample_linear_mono(&samples, rate, OUTPUT_SAMPLE_RATE);
            play_blocking(device_name.as_deref(), samples, 1.0, &stop)
        })
        .await
        .map_err(|e| FortuneError::Playback(format!("playback task failed: {e}")));

        *self.current() = None;
        result?
    }

    fn stop(&self) {
        if let Some(stop) = self.current().as_ref() {
            stop.store(true, Ordering::SeqCst);
        }
    }

    fn start_background(&self, clip: &AudioClip, music: &MusicConfig) -> Result<()> {
        let (samples, rate) = decode_to_mono_f32(clip)?;
        let samples = resample_linear_mono(&samples, rate, OUTPUT_SAMPLE_RATE);
        let volume = music.volume.clamp(0.0, 1.0);
        let looped = music.looped;
        let device_name = self.device_name.clone();
        let stop = Arc::clone(&self.background);

        std::thread::Builder::new()
            .name("fortune-music".into())
            .spawn(move || {
                loop {
                    if let Err(e) =
                        play_blocking(device_name.as_deref(), samples.clone(), volume, &stop)
                    {
                        warn!(error = %e, "background music stopped");
                        break;
                    }
                    if !looped || stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
            })
            .map_err(|e| FortuneError::Playback(format!("cannot start music thread: {e}")))?;
        info!(volume, looped, "background music started");
        Ok(())
    }
}

fn open_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| FortuneError::Playback(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
            .ok_or_else(|| FortuneError::Playback(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| FortuneError::Playback("no default output device".into())),
    }
}

struct StreamCursor {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Play mono samples until they run out or `stop` is raised.
fn play_blocking(
    device_name: Option<&str>,
    samples: Vec<f32>,
    volume: f32,
    stop: &AtomicBool,
) -> Result<()> {
    let device = open_device(device_name)?;
    let config = StreamConfig {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        buffer_size: cpal::BufferSize::Default,
    };

    let cursor = Arc::new(Mutex::new(StreamCursor {
        samples,
        position: 0,
        finished: false,
    }));
    let feed = Arc::clone(&cursor);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut cur) = feed.lock() else {
                    return;
                };
                for sample in data.iter_mut() {
                    if let Some(s) = cur.samples.get(cur.position).copied() {
                        *sample = s * volume;
                        cur.position += 1;
                    } else {
                        *sample = 0.0;
                        cur.finished = true;
                    }
                }
            },
            move |err| error!("audio output stream error: {err}"),
            None,
        )
        .map_err(|e| FortuneError::Playback(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| FortuneError::Playback(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(Duration::from_millis(10));
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let cur = cursor
            .lock()
            .map_err(|e| FortuneError::Playback(format!("playback cursor poisoned: {e}")))?;
        if cur.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}
