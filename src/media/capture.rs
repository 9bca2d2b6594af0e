//! Mikrofon-Aufnahme mit cpal
//!
//! Öffnet das Standard-Eingabegerät und schreibt die Samples (auf 48kHz
//! resampelt) in einen Ring-Buffer, aus dem die Tracks Frames lesen.

use super::gate::{Capture, LocalMedia, MediaAccessError, MediaGate};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für Opus)
pub const SAMPLE_RATE: u32 = 48000;

/// Frame Size in Samples (20ms @ 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;

/// Buffer Size für den Capture-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// CPAL MEDIA GATE
// ============================================================================

/// MediaGate für das Standard-Mikrofon des Systems
#[derive(Debug, Default, Clone)]
pub struct CpalMediaGate;

impl CpalMediaGate {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaGate for CpalMediaGate {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError> {
        // Geräte-Setup blockiert, daher außerhalb des Runtime-Threads
        let capture = tokio::task::spawn_blocking(CpalCapture::open)
            .await
            .map_err(|e| MediaAccessError::Stream(e.to_string()))??;

        let media = LocalMedia::new(Box::new(capture));
        tracing::info!("Microphone acquired as {}", media.stream_id());
        Ok(media)
    }
}

// ============================================================================
// CPAL CAPTURE
// ============================================================================

/// cpal `Stream` ist nicht auf allen Plattformen `Send`
struct SendStream(Stream);

// SAFETY: der Stream wird nach dem Start nur noch gedroppt, nie benutzt,
// und das Droppen ist auf allen cpal-Backends threadsicher.
unsafe impl Send for SendStream {}

struct CpalCapture {
    stream: SendStream,
    capture_buffer: Arc<Mutex<HeapRb<f32>>>,
}

impl CpalCapture {
    fn open() -> Result<Self, MediaAccessError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaAccessError::NoInputDevice)?;

        let config = find_best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capture_buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(RING_BUFFER_SIZE)));

        let buffer = Arc::clone(&capture_buffer);
        let source_sample_rate = config.sample_rate.0;
        let channels = config.channels.max(1) as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if data.is_empty() {
                        return;
                    }

                    // Nur der erste Kanal wird verwendet (Mono für Voice)
                    let mono: Vec<f32> = data.chunks(channels).map(|frame| frame[0]).collect();
                    let samples = resample(&mono, source_sample_rate, SAMPLE_RATE);

                    let mut buffer = buffer.lock();
                    for sample in samples {
                        let _ = buffer.try_push(sample);
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| {
                if matches!(e, cpal::BuildStreamError::DeviceNotAvailable) {
                    MediaAccessError::Denied(e.to_string())
                } else {
                    MediaAccessError::Stream(e.to_string())
                }
            })?;

        stream
            .play()
            .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

        Ok(Self {
            stream: SendStream(stream),
            capture_buffer,
        })
    }
}

impl Capture for CpalCapture {
    fn stop(self: Box<Self>) {
        if let Err(e) = self.stream.0.pause() {
            tracing::debug!("Pausing capture stream failed: {}", e);
        }
        tracing::info!("Audio capture stopped");
    }

    fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.capture_buffer.lock();
        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }
        Some((0..FRAME_SIZE).filter_map(|_| buffer.try_pop()).collect())
    }
}

/// Einfaches lineares Resampling
fn resample(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaAccessError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| MediaAccessError::Denied(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Priorität: 48kHz > andere Rate, F32 > andere Formate
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Result<StreamConfig, MediaAccessError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);

    let supports_target = |c: &SupportedStreamConfigRange| {
        c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate
    };

    if let Some(config) = configs
        .iter()
        .find(|&c| supports_target(c) && c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    if let Some(config) = configs
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.clone().with_max_sample_rate().into());
    }

    Err(MediaAccessError::UnsupportedConfig(
        "no f32 input configuration available".to_string(),
    ))
}
