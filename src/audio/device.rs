//! Audio capture devices
//!
//! [`CaptureDevice`] and [`LiveStream`] are the seam between a recording
//! session and the host audio stack. [`CpalDevice`] implements them with CPAL
//! (Cross-Platform Audio Library), delivering fixed-size mono chunks.

use crate::error::{RecorderError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Samples per delivered chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Callback receiving each fixed-size block of mono samples
///
/// Invoked on the host audio thread; it must not block.
pub type ChunkSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A live, exclusively held input stream
pub trait LiveStream {
    /// Native sample rate of the stream, fixed for its lifetime
    fn sample_rate(&self) -> u32;

    /// Route subsequent chunks to `sink`, replacing any previous subscriber
    fn subscribe(&mut self, sink: ChunkSink);

    /// Route every raw host buffer, downmixed to mono, to `analysis`
    ///
    /// Buffers reach the tap as they arrive, before re-blocking into chunks,
    /// so analysis keeps pace with the host callback rate.
    fn tap(&mut self, analysis: ChunkSink);

    /// Disconnect the subscriber and close the underlying device handles
    ///
    /// Once this returns no further buffer reaches the sink or the tap. Releasing a stream
    /// that is already gone is a no-op.
    fn release(&mut self) -> Result<()>;
}

/// Something that can hand out a live microphone stream
pub trait CaptureDevice {
    type Stream: LiveStream;

    /// Request exclusive access to the input device
    ///
    /// Fails with [`RecorderError::DeviceUnavailable`] when permission is
    /// denied or no input device exists.
    fn acquire(&mut self) -> Result<Self::Stream>;
}

/// Re-blocks arbitrarily sized host buffers into fixed-size chunks
///
/// A trailing partial block is held until enough samples arrive and is never
/// emitted on its own.
pub struct Rechunker {
    chunk_size: usize,
    pending: Vec<f32>,
}

impl Rechunker {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
        }
    }

    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = f32>,
        F: FnMut(&[f32]),
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.chunk_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the next full chunk
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Information about an available audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<String>,
}

type SharedSink = Arc<Mutex<Option<ChunkSink>>>;

/// Subscriber slots read by the audio callback
#[derive(Clone, Default)]
struct StreamOutputs {
    sink: SharedSink,
    tap: SharedSink,
}

impl StreamOutputs {
    fn disconnect(&self) {
        for slot in [&self.tap, &self.sink] {
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
    }
}

/// CPAL-backed input device
#[derive(Debug, Clone)]
pub struct CpalDevice {
    device_name: Option<String>,
    sample_rate: Option<u32>,
    chunk_size: usize,
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDevice {
    /// System default input at its native sample rate
    pub fn new() -> Self {
        Self {
            device_name: None,
            sample_rate: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Select an input device by name; `None` uses the system default
    pub fn with_device_name(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    /// Request a sample rate instead of the device's native one
    pub fn with_sample_rate(mut self, sample_rate: Option<u32>) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// List all available audio input devices
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(unavailable)?;
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut device_infos = Vec::new();

        for device in devices {
            let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
            let is_default = default_name.as_deref() == Some(name.as_str());

            let configs: Vec<_> = match device.supported_input_configs() {
                Ok(configs) => configs.collect(),
                Err(e) => {
                    log::debug!("[device] Skipping configs for {}: {}", name, e);
                    Vec::new()
                }
            };

            let mut supported_sample_rates: Vec<u32> =
                configs.iter().map(|c| c.max_sample_rate().0).collect();
            supported_sample_rates.sort_unstable();
            supported_sample_rates.dedup();

            let mut supported_formats: Vec<String> = configs
                .iter()
                .map(|c| format!("{:?}", c.sample_format()))
                .collect();
            supported_formats.sort();
            supported_formats.dedup();

            device_infos.push(AudioDeviceInfo {
                name,
                is_default,
                supported_sample_rates,
                supported_formats,
            });
        }

        Ok(device_infos)
    }

    fn open_device(&self) -> Result<Device> {
        let host = cpal::default_host();

        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(unavailable)?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| {
                    RecorderError::DeviceUnavailable(format!("audio device '{}' not found", name))
                }),
            None => host.default_input_device().ok_or_else(|| {
                RecorderError::DeviceUnavailable("no default input device found".to_string())
            }),
        }
    }

    /// Find the supported configuration closest to the target sample rate
    fn closest_config(device: &Device, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
        let mut best = None;
        let mut best_diff = u32::MAX;

        for range in device.supported_input_configs().map_err(unavailable)? {
            let rate = target_sample_rate
                .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            let diff = rate.abs_diff(target_sample_rate);
            if diff < best_diff {
                best_diff = diff;
                best = Some(range.with_sample_rate(cpal::SampleRate(rate)));
            }
        }

        best.ok_or_else(|| {
            RecorderError::DeviceUnavailable("no suitable audio configuration found".to_string())
        })
    }
}

impl CaptureDevice for CpalDevice {
    type Stream = CpalStream;

    fn acquire(&mut self) -> Result<CpalStream> {
        let device = self.open_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());

        let supported = match self.sample_rate {
            Some(rate) => Self::closest_config(&device, rate)?,
            None => device.default_input_config().map_err(unavailable)?,
        };
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        log::info!(
            "[device] Opening {}: {} Hz, {} channel(s), {:?}",
            device_name,
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let outputs = StreamOutputs::default();
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, outputs.clone(), self.chunk_size),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, outputs.clone(), self.chunk_size),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, outputs.clone(), self.chunk_size),
            other => Err(RecorderError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            ))),
        }?;

        stream.play().map_err(unavailable)?;

        Ok(CpalStream {
            stream: Some(stream),
            outputs,
            sample_rate: config.sample_rate.0,
        })
    }
}

/// A playing CPAL input stream
pub struct CpalStream {
    stream: Option<cpal::Stream>,
    outputs: StreamOutputs,
    sample_rate: u32,
}

impl LiveStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn subscribe(&mut self, sink: ChunkSink) {
        *self.outputs.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn tap(&mut self, analysis: ChunkSink) {
        *self.outputs.tap.lock().unwrap_or_else(PoisonError::into_inner) = Some(analysis);
    }

    fn release(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        // Disconnect first so a callback racing the pause sees no subscriber
        self.outputs.disconnect();

        let paused = stream
            .pause()
            .map_err(|e| RecorderError::Stream(format!("failed to pause input stream: {}", e)));
        drop(stream);
        log::debug!("[device] Input stream closed");
        paused
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("[device] {}", e);
        }
    }
}

/// Build an input stream forwarding channel 0 of each frame as f32
///
/// Each host buffer goes to the tap whole, then to the sink in fixed-size chunks.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    outputs: StreamOutputs,
    chunk_size: usize,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut rechunker = Rechunker::new(chunk_size);
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(
                    data.chunks(channels)
                        .map(|frame| -> f32 { cpal::Sample::from_sample(frame[0]) }),
                );

                if let Some(analysis) = outputs
                    .tap
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                {
                    analysis(mono.as_slice());
                }

                let mut guard = outputs.sink.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(on_chunk) = guard.as_mut() {
                    rechunker.push(mono.iter().copied(), |chunk| on_chunk(chunk));
                }
            },
            |err| {
                log::warn!("[device] Input stream error: {}", err);
            },
            None,
        )
        .map_err(unavailable)
}

fn unavailable<E: std::fmt::Display>(err: E) -> RecorderError {
    RecorderError::DeviceUnavailable(err.to_string())
}
