//! WAV encoding for captured sample buffers
//!
//! Turns a sequence of `f32` samples into a canonical RIFF/WAVE container:
//! a 44-byte header followed by mono 16-bit little-endian PCM.

use hound::{WavSpec, WavWriter};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Size of the RIFF/WAVE header preceding the PCM payload
pub const HEADER_LEN: usize = 44;

/// Largest sample count whose container size still fits the RIFF `u32` size field
pub const MAX_SAMPLES: usize = (u32::MAX as usize - 36) / 2;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;

/// An encoded recording, ready for playback or upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    bytes: Vec<u8>,
    sample_rate: u32,
}

impl AudioArtifact {
    /// Complete container bytes, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Total length in bytes (`44 + 2 * sample_count`)
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the artifact carries no PCM payload
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == HEADER_LEN
    }

    /// The PCM payload without the header
    pub fn pcm(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.pcm().len() / usize::from(BLOCK_ALIGN)
    }

    /// Playback length of the payload, zero when the rate is unknown (0 Hz)
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count() as f64 / f64::from(self.sample_rate))
    }

    /// Persist the artifact to disk, creating parent directories as needed
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.bytes)
    }
}

/// Map a float sample onto signed 16-bit PCM
///
/// The sample is clamped to [-1.0, 1.0]. Negative values scale by 32768 and
/// non-negative values by 32767, truncating toward zero, so -1.0 maps to
/// `i16::MIN` and 1.0 to `i16::MAX`. NaN maps to silence.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Encode samples as a mono 16-bit PCM WAV container
///
/// Never fails: an empty input produces a header-only artifact declaring a
/// data size of zero. Input beyond [`MAX_SAMPLES`] cannot be described by the
/// header and is dropped with a warning.
///
/// # Example
/// ```
/// use velvet_recorder::encode_wav;
///
/// let artifact = encode_wav(&[0.0; 16000], 16000); // one second of silence
/// assert_eq!(artifact.len(), 44 + 2 * 16000);
/// ```
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> AudioArtifact {
    let samples = cap_samples(samples, MAX_SAMPLES);
    let bytes = write_wav(samples, sample_rate)
        .expect("in-memory WAV writer cannot fail for at most MAX_SAMPLES samples");
    AudioArtifact { bytes, sample_rate }
}

/// Keep at most `limit` samples, warning when the input is cut short
fn cap_samples(samples: &[f32], limit: usize) -> &[f32] {
    if samples.len() > limit {
        log::warn!(
            "[encoder] {} samples exceed the WAV size limit, keeping the first {}",
            samples.len(),
            limit
        );
        return &samples[..limit];
    }
    samples
}

fn write_wav(samples: &[f32], sample_rate: u32) -> hound::Result<Vec<u8>> {
    let spec = WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::with_capacity(HEADER_LEN + samples.len() * usize::from(BLOCK_ALIGN));
    let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
    for &sample in samples {
        writer.write_sample(quantize(sample))?;
    }
    writer.finalize()?;
    Ok(bytes)
}
