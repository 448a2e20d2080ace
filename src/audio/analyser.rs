//! Frequency analysis for level-meter visualization
//!
//! Mirrors the byte-frequency readout of a browser analyser node:
//! - Blackman-windowed FFT over the most recent `fft_size` samples
//! - One magnitude per bin (`fft_size / 2` bins)
//! - Temporal smoothing across calls to avoid visual jitter
//! - Decibel range mapped onto `0..=255`

use crate::error::{RecorderError, Result};
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use std::sync::Arc;

/// Configuration for analyser behavior
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyserConfig {
    /// Transform window size, a power of two
    pub fft_size: usize,
    /// Temporal smoothing factor (0.0-1.0, higher = smoother)
    pub smoothing: f32,
    /// Level mapped to 0
    pub min_decibels: f32,
    /// Level mapped to 255
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32768;

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || !(Self::MIN_FFT_SIZE..=Self::MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(RecorderError::Config(format!(
                "fft_size must be a power of two between {} and {}, got {}",
                Self::MIN_FFT_SIZE,
                Self::MAX_FFT_SIZE,
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(RecorderError::Config(format!(
                "smoothing must be within 0.0..=1.0, got {}",
                self.smoothing
            )));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(RecorderError::Config(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }

    /// Number of frequency bins per frame
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// Byte magnitude per frequency bin, lowest frequency first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmplitudeFrame {
    bins: Vec<u8>,
}

impl AmplitudeFrame {
    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Loudest bin
    pub fn peak(&self) -> u8 {
        self.bins.iter().copied().max().unwrap_or(0)
    }

    /// Mean bin magnitude normalized to [0.0, 1.0]
    pub fn level(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.bins.iter().map(|&b| u32::from(b)).sum();
        sum as f32 / (self.bins.len() as f32 * 255.0)
    }

    pub fn into_bins(self) -> Vec<u8> {
        self.bins
    }
}

impl From<Vec<u8>> for AmplitudeFrame {
    fn from(bins: Vec<u8>) -> Self {
        Self { bins }
    }
}

/// FFT-based analyser over a sliding window of recent samples
pub struct Analyser {
    config: AnalyserConfig,
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Analyser {
    /// Create an analyser, rejecting invalid configuration
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        config.validate()?;
        let n = config.fft_size;

        // Blackman window, periodic form
        let window = (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / n as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(n);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Ok(Self {
            history: vec![0.0; n],
            write_pos: 0,
            window,
            buffer: vec![Complex::default(); n],
            scratch,
            smoothed: vec![0.0; config.bin_count()],
            fft,
            config,
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    /// Feed newly captured samples into the analysis window
    ///
    /// Runs in O(samples); non-finite values are analysed as silence.
    pub fn push(&mut self, samples: &[f32]) {
        let n = self.history.len();
        let samples = if samples.len() > n {
            &samples[samples.len() - n..]
        } else {
            samples
        };

        for &sample in samples {
            self.history[self.write_pos] = if sample.is_finite() { sample } else { 0.0 };
            self.write_pos = (self.write_pos + 1) % n;
        }
    }

    /// Compute the current frame from the most recent `fft_size` samples
    pub fn frame(&mut self) -> AmplitudeFrame {
        let n = self.history.len();

        // Oldest sample sits at write_pos
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = self.history[(self.write_pos + i) % n];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let tau = self.config.smoothing;
        let min_db = self.config.min_decibels;
        let range = self.config.max_decibels - min_db;
        let bins = self
            .smoothed
            .iter_mut()
            .zip(self.buffer.iter())
            .map(|(prev, bin)| {
                let magnitude = bin.norm() / n as f32;
                *prev = tau * *prev + (1.0 - tau) * magnitude;
                let db = 20.0 * prev.log10();
                let scaled = 255.0 * (db - min_db) / range;
                // -inf for silent bins clamps to 0
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect();

        AmplitudeFrame { bins }
    }

    /// Forget captured samples and smoothing history
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }
}
