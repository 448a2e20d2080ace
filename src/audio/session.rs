//! Recording session lifecycle
//!
//! A [`RecordingSession`] owns one microphone-capture episode:
//!
//! ```text
//! Idle -> Acquiring -> Active -> Finalizing -> Stopped
//!             |           \
//!           Failed      Cancelled
//! ```
//!
//! No transition leaves `Stopped`, `Cancelled` or `Failed`; record again with
//! a new session.

use super::analyser::{AmplitudeFrame, Analyser, AnalyserConfig};
use super::device::{CaptureDevice, LiveStream};
use super::encoder::{AudioArtifact, MAX_SAMPLES, encode_wav};
use crate::error::{RecorderError, Result};
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Active,
    Finalizing,
    Stopped,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Active => "active",
            SessionState::Finalizing => "finalizing",
            SessionState::Stopped => "stopped",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared with the chunk sink running on the audio thread
#[derive(Debug)]
struct Capture {
    state: SessionState,
    chunks: Vec<Vec<f32>>,
    total_samples: usize,
    dropped_chunks: usize,
}

impl Capture {
    /// Buffer a chunk if the session is still accepting audio
    fn accept(&mut self, chunk: &[f32]) {
        if self.state != SessionState::Active {
            return;
        }
        if self.total_samples + chunk.len() > MAX_SAMPLES {
            if self.dropped_chunks == 0 {
                log::warn!("Recording reached the maximum WAV length, dropping further audio");
            }
            self.dropped_chunks += 1;
            return;
        }
        self.chunks.push(chunk.to_vec());
        self.total_samples += chunk.len();
    }

    /// Take the buffered chunks, leaving the buffer empty
    fn drain(&mut self) -> (Vec<Vec<f32>>, usize) {
        let chunks = mem::take(&mut self.chunks);
        let total = mem::replace(&mut self.total_samples, 0);
        (chunks, total)
    }
}

/// Analyser fed by the stream tap, polled from the redraw loop
struct AnalysisTap {
    analyser: Arc<Mutex<Analyser>>,
    last_frame: AmplitudeFrame,
}

impl AnalysisTap {
    fn new(config: AnalyserConfig) -> Result<Self> {
        let analyser = Analyser::new(config)?;
        Ok(Self {
            last_frame: AmplitudeFrame::default(),
            analyser: Arc::new(Mutex::new(analyser)),
        })
    }

    /// Compute a fresh frame, or repeat the last one if the audio thread holds the lock
    fn poll(&mut self) -> AmplitudeFrame {
        let frame = match self.analyser.try_lock() {
            Ok(mut analyser) => Some(analyser.frame()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().frame()),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(frame) = frame {
            self.last_frame = frame;
        }
        self.last_frame.clone()
    }

    fn reset(&mut self) {
        lock(&self.analyser).reset();
        self.last_frame = AmplitudeFrame::default();
    }
}

/// One microphone-capture episode
pub struct RecordingSession<D: CaptureDevice> {
    id: Uuid,
    device: D,
    stream: Option<D::Stream>,
    capture: Arc<Mutex<Capture>>,
    tap: AnalysisTap,
    sample_rate: Option<u32>,
    started_at: Option<Instant>,
}

impl<D: CaptureDevice> RecordingSession<D> {
    /// Create an idle session; the analyser configuration is validated here
    pub fn new(device: D, analyser_config: AnalyserConfig) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            device,
            stream: None,
            capture: Arc::new(Mutex::new(Capture {
                state: SessionState::Idle,
                chunks: Vec::new(),
                total_samples: 0,
                dropped_chunks: 0,
            })),
            tap: AnalysisTap::new(analyser_config)?,
            sample_rate: None,
            started_at: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.capture).state
    }

    /// Sample rate fixed when the stream was acquired
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Samples buffered so far
    pub fn total_samples(&self) -> usize {
        lock(&self.capture).total_samples
    }

    /// Time spent recording, while active
    pub fn elapsed(&self) -> Option<Duration> {
        match self.state() {
            SessionState::Active => self.started_at.map(|t| t.elapsed()),
            _ => None,
        }
    }

    /// Acquire the input device and begin buffering
    ///
    /// On failure the session becomes [`SessionState::Failed`] without any
    /// acquired resources; start a new session to try again.
    pub fn start(&mut self) -> Result<()> {
        self.transition("start", SessionState::Acquiring)?;

        let mut stream = match self.device.acquire() {
            Ok(stream) => stream,
            Err(err) => {
                self.set_state(SessionState::Failed);
                log::warn!("[session {}] Failed to acquire input: {}", self.id, err);
                return Err(match err {
                    e @ RecorderError::DeviceUnavailable(_) => e,
                    other => RecorderError::DeviceUnavailable(other.to_string()),
                });
            }
        };

        let sample_rate = stream.sample_rate();
        if sample_rate == 0 {
            if let Err(e) = stream.release() {
                log::warn!("[session {}] Release failed: {}", self.id, e);
            }
            self.set_state(SessionState::Failed);
            return Err(RecorderError::DeviceUnavailable(
                "device reported a sample rate of 0 Hz".to_string(),
            ));
        }

        self.sample_rate = Some(sample_rate);
        self.started_at = Some(Instant::now());
        self.set_state(SessionState::Active);

        let capture = self.capture.clone();
        stream.subscribe(Box::new(move |chunk: &[f32]| {
            // Check and append under one lock so teardown cannot interleave
            lock(&capture).accept(chunk);
        }));

        let capture = self.capture.clone();
        let analyser = self.tap.analyser.clone();
        stream.tap(Box::new(move |buffer: &[f32]| {
            if lock(&capture).state == SessionState::Active {
                lock(&analyser).push(buffer);
            }
        }));
        self.stream = Some(stream);

        log::info!("[session {}] Recording at {} Hz", self.id, sample_rate);
        Ok(())
    }

    /// Latest amplitude frame, or `None` unless the session is active
    ///
    /// Meant to be called once per redraw; never blocks on the audio thread.
    pub fn amplitude_frame(&mut self) -> Option<AmplitudeFrame> {
        if self.state() != SessionState::Active {
            return None;
        }
        Some(self.tap.poll())
    }

    /// Finish recording and encode everything captured
    ///
    /// The input is released before the buffer is read, so no chunk can land
    /// after finalization begins. A second call fails with
    /// [`RecorderError::InvalidState`].
    pub fn stop(&mut self) -> Result<AudioArtifact> {
        self.transition("stop", SessionState::Finalizing)?;
        self.release_stream();

        let (chunks, total) = lock(&self.capture).drain();
        let samples = merge_chunks(chunks, total);
        let sample_rate = self.sample_rate.unwrap_or_default();
        let artifact = encode_wav(&samples, sample_rate);

        self.set_state(SessionState::Stopped);
        log::info!(
            "[session {}] Stopped: {} samples, {:.2}s, {} bytes",
            self.id,
            artifact.sample_count(),
            artifact.duration().as_secs_f32(),
            artifact.len()
        );
        Ok(artifact)
    }

    /// Abandon the recording, discarding buffered audio
    pub fn cancel(&mut self) -> Result<()> {
        self.transition("cancel", SessionState::Cancelled)?;
        self.release_stream();

        let (_, total) = lock(&self.capture).drain();
        self.tap.reset();

        log::info!("[session {}] Cancelled, discarded {} samples", self.id, total);
        Ok(())
    }

    /// Move out of `Active` (or `Idle` for start) atomically with respect to the sink
    fn transition(&self, operation: &'static str, next: SessionState) -> Result<()> {
        let required = match next {
            SessionState::Acquiring => SessionState::Idle,
            _ => SessionState::Active,
        };

        let mut capture = lock(&self.capture);
        if capture.state != required {
            return Err(RecorderError::InvalidState {
                operation,
                state: capture.state,
            });
        }
        capture.state = next;
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.capture).state = state;
    }

    /// Best-effort release; failures are logged, never propagated
    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.release()
        {
            log::warn!("[session {}] Release failed: {}", self.id, e);
        }
    }
}

impl<D: CaptureDevice> Drop for RecordingSession<D> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            log::info!("[session {}] Dropped while {}, releasing input", self.id, self.state());
            self.set_state(SessionState::Cancelled);
            self.release_stream();
        }
    }
}

/// Concatenate chunks in arrival order with a single allocation
fn merge_chunks(chunks: Vec<Vec<f32>>, total: usize) -> Vec<f32> {
    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        samples.extend_from_slice(&chunk);
    }
    samples
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{DeviceHandle, ScriptedDevice};

    fn active_session(sample_rate: u32) -> (RecordingSession<ScriptedDevice>, DeviceHandle) {
        let (device, handle) = ScriptedDevice::new(sample_rate);
        let mut session = RecordingSession::new(device, AnalyserConfig::default()).unwrap();
        session.start().unwrap();
        (session, handle)
    }

    fn decode(artifact: &AudioArtifact) -> Vec<i16> {
        artifact
            .pcm()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_new_session_is_idle() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session = RecordingSession::new(device, AnalyserConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.sample_rate(), None);
        assert!(session.amplitude_frame().is_none());
        assert_eq!(handle.acquired(), 0);
    }

    #[test]
    fn test_invalid_analyser_config_rejected_up_front() {
        let (device, _handle) = ScriptedDevice::new(16000);
        let config = AnalyserConfig {
            fft_size: 100,
            ..AnalyserConfig::default()
        };
        assert!(matches!(
            RecordingSession::new(device, config),
            Err(RecorderError::Config(_))
        ));
    }

    #[test]
    fn test_end_to_end_silence() {
        let (mut session, handle) = active_session(16000);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.sample_rate(), Some(16000));

        for _ in 0..3 {
            assert!(handle.deliver(&[0.0; 4096]));
        }
        assert_eq!(session.total_samples(), 12288);

        let artifact = session.stop().unwrap();
        assert_eq!(artifact.len(), 24620);
        assert_eq!(artifact.sample_rate(), 16000);
        assert!(artifact.pcm().iter().all(|&b| b == 0));
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.state().is_terminal());
        assert_eq!(handle.released(), 1);
    }

    #[test]
    fn test_chunks_concatenate_in_arrival_order() {
        let (mut session, handle) = active_session(8000);
        handle.deliver(&[0.5, 0.5]);
        handle.deliver(&[-0.5]);
        handle.deliver(&[1.0, -1.0, 0.0]);

        let artifact = session.stop().unwrap();
        assert_eq!(
            decode(&artifact),
            vec![16383, 16383, -16384, 32767, -32768, 0]
        );
    }

    #[test]
    fn test_stop_twice_is_invalid_state() {
        let (mut session, handle) = active_session(16000);
        session.stop().unwrap();

        let err = session.stop().unwrap_err();
        assert!(matches!(
            err,
            RecorderError::InvalidState {
                operation: "stop",
                state: SessionState::Stopped
            }
        ));
        assert_eq!(handle.released(), 1);
    }

    #[test]
    fn test_cancel_after_stop_is_rejected_without_side_effects() {
        let (mut session, handle) = active_session(16000);
        handle.deliver(&[0.1; 16]);
        session.stop().unwrap();

        assert!(matches!(
            session.cancel(),
            Err(RecorderError::InvalidState { operation: "cancel", .. })
        ));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(handle.released(), 1);
    }

    #[test]
    fn test_cancel_discards_audio() {
        let (mut session, handle) = active_session(16000);
        handle.deliver(&[0.3; 4096]);
        assert_eq!(session.total_samples(), 4096);

        session.cancel().unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.total_samples(), 0);
        assert_eq!(handle.released(), 1);
        assert!(session.amplitude_frame().is_none());

        // No artifact can be produced afterwards
        assert!(session.stop().is_err());
    }

    #[test]
    fn test_chunk_arriving_during_teardown_is_dropped() {
        let (device, handle) = ScriptedDevice::new(16000);
        let device = device.with_late_delivery();
        let mut session = RecordingSession::new(device, AnalyserConfig::default()).unwrap();
        session.start().unwrap();
        handle.deliver(&[0.2; 8]);

        session.cancel().unwrap();
        assert!(handle.deliver(&[0.2; 8]));
        assert_eq!(session.total_samples(), 0);
        assert_eq!(session.state(), SessionState::Cancelled);
    }

    #[test]
    fn test_chunk_after_stop_does_not_reach_artifact() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session =
            RecordingSession::new(device.with_late_delivery(), AnalyserConfig::default()).unwrap();
        session.start().unwrap();
        handle.deliver(&[0.2; 8]);

        let artifact = session.stop().unwrap();
        handle.deliver(&[0.2; 8]);
        assert_eq!(artifact.sample_count(), 8);
        assert_eq!(session.total_samples(), 0);
    }

    #[test]
    fn test_denied_start_fails_terminally() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session =
            RecordingSession::new(device.denying("permission denied"), AnalyserConfig::default())
                .unwrap();

        let err = session.start().unwrap_err();
        assert!(matches!(err, RecorderError::DeviceUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "microphone access unavailable: permission denied"
        );
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(handle.acquired(), 0);

        assert!(matches!(
            session.start(),
            Err(RecorderError::InvalidState { operation: "start", state: SessionState::Failed })
        ));
        assert!(session.stop().is_err());
    }

    #[test]
    fn test_zero_sample_rate_fails_start_and_releases() {
        let (device, handle) = ScriptedDevice::new(0);
        let mut session = RecordingSession::new(device, AnalyserConfig::default()).unwrap();

        assert!(matches!(
            session.start(),
            Err(RecorderError::DeviceUnavailable(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(handle.acquired(), 1);
        assert_eq!(handle.released(), 1);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session =
            RecordingSession::new(device.failing_release(), AnalyserConfig::default()).unwrap();
        session.start().unwrap();
        handle.deliver(&[0.0; 10]);

        let artifact = session.stop().unwrap();
        assert_eq!(artifact.sample_count(), 10);
        assert_eq!(handle.released(), 1);
    }

    #[test]
    fn test_amplitude_frame_only_while_active() {
        let (mut session, handle) = active_session(16000);

        let frame = session.amplitude_frame().unwrap();
        assert_eq!(frame.len(), 128);
        assert_eq!(frame.peak(), 0);

        let tone: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f32::consts::PI * 32.0 * i as f32 / 256.0).sin())
            .collect();
        handle.deliver(&tone);
        assert!(session.amplitude_frame().unwrap().peak() > 0);

        session.stop().unwrap();
        assert!(session.amplitude_frame().is_none());
    }

    #[test]
    fn test_elapsed_only_while_active() {
        let (mut session, _handle) = active_session(16000);
        assert!(session.elapsed().is_some());
        session.stop().unwrap();
        assert!(session.elapsed().is_none());
    }

    #[test]
    fn test_drop_while_active_releases_stream() {
        let (session, handle) = active_session(16000);
        drop(session);
        assert_eq!(handle.released(), 1);
        assert!(!handle.deliver(&[0.0; 4]));
    }

    #[test]
    fn test_merge_chunks_preserves_order() {
        let merged = merge_chunks(vec![vec![1.0, 2.0], vec![], vec![3.0]], 3);
        assert_eq!(merged, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_frame_follows_buffers_smaller_than_a_chunk() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session =
            RecordingSession::new(device.with_chunk_size(4096), AnalyserConfig::default())
                .unwrap();
        session.start().unwrap();
        assert_eq!(session.amplitude_frame().unwrap().peak(), 0);

        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * 16.0 * i as f32 / 256.0).sin())
            .collect();
        assert!(handle.deliver(&tone));

        // Not a full chunk yet, but the meter already sees the tone
        assert_eq!(session.total_samples(), 0);
        assert!(session.amplitude_frame().unwrap().peak() > 0);
    }

    #[test]
    fn test_tap_ignores_buffers_after_cancel() {
        let (device, handle) = ScriptedDevice::new(16000);
        let mut session =
            RecordingSession::new(device.with_late_delivery(), AnalyserConfig::default()).unwrap();
        session.start().unwrap();
        session.cancel().unwrap();

        let loud = [1.0; 256];
        assert!(handle.deliver(&loud));
        assert_eq!(session.tap.poll().peak(), 0);
    }
}
