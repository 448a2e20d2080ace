//! Microphone capture for voice messages.
//!
//! A [`RecordingSession`] acquires a live input stream through a
//! [`CaptureDevice`], exposes an [`AmplitudeFrame`] for level meters while it
//! records, and on stop encodes the buffered samples into a mono 16-bit PCM
//! WAV [`AudioArtifact`].

pub mod audio;
pub mod conf;
pub mod error;

pub use audio::{
    AmplitudeFrame, AnalyserConfig, AudioArtifact, CaptureDevice, CpalDevice, LiveStream,
    RecordingSession, SessionState, encode_wav,
};
pub use error::{RecorderError, Result};
