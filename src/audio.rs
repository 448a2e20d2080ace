//! Audio capture, analysis and encoding

mod analyser;
mod device;
mod encoder;
mod session;

#[cfg(test)]
mod testing;

pub use analyser::{AmplitudeFrame, Analyser, AnalyserConfig};
pub use device::{
    AudioDeviceInfo, CaptureDevice, ChunkSink, CpalDevice, CpalStream, DEFAULT_CHUNK_SIZE,
    LiveStream, Rechunker,
};
pub use encoder::{AudioArtifact, HEADER_LEN, MAX_SAMPLES, encode_wav, quantize};
pub use session::{RecordingSession, SessionState};
