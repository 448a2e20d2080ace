//! Scripted in-memory capture device for session tests

use super::device::{CaptureDevice, ChunkSink, LiveStream, Rechunker};
use crate::error::{RecorderError, Result};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    sink: Option<ChunkSink>,
    tap: Option<ChunkSink>,
    rechunker: Option<Rechunker>,
    acquired: usize,
    released: usize,
}

/// Test-side handle for driving and observing a [`ScriptedDevice`]
#[derive(Clone)]
pub struct DeviceHandle {
    shared: Arc<Mutex<Shared>>,
}

impl DeviceHandle {
    /// Hand a host buffer to the tap and the sink, as the audio thread would.
    /// Returns false when nothing is connected.
    pub fn deliver(&self, buffer: &[f32]) -> bool {
        let mut guard = self.shared.lock().unwrap();
        let shared = &mut *guard;
        let connected = shared.tap.is_some() || shared.sink.is_some();

        if let Some(tap) = shared.tap.as_mut() {
            tap(buffer);
        }
        if let Some(sink) = shared.sink.as_mut() {
            match shared.rechunker.as_mut() {
                Some(rechunker) => rechunker.push(buffer.iter().copied(), |chunk| sink(chunk)),
                None => sink(buffer),
            }
        }
        connected
    }

    pub fn acquired(&self) -> usize {
        self.shared.lock().unwrap().acquired
    }

    pub fn released(&self) -> usize {
        self.shared.lock().unwrap().released
    }
}

pub struct ScriptedDevice {
    sample_rate: u32,
    deny: Option<String>,
    fail_release: bool,
    keep_sink_after_release: bool,
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedDevice {
    pub fn new(sample_rate: u32) -> (Self, DeviceHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let device = Self {
            sample_rate,
            deny: None,
            fail_release: false,
            keep_sink_after_release: false,
            shared: shared.clone(),
        };
        (device, DeviceHandle { shared })
    }

    /// Re-block delivered buffers into `chunk_size` chunks before the sink
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.shared.lock().unwrap().rechunker = Some(Rechunker::new(chunk_size));
        self
    }

    /// Refuse `acquire` as if permission had been denied
    pub fn denying(mut self, reason: &str) -> Self {
        self.deny = Some(reason.to_string());
        self
    }

    /// Report an error from `release`, as a vanished device would
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Keep the sink reachable after release, simulating an in-flight callback
    pub fn with_late_delivery(mut self) -> Self {
        self.keep_sink_after_release = true;
        self
    }
}

impl CaptureDevice for ScriptedDevice {
    type Stream = ScriptedStream;

    fn acquire(&mut self) -> Result<ScriptedStream> {
        if let Some(reason) = &self.deny {
            return Err(RecorderError::DeviceUnavailable(reason.clone()));
        }
        self.shared.lock().unwrap().acquired += 1;
        Ok(ScriptedStream {
            sample_rate: self.sample_rate,
            fail_release: self.fail_release,
            keep_sink_after_release: self.keep_sink_after_release,
            released: false,
            shared: self.shared.clone(),
        })
    }
}

pub struct ScriptedStream {
    sample_rate: u32,
    fail_release: bool,
    keep_sink_after_release: bool,
    released: bool,
    shared: Arc<Mutex<Shared>>,
}

impl LiveStream for ScriptedStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn subscribe(&mut self, sink: ChunkSink) {
        self.shared.lock().unwrap().sink = Some(sink);
    }

    fn tap(&mut self, analysis: ChunkSink) {
        self.shared.lock().unwrap().tap = Some(analysis);
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut shared = self.shared.lock().unwrap();
        shared.released += 1;
        if !self.keep_sink_after_release {
            shared.sink = None;
            shared.tap = None;
        }
        if self.fail_release {
            return Err(RecorderError::Stream("device disappeared".to_string()));
        }
        Ok(())
    }
}
