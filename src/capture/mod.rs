/// The `capture` module feeds raw audio to live transcription.
/// PCM conversion helpers are always built; the `cpal` microphone source
/// needs the `microphone` feature.
pub mod pcm;

#[cfg(feature = "microphone")]
pub mod microphone;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Sample rate expected by live transcription.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Receiver side of a running capture: little-endian PCM16 mono chunks.
pub type PcmChunkRx = mpsc::Receiver<Vec<u8>>;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,
    #[error("capture already running")]
    AlreadyRunning,
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// One running capture. Stopping or dropping it ends this capture only; a
/// capture started later from the same source has its own flag.
#[derive(Debug)]
pub struct AudioCapture {
    chunks: PcmChunkRx,
    running: Arc<AtomicBool>,
}

impl AudioCapture {
    /// `running` is shared with the producer, which stops once it reads false.
    pub fn new(chunks: PcmChunkRx, running: Arc<AtomicBool>) -> Self {
        Self { chunks, running }
    }

    /// Next chunk, or `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.chunks.recv().await
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Something that produces mono PCM16 audio at [`TARGET_SAMPLE_RATE`].
pub trait AudioSource: Send + Sync {
    /// Begin capturing. Chunks arrive on the returned handle until it is
    /// stopped or the source fails.
    fn start(&self) -> Result<AudioCapture, CaptureError>;
}
