// microphone.rs: Default input device capture via cpal.
//
// The device callback forwards raw blocks to a capture thread, which
// batches them into ~100ms chunks of 16kHz PCM16 mono for the transcription
// socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio::sync::mpsc;

use super::pcm::PcmEncoder;
use super::{AudioCapture, AudioSource, CaptureError};

/// Captures the default microphone.
///
/// cpal streams are `!Send` on some backends, so each capture runs on its
/// own OS thread which owns the stream until the returned [`AudioCapture`]
/// is stopped.
pub struct MicrophoneCapture {
    /// Flag of the capture currently running, if any.
    active: Mutex<Option<Arc<AtomicBool>>>,
    chunk_ms: u32,
}

impl MicrophoneCapture {
    pub fn new(chunk_ms: u32) -> Self {
        Self {
            active: Mutex::new(None),
            chunk_ms: chunk_ms.max(10),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self::new(100)
    }
}

impl AudioSource for MicrophoneCapture {
    fn start(&self) -> Result<AudioCapture, CaptureError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Err(CaptureError::AlreadyRunning);
        }

        let running = Arc::new(AtomicBool::new(true));
        *active = Some(Arc::clone(&running));

        let (tx, rx) = mpsc::channel(64);
        let chunk_ms = self.chunk_ms;
        let flag = Arc::clone(&running);
        std::thread::spawn(move || {
            if let Err(e) = capture(&flag, &tx, chunk_ms) {
                log::error!("Microphone capture failed: {e}");
            }
            flag.store(false, Ordering::SeqCst);
        });

        Ok(AudioCapture::new(rx, running))
    }
}

fn open_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    blocks: std_mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let _ = blocks.send(data.iter().map(|&s| f32::from_sample(s)).collect());
            },
            |err: cpal::StreamError| log::error!("Microphone stream error: {err}"),
            None,
        )
        .map_err(|e| CaptureError::Backend(e.to_string()))
}

/// Runs on the capture thread. Dropping `tx` on return closes the chunk
/// channel for the consumer.
fn capture(
    running: &AtomicBool,
    tx: &mpsc::Sender<Vec<u8>>,
    chunk_ms: u32,
) -> Result<(), CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(CaptureError::NoDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Backend(e.to_string()))?;
    let rate = supported.sample_rate().0;
    let channels = supported.channels();
    let format = supported.sample_format();
    log::info!(
        "Microphone {}: {rate}Hz, {channels} ch, {format:?}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let (blocks_tx, blocks) = std_mpsc::channel();
    let config: cpal::StreamConfig = supported.into();
    let stream = match format {
        cpal::SampleFormat::F32 => open_stream::<f32>(&device, &config, blocks_tx)?,
        cpal::SampleFormat::I16 => open_stream::<i16>(&device, &config, blocks_tx)?,
        cpal::SampleFormat::U16 => open_stream::<u16>(&device, &config, blocks_tx)?,
        other => {
            return Err(CaptureError::Backend(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| CaptureError::Backend(e.to_string()))?;

    let chunk_len = (rate as usize * chunk_ms as usize / 1000).max(1) * usize::from(channels);
    let poll = Duration::from_millis(u64::from(chunk_ms));
    let mut encoder = PcmEncoder::new(channels, rate);
    let mut pending: Vec<f32> = Vec::with_capacity(chunk_len * 2);

    while running.load(Ordering::SeqCst) {
        match blocks.recv_timeout(poll) {
            Ok(block) => pending.extend(block),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CaptureError::Backend("input stream closed".into()));
            }
        }
        if pending.len() < chunk_len {
            continue;
        }
        let chunk = encoder.encode(&pending);
        pending.clear();
        if tx.blocking_send(chunk).is_err() {
            log::debug!("Microphone consumer went away");
            break;
        }
    }

    drop(stream);
    log::info!("Microphone capture stopped");
    Ok(())
}
