// pcm.rs: Turns device audio blocks into the 16 kHz mono PCM16 stream the
// transcription socket expects.

use super::TARGET_SAMPLE_RATE;

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Little-endian PCM16 bytes for samples that are already mono at the
/// target rate.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| quantize(s).to_le_bytes())
        .collect()
}

/// Stateful block encoder for one capture.
///
/// Interpolation runs across block boundaries: the last frame of a block is
/// kept and the read position carries over, so splitting the input into
/// blocks of any size gives the same output as one long block.
#[derive(Debug)]
pub struct PcmEncoder {
    channels: usize,
    /// Device frames per output sample.
    step: f64,
    /// Read position of the next output sample, relative to the first frame
    /// of the next block. `-1.0..0.0` means "between `carry` and frame 0".
    position: f64,
    carry: Option<f32>,
}

impl PcmEncoder {
    pub fn new(channels: u16, device_rate: u32) -> Self {
        Self {
            channels: usize::from(channels.max(1)),
            step: f64::from(device_rate) / f64::from(TARGET_SAMPLE_RATE),
            position: 0.0,
            carry: None,
        }
    }

    /// Encode one block of interleaved samples. A trailing partial frame is
    /// ignored.
    pub fn encode(&mut self, interleaved: &[f32]) -> Vec<u8> {
        let mono: Vec<f32> = interleaved
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect();
        let carry = self.carry;
        let frame = |i: i64| -> Option<f32> {
            if i < 0 {
                carry
            } else {
                mono.get(i as usize).copied()
            }
        };

        let mut out = Vec::with_capacity((mono.len() as f64 / self.step) as usize * 2 + 2);
        let mut pos = self.position;
        loop {
            let base = pos.floor();
            let (Some(a), Some(b)) = (frame(base as i64), frame(base as i64 + 1)) else {
                break;
            };
            let t = (pos - base) as f32;
            out.extend_from_slice(&quantize(a + (b - a) * t).to_le_bytes());
            pos += self.step;
        }

        self.position = pos - mono.len() as f64;
        if let Some(&last) = mono.last() {
            self.carry = Some(last);
        }
        out
    }
}
