use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Number of interleaved audio channels written by every sink
pub const AUDIO_CHANNELS: u16 = 2;

/// Consumer of demodulated audio blocks
///
/// A failed write is reported to the caller; it does not stop the pipeline.
pub trait AudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Flush and close the underlying stream
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Convert f32 [-1.0, 1.0] to i16, clipping out-of-range samples
fn to_i16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Raw interleaved S16_LE samples to a file or stdout
pub struct RawAudioSink {
    out: Box<dyn Write + Send>,
    bytes: Vec<u8>,
}

impl RawAudioSink {
    /// Open `filename`, where `-` selects stdout
    pub fn create(filename: &str) -> Result<Self> {
        let out: Box<dyn Write + Send> = if filename == "-" {
            Box::new(io::stdout())
        } else {
            let file = File::create(filename)
                .map_err(|e| Error::sink(format!("can not open '{}' ({})", filename, e)))?;
            Box::new(BufWriter::new(file))
        };
        Ok(Self::new(out))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, bytes: Vec::new() }
    }
}

impl AudioSink for RawAudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.bytes.clear();
        self.bytes.reserve(samples.len() * 2);
        for &sample in samples {
            self.bytes.extend_from_slice(&to_i16(sample).to_le_bytes());
        }
        self.out
            .write_all(&self.bytes)
            .map_err(|e| Error::sink(format!("write failed ({})", e)))
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Stereo int16 PCM WAV file
pub struct WavAudioSink {
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavAudioSink {
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: AUDIO_CHANNELS,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path.as_ref(), spec).map_err(|e| {
            Error::sink(format!("can not open '{}' ({})", path.as_ref().display(), e))
        })?;
        Ok(Self { writer: Some(writer) })
    }
}

impl AudioSink for WavAudioSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(Error::InvalidState("write after WAV file was finalized"))?;
        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::sink(format!("write failed ({})", e)))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavAudioSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("failed to finalize WAV file: {}", e);
        }
    }
}
