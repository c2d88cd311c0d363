use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{IqMetadata, IqSample, SampleSource};
use crate::error::{Error, Result};

/// IQ recording in a stereo WAV file, read block by block
/// SDR++ saves IQ as stereo float32: I=left channel, Q=right channel
pub struct WavIqSource<R: Read = BufReader<File>> {
    reader: WavReader<R>,
    block_length: usize,
    metadata: IqMetadata,
}

impl WavIqSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, center_freq: f64, block_length: usize) -> Result<Self> {
        let reader = WavReader::open(path)?;
        Self::from_wav_reader(reader, center_freq, block_length)
    }
}

impl<R: Read> WavIqSource<R> {
    pub fn from_wav_reader(reader: WavReader<R>, center_freq: f64, block_length: usize) -> Result<Self> {
        let spec = reader.spec();

        // Validate format
        if spec.channels != 2 {
            return Err(Error::source_failure(format!(
                "Expected stereo WAV (I/Q), got {} channels",
                spec.channels
            )));
        }

        let metadata = IqMetadata {
            sample_rate: spec.sample_rate,
            center_freq,
            total_samples: Some(reader.len() as usize / 2), // stereo samples
        };

        Ok(Self {
            reader,
            block_length,
            metadata,
        })
    }

    fn read_float_samples(&mut self) -> Result<Vec<IqSample>> {
        let mut samples = Vec::with_capacity(self.block_length);
        let mut iter = self.reader.samples::<f32>();

        while samples.len() < self.block_length {
            match (iter.next(), iter.next()) {
                (Some(i_result), Some(q_result)) => samples.push(IqSample::new(i_result?, q_result?)),
                _ => break,
            }
        }

        Ok(samples)
    }

    fn read_int_samples(&mut self, bits: u16) -> Result<Vec<IqSample>> {
        let mut samples = Vec::with_capacity(self.block_length);
        let max_val = (1i64 << (bits - 1)) as f32;
        let mut iter = self.reader.samples::<i32>();

        while samples.len() < self.block_length {
            match (iter.next(), iter.next()) {
                (Some(i_result), Some(q_result)) => {
                    let i = i_result? as f32 / max_val;
                    let q = q_result? as f32 / max_val;
                    samples.push(IqSample::new(i, q));
                }
                _ => break,
            }
        }

        Ok(samples)
    }
}

impl<R: Read> SampleSource for WavIqSource<R> {
    fn read_block(&mut self) -> Result<Option<Vec<IqSample>>> {
        let spec = self.reader.spec();
        let samples = match spec.sample_format {
            SampleFormat::Float => self.read_float_samples(),
            SampleFormat::Int => self.read_int_samples(spec.bits_per_sample),
        }
        .map_err(|e| Error::source_failure(format!("WAV read failed: {}", e)))?;

        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(samples))
    }

    fn metadata(&self) -> &IqMetadata {
        &self.metadata
    }
}
