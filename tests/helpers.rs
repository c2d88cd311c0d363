//! Test doubles for driving the pipeline deterministically

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fm_stream::demod::Demodulator;
use fm_stream::input::{IqMetadata, IqSample, SampleSource};
use fm_stream::output::AudioSink;
use fm_stream::timing::{PpsEvent, TimingSink};
use fm_stream::{Error, Result, StopFlag};

/// Yields numbered IQ blocks; block `n` carries `n` in every sample
pub struct SyntheticSource {
    metadata: IqMetadata,
    block_len: usize,
    next: usize,
    limit: Option<usize>,
    fail_at: Option<usize>,
    stop_at: Option<(usize, StopFlag)>,
}

impl SyntheticSource {
    pub fn new(blocks: usize, block_len: usize) -> Self {
        Self {
            metadata: IqMetadata {
                sample_rate: 240_000,
                center_freq: 100.0e6,
                total_samples: Some(blocks * block_len),
            },
            block_len,
            next: 0,
            limit: Some(blocks),
            fail_at: None,
            stop_at: None,
        }
    }

    /// Never runs dry; relies on the stop flag or a failure to end
    pub fn endless(block_len: usize) -> Self {
        let mut source = Self::new(0, block_len);
        source.limit = None;
        source.metadata.total_samples = None;
        source
    }

    pub fn failing_at(mut self, block: usize) -> Self {
        self.fail_at = Some(block);
        self
    }

    pub fn stopping_at(mut self, block: usize, stop: StopFlag) -> Self {
        self.stop_at = Some((block, stop));
        self
    }

    pub fn blocks_read(&self) -> usize {
        self.next
    }
}

impl SampleSource for SyntheticSource {
    fn read_block(&mut self) -> Result<Option<Vec<IqSample>>> {
        if self.fail_at == Some(self.next) {
            return Err(Error::source_failure("synthetic device unplugged"));
        }
        if let Some((at, stop)) = &self.stop_at {
            if self.next == *at {
                stop.raise();
            }
        }
        if let Some(limit) = self.limit {
            if self.next >= limit {
                return Ok(None);
            }
        }
        let block = vec![IqSample::new(self.next as f32, 0.0); self.block_len];
        self.next += 1;
        Ok(Some(block))
    }

    fn metadata(&self) -> &IqMetadata {
        &self.metadata
    }
}

/// Emits four audio samples equal to the block number of its input
#[derive(Default)]
pub struct StubDemod {
    pub calls: usize,
    pub emit_pps: bool,
    pub first_call_delay: Option<Duration>,
    pps: Vec<PpsEvent>,
    pps_index: u64,
}

impl StubDemod {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stall the first call so the acquisition thread runs ahead
    pub fn with_first_call_delay(delay: Duration) -> Self {
        Self {
            first_call_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_pps() -> Self {
        Self {
            emit_pps: true,
            ..Self::default()
        }
    }
}

impl Demodulator for StubDemod {
    fn process(&mut self, iq: &[IqSample], audio: &mut Vec<f32>) {
        if self.calls == 0 {
            if let Some(delay) = self.first_call_delay {
                thread::sleep(delay);
            }
        }
        self.calls += 1;
        audio.clear();
        audio.extend(std::iter::repeat(iq[0].re).take(4));

        self.pps.clear();
        if self.emit_pps {
            // two pulses per block, in chronological order
            for position in [0.25, 0.75] {
                self.pps.push(PpsEvent {
                    pps_index: self.pps_index,
                    sample_index: self.pps_index * 1000,
                    block_position: position,
                });
                self.pps_index += 1;
            }
        }
    }

    fn tuning_offset(&self) -> f64 {
        0.0
    }

    fn if_level(&self) -> f64 {
        0.5 + (self.calls % 3) as f64 * 0.1
    }

    fn baseband_level(&self) -> f64 {
        0.3
    }

    fn pilot_level(&self) -> f64 {
        if self.stereo_detected() {
            0.05
        } else {
            0.0
        }
    }

    fn stereo_detected(&self) -> bool {
        // toggles a few times to exercise the stereo notices
        (self.calls / 10) % 2 == 1
    }

    fn pps_events(&self) -> &[PpsEvent] {
        &self.pps
    }
}

/// Collects every audio block; shares its record so tests can inspect it
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub blocks: Arc<Mutex<Vec<Vec<f32>>>>,
    pub finished: Arc<Mutex<bool>>,
    fail_every: Option<usize>,
    writes: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `n`-th write fails without recording the block
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<Vec<f32>> {
        self.blocks.lock().unwrap().clone()
    }

    pub fn was_finished(&self) -> bool {
        *self.finished.lock().unwrap()
    }
}

impl AudioSink for RecordingSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.writes += 1;
        if let Some(n) = self.fail_every {
            if self.writes % n == 0 {
                return Err(Error::sink("synthetic write failure"));
            }
        }
        self.blocks.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        *self.finished.lock().unwrap() = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTiming {
    pub records: Vec<(PpsEvent, f64)>,
}

impl TimingSink for RecordingTiming {
    fn record(&mut self, event: &PpsEvent, unix_time: f64) -> Result<()> {
        self.records.push((*event, unix_time));
        Ok(())
    }
}

/// Block numbers carried by the recorded audio, undoing the pipeline gain
pub fn block_numbers(blocks: &[Vec<f32>], gain: f32) -> Vec<usize> {
    blocks.iter().map(|b| (b[0] / gain).round() as usize).collect()
}
