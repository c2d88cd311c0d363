//! Acquisition, processing and output threads of the receiver
//!
//! ```text
//!  acquisition thread        processing (caller) thread           output thread
//!  source.read_block() ──► StreamBuffer<IqSample> ──► demodulate ──► StreamBuffer<f32> ──► sink
//!                                                         └── (unbuffered mode) ──────────► sink
//! ```
//!
//! All threads share one [`StopFlag`]. The acquisition thread always ends
//! the input buffer on exit, so the other two threads observe end-of-stream
//! even when it stops in the middle of a read.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::buffer::StreamBuffer;
use crate::demod::Demodulator;
use crate::error::{Error, Result};
use crate::input::{IqSample, SampleSource};
use crate::output::{AudioSink, AUDIO_CHANNELS};
use crate::stats::{LevelRange, MovingAverage, OverflowGuard};
use crate::timing::{unix_seconds, BlockTiming, TimingSink};

/// Nominal audio volume applied to every block
pub const AUDIO_GAIN: f32 = 0.5;

/// Blocks averaged for the ppm display
pub const PPM_AVERAGE_WINDOW: usize = 40;

/// IF level feeds before the D/U ratio is reported
pub const DU_WARMUP_BLOCKS: u64 = 11;

/// Seconds of IQ data the input buffer may hold before warning
pub const INPUT_HIGH_WATER_SECS: f64 = 10.0;

/// Cooperative cancellation token shared by every pipeline thread
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise this flag on SIGINT or SIGTERM
    ///
    /// A second signal while already stopping terminates the process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let flag = self.0.clone();
        ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            warn!("got interrupt signal, stopping ...");
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// IQ sample rate in Hz
    pub if_rate: f64,
    /// Audio sample rate in Hz
    pub pcm_rate: f64,
    /// Requested station frequency in Hz
    pub station_freq: f64,
    /// Frequency the source is actually tuned to in Hz
    pub tuner_freq: f64,
    /// Output buffer length in samples per channel; 0 writes directly
    pub output_buffer_samples: usize,
    /// Queued input samples above which the overflow warning fires
    pub input_high_water: usize,
    pub gain: f32,
    /// Skip per-block status and stereo notices
    pub quiet: bool,
}

impl PipelineConfig {
    pub fn new(if_rate: f64, pcm_rate: f64, station_freq: f64, tuner_freq: f64) -> Self {
        Self {
            if_rate,
            pcm_rate,
            station_freq,
            tuner_freq,
            output_buffer_samples: 0,
            input_high_water: (INPUT_HIGH_WATER_SECS * if_rate) as usize,
            gain: AUDIO_GAIN,
            quiet: false,
        }
    }

    pub fn with_output_buffer(mut self, seconds: f64) -> Self {
        self.output_buffer_samples = (seconds.max(0.0) * self.pcm_rate) as usize;
        self
    }

    /// Tuned frequency minus station frequency
    pub fn delta_if(&self) -> f64 {
        self.tuner_freq - self.station_freq
    }

    pub fn buffered(&self) -> bool {
        self.output_buffer_samples > 0
    }
}

/// Counters reported when a run finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks_processed: u64,
    pub blocks_written: u64,
    pub overflow_warnings: u32,
    pub write_errors: u64,
    pub pps_events: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks processed, {} written, {} write errors, {} overflow warnings, {} pps events",
            self.blocks_processed, self.blocks_written, self.write_errors, self.overflow_warnings, self.pps_events
        )
    }
}

/// Simple linear gain adjustment
pub fn adjust_gain(samples: &mut [f32], gain: f32) {
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Display-only statistics, updated after the block has been forwarded
struct Telemetry {
    if_range: LevelRange,
    got_stereo: bool,
}

impl Telemetry {
    fn new() -> Self {
        Self {
            if_range: LevelRange::new(DU_WARMUP_BLOCKS),
            got_stereo: false,
        }
    }

    fn update(
        &mut self,
        block: u64,
        demod: &dyn Demodulator,
        config: &PipelineConfig,
        ppm: f64,
        output_queued: Option<usize>,
    ) {
        let if_level = demod.if_level();
        self.if_range.feed(if_level);
        let du_ratio = self.if_range.du_ratio();
        let buffered_secs = output_queued
            .map(|n| n as f64 / AUDIO_CHANNELS as f64 / config.pcm_rate);

        debug!(
            "blk={:6}:f={:8.4}MHz:ppm={:+6.2}:IF={:+6.2}dBpp:DU={:6.2}dB:BB={:+5.1}dB{}",
            block,
            (config.tuner_freq + demod.tuning_offset()) * 1.0e-6,
            ppm,
            20.0 * if_level.log10(),
            20.0 * du_ratio.log10(),
            20.0 * demod.baseband_level().log10() + 3.01,
            buffered_secs
                .map(|s| format!(":buf={:.1}s", s))
                .unwrap_or_default()
        );

        let stereo = demod.stereo_detected();
        if stereo != self.got_stereo {
            self.got_stereo = stereo;
            if stereo {
                info!("got stereo signal (pilot level = {:.6})", demod.pilot_level());
            } else {
                info!("lost stereo signal");
            }
        }
    }
}

/// Read data from the source and queue it for the processing thread
///
/// Runs in its own thread so that the time between source reads stays short.
fn read_source_data(
    source: &mut (dyn SampleSource + Send),
    buf: &StreamBuffer<IqSample>,
    stop: &StopFlag,
) -> Result<()> {
    let mut result = Ok(());
    while !stop.is_raised() {
        match source.read_block() {
            Ok(Some(block)) => {
                if let Err(e) = buf.push(block) {
                    error!("input buffer: {}", e);
                    result = Err(e);
                    break;
                }
            }
            Ok(None) => {
                info!("source exhausted");
                break;
            }
            Err(e) => {
                error!("source: {}", e);
                stop.raise();
                result = Err(e);
                break;
            }
        }
    }
    buf.end();
    result
}

#[derive(Debug, Default)]
struct OutputStats {
    blocks: u64,
    errors: u64,
}

/// Drain the output buffer into the sink until end-of-stream
fn write_output_data(sink: &mut (dyn AudioSink + Send), buf: &StreamBuffer<f32>, min_fill: usize) -> OutputStats {
    let mut stats = OutputStats::default();
    loop {
        if buf.queued_samples() == 0 {
            // Output is consuming faster than we produce. Wait for the
            // nominal fill level so this does not happen too often.
            buf.wait_until_filled(min_fill);
        }

        if buf.pull_end_reached() {
            break;
        }

        let samples = buf.pull();
        if samples.is_empty() {
            break;
        }
        match sink.write(&samples) {
            Ok(()) => stats.blocks += 1,
            Err(e) => {
                warn!("audio output: {}", e);
                stats.errors += 1;
            }
        }
    }
    finish_sink(sink);
    stats
}

fn finish_sink(sink: &mut dyn AudioSink) {
    if let Err(e) = sink.finish() {
        warn!("audio output: {}", e);
    }
}

/// Owns the buffers and threads of one receiver run
pub struct Pipeline {
    config: PipelineConfig,
    stop: StopFlag,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, stop: StopFlag) -> Self {
        Self {
            config,
            stop,
            state: PipelineState::Starting,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    fn set_state(&mut self, state: PipelineState) {
        debug!("pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run until the source is exhausted, the stop flag is raised, or
    /// acquisition fails
    ///
    /// The first demodulated block is discarded. Acquisition failure is
    /// returned as an error once every thread has exited.
    pub fn run(
        &mut self,
        source: &mut (dyn SampleSource + Send),
        demod: &mut dyn Demodulator,
        sink: &mut (dyn AudioSink + Send),
        timing: Option<&mut dyn TimingSink>,
    ) -> Result<RunSummary> {
        self.set_state(PipelineState::Starting);
        let input = StreamBuffer::<IqSample>::new();
        let output = StreamBuffer::<f32>::new();

        let (summary, acquired) = thread::scope(|s| {
            let acquisition = {
                let input = &input;
                let stop = self.stop.clone();
                s.spawn(move || read_source_data(source, input, &stop))
            };

            let (mut direct, writer) = if self.config.buffered() {
                let min_fill = self.config.output_buffer_samples * AUDIO_CHANNELS as usize;
                let output = &output;
                let handle = s.spawn(move || write_output_data(sink, output, min_fill));
                (None, Some(handle))
            } else {
                (Some(sink), None)
            };

            self.set_state(PipelineState::Running);
            let mut summary = self.process(&input, &output, demod, direct.as_deref_mut(), timing);

            self.set_state(PipelineState::Draining);
            // Leftover input is dropped; pulling until empty also waits
            // for the acquisition thread to mark the end of the stream.
            while !input.pull().is_empty() {}
            let acquired = acquisition
                .join()
                .unwrap_or_else(|_| Err(Error::source_failure("acquisition thread panicked")));

            if let Some(sink) = direct {
                finish_sink(sink);
            }
            if let Some(handle) = writer {
                output.end();
                match handle.join() {
                    Ok(stats) => {
                        summary.blocks_written += stats.blocks;
                        summary.write_errors += stats.errors;
                    }
                    Err(_) => error!("output thread panicked"),
                }
            }
            (summary, acquired)
        });

        self.set_state(PipelineState::Stopped);
        info!("{}", summary);
        acquired.map(|_| summary)
    }

    /// Main loop on the calling thread
    fn process(
        &self,
        input: &StreamBuffer<IqSample>,
        output: &StreamBuffer<f32>,
        demod: &mut dyn Demodulator,
        mut direct: Option<&mut (dyn AudioSink + Send + '_)>,
        mut timing: Option<&mut dyn TimingSink>,
    ) -> RunSummary {
        let config = &self.config;
        let mut summary = RunSummary::default();
        let mut overflow = OverflowGuard::new(config.input_high_water);
        let mut ppm_average = MovingAverage::new(PPM_AVERAGE_WINDOW, 0.0f64);
        let mut telemetry = Telemetry::new();
        let mut block_timing = BlockTiming::now();
        let delta_if = config.delta_if();

        let mut block: u64 = 0;
        while !self.stop.is_raised() {
            if overflow.check(input.queued_samples()) {
                warn!("input buffer is growing (system too slow)");
                summary.overflow_warnings += 1;
            }

            let iq = input.pull();
            if iq.is_empty() {
                break;
            }

            block_timing.advance(unix_seconds(Utc::now()));

            let mut audio = Vec::new();
            demod.process(&iq, &mut audio);
            summary.blocks_processed += 1;

            adjust_gain(&mut audio, config.gain);

            // Negated: show the correction to make, not the one made
            ppm_average.feed(((demod.tuning_offset() + delta_if) / config.tuner_freq) * -1.0e6);

            for event in demod.pps_events() {
                summary.pps_events += 1;
                if let Some(timing) = timing.as_mut() {
                    let ts = block_timing.interpolate(event.block_position);
                    if let Err(e) = timing.record(event, ts) {
                        warn!("pps output: {}", e);
                    }
                }
            }

            // The first block is noisy while the IF filters start up
            if block > 0 {
                match direct.as_mut() {
                    Some(sink) => match sink.write(&audio) {
                        Ok(()) => summary.blocks_written += 1,
                        Err(e) => {
                            warn!("audio output: {}", e);
                            summary.write_errors += 1;
                        }
                    },
                    None => {
                        if let Err(e) = output.push(audio) {
                            error!("output buffer: {}", e);
                            self.stop.raise();
                            break;
                        }
                    }
                }
            }

            if !config.quiet {
                let output_queued = config.buffered().then(|| output.queued_samples());
                telemetry.update(block, &*demod, config, ppm_average.average(), output_queued);
            }

            block += 1;
        }
        summary
    }
}
