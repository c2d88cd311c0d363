mod helpers;

use std::f64::consts::PI;
use std::time::Duration;

use fm_stream::demod::{DecoderConfig, FmDecoder};
use fm_stream::input::IqSample;
use fm_stream::output::AudioSink;
use fm_stream::{Error, Pipeline, PipelineConfig, PipelineState, StopFlag};

use helpers::{block_numbers, RecordingSink, RecordingTiming, StubDemod, SyntheticSource};

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::new(240_000.0, 48_000.0, 100.0e6, 100.0e6);
    config.quiet = true;
    config
}

#[test]
fn test_direct_output_skips_first_block() {
    let mut source = SyntheticSource::new(100, 16);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();
    let mut pipeline = Pipeline::new(test_config(), StopFlag::new());

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(summary.blocks_processed, 100);
    assert_eq!(summary.blocks_written, 99);
    assert_eq!(summary.write_errors, 0);
    assert_eq!(demod.calls, 100);

    let numbers = block_numbers(&sink.recorded(), 0.5);
    assert_eq!(numbers, (1..100).collect::<Vec<_>>());
    assert!(sink.was_finished());
}

#[test]
fn test_buffered_output_preserves_order() {
    // 24 samples per channel forces the writer to wait for several blocks
    let config = test_config().with_output_buffer(0.0005);
    assert!(config.buffered());
    let mut source = SyntheticSource::new(100, 16);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();
    let mut pipeline = Pipeline::new(config, StopFlag::new());

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(summary.blocks_written, 99);
    let numbers = block_numbers(&sink.recorded(), 0.5);
    assert_eq!(numbers, (1..100).collect::<Vec<_>>());
    assert!(sink.was_finished());
}

#[test]
fn test_telemetry_does_not_affect_output() {
    let mut config = test_config();
    config.quiet = false;
    let mut source = SyntheticSource::new(40, 8);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();

    let summary = Pipeline::new(config, StopFlag::new())
        .run(&mut source, &mut demod, &mut sink, None)
        .unwrap();

    assert_eq!(summary.blocks_written, 39);
    assert_eq!(block_numbers(&sink.recorded(), 0.5), (1..40).collect::<Vec<_>>());
}

#[test]
fn test_acquisition_failure_is_reported() {
    let stop = StopFlag::new();
    let mut source = SyntheticSource::endless(16).failing_at(10);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();
    let mut pipeline = Pipeline::new(test_config(), stop.clone());

    let result = pipeline.run(&mut source, &mut demod, &mut sink, None);

    assert!(matches!(result, Err(Error::Source(_))), "{:?}", result);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(stop.is_raised());

    // whatever made it through is still in order and never includes block 0
    let numbers = block_numbers(&sink.recorded(), 0.5);
    assert!(numbers.len() <= 9);
    assert!(numbers.iter().enumerate().all(|(i, &n)| n == i + 1));
}

#[test]
fn test_stop_flag_ends_endless_source() {
    let stop = StopFlag::new();
    let mut source = SyntheticSource::endless(16).stopping_at(30, stop.clone());
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();
    let mut pipeline = Pipeline::new(test_config().with_output_buffer(0.001), stop.clone());

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(source.blocks_read() <= 31);
    assert!(summary.blocks_processed <= 31);
    let numbers = block_numbers(&sink.recorded(), 0.5);
    assert!(numbers.iter().enumerate().all(|(i, &n)| n == i + 1));
    assert!(sink.was_finished());
}

#[test]
fn test_stop_before_run_exits_immediately() {
    let stop = StopFlag::new();
    stop.raise();
    let mut source = SyntheticSource::endless(16);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::new();
    let mut pipeline = Pipeline::new(test_config(), stop);

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(summary.blocks_processed, 0);
    assert!(sink.recorded().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_pps_events_recorded_in_order() {
    let mut source = SyntheticSource::new(20, 16);
    let mut demod = StubDemod::with_pps();
    let mut sink = RecordingSink::new();
    let mut timing = RecordingTiming::default();

    let summary = Pipeline::new(test_config(), StopFlag::new())
        .run(&mut source, &mut demod, &mut sink, Some(&mut timing))
        .unwrap();

    // pulses from the discarded first block are still recorded
    assert_eq!(summary.pps_events, 40);
    assert_eq!(timing.records.len(), 40);
    for (i, (event, _)) in timing.records.iter().enumerate() {
        assert_eq!(event.pps_index, i as u64);
    }
    assert!(timing.records.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(timing.records[0].1 > 1.0e9, "timestamps are unix seconds");
}

#[test]
fn test_write_errors_are_counted_not_fatal() {
    let mut source = SyntheticSource::new(31, 16);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::failing_every(3);
    let mut pipeline = Pipeline::new(test_config(), StopFlag::new());

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(summary.blocks_processed, 31);
    assert_eq!(summary.write_errors, 10);
    assert_eq!(summary.blocks_written, 20);
    assert_eq!(sink.recorded().len(), 20);
}

#[test]
fn test_buffered_write_errors_are_counted() {
    let mut source = SyntheticSource::new(31, 16);
    let mut demod = StubDemod::new();
    let mut sink = RecordingSink::failing_every(3);
    let mut pipeline = Pipeline::new(test_config().with_output_buffer(0.0005), StopFlag::new());

    let summary = pipeline.run(&mut source, &mut demod, &mut sink, None).unwrap();

    assert_eq!(summary.write_errors + summary.blocks_written, 30);
    assert!(summary.write_errors > 0);
}

#[test]
fn test_overflow_warning_fires_once() {
    let mut config = test_config();
    config.input_high_water = 0;
    let mut source = SyntheticSource::new(50, 16);
    let mut demod = StubDemod::with_first_call_delay(Duration::from_millis(50));
    let mut sink = RecordingSink::new();

    let summary = Pipeline::new(config, StopFlag::new())
        .run(&mut source, &mut demod, &mut sink, None)
        .unwrap();

    assert_eq!(summary.overflow_warnings, 1);
    assert_eq!(summary.blocks_written, 49);
}

/// Unmodulated carrier `offset_hz` away from the tuned frequency
fn carrier_block(offset_hz: f64, rate: f64, n: usize, start: usize) -> Vec<IqSample> {
    (start..start + n)
        .map(|k| {
            let ph = 2.0 * PI * offset_hz * k as f64 / rate;
            IqSample::from_polar(0.8, ph as f32)
        })
        .collect()
}

struct ToneSource {
    metadata: fm_stream::input::IqMetadata,
    sent: usize,
    blocks: usize,
    block_len: usize,
    offset_hz: f64,
}

impl fm_stream::input::SampleSource for ToneSource {
    fn read_block(&mut self) -> fm_stream::Result<Option<Vec<IqSample>>> {
        if self.sent == self.blocks {
            return Ok(None);
        }
        let start = self.sent * self.block_len;
        self.sent += 1;
        Ok(Some(carrier_block(
            self.offset_hz,
            self.metadata.sample_rate as f64,
            self.block_len,
            start,
        )))
    }

    fn metadata(&self) -> &fm_stream::input::IqMetadata {
        &self.metadata
    }
}

#[test]
fn test_fm_decoder_end_to_end() {
    let rate = 960_000u32;
    let mut source = ToneSource {
        metadata: fm_stream::input::IqMetadata {
            sample_rate: rate,
            center_freq: 100.0e6,
            total_samples: None,
        },
        sent: 0,
        blocks: 10,
        block_len: 9600,
        offset_hz: 7_500.0,
    };
    let mut fm = FmDecoder::new(DecoderConfig::new(rate as f64, 0.0, 48_000.0));
    let mut sink = RecordingSink::new();
    let mut config = PipelineConfig::new(rate as f64, 48_000.0, 100.0e6, 100.0e6);
    config.quiet = true;

    let summary = Pipeline::new(config, StopFlag::new())
        .run(&mut source, &mut fm, &mut sink, None)
        .unwrap();

    assert_eq!(summary.blocks_written, 9);
    let blocks = sink.recorded();
    assert!(blocks.iter().all(|b| b.len() == 960));
    // 7.5 kHz of a 75 kHz deviation at half gain
    let last = blocks.last().unwrap();
    let settled = last[last.len() - 1];
    assert!((settled - 0.05).abs() < 0.005, "{settled}");
    assert!(sink.finish().is_ok());
}
