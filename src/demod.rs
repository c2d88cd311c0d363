//! FM demodulator interface and a mono quadrature decoder
//!
//! The pipeline only sees the [`Demodulator`] trait: one IQ block in, one
//! block of interleaved stereo audio out, plus level and timing metrics for
//! the block just processed.

use std::f64::consts::PI;

use rustfft::num_complex::Complex32;

use crate::fastatan::fast_atan2;
use crate::filter::FirFilter;
use crate::input::IqSample;
use crate::output::AUDIO_CHANNELS;
use crate::timing::PpsEvent;

pub const DEFAULT_BANDWIDTH_IF: f64 = 100_000.0;
pub const DEFAULT_FREQ_DEV: f64 = 75_000.0;
pub const DEFAULT_BANDWIDTH_PCM: f64 = 15_000.0;
pub const DEFAULT_DEEMPHASIS: f64 = 50.0;

const IF_FILTER_TAPS: usize = 33;
const PCM_FILTER_TAPS: usize = 65;

/// Block-wise FM demodulator driven by the processing thread
pub trait Demodulator {
    /// Demodulate one IQ block, replacing the contents of `audio`
    fn process(&mut self, iq: &[IqSample], audio: &mut Vec<f32>);

    /// Estimated offset of the station from the tuned frequency, in Hz
    fn tuning_offset(&self) -> f64;

    /// RMS level of the IF signal in the last block
    fn if_level(&self) -> f64;

    /// RMS level of the demodulated baseband in the last block
    fn baseband_level(&self) -> f64;

    fn pilot_level(&self) -> f64;

    fn stereo_detected(&self) -> bool;

    /// Timing pulses found during the last call to `process`, in order
    fn pps_events(&self) -> &[PpsEvent];
}

/// Construction parameters for an FM decoder
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub sample_rate_if: f64,
    /// IF equalizer: centre tap gain and the sum of the two side taps
    pub ifeq_static_gain: f64,
    pub ifeq_fit_factor: f64,
    /// Station frequency minus tuned frequency, in Hz
    pub tuning_offset: f64,
    pub sample_rate_pcm: f64,
    /// De-emphasis time constant in microseconds
    pub deemphasis: f64,
    pub bandwidth_if: f64,
    pub freq_dev: f64,
    pub bandwidth_pcm: f64,
    pub downsample: usize,
    /// Shift the pilot phase (stereo decoders only)
    pub pilot_shift: bool,
}

impl DecoderConfig {
    pub fn new(sample_rate_if: f64, tuning_offset: f64, sample_rate_pcm: f64) -> Self {
        let downsample_target = DEFAULT_BANDWIDTH_IF * 2.2;
        Self {
            sample_rate_if,
            ifeq_static_gain: 1.0,
            ifeq_fit_factor: 0.0,
            tuning_offset,
            sample_rate_pcm,
            deemphasis: DEFAULT_DEEMPHASIS,
            bandwidth_if: DEFAULT_BANDWIDTH_IF,
            freq_dev: DEFAULT_FREQ_DEV,
            // Prevent aliasing at very low output sample rates
            bandwidth_pcm: DEFAULT_BANDWIDTH_PCM.min(0.45 * sample_rate_pcm),
            downsample: ((sample_rate_if / downsample_target) as usize).max(1),
            pilot_shift: false,
        }
    }

    pub fn baseband_rate(&self) -> f64 {
        self.sample_rate_if / self.downsample as f64
    }
}

/// Three-tap IF equalizer `[-fit/2, gain, -fit/2]`
///
/// Lifts the upper IF band to undo the droop of the front-end filter. The DC
/// gain is `gain - fit`, and `(1.0, 0.0)` is a one-sample delay.
pub fn if_equalizer(static_gain: f64, fit_factor: f64) -> FirFilter<Complex32> {
    let side = (-fit_factor / 2.0) as f32;
    FirFilter::new(vec![side, static_gain as f32, side])
}

/// Mono FM decoder: mix, filter and decimate, equalize, discriminate,
/// filter and resample, de-emphasize
///
/// Never detects stereo and produces no timing pulses, so `pilot_shift` has
/// no effect here.
pub struct FmDecoder {
    config: DecoderConfig,
    phase: f64,
    phase_step: f64,
    mixed: Vec<Complex32>,
    if_filter: FirFilter<Complex32>,
    ifeq: FirFilter<Complex32>,
    pcm_filter: FirFilter<f32>,
    last: Complex32,
    hold: f32,
    resample_step: f64,
    resample_pos: f64,
    resample_acc: f32,
    resample_count: u32,
    deemph_alpha: f32,
    deemph_state: f32,
    baseband: Vec<f32>,
    tuning_offset: f64,
    if_level: f64,
    baseband_level: f64,
}

impl FmDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        let baseband_rate = config.baseband_rate();
        let tau = config.deemphasis * 1.0e-6;
        let deemph_alpha = if tau > 0.0 {
            1.0 - (-1.0 / (config.sample_rate_pcm * tau)).exp()
        } else {
            1.0
        };
        Self {
            phase: 0.0,
            phase_step: -2.0 * PI * config.tuning_offset / config.sample_rate_if,
            mixed: Vec::new(),
            if_filter: FirFilter::lowpass(config.bandwidth_if, config.sample_rate_if, IF_FILTER_TAPS),
            ifeq: if_equalizer(config.ifeq_static_gain, config.ifeq_fit_factor),
            pcm_filter: FirFilter::lowpass(config.bandwidth_pcm, baseband_rate, PCM_FILTER_TAPS),
            last: Complex32::new(0.0, 0.0),
            hold: 0.0,
            resample_step: baseband_rate / config.sample_rate_pcm,
            resample_pos: 0.0,
            resample_acc: 0.0,
            resample_count: 0,
            deemph_alpha: deemph_alpha as f32,
            deemph_state: 0.0,
            baseband: Vec::new(),
            tuning_offset: config.tuning_offset,
            if_level: 0.0,
            baseband_level: 0.0,
            config,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Shift the station to DC, band-limit to the IF bandwidth, decimate
    /// and equalize
    fn mix_and_decimate(&mut self, iq: &[IqSample]) -> Vec<Complex32> {
        let mut power = 0.0f64;
        self.mixed.clear();
        for &s in iq {
            power += s.norm_sqr() as f64;
            self.mixed.push(s * Complex32::from_polar(1.0, self.phase as f32));
            self.phase = (self.phase + self.phase_step) % (2.0 * PI);
        }
        self.if_level = if iq.is_empty() {
            0.0
        } else {
            (power / iq.len() as f64).sqrt()
        };

        let mut decimated = Vec::with_capacity(iq.len() / self.config.downsample + 1);
        self.if_filter
            .process_decimate(&self.mixed, self.config.downsample, &mut decimated);
        let mut out = Vec::with_capacity(decimated.len());
        self.ifeq.process(&decimated, &mut out);
        out
    }

    /// Quadrature discriminator, normalized to the frequency deviation
    fn discriminate(&mut self, samples: &[Complex32]) {
        let scale = self.config.baseband_rate() / (2.0 * PI * self.config.freq_dev);
        self.baseband.clear();
        let mut sum = 0.0f64;
        let mut power = 0.0f64;
        for &s in samples {
            let d = s * self.last.conj();
            self.last = s;
            let v = (fast_atan2(d.im, d.re) as f64 * scale) as f32;
            sum += v as f64;
            power += (v * v) as f64;
            self.baseband.push(v);
        }
        if !samples.is_empty() {
            let n = samples.len() as f64;
            let mean_hz = sum / n * self.config.freq_dev;
            self.tuning_offset = self.config.tuning_offset + mean_hz;
            self.baseband_level = (power / n).sqrt();
        }
    }

    /// Band-limit to the audio bandwidth, integrate-and-dump to the PCM
    /// rate, then de-emphasize
    ///
    /// Above the baseband rate each sample is held for several frames.
    fn resample_into(&mut self, audio: &mut Vec<f32>) {
        let mut filtered = Vec::with_capacity(self.baseband.len());
        self.pcm_filter.process(&self.baseband, &mut filtered);
        for x in filtered {
            self.resample_acc += x;
            self.resample_count += 1;
            self.resample_pos += 1.0;
            while self.resample_pos >= self.resample_step {
                self.resample_pos -= self.resample_step;
                if self.resample_count > 0 {
                    self.hold = self.resample_acc / self.resample_count as f32;
                    self.resample_acc = 0.0;
                    self.resample_count = 0;
                }
                self.deemph_state += self.deemph_alpha * (self.hold - self.deemph_state);
                for _ in 0..AUDIO_CHANNELS {
                    audio.push(self.deemph_state);
                }
            }
        }
    }
}

impl Demodulator for FmDecoder {
    fn process(&mut self, iq: &[IqSample], audio: &mut Vec<f32>) {
        audio.clear();
        let decimated = self.mix_and_decimate(iq);
        self.discriminate(&decimated);
        self.resample_into(audio);
    }

    fn tuning_offset(&self) -> f64 {
        self.tuning_offset
    }

    fn if_level(&self) -> f64 {
        self.if_level
    }

    fn baseband_level(&self) -> f64 {
        self.baseband_level
    }

    fn pilot_level(&self) -> f64 {
        0.0
    }

    fn stereo_detected(&self) -> bool {
        false
    }

    fn pps_events(&self) -> &[PpsEvent] {
        &[]
    }
}
