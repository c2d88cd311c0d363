//! Streaming FIR filters used by the decoder

use std::f64::consts::PI;
use std::ops::{Add, Mul};

/// Hann-windowed sinc low-pass, normalized to unity gain at DC
pub fn lowpass_taps(cutoff_hz: f64, sample_rate: f64, num_taps: usize) -> Vec<f32> {
    let num_taps = num_taps.max(1);
    let fc = (cutoff_hz / sample_rate).clamp(0.0, 0.5);
    let m = (num_taps - 1) as f64;

    let mut taps: Vec<f64> = (0..num_taps)
        .map(|i| {
            let x = i as f64 - m / 2.0;
            let sinc = if x == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * x).sin() / (PI * x)
            };
            let window = if num_taps == 1 {
                1.0
            } else {
                0.5 * (1.0 - (2.0 * PI * i as f64 / m).cos())
            };
            sinc * window
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in &mut taps {
            *t /= sum;
        }
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// FIR filter with real taps that keeps its history between blocks
///
/// Works on real audio (`f32`) and on IQ (`Complex32`) alike.
#[derive(Debug, Clone)]
pub struct FirFilter<T> {
    taps: Vec<f32>,
    history: Vec<T>,
    work: Vec<T>,
    /// Offset of the next kept output into the following block
    phase: usize,
}

impl<T> FirFilter<T>
where
    T: Copy + Default + Add<Output = T> + Mul<f32, Output = T>,
{
    pub fn new(taps: Vec<f32>) -> Self {
        let taps = if taps.is_empty() { vec![1.0] } else { taps };
        Self {
            history: vec![T::default(); taps.len() - 1],
            taps,
            work: Vec::new(),
            phase: 0,
        }
    }

    pub fn lowpass(cutoff_hz: f64, sample_rate: f64, num_taps: usize) -> Self {
        Self::new(lowpass_taps(cutoff_hz, sample_rate, num_taps))
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub fn process(&mut self, input: &[T], out: &mut Vec<T>) {
        self.process_decimate(input, 1, out);
    }

    /// Filter `input` and append every `decimation`-th output to `out`
    ///
    /// The decimation phase carries over, so splitting a stream into blocks
    /// of any length gives the same output.
    pub fn process_decimate(&mut self, input: &[T], decimation: usize, out: &mut Vec<T>) {
        let decimation = decimation.max(1);
        let n = self.taps.len();

        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        // output i ends at input[i], which sits at work[i + n - 1]
        let mut i = self.phase;
        while i < input.len() {
            let acc = self.work[i..i + n]
                .iter()
                .rev()
                .zip(&self.taps)
                .fold(T::default(), |acc, (&x, &h)| acc + x * h);
            out.push(acc);
            i += decimation;
        }
        self.phase = i - input.len();

        let keep = self.work.len() - (n - 1);
        self.history.clear();
        self.history.extend_from_slice(&self.work[keep..]);
    }
}
