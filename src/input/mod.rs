pub mod wav;
pub mod stream;

pub use stream::{IqStreamReader, StreamFormat};
pub use wav::WavIqSource;

use rustfft::num_complex::Complex32;

use crate::error::Result;

/// IQ sample pair (re = in-phase, im = quadrature)
pub type IqSample = Complex32;

/// Samples per block requested from a source
pub const DEFAULT_BLOCK_LENGTH: usize = 65536;

/// Metadata about the IQ source
#[derive(Debug, Clone)]
pub struct IqMetadata {
    pub sample_rate: u32,
    /// Frequency the samples are centered on, in Hz
    pub center_freq: f64,
    pub total_samples: Option<usize>, // None for streams
}

/// Producer of raw IQ blocks, polled from the acquisition thread
pub trait SampleSource {
    /// Blocking read of the next block
    ///
    /// `Ok(None)` means the source is exhausted. An error is fatal for the
    /// whole pipeline.
    fn read_block(&mut self) -> Result<Option<Vec<IqSample>>>;

    fn metadata(&self) -> &IqMetadata;

    fn frequency(&self) -> f64 {
        self.metadata().center_freq
    }

    fn sample_rate(&self) -> f64 {
        self.metadata().sample_rate as f64
    }
}
