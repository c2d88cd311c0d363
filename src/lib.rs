//! Real-time FM broadcast receiver pipeline
//!
//! Raw IQ blocks are read from a [`SampleSource`](input::SampleSource) on an
//! acquisition thread, demodulated on the calling thread and written to an
//! [`AudioSink`](output::AudioSink), optionally through a buffered output
//! thread. See [`pipeline::Pipeline`].

pub mod buffer;
pub mod demod;
pub mod error;
pub mod fastatan;
pub mod filter;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod stats;
pub mod timing;

pub use buffer::StreamBuffer;
pub use error::{Error, Result};
pub use fastatan::fast_atan2;
pub use pipeline::{Pipeline, PipelineConfig, PipelineState, RunSummary, StopFlag};
