//! Block timestamps and pulse-per-second records

use std::io::Write;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A timing pulse located inside one processed block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpsEvent {
    pub pps_index: u64,
    pub sample_index: u64,
    /// Fractional position within the block, in `[0, 1)`
    pub block_position: f64,
}

/// Unix time in seconds with microsecond resolution
pub fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + 1.0e-6 * t.timestamp_subsec_micros() as f64
}

/// Wall-clock times bracketing the most recently processed block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTiming {
    pub prev_block_time: f64,
    pub block_time: f64,
}

impl BlockTiming {
    pub fn starting_at(t: f64) -> Self {
        Self {
            prev_block_time: t,
            block_time: t,
        }
    }

    pub fn now() -> Self {
        Self::starting_at(unix_seconds(Utc::now()))
    }

    /// Start a new block at time `t`
    pub fn advance(&mut self, t: f64) {
        self.prev_block_time = self.block_time;
        self.block_time = t;
    }

    /// Linear interpolation between the two block times
    pub fn interpolate(&self, block_position: f64) -> f64 {
        self.prev_block_time + block_position * (self.block_time - self.prev_block_time)
    }
}

/// Destination for one record per [`PpsEvent`]
pub trait TimingSink {
    fn record(&mut self, event: &PpsEvent, unix_time: f64) -> Result<()>;
}

/// Writes timing records as aligned text columns, flushing every line
pub struct PpsWriter<W: Write> {
    out: W,
}

impl<W: Write> PpsWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "#pps_index sample_index   unix_time")?;
        out.flush()?;
        Ok(Self { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TimingSink for PpsWriter<W> {
    fn record(&mut self, event: &PpsEvent, unix_time: f64) -> Result<()> {
        writeln!(
            self.out,
            "{:>8} {:>14} {:>18.6}",
            event.pps_index, event.sample_index, unix_time
        )?;
        self.out.flush()?;
        Ok(())
    }
}
