use std::io::{BufReader, Read};
use std::net::TcpStream;
use std::str::FromStr;

use super::{IqMetadata, IqSample, SampleSource};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamFormat {
    Int8,
    Uint8,
    Int16,
    Int32,
    Float32,
}

impl StreamFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            StreamFormat::Int8 => 2,    // I + Q = 2 bytes
            StreamFormat::Uint8 => 2,   // I + Q = 2 bytes
            StreamFormat::Int16 => 4,   // I + Q = 4 bytes
            StreamFormat::Int32 => 8,   // I + Q = 8 bytes
            StreamFormat::Float32 => 8, // I + Q = 8 bytes
        }
    }

    /// Convert interleaved raw bytes into IQ samples
    ///
    /// Trailing bytes that do not form a whole sample are ignored.
    pub fn decode(&self, buffer: &[u8]) -> Vec<IqSample> {
        match self {
            StreamFormat::Int8 => buffer
                .chunks_exact(2)
                .map(|chunk| {
                    let i = (chunk[0] as i8) as f32 / 128.0;
                    let q = (chunk[1] as i8) as f32 / 128.0;
                    IqSample::new(i, q)
                })
                .collect(),
            StreamFormat::Uint8 => buffer
                .chunks_exact(2)
                .map(|chunk| {
                    // offset binary, as produced by RTL-SDR dongles
                    let i = (chunk[0] as i32 - 128) as f32 / 128.0;
                    let q = (chunk[1] as i32 - 128) as f32 / 128.0;
                    IqSample::new(i, q)
                })
                .collect(),
            StreamFormat::Int16 => buffer
                .chunks_exact(4)
                .map(|chunk| {
                    let i = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0;
                    let q = i16::from_le_bytes([chunk[2], chunk[3]]) as f32 / 32768.0;
                    IqSample::new(i, q)
                })
                .collect(),
            StreamFormat::Int32 => buffer
                .chunks_exact(8)
                .map(|chunk| {
                    let i = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32 / 2147483648.0;
                    let q = i32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as f32 / 2147483648.0;
                    IqSample::new(i, q)
                })
                .collect(),
            StreamFormat::Float32 => buffer
                .chunks_exact(8)
                .map(|chunk| {
                    let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    IqSample::new(i, q)
                })
                .collect(),
        }
    }
}

impl FromStr for StreamFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "int8" => Ok(StreamFormat::Int8),
            "uint8" => Ok(StreamFormat::Uint8),
            "int16" => Ok(StreamFormat::Int16),
            "int32" => Ok(StreamFormat::Int32),
            "float32" => Ok(StreamFormat::Float32),
            _ => Err(Error::config(format!(
                "Invalid format '{}'. Use: int8, uint8, int16, int32, float32",
                s
            ))),
        }
    }
}

/// Live IQ stream over TCP (SDR++ network sink, rtl_tcp style servers)
pub struct IqStreamReader<R: Read = TcpStream> {
    reader: BufReader<R>,
    format: StreamFormat,
    block_length: usize,
    metadata: IqMetadata,
}

impl IqStreamReader<TcpStream> {
    pub fn connect(
        addr: &str,
        format: StreamFormat,
        sample_rate: u32,
        center_freq: f64,
        block_length: usize,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| Error::source_failure(format!("cannot connect to {}: {}", addr, e)))?;
        Ok(Self::from_reader(stream, format, sample_rate, center_freq, block_length))
    }
}

impl<R: Read> IqStreamReader<R> {
    pub fn from_reader(
        reader: R,
        format: StreamFormat,
        sample_rate: u32,
        center_freq: f64,
        block_length: usize,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            format,
            block_length,
            metadata: IqMetadata {
                sample_rate,
                center_freq,
                total_samples: None,
            },
        }
    }

    /// Read a chunk of IQ samples from the stream
    /// Returns None on connection close
    pub fn read_chunk(&mut self, num_samples: usize) -> Result<Option<Vec<IqSample>>> {
        let bytes_needed = num_samples * self.format.bytes_per_sample();
        let mut buffer = vec![0u8; bytes_needed];

        match self.reader.read_exact(&mut buffer) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::source_failure(format!("stream read failed: {}", e))),
        }

        Ok(Some(self.format.decode(&buffer)))
    }
}

impl<R: Read> SampleSource for IqStreamReader<R> {
    fn read_block(&mut self) -> Result<Option<Vec<IqSample>>> {
        self.read_chunk(self.block_length)
    }

    fn metadata(&self) -> &IqMetadata {
        &self.metadata
    }
}
