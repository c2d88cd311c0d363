use clap::{ArgAction, Parser};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fm_stream::demod::{DecoderConfig, FmDecoder};
use fm_stream::input::{IqStreamReader, SampleSource, StreamFormat, WavIqSource, DEFAULT_BLOCK_LENGTH};
use fm_stream::output::{AudioSink, RawAudioSink, WavAudioSink};
use fm_stream::timing::{PpsWriter, TimingSink};
use fm_stream::{Error, Pipeline, PipelineConfig, StopFlag};

/// Decode FM broadcast radio from a live IQ stream or an IQ recording
#[derive(Parser, Debug)]
#[command(name = "fm-stream")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input IQ WAV file to decode
    #[arg(value_name = "INPUT")]
    input_file: Option<PathBuf>,

    /// Connect to an IQ stream server (TCP) for live decoding
    #[arg(short, long, value_name = "HOST:PORT")]
    stream: Option<String>,

    /// Stream format: int8, uint8, int16, int32, float32
    #[arg(long, default_value = "uint8")]
    format: String,

    /// Frequency of radio station in Hz (accepts k/M suffix, e.g. 89.7M)
    #[arg(short, long, value_parser = parse_frequency)]
    freq: f64,

    /// Frequency the source is tuned to (default: station frequency)
    #[arg(short, long, value_parser = parse_frequency)]
    center_freq: Option<f64>,

    /// IF sample rate for stream mode (Hz, default 960000 or 240000 with --low-if)
    #[arg(long)]
    rate: Option<u32>,

    /// Audio sample rate in Hz
    #[arg(long, default_value = "48000", value_parser = clap::value_parser!(u32).range(1..))]
    pcmrate: u32,

    /// Write audio data as raw S16_LE samples, '-' for stdout (default mode)
    #[arg(short = 'R', long, value_name = "FILE", conflicts_with = "wav")]
    raw: Option<String>,

    /// Write audio data to .WAV file
    #[arg(short = 'W', long, value_name = "FILE")]
    wav: Option<PathBuf>,

    /// Write pulse-per-second timestamps, '-' for stdout
    #[arg(short = 'T', long, value_name = "FILE")]
    pps: Option<String>,

    /// Audio buffer size in seconds
    #[arg(short, long, value_name = "SECONDS", value_parser = parse_seconds)]
    buffer: Option<f64>,

    /// Quiet mode: no per-block status or stereo notices
    #[arg(short, long)]
    quiet: bool,

    /// Shift pilot phase (for Quadrature Multipath Monitor)
    #[arg(short = 'X', long)]
    pilot_shift: bool,

    /// Set de-emphasis to 75 microseconds (default: 50)
    #[arg(short = 'U', long)]
    usa: bool,

    /// Low IF mode: 240 kHz sample rate and matching IF equalizer
    #[arg(short = 'L', long)]
    low_if: bool,

    /// Verbosity level (-v=debug, -vv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Parse a frequency in Hz with an optional k/M/G suffix
fn parse_frequency(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let (digits, scale) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1.0e3),
        Some('M') => (&s[..s.len() - 1], 1.0e6),
        Some('G') => (&s[..s.len() - 1], 1.0e9),
        _ => (s, 1.0),
    };
    let value: f64 = digits
        .parse()
        .map_err(|_| format!("invalid frequency '{}'", s))?;
    let hz = value * scale;
    if !(hz.is_finite() && hz > 0.0) {
        return Err(format!("frequency must be positive, got '{}'", s));
    }
    Ok(hz)
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s.parse().map_err(|_| format!("invalid duration '{}'", s))?;
    if !(secs.is_finite() && secs >= 0.0) {
        return Err(format!("buffer length must not be negative, got '{}'", s));
    }
    Ok(secs)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn open_source(args: &Args, stream_rate: u32) -> Result<Box<dyn SampleSource + Send>, Error> {
    let center_freq = args.center_freq.unwrap_or(args.freq);
    match (&args.input_file, &args.stream) {
        (Some(path), None) => {
            info!("reading IQ file: {}", path.display());
            let source = WavIqSource::open(path, center_freq, DEFAULT_BLOCK_LENGTH)?;
            Ok(Box::new(source))
        }
        (None, Some(addr)) => {
            let format: StreamFormat = args.format.parse()?;
            info!("connecting to stream: {} (format: {:?})", addr, format);
            let source = IqStreamReader::connect(addr, format, stream_rate, center_freq, DEFAULT_BLOCK_LENGTH)?;
            Ok(Box::new(source))
        }
        (None, None) => Err(Error::config("must specify either an input file or --stream <host:port>")),
        (Some(_), Some(_)) => Err(Error::config("cannot specify both input file and --stream")),
    }
}

fn open_sink(args: &Args, pcmrate: u32) -> Result<Box<dyn AudioSink + Send>, Error> {
    if let Some(path) = &args.wav {
        info!("writing audio samples to '{}'", path.display());
        return Ok(Box::new(WavAudioSink::create(path, pcmrate)?));
    }
    let filename = args.raw.as_deref().unwrap_or("-");
    info!("writing raw 16-bit audio samples to '{}'", filename);
    Ok(Box::new(RawAudioSink::create(filename)?))
}

fn open_pps(filename: &str) -> Result<PpsWriter<Box<dyn Write>>, Error> {
    let out: Box<dyn Write> = if filename == "-" {
        info!("writing pulse-per-second markers to stdout");
        Box::new(io::stdout())
    } else {
        info!("writing pulse-per-second markers to '{}'", filename);
        let file = File::create(filename)
            .map_err(|e| Error::config(format!("can not open '{}' ({})", filename, e)))?;
        Box::new(BufWriter::new(file))
    };
    PpsWriter::new(out)
}

fn run(args: Args) -> Result<(), Error> {
    let stop = StopFlag::new();
    if let Err(e) = stop.install_signal_handler() {
        warn!("can not install signal handler ({})", e);
    }

    let (default_rate, ifeq_static_gain, ifeq_fit_factor) = if args.low_if {
        (240_000, 1.47112063, 0.48567701)
    } else {
        (960_000, 1.3412962, 0.34135089)
    };

    let mut source = open_source(&args, args.rate.unwrap_or(default_rate))?;
    let tuner_freq = source.frequency();
    let ifrate = source.sample_rate();
    let pcmrate = args.pcmrate;

    info!("station frequency: {:.6} MHz", args.freq * 1.0e-6);
    info!("source tuned for:  {:.6} MHz", tuner_freq * 1.0e-6);
    info!("IF sample rate:    {:.0} Hz", ifrate);

    let mut decoder_config = DecoderConfig::new(ifrate, args.freq - tuner_freq, pcmrate as f64);
    decoder_config.ifeq_static_gain = ifeq_static_gain;
    decoder_config.ifeq_fit_factor = ifeq_fit_factor;
    decoder_config.deemphasis = if args.usa { 75.0 } else { 50.0 };
    decoder_config.pilot_shift = args.pilot_shift;
    if args.pilot_shift {
        warn!("--pilot-shift has no effect with the mono decoder");
    }

    info!("if -> baseband:    {} (downsampled by)", decoder_config.downsample);
    info!("IF bandwidth:      {:.3} kHz", decoder_config.bandwidth_if * 1.0e-3);
    info!("audio sample rate: {} Hz", pcmrate);
    info!("audio bandwidth:   {:.3} kHz", decoder_config.bandwidth_pcm * 1.0e-3);
    info!("deemphasis:        {:.1} microseconds", decoder_config.deemphasis);

    let mut fm = FmDecoder::new(decoder_config);

    // Default to one second of buffering for interactive output streams
    let raw_to_stdout = args.wav.is_none() && args.raw.as_deref().unwrap_or("-") == "-";
    let bufsecs = match args.buffer {
        Some(secs) => secs,
        None if raw_to_stdout => 1.0,
        None => 0.0,
    };
    let mut config = PipelineConfig::new(ifrate, pcmrate as f64, args.freq, tuner_freq).with_output_buffer(bufsecs);
    config.quiet = args.quiet;
    if config.buffered() {
        info!("output buffer:     {:.1} seconds", config.output_buffer_samples as f64 / pcmrate as f64);
    }

    let mut pps_writer = args.pps.as_deref().map(open_pps).transpose()?;
    let mut sink = open_sink(&args, pcmrate)?;

    let mut pipeline = Pipeline::new(config, stop);
    pipeline.run(
        &mut *source,
        &mut fm,
        &mut *sink,
        pps_writer.as_mut().map(|w| w as &mut dyn TimingSink),
    )?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
