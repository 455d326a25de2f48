use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use nsx_codec::{
    load, read_header, save, ChannelSelection, DecodeOptions, FormatHeader, NsxReader, ScanOptions,
    Segment, Warning, WindowRequest,
};

const SUCCESS: i32 = 0;
const EXECUTION_ERROR: i32 = 1;

#[derive(Parser)]
#[command(
    name = "nsx",
    version,
    about = "Inspect and extract Blackrock NSx continuous recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Show header and channel metadata
    Info(InfoArgs),
    /// List recording segments (pauses split a file into segments)
    Segments(SegmentsArgs),
    /// Write a channel/time subset to a new file
    Extract(ExtractArgs),
    /// Write a copy with every timestamp moved by a number of ticks
    Shift(ShiftArgs),
}

#[derive(Args)]
struct InfoArgs {
    file: String,

    /// Print JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct SegmentsArgs {
    file: String,

    /// Packets per scanning frame (high-resolution files)
    #[arg(long, default_value_t = 256)]
    frame_packets: usize,

    /// Gap size, in sample intervals, that counts as a pause
    #[arg(long, default_value_t = 2.0)]
    pause_multiplier: f64,

    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct ExtractArgs {
    input: String,
    output: String,

    /// Channel ids to keep (default: all)
    #[arg(long, num_args = 1..)]
    channels: Vec<u16>,

    /// First sample to keep (1-based)
    #[arg(long)]
    start: Option<i64>,

    /// Last sample to keep (inclusive)
    #[arg(long)]
    end: Option<i64>,

    /// Keep every n-th sample
    #[arg(long, default_value_t = 1)]
    skip: usize,

    /// Clip an end past the last sample instead of failing
    #[arg(long, default_value_t = false)]
    truncate: bool,

    /// Leave clock drift in high-resolution files uncorrected
    #[arg(long, default_value_t = false)]
    no_drift: bool,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Args)]
struct ShiftArgs {
    input: String,
    output: String,

    /// Ticks to add (negative to subtract)
    #[arg(long, allow_hyphen_values = true)]
    ticks: i64,

    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Serialize)]
struct ChannelOutput<'a> {
    id: u16,
    label: &'a str,
    units: &'a str,
    resolution: f64,
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    version: String,
    label: &'a str,
    comment: Option<&'a str>,
    sampling_frequency: f64,
    time_resolution: u32,
    recorded_at: Option<String>,
    channels: Vec<ChannelOutput<'a>>,
}

#[derive(Serialize)]
struct SegmentsOutput<'a> {
    segments: &'a [Segment],
    total_samples: u64,
    warnings: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Command::Info(args) => info(args),
        Command::Segments(args) => segments(args),
        Command::Extract(args) => extract(args),
        Command::Shift(args) => shift(args),
    };

    let exit_code = match result {
        Ok(()) => SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXECUTION_ERROR
        }
    };
    std::process::exit(exit_code);
}

fn info(args: InfoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let header = read_header(&args.file)?;
    let output = info_output(&header);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("File version: {}", output.version);
    println!("Label: {}", output.label);
    if let Some(comment) = output.comment.filter(|c| !c.is_empty()) {
        println!("Comment: {}", comment);
    }
    println!("Sample rate: {} Hz", output.sampling_frequency);
    println!("Time resolution: {} ticks/s", output.time_resolution);
    if let Some(recorded_at) = &output.recorded_at {
        println!("Recorded at: {}", recorded_at);
    }
    println!("Channels: {}", output.channels.len());
    for channel in &output.channels {
        println!(
            "  {:>4}  {:<16} {:.4} {}/count",
            channel.id, channel.label, channel.resolution, channel.units
        );
    }
    Ok(())
}

fn info_output(header: &FormatHeader) -> InfoOutput<'_> {
    InfoOutput {
        version: format!("{:?}", header.version()),
        label: header.label(),
        comment: header.comment(),
        sampling_frequency: header.sampling_frequency(),
        time_resolution: header.time_resolution(),
        recorded_at: header
            .origin()
            .and_then(|o| o.to_datetime())
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        channels: header
            .channels()
            .iter()
            .map(|c| ChannelOutput {
                id: c.id,
                label: &c.label,
                units: &c.units,
                resolution: c.resolution(),
            })
            .collect(),
    }
}

fn segments(args: SegmentsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let scan = ScanOptions {
        frame_packets: args.frame_packets,
        pause_multiplier: args.pause_multiplier,
    };
    let reader = NsxReader::open_with(&args.file, &scan, args.json)?;
    let output = SegmentsOutput {
        segments: reader.segments(),
        total_samples: reader.total_samples(),
        warnings: reader.warnings().iter().map(Warning::to_string).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Scan mode: {:?}", reader.scan_mode());
    for (i, segment) in output.segments.iter().enumerate() {
        println!(
            "  {:>3}: timestamp {:>12}  {:>10} samples",
            i, segment.timestamp, segment.sample_count
        );
    }
    println!("Total: {} samples per channel", output.total_samples);
    Ok(())
}

fn extract(args: ExtractArgs) -> Result<(), Box<dyn std::error::Error>> {
    let channels = if args.channels.is_empty() {
        ChannelSelection::All
    } else {
        ChannelSelection::Ids(args.channels)
    };
    let window = match (args.start, args.end) {
        (None, None) => WindowRequest::All,
        (start, end) => WindowRequest::Samples {
            start: start.unwrap_or(1),
            end: end.unwrap_or(i64::MAX),
        },
    };
    let options = DecodeOptions::default()
        .with_channels(channels)
        .with_window(window)
        .with_skip_factor(args.skip)
        .with_truncation(args.truncate || args.end.is_none())
        .with_drift_alignment(!args.no_drift);

    let data = load(&args.input, &options)?;
    let written = save(&data, &args.output, args.overwrite)?;
    println!(
        "Wrote {} samples x {} channels ({} bytes) to {}",
        data.num_samples(),
        data.header.channel_count(),
        written,
        args.output
    );
    Ok(())
}

fn shift(args: ShiftArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = DecodeOptions::default().with_drift_alignment(false);
    let mut data = load(&args.input, &options)?;
    data.shift_timestamps(args.ticks);
    let written = save(&data, &args.output, args.overwrite)?;
    println!("Wrote {} bytes to {}", written, args.output);
    Ok(())
}
