use ndarray::s;
use nsx_codec::{load, read_header, DecodeOptions, TimeUnit, WindowRequest};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/recording.ns5".to_string());

    // Header and channel metadata only
    let header = read_header(&path)?;
    println!("File version: {:?}", header.version());
    println!("Sample rate: {} Hz", header.sampling_frequency());
    if let Some(comment) = header.comment().filter(|c| !c.is_empty()) {
        println!("Comment: {}", comment);
    }
    if let Some(start) = header.origin().and_then(|o| o.to_datetime()) {
        println!("Recorded at: {}", start);
    }

    println!("Number of channels: {}", header.channel_count());
    for (i, channel) in header.channels().iter().enumerate().take(5) {
        println!(
            "  {}: {} (id {}, {:.3} {}/count)",
            i,
            channel.label,
            channel.id,
            channel.resolution(),
            channel.units
        );
    }
    if header.channel_count() > 5 {
        println!("  ... and {} more", header.channel_count() - 5);
    }

    // First second of every channel, in physical units
    let options = DecodeOptions::default()
        .with_window(WindowRequest::Time {
            start: 0.0,
            end: 1.0,
            unit: TimeUnit::Seconds,
        })
        .with_truncation(true)
        .physical();
    let data = load(&path, &options)?;

    println!("\nData summary:");
    println!("  Segments: {}", data.segments.len());
    println!("  Decoded samples: {}", data.num_samples());
    println!("  Duration: {:.3} seconds", data.duration());
    for warning in &data.warnings {
        println!("  Warning: {}", warning);
    }

    if let Some(samples) = data.blocks.first().and_then(|b| b.samples.as_float()) {
        if samples.nrows() > 0 && samples.ncols() > 0 {
            let first = samples.slice(s![0, ..]);
            let shown = std::cmp::min(5, first.len());
            println!("  First channel data (first {} samples):", shown);
            for i in 0..shown {
                println!("    {}: {:.2} {}", i, first[i], data.header.channels()[0].units);
            }
        }
    }

    Ok(())
}
