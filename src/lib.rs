pub mod channels;
pub mod decode;
pub mod drift;
pub mod error;
pub mod header;
mod reader;
pub mod segments;
pub mod types;
pub mod window;
pub mod writer;

#[cfg(test)]
mod testing;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Re-export the public surface
pub use channels::{ChannelPlan, ElectrodeMap};
pub use error::{NsxError, Result};
pub use reader::NsxReader;
pub use segments::{ScanMode, SegmentTable};
pub use types::*;
pub use writer::NsxWriter;

/// Reads only the header and channel metadata of a file.
///
/// # Examples
///
/// ```no_run
/// use nsx_codec::read_header;
///
/// let header = read_header("path/to/recording.ns5").unwrap();
/// println!("{:?} at {} Hz", header.version(), header.sampling_frequency());
/// for channel in header.channels() {
///     println!("  {} {}", channel.id, channel.label);
/// }
/// ```
pub fn read_header<P: AsRef<Path>>(file_path: P) -> Result<FormatHeader> {
    let mut reader = BufReader::new(File::open(file_path)?);
    let (header, _) = header::read_header(&mut reader)?;
    Ok(header)
}

/// Decodes the channels and window described by `options`.
///
/// # Examples
///
/// ```no_run
/// use nsx_codec::{load, ChannelSelection, DecodeOptions, TimeUnit, WindowRequest};
///
/// let options = DecodeOptions::default()
///     .with_channels(ChannelSelection::Ids(vec![1, 2, 3]))
///     .with_window(WindowRequest::Time { start: 0.0, end: 10.0, unit: TimeUnit::Seconds })
///     .with_skip_factor(10)
///     .physical();
/// match load("path/to/recording.ns5", &options) {
///     Ok(data) => println!("{} samples per channel", data.num_samples()),
///     Err(e) => println!("Error loading file: {}", e),
/// }
/// ```
pub fn load<P: AsRef<Path>>(file_path: P, options: &DecodeOptions) -> Result<NsxData> {
    NsxReader::open_with(file_path, &options.scan, options.quiet)?.decode(options)
}

/// Encodes `data` to `file_path` and returns the number of bytes written.
///
/// Fails with [`NsxError::DestinationExists`] if the file exists and
/// `overwrite` is false.
pub fn save<P: AsRef<Path>>(data: &NsxData, file_path: P, overwrite: bool) -> Result<u64> {
    writer::save(data, file_path, overwrite)
}
