use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rate of the main acquisition clock; `period` divides it.
pub const MAIN_CLOCK_HZ: u32 = 30_000;

/// Known file-format generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatVersion {
    /// `NEURALSG`: channel ids only, no packet headers
    V2_1,
    /// `NEURALCD`, file spec 2.2
    V2_2,
    /// `NEURALCD`, file spec 2.3
    V2_3,
    /// `BRSMPGRP`, file spec 3.x with 64-bit timestamps
    V3_0,
}

impl FormatVersion {
    /// The 8-byte ASCII type tag at the start of the file.
    pub fn tag(&self) -> &'static [u8; 8] {
        match self {
            FormatVersion::V2_1 => b"NEURALSG",
            FormatVersion::V2_2 | FormatVersion::V2_3 => b"NEURALCD",
            FormatVersion::V3_0 => b"BRSMPGRP",
        }
    }

    /// Width of the timestamp carried in each data packet header.
    pub fn timestamp_width(&self) -> TimestampWidth {
        match self {
            FormatVersion::V2_1 => TimestampWidth::Absent,
            FormatVersion::V2_2 | FormatVersion::V2_3 => TimestampWidth::U32,
            FormatVersion::V3_0 => TimestampWidth::U64,
        }
    }
}

/// Byte width of packet timestamps. Resolved once by the header codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampWidth {
    Absent,
    U32,
    U64,
}

impl TimestampWidth {
    pub fn bytes(&self) -> u64 {
        match self {
            TimestampWidth::Absent => 0,
            TimestampWidth::U32 => 4,
            TimestampWidth::U64 => 8,
        }
    }
}

/// Wall-clock origin of a recording, stored as eight 16-bit fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingTime {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl RecordingTime {
    /// Converts to a calendar timestamp, if the stored fields form a valid date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.millisecond as u32,
            )
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        RecordingTime {
            year: dt.year() as u16,
            month: dt.month() as u16,
            day_of_week: dt.weekday().num_days_from_sunday() as u16,
            day: dt.day() as u16,
            hour: dt.hour() as u16,
            minute: dt.minute() as u16,
            second: dt.second() as u16,
            millisecond: (dt.nanosecond() / 1_000_000).min(999) as u16,
        }
    }
}

/// Analog filter settings of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Corner frequency (mHz)
    pub corner_mhz: u32,
    /// Filter order (0 = disabled)
    pub order: u32,
    /// Filter type (0 = none, 1 = Butterworth)
    pub kind: u16,
}

/// Metadata of one recorded channel.
///
/// Channels are kept in on-disk order, which is the row order of decoded
/// data before a channel selection is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id as stored in the file (electrode id field)
    pub id: u16,
    /// Human-readable label
    pub label: String,
    /// Front-end connector bank (1 = A, 2 = B, ...)
    pub connector_bank: u8,
    /// Pin on the connector bank
    pub connector_pin: u8,
    pub min_digital: i16,
    pub max_digital: i16,
    pub min_analog: i16,
    pub max_analog: i16,
    /// Physical units of the analog range (usually "uV")
    pub units: String,
    pub high_freq: FilterSpec,
    pub low_freq: FilterSpec,
}

impl ChannelInfo {
    /// Channel with the default front-end range of 0.25 µV per count.
    ///
    /// This is what 2.1 files, which carry no extended header, decode to.
    pub fn with_default_range(id: u16) -> Self {
        ChannelInfo {
            id,
            label: format!("chan{}", id),
            connector_bank: 0,
            connector_pin: 0,
            min_digital: -32764,
            max_digital: 32764,
            min_analog: -8191,
            max_analog: 8191,
            units: "uV".to_string(),
            high_freq: FilterSpec::default(),
            low_freq: FilterSpec::default(),
        }
    }

    /// Physical units per raw count.
    pub fn resolution(&self) -> f64 {
        let digital = self.max_digital as f64 - self.min_digital as f64;
        if digital == 0.0 {
            return 1.0;
        }
        (self.max_analog as f64 - self.min_analog as f64) / digital
    }
}

/// Basic header of the 2.1 generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyHeader {
    /// Sampling group label (e.g. "30 kS/s")
    pub label: String,
    /// Sample-rate denominator against the 30 kHz clock
    pub period: u32,
    pub channels: Vec<ChannelInfo>,
}

/// Basic header shared by the 2.2, 2.3 and 3.0 generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedHeader {
    pub label: String,
    pub comment: String,
    /// Sample-rate denominator against the 30 kHz clock
    pub period: u32,
    /// Timestamp ticks per second
    pub time_resolution: u32,
    pub origin: RecordingTime,
    pub channels: Vec<ChannelInfo>,
}

/// Parsed header, one variant per format generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatHeader {
    V21(LegacyHeader),
    V22(ExtendedHeader),
    V23(ExtendedHeader),
    V30(ExtendedHeader),
}

impl FormatHeader {
    pub fn version(&self) -> FormatVersion {
        match self {
            FormatHeader::V21(_) => FormatVersion::V2_1,
            FormatHeader::V22(_) => FormatVersion::V2_2,
            FormatHeader::V23(_) => FormatVersion::V2_3,
            FormatHeader::V30(_) => FormatVersion::V3_0,
        }
    }

    pub fn timestamp_width(&self) -> TimestampWidth {
        self.version().timestamp_width()
    }

    /// The extended-layout header, unless this is a 2.1 file.
    pub fn extended(&self) -> Option<&ExtendedHeader> {
        match self {
            FormatHeader::V21(_) => None,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => Some(h),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FormatHeader::V21(h) => &h.label,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => &h.label,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        self.extended().map(|h| h.comment.as_str())
    }

    pub fn origin(&self) -> Option<&RecordingTime> {
        self.extended().map(|h| &h.origin)
    }

    pub fn period(&self) -> u32 {
        match self {
            FormatHeader::V21(h) => h.period,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => h.period,
        }
    }

    pub fn set_period(&mut self, period: u32) {
        match self {
            FormatHeader::V21(h) => h.period = period,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => {
                h.period = period
            }
        }
    }

    /// Timestamp ticks per second (fixed at 30 kHz for 2.1).
    pub fn time_resolution(&self) -> u32 {
        self.extended()
            .map(|h| h.time_resolution)
            .unwrap_or(MAIN_CLOCK_HZ)
    }

    /// Sampling frequency in Hz.
    pub fn sampling_frequency(&self) -> f64 {
        MAIN_CLOCK_HZ as f64 / self.period().max(1) as f64
    }

    /// Nominal number of timestamp ticks between consecutive samples.
    pub fn ticks_per_sample(&self) -> f64 {
        self.time_resolution() as f64 / self.sampling_frequency()
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        match self {
            FormatHeader::V21(h) => &h.channels,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => &h.channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Keeps only the channels at `rows`, in that order.
    pub fn retain_rows(&mut self, rows: &[usize]) {
        let channels = match self {
            FormatHeader::V21(h) => &mut h.channels,
            FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => {
                &mut h.channels
            }
        };
        let selected: Vec<ChannelInfo> = rows
            .iter()
            .filter_map(|&row| channels.get(row).cloned())
            .collect();
        *channels = selected;
    }
}

/// One contiguous run of packets recorded without interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Timestamp of the first packet (time-resolution ticks)
    pub timestamp: u64,
    /// Timestamp of the last packet
    pub last_timestamp: u64,
    /// Number of packets (samples per channel)
    pub sample_count: u64,
    /// Byte offset of the first packet's first sample value
    pub first_byte: u64,
    /// Byte offset of the last packet's first sample value
    pub last_byte: u64,
}

impl Segment {
    /// Ticks covered by the segment, counting one sample interval for the last packet.
    pub fn duration_ticks(&self, ticks_per_sample: f64) -> f64 {
        self.last_timestamp.saturating_sub(self.timestamp) as f64 + ticks_per_sample
    }
}

/// Part of a resolved window that falls inside one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentWindow {
    /// Index into the located segment list
    pub segment: usize,
    /// First sample to read, relative to the segment start
    pub start_offset: u64,
    /// Number of samples to read
    pub count: u64,
}

/// Resolved absolute sample range, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
    pub parts: Vec<SegmentWindow>,
}

/// Decoded samples, shaped `[channels, samples]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleMatrix {
    /// On-disk 16-bit counts
    Int16(Array2<i16>),
    /// Samples as floating point, in physical units when unit conversion was requested
    Float64(Array2<f64>),
}

impl SampleMatrix {
    pub fn num_channels(&self) -> usize {
        match self {
            SampleMatrix::Int16(a) => a.nrows(),
            SampleMatrix::Float64(a) => a.nrows(),
        }
    }

    pub fn num_samples(&self) -> usize {
        match self {
            SampleMatrix::Int16(a) => a.ncols(),
            SampleMatrix::Float64(a) => a.ncols(),
        }
    }

    pub fn as_raw(&self) -> Option<&Array2<i16>> {
        match self {
            SampleMatrix::Int16(a) => Some(a),
            SampleMatrix::Float64(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&Array2<f64>> {
        match self {
            SampleMatrix::Int16(_) => None,
            SampleMatrix::Float64(a) => Some(a),
        }
    }
}

/// Samples decoded from one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedBlock {
    /// Index of the source segment
    pub segment: usize,
    /// Timestamp of the first returned sample
    pub timestamp: u64,
    pub samples: SampleMatrix,
    /// Per-packet timestamps (high-resolution files only)
    pub timestamps: Option<Array1<u64>>,
}

/// Result of a decode: selected metadata, segments and samples.
///
/// # Examples
///
/// ```no_run
/// use nsx_codec::{load, DecodeOptions};
///
/// let data = load("path/to/recording.ns5", &DecodeOptions::default()).unwrap();
/// println!("{} channels, {:.2} s", data.header.channel_count(), data.duration());
/// for block in &data.blocks {
///     println!("segment {} starts at tick {}", block.segment, block.timestamp);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NsxData {
    /// Header holding only the selected channels, in requested order
    pub header: FormatHeader,
    /// Segments as located on disk, after drift correction
    pub segments: Vec<Segment>,
    pub blocks: Vec<DecodedBlock>,
    /// On-disk rows of the selected channels
    pub rows: Vec<usize>,
    pub window: TimeWindow,
    /// Recoverable conditions met while decoding
    pub warnings: Vec<Warning>,
}

impl NsxData {
    /// Number of decoded samples per channel, across all blocks.
    pub fn num_samples(&self) -> usize {
        self.blocks.iter().map(|b| b.samples.num_samples()).sum()
    }

    /// Duration of the decoded samples in seconds.
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.header.sampling_frequency()
    }

    /// Moves every block timestamp by `ticks`, saturating at zero.
    ///
    /// Used to align recordings from several devices. Only the in-memory
    /// model changes; [`crate::save`] persists the shift.
    pub fn shift_timestamps(&mut self, ticks: i64) {
        let shift = |ts: u64| -> u64 {
            if ticks >= 0 {
                ts.saturating_add(ticks as u64)
            } else {
                ts.saturating_sub(ticks.unsigned_abs())
            }
        };
        for block in &mut self.blocks {
            block.timestamp = shift(block.timestamp);
            if let Some(ts) = block.timestamps.as_mut() {
                ts.mapv_inplace(shift);
            }
        }
        for segment in &mut self.segments {
            segment.timestamp = shift(segment.timestamp);
            segment.last_timestamp = shift(segment.last_timestamp);
        }
    }
}

/// Recoverable conditions. Each one is logged and returned to the caller.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    #[error("start sample {requested} is below 1, reading from sample 1")]
    StartClamped { requested: i64 },

    #[error("end sample {requested} truncated to last available sample {available}")]
    RangeTruncated { requested: u64, available: u64 },

    #[error("segment {segment} declares {declared} samples but only {available} fit in the file")]
    TruncatedSegment {
        segment: usize,
        declared: u64,
        available: u64,
    },

    #[error("dropped zero-length segment at byte {offset}")]
    ZeroLengthSegment { offset: u64 },

    #[error(
        "no packet marker at byte {offset}; segment {segment} extended to end of file ({recovered} samples)"
    )]
    MissingPacketMarker {
        offset: u64,
        segment: usize,
        recovered: u64,
    },

    #[error("ignored {count} trailing bytes that do not form a whole packet")]
    TrailingBytes { count: u64 },

    #[error("segment {segment}: expected {expected} samples, decoded {actual}")]
    ShortRead {
        segment: usize,
        expected: u64,
        actual: u64,
    },

    #[error("physical units requested with integer precision; output upgraded to 64-bit float")]
    PrecisionUpgraded,

    #[error("segment {segment}: clock drift corrected by {adjusted} samples")]
    DriftCorrected { segment: usize, adjusted: i64 },
}

/// Which channels to decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ChannelSelection {
    #[default]
    All,
    /// On-disk row indices (0-based)
    Rows(Vec<usize>),
    /// Channel ids as stored in the extended header
    Ids(Vec<u16>),
    /// Electrode numbers, translated through an [`crate::ElectrodeMap`]
    Electrodes(Vec<u16>),
}

/// Wall-clock units accepted by [`WindowRequest::Time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Seconds per unit.
    pub fn scale(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
        }
    }
}

/// Which part of the recording to decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum WindowRequest {
    #[default]
    All,
    /// 1-based inclusive sample indices across all segments
    Samples { start: i64, end: i64 },
    /// Start and end expressed in `unit`
    Time { start: f64, end: f64, unit: TimeUnit },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    #[default]
    Int16,
    Float64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitMode {
    #[default]
    Raw,
    Physical,
}

/// Tuning of the high-resolution segment scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Packets per scanning frame
    pub frame_packets: usize,
    /// A gap counts as a pause once it spans this many sample intervals
    pub pause_multiplier: f64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            frame_packets: 256,
            pause_multiplier: 2.0,
        }
    }
}

/// Everything a decode can be asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOptions {
    pub channels: ChannelSelection,
    pub window: WindowRequest,
    /// Keep every n-th sample (n >= 1)
    pub skip_factor: usize,
    pub precision: Precision,
    pub units: UnitMode,
    /// Prepend zeros for a first segment that starts after tick 0
    pub zero_pad: bool,
    /// Correct clock drift in high-resolution files
    pub align_drift: bool,
    /// Clip a window that ends past the file instead of failing
    pub truncate_to_file_end: bool,
    /// Do not log warnings (they are still returned)
    pub quiet: bool,
    pub scan: ScanOptions,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            channels: ChannelSelection::All,
            window: WindowRequest::All,
            skip_factor: 1,
            precision: Precision::Int16,
            units: UnitMode::Raw,
            zero_pad: false,
            align_drift: true,
            truncate_to_file_end: false,
            quiet: false,
            scan: ScanOptions::default(),
        }
    }
}

impl DecodeOptions {
    pub fn with_channels(mut self, channels: ChannelSelection) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_window(mut self, window: WindowRequest) -> Self {
        self.window = window;
        self
    }

    pub fn with_skip_factor(mut self, skip_factor: usize) -> Self {
        self.skip_factor = skip_factor;
        self
    }

    /// Physical units, which always come back as 64-bit floats.
    pub fn physical(mut self) -> Self {
        self.units = UnitMode::Physical;
        self.precision = Precision::Float64;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_zero_pad(mut self, zero_pad: bool) -> Self {
        self.zero_pad = zero_pad;
        self
    }

    pub fn with_drift_alignment(mut self, align_drift: bool) -> Self {
        self.align_drift = align_drift;
        self
    }

    pub fn with_truncation(mut self, truncate_to_file_end: bool) -> Self {
        self.truncate_to_file_end = truncate_to_file_end;
        self
    }

    pub fn with_scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }
}

pub(crate) fn emit(warnings: &mut Vec<Warning>, warning: Warning, quiet: bool) {
    if !quiet {
        log::warn!("{}", warning);
    }
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_resolution_is_quarter_microvolt() {
        let ch = ChannelInfo::with_default_range(1);
        assert!((ch.resolution() - 8191.0 / 32764.0).abs() < 1e-12);
        assert!((ch.resolution() - 0.25).abs() < 1e-4);
    }

    #[test]
    fn recording_time_converts_through_chrono() {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 20)
            .unwrap()
            .and_hms_milli_opt(16, 3, 14, 250)
            .unwrap();
        let time = RecordingTime::from_datetime(&dt);
        assert_eq!(time.year, 2023);
        assert_eq!(time.day_of_week, 3);
        assert_eq!(time.millisecond, 250);
        assert_eq!(time.to_datetime(), Some(dt));
        assert_eq!(RecordingTime::default().to_datetime(), None);
    }

    #[test]
    fn shift_moves_block_and_packet_timestamps() {
        let mut data = NsxData {
            header: FormatHeader::V21(LegacyHeader {
                label: String::new(),
                period: 1,
                channels: vec![ChannelInfo::with_default_range(1)],
            }),
            segments: vec![],
            blocks: vec![DecodedBlock {
                segment: 0,
                timestamp: 10,
                samples: SampleMatrix::Int16(Array2::zeros((1, 2))),
                timestamps: Some(Array1::from(vec![10, 11])),
            }],
            rows: vec![0],
            window: TimeWindow {
                start: 1,
                end: 2,
                parts: vec![],
            },
            warnings: vec![],
        };
        data.shift_timestamps(-15);
        assert_eq!(data.blocks[0].timestamp, 0);
        data.shift_timestamps(5);
        assert_eq!(
            data.blocks[0].timestamps.as_ref().unwrap().to_vec(),
            vec![5, 5]
        );
    }
}
