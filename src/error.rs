use thiserror::Error;

/// Errors raised while decoding or encoding NSx files.
///
/// Every variant aborts the whole operation. Conditions the reader can
/// recover from are reported as [`crate::Warning`] values instead.
#[derive(Error, Debug)]
pub enum NsxError {
    /// The 8-byte type tag (or its file-spec bytes) is not a known generation
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// A fixed-size basic header field could not be read or is inconsistent
    #[error("malformed basic header: {0}")]
    MalformedHeader(String),

    /// A per-channel extended header record could not be read or is invalid
    #[error("malformed extended header for channel {index}: {reason}")]
    MalformedExtendedHeader { index: usize, reason: String },

    /// A requested row, channel id or electrode is not present in the file
    #[error("channel {0} is not present in the file")]
    ChannelOutOfRange(String),

    /// The requested window starts after it ends
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    /// The requested window ends past the last sample and truncation was not confirmed
    #[error("requested end sample {requested} exceeds the {available} samples in the file")]
    RangeExceedsFile { requested: u64, available: u64 },

    /// The packet bookkeeping of a high-resolution scan does not add up
    #[error("corrupt segment table: {0}")]
    CorruptSegments(String),

    /// A fixed-size field was not written at its exact width
    #[error("field `{field}` needs {expected} bytes but {actual} were produced")]
    EncodingSizeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The encode destination exists and overwriting was not confirmed
    #[error("destination {} already exists", .0.display())]
    DestinationExists(std::path::PathBuf),

    /// An option or model value that no operation can work with
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// An I/O error while reading or writing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NsxError>;
