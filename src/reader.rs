use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::channels::{resolve_channels, ElectrodeMap};
use crate::decode;
use crate::drift;
use crate::error::{NsxError, Result};
use crate::header;
use crate::segments::{locate_segments, ScanMode, SegmentTable};
use crate::types::*;
use crate::window::resolve_window;

const READ_BUFFER_BYTES: usize = 65536;

/// An open NSx file with its header parsed and segments located.
///
/// The file stays open for the lifetime of the reader, so several windows
/// can be decoded without rescanning. It is closed when the reader is
/// dropped, on every path.
///
/// # Examples
///
/// ```no_run
/// use nsx_codec::{DecodeOptions, NsxReader, WindowRequest};
///
/// let mut reader = NsxReader::open("path/to/recording.ns6").unwrap();
/// println!("{} segments", reader.segments().len());
/// let first_second = reader
///     .decode(&DecodeOptions::default().with_window(WindowRequest::Samples { start: 1, end: 30000 }))
///     .unwrap();
/// ```
pub struct NsxReader {
    reader: BufReader<File>,
    path: PathBuf,
    file_len: u64,
    header: FormatHeader,
    header_end: u64,
    scan: ScanOptions,
    table: SegmentTable,
}

impl NsxReader {
    /// Opens a file with default scan settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ScanOptions::default(), false)
    }

    /// Opens a file, parsing its header and locating its segments.
    pub fn open_with<P: AsRef<Path>>(path: P, scan: &ScanOptions, quiet: bool) -> Result<Self> {
        let tic = Instant::now();
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);

        let (header, header_end) = header::read_header(&mut reader)?;
        if header_end > file_len {
            return Err(NsxError::MalformedHeader(format!(
                "header needs {} bytes but the file has {}",
                header_end, file_len
            )));
        }
        let table = locate_segments(&mut reader, &header, header_end, file_len, scan, quiet)?;

        log::debug!(
            "Opened {} in {:.3} s",
            path.display(),
            tic.elapsed().as_secs_f64()
        );

        Ok(NsxReader {
            reader,
            path,
            file_len,
            header,
            header_end,
            scan: *scan,
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn header(&self) -> &FormatHeader {
        &self.header
    }

    /// Byte offset of the first data packet.
    pub fn header_len(&self) -> u64 {
        self.header_end
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.table.mode
    }

    pub fn segments(&self) -> &[Segment] {
        &self.table.segments
    }

    /// Samples per channel across all segments.
    pub fn total_samples(&self) -> u64 {
        self.table.total_samples()
    }

    /// Recoveries applied while locating segments.
    pub fn warnings(&self) -> &[Warning] {
        &self.table.warnings
    }

    /// Decodes the channels and window described by `options`.
    pub fn decode(&mut self, options: &DecodeOptions) -> Result<NsxData> {
        self.decode_inner(options, None)
    }

    /// Like [`NsxReader::decode`], resolving electrode selections through `map`.
    pub fn decode_mapped(
        &mut self,
        options: &DecodeOptions,
        map: &dyn ElectrodeMap,
    ) -> Result<NsxData> {
        self.decode_inner(options, Some(map))
    }

    fn decode_inner(
        &mut self,
        options: &DecodeOptions,
        map: Option<&dyn ElectrodeMap>,
    ) -> Result<NsxData> {
        let tic = Instant::now();
        if options.skip_factor == 0 {
            return Err(NsxError::InvalidOption(
                "skip factor must be at least 1".to_string(),
            ));
        }
        let decimated_period = u32::try_from(options.skip_factor)
            .ok()
            .and_then(|skip| self.header.period().checked_mul(skip))
            .ok_or_else(|| {
                NsxError::InvalidOption(format!(
                    "skip factor {} overflows the sample period {}",
                    options.skip_factor,
                    self.header.period()
                ))
            })?;
        if options.scan != self.scan {
            self.table = locate_segments(
                &mut self.reader,
                &self.header,
                self.header_end,
                self.file_len,
                &options.scan,
                options.quiet,
            )?;
            self.scan = options.scan;
        }

        let quiet = options.quiet;
        let mut warnings = self.table.warnings.clone();
        let plan = resolve_channels(self.header.channels(), &options.channels, map)?;
        let window = resolve_window(
            &options.window,
            &self.table.segments,
            self.header.sampling_frequency(),
            options.truncate_to_file_end,
            &mut warnings,
            quiet,
        )?;

        let mut precision = options.precision;
        if options.units == UnitMode::Physical && precision == Precision::Int16 {
            emit(&mut warnings, Warning::PrecisionUpgraded, quiet);
            precision = Precision::Float64;
        }

        let selected: Vec<ChannelInfo> = plan
            .rows
            .iter()
            .map(|&row| self.header.channels()[row].clone())
            .collect();
        let ticks_per_sample = self.header.ticks_per_sample();
        let correct_drift = options.align_drift && self.table.mode == ScanMode::HighResolution;
        let mut segments = self.table.segments.clone();
        let mut blocks = Vec::with_capacity(window.parts.len());

        self.reader.seek(SeekFrom::Start(self.header_end))?;
        for part in &window.parts {
            let segment = segments[part.segment];
            let raw = decode::read_window(
                &mut self.reader,
                &segment,
                part,
                &self.table.layout,
                &plan,
                options.skip_factor,
            )?;
            if raw.decoded() < raw.expected {
                emit(
                    &mut warnings,
                    Warning::ShortRead {
                        segment: part.segment,
                        expected: raw.expected,
                        actual: raw.decoded(),
                    },
                    quiet,
                );
            }

            let timestamp = match raw.timestamps.as_ref().and_then(|t| t.first()) {
                Some(&first) => first,
                None => {
                    segment.timestamp
                        + (part.start_offset as f64 * ticks_per_sample).round() as u64
                }
            };
            let mut block = DecodedBlock {
                segment: part.segment,
                timestamp,
                samples: SampleMatrix::Int16(raw.samples),
                timestamps: raw.timestamps.map(Array1::from),
            };

            if correct_drift {
                let adjusted = drift::correct_block(
                    &mut block,
                    &mut segments[part.segment],
                    &self.header,
                    options.skip_factor,
                );
                if let Some(adjusted) = adjusted {
                    emit(
                        &mut warnings,
                        Warning::DriftCorrected {
                            segment: part.segment,
                            adjusted,
                        },
                        quiet,
                    );
                }
            }

            let placeholder = SampleMatrix::Int16(Array2::zeros((0, 0)));
            block.samples = match std::mem::replace(&mut block.samples, placeholder) {
                SampleMatrix::Int16(raw) => {
                    decode::convert(raw, precision, options.units, &selected)
                }
                converted => converted,
            };

            if options.zero_pad && part.segment == 0 && part.start_offset == 0 {
                let pad = decode::leading_pad(
                    segment.timestamp,
                    ticks_per_sample,
                    options.skip_factor,
                );
                decode::pad_block(&mut block, pad, ticks_per_sample, options.skip_factor);
            }

            blocks.push(block);
        }

        let mut header = self.header.clone();
        header.retain_rows(&plan.rows);
        if options.skip_factor > 1 {
            header.set_period(decimated_period);
        }

        let data = NsxData {
            header,
            segments,
            blocks,
            rows: plan.rows,
            window,
            warnings,
        };

        log::info!(
            "Decoded {} samples x {} channels from {} in {:.2} s",
            data.num_samples(),
            data.header.channel_count(),
            self.path.display(),
            tic.elapsed().as_secs_f64()
        );

        Ok(data)
    }
}
