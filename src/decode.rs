//! Decimated sample decoding and unit/padding post-processing.

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use std::io::{ErrorKind, Read, Seek};

use crate::channels::ChannelPlan;
use crate::error::{NsxError, Result};
use crate::segments::{PacketLayout, INLINE_TIMESTAMP_BACKOFF};
use crate::types::*;

/// Raw samples read from one segment window.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWindow {
    /// `[requested rows, decoded samples]`
    pub samples: Array2<i16>,
    /// Inline packet timestamps, for layouts that carry them
    pub timestamps: Option<Vec<u64>>,
    /// Samples the window should have produced
    pub expected: u64,
}

impl RawWindow {
    pub fn decoded(&self) -> u64 {
        self.samples.ncols() as u64
    }
}

/// Number of samples a window of `count` yields when keeping every `skip_factor`-th one.
pub fn decimated_len(count: u64, skip_factor: usize) -> u64 {
    count / skip_factor.max(1) as u64
}

/// Streams one segment window from disk.
///
/// Only the channel span of `plan` is read from each packet, and only every
/// `skip_factor`-th packet is visited. Between two reads the reader moves
/// `stride - span_bytes + stride * (skip_factor - 1)` bytes forward, so
/// unwanted bytes are never copied. A file that ends early yields fewer
/// samples than `expected` instead of an error.
pub fn read_window<R: Read + Seek>(
    reader: &mut R,
    segment: &Segment,
    part: &SegmentWindow,
    layout: &PacketLayout,
    plan: &ChannelPlan,
    skip_factor: usize,
) -> Result<RawWindow> {
    if skip_factor == 0 {
        return Err(NsxError::InvalidOption(
            "skip factor must be at least 1".to_string(),
        ));
    }

    let expected = decimated_len(part.count, skip_factor);
    let span = plan.span();
    let span_offset = plan.first_row as u64 * 2;
    let relative = plan.relative_rows();
    let packet_step = layout.stride * skip_factor as u64;
    let first_packet = segment.first_byte + part.start_offset * layout.stride;

    let mut samples = Array2::<i16>::zeros((relative.len(), expected as usize));
    let mut timestamps = layout
        .inline_timestamp
        .then(|| Vec::with_capacity(expected as usize));
    let mut row = vec![0u8; span * 2];
    let mut position = reader.stream_position()?;
    let mut decoded = 0usize;

    for i in 0..expected as usize {
        let packet = first_packet + i as u64 * packet_step;

        if let Some(stamps) = timestamps.as_mut() {
            move_to(reader, &mut position, packet - INLINE_TIMESTAMP_BACKOFF)?;
            match reader.read_u64::<LittleEndian>() {
                Ok(ts) => stamps.push(ts),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            position += 8;
        }

        move_to(reader, &mut position, packet + span_offset)?;
        match reader.read_exact(&mut row) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                if let Some(stamps) = timestamps.as_mut() {
                    stamps.truncate(decoded);
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
        position += row.len() as u64;

        for (k, &rel) in relative.iter().enumerate() {
            samples[[k, i]] = i16::from_le_bytes([row[2 * rel], row[2 * rel + 1]]);
        }
        decoded += 1;
    }

    if decoded < expected as usize {
        samples = samples.slice(s![.., ..decoded]).to_owned();
    }

    Ok(RawWindow {
        samples,
        timestamps,
        expected,
    })
}

fn move_to<R: Seek>(reader: &mut R, position: &mut u64, target: u64) -> Result<()> {
    if target != *position {
        reader.seek_relative(target as i64 - *position as i64)?;
        *position = target;
    }
    Ok(())
}

/// Converts raw counts to physical units, one resolution per row.
pub fn to_physical(raw: &Array2<i16>, channels: &[ChannelInfo]) -> Array2<f64> {
    let mut out = raw.mapv(|v| v as f64);
    for (mut row, channel) in out.outer_iter_mut().zip(channels) {
        let resolution = channel.resolution();
        row.mapv_inplace(|v| v * resolution);
    }
    out
}

/// Converts raw counts to the requested output type.
pub fn convert(raw: Array2<i16>, precision: Precision, units: UnitMode, channels: &[ChannelInfo]) -> SampleMatrix {
    match (precision, units) {
        (_, UnitMode::Physical) => SampleMatrix::Float64(to_physical(&raw, channels)),
        (Precision::Float64, UnitMode::Raw) => SampleMatrix::Float64(raw.mapv(|v| v as f64)),
        (Precision::Int16, UnitMode::Raw) => SampleMatrix::Int16(raw),
    }
}

/// Samples of zero padding that place a segment starting at `timestamp`
/// at its true offset from tick 0.
pub fn leading_pad(timestamp: u64, ticks_per_sample: f64, skip_factor: usize) -> usize {
    if ticks_per_sample <= 0.0 {
        return 0;
    }
    let samples = (timestamp as f64 / ticks_per_sample).round() as u64;
    decimated_len(samples, skip_factor) as usize
}

/// Prepends `pad` zero samples to a block, which then starts at tick 0.
///
/// Inline timestamps, when present, get nominal values for the padded part.
pub fn pad_block(block: &mut DecodedBlock, pad: usize, ticks_per_sample: f64, skip_factor: usize) {
    if pad == 0 {
        return;
    }
    let channels = block.samples.num_channels();
    block.samples = match &block.samples {
        SampleMatrix::Int16(a) => {
            let zeros = Array2::<i16>::zeros((channels, pad));
            SampleMatrix::Int16(concatenate![Axis(1), zeros.view(), a.view()])
        }
        SampleMatrix::Float64(a) => {
            let zeros = Array2::<f64>::zeros((channels, pad));
            SampleMatrix::Float64(concatenate![Axis(1), zeros.view(), a.view()])
        }
    };
    if let Some(stamps) = block.timestamps.as_ref() {
        let step = ticks_per_sample * skip_factor as f64;
        let padded: Array1<u64> = (0..pad)
            .map(|i| (i as f64 * step).round() as u64)
            .chain(stamps.iter().copied())
            .collect();
        block.timestamps = Some(padded);
    }
    block.timestamp = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::resolve_channels;
    use crate::header::header_len;
    use crate::segments::locate_segments;
    use crate::testing::*;
    use std::io::{BufReader, Cursor};

    fn read_all(
        version: FormatVersion,
        bytes: Vec<u8>,
        header: &FormatHeader,
        selection: ChannelSelection,
        skip: usize,
    ) -> Vec<RawWindow> {
        let len = bytes.len() as u64;
        let mut reader = BufReader::new(Cursor::new(bytes));
        let table = locate_segments(
            &mut reader,
            header,
            header_len(header),
            len,
            &ScanOptions::default(),
            true,
        )
        .unwrap();
        let plan = resolve_channels(header.channels(), &selection, None).unwrap();
        table
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let part = SegmentWindow {
                    segment: i,
                    start_offset: 0,
                    count: segment.sample_count,
                };
                read_window(&mut reader, segment, &part, &table.layout, &plan, skip)
                    .unwrap_or_else(|e| panic!("{:?}: {}", version, e))
            })
            .collect()
    }

    #[test]
    fn skip_factor_keeps_every_kth_sample_from_segment_start() {
        let header = sample_header(FormatVersion::V2_3, 3);
        let bytes = per_segment_file(&header, &[(0, 10), (900, 7)]);
        let windows = read_all(FormatVersion::V2_3, bytes, &header, ChannelSelection::All, 3);

        assert_eq!(windows[0].decoded(), 3);
        assert_eq!(windows[1].decoded(), 2);
        for ch in 0..3 {
            let got: Vec<i16> = windows[0].samples.row(ch).to_vec();
            assert_eq!(got, vec![sample_value(ch, 0), sample_value(ch, 3), sample_value(ch, 6)]);
            let got: Vec<i16> = windows[1].samples.row(ch).to_vec();
            assert_eq!(got, vec![sample_value(ch, 10), sample_value(ch, 13)]);
        }
    }

    #[test]
    fn channel_subset_matches_rows_of_full_decode() {
        for version in ALL_VERSIONS {
            let header = sample_header(version, 5);
            let bytes = if version == FormatVersion::V3_0 {
                high_res_file(&header, &(0..12u64).map(|i| i * 1000).collect::<Vec<_>>())
            } else {
                per_segment_file(&header, &[(0, 12)])
            };
            let full = read_all(version, bytes.clone(), &header, ChannelSelection::All, 1);
            let subset = read_all(version, bytes, &header, ChannelSelection::Ids(vec![2, 5]), 1);

            let sub = &subset[0].samples;
            assert_eq!(sub.dim(), (2, 12));
            assert_eq!(sub.row(0), full[0].samples.row(1));
            assert_eq!(sub.row(1), full[0].samples.row(4));
        }
    }

    #[test]
    fn subset_order_follows_request() {
        let header = sample_header(FormatVersion::V2_2, 4);
        let bytes = per_segment_file(&header, &[(0, 6)]);
        let windows = read_all(
            FormatVersion::V2_2,
            bytes,
            &header,
            ChannelSelection::Rows(vec![3, 1]),
            2,
        );
        let got = &windows[0].samples;
        assert_eq!(got.row(0).to_vec(), vec![sample_value(3, 0), sample_value(3, 2), sample_value(3, 4)]);
        assert_eq!(got.row(1).to_vec(), vec![sample_value(1, 0), sample_value(1, 2), sample_value(1, 4)]);
    }

    #[test]
    fn inline_timestamps_are_kept_per_decoded_sample() {
        let header = sample_header(FormatVersion::V3_0, 2);
        let stamps: Vec<u64> = (0..9u64).map(|i| 40_000 + i * 1000).collect();
        let windows = read_all(
            FormatVersion::V3_0,
            high_res_file(&header, &stamps),
            &header,
            ChannelSelection::Rows(vec![1]),
            4,
        );
        assert_eq!(windows[0].timestamps, Some(vec![40_000, 44_000]));
        assert_eq!(
            windows[0].samples.row(0).to_vec(),
            vec![sample_value(1, 0), sample_value(1, 4)]
        );
    }

    #[test]
    fn window_offset_starts_mid_segment() {
        let header = sample_header(FormatVersion::V2_3, 2);
        let bytes = per_segment_file(&header, &[(0, 20)]);
        let len = bytes.len() as u64;
        let mut reader = Cursor::new(bytes);
        let table = locate_segments(
            &mut reader,
            &header,
            header_len(&header),
            len,
            &ScanOptions::default(),
            true,
        )
        .unwrap();
        let plan = resolve_channels(header.channels(), &ChannelSelection::All, None).unwrap();
        let part = SegmentWindow {
            segment: 0,
            start_offset: 15,
            count: 5,
        };
        let window =
            read_window(&mut reader, &table.segments[0], &part, &table.layout, &plan, 1).unwrap();
        assert_eq!(window.samples.row(0)[0], sample_value(0, 15));
        assert_eq!(window.decoded(), 5);
    }

    #[test]
    fn file_ending_early_returns_short_window() {
        let header = sample_header(FormatVersion::V2_3, 2);
        let mut bytes = per_segment_file(&header, &[(0, 10)]);
        bytes.truncate(bytes.len() - 7);
        let mut reader = Cursor::new(bytes);
        let segment = Segment {
            timestamp: 0,
            last_timestamp: 0,
            sample_count: 10,
            first_byte: header_len(&header) + 9,
            last_byte: 0,
        };
        let layout = PacketLayout {
            stride: 4,
            inline_timestamp: false,
        };
        let plan = resolve_channels(header.channels(), &ChannelSelection::All, None).unwrap();
        let part = SegmentWindow {
            segment: 0,
            start_offset: 0,
            count: 10,
        };
        let window = read_window(&mut reader, &segment, &part, &layout, &plan, 1).unwrap();
        assert_eq!(window.expected, 10);
        assert_eq!(window.decoded(), 8);
    }

    #[test]
    fn zero_skip_factor_is_rejected() {
        let header = sample_header(FormatVersion::V2_3, 1);
        let plan = resolve_channels(header.channels(), &ChannelSelection::All, None).unwrap();
        let segment = Segment {
            timestamp: 0,
            last_timestamp: 0,
            sample_count: 1,
            first_byte: 0,
            last_byte: 0,
        };
        let part = SegmentWindow {
            segment: 0,
            start_offset: 0,
            count: 1,
        };
        let layout = PacketLayout {
            stride: 2,
            inline_timestamp: false,
        };
        let result = read_window(&mut Cursor::new(vec![0u8; 2]), &segment, &part, &layout, &plan, 0);
        assert!(matches!(result, Err(NsxError::InvalidOption(_))));
    }

    #[test]
    fn physical_units_scale_each_row_by_its_resolution() {
        let mut channels = sample_header(FormatVersion::V2_3, 2).channels().to_vec();
        channels[1].max_analog = 5000;
        channels[1].min_analog = -5000;
        channels[1].max_digital = 1000;
        channels[1].min_digital = -1000;
        let raw = Array2::from_shape_vec((2, 2), vec![4, -4, 10, -3]).unwrap();

        let out = to_physical(&raw, &channels);
        assert!((out[[0, 0]] - 4.0 * channels[0].resolution()).abs() < 1e-9);
        assert_eq!(out[[1, 0]], 50.0);
        assert_eq!(out[[1, 1]], -15.0);

        let kept = convert(raw.clone(), Precision::Int16, UnitMode::Raw, &channels);
        assert_eq!(kept, SampleMatrix::Int16(raw.clone()));
        let widened = convert(raw, Precision::Float64, UnitMode::Raw, &channels);
        assert_eq!(widened.as_float().unwrap()[[1, 1]], -3.0);
    }

    #[test]
    fn padding_prepends_zeros_and_moves_block_to_tick_zero() {
        assert_eq!(leading_pad(90, 30.0, 1), 3);
        assert_eq!(leading_pad(90, 30.0, 2), 1);

        let mut block = DecodedBlock {
            segment: 0,
            timestamp: 3000,
            samples: SampleMatrix::Int16(Array2::from_elem((2, 2), 7)),
            timestamps: Some(Array1::from(vec![3000, 4000])),
        };
        pad_block(&mut block, 3, 1000.0, 1);
        assert_eq!(block.timestamp, 0);
        let samples = block.samples.as_raw().unwrap();
        assert_eq!(samples.row(0).to_vec(), vec![0, 0, 0, 7, 7]);
        assert_eq!(
            block.timestamps.unwrap().to_vec(),
            vec![0, 1000, 2000, 3000, 4000]
        );
    }
}
