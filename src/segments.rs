//! Segment discovery.
//!
//! A segment is a run of packets recorded without a pause. Files with
//! per-run packet headers are walked header to header; files that stamp
//! every packet with its own high-resolution timestamp are scanned in
//! frames and split wherever two consecutive timestamps are too far apart.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

use crate::error::{NsxError, Result};
use crate::types::*;

/// First byte of every data packet header.
pub const PACKET_MARKER: u8 = 0x01;

/// Marker, 64-bit timestamp and sample count in front of each high-resolution packet.
pub const HIGH_RES_PACKET_HEADER: u64 = 13;

/// Distance from a high-resolution packet's first sample back to its timestamp.
pub(crate) const INLINE_TIMESTAMP_BACKOFF: u64 = 12;

const SAMPLE_BYTES: u64 = 2;

/// How samples are laid out between packet headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// 2.1: one headerless run covering the whole file
    Continuous,
    /// A packet header (marker, timestamp, count) in front of each run
    PerSegment,
    /// A packet header with its own timestamp in front of every sample
    HighResolution,
}

/// Geometry of the sample stream inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    /// Bytes from one packet's first sample to the next packet's first sample
    pub stride: u64,
    /// Each packet carries a timestamp [`INLINE_TIMESTAMP_BACKOFF`] bytes before its samples
    pub inline_timestamp: bool,
}

/// Located segments plus the layout needed to read them.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTable {
    pub mode: ScanMode,
    pub layout: PacketLayout,
    pub segments: Vec<Segment>,
    pub warnings: Vec<Warning>,
}

impl SegmentTable {
    /// Total samples per channel across all segments.
    pub fn total_samples(&self) -> u64 {
        self.segments.iter().map(|s| s.sample_count).sum()
    }
}

/// Finds the segments of the sample stream that starts at `header_end`.
pub fn locate_segments<R: Read + Seek>(
    reader: &mut R,
    header: &FormatHeader,
    header_end: u64,
    file_len: u64,
    scan: &ScanOptions,
    quiet: bool,
) -> Result<SegmentTable> {
    let channels = header.channel_count() as u64;
    let sample_block = channels * SAMPLE_BYTES;
    let mode = detect_mode(reader, header, header_end, file_len)?;
    let layout = match mode {
        ScanMode::HighResolution => PacketLayout {
            stride: HIGH_RES_PACKET_HEADER + sample_block,
            inline_timestamp: true,
        },
        _ => PacketLayout {
            stride: sample_block,
            inline_timestamp: false,
        },
    };

    let mut table = SegmentTable {
        mode,
        layout,
        segments: Vec::new(),
        warnings: Vec::new(),
    };

    let data_bytes = file_len.saturating_sub(header_end);
    if channels == 0 {
        if data_bytes > 0 {
            emit(
                &mut table.warnings,
                Warning::TrailingBytes { count: data_bytes },
                quiet,
            );
        }
        return Ok(table);
    }

    match mode {
        ScanMode::Continuous => scan_continuous(&mut table, header, header_end, file_len, quiet),
        ScanMode::PerSegment => {
            walk_packets(reader, &mut table, header, header_end, file_len, quiet)?
        }
        ScanMode::HighResolution => {
            scan_high_resolution(reader, &mut table, header, header_end, file_len, scan, quiet)?
        }
    }

    log::info!(
        "Found {} segment{} holding {} samples per channel",
        table.segments.len(),
        if table.segments.len() != 1 { "s" } else { "" },
        table.total_samples()
    );
    for (i, segment) in table.segments.iter().enumerate() {
        log::debug!(
            "segment {}: timestamp {}, {} samples, bytes {}..={}",
            i,
            segment.timestamp,
            segment.sample_count,
            segment.first_byte,
            segment.last_byte
        );
    }

    Ok(table)
}

fn detect_mode<R: Read + Seek>(
    reader: &mut R,
    header: &FormatHeader,
    header_end: u64,
    file_len: u64,
) -> Result<ScanMode> {
    match header.timestamp_width() {
        TimestampWidth::Absent => Ok(ScanMode::Continuous),
        TimestampWidth::U32 => Ok(ScanMode::PerSegment),
        TimestampWidth::U64 => {
            // 3.0 recorders write either one packet per sample or one per run.
            if file_len < header_end + HIGH_RES_PACKET_HEADER {
                return Ok(ScanMode::HighResolution);
            }
            if !single_sample_packet_at(reader, header_end)? {
                return Ok(ScanMode::PerSegment);
            }
            // A per-run file whose first run holds one sample looks the same
            // until the second packet header.
            let stride = HIGH_RES_PACKET_HEADER + header.channel_count() as u64 * SAMPLE_BYTES;
            let second = header_end + stride;
            if file_len >= second + HIGH_RES_PACKET_HEADER
                && !single_sample_packet_at(reader, second)?
            {
                return Ok(ScanMode::PerSegment);
            }
            Ok(ScanMode::HighResolution)
        }
    }
}

/// True when a packet header with marker and a count of one starts at `offset`.
fn single_sample_packet_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<bool> {
    reader.seek(SeekFrom::Start(offset))?;
    let marker = reader.read_u8()?;
    let _timestamp = reader.read_u64::<LittleEndian>()?;
    let count = reader.read_u32::<LittleEndian>()?;
    Ok(marker == PACKET_MARKER && count == 1)
}

fn nominal_last_timestamp(timestamp: u64, sample_count: u64, ticks_per_sample: f64) -> u64 {
    timestamp + (sample_count.saturating_sub(1) as f64 * ticks_per_sample).round() as u64
}

fn scan_continuous(
    table: &mut SegmentTable,
    header: &FormatHeader,
    header_end: u64,
    file_len: u64,
    quiet: bool,
) {
    let stride = table.layout.stride;
    let data_bytes = file_len.saturating_sub(header_end);
    let count = data_bytes / stride;

    if data_bytes % stride != 0 {
        emit(
            &mut table.warnings,
            Warning::TrailingBytes {
                count: data_bytes % stride,
            },
            quiet,
        );
    }
    if count == 0 {
        return;
    }

    table.segments.push(Segment {
        timestamp: 0,
        last_timestamp: nominal_last_timestamp(0, count, header.ticks_per_sample()),
        sample_count: count,
        first_byte: header_end,
        last_byte: header_end + (count - 1) * stride,
    });
}

fn read_timestamp<R: Read>(reader: &mut R, width: TimestampWidth) -> Result<u64> {
    Ok(match width {
        TimestampWidth::Absent => 0,
        TimestampWidth::U32 => reader.read_u32::<LittleEndian>()? as u64,
        TimestampWidth::U64 => reader.read_u64::<LittleEndian>()?,
    })
}

/// Walks packet headers from one run to the next.
fn walk_packets<R: Read + Seek>(
    reader: &mut R,
    table: &mut SegmentTable,
    header: &FormatHeader,
    header_end: u64,
    file_len: u64,
    quiet: bool,
) -> Result<()> {
    let width = header.timestamp_width();
    let packet_header = 1 + width.bytes() + 4;
    let stride = table.layout.stride;
    let ticks_per_sample = header.ticks_per_sample();
    let mut pos = header_end;
    let mut empty_run: Option<EmptyRun> = None;

    while pos < file_len {
        let remaining = file_len - pos;
        if remaining < packet_header {
            emit(
                &mut table.warnings,
                Warning::TrailingBytes { count: remaining },
                quiet,
            );
            break;
        }

        reader.seek(SeekFrom::Start(pos))?;
        let marker = reader.read_u8()?;
        if marker != PACKET_MARKER {
            recover_trailing_length(table, pos, empty_run, file_len, ticks_per_sample, quiet)?;
            break;
        }

        let timestamp = read_timestamp(reader, width)?;
        let declared = reader.read_u32::<LittleEndian>()? as u64;
        let data_start = pos + packet_header;
        let available = (file_len - data_start) / stride;

        if declared > available {
            emit(
                &mut table.warnings,
                Warning::TruncatedSegment {
                    segment: table.segments.len(),
                    declared,
                    available,
                },
                quiet,
            );
            if available > 0 {
                push_run(table, timestamp, available, data_start, ticks_per_sample);
            }
            let leftover = (file_len - data_start) % stride;
            if leftover > 0 {
                emit(
                    &mut table.warnings,
                    Warning::TrailingBytes { count: leftover },
                    quiet,
                );
            }
            break;
        }

        if declared == 0 {
            emit(
                &mut table.warnings,
                Warning::ZeroLengthSegment { offset: pos },
                quiet,
            );
            empty_run = Some(EmptyRun {
                offset: pos,
                timestamp,
                data_start,
            });
        } else {
            push_run(table, timestamp, declared, data_start, ticks_per_sample);
            empty_run = None;
        }
        pos = data_start + declared * stride;
    }

    Ok(())
}

fn push_run(
    table: &mut SegmentTable,
    timestamp: u64,
    sample_count: u64,
    data_start: u64,
    ticks_per_sample: f64,
) {
    table.segments.push(Segment {
        timestamp,
        last_timestamp: nominal_last_timestamp(timestamp, sample_count, ticks_per_sample),
        sample_count,
        first_byte: data_start,
        last_byte: data_start + (sample_count - 1) * table.layout.stride,
    });
}

/// Packet header that declared no samples.
#[derive(Debug, Clone, Copy)]
struct EmptyRun {
    offset: u64,
    timestamp: u64,
    data_start: u64,
}

/// Some writer versions leave a wrong sample count in the last packet header,
/// so the walk lands inside sample data. The samples behind the last header
/// then run to the end of the file.
///
/// A count of zero (never written back) leaves that header without a
/// segment; one is created for it. Otherwise the previous run is extended.
fn recover_trailing_length(
    table: &mut SegmentTable,
    offset: u64,
    empty_run: Option<EmptyRun>,
    file_len: u64,
    ticks_per_sample: f64,
    quiet: bool,
) -> Result<()> {
    let stride = table.layout.stride;

    let first_byte = match empty_run {
        Some(run) => {
            let recovered = (file_len - run.data_start) / stride;
            if recovered == 0 {
                return Err(NsxError::CorruptSegments(format!(
                    "no packet marker at byte {} and no samples behind the header at byte {}",
                    offset, run.offset
                )));
            }
            table
                .warnings
                .retain(|w| *w != Warning::ZeroLengthSegment { offset: run.offset });
            push_run(table, run.timestamp, recovered, run.data_start, ticks_per_sample);
            run.data_start
        }
        None => {
            let Some(last) = table.segments.last_mut() else {
                return Err(NsxError::CorruptSegments(format!(
                    "no packet marker at first data byte {}",
                    offset
                )));
            };
            let recovered = (file_len - last.first_byte) / stride;
            last.sample_count = recovered;
            last.last_timestamp =
                nominal_last_timestamp(last.timestamp, recovered, ticks_per_sample);
            last.last_byte = last.first_byte + (recovered - 1) * stride;
            last.first_byte
        }
    };

    let segment = table.segments.len() - 1;
    emit(
        &mut table.warnings,
        Warning::MissingPacketMarker {
            offset,
            segment,
            recovered: table.segments[segment].sample_count,
        },
        quiet,
    );
    let leftover = (file_len - first_byte) % stride;
    if leftover > 0 {
        emit(
            &mut table.warnings,
            Warning::TrailingBytes { count: leftover },
            quiet,
        );
    }
    Ok(())
}

/// Start of a segment found by the high-resolution scan.
struct Boundary {
    packet: u64,
    timestamp: u64,
    /// Timestamp of the packet just before this boundary
    previous: u64,
}

/// Scans per-sample timestamps in overlapping frames of `frame_packets`.
///
/// Only the first and last timestamp of a frame are read unless their
/// distance hints at a pause; then every timestamp of the frame is read to
/// find the exact break.
fn scan_high_resolution<R: Read + Seek>(
    reader: &mut R,
    table: &mut SegmentTable,
    header: &FormatHeader,
    header_end: u64,
    file_len: u64,
    scan: &ScanOptions,
    quiet: bool,
) -> Result<()> {
    let stride = table.layout.stride;
    let data_bytes = file_len.saturating_sub(header_end);
    let total = data_bytes / stride;
    if data_bytes % stride != 0 {
        return Err(NsxError::CorruptSegments(format!(
            "{} data bytes are not a whole number of {}-byte packets",
            data_bytes, stride
        )));
    }
    if total == 0 {
        return Ok(());
    }

    // Every header read on the way must sit exactly where the stride puts it.
    let mut timestamp_at = |packet: u64| -> Result<u64> {
        let offset = header_end + packet * stride;
        reader.seek(SeekFrom::Start(offset))?;
        let marker = reader.read_u8()?;
        let timestamp = reader.read_u64::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;
        if marker != PACKET_MARKER || count != 1 {
            return Err(NsxError::CorruptSegments(format!(
                "packet {} at byte {} is not a single-sample packet (marker {:#04x}, count {})",
                packet, offset, marker, count
            )));
        }
        Ok(timestamp)
    };

    let ticks_per_sample = header.ticks_per_sample();
    let min_pause = scan.pause_multiplier * ticks_per_sample;
    let frame = scan.frame_packets.max(2) as u64;

    let first = timestamp_at(0)?;
    let mut boundaries = vec![Boundary {
        packet: 0,
        timestamp: first,
        previous: first,
    }];
    let mut frame_start = 0u64;
    let mut frame_first = first;
    let mut last_verified = 0u64;
    let mut suspect_frames = 0usize;

    while frame_start + 1 < total {
        let frame_end = (frame_start + frame - 1).min(total - 1);
        let frame_last = timestamp_at(frame_end)?;
        last_verified = frame_end;
        let span = frame_end - frame_start;
        let expected = span as f64 * ticks_per_sample;
        let actual = frame_last as f64 - frame_first as f64;

        if frame_last < frame_first || actual >= expected + (min_pause - ticks_per_sample) {
            suspect_frames += 1;
            let stamps = (frame_start..=frame_end)
                .map(&mut timestamp_at)
                .collect::<Result<Vec<u64>>>()?;
            for (k, pair) in stamps.windows(2).enumerate() {
                let gap = pair[1] as f64 - pair[0] as f64;
                if pair[1] < pair[0] || gap > min_pause {
                    boundaries.push(Boundary {
                        packet: frame_start + k as u64 + 1,
                        timestamp: pair[1],
                        previous: pair[0],
                    });
                }
            }
        }

        frame_first = frame_last;
        frame_start = frame_end;
    }

    log::debug!(
        "high-resolution scan: {} packets, {} frame{} read in full",
        total,
        suspect_frames,
        if suspect_frames != 1 { "s" } else { "" }
    );

    if last_verified + 1 != total {
        return Err(NsxError::CorruptSegments(format!(
            "last verified packet header is {} but the file holds {} packets",
            last_verified, total
        )));
    }

    let final_timestamp = frame_first;
    for (i, boundary) in boundaries.iter().enumerate() {
        let (end, last_timestamp) = match boundaries.get(i + 1) {
            Some(next) => (next.packet, next.previous),
            None => (total, final_timestamp),
        };
        let sample_count = end - boundary.packet;
        let first_byte = header_end + boundary.packet * stride + HIGH_RES_PACKET_HEADER;
        table.segments.push(Segment {
            timestamp: boundary.timestamp,
            last_timestamp,
            sample_count,
            first_byte,
            last_byte: first_byte + (sample_count - 1) * stride,
        });
    }

    let counted = table.total_samples();
    if counted != total {
        return Err(NsxError::CorruptSegments(format!(
            "segments hold {} packets but the file holds {}",
            counted, total
        )));
    }

    Ok(())
}
