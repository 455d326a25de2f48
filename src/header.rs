//! Basic and extended header codec.
//!
//! Parsing and encoding work on byte buffers only; the reader hands this
//! module a [`Read`] positioned at byte 0 of the file.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashSet;
use std::io::{self, Read};

use crate::error::{NsxError, Result};
use crate::types::*;

/// Fixed part of a 2.1 header: tag, label, period, channel count.
pub const LEGACY_BASIC_HEADER_LEN: usize = 32;
/// Basic header of the 2.2, 2.3 and 3.0 generations.
pub const BASIC_HEADER_LEN: usize = 314;
/// One `CC` extended header record.
pub const EXTENDED_RECORD_LEN: usize = 66;

const LABEL_LEN: usize = 16;
const COMMENT_LEN: usize = 256;
const UNITS_LEN: usize = 16;
const EXTENDED_RECORD_TYPE: &[u8; 2] = b"CC";

/// Parses a header from a byte buffer holding at least the whole header.
///
/// Returns the header and the byte offset of the first data packet.
pub fn parse_header(bytes: &[u8]) -> Result<(FormatHeader, u64)> {
    let mut cursor = bytes;
    read_header(&mut cursor)
}

/// Parses a header from a reader positioned at the start of the file.
pub fn read_header<R: Read>(reader: &mut R) -> Result<(FormatHeader, u64)> {
    let mut tag = [0u8; 8];
    reader
        .read_exact(&mut tag)
        .map_err(|_| malformed("type tag"))?;

    let header = match &tag {
        b"NEURALSG" => FormatHeader::V21(read_legacy(reader)?),
        b"NEURALCD" => {
            let (major, minor) = read_file_spec(reader)?;
            match (major, minor) {
                (2, 2) => FormatHeader::V22(read_extended(reader)?),
                (2, 3) => FormatHeader::V23(read_extended(reader)?),
                _ => {
                    return Err(NsxError::UnsupportedFormat(format!(
                        "NEURALCD file spec {}.{}",
                        major, minor
                    )))
                }
            }
        }
        b"BRSMPGRP" => {
            let (major, minor) = read_file_spec(reader)?;
            if major != 3 {
                return Err(NsxError::UnsupportedFormat(format!(
                    "BRSMPGRP file spec {}.{}",
                    major, minor
                )));
            }
            FormatHeader::V30(read_extended(reader)?)
        }
        _ => {
            return Err(NsxError::UnsupportedFormat(format!(
                "type tag {:?}",
                String::from_utf8_lossy(&tag)
            )))
        }
    };

    log::info!(
        "Reading NSx file, version {:?}: {} channel{} sampled at {:.1} Hz",
        header.version(),
        header.channel_count(),
        if header.channel_count() != 1 { "s" } else { "" },
        header.sampling_frequency()
    );

    let len = header_len(&header);
    Ok((header, len))
}

/// Total header length in bytes, i.e. the offset of the first data packet.
pub fn header_len(header: &FormatHeader) -> u64 {
    let channels = header.channel_count();
    match header {
        FormatHeader::V21(_) => (LEGACY_BASIC_HEADER_LEN + 4 * channels) as u64,
        _ => (BASIC_HEADER_LEN + EXTENDED_RECORD_LEN * channels) as u64,
    }
}

fn malformed(what: &str) -> NsxError {
    NsxError::MalformedHeader(format!("cannot read {}", what))
}

fn field<T>(value: io::Result<T>, what: &str) -> Result<T> {
    value.map_err(|_| malformed(what))
}

fn read_file_spec<R: Read>(reader: &mut R) -> Result<(u8, u8)> {
    let major = field(reader.read_u8(), "file spec")?;
    let minor = field(reader.read_u8(), "file spec")?;
    Ok((major, minor))
}

fn read_fixed_string<R: Read>(reader: &mut R, len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn read_legacy<R: Read>(reader: &mut R) -> Result<LegacyHeader> {
    let label = field(read_fixed_string(reader, LABEL_LEN), "label")?;
    let period = field(reader.read_u32::<LittleEndian>(), "period")?;
    let channel_count = field(reader.read_u32::<LittleEndian>(), "channel count")?;
    if period == 0 {
        return Err(NsxError::MalformedHeader("period is zero".to_string()));
    }

    let mut channels = Vec::with_capacity(channel_count.min(1024) as usize);
    for _ in 0..channel_count {
        let id = field(reader.read_u32::<LittleEndian>(), "channel id")?;
        let id = u16::try_from(id)
            .map_err(|_| NsxError::MalformedHeader(format!("channel id {} out of range", id)))?;
        channels.push(ChannelInfo::with_default_range(id));
    }

    if let Some(id) = first_duplicate(&channels) {
        return Err(NsxError::MalformedHeader(format!(
            "channel id {} appears twice",
            id
        )));
    }

    Ok(LegacyHeader {
        label,
        period,
        channels,
    })
}

fn read_extended<R: Read>(reader: &mut R) -> Result<ExtendedHeader> {
    let header_bytes = field(reader.read_u32::<LittleEndian>(), "header length")?;
    let label = field(read_fixed_string(reader, LABEL_LEN), "label")?;
    let comment = field(read_fixed_string(reader, COMMENT_LEN), "comment")?;
    let period = field(reader.read_u32::<LittleEndian>(), "period")?;
    let time_resolution = field(reader.read_u32::<LittleEndian>(), "time resolution")?;

    let mut fields = [0u16; 8];
    for value in fields.iter_mut() {
        *value = field(reader.read_u16::<LittleEndian>(), "recording origin")?;
    }
    let origin = RecordingTime {
        year: fields[0],
        month: fields[1],
        day_of_week: fields[2],
        day: fields[3],
        hour: fields[4],
        minute: fields[5],
        second: fields[6],
        millisecond: fields[7],
    };

    let channel_count = field(reader.read_u32::<LittleEndian>(), "channel count")? as usize;
    let expected = BASIC_HEADER_LEN + EXTENDED_RECORD_LEN * channel_count;
    if header_bytes as usize != expected {
        return Err(NsxError::MalformedHeader(format!(
            "header length field is {} but {} channels need {} bytes",
            header_bytes, channel_count, expected
        )));
    }
    if period == 0 {
        return Err(NsxError::MalformedHeader("period is zero".to_string()));
    }

    let mut channels = Vec::with_capacity(channel_count.min(1024));
    for index in 0..channel_count {
        channels.push(read_extended_record(reader, index)?);
    }

    if let Some(id) = first_duplicate(&channels) {
        let index = channels.iter().rposition(|c| c.id == id).unwrap_or(0);
        return Err(NsxError::MalformedExtendedHeader {
            index,
            reason: format!("channel id {} appears twice", id),
        });
    }

    Ok(ExtendedHeader {
        label,
        comment,
        period,
        time_resolution,
        origin,
        channels,
    })
}

fn read_extended_record<R: Read>(reader: &mut R, index: usize) -> Result<ChannelInfo> {
    let mut record = [0u8; EXTENDED_RECORD_LEN];
    reader
        .read_exact(&mut record)
        .map_err(|_| NsxError::MalformedExtendedHeader {
            index,
            reason: "record is truncated".to_string(),
        })?;

    if &record[0..2] != EXTENDED_RECORD_TYPE {
        return Err(NsxError::MalformedExtendedHeader {
            index,
            reason: format!(
                "record type {:?} is not \"CC\"",
                String::from_utf8_lossy(&record[0..2])
            ),
        });
    }

    let mut r = &record[2..];
    parse_record(&mut r).map_err(|e| NsxError::MalformedExtendedHeader {
        index,
        reason: e.to_string(),
    })
}

fn parse_record(r: &mut &[u8]) -> io::Result<ChannelInfo> {
    Ok(ChannelInfo {
        id: r.read_u16::<LittleEndian>()?,
        label: read_fixed_string(r, LABEL_LEN)?,
        connector_bank: r.read_u8()?,
        connector_pin: r.read_u8()?,
        min_digital: r.read_i16::<LittleEndian>()?,
        max_digital: r.read_i16::<LittleEndian>()?,
        min_analog: r.read_i16::<LittleEndian>()?,
        max_analog: r.read_i16::<LittleEndian>()?,
        units: read_fixed_string(r, UNITS_LEN)?,
        high_freq: read_filter(r)?,
        low_freq: read_filter(r)?,
    })
}

fn read_filter<R: Read>(reader: &mut R) -> io::Result<FilterSpec> {
    Ok(FilterSpec {
        corner_mhz: reader.read_u32::<LittleEndian>()?,
        order: reader.read_u32::<LittleEndian>()?,
        kind: reader.read_u16::<LittleEndian>()?,
    })
}

fn first_duplicate(channels: &[ChannelInfo]) -> Option<u16> {
    let mut seen = HashSet::with_capacity(channels.len());
    channels.iter().map(|c| c.id).find(|id| !seen.insert(*id))
}

/// Serializes a header. Exact inverse of [`parse_header`].
pub fn encode_header(header: &FormatHeader) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(header_len(header) as usize);
    buf.extend_from_slice(header.version().tag());

    match header {
        FormatHeader::V21(h) => {
            write_fixed(&mut buf, "label", &h.label, LABEL_LEN)?;
            buf.write_u32::<LittleEndian>(h.period)?;
            buf.write_u32::<LittleEndian>(h.channels.len() as u32)?;
            check_len("basic header", LEGACY_BASIC_HEADER_LEN, buf.len())?;
            for channel in &h.channels {
                buf.write_u32::<LittleEndian>(channel.id as u32)?;
            }
        }
        FormatHeader::V22(h) | FormatHeader::V23(h) | FormatHeader::V30(h) => {
            let (major, minor) = match header.version() {
                FormatVersion::V2_2 => (2, 2),
                FormatVersion::V2_3 => (2, 3),
                _ => (3, 0),
            };
            buf.write_u8(major)?;
            buf.write_u8(minor)?;
            let total = BASIC_HEADER_LEN + EXTENDED_RECORD_LEN * h.channels.len();
            buf.write_u32::<LittleEndian>(total as u32)?;
            write_fixed(&mut buf, "label", &h.label, LABEL_LEN)?;
            write_fixed(&mut buf, "comment", &h.comment, COMMENT_LEN)?;
            buf.write_u32::<LittleEndian>(h.period)?;
            buf.write_u32::<LittleEndian>(h.time_resolution)?;
            let o = &h.origin;
            for value in [
                o.year,
                o.month,
                o.day_of_week,
                o.day,
                o.hour,
                o.minute,
                o.second,
                o.millisecond,
            ] {
                buf.write_u16::<LittleEndian>(value)?;
            }
            buf.write_u32::<LittleEndian>(h.channels.len() as u32)?;
            check_len("basic header", BASIC_HEADER_LEN, buf.len())?;

            for channel in &h.channels {
                let start = buf.len();
                encode_extended_record(&mut buf, channel)?;
                check_len("extended header record", EXTENDED_RECORD_LEN, buf.len() - start)?;
            }
        }
    }

    check_len("header", header_len(header) as usize, buf.len())?;
    Ok(buf)
}

fn encode_extended_record(buf: &mut Vec<u8>, channel: &ChannelInfo) -> Result<()> {
    buf.extend_from_slice(EXTENDED_RECORD_TYPE);
    buf.write_u16::<LittleEndian>(channel.id)?;
    write_fixed(buf, "channel label", &channel.label, LABEL_LEN)?;
    buf.write_u8(channel.connector_bank)?;
    buf.write_u8(channel.connector_pin)?;
    buf.write_i16::<LittleEndian>(channel.min_digital)?;
    buf.write_i16::<LittleEndian>(channel.max_digital)?;
    buf.write_i16::<LittleEndian>(channel.min_analog)?;
    buf.write_i16::<LittleEndian>(channel.max_analog)?;
    write_fixed(buf, "units", &channel.units, UNITS_LEN)?;
    for filter in [&channel.high_freq, &channel.low_freq] {
        buf.write_u32::<LittleEndian>(filter.corner_mhz)?;
        buf.write_u32::<LittleEndian>(filter.order)?;
        buf.write_u16::<LittleEndian>(filter.kind)?;
    }
    Ok(())
}

/// Writes `value` NUL padded to exactly `width` bytes.
fn write_fixed(buf: &mut Vec<u8>, field: &'static str, value: &str, width: usize) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(NsxError::EncodingSizeMismatch {
            field,
            expected: width,
            actual: bytes.len(),
        });
    }
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + width - bytes.len(), 0);
    Ok(())
}

pub(crate) fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(NsxError::EncodingSizeMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn round_trips_every_generation() {
        for version in ALL_VERSIONS {
            let header = sample_header(version, 3);
            let bytes = encode_header(&header).unwrap();
            assert_eq!(bytes.len() as u64, header_len(&header));
            let (parsed, offset) = parse_header(&bytes).unwrap();
            assert_eq!(parsed, header, "{:?}", version);
            assert_eq!(offset, bytes.len() as u64);
        }
    }

    #[test]
    fn header_sizes_match_layouts() {
        let h = sample_header(FormatVersion::V2_1, 4);
        assert_eq!(header_len(&h), 32 + 16);
        let h = sample_header(FormatVersion::V2_3, 4);
        assert_eq!(header_len(&h), 314 + 4 * 66);
    }

    #[test]
    fn timestamp_width_follows_generation() {
        assert_eq!(FormatVersion::V2_1.timestamp_width().bytes(), 0);
        assert_eq!(FormatVersion::V2_2.timestamp_width().bytes(), 4);
        assert_eq!(FormatVersion::V2_3.timestamp_width().bytes(), 4);
        assert_eq!(FormatVersion::V3_0.timestamp_width().bytes(), 8);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let mut bytes = encode_header(&sample_header(FormatVersion::V2_3, 2)).unwrap();
        bytes[..8].copy_from_slice(b"NEURALEV");
        assert!(matches!(
            parse_header(&bytes),
            Err(NsxError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn unknown_file_spec_is_unsupported() {
        let mut bytes = encode_header(&sample_header(FormatVersion::V2_2, 2)).unwrap();
        bytes[9] = 9;
        assert!(matches!(
            parse_header(&bytes),
            Err(NsxError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_basic_header_is_malformed() {
        let bytes = encode_header(&sample_header(FormatVersion::V2_3, 2)).unwrap();
        assert!(matches!(
            parse_header(&bytes[..100]),
            Err(NsxError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header(&bytes[..5]),
            Err(NsxError::MalformedHeader(_))
        ));
    }

    #[test]
    fn truncated_or_mistyped_record_is_malformed_extended() {
        let bytes = encode_header(&sample_header(FormatVersion::V3_0, 2)).unwrap();
        let cut = BASIC_HEADER_LEN + EXTENDED_RECORD_LEN + 10;
        assert!(matches!(
            parse_header(&bytes[..cut]),
            Err(NsxError::MalformedExtendedHeader { index: 1, .. })
        ));

        let mut bad = bytes.clone();
        bad[BASIC_HEADER_LEN] = b'X';
        assert!(matches!(
            parse_header(&bad),
            Err(NsxError::MalformedExtendedHeader { index: 0, .. })
        ));
    }

    #[test]
    fn inconsistent_header_length_is_malformed() {
        let mut bytes = encode_header(&sample_header(FormatVersion::V2_3, 2)).unwrap();
        bytes[10] = bytes[10].wrapping_add(1);
        assert!(matches!(
            parse_header(&bytes),
            Err(NsxError::MalformedHeader(_))
        ));
    }

    #[test]
    fn duplicate_channel_ids_are_rejected() {
        let mut header = sample_header(FormatVersion::V2_3, 3);
        if let FormatHeader::V23(h) = &mut header {
            h.channels[2].id = h.channels[0].id;
        }
        let bytes = encode_header(&header).unwrap();
        assert!(matches!(
            parse_header(&bytes),
            Err(NsxError::MalformedExtendedHeader { index: 2, .. })
        ));
    }

    #[test]
    fn oversized_label_fails_encoding() {
        let mut header = sample_header(FormatVersion::V2_2, 1);
        if let FormatHeader::V22(h) = &mut header {
            h.channels[0].label = "a label longer than sixteen".to_string();
        }
        assert!(matches!(
            encode_header(&header),
            Err(NsxError::EncodingSizeMismatch {
                field: "channel label",
                expected: 16,
                ..
            })
        ));
    }
}
