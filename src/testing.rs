//! Synthetic headers and files for unit tests.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::header::encode_header;
use crate::types::*;

pub const ALL_VERSIONS: [FormatVersion; 4] = [
    FormatVersion::V2_1,
    FormatVersion::V2_2,
    FormatVersion::V2_3,
    FormatVersion::V3_0,
];

/// 1 kHz header: 30 ticks per sample for 2.x, 1000 for 3.0.
pub fn sample_header(version: FormatVersion, channels: usize) -> FormatHeader {
    let channels: Vec<ChannelInfo> = (0..channels)
        .map(|i| {
            if version == FormatVersion::V2_1 {
                return ChannelInfo::with_default_range(i as u16 + 1);
            }
            ChannelInfo {
                id: i as u16 + 1,
                label: format!("elec{}", i + 1),
                connector_bank: (i / 32) as u8 + 1,
                connector_pin: (i % 32) as u8 + 1,
                min_digital: -32764,
                max_digital: 32764,
                min_analog: -8191,
                max_analog: 8191,
                units: "uV".to_string(),
                high_freq: FilterSpec {
                    corner_mhz: 300,
                    order: 1,
                    kind: 1,
                },
                low_freq: FilterSpec {
                    corner_mhz: 7_500_000,
                    order: 3,
                    kind: 1,
                },
            }
        })
        .collect();

    let extended = |time_resolution| ExtendedHeader {
        label: "1 kS/s".to_string(),
        comment: "synthetic recording".to_string(),
        period: 30,
        time_resolution,
        origin: RecordingTime {
            year: 2024,
            month: 3,
            day_of_week: 2,
            day: 12,
            hour: 9,
            minute: 41,
            second: 7,
            millisecond: 512,
        },
        channels: channels.clone(),
    };

    match version {
        FormatVersion::V2_1 => FormatHeader::V21(LegacyHeader {
            label: "1 kS/s".to_string(),
            period: 30,
            channels,
        }),
        FormatVersion::V2_2 => FormatHeader::V22(extended(30_000)),
        FormatVersion::V2_3 => FormatHeader::V23(extended(30_000)),
        FormatVersion::V3_0 => FormatHeader::V30(extended(1_000_000)),
    }
}

/// Deterministic raw value of `channel` at absolute packet index `packet`.
pub fn sample_value(channel: usize, packet: usize) -> i16 {
    ((channel * 7919 + packet * 31) % 20_000) as i16 - 10_000
}

fn write_samples(buf: &mut Vec<u8>, channels: usize, packet: usize) {
    for ch in 0..channels {
        buf.write_i16::<LittleEndian>(sample_value(ch, packet)).unwrap();
    }
}

/// File made of runs `(timestamp, count)`; a 2.1 header gets the bare samples.
///
/// Packet indices used for sample values run on across runs.
pub fn per_segment_file(header: &FormatHeader, runs: &[(u64, usize)]) -> Vec<u8> {
    let channels = header.channel_count();
    let mut buf = encode_header(header).unwrap();
    let mut packet = 0;
    for &(timestamp, count) in runs {
        match header.timestamp_width() {
            TimestampWidth::Absent => {}
            TimestampWidth::U32 => {
                buf.push(0x01);
                buf.write_u32::<LittleEndian>(timestamp as u32).unwrap();
                buf.write_u32::<LittleEndian>(count as u32).unwrap();
            }
            TimestampWidth::U64 => {
                buf.push(0x01);
                buf.write_u64::<LittleEndian>(timestamp).unwrap();
                buf.write_u32::<LittleEndian>(count as u32).unwrap();
            }
        }
        for _ in 0..count {
            write_samples(&mut buf, channels, packet);
            packet += 1;
        }
    }
    buf
}

/// 3.0 file with one packet, and one timestamp, per sample.
pub fn high_res_file(header: &FormatHeader, timestamps: &[u64]) -> Vec<u8> {
    let channels = header.channel_count();
    let mut buf = encode_header(header).unwrap();
    for (packet, &timestamp) in timestamps.iter().enumerate() {
        buf.push(0x01);
        buf.write_u64::<LittleEndian>(timestamp).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        write_samples(&mut buf, channels, packet);
    }
    buf
}
