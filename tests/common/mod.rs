#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::path::{Path, PathBuf};

use nsx_codec::header::encode_header;
use nsx_codec::*;

/// 1 kHz recording: 30 ticks per sample for 2.x, 1000 for 3.0.
pub fn header(version: FormatVersion, channels: u16) -> FormatHeader {
    let channels: Vec<ChannelInfo> = (1..=channels)
        .map(|id| {
            let mut channel = ChannelInfo::with_default_range(id);
            if version != FormatVersion::V2_1 {
                channel.label = format!("ch{:03}", id);
                channel.connector_bank = 1;
                channel.connector_pin = id as u8;
            }
            channel
        })
        .collect();

    let extended = |time_resolution| ExtendedHeader {
        label: "1 kS/s".to_string(),
        comment: "integration fixture".to_string(),
        period: 30,
        time_resolution,
        origin: RecordingTime {
            year: 2025,
            month: 1,
            day_of_week: 5,
            day: 17,
            hour: 13,
            minute: 2,
            second: 44,
            millisecond: 90,
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

/// Raw value of channel row `row` in packet `packet`.
pub fn value(row: usize, packet: usize) -> i16 {
    (row as i16 + 1) * 1000 + (packet % 1000) as i16
}

fn samples(buf: &mut Vec<u8>, channels: usize, packet: usize) {
    for row in 0..channels {
        buf.write_i16::<LittleEndian>(value(row, packet)).unwrap();
    }
}

/// Runs of `(timestamp, count)` behind one packet header each (none for 2.1).
pub fn runs_file(header: &FormatHeader, runs: &[(u64, usize)]) -> Vec<u8> {
    let channels = header.channel_count();
    let mut buf = encode_header(header).unwrap();
    let mut packet = 0;
    for &(timestamp, count) in runs {
        match header.timestamp_width() {
            TimestampWidth::Absent => {}
            TimestampWidth::U32 => {
                buf.write_u8(0x01).unwrap();
                buf.write_u32::<LittleEndian>(timestamp as u32).unwrap();
                buf.write_u32::<LittleEndian>(count as u32).unwrap();
            }
            TimestampWidth::U64 => {
                buf.write_u8(0x01).unwrap();
                buf.write_u64::<LittleEndian>(timestamp).unwrap();
                buf.write_u32::<LittleEndian>(count as u32).unwrap();
            }
        }
        for _ in 0..count {
            samples(&mut buf, channels, packet);
            packet += 1;
        }
    }
    buf
}

/// 3.0 file with one single-sample packet per timestamp.
pub fn ptp_file(header: &FormatHeader, timestamps: &[u64]) -> Vec<u8> {
    let channels = header.channel_count();
    let mut buf = encode_header(header).unwrap();
    for (packet, &timestamp) in timestamps.iter().enumerate() {
        buf.write_u8(0x01).unwrap();
        buf.write_u64::<LittleEndian>(timestamp).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        samples(&mut buf, channels, packet);
    }
    buf
}

/// Nominal 1 kHz timestamps with a pause of `pause` extra ticks before packet `at`.
pub fn ptp_timestamps(count: usize, at: usize, pause: u64) -> Vec<u64> {
    (0..count as u64)
        .map(|i| i * 1000 + if i as usize >= at { pause } else { 0 })
        .collect()
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Quiet decode options.
pub fn options() -> DecodeOptions {
    DecodeOptions {
        quiet: true,
        ..DecodeOptions::default()
    }
}
