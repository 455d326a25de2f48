//! Encoding of the in-memory model back to the on-disk layout.

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{NsxError, Result};
use crate::header::{check_len, encode_header};
use crate::segments::PACKET_MARKER;
use crate::types::*;

/// Streaming writer for one NSx file.
///
/// The header is written on construction; blocks follow in call order.
pub struct NsxWriter<W: Write> {
    writer: BufWriter<W>,
    header: FormatHeader,
    bytes_written: u64,
    blocks: usize,
}

impl<W: Write> NsxWriter<W> {
    pub fn new(inner: W, header: FormatHeader) -> Result<Self> {
        let mut writer = BufWriter::new(inner);
        let bytes = encode_header(&header)?;
        writer.write_all(&bytes)?;

        Ok(Self {
            writer,
            header,
            bytes_written: bytes.len() as u64,
            blocks: 0,
        })
    }

    /// Writes one block of raw samples.
    ///
    /// Blocks carrying per-packet timestamps are written one packet per
    /// sample; others get a single packet header for the whole block.
    pub fn write_block(&mut self, block: &DecodedBlock) -> Result<()> {
        let samples = block.samples.as_raw().ok_or_else(|| {
            NsxError::InvalidOption(
                "only raw 16-bit samples can be encoded; decode with raw units and Int16 precision"
                    .to_string(),
            )
        })?;
        check_len("channel rows", self.header.channel_count(), samples.nrows())?;

        let width = self.header.timestamp_width();
        let packets = samples.ncols();
        let row_bytes = samples.nrows() * 2;

        match (width, block.timestamps.as_ref()) {
            (TimestampWidth::Absent, _) => {
                if self.blocks > 0 {
                    log::warn!("2.1 files hold one segment; block {} is appended to it", self.blocks);
                }
                let mut data = Vec::with_capacity(packets * row_bytes);
                for value in samples.t().iter() {
                    data.write_i16::<LittleEndian>(*value)?;
                }
                check_len("sample data", packets * row_bytes, data.len())?;
                self.put(&data)?;
            }
            (TimestampWidth::U64, Some(stamps)) => {
                check_len("packet timestamps", packets, stamps.len())?;
                let mut packet = Vec::with_capacity(13 + row_bytes);
                for (column, &timestamp) in samples.columns().into_iter().zip(stamps.iter()) {
                    packet.clear();
                    packet.write_u8(PACKET_MARKER)?;
                    packet.write_u64::<LittleEndian>(timestamp)?;
                    packet.write_u32::<LittleEndian>(1)?;
                    for value in column.iter() {
                        packet.write_i16::<LittleEndian>(*value)?;
                    }
                    check_len("packet", 13 + row_bytes, packet.len())?;
                    self.put(&packet)?;
                }
            }
            (width, _) => {
                let count = u32::try_from(packets).map_err(|_| {
                    NsxError::InvalidOption(format!(
                        "block of {} samples does not fit a packet header",
                        packets
                    ))
                })?;
                let mut head = Vec::with_capacity(13);
                head.write_u8(PACKET_MARKER)?;
                match width {
                    TimestampWidth::U32 => {
                        let timestamp = u32::try_from(block.timestamp).map_err(|_| {
                            NsxError::InvalidOption(format!(
                                "timestamp {} does not fit 32 bits",
                                block.timestamp
                            ))
                        })?;
                        head.write_u32::<LittleEndian>(timestamp)?
                    }
                    _ => head.write_u64::<LittleEndian>(block.timestamp)?,
                }
                head.write_u32::<LittleEndian>(count)?;
                check_len("packet header", 5 + width.bytes() as usize, head.len())?;
                self.put(&head)?;

                let mut data = Vec::with_capacity(packets * row_bytes);
                for value in samples.t().iter() {
                    data.write_i16::<LittleEndian>(*value)?;
                }
                check_len("sample data", packets * row_bytes, data.len())?;
                self.put(&data)?;
            }
        }

        self.blocks += 1;
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes buffered bytes and returns the inner writer with the byte count.
    pub fn finish(mut self) -> Result<(W, u64)> {
        self.writer.flush()?;
        let inner = self
            .writer
            .into_inner()
            .map_err(|e| NsxError::Io(e.into_error()))?;
        Ok((inner, self.bytes_written))
    }
}

/// Encodes a whole model into a byte buffer.
pub fn encode(data: &NsxData) -> Result<Vec<u8>> {
    let mut writer = NsxWriter::new(Vec::new(), data.header.clone())?;
    for block in &data.blocks {
        writer.write_block(block)?;
    }
    let (bytes, _) = writer.finish()?;
    Ok(bytes)
}

/// Writes a model to `path` and returns the number of bytes written.
///
/// The file is written next to its destination under a temporary name and
/// renamed into place once complete, so a failed encode leaves nothing
/// behind. An existing destination is only replaced when `overwrite` is set.
pub fn save<P: AsRef<Path>>(data: &NsxData, path: P, overwrite: bool) -> Result<u64> {
    let path = path.as_ref();
    if !overwrite && path.exists() {
        return Err(NsxError::DestinationExists(path.to_path_buf()));
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    let written = {
        let mut writer = NsxWriter::new(tmp.as_file_mut(), data.header.clone())?;
        for block in &data.blocks {
            writer.write_block(block)?;
        }
        writer.finish()?.1
    };
    tmp.as_file().sync_all()?;

    if overwrite {
        tmp.persist(path).map_err(|e| NsxError::Io(e.error))?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| NsxError::Io(e.error))?;
    }

    let on_disk = fs::metadata(path)?.len();
    check_len("file", written as usize, on_disk as usize)?;

    log::info!("Wrote {} bytes to {}", written, path.display());
    Ok(written)
}
