//! C2: the BCL1 compressed-block codec.
//!
//! A BCL1 block is a 16-byte header (magic, stored checksum, algorithm
//! code, uncompressed size, packed size) followed by the packed payload
//! and optional zero-padding to a 4-byte boundary. The payload itself is
//! one of three wrapped algorithms: a custom LZ77 variant ([`lz77`]),
//! LZMA in "alone" format ([`lzma`]), or raw zlib ([`zlib`]).

pub mod lz77;
pub mod lzma;
pub mod zlib;

use crate::checksum;
use crate::error::{Error, Result};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub const MAGIC: &[u8; 4] = b"BCL1";
pub const HEADER_LEN: u64 = 16;

/// A BCL1 payload algorithm. The core can decompress and recompress
/// [`Algorithm::Lz77`], [`Algorithm::Lzma`], and [`Algorithm::Zlib`];
/// [`Algorithm::Other`] is reported but never (de)compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Lz77,
    Lzma,
    Zlib,
    Other(u16),
}

impl Algorithm {
    fn from_code(code: u16) -> Self {
        match code {
            0x09 => Algorithm::Lz77,
            0x0B => Algorithm::Lzma,
            0x0C => Algorithm::Zlib,
            other => Algorithm::Other(other),
        }
    }

    fn code(self) -> u16 {
        match self {
            Algorithm::Lz77 => 0x09,
            Algorithm::Lzma => 0x0B,
            Algorithm::Zlib => 0x0C,
            Algorithm::Other(code) => code,
        }
    }
}

/// The 16-byte BCL1 block header.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub checksum: u16,
    pub algorithm: Algorithm,
    pub uncompressed_size: u32,
    pub packed_size: u32,
    /// The dictionary size recorded in the payload's own LZMA properties
    /// header, populated only when `algorithm == Algorithm::Lzma`.
    pub lzma_dict_size: Option<u32>,
}

/// Reads the 16-byte header at `start`, validating the magic.
pub fn read_header<R: Read + Seek>(reader: &mut R, start: u64) -> Result<BlockHeader> {
    reader.seek(SeekFrom::Start(start))?;
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::format(start, "expected \"BCL1\" magic"));
    }
    let checksum = reader.read_u16::<LittleEndian>()?;
    let algorithm = Algorithm::from_code(reader.read_u16::<BigEndian>()?);
    let uncompressed_size = reader.read_u32::<BigEndian>()?;
    let packed_size = reader.read_u32::<BigEndian>()?;
    Ok(BlockHeader {
        checksum,
        algorithm,
        uncompressed_size,
        packed_size,
        lzma_dict_size: None,
    })
}

/// Decompresses the BCL1 block at `start`, returning its header and the
/// recovered uncompressed bytes. `id` is used only to annotate codec
/// errors.
pub fn decompress<R: Read + Seek>(reader: &mut R, start: u64, id: u32) -> Result<(BlockHeader, Vec<u8>)> {
    let mut header = read_header(reader, start)?;
    reader.seek(SeekFrom::Start(start + HEADER_LEN))?;
    let mut payload = vec![0u8; header.packed_size as usize];
    reader.read_exact(&mut payload)?;

    let data = match header.algorithm {
        Algorithm::Lz77 => lz77::decompress(&payload, header.uncompressed_size as usize)
            .map_err(|msg| Error::codec(id, start, msg))?,
        Algorithm::Lzma => {
            if payload.len() >= 5 {
                header.lzma_dict_size = Some(u32::from_le_bytes(payload[1..5].try_into().unwrap()));
            }
            lzma::decompress(&payload, header.uncompressed_size as usize)
                .map_err(|msg| Error::codec(id, start, msg))?
        }
        Algorithm::Zlib => {
            zlib::decompress(&payload).map_err(|msg| Error::codec(id, start, msg))?
        }
        Algorithm::Other(code) => {
            return Err(Error::codec(
                id,
                start,
                format!("algorithm {code:#06x} is not supported"),
            ));
        }
    };
    Ok((header, data))
}

/// Whether a freshly-written BCL1 block in this context should have its
/// payload padded out to a 4-byte boundary. True for everything except a
/// non-zero partition of a bootloader-dialect file (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub pad_to_four: bool,
    /// Bootloader dialect never recomputes the inner BCL1 checksum; the
    /// file-level checksum covers it instead.
    pub recompute_checksum: bool,
}

impl BlockContext {
    pub fn standalone() -> Self {
        BlockContext {
            pad_to_four: true,
            recompute_checksum: true,
        }
    }

    pub fn bootloader() -> Self {
        BlockContext {
            pad_to_four: false,
            recompute_checksum: false,
        }
    }
}

/// Compresses `raw` with `algorithm` into a complete BCL1 block (header +
/// payload + padding). `min_uncompressed_size` is the previous block's
/// recorded uncompressed size, if any: the header never reports a smaller
/// uncompressed size than it used to, even if the new raw data is shorter.
pub fn compress_block(
    raw: &[u8],
    algorithm: Algorithm,
    min_uncompressed_size: u32,
    ctx: BlockContext,
) -> Result<Vec<u8>> {
    compress_block_with_hint(raw, algorithm, min_uncompressed_size, ctx, None)
}

/// As [`compress_block`], but lets the caller pass the dictionary size
/// recorded in a prior LZMA block so recompression reuses it instead of
/// picking a fresh one. Ignored for other algorithms.
pub fn compress_block_with_hint(
    raw: &[u8],
    algorithm: Algorithm,
    min_uncompressed_size: u32,
    ctx: BlockContext,
    lzma_dict_size_hint: Option<u32>,
) -> Result<Vec<u8>> {
    let payload = match algorithm {
        Algorithm::Lz77 => lz77::compress(raw),
        Algorithm::Lzma => lzma::compress(raw, lzma_dict_size_hint)?,
        Algorithm::Zlib => zlib::compress(raw)?,
        Algorithm::Other(code) => {
            return Err(Error::Codec {
                id: 0,
                offset: 0,
                message: format!("algorithm {code:#06x} is not supported"),
            });
        }
    };

    let padding = if ctx.pad_to_four {
        (4 - (payload.len() % 4)) % 4
    } else {
        0
    };
    let packed_size = (payload.len() + padding) as u32;
    let uncompressed_size = (raw.len() as u32).max(min_uncompressed_size);

    let mut block = Vec::with_capacity(HEADER_LEN as usize + packed_size as usize);
    block.write_all(MAGIC)?;
    block.write_u16::<LittleEndian>(0)?; // checksum hole, patched below
    block.write_u16::<BigEndian>(algorithm.code())?;
    block.write_u32::<BigEndian>(uncompressed_size)?;
    block.write_u32::<BigEndian>(packed_size)?;
    block.write_all(&payload)?;
    block.resize(block.len() + padding, 0);

    if ctx.recompute_checksum {
        let stored = checksum::checksum(&mut Cursor::new(&block), 0, block.len() as u64, Some(4))?;
        block[4..6].copy_from_slice(&stored.to_le_bytes());
    }

    Ok(block)
}

/// The optional intra-payload CRC fix (§4.3): before compressing, some
/// partitions' raw data carries its own 16-bit checksum at a
/// firmware-specific fixed offset. If one of the three known markers is
/// present, recompute that checksum over the whole raw buffer and patch it
/// in place before compression proceeds.
pub fn fix_intra_payload_checksum(raw: &mut [u8]) -> Result<()> {
    let hole = if matches_at(raw, 0x46C, &[0x55, 0xAA]) && matches_at(raw, 0x6C, &[0xFF, 0xFF]) {
        Some(0x46E)
    } else if matches_at(raw, 0x6C, &[0x55, 0xAA]) {
        Some(0x6E)
    } else if matches_at(raw, 0x16C, &[0x55, 0xAA]) {
        Some(0x16E)
    } else {
        None
    };

    let Some(hole) = hole else {
        return Ok(());
    };

    let stored = checksum::checksum(&mut Cursor::new(&raw[..]), 0, raw.len() as u64, Some(hole))?;
    raw[hole as usize..hole as usize + 2].copy_from_slice(&stored.to_le_bytes());
    Ok(())
}

fn matches_at(data: &[u8], offset: u64, expected: &[u8]) -> bool {
    let offset = offset as usize;
    data.len() >= offset + expected.len() && &data[offset..offset + expected.len()] == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_lz77() {
        let mut raw = vec![0x41u8; 64 * 1024];
        raw.extend(std::iter::repeat(0x42u8).take(64 * 1024));
        let block = compress_block(&raw, Algorithm::Lz77, 0, BlockContext::standalone()).unwrap();
        let mut cursor = Cursor::new(block);
        let (header, decoded) = decompress(&mut cursor, 0, 0).unwrap();
        assert_eq!(decoded, raw);
        assert_eq!(header.uncompressed_size as usize, raw.len());
    }

    #[test]
    fn round_trips_zlib() {
        let raw = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let block = compress_block(&raw, Algorithm::Zlib, 0, BlockContext::standalone()).unwrap();
        let mut cursor = Cursor::new(block);
        let (_, decoded) = decompress(&mut cursor, 0, 0).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn uncompressed_size_never_shrinks() {
        let raw = vec![0u8; 16];
        let block = compress_block(&raw, Algorithm::Zlib, 4096, BlockContext::standalone()).unwrap();
        let header = read_header(&mut Cursor::new(block), 0).unwrap();
        assert_eq!(header.uncompressed_size, 4096);
    }

    #[test]
    fn bootloader_block_has_no_padding_and_no_checksum() {
        let raw = vec![1u8; 7]; // payload length after compression likely not a multiple of 4
        let block = compress_block(&raw, Algorithm::Zlib, 0, BlockContext::bootloader()).unwrap();
        let header = read_header(&mut Cursor::new(&block), 0).unwrap();
        assert_eq!(header.packed_size as usize, block.len() - HEADER_LEN as usize);
        assert_eq!(&block[4..6], &[0, 0]);
    }

    #[test]
    fn intra_payload_checksum_patches_in_place() {
        let mut raw = vec![0u8; 0x6E + 2];
        raw[0x6C] = 0x55;
        raw[0x6D] = 0xAA;
        fix_intra_payload_checksum(&mut raw).unwrap();
        let stored = u16::from_le_bytes([raw[0x6E], raw[0x6E + 1]]);
        assert_ne!(stored, 0);
    }
}
