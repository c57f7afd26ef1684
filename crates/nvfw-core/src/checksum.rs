//! C1: the 16-bit additive checksum used throughout the container formats.
//!
//! The checksum treats the covered range as a stream of little-endian
//! 16-bit words indexed by their position, and sums `word + pos` — except
//! at the "hole", the byte offset where the stored checksum itself lives,
//! where only `pos` is added. Only the low 16 bits of the running sum ever
//! matter (the final value is `(-sum) & 0xFFFF`), so the whole computation
//! can be carried in a `u16` with wrapping arithmetic; this sidesteps any
//! concern about overflow on large files.

use std::io::{Read, Seek, SeekFrom};

/// Size of the read buffer used while streaming a range through the
/// checksum. Matches the 1 MiB buffer the reference implementation uses.
const CHUNK_SIZE: usize = 1 << 20;

/// Computes the C1 checksum over `[start, start + length)` of `reader`.
///
/// `hole_offset`, if given, is a byte offset *relative to `start`*: the
/// 16-bit word at that position contributes only its word index, not its
/// value, so verifying a checksum field against itself is stable. An odd
/// trailing byte (when `length` is odd) is ignored.
pub fn checksum<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    length: u64,
    hole_offset: Option<u64>,
) -> std::io::Result<u16> {
    reader.seek(SeekFrom::Start(start))?;

    let word_count = length / 2;
    let covered = word_count * 2;

    let mut sum: u16 = 0;
    let mut pos: u64 = 0;
    let mut remaining = covered;
    let mut buf = vec![0u8; CHUNK_SIZE.min(covered.max(1) as usize)];

    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let chunk = &mut buf[..want];
        reader.read_exact(chunk)?;

        for word in chunk.chunks_exact(2) {
            let value = u16::from_le_bytes([word[0], word[1]]);
            let byte_offset = pos * 2;
            if hole_offset == Some(byte_offset) {
                sum = sum.wrapping_add(pos as u16);
            } else {
                sum = sum.wrapping_add(value).wrapping_add(pos as u16);
            }
            pos += 1;
        }

        remaining -= want as u64;
    }

    Ok(sum.wrapping_neg())
}
