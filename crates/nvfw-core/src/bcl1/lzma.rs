//! LZMA "alone" format, used by BCL1 algorithm code `0x0B`.
//!
//! The payload starts with a 13-byte properties header: one byte packing
//! `(pb * 5 + lp) * 9 + lc`, a 4-byte little-endian dictionary size, and an
//! 8-byte little-endian uncompressed size. What follows is a raw,
//! headerless LZMA1 stream decodable with exactly those properties. This
//! module builds that header itself and drives `xz2`'s raw filter API
//! rather than its higher-level ".xz"/"alone" convenience wrappers, which
//! don't expose the uncompressed-size field directly.

use std::io::{Read, Write};
use xz2::read::XzDecoder;
use xz2::stream::{LzmaOptions, Stream};
use xz2::write::XzEncoder;

const PROPS_LEN: usize = 13;
const LITERAL_CONTEXT_BITS: u32 = 3;
const LITERAL_POSITION_BITS: u32 = 0;
const POSITION_BITS: u32 = 2;
const PRESET: u32 = 6;

fn properties_byte() -> u8 {
    ((POSITION_BITS * 5 + LITERAL_POSITION_BITS) * 9 + LITERAL_CONTEXT_BITS) as u8
}

fn lzma_options(dict_size: u32) -> Result<LzmaOptions, String> {
    let mut options = LzmaOptions::new_preset(PRESET).map_err(|e| e.to_string())?;
    options.dict_size(dict_size);
    options.literal_context_bits(LITERAL_CONTEXT_BITS);
    options.literal_position_bits(LITERAL_POSITION_BITS);
    options.position_bits(POSITION_BITS);
    Ok(options)
}

/// Decodes an LZMA-alone payload, trusting the embedded uncompressed-size
/// field over `expected_len` only for capacity; the caller's `expected_len`
/// (the BCL1 header's uncompressed_size) is what's checked.
pub fn decompress(payload: &[u8], expected_len: usize) -> Result<Vec<u8>, String> {
    if payload.len() < PROPS_LEN {
        return Err("lzma payload shorter than the 13-byte properties header".into());
    }

    let props = payload[0];
    let lc = props % 9;
    let remainder = props / 9;
    let lp = remainder % 5;
    let pb = remainder / 5;
    if lc != LITERAL_CONTEXT_BITS as u8 || lp != LITERAL_POSITION_BITS as u8 || pb != POSITION_BITS as u8 {
        return Err(format!(
            "unsupported lzma properties byte {props:#04x} (lc={lc} lp={lp} pb={pb})"
        ));
    }

    let dict_size = u32::from_le_bytes(payload[1..5].try_into().unwrap());
    let uncompressed_size = u64::from_le_bytes(payload[5..13].try_into().unwrap());
    if uncompressed_size as usize != expected_len {
        return Err(format!(
            "lzma header declares {uncompressed_size} bytes, bcl1 header declares {expected_len}"
        ));
    }

    let options = lzma_options(dict_size.max(1 << 16))?;
    let stream = Stream::new_lzma_decoder(&options).map_err(|e| e.to_string())?;
    let mut decoder = XzDecoder::new_stream(&payload[PROPS_LEN..], stream);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| format!("lzma decode failed: {e}"))?;

    if out.len() != expected_len {
        return Err(format!(
            "lzma stream decoded to {} bytes, expected {expected_len}",
            out.len()
        ));
    }
    Ok(out)
}

/// Encodes `raw` as an LZMA-alone payload: the 13-byte properties header
/// followed by a raw LZMA1 stream. `dict_size_hint` is the dictionary size
/// recorded in the block being replaced, if any; recompression reuses it
/// (clamped to at least 4 KiB) rather than picking a fresh size.
pub fn compress(raw: &[u8], dict_size_hint: Option<u32>) -> crate::error::Result<Vec<u8>> {
    let dict_size = dict_size_hint
        .unwrap_or_else(|| (raw.len().next_power_of_two().max(1 << 16)).min(1 << 26) as u32)
        .max(1 << 12);
    let options = lzma_options(dict_size)
        .map_err(|msg| crate::error::Error::Codec { id: 0, offset: 0, message: msg })?;
    let stream = Stream::new_lzma_encoder(&options)
        .map_err(|e| crate::error::Error::Codec { id: 0, offset: 0, message: e.to_string() })?;

    let mut encoder = XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(raw)?;
    let body = encoder.finish()?;

    let mut out = Vec::with_capacity(PROPS_LEN + body.len());
    out.push(properties_byte());
    out.extend_from_slice(&dict_size.to_le_bytes());
    out.extend_from_slice(&(raw.len() as u64).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}
