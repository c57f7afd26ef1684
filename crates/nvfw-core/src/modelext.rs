//! The native half of C8: MODELEXT sub-record decomposition and
//! recomposition. A MODELEXT partition is a catenation of sub-records, each
//! introduced by a 16-byte little-endian header of `(size, type, number,
//! version)`; `size` covers the header itself plus the record's payload.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

const SUB_RECORD_HEADER_LEN: u64 = 16;
/// Offset, within a recomposed MODELEXT blob, of the total-size field
/// `compose` writes after padding.
pub const TOTAL_SIZE_OFFSET: u64 = 0x30;

/// The eight sub-record types named in the format, with their canonical
/// file suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRecordType {
    Info,
    BinInfo,
    PinmuxCfg,
    IntdirCfg,
    EmbPartition,
    GpioInfo,
    DramPartition,
    ModelCfg,
}

impl SubRecordType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => SubRecordType::Info,
            2 => SubRecordType::BinInfo,
            3 => SubRecordType::PinmuxCfg,
            4 => SubRecordType::IntdirCfg,
            5 => SubRecordType::EmbPartition,
            6 => SubRecordType::GpioInfo,
            7 => SubRecordType::DramPartition,
            8 => SubRecordType::ModelCfg,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            SubRecordType::Info => 1,
            SubRecordType::BinInfo => 2,
            SubRecordType::PinmuxCfg => 3,
            SubRecordType::IntdirCfg => 4,
            SubRecordType::EmbPartition => 5,
            SubRecordType::GpioInfo => 6,
            SubRecordType::DramPartition => 7,
            SubRecordType::ModelCfg => 8,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            SubRecordType::Info => "_INFO",
            SubRecordType::BinInfo => "_BIN_INFO",
            SubRecordType::PinmuxCfg => "_PINMUX_CFG",
            SubRecordType::IntdirCfg => "_INTDIR_CFG",
            SubRecordType::EmbPartition => "_EMB_PARTITION",
            SubRecordType::GpioInfo => "_GPIO_INFO",
            SubRecordType::DramPartition => "_DRAM_PARTITION",
            SubRecordType::ModelCfg => "_MODEL_CFG",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubRecord {
    pub record_type: SubRecordType,
    pub number: u32,
    pub version: u32,
    /// The header bytes, verbatim, so `compose` can round-trip a record
    /// whose type code wasn't recognized as one of the eight known kinds
    /// without corrupting it.
    pub header: [u8; SUB_RECORD_HEADER_LEN as usize],
    pub payload: Vec<u8>,
}

/// Splits a MODELEXT partition's bytes into its sub-records.
pub fn decompose(data: &[u8]) -> Result<Vec<SubRecord>> {
    let mut cursor = Cursor::new(data);
    let mut records = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let header_start = cursor.position();
        if data.len() as u64 - header_start < SUB_RECORD_HEADER_LEN {
            break;
        }

        let size = cursor.read_u32::<LittleEndian>()? as u64;
        let type_code = cursor.read_u32::<LittleEndian>()?;
        let number = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u32::<LittleEndian>()?;

        if size < SUB_RECORD_HEADER_LEN || header_start + size > data.len() as u64 {
            return Err(Error::format(
                header_start,
                format!("modelext sub-record declares size {size}, which doesn't fit"),
            ));
        }

        let record_type = SubRecordType::from_code(type_code).ok_or_else(|| {
            Error::format(header_start, format!("unrecognized modelext sub-record type {type_code}"))
        })?;

        let mut header = [0u8; SUB_RECORD_HEADER_LEN as usize];
        header.copy_from_slice(&data[header_start as usize..header_start as usize + SUB_RECORD_HEADER_LEN as usize]);

        let payload_start = header_start + SUB_RECORD_HEADER_LEN;
        let payload_end = header_start + size;
        let payload = data[payload_start as usize..payload_end as usize].to_vec();

        records.push(SubRecord {
            record_type,
            number,
            version,
            header,
            payload,
        });

        cursor.seek(SeekFrom::Start(payload_end))?;
    }

    Ok(records)
}

/// Recombines sub-records in order, writing each header verbatim, padding
/// the result to a 4-byte boundary, and stamping the total size at
/// [`TOTAL_SIZE_OFFSET`].
pub fn compose(records: &[SubRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        out.write_all(&record.header)?;
        out.write_all(&record.payload)?;
    }

    let padding = (4 - (out.len() % 4)) % 4;
    out.resize(out.len() + padding, 0);

    if out.len() as u64 > TOTAL_SIZE_OFFSET + 4 {
        let total_size = out.len() as u32;
        out[TOTAL_SIZE_OFFSET as usize..TOTAL_SIZE_OFFSET as usize + 4]
            .copy_from_slice(&total_size.to_le_bytes());
    }

    Ok(out)
}

/// Decomposed sub-records, each paired with the file name `compose_files`
/// would expect back (`<base>_<suffix>`).
pub fn file_name(base: &str, record: &SubRecord) -> String {
    format!("{base}{}", record.record_type.suffix())
}
