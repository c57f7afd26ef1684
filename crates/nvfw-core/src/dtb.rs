//! The device-tree name table: a small record list mapping partition ids
//! to short and long names, used to disambiguate partitions the magic-byte
//! classifier can't tell apart on its own (plain "uboot"/"atf" blobs).

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

pub const MARKER: &[u8; 23] = b"NVTPACK_FW_INI_16072017";
const SHORT_NAME_LEN: usize = 8;
const FILE_NAME_LEN: usize = 32;
/// marker(23) + id(4) + short_name(8) + file_name(32), one byte shy of the
/// marker being null-terminated in the on-disk layout.
const RECORD_LEN: usize = 23 + 4 + SHORT_NAME_LEN + FILE_NAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtbEntry {
    pub id: u32,
    pub short_name: String,
    pub file_name: String,
}

/// The parsed device-tree name table, keyed by partition id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtbNameTable {
    entries: Vec<DtbEntry>,
}

impl DtbNameTable {
    pub fn entries(&self) -> &[DtbEntry] {
        &self.entries
    }

    pub fn short_name(&self, id: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.short_name.as_str())
    }
}

/// Scans the DTB partition at `[start, start + length)` for
/// back-to-back name records, each introduced by the marker string.
/// Unrecognized bytes between records are skipped; a table with zero
/// records is not an error.
pub fn parse<R: Read + Seek>(reader: &mut R, start: u64, length: u64) -> Result<DtbNameTable> {
    reader.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf)?;

    let mut entries = Vec::new();
    let mut pos = 0usize;
    while let Some(found) = find_marker(&buf[pos..]) {
        let record_start = pos + found;
        if record_start + RECORD_LEN > buf.len() {
            break;
        }
        let record = &buf[record_start..record_start + RECORD_LEN];
        let id = (&record[23..27]).read_u32::<LittleEndian>().map_err(|_| {
            Error::format(start + record_start as u64, "truncated device-tree name record")
        })?;
        let short_name = decode_cstr(&record[27..27 + SHORT_NAME_LEN]);
        let file_name = decode_cstr(&record[27 + SHORT_NAME_LEN..27 + SHORT_NAME_LEN + FILE_NAME_LEN]);

        entries.push(DtbEntry {
            id,
            short_name,
            file_name,
        });
        pos = record_start + RECORD_LEN;
    }

    Ok(DtbNameTable { entries })
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(MARKER.len())
        .position(|window| window == MARKER)
}

fn decode_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
