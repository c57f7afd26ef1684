//! The firmware image: the explicit state that replaces the reference
//! implementation's parallel global arrays (§9 "Globals → explicit
//! state"). A [`FirmwareImage`] bundles the dialect, the partition list
//! (each with its classified kind and checksum status), and the
//! device-tree name table, built from a single parse pass over a reader.

use crate::checksum;
use crate::classify::{self, ChecksumField, Kind};
use crate::container::{self, Dialect, ParsedContainer, PartitionEntry};
use crate::dtb::DtbNameTable;
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// A single partition with everything the report and the operation
/// dispatcher need about it.
#[derive(Debug, Clone)]
pub struct Partition {
    pub entry: PartitionEntry,
    pub kind: Kind,
    /// `None` when the kind carries no stored checksum.
    pub stored_checksum: Option<u32>,
    pub computed_checksum: Option<u16>,
}

impl Partition {
    pub fn is_checksum_valid(&self) -> bool {
        match (self.stored_checksum, self.computed_checksum) {
            (Some(stored), Some(computed)) => stored == computed as u32,
            _ => true,
        }
    }
}

/// One partition's line in a structured report.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub id: u32,
    pub kind: String,
    pub start_offset: u64,
    pub size: u64,
    pub checksum_valid: bool,
}

/// A whole-image structured report; the CLI's printer is the only thing
/// that turns this into colored/tagged text.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub dialect: &'static str,
    pub dialect_checksum_valid: bool,
    pub partitions: Vec<PartitionReport>,
}

#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub dialect: Dialect,
    pub partitions: Vec<Partition>,
    pub dtb_names: DtbNameTable,
    /// Whether the dialect-level checksum (HDR2 `0x24`, HDR's table
    /// checksum, or the bootloader file checksum) matched on parse.
    pub dialect_checksum_valid: bool,
}

impl FirmwareImage {
    /// Parses `reader` end to end: dialect, partition table, per-partition
    /// classification, and stored-vs-computed checksum verification.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let ParsedContainer {
            dialect,
            entries,
            dtb_names,
        } = container::parse(reader)?;

        let mut partitions = Vec::with_capacity(entries.len());
        for entry in entries {
            let dtb_name = dtb_names.short_name(entry.id);
            let kind = classify::classify(reader, entry.start_offset, dtb_name)?;
            let (stored_checksum, computed_checksum) =
                verify_partition_checksum(reader, &entry, &kind)?;
            partitions.push(Partition {
                entry,
                kind,
                stored_checksum,
                computed_checksum,
            });
        }

        let mut image = FirmwareImage {
            dialect,
            partitions,
            dtb_names,
            dialect_checksum_valid: true,
        };
        image.dialect_checksum_valid = image.verify_dialect_checksum(reader)?;
        Ok(image)
    }

    /// Recomputes the dialect-level checksum against what's currently
    /// stored in `reader`. Returns `true` when there is no dialect-level
    /// checksum to check (an empty partition table).
    pub fn verify_dialect_checksum<R: Read + Seek>(&self, reader: &mut R) -> Result<bool> {
        let Some((start, len, hole)) = self.dialect_checksum_region() else {
            return Ok(true);
        };
        reader.seek(SeekFrom::Start(start + hole))?;
        let stored = if self.dialect == Dialect::Bootloader {
            reader.read_u16::<LittleEndian>()? as u32
        } else {
            reader.read_u32::<LittleEndian>()?
        };
        let computed = checksum::checksum(reader, start, len, Some(hole))?;
        Ok(stored == computed as u32)
    }

    /// A structured summary of this image, suitable both for the CLI's
    /// text report and for any future machine consumer.
    pub fn report(&self) -> ImageReport {
        ImageReport {
            dialect: match self.dialect {
                Dialect::Hdr2 => "HDR2",
                Dialect::Hdr => "HDR",
                Dialect::Bootloader => "bootloader",
            },
            dialect_checksum_valid: self.dialect_checksum_valid,
            partitions: self
                .partitions
                .iter()
                .map(|p| PartitionReport {
                    id: p.entry.id,
                    kind: p.kind.name().to_string(),
                    start_offset: p.entry.start_offset,
                    size: p.entry.size,
                    checksum_valid: p.is_checksum_valid(),
                })
                .collect(),
        }
    }

    pub fn find(&self, id: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.entry.id == id)
    }

    pub fn find_index(&self, id: u32) -> Option<usize> {
        self.partitions.iter().position(|p| p.entry.id == id)
    }

    /// The dialect-level checksum's covered range and hole, per §3/§4.6.
    pub fn dialect_checksum_region(&self) -> Option<(u64, u64, u64)> {
        match self.dialect {
            Dialect::Hdr2 => {
                let total_size = self.partitions.last().map(|p| p.entry.start_offset + p.entry.size)?;
                Some((0, total_size, container::HDR2_CHECKSUM_OFFSET))
            }
            Dialect::Hdr => {
                let partition0 = self.partitions.first()?;
                let table_region_size = self.hdr_table_region_size(partition0)?;
                Some((
                    partition0.entry.start_offset + partition0.entry.size,
                    table_region_size,
                    container::HDR_TABLE_CHECKSUM_REL_OFFSET,
                ))
            }
            Dialect::Bootloader => {
                let len = self.partitions.last().map(|p| p.entry.start_offset + p.entry.size)?;
                Some((0, len, container::BOOTLOADER_CHECKSUM_OFFSET))
            }
        }
    }

    fn hdr_table_region_size(&self, partition0: &Partition) -> Option<u64> {
        if self.partitions.len() <= 1 {
            return None;
        }
        Some(container::HDR_TABLE_HEADER_LEN + (self.partitions.len() as u64 - 1) * 12)
    }
}

fn verify_partition_checksum<R: Read + Seek>(
    reader: &mut R,
    entry: &PartitionEntry,
    kind: &Kind,
) -> Result<(Option<u32>, Option<u16>)> {
    let field = kind.checksum_field();
    let (rel_offset, stored, covered_len) = match field {
        ChecksumField::None => return Ok((None, None)),
        ChecksumField::U16(rel) => {
            reader.seek(SeekFrom::Start(entry.start_offset + rel))?;
            let stored = reader.read_u16::<LittleEndian>()? as u32;
            (rel, stored, entry.size)
        }
        ChecksumField::U32Low16(rel) => {
            reader.seek(SeekFrom::Start(entry.start_offset + rel))?;
            let stored = reader.read_u32::<LittleEndian>()?;
            let covered = cksm_covered_len(reader, entry)?;
            (rel, stored, covered)
        }
    };

    let computed = checksum::checksum(reader, entry.start_offset, covered_len, Some(rel_offset))?;
    Ok((Some(stored), Some(computed)))
}

/// A CKSM wrapper's checksum covers `[start, start + dataOffset + dataSize
/// + paddingSize)`; those three fields sit at fixed offsets within the
/// 64-byte wrapper header.
fn cksm_covered_len<R: Read + Seek>(reader: &mut R, entry: &PartitionEntry) -> Result<u64> {
    reader.seek(SeekFrom::Start(entry.start_offset + 0x10))?;
    let data_offset = reader.read_u32::<LittleEndian>()? as u64;
    let data_size = reader.read_u32::<LittleEndian>()? as u64;
    let padding_size = reader.read_u32::<LittleEndian>()? as u64;
    let covered = data_offset + data_size + padding_size;
    if covered > entry.size {
        return Err(Error::format(entry.start_offset, "cksm wrapper declares a region past its partition"));
    }
    Ok(covered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hdr2_with_bcl1(partition: &[u8]) -> Vec<u8> {
        let header_size = 64u32;
        let mut data = vec![0u8; header_size as usize + 12];
        data[0..16].copy_from_slice(&container::HDR2_GUID);
        data[16..20].copy_from_slice(&container::HDR2_VERSION.to_le_bytes());
        data[20..24].copy_from_slice(&header_size.to_le_bytes());
        data[24..28].copy_from_slice(&1u32.to_le_bytes());
        let start = data.len() as u32;
        data.extend_from_slice(partition);
        let total_size = data.len() as u32;
        data[28..32].copy_from_slice(&total_size.to_le_bytes());
        let entry_off = header_size as usize;
        data[entry_off..entry_off + 4].copy_from_slice(&start.to_le_bytes());
        data[entry_off + 4..entry_off + 8].copy_from_slice(&(partition.len() as u32).to_le_bytes());
        data[entry_off + 8..entry_off + 12].copy_from_slice(&0u32.to_le_bytes());
        data
    }

    #[test]
    fn parses_and_classifies_bcl1_partition() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(b"BCL1");
        let data = hdr2_with_bcl1(&partition);
        let mut c = Cursor::new(data);
        let image = FirmwareImage::parse(&mut c).unwrap();
        assert_eq!(image.partitions.len(), 1);
        assert_eq!(image.partitions[0].kind, Kind::Bcl1);
    }

    #[test]
    fn dtb_partition_has_no_checksum_field() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(&[0xD0, 0x0D, 0xFE, 0xED]);
        let data = hdr2_with_bcl1(&partition);
        let mut c = Cursor::new(data);
        let image = FirmwareImage::parse(&mut c).unwrap();
        assert_eq!(image.partitions[0].stored_checksum, None);
        assert!(image.partitions[0].is_checksum_valid());
    }

    #[test]
    fn find_looks_up_by_id() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(b"BCL1");
        let data = hdr2_with_bcl1(&partition);
        let mut c = Cursor::new(data);
        let image = FirmwareImage::parse(&mut c).unwrap();
        assert!(image.find(0).is_some());
        assert!(image.find(99).is_none());
    }

    #[test]
    fn dialect_checksum_starts_invalid_and_report_reflects_it() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(b"BCL1");
        let data = hdr2_with_bcl1(&partition);
        let mut c = Cursor::new(data);
        let image = FirmwareImage::parse(&mut c).unwrap();
        assert!(!image.dialect_checksum_valid);
        let report = image.report();
        assert_eq!(report.dialect, "HDR2");
        assert!(!report.dialect_checksum_valid);
        assert_eq!(report.partitions.len(), 1);
        assert_eq!(report.partitions[0].kind, "bcl1");
    }
}
