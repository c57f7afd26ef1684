//! C6: walk every partition, recompute its stored checksum per the
//! classifier's table, and rewrite it if it differs; then do the same for
//! the dialect-level checksum. Idempotent: running it twice produces the
//! same bytes the second time.

use crate::checksum;
use crate::classify::{self, ChecksumField};
use crate::container::{self, Dialect};
use crate::error::Result;
use crate::image::FirmwareImage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Seek, SeekFrom};

/// Recomputes and rewrites every stored checksum in the file, reclassifying
/// each partition fresh rather than trusting `image`'s cached kinds (a
/// prior mutation may have changed what a partition looks like).
pub fn fix_all(file: &mut File, image: &FirmwareImage) -> Result<()> {
    for partition in &image.partitions {
        let dtb_name = image.dtb_names.short_name(partition.entry.id);
        let kind = classify::classify(file, partition.entry.start_offset, dtb_name)?;
        fix_partition_checksum(file, partition.entry.start_offset, partition.entry.size, &kind)?;
        log::trace!("partition {}: checksum recomputed", partition.entry.id);
    }

    fix_dialect_checksum(file, image)?;
    log::debug!("dialect-level checksum recomputed for {:?}", image.dialect);
    Ok(())
}

fn fix_partition_checksum(
    file: &mut File,
    start: u64,
    size: u64,
    kind: &classify::Kind,
) -> Result<()> {
    match kind.checksum_field() {
        ChecksumField::None => Ok(()),
        ChecksumField::U16(rel) => {
            let computed = checksum::checksum(file, start, size, Some(rel))?;
            file.seek(SeekFrom::Start(start + rel))?;
            file.write_u16::<LittleEndian>(computed)?;
            Ok(())
        }
        ChecksumField::U32Low16(rel) => {
            file.seek(SeekFrom::Start(start + 0x10))?;
            let data_offset = file.read_u32::<LittleEndian>()? as u64;
            let data_size = file.read_u32::<LittleEndian>()? as u64;
            let padding_size = file.read_u32::<LittleEndian>()? as u64;
            let covered = data_offset + data_size + padding_size;
            let computed = checksum::checksum(file, start, covered, Some(rel))?;
            file.seek(SeekFrom::Start(start + rel))?;
            file.write_u32::<LittleEndian>(computed as u32)?;
            Ok(())
        }
    }
}

fn fix_dialect_checksum(file: &mut File, image: &FirmwareImage) -> Result<()> {
    match image.dialect {
        Dialect::Hdr2 => {
            let total_size = image
                .partitions
                .last()
                .map(|p| p.entry.start_offset + p.entry.size)
                .unwrap_or(0);
            let computed = checksum::checksum(file, 0, total_size, Some(container::HDR2_CHECKSUM_OFFSET))?;
            file.seek(SeekFrom::Start(container::HDR2_CHECKSUM_OFFSET))?;
            file.write_u32::<LittleEndian>(computed as u32)?;
            Ok(())
        }
        Dialect::Hdr => {
            if image.partitions.len() <= 1 {
                return Ok(());
            }
            let partition0 = &image.partitions[0];
            let region_start = partition0.entry.start_offset + partition0.entry.size;
            let region_len = container::HDR_TABLE_HEADER_LEN + (image.partitions.len() as u64 - 1) * 12;
            let computed = checksum::checksum(
                file,
                region_start,
                region_len,
                Some(container::HDR_TABLE_CHECKSUM_REL_OFFSET),
            )?;
            file.seek(SeekFrom::Start(region_start + container::HDR_TABLE_CHECKSUM_REL_OFFSET))?;
            file.write_u32::<LittleEndian>(computed as u32)?;
            Ok(())
        }
        Dialect::Bootloader => {
            let len = file.metadata()?.len();
            let computed = checksum::checksum(file, 0, len, Some(container::BOOTLOADER_CHECKSUM_OFFSET))?;
            file.seek(SeekFrom::Start(container::BOOTLOADER_CHECKSUM_OFFSET))?;
            file.write_u16::<LittleEndian>(computed)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn hdr2_with_bcl1(partition_bytes: &[u8]) -> Vec<u8> {
        let header_size = 64u32;
        let mut data = vec![0u8; header_size as usize + 12];
        data[0..16].copy_from_slice(&container::HDR2_GUID);
        data[16..20].copy_from_slice(&container::HDR2_VERSION.to_le_bytes());
        data[20..24].copy_from_slice(&header_size.to_le_bytes());
        data[24..28].copy_from_slice(&1u32.to_le_bytes());
        let start = data.len() as u32;
        data.extend_from_slice(partition_bytes);
        let total_size = data.len() as u32;
        data[28..32].copy_from_slice(&total_size.to_le_bytes());
        let entry_off = header_size as usize;
        data[entry_off..entry_off + 4].copy_from_slice(&start.to_le_bytes());
        data[entry_off + 4..entry_off + 8].copy_from_slice(&(partition_bytes.len() as u32).to_le_bytes());
        data[entry_off + 8..entry_off + 12].copy_from_slice(&0u32.to_le_bytes());
        data
    }

    #[test]
    fn fix_all_is_idempotent() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(b"BCL1");
        let data = hdr2_with_bcl1(&partition);

        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();
        let mut file = temp.reopen().unwrap();

        let image = FirmwareImage::parse(&mut Cursor::new(data.clone())).unwrap();
        fix_all(&mut file, &image).unwrap();

        let mut after_first = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        std::io::Read::read_to_end(&mut file, &mut after_first).unwrap();

        let image2 = FirmwareImage::parse(&mut Cursor::new(after_first.clone())).unwrap();
        fix_all(&mut file, &image2).unwrap();

        let mut after_second = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        std::io::Read::read_to_end(&mut file, &mut after_second).unwrap();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn fix_all_makes_every_checksum_valid() {
        let mut partition = vec![0u8; 20];
        partition[0..4].copy_from_slice(b"BCL1");
        let data = hdr2_with_bcl1(&partition);

        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();
        let mut file = temp.reopen().unwrap();

        let image = FirmwareImage::parse(&mut Cursor::new(data.clone())).unwrap();
        fix_all(&mut file, &image).unwrap();

        let mut fixed_bytes = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        std::io::Read::read_to_end(&mut file, &mut fixed_bytes).unwrap();
        let fixed_image = FirmwareImage::parse(&mut Cursor::new(fixed_bytes)).unwrap();
        for p in &fixed_image.partitions {
            assert!(p.is_checksum_valid());
        }
    }
}
