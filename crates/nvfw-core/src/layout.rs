//! C5: the layout manager. Extracts a partition's bytes, or replaces them
//! and relocates everything after it, keeping the partition table, the
//! dialect's total-size field, and any CKSM wrapper's inner size field
//! consistent with the new layout.

use crate::classify::Kind;
use crate::container::{self, Dialect, PartitionEntry};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

const CHUNK_SIZE: usize = 1 << 20;

fn ceil4(x: u64) -> u64 {
    (x + 3) / 4 * 4
}

/// Streams `size - offset_within` bytes of partition `id`, starting at
/// `start + offset_within`, to `out`.
pub fn extract(
    file: &mut File,
    image: &FirmwareImage,
    id: u32,
    offset_within: u64,
    out: &mut impl Write,
) -> Result<()> {
    let partition = image
        .find(id)
        .ok_or_else(|| Error::argument(format!("no partition with id {id}")))?;
    if offset_within > partition.entry.size {
        return Err(Error::argument(format!(
            "offset {offset_within} exceeds partition {id} size {}",
            partition.entry.size
        )));
    }
    let length = partition.entry.size - offset_within;
    file.seek(SeekFrom::Start(partition.entry.start_offset + offset_within))?;
    stream_copy(file, out, length)
}

fn stream_copy<R: Read, W: Write>(reader: &mut R, writer: &mut W, length: u64) -> Result<()> {
    let mut buf = vec![0u8; CHUNK_SIZE.min(length.max(1) as usize)];
    let mut remaining = length;
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        reader.read_exact(&mut buf[..want])?;
        writer.write_all(&buf[..want])?;
        remaining -= want as u64;
    }
    Ok(())
}

/// Replaces the bytes of partition `id` starting at `offset_within` with
/// `new_bytes`, relocating every following partition and rewriting the
/// partition table and dialect-level size fields if the partition's size
/// changes. Updates `image` in place to reflect the new layout.
pub fn replace(
    file: &mut File,
    image: &mut FirmwareImage,
    id: u32,
    offset_within: u64,
    new_bytes: &[u8],
) -> Result<()> {
    let index = image
        .find_index(id)
        .ok_or_else(|| Error::argument(format!("no partition with id {id}")))?;
    let old_entry = image.partitions[index].entry;
    let new_len = new_bytes.len() as u64;
    let new_size = new_len + offset_within;

    if new_size == old_entry.size {
        file.seek(SeekFrom::Start(old_entry.start_offset + offset_within))?;
        file.write_all(new_bytes)?;
        log::debug!("partition {id}: replaced in place, size unchanged");
        return Ok(());
    }

    let new_aligned = ceil4(new_size) - new_size;
    let has_next = index + 1 < image.partitions.len();
    // HDR dialect, id 0: the GUID + table header + table entries sit right
    // after partition 0, before the next partition's actual data. That
    // region must be preserved and relocated along with everything after
    // it, so the gap starts at partition 0's own end here, not at the next
    // partition's start (which would skip over the GUID/table and let it
    // be overwritten by the new partition 0 bytes).
    let old_gap_end = if image.dialect == Dialect::Hdr && id == 0 {
        old_entry.start_offset + old_entry.size
    } else if has_next {
        image.partitions[index + 1].entry.start_offset
    } else {
        old_entry.start_offset + old_entry.size
    };
    let new_end_rounded = old_entry.start_offset + new_size + new_aligned;
    let diff = new_end_rounded as i64 - old_gap_end as i64;

    let file_len = file.metadata()?.len();
    let tail_len = file_len.saturating_sub(old_gap_end);
    let new_file_len = old_entry.start_offset + offset_within + new_len + new_aligned + tail_len;

    // Check the bootloader size declaration before touching the file: S5
    // requires an over-limit replace to leave the file unchanged, so the
    // projected length must be validated against offset 0x24 up front
    // rather than after the write has already happened.
    if image.dialect == Dialect::Bootloader {
        file.seek(SeekFrom::Start(container::BOOTLOADER_TOTAL_SIZE_OFFSET))?;
        let declared = file.read_u32::<LittleEndian>()? as u64;
        if new_file_len > declared {
            log::warn!(
                "bootloader replacement would grow file to {new_file_len}b, exceeding the declared {declared}b limit"
            );
            return Err(Error::ExceedsLimit {
                limit: declared,
                actual: new_file_len,
            });
        }
    }

    let mut tail = vec![0u8; tail_len as usize];
    file.seek(SeekFrom::Start(old_gap_end))?;
    file.read_exact(&mut tail)?;

    file.seek(SeekFrom::Start(old_entry.start_offset + offset_within))?;
    file.write_all(new_bytes)?;
    file.write_all(&vec![0u8; new_aligned as usize])?;
    file.write_all(&tail)?;

    file.set_len(new_file_len)?;

    image.partitions[index].entry.size = new_size;

    // The GUID/table region for an HDR id-0 replace is carried inside the
    // preserved tail (see `old_gap_end` above), so every following
    // partition shifts by the same plain `diff` as any other replace.
    for p in image.partitions[index + 1..].iter_mut() {
        p.entry.start_offset = (p.entry.start_offset as i64 + diff) as u64;
        log::trace!("partition {} relocated to {:#x}", p.entry.id, p.entry.start_offset);
    }

    rewrite_table(file, image)?;
    update_dialect_total_size(file, image)?;

    if let Kind::Cksm(_) = &image.partitions[index].kind {
        update_cksm_data_size(file, &image.partitions[index].entry, new_len + new_aligned)?;
    }

    pad_bootloader_to_declared_size(file, image)?;

    Ok(())
}

fn rewrite_table(file: &mut File, image: &FirmwareImage) -> Result<()> {
    let (table_start, entries): (u64, &[crate::image::Partition]) = match image.dialect {
        Dialect::Hdr2 => {
            file.seek(SeekFrom::Start(container::HDR2_HEADER_SIZE_OFFSET))?;
            let header_size = file.read_u32::<LittleEndian>()? as u64;
            (header_size, &image.partitions)
        }
        Dialect::Hdr => {
            if image.partitions.len() <= 1 {
                return Ok(());
            }
            let partition0 = &image.partitions[0];
            (
                partition0.entry.start_offset + partition0.entry.size + container::HDR_TABLE_HEADER_LEN,
                &image.partitions[1..],
            )
        }
        Dialect::Bootloader => return Ok(()),
    };

    file.seek(SeekFrom::Start(table_start))?;
    for p in entries {
        file.write_u32::<LittleEndian>(p.entry.start_offset as u32)?;
        file.write_u32::<LittleEndian>(p.entry.size as u32)?;
        file.write_u32::<LittleEndian>(p.entry.id)?;
    }
    Ok(())
}

fn update_dialect_total_size(file: &mut File, image: &FirmwareImage) -> Result<()> {
    match image.dialect {
        Dialect::Hdr2 => {
            let total = image
                .partitions
                .last()
                .map(|p| p.entry.start_offset + p.entry.size)
                .unwrap_or(0);
            file.seek(SeekFrom::Start(container::HDR2_TOTAL_SIZE_OFFSET))?;
            file.write_u32::<LittleEndian>(total as u32)?;
        }
        Dialect::Hdr => {
            if image.partitions.len() > 1 {
                let table_size = container::HDR_TABLE_HEADER_LEN + (image.partitions.len() as u64 - 1) * 12;
                let partition0 = &image.partitions[0];
                file.seek(SeekFrom::Start(partition0.entry.start_offset + partition0.entry.size + 16))?;
                file.write_u32::<LittleEndian>(table_size as u32)?;
            }
        }
        // Bootloader's declared size is a limit the writer must respect,
        // not a mirror of the current file length (see Design Notes).
        Dialect::Bootloader => {}
    }
    Ok(())
}

fn update_cksm_data_size(file: &mut File, entry: &PartitionEntry, data_size: u64) -> Result<()> {
    file.seek(SeekFrom::Start(entry.start_offset + 0x14))?;
    file.write_u32::<LittleEndian>(data_size as u32)?;
    Ok(())
}

/// Pads the file back out to the bootloader's declared size at `0x24` if
/// the write left it short. The over-limit case is checked and rejected
/// before any write happens (see `replace`), so by the time this runs the
/// file is always at or under the declared size.
fn pad_bootloader_to_declared_size(file: &mut File, image: &FirmwareImage) -> Result<()> {
    if image.dialect != Dialect::Bootloader {
        return Ok(());
    }
    file.seek(SeekFrom::Start(container::BOOTLOADER_TOTAL_SIZE_OFFSET))?;
    let declared = file.read_u32::<LittleEndian>()? as u64;
    let actual = file.metadata()?.len();
    if actual < declared {
        file.set_len(declared)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::HDR2_GUID;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn hdr2_image(partitions: &[(u32, &[u8])]) -> (Vec<u8>, Vec<PartitionEntry>) {
        let header_size = 64u32;
        let mut table = vec![0u8; partitions.len() * 12];
        let mut body = Vec::new();
        let mut entries = Vec::new();
        let mut cursor = header_size as u64 + table.len() as u64;
        for (id, bytes) in partitions {
            entries.push(PartitionEntry {
                start_offset: cursor,
                size: bytes.len() as u64,
                id: *id,
            });
            body.extend_from_slice(bytes);
            cursor += bytes.len() as u64;
        }
        for (i, entry) in entries.iter().enumerate() {
            let off = i * 12;
            table[off..off + 4].copy_from_slice(&(entry.start_offset as u32).to_le_bytes());
            table[off + 4..off + 8].copy_from_slice(&(entry.size as u32).to_le_bytes());
            table[off + 8..off + 12].copy_from_slice(&entry.id.to_le_bytes());
        }

        let mut data = vec![0u8; header_size as usize];
        data[0..16].copy_from_slice(&HDR2_GUID);
        data[16..20].copy_from_slice(&container::HDR2_VERSION.to_le_bytes());
        data[20..24].copy_from_slice(&header_size.to_le_bytes());
        data[24..28].copy_from_slice(&(partitions.len() as u32).to_le_bytes());
        data.extend_from_slice(&table);
        data.extend_from_slice(&body);
        let total_size = data.len() as u32;
        data[28..32].copy_from_slice(&total_size.to_le_bytes());
        (data, entries)
    }

    fn write_temp(data: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn in_place_replace_keeps_layout() {
        let (data, _) = hdr2_image(&[(0, &[1, 2, 3, 4]), (1, &[5, 6, 7, 8])]);
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let mut image = FirmwareImage::parse(&mut Cursor::new(data.clone())).unwrap();
        let before_sizes: Vec<u64> = image.partitions.iter().map(|p| p.entry.size).collect();

        replace(&mut file, &mut image, 0, 0, &[9, 9, 9, 9]).unwrap();

        let after_sizes: Vec<u64> = image.partitions.iter().map(|p| p.entry.size).collect();
        assert_eq!(before_sizes, after_sizes);
    }

    #[test]
    fn shrinking_replace_relocates_following_partitions_and_shrinks_file() {
        let (data, _) = hdr2_image(&[(0, &[1u8; 16]), (1, &[2u8; 16]), (2, &[3u8; 16])]);
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let mut image = FirmwareImage::parse(&mut Cursor::new(data.clone())).unwrap();
        let old_start_2 = image.partitions[2].entry.start_offset;

        replace(&mut file, &mut image, 1, 0, &[7u8; 4]).unwrap();

        assert_eq!(image.partitions[1].entry.size, 4);
        assert!(image.partitions[2].entry.start_offset < old_start_2);

        let new_len = file.metadata().unwrap().len();
        assert!(new_len < data.len() as u64);
    }

    #[test]
    fn missing_id_is_an_argument_error() {
        let (data, _) = hdr2_image(&[(0, &[1, 2, 3, 4])]);
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let mut image = FirmwareImage::parse(&mut Cursor::new(data)).unwrap();
        let err = replace(&mut file, &mut image, 99, 0, &[1]).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn extract_streams_from_offset() {
        let (data, _) = hdr2_image(&[(0, &[1, 2, 3, 4, 5, 6])]);
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let image = FirmwareImage::parse(&mut Cursor::new(data)).unwrap();
        let mut out = Vec::new();
        extract(&mut file, &image, 0, 2, &mut out).unwrap();
        assert_eq!(out, vec![3, 4, 5, 6]);
    }

    /// HDR partition 0, packed_size 4 (size 20), followed by the GUID/table
    /// header and one table entry pointing at an 8-byte partition 5.
    fn hdr_image_with_table() -> Vec<u8> {
        let mut data = vec![0u8; 20];
        data[0..4].copy_from_slice(b"BCL1");
        data[0x0C..0x10].copy_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&container::HDR_GUID);
        data.extend_from_slice(&0u32.to_le_bytes()); // total table size, ignored on parse
        data.extend_from_slice(&0u32.to_le_bytes()); // checksum, not exercised here
        data.extend_from_slice(&1u32.to_le_bytes()); // count - 1
        data.extend_from_slice(&60u32.to_le_bytes()); // entry: start_offset
        data.extend_from_slice(&8u32.to_le_bytes()); // entry: size
        data.extend_from_slice(&5u32.to_le_bytes()); // entry: id
        data.extend_from_slice(&[7u8; 8]); // partition 5's data
        data
    }

    #[test]
    fn hdr_id_zero_growing_replace_relocates_guid_and_table() {
        let data = hdr_image_with_table();
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let mut image = FirmwareImage::parse(&mut Cursor::new(data)).unwrap();
        assert_eq!(image.dialect, Dialect::Hdr);

        let mut new_partition0 = vec![0u8; 40];
        new_partition0[0..4].copy_from_slice(b"BCL1");
        new_partition0[0x0C..0x10].copy_from_slice(&24u32.to_be_bytes());

        replace(&mut file, &mut image, 0, 0, &new_partition0).unwrap();

        assert_eq!(image.partitions[0].entry.size, 40);
        assert_eq!(image.partitions[1].entry.start_offset, 80);

        let mut after = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut after).unwrap();
        assert_eq!(after.len(), 88);
        assert_eq!(&after[40..56], &container::HDR_GUID);
        assert_eq!(&after[80..88], &[7u8; 8]);

        let reparsed = FirmwareImage::parse(&mut Cursor::new(after)).unwrap();
        assert_eq!(reparsed.dialect, Dialect::Hdr);
        assert_eq!(reparsed.partitions.len(), 2);
        assert_eq!(reparsed.partitions[0].entry.size, 40);
        assert_eq!(reparsed.partitions[1].entry.start_offset, 80);
        assert_eq!(reparsed.partitions[1].entry.size, 8);
        assert_eq!(reparsed.partitions[1].entry.id, 5);
    }

    /// A minimal bootloader-dialect image: the probe bytes `container::parse`
    /// needs to detect the dialect, a declared total size at `0x24`, the
    /// BCL1 start offset at `0x28`, and a zero-payload BCL1 block at that
    /// start.
    fn bootloader_image(declared_size: u32) -> Vec<u8> {
        let mut data = vec![0u8; 80];
        data[0] = 0x28;
        data[1] = 0x00;
        data[2..4].copy_from_slice(&0x1234u16.to_be_bytes());
        data[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        data[16..18].copy_from_slice(&0x1234u16.to_be_bytes());
        data[10..14].copy_from_slice(&[0x00, 0x05, 0x80, 0xE0]);
        data[48] = 0x55;
        data[49] = 0xAA;
        data[0x24..0x28].copy_from_slice(&declared_size.to_le_bytes());
        data[0x28..0x2C].copy_from_slice(&52u32.to_le_bytes());
        data[52..56].copy_from_slice(b"BCL1");
        data[52 + 0x0C..52 + 0x10].copy_from_slice(&0u32.to_be_bytes());
        data
    }

    #[test]
    fn bootloader_over_limit_replace_leaves_file_unchanged() {
        let data = bootloader_image(80);
        let temp = write_temp(&data);
        let mut file = temp.reopen().unwrap();
        let mut image = FirmwareImage::parse(&mut Cursor::new(data.clone())).unwrap();
        assert_eq!(image.dialect, Dialect::Bootloader);

        let new_bytes = vec![0u8; 40];
        let err = replace(&mut file, &mut image, 0, 0, &new_bytes).unwrap_err();
        assert!(matches!(err, Error::ExceedsLimit { limit: 80, .. }));

        let mut after = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut after).unwrap();
        assert_eq!(after, data);
    }
}
