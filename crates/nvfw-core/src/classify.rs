//! C3: recognizing a partition's kind from the bytes at its start.

use crate::error::Result;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// How many bytes of a partition's prefix the classifier is allowed to
/// read whole, as a small control region (never the partition's full
/// payload).
const CLASSIFY_PREFIX: usize = 2048;

const MAGIC_DTB: [u8; 4] = [0xD0, 0x0D, 0xFE, 0xED];
const MAGIC_UIMAGE: [u8; 4] = [0x27, 0x05, 0x19, 0x56];
const MAGIC_SPARSE_EXT4: u32 = 0x3AFF_26ED;
const MAGIC_BCL1: &[u8; 4] = b"BCL1";
const MAGIC_UBI: &[u8; 4] = b"UBI#";
const MAGIC_CKSM: &[u8; 4] = b"CKSM";
const CKSM_VERSION: u32 = 0x1907_0416;
const MODELEXT_VERSION: u32 = 0x1607_2219;
const MODELEXT_TYPE: u32 = 1;

/// The byte offset (relative to the partition's start) and width of a
/// kind's stored checksum field, if it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumField {
    /// No stored checksum for this kind.
    None,
    /// A plain 16-bit little-endian field.
    U16(u64),
    /// The low 16 bits of a 32-bit little-endian field, the same
    /// convention the dialect-level HDR2 checksum uses.
    U32Low16(u64),
}

/// Metadata decoded from a legacy U-Boot ("uImage") header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UImageMeta {
    pub os: u8,
    pub cpu: u8,
    pub image_type: u8,
    pub compression: u8,
    pub timestamp: u32,
    pub size: u32,
    /// Present only for multi-file images (`image_type == 4`): the
    /// big-endian length table at offset 64, read until the zero
    /// terminator.
    pub multi_file_lengths: Option<Vec<u32>>,
}

impl UImageMeta {
    /// OS-kernel image for ARM64 (CPU code 22, image type 2); this
    /// influences whether UBI recompression targets an ARM64 variant.
    pub fn is_arm64_kernel(&self) -> bool {
        self.cpu == 22 && self.image_type == 2
    }
}

/// A partition's classified kind, with kind-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Dtb,
    UImage(UImageMeta),
    SparseExt4,
    Bcl1,
    Ubi { name: Option<String> },
    /// A CKSM wrapper around another partition kind, recursively
    /// classified at `start + 0x40`.
    Cksm(Box<Kind>),
    ModelExt,
    UBoot,
    Atf,
    Unknown,
}

impl Kind {
    pub fn checksum_field(&self) -> ChecksumField {
        match self {
            Kind::Bcl1 => ChecksumField::U16(0x04),
            Kind::Cksm(_) => ChecksumField::U32Low16(0x0C),
            Kind::ModelExt => ChecksumField::U16(0x36),
            Kind::UBoot => ChecksumField::U16(0x36E),
            Kind::Dtb
            | Kind::UImage(_)
            | Kind::SparseExt4
            | Kind::Ubi { .. }
            | Kind::Atf
            | Kind::Unknown => ChecksumField::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::Dtb => "dtb",
            Kind::UImage(_) => "uimage",
            Kind::SparseExt4 => "sparse-ext4",
            Kind::Bcl1 => "bcl1",
            Kind::Ubi { .. } => "ubi",
            Kind::Cksm(_) => "cksm",
            Kind::ModelExt => "modelext",
            Kind::UBoot => "uboot",
            Kind::Atf => "atf",
            Kind::Unknown => "unknown",
        }
    }
}

/// Classifies the partition starting at `start`, consulting `dtb_name` (the
/// name decoded for this partition's id from the device-tree name table,
/// if any) to disambiguate the plain-binary "uboot"/"atf" kinds.
pub fn classify<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    dtb_name: Option<&str>,
) -> Result<Kind> {
    reader.seek(SeekFrom::Start(start))?;
    let mut prefix = vec![0u8; CLASSIFY_PREFIX];
    let read = read_best_effort(reader, &mut prefix)?;
    prefix.truncate(read);

    if prefix.len() >= 4 && prefix[0..4] == MAGIC_DTB {
        log::trace!("partition at {start:#x}: dtb");
        return Ok(Kind::Dtb);
    }

    if prefix.len() >= 4 && prefix[0..4] == MAGIC_UIMAGE {
        log::trace!("partition at {start:#x}: uimage");
        return Ok(Kind::UImage(parse_uimage(&prefix)?));
    }

    if prefix.len() >= 4 {
        let le = Cursor::new(&prefix[0..4]).read_u32::<LittleEndian>()?;
        if le == MAGIC_SPARSE_EXT4 {
            log::trace!("partition at {start:#x}: sparse ext4");
            return Ok(Kind::SparseExt4);
        }
    }

    if prefix.len() >= 4 && &prefix[0..4] == MAGIC_BCL1 {
        log::trace!("partition at {start:#x}: bcl1");
        return Ok(Kind::Bcl1);
    }

    if prefix.len() >= 4 && &prefix[0..4] == MAGIC_UBI {
        log::trace!("partition at {start:#x}: ubi");
        return Ok(Kind::Ubi {
            name: dtb_name.map(str::to_string),
        });
    }

    if prefix.len() >= 8 && &prefix[0..4] == MAGIC_CKSM {
        let version = Cursor::new(&prefix[4..8]).read_u32::<LittleEndian>()?;
        if version == CKSM_VERSION {
            log::trace!("partition at {start:#x}: cksm wrapper, descending to {:#x}", start + 0x40);
            let inner = classify(reader, start + 0x40, dtb_name)?;
            return Ok(Kind::Cksm(Box::new(inner)));
        }
    }

    if prefix.len() >= 20 {
        let mut cur = Cursor::new(&prefix[0..8]);
        let type_field = cur.read_u32::<LittleEndian>()?;
        let version_field = cur.read_u32::<LittleEndian>()?;
        if type_field == MODELEXT_TYPE
            && version_field == MODELEXT_VERSION
            && &prefix[12..20] == b"MODELEXT"
        {
            log::trace!("partition at {start:#x}: modelext");
            return Ok(Kind::ModelExt);
        }
    }

    match dtb_name {
        Some("uboot") => {
            log::trace!("partition at {start:#x}: uboot (by dtb name)");
            Ok(Kind::UBoot)
        }
        Some("atf") => {
            log::trace!("partition at {start:#x}: atf (by dtb name)");
            Ok(Kind::Atf)
        }
        _ => {
            log::warn!("partition at {start:#x}: no magic matched, classified as unknown");
            Ok(Kind::Unknown)
        }
    }
}

/// Reads a legacy U-Boot image header from a classifier prefix buffer.
fn parse_uimage(prefix: &[u8]) -> Result<UImageMeta> {
    let mut cur = Cursor::new(prefix);
    cur.seek(SeekFrom::Start(8))?;
    let timestamp = cur.read_u32::<BigEndian>()?;
    let size = cur.read_u32::<BigEndian>()?;

    cur.seek(SeekFrom::Start(28))?;
    let os = cur.read_u8()?;
    let cpu = cur.read_u8()?;
    let image_type = cur.read_u8()?;
    let compression = cur.read_u8()?;

    let multi_file_lengths = if image_type == 4 && prefix.len() > 64 {
        let mut lengths = Vec::new();
        cur.seek(SeekFrom::Start(64))?;
        loop {
            let Ok(len) = cur.read_u32::<BigEndian>() else {
                break;
            };
            if len == 0 {
                break;
            }
            lengths.push(len);
        }
        Some(lengths)
    } else {
        None
    };

    Ok(UImageMeta {
        os,
        cpu,
        image_type,
        compression,
        timestamp,
        size,
        multi_file_lengths,
    })
}

/// Reads as much as is available into `buf`, stopping short at EOF instead
/// of erroring — partitions near the end of the file may be smaller than
/// the classifier's 2 KiB prefix window.
fn read_best_effort<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}
