//! C7: routes the single requested operation through the core's parser,
//! classifier, layout manager, and CRC repair.

use crate::convert::{self, RealRunner};
use crate::report;
use crate::{Args, IdOrAll, Operation};
use nvfw::classify::Kind;
use nvfw::container::Dialect;
use nvfw::{bcl1, crc_repair, layout, Error, FirmwareImage};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run(args: &Args) -> anyhow::Result<()> {
    let mut reader = File::open(&args.input)?;
    let image = FirmwareImage::parse(&mut reader)?;

    match &args.op {
        None => {
            report::print(&image.report());
            Ok(())
        }
        Some(Operation::Extract { target, offset }) => extract(args, &mut reader, &image, *target, *offset),
        Some(Operation::Replace { id, offset, file }) => replace(args, *id, *offset, file),
        Some(Operation::Uncompress { id, offset }) => uncompress(args, &mut reader, &image, *id, *offset),
        Some(Operation::Compress { id }) => compress(args, *id, &image),
        Some(Operation::Udtb { dtb, dts }) => {
            let dts = dts.clone().unwrap_or_else(|| sibling(dtb, "dts"));
            convert::decompile_dtb(&RealRunner, dtb, &dts)?;
            log::info!("wrote {}", dts.display());
            Ok(())
        }
        Some(Operation::Cdtb { dts, dtb }) => {
            let dtb = dtb.clone().unwrap_or_else(|| sibling(dts, "dtb"));
            convert::compile_dtb(&RealRunner, dts, &dtb)?;
            log::info!("wrote {}", dtb.display());
            Ok(())
        }
        Some(Operation::FixCrc) => fix_crc(args, &image),
    }
    .map_err(anyhow::Error::from)
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

fn input_stem(args: &Args) -> String {
    args.input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.to_string_lossy().into_owned())
}

fn extract_path(args: &Args, id: u32) -> PathBuf {
    args.out_dir().join(format!("{}-partitionID{id}", input_stem(args)))
}

fn uncompressed_path(args: &Args, id: u32) -> PathBuf {
    args.out_dir().join(format!("{}-uncomp_partitionID{id}", input_stem(args)))
}

fn extract(
    args: &Args,
    reader: &mut File,
    image: &FirmwareImage,
    target: IdOrAll,
    offset: u64,
) -> Result<(), Error> {
    match target {
        IdOrAll::Id(id) => extract_one(args, reader, image, id, offset),
        IdOrAll::All => {
            for partition in &image.partitions {
                extract_one(args, reader, image, partition.entry.id, 0)?;
            }
            Ok(())
        }
    }
}

fn extract_one(args: &Args, reader: &mut File, image: &FirmwareImage, id: u32, offset: u64) -> Result<(), Error> {
    let path = extract_path(args, id);
    let mut out = File::create(&path)?;
    layout::extract(reader, image, id, offset, &mut out)?;
    log::info!("extracted partition {id} to {}", path.display());
    Ok(())
}

fn replace(args: &Args, id: u32, offset: u64, file: &Path) -> Result<(), Error> {
    let mut reader = File::open(&args.input)?;
    let mut image = FirmwareImage::parse(&mut reader)?;
    let new_bytes = std::fs::read(file)?;

    let mut rw = OpenOptions::new().read(true).write(true).open(&args.input)?;
    layout::replace(&mut rw, &mut image, id, offset, &new_bytes)?;
    log::info!("replaced partition {id} at offset {offset} with {}", file.display());
    Ok(())
}

/// Resolves the implicit uncompress offset: a CKSM wrapper auto-skips to
/// its inner BCL1 block at `0x40` when the caller gave none (§6 S6).
fn resolve_uncompress_offset(image: &FirmwareImage, id: u32, offset: Option<u64>) -> Result<u64, Error> {
    if let Some(offset) = offset {
        return Ok(offset);
    }
    let partition = image
        .find(id)
        .ok_or_else(|| Error::argument(format!("no partition with id {id}")))?;
    Ok(match &partition.kind {
        Kind::Cksm(_) => 0x40,
        _ => 0,
    })
}

fn uncompress(
    args: &Args,
    reader: &mut File,
    image: &FirmwareImage,
    id: u32,
    offset: Option<u64>,
) -> Result<(), Error> {
    let partition = image
        .find(id)
        .ok_or_else(|| Error::argument(format!("no partition with id {id}")))?;
    let offset = resolve_uncompress_offset(image, id, offset)?;
    let (_, raw) = bcl1::decompress(reader, partition.entry.start_offset + offset, id)?;

    let path = uncompressed_path(args, id);
    File::create(&path)?.write_all(&raw)?;
    log::info!("uncompressed partition {id} to {}", path.display());
    Ok(())
}

/// Recompresses `<input>-uncomp_partitionID<id>` using the algorithm and
/// dictionary hint taken from the partition's current BCL1 header, writes
/// it back, and repairs the resulting checksums.
fn compress(args: &Args, id: u32, image: &FirmwareImage) -> Result<(), Error> {
    let partition = image
        .find(id)
        .ok_or_else(|| Error::argument(format!("no partition with id {id}")))?;
    let offset = match &partition.kind {
        Kind::Cksm(inner) if matches!(**inner, Kind::Bcl1) => 0x40,
        Kind::Bcl1 => 0,
        other => {
            return Err(Error::format(
                partition.entry.start_offset,
                format!("partition {id} of kind {} has no native BCL1 compressor", other.name()),
            ))
        }
    };

    let mut reader = File::open(&args.input)?;
    let (old_header, _) = bcl1::decompress(&mut reader, partition.entry.start_offset + offset, id)?;

    let mut raw = std::fs::read(uncompressed_path(args, id))?;
    bcl1::fix_intra_payload_checksum(&mut raw)?;

    let ctx = bcl1::BlockContext {
        pad_to_four: image.dialect != Dialect::Bootloader,
        recompute_checksum: image.dialect.recomputes_inner_bcl1_checksum(),
    };
    let block = bcl1::compress_block_with_hint(
        &raw,
        old_header.algorithm,
        old_header.uncompressed_size,
        ctx,
        old_header.lzma_dict_size,
    )?;

    let mut fresh_image = FirmwareImage::parse(&mut reader)?;
    let mut rw = OpenOptions::new().read(true).write(true).open(&args.input)?;
    layout::replace(&mut rw, &mut fresh_image, id, offset, &block)?;
    crc_repair::fix_all(&mut rw, &fresh_image)?;
    log::info!("recompressed partition {id} and repaired its checksums");
    Ok(())
}

fn fix_crc(args: &Args, image: &FirmwareImage) -> Result<(), Error> {
    let mut rw = OpenOptions::new().read(true).write(true).open(&args.input)?;
    crc_repair::fix_all(&mut rw, image)?;
    log::info!("repaired all checksums in {}", args.input.display());
    Ok(())
}
