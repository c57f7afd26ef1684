//! Parser and editor for firmware container files used by a family of
//! system-on-chip platforms. A firmware file is a structured archive of
//! identified partitions (kernel images, device trees, bootloaders,
//! filesystems, model-extension tables, compressed data blocks); this
//! crate parses the container, classifies every partition, verifies and
//! repairs checksums, and supports extracting, replacing, and
//! (de)compressing individual partitions.

pub mod bcl1;
pub mod checksum;
pub mod classify;
pub mod container;
pub mod crc_repair;
pub mod dtb;
pub mod error;
pub mod image;
pub mod layout;
pub mod modelext;

pub use classify::{ChecksumField, Kind, UImageMeta};
pub use container::Dialect;
pub use error::{Error, Result};
pub use image::{FirmwareImage, ImageReport, Partition, PartitionReport};
