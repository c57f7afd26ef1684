//! Small, dependency-light building blocks shared by the firmware tooling
//! crates: endian-tagged fixed-width integers used to describe the
//! bit-exact on-disk layouts of HDR2/HDR/bootloader headers, partition
//! table entries and BCL1 blocks.

/// Endian-tagged number types.
pub mod types;

pub use types::endian::{BigEndian, Endian, Endianness, LittleEndian};
pub use types::number::{U16Be, U16Le, U32Be, U32Le, U16, U32};
