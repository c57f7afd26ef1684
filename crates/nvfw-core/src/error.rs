use std::fmt;

/// Errors produced by the firmware container library.
///
/// Every variant corresponds to one of the fatal error kinds from the
/// operation dispatcher's contract: *io*, *format*, *argument*,
/// *external-tool*, *limit* and *codec*. There is no local recovery for any
/// of these — the caller is expected to report the message and abort the
/// invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An expected magic number, GUID, or signature was absent, or the
    /// classifier could not recognize a partition that a type-specific
    /// operation required.
    #[error("format error at offset {offset:#x}: {message}")]
    Format { offset: u64, message: String },

    /// The caller supplied an id, offset, or path that does not resolve.
    #[error("argument error: {0}")]
    Argument(String),

    /// An external converter (dtc, simg2img, ubireader_*, mkfs.ubifs) could
    /// not be run or exited with a failure status.
    #[error("external tool '{tool}' failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// A bootloader-dialect replacement would grow the file beyond the
    /// size declared at offset 0x24.
    #[error("replacement grows the file to {actual} bytes, exceeding the declared limit of {limit} bytes")]
    ExceedsLimit { limit: u64, actual: u64 },

    /// A BCL1 payload used an unsupported algorithm, was truncated, or an
    /// LZ77 back-reference underflowed the output buffer.
    #[error("codec error in partition {id} at offset {offset:#x}: {message}")]
    Codec {
        id: u32,
        offset: u64,
        message: String,
    },
}

impl Error {
    pub fn format(offset: u64, message: impl fmt::Display) -> Self {
        Error::Format {
            offset,
            message: message.to_string(),
        }
    }

    pub fn argument(message: impl fmt::Display) -> Self {
        Error::Argument(message.to_string())
    }

    pub fn codec(id: u32, offset: u64, message: impl fmt::Display) -> Self {
        Error::Codec {
            id,
            offset,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
