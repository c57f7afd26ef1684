mod convert;
mod dispatch;
mod report;

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// Inspect and edit Novatek-family firmware container files.
#[derive(Debug, Clone, Parser)]
#[command(name = "nvfwtool")]
pub struct Args {
    /// Firmware file to operate on.
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Directory extracted/uncompressed/converted files are written to.
    /// Defaults to the input file's own directory.
    #[arg(short = 'o', long = "outdir")]
    pub outdir: Option<PathBuf>,

    /// Suppress anything but fatal diagnostics.
    #[arg(long = "silent")]
    pub silent: bool,

    #[command(subcommand)]
    pub op: Option<Operation>,
}

impl Args {
    pub fn out_dir(&self) -> PathBuf {
        self.outdir.clone().unwrap_or_else(|| {
            self.input
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

/// A partition id, or `ALL` for every partition in the file.
#[derive(Debug, Clone, Copy)]
pub enum IdOrAll {
    Id(u32),
    All,
}

impl FromStr for IdOrAll {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ALL") {
            Ok(IdOrAll::All)
        } else {
            s.parse().map(IdOrAll::Id)
        }
    }
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Operation {
    /// Extract a partition (or every partition) to `<input>-partitionID<id>`.
    Extract {
        target: IdOrAll,
        #[arg(default_value_t = 0)]
        offset: u64,
    },
    /// Replace partition `id` at `offset` with the contents of `file`.
    Replace {
        id: u32,
        offset: u64,
        file: PathBuf,
    },
    /// Decompress a BCL1 partition to `<input>-uncomp_partitionID<id>`.
    Uncompress { id: u32, offset: Option<u64> },
    /// Recompress `<input>-uncomp_partitionID<id>` back into partition `id`
    /// and repair its checksum.
    Compress { id: u32 },
    /// Decompile a binary device tree via the external `dtc` tool.
    Udtb { dtb: PathBuf, dts: Option<PathBuf> },
    /// Compile a device-tree source via the external `dtc` tool.
    Cdtb { dts: PathBuf, dtb: Option<PathBuf> },
    /// Repair every partition and dialect-level checksum in the file.
    FixCrc,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.silent {
            log::LevelFilter::Off
        } else {
            log::LevelFilter::Info
        })
        .init()
        .unwrap();

    if let Err(err) = dispatch::run(&args) {
        log::error!("{err}");
        std::process::exit(1);
    }
    Ok(())
}
