//! Turns a structured [`nvfw::ImageReport`] into the text the CLI prints.
//!
//! ANSI color is treated as an external collaborator the core doesn't
//! depend on (spec §1); this printer uses a plain `[OK]`/`[MISMATCH]` tag
//! in its place so a verification failure still stands out without the
//! tool owning a terminal-color dependency.

use nvfw::ImageReport;

pub fn print(report: &ImageReport) {
    println!(
        "dialect: {} (checksum {})",
        report.dialect,
        tag(report.dialect_checksum_valid)
    );
    println!("{:<4} {:<12} {:>10} {:>10}  checksum", "id", "kind", "offset", "size");
    for partition in &report.partitions {
        println!(
            "{:<4} {:<12} {:>10} {:>10}  {}",
            partition.id,
            partition.kind,
            format!("{:#x}", partition.start_offset),
            partition.size,
            tag(partition.checksum_valid)
        );
    }
}

fn tag(valid: bool) -> &'static str {
    if valid {
        "[OK]"
    } else {
        "[MISMATCH]"
    }
}
