//! C8's external-converter half: the one CLI operation pair that shells out
//! to a tool the core does not reimplement, device-tree (de)compilation via
//! `dtc`. The contract is narrow on purpose: run the converter with these
//! paths, raise if it fails. `simg2img`/`img2simg`/`ubireader_*`/
//! `mkfs.ubifs` are named in the same external-collaborator category but
//! have no corresponding CLI operation, so no shim is wired up for them.

use nvfw::Error;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

/// The "run an external converter" effect, kept behind a trait so the
/// dispatch logic is testable without a real `dtc` binary on `PATH`.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<(), Error>;
}

pub struct RealRunner;

impl CommandRunner for RealRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<(), Error> {
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| Error::ExternalTool {
                tool: program.to_string(),
                message: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::ExternalTool {
                tool: program.to_string(),
                message: format!("exited with status {status}"),
            });
        }
        Ok(())
    }
}

pub fn decompile_dtb(runner: &dyn CommandRunner, dtb: &Path, dts: &Path) -> Result<(), Error> {
    runner.run(
        "dtc",
        &[
            OsStr::new("-I"),
            OsStr::new("dtb"),
            OsStr::new("-O"),
            OsStr::new("dts"),
            OsStr::new("-o"),
            dts.as_os_str(),
            dtb.as_os_str(),
        ],
    )
}

pub fn compile_dtb(runner: &dyn CommandRunner, dts: &Path, dtb: &Path) -> Result<(), Error> {
    runner.run(
        "dtc",
        &[
            OsStr::new("-I"),
            OsStr::new("dts"),
            OsStr::new("-O"),
            OsStr::new("dtb"),
            OsStr::new("-o"),
            dtb.as_os_str(),
            dts.as_os_str(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MockRunner {
        calls: RefCell<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    impl MockRunner {
        fn new(fail: bool) -> Self {
            MockRunner {
                calls: RefCell::new(Vec::new()),
                fail,
            }
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, program: &str, args: &[&OsStr]) -> Result<(), Error> {
            self.calls.borrow_mut().push((
                program.to_string(),
                args.iter().map(|a| a.to_string_lossy().into_owned()).collect(),
            ));
            if self.fail {
                return Err(Error::ExternalTool {
                    tool: program.to_string(),
                    message: "mock failure".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn decompile_invokes_dtc_with_dtb_to_dts_flags() {
        let runner = MockRunner::new(false);
        decompile_dtb(&runner, Path::new("fw.dtb"), Path::new("fw.dts")).unwrap();
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "dtc");
        assert_eq!(
            calls[0].1,
            vec!["-I", "dtb", "-O", "dts", "-o", "fw.dts", "fw.dtb"]
        );
    }

    #[test]
    fn compile_invokes_dtc_with_dts_to_dtb_flags() {
        let runner = MockRunner::new(false);
        compile_dtb(&runner, Path::new("fw.dts"), Path::new("fw.dtb")).unwrap();
        let calls = runner.calls.borrow();
        assert_eq!(
            calls[0].1,
            vec!["-I", "dts", "-O", "dtb", "-o", "fw.dtb", "fw.dts"]
        );
    }

    #[test]
    fn a_failing_converter_is_an_external_tool_error() {
        let runner = MockRunner::new(true);
        let err = decompile_dtb(&runner, Path::new("a"), Path::new("b")).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
    }
}
