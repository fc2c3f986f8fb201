use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::error::{Error, Result};
use crate::extractor::{ArchiveTool, ToolOutput};

/// Binary names tried on `PATH`, in order.
pub const CANDIDATE_BINARIES: [&str; 3] = ["7z", "7zz", "7za"];

/// [`ArchiveTool`] backed by the 7-Zip command line.
///
/// Handles every accepted archive type (`.cbz`, `.cbr`, `.zip`, `.rar`) with the
/// same argument contract.
#[derive(Debug, Clone)]
pub struct SevenZip {
    binary: PathBuf,
}

impl Default for SevenZip {
    /// Located on `PATH`, or plain `7z` left to fail at first use.
    fn default() -> Self {
        Self::locate().unwrap_or_else(|_| Self::new(CANDIDATE_BINARIES[0]))
    }
}

impl SevenZip {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Finds the first of [`CANDIDATE_BINARIES`] on `PATH`.
    pub fn locate() -> Result<Self> {
        CANDIDATE_BINARIES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .ok_or_else(|| {
                Error::ToolUnavailable(format!(
                    "none of {:?} found on PATH",
                    CANDIDATE_BINARIES
                ))
            })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `x -y -aoa -bd -bb0 -r -o<dir> <archive> [filters...]`
    pub fn arguments(archive: &Path, output_dir: &Path, filters: &[String]) -> Vec<OsString> {
        let mut output_switch = OsString::from("-o");
        output_switch.push(output_dir.as_os_str());

        let mut args: Vec<OsString> = ["x", "-y", "-aoa", "-bd", "-bb0", "-r"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(output_switch);
        args.push(archive.as_os_str().to_os_string());
        args.extend(filters.iter().map(OsString::from));
        args
    }
}

impl ArchiveTool for SevenZip {
    fn run(&self, archive: &Path, output_dir: &Path, filters: &[String]) -> Result<ToolOutput> {
        let args = Self::arguments(archive, output_dir, filters);
        debug!("Running {:?} {:?}", self.binary, args);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    Error::ToolUnavailable(format!("{:?}: {}", self.binary, e))
                }
                _ => Error::Io(e),
            })?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
