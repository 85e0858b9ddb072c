use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ReportConfig;
use crate::report::docx::Document;
use crate::report::ReportError;

const INPUT_NAME: &str = "report.docx";
const OUTPUT_NAME: &str = "report.pdf";

/// Why the toolchain did not hand back a PDF.
#[derive(Debug, Error)]
pub enum ConversionFailure {
    #[error("conversion toolchain `{binary}` could not be run: {source}")]
    Unavailable {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("conversion toolchain exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },
    #[error("conversion toolchain timed out after {0:?}")]
    TimedOut(Duration),
    #[error("conversion toolchain reported success but wrote no {}", .0.display())]
    MissingOutput(PathBuf),
    #[error("conversion toolchain wrote an empty {}", .0.display())]
    EmptyOutput(PathBuf),
}

/// DOCX to PDF through a headless office suite, one scratch directory per call.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    binary: String,
    timeout: Duration,
    temp_root: Option<PathBuf>,
}

impl DocumentConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration, temp_root: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            temp_root,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(
            config.converter.binary.clone(),
            config.converter.timeout(),
            config.temp_root().map(Path::to_path_buf),
        )
    }

    pub async fn convert(&self, document: &Document) -> Result<Vec<u8>, ReportError> {
        let workspace = self.workspace()?;
        let outcome = self.convert_in(workspace.path(), document).await;

        let path = workspace.path().to_path_buf();
        if let Err(error) = workspace.close() {
            warn!(dir = %path.display(), %error, "failed to remove report workspace");
        }
        outcome
    }

    fn workspace(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("report_");
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    async fn convert_in(&self, dir: &Path, document: &Document) -> Result<Vec<u8>, ReportError> {
        let input = dir.join(INPUT_NAME);
        let bytes = document.to_bytes()?;
        tokio::fs::write(&input, bytes).await?;

        self.run_toolchain(dir, &input).await?;

        let output = dir.join(OUTPUT_NAME);
        let pdf = match tokio::fs::read(&output).await {
            Ok(pdf) => pdf,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(ConversionFailure::MissingOutput(output).into());
            }
            Err(error) => return Err(error.into()),
        };
        if pdf.is_empty() {
            return Err(ConversionFailure::EmptyOutput(output).into());
        }
        Ok(pdf)
    }

    async fn run_toolchain(&self, dir: &Path, input: &Path) -> Result<(), ConversionFailure> {
        // A private profile lets several conversions run side by side.
        let profile = format!("-env:UserInstallation=file://{}", dir.join("profile").display());

        let mut command = Command::new(&self.binary);
        command
            .arg(profile)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let unavailable = |source| ConversionFailure::Unavailable {
            binary: self.binary.clone(),
            source,
        };

        // The office launcher forks its worker; own group so both can be killed.
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(unavailable)?;
        #[cfg(unix)]
        let _group = ProcessGroupGuard::new(child.id());

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConversionFailure::TimedOut(self.timeout))?
            .map_err(unavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ConversionFailure::Exited {
                status: output.status,
                stderr,
            });
        }

        debug!(
            binary = %self.binary,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "conversion toolchain finished"
        );
        Ok(())
    }
}

/// Sends SIGKILL to the whole process group of the toolchain when dropped,
/// whether the run finished, timed out or was cancelled.
#[cfg(unix)]
struct ProcessGroupGuard {
    pgid: Option<libc::pid_t>,
}

#[cfg(unix)]
impl ProcessGroupGuard {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader.and_then(|pid| libc::pid_t::try_from(pid).ok()),
        }
    }
}

#[cfg(unix)]
impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if result == -1 {
            let error = io::Error::last_os_error();
            // ESRCH: the group already exited.
            if error.raw_os_error() != Some(libc::ESRCH) {
                warn!(pgid, %error, "failed to kill conversion process group");
            }
        }
    }
}
