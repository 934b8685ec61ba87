//! Pushes a finished report to a DICOM archive with an external `storescu`.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, process::Command, time};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Failed to remove study directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where and how reports are sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Store command, looked up on `PATH`
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Called AE title of the archive
    #[serde(default = "default_called_ae")]
    pub called_ae: String,

    /// Wait after a successful send, in seconds
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,

    /// Remove the processed study directory once the report is sent
    #[serde(default = "default_true")]
    pub cleanup_study_dir: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            host: default_host(),
            port: default_port(),
            called_ae: default_called_ae(),
            settle_seconds: default_settle_seconds(),
            cleanup_study_dir: true,
        }
    }
}

fn default_program() -> String {
    "storescu".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4242
}

fn default_called_ae() -> String {
    "TESTSCU".to_string()
}

fn default_settle_seconds() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

pub struct ArchiveSender {
    config: ArchiveConfig,
}

impl ArchiveSender {
    pub fn new(config: ArchiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Arguments passed to the store command for `file`.
    pub fn args(&self, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            self.config.host.clone(),
            self.config.port.to_string(),
            "-v".to_string(),
            "-aec".to_string(),
            self.config.called_ae.clone(),
            "+r".to_string(),
            "+sd".to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(file.as_os_str().to_owned());
        args
    }

    /// Run the store command and wait for it to finish.
    pub async fn send(&self, file: &Path) -> Result<(), ArchiveError> {
        let program = &self.config.program;
        info!(
            file = %file.display(),
            host = %self.config.host,
            port = self.config.port,
            "sending report to archive"
        );

        let output = Command::new(program)
            .args(self.args(file))
            .output()
            .await
            .map_err(|source| ArchiveError::Spawn {
                program: program.clone(),
                source,
            })?;
        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "{program} finished");

        if !output.status.success() {
            return Err(ArchiveError::Failed {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Wait for the archive to settle, then remove `study_dir` if configured.
    pub async fn finish(&self, study_dir: &Path) -> Result<(), ArchiveError> {
        if self.config.settle_seconds > 0 {
            time::sleep(Duration::from_secs(self.config.settle_seconds)).await;
        }
        if !self.config.cleanup_study_dir {
            return Ok(());
        }
        fs::remove_dir_all(study_dir)
            .await
            .map_err(|source| ArchiveError::Cleanup {
                path: study_dir.to_path_buf(),
                source,
            })?;
        info!(path = %study_dir.display(), "removed processed study directory");
        Ok(())
    }
}
