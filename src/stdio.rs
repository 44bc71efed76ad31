//! Explicit I/O routing for spawned sandbox processes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Where one standard stream of a child process goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamTarget {
    /// Connected to the null device.
    #[default]
    Discard,
    /// Shared with the current process.
    Inherit,
    /// Appended to (or, for stdin, read from) a file.
    File(PathBuf),
}

impl StreamTarget {
    /// Builds a `Stdio` for an output stream, creating the file if needed.
    pub fn to_output(&self) -> io::Result<Stdio> {
        match self {
            Self::Discard => Ok(Stdio::null()),
            Self::Inherit => Ok(Stdio::inherit()),
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Stdio::from(file))
            }
        }
    }

    /// Builds a `Stdio` for an input stream.
    pub fn to_input(&self) -> io::Result<Stdio> {
        match self {
            Self::Discard => Ok(Stdio::null()),
            Self::Inherit => Ok(Stdio::inherit()),
            Self::File(path) => Ok(Stdio::from(File::open(path)?)),
        }
    }
}

/// Routing for all three standard streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdioConfig {
    pub stdin: StreamTarget,
    pub stdout: StreamTarget,
    pub stderr: StreamTarget,
}

impl StdioConfig {
    /// Every stream shared with the current process.
    pub fn inherit() -> Self {
        Self {
            stdin: StreamTarget::Inherit,
            stdout: StreamTarget::Inherit,
            stderr: StreamTarget::Inherit,
        }
    }

    /// Every stream connected to the null device.
    pub fn discard() -> Self {
        Self::default()
    }

    /// Applies the routing to `cmd`.
    pub fn apply(&self, cmd: &mut Command) -> io::Result<()> {
        cmd.stdin(self.stdin.to_input()?)
            .stdout(self.stdout.to_output()?)
            .stderr(self.stderr.to_output()?);
        Ok(())
    }
}
