//! One-shot execution of the installed binary.

use std::ffi::OsString;
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::{debug, error};

use crate::installer::{InstallError, Installation};
use crate::stdio::StdioConfig;

/// Exit code reported when the binary could not be executed at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Installs the binary if missing, runs it once with `args` and returns
/// its exit code.
///
/// Only installation failures are errors. A binary that cannot be spawned
/// yields [`SPAWN_FAILURE_EXIT_CODE`].
pub async fn run_one_shot(
    installation: &Installation,
    args: &[OsString],
    stdio: &StdioConfig,
) -> Result<i32, InstallError> {
    let bin_path = installation.ensure_installed().await?;
    debug!("Running {} {:?}", bin_path.display(), args);

    let mut cmd = Command::new(&bin_path);
    cmd.args(args);
    if let Err(e) = stdio.apply(&mut cmd) {
        error!("Failed to set up I/O for {}: {}", bin_path.display(), e);
        return Ok(SPAWN_FAILURE_EXIT_CODE);
    }

    match cmd.status().await {
        Ok(status) => Ok(exit_code(status)),
        Err(e) => {
            error!("Failed to run {}: {}", bin_path.display(), e);
            Ok(SPAWN_FAILURE_EXIT_CODE)
        }
    }
}

/// Numeric exit code, `128 + signal` for signal deaths on unix.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Arguments forwarded by the CLI: `--help` when none were given.
pub fn cli_args(args: Vec<OsString>) -> Vec<OsString> {
    if args.is_empty() {
        vec![OsString::from("--help")]
    } else {
        args
    }
}
