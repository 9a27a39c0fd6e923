//! Logging initialization.
//!
//! Filter precedence: the explicit level option, then `RUST_LOG`, then
//! `info`. A log target starting with `|` names a command that receives
//! the log lines on its stdin; any other target is opened as an append
//! file. Either way output goes through a non-blocking appender; the
//! returned guard must stay alive for buffered lines to reach the sink.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, WirecallError};

/// Install the global tracing subscriber.
///
/// Returns the appender guard when a log target is configured. When a
/// subscriber is already installed (a second server in the same process,
/// or a test harness) the existing one is kept and `None` comes back.
pub(crate) fn init(level: Option<&str>, target: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| WirecallError::Config(format!("invalid log level '{level}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match target {
        Some(target) => {
            let (writer, guard) = open_sink(target)?;
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Ok(installed.is_ok().then_some(guard))
        }
        None => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            Ok(None)
        }
    }
}

/// Open the log sink behind a non-blocking writer.
///
/// `|command` runs the command under `/bin/sh -c` and pipes lines into
/// its stdin; the command keeps running after its handle drops and exits
/// when the guard closes the pipe. Anything else appends to a file.
fn open_sink(target: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    if let Some(command) = target.to_str().and_then(|s| s.strip_prefix('|')) {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| {
                WirecallError::Config(format!("cannot start log pipe '{command}': {e}"))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WirecallError::Config(format!("log pipe '{command}' has no stdin")))?;
        Ok(tracing_appender::non_blocking(stdin))
    } else {
        let file = OpenOptions::new().append(true).create(true).open(target)?;
        Ok(tracing_appender::non_blocking(file))
    }
}
