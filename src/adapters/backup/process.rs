//! Child process supervision for the dump, restore and gpg commands.
//!
//! Children are wired together with OS pipes, so dump output never passes
//! through this process. Each child's stderr is drained on its own thread and
//! logged line by line.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::error::BackupError;

const POLL_STEP: Duration = Duration::from_millis(100);

/// Locates `program` on `PATH`, or checks it directly when it contains a separator.
pub fn find_command(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

pub fn check_for_command(program: &str, desc: &str) -> Result<PathBuf, BackupError> {
    find_command(program).ok_or_else(|| BackupError::NoCommand {
        command: program.to_string(),
        desc: desc.to_string(),
    })
}

/// A spawned child with its stderr being logged.
pub struct Supervised {
    child: Child,
    desc: String,
    stderr_logger: Option<JoinHandle<()>>,
}

impl Supervised {
    /// Spawns `command` after checking the program exists.
    pub fn spawn(
        mut command: Command,
        desc: &str,
        stdin: Stdio,
        stdout: Stdio,
    ) -> Result<Self, BackupError> {
        let program = command.get_program().to_string_lossy().into_owned();
        check_for_command(&program, desc)?;

        let args: Vec<_> = command.get_args().map(OsStr::to_string_lossy).collect();
        info!(desc, "running \"{} {}\"", program, args.join(" "));

        let mut child = command
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr_logger = child.stderr.take().map(|stderr| {
            let desc = desc.to_string();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    info!("{desc} [STDERR] {line}");
                }
            })
        });

        Ok(Self {
            child,
            desc: desc.to_string(),
            stderr_logger,
        })
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Polls until the child exits or `timeout` elapses. `None` means still running.
    pub fn wait_for(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, BackupError> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(POLL_STEP);
        }
    }

    /// Kills the child if it is still running.
    pub fn kill(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                error!(desc = %self.desc, error = %e, "could not kill process");
            }
            let _ = self.child.wait();
        }
    }

    /// Waits up to `timeout`, kills a hung child, and fails on a non-zero exit.
    pub fn finish(mut self, timeout: Duration) -> Result<(), BackupError> {
        let status = match self.wait_for(timeout)? {
            Some(status) => {
                if let Some(logger) = self.stderr_logger.take() {
                    let _ = logger.join();
                }
                status
            }
            None => {
                // Grandchildren may still hold stderr open, so the logger is left detached.
                error!(desc = %self.desc, "timed out waiting for the process to finish, killing it");
                self.child.kill()?;
                self.child.wait()?
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(BackupError::FailedToRun {
                desc: self.desc.clone(),
                exit_code: status.code(),
            })
        }
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Runs a command to completion and returns its trimmed stdout.
pub fn run_capture(command: Command, desc: &str, timeout: Duration) -> Result<String, BackupError> {
    let mut process = Supervised::spawn(command, desc, Stdio::null(), Stdio::piped())?;
    let reader = process.take_stdout().map(|mut stdout| {
        thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        })
    });

    process.finish(timeout)?;

    let output = match reader {
        Some(handle) => match handle.join() {
            Ok(result) => result?,
            Err(_) => String::new(),
        },
        None => String::new(),
    };
    Ok(output.trim().to_string())
}
