//! Process-invocation and filesystem boundary.
//!
//! Every external call made by a collector goes through a [`CommandRunner`],
//! which bounds it with a timeout and reclaims the child process if the
//! caller gives up (timeout or dropped future).

use crate::errors::CollectorError;
use async_trait::async_trait;
use nix::unistd::{access, AccessFlags};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Config/status files larger than this fail the read.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of one finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout if it is usable: a zero exit, or a non-zero exit that still
    /// printed a report (several cluster tools signal degraded state that way).
    pub fn into_report(self, program: &Path) -> Result<String, CollectorError> {
        if self.success() || !self.stdout.trim().is_empty() {
            if !self.success() {
                debug!(program = %program.display(), code = ?self.code, "non-zero exit with output, parsing anyway");
            }
            return Ok(self.stdout);
        }
        Err(CollectorError::ExitStatus {
            program: program.display().to_string(),
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion and capture its output.
    async fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput, CollectorError>;
}

/// Runs real executables via tokio, one bounded wait per call.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput, CollectorError> {
        let name = program.display().to_string();
        debug!(program = %name, ?args, "executing");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CollectorError::Spawn {
                program: name.clone(),
                source: e,
            })?;

        // on timeout the child is dropped with the future and killed
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CollectorError::Timeout {
                program: name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| CollectorError::Spawn {
                program: name,
                source: e,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Construction-time check that `path` is an executable regular file.
pub fn check_executable(path: &Path) -> Result<(), CollectorError> {
    let is_file = std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file || access(path, AccessFlags::X_OK).is_err() {
        return Err(CollectorError::NotExecutable {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Construction-time check that `path` exists.
pub fn check_file(path: &Path) -> Result<(), CollectorError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|e| CollectorError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Read a text file of at most [`MAX_FILE_BYTES`] within `timeout`.
pub async fn read_bounded(path: &Path, timeout: Duration) -> Result<String, CollectorError> {
    let read = async {
        let file = tokio::fs::File::open(path).await?;
        let mut buf = Vec::new();
        file.take(MAX_FILE_BYTES + 1).read_to_end(&mut buf).await?;
        if buf.len() as u64 > MAX_FILE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("file is larger than {} bytes", MAX_FILE_BYTES),
            ));
        }
        Ok::<_, std::io::Error>(buf)
    };

    let bytes = tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| CollectorError::Timeout {
            program: path.display().to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| CollectorError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

    String::from_utf8(bytes).map_err(|e| CollectorError::parse("file contents", e))
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned outputs keyed by "program arg1 arg2 ..."; unknown commands fail to spawn.
    #[derive(Debug, Default)]
    pub struct FixtureRunner {
        outputs: HashMap<String, CommandOutput>,
        pub calls: AtomicUsize,
    }

    impl FixtureRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(self, program: &Path, args: &[&str], stdout: &str) -> Self {
            self.with_exit(program, args, 0, stdout)
        }

        pub fn with_exit(mut self, program: &Path, args: &[&str], code: i32, stdout: &str) -> Self {
            self.outputs.insert(
                key(program, args),
                CommandOutput {
                    code: Some(code),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }
    }

    fn key(program: &Path, args: &[&str]) -> String {
        format!("{} {}", program.display(), args.join(" "))
    }

    #[async_trait]
    impl CommandRunner for FixtureRunner {
        async fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput, CollectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.outputs
                .get(&key(program, args))
                .cloned()
                .ok_or_else(|| CollectorError::Spawn {
                    program: program.display().to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
        }
    }

    /// A 0755 file standing in for an executable at construction time.
    pub fn fake_executable(dir: &Path, name: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
