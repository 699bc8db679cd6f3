//! Command execution and secure copy
//!
//! Abstracts "run this command, locally or over SSH" for testability:
//! - CommandRunner trait: interface used by jobs and submission records
//! - ShellRunner: real processes, `ssh` for remote commands, `scp` for uploads
//!
//! The in-process fake scheduler lives in `crate::mock`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Output};
use std::time::Duration;

use clusterjob_backends::{shell_quote, Command};
use tracing::debug;

/// A host reached over ssh, with the client executables to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub host: String,
    pub ssh: String,
    pub scp: String,
}

impl RemoteHost {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
        }
    }

    pub fn with_clients(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }
}

/// Execution errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Command `{command}` exited with {}: {output}", describe_code(.code))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Transfer of {local} to {destination} failed: {output}")]
    Transfer {
        local: String,
        destination: String,
        output: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Captured combined output, when the process ran
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::NonZeroExit { output, .. } | ExecError::Transfer { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Runs scheduler commands and local scripts
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `rootdir/workdir`, locally or on `remote`, and return
    /// its combined stdout and stderr.
    ///
    /// With `ignore_exit_failure` a non-zero exit returns the output instead
    /// of failing; backends read "job not found" text that way.
    fn run(
        &self,
        command: &Command,
        remote: Option<&RemoteHost>,
        rootdir: &str,
        workdir: &str,
        ignore_exit_failure: bool,
    ) -> Result<String, ExecError>;

    /// Copy a local file to `remote_path` on `remote`
    fn upload(&self, local: &Path, remote: &RemoteHost, remote_path: &str) -> Result<(), ExecError>;

    /// Run a rendered script (prologue or epilogue) locally, in the current
    /// working directory
    fn run_script(&self, script: &str) -> Result<String, ExecError>;

    /// Pause between two status queries
    fn sleep(&self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Runner backed by real processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Build the process for `command`, wrapping it in ssh when remote
    fn build(command: &Command, remote: Option<&RemoteHost>, dir: &str) -> Process {
        match remote {
            None => {
                let mut process = match command {
                    Command::Argv(args) => {
                        let mut p = Process::new(&args[0]);
                        p.args(&args[1..]);
                        p
                    }
                    Command::Shell(script) => {
                        let mut p = Process::new("sh");
                        p.arg("-c").arg(script);
                        p
                    }
                };
                if !dir.is_empty() {
                    process.current_dir(expand_tilde(dir));
                }
                process
            }
            Some(remote) => {
                let line = command.to_shell_string();
                let remote_line = if dir.is_empty() {
                    line
                } else {
                    format!("cd {} && {}", remote_path_arg(dir), line)
                };
                let mut p = Process::new(&remote.ssh);
                p.arg(&remote.host).arg(remote_line);
                p
            }
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(
        &self,
        command: &Command,
        remote: Option<&RemoteHost>,
        rootdir: &str,
        workdir: &str,
        ignore_exit_failure: bool,
    ) -> Result<String, ExecError> {
        let text = command.to_shell_string();
        if command.is_empty() {
            return Err(ExecError::Spawn {
                command: text,
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        }

        let dir = join_dir(rootdir, workdir);
        let mut process = Self::build(command, remote, &dir);
        match remote {
            Some(r) => debug!(host = %r.host, dir = %dir, "COMMAND: {}", text),
            None => debug!(dir = %dir, "COMMAND: {}", text),
        }

        let output = process.output().map_err(|source| ExecError::Spawn {
            command: text.clone(),
            source,
        })?;
        let combined = combine(&output);
        debug!("RESPONSE: ---\n{}\n---", combined);

        if output.status.success() || ignore_exit_failure {
            Ok(combined)
        } else {
            Err(ExecError::NonZeroExit {
                command: text,
                code: output.status.code(),
                output: combined,
            })
        }
    }

    fn upload(&self, local: &Path, remote: &RemoteHost, remote_path: &str) -> Result<(), ExecError> {
        let destination = format!("{}:{}", remote.host, remote_path);
        debug!("COMMAND: {} {} {}", remote.scp, local.display(), destination);

        let output = Process::new(&remote.scp)
            .arg(local)
            .arg(&destination)
            .output()
            .map_err(|source| ExecError::Spawn {
                command: remote.scp.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecError::Transfer {
                local: local.display().to_string(),
                destination,
                output: combine(&output),
            })
        }
    }

    fn run_script(&self, script: &str) -> Result<String, ExecError> {
        let mut file = tempfile::Builder::new()
            .prefix("clusterjob-")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        // Close the handle before exec; an open writer makes the kernel
        // refuse to run the file.
        let path = file.into_temp_path();
        set_executable(&path)?;

        let text = path.display().to_string();
        debug!("COMMAND: {}", text);
        let output = Process::new(&*path).output().map_err(|source| ExecError::Spawn {
            command: text.clone(),
            source,
        })?;
        let combined = combine(&output);
        debug!("RESPONSE: ---\n{}\n---", combined);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ExecError::NonZeroExit {
                command: text,
                code: output.status.code(),
                output: combined,
            })
        }
    }
}

fn combine(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// `rootdir/workdir`, where either part may be empty
pub fn join_dir(rootdir: &str, workdir: &str) -> String {
    match (rootdir.is_empty(), workdir.is_empty()) {
        (_, true) => rootdir.to_string(),
        (true, false) => workdir.to_string(),
        (false, false) => format!("{}/{}", rootdir, workdir),
    }
}

/// Expand a leading `~` to `$HOME`
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

/// Quote a path for a remote shell, keeping a leading `~` expandable
pub fn remote_path_arg(dir: &str) -> String {
    if dir == "~" {
        dir.to_string()
    } else if let Some(rest) = dir.strip_prefix("~/") {
        format!("~/{}", shell_quote(rest))
    } else {
        shell_quote(dir)
    }
}

/// Mark a file executable (rwxr-xr-x)
pub fn set_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    {
        let _ = fs::metadata(path)?;
    }
    Ok(())
}
