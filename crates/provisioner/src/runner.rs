use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::error::{ProvisionError, Result};

/// A program to run on this machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl LocalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Printable form for logs and errors.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// An ssh endpoint reached with the account's key.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHost {
    pub address: String,
    pub user: String,
    pub port: u16,
    pub private_key: PathBuf,
}

impl RemoteHost {
    pub fn new(address: impl Into<String>, user: impl Into<String>, private_key: PathBuf) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            port: 22,
            private_key,
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a local program and returns its stdout. A non-zero exit is an error.
    async fn run_local(&self, command: &LocalCommand) -> Result<String>;

    /// Runs `command` through the remote shell of `host` and returns its stdout.
    async fn run_remote(&self, host: &RemoteHost, command: &str) -> Result<String>;
}

/// Runs local programs directly and remote commands through the `ssh` client.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    ssh_binary: String,
    connect_timeout: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ShellRunner {
    pub fn new(ssh_binary: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
            connect_timeout,
        }
    }

    /// Arguments for a non-interactive ssh session. Fresh instances have
    /// unknown host keys, so host key checking is off.
    fn ssh_args(&self, host: &RemoteHost, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            host.private_key.to_string_lossy().into_owned(),
            "-p".to_string(),
            host.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            format!("{}@{}", host.user, host.address),
            command.to_string(),
        ]
    }

    async fn execute(&self, command: &LocalCommand, shown_as: &str) -> Result<String> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            process.env(key, value);
        }
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }

        debug!("Running: {shown_as}");
        let output = process.output().await.map_err(|e| ProvisionError::Command {
            command: shown_as.to_string(),
            reason: format!("failed to start: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Command {
                command: shown_as.to_string(),
                reason: format!("{}: {}", output.status, tail(&stderr, 20)),
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run_local(&self, command: &LocalCommand) -> Result<String> {
        self.execute(command, &command.display()).await
    }

    async fn run_remote(&self, host: &RemoteHost, command: &str) -> Result<String> {
        let ssh = LocalCommand::new(&self.ssh_binary).args(self.ssh_args(host, command));
        // Remote commands carry tokens, only the target goes into logs
        let shown_as = format!("ssh {}@{}", host.user, host.address);
        self.execute(&ssh, &shown_as).await
    }
}

/// Last `lines` lines of `text`, trimmed.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
