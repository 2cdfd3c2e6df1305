// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use tracing::{debug, error};

use crate::config::WireguardConfig;
use crate::keys::KeyManager;

/// Outcome of one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub code: i32,
    pub output: String,
    pub err: String,
}

impl CommandResult {
    pub fn new(code: i32, output: impl Into<String>, err: impl Into<String>) -> Self {
        Self {
            code,
            output: output.into().trim().to_string(),
            err: err.into().trim().to_string(),
        }
    }

    /// Zero and negative exit codes both count as success.
    pub fn successful(&self) -> bool {
        self.code < 1
    }
}

/// Runs command lines on the host. Every OS interaction goes through here so
/// tests can substitute a recording implementation.
pub trait Shell: Send + Sync {
    fn run(
        &self,
        command: &str,
        as_root: bool,
    ) -> impl Future<Output = io::Result<CommandResult>> + Send;
}

/// Executes commands through `sh -c`, prefixing `sudo` for privileged calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    async fn run(&self, command: &str, as_root: bool) -> io::Result<CommandResult> {
        let command = if as_root {
            format!("sudo {command}")
        } else {
            command.to_string()
        };
        debug!(command = %command, "running command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await?;

        // Killed by a signal: report it the way a shell would see it.
        let code = output.status.code().unwrap_or(-1);
        let result = CommandResult::new(
            code,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        if !result.successful() {
            error!(
                command = %command,
                code = result.code,
                stdout = %result.output,
                stderr = %result.err,
                "command failed"
            );
        }
        Ok(result)
    }
}

/// The machine the interfaces live on: a shell plus the binaries and folders
/// to use with it.
#[derive(Debug)]
pub struct Host<S> {
    pub shell: S,
    pub config: WireguardConfig,
}

impl<S: Shell> Host<S> {
    pub fn new(shell: S, config: WireguardConfig) -> Self {
        Self { shell, config }
    }

    pub fn keys(&self) -> KeyManager<'_, S> {
        KeyManager::new(&self.shell, &self.config.wg_bin)
    }

    pub fn conf_file_for(&self, name: &str) -> PathBuf {
        self.config.interfaces_folder.join(format!("{name}.conf"))
    }

    pub async fn run(&self, command: &str) -> io::Result<CommandResult> {
        self.shell.run(command, false).await
    }

    pub async fn run_as_root(&self, command: &str) -> io::Result<CommandResult> {
        self.shell.run(command, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, true ; "zero")]
    #[test_case(-1, true ; "negative")]
    #[test_case(1, false ; "one")]
    #[test_case(127, false ; "not found")]
    fn success_policy(code: i32, expected: bool) {
        assert_eq!(CommandResult::new(code, "", "").successful(), expected);
    }

    #[test]
    fn output_is_trimmed() {
        let result = CommandResult::new(0, "  key\n", "\twarning \n");
        assert_eq!(result.output, "key");
        assert_eq!(result.err, "warning");
    }

    #[tokio::test]
    async fn system_shell_captures_output() {
        let result = SystemShell.run("echo hello; echo oops >&2", false).await.unwrap();
        assert!(result.successful());
        assert_eq!(result.output, "hello");
        assert_eq!(result.err, "oops");
    }

    #[tokio::test]
    async fn system_shell_reports_exit_code() {
        let result = SystemShell.run("exit 3", false).await.unwrap();
        assert_eq!(result.code, 3);
        assert!(!result.successful());
    }

    #[test]
    fn conf_file_uses_interfaces_folder() {
        let config = WireguardConfig {
            interfaces_folder: PathBuf::from("/etc/wirekeep/interfaces"),
            ..WireguardConfig::default()
        };
        let host = Host::new(SystemShell, config);
        assert_eq!(
            host.conf_file_for("wg0"),
            PathBuf::from("/etc/wirekeep/interfaces/wg0.conf")
        );
    }
}
