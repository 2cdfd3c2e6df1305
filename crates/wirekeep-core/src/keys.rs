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

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::error::WireguardError;
use crate::shell::Shell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generates WireGuard keys with the `wg` binary. Nothing is cached.
pub struct KeyManager<'a, S> {
    shell: &'a S,
    wg_bin: &'a str,
}

impl<'a, S: Shell> KeyManager<'a, S> {
    pub fn new(shell: &'a S, wg_bin: &'a str) -> Self {
        Self { shell, wg_bin }
    }

    pub async fn generate_private_key(&self) -> Result<String, WireguardError> {
        let result = self
            .shell
            .run(&format!("{} genkey", self.wg_bin), true)
            .await?;
        if !result.successful() {
            return Err(WireguardError::command(result.err));
        }
        Ok(result.output)
    }

    pub async fn generate_public_key(&self, private_key: &str) -> Result<String, WireguardError> {
        let result = self
            .shell
            .run(&format!("echo {private_key} | {} pubkey", self.wg_bin), false)
            .await?;
        if !result.successful() {
            return Err(WireguardError::command(result.err));
        }
        Ok(result.output)
    }

    pub async fn generate_pair(&self) -> Result<KeyPair, WireguardError> {
        let private_key = self.generate_private_key().await?;
        let public_key = self.generate_public_key(&private_key).await?;
        debug!(public_key = %public_key, "generated key pair");
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }
}

/// Check that a key is base64 encoding exactly 32 bytes.
pub fn validate_key(b64: &str) -> Result<(), WireguardError> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|e| WireguardError::invalid(format!("Invalid key: {e}")))?;
    if bytes.len() != 32 {
        return Err(WireguardError::invalid(format!(
            "Invalid key length: expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::shell::CommandResult;

    struct ScriptedShell {
        calls: Mutex<Vec<(String, bool)>>,
        code: i32,
    }

    impl ScriptedShell {
        fn new(code: i32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                code,
            }
        }
    }

    impl Shell for ScriptedShell {
        async fn run(&self, command: &str, as_root: bool) -> io::Result<CommandResult> {
            self.calls.lock().unwrap().push((command.to_string(), as_root));
            if self.code != 0 {
                return Ok(CommandResult::new(self.code, "", "wg: not found"));
            }
            let output = if command.ends_with("genkey") {
                "cHJpdmF0ZQ=="
            } else {
                "cHVibGlj"
            };
            Ok(CommandResult::new(0, output, ""))
        }
    }

    #[tokio::test]
    async fn generates_pair_through_wg() {
        let shell = ScriptedShell::new(0);
        let pair = KeyManager::new(&shell, "/usr/bin/wg")
            .generate_pair()
            .await
            .unwrap();
        assert_eq!(pair.private_key, "cHJpdmF0ZQ==");
        assert_eq!(pair.public_key, "cHVibGlj");

        let calls = shell.calls.lock().unwrap();
        assert_eq!(calls[0], ("/usr/bin/wg genkey".to_string(), true));
        assert_eq!(
            calls[1],
            ("echo cHJpdmF0ZQ== | /usr/bin/wg pubkey".to_string(), false)
        );
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let shell = ScriptedShell::new(127);
        let err = KeyManager::new(&shell, "wg")
            .generate_private_key()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "wg: not found");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn validates_key_length() {
        assert!(validate_key("KMLxYphCvI4joTyrf3Dp9Yg1vLUj+b8SjLFrUeYnCk0=").is_ok());
        assert!(validate_key("c2hvcnQ=").is_err());
        assert!(validate_key("not base64!").is_err());
    }
}
