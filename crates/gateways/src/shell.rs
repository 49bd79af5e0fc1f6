//! Remote shell gateway
//!
//! In-band command execution on a freshly imaged host, used for hardware
//! facts only the operating system can see (accelerator NICs).

use crate::error::GatewayError;
use std::path::PathBuf;
use tracing::debug;

/// Executes commands on an enrolled host over SSH.
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` on `host`, returning its stdout.
    async fn run(
        &self,
        host: &str,
        private_key: &str,
        command: &str,
    ) -> Result<String, GatewayError>;
}

/// SSH shell using the system ssh binary.
pub struct SshShell {
    user: String,
}

impl SshShell {
    /// Create a new SSH shell logging in as `user`.
    pub fn new(user: String) -> Self {
        Self { user }
    }
}

#[async_trait::async_trait]
impl RemoteShell for SshShell {
    async fn run(
        &self,
        host: &str,
        private_key: &str,
        command: &str,
    ) -> Result<String, GatewayError> {
        // ssh insists on a key file with owner-only permissions
        let key_path: PathBuf =
            std::env::temp_dir().join(format!("enroll-key-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&key_path, private_key)
            .await
            .map_err(|e| GatewayError::Shell(format!("write key file: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| GatewayError::Shell(format!("chmod key file: {}", e)))?;
        }

        debug!("Remote shell on {}: {}", host, command);
        let output = tokio::process::Command::new("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("ConnectTimeout=15")
            .arg("-i")
            .arg(&key_path)
            .arg(format!("{}@{}", self.user, host))
            .arg(command)
            .output()
            .await;

        let _ = tokio::fs::remove_file(&key_path).await;

        let output = output.map_err(|e| GatewayError::Shell(format!("spawn ssh: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Shell(format!(
                "ssh {}@{} exited with {}: {}",
                self.user,
                host,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
