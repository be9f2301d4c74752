use std::path::PathBuf;
use std::time::Duration;

/// How an SSH session authenticates against the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshAuth {
    PublicKey,
}

/// Connection parameters handed to the SSH layer once a device is ready.
/// Only valid after detection reaches its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshParameters {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    pub private_key_file: PathBuf,
    pub timeout: Duration,
}

pub const SSH_PORT: u16 = 22;
pub const SSH_TIMEOUT: Duration = Duration::from_secs(20);

impl SshParameters {
    /// Parameters for a detected container device.
    pub fn for_container(host: String, username: String, private_key_file: PathBuf) -> Self {
        Self {
            host,
            port: SSH_PORT,
            username,
            auth: SshAuth::PublicKey,
            private_key_file,
            timeout: SSH_TIMEOUT,
        }
    }
}
