use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

/// Name of the container management tool, resolved on PATH or next to
/// the agent binary.
pub const TARGET_TOOL: &str = "lmsdk-target";
/// Name of the compiler wrapper the SDK toolchains call into.
pub const WRAPPER_TOOL: &str = "lmsdk-wrapper";
/// Script that installs the device SSH public key inside a container.
pub const DEPLOY_KEY_SCRIPT: &str = "lmsdk-deploy-pubkey";
/// Identity file under the settings directory used for device SSH sessions.
pub const SSH_IDENTITY: &str = "lmsdk_device_id_rsa";

#[derive(Clone, Debug)]
pub struct Config {
    pub target_tool: Option<PathBuf>,
    pub wrapper_tool: Option<PathBuf>,
    pub deploy_key_script: PathBuf,
    pub settings_dir: PathBuf,
    pub sudo_program: PathBuf,
    pub auto_setup: bool,
    pub redetect_delay: Duration,
    pub tool_timeout: Duration,
}

/// Return the application settings directory
pub fn settings_dir() -> PathBuf {
    let dir = if let Some(config_dir) = dirs::config_dir() {
        config_dir
    } else {
        // Fallback to home directory if config dir is not available
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    };
    dir.join("lmsdk")
}

/// Directory of the running agent binary, used as the fallback location
/// for the SDK tools and scripts shipped alongside it.
fn app_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            target_tool: cli.target_tool,
            wrapper_tool: cli.wrapper_tool,
            deploy_key_script: cli
                .deploy_key_script
                .unwrap_or_else(|| app_dir().join(DEPLOY_KEY_SCRIPT)),
            settings_dir: cli.settings_dir.unwrap_or_else(settings_dir),
            sudo_program: cli.sudo_program.unwrap_or_else(|| PathBuf::from("sudo")),
            auto_setup: cli.auto_setup,
            redetect_delay: cli.redetect_delay.unwrap_or(Duration::from_secs(1)),
            tool_timeout: cli.tool_timeout.unwrap_or(Duration::from_secs(3)),
        }
    }

    /// Private key file applied to detected devices.
    pub fn ssh_identity_file(&self) -> PathBuf {
        self.settings_dir.join(SSH_IDENTITY)
    }
}
