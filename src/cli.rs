use clap::Parser;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Path to the lmsdk-target tool, searched on PATH and next to the
    /// agent binary when not given
    #[arg(env = "LMSDK_TARGET_TOOL", long = "target-tool", value_name = "path")]
    pub target_tool: Option<PathBuf>,

    /// Path to the lmsdk-wrapper tool
    #[arg(env = "LMSDK_WRAPPER_TOOL", long = "wrapper-tool", value_name = "path")]
    pub wrapper_tool: Option<PathBuf>,

    /// Path to the script deploying the SSH public key into a container
    #[arg(
        env = "LMSDK_DEPLOY_KEY_SCRIPT",
        long = "deploy-key-script",
        value_name = "path"
    )]
    pub deploy_key_script: Option<PathBuf>,

    /// Settings directory holding the device SSH identity file
    #[arg(env = "LMSDK_SETTINGS_DIR", long = "settings-dir", value_name = "dir")]
    pub settings_dir: Option<PathBuf>,

    /// Privilege elevation binary used for container backend setup
    #[arg(env = "LMSDK_SUDO", long = "sudo", value_name = "path")]
    pub sudo_program: Option<PathBuf>,

    /// Set up or fix the container backend without asking when needed
    #[arg(env = "LMSDK_AUTO_SETUP", long = "auto-setup")]
    pub auto_setup: bool,

    /// Delay before a failed detection run restarts, in milliseconds
    #[arg(
        env = "LMSDK_REDETECT_DELAY_MS",
        long = "redetect-delay-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub redetect_delay: Option<Duration>,

    /// Timeout for target tool queries in milliseconds
    #[arg(
        env = "LMSDK_TOOL_TIMEOUT_MS",
        long = "tool-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub tool_timeout: Option<Duration>,
}

pub fn parse() -> Cli {
    Parser::parse()
}
