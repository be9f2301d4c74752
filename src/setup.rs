//! Container backend initialization.
//!
//! Runs once at startup. Unlike detection, problems here are fatal:
//! without a working container backend nothing else in the agent can
//! function, so every error aborts the whole program.

use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info};

use crate::config::{Config, TARGET_TOOL, WRAPPER_TOOL};
use crate::tool::{self, TargetTool};

// Exit codes of `<tool> initialized`.
const INIT_OK: i32 = 0;
const INIT_NO_ACCESS: i32 = 255;
const INIT_NEEDS_FIXING: i32 = 254;
const INIT_NO_BRIDGE: i32 = 253;
const INIT_NO_LXC: i32 = 252;
const INIT_NO_SETUP: i32 = 251;

// `initialized` performs real backend probes and may be slow, so it gets
// a much larger window than ordinary tool queries.
const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("the LinkMotion SDK can not be used as superuser")]
    Superuser,

    #[error("lxc is not installed properly, it is required for the container backend")]
    LxcMissing,

    #[error("{0} was not found in PATH or next to the agent binary")]
    ToolMissing(&'static str),

    #[error("the container backend setup detection did not return in time")]
    CheckTimeout,

    #[error("the container backend setup detection failed: {0}")]
    CheckFailed(#[from] std::io::Error),

    #[error("the container backend setup detection was terminated abnormally")]
    CheckAborted,

    #[error(
        "the current user can not access the container server, \
         make sure the user is part of the lxd group, relogin and restart"
    )]
    NoAccess,

    #[error("the container backend is not initialized and automatic setup is disabled")]
    NotInitialized,

    #[error("the container backend needs fixing and automatic setup is disabled")]
    NeedsFixing,

    #[error("setting up the container backend failed")]
    AutoSetupFailed,

    #[error("fixing the container backend failed")]
    AutoFixFailed,

    #[error("the container backend returned an unknown error status ({0})")]
    Unknown(i32),
}

/// Verify the environment, resolve the SDK tools and bring the container
/// backend into a usable state. Returns the tool client everything else
/// shares.
pub async fn initialize(config: &Config) -> Result<TargetTool, SetupError> {
    if unsafe { libc::getuid() } == 0 {
        return Err(SetupError::Superuser);
    }
    if tool::locate_in_path("lxc-start").is_none() {
        return Err(SetupError::LxcMissing);
    }

    let wrapper = resolve_tool(config.wrapper_tool.clone(), WRAPPER_TOOL)?;
    debug!("using wrapper tool {}", wrapper.display());

    let program = resolve_tool(config.target_tool.clone(), TARGET_TOOL)?;
    debug!("using target tool {}", program.display());

    let target_tool = TargetTool::new(program, config.tool_timeout);
    check_backend(config, &target_tool).await?;

    Ok(target_tool)
}

fn resolve_tool(
    explicit: Option<std::path::PathBuf>,
    name: &'static str,
) -> Result<std::path::PathBuf, SetupError> {
    match explicit {
        Some(path) if tool::is_executable(&path) => Ok(path),
        Some(_) => Err(SetupError::ToolMissing(name)),
        None => tool::locate(name).ok_or(SetupError::ToolMissing(name)),
    }
}

/// Run the backend status probe until it reports readiness, performing
/// the elevated setup/fix steps in between when the configuration
/// allows it.
pub(crate) async fn check_backend(config: &Config, tool: &TargetTool) -> Result<(), SetupError> {
    loop {
        let mut command = Command::new(tool.program());
        command.arg("initialized");
        if !config.auto_setup {
            // batch mode: tell the tool it must not expect any setup
            command.arg("-b");
        }

        debug!("checking container backend setup");
        let output = time::timeout(
            CHECK_TIMEOUT,
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| SetupError::CheckTimeout)??;

        let code = output.status.code().ok_or(SetupError::CheckAborted)?;
        match code {
            INIT_OK => return Ok(()),
            INIT_NO_ACCESS => return Err(SetupError::NoAccess),
            INIT_NO_LXC => return Err(SetupError::LxcMissing),
            INIT_NO_BRIDGE | INIT_NO_SETUP => {
                if !config.auto_setup {
                    return Err(SetupError::NotInitialized);
                }
                info!("container backend is not initialized, running autosetup");
                if !run_elevated(config, tool, &["autosetup", "-y"]).await {
                    return Err(SetupError::AutoSetupFailed);
                }
            }
            INIT_NEEDS_FIXING => {
                if !config.auto_setup {
                    return Err(SetupError::NeedsFixing);
                }
                info!("container backend reported problems, running autofix");
                if !run_elevated(config, tool, &["autofix"]).await {
                    return Err(SetupError::AutoFixFailed);
                }
            }
            other => return Err(SetupError::Unknown(other)),
        }
    }
}

async fn run_elevated(config: &Config, tool: &TargetTool, args: &[&str]) -> bool {
    Command::new(&config.sudo_program)
        .arg(tool.program())
        .args(args)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
