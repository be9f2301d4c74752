//! Container device detection.
//!
//! A detection run walks a fixed sequence of external processes: query the
//! container status for its IP address, deploy the SSH public key, then
//! publish connection parameters and mark the device ready. The registry
//! only ever shows the device as disconnected or ready; any failure
//! restarts the whole sequence from the beginning after a short delay,
//! indefinitely, until the device is destroyed.

use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, TARGET_TOOL};
use crate::issues::IssueLog;
use crate::registry::{DeviceRegistry, DeviceState};
use crate::tool::{self, TargetTool};
use crate::types::{ContainerName, DeviceId};

use super::ssh::SshParameters;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("could not find {0}, the container backend will not work")]
    ToolNotFound(&'static str),

    #[error("failed to start {command}: {source}")]
    Start {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} reported failure:\n{stdout}\n{stderr}")]
    Process {
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("it was not possible to parse the status: {0}")]
    StatusParse(#[from] serde_json::Error),

    #[error("the returned status was not a JSON object")]
    StatusNotObject,

    #[error("no IP address was returned")]
    MissingIpv4,
}

/// Everything one device's detection run needs. Cloned channels and
/// shared handles only; the run owns no device state directly.
pub(crate) struct DetectContext {
    pub(crate) id: DeviceId,
    pub(crate) name: ContainerName,
    pub(crate) config: Arc<Config>,
    pub(crate) tool: Arc<TargetTool>,
    pub(crate) registry: DeviceRegistry,
    pub(crate) issues: IssueLog,
    pub(crate) ssh: Arc<Mutex<Option<SshParameters>>>,
}

/// Drive detection for one device until it succeeds or is cancelled.
///
/// Each attempt resets the device to disconnected and clears any
/// previously resolved connection parameters, so a re-triggered run
/// always starts from scratch. Dropping the attempt future kills the
/// step process that is currently in flight.
pub(crate) async fn run(ctx: DetectContext, cancel: CancellationToken) {
    loop {
        ctx.registry.set_state(&ctx.id, DeviceState::Disconnected);
        *ctx.ssh.lock().expect("ssh parameter slot poisoned") = None;

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = detect_once(&ctx) => match result {
                Ok(params) => {
                    info!("device {} detected at {}", ctx.name, params.host);
                    *ctx.ssh.lock().expect("ssh parameter slot poisoned") = Some(params);
                    ctx.registry.set_state(&ctx.id, DeviceState::ReadyToUse);
                    return;
                }
                Err(err) => {
                    ctx.issues.warn(format!(
                        "There was an error in the device detection of {}: {err}",
                        ctx.name
                    ));
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(ctx.config.redetect_delay) => {}
        }
    }
}

/// One pass through the detection sequence. Any error aborts the pass;
/// the caller decides whether to retry.
async fn detect_once(ctx: &DetectContext) -> Result<SshParameters, DetectError> {
    // The tool may appear on PATH between retries, so check on every
    // pass rather than once at startup.
    let program = ctx.tool.program();
    if !tool::is_executable(program) {
        return Err(DetectError::ToolNotFound(TARGET_TOOL));
    }

    debug!("device {}: querying container status", ctx.name);
    let output = run_step(program, &["status", ctx.name.as_str()]).await?;

    let status: Value = serde_json::from_slice(&output.stdout)?;
    let status = status.as_object().ok_or(DetectError::StatusNotObject)?;
    let ip = status
        .get("ipv4")
        .and_then(Value::as_str)
        .ok_or(DetectError::MissingIpv4)?
        .to_string();

    debug!("device {}: deploying SSH key", ctx.name);
    run_step(&ctx.config.deploy_key_script, &[ctx.name.as_str()]).await?;

    let username = ctx.tool.default_user(&ctx.name).await;
    Ok(SshParameters::for_container(
        ip,
        username,
        ctx.config.ssh_identity_file(),
    ))
}

/// Spawn one detection step and wait for it to exit. At most one step
/// process is alive at a time; an abandoned step is killed when its
/// future is dropped.
async fn run_step(program: &Path, args: &[&str]) -> Result<std::process::Output, DetectError> {
    let command = format!("{} {}", program.display(), args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| DetectError::Start {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(DetectError::Process {
            command,
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}
