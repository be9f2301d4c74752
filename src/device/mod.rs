pub mod detect;
pub mod ssh;

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::issues::IssueLog;
use crate::registry::DeviceRegistry;
use crate::tool::TargetTool;
use crate::types::{ContainerName, DeviceId};

use ssh::SshParameters;

/// Capability surface the rest of the IDE sees for a deployment target.
/// Container devices are the only kind today; future kinds implement
/// this instead of extending an inheritance chain.
pub trait Device: Send + Sync {
    fn id(&self) -> &DeviceId;
    fn display_connection_info(&self) -> String;
    fn trigger_detection(&self);
}

/// Owns one detection run: its cancellation token and the task driving
/// it. Dropping the handle cancels the run; any process it spawned is
/// killed when the run future is dropped.
struct DetectionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// A deployment target backed by a local container.
///
/// Detection starts on construction and on duplication. Connection
/// parameters are only populated once the device reaches the ready
/// state in the registry; consumers get `None` before that.
pub struct ContainerDevice {
    id: DeviceId,
    name: ContainerName,
    config: Arc<Config>,
    tool: Arc<TargetTool>,
    registry: DeviceRegistry,
    issues: IssueLog,
    ssh: Arc<Mutex<Option<SshParameters>>>,
    detection: Mutex<Option<DetectionHandle>>,
}

impl ContainerDevice {
    pub fn new(
        name: ContainerName,
        config: Arc<Config>,
        tool: Arc<TargetTool>,
        registry: DeviceRegistry,
        issues: IssueLog,
    ) -> Arc<Self> {
        let device = Arc::new(Self {
            id: DeviceId::for_container(&name),
            name,
            config,
            tool,
            registry,
            issues,
            ssh: Arc::new(Mutex::new(None)),
            detection: Mutex::new(None),
        });
        device.trigger_detection();
        device
    }

    /// A fresh device for the same container. Nothing is carried over
    /// from this one; the copy detects from scratch.
    pub fn duplicate(&self) -> Arc<Self> {
        Self::new(
            self.name.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.tool),
            self.registry.clone(),
            self.issues.clone(),
        )
    }

    pub fn container_name(&self) -> &ContainerName {
        &self.name
    }

    /// Connection parameters, once detection has finished.
    pub fn ssh_parameters(&self) -> Option<SshParameters> {
        self.ssh.lock().expect("ssh parameter slot poisoned").clone()
    }
}

impl Device for ContainerDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn display_connection_info(&self) -> String {
        match self.ssh_parameters() {
            Some(params) => format!("{}@{}:{}", params.username, params.host, params.port),
            None => format!("{} (disconnected)", self.name),
        }
    }

    fn trigger_detection(&self) {
        debug!("starting detection for {}", self.id);
        let cancel = CancellationToken::new();
        let ctx = detect::DetectContext {
            id: self.id.clone(),
            name: self.name.clone(),
            config: Arc::clone(&self.config),
            tool: Arc::clone(&self.tool),
            registry: self.registry.clone(),
            issues: self.issues.clone(),
            ssh: Arc::clone(&self.ssh),
        };
        let task = tokio::spawn(detect::run(ctx, cancel.clone()));

        // Replacing the handle tears the previous run down first, so a
        // device never has more than one run in flight.
        *self.detection.lock().expect("detection slot poisoned") =
            Some(DetectionHandle { cancel, task });
    }
}
