use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use lmsdkd::config::Config;
use lmsdkd::device::{ContainerDevice, Device};
use lmsdkd::issues::IssueLog;
use lmsdkd::registry::{DeviceRegistry, DeviceState};
use lmsdkd::types::{ContainerName, DeviceId};
use lmsdkd::{cli, setup};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or(EnvFilter::default().add_directive("info".parse()?)),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();

    info!("Container device agent started");

    let config = Arc::new(Config::from_cli(cli::parse()));
    debug!("{:#?}", config);

    // Fatal: without a working backend there is nothing to detect
    let tool = Arc::new(setup::initialize(&config).await?);
    info!("Container backend is ready");

    let registry = DeviceRegistry::new();
    let issues = IssueLog::new();

    let targets = tool.device_targets().await;
    if targets.is_empty() {
        warn!("No device-capable containers found");
    }

    // Subscribe before the devices start detecting, so that a device
    // reaching its final state before the first poll is still reported
    let mut states = registry.subscribe();

    let mut devices: Vec<Arc<ContainerDevice>> = Vec::new();
    for target in &targets {
        info!("Registering container device for {}", target.name);
        devices.push(ContainerDevice::new(
            ContainerName::from(target.name.clone()),
            Arc::clone(&config),
            Arc::clone(&tool),
            registry.clone(),
            issues.clone(),
        ));
    }

    // Report device state changes until shutdown
    let mut seen: HashMap<DeviceId, DeviceState> = HashMap::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = states.borrow_and_update().clone();
                for (id, state) in &snapshot {
                    if seen.get(id) == Some(state) {
                        continue;
                    }
                    match state {
                        DeviceState::ReadyToUse => {
                            let conn = devices
                                .iter()
                                .find(|device| device.id() == id)
                                .map(|device| device.display_connection_info())
                                .unwrap_or_default();
                            info!("Device {id} is ready to use ({conn})");
                        }
                        DeviceState::Disconnected => info!("Device {id} is disconnected"),
                    }
                }
                seen = snapshot;
            }
        }
    }

    for device in &devices {
        registry.remove(device.id());
    }
    if !issues.is_empty() {
        warn!("{} device issues were reported this session", issues.len());
    }

    info!("terminating");
    Ok(())
}
