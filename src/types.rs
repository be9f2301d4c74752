use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;

/// Name of a container managed by the target tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ContainerName {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContainerName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ContainerName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0
    }
}

/// Identifier of a device in the registry. Container devices use the
/// composite `lmsdk.container.device:<name>` form so the container name
/// can be recovered from the id alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

const CONTAINER_DEVICE_PREFIX: &str = "lmsdk.container.device:";

impl DeviceId {
    pub fn for_container(name: &ContainerName) -> Self {
        Self(format!("{CONTAINER_DEVICE_PREFIX}{name}"))
    }

    /// The container name suffix, if this id names a container device.
    pub fn container_name(&self) -> Option<ContainerName> {
        self.0
            .strip_prefix(CONTAINER_DEVICE_PREFIX)
            .map(ContainerName::from)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn container_device_id_roundtrips_the_name() {
        let name = ContainerName::from("ivi-trusty-i386");
        let id = DeviceId::for_container(&name);
        assert_eq!(id.as_str(), "lmsdk.container.device:ivi-trusty-i386");
        assert_eq!(id.container_name(), Some(name));
    }

    #[test]
    fn foreign_id_has_no_container_name() {
        let id = DeviceId("desktop.local".to_string());
        assert_eq!(id.container_name(), None);
    }
}
