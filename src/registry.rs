use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::types::DeviceId;

/// Connectivity state of a device as seen by the rest of the IDE.
///
/// Detection publishes no intermediate states; consumers only ever
/// observe a device as disconnected or ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    ReadyToUse,
}

type StateMap = HashMap<DeviceId, DeviceState>;

/// Process-wide table of known devices and their connectivity state.
/// Every change is broadcast as a full snapshot over a watch channel.
///
/// The channel's value is the only copy of the table; writers mutate it
/// in place, so updates are applied and published atomically and no
/// write can shadow a newer one.
#[derive(Clone)]
pub struct DeviceRegistry {
    tx: watch::Sender<StateMap>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StateMap::new());
        Self { tx }
    }

    pub fn set_state(&self, id: &DeviceId, state: DeviceState) {
        debug!("device {id} is now {state:?}");
        self.tx.send_modify(|states| {
            states.insert(id.clone(), state);
        });
    }

    pub fn remove(&self, id: &DeviceId) {
        self.tx.send_modify(|states| {
            states.remove(id);
        });
    }

    pub fn state(&self, id: &DeviceId) -> Option<DeviceState> {
        self.tx.borrow().get(id).copied()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateMap> {
        self.tx.subscribe()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerName;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn state_changes_are_broadcast() {
        let registry = DeviceRegistry::new();
        let id = DeviceId::for_container(&ContainerName::from("ivi"));
        let mut rx = registry.subscribe();

        registry.set_state(&id, DeviceState::Disconnected);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().get(&id),
            Some(&DeviceState::Disconnected)
        );

        registry.set_state(&id, DeviceState::ReadyToUse);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().get(&id),
            Some(&DeviceState::ReadyToUse)
        );

        registry.remove(&id);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().get(&id), None);
        assert_eq!(registry.state(&id), None);
    }

    #[test]
    fn concurrent_writers_never_lose_updates() {
        use std::sync::{Arc, Barrier};

        for _ in 0..1000 {
            let registry = DeviceRegistry::new();
            let rx = registry.subscribe();
            let barrier = Arc::new(Barrier::new(4));

            let writers: Vec<_> = (0..4)
                .map(|n| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let name = ContainerName::from(format!("c{n}"));
                        let id = DeviceId::for_container(&name);
                        barrier.wait();
                        registry.set_state(&id, DeviceState::ReadyToUse);
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            // the channel's final value must contain every write
            let snapshot = rx.borrow();
            for n in 0..4 {
                let id = DeviceId::for_container(&ContainerName::from(format!("c{n}")));
                assert_eq!(snapshot.get(&id).copied(), Some(DeviceState::ReadyToUse));
            }
        }
    }
}
