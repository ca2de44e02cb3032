//! Change notifications.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// One successful configuration change to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MeshChange {
    MeshRenamed { name: String },
    NetworkKeyAdded { index: u16 },
    NetworkKeyUpdated { index: u16 },
    NetworkKeyRemoved { index: u16 },
    AppKeyAdded { index: u16 },
    AppKeyUpdated { index: u16 },
    AppKeyRemoved { index: u16 },
    ProvisionerAdded { uuid: Uuid },
    ProvisionerUpdated { uuid: Uuid },
    ProvisionerRemoved { uuid: Uuid },
    ProvisionerSelected { uuid: Uuid },
    NodeAdded { uuid: Uuid, address: u16 },
    NodeUpdated { uuid: Uuid },
    /// A node was excluded and removed, along with its provisioner if it had one.
    NodeDeleted {
        uuid: Uuid,
        address: u16,
        provisioner_removed: bool,
    },
    IvIndexUpdated {
        index: u32,
        update_active: bool,
        sequence_reset: bool,
        exclusions_purged: usize,
    },
}

pub trait MeshObserver: Send + Sync {
    fn on_change(&self, change: &MeshChange);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MeshObserver for NoopObserver {
    fn on_change(&self, _change: &MeshChange) {}
}

/// Logs every change at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl MeshObserver for TracingObserver {
    fn on_change(&self, change: &MeshChange) {
        match change {
            MeshChange::IvIndexUpdated {
                index,
                update_active,
                sequence_reset,
                exclusions_purged,
            } => info!(
                index,
                update_active,
                sequence_reset,
                exclusions_purged,
                "iv index updated"
            ),
            MeshChange::NodeDeleted {
                uuid,
                address,
                provisioner_removed,
            } => info!(
                %uuid,
                address = format_args!("0x{address:04X}"),
                provisioner_removed,
                "node deleted"
            ),
            other => info!(change = ?other, "mesh changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_serializes_with_event_tag() {
        let change = MeshChange::NodeDeleted {
            uuid: Uuid::nil(),
            address: 0x0010,
            provisioner_removed: true,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["event"], "node_deleted");
        assert_eq!(json["address"], 16);

        // Logging observers must accept every variant.
        TracingObserver.on_change(&change);
        NoopObserver.on_change(&MeshChange::NetworkKeyAdded { index: 0 });
    }
}
