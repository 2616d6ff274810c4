//! Device registry: known controllers keyed by IP, upserted from replies.

use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::{ConnectionStatus, DeviceRecord};
use crate::wire::DiscoveryReply;

/// What applying a reply did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// First full reply from this IP.
    Inserted,
    /// Full reply for a known IP; `changed` is false when every field already matched.
    Updated { changed: bool },
    /// Short reply flipped the record to `status`.
    Toggled { status: ConnectionStatus },
    /// Short reply without the toggle signal.
    Unchanged,
}

impl RegistryChange {
    /// Whether observers of the device list need a new snapshot.
    pub fn is_visible(&self) -> bool {
        match self {
            RegistryChange::Inserted | RegistryChange::Toggled { .. } => true,
            RegistryChange::Updated { changed } => *changed,
            RegistryChange::Unchanged => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("toggle reply from {0} which has no registry entry")]
    ToggleWithoutRecord(Ipv4Addr),
}

/// Concurrency-safe store of `DeviceRecord`s in first-seen order.
/// Records are created and mutated, never removed.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Mutex<Vec<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceRecord>> {
        // Mutations are plain field writes, so a poisoned list is still valid.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a reply received from `source`.
    pub fn apply_reply(
        &self,
        reply: &DiscoveryReply,
        source: Ipv4Addr,
    ) -> Result<RegistryChange, RegistryError> {
        let mut records = self.lock();
        match *reply {
            DiscoveryReply::Full {
                link_ip,
                serial,
                status,
            } => {
                if let Some(rec) = records.iter_mut().find(|r| r.ip == source) {
                    let changed =
                        rec.link_ip != link_ip || rec.serial != serial || rec.status != status;
                    rec.link_ip = link_ip;
                    rec.serial = serial;
                    rec.status = status;
                    Ok(RegistryChange::Updated { changed })
                } else {
                    records.push(DeviceRecord {
                        ip: source,
                        link_ip,
                        serial,
                        status,
                    });
                    Ok(RegistryChange::Inserted)
                }
            }
            DiscoveryReply::Short { toggle } => {
                let rec = records
                    .iter_mut()
                    .find(|r| r.ip == source)
                    .ok_or(RegistryError::ToggleWithoutRecord(source))?;
                if !toggle {
                    return Ok(RegistryChange::Unchanged);
                }
                rec.status = rec.status.toggled();
                Ok(RegistryChange::Toggled { status: rec.status })
            }
        }
    }

    /// Copy of the current records, in first-seen order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.lock().clone()
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<DeviceRecord> {
        self.lock().iter().find(|r| r.ip == ip).cloned()
    }

    pub fn first_connected(&self) -> Option<DeviceRecord> {
        self.lock().iter().find(|r| r.status.is_connected()).cloned()
    }

    pub fn first_disconnected(&self) -> Option<DeviceRecord> {
        self.lock().iter().find(|r| !r.status.is_connected()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
