//! Per-class device naming (`psu0`, `psu1`, ...).

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

/// A numbered device of a class, e.g. `psu1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDevice {
    pub class: String,
    pub id: u32,
}

impl ClassDevice {
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClassDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.id)
    }
}

/// Allocates class ids, always handing out the lowest free one.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, BTreeMap<u32, String>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a class device for `owner`. An owner already holding a device
    /// of `class` gets that device back.
    pub fn register(&mut self, class: &str, owner: &str) -> ClassDevice {
        if let Some(existing) = self.find(owner).filter(|dev| dev.class == class) {
            warn!(owner, device = %existing, "class device already registered");
            return existing;
        }
        let ids = self.classes.entry(class.to_string()).or_default();
        let id = (0u32..)
            .find(|id| !ids.contains_key(id))
            .unwrap_or_default();
        ids.insert(id, owner.to_string());
        let device = ClassDevice {
            class: class.to_string(),
            id,
        };
        debug!(owner, device = %device, "class device created");
        device
    }

    /// Give the id back. Returns `false` when it was not allocated.
    pub fn release(&mut self, device: &ClassDevice) -> bool {
        let released = self
            .classes
            .get_mut(&device.class)
            .and_then(|ids| ids.remove(&device.id))
            .is_some();
        if released {
            debug!(device = %device, "class device released");
        }
        released
    }

    /// Class device created for `owner`, if any.
    pub fn find(&self, owner: &str) -> Option<ClassDevice> {
        self.classes.iter().find_map(|(class, ids)| {
            ids.iter()
                .find(|(_, holder)| holder.as_str() == owner)
                .map(|(id, _)| ClassDevice {
                    class: class.clone(),
                    id: *id,
                })
        })
    }

    /// Owner node behind a class device name such as `psu0`.
    pub fn owner_of(&self, name: &str) -> Option<&str> {
        let split = name.find(|c: char| c.is_ascii_digit())?;
        let (class, id) = name.split_at(split);
        let id: u32 = id.parse().ok()?;
        self.classes
            .get(class)
            .and_then(|ids| ids.get(&id))
            .map(String::as_str)
    }

    /// Devices of `class` in id order.
    pub fn devices(&self, class: &str) -> Vec<(ClassDevice, &str)> {
        self.classes
            .get(class)
            .map(|ids| {
                ids.iter()
                    .map(|(id, owner)| {
                        (
                            ClassDevice {
                                class: class.to_string(),
                                id: *id,
                            },
                            owner.as_str(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
