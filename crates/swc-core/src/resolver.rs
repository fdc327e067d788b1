//! Resolution of named firmware references into live device handles.

use swc_fwdesc::FirmwareStore;
use thiserror::Error;
use tracing::debug;

use crate::device::{DeviceDirectory, DeviceHandle, HandleLookup};

/// A named link a peripheral expects in its firmware node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReference {
    pub name: String,
    /// Absence is fatal when set, otherwise the dependency is simply skipped.
    pub required: bool,
}

impl DependencyReference {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Why a dependency could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The target node is described but its device has not registered yet.
    /// Retry construction of the whole peripheral later.
    #[error("{owner}: dependency '{reference}' is not ready yet")]
    NotYetReady { owner: String, reference: String },
    /// A required dependency is absent or invalid.
    #[error("{owner}: required dependency '{reference}' is missing")]
    MissingRequired { owner: String, reference: String },
    /// The reference carries more than the single offset argument.
    #[error("{owner}: too many arguments ({count}) to '{reference}'")]
    TooManyArguments {
        owner: String,
        reference: String,
        count: usize,
    },
}

impl ResolutionError {
    /// `true` for failures a later retry may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolutionError::NotYetReady { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ResolutionError::NotYetReady { .. } => FailureKind::NotYetReady,
            ResolutionError::MissingRequired { .. } => FailureKind::MissingRequired,
            ResolutionError::TooManyArguments { .. } => FailureKind::TooManyArguments,
        }
    }
}

/// Discriminant of [`ResolutionError`], convenient for outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotYetReady,
    MissingRequired,
    TooManyArguments,
}

/// A dependency bound to a live device plus the register field selector.
///
/// Holds one reference on the device, returned by [`ResolvedDependency::release`].
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub handle: DeviceHandle,
    pub offset: u64,
}

impl ResolvedDependency {
    pub(crate) fn release(&self) {
        self.handle.release();
    }
}

/// Resolves dependency references against a firmware store and a device directory.
#[derive(Clone, Copy)]
pub struct TopologyResolver<'a> {
    firmware: &'a dyn FirmwareStore,
    devices: &'a dyn DeviceDirectory,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(firmware: &'a dyn FirmwareStore, devices: &'a dyn DeviceDirectory) -> Self {
        Self { firmware, devices }
    }

    /// Resolve `reference` on `owner`.
    ///
    /// On success with `Some`, one reference on the returned handle has been
    /// acquired for the caller.
    pub fn resolve(
        &self,
        owner: &str,
        reference: &DependencyReference,
    ) -> Result<Option<ResolvedDependency>, ResolutionError> {
        let Some(found) = self.firmware.lookup_reference(owner, &reference.name) else {
            debug!(owner, reference = %reference.name, "reference not described");
            return absent(owner, reference);
        };
        if found.args.len() > 1 {
            return Err(ResolutionError::TooManyArguments {
                owner: owner.to_string(),
                reference: reference.name.clone(),
                count: found.args.len(),
            });
        }
        let offset = found.args.first().copied().unwrap_or(0);

        match self.devices.resolve_handle(&found.node) {
            HandleLookup::Live(handle) => {
                debug!(
                    owner,
                    reference = %reference.name,
                    device = %handle.name(),
                    offset,
                    "dependency resolved"
                );
                Ok(Some(ResolvedDependency {
                    handle: handle.acquire(),
                    offset,
                }))
            }
            HandleLookup::NotRegistered => {
                debug!(
                    owner,
                    reference = %reference.name,
                    device = %found.node,
                    "dependency not registered yet"
                );
                Err(ResolutionError::NotYetReady {
                    owner: owner.to_string(),
                    reference: reference.name.clone(),
                })
            }
            HandleLookup::Invalid => {
                debug!(
                    owner,
                    reference = %reference.name,
                    device = %found.node,
                    "dependency node invalid"
                );
                absent(owner, reference)
            }
        }
    }
}

fn absent(
    owner: &str,
    reference: &DependencyReference,
) -> Result<Option<ResolvedDependency>, ResolutionError> {
    if reference.required {
        Err(ResolutionError::MissingRequired {
            owner: owner.to_string(),
            reference: reference.name.clone(),
        })
    } else {
        Ok(None)
    }
}
