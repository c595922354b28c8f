//! On-device component manifest and per-update schedule assembly
//!
//! The manifest records what is currently installed: one entry per named
//! component plus the module version of the last accepted update. Schedule
//! assembly takes a downloaded component directory, runs the update and
//! component level compatibility checks, and produces the tracked
//! components the download engine resolves signature headers against.

use crate::compat::{self, Dependency, Range, UpdateAccept, UpdateDescriptor};
use crate::error::{DownloadError, Incompatibility};
use firmcast_common::DeviceIdentity;
use serde::{Deserialize, Serialize};

/// One installed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestComponent {
    pub name: String,
    pub software_version: u16,
    pub module_version: u16,
}

/// What the device currently has installed, plus acceptance policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentManifest {
    /// Module version of the last accepted update
    #[serde(default)]
    pub module_version: u16,
    #[serde(default)]
    pub components: Vec<ManifestComponent>,
    /// Accept components not yet present in the manifest
    #[serde(default)]
    pub allow_additions: bool,
    /// Persist raw module bytes before installing
    #[serde(default)]
    pub store_incoming: bool,
}

impl ComponentManifest {
    pub fn component(&self, name: &str) -> Option<&ManifestComponent> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Compatibility claims for one component inside an update directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub module_count: u16,
    pub module_version: u16,
    pub hardware_ranges: Vec<Range>,
    pub software_ranges: Vec<Range>,
    pub dependencies: Vec<Dependency>,
}

/// A component the download engine is tracking through an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedComponent {
    pub descriptor: ComponentDescriptor,
    pub index: u16,
    pub compatible: bool,
    pub approved_for_storage: bool,
    pub approved_for_install: bool,
    /// Old data was copied forward instead of installing
    pub copied: bool,
    /// Not in the manifest, accepted as a new addition
    pub is_new: bool,
}

/// Result of assembling a downloaded directory against the manifest.
#[derive(Debug, Clone)]
pub struct UpdateSchedule {
    /// Why the update as a whole was rejected, if it was. Individual
    /// components of a rejected update are all marked incompatible.
    pub update_rejection: Option<Incompatibility>,
    /// The update carries administrative commands rather than content
    pub commands_present: bool,
    pub components: Vec<TrackedComponent>,
}

/// Run the update and component level checks over a component directory.
///
/// The directory's module version must agree with the version signaled on
/// the carousel in its low byte; a mismatch means the signaling and the
/// payload describe different updates and the whole download is rejected.
pub fn assemble_update(
    device: &DeviceIdentity,
    manifest: &ComponentManifest,
    update: &UpdateDescriptor,
    components: &[ComponentDescriptor],
    signaled_module_version: u8,
) -> Result<UpdateSchedule, DownloadError> {
    if (update.module_version & 0xFF) as u8 != signaled_module_version {
        return Err(DownloadError::VersionsDisagree);
    }

    let (update_rejection, commands_present) = match compat::update_check(device, manifest, update)
    {
        Ok(UpdateAccept::Update) => (None, false),
        Ok(UpdateAccept::Commands) => (None, true),
        Err(reason) => (Some(reason), false),
    };

    let mut tracked = Vec::with_capacity(components.len());
    for (index, descriptor) in components.iter().enumerate() {
        let mut is_new = false;
        let compatible = if update_rejection.is_some() {
            false
        } else {
            match compat::component_check(
                device,
                manifest,
                &descriptor.name,
                &descriptor.hardware_ranges,
                &descriptor.software_ranges,
                &descriptor.dependencies,
            ) {
                Ok(()) => true,
                Err(Incompatibility::UnknownComponent(_)) if manifest.allow_additions => {
                    is_new = true;
                    true
                }
                Err(_) => false,
            }
        };
        tracked.push(TrackedComponent {
            descriptor: descriptor.clone(),
            index: index as u16,
            compatible,
            approved_for_storage: compatible && manifest.store_incoming,
            approved_for_install: compatible && !commands_present,
            copied: false,
            is_new,
        });
    }

    Ok(UpdateSchedule {
        update_rejection,
        commands_present,
        components: tracked,
    })
}
