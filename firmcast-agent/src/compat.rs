//! Compatibility decision engine
//!
//! Four staged checks, pure except for the module-id tracking cache:
//! group level while parsing server-initiate signaling, module level while
//! parsing module-info signaling, update and component level against a
//! downloaded component directory. The checks never retry and never touch
//! candidate tables; callers own retry and flush policy.

use crate::error::{DownloadError, Incompatibility};
use crate::manifest::ComponentManifest;
use firmcast_common::DeviceIdentity;
use serde::{Deserialize, Serialize};

/// Inclusive version/model range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: u16,
    pub end: u16,
}

impl Range {
    pub fn contains(&self, value: u16) -> bool {
        self.begin <= value && value <= self.end
    }
}

/// A declared dependency on another component's software version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub component: String,
    pub range: Range,
}

/// Identity and compatibility claims of a downloaded update as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub organization_id: u32,
    pub model_group: u16,
    pub attributes: u16,
    pub module_version: u16,
    pub hardware_ranges: Vec<Range>,
    pub software_ranges: Vec<Range>,
    pub dependencies: Vec<Dependency>,
}

/// An accepted update is either installable content or administrative
/// commands, which callers route differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAccept {
    Update,
    Commands,
}

/// Group level: identity must match exactly.
pub fn group_check(
    device: &DeviceIdentity,
    organization_id: u32,
    model_group: u16,
) -> Result<(), Incompatibility> {
    if organization_id != device.oui {
        return Err(Incompatibility::OrganizationId);
    }
    if model_group != device.model_group {
        return Err(Incompatibility::ModelGroup);
    }
    Ok(())
}

/// Module level: one hardware-model range and one software-version range
/// from a module-info compatibility entry.
pub fn module_check(
    device: &DeviceIdentity,
    organization_id: u32,
    model_group: u16,
    hardware: Range,
    software: Range,
) -> Result<(), Incompatibility> {
    group_check(device, organization_id, model_group)?;
    if !hardware.contains(device.hardware_model) {
        return Err(Incompatibility::HardwareModel);
    }
    if !software.contains(device.software_version) {
        return Err(Incompatibility::SoftwareVersion);
    }
    Ok(())
}

/// Update level: applied to a downloaded component directory before any
/// of its components are accepted.
pub fn update_check(
    device: &DeviceIdentity,
    manifest: &ComponentManifest,
    update: &UpdateDescriptor,
) -> Result<UpdateAccept, Incompatibility> {
    group_check(device, update.organization_id, update.model_group)?;

    if !update
        .hardware_ranges
        .iter()
        .any(|r| r.contains(device.hardware_model))
    {
        return Err(Incompatibility::HardwareModel);
    }

    // Administrative command updates bypass the version gates.
    if update.attributes & crate::proto::ATTR_COMMAND != 0 {
        return Ok(UpdateAccept::Commands);
    }

    if !device.loop_test_mode && update.module_version <= manifest.module_version {
        return Err(Incompatibility::ModuleVersionCurrent);
    }

    if !update
        .software_ranges
        .iter()
        .any(|r| r.contains(device.software_version))
    {
        return Err(Incompatibility::SoftwareVersion);
    }

    check_dependencies(manifest, &update.dependencies)?;

    let field_test = update.attributes & crate::proto::ATTR_FIELD_TEST != 0;
    if field_test != device.field_test_mode {
        return Err(Incompatibility::FieldTest);
    }
    let factory_test = update.attributes & crate::proto::ATTR_FACTORY_TEST != 0;
    if factory_test != device.factory_test_mode {
        return Err(Incompatibility::FactoryTest);
    }

    Ok(UpdateAccept::Update)
}

/// Component level: applied per named component inside an accepted update.
/// An empty hardware range list means no hardware constraint.
pub fn component_check(
    device: &DeviceIdentity,
    manifest: &ComponentManifest,
    name: &str,
    hardware_ranges: &[Range],
    software_ranges: &[Range],
    dependencies: &[Dependency],
) -> Result<(), Incompatibility> {
    if !hardware_ranges.is_empty()
        && !hardware_ranges.iter().any(|r| r.contains(device.hardware_model))
    {
        return Err(Incompatibility::HardwareModel);
    }

    let entry = manifest
        .component(name)
        .ok_or_else(|| Incompatibility::UnknownComponent(name.to_string()))?;

    if !software_ranges.is_empty()
        && !software_ranges.iter().any(|r| r.contains(entry.software_version))
    {
        return Err(Incompatibility::SoftwareVersion);
    }

    check_dependencies(manifest, dependencies)
}

fn check_dependencies(
    manifest: &ComponentManifest,
    dependencies: &[Dependency],
) -> Result<(), Incompatibility> {
    for dep in dependencies {
        let entry = manifest
            .component(&dep.component)
            .ok_or_else(|| Incompatibility::DependencyMissing(dep.component.clone()))?;
        if !dep.range.contains(entry.software_version) {
            return Err(Incompatibility::Dependency(dep.component.clone()));
        }
    }
    Ok(())
}

/// Per-module-id download tracker.
///
/// Records which module ids have been written or deliberately skipped for
/// each component, keyed by the signaled module version. Starting a
/// download for a different module version wipes the records; the same
/// version retains them so a restart resumes where it left off. Also
/// caches the highest module version seen in signaling so the carousel
/// engine can flush candidates that a newer version supersedes.
#[derive(Debug, Clone)]
pub struct ModuleTracker {
    module_version: u16,
    highest_signaled_version: u8,
    entries: Vec<(u16, u16)>,
    capacity: usize,
}

impl ModuleTracker {
    pub fn new(capacity: usize) -> Self {
        ModuleTracker {
            module_version: 0,
            highest_signaled_version: 0,
            entries: Vec::new(),
            capacity,
        }
    }

    /// Begin (or resume) a download of the given module version.
    pub fn start(&mut self, module_version: u16) {
        if module_version != self.module_version {
            self.entries.clear();
            self.module_version = module_version;
        }
    }

    /// Record that a module id has been handled for a component.
    pub fn record(&mut self, component_index: u16, module_id: u16) -> Result<(), DownloadError> {
        if self.seen(component_index, module_id) {
            return Ok(());
        }
        if self.entries.len() == self.capacity {
            return Err(DownloadError::TrackerFull);
        }
        self.entries.push((component_index, module_id));
        Ok(())
    }

    pub fn seen(&self, component_index: u16, module_id: u16) -> bool {
        self.entries.contains(&(component_index, module_id))
    }

    /// Modules handled so far for one component. Re-derived from the
    /// records so completion detection survives a restart.
    pub fn count(&self, component_index: u16) -> usize {
        self.entries
            .iter()
            .filter(|(c, _)| *c == component_index)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.module_version = 0;
    }

    /// Note a module version seen in signaling. Returns true when it is
    /// strictly newer than anything seen before.
    pub fn note_signaled_version(&mut self, version: u8) -> bool {
        if version > self.highest_signaled_version {
            self.highest_signaled_version = version;
            return true;
        }
        false
    }
}
