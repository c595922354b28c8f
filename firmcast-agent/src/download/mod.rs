//! Module download engine
//!
//! One download event handles one module: retune, refresh the carousel
//! signaling for a fresh start time, receive and assemble the blocks,
//! then route the module by its signature header. The first module of
//! every update is the component directory, which assembles the tracked
//! component schedule everything after it resolves against.

pub mod ddb;
pub mod sighdr;

use crate::carousel::{carousel_scan, CarouselOutcome};
use crate::diag::SubState;
use crate::download::ddb::scan_blocks;
use crate::download::sighdr::parse_signature_header;
use crate::error::{DownloadError, ScanError};
use crate::manifest::{assemble_update, ComponentDescriptor, TrackedComponent};
use crate::section::{SectionSource, Tuner};
use crate::session::ScanSession;
use firmcast_common::EventCategory;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Component name reserved for the update's directory module.
pub const DIRECTORY_COMPONENT: &str = "directory";

/// The directory module payload: the update's identity and claims plus
/// one descriptor per component it delivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDirectory {
    pub update: crate::compat::UpdateDescriptor,
    pub components: Vec<ComponentDescriptor>,
}

/// What one download event accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every tracked component has all of its modules handled
    Complete,
    /// This module handled; more remain
    MoreModules,
    /// The directory module was processed and the schedule assembled
    DirectoryLoaded,
    /// Component incompatible; installed data carried forward instead
    SkippedIncompatible,
    /// Component compatible but not approved for install
    SkippedUnapproved,
    /// Start is beyond the hold-tuner threshold; release the tuner and
    /// come back this many milliseconds from now
    Future { milliseconds_to_start: u64 },
}

/// Where assembled modules go. Install and persistence mechanics belong
/// to the platform; the engine only decides what to hand over.
pub trait ModuleSink {
    /// Decrypt an assembled module in place before header validation.
    fn decrypt(&mut self, _module: &mut [u8]) -> Result<(), DownloadError> {
        Ok(())
    }

    /// Persist the raw module bytes (header included).
    fn store(&mut self, component: &str, module_index: u16, module: &[u8])
        -> Result<(), DownloadError>;

    /// Hand a module payload over for installation.
    fn install(
        &mut self,
        component: &str,
        module_index: u16,
        payload: &[u8],
    ) -> Result<(), DownloadError>;

    /// Carry the installed copy of a component forward unchanged.
    fn copy_forward(&mut self, component: &str) -> Result<(), DownloadError>;
}

/// Run one download event against the session's selected candidate.
pub fn download_event<S, T, K>(
    source: &mut S,
    tuner: &mut T,
    session: &mut ScanSession,
    sink: &mut K,
) -> Result<DownloadOutcome, DownloadError>
where
    S: SectionSource,
    T: Tuner,
    K: ModuleSink,
{
    session.in_download_window = true;
    let result = run_download(source, tuner, session, sink);
    session.in_download_window = false;
    session.diag.set_sub_state(SubState::Idle);
    result
}

fn run_download<S, T, K>(
    source: &mut S,
    tuner: &mut T,
    session: &mut ScanSession,
    sink: &mut K,
) -> Result<DownloadOutcome, DownloadError>
where
    S: SectionSource,
    T: Tuner,
    K: ModuleSink,
{
    let incumbent = match session.best.clone() {
        Some(c) => c,
        None => return Err(ScanError::NoDownloadService.into()),
    };
    tuner.tune(incumbent.frequency).map_err(DownloadError::Scan)?;

    // Refresh the signaling so the start distance reflects now, and so a
    // schedule moved out from under us is noticed before the block wait.
    let candidate =
        match carousel_scan(source, session, incumbent.carousel_pid, incumbent.frequency)? {
            CarouselOutcome::Selected(best) => best,
            CarouselOutcome::NoDownload(reason) => {
                warn!(?reason, "selected download no longer announced");
                return Err(ScanError::NoDownloadService.into());
            }
        };

    if candidate.milliseconds_to_start > session.params.hold_tuner_ms {
        debug!(
            ms_to_start = candidate.milliseconds_to_start,
            "download too far out to hold the tuner"
        );
        return Ok(DownloadOutcome::Future {
            milliseconds_to_start: candidate.milliseconds_to_start,
        });
    }

    let mut module = scan_blocks(source, session, &candidate)?;
    sink.decrypt(&mut module)?;
    handle_module(session, sink, &candidate, &module)
}

/// Route one assembled, decrypted module by its signature header.
fn handle_module<K: ModuleSink>(
    session: &mut ScanSession,
    sink: &mut K,
    candidate: &crate::carousel::candidates::DownloadCandidate,
    module: &[u8],
) -> Result<DownloadOutcome, DownloadError> {
    let header = parse_signature_header(module)?;

    if header.component_name == DIRECTORY_COMPONENT {
        let directory: ComponentDirectory = serde_json::from_slice(header.payload(module))
            .map_err(|e| DownloadError::Directory(e.to_string()))?;
        let schedule = assemble_update(
            &session.device,
            &session.manifest,
            &directory.update,
            &directory.components,
            candidate.module_version,
        )?;
        if let Some(reason) = &schedule.update_rejection {
            warn!(%reason, "update rejected; components will be carried forward");
            session
                .events
                .record(EventCategory::Compat, reason.code(), reason.to_string());
        }
        info!(
            components = schedule.components.len(),
            commands = schedule.commands_present,
            "component directory loaded"
        );
        session.tracker().start(directory.update.module_version);
        session.schedule = schedule.components;
        return Ok(DownloadOutcome::DirectoryLoaded);
    }

    let position = match session
        .schedule
        .iter()
        .position(|t| t.descriptor.name == header.component_name)
    {
        Some(p) => p,
        None if session.manifest.allow_additions => {
            // A component the directory never named: track it with the
            // claims from its own header.
            let index = session.schedule.len() as u16;
            session.schedule.push(TrackedComponent {
                descriptor: ComponentDescriptor {
                    name: header.component_name.clone(),
                    module_count: header.module_count,
                    module_version: header.module_version,
                    hardware_ranges: Vec::new(),
                    software_ranges: Vec::new(),
                    dependencies: Vec::new(),
                },
                index,
                compatible: true,
                approved_for_storage: session.manifest.store_incoming,
                approved_for_install: true,
                copied: false,
                is_new: true,
            });
            session.schedule.len() - 1
        }
        None => return Err(DownloadError::UnknownComponent(header.component_name)),
    };

    let component = session.schedule[position].clone();

    if !component.compatible {
        if !component.copied {
            sink.copy_forward(&header.component_name)?;
            session.schedule[position].copied = true;
        }
        session.tracker().record(component.index, candidate.module_id)?;
        debug!(
            component = %header.component_name,
            "incompatible component carried forward"
        );
        return Ok(DownloadOutcome::SkippedIncompatible);
    }

    if component.approved_for_storage {
        sink.store(&header.component_name, header.module_index, module)?;
    }

    if !component.approved_for_install {
        session.tracker().record(component.index, candidate.module_id)?;
        debug!(component = %header.component_name, "component not approved for install");
        return Ok(DownloadOutcome::SkippedUnapproved);
    }

    session.diag.set_sub_state(SubState::StoringImage);
    sink.install(
        &header.component_name,
        header.module_index,
        header.payload(module),
    )?;
    session.tracker().record(component.index, candidate.module_id)?;
    info!(
        component = %header.component_name,
        module_index = header.module_index,
        module_id = candidate.module_id,
        "module installed"
    );

    let all_done = !session.schedule.is_empty()
        && session.schedule.iter().all(|t| {
            session.tracker().count(t.index) >= t.descriptor.module_count as usize
        });
    if all_done {
        Ok(DownloadOutcome::Complete)
    } else {
        Ok(DownloadOutcome::MoreModules)
    }
}

#[cfg(test)]
mod tests {
    use super::sighdr::testsupport::build_module;
    use super::*;
    use crate::carousel::candidates::DownloadCandidate;
    use crate::carousel::dii::testsupport::{build_dii, DiiModule};
    use crate::carousel::dsi::testsupport::{build_dsi, DsiGroup};
    use crate::compat::{Range, UpdateDescriptor};
    use crate::download::ddb::testsupport::build_ddb;
    use crate::manifest::{ComponentManifest, ManifestComponent};
    use crate::section::fake::{ScriptedSource, ScriptedTuner};
    use crate::section::AbortFlag;
    use firmcast_common::AgentConfig;

    const PID: u16 = 0x0100;
    const FREQ: u32 = 195_000_000;
    const NOW: u32 = 1_000_000;

    #[derive(Default)]
    struct RecordingSink {
        stored: Vec<(String, u16)>,
        installed: Vec<(String, u16, Vec<u8>)>,
        copied: Vec<String>,
    }

    impl ModuleSink for RecordingSink {
        fn store(&mut self, component: &str, index: u16, _m: &[u8]) -> Result<(), DownloadError> {
            self.stored.push((component.into(), index));
            Ok(())
        }
        fn install(
            &mut self,
            component: &str,
            index: u16,
            payload: &[u8],
        ) -> Result<(), DownloadError> {
            self.installed.push((component.into(), index, payload.to_vec()));
            Ok(())
        }
        fn copy_forward(&mut self, component: &str) -> Result<(), DownloadError> {
            self.copied.push(component.into());
            Ok(())
        }
    }

    fn manifest() -> ComponentManifest {
        ComponentManifest {
            module_version: 2,
            components: vec![ManifestComponent {
                name: "boot".into(),
                software_version: 1,
                module_version: 2,
            }],
            allow_additions: false,
            store_incoming: false,
        }
    }

    fn session() -> ScanSession {
        let mut s = ScanSession::new(AgentConfig::default(), manifest());
        s.clock.set(NOW, 15);
        s
    }

    fn directory_payload() -> Vec<u8> {
        let directory = ComponentDirectory {
            update: UpdateDescriptor {
                organization_id: 0x001234,
                model_group: 1,
                attributes: 0,
                module_version: 3,
                hardware_ranges: vec![Range { begin: 0, end: 10 }],
                software_ranges: vec![Range { begin: 0, end: 10 }],
                dependencies: vec![],
            },
            components: vec![ComponentDescriptor {
                name: "boot".into(),
                module_count: 1,
                module_version: 3,
                hardware_ranges: vec![],
                software_ranges: vec![],
                dependencies: vec![],
            }],
        };
        serde_json::to_vec(&directory).unwrap()
    }

    fn candidate_for(module_id: u16, module_size: u32) -> DownloadCandidate {
        DownloadCandidate {
            frequency: FREQ,
            carousel_pid: PID,
            transaction_id: 2,
            organization_id: 0x001234,
            model_group: 1,
            module_id,
            module_priority: 0,
            module_size,
            module_version: 3,
            module_block_size: 256,
            module_name: "update".into(),
            number_of_modules: 2,
            broadcast_seconds: 60,
            scheduled_time: NOW + 50,
            milliseconds_to_start: 50_000,
            hardware_model_begin: 0,
            hardware_model_end: 10,
            software_version_begin: 0,
            software_version_end: 10,
        }
    }

    fn feed_module_blocks(source: &mut ScriptedSource, module_id: u16, module: &[u8]) {
        for (number, chunk) in module.chunks(256).enumerate() {
            source.feed(PID, build_ddb(module_id, number as u16, chunk));
        }
    }

    fn feed_carousel(source: &mut ScriptedSource, module_id: u16, module_size: u32, slot: u32) {
        let group = DsiGroup {
            group_id: 2,
            organization_id: 0x001234,
            model_group: 1,
        };
        source.feed(PID, build_dsi(std::slice::from_ref(&group), NOW));
        source.feed(
            PID,
            build_dii(
                2,
                256,
                &[DiiModule {
                    module_id,
                    module_size,
                    module_version: 3,
                    name: "update",
                    priority: 0,
                    slots: vec![(slot, 60)],
                    compat: vec![(0, 10, 0, 10)],
                }],
            ),
        );
        source.feed(PID, build_dsi(std::slice::from_ref(&group), NOW));
    }

    #[test]
    fn test_directory_then_component_completes_the_update() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        let mut tuner = ScriptedTuner::default();
        let mut source = ScriptedSource::new(AbortFlag::new());

        // event 1: the directory module
        let directory_module = build_module(DIRECTORY_COMPONENT, 3, 0, 2, &directory_payload());
        feed_carousel(&mut source, 7, directory_module.len() as u32, NOW + 50);
        feed_module_blocks(&mut source, 7, &directory_module);
        s.best = Some(candidate_for(7, directory_module.len() as u32));

        let outcome = download_event(&mut source, &mut tuner, &mut s, &mut sink).unwrap();
        assert_eq!(outcome, DownloadOutcome::DirectoryLoaded);
        assert_eq!(s.schedule.len(), 1);
        assert_eq!(tuner.tunes, vec![FREQ]);

        // event 2: the boot component, scheduled sooner than the stale
        // incumbent so the refresh selects it
        let boot_module = build_module("boot", 3, 1, 2, b"boot image");
        feed_carousel(&mut source, 8, boot_module.len() as u32, NOW + 40);
        feed_module_blocks(&mut source, 8, &boot_module);

        let outcome = download_event(&mut source, &mut tuner, &mut s, &mut sink).unwrap();
        assert_eq!(outcome, DownloadOutcome::Complete);
        assert_eq!(sink.installed.len(), 1);
        assert_eq!(sink.installed[0].0, "boot");
        assert_eq!(sink.installed[0].2, b"boot image");
        assert!(sink.stored.is_empty());
    }

    #[test]
    fn test_future_start_releases_the_tuner() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        let mut tuner = ScriptedTuner::default();
        let mut source = ScriptedSource::new(AbortFlag::new());

        // scheduled two hours out, past the 30 minute hold threshold
        feed_carousel(&mut source, 7, 1_024, NOW + 7_200);
        s.best = Some(candidate_for(7, 1_024));

        let outcome = download_event(&mut source, &mut tuner, &mut s, &mut sink).unwrap();
        match outcome {
            DownloadOutcome::Future {
                milliseconds_to_start,
            } => {
                assert!(milliseconds_to_start > 7_000_000);
            }
            other => panic!("expected a future outcome, got {:?}", other),
        }
        assert!(sink.installed.is_empty());
    }

    #[test]
    fn test_incompatible_component_copied_forward_once() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        s.schedule = vec![TrackedComponent {
            descriptor: ComponentDescriptor {
                name: "boot".into(),
                module_count: 2,
                module_version: 3,
                hardware_ranges: vec![],
                software_ranges: vec![],
                dependencies: vec![],
            },
            index: 0,
            compatible: false,
            approved_for_storage: false,
            approved_for_install: false,
            copied: false,
            is_new: false,
        }];
        s.tracker().start(3);

        let module = build_module("boot", 3, 0, 2, b"first");
        let outcome = handle_module(&mut s, &mut sink, &candidate_for(8, 0), &module).unwrap();
        assert_eq!(outcome, DownloadOutcome::SkippedIncompatible);

        let module = build_module("boot", 3, 1, 2, b"second");
        let outcome = handle_module(&mut s, &mut sink, &candidate_for(9, 0), &module).unwrap();
        assert_eq!(outcome, DownloadOutcome::SkippedIncompatible);

        // copied forward exactly once, both module ids recorded
        assert_eq!(sink.copied, vec!["boot".to_string()]);
        assert_eq!(s.tracker().count(0), 2);
    }

    #[test]
    fn test_unknown_component_rejected_without_additions() {
        let mut s = session();
        let mut sink = RecordingSink::default();
        s.schedule = vec![];

        let module = build_module("ghost", 3, 0, 1, b"x");
        let err = handle_module(&mut s, &mut sink, &candidate_for(8, 0), &module).unwrap_err();
        assert_eq!(err, DownloadError::UnknownComponent("ghost".into()));
    }

    #[test]
    fn test_unknown_component_tracked_with_additions() {
        let mut s = session();
        s.manifest.allow_additions = true;
        let mut sink = RecordingSink::default();
        s.tracker().start(3);

        let module = build_module("extra", 3, 0, 1, b"extra image");
        let outcome = handle_module(&mut s, &mut sink, &candidate_for(8, 0), &module).unwrap();
        assert_eq!(outcome, DownloadOutcome::Complete);
        assert_eq!(sink.installed.len(), 1);
        assert!(s.schedule[0].is_new);
    }

    #[test]
    fn test_storage_approval_stores_raw_module() {
        let mut s = session();
        s.manifest.store_incoming = true;
        let mut sink = RecordingSink::default();
        s.schedule = vec![TrackedComponent {
            descriptor: ComponentDescriptor {
                name: "boot".into(),
                module_count: 1,
                module_version: 3,
                hardware_ranges: vec![],
                software_ranges: vec![],
                dependencies: vec![],
            },
            index: 0,
            compatible: true,
            approved_for_storage: true,
            approved_for_install: false,
            copied: false,
            is_new: false,
        }];
        s.tracker().start(3);

        let module = build_module("boot", 3, 0, 1, b"image");
        let outcome = handle_module(&mut s, &mut sink, &candidate_for(8, 0), &module).unwrap();
        assert_eq!(outcome, DownloadOutcome::SkippedUnapproved);
        assert_eq!(sink.stored.len(), 1);
        assert!(sink.installed.is_empty());
    }
}
