//! Scan session context
//!
//! Everything the reference design kept in process-wide statics lives
//! here instead and is threaded through the scan and download entry
//! points: candidate tables, the best-candidate record, the broadcast
//! clock, diagnostics, and the event ring. One session per tuner; only
//! the module-id tracker is shared across sessions and therefore locked.

use crate::carousel::candidates::{
    DownloadCandidate, GroupCandidate, SlotTable, CANDIDATE_TABLE_CAPACITY,
};
use crate::compat::ModuleTracker;
use crate::diag::DiagStats;
use crate::error::DiiReject;
use crate::manifest::{ComponentManifest, TrackedComponent};
use firmcast_common::{AgentConfig, BroadcastClock, DeviceIdentity, EventRing, ScanParams};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const EVENT_RING_CAPACITY: usize = 64;
pub const MODULE_TRACKER_CAPACITY: usize = 256;

pub struct ScanSession {
    pub device: DeviceIdentity,
    pub params: ScanParams,
    pub manifest: ComponentManifest,
    pub clock: BroadcastClock,
    pub events: EventRing,
    pub diag: DiagStats,
    pub groups: SlotTable<GroupCandidate>,
    pub downloads: SlotTable<DownloadCandidate>,
    /// Chosen candidate of the most recent successful scan
    pub best: Option<DownloadCandidate>,
    /// Components resolved from signature headers during a download
    pub schedule: Vec<TrackedComponent>,
    tracker: Arc<Mutex<ModuleTracker>>,
    /// Latched when the server-initiate carries a factory-mode descriptor
    pub factory_descriptor_seen: bool,
    pub server_version: Option<String>,
    pub server_id: Option<String>,
    /// Most recent reason a module-info section produced no candidate
    pub last_dii_reject: Option<DiiReject>,
    /// Inside the download window, schedule slots starting now are fine
    pub in_download_window: bool,
}

impl ScanSession {
    pub fn new(config: AgentConfig, manifest: ComponentManifest) -> Self {
        ScanSession {
            device: config.device,
            params: config.scan,
            manifest,
            clock: BroadcastClock::new(),
            events: EventRing::new(EVENT_RING_CAPACITY),
            diag: DiagStats::default(),
            groups: SlotTable::new("group", CANDIDATE_TABLE_CAPACITY),
            downloads: SlotTable::new("download", CANDIDATE_TABLE_CAPACITY),
            best: None,
            schedule: Vec::new(),
            tracker: Arc::new(Mutex::new(ModuleTracker::new(MODULE_TRACKER_CAPACITY))),
            factory_descriptor_seen: false,
            server_version: None,
            server_id: None,
            last_dii_reject: None,
            in_download_window: false,
        }
    }

    /// Share the module-id tracker with another session.
    pub fn with_shared_tracker(mut self, tracker: Arc<Mutex<ModuleTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> MutexGuard<'_, ModuleTracker> {
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tracker_handle(&self) -> Arc<Mutex<ModuleTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Clear per-carousel results before rescanning a carousel.
    pub fn clear_carousel_state(&mut self) {
        self.groups.clear();
        self.downloads.clear();
        self.last_dii_reject = None;
    }

    /// Threshold a schedule slot must start beyond. Inside the download
    /// window the device is already awake, so immediate slots qualify.
    pub fn wake_up_early_ms(&self) -> u64 {
        if self.in_download_window {
            0
        } else {
            self.params.channel_scan_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_up_early_drops_inside_download_window() {
        let mut session = ScanSession::new(AgentConfig::default(), ComponentManifest::default());
        assert_eq!(session.wake_up_early_ms(), session.params.channel_scan_ms);
        session.in_download_window = true;
        assert_eq!(session.wake_up_early_ms(), 0);
    }

    #[test]
    fn test_clear_carousel_state_empties_tables() {
        let mut session = ScanSession::new(AgentConfig::default(), ComponentManifest::default());
        session
            .groups
            .insert(GroupCandidate {
                transaction_id: 2,
                organization_id: 0x001234,
                model_group: 1,
                carousel_pid: 0x100,
                frequency: 195_000_000,
                seen_count: 0,
            })
            .unwrap();
        session.clear_carousel_state();
        assert!(session.groups.is_empty());
        assert!(session.downloads.is_empty());
    }
}
