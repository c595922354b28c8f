//! Diagnostic counters and sub-state
//!
//! Persisted alongside the best-candidate record and dumped as JSON on
//! request. Counters only ever increase within a run; the sub-state shows
//! what the worker is blocked on right now.

use serde::{Deserialize, Serialize};

/// What the scan/download worker is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubState {
    #[default]
    Idle,
    ScanningServiceTables,
    AwaitingServerInitiate,
    AwaitingModuleInfo,
    ReceivingBlocks,
    StoringImage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagStats {
    pub scan_good: u32,
    pub scan_bad: u32,
    pub scan_aborted: u32,
    pub download_complete: u32,
    pub download_partial: u32,
    pub download_aborted: u32,
    pub download_bad: u32,
    pub frequencies_scanned: u32,
    pub blocks_needed: u32,
    pub blocks_received: u32,
    pub blocks_duplicate: u32,
    pub last_tuned_frequency: Option<u32>,
    pub last_compatible_frequency: Option<u32>,
    pub last_compatible_pid: Option<u16>,
    pub last_error: Option<String>,
    pub sub_state: SubState,
}

impl DiagStats {
    pub fn set_sub_state(&mut self, sub_state: SubState) {
        self.sub_state = sub_state;
    }

    pub fn record_error(&mut self, error: impl std::fmt::Display) {
        self.last_error = Some(error.to_string());
    }
}
