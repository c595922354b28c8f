//! Scan/download state machine
//!
//! Pure transition rules: each event handler reports what happened and
//! these functions decide the next state and how long to sleep before
//! entering it. The runner owns the sleeping and the event execution.

use crate::diag::DiagStats;
use crate::download::DownloadOutcome;
use crate::error::{DownloadError, ScanError};
use firmcast_common::ScanParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Walk the frequency list looking for a download
    Scan,
    /// Pursue the selected download
    Download,
    /// Update finished; notify and settle
    DownloadDone,
    /// Shut down
    Exit,
}

/// Next state plus the delay before entering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextStep {
    pub state: AgentState,
    pub delay_ms: u64,
}

fn step(state: AgentState, delay_ms: u64) -> NextStep {
    NextStep { state, delay_ms }
}

/// After a scan event. A selection arms a download wake shortly before
/// the scheduled start; anything else retries the scan later.
pub fn after_scan(
    result: &Result<Option<u64>, ScanError>,
    params: &ScanParams,
    diag: &mut DiagStats,
) -> NextStep {
    match result {
        Ok(Some(milliseconds_to_start)) => {
            diag.scan_good += 1;
            let delay = milliseconds_to_start.saturating_sub(params.wake_up_early_ms);
            step(AgentState::Download, delay)
        }
        Ok(None) => {
            diag.scan_good += 1;
            step(AgentState::Scan, params.retry_ms)
        }
        Err(ScanError::Aborted) => {
            diag.scan_aborted += 1;
            step(AgentState::Scan, params.retry_ms)
        }
        Err(e) => {
            diag.scan_bad += 1;
            diag.record_error(e);
            step(AgentState::Scan, params.retry_ms)
        }
    }
}

/// After a download event.
///
/// A start pushed out but still near re-arms the download wake directly;
/// pushed out far, the tuner is better spent rescanning. An update with
/// modules remaining continues immediately.
pub fn after_download(
    result: &Result<DownloadOutcome, DownloadError>,
    params: &ScanParams,
    diag: &mut DiagStats,
) -> NextStep {
    match result {
        Ok(DownloadOutcome::Complete) => {
            diag.download_complete += 1;
            step(AgentState::DownloadDone, params.done_delay_ms)
        }
        Ok(DownloadOutcome::Future {
            milliseconds_to_start,
        }) => {
            if *milliseconds_to_start < params.retry_ms + params.channel_scan_ms {
                let delay = milliseconds_to_start.saturating_sub(params.wake_up_early_ms);
                step(AgentState::Download, delay)
            } else {
                step(AgentState::Scan, params.retry_ms)
            }
        }
        Ok(DownloadOutcome::DirectoryLoaded)
        | Ok(DownloadOutcome::MoreModules)
        | Ok(DownloadOutcome::SkippedIncompatible)
        | Ok(DownloadOutcome::SkippedUnapproved) => {
            diag.download_partial += 1;
            step(AgentState::Download, 0)
        }
        Err(DownloadError::Aborted) | Err(DownloadError::Scan(ScanError::Aborted)) => {
            diag.download_aborted += 1;
            step(AgentState::Scan, params.retry_ms)
        }
        Err(DownloadError::BlockTimeout { .. }) => {
            diag.download_partial += 1;
            step(AgentState::Scan, params.retry_ms)
        }
        Err(e) => {
            diag.download_bad += 1;
            diag.record_error(e);
            step(AgentState::Scan, params.retry_ms)
        }
    }
}

/// After the done notification has been delivered. A freshly updated
/// device has nothing more to fetch, so the next scan is a long way out.
pub fn after_done(params: &ScanParams) -> NextStep {
    step(AgentState::Scan, params.sleep_long_ms)
}

/// After an abort was observed between events. An abort that interrupted
/// the done notification must not lose it.
pub fn after_abort(exit_requested: bool, done_pending: bool, params: &ScanParams) -> NextStep {
    if exit_requested {
        return step(AgentState::Exit, 0);
    }
    if done_pending {
        return step(AgentState::DownloadDone, params.retry_ms);
    }
    step(AgentState::Scan, params.retry_ms)
}
