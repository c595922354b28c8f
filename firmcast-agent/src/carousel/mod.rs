//! Carousel signaling engine
//!
//! One carousel scan runs three bounded phases against an already-tuned
//! transport: wait for a server-initiate message and collect group
//! candidates, wait for module-info messages covering every group and
//! collect download candidates, then re-read the server-initiate for a
//! fresh time reference before picking the best candidate.

pub mod candidates;
pub mod dii;
pub mod dsi;
pub mod select;

use crate::carousel::candidates::DownloadCandidate;
use crate::carousel::dii::{parse_dii, DiiStatus};
use crate::carousel::dsi::{parse_dsi, DsiStatus};
use crate::diag::SubState;
use crate::error::{DiiReject, ParseError, ScanError, ScanPhase};
use crate::proto;
use crate::section::{FilterSpec, SectionFetch, SectionSource, WaitBudget};
use crate::session::ScanSession;
use firmcast_common::EventCategory;
use tracing::{debug, info, warn};

/// Result of one full carousel scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarouselOutcome {
    /// A compatible download was selected and stored as the session best
    Selected(DownloadCandidate),
    /// The carousel was healthy but offered nothing for this device; the
    /// reason, when one was recorded, says why the last module was passed
    NoDownload(Option<DiiReject>),
}

/// Wait for a well-formed server-initiate message and collect its groups.
///
/// Malformed sections are recorded and skipped; a foreign registration
/// signature ends the wait since every repeat of the section will carry
/// the same signature.
pub fn scan_dsi<S: SectionSource>(
    source: &mut S,
    session: &mut ScanSession,
    carousel_pid: u16,
    frequency: u32,
) -> Result<DsiStatus, ScanError> {
    session.diag.set_sub_state(SubState::AwaitingServerInitiate);
    source.open(&FilterSpec::any_extension(carousel_pid, proto::TID_UNM))?;
    let mut budget = WaitBudget::new(session.params.wait_dsi_ms);

    let result = loop {
        match source.fetch(&mut budget) {
            SectionFetch::Abort => break Err(ScanError::Aborted),
            SectionFetch::Timeout => break Err(ScanError::Timeout(ScanPhase::ServerInitiate)),
            SectionFetch::Section(section) => {
                match parse_dsi(&section, carousel_pid, frequency, session) {
                    Ok(DsiStatus::NotServerInitiate) => continue,
                    Ok(status) => break Ok(status),
                    Err(ScanError::Parse(ParseError::Registration)) => {
                        break Err(ParseError::Registration.into());
                    }
                    Err(ScanError::Parse(p)) => {
                        warn!(%p, "malformed server-initiate section skipped");
                        session
                            .events
                            .record(EventCategory::Parse, p.code(), p.to_string());
                        session.diag.record_error(&p);
                    }
                    Err(e) => break Err(e),
                }
            }
        }
    };
    source.close();
    result
}

/// Wait for module-info messages until every group candidate has been
/// covered or the wait elapses. A timeout is tolerated once at least one
/// download candidate exists.
pub fn scan_dii<S: SectionSource>(
    source: &mut S,
    session: &mut ScanSession,
    carousel_pid: u16,
) -> Result<(), ScanError> {
    session.diag.set_sub_state(SubState::AwaitingModuleInfo);
    source.open(&FilterSpec::any_extension(carousel_pid, proto::TID_UNM))?;
    let mut budget = WaitBudget::new(session.params.wait_dii_ms);
    let mut candidate_added = false;

    let result = loop {
        let unseen = session.groups.iter().filter(|g| g.seen_count == 0).count();
        if unseen == 0 {
            break Ok(());
        }
        match source.fetch(&mut budget) {
            SectionFetch::Abort => break Err(ScanError::Aborted),
            SectionFetch::Timeout => {
                if candidate_added {
                    debug!(unseen, "module-info wait elapsed with candidates in hand");
                    break Ok(());
                }
                break Err(ScanError::Timeout(ScanPhase::ModuleInfo));
            }
            SectionFetch::Section(section) => match parse_dii(&section, session) {
                Ok(DiiStatus::CandidateAdded) => candidate_added = true,
                Ok(DiiStatus::NoCandidate)
                | Ok(DiiStatus::NotModuleInfo)
                | Ok(DiiStatus::Unmatched) => {}
                Err(ScanError::Parse(p)) => {
                    warn!(%p, "malformed module-info section skipped");
                    session
                        .events
                        .record(EventCategory::Parse, p.code(), p.to_string());
                    session.diag.record_error(&p);
                }
                Err(e) => break Err(e),
            },
        }
    };
    source.close();
    result
}

/// Scan one carousel end to end and select the best download across it
/// and any incumbent best from earlier carousels.
pub fn carousel_scan<S: SectionSource>(
    source: &mut S,
    session: &mut ScanSession,
    carousel_pid: u16,
    frequency: u32,
) -> Result<CarouselOutcome, ScanError> {
    session.clear_carousel_state();

    match scan_dsi(source, session, carousel_pid, frequency)? {
        DsiStatus::NoGroups => {
            debug!(carousel_pid, "server announced no groups");
            return Ok(CarouselOutcome::NoDownload(None));
        }
        DsiStatus::GroupsFound(count) => {
            debug!(carousel_pid, count, "group candidates collected");
        }
        // scan_dsi only returns once a real server-initiate arrived
        DsiStatus::NotServerInitiate => {}
    }

    scan_dii(source, session, carousel_pid)?;

    // Re-read the server-initiate for a fresh time reference so the
    // selected candidate's start distance is computed against now, not
    // against the start of the module-info wait. Factory lines run a
    // stripped carousel and skip the refresh.
    if !session.factory_descriptor_seen {
        scan_dsi(source, session, carousel_pid, frequency)?;
    }

    match select::find_best(session) {
        Some(best) => {
            info!(
                frequency,
                carousel_pid,
                module_id = best.module_id,
                ms_to_start = best.milliseconds_to_start,
                "carousel scan selected a download"
            );
            Ok(CarouselOutcome::Selected(best))
        }
        None => Ok(CarouselOutcome::NoDownload(session.last_dii_reject.clone())),
    }
}
