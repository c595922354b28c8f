//! Best-candidate selection
//!
//! Runs after the module-info wait so every candidate in the table has a
//! schedule slot and a passed compatibility check. The incumbent best from
//! an earlier carousel stays in contention, which is what lets a multi
//! frequency scan pick the soonest download across transports.

use crate::carousel::candidates::DownloadCandidate;
use crate::session::ScanSession;
use tracing::debug;

/// Choose the download to pursue and store it as the session best.
///
/// A favorite whose start time has already passed concedes to the first
/// table candidate. When an attribute filter is configured, whether a
/// candidate is selectable depends only on its own priority byte, so the
/// result is the same whatever order the table was filled in: selectable
/// candidates outrank unselectable ones, and within each tier the earliest
/// scheduled start wins.
pub fn find_best(session: &mut ScanSession) -> Option<DownloadCandidate> {
    let selectable = |c: &DownloadCandidate| match session.params.attribute_filter {
        Some(filter) => filter.selects(c.module_priority),
        None => true,
    };

    let mut favorite = session.best.clone();
    if let Some(f) = favorite.as_mut() {
        f.milliseconds_to_start = session.clock.millis_to_event(f.scheduled_time);
    }
    let mut from_table = false;

    for candidate in session.downloads.iter() {
        let mut challenger = candidate.clone();
        challenger.milliseconds_to_start =
            session.clock.millis_to_event(challenger.scheduled_time);

        let current = match favorite.as_ref() {
            None => {
                favorite = Some(challenger);
                from_table = true;
                continue;
            }
            Some(f) => f,
        };
        if current.milliseconds_to_start == 0 {
            favorite = Some(challenger);
            from_table = true;
            continue;
        }

        let wins = match (selectable(&challenger), selectable(current)) {
            (true, false) => true,
            (false, true) => false,
            _ => current.scheduled_time > challenger.scheduled_time,
        };
        if wins {
            favorite = Some(challenger);
            from_table = true;
        }
    }

    if let (true, Some(best)) = (from_table, favorite.as_ref()) {
        session.diag.last_compatible_frequency = Some(best.frequency);
        session.diag.last_compatible_pid = Some(best.carousel_pid);
        debug!(
            frequency = best.frequency,
            module_id = best.module_id,
            ms_to_start = best.milliseconds_to_start,
            starts_at = %session.clock.to_utc(best.scheduled_time),
            "selected download candidate"
        );
    }

    session.best = favorite.clone();
    favorite
}
