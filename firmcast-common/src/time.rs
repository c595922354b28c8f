//! Broadcast time reference
//!
//! The carousel signals its reference time as seconds since the GPS epoch
//! (1980-01-06T00:00:00Z) plus a leap-second offset. Schedule arithmetic
//! stays in GPS seconds; the offset only matters when rendering UTC.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Instant;

/// Seconds between the Unix epoch and the GPS epoch
const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

/// Clock seeded from the carousel's time descriptor.
///
/// Unset until the first server-initiate message carrying a time descriptor
/// has been parsed; every schedule computation before that yields zero.
#[derive(Debug, Clone, Default)]
pub struct BroadcastClock {
    reference: Option<(u32, Instant)>,
    leap_offset: u8,
}

impl BroadcastClock {
    pub fn new() -> Self {
        BroadcastClock::default()
    }

    /// Seed (or re-seed) the clock from a received time descriptor.
    pub fn set(&mut self, gps_seconds: u32, leap_offset: u8) {
        self.reference = Some((gps_seconds, Instant::now()));
        self.leap_offset = leap_offset;
    }

    pub fn is_set(&self) -> bool {
        self.reference.is_some()
    }

    /// Current broadcast time in GPS seconds, advanced by local elapsed time.
    /// Zero when the clock has never been seeded.
    pub fn now_gps(&self) -> u32 {
        match self.reference {
            Some((seconds, at)) => seconds.saturating_add(at.elapsed().as_secs() as u32),
            None => 0,
        }
    }

    /// Milliseconds until an event at `event_gps` seconds.
    ///
    /// Returns 0 when the clock is unset or the event is already past.
    pub fn millis_to_event(&self, event_gps: u32) -> u64 {
        if !self.is_set() {
            return 0;
        }
        let now = self.now_gps();
        if event_gps <= now {
            return 0;
        }
        u64::from(event_gps - now) * 1_000
    }

    /// Render a GPS timestamp as UTC for log output.
    pub fn to_utc(&self, gps_seconds: u32) -> DateTime<Utc> {
        let unix = GPS_EPOCH_UNIX_SECONDS + i64::from(gps_seconds) - i64::from(self.leap_offset);
        Utc.timestamp_opt(unix, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
    }
}
