//! Section acquisition seam
//!
//! The transport demultiplexer is an external collaborator. The agent sees
//! it through [`SectionSource`]: open a filter, fetch whole sections under
//! a wait budget, close. Every fetch is a suspension point for cooperative
//! abort.

pub mod cursor;
pub mod fake;

use crate::error::ScanError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What sections a filter should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    /// Elementary stream id the sections arrive on
    pub stream_id: u16,
    pub table_id: u8,
    /// Matched against bytes 3..5 of the section when `exact_match` is set
    pub table_id_extension: u16,
    pub exact_match: bool,
}

impl FilterSpec {
    pub fn any_extension(stream_id: u16, table_id: u8) -> Self {
        FilterSpec {
            stream_id,
            table_id,
            table_id_extension: 0,
            exact_match: false,
        }
    }

    pub fn exact(stream_id: u16, table_id: u8, table_id_extension: u16) -> Self {
        FilterSpec {
            stream_id,
            table_id,
            table_id_extension,
            exact_match: true,
        }
    }

    /// Does an assembled section satisfy this filter?
    pub fn matches(&self, section: &[u8]) -> bool {
        if section.first() != Some(&self.table_id) {
            return false;
        }
        if !self.exact_match {
            return true;
        }
        if section.len() < 5 {
            return false;
        }
        let ext = u16::from_be_bytes([section[3], section[4]]);
        ext == self.table_id_extension
    }
}

/// Result of one bounded section fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionFetch {
    Section(Vec<u8>),
    Timeout,
    Abort,
}

/// Remaining wait for one scan phase, decremented by fetches.
#[derive(Debug, Clone, Copy)]
pub struct WaitBudget {
    remaining_ms: u64,
}

impl WaitBudget {
    pub fn new(ms: u64) -> Self {
        WaitBudget { remaining_ms: ms }
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_ms == 0
    }

    pub fn consume(&mut self, ms: u64) {
        self.remaining_ms = self.remaining_ms.saturating_sub(ms);
    }

    pub fn exhaust(&mut self) {
        self.remaining_ms = 0;
    }
}

/// Delivers whole sections matching one open filter at a time.
pub trait SectionSource {
    fn open(&mut self, filter: &FilterSpec) -> Result<(), ScanError>;

    /// Block (boundedly) for the next matching section. Consumes from the
    /// budget; returns `Timeout` once the budget is exhausted with nothing
    /// matching, `Abort` when the shared abort signal was observed.
    fn fetch(&mut self, budget: &mut WaitBudget) -> SectionFetch;

    fn close(&mut self);
}

/// Frequency control. Re-tuning invalidates any open filter.
pub trait Tuner {
    fn tune(&mut self, frequency_hz: u32) -> Result<(), ScanError>;
    fn frequency(&self) -> u32;
}

/// Shared cooperative cancellation signal, polled inside every bounded
/// wait. Raising it unwinds all layers promptly.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_table_id_only_when_not_exact() {
        let f = FilterSpec::any_extension(0x1FFB, 0xC8);
        assert!(f.matches(&[0xC8, 0x00, 0x05, 0x12, 0x34, 0x00]));
        assert!(!f.matches(&[0xC9, 0x00, 0x05, 0x12, 0x34, 0x00]));
    }

    #[test]
    fn test_exact_filter_matches_extension() {
        let f = FilterSpec::exact(0x0100, 0x3C, 0x0007);
        assert!(f.matches(&[0x3C, 0x00, 0x05, 0x00, 0x07, 0x00]));
        assert!(!f.matches(&[0x3C, 0x00, 0x05, 0x00, 0x08, 0x00]));
    }

    #[test]
    fn test_budget_saturates_at_zero() {
        let mut b = WaitBudget::new(100);
        b.consume(60);
        b.consume(60);
        assert!(b.is_exhausted());
        assert_eq!(b.remaining_ms(), 0);
    }

    #[test]
    fn test_abort_flag_is_shared() {
        let a = AbortFlag::new();
        let b = a.clone();
        assert!(!b.is_raised());
        a.raise();
        assert!(b.is_raised());
        a.clear();
        assert!(!b.is_raised());
    }
}
