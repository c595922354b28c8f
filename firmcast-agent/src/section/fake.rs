//! Scripted section source for tests
//!
//! Sections are queued up front; each fetch delivers the oldest queued
//! section matching the open filter and charges a fixed granularity to
//! the wait budget. An empty match set exhausts the budget and times out,
//! mirroring a quiet transport. An abort can be scheduled after a fixed
//! number of fetches to exercise cancellation paths.

use super::{AbortFlag, FilterSpec, SectionFetch, SectionSource, WaitBudget};
use crate::error::ScanError;
use std::collections::VecDeque;

/// How much budget one scripted fetch consumes.
pub const FETCH_GRANULARITY_MS: u64 = 100;

pub struct ScriptedSource {
    queued: VecDeque<(u16, Vec<u8>)>,
    filter: Option<FilterSpec>,
    abort: AbortFlag,
    abort_after_fetches: Option<u32>,
    fetches: u32,
    pub opens: u32,
    pub closes: u32,
}

impl ScriptedSource {
    pub fn new(abort: AbortFlag) -> Self {
        ScriptedSource {
            queued: VecDeque::new(),
            filter: None,
            abort,
            abort_after_fetches: None,
            fetches: 0,
            opens: 0,
            closes: 0,
        }
    }

    /// Queue a section for delivery on the given stream id.
    pub fn feed(&mut self, stream_id: u16, section: Vec<u8>) {
        self.queued.push_back((stream_id, section));
    }

    /// Raise the shared abort flag after `n` further fetches.
    pub fn abort_after(&mut self, n: u32) {
        self.abort_after_fetches = Some(self.fetches + n);
    }

    pub fn is_open(&self) -> bool {
        self.filter.is_some()
    }
}

impl SectionSource for ScriptedSource {
    fn open(&mut self, filter: &FilterSpec) -> Result<(), ScanError> {
        self.opens += 1;
        self.filter = Some(*filter);
        Ok(())
    }

    fn fetch(&mut self, budget: &mut WaitBudget) -> SectionFetch {
        self.fetches += 1;
        if let Some(at) = self.abort_after_fetches {
            if self.fetches >= at {
                self.abort.raise();
            }
        }
        if self.abort.is_raised() {
            return SectionFetch::Abort;
        }
        if budget.is_exhausted() {
            return SectionFetch::Timeout;
        }
        let filter = match self.filter {
            Some(f) => f,
            None => return SectionFetch::Timeout,
        };
        let hit = self
            .queued
            .iter()
            .position(|(sid, s)| *sid == filter.stream_id && filter.matches(s));
        match hit {
            Some(index) => {
                budget.consume(FETCH_GRANULARITY_MS);
                let (_, section) = self.queued.remove(index).unwrap_or_default();
                SectionFetch::Section(section)
            }
            None => {
                budget.exhaust();
                SectionFetch::Timeout
            }
        }
    }

    fn close(&mut self) {
        self.closes += 1;
        self.filter = None;
    }
}

/// Fixed-frequency scripted tuner.
#[derive(Default)]
pub struct ScriptedTuner {
    frequency: u32,
    pub tunes: Vec<u32>,
}

impl super::Tuner for ScriptedTuner {
    fn tune(&mut self, frequency_hz: u32) -> Result<(), ScanError> {
        self.frequency = frequency_hz;
        self.tunes.push(frequency_hz);
        Ok(())
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }
}
