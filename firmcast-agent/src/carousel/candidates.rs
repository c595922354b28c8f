//! Candidate tables for one carousel scan cycle
//!
//! Both tables are bounded. Saturation is a distinct outcome surfaced to
//! the caller of the failing insert; existing entries are never evicted.

use crate::error::ScanError;

/// Capacity of the group and download candidate tables.
pub const CANDIDATE_TABLE_CAPACITY: usize = 32;

/// One advertised group whose identity the device accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCandidate {
    /// Group id from the server-initiate message; matched (masked)
    /// against module-info transaction ids
    pub transaction_id: u32,
    pub organization_id: u32,
    pub model_group: u16,
    pub carousel_pid: u16,
    pub frequency: u32,
    /// How many module-info messages for this group have been consumed
    pub seen_count: u32,
}

/// One downloadable module with an accepted schedule slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCandidate {
    pub frequency: u32,
    pub carousel_pid: u16,
    pub transaction_id: u32,
    pub organization_id: u32,
    pub model_group: u16,
    pub module_id: u16,
    pub module_priority: u8,
    pub module_size: u32,
    pub module_version: u8,
    pub module_block_size: u16,
    pub module_name: String,
    pub number_of_modules: u16,
    /// Seconds the module broadcast lasts once started
    pub broadcast_seconds: u32,
    /// Scheduled start in broadcast (GPS) seconds
    pub scheduled_time: u32,
    pub milliseconds_to_start: u64,
    pub hardware_model_begin: u8,
    pub hardware_model_end: u8,
    pub software_version_begin: u8,
    pub software_version_end: u8,
}

/// Fixed-capacity table with first-free-slot allocation.
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    name: &'static str,
    slots: Vec<Option<T>>,
}

impl<T> SlotTable<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        SlotTable { name, slots }
    }

    /// Place a value in the first free slot.
    pub fn insert(&mut self, value: T) -> Result<usize, ScanError> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return Ok(index);
            }
        }
        Err(ScanError::TableFull(self.name))
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}
