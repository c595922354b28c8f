//! Platform collaborators for offline operation
//!
//! `TsFileSource` plays a transport-stream capture file as a section
//! source, reassembling sections from 188-byte packets; tuning rewinds
//! the capture. `DirectorySink` lands modules in a directory tree. Both
//! stand in for the tuner/demux and install hardware the agent drives in
//! the field.

use crate::download::ModuleSink;
use crate::error::{DownloadError, ScanError};
use crate::section::{AbortFlag, FilterSpec, SectionFetch, SectionSource, Tuner, WaitBudget};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

const TS_PACKET_LEN: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
/// Budget charged per delivered section so filtered waits still elapse
/// against a looping capture.
const TS_FETCH_MS: u64 = 10;

struct CaptureState {
    data: Vec<u8>,
    cursor: usize,
    filter: Option<FilterSpec>,
    assembly: Vec<u8>,
    assembling: bool,
    frequency: u32,
}

impl CaptureState {
    fn reset_assembly(&mut self) {
        self.assembly.clear();
        self.assembling = false;
    }

    /// Feed one packet payload into the assembler; returns a completed
    /// section when the declared length has been reached.
    fn assemble(&mut self, payload: &[u8], unit_start: bool) -> Option<Vec<u8>> {
        if unit_start {
            let pointer = *payload.first()? as usize;
            let start = 1 + pointer;
            if start >= payload.len() {
                return None;
            }
            self.assembly.clear();
            self.assembly.extend_from_slice(&payload[start..]);
            self.assembling = true;
        } else if self.assembling {
            self.assembly.extend_from_slice(payload);
        } else {
            return None;
        }

        if self.assembly.len() < 3 {
            return None;
        }
        let declared =
            3 + ((usize::from(self.assembly[1]) & 0x0F) << 8 | usize::from(self.assembly[2]));
        if self.assembly.len() < declared {
            return None;
        }
        let section = self.assembly[..declared].to_vec();
        self.reset_assembly();
        Some(section)
    }
}

/// Transport-stream capture playback. Clones share the playback state,
/// so one handle can serve as the tuner while another fetches sections.
#[derive(Clone)]
pub struct TsFileSource {
    state: Arc<Mutex<CaptureState>>,
    abort: AbortFlag,
}

impl TsFileSource {
    pub fn open_capture(path: &Path, abort: AbortFlag) -> std::io::Result<Self> {
        let data = fs::read(path)?;
        debug!(
            path = %path.display(),
            packets = data.len() / TS_PACKET_LEN,
            "transport capture loaded"
        );
        Ok(TsFileSource {
            state: Arc::new(Mutex::new(CaptureState {
                data,
                cursor: 0,
                filter: None,
                assembly: Vec::new(),
                assembling: false,
                frequency: 0,
            })),
            abort,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SectionSource for TsFileSource {
    fn open(&mut self, filter: &FilterSpec) -> Result<(), ScanError> {
        let mut state = self.lock();
        state.filter = Some(*filter);
        state.reset_assembly();
        Ok(())
    }

    fn fetch(&mut self, budget: &mut WaitBudget) -> SectionFetch {
        let mut state = self.lock();
        let filter = match state.filter {
            Some(f) => f,
            None => return SectionFetch::Timeout,
        };
        let packet_count = state.data.len() / TS_PACKET_LEN;
        if packet_count == 0 {
            budget.exhaust();
            return SectionFetch::Timeout;
        }

        // One full pass over the capture without a match means the
        // filtered stream simply is not here.
        let mut scanned = 0;
        while scanned < packet_count {
            if self.abort.is_raised() {
                return SectionFetch::Abort;
            }
            if budget.is_exhausted() {
                return SectionFetch::Timeout;
            }
            if state.cursor + TS_PACKET_LEN > state.data.len() {
                state.cursor = 0;
            }
            let packet: [u8; TS_PACKET_LEN] = state.data
                [state.cursor..state.cursor + TS_PACKET_LEN]
                .try_into()
                .unwrap_or([0; TS_PACKET_LEN]);
            state.cursor += TS_PACKET_LEN;
            scanned += 1;

            if packet[0] != TS_SYNC_BYTE {
                warn!("sync byte missing, packet skipped");
                continue;
            }
            let pid = (u16::from(packet[1]) & 0x1F) << 8 | u16::from(packet[2]);
            if pid != filter.stream_id {
                continue;
            }
            let unit_start = packet[1] & 0x40 != 0;
            let adaptation = (packet[3] >> 4) & 0x03;
            let mut start = 4;
            if adaptation & 0b10 != 0 {
                start = 5 + packet[4] as usize;
            }
            if adaptation & 0b01 == 0 || start >= TS_PACKET_LEN {
                continue;
            }

            if let Some(section) = state.assemble(&packet[start..], unit_start) {
                budget.consume(TS_FETCH_MS);
                if filter.matches(&section) {
                    trace!(pid, len = section.len(), "section delivered");
                    return SectionFetch::Section(section);
                }
            }
        }
        budget.exhaust();
        SectionFetch::Timeout
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.filter = None;
        state.reset_assembly();
    }
}

impl Tuner for TsFileSource {
    fn tune(&mut self, frequency_hz: u32) -> Result<(), ScanError> {
        // A capture has no RF stage; tuning rewinds playback.
        let mut state = self.lock();
        state.frequency = frequency_hz;
        state.cursor = 0;
        state.reset_assembly();
        Ok(())
    }

    fn frequency(&self) -> u32 {
        self.lock().frequency
    }
}

/// Lands modules under a directory: stored modules keep their raw bytes,
/// installed payloads land under the component name.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: PathBuf) -> Self {
        DirectorySink { root }
    }

    fn write(&self, dir: &str, name: String, bytes: &[u8]) -> Result<(), DownloadError> {
        let dir = self.root.join(dir);
        fs::create_dir_all(&dir).map_err(|e| DownloadError::Store(e.to_string()))?;
        fs::write(dir.join(name), bytes).map_err(|e| DownloadError::Store(e.to_string()))
    }
}

impl ModuleSink for DirectorySink {
    fn store(
        &mut self,
        component: &str,
        module_index: u16,
        module: &[u8],
    ) -> Result<(), DownloadError> {
        self.write("store", format!("{component}.{module_index}.mod"), module)
    }

    fn install(
        &mut self,
        component: &str,
        module_index: u16,
        payload: &[u8],
    ) -> Result<(), DownloadError> {
        self.write("install", format!("{component}.{module_index}"), payload)
            .map_err(|e| DownloadError::Install(e.to_string()))
    }

    fn copy_forward(&mut self, component: &str) -> Result<(), DownloadError> {
        debug!(component, "carrying installed component forward");
        Ok(())
    }
}
