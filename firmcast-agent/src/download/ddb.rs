//! Data-block reception and module assembly
//!
//! Blocks arrive in arbitrary order and repeat for the whole broadcast
//! window. The assembler places each block at blockNumber x blockSize,
//! counts duplicates without recopying, and rejects block numbers past
//! the module end outright.

use crate::carousel::candidates::DownloadCandidate;
use crate::diag::SubState;
use crate::error::{DownloadError, ParseError};
use crate::proto;
use crate::section::cursor::begin_section;
use crate::section::{FilterSpec, SectionFetch, SectionSource, WaitBudget};
use crate::session::ScanSession;
use tracing::{debug, trace};

/// What one data-block section contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// New block written; this many are still outstanding
    Accepted { outstanding: usize },
    /// Block already held; counted only
    Duplicate,
    /// Section belongs to a different module on the same stream
    Foreign,
}

pub struct BlockAssembler {
    module_id: u16,
    block_size: usize,
    buffer: Vec<u8>,
    received: Vec<bool>,
    outstanding: usize,
    pub duplicates: u32,
}

impl BlockAssembler {
    pub fn new(module_id: u16, module_size: u32, block_size: u16) -> Self {
        let module_size = module_size as usize;
        let block_size = block_size.max(1) as usize;
        let block_count = module_size.div_ceil(block_size);
        BlockAssembler {
            module_id,
            block_size,
            buffer: vec![0; module_size],
            received: vec![false; block_count],
            outstanding: block_count,
            duplicates: 0,
        }
    }

    pub fn block_count(&self) -> usize {
        self.received.len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    pub fn into_module(self) -> Vec<u8> {
        self.buffer
    }

    /// Parse one data-block section and place its payload.
    pub fn accept(&mut self, section: &[u8]) -> Result<BlockStatus, DownloadError> {
        let (table_id, mut c) = begin_section(section).map_err(DownloadError::Parse)?;
        if table_id != proto::TID_DDM {
            return Err(ParseError::TableId(table_id).into());
        }
        c.skip(5).map_err(DownloadError::Parse)?;
        let discriminator = c.read_u8().map_err(DownloadError::Parse)?;
        if discriminator != proto::DSMCC_PROTOCOL_DISCRIMINATOR {
            return Err(ParseError::Discriminator(discriminator).into());
        }
        let kind = c.read_u8().map_err(DownloadError::Parse)?;
        if kind != proto::DSMCC_UNM {
            return Err(ParseError::MessageKind(kind).into());
        }
        let message_id = c.read_u16().map_err(DownloadError::Parse)?;
        if message_id != proto::MSG_DATA_BLOCK {
            return Err(ParseError::MessageId(message_id).into());
        }
        c.skip(5).map_err(DownloadError::Parse)?; // download id + reserved
        if c.read_u8().map_err(DownloadError::Parse)? != 0 {
            return Err(ParseError::Adaptation.into());
        }
        let message_length = c.read_u16().map_err(DownloadError::Parse)? as usize;
        if message_length == 0 {
            return Err(ParseError::MessageLength.into());
        }

        let module_id = c.read_u16().map_err(DownloadError::Parse)?;
        if module_id != self.module_id {
            trace!(module_id, "data block for another module ignored");
            return Ok(BlockStatus::Foreign);
        }
        c.skip(2).map_err(DownloadError::Parse)?; // module version + reserved
        let block_number = c.read_u16().map_err(DownloadError::Parse)? as usize;

        if block_number >= self.block_count() {
            return Err(ParseError::BlockRange {
                block: block_number as u16,
                last: (self.block_count().saturating_sub(1)) as u16,
            }
            .into());
        }
        if self.received[block_number] {
            self.duplicates += 1;
            return Ok(BlockStatus::Duplicate);
        }

        let data = c
            .take(message_length.saturating_sub(6))
            .map_err(DownloadError::Parse)?;
        let offset = block_number * self.block_size;
        let end = (offset + data.len()).min(self.buffer.len());
        self.buffer[offset..end].copy_from_slice(&data[..end - offset]);
        self.received[block_number] = true;
        self.outstanding -= 1;
        Ok(BlockStatus::Accepted {
            outstanding: self.outstanding,
        })
    }
}

/// Receive every block of the selected module.
///
/// The wait covers the advertised broadcast window plus the time left
/// until the scheduled start.
pub fn scan_blocks<S: SectionSource>(
    source: &mut S,
    session: &mut ScanSession,
    candidate: &DownloadCandidate,
) -> Result<Vec<u8>, DownloadError> {
    session.diag.set_sub_state(SubState::ReceivingBlocks);

    let mut assembler = BlockAssembler::new(
        candidate.module_id,
        candidate.module_size,
        candidate.module_block_size,
    );
    session.diag.blocks_needed = assembler.block_count() as u32;

    let wait_ms = u64::from(candidate.broadcast_seconds) * 1_000
        + session.clock.millis_to_event(candidate.scheduled_time);
    let mut budget = WaitBudget::new(wait_ms);

    source.open(&FilterSpec::exact(
        candidate.carousel_pid,
        proto::TID_DDM,
        candidate.module_id,
    ))?;

    let result = loop {
        match source.fetch(&mut budget) {
            SectionFetch::Abort => break Err(DownloadError::Aborted),
            SectionFetch::Timeout => {
                break Err(DownloadError::BlockTimeout {
                    missing: assembler.outstanding(),
                })
            }
            SectionFetch::Section(section) => match assembler.accept(&section) {
                Ok(BlockStatus::Accepted { outstanding }) => {
                    session.diag.blocks_received += 1;
                    if outstanding == 0 {
                        debug!(
                            module_id = candidate.module_id,
                            blocks = assembler.block_count(),
                            duplicates = assembler.duplicates,
                            "module assembly complete"
                        );
                        break Ok(());
                    }
                }
                Ok(BlockStatus::Duplicate) => session.diag.blocks_duplicate += 1,
                Ok(BlockStatus::Foreign) => {}
                Err(e) => break Err(e),
            },
        }
    };
    source.close();
    result?;
    Ok(assembler.into_module())
}
