//! Module-info message parsing
//!
//! A module-info section is only interesting when its masked transaction
//! id matches a group candidate that has not been consumed yet. Each
//! module inside it passes through schedule-slot acceptance and the
//! module-level compatibility check before becoming a DownloadCandidate.

use crate::carousel::candidates::DownloadCandidate;
use crate::compat::{self, Range};
use crate::error::{DiiReject, ParseError, ScanError, ScheduleReject};
use crate::proto;
use crate::section::cursor::begin_section;
use crate::session::ScanSession;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiiStatus {
    /// At least one DownloadCandidate was created
    CandidateAdded,
    /// Parsed fully but nothing qualified; the session records why
    NoCandidate,
    /// The section was a server-initiate message; keep waiting
    NotModuleInfo,
    /// Transaction id matches no unconsumed group candidate; ignore
    Unmatched,
}

pub fn parse_dii(section: &[u8], session: &mut ScanSession) -> Result<DiiStatus, ScanError> {
    let (table_id, mut c) = begin_section(section).map_err(ScanError::Parse)?;
    if table_id != proto::TID_UNM {
        return Err(ParseError::TableId(table_id).into());
    }

    let wake_up_early = session.wake_up_early_ms();
    let too_far = session.params.too_far_ms;

    c.skip(5).map_err(ScanError::Parse)?;
    let discriminator = c.read_u8().map_err(ScanError::Parse)?;
    if discriminator != proto::DSMCC_PROTOCOL_DISCRIMINATOR {
        return Err(ParseError::Discriminator(discriminator).into());
    }
    let kind = c.read_u8().map_err(ScanError::Parse)?;
    if kind != proto::DSMCC_UNM {
        return Err(ParseError::MessageKind(kind).into());
    }
    let message_id = c.read_u16().map_err(ScanError::Parse)?;
    if message_id == proto::MSG_SERVER_INITIATE {
        return Ok(DiiStatus::NotModuleInfo);
    }
    if message_id != proto::MSG_MODULE_INFO {
        return Err(ParseError::MessageId(message_id).into());
    }

    let transaction_id = c.read_u32().map_err(ScanError::Parse)?;

    // Match against an unconsumed group candidate and mark it seen so the
    // same signaling is not rescanned while waiting for the others.
    let group = {
        let mut found = None;
        for g in session.groups.iter_mut() {
            if g.seen_count == 0
                && (g.transaction_id & proto::TRANSACTION_ID_MASK)
                    == (transaction_id & proto::TRANSACTION_ID_MASK)
            {
                g.seen_count += 1;
                found = Some(g.clone());
                break;
            }
        }
        match found {
            Some(g) => g,
            None => return Ok(DiiStatus::Unmatched),
        }
    };

    if c.read_u8().map_err(ScanError::Parse)? != 0xFF {
        return Err(ParseError::Reserved.into());
    }
    if c.read_u8().map_err(ScanError::Parse)? != 0 {
        return Err(ParseError::Adaptation.into());
    }
    if c.read_u16().map_err(ScanError::Parse)? == 0 {
        return Err(ParseError::MessageLength.into());
    }

    c.skip(4).map_err(ScanError::Parse)?; // download id
    let block_size = c.read_u16().map_err(ScanError::Parse)?;
    // window size, ack period, download window, download scenario
    c.skip(10).map_err(ScanError::Parse)?;
    if c.read_u16().map_err(ScanError::Parse)? != 0 {
        return Err(ParseError::CompatibilityDescriptor.into());
    }

    let number_of_modules = c.read_u16().map_err(ScanError::Parse)?;
    let mut added_any = false;

    for _ in 0..number_of_modules {
        let module_id = c.read_u16().map_err(ScanError::Parse)?;
        let module_size = c.read_u32().map_err(ScanError::Parse)?;
        let module_version = c.read_u8().map_err(ScanError::Parse)?;
        let module_info_length = c.read_u8().map_err(ScanError::Parse)? as usize;
        let mut mi = c.sub(module_info_length).map_err(ScanError::Parse)?;

        let mut module_name = String::new();
        let mut module_priority = 0u8;
        let mut scheduled_time = 0u32;
        let mut broadcast_seconds = 0u32;
        let mut ms_to_start = 0u64;
        let mut schedule_descriptors = 0usize;
        let mut compat_block = None;

        while mi.remaining() > 0 {
            let tag = mi.read_u8().map_err(ScanError::Parse)?;
            let len = mi.read_u8().map_err(ScanError::Parse)? as usize;
            match tag {
                proto::DII_DESC_SCHEDULE => {
                    let mut sd = mi.sub(len).map_err(ScanError::Parse)?;
                    let slots = len / 8;
                    schedule_descriptors += slots;
                    ms_to_start = 0;
                    for _ in 0..slots {
                        let possible_time = sd.read_u32().map_err(ScanError::Parse)?;
                        let possible_seconds = sd.read_u32().map_err(ScanError::Parse)?
                            & proto::BROADCAST_SECONDS_MASK;
                        let possible_ms = session.clock.millis_to_event(possible_time);

                        let sooner = ms_to_start == 0 || possible_time < scheduled_time;
                        if sooner && possible_ms >= wake_up_early && possible_ms < too_far {
                            scheduled_time = possible_time;
                            broadcast_seconds = possible_seconds;
                            ms_to_start = possible_ms;
                            trace!(module_id, possible_ms, "schedule slot accepted");
                        } else {
                            let reject = if possible_time == 0 || possible_ms > too_far {
                                ScheduleReject::TooLate
                            } else if possible_ms < wake_up_early {
                                ScheduleReject::TooEarly
                            } else {
                                ScheduleReject::Later
                            };
                            trace!(module_id, possible_ms, ?reject, "schedule slot rejected");
                            session.last_dii_reject = Some(DiiReject::Schedule(reject));
                        }
                    }
                }
                proto::DII_DESC_MODULE_INFO => {
                    let mut md = mi.sub(len).map_err(ScanError::Parse)?;
                    md.skip(1).map_err(ScanError::Parse)?; // encoding
                    let name_len = md.read_u8().map_err(ScanError::Parse)? as usize;
                    let name_bytes = md.take(name_len).map_err(ScanError::Parse)?;
                    let keep = name_len.min(proto::MAX_NAME_BYTES);
                    module_name = String::from_utf8_lossy(&name_bytes[..keep]).into_owned();
                    md.skip(1).map_err(ScanError::Parse)?; // signature type
                    let sig_len = md.read_u8().map_err(ScanError::Parse)? as usize;
                    md.skip(sig_len).map_err(ScanError::Parse)?;
                    let private_len = md.read_u8().map_err(ScanError::Parse)? as usize;
                    if private_len != 0 {
                        let mut pm = md.sub(private_len).map_err(ScanError::Parse)?;
                        module_priority = pm.read_u8().map_err(ScanError::Parse)?;
                        let vendor_tag = pm.read_u8().map_err(ScanError::Parse)?;
                        if vendor_tag == proto::DII_DESC_COMPATIBILITY {
                            compat_block = Some(pm);
                        }
                    }
                }
                _ => {
                    mi.skip(len).map_err(ScanError::Parse)?;
                }
            }
        }

        if ms_to_start == 0 {
            trace!(module_id, %module_name, "no acceptable schedule slots");
        }

        // Compatibility entries: four single-byte bounds per entry.
        let mut pm = match compat_block {
            Some(pm) => pm,
            None => return Err(ParseError::NoCompatibilityEntries.into()),
        };
        let entry_count = (pm.read_u8().map_err(ScanError::Parse)? / 4) as usize;
        if entry_count == 0 {
            return Err(ParseError::NoCompatibilityEntries.into());
        }
        if schedule_descriptors == 0 {
            return Err(ParseError::NoScheduleSlots.into());
        }

        let newer_version = session.tracker().note_signaled_version(module_version);
        for _ in 0..entry_count {
            let hardware = Range {
                begin: pm.read_u8().map_err(ScanError::Parse)? as u16,
                end: pm.read_u8().map_err(ScanError::Parse)? as u16,
            };
            let software = Range {
                begin: pm.read_u8().map_err(ScanError::Parse)? as u16,
                end: pm.read_u8().map_err(ScanError::Parse)? as u16,
            };
            match compat::module_check(
                &session.device,
                group.organization_id,
                group.model_group,
                hardware,
                software,
            ) {
                Ok(()) => {
                    // A newer module version supersedes everything gathered
                    // so far in this scan.
                    if newer_version {
                        session.downloads.clear();
                    }
                    if ms_to_start != 0 {
                        session.downloads.insert(DownloadCandidate {
                            frequency: group.frequency,
                            carousel_pid: group.carousel_pid,
                            transaction_id: group.transaction_id,
                            organization_id: group.organization_id,
                            model_group: group.model_group,
                            module_id,
                            module_priority,
                            module_size,
                            module_version,
                            module_block_size: block_size,
                            module_name: module_name.clone(),
                            number_of_modules,
                            broadcast_seconds,
                            scheduled_time,
                            milliseconds_to_start: ms_to_start,
                            hardware_model_begin: hardware.begin as u8,
                            hardware_model_end: hardware.end as u8,
                            software_version_begin: software.begin as u8,
                            software_version_end: software.end as u8,
                        })?;
                        added_any = true;
                        debug!(
                            module_id,
                            %module_name,
                            ms_to_start,
                            "added download candidate"
                        );
                        break;
                    }
                }
                Err(reason) => {
                    trace!(module_id, %reason, "module incompatible");
                    session.last_dii_reject = Some(DiiReject::Incompatible(reason));
                }
            }
        }
    }

    // Trailing private data, if any.
    if c.remaining() >= 2 {
        let private_len = c.read_u16().map_err(ScanError::Parse)? as usize;
        c.skip(private_len.min(c.remaining())).map_err(ScanError::Parse)?;
    }

    if added_any {
        Ok(DiiStatus::CandidateAdded)
    } else {
        Ok(DiiStatus::NoCandidate)
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    //! Module-info section builder shared by carousel tests.

    use crate::carousel::dsi::testsupport::wrap_section;
    use crate::proto;

    pub struct DiiModule {
        pub module_id: u16,
        pub module_size: u32,
        pub module_version: u8,
        pub name: &'static str,
        pub priority: u8,
        /// (downloadTime GPS seconds, broadcast seconds)
        pub slots: Vec<(u32, u32)>,
        /// (hwBegin, hwEnd, swBegin, swEnd)
        pub compat: Vec<(u8, u8, u8, u8)>,
    }

    pub fn build_dii(transaction_id: u32, block_size: u16, modules: &[DiiModule]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0, 0, 0, 0, 0]); // ext + version + sections
        body.push(proto::DSMCC_PROTOCOL_DISCRIMINATOR);
        body.push(proto::DSMCC_UNM);
        body.extend_from_slice(&proto::MSG_MODULE_INFO.to_be_bytes());
        body.extend_from_slice(&transaction_id.to_be_bytes());
        body.push(0xFF); // reserved
        body.push(0); // adaptation length
        body.extend_from_slice(&1u16.to_be_bytes()); // message length
        body.extend_from_slice(&[0, 0, 0, 0]); // download id
        body.extend_from_slice(&block_size.to_be_bytes());
        body.extend_from_slice(&[0; 10]); // window/ack/downloadWindow/scenario
        body.extend_from_slice(&0u16.to_be_bytes()); // compatibility descriptor
        body.extend_from_slice(&(modules.len() as u16).to_be_bytes());

        for m in modules {
            body.extend_from_slice(&m.module_id.to_be_bytes());
            body.extend_from_slice(&m.module_size.to_be_bytes());
            body.push(m.module_version);

            let mut info = Vec::new();
            // schedule descriptor
            info.push(proto::DII_DESC_SCHEDULE);
            info.push((m.slots.len() * 8) as u8);
            for (time, seconds) in &m.slots {
                info.extend_from_slice(&time.to_be_bytes());
                info.extend_from_slice(&(seconds & proto::BROADCAST_SECONDS_MASK).to_be_bytes());
            }
            // module-info descriptor with the vendor compatibility block
            let mut private = Vec::new();
            private.push(m.priority);
            private.push(proto::DII_DESC_COMPATIBILITY);
            private.push((m.compat.len() * 4) as u8);
            for (hb, he, sb, se) in &m.compat {
                private.extend_from_slice(&[*hb, *he, *sb, *se]);
            }
            let mut mid = Vec::new();
            mid.push(0); // encoding
            mid.push(m.name.len() as u8);
            mid.extend_from_slice(m.name.as_bytes());
            mid.push(0); // signature type
            mid.push(0); // signature length
            mid.push(private.len() as u8);
            mid.extend_from_slice(&private);
            info.push(proto::DII_DESC_MODULE_INFO);
            info.push(mid.len() as u8);
            info.extend_from_slice(&mid);

            body.push(info.len() as u8);
            body.extend_from_slice(&info);
        }

        body.extend_from_slice(&0u16.to_be_bytes()); // trailing private data
        wrap_section(proto::TID_UNM, &body)
    }
}
