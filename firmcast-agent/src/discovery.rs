//! Channel discovery
//!
//! Finds the elementary streams carrying download carousels on a tuned
//! transport: service table for program numbers announcing data services,
//! association table for their map streams, then each map table for a
//! download stream whose registration descriptor carries the network
//! signature. A configured stream-id override bypasses all of it.

use crate::diag::SubState;
use crate::error::{ParseError, ScanError, ScanPhase};
use crate::proto;
use crate::section::cursor::begin_section;
use crate::section::{FilterSpec, SectionFetch, SectionSource, Tuner, WaitBudget};
use crate::session::ScanSession;
use firmcast_common::EventCategory;
use tracing::{debug, warn};

/// Program numbers announcing a data or download service.
pub fn parse_vct(section: &[u8]) -> Result<Vec<u16>, ParseError> {
    let (table_id, mut c) = begin_section(section)?;
    if table_id != proto::TID_TVCT && table_id != proto::TID_CVCT {
        return Err(ParseError::TableId(table_id));
    }
    c.skip(5)?; // extension, version, section numbers
    let protocol_version = c.read_u8()?;
    if protocol_version != 0 {
        return Err(ParseError::ProtocolVersion(protocol_version));
    }
    let num_channels = c.read_u8()?;
    if num_channels == 0 {
        return Err(ParseError::NoChannels);
    }

    let mut programs = Vec::new();
    for _ in 0..num_channels {
        // short name, major/minor channel, modulation, carrier, tsid
        c.skip(24)?;
        let program_number = c.read_u16()?;
        let service_type = c.read_u16()? & 0x003F;
        if program_number != 0
            && program_number != 0xFFFF
            && (service_type == proto::SERVICE_TYPE_DATA
                || service_type == proto::SERVICE_TYPE_DOWNLOAD)
        {
            programs.push(program_number);
        }
        c.skip(2)?; // source id
        let descriptors_len = (c.read_u16()? & 0x03FF) as usize;
        c.skip(descriptors_len)?;
    }
    Ok(programs)
}

/// (program number, map stream id) pairs from an association table.
pub fn parse_pat(section: &[u8]) -> Result<Vec<(u16, u16)>, ParseError> {
    let (table_id, mut c) = begin_section(section)?;
    if table_id != proto::TID_PAT {
        return Err(ParseError::TableId(table_id));
    }
    c.skip(5)?;
    // everything up to the CRC is program entries
    let count = c.remaining().saturating_sub(4) / 4;
    let mut programs = Vec::with_capacity(count);
    for _ in 0..count {
        let program_number = c.read_u16()?;
        let map_pid = c.read_u16()? & 0x1FFF;
        programs.push((program_number, map_pid));
    }
    Ok(programs)
}

/// Stream id of the download carousel announced by a map table, if any.
/// The carousel stream must carry the network's registration descriptor.
pub fn parse_pmt(section: &[u8]) -> Result<Option<u16>, ParseError> {
    let (table_id, mut c) = begin_section(section)?;
    if table_id != proto::TID_PMT {
        return Err(ParseError::TableId(table_id));
    }
    c.skip(7)?; // extension, version, section numbers, PCR stream id
    let program_info_len = (c.read_u16()? & 0x0FFF) as usize;
    c.skip(program_info_len)?;

    while c.remaining() > 4 {
        let stream_type = c.read_u8()?;
        let pid = c.read_u16()? & 0x1FFF;
        let es_info_len = (c.read_u16()? & 0x0FFF) as usize;
        let mut es = c.sub(es_info_len)?;
        if stream_type != proto::STREAM_TYPE_DSMCC {
            continue;
        }
        while es.remaining() > 0 {
            let tag = es.read_u8()?;
            let len = es.read_u8()? as usize;
            let payload = es.take(len)?;
            if tag == proto::DESC_REGISTRATION
                && len == proto::REGISTRATION_LEN
                && proto::registration_matches(payload)
            {
                return Ok(Some(pid));
            }
        }
    }
    Ok(None)
}

/// Fetch sections under one filter until the parser yields a value.
fn scan_table<S, T, F>(
    source: &mut S,
    session: &mut ScanSession,
    filter: FilterSpec,
    wait_ms: u64,
    phase: ScanPhase,
    mut parse: F,
) -> Result<T, ScanError>
where
    S: SectionSource,
    F: FnMut(&[u8]) -> Result<T, ParseError>,
{
    source.open(&filter)?;
    let mut budget = WaitBudget::new(wait_ms);
    let result = loop {
        match source.fetch(&mut budget) {
            SectionFetch::Abort => break Err(ScanError::Aborted),
            SectionFetch::Timeout => break Err(ScanError::Timeout(phase)),
            SectionFetch::Section(section) => match parse(&section) {
                Ok(value) => break Ok(value),
                Err(p) => {
                    warn!(%p, %phase, "malformed table section skipped");
                    session
                        .events
                        .record(EventCategory::Parse, p.code(), p.to_string());
                }
            },
        }
    };
    source.close();
    result
}

/// Discover download carousel stream ids on the tuned transport.
///
/// The service table only orders the walk; every program the association
/// table carries is a candidate even when the service table failed to
/// announce it. An empty association table means the transport carries no
/// usable programs at all. Map-table failures are aggregated and the
/// worst one reported when no carousel is found anywhere.
pub fn discover_carousels<S: SectionSource>(
    source: &mut S,
    session: &mut ScanSession,
) -> Result<Vec<u16>, ScanError> {
    session.diag.set_sub_state(SubState::ScanningServiceTables);

    let mut announced = None;
    // Factory-line carousels are stripped transports with no service table.
    let service_tables: &[u8] = if session.factory_descriptor_seen {
        &[]
    } else {
        &[proto::TID_TVCT, proto::TID_CVCT]
    };
    for &table_id in service_tables {
        match scan_table(
            source,
            session,
            FilterSpec::any_extension(proto::PID_PSIP, table_id),
            session.params.wait_vct_ms,
            ScanPhase::ServiceTable,
            parse_vct,
        ) {
            Ok(programs) => {
                announced = Some(programs);
                break;
            }
            Err(ScanError::Aborted) => return Err(ScanError::Aborted),
            Err(e) => debug!(%e, table_id, "service table unavailable"),
        }
    }

    let pat = scan_table(
        source,
        session,
        FilterSpec::any_extension(proto::PID_PAT, proto::TID_PAT),
        session.params.wait_pat_ms,
        ScanPhase::AssociationTable,
        parse_pat,
    )?;

    let announced = announced.unwrap_or_default();
    let mut channels: Vec<(u16, u16)> = pat
        .into_iter()
        .filter(|(program_number, _)| *program_number != 0)
        .collect();
    // Announced programs are scanned first, but a program only the
    // association table knows about is still a candidate.
    channels.sort_by_key(|(program_number, _)| !announced.contains(program_number));
    if channels.is_empty() {
        debug!("transport carries no candidate programs");
        return Err(ScanError::NoDownloadService);
    }

    let mut carousels = Vec::new();
    let mut worst: Option<ScanError> = None;
    for (program_number, map_pid) in channels {
        match scan_table(
            source,
            session,
            FilterSpec::exact(map_pid, proto::TID_PMT, program_number),
            session.params.wait_pmt_ms,
            ScanPhase::MapTable,
            parse_pmt,
        ) {
            Ok(Some(pid)) => {
                debug!(program_number, pid, "download carousel announced");
                carousels.push(pid);
            }
            Ok(None) => {}
            Err(ScanError::Aborted) => return Err(ScanError::Aborted),
            Err(e) => worst = Some(ScanError::worst(worst.take(), e)),
        }
    }

    if carousels.is_empty() {
        Err(worst.unwrap_or(ScanError::NoDownloadService))
    } else {
        Ok(carousels)
    }
}

/// Scan every carousel on one frequency. Selection accumulates in the
/// session's best-candidate record; per-carousel failures are aggregated
/// and only fatal when no carousel on the transport scanned cleanly.
pub fn scan_one_frequency<S, T>(
    source: &mut S,
    tuner: &mut T,
    session: &mut ScanSession,
    frequency: u32,
) -> Result<(), ScanError>
where
    S: SectionSource,
    T: Tuner,
{
    tuner.tune(frequency)?;
    session.diag.last_tuned_frequency = Some(frequency);

    let carousels = match session.params.stream_id_override {
        Some(pid) => vec![pid],
        None => discover_carousels(source, session)?,
    };

    let mut scanned_clean = false;
    let mut worst: Option<ScanError> = None;
    for pid in carousels {
        match crate::carousel::carousel_scan(source, session, pid, frequency) {
            Ok(_) => scanned_clean = true,
            Err(ScanError::Aborted) => return Err(ScanError::Aborted),
            Err(e) => {
                warn!(%e, pid, "carousel scan failed");
                worst = Some(ScanError::worst(worst.take(), e));
            }
        }
    }

    match (scanned_clean, worst) {
        (false, Some(w)) => Err(w),
        _ => Ok(()),
    }
}

/// Walk the configured frequency list and return the best download found
/// anywhere, or the worst failure when every frequency failed.
pub fn channel_scan<S, T>(
    source: &mut S,
    tuner: &mut T,
    session: &mut ScanSession,
) -> Result<Option<crate::carousel::candidates::DownloadCandidate>, ScanError>
where
    S: SectionSource,
    T: Tuner,
{
    session.best = None;
    let frequencies = session.params.frequencies.clone();
    let mut worst: Option<ScanError> = None;
    let mut any_clean = false;

    for frequency in frequencies {
        match scan_one_frequency(source, tuner, session, frequency) {
            Ok(()) => any_clean = true,
            Err(ScanError::Aborted) => return Err(ScanError::Aborted),
            Err(e) => {
                debug!(%e, frequency, "frequency scan failed");
                session.diag.record_error(&e);
                worst = Some(ScanError::worst(worst.take(), e));
            }
        }
        session.diag.frequencies_scanned += 1;
    }

    match (session.best.clone(), any_clean, worst) {
        (Some(best), _, _) => Ok(Some(best)),
        (None, false, Some(w)) => Err(w),
        (None, _, _) => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    //! Discovery table builders shared with the scan-flow tests.

    use crate::carousel::dsi::testsupport::wrap_section;
    use crate::proto;

    pub fn build_vct(channels: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 5]);
        body.push(0); // protocol version
        body.push(channels.len() as u8);
        for (program_number, service_type) in channels {
            body.extend_from_slice(&[0; 24]);
            body.extend_from_slice(&program_number.to_be_bytes());
            body.extend_from_slice(&service_type.to_be_bytes());
            body.extend_from_slice(&[0; 2]); // source id
            body.extend_from_slice(&0u16.to_be_bytes()); // descriptors
        }
        wrap_section(proto::TID_TVCT, &body)
    }

    pub fn build_pat(programs: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 5]);
        for (program_number, map_pid) in programs {
            body.extend_from_slice(&program_number.to_be_bytes());
            body.extend_from_slice(&(map_pid | 0xE000).to_be_bytes());
        }
        body.extend_from_slice(&[0; 4]); // CRC placeholder
        wrap_section(proto::TID_PAT, &body)
    }

    pub fn build_pmt(program_number: u16, streams: &[(u8, u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&program_number.to_be_bytes());
        body.extend_from_slice(&[0; 3]);
        body.extend_from_slice(&[0xE0, 0x00]); // PCR stream id
        body.extend_from_slice(&0u16.to_be_bytes()); // program info length
        for (stream_type, pid, descriptors) in streams {
            body.push(*stream_type);
            body.extend_from_slice(&(pid | 0xE000).to_be_bytes());
            body.extend_from_slice(&(descriptors.len() as u16).to_be_bytes());
            body.extend_from_slice(descriptors);
        }
        body.extend_from_slice(&[0; 4]); // CRC placeholder
        wrap_section(proto::TID_PMT, &body)
    }

    /// Registration descriptor bytes announcing a download stream.
    pub fn registration_descriptor() -> Vec<u8> {
        let mut d = vec![proto::DESC_REGISTRATION, proto::REGISTRATION_LEN as u8];
        d.extend_from_slice(b"BDC1");
        d
    }
}
