//! Server-initiate message parsing
//!
//! Two passes over the group list: the first skips ahead to the private
//! descriptor block to validate network identity and capture the broadcast
//! time reference, the second re-walks the groups extracting each group's
//! (organizationId, modelGroup) pair and creating GroupCandidates for the
//! pairs the device accepts.

use crate::carousel::candidates::GroupCandidate;
use crate::compat;
use crate::error::{ParseError, ScanError};
use crate::proto;
use crate::section::cursor::{begin_section, Cursor};
use crate::session::ScanSession;
use firmcast_common::EventCategory;
use tracing::{debug, info, warn};

/// What one well-formed section turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsiStatus {
    /// Parsed fully; this many groups were accepted as candidates
    GroupsFound(usize),
    /// numberOfGroups was zero: nothing to download on this carousel
    NoGroups,
    /// The section was a module-info message; keep waiting
    NotServerInitiate,
}

pub fn parse_dsi(
    section: &[u8],
    carousel_pid: u16,
    frequency: u32,
    session: &mut ScanSession,
) -> Result<DsiStatus, ScanError> {
    let (table_id, mut c) = begin_section(section).map_err(ScanError::Parse)?;
    if table_id != proto::TID_UNM {
        return Err(ParseError::TableId(table_id).into());
    }

    // table id extension, version, section number, last section number
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
    if message_id == proto::MSG_MODULE_INFO {
        return Ok(DsiStatus::NotServerInitiate);
    }
    if message_id != proto::MSG_SERVER_INITIATE {
        return Err(ParseError::MessageId(message_id).into());
    }

    // transaction id and reserved byte
    c.skip(5).map_err(ScanError::Parse)?;
    if c.read_u8().map_err(ScanError::Parse)? != 0 {
        return Err(ParseError::Adaptation.into());
    }
    if c.read_u16().map_err(ScanError::Parse)? == 0 {
        return Err(ParseError::MessageLength.into());
    }

    // server id
    c.skip(20).map_err(ScanError::Parse)?;
    if c.read_u16().map_err(ScanError::Parse)? != 0 {
        return Err(ParseError::CompatibilityDescriptor.into());
    }
    if c.read_u16().map_err(ScanError::Parse)? == 0 {
        return Err(ParseError::PrivateData.into());
    }

    let number_of_groups = c.read_u16().map_err(ScanError::Parse)?;
    if number_of_groups == 0 {
        return Ok(DsiStatus::NoGroups);
    }

    parse_private_descriptors(c.clone(), number_of_groups, session)?;

    // Pass 2: extract each group's identity from its compatibility
    // sub-descriptor and gate it through the group-level check.
    let mut accepted = 0usize;
    for _ in 0..number_of_groups {
        let group_id = c.read_u32().map_err(ScanError::Parse)?;
        c.skip(4).map_err(ScanError::Parse)?; // group size

        let compat_len = c.read_u16().map_err(ScanError::Parse)? as usize;
        let mut identity = None;
        if compat_len > 0 {
            let mut sub = c.sub(compat_len).map_err(ScanError::Parse)?;
            let descriptor_count = sub.read_u16().map_err(ScanError::Parse)?;
            if descriptor_count > 0 {
                let tag = sub.read_u8().map_err(ScanError::Parse)?;
                let len = sub.read_u8().map_err(ScanError::Parse)?;
                let specifier = sub.read_u8().map_err(ScanError::Parse)?;
                let organization_id = sub.read_u24().map_err(ScanError::Parse)?;
                let model_group = sub.read_u16().map_err(ScanError::Parse)?;
                if len != 0
                    && tag == proto::GROUP_COMPAT_TAG
                    && specifier == proto::GROUP_COMPAT_SPECIFIER
                {
                    identity = Some((organization_id, model_group));
                }
            }
        }

        let group_info_len = c.read_u16().map_err(ScanError::Parse)? as usize;
        c.skip(group_info_len).map_err(ScanError::Parse)?;

        if let Some((organization_id, model_group)) = identity {
            match compat::group_check(&session.device, organization_id, model_group) {
                Ok(()) => {
                    session.groups.insert(GroupCandidate {
                        transaction_id: group_id,
                        organization_id,
                        model_group,
                        carousel_pid,
                        frequency,
                        seen_count: 0,
                    })?;
                    accepted += 1;
                    debug!(
                        group_id = format_args!("0x{group_id:X}"),
                        organization_id = format_args!("0x{organization_id:06X}"),
                        model_group,
                        "accepted group candidate"
                    );
                }
                Err(reason) => {
                    session.events.record(
                        EventCategory::Compat,
                        reason.code(),
                        format!("group 0x{group_id:X}: {reason}"),
                    );
                }
            }
        }
    }

    Ok(DsiStatus::GroupsFound(accepted))
}

/// Pass 1: skip over the group list to the private descriptor block and
/// parse the network identity, time, server and factory descriptors.
fn parse_private_descriptors(
    mut c: Cursor<'_>,
    number_of_groups: u16,
    session: &mut ScanSession,
) -> Result<(), ScanError> {
    for _ in 0..number_of_groups {
        c.skip(8).map_err(ScanError::Parse)?; // group id + group size
        let compat_len = c.read_u16().map_err(ScanError::Parse)? as usize;
        c.skip(compat_len).map_err(ScanError::Parse)?;
        let info_len = c.read_u16().map_err(ScanError::Parse)? as usize;
        c.skip(info_len).map_err(ScanError::Parse)?;
    }

    let mut remaining = i64::from(c.read_u16().map_err(ScanError::Parse)?);
    let mut first_descriptor = true;
    let mut our_version_found = false;

    // Factory mode is assumed false and proven only by descriptor presence.
    session.factory_descriptor_seen = false;

    while remaining > 0 {
        let tag = c.read_u8().map_err(ScanError::Parse)?;
        let size = c.read_u8().map_err(ScanError::Parse)? as usize;
        remaining -= 2 + size as i64;

        match tag {
            proto::DESC_REGISTRATION => {
                // Must lead the block and be large enough to hold the
                // registration plus the network and time descriptors.
                if !first_descriptor || size < 20 {
                    return Err(ParseError::Registration.into());
                }
                let signature = c.take(proto::REGISTRATION_LEN).map_err(ScanError::Parse)?;
                if !proto::registration_matches(signature) {
                    return Err(ParseError::Registration.into());
                }
                // The remaining descriptors live inside the registration's
                // additional identification info.
                remaining = (size - proto::REGISTRATION_LEN) as i64;
            }
            proto::DSI_DESC_NETWORK => {
                if size != 4 {
                    return Err(ParseError::Truncated.into());
                }
                let network_id = c.read_u16().map_err(ScanError::Parse)?;
                let network_version = c.read_u16().map_err(ScanError::Parse)?;
                if network_id != proto::NETWORK_ID {
                    return Err(ParseError::NetworkId(network_id).into());
                }
                if !our_version_found && network_version == proto::NETWORK_VERSION {
                    our_version_found = true;
                }
            }
            proto::DSI_DESC_TIME => {
                if size != 8 {
                    return Err(ParseError::TimeDescriptor.into());
                }
                let protocol_version = c.read_u8().map_err(ScanError::Parse)?;
                if protocol_version != 0 {
                    return Err(ParseError::TimeDescriptor.into());
                }
                let gps_seconds = c.read_u32().map_err(ScanError::Parse)?;
                let leap_offset = c.read_u8().map_err(ScanError::Parse)?;
                c.skip(2).map_err(ScanError::Parse)?; // daylight saving bytes
                session.clock.set(gps_seconds, leap_offset);
                info!(
                    broadcast_time = %session.clock.to_utc(gps_seconds),
                    "broadcast time reference set"
                );
            }
            proto::DSI_DESC_SERVER_VERSION => {
                let text = c.take(size).map_err(ScanError::Parse)?;
                session.server_version = Some(String::from_utf8_lossy(text).into_owned());
            }
            proto::DSI_DESC_SERVER_ID => {
                let text = c.take(size).map_err(ScanError::Parse)?;
                let id = String::from_utf8_lossy(text).into_owned();
                info!(server_id = %id, "download server identified");
                session.server_id = Some(id);
            }
            proto::DSI_DESC_FACTORY_MODE => {
                session.factory_descriptor_seen = true;
                c.skip(size).map_err(ScanError::Parse)?;
                info!("factory mode descriptor present");
            }
            _ => {
                warn!(tag, size, "unknown private descriptor skipped");
                c.skip(size).map_err(ScanError::Parse)?;
            }
        }
        first_descriptor = false;
    }

    if !our_version_found {
        return Err(ParseError::NetworkVersion(proto::NETWORK_VERSION).into());
    }
    Ok(())
}
