//! Broadcast fixture builders for the integration suite: sections for
//! every table the agent consumes, plus transport-stream packetization.

use firmcast_agent::download::sighdr::{MODULE_SIGNATURE, SIGNATURE_STRUCT_VERSION};
use firmcast_agent::proto;

const TS_PACKET_LEN: usize = 188;

/// Prefix a body with table id and 12-bit section length.
pub fn wrap_section(table_id: u8, body: &[u8]) -> Vec<u8> {
    let mut section = Vec::with_capacity(body.len() + 3);
    section.push(table_id);
    section.extend_from_slice(&(body.len() as u16 & 0x0FFF).to_be_bytes());
    section.extend_from_slice(body);
    section
}

/// Packetize one section onto a stream id, PUSI on the first packet.
pub fn packetize(pid: u16, section: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut remaining = section;
    let mut first = true;
    while !remaining.is_empty() || first {
        let mut packet = Vec::with_capacity(TS_PACKET_LEN);
        packet.push(0x47);
        let pusi = if first { 0x40 } else { 0x00 };
        packet.push(pusi | ((pid >> 8) as u8 & 0x1F));
        packet.push(pid as u8);
        packet.push(0x10); // payload only, continuity 0
        if first {
            packet.push(0); // pointer field
            first = false;
        }
        let room = TS_PACKET_LEN - packet.len();
        let chunk = remaining.len().min(room);
        packet.extend_from_slice(&remaining[..chunk]);
        remaining = &remaining[chunk..];
        packet.resize(TS_PACKET_LEN, 0xFF);
        out.extend_from_slice(&packet);
    }
    out
}

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

pub struct DsiGroup {
    pub group_id: u32,
    pub organization_id: u32,
    pub model_group: u16,
}

/// Assemble a well-formed server-initiate section.
pub fn build_dsi(groups: &[DsiGroup], gps_seconds: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0, 0]); // table id extension
    body.extend_from_slice(&[0, 0, 0]); // version, section, last section
    body.push(proto::DSMCC_PROTOCOL_DISCRIMINATOR);
    body.push(proto::DSMCC_UNM);
    body.extend_from_slice(&proto::MSG_SERVER_INITIATE.to_be_bytes());
    body.extend_from_slice(&[0, 0, 0, 0]); // transaction id
    body.push(0); // reserved
    body.push(0); // adaptation length
    body.extend_from_slice(&1u16.to_be_bytes()); // message length (nonzero)
    body.extend_from_slice(&[0u8; 20]); // server id
    body.extend_from_slice(&0u16.to_be_bytes()); // compatibility descriptor length
    body.extend_from_slice(&1u16.to_be_bytes()); // private data length (nonzero)
    body.extend_from_slice(&(groups.len() as u16).to_be_bytes());

    for g in groups {
        body.extend_from_slice(&g.group_id.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes()); // group size
        // group compatibility: count + one sub-descriptor
        let mut compat = Vec::new();
        compat.extend_from_slice(&1u16.to_be_bytes());
        compat.push(proto::GROUP_COMPAT_TAG);
        compat.push(6); // descriptor length
        compat.push(proto::GROUP_COMPAT_SPECIFIER);
        compat.extend_from_slice(&g.organization_id.to_be_bytes()[1..]);
        compat.extend_from_slice(&g.model_group.to_be_bytes());
        body.extend_from_slice(&(compat.len() as u16).to_be_bytes());
        body.extend_from_slice(&compat);
        body.extend_from_slice(&0u16.to_be_bytes()); // group info length
    }

    // private descriptors wrapped in a registration descriptor
    let mut inner = Vec::new();
    inner.push(proto::DSI_DESC_NETWORK);
    inner.push(4);
    inner.extend_from_slice(&proto::NETWORK_ID.to_be_bytes());
    inner.extend_from_slice(&proto::NETWORK_VERSION.to_be_bytes());
    inner.push(proto::DSI_DESC_TIME);
    inner.push(8);
    inner.push(0); // time protocol version
    inner.extend_from_slice(&gps_seconds.to_be_bytes());
    inner.push(15); // leap offset
    inner.extend_from_slice(&[0, 0]); // daylight saving

    let mut private = Vec::new();
    private.push(proto::DESC_REGISTRATION);
    private.push((proto::REGISTRATION_LEN + inner.len()) as u8);
    private.extend_from_slice(b"BDC1");
    private.extend_from_slice(&inner);

    body.extend_from_slice(&(private.len() as u16).to_be_bytes());
    body.extend_from_slice(&private);

    wrap_section(proto::TID_UNM, &body)
}

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

/// Assemble a data-block section.
pub fn build_ddb(module_id: u16, block_number: u16, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    // table id extension carries the module id for exact filtering
    body.extend_from_slice(&module_id.to_be_bytes());
    body.extend_from_slice(&[0, 0, 0]); // version, section, last section
    body.push(proto::DSMCC_PROTOCOL_DISCRIMINATOR);
    body.push(proto::DSMCC_UNM);
    body.extend_from_slice(&proto::MSG_DATA_BLOCK.to_be_bytes());
    body.extend_from_slice(&[0, 0, 0, 0]); // download id
    body.push(0xFF); // reserved
    body.push(0); // adaptation length
    body.extend_from_slice(&((6 + data.len()) as u16).to_be_bytes());
    body.extend_from_slice(&module_id.to_be_bytes());
    body.push(1); // module version
    body.push(0); // reserved
    body.extend_from_slice(&block_number.to_be_bytes());
    body.extend_from_slice(data);
    wrap_section(proto::TID_DDM, &body)
}

/// Assemble a module: signature header followed by the payload.
pub fn build_module(
    component_name: &str,
    module_version: u16,
    module_index: u16,
    module_count: u16,
    payload: &[u8],
) -> Vec<u8> {
    let fixed = MODULE_SIGNATURE.len() + 1 + 2 + 1 + 2 + 2 + 2 + 2 + 4 + 4;
    let name_offset = fixed as u16;
    let header_size = (fixed + component_name.len() + 1) as u16;

    let mut module = Vec::new();
    module.extend_from_slice(&MODULE_SIGNATURE);
    module.push(SIGNATURE_STRUCT_VERSION);
    module.extend_from_slice(&header_size.to_be_bytes());
    module.push(0); // reserved
    module.extend_from_slice(&name_offset.to_be_bytes());
    module.extend_from_slice(&module_version.to_be_bytes());
    module.extend_from_slice(&module_index.to_be_bytes());
    module.extend_from_slice(&module_count.to_be_bytes());
    module.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    module.extend_from_slice(&(header_size as u32).to_be_bytes());
    module.extend_from_slice(component_name.as_bytes());
    module.push(0);
    module.extend_from_slice(payload);
    module
}
