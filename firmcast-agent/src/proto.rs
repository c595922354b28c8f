//! Wire constants for the broadcast download network
//!
//! Table ids and stream ids follow the ATSC A/90 / A/97 data broadcast
//! profile. The private descriptor tags and the registration signature
//! belong to the download network operator.

/// Stream id carrying the service tables
pub const PID_PSIP: u16 = 0x1FFB;
/// Stream id carrying the program association table
pub const PID_PAT: u16 = 0x0000;

/// Terrestrial service table
pub const TID_TVCT: u8 = 0xC8;
/// Cable service table
pub const TID_CVCT: u8 = 0xC9;
pub const TID_PAT: u8 = 0x00;
pub const TID_PMT: u8 = 0x02;
/// User-network messages (server-initiate and module-info)
pub const TID_UNM: u8 = 0x3B;
/// Download data messages (data blocks)
pub const TID_DDM: u8 = 0x3C;

pub const DSMCC_PROTOCOL_DISCRIMINATOR: u8 = 0x11;
/// dsmccType for user-network messages
pub const DSMCC_UNM: u8 = 0x03;
/// messageId of a server-initiate message
pub const MSG_SERVER_INITIATE: u16 = 0x1006;
/// messageId of a module-info message
pub const MSG_MODULE_INFO: u16 = 0x1002;
/// messageId of a data-block message
pub const MSG_DATA_BLOCK: u16 = 0x1003;

/// Only these transaction id bits are significant when matching
/// a module-info message against a group candidate.
pub const TRANSACTION_ID_MASK: u32 = 0x0000_FFFE;

/// Service types announcing a data carousel
pub const SERVICE_TYPE_DATA: u16 = 0x04;
pub const SERVICE_TYPE_DOWNLOAD: u16 = 0x05;

/// Elementary stream type for asynchronous data download
pub const STREAM_TYPE_DSMCC: u8 = 0x0B;

/// MPEG registration descriptor tag
pub const DESC_REGISTRATION: u8 = 0x05;

/// Registration signature: three fixed bytes plus a version character
pub const REGISTRATION_BASE: &[u8; 3] = b"BDC";
pub const REGISTRATION_VERSION_FIRST: u8 = b'0';
pub const REGISTRATION_VERSION_LAST: u8 = b'1';
/// Total registration payload length including the version byte
pub const REGISTRATION_LEN: usize = 4;

/// Network identity signaled in the server-initiate private descriptors
pub const NETWORK_ID: u16 = 0x0BDC;
pub const NETWORK_VERSION: u16 = 3;

/// Server-initiate private descriptor tags
pub const DSI_DESC_NETWORK: u8 = 0;
pub const DSI_DESC_TIME: u8 = 3;
pub const DSI_DESC_SERVER_VERSION: u8 = 33;
pub const DSI_DESC_SERVER_ID: u8 = 34;
pub const DSI_DESC_FACTORY_MODE: u8 = 35;

/// Module-info descriptor tags
pub const DII_DESC_SCHEDULE: u8 = 0xBA;
pub const DII_DESC_MODULE_INFO: u8 = 0xB7;
/// Vendor tag opening the compatibility-entries block
pub const DII_DESC_COMPATIBILITY: u8 = 0x82;

/// Group compatibility sub-descriptor identity
pub const GROUP_COMPAT_TAG: u8 = 0x01;
pub const GROUP_COMPAT_SPECIFIER: u8 = 0x01;

/// Longest module name carried forward from signaling
pub const MAX_NAME_BYTES: usize = 31;

/// Broadcast seconds occupy the low 20 bits of the schedule word
pub const BROADCAST_SECONDS_MASK: u32 = 0x000F_FFFF;

/// Component attribute bits from a component directory
pub const ATTR_FIELD_TEST: u16 = 0x0002;
pub const ATTR_FACTORY_TEST: u16 = 0x0004;
pub const ATTR_COMMAND: u16 = 0x8000;

/// Returns true when the four signature bytes match the registration
/// base and carry a version character inside the permitted range.
pub fn registration_matches(signature: &[u8]) -> bool {
    signature.len() >= REGISTRATION_LEN
        && &signature[..3] == REGISTRATION_BASE
        && (REGISTRATION_VERSION_FIRST..=REGISTRATION_VERSION_LAST).contains(&signature[3])
}
