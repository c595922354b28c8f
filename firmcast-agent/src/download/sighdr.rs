//! Module signature header
//!
//! Every assembled (and decrypted) module opens with a fixed-magic header
//! naming the component it belongs to, its index within the update, and
//! the payload size. The payload follows the header.

use crate::error::DownloadError;
use crate::section::cursor::Cursor;

pub const MODULE_SIGNATURE: [u8; 17] = *b"BDC\tMOD\tSIG\tHDR\t\0";
pub const SIGNATURE_STRUCT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub header_size: u16,
    pub component_name: String,
    pub module_version: u16,
    pub module_index: u16,
    pub module_count: u16,
    pub payload_size: u32,
    pub payload_offset: u32,
}

impl SignatureHeader {
    /// The module payload that follows the header. Bounds were validated
    /// during parsing.
    pub fn payload<'a>(&self, module: &'a [u8]) -> &'a [u8] {
        &module[self.header_size as usize..]
    }
}

pub fn parse_signature_header(module: &[u8]) -> Result<SignatureHeader, DownloadError> {
    let mut c = Cursor::new(module);
    let magic = c.take(MODULE_SIGNATURE.len()).map_err(DownloadError::Parse)?;
    if magic != MODULE_SIGNATURE {
        return Err(DownloadError::Signature);
    }
    let version = c.read_u8().map_err(DownloadError::Parse)?;
    if version != SIGNATURE_STRUCT_VERSION {
        return Err(DownloadError::HeaderVersion(version));
    }
    let header_size = c.read_u16().map_err(DownloadError::Parse)?;
    c.skip(1).map_err(DownloadError::Parse)?; // reserved
    let name_offset = c.read_u16().map_err(DownloadError::Parse)? as usize;
    let module_version = c.read_u16().map_err(DownloadError::Parse)?;
    let module_index = c.read_u16().map_err(DownloadError::Parse)?;
    let module_count = c.read_u16().map_err(DownloadError::Parse)?;
    let payload_size = c.read_u32().map_err(DownloadError::Parse)?;
    let payload_offset = c.read_u32().map_err(DownloadError::Parse)?;

    let header_end = header_size as usize;
    let claimed = u64::from(payload_size) + u64::from(header_size);
    if header_end > module.len() || claimed != module.len() as u64 {
        return Err(DownloadError::SizesDisagree {
            header: payload_size.saturating_add(u32::from(header_size)),
            received: module.len() as u32,
        });
    }

    // Component name is NUL-terminated text inside the header region.
    if name_offset >= header_end {
        return Err(DownloadError::Parse(crate::error::ParseError::Truncated));
    }
    let name_region = &module[name_offset..header_end];
    let name_len = name_region
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(name_region.len());
    let component_name = String::from_utf8_lossy(&name_region[..name_len]).into_owned();

    Ok(SignatureHeader {
        header_size,
        component_name,
        module_version,
        module_index,
        module_count,
        payload_size,
        payload_offset,
    })
}

#[cfg(test)]
pub(crate) mod testsupport {
    use super::{MODULE_SIGNATURE, SIGNATURE_STRUCT_VERSION};

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
}
