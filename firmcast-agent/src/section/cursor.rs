//! Bounds-checked big-endian reader over section bytes
//!
//! Every length field in the wire formats comes off the air and cannot be
//! trusted. The cursor fails closed: any read or skip past the end of the
//! slice is `ParseError::Truncated`, never a partial value.

use crate::error::ParseError;

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        let b = *self.data.get(self.pos).ok_or(ParseError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32, ParseError> {
        let bytes = self.take(3)?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated);
        }
        self.pos += n;
        Ok(())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Split off a sub-cursor over the next `n` bytes, advancing this
    /// cursor past them. Used for nested descriptor blocks whose inner
    /// structure must not be able to run past the declared length.
    pub fn sub(&mut self, n: usize) -> Result<Cursor<'a>, ParseError> {
        Ok(Cursor::new(self.take(n)?))
    }
}

/// Read a section prologue: table id plus the 12-bit section length, and
/// return the table id with a cursor bounded to the declared length.
pub fn begin_section(data: &[u8]) -> Result<(u8, Cursor<'_>), ParseError> {
    let mut outer = Cursor::new(data);
    let table_id = outer.read_u8()?;
    let length = (outer.read_u16()? & 0x0FFF) as usize;
    let body = outer.sub(length.min(outer.remaining()))?;
    Ok((table_id, body))
}
