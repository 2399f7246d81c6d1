//! Wire primitives: VarInts, length-prefixed strings and byte arrays, and
//! bounds-checked fixed-width reads over any [`bytes::Buf`].

use crate::error::{constants, ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Longest encoding of a 32-bit VarInt
pub const MAX_VARINT_LEN: usize = 5;

/// Number of bytes `value` occupies as a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut value = value as u32;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decode a VarInt at the start of `src` without consuming it.
///
/// Returns `Ok(None)` if `src` ends before the VarInt does.
pub fn peek_varint(src: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for (i, byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::InvalidVarInt);
    }
    Ok(None)
}

fn truncated() -> ProtocolError {
    ProtocolError::MalformedPacket(constants::ERR_TRUNCATED_PACKET.to_string())
}

/// Bounds-checked reads used by packet decoders.
pub trait WireRead: Buf {
    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(truncated());
        }
        Ok(())
    }

    fn read_varint(&mut self) -> Result<i32> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_LEN {
            self.need(1)?;
            let byte = self.get_u8();
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(ProtocolError::InvalidVarInt)
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.need(1)?;
        Ok(self.get_u8() != 0)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.get_u8())
    }

    fn read_i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.get_i8())
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.get_u16())
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.get_i16())
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.get_i32())
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.get_f32())
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.get_f64())
    }

    fn read_u128(&mut self) -> Result<u128> {
        self.need(16)?;
        Ok(self.get_u128())
    }

    /// Length-prefixed UTF-8 string of at most `max_chars` characters.
    fn read_string(&mut self, max_chars: usize) -> Result<String> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| truncated())?;
        if len > max_chars * 4 {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_STRING_TOO_LONG.to_string(),
            ));
        }
        self.need(len)?;
        let raw = self.copy_to_bytes(len);
        let text = String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::MalformedPacket(format!("invalid UTF-8: {e}")))?;
        if text.chars().count() > max_chars {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_STRING_TOO_LONG.to_string(),
            ));
        }
        Ok(text)
    }

    /// VarInt-length-prefixed byte array of at most `max_len` bytes.
    fn read_byte_array(&mut self, max_len: usize) -> Result<Bytes> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| truncated())?;
        if len > max_len {
            return Err(ProtocolError::OversizedPacket(len));
        }
        self.need(len)?;
        Ok(self.copy_to_bytes(len))
    }

    /// Everything left in the buffer.
    fn read_rest(&mut self) -> Bytes {
        let len = self.remaining();
        self.copy_to_bytes(len)
    }
}

impl<B: Buf> WireRead for B {}

/// Writers matching [`WireRead`].
pub trait WireWrite: BufMut {
    fn write_varint(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            if value & !0x7f == 0 {
                self.put_u8(value as u8);
                return;
            }
            self.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
    }

    fn write_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn write_byte_array(&mut self, value: &[u8]) {
        self.write_varint(value.len() as i32);
        self.put_slice(value);
    }
}

impl<B: BufMut> WireWrite for B {}
