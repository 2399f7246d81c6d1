use bytes::{BufMut, Bytes, BytesMut};

use crate::core::types::{varint_len, WireWrite};

/// A raw packet as it appears inside one frame: the packet id and the
/// undecoded field bytes that follow it.
///
/// Packets that no interceptor rewrites are relayed as this value, so the
/// bytes reaching the other leg are exactly the bytes that were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Length of id + payload, the "data length" used by compressed framing.
    pub fn body_len(&self) -> usize {
        varint_len(self.id) + self.payload.len()
    }

    /// Write id + payload into `dst`.
    pub fn write_body(&self, dst: &mut BytesMut) {
        dst.reserve(self.body_len());
        dst.write_varint(self.id);
        dst.put_slice(&self.payload);
    }
}
