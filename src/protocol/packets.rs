//! # Typed Packets
//!
//! The packets the proxy interprets, in the 1.8 (protocol 47) layout. Every
//! other packet id travels as a raw [`Packet`] and is never decoded.
//!
//! Fields the proxy never rewrites are kept as opaque trailing bytes
//! (`rest`), so a decoded packet re-encodes to exactly the bytes it came
//! from.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::packet::Packet;
use crate::core::types::{WireRead, WireWrite};
use crate::error::{ProtocolError, Result};
use crate::protocol::state::{ConnectionState, Direction};

/// A packet type with a fixed (state, direction, id) and a field layout.
pub trait GamePacket: Sized + Clone + Send + Sync + 'static {
    const ID: i32;
    const STATE: ConnectionState;
    const DIRECTION: Direction;

    fn decode(buf: &mut Bytes) -> Result<Self>;
    fn encode(&self, buf: &mut BytesMut);

    /// Decode from a raw packet, rejecting a mismatched id or leftover bytes.
    fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.id != Self::ID {
            return Err(ProtocolError::MalformedPacket(format!(
                "expected packet 0x{:02x}, got 0x{:02x}",
                Self::ID,
                packet.id
            )));
        }
        let mut buf = packet.payload.clone();
        let decoded = Self::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} trailing bytes after packet 0x{:02x}",
                buf.len(),
                Self::ID
            )));
        }
        Ok(decoded)
    }

    fn to_packet(&self) -> Packet {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        Packet::new(Self::ID, buf.freeze())
    }
}

/// JSON chat component carrying plain text.
pub fn text_component(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl GamePacket for Handshake {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Handshake;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            protocol_version: buf.read_varint()?,
            server_address: buf.read_string(255)?,
            server_port: buf.read_u16()?,
            next_state: buf.read_varint()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.protocol_version);
        buf.write_string(&self.server_address);
        buf.put_u16(self.server_port);
        buf.write_varint(self.next_state);
    }
}

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub name: String,
}

impl GamePacket for LoginStart {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            name: buf.read_string(16)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Bytes,
    pub verify_token: Bytes,
}

impl GamePacket for EncryptionResponse {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            shared_secret: buf.read_byte_array(1024)?,
            verify_token: buf.read_byte_array(1024)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_byte_array(&self.shared_secret);
        buf.write_byte_array(&self.verify_token);
    }
}

/// Disconnect during login; `reason` is a JSON chat component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl GamePacket for LoginDisconnect {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            reason: buf.read_string(32767)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.reason);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Bytes,
    pub verify_token: Bytes,
}

impl GamePacket for EncryptionRequest {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            server_id: buf.read_string(20)?,
            public_key: buf.read_byte_array(4096)?,
            verify_token: buf.read_byte_array(1024)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.server_id);
        buf.write_byte_array(&self.public_key);
        buf.write_byte_array(&self.verify_token);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub uuid: String,
    pub username: String,
}

impl GamePacket for LoginSuccess {
    const ID: i32 = 0x02;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            uuid: buf.read_string(36)?,
            username: buf.read_string(16)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.uuid);
        buf.write_string(&self.username);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl GamePacket for SetCompression {
    const ID: i32 = 0x03;
    const STATE: ConnectionState = ConnectionState::Login;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            threshold: buf.read_varint()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.threshold);
    }
}

// ============================================================================
// Play, serverbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message: String,
}

impl GamePacket for ChatMessage {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            message: buf.read_string(100)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub on_ground: bool,
}

impl GamePacket for Player {
    const ID: i32 = 0x03;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_bool(self.on_ground);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub on_ground: bool,
}

impl GamePacket for PlayerPosition {
    const ID: i32 = 0x04;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            x: buf.read_f64()?,
            y: buf.read_f64()?,
            z: buf.read_f64()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        buf.put_f64(self.z);
        buf.write_bool(self.on_ground);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLook {
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl GamePacket for PlayerLook {
    const ID: i32 = 0x05;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            yaw: buf.read_f32()?,
            pitch: buf.read_f32()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f32(self.yaw);
        buf.put_f32(self.pitch);
        buf.write_bool(self.on_ground);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPositionAndLook {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl GamePacket for PlayerPositionAndLook {
    const ID: i32 = 0x06;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            x: buf.read_f64()?,
            y: buf.read_f64()?,
            z: buf.read_f64()?,
            yaw: buf.read_f32()?,
            pitch: buf.read_f32()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        buf.put_f64(self.z);
        buf.put_f32(self.yaw);
        buf.put_f32(self.pitch);
        buf.write_bool(self.on_ground);
    }
}

/// Ability flags the client reports (bit 0x02 = flying).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerboundAbilities {
    pub flags: i8,
    pub flying_speed: f32,
    pub walking_speed: f32,
}

impl GamePacket for ServerboundAbilities {
    const ID: i32 = 0x13;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Serverbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            flags: buf.read_i8()?,
            flying_speed: buf.read_f32()?,
            walking_speed: buf.read_f32()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i8(self.flags);
        buf.put_f32(self.flying_speed);
        buf.put_f32(self.walking_speed);
    }
}

// ============================================================================
// Play, clientbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGame {
    pub entity_id: i32,
    /// Game mode, dimension, difficulty, player cap, level type, debug flag
    pub rest: Bytes,
}

impl GamePacket for JoinGame {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_i32()?,
            rest: buf.read_rest(),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        buf.put_slice(&self.rest);
    }
}

/// Chat line shown to the player; position 0 = chat box, 1 = system, 2 = action bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChatMessage {
    pub json: String,
    pub position: i8,
}

impl ServerChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            json: text_component(text),
            position: 1,
        }
    }
}

impl GamePacket for ServerChatMessage {
    const ID: i32 = 0x02;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            json: buf.read_string(32767)?,
            position: buf.read_i8()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.json);
        buf.put_i8(self.position);
    }
}

/// Server-driven teleport. Each bit of `flags` marks the matching field
/// (x, y, z, yaw, pitch from bit 0 up) as relative.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerPositionAndLook {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub flags: u8,
}

impl GamePacket for ServerPositionAndLook {
    const ID: i32 = 0x08;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            x: buf.read_f64()?,
            y: buf.read_f64()?,
            z: buf.read_f64()?,
            yaw: buf.read_f32()?,
            pitch: buf.read_f32()?,
            flags: buf.read_u8()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        buf.put_f64(self.z);
        buf.put_f32(self.yaw);
        buf.put_f32(self.pitch);
        buf.put_u8(self.flags);
    }
}

/// Positions in spawn/teleport packets are fixed-point with 5 fractional bits.
pub fn from_fixed_point(value: i32) -> f64 {
    f64::from(value) / 32.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlayer {
    pub entity_id: i32,
    pub uuid: u128,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub yaw: u8,
    pub pitch: u8,
    /// Held item and entity metadata
    pub rest: Bytes,
}

impl GamePacket for SpawnPlayer {
    const ID: i32 = 0x0c;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            uuid: buf.read_u128()?,
            x: buf.read_i32()?,
            y: buf.read_i32()?,
            z: buf.read_i32()?,
            yaw: buf.read_u8()?,
            pitch: buf.read_u8()?,
            rest: buf.read_rest(),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_u128(self.uuid);
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_i32(self.z);
        buf.put_u8(self.yaw);
        buf.put_u8(self.pitch);
        buf.put_slice(&self.rest);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnMob {
    pub entity_id: i32,
    pub kind: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Angles, velocity and entity metadata
    pub rest: Bytes,
}

impl GamePacket for SpawnMob {
    const ID: i32 = 0x0f;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            kind: buf.read_u8()?,
            x: buf.read_i32()?,
            y: buf.read_i32()?,
            z: buf.read_i32()?,
            rest: buf.read_rest(),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_u8(self.kind);
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_i32(self.z);
        buf.put_slice(&self.rest);
    }
}

/// Velocity in units of 1/8000 block per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityVelocity {
    pub entity_id: i32,
    pub velocity_x: i16,
    pub velocity_y: i16,
    pub velocity_z: i16,
}

impl GamePacket for EntityVelocity {
    const ID: i32 = 0x12;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            velocity_x: buf.read_i16()?,
            velocity_y: buf.read_i16()?,
            velocity_z: buf.read_i16()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_i16(self.velocity_x);
        buf.put_i16(self.velocity_y);
        buf.put_i16(self.velocity_z);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyEntities {
    pub entity_ids: Vec<i32>,
}

impl GamePacket for DestroyEntities {
    const ID: i32 = 0x13;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let count = buf.read_varint()?;
        let count = usize::try_from(count)
            .map_err(|_| ProtocolError::MalformedPacket(format!("entity count {count}")))?;
        // Each id takes at least one byte.
        buf.need(count)?;
        let entity_ids = (0..count)
            .map(|_| buf.read_varint())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entity_ids })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_ids.len() as i32);
        for id in &self.entity_ids {
            buf.write_varint(*id);
        }
    }
}

/// Movement in 1/32 block units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRelativeMove {
    pub entity_id: i32,
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
    pub on_ground: bool,
}

impl GamePacket for EntityRelativeMove {
    const ID: i32 = 0x15;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            dx: buf.read_i8()?,
            dy: buf.read_i8()?,
            dz: buf.read_i8()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_i8(self.dx);
        buf.put_i8(self.dy);
        buf.put_i8(self.dz);
        buf.write_bool(self.on_ground);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLookAndRelativeMove {
    pub entity_id: i32,
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
    pub yaw: u8,
    pub pitch: u8,
    pub on_ground: bool,
}

impl GamePacket for EntityLookAndRelativeMove {
    const ID: i32 = 0x17;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            dx: buf.read_i8()?,
            dy: buf.read_i8()?,
            dz: buf.read_i8()?,
            yaw: buf.read_u8()?,
            pitch: buf.read_u8()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_i8(self.dx);
        buf.put_i8(self.dy);
        buf.put_i8(self.dz);
        buf.put_u8(self.yaw);
        buf.put_u8(self.pitch);
        buf.write_bool(self.on_ground);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTeleport {
    pub entity_id: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub yaw: u8,
    pub pitch: u8,
    pub on_ground: bool,
}

impl GamePacket for EntityTeleport {
    const ID: i32 = 0x18;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            entity_id: buf.read_varint()?,
            x: buf.read_i32()?,
            y: buf.read_i32()?,
            z: buf.read_i32()?,
            yaw: buf.read_u8()?,
            pitch: buf.read_u8()?,
            on_ground: buf.read_bool()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_varint(self.entity_id);
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_i32(self.z);
        buf.put_u8(self.yaw);
        buf.put_u8(self.pitch);
        buf.write_bool(self.on_ground);
    }
}

/// Abilities granted by the server. Flag bits: 0x01 invulnerable,
/// 0x02 flying, 0x04 allow flying, 0x08 creative.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAbilities {
    pub flags: i8,
    pub flying_speed: f32,
    pub field_of_view: f32,
}

impl PlayerAbilities {
    pub const FLYING: i8 = 0x02;
    pub const ALLOW_FLYING: i8 = 0x04;
}

impl GamePacket for PlayerAbilities {
    const ID: i32 = 0x39;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            flags: buf.read_i8()?,
            flying_speed: buf.read_f32()?,
            field_of_view: buf.read_f32()?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i8(self.flags);
        buf.put_f32(self.flying_speed);
        buf.put_f32(self.field_of_view);
    }
}

/// Disconnect during play; `reason` is a JSON chat component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayDisconnect {
    pub reason: String,
}

impl GamePacket for PlayDisconnect {
    const ID: i32 = 0x40;
    const STATE: ConnectionState = ConnectionState::Play;
    const DIRECTION: Direction = Direction::Clientbound;

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            reason: buf.read_string(32767)?,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.write_string(&self.reason);
    }
}
