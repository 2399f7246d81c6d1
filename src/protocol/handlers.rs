//! Built-in interceptors and the default pipeline.
//!
//! Tracking interceptors only observe: they update the tunnel's player and
//! entity state and always pass. Module interceptors sit in front of the
//! trackers on the same packet so tracking sees what is actually sent.

use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::modules::{antiknockback, flight, nofall};
use crate::protocol::commands;
use crate::protocol::dispatcher::{HandlerResult, Pipeline};
use crate::protocol::handshake;
use crate::protocol::packets::{
    from_fixed_point, DestroyEntities, EntityLookAndRelativeMove, EntityRelativeMove,
    EntityTeleport, JoinGame, PlayDisconnect, Player, PlayerAbilities, PlayerLook, PlayerPosition,
    PlayerPositionAndLook, ServerPositionAndLook, ServerboundAbilities, SpawnMob, SpawnPlayer,
};
use crate::service::tunnel::Tunnel;
use crate::service::world::{angle_to_degrees, EntityKind, Location};

type Handled<P> = Result<HandlerResult<P>>;

pub async fn track_player(packet: Player, tunnel: Arc<Tunnel>) -> Handled<Player> {
    tunnel.with_player(|player| player.on_ground = packet.on_ground);
    Ok(HandlerResult::Pass)
}

pub async fn track_position(packet: PlayerPosition, tunnel: Arc<Tunnel>) -> Handled<PlayerPosition> {
    tunnel.with_player(|player| {
        player.location.x = packet.x;
        player.location.y = packet.y;
        player.location.z = packet.z;
        player.on_ground = packet.on_ground;
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_look(packet: PlayerLook, tunnel: Arc<Tunnel>) -> Handled<PlayerLook> {
    tunnel.with_player(|player| {
        player.location.yaw = packet.yaw;
        player.location.pitch = packet.pitch;
        player.on_ground = packet.on_ground;
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_position_look(
    packet: PlayerPositionAndLook,
    tunnel: Arc<Tunnel>,
) -> Handled<PlayerPositionAndLook> {
    tunnel.with_player(|player| {
        player.location = Location {
            x: packet.x,
            y: packet.y,
            z: packet.z,
            yaw: packet.yaw,
            pitch: packet.pitch,
        };
        player.on_ground = packet.on_ground;
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_abilities(
    packet: ServerboundAbilities,
    tunnel: Arc<Tunnel>,
) -> Handled<ServerboundAbilities> {
    tunnel.with_player(|player| player.flying = packet.flags & PlayerAbilities::FLYING != 0);
    Ok(HandlerResult::Pass)
}

pub async fn track_join(packet: JoinGame, tunnel: Arc<Tunnel>) -> Handled<JoinGame> {
    tunnel.with_player(|player| player.entity_id = Some(packet.entity_id));
    tunnel.with_entities(|entities| entities.reset());
    info!(tunnel = tunnel.id(), entity_id = packet.entity_id, "Joined game");
    Ok(HandlerResult::Pass)
}

/// Server teleport; flag bits mark fields relative to the current location.
pub async fn track_teleport(
    packet: ServerPositionAndLook,
    tunnel: Arc<Tunnel>,
) -> Handled<ServerPositionAndLook> {
    let relative = |bit: u8| packet.flags & (1 << bit) != 0;
    tunnel.with_player(|player| {
        let location = &mut player.location;
        location.x = if relative(0) { location.x + packet.x } else { packet.x };
        location.y = if relative(1) { location.y + packet.y } else { packet.y };
        location.z = if relative(2) { location.z + packet.z } else { packet.z };
        location.yaw = if relative(3) { location.yaw + packet.yaw } else { packet.yaw };
        location.pitch = if relative(4) { location.pitch + packet.pitch } else { packet.pitch };
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_spawn_player(packet: SpawnPlayer, tunnel: Arc<Tunnel>) -> Handled<SpawnPlayer> {
    let location = Location {
        x: from_fixed_point(packet.x),
        y: from_fixed_point(packet.y),
        z: from_fixed_point(packet.z),
        yaw: angle_to_degrees(packet.yaw),
        pitch: angle_to_degrees(packet.pitch),
    };
    tunnel.with_entities(|entities| entities.spawn(packet.entity_id, EntityKind::Player, location));
    Ok(HandlerResult::Pass)
}

pub async fn track_spawn_mob(packet: SpawnMob, tunnel: Arc<Tunnel>) -> Handled<SpawnMob> {
    let location = Location::at(
        from_fixed_point(packet.x),
        from_fixed_point(packet.y),
        from_fixed_point(packet.z),
    );
    tunnel.with_entities(|entities| {
        entities.spawn(packet.entity_id, EntityKind::Mob(packet.kind), location)
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_destroy(
    packet: DestroyEntities,
    tunnel: Arc<Tunnel>,
) -> Handled<DestroyEntities> {
    tunnel.with_entities(|entities| entities.destroy(&packet.entity_ids));
    Ok(HandlerResult::Pass)
}

pub async fn track_relative_move(
    packet: EntityRelativeMove,
    tunnel: Arc<Tunnel>,
) -> Handled<EntityRelativeMove> {
    tunnel.with_entities(|entities| {
        entities.move_relative(packet.entity_id, packet.dx, packet.dy, packet.dz, packet.on_ground)
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_look_relative_move(
    packet: EntityLookAndRelativeMove,
    tunnel: Arc<Tunnel>,
) -> Handled<EntityLookAndRelativeMove> {
    tunnel.with_entities(|entities| {
        entities.move_relative(packet.entity_id, packet.dx, packet.dy, packet.dz, packet.on_ground);
        entities.look(
            packet.entity_id,
            angle_to_degrees(packet.yaw),
            angle_to_degrees(packet.pitch),
        );
    });
    Ok(HandlerResult::Pass)
}

pub async fn track_entity_teleport(
    packet: EntityTeleport,
    tunnel: Arc<Tunnel>,
) -> Handled<EntityTeleport> {
    let location = Location {
        x: from_fixed_point(packet.x),
        y: from_fixed_point(packet.y),
        z: from_fixed_point(packet.z),
        yaw: angle_to_degrees(packet.yaw),
        pitch: angle_to_degrees(packet.pitch),
    };
    tunnel.with_entities(|entities| entities.teleport(packet.entity_id, location, packet.on_ground));
    Ok(HandlerResult::Pass)
}

/// Relay the server's kick to the client and close the tunnel.
pub async fn handle_play_disconnect(
    packet: PlayDisconnect,
    tunnel: Arc<Tunnel>,
) -> Handled<PlayDisconnect> {
    info!(tunnel = tunnel.id(), reason = %packet.reason, "Kicked by server");
    tunnel.send_to_client(&packet).await?;
    tunnel.close();
    Ok(HandlerResult::Reject)
}

/// Every built-in interceptor, in dispatch order.
///
/// # Errors
/// Fails only if two packet types claim the same (direction, state, id).
pub fn default_pipeline() -> Result<Pipeline> {
    let mut builder = Pipeline::builder();
    builder
        .intercept(handshake::handle_handshake)?
        .intercept(handshake::handle_login_start)?
        .intercept(handshake::handle_encryption_response)?
        .intercept(handshake::handle_encryption_request)?
        .intercept(handshake::handle_set_compression)?
        .intercept(handshake::handle_login_success)?
        .intercept(handshake::handle_login_disconnect)?;

    builder
        .intercept(commands::handle_chat)?
        .intercept(nofall::force_on_ground::<Player>)?
        .intercept(track_player)?
        .intercept(nofall::force_on_ground::<PlayerPosition>)?
        .intercept(track_position)?
        .intercept(nofall::force_on_ground::<PlayerLook>)?
        .intercept(track_look)?
        .intercept(nofall::force_on_ground::<PlayerPositionAndLook>)?
        .intercept(track_position_look)?
        .intercept(track_abilities)?;

    builder
        .intercept(track_join)?
        .intercept(track_teleport)?
        .intercept(track_spawn_player)?
        .intercept(track_spawn_mob)?
        .intercept(track_destroy)?
        .intercept(track_relative_move)?
        .intercept(track_look_relative_move)?
        .intercept(track_entity_teleport)?
        .intercept(antiknockback::replace_velocity)?
        .intercept(flight::keep_flight_allowed)?
        .intercept(handle_play_disconnect)?;

    Ok(builder.build())
}
