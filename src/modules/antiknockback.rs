//! Replaces the knockback the server applies to the player.
//!
//! The `velocity` option takes the replacement as three whole numbers,
//! `x y z`, in the wire's 1/8000 block per tick units. It starts at zero,
//! which cancels knockback outright.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ProtocolError, Result};
use crate::modules::{Module, ModuleState};
use crate::protocol::dispatcher::HandlerResult;
use crate::protocol::packets::EntityVelocity;
use crate::service::tunnel::Tunnel;

pub const IDENTIFIER: &str = "antiknockback";

pub const VELOCITY: &str = "velocity";

#[derive(Debug, Default)]
pub struct AntiKnockback {
    state: ModuleState,
    velocity: Mutex<[i16; 3]>,
}

impl AntiKnockback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn velocity(&self) -> [i16; 3] {
        *self.velocity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Module for AntiKnockback {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn description(&self) -> &str {
        "Ignores velocity changes applied to the player"
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }

    fn set_option(&self, option: &str, value: &str) -> Result<String> {
        if option != VELOCITY {
            return Err(ProtocolError::ModuleError(format!(
                "'{IDENTIFIER}' has no option '{option}'"
            )));
        }
        let parts = value
            .split_whitespace()
            .map(str::parse::<i16>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()
            .and_then(|parts| <[i16; 3]>::try_from(parts).ok())
            .ok_or_else(|| {
                ProtocolError::ModuleError(format!("expected three whole numbers, got '{value}'"))
            })?;
        *self.velocity.lock().unwrap_or_else(PoisonError::into_inner) = parts;
        let [x, y, z] = parts;
        Ok(format!("Knockback is set to x {x}, y {y}, z {z}"))
    }
}

/// Swap velocity updates aimed at the player's own entity for the
/// configured replacement.
pub async fn replace_velocity(
    packet: EntityVelocity,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<EntityVelocity>> {
    let own_entity = tunnel.with_player(|player| player.entity_id);
    if own_entity != Some(packet.entity_id) || !tunnel.modules().is_enabled(IDENTIFIER) {
        return Ok(HandlerResult::Pass);
    }
    let [velocity_x, velocity_y, velocity_z] = tunnel
        .modules()
        .with_module(IDENTIFIER, AntiKnockback::velocity)
        .unwrap_or_default();
    Ok(HandlerResult::Modify(EntityVelocity {
        velocity_x,
        velocity_y,
        velocity_z,
        ..packet
    }))
}
