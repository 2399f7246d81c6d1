//! Cancels fall damage by reporting every movement as grounded.

use std::sync::Arc;

use crate::error::Result;
use crate::modules::{Module, ModuleState};
use crate::protocol::dispatcher::HandlerResult;
use crate::protocol::packets::{GamePacket, Player, PlayerLook, PlayerPosition, PlayerPositionAndLook};
use crate::service::tunnel::Tunnel;

pub const IDENTIFIER: &str = "nofall";

#[derive(Debug, Default)]
pub struct NoFall {
    state: ModuleState,
}

impl NoFall {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for NoFall {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn description(&self) -> &str {
        "Prevents fall damage"
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }
}

/// Serverbound movement packets carrying an on-ground flag.
pub trait Grounded {
    fn on_ground(&self) -> bool;
    fn set_on_ground(&mut self, on_ground: bool);
}

macro_rules! impl_grounded {
    ($($packet:ty),+) => {
        $(
            impl Grounded for $packet {
                fn on_ground(&self) -> bool {
                    self.on_ground
                }

                fn set_on_ground(&mut self, on_ground: bool) {
                    self.on_ground = on_ground;
                }
            }
        )+
    };
}

impl_grounded!(Player, PlayerPosition, PlayerLook, PlayerPositionAndLook);

/// Rewrite the on-ground flag to `true` while the module is enabled.
pub async fn force_on_ground<P>(mut packet: P, tunnel: Arc<Tunnel>) -> Result<HandlerResult<P>>
where
    P: GamePacket + Grounded,
{
    if packet.on_ground() || !tunnel.modules().is_enabled(IDENTIFIER) {
        return Ok(HandlerResult::Pass);
    }
    packet.set_on_ground(true);
    Ok(HandlerResult::Modify(packet))
}
