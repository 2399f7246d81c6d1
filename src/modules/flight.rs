//! Grants client-side flight.
//!
//! Toggling sends the client a fresh abilities packet; while enabled, the
//! server's own abilities updates keep the allow-flying bit set. The
//! `speed` option multiplies the configured flying speed.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{ProtocolError, Result};
use crate::modules::{Module, ModuleState};
use crate::protocol::dispatcher::HandlerResult;
use crate::protocol::packets::PlayerAbilities;
use crate::service::tunnel::Tunnel;

pub const IDENTIFIER: &str = "flight";

/// Option holding the flying speed multiplier.
pub const SPEED: &str = "speed";

const MAX_SPEED: u32 = 100;

/// Field of view modifier the vanilla client uses by default.
const DEFAULT_FIELD_OF_VIEW: f32 = 0.1;

#[derive(Debug)]
pub struct Flight {
    state: ModuleState,
    speed: AtomicU32,
}

impl Default for Flight {
    fn default() -> Self {
        Self {
            state: ModuleState::new(),
            speed: AtomicU32::new(1),
        }
    }
}

impl Flight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speed(&self) -> u32 {
        self.speed.load(Ordering::Relaxed)
    }
}

impl Module for Flight {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn description(&self) -> &str {
        "Allows flying in survival"
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }

    fn update(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(tunnel) = self.state.tunnel() else {
                return Ok(());
            };
            let enabled = self.is_enabled();
            let flags = if enabled {
                PlayerAbilities::FLYING | PlayerAbilities::ALLOW_FLYING
            } else {
                0
            };
            tunnel.with_player(|player| player.flying = enabled);
            tunnel
                .send_to_client(&PlayerAbilities {
                    flags,
                    flying_speed: tunnel.config().modules.flight_speed * self.speed() as f32,
                    field_of_view: DEFAULT_FIELD_OF_VIEW,
                })
                .await
        })
    }

    fn set_option(&self, option: &str, value: &str) -> Result<String> {
        if option != SPEED {
            return Err(ProtocolError::ModuleError(format!(
                "'{IDENTIFIER}' has no option '{option}'"
            )));
        }
        let speed = value
            .parse::<u32>()
            .ok()
            .filter(|speed| (1..=MAX_SPEED).contains(speed))
            .ok_or_else(|| {
                ProtocolError::ModuleError(format!(
                    "flight speed must be a whole number from 1 to {MAX_SPEED}, got '{value}'"
                ))
            })?;
        self.speed.store(speed, Ordering::Relaxed);
        Ok(format!("Flight speed multiplier is set to {speed}"))
    }
}

/// Keep flight allowed when the server resends abilities.
pub async fn keep_flight_allowed(
    mut packet: PlayerAbilities,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<PlayerAbilities>> {
    if !tunnel.modules().is_enabled(IDENTIFIER) || packet.flags & PlayerAbilities::ALLOW_FLYING != 0
    {
        return Ok(HandlerResult::Pass);
    }
    packet.flags |= PlayerAbilities::ALLOW_FLYING;
    Ok(HandlerResult::Modify(packet))
}
