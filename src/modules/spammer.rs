//! Sends a chat message to the server on an interval. The `message` option
//! replaces the line at runtime.

use futures::future::BoxFuture;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{ProtocolError, Result};
use crate::modules::{Module, ModuleState, Ticker, TickingModule};
use crate::protocol::packets::ChatMessage;
use crate::protocol::state::ConnectionState;

pub const IDENTIFIER: &str = "spammer";

pub const MESSAGE: &str = "message";

/// Longest line a vanilla client may send.
const MAX_MESSAGE_CHARS: usize = 100;

#[derive(Debug)]
pub struct Spammer {
    state: ModuleState,
    ticker: Ticker,
    message: Mutex<String>,
}

impl Spammer {
    pub fn new(message: String, interval: Duration) -> Self {
        Self {
            state: ModuleState::new(),
            ticker: Ticker::new(interval),
            message: Mutex::new(message),
        }
    }

    pub fn message(&self) -> String {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Module for Spammer {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    fn description(&self) -> &str {
        "Repeats a chat message"
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }

    fn set_option(&self, option: &str, value: &str) -> Result<String> {
        if option != MESSAGE {
            return Err(ProtocolError::ModuleError(format!(
                "'{IDENTIFIER}' has no option '{option}'"
            )));
        }
        let message = value.trim();
        if message.is_empty() || message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ProtocolError::ModuleError(format!(
                "spam message must be 1 to {MAX_MESSAGE_CHARS} characters"
            )));
        }
        *self.message.lock().unwrap_or_else(PoisonError::into_inner) = message.to_string();
        Ok(format!("Spam message is set to {message}"))
    }
}

impl TickingModule for Spammer {
    fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    fn tick(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(tunnel) = self.state.tunnel() else {
                return Ok(());
            };
            if tunnel.state() != ConnectionState::Play {
                return Ok(());
            }
            tunnel
                .send_to_server(&ChatMessage {
                    message: self.message(),
                })
                .await
        })
    }
}
